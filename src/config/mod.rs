//! Configuration document : `models` array plus operational knobs, loaded
//! from JSON with per-section fallback (spec §6 "Configuration document"),
//! grounded on `api_gemini::client::dynamic_config`'s mtime-poll hot
//! reload.

mod private
{
  use std::path::{ Path, PathBuf };
  use std::time::{ Duration, SystemTime };
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };

  #[ cfg( feature = "logging" ) ]
  use tracing::{ info, warn };

  use crate::cost::BudgetLimits;
  use crate::dispatcher::RetryPolicy;
  use crate::error::Error;
  use crate::registry::{ ModelDescriptor, ModelRegistry, RejectedDescriptor };

  /// Health-check knobs (spec §6 defaults : interval 60s / timeout 10s /
  /// failures-threshold 3).
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct HealthCheckConfig
  {
    /// Seconds between probes of a healthy model.
    pub interval_secs : u64,
    /// Seconds before a probe attempt is itself considered timed out.
    pub timeout_secs : u64,
    /// Consecutive failures before a model is marked unhealthy.
    pub failures_threshold : u32,
  }

  impl Default for HealthCheckConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { interval_secs : 60, timeout_secs : 10, failures_threshold : 3 }
    }
  }

  /// Rate-limiting knobs (spec §6 defaults : threshold 90% / window 60s).
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct RateLimitingConfig
  {
    /// Proactive-block utilisation threshold, in `[0.0, 1.0]`.
    pub threshold : f64,
    /// Sliding window width, in seconds.
    pub window_secs : u64,
  }

  impl Default for RateLimitingConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { threshold : 0.90, window_secs : 60 }
    }
  }

  /// Caching knobs (spec §6 default : TTL 3600s). The decision engine
  /// itself has no cache ; this is carried through for adapters/callers
  /// that layer one on top.
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct CachingConfig
  {
    /// Default cache entry lifetime, in seconds.
    pub default_ttl_secs : u64,
  }

  impl Default for CachingConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { default_ttl_secs : 3_600 }
    }
  }

  /// Budget knobs (spec §6 defaults : daily 100.0 / alert at 80%).
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct BudgetConfig
  {
    /// Total daily USD ceiling across every model.
    pub daily_total_usd : f64,
    /// Utilisation fraction at which a budget alert is raised, ahead of
    /// the hard ceiling.
    pub alert_at : f64,
  }

  impl Default for BudgetConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { daily_total_usd : 100.0, alert_at : 0.80 }
    }
  }

  impl BudgetConfig
  {
    /// Project this section onto the runtime [`BudgetLimits`] the
    /// [`crate::cost::CostLedger`] enforces.
    #[ inline ]
    #[ must_use ]
    pub fn to_limits( self ) -> BudgetLimits
    {
      BudgetLimits { daily_total_usd : Some( self.daily_total_usd ), daily_per_model_usd : None }
    }
  }

  /// Quality-evaluation knobs : the plane itself never scores quality,
  /// it only stores whatever an external evaluator reports (spec §9 Open
  /// Question). This section configures how strict the Selector should
  /// treat the absence of a quality signal.
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct QualityEvaluationConfig
  {
    /// Whether to enable the performance-store quality component at all.
    pub enabled : bool,
  }

  impl Default for QualityEvaluationConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { enabled : true }
    }
  }

  /// Failover knobs (spec §6 defaults : max-retries 3 / base-backoff 2s /
  /// alert-threshold 3 / window 1h).
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct FailoverConfig
  {
    /// Maximum distinct models tried per task.
    pub max_retries : usize,
    /// Starting backoff between cross-model attempts, in seconds.
    pub base_backoff_secs : u64,
    /// Failovers within `window_secs` before the excessive-failover alert
    /// fires for a model.
    pub alert_threshold : usize,
    /// Trailing window the alert threshold counts within, in seconds.
    pub window_secs : u64,
  }

  impl Default for FailoverConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { max_retries : 3, base_backoff_secs : 2, alert_threshold : 3, window_secs : 3_600 }
    }
  }

  /// Concurrency knobs (spec §6 default : per-provider 10).
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct ConcurrencyConfig
  {
    /// Concurrent in-flight requests permitted per provider.
    pub per_provider : usize,
    /// Concurrent in-flight requests permitted across the whole plane.
    pub global : usize,
  }

  impl Default for ConcurrencyConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { per_provider : 10, global : 64 }
    }
  }

  impl FailoverConfig
  {
    /// Project this section onto the runtime [`RetryPolicy`] the
    /// Dispatcher's own per-call retry loop uses as its cross-model
    /// backoff starting point.
    #[ inline ]
    #[ must_use ]
    pub fn to_retry_policy( self ) -> RetryPolicy
    {
      RetryPolicy
      {
        max_retries : self.max_retries as u32,
        base_delay : Duration::from_secs( self.base_backoff_secs ),
        max_delay : Duration::from_secs( 60 ),
        backoff_multiplier : 2.0,
        enable_jitter : true,
      }
    }
  }

  /// The operational-knobs half of the configuration document. Every
  /// field falls back to its documented default independently if its
  /// section fails to parse (spec §6 "violations on operational knobs
  /// cause the system to fall back to documented defaults").
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  #[ serde( default ) ]
  pub struct OperationalConfig
  {
    /// See [`HealthCheckConfig`].
    pub health_check : HealthCheckConfig,
    /// See [`RateLimitingConfig`].
    pub rate_limiting : RateLimitingConfig,
    /// See [`CachingConfig`].
    pub caching : CachingConfig,
    /// See [`BudgetConfig`].
    pub budget : BudgetConfig,
    /// See [`QualityEvaluationConfig`].
    pub quality_evaluation : QualityEvaluationConfig,
    /// See [`FailoverConfig`].
    pub failover : FailoverConfig,
    /// See [`ConcurrencyConfig`].
    pub concurrency : ConcurrencyConfig,
  }

  impl Default for OperationalConfig
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        health_check : HealthCheckConfig::default(),
        rate_limiting : RateLimitingConfig::default(),
        caching : CachingConfig::default(),
        budget : BudgetConfig::default(),
        quality_evaluation : QualityEvaluationConfig::default(),
        failover : FailoverConfig::default(),
        concurrency : ConcurrencyConfig::default(),
      }
    }
  }

  /// Raw shape of the configuration document on disk, before per-section
  /// validation is applied.
  #[ derive( Debug, Clone, Deserialize ) ]
  struct RawDocument
  {
    #[ serde( default ) ]
    models : Vec< serde_json::Value >,
    #[ serde( default ) ]
    operational : serde_json::Value,
  }

  /// A fully parsed configuration document : the validated model list plus
  /// whichever descriptors were rejected, and the operational knobs
  /// (individually defaulted where their section failed to parse).
  #[ derive( Debug, Clone ) ]
  pub struct ConfigDocument
  {
    /// Descriptors that parsed and validated successfully.
    pub models : Vec< ModelDescriptor >,
    /// Descriptors dropped during parsing or registry validation, with
    /// the reason for each.
    pub rejected : Vec< RejectedDescriptor >,
    /// The operational knobs, defaulted section-by-section as needed.
    pub operational : OperationalConfig,
  }

  impl ConfigDocument
  {
    /// Parse `raw` JSON text into a [`ConfigDocument`], dropping invalid
    /// model descriptors individually and falling back to defaults for
    /// any operational section that fails to parse, rather than failing
    /// the whole load (spec §6 "Configuration document").
    #[ inline ]
    pub fn parse( raw : &str ) -> Result< Self, Error >
    {
      let document : RawDocument = serde_json::from_str( raw )?;

      let mut models = Vec::new();
      let mut rejected = Vec::new();
      for value in document.models
      {
        match serde_json::from_value::< ModelDescriptor >( value.clone() )
        {
          Ok( descriptor ) => models.push( descriptor ),
          Err( error ) =>
          {
            let id = value.get( "id" ).and_then( serde_json::Value::as_str ).unwrap_or( "<unknown>" ).to_string();
            rejected.push( RejectedDescriptor { id, reason : error.to_string() } );
          }
        }
      }

      let operational = parse_operational_sections( &document.operational );

      Ok( Self { models, rejected, operational } )
    }
  }

  /// Parse `value`'s `key` field into `T`, falling back to `T::default()`
  /// on its own if that single section fails to parse — a malformed
  /// sibling section must never discard an otherwise-valid one (spec §6
  /// "violations on operational knobs cause the system to fall back to
  /// documented defaults").
  fn parse_section< T : Default + for< 'de > Deserialize< 'de > >( value : &serde_json::Value, key : &str ) -> T
  {
    let Some( section ) = value.get( key ) else { return T::default() };
    serde_json::from_value( section.clone() ).unwrap_or_else( | _error |
    {
      #[ cfg( feature = "logging" ) ]
      warn!( section = key, "operational config section failed to parse, falling back to defaults" );
      T::default()
    } )
  }

  /// Parse each [`OperationalConfig`] subsection independently from the
  /// raw `operational` JSON value, so one malformed section (e.g. a
  /// non-object `budget`) does not wipe out an otherwise-valid sibling
  /// section like `failover`.
  fn parse_operational_sections( operational : &serde_json::Value ) -> OperationalConfig
  {
    OperationalConfig
    {
      health_check : parse_section( operational, "health_check" ),
      rate_limiting : parse_section( operational, "rate_limiting" ),
      caching : parse_section( operational, "caching" ),
      budget : parse_section( operational, "budget" ),
      quality_evaluation : parse_section( operational, "quality_evaluation" ),
      failover : parse_section( operational, "failover" ),
      concurrency : parse_section( operational, "concurrency" ),
    }
  }

  struct WatcherState
  {
    document : ConfigDocument,
    last_modified : Option< SystemTime >,
  }

  /// Watches a configuration file on disk, reloading it into a live
  /// [`ModelRegistry`] whenever its mtime advances (spec §6 "Reload is by
  /// timestamp poll of the file").
  #[ derive( Debug, Clone ) ]
  pub struct ConfigWatcher
  {
    path : PathBuf,
    state : std::sync::Arc< RwLock< WatcherState > >,
  }

  impl ConfigWatcher
  {
    /// Load `path` once, returning a watcher primed with the initial
    /// document.
    #[ inline ]
    pub async fn open( path : impl AsRef< Path > ) -> Result< Self, Error >
    {
      let path = path.as_ref().to_path_buf();
      let raw = tokio::fs::read_to_string( &path ).await?;
      let document = ConfigDocument::parse( &raw )?;
      let last_modified = tokio::fs::metadata( &path ).await.ok().and_then( | m | m.modified().ok() );

      Ok( Self { path, state : std::sync::Arc::new( RwLock::new( WatcherState { document, last_modified } ) ) } )
    }

    /// The document as of the last successful (re)load.
    #[ inline ]
    #[ must_use ]
    pub fn current( &self ) -> ConfigDocument
    {
      self.state.read().document.clone()
    }

    /// Check the file's mtime and reload if it has advanced. Returns
    /// `true` if a reload happened. A read or parse failure leaves the
    /// previously loaded document in place.
    #[ inline ]
    pub async fn poll( &self ) -> bool
    {
      let Ok( metadata ) = tokio::fs::metadata( &self.path ).await else { return false };
      let Ok( modified ) = metadata.modified() else { return false };

      {
        let state = self.state.read();
        if state.last_modified == Some( modified )
        {
          return false;
        }
      }

      let Ok( raw ) = tokio::fs::read_to_string( &self.path ).await else { return false };
      let Ok( document ) = ConfigDocument::parse( &raw ) else { return false };

      let mut state = self.state.write();
      state.document = document;
      state.last_modified = Some( modified );

      #[ cfg( feature = "logging" ) ]
      info!( path = %self.path.display(), "configuration document reloaded" );

      true
    }

    /// Reload `registry` in place from the current document, returning
    /// whatever descriptors were rejected.
    #[ inline ]
    #[ must_use ]
    pub fn sync_registry( &self, registry : &ModelRegistry ) -> Vec< RejectedDescriptor >
    {
      registry.reload( self.current().models )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn parses_models_and_defaults_operational_section()
    {
      let raw = r#"
      {
        "models":
        [
          {
            "id": "gpt-4", "provider": "openai", "display_name": "GPT-4",
            "capabilities": [ "text-generation" ],
            "cost_per_1k_input": 0.03, "cost_per_1k_output": 0.06,
            "requests_per_minute": 60, "tokens_per_minute": 100000,
            "context_window": 8000, "typical_latency_ms": 2000,
            "enabled": true, "tags": []
          }
        ]
      }
      "#;
      let document = ConfigDocument::parse( raw ).expect( "should parse" );
      assert_eq!( document.models.len(), 1 );
      assert!( document.rejected.is_empty() );
      assert_eq!( document.operational.budget.daily_total_usd, 100.0 );
    }

    #[ test ]
    fn invalid_model_descriptor_is_rejected_individually()
    {
      let raw = r#"
      {
        "models":
        [
          { "id": "bad" },
          {
            "id": "good", "provider": "openai", "display_name": "Good",
            "capabilities": [ "text-generation" ],
            "cost_per_1k_input": 0.01, "cost_per_1k_output": 0.01,
            "requests_per_minute": 60, "tokens_per_minute": 100000,
            "context_window": 8000, "typical_latency_ms": 500,
            "enabled": true, "tags": []
          }
        ]
      }
      "#;
      let document = ConfigDocument::parse( raw ).expect( "should parse" );
      assert_eq!( document.models.len(), 1 );
      assert_eq!( document.rejected.len(), 1 );
      assert_eq!( document.rejected[ 0 ].id, "bad" );
    }

    #[ test ]
    fn malformed_operational_section_falls_back_to_defaults()
    {
      let raw = r#"{ "models": [], "operational": { "budget": "not-an-object" } }"#;
      let document = ConfigDocument::parse( raw ).expect( "should parse" );
      assert_eq!( document.operational, OperationalConfig::default() );
    }

    #[ test ]
    fn malformed_section_does_not_discard_a_valid_sibling_section()
    {
      let raw = r#"
      {
        "models": [],
        "operational":
        {
          "budget": "not-an-object",
          "failover": { "max_retries": 7, "base_backoff_secs": 9, "alert_threshold": 2, "window_secs": 120 }
        }
      }
      "#;
      let document = ConfigDocument::parse( raw ).expect( "should parse" );
      assert_eq!( document.operational.budget, BudgetConfig::default() );
      assert_eq!
      (
        document.operational.failover,
        FailoverConfig { max_retries : 7, base_backoff_secs : 9, alert_threshold : 2, window_secs : 120 }
      );
    }

    #[ test ]
    fn budget_section_projects_onto_runtime_limits()
    {
      let config = BudgetConfig { daily_total_usd : 50.0, alert_at : 0.8 };
      let limits = config.to_limits();
      assert_eq!( limits.daily_total_usd, Some( 50.0 ) );
    }
  }
}

pub use private::
{
  BudgetConfig, CachingConfig, ConcurrencyConfig, ConfigDocument, ConfigWatcher,
  FailoverConfig, HealthCheckConfig, OperationalConfig, QualityEvaluationConfig,
  RateLimitingConfig,
};
