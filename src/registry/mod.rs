//! Model Registry : in-memory catalog of model descriptors (spec §4.1).

mod private
{
  use std::collections::HashMap;
  use std::path::PathBuf;
  use std::sync::Arc;
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };
  use tokio::io::AsyncWriteExt;

  use crate::error::Error;

  /// Immutable-once-loaded description of a single model a provider exposes.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct ModelDescriptor
  {
    /// Globally unique id within a registry load (invariant §3.1).
    pub id : String,
    /// Vendor name, e.g. "openai", "anthropic", "local".
    pub provider : String,
    /// Human-readable name for logs and UIs.
    pub display_name : String,
    /// What the model can do : "text-generation", "code-generation", "analysis", ...
    pub capabilities : Vec< String >,
    /// USD per 1k input tokens.
    pub cost_per_1k_input : f64,
    /// USD per 1k output tokens.
    pub cost_per_1k_output : f64,
    /// Requests-per-minute limit enforced by the Rate-Limit Tracker.
    pub requests_per_minute : u32,
    /// Tokens-per-minute limit enforced by the Rate-Limit Tracker.
    pub tokens_per_minute : u32,
    /// Maximum context window, in tokens.
    pub context_window : u32,
    /// Vendor-declared typical latency, used by `max_latency_ms` constraints.
    pub typical_latency_ms : u64,
    /// Whether the descriptor currently participates in selection.
    pub enabled : bool,
    /// Free-form metadata, never consulted by selection logic.
    pub tags : Vec< String >,
  }

  impl ModelDescriptor
  {
    /// Average of input/output cost per 1k tokens, used by the Selector's
    /// cost sub-score.
    #[ inline ]
    #[ must_use ]
    pub fn avg_cost_per_1k( &self ) -> f64
    {
      ( self.cost_per_1k_input + self.cost_per_1k_output ) / 2.0
    }

    #[ inline ]
    fn validate( &self ) -> Result< (), String >
    {
      if self.id.trim().is_empty()
      {
        return Err( "model id must not be empty".to_string() );
      }
      if self.provider.trim().is_empty()
      {
        return Err( "provider must not be empty".to_string() );
      }
      if self.requests_per_minute == 0
      {
        return Err( "requests_per_minute must be > 0".to_string() );
      }
      if self.tokens_per_minute == 0
      {
        return Err( "tokens_per_minute must be > 0".to_string() );
      }
      if self.cost_per_1k_input < 0.0 || self.cost_per_1k_output < 0.0
      {
        return Err( "costs must be non-negative".to_string() );
      }
      Ok( () )
    }
  }

  /// A descriptor that failed validation during a registry load, kept for
  /// diagnostics instead of failing the whole load (spec §4.1).
  #[ derive( Debug, Clone ) ]
  pub struct RejectedDescriptor
  {
    /// The id the offending descriptor claimed, when parseable.
    pub id : String,
    /// Why it was rejected.
    pub reason : String,
  }

  /// In-memory catalog of model descriptors, queryable by id / provider /
  /// capability. Reloads swap in a freshly built snapshot atomically.
  #[ derive( Debug, Clone ) ]
  pub struct ModelRegistry
  {
    snapshot : Arc< RwLock< Arc< SnapshotInner > > >,
    /// Backing configuration document `upsert` rewrites, when configured
    /// (spec §4.1 "rewrite the backing document atomically").
    persist_path : Option< PathBuf >,
  }

  #[ derive( Debug, Default ) ]
  struct SnapshotInner
  {
    by_id : HashMap< String, ModelDescriptor >,
  }

  impl ModelRegistry
  {
    /// Build a registry from a list of candidate descriptors, rejecting
    /// invalid or duplicate-id ones individually rather than failing the
    /// whole load.
    #[ inline ]
    #[ must_use ]
    pub fn load( candidates : Vec< ModelDescriptor > ) -> ( Self, Vec< RejectedDescriptor > )
    {
      let mut by_id = HashMap::new();
      let mut rejected = Vec::new();

      for descriptor in candidates
      {
        if let Err( reason ) = descriptor.validate()
        {
          rejected.push( RejectedDescriptor { id : descriptor.id.clone(), reason } );
          continue;
        }
        if by_id.contains_key( &descriptor.id )
        {
          rejected.push( RejectedDescriptor
          {
            id : descriptor.id.clone(),
            reason : "duplicate model id within this load".to_string(),
          } );
          continue;
        }
        by_id.insert( descriptor.id.clone(), descriptor );
      }

      let registry = Self
      {
        snapshot : Arc::new( RwLock::new( Arc::new( SnapshotInner { by_id } ) ) ),
        persist_path : None,
      };
      ( registry, rejected )
    }

    /// Attach the path of the backing configuration document so that
    /// future [`ModelRegistry::upsert`] calls rewrite it atomically,
    /// instead of only updating the in-memory snapshot.
    #[ inline ]
    #[ must_use ]
    pub fn with_persist_path( mut self, path : impl Into< PathBuf > ) -> Self
    {
      self.persist_path = Some( path.into() );
      self
    }

    /// Replace the current catalog with a freshly validated one, published
    /// as a single atomic pointer swap (spec §5 "Registry").
    #[ inline ]
    pub fn reload( &self, candidates : Vec< ModelDescriptor > ) -> Vec< RejectedDescriptor >
    {
      let ( fresh, rejected ) = Self::load( candidates );
      let fresh_inner = fresh.snapshot.read().clone();
      *self.snapshot.write() = fresh_inner;
      rejected
    }

    /// Atomically rewrite the backing descriptor list with one additional
    /// or updated descriptor (spec §4.1 `upsert`). When a
    /// [`ModelRegistry::with_persist_path`] document path is configured,
    /// the updated catalog is also written back to it via a temp-file
    /// write, fsync, and rename so a crash mid-write never leaves a
    /// partially-written document behind; without a configured path the
    /// update is in-memory only.
    #[ inline ]
    pub async fn upsert( &self, descriptor : ModelDescriptor ) -> Result< (), Error >
    {
      descriptor.validate().map_err( Error::Configuration )?;

      let fresh =
      {
        let mut guard = self.snapshot.write();
        let mut by_id = guard.by_id.clone();
        by_id.insert( descriptor.id.clone(), descriptor );
        let fresh = Arc::new( SnapshotInner { by_id } );
        *guard = fresh.clone();
        fresh
      };

      if let Some( path ) = &self.persist_path
      {
        Self::persist_snapshot( path, &fresh ).await?;
      }
      Ok( () )
    }

    /// Write-temp-file / fsync / rename sequence that rewrites the backing
    /// document's `models` array in place, preserving whatever operational
    /// section already lives in the document on disk.
    async fn persist_snapshot( path : &std::path::Path, snapshot : &SnapshotInner ) -> Result< (), Error >
    {
      let mut document = match tokio::fs::read_to_string( path ).await
      {
        Ok( raw ) => serde_json::from_str::< serde_json::Value >( &raw ).unwrap_or_else( | _error | serde_json::json!( {} ) ),
        Err( _error ) => serde_json::json!( {} ),
      };
      if !document.is_object()
      {
        document = serde_json::json!( {} );
      }

      let mut models : Vec< &ModelDescriptor > = snapshot.by_id.values().collect();
      models.sort_by( | a, b | a.id.cmp( &b.id ) );
      document[ "models" ] = serde_json::to_value( models )?;

      let rendered = serde_json::to_string_pretty( &document )?;
      let tmp_path = path.with_extension( "tmp" );

      {
        let mut file = tokio::fs::File::create( &tmp_path ).await?;
        file.write_all( rendered.as_bytes() ).await?;
        file.sync_all().await?;
      }
      tokio::fs::rename( &tmp_path, path ).await?;
      Ok( () )
    }

    /// Look up a single descriptor by id.
    #[ inline ]
    #[ must_use ]
    pub fn get( &self, id : &str ) -> Option< ModelDescriptor >
    {
      self.snapshot.read().by_id.get( id ).cloned()
    }

    /// All descriptors belonging to a given provider.
    #[ inline ]
    #[ must_use ]
    pub fn by_provider( &self, provider : &str ) -> Vec< ModelDescriptor >
    {
      self.snapshot.read().by_id.values()
        .filter( | d | d.provider == provider )
        .cloned()
        .collect()
    }

    /// All descriptors carrying a given capability tag.
    #[ inline ]
    #[ must_use ]
    pub fn by_capability( &self, capability : &str ) -> Vec< ModelDescriptor >
    {
      self.snapshot.read().by_id.values()
        .filter( | d | d.capabilities.iter().any( | c | c == capability ) )
        .cloned()
        .collect()
    }

    /// All enabled descriptors, regardless of capability or provider.
    #[ inline ]
    #[ must_use ]
    pub fn all_enabled( &self ) -> Vec< ModelDescriptor >
    {
      self.snapshot.read().by_id.values()
        .filter( | d | d.enabled )
        .cloned()
        .collect()
    }

    /// Total number of descriptors currently loaded.
    #[ inline ]
    #[ must_use ]
    pub fn len( &self ) -> usize
    {
      self.snapshot.read().by_id.len()
    }

    /// Whether the registry currently holds zero descriptors.
    #[ inline ]
    #[ must_use ]
    pub fn is_empty( &self ) -> bool
    {
      self.len() == 0
    }
  }
}

pub use private::{ ModelDescriptor, ModelRegistry, RejectedDescriptor };

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn descriptor( id : &str ) -> ModelDescriptor
  {
    ModelDescriptor
    {
      id : id.to_string(),
      provider : "openai".to_string(),
      display_name : id.to_string(),
      capabilities : vec![ "text-generation".to_string() ],
      cost_per_1k_input : 0.01,
      cost_per_1k_output : 0.02,
      requests_per_minute : 60,
      tokens_per_minute : 10_000,
      context_window : 8192,
      typical_latency_ms : 500,
      enabled : true,
      tags : Vec::new(),
    }
  }

  #[ test ]
  fn load_rejects_duplicate_id_within_same_load()
  {
    let ( registry, rejected ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ), descriptor( "gpt-4" ) ] );
    assert_eq!( registry.len(), 1 );
    assert_eq!( rejected.len(), 1 );
    assert_eq!( rejected[ 0 ].id, "gpt-4" );
  }

  #[ test ]
  fn load_rejects_invalid_descriptor_without_failing_whole_load()
  {
    let mut bad = descriptor( "broken" );
    bad.requests_per_minute = 0;
    let ( registry, rejected ) = ModelRegistry::load( vec![ descriptor( "good" ), bad ] );
    assert_eq!( registry.len(), 1 );
    assert!( registry.get( "good" ).is_some() );
    assert_eq!( rejected.len(), 1 );
    assert_eq!( rejected[ 0 ].id, "broken" );
  }

  #[ test ]
  fn reload_atomically_replaces_snapshot()
  {
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ) ] );
    assert!( registry.get( "gpt-4" ).is_some() );
    let rejected = registry.reload( vec![ descriptor( "claude-3" ) ] );
    assert!( rejected.is_empty() );
    assert!( registry.get( "gpt-4" ).is_none() );
    assert!( registry.get( "claude-3" ).is_some() );
  }

  #[ tokio::test ]
  async fn upsert_adds_new_descriptor()
  {
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ) ] );
    registry.upsert( descriptor( "claude-3" ) ).await.unwrap();
    assert_eq!( registry.len(), 2 );
  }

  #[ tokio::test ]
  async fn upsert_rejects_invalid_descriptor()
  {
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ) ] );
    let mut bad = descriptor( "broken" );
    bad.provider = String::new();
    assert!( registry.upsert( bad ).await.is_err() );
    assert_eq!( registry.len(), 1 );
  }

  #[ tokio::test ]
  async fn upsert_rewrites_the_backing_document_atomically()
  {
    let dir = std::env::temp_dir().join( format!( "api_model_plane_registry_test_{:?}", std::thread::current().id() ) );
    tokio::fs::create_dir_all( &dir ).await.unwrap();
    let path = dir.join( "models.json" );
    tokio::fs::write( &path, r#"{ "models": [], "operational": { "budget": { "daily_total_usd": 42.0 } } }"# ).await.unwrap();

    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ) ] );
    let registry = registry.with_persist_path( path.clone() );
    registry.upsert( descriptor( "claude-3" ) ).await.unwrap();

    let rewritten = tokio::fs::read_to_string( &path ).await.unwrap();
    let value : serde_json::Value = serde_json::from_str( &rewritten ).unwrap();
    let models = value[ "models" ].as_array().unwrap();
    assert_eq!( models.len(), 2 );
    // The operational section untouched by upsert survives the rewrite.
    assert_eq!( value[ "operational" ][ "budget" ][ "daily_total_usd" ], 42.0 );

    tokio::fs::remove_dir_all( &dir ).await.ok();
  }

  #[ test ]
  fn by_provider_and_by_capability_filter_correctly()
  {
    let mut anthropic = descriptor( "claude-3" );
    anthropic.provider = "anthropic".to_string();
    anthropic.capabilities = vec![ "analysis".to_string() ];
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ), anthropic ] );

    assert_eq!( registry.by_provider( "openai" ).len(), 1 );
    assert_eq!( registry.by_capability( "analysis" ).len(), 1 );
    assert_eq!( registry.by_capability( "text-generation" ).len(), 1 );
  }

  #[ test ]
  fn all_enabled_excludes_disabled_descriptors()
  {
    let mut disabled = descriptor( "retired" );
    disabled.enabled = false;
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ), disabled ] );
    assert_eq!( registry.all_enabled().len(), 1 );
    assert_eq!( registry.len(), 2 );
  }

  #[ test ]
  fn is_empty_reflects_empty_registry()
  {
    let ( registry, _ ) = ModelRegistry::load( Vec::new() );
    assert!( registry.is_empty() );
  }
}
