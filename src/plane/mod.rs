//! The plane itself : wires Registry, the four trackers, Selector,
//! Dispatcher, Failover Coordinator and Degradation Controller into the
//! single object a caller submits tasks to (spec §2 "data flow of one
//! request"), in the teacher's `Client`-as-composition-root idiom
//! (`client::core::Client`).

mod private
{
  use std::collections::HashSet;
  use std::sync::Arc;
  use std::time::Duration;

  #[ cfg( feature = "logging" ) ]
  use tracing::warn;

  use crate::adapter::AdapterRegistry;
  use crate::config::ConfigDocument;
  use crate::cost::{ calculate_cost, CostLedger, CostRecord };
  use crate::credentials::CredentialStore;
  use crate::degradation::DegradationController;
  use crate::dispatcher::{ DispatchOutcome, Dispatcher };
  use crate::error::Error;
  use crate::failover::FailoverCoordinator;
  use crate::health::HealthTracker;
  use crate::performance::PerformanceStore;
  use crate::rate_limit::RateLimitTracker;
  use crate::registry::{ ModelRegistry, RejectedDescriptor };
  use crate::selector::Selector;
  use crate::task::{ AgentKind, Task };
  #[ cfg( feature = "persistence" ) ]
  use crate::storage::TelemetryStore;

  /// Re-queue attempts a deferred request gets before it is dropped
  /// (spec §4.9 "exceeding `max_retries` (default 5) removes the entry").
  pub const MAX_REQUEUE_ATTEMPTS : u32 = 5;

  /// Minimum interval between probes of a healthy model with nothing else
  /// pending, absent a pending backoff (spec §4.2 "background cadence").
  pub const DEFAULT_PROBE_INTERVAL : Duration = Duration::from_secs( 60 );

  /// What [`ModelPlane::submit`] did with a task.
  #[ derive( Debug ) ]
  pub enum SubmitOutcome
  {
    /// The task was dispatched, successfully or not : see the outcome's
    /// own `response`.
    Dispatched( DispatchOutcome ),
    /// Every tracked provider is currently unavailable ; the task was
    /// appended to the Degradation Controller's deferred queue instead.
    Queued,
  }

  /// Composition root of the decision and dispatch engine : the object an
  /// embedder builds once and submits every agent task to.
  #[ derive( Debug, Clone ) ]
  pub struct ModelPlane
  {
    registry : ModelRegistry,
    health : HealthTracker,
    rate_limit : RateLimitTracker,
    performance : PerformanceStore,
    cost_ledger : CostLedger,
    selector : Selector,
    dispatcher : Dispatcher,
    failover : FailoverCoordinator,
    degradation : DegradationController,
    adapters : AdapterRegistry,
    credentials : Arc< dyn CredentialStore >,
    #[ cfg( feature = "persistence" ) ]
    telemetry : Option< Arc< TelemetryStore > >,
  }

  /// One row of the `health_checks` table (spec §6 "Persistence").
  #[ cfg( feature = "persistence" ) ]
  #[ derive( Debug, Clone, serde::Serialize ) ]
  struct HealthCheckRecord
  {
    model_id : String,
    success : bool,
    latency_ms : Option< u64 >,
    error : Option< String >,
    recorded_at : chrono::DateTime< chrono::Utc >,
  }

  /// One row of the `rate_limit_events` table (spec §6 "Persistence"),
  /// one per completed dispatch attempt (pre-check outcomes are purely
  /// in-memory and not persisted, matching how `health_checks` only
  /// persists completed probes, not the scheduling decision around them).
  #[ cfg( feature = "persistence" ) ]
  #[ derive( Debug, Clone, serde::Serialize ) ]
  struct RateLimitEventRecord
  {
    model_id : String,
    tokens_used : u64,
    rate_limited : bool,
    recorded_at : chrono::DateTime< chrono::Utc >,
  }

  impl ModelPlane
  {
    /// Build a plane from a parsed [`ConfigDocument`], a registry of
    /// provider adapters and a credential source. Returns alongside
    /// whatever descriptors the configuration document's model list
    /// failed to validate (spec §4.1 "rejected individually").
    #[ inline ]
    #[ must_use ]
    pub fn new( config : ConfigDocument, adapters : AdapterRegistry, credentials : Arc< dyn CredentialStore > ) -> ( Self, Vec< RejectedDescriptor > )
    {
      let ( registry, mut rejected ) = ModelRegistry::load( config.models );
      rejected.extend( config.rejected );

      let health = HealthTracker::new();
      let rate_limit = RateLimitTracker::new();
      let performance = PerformanceStore::new();
      let cost_ledger = CostLedger::new( config.operational.budget.to_limits() );
      let degradation = DegradationController::new();

      let providers : Vec< String > = registry.all_enabled().iter()
        .map( | d | d.provider.clone() )
        .collect::< HashSet< _ > >()
        .into_iter()
        .collect();
      for provider in &providers
      {
        degradation.register_provider( provider );
      }
      let provider_refs : Vec< &str > = providers.iter().map( String::as_str ).collect();

      let retry_policy = config.operational.failover.to_retry_policy();

      let selector = Selector::new
      (
        registry.clone(), health.clone(), rate_limit.clone(),
        performance.clone(), cost_ledger.clone(), degradation.clone(),
      );
      let dispatcher = Dispatcher::new
      (
        config.operational.concurrency.global,
        config.operational.concurrency.per_provider,
        &provider_refs,
        health.clone(), rate_limit.clone(), performance.clone(),
        retry_policy.clone(),
      );
      let failover = FailoverCoordinator::new( selector.clone(), dispatcher.clone(), registry.clone(), retry_policy );

      let plane = Self
      {
        registry, health, rate_limit, performance, cost_ledger,
        selector, dispatcher, failover, degradation, adapters, credentials,
        #[ cfg( feature = "persistence" ) ]
        telemetry : None,
      };
      ( plane, rejected )
    }

    /// Attach a telemetry store so the background probe cycle and the
    /// trackers it feeds persist their records (spec §6 "Persistence").
    /// Without this call everything still works, purely in-memory.
    #[ cfg( feature = "persistence" ) ]
    #[ inline ]
    #[ must_use ]
    pub fn with_telemetry( mut self, store : TelemetryStore ) -> Self
    {
      self.telemetry = Some( Arc::new( store ) );
      self
    }

    /// Test-only accessor for the attached telemetry store, to assert on
    /// what got persisted without exposing the field publicly.
    #[ cfg( all( feature = "persistence", test ) ) ]
    fn telemetry_for_test( &self ) -> &TelemetryStore
    {
      self.telemetry.as_ref().expect( "telemetry store must be attached in this test" )
    }

    /// Submit `task` on behalf of `agent_kind`, the single externally
    /// visible entry point for the whole engine (spec §2 data flow).
    ///
    /// When every tracked provider is unavailable the task is queued
    /// instead of dispatched (spec §4.9 `TOTAL_UNAVAILABILITY`); callers
    /// should periodically call [`ModelPlane::resubmit_ready`] to drain
    /// the queue once service recovers.
    #[ inline ]
    pub async fn submit( &self, task : Task, agent_kind : AgentKind ) -> Result< SubmitOutcome, Error >
    {
      if self.degradation.mode().should_queue()
      {
        let task_id = task.id.clone();
        return if self.degradation.enqueue( task )
        {
          Ok( SubmitOutcome::Queued )
        }
        else
        {
          Err( Error::NoModelsAvailable
          {
            task_id,
            message : "every tracked provider is unavailable and the deferred-request queue is full".to_string(),
          } )
        };
      }

      self.dispatch_once( task, agent_kind ).await.map( SubmitOutcome::Dispatched )
    }

    /// Drain every queued request whose backoff has elapsed and retry it,
    /// re-queuing failures up to [`MAX_REQUEUE_ATTEMPTS`] and dropping
    /// them past that (spec §4.9 "background sweeper").
    #[ inline ]
    pub async fn resubmit_ready( &self ) -> Vec< Result< DispatchOutcome, Error > >
    {
      let ready = self.degradation.drain_ready();
      let mut results = Vec::with_capacity( ready.len() );

      for request in ready
      {
        let retry_count = request.retry_count;
        let task_id = request.task.id.clone();
        let task = request.task.clone();
        let outcome = self.dispatch_once( task, AgentKind::Other( "requeued".to_string() ) ).await;

        if outcome.is_err() && retry_count < MAX_REQUEUE_ATTEMPTS
        {
          let requeued = self.degradation.requeue( request );
          #[ cfg( feature = "logging" ) ]
          if !requeued
          {
            warn!( task_id = %task_id, retry_count, "deferred-request queue is full, dropping" );
          }
          #[ cfg( not( feature = "logging" ) ) ]
          let _ = requeued;
        }
        #[ cfg( feature = "logging" ) ]
        if outcome.is_err() && retry_count >= MAX_REQUEUE_ATTEMPTS
        {
          warn!( task_id = %task_id, retry_count, "deferred request exceeded its re-queue budget, dropping" );
        }

        results.push( outcome );
      }
      results
    }

    /// Probe every enabled model that is due (spec §4.2 "runs a
    /// background cadence"), recording each outcome on the health tracker
    /// and, when a telemetry store is attached, appending it to the
    /// `health_checks` table. Record writes never block or fail the probe
    /// itself ; a write failure only flips the Degradation Controller's
    /// monitoring flag.
    #[ inline ]
    pub async fn run_health_probe_cycle( &self )
    {
      for descriptor in self.registry.all_enabled()
      {
        if !self.health.due_for_probe( &descriptor.id, DEFAULT_PROBE_INTERVAL )
        {
          continue;
        }
        let Some( adapter ) = self.adapters.get( &descriptor.provider ) else { continue };
        let Ok( api_key ) = self.credentials.next_key( &descriptor.provider ) else { continue };

        use secrecy::ExposeSecret;
        let outcome = adapter.probe( &descriptor.id, api_key.expose_secret() ).await;

        #[ allow( unused_variables ) ]
        let ( success, latency_ms, error ) = match &outcome
        {
          Ok( latency ) =>
          {
            self.health.record_probe_success( &descriptor.id, Some( *latency ) );
            ( true, Some( *latency ), None::< String > )
          }
          Err( error ) =>
          {
            self.health.record_probe_failure( &descriptor.id, Some( error.to_string() ) );
            ( false, None, Some( error.to_string() ) )
          }
        };

        #[ cfg( feature = "persistence" ) ]
        if let Some( telemetry ) = &self.telemetry
        {
          let record = HealthCheckRecord
          {
            model_id : descriptor.id.clone(),
            success, latency_ms, error,
            recorded_at : chrono::Utc::now(),
          };
          if telemetry.health_checks.append( &record ).await.is_err()
          {
            self.degradation.mark_monitoring_failure();
          }
          else
          {
            self.degradation.mark_monitoring_success();
          }
        }
      }
    }

    async fn dispatch_once( &self, task : Task, agent_kind : AgentKind ) -> Result< DispatchOutcome, Error >
    {
      #[ cfg( feature = "persistence" ) ]
      let events_before = self.failover.events().len();

      let result = self.failover.run( &self.adapters, self.credentials.as_ref(), &task, &agent_kind ).await;

      #[ cfg( feature = "persistence" ) ]
      self.persist_new_failover_events( events_before ).await;

      match result
      {
        Ok( outcome ) =>
        {
          #[ cfg( feature = "persistence" ) ]
          self.persist_dispatch_outcome( &task, &agent_kind, &outcome ).await;

          if let ( Ok( response ), Some( descriptor ) ) = ( &outcome.response, self.registry.get( &outcome.model_id ) )
          {
            self.degradation.mark_provider_success( &descriptor.provider );
            let cost_usd = calculate_cost( descriptor.cost_per_1k_input, descriptor.cost_per_1k_output, response.input_tokens, response.output_tokens );
            let cost_record = CostRecord
            {
              task_id : task.id.clone(),
              model_id : descriptor.id.clone(),
              agent_kind,
              input_tokens : response.input_tokens,
              output_tokens : response.output_tokens,
              cost_usd,
              recorded_at : chrono::Utc::now(),
            };
            #[ cfg( feature = "persistence" ) ]
            self.persist_cost_record( &cost_record ).await;
            self.cost_ledger.record( cost_record );
          }
          Ok( outcome )
        }
        Err( Error::FailoverExhausted { original, attempted, task_id, reason_per_model } ) =>
        {
          for model_id in &attempted
          {
            if let Some( descriptor ) = self.registry.get( model_id )
            {
              self.degradation.mark_provider_failure( &descriptor.provider );
            }
          }
          Err( Error::FailoverExhausted { original, attempted, task_id, reason_per_model } )
        }
        Err( other ) => Err( other ),
      }
    }

    /// Best-effort append of the outcome's `performance_records` and
    /// `rate_limit_events` rows. A write failure never fails the request
    /// itself ; it only flips the Degradation Controller's monitoring
    /// flag, matching §6's telemetry-degradation note.
    #[ cfg( feature = "persistence" ) ]
    async fn persist_dispatch_outcome( &self, task : &Task, agent_kind : &AgentKind, outcome : &DispatchOutcome )
    {
      let Some( telemetry ) = &self.telemetry else { return };

      let tokens_used = outcome.response.as_ref().map_or( 0, | r | r.input_tokens + r.output_tokens );
      let rate_limit_record = RateLimitEventRecord
      {
        model_id : outcome.model_id.clone(),
        tokens_used,
        rate_limited : matches!( &outcome.response, Err( Error::RateLimited( _ ) ) ),
        recorded_at : chrono::Utc::now(),
      };
      self.append_or_signal( &telemetry.rate_limit_events, &rate_limit_record ).await;

      let performance_record = crate::performance::PerformanceRecord
      {
        model_id : outcome.model_id.clone(),
        agent_kind : agent_kind.clone(),
        task_id : task.id.clone(),
        latency_ms : outcome.elapsed.as_millis() as u64,
        success : outcome.response.is_ok(),
        quality_score : None,
        recorded_at : chrono::Utc::now(),
      };
      self.append_or_signal( &telemetry.performance_records, &performance_record ).await;
    }

    #[ cfg( feature = "persistence" ) ]
    async fn persist_cost_record( &self, record : &CostRecord )
    {
      let Some( telemetry ) = &self.telemetry else { return };
      self.append_or_signal( &telemetry.cost_records, record ).await;
    }

    #[ cfg( feature = "persistence" ) ]
    async fn persist_new_failover_events( &self, events_before : usize )
    {
      let Some( telemetry ) = &self.telemetry else { return };
      let events = self.failover.events();
      for event in events.iter().skip( events_before )
      {
        self.append_or_signal( &telemetry.failover_events, event ).await;
      }
    }

    #[ cfg( feature = "persistence" ) ]
    async fn append_or_signal< T : serde::Serialize + Sync >( &self, table : &crate::storage::JsonlTable, record : &T )
    {
      if table.append( record ).await.is_err()
      {
        self.degradation.mark_monitoring_failure();
      }
      else
      {
        self.degradation.mark_monitoring_success();
      }
    }

    /// Read-only access to the model catalog.
    #[ inline ]
    #[ must_use ]
    pub fn registry( &self ) -> &ModelRegistry
    {
      &self.registry
    }

    /// Read-only access to the health tracker.
    #[ inline ]
    #[ must_use ]
    pub fn health( &self ) -> &HealthTracker
    {
      &self.health
    }

    /// Read-only access to the rate-limit tracker.
    #[ inline ]
    #[ must_use ]
    pub fn rate_limit( &self ) -> &RateLimitTracker
    {
      &self.rate_limit
    }

    /// Read-only access to the performance store.
    #[ inline ]
    #[ must_use ]
    pub fn performance( &self ) -> &PerformanceStore
    {
      &self.performance
    }

    /// Read-only access to the cost ledger.
    #[ inline ]
    #[ must_use ]
    pub fn cost_ledger( &self ) -> &CostLedger
    {
      &self.cost_ledger
    }

    /// Read-only access to the selector, for callers that want to preview
    /// a selection without dispatching it.
    #[ inline ]
    #[ must_use ]
    pub fn selector( &self ) -> &Selector
    {
      &self.selector
    }

    /// Read-only access to the degradation controller.
    #[ inline ]
    #[ must_use ]
    pub fn degradation( &self ) -> &DegradationController
    {
      &self.degradation
    }

    /// Read-only access to the failover coordinator, e.g. to inspect
    /// recorded failover events.
    #[ inline ]
    #[ must_use ]
    pub fn failover( &self ) -> &FailoverCoordinator
    {
      &self.failover
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::adapter::MockAdapter;
    use crate::credentials::EnvCredentialStore;
    use crate::task::TaskPriority;
    use std::collections::HashMap as Map;

    fn config_with_one_model() -> ConfigDocument
    {
      let raw = r#"
      {
        "models":
        [
          {
            "id": "m1", "provider": "mock", "display_name": "m1",
            "capabilities": [ "text-generation" ],
            "cost_per_1k_input": 1.0, "cost_per_1k_output": 1.0,
            "requests_per_minute": 60, "tokens_per_minute": 100000,
            "context_window": 8000, "typical_latency_ms": 500,
            "enabled": true, "tags": []
          }
        ]
      }
      "#;
      ConfigDocument::parse( raw ).expect( "fixture document should parse" )
    }

    fn task() -> Task
    {
      Task
      {
        id : "t1".to_string(),
        task_type : "chat".to_string(),
        priority : TaskPriority::Medium,
        prompt : "hello".to_string(),
        parameters : serde_json::Value::Null,
        max_tokens : None,
        temperature : None,
      }
    }

    fn credentials() -> Arc< dyn CredentialStore >
    {
      let mut keys = Map::new();
      keys.insert( "mock".to_string(), vec![ "k1".to_string() ] );
      Arc::new( EnvCredentialStore::from_keys( keys ) )
    }

    #[ tokio::test ]
    async fn submit_dispatches_and_records_cost()
    {
      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::new( "mock" ) ) );

      let ( plane, rejected ) = ModelPlane::new( config_with_one_model(), adapters, credentials() );
      assert!( rejected.is_empty() );

      let outcome = plane.submit( task(), AgentKind::Implementer ).await.expect( "should dispatch" );
      match outcome
      {
        SubmitOutcome::Dispatched( outcome ) => assert!( outcome.response.is_ok() ),
        SubmitOutcome::Queued => panic!( "should not queue when a provider is healthy" ),
      }
      assert_eq!( plane.cost_ledger().len(), 1 );
    }

    #[ tokio::test ]
    async fn total_unavailability_queues_instead_of_dispatching()
    {
      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::failing( "mock", Error::Network( "down".to_string() ) ) ) );

      let ( plane, _rejected ) = ModelPlane::new( config_with_one_model(), adapters, credentials() );
      for _ in 0 .. crate::degradation::PROVIDER_FAILURE_THRESHOLD
      {
        plane.degradation().mark_provider_failure( "mock" );
      }

      let outcome = plane.submit( task(), AgentKind::Implementer ).await.expect( "should queue rather than error" );
      assert!( matches!( outcome, SubmitOutcome::Queued ) );
      assert_eq!( plane.degradation().queue_depth(), 1 );
    }

    #[ tokio::test ]
    async fn health_probe_cycle_records_a_successful_probe()
    {
      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::new( "mock" ) ) );

      let ( plane, _rejected ) = ModelPlane::new( config_with_one_model(), adapters, credentials() );
      plane.run_health_probe_cycle().await;

      let detail = plane.health().status_detail( "m1" );
      assert_eq!( detail.state, crate::health::HealthState::Healthy );
      assert!( detail.last_latency_ms.is_some() );
    }

    #[ tokio::test ]
    async fn health_probe_cycle_records_a_failed_probe()
    {
      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::failing( "mock", Error::Network( "down".to_string() ) ) ) );

      let ( plane, _rejected ) = ModelPlane::new( config_with_one_model(), adapters, credentials() );
      plane.run_health_probe_cycle().await;

      let detail = plane.health().status_detail( "m1" );
      assert_eq!( detail.consecutive_failures, 1 );
      assert!( detail.last_error.is_some() );
    }

    #[ cfg( feature = "persistence" ) ]
    #[ tokio::test ]
    async fn submit_persists_performance_rate_limit_and_cost_rows()
    {
      use crate::storage::TelemetryStore;

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::new( "mock" ) ) );

      let dir = std::env::temp_dir().join( format!( "api_model_plane_persist_test_{:?}", std::thread::current().id() ) );
      let ( plane, _rejected ) = ModelPlane::new( config_with_one_model(), adapters, credentials() );
      let plane = plane.with_telemetry( TelemetryStore::rooted_at( &dir ) );

      plane.submit( task(), AgentKind::Implementer ).await.expect( "should dispatch" );

      let performance : Vec< crate::performance::PerformanceRecord > = plane.telemetry_for_test().performance_records.read_all().await.expect( "read back performance rows" );
      assert_eq!( performance.len(), 1 );
      assert_eq!( performance[ 0 ].model_id, "m1" );

      let rate_limit_rows : Vec< serde_json::Value > = plane.telemetry_for_test().rate_limit_events.read_all().await.expect( "read back rate-limit rows" );
      assert_eq!( rate_limit_rows.len(), 1 );

      let cost_rows : Vec< CostRecord > = plane.telemetry_for_test().cost_records.read_all().await.expect( "read back cost rows" );
      assert_eq!( cost_rows.len(), 1 );
      assert_eq!( cost_rows[ 0 ].model_id, "m1" );

      let _ = tokio::fs::remove_dir_all( dir ).await;
    }

    #[ cfg( feature = "persistence" ) ]
    #[ tokio::test ]
    async fn failover_events_are_persisted_when_a_failover_occurs()
    {
      use crate::storage::TelemetryStore;

      let raw = r#"
      {
        "models":
        [
          {
            "id": "m1", "provider": "a", "display_name": "m1",
            "capabilities": [ "text-generation" ],
            "cost_per_1k_input": 1.0, "cost_per_1k_output": 1.0,
            "requests_per_minute": 60, "tokens_per_minute": 100000,
            "context_window": 8000, "typical_latency_ms": 500,
            "enabled": true, "tags": []
          },
          {
            "id": "m2", "provider": "b", "display_name": "m2",
            "capabilities": [ "text-generation" ],
            "cost_per_1k_input": 1.0, "cost_per_1k_output": 1.0,
            "requests_per_minute": 60, "tokens_per_minute": 100000,
            "context_window": 8000, "typical_latency_ms": 500,
            "enabled": true, "tags": []
          }
        ],
        "operational":
        {
          "failover": { "max_retries": 0, "base_backoff_secs": 0, "alert_threshold": 3, "window_secs": 3600 }
        }
      }
      "#;
      let config = ConfigDocument::parse( raw ).expect( "fixture document should parse" );

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::failing( "a", Error::Network( "down".to_string() ) ) ) );
      adapters.register( Arc::new( MockAdapter::new( "b" ) ) );

      let mut keys = Map::new();
      keys.insert( "a".to_string(), vec![ "k".to_string() ] );
      keys.insert( "b".to_string(), vec![ "k".to_string() ] );
      let credentials : Arc< dyn CredentialStore > = Arc::new( EnvCredentialStore::from_keys( keys ) );

      let dir = std::env::temp_dir().join( format!( "api_model_plane_persist_failover_{:?}", std::thread::current().id() ) );
      let ( plane, _rejected ) = ModelPlane::new( config, adapters, credentials );
      let plane = plane.with_telemetry( TelemetryStore::rooted_at( &dir ) );

      let outcome = plane.submit( task(), AgentKind::Implementer ).await.expect( "should fail over to m2" );
      match outcome
      {
        SubmitOutcome::Dispatched( outcome ) => assert!( outcome.response.is_ok() ),
        SubmitOutcome::Queued => panic!( "should not queue, m2 is healthy" ),
      }

      let failover_rows : Vec< crate::failover::FailoverEvent > = plane.telemetry_for_test().failover_events.read_all().await.expect( "read back failover rows" );
      assert_eq!( failover_rows.len(), 1 );
      assert_eq!( failover_rows[ 0 ].original_model, "m1" );
      assert_eq!( failover_rows[ 0 ].alternative_model, "m2" );

      let _ = tokio::fs::remove_dir_all( dir ).await;
    }
  }
}

pub use private::{ ModelPlane, SubmitOutcome, MAX_REQUEUE_ATTEMPTS };
