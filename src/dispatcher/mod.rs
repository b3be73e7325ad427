//! Dispatcher : bounded-concurrency request execution with per-call retry
//! (spec §4.7), grounded on `internal::http::retry::{calculate_retry_delay,
//! is_retryable_error}` and the `tokio::sync::Semaphore`-gated concurrency
//! limiting used by `tower-resilience-bulkhead::Bulkhead<S>`.

mod private
{
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::time::{ Duration, Instant };
  use rand::Rng;
  use tokio::sync::Semaphore;

  #[ cfg( feature = "logging" ) ]
  use tracing::{ debug, warn };

  use crate::adapter::{ AdapterRegistry, AdapterResponse };
  use crate::credentials::CredentialStore;
  use crate::error::{ categorize, Error, ErrorCategory };
  use crate::health::HealthTracker;
  use crate::performance::{ PerformanceRecord, PerformanceStore };
  use crate::rate_limit::RateLimitTracker;
  use crate::registry::ModelDescriptor;
  use crate::task::{ AgentKind, Task };

  /// Retry policy for a single dispatch against one model. Cross-model
  /// failover is a separate, outer layer (spec §4.8).
  #[ derive( Debug, Clone ) ]
  pub struct RetryPolicy
  {
    /// Maximum retry attempts after the first (spec §4.7 "retry budget").
    pub max_retries : u32,
    /// Starting backoff delay.
    pub base_delay : Duration,
    /// Ceiling on any single backoff delay.
    pub max_delay : Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier : f64,
    /// Whether to add up-to-50% random jitter to each delay.
    pub enable_jitter : bool,
  }

  impl Default for RetryPolicy
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        max_retries : 3,
        base_delay : Duration::from_millis( 250 ),
        max_delay : Duration::from_secs( 10 ),
        backoff_multiplier : 2.0,
        enable_jitter : true,
      }
    }
  }

  /// Exponential backoff with optional jitter, matching
  /// `internal::http::retry::calculate_retry_delay`.
  #[ inline ]
  #[ must_use ]
  pub fn calculate_retry_delay( attempt : u32, policy : &RetryPolicy ) -> Duration
  {
    let base_delay_ms = policy.base_delay.as_millis() as f64;
    let backoff_delay_ms = base_delay_ms * policy.backoff_multiplier.powi( ( attempt.saturating_sub( 1 ) ) as i32 );
    let mut delay_ms = backoff_delay_ms as u64;

    if policy.enable_jitter && delay_ms > 0
    {
      let jitter_range = delay_ms / 2;
      let jitter = rand::rng().random_range( 0 ..= jitter_range );
      delay_ms += jitter;
    }

    Duration::from_millis( delay_ms.min( policy.max_delay.as_millis() as u64 ) )
  }

  /// Outcome of one dispatch call against a single model, including every
  /// retry attempt made under the model's own retry budget.
  #[ derive( Debug, Clone ) ]
  pub struct DispatchOutcome
  {
    /// The model actually called.
    pub model_id : String,
    /// Attempts made, including the first.
    pub attempts : u32,
    /// Total wall-clock time spent, including backoff sleeps.
    pub elapsed : Duration,
    /// The response, if the call eventually succeeded.
    pub response : Result< AdapterResponse, Error >,
  }

  /// Bounds concurrency (global and per-provider), enforces rate-limit
  /// pre-checks and health gating, invokes the adapter, and retries
  /// transient/rate-limit failures with exponential backoff.
  #[ derive( Debug, Clone ) ]
  pub struct Dispatcher
  {
    global_semaphore : Arc< Semaphore >,
    provider_semaphores : Arc< HashMap< String, Arc< Semaphore > > >,
    health : HealthTracker,
    rate_limit : RateLimitTracker,
    performance : PerformanceStore,
    retry_policy : RetryPolicy,
  }

  impl Dispatcher
  {
    /// Build a dispatcher with `global_limit` total concurrent calls and
    /// `per_provider_limit` concurrent calls per named provider.
    #[ inline ]
    #[ must_use ]
    pub fn new
    (
      global_limit : usize,
      per_provider_limit : usize,
      providers : &[ &str ],
      health : HealthTracker,
      rate_limit : RateLimitTracker,
      performance : PerformanceStore,
      retry_policy : RetryPolicy,
    ) -> Self
    {
      let provider_semaphores = providers.iter()
        .map( | p | ( ( *p ).to_string(), Arc::new( Semaphore::new( per_provider_limit ) ) ) )
        .collect();

      Self
      {
        global_semaphore : Arc::new( Semaphore::new( global_limit ) ),
        provider_semaphores : Arc::new( provider_semaphores ),
        health,
        rate_limit,
        performance,
        retry_policy,
      }
    }

    /// Dispatch `task` against `descriptor`, looking up the adapter for
    /// `descriptor.provider` in `adapters` (spec §4.7 "looks up the
    /// adapter by provider"), retrying transient and rate-limit failures
    /// up to the configured budget. Records a [`PerformanceRecord`] for
    /// every terminal outcome, successful or not.
    #[ inline ]
    pub async fn dispatch
    (
      &self,
      adapters : &AdapterRegistry,
      credentials : &dyn CredentialStore,
      descriptor : &ModelDescriptor,
      task : &Task,
      agent_kind : &AgentKind,
    ) -> DispatchOutcome
    {
      let start = Instant::now();

      let Some( adapter ) = adapters.get( &descriptor.provider ) else
      {
        return self.finish
        (
          descriptor, 0, start, task, agent_kind,
          Err( Error::Configuration( format!( "no adapter registered for provider '{}'", descriptor.provider ) ) ),
        );
      };

      let _global_permit = self.global_semaphore.acquire().await;
      let provider_permit = match self.provider_semaphores.get( &descriptor.provider )
      {
        Some( sem ) => Some( sem.acquire().await ),
        None => None,
      };

      let estimated_tokens = task.max_tokens.unwrap_or( 1_000 );
      let mut attempt = 1u32;

      loop
      {
        if !self.health.is_available( &descriptor.id )
        {
          let outcome = self.finish
          (
            descriptor, attempt, start, task, agent_kind,
            Err( Error::ModelUnavailable( format!( "model {} is currently unhealthy", descriptor.id ) ) ),
          );
          drop( provider_permit );
          return outcome;
        }

        if !self.rate_limit.pre_check( &descriptor.id, descriptor.requests_per_minute, descriptor.tokens_per_minute, estimated_tokens ).is_allowed()
        {
          let outcome = self.finish
          (
            descriptor, attempt, start, task, agent_kind,
            Err( Error::RateLimited( format!( "rate limit pre-check failed for {}", descriptor.id ) ) ),
          );
          drop( provider_permit );
          return outcome;
        }

        let key = match credentials.next_key( &descriptor.provider )
        {
          Ok( key ) => key,
          Err( error ) =>
          {
            let outcome = self.finish( descriptor, attempt, start, task, agent_kind, Err( error ) );
            drop( provider_permit );
            return outcome;
          }
        };

        use secrecy::ExposeSecret;
        let result = adapter.dispatch( &descriptor.id, key.expose_secret(), task ).await;

        match result
        {
          Ok( response ) =>
          {
            self.rate_limit.record( &descriptor.id, ( response.input_tokens + response.output_tokens ) as u32, false );
            self.health.record_success( &descriptor.id );
            let outcome = self.finish( descriptor, attempt, start, task, agent_kind, Ok( response ) );
            drop( provider_permit );
            return outcome;
          }
          Err( error ) =>
          {
            let category = categorize( &error );
            self.rate_limit.record( &descriptor.id, estimated_tokens, category == ErrorCategory::RateLimit );
            self.health.record_failure( &descriptor.id );

            if !category.is_retryable() || attempt > self.retry_policy.max_retries
            {
              #[ cfg( feature = "logging" ) ]
              warn!( model_id = %descriptor.id, attempt, ?category, "dispatch attempt exhausted" );
              let outcome = self.finish( descriptor, attempt, start, task, agent_kind, Err( error ) );
              drop( provider_permit );
              return outcome;
            }

            let delay = calculate_retry_delay( attempt, &self.retry_policy );
            #[ cfg( feature = "logging" ) ]
            debug!( model_id = %descriptor.id, attempt, delay_ms = delay.as_millis(), "retrying dispatch after backoff" );
            tokio::time::sleep( delay ).await;
            attempt += 1;
          }
        }
      }
    }

    fn finish( &self, descriptor : &ModelDescriptor, attempts : u32, start : Instant, task : &Task, agent_kind : &AgentKind, response : Result< AdapterResponse, Error > ) -> DispatchOutcome
    {
      let elapsed = start.elapsed();
      self.performance.record( PerformanceRecord
      {
        model_id : descriptor.id.clone(),
        agent_kind : agent_kind.clone(),
        task_id : task.id.clone(),
        latency_ms : elapsed.as_millis() as u64,
        success : response.is_ok(),
        quality_score : None,
        recorded_at : chrono::Utc::now(),
      } );
      DispatchOutcome { model_id : descriptor.id.clone(), attempts, elapsed, response }
    }
  }

  /// Classify whether a dispatch failure should be escalated to the
  /// failover coordinator instead of being treated as final.
  #[ inline ]
  #[ must_use ]
  pub fn should_failover( error : &Error ) -> bool
  {
    matches!( categorize( error ), ErrorCategory::Transient | ErrorCategory::RateLimit )
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::adapter::{ AdapterRegistry, MockAdapter };
    use crate::credentials::EnvCredentialStore;
    use crate::task::TaskPriority;
    use std::collections::HashMap as Map;

    fn adapters_with( adapter : MockAdapter ) -> AdapterRegistry
    {
      let mut registry = AdapterRegistry::new();
      registry.register( Arc::new( adapter ) );
      registry
    }

    fn descriptor() -> ModelDescriptor
    {
      ModelDescriptor
      {
        id : "m1".to_string(),
        provider : "mock".to_string(),
        display_name : "m1".to_string(),
        capabilities : vec![ "text-generation".to_string() ],
        cost_per_1k_input : 1.0,
        cost_per_1k_output : 1.0,
        requests_per_minute : 60,
        tokens_per_minute : 100_000,
        context_window : 8_000,
        typical_latency_ms : 500,
        enabled : true,
        tags : Vec::new(),
      }
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

    fn credential_store() -> EnvCredentialStore
    {
      let mut keys = Map::new();
      keys.insert( "mock".to_string(), vec![ "k1".to_string() ] );
      EnvCredentialStore::from_keys( keys )
    }

    #[ tokio::test ]
    async fn successful_dispatch_records_performance_and_health()
    {
      let health = HealthTracker::new();
      let performance = PerformanceStore::new();
      let dispatcher = Dispatcher::new( 4, 4, &[ "mock" ], health.clone(), RateLimitTracker::new(), performance.clone(), RetryPolicy::default() );
      let adapters = adapters_with( MockAdapter::new( "mock" ) );
      let credentials = credential_store();

      let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor(), &task(), &crate::task::AgentKind::Implementer ).await;
      assert!( outcome.response.is_ok() );
      assert_eq!( outcome.attempts, 1 );
      assert_eq!( health.status( "m1" ), crate::health::HealthState::Healthy );
      assert_eq!( performance.record_count( "m1" ), 1 );
    }

    #[ tokio::test ]
    async fn non_retryable_error_fails_on_first_attempt()
    {
      let dispatcher = Dispatcher::new( 4, 4, &[ "mock" ], HealthTracker::new(), RateLimitTracker::new(), PerformanceStore::new(), RetryPolicy::default() );
      let adapters = adapters_with( MockAdapter::failing( "mock", Error::Validation( "bad request".to_string() ) ) );
      let credentials = credential_store();

      let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor(), &task(), &crate::task::AgentKind::Implementer ).await;
      assert!( outcome.response.is_err() );
      assert_eq!( outcome.attempts, 1 );
    }

    #[ tokio::test ]
    async fn retryable_error_consumes_full_retry_budget()
    {
      let mut policy = RetryPolicy::default();
      policy.max_retries = 2;
      policy.base_delay = Duration::from_millis( 1 );
      policy.max_delay = Duration::from_millis( 2 );

      let dispatcher = Dispatcher::new( 4, 4, &[ "mock" ], HealthTracker::new(), RateLimitTracker::new(), PerformanceStore::new(), policy );
      let adapters = adapters_with( MockAdapter::failing( "mock", Error::Network( "down".to_string() ) ) );
      let credentials = credential_store();

      let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor(), &task(), &crate::task::AgentKind::Implementer ).await;
      assert!( outcome.response.is_err() );
      assert_eq!( outcome.attempts, 3 );
    }
  }
}

pub use private::{ calculate_retry_delay, should_failover, DispatchOutcome, Dispatcher, RetryPolicy };
