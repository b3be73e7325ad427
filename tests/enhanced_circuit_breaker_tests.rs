//! Integration coverage treating the Health Tracker as the plane's
//! circuit breaker : closed (healthy) -> open (unhealthy, probe backoff
//! running) -> closed again once a probe succeeds.

use std::sync::Arc;
use std::time::Duration;

use api_model_plane::adapter::MockAdapter;
use api_model_plane::
{
  AdapterRegistry, Dispatcher, EnvCredentialStore, Error, HealthState, HealthTracker,
  ModelDescriptor, PerformanceStore, RateLimitTracker, RetryPolicy, Task, TaskPriority,
};

mod integration_tests
{
  use super::*;

  fn descriptor() -> ModelDescriptor
  {
    ModelDescriptor
    {
      id : "flaky-model".to_string(),
      provider : "flaky".to_string(),
      display_name : "Flaky Model".to_string(),
      capabilities : vec![ "text-generation".to_string() ],
      cost_per_1k_input : 0.01,
      cost_per_1k_output : 0.01,
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
      id : "cb-task".to_string(),
      task_type : "chat".to_string(),
      priority : TaskPriority::Medium,
      prompt : "hi".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    }
  }

  fn credentials() -> EnvCredentialStore
  {
    let mut keys = std::collections::HashMap::new();
    keys.insert( "flaky".to_string(), vec![ "k1".to_string() ] );
    EnvCredentialStore::from_keys( keys )
  }

  #[ tokio::test ]
  async fn breaker_opens_after_threshold_failures_through_the_dispatcher() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    let mut policy = RetryPolicy::default();
    policy.max_retries = 0;
    let dispatcher = Dispatcher::new( 4, 4, &[ "flaky" ], health.clone(), RateLimitTracker::new(), PerformanceStore::new(), policy );

    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::failing( "flaky", Error::Network( "down".to_string() ) ) ) );
    let credentials = credentials();

    for _ in 0 .. 3
    {
      let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor(), &task(), &api_model_plane::AgentKind::Implementer ).await;
      assert!( outcome.response.is_err() );
    }

    assert_eq!( health.status( "flaky-model" ), HealthState::Unhealthy );
    assert!( !health.is_available( "flaky-model" ) );

    // The breaker is open : the next dispatch is rejected before the
    // adapter is ever invoked, unlike the three attempts above.
    let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor(), &task(), &api_model_plane::AgentKind::Implementer ).await;
    assert!( matches!( outcome.response, Err( Error::ModelUnavailable( _ ) ) ) );
    assert_eq!( outcome.attempts, 1 );
    Ok( () )
  }

  #[ tokio::test ]
  async fn breaker_closes_again_once_a_call_succeeds() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    for _ in 0 .. 3
    {
      health.record_failure( "flaky-model" );
    }
    assert!( !health.is_available( "flaky-model" ) );

    // A successful call (e.g. an external probe) closes the breaker
    // immediately, independent of the still-pending backoff schedule.
    health.record_success( "flaky-model" );
    assert!( health.is_available( "flaky-model" ) );

    let dispatcher = Dispatcher::new( 4, 4, &[ "flaky" ], health, RateLimitTracker::new(), PerformanceStore::new(), RetryPolicy::default() );
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::new( "flaky" ) ) );
    let outcome = dispatcher.dispatch( &adapters, &credentials(), &descriptor(), &task(), &api_model_plane::AgentKind::Implementer ).await;
    assert!( outcome.response.is_ok() );
    Ok( () )
  }

  #[ test ]
  fn backoff_doubles_per_consecutive_failure_up_to_the_cap() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    health.record_failure( "flaky-model" );
    let first = health.next_retry_at( "flaky-model" ).expect( "should schedule a retry" );

    health.record_failure( "flaky-model" );
    let second = health.next_retry_at( "flaky-model" ).expect( "should schedule a retry" );

    assert!( second > first );
    assert!( second <= std::time::Instant::now() + Duration::from_secs( 5 * 60 ) + Duration::from_secs( 1 ) );
    Ok( () )
  }
}
