//! Integration coverage for cross-model failover : the Failover
//! Coordinator retrying against alternatives once a dispatch exhausts
//! its own retry budget, and the excessive-failover alert cadence.

use std::sync::Arc;
use std::time::Duration;

use api_model_plane::adapter::MockAdapter;
use api_model_plane::
{
  AdapterRegistry, AgentKind, BudgetLimits, CostLedger, DegradationController, Dispatcher, Error,
  EnvCredentialStore, FailoverCoordinator, HealthTracker, ModelDescriptor, ModelRegistry,
  PerformanceStore, RateLimitTracker, RetryPolicy, Selector, Task, TaskPriority,
};

mod integration_tests
{
  use super::*;

  fn descriptor( id : &str, provider : &str ) -> ModelDescriptor
  {
    ModelDescriptor
    {
      id : id.to_string(),
      provider : provider.to_string(),
      display_name : id.to_string(),
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
      id : "failover-task".to_string(),
      task_type : "chat".to_string(),
      priority : TaskPriority::Medium,
      prompt : "hi".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    }
  }

  fn fast_retry_policy() -> RetryPolicy
  {
    RetryPolicy { base_delay : Duration::from_millis( 1 ), max_delay : Duration::from_millis( 2 ), max_retries : 0, ..RetryPolicy::default() }
  }

  fn coordinator_over( descriptors : Vec< ModelDescriptor >, providers : &[ &str ] ) -> FailoverCoordinator
  {
    let ( registry, _ ) = ModelRegistry::load( descriptors );
    let health = HealthTracker::new();
    let rate_limit = RateLimitTracker::new();
    let performance = PerformanceStore::new();
    let degradation = DegradationController::new();
    let selector = Selector::new( registry.clone(), health.clone(), rate_limit.clone(), performance.clone(), CostLedger::new( BudgetLimits::default() ), degradation );
    let dispatcher = Dispatcher::new( 4, 4, providers, health, rate_limit, performance, fast_retry_policy() );
    FailoverCoordinator::new( selector, dispatcher, registry, fast_retry_policy() )
  }

  fn credentials( providers : &[ &str ] ) -> EnvCredentialStore
  {
    let mut keys = std::collections::HashMap::new();
    for provider in providers
    {
      keys.insert( ( *provider ).to_string(), vec![ "k".to_string() ] );
    }
    EnvCredentialStore::from_keys( keys )
  }

  #[ tokio::test ]
  async fn exhausted_primary_fails_over_to_the_next_ranked_alternative() -> Result< (), Box< dyn std::error::Error > >
  {
    let coordinator = coordinator_over( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ], &[ "a", "b" ] );
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::failing( "a", Error::Network( "down".to_string() ) ) ) );
    adapters.register( Arc::new( MockAdapter::new( "b" ) ) );

    let outcome = coordinator.run( &adapters, &credentials( &[ "a", "b" ] ), &task(), &AgentKind::Implementer ).await?;
    assert!( outcome.response.is_ok() );
    assert_eq!( outcome.model_id, "m2" );
    let events = coordinator.events();
    assert_eq!( events.len(), 1 );
    assert_eq!( events[ 0 ].original_model, "m1" );
    Ok( () )
  }

  #[ tokio::test ]
  async fn every_model_failing_returns_failover_exhausted_with_full_attempt_record() -> Result< (), Box< dyn std::error::Error > >
  {
    let coordinator = coordinator_over( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ], &[ "a", "b" ] );
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::failing( "a", Error::Network( "down".to_string() ) ) ) );
    adapters.register( Arc::new( MockAdapter::failing( "b", Error::Network( "down".to_string() ) ) ) );

    let result = coordinator.run( &adapters, &credentials( &[ "a", "b" ] ), &task(), &AgentKind::Implementer ).await;
    match result
    {
      Err( Error::FailoverExhausted { original, attempted, task_id, .. } ) =>
      {
        assert_eq!( original, "m1" );
        assert_eq!( attempted.len(), 2 );
        assert_eq!( task_id, "failover-task" );
      }
      other => panic!( "expected FailoverExhausted, got {other:?}" ),
    }
    Ok( () )
  }

  #[ tokio::test ]
  async fn validation_errors_never_trigger_a_failover_attempt() -> Result< (), Box< dyn std::error::Error > >
  {
    let coordinator = coordinator_over( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ], &[ "a", "b" ] );
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::failing( "a", Error::Validation( "bad request".to_string() ) ) ) );
    adapters.register( Arc::new( MockAdapter::new( "b" ) ) );

    let result = coordinator.run( &adapters, &credentials( &[ "a", "b" ] ), &task(), &AgentKind::Implementer ).await;
    assert!( matches!( result, Err( Error::Validation( _ ) ) ) );
    assert!( coordinator.events().is_empty() );
    Ok( () )
  }
}
