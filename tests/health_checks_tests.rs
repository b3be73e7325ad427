//! Integration coverage for the Health Tracker's liveness state machine
//! and its effect on Selector/Dispatcher behavior end to end.

use std::sync::Arc;

use api_model_plane::adapter::MockAdapter;
use api_model_plane::
{
  AdapterRegistry, CostLedger, BudgetLimits, DegradationController, Error, HealthState,
  HealthTracker, ModelDescriptor, ModelRegistry, PerformanceStore, RateLimitTracker,
  Selection, SelectionConstraints, Selector, Task, TaskPriority,
};

mod integration_tests
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
      id : "health-task".to_string(),
      task_type : "chat".to_string(),
      priority : TaskPriority::Medium,
      prompt : "hi".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    }
  }

  #[ test ]
  fn three_consecutive_failures_mark_a_model_unhealthy() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    health.record_failure( "gpt-4" );
    health.record_failure( "gpt-4" );
    assert!( health.is_available( "gpt-4" ) );
    health.record_failure( "gpt-4" );
    assert_eq!( health.status( "gpt-4" ), HealthState::Unhealthy );
    assert!( !health.is_available( "gpt-4" ) );
    Ok( () )
  }

  #[ test ]
  fn unhealthy_model_is_excluded_from_selection() -> Result< (), Box< dyn std::error::Error > >
  {
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "gpt-4" ), descriptor( "gpt-3.5" ) ] );
    let health = HealthTracker::new();
    for _ in 0 .. 3
    {
      health.record_failure( "gpt-4" );
    }
    let selector = Selector::new
    (
      registry, health, RateLimitTracker::new(), PerformanceStore::new(),
      CostLedger::new( BudgetLimits::default() ), DegradationController::new(),
    );
    let selection : Selection = selector.select( &task(), &SelectionConstraints::default() ).expect( "healthy sibling should be selected" );
    assert_eq!( selection.model_id, "gpt-3.5" );
    Ok( () )
  }

  #[ tokio::test ]
  async fn dispatcher_rejects_unhealthy_model_without_calling_the_adapter() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    for _ in 0 .. 3
    {
      health.record_failure( "gpt-4" );
    }
    let dispatcher = api_model_plane::Dispatcher::new
    (
      4, 4, &[ "openai" ], health, RateLimitTracker::new(), PerformanceStore::new(),
      api_model_plane::RetryPolicy::default(),
    );

    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::new( "openai" ) ) );
    let mut keys = std::collections::HashMap::new();
    keys.insert( "openai".to_string(), vec![ "k1".to_string() ] );
    let credentials = api_model_plane::EnvCredentialStore::from_keys( keys );

    let outcome = dispatcher.dispatch( &adapters, &credentials, &descriptor( "gpt-4" ), &task(), &api_model_plane::AgentKind::Implementer ).await;
    assert!( matches!( outcome.response, Err( Error::ModelUnavailable( _ ) ) ) );
    Ok( () )
  }

  #[ test ]
  fn success_after_degraded_state_clears_backoff() -> Result< (), Box< dyn std::error::Error > >
  {
    let health = HealthTracker::new();
    health.record_failure( "gpt-4" );
    assert!( health.next_retry_at( "gpt-4" ).is_some() );
    health.record_success( "gpt-4" );
    assert!( health.next_retry_at( "gpt-4" ).is_none() );
    assert_eq!( health.consecutive_failures( "gpt-4" ), 0 );
    Ok( () )
  }
}
