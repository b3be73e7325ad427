//! Integration coverage for the Rate-Limit Tracker's sliding window,
//! proactive threshold, adapter-signalled cooldown, and its effect on
//! Selector candidate filtering.

use api_model_plane::
{
  Admission, BudgetLimits, CostLedger, DegradationController, HealthTracker, ModelDescriptor,
  ModelRegistry, PerformanceStore, RateLimitTracker, SelectionConstraints, Selector, Task,
  TaskPriority,
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
      requests_per_minute : 10,
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
      id : "rl-task".to_string(),
      task_type : "chat".to_string(),
      priority : TaskPriority::Medium,
      prompt : "hi".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    }
  }

  #[ test ]
  fn proactive_block_trips_at_90_percent_utilisation() -> Result< (), Box< dyn std::error::Error > >
  {
    let tracker = RateLimitTracker::new();
    for _ in 0 .. 8
    {
      assert!( tracker.pre_check( "m", 10, 100_000, 10 ).is_allowed() );
      tracker.record( "m", 10, false );
    }
    assert_eq!( tracker.pre_check( "m", 10, 100_000, 10 ), Admission::Limited );
    assert!( tracker.blocked_until( "m" ).is_some() );
    Ok( () )
  }

  #[ test ]
  fn provider_signalled_limit_overrides_low_utilisation() -> Result< (), Box< dyn std::error::Error > >
  {
    let tracker = RateLimitTracker::new();
    tracker.record( "m", 1, true );
    assert_eq!( tracker.pre_check( "m", 10_000, 1_000_000, 1 ), Admission::Limited );
    Ok( () )
  }

  #[ test ]
  fn rate_limited_model_falls_out_of_selection_in_favor_of_a_sibling() -> Result< (), Box< dyn std::error::Error > >
  {
    let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "rate-limited" ), descriptor( "fresh" ) ] );
    let rate_limit = RateLimitTracker::new();
    for _ in 0 .. 10
    {
      rate_limit.record( "rate-limited", 1, false );
    }

    let selector = Selector::new
    (
      registry, HealthTracker::new(), rate_limit, PerformanceStore::new(),
      CostLedger::new( BudgetLimits::default() ), DegradationController::new(),
    );
    let selection = selector.select( &task(), &SelectionConstraints::default() ).expect( "fresh model should still be selectable" );
    assert_eq!( selection.model_id, "fresh" );
    Ok( () )
  }

  #[ test ]
  fn independent_models_never_share_a_window() -> Result< (), Box< dyn std::error::Error > >
  {
    let tracker = RateLimitTracker::new();
    for _ in 0 .. 9
    {
      tracker.record( "busy", 10, false );
    }
    assert_eq!( tracker.current_request_count( "idle" ), 0 );
    assert_eq!( tracker.current_request_count( "busy" ), 9 );
    Ok( () )
  }
}
