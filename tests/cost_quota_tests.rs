//! Integration coverage for the Cost Ledger's daily budget enforcement,
//! attribution breakdowns, and how `ModelPlane::submit` feeds it.

use std::sync::Arc;

use api_model_plane::adapter::MockAdapter;
use api_model_plane::
{
  AdapterRegistry, AgentKind, BudgetDecision, BudgetLimits, ConfigDocument, CostLedger,
  CostRecord, EnvCredentialStore, ModelPlane, SubmitOutcome, Task, TaskPriority,
};

mod integration_tests
{
  use super::*;

  fn sample( model : &str, cost : f64 ) -> CostRecord
  {
    CostRecord
    {
      task_id : "t1".to_string(),
      model_id : model.to_string(),
      agent_kind : AgentKind::Implementer,
      input_tokens : 100,
      output_tokens : 50,
      cost_usd : cost,
      recorded_at : chrono::Utc::now(),
    }
  }

  #[ test ]
  fn per_model_ceiling_blocks_independent_of_total_budget() -> Result< (), Box< dyn std::error::Error > >
  {
    let ledger = CostLedger::new( BudgetLimits { daily_total_usd : Some( 100.0 ), daily_per_model_usd : Some( 1.0 ) } );
    ledger.record( sample( "gpt-4", 0.9 ) );
    assert_eq!
    (
      ledger.check_budget( "gpt-4", 0.2 ),
      BudgetDecision::DailyModelExceeded { model_id : "gpt-4".to_string() }
    );
    assert_eq!( ledger.check_budget( "claude-3", 0.2 ), BudgetDecision::WithinBudget );
    Ok( () )
  }

  #[ test ]
  fn attribution_breakdowns_sum_correctly_across_agents_and_models() -> Result< (), Box< dyn std::error::Error > >
  {
    let ledger = CostLedger::new( BudgetLimits::default() );
    ledger.record( sample( "gpt-4", 1.0 ) );
    ledger.record( sample( "gpt-4", 2.0 ) );
    ledger.record( sample( "claude-3", 3.0 ) );

    assert!( ( ledger.cost_by_model( "gpt-4" ) - 3.0 ).abs() < f64::EPSILON );
    assert!( ( ledger.cost_by_agent( &AgentKind::Implementer ) - 6.0 ).abs() < f64::EPSILON );
    assert_eq!( ledger.len(), 3 );
    Ok( () )
  }

  #[ tokio::test ]
  async fn submitting_a_task_through_the_plane_records_its_cost() -> Result< (), Box< dyn std::error::Error > >
  {
    let raw = r#"
    {
      "models":
      [
        {
          "id": "m1", "provider": "mock", "display_name": "m1",
          "capabilities": [ "text-generation" ],
          "cost_per_1k_input": 2.0, "cost_per_1k_output": 2.0,
          "requests_per_minute": 60, "tokens_per_minute": 100000,
          "context_window": 8000, "typical_latency_ms": 500,
          "enabled": true, "tags": []
        }
      ],
      "operational": { "budget": { "daily_total_usd": 1000.0, "alert_at": 0.8 } }
    }
    "#;
    let config = ConfigDocument::parse( raw )?;

    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::new( "mock" ) ) );

    let mut keys = std::collections::HashMap::new();
    keys.insert( "mock".to_string(), vec![ "k1".to_string() ] );
    let credentials = Arc::new( EnvCredentialStore::from_keys( keys ) );

    let ( plane, rejected ) = ModelPlane::new( config, adapters, credentials );
    assert!( rejected.is_empty() );

    let task = Task
    {
      id : "t1".to_string(),
      task_type : "chat".to_string(),
      priority : TaskPriority::Medium,
      prompt : "hello".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    };

    let outcome = plane.submit( task, AgentKind::Implementer ).await?;
    assert!( matches!( outcome, SubmitOutcome::Dispatched( _ ) ) );
    assert_eq!( plane.cost_ledger().len(), 1 );
    assert!( plane.cost_ledger().daily_total() > 0.0 );
    Ok( () )
  }

  #[ test ]
  fn top_tasks_surfaces_the_most_expensive_requests() -> Result< (), Box< dyn std::error::Error > >
  {
    let ledger = CostLedger::new( BudgetLimits::default() );
    ledger.record( sample( "m", 0.5 ) );
    ledger.record( sample( "m", 9.0 ) );
    ledger.record( sample( "m", 2.0 ) );

    let top = ledger.top_tasks( 1 );
    assert_eq!( top.len(), 1 );
    assert!( ( top[ 0 ].cost_usd - 9.0 ).abs() < f64::EPSILON );
    Ok( () )
  }
}
