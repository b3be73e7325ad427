//! End-to-end coverage of `ModelPlane`, composing every subsystem the
//! way an embedder would : build one plane from a configuration
//! document, an adapter registry and a credential store, then submit
//! tasks through it.

use std::sync::Arc;

use api_model_plane::adapter::MockAdapter;
use api_model_plane::
{
  AdapterRegistry, AgentKind, ConfigDocument, EnvCredentialStore, Error, ModelPlane,
  SubmitOutcome, Task, TaskPriority,
};

mod integration_tests
{
  use super::*;

  fn two_model_config() -> ConfigDocument
  {
    let raw = r#"
    {
      "models":
      [
        {
          "id": "gpt-4", "provider": "openai", "display_name": "GPT-4",
          "capabilities": [ "text-generation", "code-generation" ],
          "cost_per_1k_input": 0.03, "cost_per_1k_output": 0.06,
          "requests_per_minute": 60, "tokens_per_minute": 100000,
          "context_window": 8000, "typical_latency_ms": 1500,
          "enabled": true, "tags": []
        },
        {
          "id": "claude-3", "provider": "anthropic", "display_name": "Claude 3",
          "capabilities": [ "text-generation", "analysis" ],
          "cost_per_1k_input": 0.015, "cost_per_1k_output": 0.03,
          "requests_per_minute": 60, "tokens_per_minute": 100000,
          "context_window": 200000, "typical_latency_ms": 1200,
          "enabled": true, "tags": []
        }
      ]
    }
    "#;
    ConfigDocument::parse( raw ).expect( "fixture document should parse" )
  }

  fn task_of_type( task_type : &str ) -> Task
  {
    Task
    {
      id : format!( "task-{task_type}" ),
      task_type : task_type.to_string(),
      priority : TaskPriority::Medium,
      prompt : "write something".to_string(),
      parameters : serde_json::Value::Null,
      max_tokens : Some( 500 ),
      temperature : Some( 0.7 ),
    }
  }

  fn credentials() -> Arc< EnvCredentialStore >
  {
    let mut keys = std::collections::HashMap::new();
    keys.insert( "openai".to_string(), vec![ "ok1".to_string() ] );
    keys.insert( "anthropic".to_string(), vec![ "ak1".to_string() ] );
    Arc::new( EnvCredentialStore::from_keys( keys ) )
  }

  #[ tokio::test ]
  async fn happy_path_submits_and_dispatches_to_the_best_match() -> Result< (), Box< dyn std::error::Error > >
  {
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::new( "openai" ) ) );
    adapters.register( Arc::new( MockAdapter::new( "anthropic" ) ) );

    let ( plane, rejected ) = ModelPlane::new( two_model_config(), adapters, credentials() );
    assert!( rejected.is_empty() );

    let outcome = plane.submit( task_of_type( "chat" ), AgentKind::Implementer ).await?;
    match outcome
    {
      SubmitOutcome::Dispatched( dispatch ) =>
      {
        assert!( dispatch.response.is_ok() );
      }
      SubmitOutcome::Queued => panic!( "a healthy provider was available, should not queue" ),
    }
    assert_eq!( plane.cost_ledger().len(), 1 );
    Ok( () )
  }

  #[ tokio::test ]
  async fn total_outage_queues_and_resubmit_drains_once_a_provider_recovers() -> Result< (), Box< dyn std::error::Error > >
  {
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::failing( "openai", Error::Network( "down".to_string() ) ) ) );
    adapters.register( Arc::new( MockAdapter::failing( "anthropic", Error::Network( "down".to_string() ) ) ) );

    let ( plane, _rejected ) = ModelPlane::new( two_model_config(), adapters, credentials() );

    for provider in [ "openai", "anthropic" ]
    {
      for _ in 0 .. api_model_plane::degradation::PROVIDER_FAILURE_THRESHOLD
      {
        plane.degradation().mark_provider_failure( provider );
      }
    }

    let outcome = plane.submit( task_of_type( "chat" ), AgentKind::Implementer ).await?;
    assert!( matches!( outcome, SubmitOutcome::Queued ) );
    assert_eq!( plane.degradation().queue_depth(), 1 );

    // A fresh retry attempt via resubmit_ready still fails the same way
    // (both providers remain in failure state), so the request is
    // requeued rather than dropped, since it is well under the retry cap.
    let results = plane.resubmit_ready().await;
    assert_eq!( results.len(), 1 );
    assert!( results[ 0 ].is_err() );
    Ok( () )
  }

  #[ tokio::test ]
  async fn capability_inference_routes_code_tasks_to_a_code_capable_model() -> Result< (), Box< dyn std::error::Error > >
  {
    let mut adapters = AdapterRegistry::new();
    adapters.register( Arc::new( MockAdapter::new( "openai" ) ) );
    adapters.register( Arc::new( MockAdapter::new( "anthropic" ) ) );

    let ( plane, _rejected ) = ModelPlane::new( two_model_config(), adapters, credentials() );
    let selection = plane.selector().select( &task_of_type( "implement a parser" ), &api_model_plane::SelectionConstraints::default() )
      .expect( "a code-capable model should be selected" );
    assert_eq!( selection.model_id, "gpt-4" );
    Ok( () )
  }
}
