//! Provider Adapter contract : the seam between the decision engine and a
//! concrete vendor HTTP client (spec §4.7, §Non-goals — no concrete vendor
//! adapters ship here, only the trait and a mock for tests).

mod private
{
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::time::Instant;

  use crate::error::Error;
  use crate::task::{ Task, TaskPriority };

  /// A completed call against a provider, independent of which vendor
  /// served it.
  #[ derive( Debug, Clone ) ]
  pub struct AdapterResponse
  {
    /// Raw text the model produced.
    pub text : String,
    /// Input tokens the provider reported consuming.
    pub input_tokens : u64,
    /// Output tokens the provider reported consuming.
    pub output_tokens : u64,
  }

  /// What the Dispatcher needs from a concrete vendor HTTP client.
  /// Implementations own their own transport, authentication and
  /// request/response mapping; the engine only ever sees [`Error`] and
  /// [`AdapterResponse`].
  #[ async_trait ]
  pub trait ProviderAdapter : Send + Sync + std::fmt::Debug
  {
    /// Provider name this adapter serves, matching `ModelDescriptor::provider`.
    fn provider_name( &self ) -> &str;

    /// Issue `task` against `model_id`, using `api_key` for authentication.
    async fn dispatch( &self, model_id : &str, api_key : &str, task : &Task ) -> Result< AdapterResponse, Error >;

    /// Lightweight liveness check for the background health probe cycle
    /// (spec §4.2). Default implementation issues a trivial dispatch and
    /// times it ; vendor adapters may override with a cheaper call (e.g.
    /// a models-list endpoint) when one exists.
    async fn probe( &self, model_id : &str, api_key : &str ) -> Result< u64, Error >
    {
      let task = Task
      {
        id : "health-probe".to_string(),
        task_type : "probe".to_string(),
        priority : TaskPriority::Background,
        prompt : "ping".to_string(),
        parameters : serde_json::Value::Null,
        max_tokens : Some( 1 ),
        temperature : None,
      };
      let start = Instant::now();
      self.dispatch( model_id, api_key, &task ).await?;
      Ok( start.elapsed().as_millis() as u64 )
    }
  }

  /// Maps provider name to the concrete adapter that serves it, so the
  /// Dispatcher can "look up the adapter by provider" as spec §4.7
  /// requires instead of every caller threading one adapter through by
  /// hand. Registration is expected at composition time ; lookups never
  /// mutate the map.
  #[ derive( Debug, Clone, Default ) ]
  pub struct AdapterRegistry
  {
    by_provider : HashMap< String, Arc< dyn ProviderAdapter > >,
  }

  impl AdapterRegistry
  {
    /// Build an empty registry.
    #[ inline ]
    #[ must_use ]
    pub fn new() -> Self
    {
      Self { by_provider : HashMap::new() }
    }

    /// Register `adapter` under `adapter.provider_name()`, replacing any
    /// adapter previously registered for that provider.
    #[ inline ]
    pub fn register( &mut self, adapter : Arc< dyn ProviderAdapter > )
    {
      self.by_provider.insert( adapter.provider_name().to_string(), adapter );
    }

    /// Look up the adapter registered for `provider`, if any.
    #[ inline ]
    #[ must_use ]
    pub fn get( &self, provider : &str ) -> Option< Arc< dyn ProviderAdapter > >
    {
      self.by_provider.get( provider ).cloned()
    }
  }

  /// Deterministic in-memory adapter used by tests and examples. Never
  /// wired up for production use.
  #[ derive( Debug, Clone ) ]
  pub struct MockAdapter
  {
    provider : String,
    /// When `Some`, every dispatch fails with this error instead of
    /// succeeding.
    pub fail_with : Option< Error >,
    /// Artificial input/output token counts reported on success.
    pub tokens : ( u64, u64 ),
  }

  impl MockAdapter
  {
    /// Build a mock adapter for `provider` that always succeeds.
    #[ inline ]
    #[ must_use ]
    pub fn new( provider : impl Into< String > ) -> Self
    {
      Self { provider : provider.into(), fail_with : None, tokens : ( 100, 50 ) }
    }

    /// Build a mock adapter that always fails with `error`.
    #[ inline ]
    #[ must_use ]
    pub fn failing( provider : impl Into< String >, error : Error ) -> Self
    {
      Self { provider : provider.into(), fail_with : Some( error ), tokens : ( 0, 0 ) }
    }
  }

  #[ async_trait ]
  impl ProviderAdapter for MockAdapter
  {
    #[ inline ]
    fn provider_name( &self ) -> &str
    {
      &self.provider
    }

    #[ inline ]
    async fn dispatch( &self, _model_id : &str, _api_key : &str, task : &Task ) -> Result< AdapterResponse, Error >
    {
      if let Some( error ) = &self.fail_with
      {
        return Err( error.clone() );
      }
      Ok( AdapterResponse
      {
        text : format!( "mock response to : {}", task.prompt ),
        input_tokens : self.tokens.0,
        output_tokens : self.tokens.1,
      } )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ tokio::test ]
    async fn mock_adapter_echoes_prompt()
    {
      let adapter = MockAdapter::new( "mock" );
      let task = Task
      {
        id : "t1".to_string(),
        task_type : "chat".to_string(),
        priority : crate::task::TaskPriority::Medium,
        prompt : "hello".to_string(),
        parameters : serde_json::Value::Null,
        max_tokens : None,
        temperature : None,
      };
      let response = adapter.dispatch( "mock-1", "key", &task ).await.expect( "mock never fails by default" );
      assert!( response.text.contains( "hello" ) );
    }

    #[ test ]
    fn registry_looks_up_adapter_by_provider_name()
    {
      let mut registry = AdapterRegistry::new();
      registry.register( std::sync::Arc::new( MockAdapter::new( "openai" ) ) );
      assert!( registry.get( "openai" ).is_some() );
      assert!( registry.get( "anthropic" ).is_none() );
    }

    #[ tokio::test ]
    async fn failing_mock_always_errors()
    {
      let adapter = MockAdapter::failing( "mock", Error::Network( "down".to_string() ) );
      let task = Task
      {
        id : "t1".to_string(),
        task_type : "chat".to_string(),
        priority : crate::task::TaskPriority::Medium,
        prompt : "hello".to_string(),
        parameters : serde_json::Value::Null,
        max_tokens : None,
        temperature : None,
      };
      let result = adapter.dispatch( "mock-1", "key", &task ).await;
      assert!( result.is_err() );
    }
  }
}

pub use private::{ AdapterRegistry, AdapterResponse, MockAdapter, ProviderAdapter };
