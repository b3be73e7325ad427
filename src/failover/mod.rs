//! Failover Coordinator : cross-model retry when a dispatch's own retry
//! budget is exhausted (spec §4.8), grounded on the endpoint-rotation and
//! metrics-bookkeeping shape of `models::failover::FailoverManager`.

mod private
{
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::time::{ Duration, Instant };
  use chrono::{ DateTime, Utc };
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };

  #[ cfg( feature = "logging" ) ]
  use tracing::warn;

  use crate::adapter::AdapterRegistry;
  use crate::credentials::CredentialStore;
  use crate::dispatcher::{ calculate_retry_delay, should_failover, DispatchOutcome, Dispatcher, RetryPolicy };
  use crate::error::Error;
  use crate::registry::ModelRegistry;
  use crate::selector::{ AvailabilityGap, Selection, Selector };
  use crate::task::{ AgentKind, SelectionConstraints, Task };

  /// Why a request was failed over to an alternative model, matching
  /// spec §3 "Failover event" `reason` enumeration.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum FailoverReason
  {
    /// The Health Tracker reported the model unavailable.
    Unavailable,
    /// The Rate-Limit Tracker refused the request.
    RateLimited,
    /// The provider returned a generic error.
    Error,
    /// The call exceeded its deadline.
    Timeout,
    /// A response quality evaluation (external collaborator) flagged the
    /// response below an acceptable bar.
    LowQuality,
  }

  impl FailoverReason
  {
    /// Classify a dispatch [`Error`] into the failover reason it should
    /// be recorded under.
    #[ inline ]
    #[ must_use ]
    pub fn from_error( error : &Error ) -> Self
    {
      match error
      {
        Error::ModelUnavailable( _ ) => FailoverReason::Unavailable,
        Error::RateLimited( _ ) => FailoverReason::RateLimited,
        Error::Timeout( _ ) => FailoverReason::Timeout,
        _ => FailoverReason::Error,
      }
    }
  }

  /// One completed logical request as seen by the coordinator : every
  /// model tried, in order, and why each one that didn't succeed failed
  /// (spec §3 "Failover event", one row per non-primary attempt).
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct FailoverEvent
  {
    /// Task the attempt belongs to.
    pub task_id : String,
    /// Model originally selected, before any failover.
    pub original_model : String,
    /// The alternative model this event switched to.
    pub alternative_model : String,
    /// Why the original (or previous) model was abandoned.
    pub reason : FailoverReason,
    /// When the coordinator recorded this failover.
    pub recorded_at : DateTime< Utc >,
  }

  /// Maximum number of distinct models the coordinator will try for a
  /// single task before giving up (spec §4.8 "max_retries").
  pub const MAX_RETRIES : usize = 3;

  /// Starting backoff between cross-model attempts (spec §4.8 step 4).
  pub const BASE_BACKOFF : Duration = Duration::from_secs( 2 );

  /// Number of failovers a single model must accumulate within
  /// [`ALERT_WINDOW`] before the excessive-failover alert fires
  /// (spec §4.8 "alert threshold").
  pub const ALERT_THRESHOLD : usize = 3;

  /// Trailing window the excessive-failover alert counts recent
  /// failovers within (spec §4.8 "alert window").
  pub const ALERT_WINDOW : Duration = Duration::from_secs( 60 * 60 );

  #[ derive( Default ) ]
  struct ModelAlertState
  {
    recent_failovers : std::collections::VecDeque< Instant >,
    currently_above_threshold : bool,
  }

  /// Coordinates cross-model retry : when a dispatch exhausts its own
  /// retry budget with a retryable error, selects the next-best model
  /// (excluding every model already tried) and tries again, up to
  /// [`MAX_RETRIES`] total attempts across models.
  #[ derive( Debug, Clone ) ]
  pub struct FailoverCoordinator
  {
    selector : Selector,
    dispatcher : Dispatcher,
    registry : ModelRegistry,
    retry_policy : RetryPolicy,
    events : Arc< RwLock< Vec< FailoverEvent > > >,
    alert_state : Arc< RwLock< HashMap< String, ModelAlertState > > >,
  }

  impl FailoverCoordinator
  {
    /// Build a coordinator over the given selector, dispatcher and registry.
    #[ inline ]
    #[ must_use ]
    pub fn new( selector : Selector, dispatcher : Dispatcher, registry : ModelRegistry, retry_policy : RetryPolicy ) -> Self
    {
      Self
      {
        selector,
        dispatcher,
        registry,
        retry_policy,
        events : Arc::new( RwLock::new( Vec::new() ) ),
        alert_state : Arc::new( RwLock::new( HashMap::new() ) ),
      }
    }

    /// Run `task` to completion, failing over across models as needed
    /// (spec §4.8 steps 1-5).
    ///
    /// The intended primary is [`Selector::nominal_primary`] — the best
    /// model on capability/cost/performance merit alone — not
    /// [`Selector::select`]'s result, which has already dropped whatever
    /// is unavailable or rate-limited. If the intended primary isn't
    /// actually dispatchable, the substitution is recorded as a failover
    /// event up front, before the first dispatch attempt, mirroring
    /// `failover_manager.py`'s `execute_with_failover(primary_model, ...)`
    /// raising on the primary and only then selecting an alternative.
    #[ inline ]
    pub async fn run( &self, adapters : &AdapterRegistry, credentials : &dyn CredentialStore, task : &Task, agent_kind : &AgentKind ) -> Result< DispatchOutcome, Error >
    {
      let mut excluded = Vec::new();
      let mut attempted = Vec::new();
      let mut reason_per_model = HashMap::new();

      let Some( primary ) = self.selector.nominal_primary( task, &SelectionConstraints::default() ) else
      {
        return Err( Error::FailoverExhausted { original : String::new(), attempted, task_id : task.id.clone(), reason_per_model } );
      };
      let original_model = primary.clone();
      let mut current = primary;

      if let Some( gap ) = self.selector.availability_gap( &current )
      {
        excluded.push( current.clone() );
        if let Some( selection ) = self.select_excluding( task, &excluded )
        {
          let alternative = selection.model_id;
          let reason = match gap
          {
            AvailabilityGap::Unavailable => FailoverReason::Unavailable,
            AvailabilityGap::RateLimited => FailoverReason::RateLimited,
          };
          self.record_failover( task, &current, &alternative, reason );
          current = alternative;
        }
        // else : nothing else matches either. Fall through and attempt
        // the intended primary anyway rather than give up before trying.
      }

      let mut attempt_index : u32 = 0;

      loop
      {
        if attempt_index > 0
        {
          let delay = calculate_retry_delay( attempt_index, &self.retry_policy );
          tokio::time::sleep( delay ).await;
        }

        attempted.push( current.clone() );
        attempt_index += 1;

        let Some( descriptor ) = self.registry.get( &current ) else { break };
        let outcome = self.dispatcher.dispatch( adapters, credentials, &descriptor, task, agent_kind ).await;

        match &outcome.response
        {
          Ok( _ ) => return Ok( outcome ),
          Err( error ) =>
          {
            let reason = FailoverReason::from_error( error );
            reason_per_model.insert( current.clone(), error.to_string() );

            if !should_failover( error )
            {
              return Err( error.clone() );
            }

            if !excluded.contains( &current )
            {
              excluded.push( current.clone() );
            }

            if attempt_index as usize >= MAX_RETRIES
            {
              break;
            }

            let Some( selection ) = self.select_excluding( task, &excluded ) else { break };
            let alternative = selection.model_id;
            if alternative != current
            {
              self.record_failover( task, &current, &alternative, reason );
            }
            current = alternative;
          }
        }
      }

      Err( Error::FailoverExhausted
      {
        original : original_model,
        attempted,
        task_id : task.id.clone(),
        reason_per_model,
      } )
    }

    fn select_excluding( &self, task : &Task, excluded_models : &[ String ] ) -> Option< Selection >
    {
      // The Selector filters candidates by provider; to exclude specific
      // already-tried model ids without dropping healthy siblings from
      // the same provider, exclude only providers whose every model has
      // already been tried.
      let mut constraints = SelectionConstraints::default();
      let candidates = self.registry.all_enabled();
      constraints.excluded_providers = candidates.iter()
        .map( | d | d.provider.clone() )
        .filter( | provider |
        {
          candidates.iter()
            .filter( | d | &d.provider == provider )
            .all( | d | excluded_models.contains( &d.id ) )
        } )
        .collect();

      let selection = self.selector.select( task, &constraints )?;
      if excluded_models.contains( &selection.model_id )
      {
        // Walk the alternatives list before giving up entirely (spec §4.8
        // step 3 "if Selector returns the same id, walk its alternatives").
        return selection.alternatives.into_iter()
          .find( | id | !excluded_models.contains( id ) )
          .map( | model_id | Selection { model_id, ..selection_stub() } );
      }
      Some( selection )
    }

    fn record_failover( &self, task : &Task, original : &str, alternative : &str, reason : FailoverReason )
    {
      self.events.write().push( FailoverEvent
      {
        task_id : task.id.clone(),
        original_model : original.to_string(),
        alternative_model : alternative.to_string(),
        reason,
        recorded_at : Utc::now(),
      } );
      self.note_failover_for_alert( original );
    }

    fn note_failover_for_alert( &self, model_id : &str )
    {
      let now = Instant::now();
      let mut guard = self.alert_state.write();
      let state = guard.entry( model_id.to_string() ).or_default();
      state.recent_failovers.push_back( now );
      while state.recent_failovers.front().is_some_and( | at | now.duration_since( *at ) > ALERT_WINDOW )
      {
        state.recent_failovers.pop_front();
      }

      let above = state.recent_failovers.len() >= ALERT_THRESHOLD;
      // Fire the alert once per threshold crossing, not once per event
      // above threshold (spec §9 Open Question, resolved in DESIGN.md).
      if above && !state.currently_above_threshold
      {
        #[ cfg( feature = "logging" ) ]
        warn!( model_id, count = state.recent_failovers.len(), window_secs = ALERT_WINDOW.as_secs(), tag = "excessive_failover", "excessive failover rate detected" );
      }
      state.currently_above_threshold = above;
    }

    /// Every failover event recorded so far, oldest first.
    #[ inline ]
    #[ must_use ]
    pub fn events( &self ) -> Vec< FailoverEvent >
    {
      self.events.read().clone()
    }
  }

  /// A minimal [`Selection`] used only to rebuild one via struct-update
  /// syntax when walking the alternatives list ; every field but
  /// `model_id` is overwritten immediately by the caller.
  fn selection_stub() -> Selection
  {
    Selection
    {
      model_id : String::new(),
      score : 0.0,
      matched_capabilities : Vec::new(),
      alternatives : Vec::new(),
      weight_profile : crate::selector::WeightProfile::DEFAULT,
      reason : String::new(),
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::adapter::{ AdapterRegistry, MockAdapter };
    use crate::cost::{ BudgetLimits, CostLedger };
    use crate::credentials::EnvCredentialStore;
    use crate::degradation::DegradationController;
    use crate::health::HealthTracker;
    use crate::performance::PerformanceStore;
    use crate::rate_limit::RateLimitTracker;
    use crate::registry::ModelDescriptor;
    use crate::task::TaskPriority;
    use std::collections::HashMap as Map;

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
      keys.insert( "a".to_string(), vec![ "k".to_string() ] );
      keys.insert( "b".to_string(), vec![ "k".to_string() ] );
      EnvCredentialStore::from_keys( keys )
    }

    #[ tokio::test ]
    async fn succeeds_without_failover_when_first_model_works()
    {
      let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ] );
      let health = HealthTracker::new();
      let rate_limit = RateLimitTracker::new();
      let performance = PerformanceStore::new();
      let degradation = DegradationController::new();
      let selector = Selector::new( registry.clone(), health.clone(), rate_limit.clone(), performance.clone(), CostLedger::new( BudgetLimits::default() ), degradation );
      let dispatcher = Dispatcher::new( 4, 4, &[ "a", "b" ], health, rate_limit, performance, RetryPolicy::default() );
      let coordinator = FailoverCoordinator::new( selector, dispatcher, registry, RetryPolicy::default() );

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::new( "a" ) ) );
      adapters.register( Arc::new( MockAdapter::new( "b" ) ) );
      let credentials = credential_store();
      let outcome = coordinator.run( &adapters, &credentials, &task(), &AgentKind::Implementer ).await.expect( "should succeed" );
      assert!( outcome.response.is_ok() );
      assert!( coordinator.events().is_empty() );
    }

    #[ tokio::test ]
    async fn fails_over_to_alternative_when_primary_errors()
    {
      let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ] );
      let health = HealthTracker::new();
      let rate_limit = RateLimitTracker::new();
      let performance = PerformanceStore::new();
      let degradation = DegradationController::new();
      let selector = Selector::new( registry.clone(), health.clone(), rate_limit.clone(), performance.clone(), CostLedger::new( BudgetLimits::default() ), degradation );
      let dispatcher = Dispatcher::new( 4, 4, &[ "a", "b" ], health, rate_limit, performance, RetryPolicy { max_retries : 0, ..RetryPolicy::default() } );
      let coordinator = FailoverCoordinator::new( selector, dispatcher, registry, RetryPolicy { base_delay : Duration::from_millis( 1 ), max_delay : Duration::from_millis( 2 ), ..RetryPolicy::default() } );

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::failing( "a", Error::Network( "down".to_string() ) ) ) );
      adapters.register( Arc::new( MockAdapter::new( "b" ) ) );
      let credentials = credential_store();
      let outcome = coordinator.run( &adapters, &credentials, &task(), &AgentKind::Implementer ).await.expect( "should fail over to m2" );
      assert!( outcome.response.is_ok() );
      assert_eq!( outcome.model_id, "m2" );
      let events = coordinator.events();
      assert_eq!( events.len(), 1 );
      assert_eq!( events[ 0 ].original_model, "m1" );
      assert_eq!( events[ 0 ].alternative_model, "m2" );
    }

    #[ tokio::test ]
    async fn non_retryable_error_is_not_failed_over()
    {
      let ( registry, _ ) = ModelRegistry::load( vec![ descriptor( "m1", "a" ), descriptor( "m2", "b" ) ] );
      let health = HealthTracker::new();
      let rate_limit = RateLimitTracker::new();
      let performance = PerformanceStore::new();
      let degradation = DegradationController::new();
      let selector = Selector::new( registry.clone(), health.clone(), rate_limit.clone(), performance.clone(), CostLedger::new( BudgetLimits::default() ), degradation );
      let dispatcher = Dispatcher::new( 4, 4, &[ "a", "b" ], health, rate_limit, performance, RetryPolicy::default() );
      let coordinator = FailoverCoordinator::new( selector, dispatcher, registry, RetryPolicy::default() );

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::failing( "a", Error::Validation( "bad request".to_string() ) ) ) );
      adapters.register( Arc::new( MockAdapter::new( "b" ) ) );
      let credentials = credential_store();
      let result = coordinator.run( &adapters, &credentials, &task(), &AgentKind::Implementer ).await;
      assert!( matches!( result, Err( Error::Validation( _ ) ) ) );
    }

    #[ tokio::test ]
    async fn failover_event_is_recorded_when_the_intended_primary_is_already_unavailable()
    {
      let mut primary_descriptor = descriptor( "gpt-4-turbo", "openai" );
      primary_descriptor.cost_per_1k_input = 0.01;
      primary_descriptor.cost_per_1k_output = 0.01;
      let ( registry, _ ) = ModelRegistry::load( vec!
      [
        primary_descriptor,
        descriptor( "claude-3-sonnet", "anthropic" ),
      ] );
      let health = HealthTracker::new();
      for _ in 0 .. 3
      {
        health.record_failure( "gpt-4-turbo" );
      }
      let rate_limit = RateLimitTracker::new();
      let performance = PerformanceStore::new();
      let degradation = DegradationController::new();
      let selector = Selector::new( registry.clone(), health.clone(), rate_limit.clone(), performance.clone(), CostLedger::new( BudgetLimits::default() ), degradation );
      let dispatcher = Dispatcher::new( 4, 4, &[ "openai", "anthropic" ], health, rate_limit, performance, RetryPolicy::default() );
      let coordinator = FailoverCoordinator::new( selector, dispatcher, registry, RetryPolicy::default() );

      let mut adapters = AdapterRegistry::new();
      adapters.register( Arc::new( MockAdapter::new( "openai" ) ) );
      adapters.register( Arc::new( MockAdapter::new( "anthropic" ) ) );
      let mut keys = Map::new();
      keys.insert( "openai".to_string(), vec![ "k".to_string() ] );
      keys.insert( "anthropic".to_string(), vec![ "k".to_string() ] );
      let credentials = EnvCredentialStore::from_keys( keys );

      let outcome = coordinator.run( &adapters, &credentials, &task(), &AgentKind::Implementer ).await.expect( "should fail over to the alternative" );
      assert!( outcome.response.is_ok() );
      assert_eq!( outcome.model_id, "claude-3-sonnet" );

      let events = coordinator.events();
      assert_eq!( events.len(), 1 );
      assert_eq!( events[ 0 ].original_model, "gpt-4-turbo" );
      assert_eq!( events[ 0 ].alternative_model, "claude-3-sonnet" );
      assert_eq!( events[ 0 ].reason, FailoverReason::Unavailable );
    }
  }
}

pub use private::
{
  FailoverCoordinator, FailoverEvent, FailoverReason,
  ALERT_THRESHOLD, ALERT_WINDOW, BASE_BACKOFF, MAX_RETRIES,
};
