//! Graceful Degradation Controller : derives the plane's operating mode
//! from tracked provider/cache/telemetry signals and bounds queuing when
//! no provider remains reachable (spec §4.9), grounded on the
//! `metrics : Arc<Mutex<..>>` + bounded-history bookkeeping shape of
//! `models::failover::FailoverManager`.

mod private
{
  use std::collections::{ HashMap, VecDeque };
  use std::sync::Arc;
  use chrono::{ DateTime, Utc };
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };

  #[ cfg( feature = "logging" ) ]
  use tracing::{ info, warn };

  use crate::task::Task;

  /// Operating mode of the plane, from least to most degraded
  /// (spec §4.9). Always derived from tracked signals, never set
  /// directly by callers.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
  pub enum DegradationMode
  {
    /// All subsystems available.
    Normal,
    /// The persistence layer is unavailable ; telemetry is dropped instead
    /// of blocking dispatch.
    CacheUnavailable,
    /// Health/performance/cost tracking is unavailable ; dispatch proceeds
    /// without it.
    MonitoringUnavailable,
    /// One or more providers are unavailable but at least one remains.
    PartialProviderUnavailable,
    /// No provider is currently reachable ; new tasks are queued instead
    /// of dispatched.
    TotalUnavailability,
  }

  impl DegradationMode
  {
    /// Whether new tasks should be queued rather than dispatched
    /// immediately in this mode.
    #[ inline ]
    #[ must_use ]
    pub fn should_queue( self ) -> bool
    {
      matches!( self, DegradationMode::TotalUnavailability )
    }
  }

  /// A log entry recording a transition between [`DegradationMode`]s.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct ModeTransition
  {
    /// Mode before the transition.
    pub from : DegradationMode,
    /// Mode after the transition.
    pub to : DegradationMode,
    /// Human-readable cause.
    pub reason : String,
    /// When the transition happened.
    pub at : DateTime< Utc >,
  }

  /// A task that could not be dispatched immediately because the plane is
  /// in [`DegradationMode::TotalUnavailability`], held for retry once
  /// service is restored.
  #[ derive( Debug, Clone ) ]
  pub struct QueuedRequest
  {
    /// The deferred task.
    pub task : Task,
    /// When it was first queued.
    pub queued_at : DateTime< Utc >,
    /// How many times this request has already been re-queued.
    pub retry_count : u32,
    /// When this request becomes eligible for its next retry attempt.
    pub next_retry_at : DateTime< Utc >,
  }

  /// Cap on the mode-transition log, oldest entries evicted first
  /// (spec §4.9 "bounded event log").
  pub const MAX_TRANSITION_LOG : usize = 1_000;

  /// Cap on the pending-request queue while in `TotalUnavailability`.
  /// Requests beyond this bound are rejected rather than queued
  /// (spec §4.9 "bounded FIFO queue").
  pub const MAX_QUEUE_DEPTH : usize = 1_000;

  /// Consecutive failures a provider must accumulate before it is
  /// considered unavailable for mode-derivation purposes (spec §4.9,
  /// mirrors the Health Tracker's own unhealthy threshold).
  pub const PROVIDER_FAILURE_THRESHOLD : u32 = 3;

  /// Starting backoff before a queued request's next retry attempt,
  /// doubling per retry (spec §4.9 "exponential backoff re-queue").
  pub const REQUEUE_BASE_BACKOFF_SECS : i64 = 5;

  /// Cap on the re-queue backoff.
  pub const REQUEUE_MAX_BACKOFF_SECS : i64 = 5 * 60;

  struct State
  {
    mode : DegradationMode,
    transitions : VecDeque< ModeTransition >,
    queue : VecDeque< QueuedRequest >,
    provider_failures : HashMap< String, u32 >,
    cache_available : bool,
    telemetry_available : bool,
  }

  impl State
  {
    fn unavailable_providers( &self ) -> usize
    {
      self.provider_failures.values().filter( | &&count | count >= PROVIDER_FAILURE_THRESHOLD ).count()
    }

    fn derive_mode( &self ) -> DegradationMode
    {
      let total = self.provider_failures.len();
      let unavailable = self.unavailable_providers();

      if total > 0 && unavailable == total
      {
        return DegradationMode::TotalUnavailability;
      }
      if unavailable > 0
      {
        return DegradationMode::PartialProviderUnavailable;
      }
      if !self.cache_available
      {
        return DegradationMode::CacheUnavailable;
      }
      if !self.telemetry_available
      {
        return DegradationMode::MonitoringUnavailable;
      }
      DegradationMode::Normal
    }
  }

  /// Tracks per-provider, cache and telemetry availability and derives
  /// the plane's current [`DegradationMode`] from them, logging every
  /// transition and holding a bounded FIFO of tasks deferred during
  /// total unavailability.
  #[ derive( Clone ) ]
  pub struct DegradationController
  {
    state : Arc< RwLock< State > >,
  }

  impl std::fmt::Debug for DegradationController
  {
    fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      let state = self.state.read();
      f.debug_struct( "DegradationController" )
        .field( "mode", &state.mode )
        .field( "queue_depth", &state.queue.len() )
        .finish()
    }
  }

  impl DegradationController
  {
    /// Build a controller starting in [`DegradationMode::Normal`] with no
    /// providers registered yet.
    #[ inline ]
    #[ must_use ]
    pub fn new() -> Self
    {
      Self
      {
        state : Arc::new( RwLock::new( State
        {
          mode : DegradationMode::Normal,
          transitions : VecDeque::new(),
          queue : VecDeque::new(),
          provider_failures : HashMap::new(),
          cache_available : true,
          telemetry_available : true,
        } ) ),
      }
    }

    /// Current operating mode.
    #[ inline ]
    #[ must_use ]
    pub fn mode( &self ) -> DegradationMode
    {
      self.state.read().mode
    }

    /// Begin tracking `provider` with no recorded failures, so it counts
    /// toward "every provider unavailable" before its first failure.
    #[ inline ]
    pub fn register_provider( &self, provider : &str )
    {
      let mut state = self.state.write();
      state.provider_failures.entry( provider.to_string() ).or_insert( 0 );
    }

    /// Whether `provider` is currently counted as available.
    #[ inline ]
    #[ must_use ]
    pub fn provider_is_available( &self, provider : &str ) -> bool
    {
      self.state.read().provider_failures.get( provider ).is_none_or( | &count | count < PROVIDER_FAILURE_THRESHOLD )
    }

    /// Record a dispatch failure against `provider`, recomputing the mode.
    #[ inline ]
    pub fn mark_provider_failure( &self, provider : &str )
    {
      let mut state = self.state.write();
      let count = state.provider_failures.entry( provider.to_string() ).or_insert( 0 );
      *count = count.saturating_add( 1 );
      self.recompute( &mut state, format!( "provider '{provider}' failed" ) );
    }

    /// Record a dispatch success against `provider`, recomputing the mode.
    #[ inline ]
    pub fn mark_provider_success( &self, provider : &str )
    {
      let mut state = self.state.write();
      state.provider_failures.insert( provider.to_string(), 0 );
      self.recompute( &mut state, format!( "provider '{provider}' recovered" ) );
    }

    /// Record that the persistence layer failed a write, recomputing the
    /// mode.
    #[ inline ]
    pub fn mark_cache_failure( &self )
    {
      let mut state = self.state.write();
      state.cache_available = false;
      self.recompute( &mut state, "persistence layer unavailable".to_string() );
    }

    /// Record that the persistence layer recovered, recomputing the mode.
    #[ inline ]
    pub fn mark_cache_success( &self )
    {
      let mut state = self.state.write();
      state.cache_available = true;
      self.recompute( &mut state, "persistence layer recovered".to_string() );
    }

    /// Record that telemetry (health/performance/cost tracking) failed,
    /// recomputing the mode.
    #[ inline ]
    pub fn mark_monitoring_failure( &self )
    {
      let mut state = self.state.write();
      state.telemetry_available = false;
      self.recompute( &mut state, "monitoring unavailable".to_string() );
    }

    /// Record that telemetry recovered, recomputing the mode.
    #[ inline ]
    pub fn mark_monitoring_success( &self )
    {
      let mut state = self.state.write();
      state.telemetry_available = true;
      self.recompute( &mut state, "monitoring recovered".to_string() );
    }

    fn recompute( &self, state : &mut State, reason : String )
    {
      let mode = state.derive_mode();
      if state.mode == mode
      {
        return;
      }
      let from = state.mode;
      state.mode = mode;
      state.transitions.push_back( ModeTransition { from, to : mode, reason : reason.clone(), at : Utc::now() } );
      while state.transitions.len() > MAX_TRANSITION_LOG
      {
        state.transitions.pop_front();
      }

      #[ cfg( feature = "logging" ) ]
      if mode == DegradationMode::Normal
      {
        info!( ?from, ?mode, reason, "degradation mode recovered" );
      }
      else
      {
        warn!( ?from, ?mode, reason, "degradation mode transition" );
      }
    }

    /// Attempt to queue `task` for later dispatch. Fails once
    /// [`MAX_QUEUE_DEPTH`] is reached, signalling that callers should
    /// surface an error instead of silently dropping the task.
    #[ inline ]
    #[ must_use ]
    pub fn enqueue( &self, task : Task ) -> bool
    {
      let mut state = self.state.write();
      if state.queue.len() >= MAX_QUEUE_DEPTH
      {
        return false;
      }
      let now = Utc::now();
      state.queue.push_back( QueuedRequest { task, queued_at : now, retry_count : 0, next_retry_at : now } );
      true
    }

    /// Drain every request currently eligible for retry (its
    /// `next_retry_at` has elapsed), oldest first, leaving requests that
    /// are still backing off in the queue.
    #[ inline ]
    #[ must_use ]
    pub fn drain_ready( &self ) -> Vec< QueuedRequest >
    {
      let mut state = self.state.write();
      let now = Utc::now();
      let ( ready, pending ) : ( VecDeque< _ >, VecDeque< _ > ) = state.queue.drain( .. ).partition( | r | r.next_retry_at <= now );
      state.queue = pending;
      ready.into_iter().collect()
    }

    /// Re-queue `request` after a failed retry attempt, advancing its
    /// backoff exponentially up to [`REQUEUE_MAX_BACKOFF_SECS`]. Returns
    /// `false` (dropping the request) if the queue is already at
    /// [`MAX_QUEUE_DEPTH`].
    #[ inline ]
    #[ must_use ]
    pub fn requeue( &self, mut request : QueuedRequest ) -> bool
    {
      let mut state = self.state.write();
      if state.queue.len() >= MAX_QUEUE_DEPTH
      {
        return false;
      }
      request.retry_count = request.retry_count.saturating_add( 1 );
      let backoff_secs = REQUEUE_BASE_BACKOFF_SECS
        .saturating_mul( 1i64.checked_shl( request.retry_count.min( 16 ) ).unwrap_or( i64::MAX ) )
        .min( REQUEUE_MAX_BACKOFF_SECS );
      request.next_retry_at = Utc::now() + chrono::Duration::seconds( backoff_secs );
      state.queue.push_back( request );
      true
    }

    /// Drain every currently queued request regardless of backoff state,
    /// oldest first.
    #[ inline ]
    #[ must_use ]
    pub fn drain_queue( &self ) -> Vec< QueuedRequest >
    {
      self.state.write().queue.drain( .. ).collect()
    }

    /// Number of tasks currently queued.
    #[ inline ]
    #[ must_use ]
    pub fn queue_depth( &self ) -> usize
    {
      self.state.read().queue.len()
    }

    /// Every mode transition recorded so far, oldest first.
    #[ inline ]
    #[ must_use ]
    pub fn transitions( &self ) -> Vec< ModeTransition >
    {
      self.state.read().transitions.iter().cloned().collect()
    }
  }

  impl Default for DegradationController
  {
    #[ inline ]
    fn default() -> Self
    {
      Self::new()
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::task::TaskPriority;

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

    #[ test ]
    fn starts_in_normal_mode_with_no_transitions()
    {
      let controller = DegradationController::new();
      assert_eq!( controller.mode(), DegradationMode::Normal );
      assert!( controller.transitions().is_empty() );
    }

    #[ test ]
    fn single_provider_failing_past_threshold_is_total_unavailability()
    {
      let controller = DegradationController::new();
      controller.register_provider( "openai" );
      for _ in 0 .. PROVIDER_FAILURE_THRESHOLD
      {
        controller.mark_provider_failure( "openai" );
      }
      assert_eq!( controller.mode(), DegradationMode::TotalUnavailability );
      assert!( !controller.provider_is_available( "openai" ) );
    }

    #[ test ]
    fn one_of_two_providers_failing_is_partial_not_total()
    {
      let controller = DegradationController::new();
      controller.register_provider( "openai" );
      controller.register_provider( "anthropic" );
      for _ in 0 .. PROVIDER_FAILURE_THRESHOLD
      {
        controller.mark_provider_failure( "openai" );
      }
      assert_eq!( controller.mode(), DegradationMode::PartialProviderUnavailable );
    }

    #[ test ]
    fn provider_recovery_returns_to_normal()
    {
      let controller = DegradationController::new();
      controller.register_provider( "openai" );
      for _ in 0 .. PROVIDER_FAILURE_THRESHOLD
      {
        controller.mark_provider_failure( "openai" );
      }
      controller.mark_provider_success( "openai" );
      assert_eq!( controller.mode(), DegradationMode::Normal );
    }

    #[ test ]
    fn cache_failure_degrades_only_when_providers_are_healthy()
    {
      let controller = DegradationController::new();
      controller.mark_cache_failure();
      assert_eq!( controller.mode(), DegradationMode::CacheUnavailable );
    }

    #[ test ]
    fn monitoring_failure_is_lower_priority_than_cache()
    {
      let controller = DegradationController::new();
      controller.mark_cache_failure();
      controller.mark_monitoring_failure();
      assert_eq!( controller.mode(), DegradationMode::CacheUnavailable );
      controller.mark_cache_success();
      assert_eq!( controller.mode(), DegradationMode::MonitoringUnavailable );
    }

    #[ test ]
    fn transition_log_is_bounded()
    {
      let controller = DegradationController::new();
      for _ in 0 .. MAX_TRANSITION_LOG + 10
      {
        controller.mark_cache_failure();
        controller.mark_cache_success();
      }
      assert_eq!( controller.transitions().len(), MAX_TRANSITION_LOG );
    }

    #[ test ]
    fn queue_rejects_past_max_depth()
    {
      let controller = DegradationController::new();
      for _ in 0 .. MAX_QUEUE_DEPTH
      {
        assert!( controller.enqueue( task() ) );
      }
      assert!( !controller.enqueue( task() ) );
      assert_eq!( controller.queue_depth(), MAX_QUEUE_DEPTH );
    }

    #[ test ]
    fn drain_empties_the_queue()
    {
      let controller = DegradationController::new();
      controller.enqueue( task() );
      controller.enqueue( task() );
      let drained = controller.drain_queue();
      assert_eq!( drained.len(), 2 );
      assert_eq!( controller.queue_depth(), 0 );
    }

    #[ test ]
    fn drain_ready_skips_requests_still_backing_off()
    {
      let controller = DegradationController::new();
      controller.enqueue( task() );
      let ready = controller.drain_ready();
      assert_eq!( ready.len(), 1 );
      let requeued = controller.requeue( ready.into_iter().next().unwrap() );
      assert!( requeued );
      // freshly requeued request is backing off, not yet ready.
      assert!( controller.drain_ready().is_empty() );
      assert_eq!( controller.queue_depth(), 1 );
    }
  }
}

pub use private::
{
  DegradationController, DegradationMode, ModeTransition, QueuedRequest,
  MAX_QUEUE_DEPTH, MAX_TRANSITION_LOG, PROVIDER_FAILURE_THRESHOLD,
  REQUEUE_BASE_BACKOFF_SECS, REQUEUE_MAX_BACKOFF_SECS,
};
