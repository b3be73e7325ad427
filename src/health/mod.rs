//! Health Tracker : per-model liveness state with exponential backoff
//! (spec §4.2).

mod private
{
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::time::{ Duration, Instant };
  use parking_lot::RwLock;

  #[ cfg( feature = "logging" ) ]
  use tracing::{ debug, warn };

  /// Cap on the exponential backoff interval between probes of a model
  /// that keeps failing its health check (spec §4.2 "backoff, capped at
  /// 5 minutes").
  pub const MAX_BACKOFF : Duration = Duration::from_secs( 5 * 60 );

  /// Starting backoff interval after the first consecutive failure
  /// (spec §4.2 "60s, 120s, ... capped at 5 minutes").
  pub const BASE_BACKOFF : Duration = Duration::from_secs( 60 );

  /// Liveness state of a single model, as seen by the health tracker.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
  pub enum HealthState
  {
    /// Last probe (or last live call) succeeded.
    Healthy,
    /// At least one consecutive failure, not yet past the unhealthy
    /// threshold.
    Degraded,
    /// Past the unhealthy threshold ; excluded from selection until the
    /// backoff interval elapses.
    Unhealthy,
  }

  #[ derive( Debug, Clone ) ]
  struct ModelHealth
  {
    state : HealthState,
    consecutive_failures : u32,
    last_check : Option< Instant >,
    next_retry_at : Option< Instant >,
    last_latency_ms : Option< u64 >,
    last_error : Option< String >,
  }

  impl Default for ModelHealth
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        state : HealthState::Healthy,
        consecutive_failures : 0,
        last_check : None,
        next_retry_at : None,
        last_latency_ms : None,
        last_error : None,
      }
    }
  }

  /// Point-in-time snapshot of a model's health state (spec §3 "Health
  /// state"), exposed to callers that want more than the boolean
  /// [`HealthTracker::is_available`] view — e.g. a background probe loop
  /// persisting results for offline analysis.
  #[ derive( Debug, Clone, PartialEq ) ]
  pub struct HealthSnapshot
  {
    /// Current derived state.
    pub state : HealthState,
    /// Consecutive failures recorded so far.
    pub consecutive_failures : u32,
    /// Latency of the most recent probe or live call, when known.
    pub last_latency_ms : Option< u64 >,
    /// Error text from the most recent failure, when known.
    pub last_error : Option< String >,
    /// When the next probe is due, for unhealthy/degraded models.
    pub next_retry_at : Option< Instant >,
  }

  /// Number of consecutive failures after which a model is considered
  /// `Unhealthy` rather than merely `Degraded` (spec §4.2).
  const UNHEALTHY_THRESHOLD : u32 = 3;

  /// Tracks per-model health state, backing off probes exponentially while
  /// a model keeps failing.
  #[ derive( Debug, Clone ) ]
  pub struct HealthTracker
  {
    models : Arc< RwLock< HashMap< String, ModelHealth > > >,
  }

  impl HealthTracker
  {
    /// Build a tracker with no models recorded yet ; unknown models are
    /// treated as `Healthy` until their first probe result arrives.
    #[ inline ]
    #[ must_use ]
    pub fn new() -> Self
    {
      Self { models : Arc::new( RwLock::new( HashMap::new() ) ) }
    }

    /// Record a successful probe or live call, resetting backoff.
    #[ inline ]
    pub fn record_success( &self, model_id : &str )
    {
      self.record_probe_success( model_id, None );
    }

    /// Record a failed probe or live call, advancing the backoff schedule.
    /// The backoff governs only when the next probe is attempted ; it
    /// never gates whether the model is selectable (see
    /// [`HealthTracker::is_available`]).
    #[ inline ]
    pub fn record_failure( &self, model_id : &str )
    {
      self.record_probe_failure( model_id, None );
    }

    /// Record a successful probe, additionally storing its latency
    /// (spec §4.2 "On success : record `(latency_ms, success=true)`").
    #[ inline ]
    pub fn record_probe_success( &self, model_id : &str, latency_ms : Option< u64 > )
    {
      let mut guard = self.models.write();
      let entry = guard.entry( model_id.to_string() ).or_default();
      let was_unhealthy = entry.state == HealthState::Unhealthy;
      entry.state = HealthState::Healthy;
      entry.consecutive_failures = 0;
      entry.last_check = Some( Instant::now() );
      entry.next_retry_at = None;
      entry.last_latency_ms = latency_ms;
      entry.last_error = None;

      #[ cfg( feature = "logging" ) ]
      if was_unhealthy
      {
        debug!( model_id, "model recovered, health reset to Healthy" );
      }
      #[ cfg( not( feature = "logging" ) ) ]
      let _ = was_unhealthy;
    }

    /// Record a failed probe, additionally storing the error text
    /// (spec §3 "Health state" `last_error`).
    #[ inline ]
    pub fn record_probe_failure( &self, model_id : &str, error : Option< String > )
    {
      let mut guard = self.models.write();
      let entry = guard.entry( model_id.to_string() ).or_default();
      entry.consecutive_failures = entry.consecutive_failures.saturating_add( 1 );
      entry.last_check = Some( Instant::now() );
      entry.last_error = error;

      entry.state = if entry.consecutive_failures >= UNHEALTHY_THRESHOLD
      {
        HealthState::Unhealthy
      }
      else
      {
        HealthState::Degraded
      };

      // Explicit 3-bucket schedule (spec §4.2 "60 s, 120 s, 300 s, 300 s, ..."),
      // not a doubling formula : 1 failure -> 60s, 2 -> 120s, >=3 -> 300s.
      let backoff = match entry.consecutive_failures
      {
        1 => BASE_BACKOFF,
        2 => Duration::from_secs( 120 ),
        _ => MAX_BACKOFF,
      };
      entry.next_retry_at = Some( Instant::now() + backoff );

      #[ cfg( feature = "logging" ) ]
      if entry.state == HealthState::Unhealthy
      {
        warn!( model_id, consecutive_failures = entry.consecutive_failures, ?backoff, "model marked unhealthy" );
      }
    }

    /// Current health state, `Healthy` if the model has never been seen.
    #[ inline ]
    #[ must_use ]
    pub fn status( &self, model_id : &str ) -> HealthState
    {
      self.models.read().get( model_id ).map_or( HealthState::Healthy, | h | h.state )
    }

    /// Whether a model should currently be offered to the selector : true
    /// unless its consecutive failure count has crossed the unhealthy
    /// threshold. Deliberately independent of the probe backoff schedule
    /// (spec §4.2 : availability and probe timing are separate concerns) -
    /// a model only becomes selectable again once an actual probe
    /// succeeds and calls [`HealthTracker::record_success`].
    #[ inline ]
    #[ must_use ]
    pub fn is_available( &self, model_id : &str ) -> bool
    {
      let guard = self.models.read();
      guard.get( model_id ).is_none_or( | h | h.consecutive_failures < UNHEALTHY_THRESHOLD )
    }

    /// When the next probe attempt is due, regardless of current state.
    #[ inline ]
    #[ must_use ]
    pub fn next_retry_at( &self, model_id : &str ) -> Option< Instant >
    {
      self.models.read().get( model_id ).and_then( | h | h.next_retry_at )
    }

    /// Number of consecutive failures currently recorded.
    #[ inline ]
    #[ must_use ]
    pub fn consecutive_failures( &self, model_id : &str ) -> u32
    {
      self.models.read().get( model_id ).map_or( 0, | h | h.consecutive_failures )
    }

    /// Full point-in-time snapshot of a model's health, for callers that
    /// want more than the boolean [`HealthTracker::is_available`] view
    /// (e.g. persisting probe outcomes for offline analysis).
    #[ inline ]
    #[ must_use ]
    pub fn status_detail( &self, model_id : &str ) -> HealthSnapshot
    {
      let guard = self.models.read();
      guard.get( model_id ).map_or_else(
        || HealthSnapshot
        {
          state : HealthState::Healthy,
          consecutive_failures : 0,
          last_latency_ms : None,
          last_error : None,
          next_retry_at : None,
        },
        | h | HealthSnapshot
        {
          state : h.state,
          consecutive_failures : h.consecutive_failures,
          last_latency_ms : h.last_latency_ms,
          last_error : h.last_error.clone(),
          next_retry_at : h.next_retry_at,
        },
      )
    }

    /// Whether a background probe cycle should probe this model now : true
    /// for models never probed, and for models whose recorded backoff
    /// (`next_retry_at`) has elapsed. Healthy models with no pending
    /// backoff are still probed once `base_interval` has passed since the
    /// last check, so a steady cadence is kept even when nothing is
    /// failing (spec §4.2 "runs a background cadence").
    #[ inline ]
    #[ must_use ]
    pub fn due_for_probe( &self, model_id : &str, base_interval : Duration ) -> bool
    {
      let guard = self.models.read();
      let Some( entry ) = guard.get( model_id ) else { return true };
      if let Some( retry_at ) = entry.next_retry_at
      {
        return Instant::now() >= retry_at;
      }
      entry.last_check.is_none_or( | last | last.elapsed() >= base_interval )
    }
  }

  impl Default for HealthTracker
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

    #[ test ]
    fn unknown_model_is_healthy_and_available()
    {
      let tracker = HealthTracker::new();
      assert_eq!( tracker.status( "gpt-4" ), HealthState::Healthy );
      assert!( tracker.is_available( "gpt-4" ) );
    }

    #[ test ]
    fn crosses_unhealthy_threshold_and_becomes_unavailable()
    {
      let tracker = HealthTracker::new();
      for _ in 0 .. UNHEALTHY_THRESHOLD
      {
        tracker.record_failure( "gpt-4" );
      }
      assert_eq!( tracker.status( "gpt-4" ), HealthState::Unhealthy );
      assert!( !tracker.is_available( "gpt-4" ) );
      assert!( tracker.next_retry_at( "gpt-4" ).is_some() );
    }

    #[ test ]
    fn stays_available_below_threshold_even_with_a_pending_backoff()
    {
      let tracker = HealthTracker::new();
      tracker.record_failure( "gpt-4" );
      assert!( tracker.is_available( "gpt-4" ) );
      assert!( tracker.next_retry_at( "gpt-4" ).is_some() );
    }

    #[ test ]
    fn success_resets_state()
    {
      let tracker = HealthTracker::new();
      tracker.record_failure( "gpt-4" );
      tracker.record_failure( "gpt-4" );
      tracker.record_success( "gpt-4" );
      assert_eq!( tracker.status( "gpt-4" ), HealthState::Healthy );
      assert_eq!( tracker.consecutive_failures( "gpt-4" ), 0 );
    }

    #[ test ]
    fn backoff_is_capped()
    {
      let tracker = HealthTracker::new();
      for _ in 0 .. 20
      {
        tracker.record_failure( "gpt-4" );
      }
      let at = tracker.next_retry_at( "gpt-4" ).expect( "should have a retry time" );
      assert!( at <= Instant::now() + MAX_BACKOFF + Duration::from_secs( 1 ) );
    }

    #[ test ]
    fn backoff_follows_the_literal_60_120_300_schedule()
    {
      let tracker = HealthTracker::new();
      let tolerance = Duration::from_secs( 1 );

      tracker.record_failure( "gpt-4" );
      let first = tracker.next_retry_at( "gpt-4" ).expect( "retry time" );
      assert!( first <= Instant::now() + Duration::from_secs( 60 ) + tolerance );
      assert!( first > Instant::now() + Duration::from_secs( 60 ) - tolerance );

      tracker.record_failure( "gpt-4" );
      let second = tracker.next_retry_at( "gpt-4" ).expect( "retry time" );
      assert!( second <= Instant::now() + Duration::from_secs( 120 ) + tolerance );
      assert!( second > Instant::now() + Duration::from_secs( 120 ) - tolerance );

      tracker.record_failure( "gpt-4" );
      let third = tracker.next_retry_at( "gpt-4" ).expect( "retry time" );
      assert!( third <= Instant::now() + MAX_BACKOFF + tolerance );
      assert!( third > Instant::now() + MAX_BACKOFF - tolerance );

      // A 4th failure stays at the 300s ceiling, not doubling further.
      tracker.record_failure( "gpt-4" );
      let fourth = tracker.next_retry_at( "gpt-4" ).expect( "retry time" );
      assert!( fourth <= Instant::now() + MAX_BACKOFF + tolerance );
    }

    #[ test ]
    fn probe_success_records_latency_and_clears_error()
    {
      let tracker = HealthTracker::new();
      tracker.record_probe_failure( "gpt-4", Some( "timeout".to_string() ) );
      tracker.record_probe_success( "gpt-4", Some( 42 ) );
      let snapshot = tracker.status_detail( "gpt-4" );
      assert_eq!( snapshot.state, HealthState::Healthy );
      assert_eq!( snapshot.last_latency_ms, Some( 42 ) );
      assert_eq!( snapshot.last_error, None );
    }

    #[ test ]
    fn probe_failure_records_error_text()
    {
      let tracker = HealthTracker::new();
      tracker.record_probe_failure( "gpt-4", Some( "connection refused".to_string() ) );
      let snapshot = tracker.status_detail( "gpt-4" );
      assert_eq!( snapshot.last_error.as_deref(), Some( "connection refused" ) );
      assert_eq!( snapshot.consecutive_failures, 1 );
    }

    #[ test ]
    fn unknown_model_is_due_for_probe()
    {
      let tracker = HealthTracker::new();
      assert!( tracker.due_for_probe( "gpt-4", Duration::from_secs( 60 ) ) );
    }

    #[ test ]
    fn freshly_checked_healthy_model_is_not_due_yet()
    {
      let tracker = HealthTracker::new();
      tracker.record_success( "gpt-4" );
      assert!( !tracker.due_for_probe( "gpt-4", Duration::from_secs( 60 ) ) );
    }

    #[ test ]
    fn model_past_backoff_is_due_for_probe()
    {
      let tracker = HealthTracker::new();
      tracker.record_failure( "gpt-4" );
      assert!( !tracker.due_for_probe( "gpt-4", Duration::from_secs( 60 ) ) );
    }
  }
}

pub use private::{ HealthSnapshot, HealthState, HealthTracker, MAX_BACKOFF, BASE_BACKOFF };
