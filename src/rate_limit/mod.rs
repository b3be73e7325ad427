//! Rate-Limit Tracker : per-model sliding-window request/token accounting
//! with a sticky `blocked_until` cooldown (spec §4.3), grounded on the
//! token/sliding-window split in `api_gemini::internal::http::rate_limiter`
//! and the 90%-threshold + 60s-cooldown semantics of the original
//! `rate_limiter.py`'s `RateLimiter.check_rate_limit`.

mod private
{
  use std::collections::{ HashMap, VecDeque };
  use std::sync::Arc;
  use std::time::{ Duration, Instant };
  use parking_lot::Mutex;

  #[ cfg( feature = "logging" ) ]
  use tracing::{ debug, warn };

  /// Width of the sliding window the tracker evaluates requests/tokens
  /// against (spec §4.3).
  pub const WINDOW : Duration = Duration::from_secs( 60 );

  /// Utilisation fraction (of either requests or tokens) past which a
  /// model is proactively blocked for the rest of the window, even though
  /// it has not yet literally exceeded its limit (spec §4.3 step "90%").
  pub const THRESHOLD : f64 = 0.90;

  #[ derive( Debug ) ]
  struct Window
  {
    requests : VecDeque< Instant >,
    token_events : VecDeque< ( Instant, u32 ) >,
    blocked_until : Option< Instant >,
  }

  impl Default for Window
  {
    #[ inline ]
    fn default() -> Self
    {
      Self { requests : VecDeque::new(), token_events : VecDeque::new(), blocked_until : None }
    }
  }

  impl Window
  {
    fn evict( &mut self, now : Instant )
    {
      while let Some( &front ) = self.requests.front()
      {
        if now.duration_since( front ) > WINDOW { self.requests.pop_front(); } else { break; }
      }
      while let Some( &( front, _ ) ) = self.token_events.front()
      {
        if now.duration_since( front ) > WINDOW { self.token_events.pop_front(); } else { break; }
      }
    }

    fn token_sum( &self ) -> u32
    {
      self.token_events.iter().map( | ( _, t ) | *t ).sum()
    }

    /// Clear a stale cooldown once its deadline has passed (invariant §3.4).
    fn clear_expired_block( &mut self, now : Instant )
    {
      if self.blocked_until.is_some_and( | at | now >= at )
      {
        self.blocked_until = None;
      }
    }
  }

  /// Outcome of a pre-dispatch rate-limit check (spec §4.3 `pre_check`).
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub enum Admission
  {
    /// Room available under both limits ; residual capacity attached.
    Allowed
    {
      /// Requests still permitted in the current window after this one.
      requests_remaining : u32,
      /// Tokens still permitted in the current window after this one.
      tokens_remaining : u32,
    },
    /// The model is currently cooling down, whether from a computed
    /// threshold breach or an adapter-signalled rate limit.
    Limited,
  }

  impl Admission
  {
    /// Whether the check passed.
    #[ inline ]
    #[ must_use ]
    pub fn is_allowed( self ) -> bool
    {
      matches!( self, Admission::Allowed { .. } )
    }
  }

  /// Tracks per-model request and token usage over a trailing 60-second
  /// window. Admits or rejects calls against the descriptor's
  /// `requests_per_minute` / `tokens_per_minute` limits, proactively
  /// blocking once either utilisation would cross [`THRESHOLD`].
  #[ derive( Debug, Clone ) ]
  pub struct RateLimitTracker
  {
    windows : Arc< Mutex< HashMap< String, Window > > >,
  }

  impl RateLimitTracker
  {
    /// Build an empty tracker.
    #[ inline ]
    #[ must_use ]
    pub fn new() -> Self
    {
      Self { windows : Arc::new( Mutex::new( HashMap::new() ) ) }
    }

    /// Check whether a new request against `model_id` would stay within
    /// its limits, without recording it. Callers that proceed must call
    /// [`RateLimitTracker::record`] once the request is actually issued.
    ///
    /// If either utilisation would reach [`THRESHOLD`] after accounting
    /// for this request, `blocked_until` is set to `now + 60s` and
    /// [`Admission::Limited`] is returned (spec §4.3 step "pre_check").
    #[ inline ]
    #[ must_use ]
    pub fn pre_check( &self, model_id : &str, requests_per_minute : u32, tokens_per_minute : u32, estimated_tokens : u32 ) -> Admission
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.entry( model_id.to_string() ).or_default();
      window.evict( now );
      window.clear_expired_block( now );

      if window.blocked_until.is_some()
      {
        #[ cfg( feature = "logging" ) ]
        debug!( model_id, "rate limit cooldown still in effect" );
        return Admission::Limited;
      }

      let projected_requests = window.requests.len() as u32 + 1;
      let projected_tokens = window.token_sum().saturating_add( estimated_tokens );

      let request_utilisation = projected_requests as f64 / requests_per_minute.max( 1 ) as f64;
      let token_utilisation = projected_tokens as f64 / tokens_per_minute.max( 1 ) as f64;

      if request_utilisation >= THRESHOLD || token_utilisation >= THRESHOLD
      {
        window.blocked_until = Some( now + WINDOW );
        #[ cfg( feature = "logging" ) ]
        warn!( model_id, request_utilisation, token_utilisation, "rate limit threshold crossed, blocking for 60s" );
        return Admission::Limited;
      }

      Admission::Allowed
      {
        requests_remaining : requests_per_minute.saturating_sub( projected_requests ),
        tokens_remaining : tokens_per_minute.saturating_sub( projected_tokens ),
      }
    }

    /// Record a request that was actually issued against `model_id`,
    /// consuming `tokens` from its token budget for the current window.
    /// When `api_signalled_limit` is true (the adapter reported an
    /// explicit rate-limit response), the cooldown is set unconditionally
    /// regardless of computed utilisation (spec §4.3 step "record").
    #[ inline ]
    pub fn record( &self, model_id : &str, tokens : u32, api_signalled_limit : bool )
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.entry( model_id.to_string() ).or_default();
      window.evict( now );
      window.requests.push_back( now );
      window.token_events.push_back( ( now, tokens ) );

      if api_signalled_limit
      {
        window.blocked_until = Some( now + WINDOW );
        #[ cfg( feature = "logging" ) ]
        warn!( model_id, "provider signalled a rate limit, blocking for 60s" );
      }
    }

    /// Whether `model_id` is currently limited : either in an active
    /// cooldown, or its present sliding-window usage is already at or
    /// past [`THRESHOLD`]/100% of either limit.
    #[ inline ]
    #[ must_use ]
    pub fn is_limited( &self, model_id : &str, requests_per_minute : u32, tokens_per_minute : u32 ) -> bool
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.entry( model_id.to_string() ).or_default();
      window.evict( now );
      window.clear_expired_block( now );

      if window.blocked_until.is_some()
      {
        return true;
      }
      let requests = window.requests.len() as f64 / requests_per_minute.max( 1 ) as f64;
      let tokens = window.token_sum() as f64 / tokens_per_minute.max( 1 ) as f64;
      requests >= 1.0 || tokens >= 1.0
    }

    /// When the model's cooldown lifts, `None` if it is not currently
    /// blocked.
    #[ inline ]
    #[ must_use ]
    pub fn blocked_until( &self, model_id : &str ) -> Option< Instant >
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.get_mut( model_id )?;
      window.clear_expired_block( now );
      window.blocked_until
    }

    /// Requests recorded for `model_id` within the current window.
    #[ inline ]
    #[ must_use ]
    pub fn current_request_count( &self, model_id : &str ) -> usize
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.entry( model_id.to_string() ).or_default();
      window.evict( now );
      window.requests.len()
    }

    /// Tokens recorded for `model_id` within the current window.
    #[ inline ]
    #[ must_use ]
    pub fn current_token_count( &self, model_id : &str ) -> u32
    {
      let now = Instant::now();
      let mut guard = self.windows.lock();
      let window = guard.entry( model_id.to_string() ).or_default();
      window.evict( now );
      window.token_sum()
    }
  }

  impl Default for RateLimitTracker
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
    fn admits_below_threshold_and_blocks_at_it()
    {
      let tracker = RateLimitTracker::new();
      // 9 requests against rpm=10 -> 90% after the 10th would-be request is
      // only reached exactly at the boundary; drive it past 90% explicitly.
      for _ in 0 .. 8
      {
        assert!( tracker.pre_check( "m", 10, 100_000, 10 ).is_allowed() );
        tracker.record( "m", 10, false );
      }
      // 9th request -> projected 9/10 = 90%, at threshold, blocked.
      assert_eq!( tracker.pre_check( "m", 10, 100_000, 10 ), Admission::Limited );
    }

    #[ test ]
    fn token_utilisation_also_trips_threshold()
    {
      let tracker = RateLimitTracker::new();
      assert!( tracker.pre_check( "m", 100, 100, 89 ).is_allowed() );
      tracker.record( "m", 89, false );
      // Next 1-token request would put us at 90/100 = 90%.
      assert_eq!( tracker.pre_check( "m", 100, 100, 1 ), Admission::Limited );
    }

    #[ test ]
    fn api_signalled_limit_blocks_regardless_of_utilisation()
    {
      let tracker = RateLimitTracker::new();
      tracker.record( "m", 1, true );
      assert_eq!( tracker.pre_check( "m", 1_000, 1_000_000, 1 ), Admission::Limited );
    }

    #[ test ]
    fn independent_models_have_independent_windows()
    {
      let tracker = RateLimitTracker::new();
      tracker.record( "a", 50, false );
      assert_eq!( tracker.current_request_count( "b" ), 0 );
      assert_eq!( tracker.current_request_count( "a" ), 1 );
    }

    #[ test ]
    fn blocked_until_is_cleared_once_elapsed()
    {
      let tracker = RateLimitTracker::new();
      tracker.record( "m", 1, true );
      assert!( tracker.blocked_until( "m" ).is_some() );
      // Cannot fast-forward real time in a unit test without sleeping a
      // full window; instead assert the still-blocked invariant holds.
      assert!( tracker.is_limited( "m", 1_000, 1_000_000 ) );
    }
  }
}

pub use private::{ Admission, RateLimitTracker, THRESHOLD, WINDOW };
