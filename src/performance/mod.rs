//! Performance Store : append-only latency/success records with rolling
//! aggregation and degradation detection (spec §4.4), grounded on the
//! metrics-accumulator shape of `enterprise::cost_quota::UsageMetrics`.

mod private
{
  use std::collections::HashMap;
  use std::sync::Arc;
  use chrono::{ DateTime, Duration as ChronoDuration, Utc };
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };

  #[ cfg( feature = "logging" ) ]
  use tracing::warn;

  use crate::task::AgentKind;

  /// A single completed call, recorded regardless of outcome.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct PerformanceRecord
  {
    /// Model the call was dispatched to.
    pub model_id : String,
    /// Logical role of the caller that submitted the task (spec §3
    /// "Performance record"), carried through for per-agent-kind grouping.
    pub agent_kind : AgentKind,
    /// Id of the task the call served.
    pub task_id : String,
    /// Wall-clock latency of the call, in milliseconds.
    pub latency_ms : u64,
    /// Whether the call completed successfully.
    pub success : bool,
    /// Caller-reported quality score in `[0.0, 1.0]`, when available.
    /// Absent scores are excluded from averages rather than treated as 0
    /// (spec §9 Open Question, resolved in DESIGN.md).
    pub quality_score : Option< f64 >,
    /// When the record was produced.
    pub recorded_at : DateTime< Utc >,
  }

  /// Aggregated statistics over a time window of [`PerformanceRecord`]s
  /// (spec §4.4 `aggregate`).
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub struct PerformanceAggregate
  {
    /// Number of records the aggregate was computed over.
    pub total : usize,
    /// Records with `success == true`.
    pub success_count : usize,
    /// Records with `success == false`.
    pub failure_count : usize,
    /// `success_count / total`, in `[0.0, 1.0]`.
    pub success_rate : f64,
    /// Mean latency across the window, in milliseconds.
    pub avg_latency_ms : f64,
    /// 50th percentile latency, in milliseconds.
    pub p50_latency_ms : f64,
    /// 95th percentile latency, in milliseconds.
    pub p95_latency_ms : f64,
    /// 99th percentile latency, in milliseconds.
    pub p99_latency_ms : f64,
    /// Mean of the non-`None` quality scores, `None` if there were none.
    pub avg_quality_score : Option< f64 >,
  }

  impl PerformanceAggregate
  {
    fn empty() -> Self
    {
      Self
      {
        total : 0,
        success_count : 0,
        failure_count : 0,
        success_rate : 1.0,
        avg_latency_ms : 0.0,
        p50_latency_ms : 0.0,
        p95_latency_ms : 0.0,
        p99_latency_ms : 0.0,
        avg_quality_score : None,
      }
    }
  }

  /// A surfaced degradation signal (spec §4.4 `detect_degradation`).
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub struct DegradationDescriptor
  {
    /// Sample count the low success rate was observed over.
    pub total : usize,
    /// Observed success rate, below the configured threshold.
    pub success_rate : f64,
    /// Threshold that was breached.
    pub threshold : f64,
  }

  /// Linear-interpolation percentile over a pre-sorted slice, matching the
  /// common "R-7" definition used by most monitoring stacks.
  fn percentile( sorted : &[ u64 ], p : f64 ) -> f64
  {
    if sorted.is_empty()
    {
      return 0.0;
    }
    if sorted.len() == 1
    {
      return sorted[ 0 ] as f64;
    }
    let rank = p * ( sorted.len() - 1 ) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper
    {
      return sorted[ lower ] as f64;
    }
    let frac = rank - lower as f64;
    sorted[ lower ] as f64 * ( 1.0 - frac ) + sorted[ upper ] as f64 * frac
  }

  /// Default window the Selector and degradation detection aggregate
  /// over (spec §4.4 "24 h").
  pub const DEFAULT_WINDOW : std::time::Duration = std::time::Duration::from_secs( 24 * 60 * 60 );

  /// Default success-rate floor below which a model counts as degraded
  /// (spec §4.4 "default 0.8").
  pub const DEFAULT_DEGRADATION_THRESHOLD : f64 = 0.8;

  /// Rolling cap on records retained per model, oldest evicted first.
  /// Bounds memory independent of the aggregation window.
  pub const MAX_RECORDS_PER_MODEL : usize = 10_000;

  #[ derive( Debug, Default ) ]
  struct ModelHistory
  {
    records : std::collections::VecDeque< PerformanceRecord >,
  }

  /// Append-only, per-model store of performance records with rolling
  /// aggregation and degradation detection.
  #[ derive( Debug, Clone ) ]
  pub struct PerformanceStore
  {
    history : Arc< RwLock< HashMap< String, ModelHistory > > >,
  }

  impl PerformanceStore
  {
    /// Build an empty store.
    #[ inline ]
    #[ must_use ]
    pub fn new() -> Self
    {
      Self { history : Arc::new( RwLock::new( HashMap::new() ) ) }
    }

    /// Append one record, evicting the oldest once the per-model cap is
    /// exceeded.
    #[ inline ]
    pub fn record( &self, record : PerformanceRecord )
    {
      let mut guard = self.history.write();
      let entry = guard.entry( record.model_id.clone() ).or_default();
      entry.records.push_back( record );
      while entry.records.len() > MAX_RECORDS_PER_MODEL
      {
        entry.records.pop_front();
      }
    }

    /// Aggregate every record for `model_id` newer than `window` ago
    /// (spec §4.4 `aggregate(model_id, window)`).
    #[ inline ]
    #[ must_use ]
    pub fn aggregate( &self, model_id : &str, window : std::time::Duration ) -> PerformanceAggregate
    {
      let guard = self.history.read();
      let Some( history ) = guard.get( model_id ) else { return PerformanceAggregate::empty() };
      if history.records.is_empty()
      {
        return PerformanceAggregate::empty();
      }

      let cutoff = Utc::now() - ChronoDuration::from_std( window ).unwrap_or( ChronoDuration::zero() );
      let recent : Vec< &PerformanceRecord > = history.records.iter()
        .filter( | r | r.recorded_at >= cutoff )
        .collect();
      if recent.is_empty()
      {
        return PerformanceAggregate::empty();
      }

      let mut latencies : Vec< u64 > = recent.iter().map( | r | r.latency_ms ).collect();
      latencies.sort_unstable();

      let success_count = recent.iter().filter( | r | r.success ).count();
      let failure_count = recent.len() - success_count;
      let scored : Vec< f64 > = recent.iter().filter_map( | r | r.quality_score ).collect();
      let avg_quality_score = if scored.is_empty()
      {
        None
      }
      else
      {
        Some( scored.iter().sum::< f64 >() / scored.len() as f64 )
      };

      PerformanceAggregate
      {
        total : recent.len(),
        success_count,
        failure_count,
        success_rate : success_count as f64 / recent.len() as f64,
        avg_latency_ms : latencies.iter().sum::< u64 >() as f64 / latencies.len() as f64,
        p50_latency_ms : percentile( &latencies, 0.50 ),
        p95_latency_ms : percentile( &latencies, 0.95 ),
        p99_latency_ms : percentile( &latencies, 0.99 ),
        avg_quality_score,
      }
    }

    /// Aggregate over the default 24-hour window.
    #[ inline ]
    #[ must_use ]
    pub fn aggregate_24h( &self, model_id : &str ) -> PerformanceAggregate
    {
      self.aggregate( model_id, DEFAULT_WINDOW )
    }

    /// Whether `model_id`'s 24-hour success rate is below `threshold`
    /// (spec §4.4 `detect_degradation`). Advisory only : it never blocks
    /// selection, only surfaces an alert and feeds the Selector's
    /// performance sub-score.
    #[ inline ]
    #[ must_use ]
    pub fn detect_degradation( &self, model_id : &str, threshold : f64 ) -> Option< DegradationDescriptor >
    {
      let agg = self.aggregate_24h( model_id );
      if agg.total == 0 || agg.success_rate >= threshold
      {
        return None;
      }

      #[ cfg( feature = "logging" ) ]
      warn!( model_id, success_rate = agg.success_rate, threshold, total = agg.total, "performance degradation detected" );

      Some( DegradationDescriptor { total : agg.total, success_rate : agg.success_rate, threshold } )
    }

    /// Number of records currently retained for `model_id`.
    #[ inline ]
    #[ must_use ]
    pub fn record_count( &self, model_id : &str ) -> usize
    {
      self.history.read().get( model_id ).map_or( 0, | h | h.records.len() )
    }
  }

  impl Default for PerformanceStore
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

    fn record( model : &str, latency : u64, success : bool ) -> PerformanceRecord
    {
      PerformanceRecord
      {
        model_id : model.to_string(),
        agent_kind : AgentKind::Implementer,
        task_id : "t1".to_string(),
        latency_ms : latency,
        success,
        quality_score : None,
        recorded_at : Utc::now(),
      }
    }

    #[ test ]
    fn aggregate_of_empty_model_has_zero_samples()
    {
      let store = PerformanceStore::new();
      let agg = store.aggregate_24h( "gpt-4" );
      assert_eq!( agg.total, 0 );
    }

    #[ test ]
    fn percentiles_over_known_distribution()
    {
      let store = PerformanceStore::new();
      for latency in [ 100, 200, 300, 400, 500 ]
      {
        store.record( record( "m", latency, true ) );
      }
      let agg = store.aggregate_24h( "m" );
      assert_eq!( agg.total, 5 );
      assert!( ( agg.p50_latency_ms - 300.0 ).abs() < f64::EPSILON );
    }

    #[ test ]
    fn low_success_rate_flags_degradation()
    {
      let store = PerformanceStore::new();
      for _ in 0 .. 10
      {
        store.record( record( "m", 100, true ) );
      }
      for _ in 0 .. 15
      {
        store.record( record( "m", 100, false ) );
      }
      let agg = store.aggregate_24h( "m" );
      assert!( ( agg.success_rate - 0.4 ).abs() < 1e-9 );
      assert!( store.detect_degradation( "m", DEFAULT_DEGRADATION_THRESHOLD ).is_some() );
    }

    #[ test ]
    fn high_success_rate_is_not_degraded()
    {
      let store = PerformanceStore::new();
      for _ in 0 .. 20
      {
        store.record( record( "m", 100, true ) );
      }
      assert!( store.detect_degradation( "m", DEFAULT_DEGRADATION_THRESHOLD ).is_none() );
    }

    #[ test ]
    fn quality_score_absent_is_excluded_not_zeroed()
    {
      let store = PerformanceStore::new();
      store.record( record( "m", 100, true ) );
      let mut scored = record( "m", 100, true );
      scored.quality_score = Some( 0.8 );
      store.record( scored );
      let agg = store.aggregate_24h( "m" );
      assert_eq!( agg.avg_quality_score, Some( 0.8 ) );
    }

    #[ test ]
    fn records_outside_the_window_are_excluded()
    {
      let store = PerformanceStore::new();
      let mut stale = record( "m", 100, true );
      stale.recorded_at = Utc::now() - ChronoDuration::hours( 48 );
      store.record( stale );
      store.record( record( "m", 200, true ) );

      let agg = store.aggregate( "m", std::time::Duration::from_secs( 24 * 60 * 60 ) );
      assert_eq!( agg.total, 1 );
    }

    #[ test ]
    fn eviction_caps_per_model_history()
    {
      let store = PerformanceStore::new();
      for i in 0 .. MAX_RECORDS_PER_MODEL + 50
      {
        store.record( record( "m", i as u64, true ) );
      }
      assert_eq!( store.record_count( "m" ), MAX_RECORDS_PER_MODEL );
    }
  }
}

pub use private::
{
  DegradationDescriptor, PerformanceAggregate, PerformanceRecord, PerformanceStore,
  DEFAULT_DEGRADATION_THRESHOLD, DEFAULT_WINDOW, MAX_RECORDS_PER_MODEL,
};
