//! Cost Tracker : append-only per-request cost ledger with budget checks
//! and attribution breakdowns (spec §4.5), grounded on
//! `enterprise::cost_quota::{UsageMetrics, CostQuotaManager}`.

mod private
{
  use std::collections::HashMap;
  use std::sync::Arc;
  use chrono::{ DateTime, NaiveDate, Utc };
  use parking_lot::RwLock;
  use serde::{ Deserialize, Serialize };

  #[ cfg( feature = "logging" ) ]
  use tracing::warn;

  use crate::task::AgentKind;

  /// A single priced request, the unit the ledger is built from.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct CostRecord
  {
    /// Task the cost is attributed to.
    pub task_id : String,
    /// Model the request was dispatched to.
    pub model_id : String,
    /// Caller that submitted the task.
    pub agent_kind : AgentKind,
    /// Input tokens consumed.
    pub input_tokens : u64,
    /// Output tokens consumed.
    pub output_tokens : u64,
    /// Cost in USD, computed from the descriptor's per-1k rates.
    pub cost_usd : f64,
    /// When the request completed.
    pub recorded_at : DateTime< Utc >,
  }

  impl CostRecord
  {
    /// Total tokens (input + output).
    #[ inline ]
    #[ must_use ]
    pub fn total_tokens( &self ) -> u64
    {
      self.input_tokens + self.output_tokens
    }
  }

  /// Compute the USD cost of a request from a descriptor's per-1k rates.
  #[ inline ]
  #[ must_use ]
  pub fn calculate_cost( cost_per_1k_input : f64, cost_per_1k_output : f64, input_tokens : u64, output_tokens : u64 ) -> f64
  {
    let input_cost = ( input_tokens as f64 / 1_000.0 ) * cost_per_1k_input;
    let output_cost = ( output_tokens as f64 / 1_000.0 ) * cost_per_1k_output;
    input_cost + output_cost
  }

  /// Daily USD budget ceilings, checked before a request is admitted to
  /// a model (spec §4.5 `check_budget`). `None` means unlimited.
  #[ derive( Debug, Clone, Copy, Default ) ]
  pub struct BudgetLimits
  {
    /// Ceiling on total daily spend across every model.
    pub daily_total_usd : Option< f64 >,
    /// Ceiling on daily spend against a single model.
    pub daily_per_model_usd : Option< f64 >,
  }

  /// Result of a budget check.
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub enum BudgetDecision
  {
    /// Spending the estimated cost would stay within every configured limit.
    WithinBudget,
    /// The crate-wide daily ceiling would be exceeded.
    DailyTotalExceeded,
    /// The per-model daily ceiling would be exceeded.
    DailyModelExceeded
    {
      /// The model whose ceiling would be breached.
      model_id : String,
    },
  }

  /// The literal shape spec §4.5 `check_budget` returns : enough for a
  /// caller to render a budget dashboard without re-deriving it from
  /// [`BudgetDecision`].
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub struct BudgetStatus
  {
    /// The configured daily ceiling, `None` if unlimited.
    pub daily_budget : Option< f64 >,
    /// Amount spent against this ceiling so far today.
    pub current_spend : f64,
    /// `current_spend / daily_budget * 100`, `0.0` when unlimited.
    pub utilisation_percent : f64,
    /// Whether `current_spend` has already crossed `daily_budget`.
    pub is_over_budget : bool,
    /// `daily_budget - current_spend`, `f64::MAX` when unlimited.
    pub remaining : f64,
  }

  impl BudgetStatus
  {
    fn compute( budget : Option< f64 >, spend : f64 ) -> Self
    {
      match budget
      {
        Some( limit ) => BudgetStatus
        {
          daily_budget : Some( limit ),
          current_spend : spend,
          utilisation_percent : if limit > 0.0 { ( spend / limit ) * 100.0 } else { 0.0 },
          is_over_budget : spend > limit,
          remaining : ( limit - spend ).max( 0.0 ),
        },
        None => BudgetStatus
        {
          daily_budget : None,
          current_spend : spend,
          utilisation_percent : 0.0,
          is_over_budget : false,
          remaining : f64::MAX,
        },
      }
    }
  }

  #[ derive( Debug, Default ) ]
  struct DayBucket
  {
    date : Option< NaiveDate >,
    total_usd : f64,
    by_model : HashMap< String, f64 >,
  }

  /// Append-only ledger of [`CostRecord`]s with daily budget enforcement
  /// and attribution breakdowns by model / agent / task.
  #[ derive( Debug, Clone ) ]
  pub struct CostLedger
  {
    limits : BudgetLimits,
    records : Arc< RwLock< Vec< CostRecord > > >,
    today : Arc< RwLock< DayBucket > >,
  }

  impl CostLedger
  {
    /// Build a ledger enforcing `limits`.
    #[ inline ]
    #[ must_use ]
    pub fn new( limits : BudgetLimits ) -> Self
    {
      Self
      {
        limits,
        records : Arc::new( RwLock::new( Vec::new() ) ),
        today : Arc::new( RwLock::new( DayBucket::default() ) ),
      }
    }

    fn roll_day_if_needed( bucket : &mut DayBucket, today : NaiveDate )
    {
      if bucket.date != Some( today )
      {
        bucket.date = Some( today );
        bucket.total_usd = 0.0;
        bucket.by_model.clear();
      }
    }

    /// Check whether `estimated_cost_usd` against `model_id` would stay
    /// within the configured daily budgets, without recording anything.
    #[ inline ]
    #[ must_use ]
    pub fn check_budget( &self, model_id : &str, estimated_cost_usd : f64 ) -> BudgetDecision
    {
      let today = Utc::now().date_naive();
      let mut bucket = self.today.write();
      Self::roll_day_if_needed( &mut bucket, today );

      if let Some( limit ) = self.limits.daily_total_usd
      {
        if bucket.total_usd + estimated_cost_usd > limit
        {
          #[ cfg( feature = "logging" ) ]
          warn!( model_id, limit, "daily total cost budget would be exceeded" );
          return BudgetDecision::DailyTotalExceeded;
        }
      }
      if let Some( limit ) = self.limits.daily_per_model_usd
      {
        let current = bucket.by_model.get( model_id ).copied().unwrap_or( 0.0 );
        if current + estimated_cost_usd > limit
        {
          #[ cfg( feature = "logging" ) ]
          warn!( model_id, limit, "daily per-model cost budget would be exceeded" );
          return BudgetDecision::DailyModelExceeded { model_id : model_id.to_string() };
        }
      }
      BudgetDecision::WithinBudget
    }

    /// Append a priced request to the ledger.
    #[ inline ]
    pub fn record( &self, record : CostRecord )
    {
      let today = Utc::now().date_naive();
      {
        let mut bucket = self.today.write();
        Self::roll_day_if_needed( &mut bucket, today );
        bucket.total_usd += record.cost_usd;
        *bucket.by_model.entry( record.model_id.clone() ).or_insert( 0.0 ) += record.cost_usd;
      }
      self.records.write().push( record );
    }

    /// Total spend recorded so far today.
    #[ inline ]
    #[ must_use ]
    pub fn daily_total( &self ) -> f64
    {
      let today = Utc::now().date_naive();
      let mut bucket = self.today.write();
      Self::roll_day_if_needed( &mut bucket, today );
      bucket.total_usd
    }

    /// The dashboard-shaped view of today's spend against the configured
    /// total budget (spec §4.5 `check_budget` return shape).
    #[ inline ]
    #[ must_use ]
    pub fn budget_status( &self ) -> BudgetStatus
    {
      BudgetStatus::compute( self.limits.daily_total_usd, self.daily_total() )
    }

    /// The same dashboard-shaped view, scoped to a single model's
    /// per-model daily ceiling.
    #[ inline ]
    #[ must_use ]
    pub fn model_budget_status( &self, model_id : &str ) -> BudgetStatus
    {
      let today = Utc::now().date_naive();
      let mut bucket = self.today.write();
      Self::roll_day_if_needed( &mut bucket, today );
      let spend = bucket.by_model.get( model_id ).copied().unwrap_or( 0.0 );
      BudgetStatus::compute( self.limits.daily_per_model_usd, spend )
    }

    /// Spend grouped by model id, scoped to `range` (spec §4.5
    /// `cost_by_model` "group-by queries"), matching
    /// `cost_tracker.py::get_cost_by_model(start_date, end_date)`.
    #[ inline ]
    #[ must_use ]
    pub fn cost_by_model( &self, range : &std::ops::Range< DateTime< Utc > > ) -> HashMap< String, f64 >
    {
      let mut totals : HashMap< String, f64 > = HashMap::new();
      for record in self.records.read().iter().filter( | r | range.contains( &r.recorded_at ) )
      {
        *totals.entry( record.model_id.clone() ).or_insert( 0.0 ) += record.cost_usd;
      }
      totals
    }

    /// Spend grouped by agent kind, scoped to `range` (spec §4.5
    /// `cost_by_agent` "group-by queries"), matching
    /// `cost_tracker.py::get_cost_by_agent_type(start_date, end_date)`.
    #[ inline ]
    #[ must_use ]
    pub fn cost_by_agent( &self, range : &std::ops::Range< DateTime< Utc > > ) -> HashMap< String, f64 >
    {
      let mut totals : HashMap< String, f64 > = HashMap::new();
      for record in self.records.read().iter().filter( | r | range.contains( &r.recorded_at ) )
      {
        let key = format!( "{:?}", record.agent_kind );
        *totals.entry( key ).or_insert( 0.0 ) += record.cost_usd;
      }
      totals
    }

    /// The `n` most expensive individual tasks recorded within `range`,
    /// highest cost first (spec §4.5 `top_tasks(range, limit)`).
    #[ inline ]
    #[ must_use ]
    pub fn top_tasks( &self, range : &std::ops::Range< DateTime< Utc > >, n : usize ) -> Vec< CostRecord >
    {
      let mut all : Vec< CostRecord > = self.records.read().iter()
        .filter( | r | range.contains( &r.recorded_at ) )
        .cloned()
        .collect();
      all.sort_by( | a, b | b.cost_usd.partial_cmp( &a.cost_usd ).unwrap_or( std::cmp::Ordering::Equal ) );
      all.truncate( n );
      all
    }

    /// Total number of cost records retained.
    #[ inline ]
    #[ must_use ]
    pub fn len( &self ) -> usize
    {
      self.records.read().len()
    }

    /// Whether the ledger has no records at all.
    #[ inline ]
    #[ must_use ]
    pub fn is_empty( &self ) -> bool
    {
      self.len() == 0
    }
  }

  #[ cfg( test ) ]
  mod tests
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
        recorded_at : Utc::now(),
      }
    }

    #[ test ]
    fn calculate_cost_matches_per_1k_rate()
    {
      let cost = calculate_cost( 1.0, 2.0, 1000, 500 );
      assert!( ( cost - 2.0 ).abs() < f64::EPSILON );
    }

    #[ test ]
    fn check_budget_blocks_when_daily_total_exceeded()
    {
      let ledger = CostLedger::new( BudgetLimits { daily_total_usd : Some( 1.0 ), daily_per_model_usd : None } );
      ledger.record( sample( "m", 0.9 ) );
      assert_eq!( ledger.check_budget( "m", 0.2 ), BudgetDecision::DailyTotalExceeded );
    }

    #[ test ]
    fn check_budget_blocks_per_model_independent_of_total()
    {
      let ledger = CostLedger::new( BudgetLimits { daily_total_usd : None, daily_per_model_usd : Some( 1.0 ) } );
      ledger.record( sample( "m", 0.9 ) );
      assert_eq!
      (
        ledger.check_budget( "m", 0.2 ),
        BudgetDecision::DailyModelExceeded { model_id : "m".to_string() }
      );
      assert_eq!( ledger.check_budget( "other", 0.2 ), BudgetDecision::WithinBudget );
    }

    #[ test ]
    fn budget_status_reports_utilisation_and_remaining()
    {
      let ledger = CostLedger::new( BudgetLimits { daily_total_usd : Some( 10.0 ), daily_per_model_usd : None } );
      ledger.record( sample( "m", 4.0 ) );
      let status = ledger.budget_status();
      assert!( ( status.utilisation_percent - 40.0 ).abs() < f64::EPSILON );
      assert!( ( status.remaining - 6.0 ).abs() < f64::EPSILON );
      assert!( !status.is_over_budget );
    }

    #[ test ]
    fn budget_status_is_unlimited_when_no_ceiling_configured()
    {
      let ledger = CostLedger::new( BudgetLimits::default() );
      ledger.record( sample( "m", 4.0 ) );
      let status = ledger.budget_status();
      assert_eq!( status.daily_budget, None );
      assert!( !status.is_over_budget );
    }

    fn full_day_range() -> std::ops::Range< DateTime< Utc > >
    {
      ( Utc::now() - chrono::Duration::hours( 1 ) ) .. ( Utc::now() + chrono::Duration::hours( 1 ) )
    }

    #[ test ]
    fn top_tasks_orders_by_cost_descending()
    {
      let ledger = CostLedger::new( BudgetLimits::default() );
      ledger.record( sample( "m", 0.1 ) );
      ledger.record( sample( "m", 5.0 ) );
      ledger.record( sample( "m", 1.0 ) );
      let top = ledger.top_tasks( &full_day_range(), 2 );
      assert_eq!( top.len(), 2 );
      assert!( ( top[ 0 ].cost_usd - 5.0 ).abs() < f64::EPSILON );
    }

    #[ test ]
    fn top_tasks_excludes_records_outside_range()
    {
      let ledger = CostLedger::new( BudgetLimits::default() );
      ledger.record( sample( "m", 5.0 ) );
      let past = ( Utc::now() - chrono::Duration::days( 10 ) ) .. ( Utc::now() - chrono::Duration::days( 9 ) );
      assert!( ledger.top_tasks( &past, 10 ).is_empty() );
    }

    #[ test ]
    fn cost_by_model_groups_every_model_within_range()
    {
      let ledger = CostLedger::new( BudgetLimits::default() );
      ledger.record( sample( "gpt-x", 1.0 ) );
      ledger.record( sample( "gpt-x", 2.0 ) );
      ledger.record( sample( "claude-y", 4.0 ) );
      let totals = ledger.cost_by_model( &full_day_range() );
      assert!( ( totals[ "gpt-x" ] - 3.0 ).abs() < f64::EPSILON );
      assert!( ( totals[ "claude-y" ] - 4.0 ).abs() < f64::EPSILON );
    }

    #[ test ]
    fn cost_by_agent_groups_every_agent_within_range()
    {
      let ledger = CostLedger::new( BudgetLimits::default() );
      ledger.record( sample( "m", 1.0 ) );
      let totals = ledger.cost_by_agent( &full_day_range() );
      let key = format!( "{:?}", AgentKind::Implementer );
      assert!( ( totals[ &key ] - 1.0 ).abs() < f64::EPSILON );
    }

    #[ test ]
    fn budget_status_remaining_is_clamped_at_zero_when_over_budget()
    {
      let ledger = CostLedger::new( BudgetLimits { daily_total_usd : Some( 10.0 ), daily_per_model_usd : None } );
      ledger.record( sample( "m", 10.9005 ) );
      let status = ledger.budget_status();
      assert!( status.is_over_budget );
      assert!( ( status.remaining - 0.0 ).abs() < f64::EPSILON );
    }
  }
}

pub use private::
{
  BudgetDecision, BudgetLimits, BudgetStatus, CostLedger, CostRecord, calculate_cost,
};
