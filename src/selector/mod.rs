//! Selector : scores enabled, healthy, in-budget models against a task and
//! picks the best match (spec §4.6).

mod private
{
  use crate::cost::CostLedger;
  use crate::degradation::DegradationController;
  use crate::health::HealthTracker;
  use crate::performance::PerformanceStore;
  use crate::rate_limit::RateLimitTracker;
  use crate::registry::{ ModelDescriptor, ModelRegistry };
  use crate::task::{ SelectionConstraints, Task, TaskPriority };

  /// Ceiling cost (USD per 1k tokens) the cost sub-score normalizes
  /// against ; a model at or above this rate scores `0.0` (spec §4.6
  /// step 5 "cost_score").
  pub const MAX_COST_PER_1K : f64 = 0.10;

  /// Performance sub-score assigned to a model with no recent samples,
  /// neither rewarding nor penalizing it relative to a model with a
  /// track record (spec §4.6 step 5 "neutral prior").
  pub const NEUTRAL_PERFORMANCE_SCORE : f64 = 0.7;

  /// The four weighted sub-scores the Selector combines (spec §4.6 step 5).
  #[ derive( Debug, Clone, Copy, PartialEq ) ]
  pub struct WeightProfile
  {
    /// Weight on the capability-match sub-score.
    pub capability : f64,
    /// Weight on the cost sub-score (cheaper is better).
    pub cost : f64,
    /// Weight on the recent-performance sub-score.
    pub performance : f64,
    /// Weight on the availability sub-score (health + rate-limit headroom).
    pub availability : f64,
  }

  impl WeightProfile
  {
    /// Default weighting, used for `Medium`/`Low` priority tasks.
    pub const DEFAULT : Self = Self { capability : 0.30, cost : 0.25, performance : 0.25, availability : 0.20 };
    /// `Critical`/`High` priority : performance weighted over cost.
    pub const URGENT : Self = Self { capability : 0.30, cost : 0.15, performance : 0.35, availability : 0.20 };
    /// `Background` priority : cost weighted over performance.
    pub const BACKGROUND : Self = Self { capability : 0.30, cost : 0.35, performance : 0.15, availability : 0.20 };

    /// The weight profile spec §4.6 step 6 assigns to a given priority.
    #[ inline ]
    #[ must_use ]
    pub fn for_priority( priority : TaskPriority ) -> Self
    {
      match priority
      {
        TaskPriority::Critical | TaskPriority::High => Self::URGENT,
        TaskPriority::Medium | TaskPriority::Low => Self::DEFAULT,
        TaskPriority::Background => Self::BACKGROUND,
      }
    }
  }

  /// The outcome of a selection call.
  #[ derive( Debug, Clone ) ]
  pub struct Selection
  {
    /// The chosen model.
    pub model_id : String,
    /// The combined weighted score the model received, in `[0.0, 1.0]`.
    pub score : f64,
    /// Capabilities the task required that this model actually advertises.
    pub matched_capabilities : Vec< String >,
    /// The next-best candidates after `model_id`, ranked highest score
    /// first, for the Failover Coordinator to walk without re-scoring
    /// (spec §4.8 step 3).
    pub alternatives : Vec< String >,
    /// The weight profile used to compute `score`.
    pub weight_profile : WeightProfile,
    /// Human-readable explanation of why this model won, or why the
    /// fallback path was taken.
    pub reason : String,
  }

  fn capability_score( descriptor : &ModelDescriptor, required : &[ String ] ) -> f64
  {
    if required.is_empty()
    {
      return 1.0;
    }
    let matched = required.iter().filter( | c | descriptor.capabilities.iter().any( | dc | dc == *c ) ).count();
    matched as f64 / required.len() as f64
  }

  fn cost_score( descriptor : &ModelDescriptor ) -> f64
  {
    ( 1.0 - descriptor.avg_cost_per_1k() / MAX_COST_PER_1K ).max( 0.0 )
  }

  fn performance_score( store : &PerformanceStore, model_id : &str ) -> f64
  {
    let agg = store.aggregate_24h( model_id );
    if agg.total == 0
    {
      return NEUTRAL_PERFORMANCE_SCORE;
    }
    match agg.avg_quality_score
    {
      Some( quality ) => ( agg.success_rate + quality ) / 2.0,
      None => agg.success_rate,
    }
  }

  /// Availability sub-score : `1.0` available and under rate limit,
  /// `0.3` available but currently rate-limited, `0.0` unavailable
  /// (spec §4.6 step 5 "availability_score").
  fn availability_score( health : &HealthTracker, rate_limit : &RateLimitTracker, descriptor : &ModelDescriptor ) -> f64
  {
    if !health.is_available( &descriptor.id )
    {
      return 0.0;
    }
    if rate_limit.is_limited( &descriptor.id, descriptor.requests_per_minute, descriptor.tokens_per_minute )
    {
      return 0.3;
    }
    1.0
  }

  /// Why a model that otherwise matches a task is not dispatchable right
  /// now, as distinct from simply being outscored by a healthy sibling
  /// (spec §4.8 step 1 : the Failover Coordinator's intended primary vs.
  /// what is actually eligible).
  #[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
  pub enum AvailabilityGap
  {
    /// The Health Tracker (or the Degradation Controller, for the whole
    /// provider) reports the model unavailable.
    Unavailable,
    /// The model is healthy but currently rate-limited.
    RateLimited,
  }

  /// Selects the best-matching model for a task from the registry,
  /// combining capability match, cost, recent performance and
  /// availability into a single weighted score.
  #[ derive( Debug, Clone ) ]
  pub struct Selector
  {
    registry : ModelRegistry,
    health : HealthTracker,
    rate_limit : RateLimitTracker,
    performance : PerformanceStore,
    cost_ledger : CostLedger,
    degradation : DegradationController,
  }

  impl Selector
  {
    /// Build a selector over the given subsystems.
    #[ inline ]
    #[ must_use ]
    pub fn new
    (
      registry : ModelRegistry,
      health : HealthTracker,
      rate_limit : RateLimitTracker,
      performance : PerformanceStore,
      cost_ledger : CostLedger,
      degradation : DegradationController,
    ) -> Self
    {
      Self { registry, health, rate_limit, performance, cost_ledger, degradation }
    }

    /// Pick the best model for `task`, honoring `constraints`.
    ///
    /// Candidates are filtered by enabled state, excluded providers,
    /// required/inferred capability, `max_latency_ms`, provider
    /// availability (per the Degradation Controller) and whether the
    /// model is currently rate-limited, then scored by the weighted sum
    /// of the four sub-scores. If no candidate remains after filtering,
    /// the fallback path retries with only the enabled filter applied
    /// and returns a zero-score selection tagged `reason = "fallback"`
    /// (spec §9 Open Question, see DESIGN.md) rather than failing
    /// outright; `None` is returned only when the registry has no
    /// enabled models whatsoever.
    #[ inline ]
    #[ must_use ]
    pub fn select( &self, task : &Task, constraints : &SelectionConstraints ) -> Option< Selection >
    {
      let required_capability = task.inferred_capability().to_string();
      let mut required = constraints.required_capabilities.clone();
      if !required.contains( &required_capability )
      {
        required.push( required_capability );
      }

      let candidates = self.filter_candidates( &required, constraints );
      if let Some( selection ) = self.score_and_pick( &candidates, &required, task.priority, "selected" )
      {
        return Some( selection );
      }

      // Fallback path (spec §4.6 step 4) : keep the capability/provider/
      // latency filters but drop health and rate-limit, since the whole
      // point of the fallback is to return a candidate even though every
      // one of them failed those two checks.
      let fallback_pool : Vec< ModelDescriptor > = self.registry.all_enabled().into_iter()
        .filter( | d | !constraints.excluded_providers.iter().any( | p | p == &d.provider ) )
        .filter( | d | required.iter().all( | c | d.capabilities.iter().any( | dc | dc == c ) ) )
        .filter( | d | constraints.max_latency_ms.is_none_or( | max | d.typical_latency_ms <= max ) )
        .collect();
      let fallback_pool = if fallback_pool.is_empty() { self.registry.all_enabled() } else { fallback_pool };
      if fallback_pool.is_empty()
      {
        return None;
      }
      let chosen = fallback_pool.into_iter().next()?;
      Some( Selection
      {
        model_id : chosen.id,
        score : 0.0,
        matched_capabilities : Vec::new(),
        alternatives : Vec::new(),
        weight_profile : WeightProfile::for_priority( task.priority ),
        reason : "No available models matched every constraint - using fallback".to_string(),
      } )
    }

    fn filter_candidates( &self, required : &[ String ], constraints : &SelectionConstraints ) -> Vec< ModelDescriptor >
    {
      self.registry.all_enabled().into_iter()
        .filter( | d | !constraints.excluded_providers.iter().any( | p | p == &d.provider ) )
        .filter( | d | required.iter().all( | c | d.capabilities.iter().any( | dc | dc == c ) ) )
        .filter( | d | constraints.max_latency_ms.is_none_or( | max | d.typical_latency_ms <= max ) )
        .filter( | d | self.health.is_available( &d.id ) )
        .filter( | d | self.degradation.provider_is_available( &d.provider ) )
        .filter( | d | !self.rate_limit.is_limited( &d.id, d.requests_per_minute, d.tokens_per_minute ) )
        .collect()
    }

    fn score_and_pick( &self, candidates : &[ ModelDescriptor ], required : &[ String ], priority : TaskPriority, reason_prefix : &str ) -> Option< Selection >
    {
      if candidates.is_empty()
      {
        return None;
      }
      let weights = WeightProfile::for_priority( priority );

      let mut scored : Vec< ( &ModelDescriptor, f64 ) > = candidates.iter()
        .map( | descriptor |
        {
          let cap = capability_score( descriptor, required );
          let cost = cost_score( descriptor );
          let perf = performance_score( &self.performance, &descriptor.id );
          let avail = availability_score( &self.health, &self.rate_limit, descriptor );
          let score = cap * weights.capability + cost * weights.cost + perf * weights.performance + avail * weights.availability;
          ( descriptor, score )
        } )
        .collect();

      scored.sort_by( | a, b | b.1.partial_cmp( &a.1 ).unwrap_or( std::cmp::Ordering::Equal ) );

      let ( descriptor, score ) = scored.first().copied()?;
      let matched_capabilities : Vec< String > = required.iter()
        .filter( | c | descriptor.capabilities.iter().any( | dc | dc == *c ) )
        .cloned()
        .collect();
      let alternatives = scored.iter().skip( 1 ).take( 2 ).map( | ( d, _ ) | d.id.clone() ).collect();

      Some( Selection
      {
        model_id : descriptor.id.clone(),
        score,
        matched_capabilities : matched_capabilities.clone(),
        alternatives,
        weight_profile : weights,
        reason : format!
        (
          "{reason_prefix} : matched capabilities [{}], priority {:?} weight profile, score {:.3}",
          matched_capabilities.join( ", " ),
          priority,
          score,
        ),
      } )
    }

    /// The model this task would route to on capability, cost and
    /// performance merit alone, independent of whether it is currently
    /// healthy or rate-limited (spec §4.8 step 1 "ask Selector for a
    /// primary model"). The Failover Coordinator uses this — rather than
    /// [`Selector::select`], which already drops unavailable candidates
    /// — to tell apart "substituted because it was down" from "never in
    /// the running".
    #[ inline ]
    #[ must_use ]
    pub fn nominal_primary( &self, task : &Task, constraints : &SelectionConstraints ) -> Option< String >
    {
      let required_capability = task.inferred_capability().to_string();
      let mut required = constraints.required_capabilities.clone();
      if !required.contains( &required_capability )
      {
        required.push( required_capability );
      }

      let candidates : Vec< ModelDescriptor > = self.registry.all_enabled().into_iter()
        .filter( | d | !constraints.excluded_providers.iter().any( | p | p == &d.provider ) )
        .filter( | d | required.iter().all( | c | d.capabilities.iter().any( | dc | dc == c ) ) )
        .filter( | d | constraints.max_latency_ms.is_none_or( | max | d.typical_latency_ms <= max ) )
        .collect();

      if candidates.is_empty()
      {
        return None;
      }

      let weights = WeightProfile::for_priority( task.priority );
      let mut scored : Vec< ( &ModelDescriptor, f64 ) > = candidates.iter()
        .map( | descriptor |
        {
          let cap = capability_score( descriptor, &required );
          let cost = cost_score( descriptor );
          let perf = performance_score( &self.performance, &descriptor.id );
          ( descriptor, cap * weights.capability + cost * weights.cost + perf * weights.performance )
        } )
        .collect();
      scored.sort_by( | a, b | b.1.partial_cmp( &a.1 ).unwrap_or( std::cmp::Ordering::Equal ) );
      scored.first().map( | ( d, _ ) | d.id.clone() )
    }

    /// Whether `model_id` is currently dispatchable, and if not, why
    /// (spec §4.8 step 1). `None` means no gap : healthy, under rate
    /// limit and its provider isn't degraded.
    #[ inline ]
    #[ must_use ]
    pub fn availability_gap( &self, model_id : &str ) -> Option< AvailabilityGap >
    {
      let Some( descriptor ) = self.registry.get( model_id ) else { return Some( AvailabilityGap::Unavailable ) };
      if !self.health.is_available( model_id ) || !self.degradation.provider_is_available( &descriptor.provider )
      {
        return Some( AvailabilityGap::Unavailable );
      }
      if self.rate_limit.is_limited( model_id, descriptor.requests_per_minute, descriptor.tokens_per_minute )
      {
        return Some( AvailabilityGap::RateLimited );
      }
      None
    }

    /// Read-only access to the underlying cost ledger, used by callers
    /// that want to pre-check budget before committing to a selection.
    #[ inline ]
    #[ must_use ]
    pub fn cost_ledger( &self ) -> &CostLedger
    {
      &self.cost_ledger
    }

    /// Read-only access to the underlying degradation controller.
    #[ inline ]
    #[ must_use ]
    pub fn degradation( &self ) -> &DegradationController
    {
      &self.degradation
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;
    use crate::cost::BudgetLimits;

    fn descriptor( id : &str, provider : &str, capability : &str, cost : f64 ) -> ModelDescriptor
    {
      ModelDescriptor
      {
        id : id.to_string(),
        provider : provider.to_string(),
        display_name : id.to_string(),
        capabilities : vec![ capability.to_string() ],
        cost_per_1k_input : cost,
        cost_per_1k_output : cost,
        requests_per_minute : 60,
        tokens_per_minute : 100_000,
        context_window : 8_000,
        typical_latency_ms : 1_000,
        enabled : true,
        tags : Vec::new(),
      }
    }

    fn selector_with( descriptors : Vec< ModelDescriptor > ) -> Selector
    {
      let ( registry, _rejected ) = ModelRegistry::load( descriptors );
      Selector::new
      (
        registry,
        HealthTracker::new(),
        RateLimitTracker::new(),
        PerformanceStore::new(),
        CostLedger::new( BudgetLimits::default() ),
        DegradationController::new(),
      )
    }

    fn task_with_type( task_type : &str ) -> Task
    {
      Task
      {
        id : "t1".to_string(),
        task_type : task_type.to_string(),
        priority : TaskPriority::Medium,
        prompt : "hi".to_string(),
        parameters : serde_json::Value::Null,
        max_tokens : None,
        temperature : None,
      }
    }

    #[ test ]
    fn selects_cheaper_model_when_otherwise_equal()
    {
      let selector = selector_with( vec!
      [
        descriptor( "expensive", "a", "text-generation", 0.05 ),
        descriptor( "cheap", "b", "text-generation", 0.01 ),
      ] );
      let selection = selector.select( &task_with_type( "chat" ), &SelectionConstraints::default() ).expect( "a model should be selected" );
      assert_eq!( selection.model_id, "cheap" );
      assert_eq!( selection.alternatives, vec![ "expensive".to_string() ] );
    }

    #[ test ]
    fn falls_back_when_no_candidate_matches_capability()
    {
      let selector = selector_with( vec![ descriptor( "only", "a", "analysis", 0.01 ) ] );
      let selection = selector.select( &task_with_type( "implement a feature" ), &SelectionConstraints::default() ).expect( "fallback should still select" );
      assert!( selection.reason.contains( "fallback" ) );
      assert_eq!( selection.score, 0.0 );
    }

    #[ test ]
    fn returns_none_when_registry_is_empty()
    {
      let selector = selector_with( vec![] );
      assert!( selector.select( &task_with_type( "chat" ), &SelectionConstraints::default() ).is_none() );
    }

    #[ test ]
    fn unavailable_provider_is_excluded_from_primary_scoring()
    {
      let selector = selector_with( vec!
      [
        descriptor( "a-model", "a", "text-generation", 0.01 ),
        descriptor( "b-model", "b", "text-generation", 0.01 ),
      ] );
      selector.degradation.register_provider( "a" );
      for _ in 0 .. crate::degradation::PROVIDER_FAILURE_THRESHOLD
      {
        selector.degradation.mark_provider_failure( "a" );
      }
      let selection = selector.select( &task_with_type( "chat" ), &SelectionConstraints::default() ).expect( "b should still be selectable" );
      assert_eq!( selection.model_id, "b-model" );
    }

    #[ test ]
    fn rate_limited_model_is_excluded_until_alternative_exhausted()
    {
      let selector = selector_with( vec!
      [
        descriptor( "a-model", "a", "text-generation", 0.01 ),
        descriptor( "b-model", "b", "text-generation", 0.01 ),
      ] );
      for _ in 0 .. 60
      {
        selector.rate_limit.record( "a-model", 10_000, false );
      }
      let selection = selector.select( &task_with_type( "chat" ), &SelectionConstraints::default() ).expect( "b should still be selectable" );
      assert_eq!( selection.model_id, "b-model" );
    }
  }
}

pub use private::{ AvailabilityGap, Selection, Selector, WeightProfile, MAX_COST_PER_1K, NEUTRAL_PERFORMANCE_SCORE };
