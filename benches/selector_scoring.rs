//! Benchmarks the Selector's filter-then-score pass over a registry of
//! candidate models, mirroring `api_gemini`'s own benches in structure
//! (criterion, `harness = false`) while exercising the crate's real
//! types rather than a simulated stand-in.

use criterion::{ black_box, criterion_group, criterion_main, BenchmarkId, Criterion };

use api_model_plane::
{
  CostLedger, BudgetLimits, DegradationController, HealthTracker, ModelDescriptor, ModelRegistry,
  PerformanceStore, RateLimitTracker, Selector, SelectionConstraints, Task, TaskPriority,
};

fn descriptor( index : usize ) -> ModelDescriptor
{
  let capability = if index % 3 == 0 { "code-generation" } else if index % 3 == 1 { "analysis" } else { "text-generation" };
  ModelDescriptor
  {
    id : format!( "model-{index}" ),
    provider : format!( "provider-{}", index % 5 ),
    display_name : format!( "Model {index}" ),
    capabilities : vec![ capability.to_string() ],
    cost_per_1k_input : 0.001 * ( index % 20 ) as f64,
    cost_per_1k_output : 0.002 * ( index % 20 ) as f64,
    requests_per_minute : 120,
    tokens_per_minute : 200_000,
    context_window : 8_192,
    typical_latency_ms : 200 + ( index as u64 % 800 ),
    enabled : true,
    tags : Vec::new(),
  }
}

fn selector_over( model_count : usize ) -> Selector
{
  let descriptors : Vec< ModelDescriptor > = ( 0 .. model_count ).map( descriptor ).collect();
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

fn sample_task() -> Task
{
  Task
  {
    id : "bench-task".to_string(),
    task_type : "implement a feature".to_string(),
    priority : TaskPriority::High,
    prompt : String::new(),
    parameters : serde_json::Value::Null,
    max_tokens : None,
    temperature : None,
  }
}

fn bench_select( c : &mut Criterion )
{
  let mut group = c.benchmark_group( "selector_select" );
  for &model_count in &[ 10_usize, 100, 1_000 ]
  {
    let selector = selector_over( model_count );
    let task = sample_task();
    let constraints = SelectionConstraints::default();

    group.bench_with_input( BenchmarkId::from_parameter( model_count ), &model_count, | b, _ |
    {
      b.iter( || black_box( selector.select( black_box( &task ), black_box( &constraints ) ) ) );
    } );
  }
  group.finish();
}

criterion_group!( benches, bench_select );
criterion_main!( benches );
