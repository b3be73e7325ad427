//! Benchmarks the Rate-Limit Tracker's `pre_check`/`record` pair under
//! sustained load, mirroring `api_gemini`'s `rate_limiting_overhead`
//! bench in shape (criterion, `harness = false`) while driving the
//! crate's real `RateLimitTracker` instead of a simulated stand-in.

use criterion::{ black_box, criterion_group, criterion_main, Criterion };

use api_model_plane::RateLimitTracker;

fn bench_pre_check_under_headroom( c : &mut Criterion )
{
  let tracker = RateLimitTracker::new();
  c.bench_function( "rate_limit_pre_check_with_headroom", | b |
  {
    b.iter( || black_box( tracker.pre_check( black_box( "model-a" ), 10_000, 1_000_000, 50 ) ) );
  } );
}

fn bench_record_then_check_cycle( c : &mut Criterion )
{
  let tracker = RateLimitTracker::new();
  c.bench_function( "rate_limit_record_then_check", | b |
  {
    b.iter( ||
    {
      tracker.record( black_box( "model-b" ), black_box( 25 ), false );
      black_box( tracker.is_limited( "model-b", 10_000, 1_000_000 ) );
    } );
  } );
}

fn bench_many_independent_models( c : &mut Criterion )
{
  let tracker = RateLimitTracker::new();
  let mut counter = 0_u32;
  c.bench_function( "rate_limit_many_models_round_robin", | b |
  {
    b.iter( ||
    {
      counter = counter.wrapping_add( 1 );
      let model_id = format!( "model-{}", counter % 256 );
      tracker.record( black_box( &model_id ), 10, false );
    } );
  } );
}

criterion_group!( benches, bench_pre_check_under_headroom, bench_record_then_check_cycle, bench_many_independent_models );
criterion_main!( benches );
