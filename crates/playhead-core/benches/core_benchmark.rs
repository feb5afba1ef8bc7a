//! Benchmark tests for playhead-core operations
//!
//! Run with: cargo bench -p playhead-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use playhead_core::error::classify_message;
use playhead_core::retry::RetryPolicy;
use playhead_core::strategy::{classify_source, EngineSet, ResolveContext, StrategyRegistry};
use playhead_core::types::CapabilitySnapshot;

// ============================================================================
// Retry delay
// ============================================================================

fn bench_retry_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("Retry Delay");

    for jitter in [0.0, 0.2, 1.0] {
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ratio: jitter,
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::new("delay_ms", format!("jitter={}", jitter)),
            &policy,
            |b, policy| {
                b.iter(|| {
                    for retry in 0..5 {
                        black_box(policy.delay_ms(black_box(retry)));
                    }
                });
            },
        );
    }

    group.bench_function("normalize_out_of_range", |b| {
        let policy = RetryPolicy {
            max_retries: 99,
            retry_delay_ms: 1_000_000,
            max_retry_delay_ms: u64::MAX,
            backoff_multiplier: f64::NAN,
            jitter_ratio: -3.0,
            retry_on: Vec::new(),
        };
        b.iter(|| black_box(policy.normalized()));
    });

    group.finish();
}

// ============================================================================
// Error classification
// ============================================================================

fn bench_error_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("Error Classification");

    let messages = [
        ("timeout", "manifestLoadTimeOut while fetching level"),
        ("server", "HTTP 503 Service Unavailable"),
        ("network", "net::ERR_CONNECTION_RESET"),
        ("unsupported", "MEDIA_ERR_SRC_NOT_SUPPORTED"),
        ("unknown", "fragParsingError in demuxer worker 2"),
    ];

    for (name, message) in messages {
        group.bench_with_input(BenchmarkId::new("classify", name), message, |b, message| {
            b.iter(|| black_box(classify_message(black_box(message))));
        });
    }

    group.finish();
}

// ============================================================================
// Strategy resolution
// ============================================================================

fn bench_strategy_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("Strategy Resolution");
    let registry = StrategyRegistry::with_builtins(EngineSet::default());

    let sources = [
        "https://cdn.example.com/vod/master.m3u8?token=abc",
        "https://cdn.example.com/vod/manifest.mpd",
        "https://cdn.example.com/vod/movie.mp4",
        "https://cdn.example.com/vod/unknown.xyz",
    ];

    group.bench_function("classify_source", |b| {
        b.iter(|| {
            for src in sources {
                black_box(classify_source(black_box(src)));
            }
        });
    });

    for (name, capabilities) in [
        ("ios", CapabilitySnapshot::ios()),
        ("desktop", CapabilitySnapshot::desktop()),
    ] {
        group.bench_with_input(BenchmarkId::new("resolve", name), &capabilities, |b, caps| {
            b.iter(|| {
                for src in sources {
                    let ctx = ResolveContext {
                        src,
                        capabilities: caps,
                    };
                    black_box(registry.resolve(black_box(&ctx)).map(|d| d.id.as_str()));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_retry_delay,
    bench_error_classification,
    bench_strategy_resolution,
);
criterion_main!(benches);
