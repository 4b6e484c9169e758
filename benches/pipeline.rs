//! Criterion benchmarks for performance-critical hot paths
//!
//! Covers: event channel push/pop, the scroll filter's per-event decision,
//! trajectory merging, and segmentation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use traceloom::capture::channel::EventChannel;
use traceloom::capture::scroll::{ScrollFilter, ScrollFilterConfig};
use traceloom::capture::types::{MouseButton, RawEvent};
use traceloom::induce::action::Action;
use traceloom::induce::{MergeConfig, Segmenter, SegmenterConfig, TrajectoryMerger};
use traceloom::time::{Timebase, Timestamp};
use traceloom::trace::TraceRecord;

fn make_scroll_event(millis: u64) -> RawEvent {
    RawEvent::scroll(Timestamp::from_millis(millis), 0, 0.0, 1.0, 100.0, 100.0)
}

fn make_key_record(millis: u64, token: &str) -> TraceRecord {
    TraceRecord {
        timestamp: Timestamp::from_millis(millis),
        device: 0,
        app: Some("Notes".to_string()),
        payload: traceloom::trace::TracePayload::Key {
            token: token.to_string(),
            count: 1,
        },
    }
}

fn make_actions(count: usize) -> Vec<Action> {
    (0..count)
        .map(|i| {
            let record = if i % 5 == 0 {
                TraceRecord {
                    timestamp: Timestamp::from_millis(i as u64 * 200),
                    device: 0,
                    app: Some(if i % 10 == 0 { "Notes" } else { "Safari" }.to_string()),
                    payload: traceloom::trace::TracePayload::Click {
                        button: MouseButton::Left,
                        x: (i % 100) as f64,
                        y: (i % 60) as f64,
                        count: 1,
                    },
                }
            } else {
                make_key_record(i as u64 * 200, "a")
            };
            Action::from_record(record)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Event channel benchmarks
// ---------------------------------------------------------------------------

fn bench_channel_push(c: &mut Criterion) {
    Timebase::init();

    c.bench_function("channel_push", |b| {
        let (mut sink, mut stream) = EventChannel::with_capacity(8192).split();
        let event = make_scroll_event(1000);

        b.iter(|| {
            if !sink.push(black_box(event.clone())) {
                stream.pop_batch(4096);
                sink.push(black_box(event.clone()));
            }
        });
    });
}

fn bench_channel_pop_batch(c: &mut Criterion) {
    Timebase::init();

    c.bench_function("channel_pop_batch", |b| {
        let (mut sink, mut stream) = EventChannel::with_capacity(8192).split();
        for i in 0..8192 {
            sink.push(make_scroll_event(i));
        }

        b.iter(|| {
            let batch = stream.pop_batch(64);
            for event in &batch {
                black_box(event.sequence);
            }
            for _ in 0..batch.len() {
                sink.push(make_scroll_event(0));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Scroll filter benchmark
// ---------------------------------------------------------------------------

fn bench_scroll_filter_offer(c: &mut Criterion) {
    c.bench_function("scroll_filter_offer", |b| {
        let mut filter = ScrollFilter::new(ScrollFilterConfig::default());
        let mut millis = 0u64;

        b.iter(|| {
            millis += 10;
            black_box(filter.offer(&make_scroll_event(millis)));
        });
    });
}

// ---------------------------------------------------------------------------
// Induction benchmarks
// ---------------------------------------------------------------------------

fn bench_trajectory_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("trajectory_merge");
    for size in [100usize, 1000, 5000] {
        let actions = make_actions(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &actions, |b, actions| {
            let merger = TrajectoryMerger::new(MergeConfig::default());
            b.iter(|| black_box(merger.merge(actions.clone())));
        });
    }
    group.finish();
}

fn bench_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation");
    for size in [100usize, 1000, 5000] {
        let actions = make_actions(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &actions, |b, actions| {
            let segmenter = Segmenter::new(SegmenterConfig::default());
            b.iter(|| black_box(segmenter.segment(actions)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_channel_push,
    bench_channel_pop_batch,
    bench_scroll_filter_offer,
    bench_trajectory_merge,
    bench_segmentation
);
criterion_main!(benches);
