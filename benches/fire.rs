//! Performance benchmarks for a3s-audit
//!
//! Run with: cargo bench

use a3s_audit::events::{CommentEvent, HookPayload};
use a3s_audit::plugin::last_value::apply_archive;
use a3s_audit::threshold::format_bytes;
use a3s_audit::{EventBus, LastValueConfig, Report, ReportItem, ThresholdLimit};
use criterion::{criterion_group, criterion_main, Criterion};

fn size_report(files: usize, scale: f64) -> Report {
    let leaves = (0..files)
        .map(|i| {
            let bytes = (i as f64 + 1.0) * scale;
            ReportItem::leaf(
                format!("chunk-{}.js", i),
                format!("/build/chunk-{}.js", i),
                "size",
            )
            .value(format_bytes(bytes), bytes)
            .threshold("1 MB", 1_048_576.0, ThresholdLimit::Upper)
            .evaluate(true)
        })
        .collect();
    Report::new(vec![ReportItem::group("Size Checks", "size", "size", leaves)])
}

fn bench_fire(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("fire");
    for handlers in [1, 10, 100] {
        let bus = EventBus::new();
        for i in 0..handlers {
            bus.on_fn("vcs/comment/start", Some(i % 7), |_, payload| {
                if let HookPayload::Comment(e) = payload {
                    e.comment.push('.');
                }
                Ok(None)
            })
            .unwrap();
        }

        group.bench_function(format!("{} handlers", handlers), |b| {
            b.to_async(&rt).iter(|| async {
                let mut payload = HookPayload::Comment(CommentEvent {
                    comment: String::new(),
                });
                bus.fire("vcs/comment/start", &mut payload).await.unwrap()
            });
        });
    }
    group.finish();

    let bus = EventBus::new();
    bus.on_fn("command/*/action/end", None, |_, _| Ok(None))
        .unwrap();
    c.bench_function("fire wildcard", |b| {
        b.to_async(&rt).iter(|| async {
            let mut payload = HookPayload::Comment(CommentEvent {
                comment: String::new(),
            });
            bus.fire("command/audit/action/end", &mut payload)
                .await
                .unwrap()
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let config = LastValueConfig {
        fail_on_breach: true,
        ..LastValueConfig::default()
    };

    let mut group = c.benchmark_group("apply_archive");
    for files in [10, 100, 1000] {
        let current = size_report(files, 1200.0);
        let archived = size_report(files, 1000.0);
        group.bench_function(format!("{} items", files), |b| {
            b.iter(|| {
                let mut report = current.clone();
                apply_archive(&mut report, &archived, &config)
            });
        });
    }
    group.finish();

    let mut report = size_report(1000, 10.0);
    c.bench_function("reaggregate 1000 items", |b| {
        b.iter(|| report.reaggregate());
    });
}

criterion_group!(benches, bench_fire, bench_diff);
criterion_main!(benches);
