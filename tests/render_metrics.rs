#![cfg(unix)]

mod support;

use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;
use serde_json::{Map, json};

#[tokio::test]
async fn render_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let fx = support::fixture(&[
        ("invoice", "Total: \\VAR{total}"),
        ("broken", "FAIL"),
    ]);

    let total = match json!({"total": 42}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };

    // miss + compile + publish, then a hit
    assert!(fx.service.handle("invoice", total.clone()).await.artifact().is_some());
    assert!(fx.service.handle("invoice", total).await.artifact().is_some());
    assert!(fx.service.handle("missing", Map::new()).await.is_not_found());
    assert!(fx.service.handle("broken", Map::new()).await.error().is_some());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "quire_render_cache_hit_total",
        "quire_render_cache_miss_total",
        "quire_render_not_found_total",
        "quire_render_compile_ms",
        "quire_render_published_total",
        "quire_render_failed_total",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
