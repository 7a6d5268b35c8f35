#![cfg(unix)]

mod support;

use std::sync::Arc;

use quire::{
    application::{
        ports::ArtifactStore,
        render::{RenderError, RenderOutcome},
    },
    domain::types::{RenderContext, RenderRequest},
};
use serde_json::{Value, json};

fn context(value: Value) -> RenderContext {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn invoice_is_compiled_once_and_served_from_cache() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    let first = fx
        .service
        .handle("invoice", context(json!({"total": 42})))
        .await;
    let artifact = first.artifact().cloned().expect("artifact produced");
    assert_eq!(fx.compile_count(), 1);

    let bytes = std::fs::read(artifact.path()).expect("read artifact");
    assert!(bytes.starts_with(b"%PDF-1.7\n"));
    assert!(bytes.ends_with(b"Total: 42"));

    let second = fx
        .service
        .handle("invoice", context(json!({"total": 42})))
        .await;
    assert_eq!(second.artifact(), Some(&artifact));
    assert_eq!(fx.compile_count(), 1);
    assert_eq!(
        fx.cache_entries(),
        vec![artifact.file_name().expect("file name").to_string()]
    );
}

#[tokio::test]
async fn different_contexts_produce_different_artifacts() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    let a = fx
        .service
        .handle("invoice", context(json!({"total": 42})))
        .await;
    let b = fx
        .service
        .handle("invoice", context(json!({"total": 43})))
        .await;

    let a = a.artifact().expect("first artifact");
    let b = b.artifact().expect("second artifact");
    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!(fx.compile_count(), 2);
}

#[tokio::test]
async fn key_order_does_not_change_the_cached_artifact() {
    let fx = support::fixture(&[("letter", "\\VAR{greeting}, \\VAR{name}")]);

    let first = fx
        .service
        .handle(
            "letter",
            context(json!({"greeting": "Hello", "name": "Ada"})),
        )
        .await;
    let second = fx
        .service
        .handle(
            "letter",
            serde_json::from_str::<RenderContext>(r#"{"name":"Ada","greeting":"Hello"}"#)
                .expect("context"),
        )
        .await;

    assert_eq!(first.artifact(), second.artifact());
    assert_eq!(fx.compile_count(), 1);
}

#[tokio::test]
async fn missing_template_is_reported_every_time() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    for _ in 0..3 {
        let outcome = fx.service.handle("missing", context(json!({}))).await;
        assert!(outcome.is_not_found(), "{outcome:?}");
    }
    assert_eq!(fx.compile_count(), 0);
    assert!(fx.cache_entries().is_empty());
}

#[tokio::test]
async fn traversal_ids_are_treated_as_missing() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);
    std::fs::write(fx.dir.path().join("secret.tex"), "top secret").expect("write");

    let outcome = fx.service.handle("../secret", context(json!({}))).await;
    assert!(outcome.is_not_found(), "{outcome:?}");
    assert_eq!(fx.compile_count(), 0);
}

#[tokio::test]
async fn compiler_failure_is_not_cached() {
    let fx = support::fixture(&[("broken", "FAIL \\VAR{total}")]);
    let ctx = context(json!({"total": 1}));
    let fingerprint = RenderRequest::new("broken", ctx.clone()).fingerprint();

    let outcome = fx.service.handle("broken", ctx.clone()).await;
    match outcome {
        RenderOutcome::RenderFailed(RenderError::Compile { message, timed_out }) => {
            assert!(!timed_out);
            assert!(message.contains("forced failure"), "{message}");
        }
        other => panic!("expected compile failure, got {other:?}"),
    }
    assert!(fx.store.lookup(&fingerprint).await.expect("lookup").is_none());
    assert!(fx.cache_entries().is_empty());

    let retry = fx.service.handle("broken", ctx).await;
    assert!(matches!(retry, RenderOutcome::RenderFailed(_)));
    assert_eq!(fx.compile_count(), 2);
}

#[tokio::test]
async fn expansion_failure_never_reaches_the_compiler() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    let outcome = fx
        .service
        .handle("invoice", context(json!({"subtotal": 5})))
        .await;
    assert!(
        matches!(
            outcome,
            RenderOutcome::RenderFailed(RenderError::Expansion { .. })
        ),
        "{outcome:?}"
    );
    assert_eq!(fx.compile_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_requests_share_one_compile() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = Arc::clone(&fx.service);
        handles.push(tokio::spawn(async move {
            service
                .handle("invoice", context(json!({"total": 42})))
                .await
        }));
    }

    let mut artifacts = Vec::new();
    for handle in handles {
        let outcome = handle.await.expect("join");
        artifacts.push(outcome.artifact().cloned().expect("artifact"));
    }

    assert!(artifacts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(fx.compile_count(), 1);
    assert_eq!(fx.cache_entries().len(), 1);
}

#[tokio::test]
async fn fetch_artifact_returns_published_bytes() {
    let fx = support::fixture(&[("invoice", "Total: \\VAR{total}")]);

    let outcome = fx
        .service
        .handle("invoice", context(json!({"total": 7})))
        .await;
    let artifact = outcome.artifact().cloned().expect("artifact");

    let bytes = fx
        .service
        .fetch_artifact(&artifact.fingerprint)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(
        bytes.as_ref(),
        std::fs::read(artifact.path()).expect("read").as_slice()
    );
}
