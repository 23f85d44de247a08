//! Contract Test: Notification Ordering
//!
//! Constraints verified:
//! - Out-of-order notifications within the window are published in order
//! - Notifications at or below the last published sequence are discarded
//! - Notifications for cancelled or unknown observations never publish
//! - Observation errors mark the value stale without removing the observation
//! - Published paths are versioned logical paths
//!
//! If this test fails, the reorder buffer or the router's discard rules are
//! broken.

mod common;

use common::*;
use lwm2m_session_core::{
    DiscardReason, EngineCallback, EventKind, NotificationOutcome, ObservationId, ObserveResponse,
};

#[tokio::test]
async fn late_notification_is_discarded() {
    // register → observe(7, /3/0/9) → notify(2) → notify(1) → unregister
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(notify(&dev, "7", 2, 87)).await.unwrap();
    adapter.handle(notify(&dev, "7", 1, 86)).await.unwrap();
    adapter.handle(unregistered(&dev)).await.unwrap();

    assert_eq!(
        sink.kinds(),
        vec!["session_registered", "resource_updated", "session_removed"]
    );
    assert_eq!(sink.published_sequences(), vec![2]);
}

#[tokio::test]
async fn reordering_within_window() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();

    for sequence in [1, 4, 3, 2, 5] {
        adapter
            .handle(notify(&dev, "7", sequence, sequence as i64))
            .await
            .unwrap();
    }

    assert_eq!(sink.published_sequences(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn window_overflow_skips_gap() {
    let sink = RecordingSink::new();
    let mut config = test_config();
    config.observations.reorder_window = 2;
    let adapter = adapter_with(&config, &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();

    for sequence in [1, 3, 4, 5, 2] {
        adapter
            .handle(notify(&dev, "7", sequence, 0))
            .await
            .unwrap();
    }

    // 2 never arrived in time; 3 was forced out, then 4 and 5 followed
    assert_eq!(sink.published_sequences(), vec![1, 3, 4, 5]);
}

#[tokio::test]
async fn published_path_is_logical() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "1", "/1/0/1")).await.unwrap();
    adapter.handle(notify(&dev, "1", 1, 300)).await.unwrap();

    let updated = sink
        .events()
        .into_iter()
        .find_map(|event| match event.kind {
            EventKind::ResourceUpdated { path, payload, .. } => Some((path, payload)),
            _ => None,
        })
        .unwrap();
    assert_eq!(updated.0.to_string(), "/1_1.1/0/1");
    assert_eq!(updated.1, serde_json::json!(300));
}

#[tokio::test]
async fn cancelled_observation_never_publishes() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&lifecycle_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(notify(&dev, "7", 1, 1)).await.unwrap();
    adapter.handle(cancel("7")).await.unwrap();
    adapter.handle(notify(&dev, "7", 2, 2)).await.unwrap();
    adapter.handle(notify(&dev, "unknown", 1, 1)).await.unwrap();

    assert_eq!(sink.published_sequences(), vec![1]);
    assert_eq!(sink.kinds().last(), Some(&"observation_cancelled"));
    assert!(
        adapter
            .registry()
            .find_by_endpoint("dev-1")
            .unwrap()
            .observations
            .is_empty()
    );
}

#[tokio::test]
async fn response_without_registration_is_ignored() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();

    let outcome = adapter
        .on_observation_response(
            &ObservationId::new("7"),
            None,
            ObserveResponse::content(serde_json::json!(1)),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NotificationOutcome::Discarded(DiscardReason::NoRegistration)
    );
    assert!(sink.published_sequences().is_empty());
}

#[tokio::test]
async fn observation_error_marks_stale_and_keeps_observation() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter
        .handle(observation_error(&dev, "7", "unsupported content format"))
        .await
        .unwrap();

    assert_eq!(
        sink.events().last().map(|event| event.kind.clone()),
        Some(EventKind::ResourceStale {
            path: "/3_1.0/0/9".parse().unwrap(),
            cause: "unsupported content format".to_string(),
        })
    );

    // Still observed
    adapter.handle(notify(&dev, "7", 1, 5)).await.unwrap();
    assert_eq!(sink.published_sequences(), vec![1]);
}

#[tokio::test]
async fn failure_response_marks_stale() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter
        .handle(EngineCallback::ObservationResponse {
            observation_id: ObservationId::new("7"),
            registration: Some(dev.clone()),
            response: ObserveResponse::failure(404).with_sequence(1),
        })
        .await
        .unwrap();

    assert_eq!(sink.kinds().last(), Some(&"resource_stale"));
}

#[tokio::test]
async fn unresolved_observation_discards_notifications() {
    let sink = RecordingSink::new();
    let mut config = test_config();
    config.observations.default_object_version = None;
    let adapter = adapter_with(&config, &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    let err = adapter
        .handle(observe(&dev, "9", "/5/0/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, lwm2m_session_core::Error::PathResolution { .. }));

    adapter.handle(notify(&dev, "9", 1, 1)).await.unwrap();
    assert!(sink.published_sequences().is_empty());
    assert_eq!(sink.kinds(), vec!["session_registered"]);

    // Still owned by the session, so unregister cleans it up
    adapter.handle(unregistered(&dev)).await.unwrap();
    assert!(adapter.router().is_empty());
}

#[tokio::test]
async fn lifecycle_events_are_opt_in() {
    let dev = device("dev-1", "r1");

    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(cancel("7")).await.unwrap();
    assert_eq!(sink.kinds(), vec!["session_registered"]);

    let sink = RecordingSink::new();
    let adapter = adapter_with(&lifecycle_config(), &sink);
    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(cancel("7")).await.unwrap();
    assert_eq!(
        sink.kinds(),
        vec![
            "session_registered",
            "observation_started",
            "observation_cancelled"
        ]
    );
}

#[tokio::test]
async fn held_notification_released_after_hold_time() {
    let sink = RecordingSink::new();
    let mut config = test_config();
    config.observations.reorder_hold_ms = 0;
    let adapter = adapter_with(&config, &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(notify(&dev, "7", 1, 1)).await.unwrap();
    adapter.handle(notify(&dev, "7", 3, 3)).await.unwrap();
    assert_eq!(sink.published_sequences(), vec![1]);

    // Other endpoints have nothing held
    assert_eq!(adapter.release_held("dev-2", chrono::Utc::now()).await.unwrap(), 0);
    assert_eq!(adapter.release_held("dev-1", chrono::Utc::now()).await.unwrap(), 1);
    assert_eq!(sink.published_sequences(), vec![1, 3]);

    // 2 was given up
    adapter.handle(notify(&dev, "7", 2, 2)).await.unwrap();
    adapter.handle(notify(&dev, "7", 4, 4)).await.unwrap();
    assert_eq!(sink.published_sequences(), vec![1, 3, 4]);
}
