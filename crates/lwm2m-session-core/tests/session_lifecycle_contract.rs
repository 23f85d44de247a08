//! Contract Test: Session Lifecycle
//!
//! Constraints verified:
//! - register → update* → unregister keeps one stable session id
//! - Exactly one SessionRemoved per session, observations invalidated with it
//! - Re-registration supersedes: same id, next generation, old observations dead
//! - Stale sessions expire; capacity evicts the least recently seen session
//!
//! If this test fails, the registry's cascading removal is broken.

mod common;

use chrono::Utc;
use common::*;
use lwm2m_session_core::{
    DiscardReason, EventKind, LifecycleState, NotificationOutcome, ObservationId,
    ObserveResponse, RemovalReason,
};
use tokio_test::assert_ok;

#[tokio::test]
async fn session_id_is_stable_across_updates() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    assert_ok!(adapter.handle(registered(&dev)).await);
    for _ in 0..3 {
        assert_ok!(adapter.handle(updated(&dev)).await);
    }
    assert_ok!(adapter.handle(unregistered(&dev)).await);

    let events = sink.events();
    assert_eq!(
        sink.kinds(),
        vec![
            "session_registered",
            "session_updated",
            "session_updated",
            "session_updated",
            "session_removed"
        ]
    );
    let id = events[0].session_id;
    assert!(events.iter().all(|event| event.session_id == id));
    assert!(adapter.registry().is_empty());
}

#[tokio::test]
async fn unregister_publishes_exactly_one_removal() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(unregistered(&dev)).await.unwrap();
    // Repeated unregister is a no-op
    adapter.handle(unregistered(&dev)).await.unwrap();

    let removals: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|event| matches!(event.kind, EventKind::SessionRemoved { .. }))
        .collect();
    assert_eq!(removals.len(), 1);
    assert_eq!(
        removals[0].kind,
        EventKind::SessionRemoved {
            reason: RemovalReason::Deregistered
        }
    );
}

#[tokio::test]
async fn unregister_invalidates_observations() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(observe(&dev, "7", "/3/0/9")).await.unwrap();
    adapter.handle(observe(&dev, "8", "/1/0/1")).await.unwrap();
    assert_eq!(adapter.router().len(), 2);

    adapter.handle(unregistered(&dev)).await.unwrap();
    assert!(adapter.router().is_empty());

    let outcome = adapter
        .on_observation_response(
            &ObservationId::new("7"),
            Some(&dev),
            ObserveResponse::content(serde_json::json!(1)).with_sequence(1),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NotificationOutcome::Discarded(DiscardReason::UnknownObservation)
    );
    assert_eq!(sink.kinds().last(), Some(&"session_removed"));
}

#[tokio::test]
async fn reregistration_supersedes_previous_generation() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let first = device("dev-1", "r1");
    let second = device("dev-1", "r2");

    adapter.handle(registered(&first)).await.unwrap();
    adapter.handle(observe(&first, "7", "/3/0/9")).await.unwrap();
    adapter.handle(registered(&second)).await.unwrap();

    let events = sink.events();
    let registrations: Vec<_> = events
        .iter()
        .filter_map(|event| match event.kind {
            EventKind::SessionRegistered {
                generation,
                superseded,
            } => Some((event.session_id, generation, superseded)),
            _ => None,
        })
        .collect();
    assert_eq!(registrations.len(), 2);
    assert_eq!(registrations[0].0, registrations[1].0);
    assert_eq!((registrations[0].1, registrations[0].2), (1, false));
    assert_eq!((registrations[1].1, registrations[1].2), (2, true));

    // Notifications of the superseded generation are discarded
    adapter.handle(notify(&first, "7", 1, 42)).await.unwrap();
    assert!(sink.published_sequences().is_empty());

    // Callbacks carrying the old registration id no longer match
    let err = adapter.handle(updated(&first)).await.unwrap_err();
    assert!(err.is_benign_race());

    let session = adapter.registry().find_by_endpoint("dev-1").unwrap();
    assert_eq!(session.generation, 2);
    assert_eq!(session.registration_id, "r2");
    assert_eq!(session.state, LifecycleState::Registered);
}

#[tokio::test]
async fn update_for_unknown_session_is_dropped() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);

    let err = adapter.handle(updated(&device("ghost", "r1"))).await.unwrap_err();
    assert!(err.is_benign_race());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn stale_sessions_expire_with_cascade() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let short = device("dev-1", "r1").with_lifetime(30);
    let long = device("dev-2", "r1").with_lifetime(3600);

    adapter.handle(registered(&short)).await.unwrap();
    adapter.handle(registered(&long)).await.unwrap();
    adapter.handle(observe(&short, "7", "/3/0/9")).await.unwrap();

    let expired = adapter
        .expire_stale(Utc::now() + chrono::Duration::seconds(31))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].endpoint, "dev-1");
    assert!(adapter.router().is_empty());
    assert_eq!(adapter.registry().len(), 1);

    assert_eq!(
        sink.events_for("dev-1").last().map(|event| event.kind.clone()),
        Some(EventKind::SessionRemoved {
            reason: RemovalReason::Expired
        })
    );

    // A later unregister for the expired session publishes nothing
    adapter.handle(unregistered(&short)).await.unwrap();
    assert_eq!(sink.kinds_for("dev-1").iter().filter(|k| **k == "session_removed").count(), 1);
}

#[tokio::test]
async fn register_after_removal_allocates_new_id() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1");

    adapter.handle(registered(&dev)).await.unwrap();
    adapter.handle(unregistered(&dev)).await.unwrap();
    adapter.handle(registered(&device("dev-1", "r2"))).await.unwrap();

    let events = sink.events();
    assert_ne!(events[0].session_id, events[2].session_id);
    assert_eq!(
        events[2].kind,
        EventKind::SessionRegistered {
            generation: 1,
            superseded: false
        }
    );
}

#[tokio::test]
async fn capacity_evicts_least_recently_seen() {
    let sink = RecordingSink::new();
    let mut config = test_config();
    config.sessions.max_sessions = 2;
    let adapter = adapter_with(&config, &sink);

    adapter.handle(registered(&device("dev-1", "r1"))).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    adapter.handle(registered(&device("dev-2", "r1"))).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    // dev-1 checks in, making dev-2 the least recently seen
    adapter.handle(updated(&device("dev-1", "r1"))).await.unwrap();
    adapter.handle(registered(&device("dev-3", "r1"))).await.unwrap();

    assert_eq!(adapter.registry().len(), 2);
    assert!(adapter.registry().find_by_endpoint("dev-2").is_none());
    assert_eq!(
        sink.events_for("dev-2").last().map(|event| event.kind.clone()),
        Some(EventKind::SessionRemoved {
            reason: RemovalReason::Evicted
        })
    );
}

#[tokio::test]
async fn oversized_lifetime_never_expires() {
    let sink = RecordingSink::new();
    let adapter = adapter_with(&test_config(), &sink);
    let dev = device("dev-1", "r1").with_lifetime(10_000_000_000_000_000);

    assert_ok!(adapter.handle(registered(&dev)).await);
    assert_ok!(adapter.handle(updated(&dev.clone().with_lifetime(u64::MAX))).await);

    let expired = adapter
        .expire_stale(Utc::now() + chrono::Duration::days(365 * 1000))
        .await
        .unwrap();
    assert!(expired.is_empty());
    assert_eq!(adapter.registry().len(), 1);
}
