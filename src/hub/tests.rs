use super::*;
use crate::correlation::{attribute, DeskAssignments};
use crate::testing::phone;
use std::sync::Arc;

fn all() -> SubscriberFilter {
    SubscriberFilter::new(None, 24)
}

fn violations_at(now: f64) -> HubMessage {
    let violations = attribute(
        &[phone(now - 10.0, "A", &[], "a"), phone(now - 20.0, "B", &[], "b")],
        &[],
        &DeskAssignments::default(),
        3.0,
    );
    HubMessage::new_violations(violations, now)
}

#[tokio::test]
async fn dead_connection_does_not_block_live_ones() {
    let hub = BroadcastHub::new(8);
    let (_, mut first) = hub.connect(Group::Violations, all());
    let (dead_id, dead) = hub.connect(Group::Violations, all());
    let (_, mut second) = hub.connect(Group::Violations, all());
    drop(dead);

    let report = hub.push(Group::Violations, &violations_at(10_000.0));

    assert_eq!(report.delivered, 2);
    assert_eq!(report.removed, 1);
    assert!(first.recv().await.is_some());
    assert!(second.recv().await.is_some());
    assert!(!hub.disconnect(dead_id));
    assert_eq!(hub.stats().total, 2);
}

#[tokio::test]
async fn first_message_is_queued_ahead_of_pushes() {
    let hub = BroadcastHub::new(8);
    let initial = HubMessage::InitialData {
        violations: Vec::new(),
        filter: all(),
        timestamp: 9_000.0,
    };
    let (_, mut rx) = hub.connect_with(Group::Violations, all(), Some(initial));

    hub.push(Group::Violations, &violations_at(10_000.0));

    assert!(matches!(rx.recv().await, Some(HubMessage::InitialData { .. })));
    assert!(matches!(rx.recv().await, Some(HubMessage::NewViolations { .. })));
}

#[tokio::test]
async fn closing_connection_is_removed_before_sending() {
    let hub = BroadcastHub::new(8);
    let (id, mut rx) = hub.connect(Group::Dashboard, all());
    hub.mark_closing(id);

    let report = hub.push(
        Group::Dashboard,
        &HubMessage::ViolationSummary {
            new_violations_count: 1,
            timestamp: 1.0,
        },
    );

    assert_eq!(report, PushReport { delivered: 0, dropped: 0, removed: 1 });
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn push_only_reaches_its_group() {
    let hub = BroadcastHub::new(8);
    let (_, mut violations) = hub.connect(Group::Violations, all());
    let (_, mut dashboard) = hub.connect(Group::Dashboard, all());

    hub.push(
        Group::Dashboard,
        &HubMessage::ViolationSummary {
            new_violations_count: 3,
            timestamp: 1.0,
        },
    );

    assert!(matches!(
        dashboard.try_recv(),
        Ok(HubMessage::ViolationSummary { new_violations_count: 3, .. })
    ));
    assert!(violations.try_recv().is_err());
}

#[tokio::test]
async fn filter_update_changes_only_that_connection() {
    let hub = BroadcastHub::new(8);
    let (narrowed, mut narrowed_rx) = hub.connect(Group::Violations, all());
    let (_, mut other_rx) = hub.connect(Group::Violations, all());

    hub.update_filter(narrowed, SubscriberFilter::new(Some("B".into()), 24))
        .unwrap();
    hub.push(Group::Violations, &violations_at(10_000.0));

    match narrowed_rx.recv().await {
        Some(HubMessage::NewViolations { violations, .. }) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].camera, "B");
        }
        other => panic!("unexpected {:?}", other),
    }
    match other_rx.recv().await {
        Some(HubMessage::NewViolations { count, .. }) => assert_eq!(count, 2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(hub.filter_of(narrowed).and_then(|f| f.camera), Some("B".into()));
}

#[tokio::test]
async fn unknown_connection_filter_update_is_not_found() {
    let hub = BroadcastHub::new(8);
    assert!(matches!(
        hub.update_filter(Uuid::new_v4(), all()),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let hub = BroadcastHub::new(8);
    let (id, _rx) = hub.connect(Group::Violations, all());

    assert!(hub.disconnect(id));
    assert!(!hub.disconnect(id));
    assert_eq!(hub.stats(), HubStats::default());
}

#[tokio::test]
async fn full_queue_drops_message_but_keeps_connection() {
    let hub = BroadcastHub::new(1);
    let (id, mut rx) = hub.connect(Group::Violations, all());
    let message = violations_at(10_000.0);

    let first = hub.push(Group::Violations, &message);
    let second = hub.push(Group::Violations, &message);

    assert_eq!(first.delivered, 1);
    assert_eq!(second.dropped, 1);
    assert!(hub.filter_of(id).is_some());
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn send_to_reaches_a_single_connection() {
    let hub = BroadcastHub::new(4);
    let (target, mut target_rx) = hub.connect(Group::Violations, all());
    let (_, mut other_rx) = hub.connect(Group::Violations, all());

    hub.send_to(target, HubMessage::Pong { timestamp: 5.0 }).unwrap();

    assert_eq!(target_rx.recv().await, Some(HubMessage::Pong { timestamp: 5.0 }));
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_registration_and_push() {
    let hub = Arc::new(BroadcastHub::new(256));
    let message = violations_at(10_000.0);

    let connectors = (0..8).map(|_| {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let mut receivers = Vec::new();
            for _ in 0..25 {
                receivers.push(hub.connect(Group::Violations, SubscriberFilter::new(None, 24)));
                tokio::task::yield_now().await;
            }
            receivers
        })
    });
    let pusher = {
        let hub = Arc::clone(&hub);
        let message = message.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                hub.push(Group::Violations, &message);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut receivers = Vec::new();
    for handle in connectors {
        receivers.extend(handle.await.unwrap());
    }
    pusher.await.unwrap();

    assert_eq!(hub.stats().violations, 200);
    let report = hub.push(Group::Violations, &message);
    assert_eq!(report.delivered, 200);
    for (_, mut rx) in receivers {
        // each connection got at most one copy per push
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!((1..=51).contains(&received));
    }
}
