//! Subscription sharing, collapse and cleanup over an in-memory channel.

mod common;

use assert_matches::assert_matches;
use nimbus_core::logging::capture_logs;
use nimbus_realtime::{EventType, RealtimeError, ResourceIdentity, SubscriptionKey, watch};
use serde_json::json;
use tracing::Level;

use common::{Harness, actions, command_name, next_item, settle};

#[tokio::test]
async fn one_wire_subscribe_per_event_type() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let mut first = ds.watch(["created"]).unwrap();
    let sub = h.next_command().await;
    assert_eq!(command_name(&sub), "subscribe");
    assert_eq!(actions(&sub), vec!["created"]);
    assert_eq!(sub["data"]["arguments"]["resource"], json!({"type": "ds", "name": "orders"}));
    h.ack(&sub).await;

    let mut second = ds.watch(["created"]).unwrap();
    h.assert_quiet().await;

    h.push_event("ds", "orders", "created", json!({"id": 1})).await;
    let a = next_item(&mut first).await.unwrap().unwrap();
    let b = next_item(&mut second).await.unwrap().unwrap();
    assert_eq!(a.data["id"], 1);
    assert_eq!(a, b);

    let key = SubscriptionKey::new(ResourceIdentity::dataset("orders"), EventType::Created);
    assert_eq!(h.client.coordinator().observers(&key).len(), 2);
}

#[tokio::test]
async fn dropping_a_sibling_sends_no_unsubscribe() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let first = ds.watch(["updated"]).unwrap();
    let sub = h.next_command().await;
    h.ack(&sub).await;
    let mut second = ds.watch(["updated"]).unwrap();

    drop(first);
    h.assert_quiet().await;

    h.push_event("ds", "orders", "updated", json!(null)).await;
    assert_eq!(next_item(&mut second).await.unwrap().unwrap().action, EventType::Updated);
}

#[tokio::test]
async fn whole_triad_in_one_watch_collapses_to_all() {
    let mut h = Harness::connected().await;
    let fs = h.client.fileset("docs");

    let _explicit = fs.watch(["created", "updated", "deleted"]).unwrap();
    let sub = h.next_command().await;
    assert_eq!(actions(&sub), vec!["all"]);

    let users = h.client.users("staff");
    let _implicit = users.watch(Vec::<&str>::new()).unwrap();
    let sub = h.next_command().await;
    assert_eq!(actions(&sub), vec!["all"]);
}

#[tokio::test]
async fn partial_overlap_sends_only_the_new_subset() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let _created = ds.watch(["created"]).unwrap();
    let sub = h.next_command().await;
    h.ack(&sub).await;

    let everything = ds.watch(["all"]).unwrap();
    let sub = h.next_command().await;
    assert_eq!(actions(&sub), vec!["updated", "deleted"]);
    h.ack(&sub).await;

    drop(everything);
    let unsub = h.next_command().await;
    assert_eq!(command_name(&unsub), "unsubscribe");
    assert_eq!(actions(&unsub), vec!["updated", "deleted"]);
    h.assert_quiet().await;
}

#[tokio::test]
async fn dropping_the_last_triad_watch_unsubscribes_all() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let stream = ds.watch(["all"]).unwrap();
    let sub = h.next_command().await;
    h.ack(&sub).await;

    stream.cancel();
    let unsub = h.next_command().await;
    assert_eq!(command_name(&unsub), "unsubscribe");
    assert_eq!(actions(&unsub), vec!["all"]);
    assert!(h.client.coordinator().subscriptions().is_empty());
}

#[tokio::test]
async fn event_without_observers_unsubscribes_that_type_once() {
    let mut h = Harness::connected().await;

    h.push_event("ds", "ghost", "deleted", json!({})).await;
    let unsub = h.next_command().await;
    assert_eq!(command_name(&unsub), "unsubscribe");
    assert_eq!(actions(&unsub), vec!["deleted"]);
    assert_eq!(unsub["data"]["arguments"]["resource"], json!({"type": "ds", "name": "ghost"}));
    h.ack(&unsub).await;

    h.assert_quiet().await;
    assert_eq!(h.client.coordinator().stale_events(), 1);
}

#[tokio::test]
async fn independent_watches_send_in_decision_order() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let created = ds.watch(["created"]).unwrap();
    let _deleted = ds.watch(["deleted"]).unwrap();
    drop(created);

    let first = h.next_command().await;
    let second = h.next_command().await;
    let third = h.next_command().await;
    assert_eq!((command_name(&first), actions(&first)), ("subscribe", vec!["created".to_string()]));
    assert_eq!((command_name(&second), actions(&second)), ("subscribe", vec!["deleted".to_string()]));
    assert_eq!((command_name(&third), actions(&third)), ("unsubscribe", vec!["created".to_string()]));
}

#[tokio::test]
async fn rejected_subscribe_errors_the_stream_and_cleans_up() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let mut stream = ds.watch(["created"]).unwrap();
    let sub = h.next_command().await;
    h.reject(&sub, json!("2"), "Unauthorized").await;

    let err = next_item(&mut stream).await.unwrap().unwrap_err();
    assert_matches!(err, RealtimeError::Remote { .. });
    let message = err.to_string();
    assert!(message.contains('2'), "{message}");
    assert!(message.contains("Unauthorized"), "{message}");
    assert!(next_item(&mut stream).await.is_none());
    assert!(!stream.is_active());

    let cleanup = h.next_command().await;
    assert_eq!(command_name(&cleanup), "unsubscribe");
    assert_eq!(actions(&cleanup), vec!["created"]);
    assert!(h.client.coordinator().subscriptions().is_empty());

    // dropping the failed stream must not unsubscribe a second time
    drop(stream);
    h.assert_quiet().await;
}

#[tokio::test]
async fn rejected_subscribe_fails_a_sibling_that_joined_it() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let mut first = ds.watch(["created"]).unwrap();
    let sub = h.next_command().await;
    let mut second = ds.watch(["created", "updated"]).unwrap();
    let joined = h.next_command().await;
    assert_eq!(actions(&joined), vec!["updated"]);
    h.ack(&joined).await;

    h.reject(&sub, json!(2), "Unauthorized").await;
    assert_matches!(next_item(&mut first).await, Some(Err(RealtimeError::Remote { .. })));
    assert_matches!(next_item(&mut second).await, Some(Err(RealtimeError::Remote { .. })));
    assert!(next_item(&mut second).await.is_none());
    assert!(!second.is_active());

    // one cleanup for the rejected key, one for the key only the sibling held
    let mut cleanups = vec![h.next_command().await, h.next_command().await];
    cleanups.sort_by_key(actions);
    assert!(cleanups.iter().all(|c| command_name(c) == "unsubscribe"));
    assert_eq!(actions(&cleanups[0]), vec!["created"]);
    assert_eq!(actions(&cleanups[1]), vec!["updated"]);
    assert!(h.client.coordinator().subscriptions().is_empty());

    let _third = ds.watch(["created"]).unwrap();
    let again = h.next_command().await;
    assert_eq!(command_name(&again), "subscribe");
    assert_eq!(actions(&again), vec!["created"]);
}

#[tokio::test]
async fn three_separate_watches_are_never_batched() {
    let mut h = Harness::connected().await;
    let ds = h.client.dataset("orders");

    let _created = ds.watch(["created"]).unwrap();
    let _updated = ds.watch(["updated"]).unwrap();
    let _deleted = ds.watch(["deleted"]).unwrap();

    for expected in ["created", "updated", "deleted"] {
        let sub = h.next_command().await;
        assert_eq!(command_name(&sub), "subscribe");
        assert_eq!(actions(&sub), vec![expected]);
    }
    h.assert_quiet().await;
}

#[tokio::test]
async fn a_burst_of_events_reaches_an_idle_stream_in_full() {
    let mut h = Harness::connected().await;
    let mut stream = h.client.dataset("orders").watch(["updated"]).unwrap();
    let sub = h.next_command().await;
    h.ack(&sub).await;

    for id in 0..300 {
        h.push_event("ds", "orders", "updated", json!({"id": id})).await;
    }
    settle().await;

    for id in 0..300 {
        let event = next_item(&mut stream).await.unwrap().unwrap();
        assert_eq!(event.data["id"], id);
    }
}

#[tokio::test]
async fn failed_background_unsubscribe_is_logged_not_raised() {
    let (logs, _guard) = capture_logs();
    let mut h = Harness::connected().await;
    let ch = h.client.channel("chat");

    let stream = ch.subscribe().unwrap();
    let sub = h.next_command().await;
    assert_eq!(actions(&sub), vec!["published"]);
    h.ack(&sub).await;

    drop(stream);
    let unsub = h.next_command().await;
    h.reject(&unsub, json!(5), "gone").await;
    settle().await;

    assert!(logs.has_event(Level::WARN, "unsubscribe failed"));
}

#[tokio::test]
async fn invalid_types_fail_before_anything_is_sent() {
    let mut h = Harness::connected().await;

    assert_matches!(
        h.client.dataset("orders").watch(["created", "removed"]),
        Err(RealtimeError::BadEventSubscriptionType { ref value, .. }) if value == "removed"
    );
    assert_matches!(
        watch(&h.client.channel("chat"), ["deleted"]),
        Err(RealtimeError::BadEventSubscriptionType { .. })
    );
    h.assert_quiet().await;
    assert!(h.client.coordinator().subscriptions().is_empty());
}
