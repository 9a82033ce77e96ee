use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use brokervisor::memory::MemoryBroker;
use brokervisor::{
    BackoffPolicy, Bus, ConnectionError, ConnectionState, Event, EventKind, JitterPolicy, Message,
    MessageCallback, PubSubHandle, PubSubOptions, PubSubSupervisor, QoS, SubscriptionSet,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const STATUS: &str = "devices/+/status";

fn options() -> PubSubOptions {
    let mut opts = PubSubOptions::new("tcp://mem:1883", "test-client");
    opts.connect_timeout = Duration::from_millis(200);
    opts.reconnect = BackoffPolicy {
        first: Duration::from_millis(10),
        max: Duration::from_millis(40),
        factor: 2.0,
        jitter: JitterPolicy::None,
    };
    opts
}

fn counting(counter: &Arc<AtomicUsize>) -> MessageCallback {
    let counter = Arc::clone(counter);
    Arc::new(move |_msg: &Message| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

async fn connect(broker: &MemoryBroker, bus: &Bus, subs: SubscriptionSet) -> PubSubHandle {
    PubSubSupervisor::new(Arc::new(broker.clone()), bus.clone())
        .with_subscriptions(subs)
        .connect(&CancellationToken::new(), options())
        .await
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn delivers_messages_matching_subscriptions() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(256);
    let hits = Arc::new(AtomicUsize::new(0));
    let subs = SubscriptionSet::new();
    subs.insert(STATUS, QoS::AtLeastOnce, counting(&hits)).unwrap();

    let handle = connect(&broker, &bus, subs).await;
    assert_eq!(handle.state(), ConnectionState::Connected);
    wait_until("subscription applied", || broker.subscribe_count(1, STATUS) == 1).await;

    assert_eq!(broker.publish("devices/a/status", "online"), 1);
    assert_eq!(broker.publish("devices/a/telemetry", "{}"), 0);
    wait_until("callback", || hits.load(Ordering::SeqCst) == 1).await;

    handle
        .publish("devices/b/status", QoS::AtMostOnce, "offline")
        .await
        .unwrap();
    wait_until("loopback", || hits.load(Ordering::SeqCst) == 2).await;

    handle.close().await;
}

#[tokio::test]
async fn resubscribes_exactly_once_after_every_reconnect() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(1024);
    let subs = SubscriptionSet::new();
    subs.insert(STATUS, QoS::AtLeastOnce, Arc::new(|_: &Message| {})).unwrap();
    subs.insert("alerts/#", QoS::AtMostOnce, Arc::new(|_: &Message| {})).unwrap();

    let handle = connect(&broker, &bus, subs).await;
    for conn in 1..=3u64 {
        wait_until("subscriptions applied", || {
            broker.subscribe_count(conn, STATUS) == 1 && broker.subscribe_count(conn, "alerts/#") == 1
        })
        .await;
        if conn < 3 {
            broker.drop_connections("broker restart");
            wait_until("reconnect", || broker.connections() == conn + 1).await;
        }
    }
    assert!(handle.wait_for(ConnectionState::Connected, Duration::from_secs(1)).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = broker.subscribe_calls();
    assert_eq!(calls.len(), 6, "{calls:?}");

    handle.close().await;
}

#[tokio::test]
async fn first_connect_times_out_then_recovers() {
    let broker = MemoryBroker::new();
    broker.set_reachable(false);
    let bus = Bus::new(1024);
    let mut rx = bus.subscribe();
    let subs = SubscriptionSet::new();
    subs.insert(STATUS, QoS::AtLeastOnce, Arc::new(|_: &Message| {})).unwrap();

    let handle = connect(&broker, &bus, subs).await;
    assert_ne!(handle.state(), ConnectionState::Connected);
    assert!(!handle.state().is_terminal());
    assert!(matches!(
        handle.publish("devices/a/status", QoS::AtMostOnce, "x").await,
        Err(ConnectionError::NotConnected)
    ));

    broker.set_reachable(true);
    assert!(handle.wait_for(ConnectionState::Connected, Duration::from_secs(2)).await);
    wait_until("subscription applied", || broker.subscribe_count(1, STATUS) == 1).await;
    handle.close().await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| e.kind == EventKind::ConnectTimedOut));
    assert!(events.iter().any(|e| e.kind == EventKind::ConnectFailed));
    assert!(events.iter().any(|e| e.kind == EventKind::ReconnectScheduled));
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::ConnectionClosed));
}

#[tokio::test]
async fn runtime_subscription_applies_to_live_connection_once() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(256);
    let handle = connect(&broker, &bus, SubscriptionSet::new()).await;
    assert_eq!(handle.state(), ConnectionState::Connected);

    let hits = Arc::new(AtomicUsize::new(0));
    handle
        .subscribe("alerts/#", QoS::AtLeastOnce, counting(&hits))
        .await
        .unwrap();
    wait_until("subscription applied", || broker.subscribe_count(1, "alerts/#") == 1).await;

    broker.publish("alerts/fire", "!");
    wait_until("callback", || hits.load(Ordering::SeqCst) == 1).await;

    assert!(handle.unsubscribe("alerts/#").await.unwrap());
    assert!(!handle.unsubscribe("alerts/#").await.unwrap());

    broker.drop_connections("restart");
    wait_until("reconnect", || broker.connections() == 2).await;
    assert!(handle.wait_for(ConnectionState::Connected, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(broker.subscribe_count(2, "alerts/#"), 0);

    handle.close().await;
}

#[tokio::test]
async fn invalid_filters_are_rejected() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(64);
    let handle = connect(&broker, &bus, SubscriptionSet::new()).await;

    let res = handle
        .subscribe("devices/#/status", QoS::AtMostOnce, Arc::new(|_: &Message| {}))
        .await;
    assert!(matches!(res, Err(ConnectionError::Subscribe { .. })));
    assert!(handle.subscriptions().is_empty());

    handle.close().await;
}

#[tokio::test]
async fn cancellation_reaches_closed_state() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(64);
    let token = CancellationToken::new();
    let handle = PubSubSupervisor::new(Arc::new(broker.clone()), bus.clone())
        .connect(&token, options())
        .await;
    let mut state = handle.watch_state();
    assert_eq!(broker.open_links(), 1);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .expect("driver exits on cancel");
    assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
    assert_eq!(broker.open_links(), 0);
}

#[tokio::test]
async fn failed_resubscribe_is_retried_on_the_same_connection() {
    let broker = MemoryBroker::new();
    broker.fail_next_subscribes(2, "not authorized yet");
    let bus = Bus::new(1024);
    let mut rx = bus.subscribe();
    let subs = SubscriptionSet::new();
    subs.insert(STATUS, QoS::AtLeastOnce, Arc::new(|_: &Message| {})).unwrap();

    let handle = connect(&broker, &bus, subs).await;
    assert_eq!(handle.state(), ConnectionState::Connected);
    wait_until("subscription applied", || broker.subscribe_count(1, STATUS) == 1).await;
    assert_eq!(broker.connections(), 1);

    handle.close().await;
    let events = drain(&mut rx);
    let failed = events.iter().filter(|e| e.kind == EventKind::SubscribeFailed).count();
    assert_eq!(failed, 2);
    assert!(events.iter().any(|e| e.kind == EventKind::Resubscribed));
}

#[tokio::test]
async fn failed_runtime_subscribe_is_retried_in_the_background() {
    let broker = MemoryBroker::new();
    let bus = Bus::new(256);
    let mut rx = bus.subscribe();
    let handle = connect(&broker, &bus, SubscriptionSet::new()).await;
    assert_eq!(handle.state(), ConnectionState::Connected);
    let mut seen = Vec::new();
    wait_until("connection hook ran", || {
        seen.extend(drain(&mut rx));
        seen.iter().any(|e| e.kind == EventKind::Connected)
    })
    .await;

    broker.fail_next_subscribes(1, "transient");
    let res = handle
        .subscribe("alerts/#", QoS::AtLeastOnce, Arc::new(|_: &Message| {}))
        .await;
    assert!(matches!(res, Err(ConnectionError::Subscribe { .. })));
    assert!(handle.subscriptions().contains("alerts/#"));

    wait_until("subscription applied", || broker.subscribe_count(1, "alerts/#") == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscribe_count(1, "alerts/#"), 1);

    handle.close().await;
}
