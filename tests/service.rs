use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use brokervisor::memory::{MemoryBroker, MemoryLog};
use brokervisor::{
    BrokerEndpoints, ConsumerGroupIdentity, ConsumerSpec, EventKind, HandlerFn, HandlerRef,
    Message, PubSubOptions, PubSubSpec, QoS, Record, RuntimeError, Service, ServiceConfig,
    StartupError, SubscriptionSet,
};
use tokio::sync::oneshot;

fn consumer_spec(log: &MemoryLog, handler: HandlerRef) -> ConsumerSpec {
    ConsumerSpec::new(
        Arc::new(log.clone()),
        ConsumerGroupIdentity::new("g1", ["events"]).unwrap(),
        BrokerEndpoints::new(["mem:9092"]).unwrap(),
        handler,
    )
}

fn counting_handler(count: &Arc<AtomicUsize>) -> HandlerRef {
    let count = Arc::clone(count);
    HandlerFn::arc(move |_rec: Record| {
        let count = Arc::clone(&count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn unreachable_kafka_is_fatal() {
    let log = MemoryLog::new();
    log.set_reachable(false);
    let service = Service::builder(ServiceConfig::default()).build();
    let token = service.cancellation_token();

    let res = service
        .run_until(
            consumer_spec(&log, HandlerFn::arc(|_rec: Record| async { Ok(()) })),
            None,
            std::future::pending(),
        )
        .await;

    assert!(matches!(
        res,
        Err(RuntimeError::Startup(StartupError::Unreachable { .. }))
    ));
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn runs_both_supervisors_until_shutdown() {
    let log = MemoryLog::new();
    log.create_topic("events", 2);
    for i in 0..4 {
        log.produce("events", i % 2, format!("{{\"deviceId\":\"d{i}\"}}"));
    }
    let broker = MemoryBroker::new();

    let service = Service::builder(ServiceConfig::default()).build();
    let mut rx = service.bus().subscribe();

    let handled = Arc::new(AtomicUsize::new(0));
    let messages = Arc::new(AtomicUsize::new(0));
    let subs = SubscriptionSet::new();
    {
        let messages = Arc::clone(&messages);
        subs.insert(
            "devices/+/status",
            QoS::AtLeastOnce,
            Arc::new(move |_: &Message| {
                messages.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    }
    let pubsub = PubSubSpec::new(
        Arc::new(broker.clone()),
        PubSubOptions::new("tcp://mem:1883", "svc"),
    )
    .with_subscriptions(subs);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(service.run_until(
        consumer_spec(&log, counting_handler(&handled)),
        Some(pubsub),
        async move {
            let _ = stop_rx.await;
        },
    ));

    wait_until("records handled", || handled.load(Ordering::SeqCst) == 4).await;
    wait_until("subscription applied", || broker.subscribe_count(1, "devices/+/status") == 1)
        .await;
    broker.publish("devices/d1/status", "online");
    wait_until("message dispatched", || messages.load(Ordering::SeqCst) == 1).await;

    stop_tx.send(()).unwrap();
    let res = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("service stops within grace")
        .unwrap();
    assert!(res.is_ok(), "{res:?}");

    assert_eq!(log.committed("g1", "events", 0), Some(2));
    assert_eq!(log.committed("g1", "events", 1), Some(2));
    assert_eq!(broker.open_links(), 0);

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    let pos = |k: EventKind| kinds.iter().position(|x| *x == k);
    let requested = pos(EventKind::ShutdownRequested).expect("shutdown requested");
    let stopped = pos(EventKind::AllStoppedWithin).expect("all stopped");
    assert!(requested < stopped);
    assert!(pos(EventKind::ConsumerStopped).is_some_and(|p| p < stopped));
    assert!(pos(EventKind::ConnectionClosed).is_some_and(|p| p < stopped));
}

#[tokio::test]
async fn external_token_stops_the_service() {
    let log = MemoryLog::new();
    log.create_topic("events", 1);
    let service = Service::builder(ServiceConfig::default()).build();
    let token = service.cancellation_token();

    let run = tokio::spawn(service.run_until(
        consumer_spec(&log, HandlerFn::arc(|_rec: Record| async { Ok(()) })),
        None,
        std::future::pending(),
    ));
    wait_until("session joined", || log.active_sessions() == 1).await;

    token.cancel();
    let res = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("service stops")
        .unwrap();
    assert!(res.is_ok());
    assert_eq!(log.active_sessions(), 0);
}

#[tokio::test]
async fn stuck_handler_exceeds_grace() {
    let log = MemoryLog::new();
    log.create_topic("events", 1);
    log.produce("events", 0, "slow");

    let cfg = ServiceConfig {
        grace: Duration::from_millis(100),
        ..ServiceConfig::default()
    };
    let service = Service::builder(cfg).build();
    let token = service.cancellation_token();
    let started = Arc::new(AtomicUsize::new(0));
    let handler = {
        let started = Arc::clone(&started);
        HandlerFn::arc(move |_rec: Record| {
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        })
    };

    let run = tokio::spawn(service.run_until(
        consumer_spec(&log, handler),
        None,
        std::future::pending(),
    ));
    wait_until("handler entered", || started.load(Ordering::SeqCst) == 1).await;
    token.cancel();

    let res = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("grace bounds shutdown")
        .unwrap();
    match res {
        Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, vec!["consumer"]),
        other => panic!("unexpected {other:?}"),
    }
}
