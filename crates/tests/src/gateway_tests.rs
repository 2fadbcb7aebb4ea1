//! End-to-end relay handling through the gateway facade.

use crate::mock_infrastructure::{MockEndpoint, MockProtocol, RecordingReporter};
use polygate_core::{
    observation::{Reporter, RequestErrorKind},
    ChainQoS, ChainQoSConfig, Gateway, GatewayBuilder, GatewayConfig, LimiterConfig, Protocol,
    QoSService, RelayConfig, RelayError, RequestOrigin, ServiceId,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

fn service() -> ServiceId {
    ServiceId::new("sol")
}

struct Harness {
    gateway: Arc<Gateway>,
    protocol: Arc<MockProtocol>,
    qos: Arc<ChainQoS>,
    reporter: Arc<RecordingReporter>,
}

fn harness(config: GatewayConfig) -> Harness {
    let protocol = Arc::new(MockProtocol::new());
    let qos = Arc::new(ChainQoS::new(ChainQoSConfig::new(service())));
    let reporter = Arc::new(RecordingReporter::new());
    let gateway = GatewayBuilder::new(Arc::clone(&protocol) as Arc<dyn Protocol>)
        .with_config(config)
        .register_service(service(), Arc::clone(&qos) as Arc<dyn QoSService>)
        .with_reporter(Arc::clone(&reporter) as Arc<dyn Reporter>)
        .build()
        .unwrap();
    Harness { gateway: Arc::new(gateway), protocol, qos, reporter }
}

/// Lets detached observation-broadcast tasks run to completion.
async fn drain_broadcasts() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_unknown_service_is_an_error() {
    let h = harness(GatewayConfig::default());
    let result = h
        .gateway
        .handle_relay(&ServiceId::new("nope"), b"{}", RequestOrigin::Organic)
        .await;
    assert!(matches!(result, Err(RelayError::UnknownService(_))));

    drain_broadcasts().await;
    let published = h.reporter.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].gateway.request_error, Some(RequestErrorKind::UnknownService));
    assert_eq!(h.protocol.send_count(), 0);
}

#[tokio::test]
async fn test_rejected_request_returns_error_body_without_relaying() {
    let h = harness(GatewayConfig::default());
    h.protocol.add_endpoint(&service(), &"node".into(), MockEndpoint::default());

    let body = h
        .gateway
        .handle_relay(&service(), b"this is not json", RequestOrigin::Organic)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(h.protocol.send_count(), 0);

    drain_broadcasts().await;
    let published = h.reporter.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].gateway.request_error, Some(RequestErrorKind::RejectedByQoS));
}

#[tokio::test]
async fn test_successful_relay_returns_endpoint_response() {
    let h = harness(GatewayConfig::default());
    h.protocol.add_endpoint(&service(), &"node".into(), MockEndpoint::default());

    let body = h
        .gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":9,"method":"getBalance"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["result"], "response-from-node");
}

#[tokio::test]
async fn test_observations_reach_qos_protocol_and_reporters() {
    let h = harness(GatewayConfig::default());
    h.protocol.add_endpoint(
        &service(),
        &"node".into(),
        MockEndpoint::default().with_chain_info(500, 2),
    );

    // Organic health and chain-info requests double as QoS observation
    // sources. The perceived floor only advances once the record carries a
    // passing health observation alongside the chain info.
    h.gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":0,"method":"getHealth"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    drain_broadcasts().await;
    assert_eq!(h.qos.state().perceived_height(), 0);

    let body = h
        .gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":1,"method":"getEpochInfo"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["result"]["blockHeight"], 500);

    drain_broadcasts().await;
    assert_eq!(h.qos.state().perceived_height(), 500);
    assert_eq!(h.qos.state().perceived_epoch(), 2);
    assert_eq!(h.qos.store().len(), 1);

    assert_eq!(h.reporter.publish_count(), 2);
    let applied = h.protocol.applied_observations();
    assert_eq!(applied.len(), 2);
    assert!(applied[1].endpoints.iter().any(|obs| obs.is_success()));
}

#[tokio::test(start_paused = true)]
async fn test_relay_capacity_exhaustion() {
    let config = GatewayConfig {
        limiter: LimiterConfig { max_concurrent_relays: 1, ..LimiterConfig::default() },
        ..GatewayConfig::default()
    };
    let h = harness(config);
    h.protocol.add_endpoint(&service(), &"node".into(), MockEndpoint::default());

    // Drain the only slot, then the relay cannot be admitted before its
    // transport deadline.
    assert!(h.gateway.limiter().acquire(Duration::from_secs(1)).await);

    let result = h
        .gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":1,"method":"getBalance"}"#,
            RequestOrigin::Organic,
        )
        .await;
    assert!(matches!(result, Err(RelayError::CapacityExhausted)));
    assert_eq!(h.protocol.send_count(), 0);

    h.gateway.limiter().release();
    assert_eq!(h.gateway.limiter().active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_admission_wait_counts_against_transport_deadline() {
    let config = GatewayConfig {
        relay: RelayConfig {
            max_parallel_requests: 1,
            parallel_request_timeout_ms: 1_000,
            ..RelayConfig::default()
        },
        limiter: LimiterConfig { max_concurrent_relays: 1, ..LimiterConfig::default() },
        ..GatewayConfig::default()
    };
    let h = harness(config);
    h.protocol.add_endpoint(
        &service(),
        &"node".into(),
        MockEndpoint::default().with_latency(Duration::from_millis(400)),
    );

    // Occupy the only slot and free it 800ms into the request, leaving the
    // relay 200ms of send budget. The 400ms endpoint cannot finish in time,
    // so the caller gets an error body at the transport deadline instead of
    // blocking for admission wait plus a full send window.
    assert!(h.gateway.limiter().acquire(Duration::from_secs(1)).await);
    let releaser = Arc::clone(&h.gateway);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        releaser.limiter().release();
    });

    let started = tokio::time::Instant::now();
    let body = h
        .gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":1,"method":"getBalance"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(950), "resolved too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_100), "blocked past the deadline: {elapsed:?}");

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], -32000);
}

#[tokio::test]
async fn test_relay_config_hot_swap() {
    let h = harness(GatewayConfig::default());
    h.protocol.add_endpoint(&service(), &"node".into(), MockEndpoint::default());

    let mut relay = RelayConfig::default();
    relay.max_parallel_requests = 1;
    h.gateway.update_relay_config(relay);

    let body = h
        .gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":1,"method":"getBalance"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["result"], "response-from-node");
}
