//! QoS-driven endpoint filtering observed end to end through relays.

use crate::mock_infrastructure::{MockEndpoint, MockProtocol};
use polygate_core::{
    ChainQoS, ChainQoSConfig, Gateway, GatewayBuilder, GatewayConfig, Hydrator, QoSService,
    RelayConfig, RequestOrigin, ServiceId,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

fn service() -> ServiceId {
    ServiceId::new("sol")
}

fn single_select_harness(protocol: Arc<MockProtocol>) -> (Arc<Gateway>, Arc<ChainQoS>) {
    let qos = Arc::new(ChainQoS::new(ChainQoSConfig::new(service())));
    let config = GatewayConfig {
        relay: RelayConfig { max_parallel_requests: 1, ..RelayConfig::default() },
        ..GatewayConfig::default()
    };
    let gateway = GatewayBuilder::new(protocol)
        .with_config(config)
        .register_service(service(), Arc::clone(&qos) as Arc<dyn QoSService>)
        .build()
        .unwrap();
    (Arc::new(gateway), qos)
}

async fn hydrate(gateway: &Arc<Gateway>) {
    Hydrator::new(Arc::clone(gateway)).run_pass().await;
    // Probe observations apply on detached tasks.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn responder(gateway: &Gateway) -> String {
    let body = gateway
        .handle_relay(
            &service(),
            br#"{"jsonrpc":"2.0","id":1,"method":"getBalance"}"#,
            RequestOrigin::Organic,
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    body["result"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_unhealthy_endpoint_is_avoided() {
    let protocol = Arc::new(MockProtocol::new());
    protocol.add_endpoint(&service(), &"good".into(), MockEndpoint::default());
    protocol.add_endpoint(&service(), &"bad".into(), MockEndpoint::default().unhealthy());
    let (gateway, _) = single_select_harness(Arc::clone(&protocol));

    hydrate(&gateway).await;
    for _ in 0..20 {
        assert_eq!(responder(&gateway).await, "response-from-good");
    }
}

#[tokio::test]
async fn test_lagging_endpoint_is_avoided() {
    let protocol = Arc::new(MockProtocol::new());
    protocol.add_endpoint(
        &service(),
        &"caught-up".into(),
        MockEndpoint::default().with_chain_info(150, 3),
    );
    protocol.add_endpoint(
        &service(),
        &"lagging".into(),
        MockEndpoint::default().with_chain_info(50, 3),
    );
    let (gateway, qos) = single_select_harness(Arc::clone(&protocol));

    hydrate(&gateway).await;
    assert_eq!(qos.state().perceived_height(), 150);
    for _ in 0..20 {
        assert_eq!(responder(&gateway).await, "response-from-caught-up");
    }
}

#[tokio::test]
async fn test_all_invalid_endpoints_fail_open() {
    let protocol = Arc::new(MockProtocol::new());
    protocol.add_endpoint(&service(), &"a".into(), MockEndpoint::default().unhealthy());
    protocol.add_endpoint(&service(), &"b".into(), MockEndpoint::default().unhealthy());
    let (gateway, _) = single_select_harness(Arc::clone(&protocol));

    hydrate(&gateway).await;
    // Every candidate fails validation, but the relay must still go out.
    let winner = responder(&gateway).await;
    assert!(winner.starts_with("response-from-"), "unexpected body: {winner}");
}
