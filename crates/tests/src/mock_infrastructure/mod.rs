//! Reusable mock types for gateway integration tests.
//!
//! [`MockProtocol`] stands in for a full wire protocol: endpoint behavior is
//! scripted per address (latency, health, reported chain info, failure mode)
//! and every send and applied observation bundle is recorded for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use polygate_core::{
    observation::{ProtocolObservations, Reporter, RequestObservations},
    protocol::{Protocol, ProtocolContext, ProtocolError},
    types::{EndpointAddr, RelayPayload, RelayResponse, ServiceId},
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// Scripted failure mode for one mock endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The send errors with a protocol-level timeout after the latency.
    Timeout,
    /// The send errors with a connection failure after the latency.
    Connection,
    /// The send succeeds but the body is not JSON.
    MalformedBody,
}

/// Scripted behavior of one mock endpoint.
#[derive(Debug, Clone)]
pub struct MockEndpoint {
    pub latency: Duration,
    pub healthy: bool,
    pub height: u64,
    pub epoch: u64,
    pub failure: Option<MockFailure>,
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            healthy: true,
            height: 100,
            epoch: 1,
            failure: None,
        }
    }
}

impl MockEndpoint {
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_chain_info(mut self, height: u64, epoch: u64) -> Self {
        self.height = height;
        self.epoch = epoch;
        self
    }

    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    #[must_use]
    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Scriptable [`Protocol`] implementation backed by in-memory endpoint
/// definitions.
#[derive(Default)]
pub struct MockProtocol {
    endpoints: Mutex<HashMap<ServiceId, Vec<(EndpointAddr, MockEndpoint)>>>,
    fail_discovery: AtomicBool,
    sends: Arc<AtomicUsize>,
    applied: Mutex<Vec<ProtocolObservations>>,
}

impl MockProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoint(
        &self,
        service_id: &ServiceId,
        endpoint_addr: &EndpointAddr,
        behavior: MockEndpoint,
    ) {
        self.endpoints
            .lock()
            .entry(service_id.clone())
            .or_default()
            .push((endpoint_addr.clone(), behavior));
    }

    /// Registers the service with no endpoints at all.
    pub fn add_empty_service(&self, service_id: &ServiceId) {
        self.endpoints.lock().entry(service_id.clone()).or_default();
    }

    pub fn set_discovery_failure(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::Release);
    }

    /// Total sends that reached any mock endpoint.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::Acquire)
    }

    /// Observation bundles applied back through [`Protocol::apply_observations`].
    #[must_use]
    pub fn applied_observations(&self) -> Vec<ProtocolObservations> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl Protocol for MockProtocol {
    async fn available_endpoints(
        &self,
        service_id: &ServiceId,
    ) -> Result<Vec<EndpointAddr>, ProtocolError> {
        if self.fail_discovery.load(Ordering::Acquire) {
            return Err(ProtocolError::NoEndpoints(service_id.clone()));
        }
        Ok(self
            .endpoints
            .lock()
            .get(service_id)
            .map(|eps| eps.iter().map(|(addr, _)| addr.clone()).collect())
            .unwrap_or_default())
    }

    async fn build_request_context(
        &self,
        service_id: &ServiceId,
        endpoint_addr: &EndpointAddr,
    ) -> Result<Box<dyn ProtocolContext>, ProtocolError> {
        let behavior = self
            .endpoints
            .lock()
            .get(service_id)
            .and_then(|eps| {
                eps.iter().find(|(addr, _)| addr == endpoint_addr).map(|(_, b)| b.clone())
            })
            .ok_or_else(|| ProtocolError::ContextSetup {
                endpoint: endpoint_addr.clone(),
                reason: "endpoint not scripted".to_string(),
            })?;

        Ok(Box::new(MockContext {
            endpoint_addr: endpoint_addr.clone(),
            behavior,
            sends: Arc::clone(&self.sends),
        }))
    }

    fn apply_observations(&self, observations: &ProtocolObservations) {
        self.applied.lock().push(observations.clone());
    }
}

struct MockContext {
    endpoint_addr: EndpointAddr,
    behavior: MockEndpoint,
    sends: Arc<AtomicUsize>,
}

impl MockContext {
    fn response_body(&self, payload: &RelayPayload) -> Vec<u8> {
        let body = match payload.method.as_deref() {
            Some("getHealth") if self.behavior.healthy => {
                json!({ "jsonrpc": "2.0", "id": 1, "result": "ok" })
            }
            Some("getHealth") => {
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32005, "message": "node is behind" },
                })
            }
            Some("getEpochInfo") => json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "blockHeight": self.behavior.height,
                    "epoch": self.behavior.epoch,
                    "slotIndex": 7,
                },
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": format!("response-from-{}", self.endpoint_addr),
            }),
        };
        body.to_string().into_bytes()
    }
}

#[async_trait]
impl ProtocolContext for MockContext {
    async fn send(&self, payload: &RelayPayload) -> Result<RelayResponse, ProtocolError> {
        tokio::time::sleep(self.behavior.latency).await;
        self.sends.fetch_add(1, Ordering::AcqRel);

        match self.behavior.failure {
            Some(MockFailure::Timeout) => {
                Err(ProtocolError::Timeout { endpoint: self.endpoint_addr.clone() })
            }
            Some(MockFailure::Connection) => Err(ProtocolError::Send {
                endpoint: self.endpoint_addr.clone(),
                reason: "connection refused".to_string(),
            }),
            Some(MockFailure::MalformedBody) => Ok(RelayResponse {
                endpoint_addr: self.endpoint_addr.clone(),
                payload: b"<html>502 Bad Gateway</html>".to_vec(),
                status: 502,
            }),
            None => Ok(RelayResponse {
                endpoint_addr: self.endpoint_addr.clone(),
                payload: self.response_body(payload),
                status: 200,
            }),
        }
    }

    fn observations(&self) -> ProtocolObservations {
        ProtocolObservations::default()
    }
}

/// [`Reporter`] that records every published bundle.
#[derive(Default)]
pub struct RecordingReporter {
    published: Mutex<Vec<RequestObservations>>,
}

impl RecordingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn published(&self) -> Vec<RequestObservations> {
        self.published.lock().clone()
    }

    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

impl Reporter for RecordingReporter {
    fn publish(&self, observations: &RequestObservations) {
        self.published.lock().push(observations.clone());
    }
}
