//! Generic JSON-RPC chain QoS: request parsing, probe generation, and
//! observation extraction for chains whose health/consensus state is exposed
//! through two JSON-RPC methods (a health probe and a chain-info probe).
//!
//! The method names and the result fields carrying height/epoch are
//! configurable, so one implementation covers Solana-style chains
//! (`getHealth`/`getEpochInfo`) and close relatives without new code.

use super::{
    endpoint::ChainInfoObservation, state::ServiceState, store::EndpointStore, EndpointSelector,
    ParsedRequest, QoSEndpointObservation, QoSError, QoSObservationKind, QoSObservations,
    QoSService, RequestQoSContext,
};
use crate::types::{EndpointAddr, RelayPayload, ServiceId};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// JSON-RPC error code for a request that could not be parsed.
const JSONRPC_PARSE_ERROR: i64 = -32700;
/// JSON-RPC error code for a structurally valid but unserviceable request.
const JSONRPC_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code returned when no endpoint produced a response.
const JSONRPC_SERVER_ERROR: i64 = -32000;

/// Probe and field layout of one JSON-RPC chain family.
#[derive(Debug, Clone)]
pub struct ChainQoSConfig {
    pub service_id: ServiceId,
    /// Method whose result signals endpoint health (healthy iff the result
    /// is the string `"ok"`).
    pub health_method: String,
    /// Method whose result object carries the chain-info fields below.
    pub chain_info_method: String,
    /// Result field holding the endpoint's reported block height.
    pub height_field: String,
    /// Result field holding the endpoint's reported epoch.
    pub epoch_field: String,
    /// Prefer racing across distinct registrable domains.
    pub prefer_domain_diversity: bool,
}

impl ChainQoSConfig {
    /// Solana-style defaults for the given service.
    #[must_use]
    pub fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            health_method: "getHealth".to_string(),
            chain_info_method: "getEpochInfo".to_string(),
            height_field: "blockHeight".to_string(),
            epoch_field: "epoch".to_string(),
            prefer_domain_diversity: true,
        }
    }
}

/// One service's QoS instance: owns the endpoint store and perceived chain
/// state, and interprets endpoint responses for this chain family.
pub struct ChainQoS {
    config: Arc<ChainQoSConfig>,
    state: Arc<ServiceState>,
    store: EndpointStore,
}

impl ChainQoS {
    #[must_use]
    pub fn new(config: ChainQoSConfig) -> Self {
        let state = Arc::new(ServiceState::new(config.service_id.clone()));
        let store = EndpointStore::new(config.service_id.clone(), Arc::clone(&state))
            .with_domain_diversity(config.prefer_domain_diversity);
        Self { config: Arc::new(config), state, store }
    }

    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        &self.config.service_id
    }

    #[must_use]
    pub fn state(&self) -> &Arc<ServiceState> {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &EndpointStore {
        &self.store
    }

    fn probe_context(&self, method: &str) -> Box<dyn RequestQoSContext> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method });
        Box::new(ChainRequestContext {
            config: Arc::clone(&self.config),
            payload: RelayPayload::new(body.to_string().into_bytes()).with_method(method),
            method: method.to_string(),
            request_id: Value::from(1),
            rejection: None,
            response: None,
            observations: Vec::new(),
        })
    }
}

impl QoSService for ChainQoS {
    fn parse_request(&self, raw: &[u8]) -> ParsedRequest {
        let request: JsonRpcRequest = match serde_json::from_slice(raw) {
            Ok(request) => request,
            Err(err) => {
                debug!(service_id = %self.config.service_id, error = %err, "rejecting unparseable request");
                return ParsedRequest::Rejected(Box::new(ChainRequestContext::rejected(
                    Arc::clone(&self.config),
                    Value::Null,
                    JSONRPC_PARSE_ERROR,
                    format!("parse error: {err}"),
                )));
            }
        };

        if request.method.is_empty() {
            return ParsedRequest::Rejected(Box::new(ChainRequestContext::rejected(
                Arc::clone(&self.config),
                request.id,
                JSONRPC_INVALID_REQUEST,
                "invalid request: empty method".to_string(),
            )));
        }

        ParsedRequest::Accepted(Box::new(ChainRequestContext {
            config: Arc::clone(&self.config),
            payload: RelayPayload::new(raw.to_vec()).with_method(&request.method),
            method: request.method,
            request_id: request.id,
            rejection: None,
            response: None,
            observations: Vec::new(),
        }))
    }

    fn required_quality_checks(
        &self,
        _endpoint_addr: &EndpointAddr,
    ) -> Vec<Box<dyn RequestQoSContext>> {
        vec![
            self.probe_context(&self.config.health_method),
            self.probe_context(&self.config.chain_info_method),
        ]
    }

    fn apply_observations(&self, observations: &QoSObservations) -> Result<(), QoSError> {
        if observations.service_id != self.config.service_id {
            return Err(QoSError::ServiceMismatch {
                expected: self.config.service_id.clone(),
                got: observations.service_id.clone(),
            });
        }

        let updated = self.store.update_from_observations(&observations.endpoints);
        if !updated.is_empty() {
            self.state.update_from_endpoints(&updated);
        }
        Ok(())
    }

    fn selector(&self) -> &dyn EndpointSelector {
        &self.store
    }
}

/// Minimal inbound JSON-RPC envelope. Params are carried through untouched
/// inside the raw payload, so they are not modeled here.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: String,
}

/// Per-request context for [`ChainQoS`]. Covers organic requests, synthetic
/// probes, and rejected requests (which skip the relay entirely but still
/// yield a well-formed error body).
struct ChainRequestContext {
    config: Arc<ChainQoSConfig>,
    payload: RelayPayload,
    method: String,
    request_id: Value,
    rejection: Option<(i64, String)>,
    response: Option<Vec<u8>>,
    observations: Vec<QoSEndpointObservation>,
}

impl ChainRequestContext {
    fn rejected(
        config: Arc<ChainQoSConfig>,
        request_id: Value,
        code: i64,
        message: String,
    ) -> Self {
        Self {
            config,
            payload: RelayPayload::default(),
            method: String::new(),
            request_id,
            rejection: Some((code, message)),
            response: None,
            observations: Vec::new(),
        }
    }

    fn error_body(&self, code: i64, message: &str) -> Vec<u8> {
        json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "error": { "code": code, "message": message },
        })
        .to_string()
        .into_bytes()
    }

    /// Interprets one endpoint response body in light of the request method.
    /// Returns `None` for responses that carry no QoS-relevant signal.
    fn interpret(&self, response: &[u8]) -> Option<QoSObservationKind> {
        let Ok(body) = serde_json::from_slice::<Value>(response) else {
            return Some(QoSObservationKind::Malformed { observed_at: Utc::now() });
        };

        if self.method == self.config.health_method {
            let ok = body.get("result").and_then(Value::as_str) == Some("ok");
            return Some(QoSObservationKind::Health { ok });
        }

        if self.method == self.config.chain_info_method {
            let result = body.get("result")?;
            let height = result.get(&self.config.height_field).and_then(Value::as_u64);
            let epoch = result.get(&self.config.epoch_field).and_then(Value::as_u64);
            return match (height, epoch) {
                (Some(height), Some(epoch)) => {
                    Some(QoSObservationKind::ChainInfo(ChainInfoObservation { height, epoch }))
                }
                // A chain-info reply missing its mandatory fields is as bad
                // as unparseable bytes.
                _ => Some(QoSObservationKind::Malformed { observed_at: Utc::now() }),
            };
        }

        None
    }
}

impl RequestQoSContext for ChainRequestContext {
    fn payload(&self) -> RelayPayload {
        self.payload.clone()
    }

    fn update_with_response(&mut self, endpoint_addr: &EndpointAddr, response: &[u8]) {
        self.response = Some(response.to_vec());
        if let Some(kind) = self.interpret(response) {
            self.observations
                .push(QoSEndpointObservation { endpoint_addr: endpoint_addr.clone(), kind });
        }
    }

    fn final_response(&self) -> Vec<u8> {
        if let Some((code, message)) = &self.rejection {
            return self.error_body(*code, message);
        }
        match &self.response {
            Some(body) => body.clone(),
            None => self.error_body(JSONRPC_SERVER_ERROR, "no endpoint response received"),
        }
    }

    fn observations(&self) -> QoSObservations {
        QoSObservations {
            service_id: self.config.service_id.clone(),
            endpoints: self.observations.clone(),
        }
    }
}
