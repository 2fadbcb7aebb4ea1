//! Quality-of-service layer: request parsing, endpoint selection, and the
//! per-service stores that turn raw endpoint responses into validity
//! judgments.
//!
//! The gateway consumes this layer through three seams:
//!
//! - [`QoSService`]: one instance per (service, chain family). Parses organic
//!   requests, supplies the probe templates the hydrator needs, and folds
//!   observation bundles back into its stores.
//! - [`RequestQoSContext`]: the per-request parsing/selection context.
//! - [`EndpointSelector`]: answers "pick one/many usable endpoints".
//!
//! The bundled generic JSON-RPC family lives in [`service`]; its internals
//! are the [`store::EndpointStore`] and [`state::ServiceState`] pair.

pub mod endpoint;
pub mod service;
pub mod state;
pub mod store;

pub use endpoint::{ChainInfoObservation, EndpointRecord, EndpointValidationError};
pub use service::{ChainQoS, ChainQoSConfig};
pub use state::ServiceState;
pub use store::EndpointStore;

use crate::types::{EndpointAddr, RelayPayload, ServiceId};
use thiserror::Error;

/// Endpoint selection failures.
///
/// Selection fails only when there is nothing to select from; all-stale
/// candidate sets fail open instead (see [`store::EndpointStore`]).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("received an empty list of endpoints to select from")]
    NoEndpoints,
}

/// QoS-level errors surfaced when folding observations back into a service.
#[derive(Debug, Error)]
pub enum QoSError {
    #[error("observations for service {got} delivered to the QoS instance for {expected}")]
    ServiceMismatch { expected: ServiceId, got: ServiceId },
}

/// One QoS-level fact extracted from one endpoint's response.
#[derive(Debug, Clone)]
pub struct QoSEndpointObservation {
    pub endpoint_addr: EndpointAddr,
    pub kind: QoSObservationKind,
}

/// The family-specific result fields parsed out of an endpoint response.
#[derive(Debug, Clone)]
pub enum QoSObservationKind {
    /// Result of a health probe.
    Health { ok: bool },
    /// Result of a chain-info probe.
    ChainInfo(ChainInfoObservation),
    /// The endpoint returned bytes that could not be interpreted.
    Malformed { observed_at: chrono::DateTime<chrono::Utc> },
}

/// QoS-level observation bundle for one request or probe.
#[derive(Debug, Clone)]
pub struct QoSObservations {
    pub service_id: ServiceId,
    pub endpoints: Vec<QoSEndpointObservation>,
}

impl QoSObservations {
    #[must_use]
    pub fn empty(service_id: ServiceId) -> Self {
        Self { service_id, endpoints: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Picks usable endpoints from the protocol's available list.
pub trait EndpointSelector: Send + Sync {
    /// Selects one endpoint.
    ///
    /// # Errors
    /// Fails only when `available` is empty.
    fn select(&self, available: &[EndpointAddr]) -> Result<EndpointAddr, SelectionError>;

    /// Selects up to `count` distinct endpoints for parallel racing.
    ///
    /// # Errors
    /// Fails only when `available` is empty.
    fn select_multiple(
        &self,
        available: &[EndpointAddr],
        count: usize,
    ) -> Result<Vec<EndpointAddr>, SelectionError>;
}

/// Per-request QoS parsing/selection context.
///
/// Built once per inbound request or probe, updated with the winning
/// endpoint's response, and drained for observations after the response is
/// written. Not shared across requests.
pub trait RequestQoSContext: Send {
    /// The payload to transmit to an endpoint for this request.
    fn payload(&self) -> RelayPayload;

    /// Feeds one endpoint's serialized response into the context.
    fn update_with_response(&mut self, endpoint_addr: &EndpointAddr, response: &[u8]);

    /// The user-facing response body. Always well-formed: the endpoint's
    /// response when one was received, a generic failure otherwise.
    fn final_response(&self) -> Vec<u8>;

    /// QoS-level observations accumulated by this context.
    fn observations(&self) -> QoSObservations;
}

/// Outcome of parsing an inbound request payload.
pub enum ParsedRequest {
    /// The payload is serviceable; the context carries it forward.
    Accepted(Box<dyn RequestQoSContext>),
    /// The payload was rejected; the context still yields a well-formed
    /// error response for the caller.
    Rejected(Box<dyn RequestQoSContext>),
}

impl ParsedRequest {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    #[must_use]
    pub fn into_context(self) -> Box<dyn RequestQoSContext> {
        match self {
            Self::Accepted(ctx) | Self::Rejected(ctx) => ctx,
        }
    }
}

/// One service's QoS implementation, consumed by the gateway and hydrator.
pub trait QoSService: Send + Sync {
    /// Parses an inbound raw payload into a request context.
    fn parse_request(&self, raw: &[u8]) -> ParsedRequest;

    /// The synthetic probe contexts required to validate an endpoint.
    fn required_quality_checks(&self, endpoint_addr: &EndpointAddr)
        -> Vec<Box<dyn RequestQoSContext>>;

    /// Additional expensive checks run on a much longer cycle (e.g.
    /// verifying a long-lived connection can be established). Empty by
    /// default.
    fn required_session_checks(
        &self,
        _endpoint_addr: &EndpointAddr,
    ) -> Vec<Box<dyn RequestQoSContext>> {
        Vec::new()
    }

    /// Folds a QoS observation bundle into the service's stores.
    ///
    /// # Errors
    /// Returns [`QoSError`] if the bundle belongs to a different service.
    fn apply_observations(&self, observations: &QoSObservations) -> Result<(), QoSError>;

    /// The selector backing endpoint choice for this service.
    fn selector(&self) -> &dyn EndpointSelector;
}
