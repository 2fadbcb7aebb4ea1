//! The narrow interface through which the gateway consumes a wire protocol.
//!
//! A [`Protocol`] implementation owns everything chain- and network-specific:
//! session/assignment discovery, relay signing, and transmission. The gateway
//! core only ever asks it for the currently available endpoints of a service,
//! for a send-context pinned to one endpoint, and to fold protocol-level
//! observations (including recommended sanctions) back into its own state.

use crate::{
    observation::{EndpointErrorClass, ProtocolObservations},
    types::{EndpointAddr, RelayPayload, RelayResponse, ServiceId},
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a protocol implementation.
///
/// Send-scoped variants are transient and address-scoped: they are recorded
/// as observations and never surfaced raw to the end user.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No endpoints are currently available for the service.
    #[error("no endpoints available for service {0}")]
    NoEndpoints(ServiceId),

    /// A send-context could not be constructed for the endpoint.
    #[error("failed to build request context for endpoint {endpoint}: {reason}")]
    ContextSetup { endpoint: EndpointAddr, reason: String },

    /// The relay send failed at the network level.
    #[error("relay to endpoint {endpoint} failed: {reason}")]
    Send { endpoint: EndpointAddr, reason: String },

    /// The relay send exceeded its deadline.
    #[error("relay to endpoint {endpoint} timed out")]
    Timeout { endpoint: EndpointAddr },

    /// The endpoint responded, but with a payload the protocol rejected.
    #[error("endpoint {endpoint} returned a malformed response: {reason}")]
    MalformedResponse { endpoint: EndpointAddr, reason: String },
}

impl ProtocolError {
    /// Maps this error onto the observation error taxonomy.
    #[must_use]
    pub fn classification(&self) -> EndpointErrorClass {
        match self {
            Self::Timeout { .. } => EndpointErrorClass::Timeout,
            Self::Send { .. } => EndpointErrorClass::Connection,
            Self::MalformedResponse { .. } => EndpointErrorClass::MalformedResponse,
            Self::NoEndpoints(_) | Self::ContextSetup { .. } => EndpointErrorClass::Internal,
        }
    }
}

/// A send-context pinned to one endpoint for one relay.
///
/// Contexts are single-purpose: one is built per relay attempt (and per
/// hydrator probe), never shared across concurrent sends.
#[async_trait]
pub trait ProtocolContext: Send + Sync {
    /// Transmits the payload to the pinned endpoint and returns its response.
    async fn send(&self, payload: &RelayPayload) -> Result<RelayResponse, ProtocolError>;

    /// Protocol-level observations accumulated by this context so far.
    fn observations(&self) -> ProtocolObservations;
}

/// A wire-protocol implementation consumed by the gateway and the hydrator.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Lists the endpoints currently able to serve the given service.
    async fn available_endpoints(
        &self,
        service_id: &ServiceId,
    ) -> Result<Vec<EndpointAddr>, ProtocolError>;

    /// Builds a fresh send-context pinned to the given endpoint.
    async fn build_request_context(
        &self,
        service_id: &ServiceId,
        endpoint_addr: &EndpointAddr,
    ) -> Result<Box<dyn ProtocolContext>, ProtocolError>;

    /// Folds protocol-level observations (including recommended sanctions)
    /// back into the protocol's own endpoint state.
    fn apply_observations(&self, observations: &ProtocolObservations);
}
