//! Core identifier and relay payload types shared across the gateway.
//!
//! [`ServiceId`] and [`EndpointAddr`] are opaque, cheap-to-clone newtypes over
//! `Arc<str>`: they are used as map keys on the hot path and cloned into every
//! observation, so reference-counted storage avoids per-request allocations.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Opaque identifier of a target chain/service (e.g. "eth", "solana").
///
/// Used as the sharding key for all per-service state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque identifier of one candidate backend node.
///
/// May embed a URL. Stable for the lifetime of a session/assignment and never
/// reused across unrelated nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddr(Arc<str>);

impl EndpointAddr {
    #[must_use]
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self(Arc::from(addr.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointAddr {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The payload transmitted to an endpoint on behalf of one relay.
#[derive(Debug, Clone, Default)]
pub struct RelayPayload {
    /// Raw bytes forwarded to the endpoint.
    pub data: Vec<u8>,
    /// Logical method name, when known. Used for logging and probe routing.
    pub method: Option<String>,
}

impl RelayPayload {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, method: None }
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// The response returned by an endpoint for one relay.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    /// Address of the endpoint that produced this response.
    pub endpoint_addr: EndpointAddr,
    /// Serialized response body.
    pub payload: Vec<u8>,
    /// Transport-level status code reported by the endpoint.
    pub status: u16,
}

/// Distinguishes user traffic from hydrator-generated probes in observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// Request originated from an end user.
    Organic,
    /// Request generated internally by the endpoint hydrator.
    Synthetic,
}

impl RequestOrigin {
    /// Static string form for logging and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::Synthetic => "synthetic",
        }
    }
}
