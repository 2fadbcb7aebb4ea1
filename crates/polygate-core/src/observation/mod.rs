//! Immutable outcome records produced while handling relays and probes.
//!
//! Every relay attempt, winning or losing, and every hydrator probe produces
//! an [`EndpointObservation`]. Observations are folded back into the QoS
//! stores after the response has been written, and the combined
//! [`RequestObservations`] bundle is handed to any configured [`Reporter`]s.

use crate::types::{EndpointAddr, RequestOrigin, ServiceId};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Classification of an endpoint-scoped failure.
///
/// Different classes feed different handling downstream: transient classes
/// keep the endpoint selectable, while sanction-worthy classes recommend a
/// quarantine to the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointErrorClass {
    /// The send exceeded its deadline.
    Timeout,
    /// The endpoint could not be reached.
    Connection,
    /// The endpoint responded with bytes the QoS layer could not interpret.
    MalformedResponse,
    /// The endpoint actively refused the relay.
    Rejected,
    /// Setup or bookkeeping failure on our side of the exchange.
    Internal,
}

impl EndpointErrorClass {
    /// Transient failures can be retried on another endpoint immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }

    /// Whether this failure should carry a recommended sanction.
    #[must_use]
    pub fn should_sanction(&self) -> bool {
        matches!(self, Self::MalformedResponse | Self::Rejected)
    }

    /// Static string form for logging and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::MalformedResponse => "malformed_response",
            Self::Rejected => "rejected",
            Self::Internal => "internal",
        }
    }
}

/// Recommended penalty attached to an endpoint following a bad observation.
///
/// The protocol layer decides whether and how to enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanction {
    /// Avoid the endpoint until the current session/assignment rolls over.
    QuarantineSession,
    /// Avoid the endpoint until the next hydrator interval.
    QuarantineInterval,
}

impl Sanction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuarantineSession => "quarantine_session",
            Self::QuarantineInterval => "quarantine_interval",
        }
    }
}

/// Outcome of one relay or probe against one endpoint.
#[derive(Debug, Clone)]
pub enum ObservationOutcome {
    Success {
        response_size: usize,
    },
    Failure {
        class: EndpointErrorClass,
        sanction: Option<Sanction>,
    },
}

/// Snapshot of the outcome of one relay or probe: which endpoint, how long it
/// took, and how it went. Consumed exactly once by the stores.
#[derive(Debug, Clone)]
pub struct EndpointObservation {
    pub endpoint_addr: EndpointAddr,
    pub latency: Duration,
    pub outcome: ObservationOutcome,
    pub observed_at: DateTime<Utc>,
}

impl EndpointObservation {
    #[must_use]
    pub fn success(endpoint_addr: EndpointAddr, latency: Duration, response_size: usize) -> Self {
        Self {
            endpoint_addr,
            latency,
            outcome: ObservationOutcome::Success { response_size },
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failure(
        endpoint_addr: EndpointAddr,
        latency: Duration,
        class: EndpointErrorClass,
    ) -> Self {
        let sanction = class.should_sanction().then_some(Sanction::QuarantineInterval);
        Self {
            endpoint_addr,
            latency,
            outcome: ObservationOutcome::Failure { class, sanction },
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ObservationOutcome::Success { .. })
    }
}

/// Gateway-level request error kinds, surfaced in observations only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// The target service id did not resolve to a configured QoS instance.
    UnknownService,
    /// The QoS layer could not parse the request payload.
    RejectedByQoS,
    /// No protocol context could be built for any endpoint.
    NoProtocolContext,
}

impl RequestErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownService => "unknown_service",
            Self::RejectedByQoS => "rejected_by_qos",
            Self::NoProtocolContext => "no_protocol_context",
        }
    }
}

/// Gateway-level facts about one handled request.
#[derive(Debug, Clone)]
pub struct GatewayObservations {
    pub service_id: Option<ServiceId>,
    pub origin: RequestOrigin,
    pub request_error: Option<RequestErrorKind>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response_size: usize,
}

impl GatewayObservations {
    #[must_use]
    pub fn new(origin: RequestOrigin) -> Self {
        Self {
            service_id: None,
            origin,
            request_error: None,
            completed_at: None,
            response_size: 0,
        }
    }

    /// Records a request error, keeping the first one seen.
    pub fn record_error(&mut self, kind: RequestErrorKind) {
        if self.request_error.is_none() {
            self.request_error = Some(kind);
        }
    }

    /// Stamps the completion time. Idempotent; first stamp wins.
    pub fn mark_completed(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Protocol-level observation bundle: the per-endpoint outcomes gathered from
/// every relay attempt made for one request or probe.
#[derive(Debug, Clone, Default)]
pub struct ProtocolObservations {
    pub endpoints: Vec<EndpointObservation>,
}

impl ProtocolObservations {
    pub fn merge(&mut self, other: ProtocolObservations) {
        self.endpoints.extend(other.endpoints);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// The combined observation bundle for one completed request or probe.
#[derive(Debug, Clone)]
pub struct RequestObservations {
    pub gateway: GatewayObservations,
    pub protocol: ProtocolObservations,
    pub qos: crate::qos::QoSObservations,
}

/// Sink for completed request/probe observations (metrics, data pipeline).
///
/// Fire-and-forget: at most one call per completed request/probe, no
/// acknowledgement or retry contract. Implementations must not block.
pub trait Reporter: Send + Sync {
    fn publish(&self, observations: &RequestObservations);
}
