//! # Polygate Core
//!
//! Core library for the Polygate protocol-agnostic blockchain RPC gateway.
//!
//! Polygate relays inbound RPC requests to backend endpoints and keeps a
//! quality picture of every endpoint it can reach, so each relay lands on a
//! node that is healthy and caught up with the chain. The crate provides:
//!
//! - **[`gateway`]**: The relay entry point. Parses requests through the
//!   service's QoS instance, selects endpoints, races the send across
//!   several of them (first success wins), and broadcasts observations on a
//!   detached, budgeted path.
//!
//! - **[`qos`]**: Per-service quality-of-service layer: endpoint stores,
//!   perceived chain state with monotonic height/epoch floors, validity
//!   filtering, and a bundled generic JSON-RPC chain family.
//!
//! - **[`hydrator`]**: Background prober that keeps the QoS stores warm with
//!   synthetic health and chain-info checks, independent of organic traffic.
//!
//! - **[`protocol`]**: The narrow trait seam behind which everything
//!   chain-network-specific lives (endpoint discovery, signing, transport).
//!
//! - **[`limiter`]**: Gateway-wide admission gate bounding simultaneous
//!   outbound relays.
//!
//! - **[`observation`]**: Immutable outcome records flowing from every relay
//!   attempt and probe back into the QoS and protocol layers.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐
//! │ QoS parsing  │ ─── Rejected ──► Well-formed error body
//! └──────┬───────┘
//!        │ Accepted
//!        ▼
//! ┌──────────────┐     ┌───────────────┐
//! │  Selection   │ ◄── │ EndpointStore │ ◄── Hydrator probes
//! └──────┬───────┘     └───────────────┘
//!        │ up to N endpoints
//!        ▼
//! ┌──────────────┐
//! │  Relay race  │ ─── first success ──► Response to client
//! └──────┬───────┘
//!        │ per-attempt outcomes
//!        ▼
//! ┌──────────────┐
//! │ Observations │ ──► QoS stores, protocol state, reporters
//! └──────────────┘
//! ```

pub mod config;
pub mod gateway;
pub mod hydrator;
pub mod limiter;
pub mod observation;
pub mod protocol;
pub mod qos;
pub mod types;

pub use config::{ConfigError, GatewayConfig, HydratorConfig, LimiterConfig, RelayConfig};
pub use gateway::{Gateway, GatewayBuilder, RelayError};
pub use hydrator::Hydrator;
pub use limiter::ConcurrencyLimiter;
pub use observation::{
    EndpointErrorClass, EndpointObservation, ObservationOutcome, Reporter, RequestObservations,
    Sanction,
};
pub use protocol::{Protocol, ProtocolContext, ProtocolError};
pub use qos::{
    ChainQoS, ChainQoSConfig, EndpointSelector, EndpointStore, ParsedRequest, QoSService,
    RequestQoSContext, ServiceState,
};
pub use types::{EndpointAddr, RelayPayload, RelayResponse, RequestOrigin, ServiceId};
