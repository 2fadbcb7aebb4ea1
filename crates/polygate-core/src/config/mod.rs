//! Gateway configuration surface.
//!
//! These structs are deserialized by an external loader and passed in at
//! construction time; nothing here reads files or global state. Every field
//! has a compiled default, and [`GatewayConfig::validate`] clamps out-of-range
//! values into a documented min/max window (with a warning per clamped field)
//! rather than failing startup for tuning mistakes. Validation errors are
//! reserved for structurally impossible input.

use crate::types::ServiceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Structurally invalid configuration that cannot be repaired by clamping.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The response-deadline margin must leave room for at least one send.
    #[error(
        "response deadline margin ({margin_ms}ms) must be smaller than the \
         parallel request timeout ({timeout_ms}ms)"
    )]
    MarginExceedsTimeout { margin_ms: u64, timeout_ms: u64 },
}

/// Relay orchestration settings: parallel fan-out and race deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Number of endpoints to race per request. `1` disables parallel mode.
    /// Clamped to `1..=10`. Defaults to `3`.
    #[serde(default = "default_max_parallel_requests")]
    pub max_parallel_requests: usize,

    /// Deadline for the inbound transport to receive a response, in
    /// milliseconds. Clamped to `1_000..=60_000`. Defaults to `10_000`.
    #[serde(default = "default_parallel_request_timeout_ms")]
    pub parallel_request_timeout_ms: u64,

    /// Safety margin subtracted from the transport deadline to form the race
    /// deadline, so a late race never blocks the outer response pipeline.
    /// Defaults to `500`.
    #[serde(default = "default_response_deadline_margin_ms")]
    pub response_deadline_margin_ms: u64,
}

fn default_max_parallel_requests() -> usize {
    3
}

fn default_parallel_request_timeout_ms() -> u64 {
    10_000
}

fn default_response_deadline_margin_ms() -> u64 {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: default_max_parallel_requests(),
            parallel_request_timeout_ms: default_parallel_request_timeout_ms(),
            response_deadline_margin_ms: default_response_deadline_margin_ms(),
        }
    }
}

impl RelayConfig {
    /// The deadline given to the inbound transport for writing a response.
    #[must_use]
    pub fn transport_deadline(&self) -> Duration {
        Duration::from_millis(self.parallel_request_timeout_ms)
    }

    /// The race deadline: strictly tighter than the transport deadline by the
    /// configured margin.
    #[must_use]
    pub fn race_deadline(&self) -> Duration {
        Duration::from_millis(
            self.parallel_request_timeout_ms
                .saturating_sub(self.response_deadline_margin_ms),
        )
    }
}

/// Background endpoint hydrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydratorConfig {
    /// Interval between hydrator passes, in seconds. Clamped to `5..=600`.
    /// Defaults to `30`.
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,

    /// Worker budget shared across all endpoint probes within one pass.
    /// Clamped to `1..=1_000`. Defaults to `100`.
    #[serde(default = "default_max_endpoint_check_workers")]
    pub max_endpoint_check_workers: usize,

    /// Every Nth pass additionally runs the more expensive session checks
    /// (e.g. verifying a long-lived connection can be established).
    /// Clamped to `1..=1_000`. Defaults to `10`.
    #[serde(default = "default_session_check_multiplier")]
    pub session_check_multiplier: u64,

    /// Services to exclude from hydration even when a QoS instance is
    /// configured for them.
    #[serde(default)]
    pub disabled_services: Vec<ServiceId>,
}

fn default_run_interval_secs() -> u64 {
    30
}

fn default_max_endpoint_check_workers() -> usize {
    100
}

fn default_session_check_multiplier() -> u64 {
    10
}

impl Default for HydratorConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: default_run_interval_secs(),
            max_endpoint_check_workers: default_max_endpoint_check_workers(),
            session_check_multiplier: default_session_check_multiplier(),
            disabled_services: Vec::new(),
        }
    }
}

impl HydratorConfig {
    #[must_use]
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }
}

/// Concurrency limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum simultaneous outbound relay sends, gateway-wide. Sized as a
    /// safety net rather than a routine throttle. Clamped to
    /// `1..=10_000_000`. Defaults to `1_000_000`.
    #[serde(default = "default_max_concurrent_relays")]
    pub max_concurrent_relays: usize,

    /// Maximum detached observation-broadcast tasks outstanding at once.
    /// Broadcasts past this bound are dropped with a warning rather than
    /// growing without limit under sustained load. Clamped to `1..=100_000`.
    /// Defaults to `10_000`.
    #[serde(default = "default_max_pending_observation_tasks")]
    pub max_pending_observation_tasks: usize,
}

fn default_max_concurrent_relays() -> usize {
    1_000_000
}

fn default_max_pending_observation_tasks() -> usize {
    10_000
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_relays: default_max_concurrent_relays(),
            max_pending_observation_tasks: default_max_pending_observation_tasks(),
        }
    }
}

/// Aggregated gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub hydrator: HydratorConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
}

impl GatewayConfig {
    /// Clamps every tunable into its documented range, warning per adjusted
    /// field, and rejects structurally impossible combinations.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the response-deadline margin leaves no room
    /// for any relay send.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.relay.max_parallel_requests =
            clamp_field("relay.max_parallel_requests", self.relay.max_parallel_requests, 1, 10);
        self.relay.parallel_request_timeout_ms = clamp_field(
            "relay.parallel_request_timeout_ms",
            self.relay.parallel_request_timeout_ms,
            1_000,
            60_000,
        );

        if self.relay.response_deadline_margin_ms >= self.relay.parallel_request_timeout_ms {
            return Err(ConfigError::MarginExceedsTimeout {
                margin_ms: self.relay.response_deadline_margin_ms,
                timeout_ms: self.relay.parallel_request_timeout_ms,
            });
        }

        self.hydrator.run_interval_secs =
            clamp_field("hydrator.run_interval_secs", self.hydrator.run_interval_secs, 5, 600);
        self.hydrator.max_endpoint_check_workers = clamp_field(
            "hydrator.max_endpoint_check_workers",
            self.hydrator.max_endpoint_check_workers,
            1,
            1_000,
        );
        self.hydrator.session_check_multiplier = clamp_field(
            "hydrator.session_check_multiplier",
            self.hydrator.session_check_multiplier,
            1,
            1_000,
        );

        self.limiter.max_concurrent_relays = clamp_field(
            "limiter.max_concurrent_relays",
            self.limiter.max_concurrent_relays,
            1,
            10_000_000,
        );
        self.limiter.max_pending_observation_tasks = clamp_field(
            "limiter.max_pending_observation_tasks",
            self.limiter.max_pending_observation_tasks,
            1,
            100_000,
        );

        Ok(self)
    }
}

fn clamp_field<T: Ord + Copy + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> T {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field = name, configured = %value, effective = %clamped, "config value out of range, clamped");
    }
    clamped
}
