//! Gateway core: ties QoS services, the protocol layer, and the concurrency
//! limiter together behind one relay entry point.
//!
//! The gateway owns no protocol- or chain-specific behavior. Transports call
//! [`Gateway::handle_relay`]; the hydrator drives the same machinery through
//! its probe path. Observation broadcast is detached from the response path
//! and bounded by a task budget.

mod context;
mod race;

pub(crate) use context::RequestContext;

use crate::{
    config::{ConfigError, GatewayConfig, HydratorConfig, RelayConfig},
    limiter::ConcurrencyLimiter,
    observation::{
        GatewayObservations, ProtocolObservations, Reporter, RequestErrorKind, RequestObservations,
    },
    protocol::{Protocol, ProtocolError},
    qos::{QoSObservations, QoSService, RequestQoSContext},
    types::{EndpointAddr, RequestOrigin, ServiceId},
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Relay-path failures surfaced to the transport.
///
/// Only failures that occur before a QoS context exists (or that must
/// preempt a response entirely, like capacity exhaustion) reach the
/// transport as errors; everything downstream produces a well-formed error
/// body instead.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The target service id has no registered QoS instance.
    #[error("no QoS instance registered for service {0}")]
    UnknownService(ServiceId),

    /// No endpoint could be selected or no protocol context could be built.
    #[error("no protocol context available for service {service_id}")]
    NoProtocolContext {
        service_id: ServiceId,
        #[source]
        source: Option<ProtocolError>,
    },

    /// The concurrency limiter refused admission within the deadline.
    #[error("relay capacity exhausted")]
    CapacityExhausted,

    /// The race deadline elapsed before any endpoint succeeded.
    #[error("race deadline elapsed with {completed} of {total} attempts resolved")]
    Timeout { completed: usize, total: usize, last_error: Option<String> },

    /// Every racing endpoint attempt resolved with a failure.
    #[error("all {total} relay attempts failed")]
    AllFailed {
        total: usize,
        #[source]
        last_error: ProtocolError,
    },
}

/// Builder for [`Gateway`]. The protocol layer is mandatory; services and
/// reporters are registered explicitly, never discovered through globals.
pub struct GatewayBuilder {
    config: GatewayConfig,
    protocol: Arc<dyn Protocol>,
    services: HashMap<ServiceId, Arc<dyn QoSService>>,
    reporters: Vec<Arc<dyn Reporter>>,
}

impl GatewayBuilder {
    #[must_use]
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        Self {
            config: GatewayConfig::default(),
            protocol,
            services: HashMap::new(),
            reporters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the QoS instance serving `service_id`. Re-registering a
    /// service id replaces the previous instance.
    #[must_use]
    pub fn register_service(
        mut self,
        service_id: ServiceId,
        service_qos: Arc<dyn QoSService>,
    ) -> Self {
        self.services.insert(service_id, service_qos);
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Validates the configuration and assembles the gateway.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for structurally invalid configuration.
    pub fn build(self) -> Result<Gateway, ConfigError> {
        let config = self.config.validate()?;
        info!(
            services = self.services.len(),
            reporters = self.reporters.len(),
            max_parallel_requests = config.relay.max_parallel_requests,
            max_concurrent_relays = config.limiter.max_concurrent_relays,
            "gateway assembled"
        );

        Ok(Gateway {
            relay_config: ArcSwap::from_pointee(config.relay),
            hydrator_config: config.hydrator,
            limiter: Arc::new(ConcurrencyLimiter::new(config.limiter.max_concurrent_relays)),
            observation_tasks: Arc::new(Semaphore::new(config.limiter.max_pending_observation_tasks)),
            protocol: self.protocol,
            services: self.services,
            reporters: self.reporters,
        })
    }
}

/// The protocol-agnostic relay gateway.
pub struct Gateway {
    relay_config: ArcSwap<RelayConfig>,
    hydrator_config: HydratorConfig,
    protocol: Arc<dyn Protocol>,
    services: HashMap<ServiceId, Arc<dyn QoSService>>,
    reporters: Vec<Arc<dyn Reporter>>,
    limiter: Arc<ConcurrencyLimiter>,
    /// Budget for detached observation-broadcast tasks.
    observation_tasks: Arc<Semaphore>,
}

impl Gateway {
    /// Handles one inbound relay end to end: QoS parsing, endpoint
    /// selection, the (possibly racing) send, and detached observation
    /// broadcast.
    ///
    /// Returns the response body to write to the user. Relay failures past
    /// QoS parsing still yield `Ok` with a well-formed error body.
    ///
    /// # Errors
    /// - [`RelayError::UnknownService`] when no QoS instance serves the id.
    /// - [`RelayError::CapacityExhausted`] when the limiter refuses
    ///   admission; the transport chooses the representation.
    pub async fn handle_relay(
        &self,
        service_id: &ServiceId,
        raw_payload: &[u8],
        origin: RequestOrigin,
    ) -> Result<Vec<u8>, RelayError> {
        let Some(service_qos) = self.services.get(service_id) else {
            warn!(service_id = %service_id, "relay for unknown service");
            self.broadcast_unknown_service(service_id, origin);
            return Err(RelayError::UnknownService(service_id.clone()));
        };

        let parsed = service_qos.parse_request(raw_payload);
        let accepted = parsed.is_accepted();
        let mut ctx = RequestContext::new(
            service_id.clone(),
            origin,
            self.relay_config.load_full(),
            Arc::clone(service_qos),
            parsed.into_context(),
        );

        if !accepted {
            debug!(service_id = %service_id, "request rejected during QoS parsing");
            ctx.record_rejection();
            let response = ctx.final_response();
            self.broadcast(Some(Arc::clone(service_qos)), ctx.into_observations());
            return Ok(response);
        }

        match ctx.relay(self.protocol.as_ref(), &self.limiter).await {
            Ok(()) => {}
            Err(RelayError::CapacityExhausted) => {
                self.broadcast(Some(Arc::clone(service_qos)), ctx.into_observations());
                return Err(RelayError::CapacityExhausted);
            }
            Err(err) => {
                warn!(service_id = %service_id, error = %err, "relay failed, returning error body");
            }
        }

        let response = ctx.final_response();
        self.broadcast(Some(Arc::clone(service_qos)), ctx.into_observations());
        Ok(response)
    }

    /// Runs one hydrator probe against a pinned endpoint. Probe outcomes
    /// travel the same observation path as organic traffic.
    pub(crate) async fn run_probe(
        &self,
        service_id: &ServiceId,
        service_qos: &Arc<dyn QoSService>,
        endpoint_addr: &EndpointAddr,
        qos_ctx: Box<dyn RequestQoSContext>,
    ) {
        let mut ctx = RequestContext::new(
            service_id.clone(),
            RequestOrigin::Synthetic,
            self.relay_config.load_full(),
            Arc::clone(service_qos),
            qos_ctx,
        )
        .with_pinned_endpoint(endpoint_addr.clone());

        if let Err(err) = ctx.relay(self.protocol.as_ref(), &self.limiter).await {
            debug!(
                service_id = %service_id,
                endpoint_addr = %endpoint_addr,
                error = %err,
                "endpoint probe failed"
            );
        }
        self.broadcast(Some(Arc::clone(service_qos)), ctx.into_observations());
    }

    /// Swaps the relay tuning without restarting; in-flight requests keep
    /// the snapshot they started with.
    pub fn update_relay_config(&self, relay_config: RelayConfig) {
        self.relay_config.store(Arc::new(relay_config));
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub(crate) fn services(&self) -> &HashMap<ServiceId, Arc<dyn QoSService>> {
        &self.services
    }

    pub(crate) fn hydrator_config(&self) -> &HydratorConfig {
        &self.hydrator_config
    }

    fn broadcast_unknown_service(&self, service_id: &ServiceId, origin: RequestOrigin) {
        let mut gateway = GatewayObservations::new(origin);
        gateway.service_id = Some(service_id.clone());
        gateway.record_error(RequestErrorKind::UnknownService);
        gateway.mark_completed();
        self.broadcast(None, RequestObservations {
            gateway,
            protocol: ProtocolObservations::default(),
            qos: QoSObservations::empty(service_id.clone()),
        });
    }

    /// Detaches observation processing from the response path: applies the
    /// bundle to the protocol and QoS layers and publishes it to every
    /// reporter, inside a budgeted background task. When the budget is
    /// exhausted the bundle is dropped with a warning rather than delaying
    /// responses or growing an unbounded task backlog.
    fn broadcast(
        &self,
        service_qos: Option<Arc<dyn QoSService>>,
        observations: RequestObservations,
    ) {
        let Ok(permit) = Arc::clone(&self.observation_tasks).try_acquire_owned() else {
            warn!("observation task budget exhausted, dropping observation bundle");
            return;
        };

        let protocol = Arc::clone(&self.protocol);
        let reporters = self.reporters.clone();
        tokio::spawn(async move {
            let _permit = permit;

            if !observations.protocol.is_empty() {
                protocol.apply_observations(&observations.protocol);
            }
            if let Some(service_qos) = service_qos {
                if !observations.qos.is_empty() {
                    if let Err(err) = service_qos.apply_observations(&observations.qos) {
                        warn!(error = %err, "dropping mismatched QoS observations");
                    }
                }
            }
            for reporter in &reporters {
                reporter.publish(&observations);
            }
        });
    }
}
