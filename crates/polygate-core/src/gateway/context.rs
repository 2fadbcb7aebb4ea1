//! Per-request relay orchestration, shared by organic traffic and hydrator
//! probes.

use super::{race::race_relays, RelayError};
use crate::{
    config::RelayConfig,
    limiter::ConcurrencyLimiter,
    observation::{
        EndpointObservation, GatewayObservations, ProtocolObservations, RequestErrorKind,
        RequestObservations,
    },
    protocol::{Protocol, ProtocolContext},
    qos::{QoSService, RequestQoSContext},
    types::{EndpointAddr, RequestOrigin, ServiceId},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Drives one relay (or probe) from endpoint selection through response to
/// observation collection.
///
/// Single-use: built per request, consumed by
/// [`into_observations`](Self::into_observations) once the response has
/// been taken.
pub(crate) struct RequestContext {
    service_id: ServiceId,
    relay_config: Arc<RelayConfig>,
    service_qos: Arc<dyn QoSService>,
    qos_ctx: Box<dyn RequestQoSContext>,
    /// Probes target one known endpoint and skip selection entirely.
    pinned_endpoint: Option<EndpointAddr>,
    gateway_observations: GatewayObservations,
    protocol_observations: ProtocolObservations,
}

impl RequestContext {
    pub(crate) fn new(
        service_id: ServiceId,
        origin: RequestOrigin,
        relay_config: Arc<RelayConfig>,
        service_qos: Arc<dyn QoSService>,
        qos_ctx: Box<dyn RequestQoSContext>,
    ) -> Self {
        let mut gateway_observations = GatewayObservations::new(origin);
        gateway_observations.service_id = Some(service_id.clone());
        Self {
            service_id,
            relay_config,
            service_qos,
            qos_ctx,
            pinned_endpoint: None,
            gateway_observations,
            protocol_observations: ProtocolObservations::default(),
        }
    }

    pub(crate) fn with_pinned_endpoint(mut self, endpoint_addr: EndpointAddr) -> Self {
        self.pinned_endpoint = Some(endpoint_addr);
        self
    }

    /// Marks the request as rejected during QoS parsing. The context still
    /// yields a well-formed error body via
    /// [`final_response`](Self::final_response).
    pub(crate) fn record_rejection(&mut self) {
        self.gateway_observations.record_error(RequestErrorKind::RejectedByQoS);
        self.gateway_observations.mark_completed();
    }

    /// Selects endpoints, builds protocol contexts, and races the payload.
    ///
    /// On success the winning response has been fed into the QoS context; on
    /// failure the QoS context is untouched and will produce a generic error
    /// body. Either way the accumulated observations are complete once this
    /// returns.
    pub(crate) async fn relay(
        &mut self,
        protocol: &dyn Protocol,
        limiter: &ConcurrencyLimiter,
    ) -> Result<(), RelayError> {
        let result = self.relay_inner(protocol, limiter).await;
        self.gateway_observations.mark_completed();
        result
    }

    async fn relay_inner(
        &mut self,
        protocol: &dyn Protocol,
        limiter: &ConcurrencyLimiter,
    ) -> Result<(), RelayError> {
        let targets = self.select_targets(protocol).await?;
        let contexts = self.build_contexts(protocol, targets).await?;

        let transport_deadline = self.relay_config.transport_deadline();
        let admission_started = Instant::now();
        if !limiter.acquire(transport_deadline).await {
            warn!(service_id = %self.service_id, "relay capacity exhausted");
            return Err(RelayError::CapacityExhausted);
        }

        // A multi-endpoint race runs against the tighter deadline so its
        // resolution always fits inside the transport deadline. Time spent
        // waiting on admission counts against that same budget.
        let deadline = if contexts.len() > 1 {
            self.relay_config.race_deadline()
        } else {
            transport_deadline
        };
        let deadline = deadline.saturating_sub(admission_started.elapsed());

        let result = race_relays(
            contexts,
            &self.qos_ctx.payload(),
            deadline,
            &mut self.protocol_observations,
        )
        .await;
        limiter.release();

        let response = result?;
        self.gateway_observations.response_size = response.payload.len();
        self.qos_ctx.update_with_response(&response.endpoint_addr, &response.payload);
        Ok(())
    }

    async fn select_targets(
        &mut self,
        protocol: &dyn Protocol,
    ) -> Result<Vec<EndpointAddr>, RelayError> {
        if let Some(pinned) = &self.pinned_endpoint {
            return Ok(vec![pinned.clone()]);
        }

        let available = match protocol.available_endpoints(&self.service_id).await {
            Ok(available) => available,
            Err(err) => {
                self.gateway_observations.record_error(RequestErrorKind::NoProtocolContext);
                return Err(RelayError::NoProtocolContext {
                    service_id: self.service_id.clone(),
                    source: Some(err),
                });
            }
        };

        let selector = self.service_qos.selector();
        let selected = if self.relay_config.max_parallel_requests > 1 {
            selector.select_multiple(&available, self.relay_config.max_parallel_requests)
        } else {
            selector.select(&available).map(|addr| vec![addr])
        };

        selected.map_err(|_| {
            self.gateway_observations.record_error(RequestErrorKind::NoProtocolContext);
            RelayError::NoProtocolContext { service_id: self.service_id.clone(), source: None }
        })
    }

    async fn build_contexts(
        &mut self,
        protocol: &dyn Protocol,
        targets: Vec<EndpointAddr>,
    ) -> Result<Vec<(EndpointAddr, Box<dyn ProtocolContext>)>, RelayError> {
        let mut contexts = Vec::with_capacity(targets.len());
        let mut last_error = None;

        for endpoint_addr in targets {
            match protocol.build_request_context(&self.service_id, &endpoint_addr).await {
                Ok(context) => contexts.push((endpoint_addr, context)),
                Err(err) => {
                    debug!(
                        service_id = %self.service_id,
                        endpoint_addr = %endpoint_addr,
                        error = %err,
                        "failed to build protocol context, skipping endpoint"
                    );
                    self.protocol_observations.endpoints.push(EndpointObservation::failure(
                        endpoint_addr,
                        Duration::ZERO,
                        err.classification(),
                    ));
                    last_error = Some(err);
                }
            }
        }

        if contexts.is_empty() {
            self.gateway_observations.record_error(RequestErrorKind::NoProtocolContext);
            return Err(RelayError::NoProtocolContext {
                service_id: self.service_id.clone(),
                source: last_error,
            });
        }
        Ok(contexts)
    }

    /// The user-facing response body. Always well-formed.
    pub(crate) fn final_response(&self) -> Vec<u8> {
        self.qos_ctx.final_response()
    }

    pub(crate) fn into_observations(self) -> RequestObservations {
        RequestObservations {
            gateway: self.gateway_observations,
            protocol: self.protocol_observations,
            qos: self.qos_ctx.observations(),
        }
    }
}
