//! Background endpoint hydrator: keeps QoS stores warm with synthetic probes
//! so selection quality does not depend on organic traffic volume.

use crate::{
    gateway::Gateway,
    qos::QoSService,
    types::ServiceId,
};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{broadcast, Semaphore},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

/// Periodically probes every endpoint of every registered service through
/// the gateway's own relay machinery, so probe outcomes flow through the
/// same observation path as organic traffic.
///
/// Services are hydrated sequentially; endpoints within a service run
/// concurrently under a per-pass worker budget. Expensive session checks
/// join the pass every `session_check_multiplier`th run.
pub struct Hydrator {
    gateway: Arc<Gateway>,
    pass_count: AtomicU64,
    healthy: AtomicBool,
    service_health: DashMap<ServiceId, bool>,
}

impl Hydrator {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            pass_count: AtomicU64::new(0),
            // Healthy until a pass fails.
            healthy: AtomicBool::new(true),
            service_health: DashMap::new(),
        }
    }

    /// Spawns the hydration loop. The first pass starts immediately;
    /// subsequent passes follow the configured interval. The loop exits when
    /// the shutdown channel yields (or closes).
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let hydrator = self;
        tokio::spawn(async move {
            let config = hydrator.gateway.hydrator_config();
            info!(
                interval_secs = config.run_interval_secs,
                workers = config.max_endpoint_check_workers,
                "endpoint hydrator started"
            );

            let mut interval = tokio::time::interval(config.run_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("endpoint hydrator shutting down");
                        return;
                    }
                    _ = interval.tick() => {
                        hydrator.run_pass().await;
                    }
                }
            }
        })
    }

    /// Whether the most recent pass hydrated every enabled service without a
    /// discovery failure. `true` before the first pass completes.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Per-service health from the most recent pass that covered it.
    #[must_use]
    pub fn service_healthy(&self, service_id: &ServiceId) -> Option<bool> {
        self.service_health.get(service_id).map(|entry| *entry)
    }

    /// Number of completed hydration passes.
    #[must_use]
    pub fn completed_passes(&self) -> u64 {
        self.pass_count.load(Ordering::Acquire)
    }

    /// One full hydration pass over every enabled service.
    pub async fn run_pass(&self) {
        let config = self.gateway.hydrator_config();
        let pass = self.pass_count.load(Ordering::Acquire) + 1;
        let include_session_checks = pass % config.session_check_multiplier == 0;
        let workers = Arc::new(Semaphore::new(config.max_endpoint_check_workers));

        debug!(pass, include_session_checks, "hydration pass starting");

        let mut all_healthy = true;
        for (service_id, service_qos) in self.gateway.services() {
            if config.disabled_services.contains(service_id) {
                debug!(service_id = %service_id, "service disabled for hydration, skipping");
                continue;
            }

            let healthy = self
                .hydrate_service(service_id, service_qos, include_session_checks, &workers)
                .await;
            self.service_health.insert(service_id.clone(), healthy);
            all_healthy &= healthy;
        }

        self.healthy.store(all_healthy, Ordering::Release);
        self.pass_count.store(pass, Ordering::Release);
        debug!(pass, all_healthy, "hydration pass finished");
    }

    /// Hydrates one service. Returns `false` only when endpoint discovery
    /// fails; an empty endpoint list is a healthy skip, since a service with
    /// nothing assigned has nothing to probe.
    async fn hydrate_service(
        &self,
        service_id: &ServiceId,
        service_qos: &Arc<dyn QoSService>,
        include_session_checks: bool,
        workers: &Arc<Semaphore>,
    ) -> bool {
        let available = match self.gateway.protocol().available_endpoints(service_id).await {
            Ok(available) => available,
            Err(err) => {
                warn!(
                    service_id = %service_id,
                    error = %err,
                    "endpoint discovery failed, marking service unhealthy"
                );
                return false;
            }
        };

        if available.is_empty() {
            debug!(service_id = %service_id, "no endpoints to hydrate, skipping service");
            return true;
        }

        info!(
            service_id = %service_id,
            endpoints = available.len(),
            "hydrating service endpoints"
        );

        let mut probes = Vec::new();
        for endpoint_addr in available {
            let mut checks = service_qos.required_quality_checks(&endpoint_addr);
            if include_session_checks {
                checks.extend(service_qos.required_session_checks(&endpoint_addr));
            }

            for qos_ctx in checks {
                // Acquiring inside the loop backpressures probe spawning to
                // the worker budget.
                let Ok(permit) = Arc::clone(workers).acquire_owned().await else {
                    // The semaphore lives for the whole pass and is never
                    // closed.
                    continue;
                };

                let gateway = Arc::clone(&self.gateway);
                let service_id = service_id.clone();
                let service_qos = Arc::clone(service_qos);
                let endpoint_addr = endpoint_addr.clone();
                probes.push(tokio::spawn(async move {
                    let _permit = permit;
                    gateway.run_probe(&service_id, &service_qos, &endpoint_addr, qos_ctx).await;
                }));
            }
        }

        for probe in probes {
            if probe.await.is_err() {
                warn!(service_id = %service_id, "endpoint probe task panicked");
            }
        }
        true
    }
}
