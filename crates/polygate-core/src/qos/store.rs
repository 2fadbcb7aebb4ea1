//! Per-service endpoint store: observation accumulation and selection.

use super::{
    endpoint::EndpointRecord, state::ServiceState, EndpointSelector, QoSEndpointObservation,
    SelectionError,
};
use crate::types::{EndpointAddr, ServiceId};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, info, warn};
use url::Url;

/// Holds the latest accumulated QoS facts about every known endpoint of one
/// service and answers "is this endpoint currently usable?".
///
/// The address map is shared across all concurrent requests and hydrator
/// workers for the service; reads and writes are mutually exclusive at the
/// map level only. Validation deliberately runs on a snapshot taken outside
/// the map lock, so consulting [`ServiceState`] never nests locks; the small
/// staleness window this opens is tolerated.
pub struct EndpointStore {
    service_id: ServiceId,
    service_state: Arc<ServiceState>,
    endpoints: RwLock<HashMap<EndpointAddr, EndpointRecord>>,
    prefer_diverse_domains: bool,
}

impl EndpointStore {
    #[must_use]
    pub fn new(service_id: ServiceId, service_state: Arc<ServiceState>) -> Self {
        Self {
            service_id,
            service_state,
            endpoints: RwLock::new(HashMap::new()),
            prefer_diverse_domains: true,
        }
    }

    #[must_use]
    pub fn with_domain_diversity(mut self, prefer: bool) -> Self {
        self.prefer_diverse_domains = prefer;
        self
    }

    /// Applies a batch of observations, creating records lazily, and returns
    /// only the records that actually changed.
    ///
    /// Safe for repeated calls with partial or empty batches: an empty batch
    /// mutates nothing and returns an empty map.
    pub fn update_from_observations(
        &self,
        observations: &[QoSEndpointObservation],
    ) -> HashMap<EndpointAddr, EndpointRecord> {
        if observations.is_empty() {
            return HashMap::new();
        }

        let mut endpoints = self.endpoints.write();
        let mut updated = HashMap::new();

        for observation in observations {
            let record = endpoints.entry(observation.endpoint_addr.clone()).or_default();
            if record.apply(observation) {
                updated.insert(observation.endpoint_addr.clone(), record.clone());
            }
        }

        debug!(
            service_id = %self.service_id,
            observations = observations.len(),
            mutated = updated.len(),
            "applied endpoint observations"
        );

        updated
    }

    /// Number of endpoints the store currently has records for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Snapshot of one endpoint's record, if any observation has been seen.
    #[must_use]
    pub fn record(&self, endpoint_addr: &EndpointAddr) -> Option<EndpointRecord> {
        self.endpoints.read().get(endpoint_addr).cloned()
    }

    /// Filters `available` down to the endpoints that pass both validation
    /// tiers. Records are snapshotted under the read lock and validated
    /// against [`ServiceState`] after it is released.
    fn valid_candidates(&self, available: &[EndpointAddr]) -> Vec<EndpointAddr> {
        let snapshot: Vec<(EndpointAddr, EndpointRecord)> = {
            let endpoints = self.endpoints.read();
            available
                .iter()
                .filter_map(|addr| endpoints.get(addr).map(|rec| (addr.clone(), rec.clone())))
                .collect()
        };

        let mut valid = Vec::with_capacity(snapshot.len());
        for (addr, record) in snapshot {
            match self.service_state.validate_endpoint(&record) {
                Ok(()) => valid.push(addr),
                Err(reason) => {
                    debug!(
                        service_id = %self.service_id,
                        endpoint_addr = %addr,
                        reason = %reason,
                        "endpoint filtered out of valid set"
                    );
                }
            }
        }
        valid
    }
}

impl EndpointSelector for EndpointStore {
    fn select(&self, available: &[EndpointAddr]) -> Result<EndpointAddr, SelectionError> {
        if available.is_empty() {
            return Err(SelectionError::NoEndpoints);
        }

        let valid = self.valid_candidates(available);
        let mut rng = rand::thread_rng();

        if let Some(addr) = valid.choose(&mut rng) {
            return Ok(addr.clone());
        }

        // Fail open: an unreachable backend is worse than a possibly-stale
        // one. Surface the degraded condition via logging, not as an error.
        warn!(
            service_id = %self.service_id,
            available = available.len(),
            "all available endpoints failed validation, selecting at random from the full set"
        );
        available
            .choose(&mut rng)
            .cloned()
            .ok_or(SelectionError::NoEndpoints)
    }

    fn select_multiple(
        &self,
        available: &[EndpointAddr],
        count: usize,
    ) -> Result<Vec<EndpointAddr>, SelectionError> {
        if available.is_empty() {
            return Err(SelectionError::NoEndpoints);
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut distinct: Vec<EndpointAddr> = Vec::with_capacity(available.len());
        let mut seen = HashSet::new();
        for addr in available {
            if seen.insert(addr.clone()) {
                distinct.push(addr.clone());
            }
        }

        let count = count.min(distinct.len());
        let mut valid = self.valid_candidates(&distinct);
        let mut rng = rand::thread_rng();

        if valid.is_empty() {
            warn!(
                service_id = %self.service_id,
                available = distinct.len(),
                requested = count,
                "no available endpoint passed validation, racing across the full set"
            );
        }

        valid.shuffle(&mut rng);
        let mut selected: Vec<EndpointAddr> = Vec::with_capacity(count);

        if self.prefer_diverse_domains {
            // First pass: one endpoint per registrable domain. Endpoints with
            // an unparseable identity are treated as always diverse.
            let mut used_domains: HashSet<String> = HashSet::new();
            let mut deferred: Vec<EndpointAddr> = Vec::new();

            for addr in valid {
                if selected.len() == count {
                    break;
                }
                match registrable_domain(&addr) {
                    Some(domain) if used_domains.contains(&domain) => deferred.push(addr),
                    Some(domain) => {
                        used_domains.insert(domain);
                        selected.push(addr);
                    }
                    None => selected.push(addr),
                }
            }

            for addr in deferred {
                if selected.len() == count {
                    break;
                }
                selected.push(addr);
            }
        } else {
            selected.extend(valid.into_iter().take(count));
        }

        // Fail open: if fewer than `count` endpoints are valid, top up from
        // the unfiltered set.
        if selected.len() < count {
            let chosen: HashSet<EndpointAddr> = selected.iter().cloned().collect();
            let mut leftovers: Vec<EndpointAddr> =
                distinct.into_iter().filter(|a| !chosen.contains(a)).collect();
            leftovers.shuffle(&mut rng);
            for addr in leftovers {
                if selected.len() == count {
                    break;
                }
                selected.push(addr);
            }
        }

        info!(
            service_id = %self.service_id,
            selected = selected.len(),
            requested = count,
            "selected endpoints for relay"
        );

        Ok(selected)
    }
}

/// Best-effort extraction of an endpoint's registrable domain (e.g.
/// `example.com`) from its address.
///
/// Endpoint addresses are opaque and may embed a URL anywhere in the string
/// (e.g. `supplier1-https://rpc.example.com`), so this scans for an embedded
/// URL and falls back to treating the whole address as a host. Returns `None`
/// when no domain-shaped identity can be found.
fn registrable_domain(addr: &EndpointAddr) -> Option<String> {
    let raw = addr.as_str();

    let candidate = match raw.find("http") {
        Some(idx) => raw[idx..].to_string(),
        None => {
            // No embedded URL: look for a dotted token that resembles a host.
            let token = raw.split(['-', '/', '@']).find(|part| part.contains('.'))?;
            format!("https://{token}")
        }
    };

    let url = Url::parse(&candidate).ok()?;
    let host = url.host_str()?;

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}
