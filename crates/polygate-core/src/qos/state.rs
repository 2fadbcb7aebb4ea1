//! Perceived ground truth of a service's backing chain.

use super::endpoint::{EndpointRecord, EndpointValidationError};
use crate::types::{EndpointAddr, ServiceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
struct PerceivedChainState {
    height: u64,
    epoch: u64,
}

/// Estimated floor of chain ground truth, derived from many untrusted
/// observers.
///
/// The floor is a monotonic ratchet: it only advances, never rolls back,
/// so a single lagging endpoint cannot drag the perceived truth backward.
/// The converse over-trust risk (one endpoint falsely jumping the floor
/// forward) is a deliberate, documented design choice; see DESIGN.md.
///
/// A read/write lock guards the value pair so concurrent validation reads
/// do not block each other.
pub struct ServiceState {
    service_id: ServiceId,
    state: RwLock<PerceivedChainState>,
}

impl ServiceState {
    #[must_use]
    pub fn new(service_id: ServiceId) -> Self {
        Self { service_id, state: RwLock::new(PerceivedChainState::default()) }
    }

    /// Tier-2 validation: consistency of a record with the perceived floor.
    ///
    /// Runs tier-1 ([`EndpointRecord::validate_basic`]) first, then compares
    /// the record's epoch/height against the floor under a read lock.
    ///
    /// # Errors
    /// Returns the first failing check as a descriptive reason.
    pub fn validate_endpoint(&self, record: &EndpointRecord) -> Result<(), EndpointValidationError> {
        record.validate_basic()?;

        // validate_basic guarantees chain_info is present.
        let Some(info) = record.chain_info() else {
            return Err(EndpointValidationError::NoChainInfoObservation);
        };

        let state = self.state.read();
        if info.epoch < state.epoch {
            return Err(EndpointValidationError::BehindPerceivedEpoch {
                epoch: info.epoch,
                perceived: state.epoch,
            });
        }
        if info.height < state.height {
            return Err(EndpointValidationError::BehindPerceivedHeight {
                height: info.height,
                perceived: state.height,
            });
        }

        Ok(())
    }

    /// Advances the floor from a batch of freshly mutated records.
    ///
    /// A record qualifies only if it passes basic validation, its epoch is at
    /// least the current floor, and its height is strictly greater than the
    /// current floor. Records that fail are skipped, never propagated.
    pub fn update_from_endpoints(&self, updated: &HashMap<EndpointAddr, EndpointRecord>) {
        let mut state = self.state.write();

        for (endpoint_addr, record) in updated {
            if record.validate_basic().is_err() {
                continue;
            }
            let Some(info) = record.chain_info() else {
                continue;
            };

            if info.epoch < state.epoch {
                continue;
            }
            if info.height <= state.height {
                continue;
            }

            state.epoch = info.epoch;
            state.height = info.height;

            info!(
                service_id = %self.service_id,
                endpoint_addr = %endpoint_addr,
                height = state.height,
                epoch = state.epoch,
                "advancing perceived chain state"
            );
        }
    }

    #[must_use]
    pub fn perceived_height(&self) -> u64 {
        self.state.read().height
    }

    #[must_use]
    pub fn perceived_epoch(&self) -> u64 {
        self.state.read().epoch
    }

    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }
}
