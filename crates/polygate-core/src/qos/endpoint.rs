//! Per-endpoint accumulation of the latest QoS facts.

use super::{QoSObservationKind, QoSEndpointObservation};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;

/// How long a malformed-response observation keeps an endpoint out of the
/// valid set. Long enough to quarantine persistently broken endpoints,
/// short enough to recover from transient glitches.
pub const MALFORMED_RESPONSE_WINDOW_MINUTES: i64 = 30;

/// Why an endpoint record fails validation.
///
/// Callers treat these as "not currently selectable", not as errors to
/// propagate to the end user.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointValidationError {
    #[error("endpoint has no health probe observation yet")]
    NoHealthObservation,

    #[error("endpoint reported itself unhealthy on its latest health probe")]
    Unhealthy,

    #[error("endpoint has no chain-info observation yet")]
    NoChainInfoObservation,

    #[error("endpoint reported a block height of 0, expected > 0")]
    ZeroHeight,

    #[error("endpoint reported an epoch of 0, expected > 0")]
    ZeroEpoch,

    #[error("endpoint returned a malformed response within the last {MALFORMED_RESPONSE_WINDOW_MINUTES} minutes")]
    RecentMalformedResponse,

    #[error("endpoint epoch {epoch} is behind the perceived epoch {perceived}")]
    BehindPerceivedEpoch { epoch: u64, perceived: u64 },

    #[error("endpoint block height {height} is behind the perceived height {perceived}")]
    BehindPerceivedHeight { height: u64, perceived: u64 },
}

/// Chain-progress fields reported by an endpoint's chain-info probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfoObservation {
    pub height: u64,
    pub epoch: u64,
}

/// Mutable accumulation of the most recent relevant observations for one
/// (service, endpoint address) pair.
///
/// Created lazily on first observation, overwritten in place afterwards,
/// never explicitly deleted: stale addresses simply age out of the
/// availability list supplied by the protocol.
#[derive(Debug, Clone, Default)]
pub struct EndpointRecord {
    health_ok: Option<bool>,
    chain_info: Option<ChainInfoObservation>,
    last_malformed_response_at: Option<DateTime<Utc>>,
}

impl EndpointRecord {
    /// Applies one observation, returning `true` if the record changed.
    pub fn apply(&mut self, observation: &QoSEndpointObservation) -> bool {
        match &observation.kind {
            QoSObservationKind::Health { ok } => {
                self.health_ok = Some(*ok);
                true
            }
            QoSObservationKind::ChainInfo(info) => {
                self.chain_info = Some(*info);
                true
            }
            QoSObservationKind::Malformed { observed_at } => {
                // Keep only the most recent validation failure.
                if self.last_malformed_response_at.map_or(true, |prev| *observed_at > prev) {
                    self.last_malformed_response_at = Some(*observed_at);
                    return true;
                }
                false
            }
        }
    }

    /// Tier-1 validation: structural checks independent of chain state.
    ///
    /// # Errors
    /// Returns the first failed check, in a fixed order, so callers get a
    /// stable descriptive reason.
    pub fn validate_basic(&self) -> Result<(), EndpointValidationError> {
        if self.has_recent_malformed_response() {
            return Err(EndpointValidationError::RecentMalformedResponse);
        }

        match self.health_ok {
            None => return Err(EndpointValidationError::NoHealthObservation),
            Some(false) => return Err(EndpointValidationError::Unhealthy),
            Some(true) => {}
        }

        match self.chain_info {
            None => Err(EndpointValidationError::NoChainInfoObservation),
            Some(ChainInfoObservation { height: 0, .. }) => Err(EndpointValidationError::ZeroHeight),
            Some(ChainInfoObservation { epoch: 0, .. }) => Err(EndpointValidationError::ZeroEpoch),
            Some(_) => Ok(()),
        }
    }

    #[must_use]
    pub fn chain_info(&self) -> Option<ChainInfoObservation> {
        self.chain_info
    }

    fn has_recent_malformed_response(&self) -> bool {
        let Some(at) = self.last_malformed_response_at else {
            return false;
        };
        at > Utc::now() - ChronoDuration::minutes(MALFORMED_RESPONSE_WINDOW_MINUTES)
    }
}
