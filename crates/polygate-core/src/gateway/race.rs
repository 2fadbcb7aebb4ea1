//! The relay race: several endpoint attempts in flight, first success wins.

use super::RelayError;
use crate::{
    observation::{EndpointObservation, ProtocolObservations},
    protocol::{ProtocolContext, ProtocolError},
    types::{EndpointAddr, RelayPayload, RelayResponse},
};
use futures::future;
use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

type AttemptOutcome =
    (EndpointAddr, Result<RelayResponse, ProtocolError>, ProtocolObservations, Duration);

type AttemptFuture = Pin<Box<dyn Future<Output = AttemptOutcome> + Send>>;

/// Races the payload across every given context and returns the first
/// successful response.
///
/// Attempt failures keep the race going; once a winner lands the remaining
/// in-flight attempts are dropped, which abandons waiting on their responses
/// (the sends themselves may still complete on the wire). Every attempt that
/// resolves before the race ends contributes an [`EndpointObservation`],
/// winner and losers alike.
pub(super) async fn race_relays(
    contexts: Vec<(EndpointAddr, Box<dyn ProtocolContext>)>,
    payload: &RelayPayload,
    deadline: Duration,
    observations: &mut ProtocolObservations,
) -> Result<RelayResponse, RelayError> {
    let total = contexts.len();
    let mut pending: Vec<AttemptFuture> = Vec::with_capacity(total);
    for (endpoint_addr, context) in contexts {
        let payload = payload.clone();
        pending.push(Box::pin(async move {
            let started = Instant::now();
            let result = context.send(&payload).await;
            (endpoint_addr, result, context.observations(), started.elapsed())
        }));
    }

    let deadline_sleep = tokio::time::sleep(deadline);
    tokio::pin!(deadline_sleep);

    let mut completed = 0usize;
    let mut last_error: Option<ProtocolError> = None;

    while !pending.is_empty() {
        tokio::select! {
            () = &mut deadline_sleep => {
                warn!(completed, total, "race deadline elapsed without a successful response");
                return Err(RelayError::Timeout {
                    completed,
                    total,
                    last_error: last_error.map(|err| err.to_string()),
                });
            }
            ((endpoint_addr, result, context_observations, latency), _index, remaining) =
                future::select_all(pending) =>
            {
                pending = remaining;
                completed += 1;
                observations.merge(context_observations);

                match result {
                    Ok(response) => {
                        observations.endpoints.push(EndpointObservation::success(
                            endpoint_addr.clone(),
                            latency,
                            response.payload.len(),
                        ));
                        debug!(
                            endpoint_addr = %endpoint_addr,
                            completed,
                            total,
                            latency_ms = latency.as_millis() as u64,
                            "relay race resolved"
                        );
                        return Ok(response);
                    }
                    Err(err) => {
                        observations.endpoints.push(EndpointObservation::failure(
                            endpoint_addr.clone(),
                            latency,
                            err.classification(),
                        ));
                        warn!(
                            endpoint_addr = %endpoint_addr,
                            error = %err,
                            completed,
                            total,
                            "relay attempt failed"
                        );
                        last_error = Some(err);
                    }
                }
            }
        }
    }

    match last_error {
        Some(last_error) => Err(RelayError::AllFailed { total, last_error }),
        // Only reachable with an empty context list, which callers guard.
        None => Err(RelayError::Timeout { completed, total, last_error: None }),
    }
}
