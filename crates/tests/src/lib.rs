//! Integration tests for the Polygate gateway core.
//!
//! Test modules:
//!
//! - `gateway_tests`: End-to-end relay handling through [`polygate_core::Gateway`]
//! - `race_tests`: Parallel endpoint racing, deadlines, and failure handling
//! - `selection_tests`: QoS-driven endpoint filtering observed through relays
//! - `hydrator_tests`: Background hydration passes, health, and shutdown
//! - `mock_infrastructure`: Scriptable mock protocol and reporter types
//!
//! All tests run against the in-memory [`mock_infrastructure::MockProtocol`];
//! no network or external services are required:
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod gateway_tests;



#[cfg(test)]
mod selection_tests;

pub mod mock_infrastructure;
