//! Provides types and functions common to the harness and the test binaries built on it.
#![deny(missing_docs)]
#[cfg(feature = "telemetry")]
pub mod telemetry;
