//! Test utilities shared by unit tests, integration tests and benches
//!
//! Fixtures for the todo collection used throughout the tests, channel and
//! timeout helpers, seeded randomness and a hand-driven `DeltaSource`.

pub mod async_helpers;
pub mod deterministic_rng;
pub mod fixtures;
pub mod manual_source;

pub use async_helpers::*;
pub use deterministic_rng::*;
pub use fixtures::*;
pub use manual_source::ManualSource;
