//! E2E test harness for the outline store.
//!
//! This module contains test infrastructure with builders, variants, and
//! methods that not every scenario uses.

#![allow(dead_code)]

pub mod runner;
pub mod scenario;
pub mod workspace;

pub use assertions::Assertion;
pub use scenario::Scenario;
