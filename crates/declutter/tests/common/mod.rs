//! Shared test utilities for declutter integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution with a temp artifact root
//!   and in-memory database
//! - Scripted generation services and notifiers with observable behavior

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{sample_png, TestHarness};
