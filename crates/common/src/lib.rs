//! Common utilities for knx-usb
//!
//! This crate provides the pieces shared by the transport library and the
//! monitor binary: tracing subscriber setup, a small error type, and helpers
//! for tests that wait on background worker threads.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
