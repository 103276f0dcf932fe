//! Pure utility functions.
//!
//! Startup helpers and the reconnect backoff policy.

pub mod backoff;
pub mod bootstrap;
