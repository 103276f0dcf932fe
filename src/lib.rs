//! weather-ingest - station telemetry consumer
//!
//! Pulls station readings from a RabbitMQ topic exchange one at a time,
//! validates them against fixed physical ranges, and writes one row per
//! processed delivery to PostgreSQL. Acknowledgment is only issued once a
//! delivery is durably accounted for.

pub mod bus;
pub mod config;
pub mod model;
pub mod processor;
pub mod shutdown;
pub mod storage;
pub mod utils;
pub mod validation;
