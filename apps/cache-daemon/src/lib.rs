//! Library half of the cache daemon binary: configuration loading, the
//! authenticated HTTP surface, and the metrics endpoint. Split out from
//! `main.rs` so integration tests can drive the router directly instead of
//! going through a bound socket.

pub mod config;
pub mod http;
pub mod metrics;
