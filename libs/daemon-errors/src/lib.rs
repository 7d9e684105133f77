//! Structured error types shared by the cache daemon's HTTP surface.
//!
//! No dependency on the HTTP framework unless the `axum` feature is on.

pub mod problem;

pub use problem::{ErrorEnvelope, Problem};
