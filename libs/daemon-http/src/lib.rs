//! Minimal outbound HTTP client for the cache daemon: dispatching recache
//! requests to Edge Gateways and (optionally) polling an HTTP-based RS
//! registry. Single `POST` + shared-secret-header + timeout shape — no
//! retry layer (the Retry Manager owns retries at the application level,
//! not the transport) and no response streaming.

pub mod client;
pub mod error;

pub use client::HttpClient;
pub use error::HttpError;
