//! Maps domain errors onto the HTTP error envelope.
//!
//! `UnknownHost` only ever surfaces here from the ingestion/invalidation
//! paths (`ingestion.rs`), where an unknown host is a validation failure
//! on the request body, not a missing resource — it maps to 400.
//! Inspection routes check the host up front in `routes.rs` via
//! `require_known_host` and return 404 directly, never reaching this map.

use cache_scheduler::DaemonError;
use daemon_errors::Problem;

pub fn map_daemon_error(err: DaemonError) -> Problem {
    match err {
        DaemonError::Validation(detail) => Problem::bad_request(detail),
        DaemonError::UnknownHost(id) => Problem::bad_request(format!("unknown host {id}")),
        DaemonError::UnknownDimension { host_id, dimension_id } => {
            Problem::bad_request(format!("unknown dimension {dimension_id} for host {host_id}"))
        }
        DaemonError::UrlNormalization { url, reason } => {
            Problem::bad_request(format!("invalid url {url}: {reason}"))
        }
        DaemonError::QueueStoreTimeout => Problem::service_unavailable("queue store operation timed out"),
        DaemonError::QueueStore(detail) => Problem::service_unavailable(detail),
    }
}
