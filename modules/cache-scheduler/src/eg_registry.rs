//! EG (Edge Gateway) registry: the Distributor's view of which EGs are
//! currently healthy. External contract: this daemon does
//! not own EG health; it only reads a snapshot per tick.

use async_trait::async_trait;

use crate::error::DaemonError;
use crate::model::EgEndpoint;

#[async_trait]
pub trait EgRegistry: Send + Sync {
    async fn healthy_egs(&self) -> Result<Vec<EgEndpoint>, DaemonError>;
}

/// Static registry backed by daemon configuration. A production
/// deployment might instead poll a service-discovery endpoint; the
/// `EgRegistry` trait keeps the Distributor decoupled from how that
/// snapshot is produced.
pub struct StaticEgRegistry {
    egs: Vec<EgEndpoint>,
}

impl StaticEgRegistry {
    #[must_use]
    pub fn new(egs: Vec<EgEndpoint>) -> Self {
        Self { egs }
    }
}

#[async_trait]
impl EgRegistry for StaticEgRegistry {
    async fn healthy_egs(&self) -> Result<Vec<EgEndpoint>, DaemonError> {
        Ok(self.egs.clone())
    }
}
