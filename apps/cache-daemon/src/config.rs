//! Layered daemon configuration: compiled-in defaults -> optional YAML
//! file -> `CACHE_DAEMON__*` environment variables -> CLI overrides.

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use cache_scheduler::model::{Dimension, HostConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub metrics_bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_owned(),
            metrics_bind_address: "0.0.0.0:9090".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,
    pub normal_check_interval_secs: u64,
    pub max_internal_queue: usize,
    pub dispatch_timeout_secs: u64,
    /// Per-operation timeout on queue-store calls made from request
    /// handlers, decoupled from the handler's own cancellation.
    pub queue_store_timeout_secs: u64,
    pub max_retries: u32,
    pub base_retry_delay_secs: i64,
    pub registry_ttl_secs: i64,
    pub reservation_fraction: f64,
    pub stale_ttl_secs: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            normal_check_interval_secs: 30,
            max_internal_queue: 1000,
            dispatch_timeout_secs: 10,
            queue_store_timeout_secs: 3,
            max_retries: 5,
            base_retry_delay_secs: 5,
            registry_ttl_secs: 30,
            reservation_fraction: 0.2,
            stale_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub queue_store_url: String,
    #[serde(default)]
    pub hosts: HashMap<String, HostConfig>,
    #[serde(default)]
    pub eg_addresses: Vec<String>,
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default)]
    pub pause_resume_enabled: bool,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl AppConfig {
    /// Layer order: compiled-in defaults, optional YAML file, then
    /// `CACHE_DAEMON__*` environment variables (double underscore as the
    /// nesting separator).
    ///
    /// # Errors
    /// Returns an error if the YAML file is malformed or a layer fails to
    /// extract into `AppConfig`.
    pub fn load(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed("CACHE_DAEMON__").split("__"));
        figment.extract()
    }

    pub fn apply_cli_overrides(&mut self, port: Option<u16>, verbose_tick_secs: Option<u64>) {
        if let Some(port) = port {
            self.server.bind_address = format!("0.0.0.0:{port}");
        }
        if let Some(secs) = verbose_tick_secs {
            self.scheduler.tick_interval_secs = secs;
        }
    }

    /// # Errors
    /// Returns an error if the effective config cannot be serialized to
    /// YAML (should not happen for a well-formed `AppConfig`).
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Fatal startup validation: queue-store URL and at least one host
    /// are required.
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_store_url.trim().is_empty() {
            return Err("queue_store_url is required".to_owned());
        }
        if self.hosts.is_empty() {
            return Err("at least one host must be configured".to_owned());
        }
        Ok(())
    }

    #[must_use]
    pub fn resolved_host_configs(&self) -> HashMap<i64, HostConfig> {
        self.hosts
            .values()
            .cloned()
            .map(|h| (h.id, h))
            .collect()
    }
}

/// Convenience constructor for a dimension entry read from YAML/env,
/// kept here rather than in the domain crate since only config loading
/// needs it.
#[must_use]
pub fn dimension(id: i64, name: &str, width: u32, height: u32, user_agent: &str) -> Dimension {
    Dimension {
        id,
        name: name.to_owned(),
        viewport_width: width,
        viewport_height: height,
        user_agent: user_agent.to_owned(),
    }
}
