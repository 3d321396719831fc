//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for the HTTP API & healthchecks.
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,

    /// The kubeconfig holding one context per managed cluster.
    ///
    /// When absent, the standard kubeconfig discovery rules apply.
    #[serde(default)]
    pub kubeconfig_path: Option<String>,
    /// The bound applied to every individual K8s API call.
    #[serde(default = "Config::default_api_timeout_seconds")]
    pub api_timeout_seconds: u64,

    /// The deadline for a managed database's generated secret to appear.
    #[serde(default = "Config::default_database_secret_timeout_seconds")]
    pub database_secret_timeout_seconds: u64,
    /// The initial interval of the backoff used while polling for the generated database secret.
    #[serde(default = "Config::default_database_secret_poll_initial_millis")]
    pub database_secret_poll_initial_millis: u64,
    /// The storage size of each managed database instance.
    #[serde(default = "Config::default_database_storage_size")]
    pub database_storage_size: String,
    /// The number of instances of each managed database cluster.
    #[serde(default = "Config::default_database_instances")]
    pub database_instances: i32,

    /// The log history window of a log streaming session.
    #[serde(default = "Config::default_log_since_seconds")]
    pub log_since_seconds: i64,
    /// The ingress class applied to new installations.
    #[serde(default = "Config::default_ingress_class")]
    pub ingress_class: String,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The bound applied to every individual K8s API call.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds)
    }

    /// The deadline for a managed database's generated secret to appear.
    pub fn database_secret_timeout(&self) -> Duration {
        Duration::from_secs(self.database_secret_timeout_seconds)
    }

    /// The initial interval of the generated database secret poll.
    pub fn database_secret_poll_initial(&self) -> Duration {
        Duration::from_millis(self.database_secret_poll_initial_millis)
    }

    fn default_http_port() -> u16 {
        8070
    }

    fn default_api_timeout_seconds() -> u64 {
        10
    }

    fn default_database_secret_timeout_seconds() -> u64 {
        120
    }

    fn default_database_secret_poll_initial_millis() -> u64 {
        500
    }

    fn default_database_storage_size() -> String {
        "1Gi".into()
    }

    fn default_database_instances() -> i32 {
        1
    }

    fn default_log_since_seconds() -> i64 {
        600
    }

    fn default_ingress_class() -> String {
        "nginx".into()
    }
}

#[cfg(test)]
impl Config {
    /// A config suitable for tests, with short deadlines.
    pub fn new_test() -> Self {
        Self {
            rust_log: "error".into(),
            http_port: 8070,
            kubeconfig_path: None,
            api_timeout_seconds: 1,
            database_secret_timeout_seconds: 1,
            database_secret_poll_initial_millis: 10,
            database_storage_size: "1Gi".into(),
            database_instances: 1,
            log_since_seconds: 600,
            ingress_class: "nginx".into(),
        }
    }
}
