use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;

use crate::core::ProtectionRule;
use crate::service::{AdmissionController, ProtectionConfig};
use crate::utils::{AdmissionError, AdmissionResult};

/// Environment variable naming the settings file
pub const CONFIG_PATH_ENV: &str = "ADMISSION_CONFIG";

/// Settings file used when `ADMISSION_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/default";

/// Configuration settings for the admission engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Engine-wide thresholds and intervals
    #[serde(default)]
    pub protection: ProtectionConfig,
    /// Protection rules in evaluation order
    #[serde(default = "default_rules")]
    pub rules: Vec<ProtectionRule>,
    /// Prometheus exporter settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics exporter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter at startup
    pub enabled: bool,
    /// Address the exporter's scrape endpoint binds to
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "127.0.0.1:9000".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Install the Prometheus recorder and its scrape endpoint; must run
    /// inside a tokio runtime
    pub fn install_exporter(&self) -> AdmissionResult<SocketAddr> {
        let addr = self.socket_addr()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        Ok(addr)
    }

    pub fn socket_addr(&self) -> AdmissionResult<SocketAddr> {
        self.listen_address.parse().map_err(|_| {
            AdmissionError::InvalidSettings(format!(
                "metrics.listen_address '{}' is not a socket address",
                self.listen_address
            ))
        })
    }
}

/// Rule set applied when the settings name none
pub fn default_rules() -> Vec<ProtectionRule> {
    vec![
        ProtectionRule::new("burst", 20, 10, 600),
        ProtectionRule::new("per_minute", 100, 60, 900),
        ProtectionRule::new("hourly", 1000, 3600, 3600),
    ]
}

impl Settings {
    /// Load settings from the optional settings file, then from
    /// `ADMISSION_`-prefixed environment variables
    pub fn load() -> AdmissionResult<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load settings from `path` (extension optional, file optional) layered
    /// under the environment
    pub fn load_from(path: &str) -> AdmissionResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            // e.g. ADMISSION_PROTECTION__FAIL_OPEN=false
            .add_source(
                config::Environment::with_prefix("ADMISSION")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the sections the controller does not validate itself
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.metrics.enabled {
            self.metrics.socket_addr()?;
        }
        Ok(())
    }

    /// Build a controller from these settings
    pub fn build_controller(&self) -> AdmissionResult<AdmissionController> {
        self.validate()?;
        AdmissionController::new(self.protection.clone(), self.rules.clone())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protection: ProtectionConfig::default(),
            rules: default_rules(),
            metrics: MetricsConfig::default(),
        }
    }
}
