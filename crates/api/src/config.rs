//! Application configuration
//!
//! Loaded from an optional `config/alert-proxy.{toml,yaml,json}` file and
//! then the process environment (keys are matched lowercased, so
//! `ALERT_COOLDOWN_SECONDS` sets `alert_cooldown_seconds`). List values are
//! comma-separated strings.

use alerting::CooldownConfig;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use inventory::{FailPolicy, PortainerConfig};
use reconciler::{MonitorConfig, ScopeMode};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use suppression::{NormalizedSet, SuppressionConfig, DEFAULT_STATE_FILE};
use thiserror::Error;

/// Config file looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/alert-proxy";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Flat application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discord_webhook_url: Option<String>,
    pub app_port: u16,
    pub debug_mode: bool,

    pub alert_dedup_enabled: bool,
    pub alert_cooldown_seconds: u64,
    pub alert_cache_max: usize,

    pub container_validate_with_portainer: bool,
    pub portainer_base_url: Option<String>,
    pub portainer_api_key: Option<String>,
    pub portainer_timeout_seconds: u64,
    pub portainer_verify_tls: bool,
    pub portainer_fail_open: bool,
    pub portainer_endpoint_map_file: Option<PathBuf>,
    pub portainer_strict_name_match: bool,

    pub portainer_active_monitor: bool,
    pub portainer_monitor_interval_seconds: u64,
    pub portainer_monitor_endpoints: String,
    pub portainer_monitor_down_confirmations: u32,
    pub portainer_monitor_scope: String,
    pub portainer_monitor_only_source: bool,

    pub container_suppress_repeats: bool,
    pub container_suppress_ttl_seconds: u64,
    pub container_suppress_persist: bool,
    pub container_suppress_state_file: PathBuf,
    pub container_paused_allowlist: String,
    pub container_always_notify_allowlist: String,
    pub container_ignore_allowlist: String,
    pub blue_green_suppression_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: None,
            app_port: 5001,
            debug_mode: false,
            alert_dedup_enabled: true,
            alert_cooldown_seconds: 3600,
            alert_cache_max: 5000,
            container_validate_with_portainer: false,
            portainer_base_url: None,
            portainer_api_key: None,
            portainer_timeout_seconds: 3,
            portainer_verify_tls: true,
            portainer_fail_open: true,
            portainer_endpoint_map_file: None,
            portainer_strict_name_match: false,
            portainer_active_monitor: true,
            portainer_monitor_interval_seconds: 30,
            portainer_monitor_endpoints: String::new(),
            portainer_monitor_down_confirmations: 1,
            portainer_monitor_scope: "map".to_string(),
            portainer_monitor_only_source: true,
            container_suppress_repeats: true,
            container_suppress_ttl_seconds: 86_400,
            container_suppress_persist: true,
            container_suppress_state_file: PathBuf::from(DEFAULT_STATE_FILE),
            container_paused_allowlist: String::new(),
            container_always_notify_allowlist: String::new(),
            container_ignore_allowlist: String::new(),
            blue_green_suppression_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load from the default config file (optional) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
                .add_source(Environment::default().try_parsing(true)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.app_port == 0 {
            return Err(ConfigError::Invalid("app_port must be non-zero".to_string()));
        }
        self.scope_mode()?;
        self.portainer_monitor_down_confirmations = self.portainer_monitor_down_confirmations.max(1);
        self.discord_webhook_url = self
            .discord_webhook_url
            .take()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Ok(self)
    }

    pub fn scope_mode(&self) -> Result<ScopeMode, ConfigError> {
        self.portainer_monitor_scope
            .parse()
            .map_err(ConfigError::Invalid)
    }

    pub fn fail_policy(&self) -> FailPolicy {
        FailPolicy::from_fail_open(self.portainer_fail_open)
    }

    /// Whether the inventory client is built at all
    pub fn inventory_enabled(&self) -> bool {
        self.container_validate_with_portainer
            && self.portainer_base_url.is_some()
            && self.portainer_api_key.is_some()
    }

    /// Whether the monitor runs (and therefore owns container alerts)
    pub fn monitor_enabled(&self) -> bool {
        self.inventory_enabled() && self.portainer_active_monitor
    }

    pub fn cooldown_config(&self) -> CooldownConfig {
        CooldownConfig {
            enabled: self.alert_dedup_enabled,
            ttl_seconds: self.alert_cooldown_seconds,
            max_size: self.alert_cache_max,
        }
    }

    pub fn portainer_config(&self) -> PortainerConfig {
        PortainerConfig {
            enabled: self.inventory_enabled(),
            base_url: self.portainer_base_url.clone(),
            api_key: self.portainer_api_key.clone(),
            timeout_seconds: self.portainer_timeout_seconds,
            verify_tls: self.portainer_verify_tls,
            fail_open: self.portainer_fail_open,
            strict_name_match: self.portainer_strict_name_match,
            endpoint_map_file: self.portainer_endpoint_map_file.clone(),
        }
    }

    pub fn suppression_config(&self) -> SuppressionConfig {
        SuppressionConfig {
            enabled: self.container_suppress_repeats,
            ttl_seconds: self.container_suppress_ttl_seconds,
            persist: self.container_suppress_persist,
            state_file: self.container_suppress_state_file.clone(),
            paused_allowlist: NormalizedSet::from_csv(&self.container_paused_allowlist),
            always_notify: NormalizedSet::from_csv(&self.container_always_notify_allowlist),
            ignore: NormalizedSet::from_csv(&self.container_ignore_allowlist),
            blue_green_enabled: self.blue_green_suppression_enabled,
            fail_policy: self.fail_policy(),
        }
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        Ok(MonitorConfig {
            interval: Duration::from_secs(self.portainer_monitor_interval_seconds.max(1)),
            scopes: NormalizedSet::from_csv(&self.portainer_monitor_endpoints),
            scope_mode: self.scope_mode()?,
            down_confirmations: self.portainer_monitor_down_confirmations,
            cooldown_enabled: self.alert_dedup_enabled,
            call_timeout: self.portainer_config().timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(raw: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_builder(
            config::Config::builder().add_source(File::from_str(raw, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.app_port, 5001);
        assert_eq!(config.alert_cooldown_seconds, 3600);
        assert_eq!(config.container_suppress_ttl_seconds, 86_400);
        assert_eq!(
            config.container_suppress_state_file,
            PathBuf::from("/tmp/proxy-alertmanager-suppression-state.json")
        );
        assert_eq!(config.scope_mode().unwrap(), ScopeMode::Map);
        assert!(!config.inventory_enabled());
        assert!(!config.monitor_enabled());
        assert_eq!(config.fail_policy(), FailPolicy::Open);
    }

    #[test]
    fn test_overrides_and_lists() {
        let config = from_toml(
            r#"
            discord_webhook_url = "  "
            alert_dedup_enabled = false
            container_validate_with_portainer = true
            portainer_base_url = "https://portainer:9443/api"
            portainer_api_key = "ptr_xxx"
            portainer_fail_open = false
            portainer_monitor_scope = "ALL"
            portainer_monitor_down_confirmations = 0
            portainer_monitor_endpoints = "4, local"
            container_always_notify_allowlist = "Critical-DB, /gateway"
            "#,
        )
        .unwrap();

        assert!(config.discord_webhook_url.is_none());
        assert!(config.monitor_enabled());
        assert_eq!(config.fail_policy(), FailPolicy::Closed);

        let monitor = config.monitor_config().unwrap();
        assert_eq!(monitor.scope_mode, ScopeMode::All);
        assert_eq!(monitor.down_confirmations, 1);
        assert!(monitor.scopes.contains("4"));
        assert!(monitor.scopes.contains("LOCAL"));
        assert!(!monitor.cooldown_enabled);

        let suppression = config.suppression_config();
        assert!(suppression.always_notify.contains("critical-db"));
        assert!(suppression.always_notify.contains("gateway"));
        assert_eq!(suppression.fail_policy, FailPolicy::Closed);
    }

    #[test]
    fn test_invalid_scope_mode() {
        assert!(matches!(
            from_toml(r#"portainer_monitor_scope = "some""#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
