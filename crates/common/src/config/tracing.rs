//! OpenTelemetry 追踪导出配置
//!
//! Only consulted when the binary is built with the `opentelemetry` feature.

use serde::{Deserialize, Serialize};

fn default_service_name() -> String {
    "janus-room".to_string()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:4317".to_string()
}

/// OTLP span export settings for the signaling loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// 是否导出追踪数据（默认关闭）
    #[serde(default)]
    pub enable: bool,

    /// Resource `service.name` attached to exported spans
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP gRPC collector endpoint, e.g. `http://otel-collector:4317`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            service_name: default_service_name(),
            endpoint: default_endpoint(),
        }
    }
}

impl TracingConfig {
    pub fn is_enabled(&self) -> bool {
        self.enable
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 仅在启用时校验 endpoint 与 service_name
    pub fn validate(&self) -> Result<(), String> {
        if !self.enable {
            return Ok(());
        }

        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err("Tracing endpoint cannot be empty when tracing is enabled".to_string());
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(format!(
                "Tracing endpoint '{endpoint}' must start with http:// or https://"
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err("Tracing service_name cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let config = TracingConfig::default();
        assert!(!config.is_enabled());
        assert_eq!(config.service_name(), "janus-room");
        assert_eq!(config.endpoint(), "http://127.0.0.1:4317");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_config_skips_validation() {
        let config = TracingConfig {
            enable: false,
            endpoint: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_enabled_config_requires_http_endpoint() {
        let mut config = TracingConfig {
            enable: true,
            endpoint: "tempo:4317".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.endpoint = "https://tempo:4317".to_string();
        assert!(config.validate().is_ok());

        config.service_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: TracingConfig = toml::from_str("enable = true").unwrap();
        assert!(config.is_enabled());
        assert_eq!(config.service_name(), "janus-room");
        assert!(config.validate().is_ok());
    }
}
