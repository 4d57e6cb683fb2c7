//! 统一配置管理
//!
//! janus-room 客户端的全部配置项都在这里定义：网关连接参数、日志与追踪。
//! 配置文件使用 TOML 格式。

pub mod gateway;
pub mod tracing;

pub use crate::config::gateway::{GatewayConfig, Plugin};
pub use crate::config::tracing::TracingConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// janus-room 主配置
///
/// ```toml
/// name = "janus-room-01"
/// env = "dev"
///
/// [gateway]
/// url = "ws://127.0.0.1:8188"
/// room = 1234
/// display = "Android webrtc"
///
/// [observability]
/// filter_level = "info"
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JanusRoomConfig {
    /// 客户端实例名称，出现在日志与追踪资源属性中
    #[serde(default = "default_name")]
    pub name: String,

    /// 运行环境：dev / prod / test
    #[serde(default = "default_env")]
    pub env: String,

    /// Janus 网关连接配置
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// EnvFilter 语法的过滤级别，如 "info,tokio_tungstenite=warn"
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,

    /// 需要编译时启用 `opentelemetry` feature
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// "console"（默认）或 "file"
    #[serde(default = "default_log_output")]
    pub output: String,

    /// output = "file" 时按天轮转
    #[serde(default)]
    pub rotate: bool,

    /// 日志目录，output = "file" 时有效
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
            tracing: TracingConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_name() -> String {
    "janus-room".to_string()
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for JanusRoomConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            env: default_env(),
            gateway: GatewayConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl JanusRoomConfig {
    pub fn gateway_config(&self) -> &GatewayConfig {
        &self.gateway
    }

    pub fn tracing_config(&self) -> &TracingConfig {
        &self.observability.tracing
    }

    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.observability.log
    }

    pub fn is_console_logging(&self) -> bool {
        self.observability.log.output == "console"
    }

    pub fn should_rotate_logs(&self) -> bool {
        self.observability.log.output == "file" && self.observability.log.rotate
    }

    /// 过滤级别，非空的 RUST_LOG 优先
    pub fn get_filter_level(&self) -> String {
        std::env::var("RUST_LOG")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.observability.filter_level.clone())
    }

    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }
        if !path_ref.is_file() {
            return Err(ConfigError::NotAFile {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref)?;
        Ok(Self::from_toml(&content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// 验证配置有效性
    ///
    /// Returns every problem found. Entries prefixed with `Warning:` do not
    /// prevent startup; callers decide how to treat them.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if !["dev", "prod", "test"].contains(&self.env.as_str()) {
            errors.push(format!(
                "Invalid environment '{}', must be one of: dev, prod, test",
                self.env
            ));
        }

        let main_level = self
            .observability
            .filter_level
            .split(',')
            .next()
            .unwrap_or("")
            .trim();
        if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
            errors.push(format!(
                "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                self.observability.filter_level
            ));
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        } else if self.observability.log.output == "file"
            && self.observability.log.path.trim().is_empty()
        {
            errors.push("observability.log.path cannot be empty when logging to file".to_string());
        }

        if let Err(e) = self.observability.tracing.validate() {
            errors.push(format!("Tracing configuration error: {e}"));
        }

        if let Err(gateway_errors) = self.gateway.validate() {
            errors.extend(gateway_errors.into_iter().map(|e| match e.strip_prefix("Warning: ") {
                Some(rest) => format!("Warning: gateway: {rest}"),
                None => format!("gateway: {e}"),
            }));
        }

        if self.env == "prod" {
            if self.gateway.url.starts_with("ws://") {
                errors.push(
                    "Warning: Production environment should connect over wss:// (gateway.url)"
                        .to_string(),
                );
            }
            if self.observability.log.output == "console" {
                errors.push("Warning: Production environment should use file logging (observability.log.output = \"file\")".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 只保留非警告项
pub fn hard_errors(problems: &[String]) -> Vec<&String> {
    problems
        .iter()
        .filter(|p| !p.starts_with("Warning:"))
        .collect()
}
