//! Base 基础设施库
//!
//! 为 janus-room 信令客户端提供共享的配置模型与错误类型

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{GatewayConfig, JanusRoomConfig, LogConfig, ObservabilityConfig, Plugin};
pub use error::{ConfigError, Result};
