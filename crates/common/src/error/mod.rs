//! 错误处理模块
//!
//! 按概念分离的错误类型定义，遵循一个文件一个核心概念的原则

mod config_error;

pub use config_error::ConfigError;

/// 配置层统一的 Result 类型
pub type Result<T> = std::result::Result<T, ConfigError>;
