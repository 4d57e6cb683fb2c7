//! 统一错误处理模型
//!
//! janus-room 可执行程序的顶层错误类型，聚合配置、信令与系统错误

use thiserror::Error;

/// 主应用的统一错误枚举
#[derive(Debug, Error)]
pub enum Error {
    // ========== 配置相关错误 ==========
    #[error("Configuration error: {0}")]
    Config(#[from] janus_common::ConfigError),

    /// 配置验证失败
    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    // ========== 信令错误 ==========
    #[error("Signaling error: {0}")]
    Signaling(#[from] signaling::SignalingError),

    /// 网关在会话建立前就关闭了通道
    #[error("Gateway channel failed: {message}")]
    Channel { message: String },

    // ========== 系统级错误 ==========
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Legacy error: {0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("Application error: {message}")]
    Custom { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }
}
