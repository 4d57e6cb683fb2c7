//! 信令客户端错误类型

use crate::protocol::HandleId;
use thiserror::Error;

/// 传输层错误
///
/// Always fatal for the session: the loop reports it as a channel error and
/// tears local state down.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {url}: {message}")]
    Open { url: String, message: String },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed unexpectedly: {0}")]
    ClosedUnexpectedly(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// 信令客户端错误
#[derive(Error, Debug)]
pub enum SignalingError {
    /// An entry point of `ClientCore` ran on a thread other than its owning loop
    #[error("Operation invoked off the owning signaling loop")]
    OffLoop,

    #[error("Signaling loop has stopped")]
    LoopStopped,

    #[error("Invalid gateway configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Unknown handle {0}")]
    UnknownHandle(HandleId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Failed to spawn signaling loop: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SignalingError {
    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalingError>;
