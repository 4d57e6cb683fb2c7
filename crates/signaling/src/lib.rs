//! Janus 网关信令客户端
//!
//! 基于 Janus JSON 协议的 WebSocket 信令客户端核心：会话、插件句柄、事务关联
//! 以及 keepalive。
//!
//! # 模块结构
//!
//! ## 核心模块
//! - [`client`]: 信令 actor 线程和对外句柄 [`SignalingClient`]
//! - [`core`]: 不含 IO 的状态机 [`ClientCore`]
//! - [`router`]: 入站消息路由
//!
//! ## 协议与状态
//! - [`protocol`]: 网关消息编解码
//! - [`plugin`]: videoroom / audiobridge 请求体
//! - [`transaction`]: 事务注册表
//! - [`handle`]: 句柄注册表
//! - [`keepalive`]: keepalive 调度
//!
//! ## 边界
//! - [`transport`]: WebSocket 传输
//! - [`events`]: 发往宿主的会话事件

pub mod client;
pub mod core;
pub mod error;
pub mod events;
pub mod handle;
pub mod keepalive;
pub mod plugin;
pub mod protocol;
pub mod router;
pub mod transaction;
pub mod transport;

// Re-export commonly used types
pub use client::{Command, SignalingClient};
pub use core::{ClientCore, ClientStatus, ConnectionState, SessionState};
pub use error::{Result, SignalingError, TransportError};
pub use events::{NotificationKind, SessionEvent, SessionEventSink};
pub use handle::Role;
pub use protocol::{FeedId, HandleId, IceCandidate, Jsep, SdpType, SessionId};
pub use transport::{TransportAdapter, TransportEvent, WsTransport};
