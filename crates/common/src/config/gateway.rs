//! Janus 网关连接配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 网关侧插件
///
/// The same client-side protocol drives both plugins; they differ in the
/// request bodies they accept and in whether remote feeds need their own
/// subscriber handle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plugin {
    /// `janus.plugin.videoroom`: SFU rooms, one subscriber handle per remote feed
    #[default]
    VideoRoom,
    /// `janus.plugin.audiobridge`: audio mixing rooms, publisher handle only
    AudioBridge,
}

impl Plugin {
    /// Fully qualified package name sent in `attach` requests
    pub fn package_name(&self) -> &'static str {
        match self {
            Plugin::VideoRoom => "janus.plugin.videoroom",
            Plugin::AudioBridge => "janus.plugin.audiobridge",
        }
    }

    /// Key under which the plugin reports its status in `plugindata.data`
    pub fn short_name(&self) -> &'static str {
        match self {
            Plugin::VideoRoom => "videoroom",
            Plugin::AudioBridge => "audiobridge",
        }
    }

    /// Resolve a plugin from either its package name or its short name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "janus.plugin.videoroom" | "videoroom" => Some(Plugin::VideoRoom),
            "janus.plugin.audiobridge" | "audiobridge" => Some(Plugin::AudioBridge),
            _ => None,
        }
    }

    /// Whether remote publishers are consumed through dedicated subscriber handles
    pub fn supports_subscribers(&self) -> bool {
        matches!(self, Plugin::VideoRoom)
    }
}

/// 网关连接参数
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// WebSocket 地址（ws:// 或 wss://）
    pub url: String,

    /// WebSocket 子协议，Janus 要求 "janus-protocol"
    #[serde(default = "default_subprotocols")]
    pub subprotocols: Vec<String>,

    /// 目标插件
    #[serde(default)]
    pub plugin: Plugin,

    /// 房间号
    pub room: u64,

    /// 本地发布者显示名
    #[serde(default = "default_display")]
    pub display: String,

    /// 心跳间隔（秒），Janus 默认 60 秒会话超时
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// 断开连接时等待传输层关闭确认的超时（毫秒）
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// 事件通道容量
    ///
    /// When the host cannot keep up, non-terminal events are dropped with a
    /// warning instead of stalling the signaling loop.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_subprotocols() -> Vec<String> {
    vec!["janus-protocol".to_string()]
}

fn default_display() -> String {
    "janus-room".to_string()
}

fn default_keepalive_interval_secs() -> u64 {
    25
}

fn default_close_timeout_ms() -> u64 {
    1000
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8188".to_string(),
            subprotocols: default_subprotocols(),
            plugin: Plugin::default(),
            room: 1234,
            display: default_display(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            close_timeout_ms: default_close_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl GatewayConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// 验证网关配置，返回全部问题
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match url::Url::parse(&self.url) {
            Ok(parsed) => {
                if !["ws", "wss"].contains(&parsed.scheme()) {
                    errors.push(format!(
                        "Invalid gateway url '{}', scheme must be ws or wss",
                        self.url
                    ));
                }
            }
            Err(e) => errors.push(format!("Invalid gateway url '{}': {e}", self.url)),
        }

        if self.subprotocols.iter().any(|p| p.trim().is_empty()) {
            errors.push("Gateway subprotocols cannot contain empty entries".to_string());
        } else if self.subprotocols.is_empty() {
            errors.push(
                "Warning: no WebSocket subprotocol configured, Janus expects 'janus-protocol'"
                    .to_string(),
            );
        }

        if self.room == 0 {
            errors.push("Gateway room must be a non-zero room id".to_string());
        }

        if self.display.trim().is_empty() {
            errors.push("Gateway display name cannot be empty".to_string());
        }

        if self.keepalive_interval_secs == 0 {
            errors.push("keepalive_interval_secs must be greater than 0".to_string());
        } else if self.keepalive_interval_secs >= 60 {
            errors.push(format!(
                "Warning: keepalive_interval_secs = {} may exceed the gateway session timeout",
                self.keepalive_interval_secs
            ));
        }

        if self.event_channel_capacity == 0 {
            errors.push("event_channel_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
