//! Janus JSON 协议模型
//!
//! Outbound requests are strongly typed. Inbound frames are decoded leniently:
//! gateways disagree on whether ids are JSON numbers or decimal strings, so
//! every id accepts both.

use rand::{Rng, distr::Alphanumeric};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Length of generated transaction ids
pub const TRANSACTION_ID_LEN: usize = 12;

/// Read an id that may be encoded as a JSON number or a decimal string
pub fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 12 个字母数字字符的随机事务 id
pub fn random_transaction_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TRANSACTION_ID_LEN)
        .map(char::from)
        .collect()
}

struct LenientIdVisitor;

impl Visitor<'_> for LenientIdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned integer id or its decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative id {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        v.trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid id '{v}'")))
    }
}

macro_rules! gateway_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn is_zero(&self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(LenientIdVisitor).map(Self)
            }
        }
    };
}

gateway_id!(
    /// Gateway session id, valid only while the session is ACTIVE
    SessionId
);
gateway_id!(
    /// Local plugin attachment id assigned by the gateway
    HandleId
);
gateway_id!(
    /// Remote publisher identity inside a room
    FeedId
);

impl From<HandleId> for FeedId {
    fn from(handle: HandleId) -> Self {
        FeedId(handle.0)
    }
}

/// SDP 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// JSEP 会话描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as produced by the media engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TricklePayload {
    Candidate(IceCandidate),
    Completed { completed: bool },
}

impl TricklePayload {
    pub fn completed() -> Self {
        TricklePayload::Completed { completed: true }
    }
}

/// Request part of an outbound frame, tagged by the `janus` field
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Request {
    Create,
    Attach {
        session_id: SessionId,
        plugin: String,
    },
    Message {
        session_id: SessionId,
        handle_id: HandleId,
        body: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },
    Trickle {
        session_id: SessionId,
        handle_id: HandleId,
        candidate: TricklePayload,
    },
    Keepalive {
        session_id: SessionId,
    },
    Detach {
        session_id: SessionId,
        handle_id: HandleId,
    },
    Destroy {
        session_id: SessionId,
    },
}

impl Request {
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Create => "create",
            Request::Attach { .. } => "attach",
            Request::Message { .. } => "message",
            Request::Trickle { .. } => "trickle",
            Request::Keepalive { .. } => "keepalive",
            Request::Detach { .. } => "detach",
            Request::Destroy { .. } => "destroy",
        }
    }
}

/// C->WSS 帧
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub request: Request,
    pub transaction: String,
}

impl OutboundMessage {
    pub fn new(request: Request, transaction: impl Into<String>) -> Self {
        Self {
            request,
            transaction: transaction.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Gateway error object of a session-scoped `error` reply
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayError {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// WSS->C 帧
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub sender: Option<HandleId>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<GatewayError>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,

    // webrtcup / media / slowlink / hangup 的附加字段
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub receiving: Option<bool>,
    #[serde(default)]
    pub uplink: Option<bool>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// `data.id` of a success reply, or 0 when the reply carries no data
    pub fn success_id(&self) -> u64 {
        self.data
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(parse_id)
            .unwrap_or(0)
    }
}

/// 房间内已发布的远端 feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    pub feed_id: FeedId,
    pub display: String,
}

/// Publishers listed in a `joined` or `event` payload; malformed entries are skipped
pub fn publishers(data: &Map<String, Value>) -> Vec<Publisher> {
    data.get("publishers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    let feed_id = entry.get("id").and_then(parse_id)?;
                    let display = entry
                        .get("display")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some(Publisher {
                        feed_id: FeedId(feed_id),
                        display,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
