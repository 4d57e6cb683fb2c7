//! 插件请求体
//!
//! Body objects carried by `message` requests. The videoroom and audiobridge
//! plugins share the request names but not the fields.

use crate::handle::Role;
use crate::protocol::FeedId;
use janus_common::Plugin;
use serde_json::{Value, json};

/// Parameters of a `join` request
#[derive(Debug, Clone, Copy)]
pub struct JoinParams<'a> {
    pub room: u64,
    pub role: Role,
    pub display: &'a str,
    pub feed_id: FeedId,
    pub private_id: Option<u64>,
}

pub fn join_body(plugin: Plugin, params: JoinParams<'_>) -> Value {
    match (plugin, params.role) {
        (Plugin::AudioBridge, _) => json!({
            "request": "join",
            "room": params.room,
            "display": params.display,
        }),
        (Plugin::VideoRoom, Role::Publisher) => json!({
            "request": "join",
            "room": params.room,
            "ptype": "publisher",
            "display": params.display,
        }),
        (Plugin::VideoRoom, Role::Subscriber) => {
            let mut body = json!({
                "request": "join",
                "room": params.room,
                "ptype": "subscriber",
                "feed": params.feed_id,
            });
            if let Some(private_id) = params.private_id {
                body["private_id"] = json!(private_id);
            }
            body
        }
    }
}

/// Body sent alongside the local offer of a publisher handle
pub fn configure_body(plugin: Plugin) -> Value {
    match plugin {
        Plugin::VideoRoom => json!({"request": "configure", "audio": true, "video": true}),
        Plugin::AudioBridge => json!({"request": "configure", "muted": false}),
    }
}

/// Body sent alongside the local answer of a subscriber handle
pub fn start_body(room: u64) -> Value {
    json!({"request": "start", "room": room})
}

pub fn mute_body(plugin: Plugin, muted: bool) -> Value {
    match plugin {
        Plugin::VideoRoom => json!({"request": "configure", "audio": !muted}),
        Plugin::AudioBridge => json!({"request": "configure", "muted": muted}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(role: Role) -> JoinParams<'static> {
        JoinParams {
            room: 1234,
            role,
            display: "Android webrtc",
            feed_id: FeedId(77),
            private_id: Some(9),
        }
    }

    #[test]
    fn test_videoroom_join_bodies() {
        assert_eq!(
            join_body(Plugin::VideoRoom, params(Role::Publisher)),
            json!({"request": "join", "room": 1234, "ptype": "publisher", "display": "Android webrtc"})
        );
        assert_eq!(
            join_body(Plugin::VideoRoom, params(Role::Subscriber)),
            json!({"request": "join", "room": 1234, "ptype": "subscriber", "feed": 77, "private_id": 9})
        );

        let no_private = JoinParams {
            private_id: None,
            ..params(Role::Subscriber)
        };
        assert!(
            join_body(Plugin::VideoRoom, no_private)
                .get("private_id")
                .is_none()
        );
    }

    #[test]
    fn test_audiobridge_join_body() {
        assert_eq!(
            join_body(Plugin::AudioBridge, params(Role::Publisher)),
            json!({"request": "join", "room": 1234, "display": "Android webrtc"})
        );
    }

    #[test]
    fn test_configure_and_mute_bodies() {
        assert_eq!(configure_body(Plugin::VideoRoom)["video"], true);
        assert_eq!(configure_body(Plugin::AudioBridge)["muted"], false);
        assert_eq!(start_body(5), json!({"request": "start", "room": 5}));
        assert_eq!(
            mute_body(Plugin::VideoRoom, true),
            json!({"request": "configure", "audio": false})
        );
        assert_eq!(
            mute_body(Plugin::AudioBridge, true),
            json!({"request": "configure", "muted": true})
        );
    }
}
