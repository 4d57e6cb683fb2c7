//! 入站消息路由
//!
//! Resolution runs in two stages. A message with a `sender` is first decoded
//! into handle-scoped actions (plugin status, notifications); a transaction
//! reply riding on the same message is appended last as
//! [`HandleAction::Complete`]. A message without `sender` is a session-scoped
//! reply correlated by `transaction` only.
//!
//! [`resolve`] is pure: it reads the handle registry but never mutates
//! anything, so the core applies the resulting [`Route`] in one place.

use crate::events::NotificationKind;
use crate::handle::HandleRegistry;
use crate::protocol::{FeedId, HandleId, InboundMessage, Publisher, parse_id, publishers};
use crate::transaction::TransactionOutcome;
use janus_common::Plugin;
use serde_json::{Map, Value};

const UNKNOWN_REASON: &str = "unknown error";
const UNKNOWN_CODE: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum HandleAction {
    /// Our publisher joined; `feed` is the gateway's id for our own stream
    Joined {
        feed: Option<FeedId>,
        private_id: Option<u64>,
    },
    SubscribeTo(Vec<Publisher>),
    FeedGone(FeedId),
    Notify {
        kind: NotificationKind,
        detail: String,
    },
    /// The gateway detached the handle on its own
    Detached,
    Unrecognized(String),
    Complete(TransactionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Request received; the transaction stays open
    Ack { transaction: Option<String> },
    Handle {
        handle_id: HandleId,
        transaction: Option<String>,
        actions: Vec<HandleAction>,
    },
    UnknownSender {
        sender: HandleId,
        transaction: Option<String>,
    },
    Reply {
        transaction: Option<String>,
        outcome: TransactionOutcome,
    },
    /// The gateway expired the session
    SessionTimeout,
    Ignored { janus: String },
}

pub fn resolve(msg: &InboundMessage, handles: &HandleRegistry, plugin: Plugin) -> Route {
    let transaction = msg.transaction.clone();

    if msg.janus == "ack" {
        return Route::Ack { transaction };
    }

    if let Some(sender) = msg.sender {
        if !handles.contains(sender) {
            return Route::UnknownSender {
                sender,
                transaction,
            };
        }
        return Route::Handle {
            handle_id: sender,
            transaction,
            actions: handle_actions(msg, sender, plugin),
        };
    }

    match msg.janus.as_str() {
        "success" => Route::Reply {
            transaction,
            outcome: TransactionOutcome::success(msg.success_id()),
        },
        "error" => Route::Reply {
            transaction,
            outcome: gateway_failure(msg),
        },
        "timeout" => Route::SessionTimeout,
        other => Route::Ignored {
            janus: other.to_string(),
        },
    }
}

fn gateway_failure(msg: &InboundMessage) -> TransactionOutcome {
    let error = msg.error.clone().unwrap_or_default();
    TransactionOutcome::failure(
        error.reason.unwrap_or_else(|| UNKNOWN_REASON.to_string()),
        error
            .code
            .as_ref()
            .map(value_text)
            .unwrap_or_else(|| UNKNOWN_CODE.to_string()),
    )
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn handle_actions(msg: &InboundMessage, sender: HandleId, plugin: Plugin) -> Vec<HandleAction> {
    let mut actions = Vec::new();

    match msg.janus.as_str() {
        "event" | "success" => {
            if let Some(plugindata) = &msg.plugindata {
                let plugin = plugindata
                    .plugin
                    .as_deref()
                    .and_then(Plugin::from_name)
                    .unwrap_or(plugin);
                plugin_actions(msg, sender, plugin, &plugindata.data, &mut actions);
            } else if msg.janus == "success" {
                actions.push(HandleAction::Complete(TransactionOutcome::success(
                    msg.success_id(),
                )));
            } else {
                actions.push(HandleAction::Unrecognized("event without plugindata".into()));
            }
        }
        "webrtcup" => actions.push(HandleAction::Notify {
            kind: NotificationKind::WebRtcUp,
            detail: String::new(),
        }),
        "media" => actions.push(HandleAction::Notify {
            kind: NotificationKind::Media,
            detail: format!(
                "{} receiving={}",
                msg.media_type.as_deref().unwrap_or("unknown"),
                msg.receiving.unwrap_or(false)
            ),
        }),
        "slowlink" => actions.push(HandleAction::Notify {
            kind: NotificationKind::SlowLink,
            detail: format!("uplink={}", msg.uplink.unwrap_or(false)),
        }),
        "hangup" => actions.push(HandleAction::Notify {
            kind: NotificationKind::Hangup,
            detail: msg.reason.clone().unwrap_or_default(),
        }),
        "detached" => actions.push(HandleAction::Detached),
        "error" => actions.push(HandleAction::Complete(gateway_failure(msg))),
        other => actions.push(HandleAction::Unrecognized(other.to_string())),
    }

    actions
}

fn plugin_actions(
    msg: &InboundMessage,
    sender: HandleId,
    plugin: Plugin,
    data: &Map<String, Value>,
    actions: &mut Vec<HandleAction>,
) {
    let success = || {
        HandleAction::Complete(TransactionOutcome::Success {
            id: sender.0,
            jsep: msg.jsep.clone(),
        })
    };

    if let Some(failure) = plugin_failure(plugin, data) {
        actions.push(HandleAction::Complete(failure));
        return;
    }

    let status = data.get(plugin.short_name()).and_then(Value::as_str);
    match status {
        Some("joined") => {
            actions.push(HandleAction::Joined {
                feed: data.get("id").and_then(parse_id).map(FeedId),
                private_id: data.get("private_id").and_then(parse_id),
            });
            push_publishers(data, actions);
            actions.push(success());
        }
        Some("attached") => actions.push(success()),
        Some("event") => {
            push_publishers(data, actions);
            for key in ["unpublished", "leaving"] {
                // "ok" acknowledges our own unpublish/leave
                if let Some(feed) = data.get(key).and_then(parse_id) {
                    actions.push(HandleAction::FeedGone(FeedId(feed)));
                }
            }
            let completed = ["configured", "started", "result"]
                .iter()
                .any(|key| data.get(*key).and_then(Value::as_str) == Some("ok"));
            if completed {
                actions.push(success());
            }
        }
        Some("slow_link") => actions.push(HandleAction::Notify {
            kind: NotificationKind::SlowLink,
            detail: data
                .get("current-bitrate")
                .map(value_text)
                .map(|b| format!("current-bitrate={b}"))
                .unwrap_or_default(),
        }),
        Some(other) => actions.push(HandleAction::Unrecognized(format!(
            "{}:{other}",
            plugin.short_name()
        ))),
        None if msg.janus == "success" => actions.push(success()),
        None => actions.push(HandleAction::Unrecognized(format!(
            "{} event without status",
            plugin.short_name()
        ))),
    }
}

fn push_publishers(data: &Map<String, Value>, actions: &mut Vec<HandleAction>) {
    let list = publishers(data);
    if !list.is_empty() {
        actions.push(HandleAction::SubscribeTo(list));
    }
}

/// Plugin-level rejection: `{"<plugin>": "event", "error_code": 426, "error": "No such room"}`
fn plugin_failure(plugin: Plugin, data: &Map<String, Value>) -> Option<TransactionOutcome> {
    let status = data.get(plugin.short_name()).and_then(Value::as_str);
    if status != Some("error") && !data.contains_key("error") && !data.contains_key("error_code")
    {
        return None;
    }

    let reason = data
        .get("error")
        .map(value_text)
        .unwrap_or_else(|| UNKNOWN_REASON.to_string());
    let code = data
        .get("error_code")
        .map(value_text)
        .unwrap_or_else(|| plugin.short_name().to_string());
    Some(TransactionOutcome::failure(reason, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use crate::protocol::Jsep;

    fn registry() -> HandleRegistry {
        let mut handles = HandleRegistry::new();
        handles.insert(Handle::publisher(HandleId(7), Plugin::VideoRoom, "me"));
        handles.insert(Handle::subscriber(
            HandleId(9),
            FeedId(30),
            Plugin::VideoRoom,
            "alice",
        ));
        handles
    }

    fn route(json: &str) -> Route {
        let msg = InboundMessage::parse(json).unwrap();
        resolve(&msg, &registry(), Plugin::VideoRoom)
    }

    #[test]
    fn test_ack_keeps_transaction() {
        assert_eq!(
            route(r#"{"janus":"ack","transaction":"T1","session_id":1}"#),
            Route::Ack {
                transaction: Some("T1".to_string())
            }
        );
    }

    #[test]
    fn test_session_success_and_error() {
        assert_eq!(
            route(r#"{"janus":"success","transaction":"T1","data":{"id":"42"}}"#),
            Route::Reply {
                transaction: Some("T1".to_string()),
                outcome: TransactionOutcome::success(42),
            }
        );
        assert_eq!(
            route(r#"{"janus":"error","transaction":"T2","error":{"code":458,"reason":"No such session"}}"#),
            Route::Reply {
                transaction: Some("T2".to_string()),
                outcome: TransactionOutcome::failure("No such session", "458"),
            }
        );
    }

    #[test]
    fn test_session_error_defaults() {
        assert_eq!(
            route(r#"{"janus":"error","transaction":"T2"}"#),
            Route::Reply {
                transaction: Some("T2".to_string()),
                outcome: TransactionOutcome::failure("unknown error", "unknown"),
            }
        );
    }

    #[test]
    fn test_unknown_sender() {
        assert_eq!(
            route(r#"{"janus":"webrtcup","sender":99}"#),
            Route::UnknownSender {
                sender: HandleId(99),
                transaction: None,
            }
        );
    }

    #[test]
    fn test_publisher_joined_actions_in_order() {
        let route = route(
            r#"{"janus":"event","sender":7,"transaction":"J1",
                "plugindata":{"plugin":"janus.plugin.videoroom","data":{
                    "videoroom":"joined","room":1234,"id":555,"private_id":"888",
                    "publishers":[{"id":30,"display":"alice"},{"id":31,"display":"bob"}]}}}"#,
        );
        let Route::Handle {
            handle_id,
            transaction,
            actions,
        } = route
        else {
            panic!("expected handle route");
        };
        assert_eq!(handle_id, HandleId(7));
        assert_eq!(transaction.as_deref(), Some("J1"));
        assert_eq!(
            actions[0],
            HandleAction::Joined {
                feed: Some(FeedId(555)),
                private_id: Some(888),
            }
        );
        assert!(matches!(&actions[1], HandleAction::SubscribeTo(list) if list.len() == 2));
        assert_eq!(
            actions[2],
            HandleAction::Complete(TransactionOutcome::success(7))
        );
    }

    #[test]
    fn test_attached_carries_offer() {
        let route = route(
            r#"{"janus":"event","sender":9,"transaction":"S1",
                "plugindata":{"plugin":"janus.plugin.videoroom","data":{"videoroom":"attached","id":30}},
                "jsep":{"type":"offer","sdp":"v=0"}}"#,
        );
        assert_eq!(
            route,
            Route::Handle {
                handle_id: HandleId(9),
                transaction: Some("S1".to_string()),
                actions: vec![HandleAction::Complete(TransactionOutcome::Success {
                    id: 9,
                    jsep: Some(Jsep::offer("v=0")),
                })],
            }
        );
    }

    #[test]
    fn test_leaving_and_unpublished() {
        let Route::Handle { actions, .. } = route(
            r#"{"janus":"event","sender":"7","plugindata":{"data":{"videoroom":"event","leaving":"30"}}}"#,
        ) else {
            panic!("expected handle route");
        };
        assert_eq!(actions, vec![HandleAction::FeedGone(FeedId(30))]);

        let Route::Handle { actions, .. } = route(
            r#"{"janus":"event","sender":7,"plugindata":{"data":{"videoroom":"event","unpublished":"ok"}}}"#,
        ) else {
            panic!("expected handle route");
        };
        assert!(actions.is_empty());
    }

    #[test]
    fn test_configured_and_started() {
        let Route::Handle { actions, .. } = route(
            r#"{"janus":"event","sender":7,"transaction":"C1",
                "plugindata":{"data":{"videoroom":"event","configured":"ok"}},
                "jsep":{"type":"answer","sdp":"v=0"}}"#,
        ) else {
            panic!("expected handle route");
        };
        assert_eq!(
            actions,
            vec![HandleAction::Complete(TransactionOutcome::Success {
                id: 7,
                jsep: Some(Jsep::answer("v=0")),
            })]
        );

        let Route::Handle { actions, .. } = route(
            r#"{"janus":"event","sender":9,"transaction":"S2","plugindata":{"data":{"videoroom":"event","started":"ok"}}}"#,
        ) else {
            panic!("expected handle route");
        };
        assert_eq!(
            actions,
            vec![HandleAction::Complete(TransactionOutcome::success(9))]
        );
    }

    #[test]
    fn test_plugin_error() {
        let Route::Handle { actions, .. } = route(
            r#"{"janus":"event","sender":7,"transaction":"J2",
                "plugindata":{"plugin":"janus.plugin.videoroom","data":{"videoroom":"event","error_code":426,"error":"No such room (1234)"}}}"#,
        ) else {
            panic!("expected handle route");
        };
        assert_eq!(
            actions,
            vec![HandleAction::Complete(TransactionOutcome::failure(
                "No such room (1234)",
                "426"
            ))]
        );
    }

    #[test]
    fn test_notifications() {
        let Route::Handle { actions, .. } =
            route(r#"{"janus":"media","sender":9,"type":"video","receiving":true}"#)
        else {
            panic!("expected handle route");
        };
        assert_eq!(
            actions,
            vec![HandleAction::Notify {
                kind: NotificationKind::Media,
                detail: "video receiving=true".to_string(),
            }]
        );

        let Route::Handle { actions, .. } =
            route(r#"{"janus":"hangup","sender":9,"reason":"DTLS alert"}"#)
        else {
            panic!("expected handle route");
        };
        assert!(matches!(
            &actions[0],
            HandleAction::Notify { kind: NotificationKind::Hangup, detail } if detail == "DTLS alert"
        ));

        let Route::Handle { actions, .. } = route(r#"{"janus":"detached","sender":9}"#) else {
            panic!("expected handle route");
        };
        assert_eq!(actions, vec![HandleAction::Detached]);
    }

    #[test]
    fn test_audiobridge_status_key() {
        let mut handles = HandleRegistry::new();
        handles.insert(Handle::publisher(HandleId(3), Plugin::AudioBridge, "me"));
        let msg = InboundMessage::parse(
            r#"{"janus":"event","sender":3,"transaction":"M1",
                "plugindata":{"plugin":"janus.plugin.audiobridge","data":{"audiobridge":"event","result":"ok"}}}"#,
        )
        .unwrap();

        let Route::Handle { actions, .. } = resolve(&msg, &handles, Plugin::VideoRoom) else {
            panic!("expected handle route");
        };
        assert_eq!(
            actions,
            vec![HandleAction::Complete(TransactionOutcome::success(3))]
        );
    }

    #[test]
    fn test_timeout_and_unknown_session_messages() {
        assert_eq!(
            route(r#"{"janus":"timeout","session_id":1}"#),
            Route::SessionTimeout
        );
        assert_eq!(
            route(r#"{"janus":"server_info"}"#),
            Route::Ignored {
                janus: "server_info".to_string()
            }
        );
    }
}
