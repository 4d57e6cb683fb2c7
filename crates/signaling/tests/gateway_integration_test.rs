//! 信令客户端集成测试
//!
//! 在本地端口上启动一个脚本化的 Janus 网关，走完整的
//! create -> attach -> join -> 订阅 -> leaving -> disconnect 流程

use futures_util::{SinkExt, StreamExt};
use janus_common::GatewayConfig;
use serde_json::{Value, json};
use signaling::{
    ClientStatus, ConnectionState, FeedId, HandleId, Jsep, Role, SessionEvent, SessionState, SignalingClient,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

const SESSION_ID: u64 = 1001;
const PUBLISHER_HANDLE: u64 = 2001;
const SUBSCRIBER_HANDLE: u64 = 2002;
const OWN_FEED: u64 = 555;
const REMOTE_FEED: u64 = 900;

/// 网关收到的请求，以及握手时客户端声明的子协议
#[derive(Default)]
struct GatewayLog {
    subprotocol: Option<String>,
    requests: Vec<Value>,
}

/// 启动脚本化网关，返回 ws 地址
async fn start_gateway(log: Arc<Mutex<GatewayLog>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind gateway listener");
    let addr = listener.local_addr().expect("Failed to read local addr");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("Failed to accept");
        let handshake_log = log.clone();
        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            handshake_log.lock().unwrap().subprotocol = offered;
            resp.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static("janus-protocol"),
            );
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .expect("Handshake failed");

        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                // Close replies are flushed by the next read
                continue;
            };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            let attaches = {
                let mut log = log.lock().unwrap();
                let attaches = log.requests.iter().filter(|r| r["janus"] == "attach").count();
                log.requests.push(request.clone());
                attaches
            };

            for reply in script(&request, attaches) {
                ws.send(Message::Text(reply.to_string().into()))
                    .await
                    .unwrap();
            }
        }
    });

    format!("ws://{addr}")
}

/// 对单个请求的脚本化回复，`attaches` 为此前收到的 attach 数
fn script(request: &Value, attaches: usize) -> Vec<Value> {
    let transaction = request["transaction"].clone();
    match request["janus"].as_str().unwrap_or_default() {
        "create" => vec![json!({"janus": "success", "transaction": transaction, "data": {"id": SESSION_ID}})],
        "attach" => {
            // the publisher attaches first, every later attach is the subscriber
            let id = if attaches == 0 {
                PUBLISHER_HANDLE
            } else {
                SUBSCRIBER_HANDLE
            };
            vec![json!({"janus": "success", "session_id": SESSION_ID, "transaction": transaction, "data": {"id": id}})]
        }
        "message" => {
            let ack = json!({"janus": "ack", "session_id": SESSION_ID, "transaction": transaction});
            let body = &request["body"];
            let sender = request["handle_id"].clone();
            match (body["request"].as_str(), body["ptype"].as_str()) {
                (Some("join"), Some("publisher")) => vec![
                    ack,
                    json!({"janus": "event", "session_id": SESSION_ID, "sender": sender, "transaction": transaction,
                           "plugindata": {"plugin": "janus.plugin.videoroom", "data": {
                               "videoroom": "joined", "room": 1234, "id": OWN_FEED, "private_id": 4242,
                               "publishers": [{"id": REMOTE_FEED, "display": "alice"}]}}}),
                ],
                (Some("join"), Some("subscriber")) => vec![
                    ack,
                    json!({"janus": "event", "session_id": SESSION_ID, "sender": sender, "transaction": transaction,
                           "plugindata": {"plugin": "janus.plugin.videoroom", "data": {
                               "videoroom": "attached", "room": 1234, "id": REMOTE_FEED}},
                           "jsep": {"type": "offer", "sdp": "v=0 remote"}}),
                ],
                (Some("start"), _) => vec![
                    ack,
                    json!({"janus": "event", "session_id": SESSION_ID, "sender": sender, "transaction": transaction,
                           "plugindata": {"plugin": "janus.plugin.videoroom", "data": {
                               "videoroom": "event", "room": 1234, "started": "ok"}}}),
                    json!({"janus": "webrtcup", "session_id": SESSION_ID, "sender": sender}),
                    // the remote publisher leaves right after we start watching it
                    json!({"janus": "event", "session_id": SESSION_ID, "sender": PUBLISHER_HANDLE,
                           "plugindata": {"plugin": "janus.plugin.videoroom", "data": {
                               "videoroom": "event", "room": 1234, "leaving": REMOTE_FEED}}}),
                ],
                _ => vec![ack],
            }
        }
        "keepalive" | "trickle" => vec![json!({"janus": "ack", "session_id": SESSION_ID, "transaction": transaction})],
        "detach" | "destroy" => vec![json!({"janus": "success", "session_id": SESSION_ID, "transaction": transaction})],
        _ => Vec::new(),
    }
}

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timed out waiting for session event")
        .expect("Event channel closed early")
}

/// Poll the published status until `check` holds
async fn wait_for_status(client: &SignalingClient, check: impl Fn(&ClientStatus) -> bool) {
    for _ in 0..500 {
        if check(&client.status()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status never reached the expected state: {:?}", client.status());
}

/// Skip notifications, which the gateway may interleave at any point
async fn next_non_notification(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    loop {
        match next_event(events).await {
            SessionEvent::Notification { .. } => continue,
            event => return event,
        }
    }
}

#[tokio::test]
async fn test_room_flow_against_scripted_gateway() {
    init_test_logging();
    let log = Arc::new(Mutex::new(GatewayLog::default()));
    let url = start_gateway(log.clone()).await;

    let config = GatewayConfig {
        url,
        display: "bob".to_string(),
        close_timeout_ms: 2000,
        ..Default::default()
    };
    let (client, mut events) = SignalingClient::start(config).expect("Failed to start client");
    client.connect().expect("connect");

    // 1. 发布者加入，房间里已有 alice
    assert_eq!(
        next_non_notification(&mut events).await,
        SessionEvent::PublisherJoined {
            handle_id: HandleId(PUBLISHER_HANDLE)
        }
    );

    // 2. 自动为 alice 建立订阅句柄，网关下发 offer
    let subscriber = HandleId(SUBSCRIBER_HANDLE);
    assert_eq!(
        next_non_notification(&mut events).await,
        SessionEvent::RemoteJsep {
            handle_id: subscriber,
            role: Role::Subscriber,
            jsep: Jsep::offer("v=0 remote"),
        }
    );
    wait_for_status(&client, |s| {
        s.session == SessionState::Active && s.session_id.0 == SESSION_ID && s.handles == 2
    })
    .await;

    // 3. 应答后订阅开始，随后 alice 离开
    client
        .accept_answer(subscriber, Jsep::answer("v=0 local"))
        .expect("accept_answer");
    assert_eq!(
        next_non_notification(&mut events).await,
        SessionEvent::SubscriptionStarted {
            handle_id: subscriber
        }
    );
    assert_eq!(
        next_non_notification(&mut events).await,
        SessionEvent::PeerLeft {
            handle_id: subscriber,
            feed_id: FeedId(REMOTE_FEED),
            display: "alice".to_string(),
        }
    );

    // 4. 断开连接
    client.disconnect().await.expect("disconnect");
    assert_eq!(
        next_non_notification(&mut events).await,
        SessionEvent::ChannelClosed
    );
    assert!(!client.is_running());
    assert_eq!(client.status().connection, ConnectionState::Closed);

    let log = log.lock().unwrap();
    assert_eq!(log.subprotocol.as_deref(), Some("janus-protocol"));
    let verbs: Vec<&str> = log
        .requests
        .iter()
        .filter_map(|r| r["janus"].as_str())
        .collect();
    assert_eq!(
        verbs,
        vec![
            "create", "attach", "message", "attach", "message", "message", "detach", "destroy"
        ]
    );

    let subscriber_join = &log.requests[4]["body"];
    assert_eq!(subscriber_join["ptype"], "subscriber");
    assert_eq!(subscriber_join["feed"], REMOTE_FEED);
    assert_eq!(subscriber_join["private_id"], 4242);
    assert_eq!(log.requests[5]["jsep"]["type"], "answer");
    assert_eq!(log.requests[7]["session_id"], SESSION_ID);
}

#[tokio::test]
async fn test_unreachable_gateway_reports_channel_error() {
    init_test_logging();
    // bind then drop so the port is very likely closed
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = GatewayConfig {
        url: format!("ws://{addr}"),
        ..Default::default()
    };
    let (client, mut events) = SignalingClient::start(config).unwrap();
    client.connect().unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::ChannelError { .. }
    ));
    assert_eq!(next_event(&mut events).await, SessionEvent::ChannelClosed);
    assert!(
        timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(client.status().connection, ConnectionState::Error);
}
