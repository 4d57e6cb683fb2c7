//! 信令状态机
//!
//! [`ClientCore`] owns every piece of mutable signaling state: connection and
//! session state, the session id, both registries and the keepalive schedule.
//! It performs no I/O of its own. Requests go out through a [`TransportAdapter`],
//! events go up through a [`SessionEventSink`], and time is passed in by the
//! caller, so the actor loop in [`crate::client`] and the unit tests below drive
//! it the same way.
//!
//! Every public entry point first checks [`LoopAffinity`]; the core must only
//! be touched from the thread that created it.

use crate::error::{Result, SignalingError, TransportError};
use crate::events::{SessionEvent, SessionEventSink};
use crate::handle::{Handle, HandleRegistry, Role};
use crate::keepalive::KeepAliveScheduler;
use crate::plugin::{self, JoinParams};
use crate::protocol::{
    FeedId, HandleId, IceCandidate, InboundMessage, Jsep, OutboundMessage, Publisher, Request,
    SessionId, TricklePayload, random_transaction_id,
};
use crate::router::{self, HandleAction, Route};
use crate::transaction::{PendingRequest, TransactionOutcome, TransactionRegistry};
use crate::transport::{TransportAdapter, TransportEvent};
use janus_common::{GatewayConfig, Plugin};
use std::collections::HashSet;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Requests still unanswered after this long are failed with code `timeout`.
/// Checked on every keepalive tick.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    New,
    Connected,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Uninitialized,
    Creating,
    Active,
    Destroyed,
    Error,
}

/// Records the owning thread of a loop-confined value
#[derive(Debug, Clone, Copy)]
pub struct LoopAffinity {
    owner: ThreadId,
}

impl LoopAffinity {
    pub fn current() -> Self {
        Self {
            owner: thread::current().id(),
        }
    }

    pub fn check(&self) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            error!("❌ 信令操作在非所属线程上执行");
            Err(SignalingError::OffLoop)
        }
    }
}

/// Point-in-time view of the core, published by the actor after every turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub connection: ConnectionState,
    pub session: SessionState,
    pub session_id: SessionId,
    pub handles: usize,
    pub pending_transactions: usize,
    pub running: bool,
}

pub struct ClientCore<T: TransportAdapter, S: SessionEventSink> {
    config: GatewayConfig,
    transport: T,
    sink: S,
    affinity: LoopAffinity,

    connection: ConnectionState,
    session: SessionState,
    session_id: SessionId,
    private_id: Option<u64>,
    own_feed: Option<FeedId>,

    open_requested: bool,
    /// `disconnect()` ran and the transport close is in flight
    closing: bool,
    closed_notified: bool,

    transactions: TransactionRegistry,
    handles: HandleRegistry,
    /// Feeds that left while their subscriber attach was still in flight
    cancelled_attaches: HashSet<FeedId>,
    keepalive: KeepAliveScheduler,
}

impl<T: TransportAdapter, S: SessionEventSink> ClientCore<T, S> {
    /// Build a core owned by the calling thread
    pub fn new(config: GatewayConfig, transport: T, sink: S) -> Self {
        let keepalive = KeepAliveScheduler::new(config.keepalive_interval());
        Self {
            config,
            transport,
            sink,
            affinity: LoopAffinity::current(),
            connection: ConnectionState::New,
            session: SessionState::Uninitialized,
            session_id: SessionId::default(),
            private_id: None,
            own_feed: None,
            open_requested: false,
            closing: false,
            closed_notified: false,
            transactions: TransactionRegistry::new(),
            handles: HandleRegistry::new(),
            cancelled_attaches: HashSet::new(),
            keepalive,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn session_state(&self) -> SessionState {
        self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn transactions(&self) -> &TransactionRegistry {
        &self.transactions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            connection: self.connection,
            session: self.session,
            session_id: self.session_id,
            handles: self.handles.len(),
            pending_transactions: self.transactions.len(),
            running: !self.closed_notified,
        }
    }

    pub fn next_keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive.next_deadline()
    }

    /// `disconnect()` is waiting for the transport to confirm the close
    pub fn awaiting_close(&self) -> bool {
        self.closing && !self.closed_notified
    }

    /// ChannelClosed has been emitted; nothing else will be dispatched
    pub fn is_finished(&self) -> bool {
        self.closed_notified
    }

    // ========== 连接与会话生命周期 ==========

    /// Open the transport. A session is created once it reports `Opened`.
    pub fn connect(&mut self) -> Result<()> {
        self.affinity.check()?;
        if self.connection != ConnectionState::New || self.open_requested {
            warn!("⚠️  重复的 connect 调用被忽略 (state={})", self.connection);
            return Err(SignalingError::invalid_state("connect", self.connection));
        }

        self.open_requested = true;
        if let Err(e) = self.transport.open(&self.config.url, &self.config.subprotocols) {
            self.fail_transport(&e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Feed one transport event into the state machine
    pub fn on_transport_event(&mut self, event: TransportEvent, now: Instant) -> Result<()> {
        self.affinity.check()?;
        match event {
            TransportEvent::Opened => {
                if self.connection != ConnectionState::New {
                    debug!("忽略迟到的 Opened 事件 (state={})", self.connection);
                    return Ok(());
                }
                self.connection = ConnectionState::Connected;
                info!("🔗 信令通道已连接，创建会话");
                if let Err(e) = self.start_session() {
                    warn!("创建会话失败: {}", e);
                }
            }
            TransportEvent::Text(text) => {
                if self.connection != ConnectionState::Connected {
                    debug!("连接状态为 {}，丢弃入站消息", self.connection);
                    return Ok(());
                }
                self.handle_frame(&text, now);
            }
            TransportEvent::Closed { reason } => self.on_closed(reason),
            TransportEvent::Error(message) => {
                let err = if self.connection == ConnectionState::New {
                    TransportError::Open {
                        url: self.config.url.clone(),
                        message,
                    }
                } else {
                    TransportError::Connection(message)
                };
                self.fail_transport(&err);
            }
        }
        Ok(())
    }

    pub fn create_session(&mut self) -> Result<()> {
        self.affinity.check()?;
        self.start_session()
    }

    fn start_session(&mut self) -> Result<()> {
        if self.connection != ConnectionState::Connected
            || !matches!(
                self.session,
                SessionState::Uninitialized | SessionState::Creating
            )
        {
            return Err(SignalingError::invalid_state(
                "create session",
                format!("connection={} session={}", self.connection, self.session),
            ));
        }

        self.session = SessionState::Creating;
        self.send_request(Request::Create, Some(PendingRequest::CreateSession))?;
        Ok(())
    }

    /// Send `destroy` and clear all local state without waiting for the reply
    pub fn destroy_session(&mut self) -> Result<()> {
        self.affinity.check()?;
        self.destroy()
    }

    fn destroy(&mut self) -> Result<()> {
        if self.session_id.is_zero() {
            return Err(SignalingError::invalid_state(
                "destroy session",
                format!("session={} without session id", self.session),
            ));
        }

        let session_id = self.session_id;
        info!("🧹 销毁会话 {}", session_id);
        let sent = self.send_request(Request::Destroy { session_id }, None);
        self.teardown_local(SessionState::Destroyed);
        sent.map(|_| ())
    }

    /// Tear the session down and close the transport.
    ///
    /// Returns `true` while the transport close is still to be confirmed; the
    /// caller waits for the `Closed` event (bounded by the close timeout) and
    /// then calls [`ClientCore::finish`]. Calling it again is a no-op.
    pub fn disconnect(&mut self) -> Result<bool> {
        self.affinity.check()?;
        match self.connection {
            ConnectionState::New => {
                if self.open_requested {
                    self.transport.close();
                }
                self.connection = ConnectionState::Closed;
                self.emit_closed();
                Ok(false)
            }
            ConnectionState::Connected => {
                info!("🔌 断开信令连接");
                if self.session == SessionState::Active
                    && let Err(e) = self.destroy()
                {
                    warn!("发送 destroy 失败: {}", e);
                }
                self.keepalive.disarm();
                self.transactions.clear();
                self.handles.clear();
                self.cancelled_attaches.clear();
                self.connection = ConnectionState::Closed;
                self.closing = true;
                self.transport.close();
                Ok(!self.closed_notified)
            }
            ConnectionState::Closed => Ok(self.awaiting_close()),
            ConnectionState::Error => {
                self.connection = ConnectionState::Closed;
                self.emit_closed();
                Ok(false)
            }
        }
    }

    /// Final step before the loop exits; guarantees ChannelClosed was emitted
    pub fn finish(&mut self) {
        if self.closed_notified {
            return;
        }
        if self.closing {
            warn!("⏱️  等待传输层关闭确认超时");
        }
        self.keepalive.disarm();
        if self.connection != ConnectionState::Error {
            self.connection = ConnectionState::Closed;
        }
        self.emit_closed();
    }

    // ========== 句柄与房间 ==========

    /// Attach a plugin handle. `feed_id == None` attaches the local publisher.
    pub fn attach_handle(
        &mut self,
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display: impl Into<String>,
    ) -> Result<()> {
        self.affinity.check()?;
        self.attach(plugin, feed_id, display.into())
    }

    fn attach(
        &mut self,
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display_name: String,
    ) -> Result<()> {
        self.require_active("attach handle")?;
        debug!(
            "📎 attach {} feed={:?} display={}",
            plugin.package_name(),
            feed_id,
            display_name
        );
        self.send_request(
            Request::Attach {
                session_id: self.session_id,
                plugin: plugin.package_name().to_string(),
            },
            Some(PendingRequest::Attach {
                plugin,
                feed_id,
                display: display_name,
            }),
        )?;
        Ok(())
    }

    pub fn join_room(&mut self, handle_id: HandleId) -> Result<()> {
        self.affinity.check()?;
        self.join(handle_id)
    }

    fn join(&mut self, handle_id: HandleId) -> Result<()> {
        self.require_active("join room")?;
        let handle = self
            .handles
            .get(handle_id)
            .ok_or(SignalingError::UnknownHandle(handle_id))?;

        let body = plugin::join_body(
            handle.plugin,
            JoinParams {
                room: self.config.room,
                role: handle.role,
                display: &handle.display,
                feed_id: handle.feed_id,
                private_id: self.private_id,
            },
        );
        info!(
            "🚪 句柄 {} 以 {} 身份加入房间 {}",
            handle_id, handle.role, self.config.room
        );
        self.send_message(handle_id, body, None, PendingRequest::Join { handle_id })
    }

    /// Publish the local offer on a publisher handle
    pub fn configure_media(&mut self, handle_id: HandleId, offer: Jsep) -> Result<()> {
        self.affinity.check()?;
        let plugin = self.require_role(handle_id, Role::Publisher, "configure media")?;
        self.send_message(
            handle_id,
            plugin::configure_body(plugin),
            Some(offer),
            PendingRequest::Configure { handle_id },
        )
    }

    /// Answer the gateway's offer on a subscriber handle
    pub fn accept_answer(&mut self, handle_id: HandleId, answer: Jsep) -> Result<()> {
        self.affinity.check()?;
        self.require_role(handle_id, Role::Subscriber, "accept answer")?;
        self.send_message(
            handle_id,
            plugin::start_body(self.config.room),
            Some(answer),
            PendingRequest::Start { handle_id },
        )
    }

    pub fn set_muted(&mut self, handle_id: HandleId, muted: bool) -> Result<()> {
        self.affinity.check()?;
        let plugin = self.require_role(handle_id, Role::Publisher, "set muted")?;
        self.send_message(
            handle_id,
            plugin::mute_body(plugin, muted),
            None,
            PendingRequest::Mute { handle_id, muted },
        )
    }

    pub fn trickle_candidate(&mut self, handle_id: HandleId, candidate: IceCandidate) -> Result<()> {
        self.affinity.check()?;
        self.trickle(handle_id, TricklePayload::Candidate(candidate))
    }

    pub fn trickle_complete(&mut self, handle_id: HandleId) -> Result<()> {
        self.affinity.check()?;
        self.trickle(handle_id, TricklePayload::completed())
    }

    fn trickle(&mut self, handle_id: HandleId, candidate: TricklePayload) -> Result<()> {
        self.require_active("trickle")?;
        if !self.handles.contains(handle_id) {
            return Err(SignalingError::UnknownHandle(handle_id));
        }
        self.send_request(
            Request::Trickle {
                session_id: self.session_id,
                handle_id,
                candidate,
            },
            None,
        )?;
        Ok(())
    }

    /// Detach a handle. Local state is dropped and PeerLeft fires immediately.
    pub fn detach_handle(&mut self, handle_id: HandleId) -> Result<()> {
        self.affinity.check()?;
        self.detach(handle_id)
    }

    fn detach(&mut self, handle_id: HandleId) -> Result<()> {
        self.require_active("detach handle")?;
        let handle = self
            .handles
            .remove(handle_id)
            .ok_or(SignalingError::UnknownHandle(handle_id))?;

        info!(
            "👋 分离句柄 {} (feed={}, display={})",
            handle_id, handle.feed_id, handle.display
        );
        self.emit(SessionEvent::PeerLeft {
            handle_id,
            feed_id: handle.feed_id,
            display: handle.display,
        });
        self.send_detach(handle_id)
    }

    fn send_detach(&mut self, handle_id: HandleId) -> Result<()> {
        self.send_request(
            Request::Detach {
                session_id: self.session_id,
                handle_id,
            },
            Some(PendingRequest::Detach { handle_id }),
        )?;
        Ok(())
    }

    /// Drop a subscriber whose join never produced an offer and detach it on the gateway
    fn release_subscriber(&mut self, handle_id: HandleId) {
        if self.handles.get(handle_id).map(|h| h.role) != Some(Role::Subscriber) {
            return;
        }
        if let Some(handle) = self.handles.remove(handle_id) {
            info!("🗑️  释放订阅句柄 {} (feed={})", handle_id, handle.feed_id);
        }
        if let Err(e) = self.send_detach(handle_id) {
            warn!("分离句柄 {} 失败: {}", handle_id, e);
        }
    }

    // ========== Keepalive ==========

    /// Send a keepalive if one is due, then fail requests that outlived
    /// [`TRANSACTION_TIMEOUT`]
    pub fn on_tick(&mut self, now: Instant) -> Result<()> {
        self.affinity.check()?;
        if !self.keepalive.poll(now) {
            return Ok(());
        }
        if self.session != SessionState::Active {
            self.keepalive.disarm();
            return Ok(());
        }

        for tx in self.transactions.expire(now, TRANSACTION_TIMEOUT) {
            warn!("⏱️  事务 {} ({}) 超时未收到回复", tx.id, tx.request.kind());
            self.resolve(
                tx.request,
                TransactionOutcome::failure("no reply from gateway", "timeout"),
                now,
            );
        }
        if self.session != SessionState::Active {
            return Ok(());
        }

        debug!("💓 keepalive session={}", self.session_id);
        self.send_request(
            Request::Keepalive {
                session_id: self.session_id,
            },
            None,
        )?;
        Ok(())
    }

    // ========== 入站处理 ==========

    fn handle_frame(&mut self, text: &str, now: Instant) {
        debug!("WSS->C: {}", text);
        let msg = match InboundMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("⚠️  丢弃无法解析的消息: {}", e);
                return;
            }
        };

        match router::resolve(&msg, &self.handles, self.config.plugin) {
            Route::Ack { transaction } => {
                debug!("ack transaction={:?}", transaction);
            }
            Route::Reply {
                transaction,
                outcome,
            } => self.complete(transaction.as_deref(), outcome, now),
            Route::Handle {
                handle_id,
                transaction,
                actions,
            } => {
                let mut consumed = false;
                for action in actions {
                    if let HandleAction::Complete(outcome) = action {
                        consumed = true;
                        self.complete(transaction.as_deref(), outcome, now);
                    } else {
                        self.apply(handle_id, action);
                    }
                }
                if !consumed
                    && let Some(tid) = transaction.as_deref()
                    && self.transactions.take(tid).is_some()
                {
                    debug!("事务 {} 收到无结果的插件事件，已移除", tid);
                }
            }
            Route::UnknownSender {
                sender,
                transaction,
            } => {
                warn!("⚠️  未知的 sender {}，丢弃 {} 消息", sender, msg.janus);
                if let Some(tid) = transaction.as_deref() {
                    self.transactions.take(tid);
                }
            }
            Route::SessionTimeout => {
                error!("❌ 会话 {} 已被网关超时回收", self.session_id);
                self.teardown_local(SessionState::Error);
                self.emit(SessionEvent::ChannelError {
                    message: "session timed out on the gateway".to_string(),
                });
            }
            Route::Ignored { janus } => {
                debug!("忽略会话级消息: {}", janus);
            }
        }
    }

    fn apply(&mut self, handle_id: HandleId, action: HandleAction) {
        match action {
            HandleAction::Joined { feed, private_id } => {
                if self.handles.get(handle_id).map(|h| h.role) == Some(Role::Publisher) {
                    if private_id.is_some() {
                        self.private_id = private_id;
                    }
                    if feed.is_some() {
                        self.own_feed = feed;
                    }
                }
            }
            HandleAction::SubscribeTo(publishers) => self.subscribe_to(handle_id, publishers),
            HandleAction::FeedGone(feed_id) => {
                let Some(gone) = self.handles.handle_for_feed(feed_id) else {
                    if self.transactions.pending_attach_for(feed_id) {
                        info!("feed {} 在 attach 完成前离开，取消订阅", feed_id);
                        self.cancelled_attaches.insert(feed_id);
                    } else {
                        debug!("feed {} 未订阅，忽略离开通知", feed_id);
                    }
                    return;
                };
                if let Err(e) = self.detach(gone) {
                    warn!("分离句柄 {} 失败: {}", gone, e);
                }
            }
            HandleAction::Notify { kind, detail } => {
                info!("📣 句柄 {} 通知 {}: {}", handle_id, kind, detail);
                self.emit(SessionEvent::Notification {
                    handle_id,
                    kind,
                    detail,
                });
            }
            HandleAction::Detached => {
                if let Some(handle) = self.handles.remove(handle_id) {
                    info!("网关已分离句柄 {}", handle_id);
                    self.emit(SessionEvent::PeerLeft {
                        handle_id,
                        feed_id: handle.feed_id,
                        display: handle.display,
                    });
                }
            }
            HandleAction::Unrecognized(what) => {
                debug!("句柄 {} 未处理的事件: {}", handle_id, what);
            }
            HandleAction::Complete(_) => {}
        }
    }

    /// Attach one subscriber handle per newly announced remote feed
    fn subscribe_to(&mut self, handle_id: HandleId, publishers: Vec<Publisher>) {
        let plugin = self
            .handles
            .get(handle_id)
            .map(|h| h.plugin)
            .unwrap_or(self.config.plugin);
        if !plugin.supports_subscribers() {
            return;
        }

        let own_handle_feed = self.handles.publisher().map(|h| h.feed_id);
        for publisher in publishers {
            let feed_id = publisher.feed_id;
            if self.cancelled_attaches.remove(&feed_id) {
                debug!("feed {} 重新发布，恢复进行中的 attach", feed_id);
                continue;
            }
            if Some(feed_id) == self.own_feed
                || Some(feed_id) == own_handle_feed
                || self.handles.contains_feed(feed_id)
                || self.transactions.pending_attach_for(feed_id)
            {
                debug!("feed {} 已订阅或为本地发布者，跳过", feed_id);
                continue;
            }
            info!("➕ 订阅远端发布者 {} ({})", feed_id, publisher.display);
            if let Err(e) = self.attach(plugin, Some(feed_id), publisher.display) {
                warn!("订阅 feed {} 失败: {}", feed_id, e);
            }
        }
    }

    fn complete(&mut self, transaction: Option<&str>, outcome: TransactionOutcome, now: Instant) {
        let Some(tid) = transaction else {
            return;
        };
        let Some(tx) = self.transactions.take(tid) else {
            debug!("事务 {} 不存在，丢弃回复", tid);
            return;
        };
        self.resolve(tx.request, outcome, now);
    }

    fn resolve(&mut self, request: PendingRequest, outcome: TransactionOutcome, now: Instant) {
        match (request, outcome) {
            (PendingRequest::CreateSession, TransactionOutcome::Success { id, .. }) if id != 0 => {
                self.on_session_created(SessionId(id), now);
            }
            (PendingRequest::CreateSession, TransactionOutcome::Success { .. }) => {
                self.fail_session("gateway returned no session id", "0");
            }
            (PendingRequest::CreateSession, TransactionOutcome::Failure { reason, code }) => {
                self.fail_session(&reason, &code);
            }
            (
                PendingRequest::Attach {
                    plugin,
                    feed_id,
                    display,
                },
                TransactionOutcome::Success { id, .. },
            ) if id != 0 => self.on_attached(HandleId(id), plugin, feed_id, display),
            (
                PendingRequest::Attach {
                    feed_id: Some(feed_id),
                    ..
                },
                TransactionOutcome::Failure { .. },
            ) if self.cancelled_attaches.remove(&feed_id) => {
                debug!("已取消的 feed {} attach 失败，忽略", feed_id);
            }
            (PendingRequest::Join { handle_id }, TransactionOutcome::Success { jsep, .. }) => {
                self.on_joined(handle_id, jsep);
            }
            (PendingRequest::Join { handle_id }, TransactionOutcome::Failure { reason, code }) => {
                self.request_failed(&PendingRequest::Join { handle_id }, reason, code);
                self.release_subscriber(handle_id);
            }
            (PendingRequest::Configure { handle_id }, TransactionOutcome::Success { jsep, .. }) => {
                info!("✅ 句柄 {} 媒体已配置", handle_id);
                if let Some(jsep) = jsep {
                    self.emit(SessionEvent::RemoteJsep {
                        handle_id,
                        role: Role::Publisher,
                        jsep,
                    });
                }
            }
            (PendingRequest::Start { handle_id }, TransactionOutcome::Success { .. }) => {
                info!("▶️  句柄 {} 订阅已开始", handle_id);
                self.emit(SessionEvent::SubscriptionStarted { handle_id });
            }
            (PendingRequest::Mute { handle_id, muted }, TransactionOutcome::Success { .. }) => {
                info!("🔇 句柄 {} muted={}", handle_id, muted);
            }
            (PendingRequest::Detach { handle_id }, outcome) => {
                debug!("detach {} 回复: {:?}", handle_id, outcome);
            }
            (request, TransactionOutcome::Success { id, .. }) => {
                self.request_failed(&request, "gateway returned no handle id".to_string(), id.to_string());
            }
            (request, TransactionOutcome::Failure { reason, code }) => {
                self.request_failed(&request, reason, code);
            }
        }
    }

    fn on_session_created(&mut self, session_id: SessionId, now: Instant) {
        info!("✅ 会话已创建: {}", session_id);
        self.session_id = session_id;
        self.session = SessionState::Active;
        self.keepalive.arm(now);

        let plugin = self.config.plugin;
        let display = self.config.display.clone();
        if let Err(e) = self.attach(plugin, None, display) {
            warn!("附加发布者句柄失败: {}", e);
        }
    }

    fn on_attached(
        &mut self,
        handle_id: HandleId,
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display: String,
    ) {
        if let Some(feed) = feed_id
            && self.cancelled_attaches.remove(&feed)
        {
            info!("feed {} 已离开，分离刚附加的句柄 {}", feed, handle_id);
            if let Err(e) = self.send_detach(handle_id) {
                warn!("分离句柄 {} 失败: {}", handle_id, e);
            }
            return;
        }

        let handle = match feed_id {
            None => Handle::publisher(handle_id, plugin, display),
            Some(feed_id) => Handle::subscriber(handle_id, feed_id, plugin, display),
        };
        info!(
            "📎 句柄已附加: {} ({}, feed={})",
            handle_id, handle.role, handle.feed_id
        );
        for evicted in self.handles.insert(handle) {
            warn!(
                "句柄 {} 与新句柄 {} 冲突，已移除",
                evicted.handle_id, handle_id
            );
        }

        if let Err(e) = self.join(handle_id) {
            warn!("句柄 {} 加入房间失败: {}", handle_id, e);
        }
    }

    fn on_joined(&mut self, handle_id: HandleId, jsep: Option<Jsep>) {
        let Some(role) = self.handles.get(handle_id).map(|h| h.role) else {
            debug!("句柄 {} 已不存在，忽略 join 回复", handle_id);
            return;
        };

        match (role, jsep) {
            (Role::Publisher, _) => {
                info!("🎉 发布者已加入房间 {}", self.config.room);
                self.emit(SessionEvent::PublisherJoined { handle_id });
            }
            (Role::Subscriber, Some(jsep)) => {
                self.emit(SessionEvent::RemoteJsep {
                    handle_id,
                    role,
                    jsep,
                });
            }
            (Role::Subscriber, None) => {
                self.request_failed(
                    &PendingRequest::Join { handle_id },
                    "subscriber join reply carried no offer".to_string(),
                    "no_jsep".to_string(),
                );
                self.release_subscriber(handle_id);
            }
        }
    }

    // ========== 内部工具 ==========

    fn request_failed(&mut self, request: &PendingRequest, reason: String, code: String) {
        warn!("⚠️  请求 {} 失败: {} ({})", request.kind(), reason, code);
        self.emit(SessionEvent::RequestFailed {
            request: request.kind(),
            handle_id: request.handle_id(),
            reason,
            code,
        });
    }

    fn fail_session(&mut self, reason: &str, code: &str) {
        error!("❌ 创建会话失败: {} ({})", reason, code);
        self.teardown_local(SessionState::Error);
        self.emit(SessionEvent::ChannelError {
            message: format!("create session failed: {reason} ({code})"),
        });
    }

    /// Transport failure: local teardown, sticky ERROR, then the terminal events
    fn fail_transport(&mut self, err: &TransportError) {
        match self.connection {
            ConnectionState::Closed => {
                debug!("关闭过程中的传输错误: {}", err);
                self.emit_closed();
            }
            ConnectionState::Error => {}
            ConnectionState::New | ConnectionState::Connected => {
                error!("❌ 传输层错误: {}", err);
                self.connection = ConnectionState::Error;
                self.teardown_local(SessionState::Error);
                self.transport.close();
                self.emit(SessionEvent::ChannelError {
                    message: err.to_string(),
                });
                self.emit_closed();
            }
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        match self.connection {
            ConnectionState::Closed | ConnectionState::Error => {
                info!("🔌 信令通道已关闭");
                self.emit_closed();
            }
            ConnectionState::New | ConnectionState::Connected => {
                let reason = reason.unwrap_or_else(|| "no close frame".to_string());
                self.fail_transport(&TransportError::ClosedUnexpectedly(reason));
            }
        }
    }

    fn teardown_local(&mut self, next: SessionState) {
        self.keepalive.disarm();
        self.transactions.clear();
        self.handles.clear();
        self.cancelled_attaches.clear();
        self.session_id = SessionId::default();
        self.private_id = None;
        self.own_feed = None;
        if self.session != SessionState::Uninitialized || next == SessionState::Error {
            self.session = next;
        }
    }

    fn require_active(&self, operation: &'static str) -> Result<()> {
        if self.connection == ConnectionState::Connected && self.session == SessionState::Active {
            Ok(())
        } else {
            Err(SignalingError::invalid_state(
                operation,
                format!("connection={} session={}", self.connection, self.session),
            ))
        }
    }

    fn require_role(
        &self,
        handle_id: HandleId,
        role: Role,
        operation: &'static str,
    ) -> Result<Plugin> {
        self.require_active(operation)?;
        let handle = self
            .handles
            .get(handle_id)
            .ok_or(SignalingError::UnknownHandle(handle_id))?;
        if handle.role != role {
            return Err(SignalingError::invalid_state(
                operation,
                format!("handle {handle_id} is a {}", handle.role),
            ));
        }
        Ok(handle.plugin)
    }

    fn send_message(
        &mut self,
        handle_id: HandleId,
        body: serde_json::Value,
        jsep: Option<Jsep>,
        pending: PendingRequest,
    ) -> Result<()> {
        self.send_request(
            Request::Message {
                session_id: self.session_id,
                handle_id,
                body,
                jsep,
            },
            Some(pending),
        )?;
        Ok(())
    }

    /// Serialize and send one request, registering its transaction first when
    /// a reply is expected
    fn send_request(
        &mut self,
        request: Request,
        pending: Option<PendingRequest>,
    ) -> Result<String> {
        let tracked = pending.is_some();
        let tid = match pending {
            Some(pending) => self.transactions.begin(pending),
            None => random_transaction_id(),
        };

        let frame = match OutboundMessage::new(request, tid.clone()).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                self.transactions.take(&tid);
                return Err(e.into());
            }
        };

        debug!("C->WSS: {}", frame);
        if let Err(e) = self.transport.send(frame) {
            if tracked {
                self.transactions.take(&tid);
            }
            self.fail_transport(&e);
            return Err(e.into());
        }
        Ok(tid)
    }

    fn emit(&mut self, event: SessionEvent) {
        if self.closed_notified {
            debug!("通道已关闭，丢弃事件: {:?}", event);
            return;
        }
        self.sink.on_event(event);
    }

    fn emit_closed(&mut self) {
        if self.closed_notified {
            return;
        }
        self.sink.on_event(SessionEvent::ChannelClosed);
        self.closed_notified = true;
    }
}
