//! 信令 actor
//!
//! [`SignalingClient::start`] spawns a dedicated thread running a
//! current-thread tokio runtime. The [`ClientCore`] is built on that thread and
//! never leaves it; every public call is marshalled onto the loop as a
//! [`Command`]. The loop multiplexes three sources:
//!
//! - commands from [`SignalingClient`] handles
//! - transport events
//! - the keepalive deadline
//!
//! and publishes a [`ClientStatus`] snapshot after every turn.

use crate::core::{ClientCore, ClientStatus, ConnectionState, SessionState};
use crate::error::{Result, SignalingError};
use crate::events::{ChannelSink, SessionEvent, SessionEventSink};
use crate::protocol::{FeedId, HandleId, IceCandidate, Jsep, SessionId};
use crate::transport::{TransportAdapter, TransportEvent, WsTransport};
use janus_common::config::hard_errors;
use janus_common::{GatewayConfig, Plugin};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const LOOP_THREAD_NAME: &str = "janus-signaling";

#[derive(Debug)]
pub enum Command {
    Connect,
    AttachHandle {
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display: String,
    },
    JoinRoom(HandleId),
    ConfigureMedia {
        handle_id: HandleId,
        offer: Jsep,
    },
    AcceptAnswer {
        handle_id: HandleId,
        answer: Jsep,
    },
    SetMuted {
        handle_id: HandleId,
        muted: bool,
    },
    TrickleCandidate {
        handle_id: HandleId,
        candidate: IceCandidate,
    },
    TrickleComplete(HandleId),
    DetachHandle(HandleId),
    DestroySession,
    Disconnect,
}

/// Cloneable handle to one signaling loop
#[derive(Debug, Clone)]
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
    close_timeout: Duration,
}

impl SignalingClient {
    /// Start a loop that talks to the gateway over WebSocket
    pub fn start(config: GatewayConfig) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        Self::start_with_transport(config, WsTransport::new)
    }

    /// Start a loop with a custom transport, built on the loop thread from the
    /// sender it must report [`TransportEvent`]s to.
    ///
    /// The config is validated first; hard errors are returned as
    /// [`SignalingError::InvalidConfig`] and no thread is spawned.
    pub fn start_with_transport<T, F>(
        config: GatewayConfig,
        make_transport: F,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)>
    where
        T: TransportAdapter + 'static,
        F: FnOnce(mpsc::UnboundedSender<TransportEvent>) -> T + Send + 'static,
    {
        if let Err(problems) = config.validate() {
            let errors: Vec<String> = hard_errors(&problems).into_iter().cloned().collect();
            if !errors.is_empty() {
                error!("❌ 网关配置无效: {}", errors.join("; "));
                return Err(SignalingError::InvalidConfig(errors));
            }
            for warning in &problems {
                warn!("⚠️  {}", warning);
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(ClientStatus {
            connection: ConnectionState::New,
            session: SessionState::Uninitialized,
            session_id: SessionId::default(),
            handles: 0,
            pending_transactions: 0,
            running: true,
        });
        let close_timeout = config.close_timeout();

        std::thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("❌ 创建信令运行时失败: {}", e);
                        status_tx.send_modify(|s| s.running = false);
                        return;
                    }
                };
                runtime.block_on(run_loop(
                    config,
                    make_transport,
                    command_rx,
                    event_tx,
                    status_tx,
                ));
            })?;

        Ok((
            Self {
                commands: command_tx,
                status: status_rx,
                close_timeout,
            },
            event_rx,
        ))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SignalingError::LoopStopped)
    }

    /// Latest snapshot published by the loop
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status.borrow().running
    }

    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    pub fn attach_handle(
        &self,
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display: impl Into<String>,
    ) -> Result<()> {
        self.send(Command::AttachHandle {
            plugin,
            feed_id,
            display: display.into(),
        })
    }

    pub fn join_room(&self, handle_id: HandleId) -> Result<()> {
        self.send(Command::JoinRoom(handle_id))
    }

    pub fn configure_media(&self, handle_id: HandleId, offer: Jsep) -> Result<()> {
        self.send(Command::ConfigureMedia { handle_id, offer })
    }

    pub fn accept_answer(&self, handle_id: HandleId, answer: Jsep) -> Result<()> {
        self.send(Command::AcceptAnswer { handle_id, answer })
    }

    pub fn set_muted(&self, handle_id: HandleId, muted: bool) -> Result<()> {
        self.send(Command::SetMuted { handle_id, muted })
    }

    pub fn trickle_candidate(&self, handle_id: HandleId, candidate: IceCandidate) -> Result<()> {
        self.send(Command::TrickleCandidate {
            handle_id,
            candidate,
        })
    }

    pub fn trickle_complete(&self, handle_id: HandleId) -> Result<()> {
        self.send(Command::TrickleComplete(handle_id))
    }

    pub fn detach_handle(&self, handle_id: HandleId) -> Result<()> {
        self.send(Command::DetachHandle(handle_id))
    }

    pub fn destroy_session(&self) -> Result<()> {
        self.send(Command::DestroySession)
    }

    /// Destroy the session, close the transport and wait for the loop to stop.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn disconnect(&self) -> Result<()> {
        if self.send(Command::Disconnect).is_err() {
            debug!("信令循环已停止，disconnect 无需操作");
            return Ok(());
        }

        let mut status = self.status.clone();
        let budget = self.close_timeout * 2 + Duration::from_millis(100);
        match tokio::time::timeout(budget, status.wait_for(|s| !s.running)).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("⏱️  等待信令循环退出超时 ({:?})", budget);
                Ok(())
            }
        }
    }
}

async fn run_loop<T, F>(
    config: GatewayConfig,
    make_transport: F,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    status: watch::Sender<ClientStatus>,
) where
    T: TransportAdapter,
    F: FnOnce(mpsc::UnboundedSender<TransportEvent>) -> T,
{
    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let close_timeout = config.close_timeout();
    let transport = make_transport(transport_tx);
    let mut core = ClientCore::new(config, transport, ChannelSink::new(events));
    status.send_replace(core.status());
    info!("🚀 信令循环已启动");

    loop {
        let keepalive = core.next_keepalive_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Disconnect) | None => {
                    match core.disconnect() {
                        Ok(true) => wait_for_close(&mut core, &mut transport_rx, close_timeout).await,
                        Ok(false) => {}
                        Err(e) => warn!("disconnect 失败: {}", e),
                    }
                    break;
                }
                Some(command) => {
                    if let Err(e) = dispatch(&mut core, command) {
                        warn!("⚠️  命令执行失败: {}", e);
                    }
                }
            },
            Some(event) = transport_rx.recv() => {
                if let Err(e) = core.on_transport_event(event, Instant::now()) {
                    warn!("处理传输事件失败: {}", e);
                }
            }
            _ = sleep_until(keepalive) => {
                if let Err(e) = core.on_tick(Instant::now()) {
                    warn!("发送 keepalive 失败: {}", e);
                }
            }
        }

        core.sink_mut().flush();
        status.send_replace(core.status());
        if core.is_finished() {
            break;
        }
    }

    core.finish();
    status.send_replace(core.status());
    core.sink_mut().drain(close_timeout).await;
    info!("🛑 信令循环已退出");
}

fn dispatch<T: TransportAdapter, S: SessionEventSink>(
    core: &mut ClientCore<T, S>,
    command: Command,
) -> Result<()> {
    match command {
        Command::Connect => core.connect(),
        Command::AttachHandle {
            plugin,
            feed_id,
            display,
        } => core.attach_handle(plugin, feed_id, display),
        Command::JoinRoom(handle_id) => core.join_room(handle_id),
        Command::ConfigureMedia { handle_id, offer } => core.configure_media(handle_id, offer),
        Command::AcceptAnswer { handle_id, answer } => core.accept_answer(handle_id, answer),
        Command::SetMuted { handle_id, muted } => core.set_muted(handle_id, muted),
        Command::TrickleCandidate {
            handle_id,
            candidate,
        } => core.trickle_candidate(handle_id, candidate),
        Command::TrickleComplete(handle_id) => core.trickle_complete(handle_id),
        Command::DetachHandle(handle_id) => core.detach_handle(handle_id),
        Command::DestroySession => core.destroy_session(),
        Command::Disconnect => core.disconnect().map(|_| ()),
    }
}

/// Keep feeding transport events until the close is confirmed or `timeout` elapses
async fn wait_for_close<T: TransportAdapter, S: SessionEventSink>(
    core: &mut ClientCore<T, S>,
    transport_rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    while core.awaiting_close() {
        match tokio::time::timeout_at(deadline, transport_rx.recv()).await {
            Ok(Some(event)) => {
                if let Err(e) = core.on_transport_event(event, Instant::now()) {
                    warn!("关闭过程中处理传输事件失败: {}", e);
                }
            }
            Ok(None) => break,
            Err(_) => {
                warn!("⏱️  {:?} 内未收到关闭确认", timeout);
                break;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
