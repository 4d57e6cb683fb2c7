//! janus-room 主程序
//!
//! 加入 Janus 网关上的一个房间，记录所有会话事件，直到到达时限、
//! 收到 Ctrl-C 或网关关闭通道

mod cli;
mod error;
mod observability;

use clap::Parser;
use janus_common::config::{JanusRoomConfig, hard_errors};
use observability::init_observability;
use signaling::{SessionEvent, SignalingClient};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

/// Why the room monitor stopped watching events
#[derive(Debug, PartialEq, Eq)]
enum StopReason {
    DurationElapsed,
    CtrlC,
    ChannelClosed,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            // The signaling loop owns its own thread; the monitor only needs a light runtime
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(
                &config_path,
                cli.duration.map(Duration::from_secs),
            ))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", provided_path);
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        }

        let fallback_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/janus-room/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            }
            bootstrap_info!("Config not found at: {:?}", path);
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: janus-room --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        let config = JanusRoomConfig::from_file(config_path).inspect_err(|e| {
            error!("❌ 配置文件解析失败: {}", e);
        })?;
        info!("✅ 配置文件解析成功: {:?}", config_path);

        match config.validate() {
            Ok(()) => info!("✅ 配置验证通过"),
            Err(problems) => {
                error!("❌ 配置验证发现问题:");
                for (i, problem) in problems.iter().enumerate() {
                    if problem.starts_with("Warning:") {
                        info!("  {}. ⚠️  {}", i + 1, problem);
                    } else {
                        error!("  {}. ❌ {}", i + 1, problem);
                    }
                }
                if !hard_errors(&problems).is_empty() {
                    return Err(Error::validation("配置验证失败"));
                }
            }
        }

        info!(
            "🎯 网关 {} / 插件 {} / 房间 {}",
            config.gateway.url, config.gateway.plugin, config.gateway.room
        );
        Ok(())
    }

    /// 加载并验证配置，有硬错误时拒绝启动
    fn load_config(config_path: &Path) -> Result<JanusRoomConfig> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = JanusRoomConfig::from_file(config_path).inspect_err(|e| {
            bootstrap_error!("❌ 配置加载失败: {}", e);
        })?;
        bootstrap_info!("✅ 配置加载成功");

        if let Err(problems) = config.validate() {
            bootstrap_error!("❌ 配置验证发现问题:");
            for (i, problem) in problems.iter().enumerate() {
                if problem.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, problem);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, problem);
                }
            }
            if !hard_errors(&problems).is_empty() {
                return Err(Error::validation("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path, duration: Option<Duration>) -> Result<()> {
        let config = Self::load_config(config_path)?;
        let _observability_guard = init_observability(&config)?;

        let gateway = config.gateway_config().clone();
        info!(
            "🚀 {} 启动: 网关 {} 插件 {} 房间 {}",
            config.name, gateway.url, gateway.plugin, gateway.room
        );

        let (client, mut events) = SignalingClient::start(gateway)?;
        client.connect()?;

        let (reason, channel_error) = Self::monitor_room(&mut events, duration).await;
        info!("🛑 停止监听房间: {:?}", reason);

        client.disconnect().await?;
        // the loop finishes with ChannelClosed; log whatever is still queued
        while let Some(event) = events.recv().await {
            log_event(&event);
        }

        match channel_error {
            Some(message) if reason == StopReason::ChannelClosed => Err(Error::channel(message)),
            _ => {
                info!("👋 已离开房间");
                Ok(())
            }
        }
    }

    /// Log events until the duration elapses, Ctrl-C arrives or the channel closes.
    ///
    /// Returns the stop reason and the last ChannelError seen, if any.
    async fn monitor_room(
        events: &mut mpsc::Receiver<SessionEvent>,
        duration: Option<Duration>,
    ) -> (StopReason, Option<String>) {
        let deadline = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut channel_error = None;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return (StopReason::ChannelClosed, channel_error);
                    };
                    log_event(&event);
                    match event {
                        SessionEvent::ChannelError { message } => channel_error = Some(message),
                        SessionEvent::ChannelClosed => return (StopReason::ChannelClosed, channel_error),
                        _ => {}
                    }
                }
                _ = &mut deadline => return (StopReason::DurationElapsed, channel_error),
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("无法监听Ctrl-C信号: {}", e);
                    }
                    info!("收到Ctrl-C信号，开始离开房间...");
                    return (StopReason::CtrlC, channel_error);
                }
            }
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::PublisherJoined { handle_id } => {
            info!("🎉 已作为发布者加入房间 (handle {})", handle_id)
        }
        SessionEvent::RemoteJsep {
            handle_id,
            role,
            jsep,
        } => info!(
            "📨 句柄 {} ({}) 收到远端 {}，SDP {} 字节（无媒体引擎，不作应答）",
            handle_id,
            role,
            jsep.sdp_type,
            jsep.sdp.len()
        ),
        SessionEvent::PeerLeft {
            handle_id,
            feed_id,
            display: name,
        } => info!("👋 {} 离开 (feed {}, handle {})", name, feed_id, handle_id),
        SessionEvent::SubscriptionStarted { handle_id } => {
            info!("▶️  订阅已开始 (handle {})", handle_id)
        }
        SessionEvent::RequestFailed {
            request,
            handle_id,
            reason,
            code,
        } => match handle_id {
            Some(handle_id) => warn!(
                "⚠️  请求 {} 失败 (handle {}): {} ({})",
                request, handle_id, reason, code
            ),
            None => warn!("⚠️  请求 {} 失败: {} ({})", request, reason, code),
        },
        SessionEvent::Notification {
            handle_id,
            kind,
            detail,
        } => info!("🔔 handle {} {}: {}", handle_id, kind, detail),
        SessionEvent::ChannelError { message } => error!("❌ 信令通道错误: {}", message),
        SessionEvent::ChannelClosed => info!("🔌 信令通道已关闭"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signaling::{FeedId, HandleId, Jsep, NotificationKind, Role};

    fn room_events() -> Vec<SessionEvent> {
        vec![
            SessionEvent::PublisherJoined {
                handle_id: HandleId(7),
            },
            SessionEvent::RemoteJsep {
                handle_id: HandleId(8),
                role: Role::Subscriber,
                jsep: Jsep::offer("v=0"),
            },
            SessionEvent::SubscriptionStarted {
                handle_id: HandleId(8),
            },
            SessionEvent::Notification {
                handle_id: HandleId(8),
                kind: NotificationKind::WebRtcUp,
                detail: String::new(),
            },
            SessionEvent::PeerLeft {
                handle_id: HandleId(8),
                feed_id: FeedId(77),
                display: "carol".to_string(),
            },
            SessionEvent::ChannelError {
                message: "gateway shutdown".to_string(),
            },
            SessionEvent::ChannelClosed,
        ]
    }

    #[tokio::test]
    async fn test_monitor_logs_until_channel_closed() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (tx, mut rx) = mpsc::channel(16);
        for event in room_events() {
            tx.send(event).await.unwrap();
        }

        let (reason, channel_error) = ApplicationLauncher::monitor_room(&mut rx, None).await;
        assert_eq!(reason, StopReason::ChannelClosed);
        assert_eq!(channel_error.as_deref(), Some("gateway shutdown"));
    }

    #[tokio::test]
    async fn test_monitor_stops_when_duration_elapses() {
        let (tx, mut rx) = mpsc::channel::<SessionEvent>(1);
        let (reason, channel_error) =
            ApplicationLauncher::monitor_room(&mut rx, Some(Duration::from_millis(20))).await;
        assert_eq!(reason, StopReason::DurationElapsed);
        assert!(channel_error.is_none());
        drop(tx);
    }
}
