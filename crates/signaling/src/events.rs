//! 上层事件
//!
//! Everything the signaling loop reports to the media/UI layer goes through a
//! [`SessionEventSink`]. The actor installs a [`ChannelSink`] that forwards into
//! a bounded channel owned by the host.

use crate::handle::Role;
use crate::protocol::{FeedId, HandleId, Jsep};
use crate::transaction::RequestKind;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    WebRtcUp,
    Media,
    SlowLink,
    Hangup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The local publisher handle joined the room
    PublisherJoined { handle_id: HandleId },
    /// The gateway offered SDP for a subscriber handle
    RemoteJsep {
        handle_id: HandleId,
        role: Role,
        jsep: Jsep,
    },
    PeerLeft {
        handle_id: HandleId,
        feed_id: FeedId,
        display: String,
    },
    /// A subscriber `start` was acknowledged; media is flowing
    SubscriptionStarted { handle_id: HandleId },
    /// Explicit client request rejected by the gateway or plugin
    RequestFailed {
        request: RequestKind,
        handle_id: Option<HandleId>,
        reason: String,
        code: String,
    },
    Notification {
        handle_id: HandleId,
        kind: NotificationKind,
        detail: String,
    },
    ChannelClosed,
    ChannelError { message: String },
}

impl SessionEvent {
    /// Channel-level events that must not be dropped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::ChannelClosed | SessionEvent::ChannelError { .. }
        )
    }
}

pub trait SessionEventSink {
    fn on_event(&mut self, event: SessionEvent);
}

impl SessionEventSink for Vec<SessionEvent> {
    fn on_event(&mut self, event: SessionEvent) {
        self.push(event);
    }
}

/// Forwards events into a bounded channel without blocking the loop
///
/// A full channel drops ordinary events with a warning. Terminal events are
/// parked and retried by [`ChannelSink::flush`], then drained before the loop
/// exits.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SessionEvent>,
    deferred: VecDeque<SessionEvent>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            tx,
            deferred: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Retry parked terminal events while the channel has room
    pub fn flush(&mut self) {
        while let Some(event) = self.deferred.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.deferred.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.deferred.clear();
                    break;
                }
            }
        }
    }

    /// Wait up to `timeout` for the host to take the parked events
    pub async fn drain(&mut self, timeout: Duration) {
        let tx = self.tx.clone();
        let deferred = &mut self.deferred;
        let result = tokio::time::timeout(timeout, async {
            while let Some(event) = deferred.pop_front() {
                if tx.send(event).await.is_err() {
                    deferred.clear();
                    break;
                }
            }
        })
        .await;

        if result.is_err() {
            warn!(
                "⚠️  事件通道未被消费，丢弃 {} 个终止事件",
                self.deferred.len()
            );
            self.deferred.clear();
        }
    }
}

impl SessionEventSink for ChannelSink {
    fn on_event(&mut self, event: SessionEvent) {
        if !self.deferred.is_empty() {
            self.flush();
        }

        if event.is_terminal() && !self.deferred.is_empty() {
            self.deferred.push_back(event);
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) if event.is_terminal() => {
                self.deferred.push_back(event);
            }
            Err(TrySendError::Full(event)) => {
                self.dropped += 1;
                warn!("事件通道已满，丢弃事件: {:?}", event);
            }
            Err(TrySendError::Closed(event)) => {
                debug!("事件接收端已关闭，忽略事件: {:?}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<SessionEvent> = Vec::new();
        sink.on_event(SessionEvent::ChannelClosed);
        assert_eq!(sink, vec![SessionEvent::ChannelClosed]);
        assert!(sink[0].is_terminal());
    }

    #[test]
    fn test_full_channel_drops_ordinary_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        sink.on_event(SessionEvent::PublisherJoined {
            handle_id: HandleId(1),
        });
        sink.on_event(SessionEvent::SubscriptionStarted {
            handle_id: HandleId(2),
        });

        assert_eq!(sink.dropped(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::PublisherJoined {
                handle_id: HandleId(1)
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_terminal_events_are_parked_in_order() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);

        sink.on_event(SessionEvent::PublisherJoined {
            handle_id: HandleId(1),
        });
        sink.on_event(SessionEvent::ChannelError {
            message: "boom".to_string(),
        });
        sink.on_event(SessionEvent::ChannelClosed);
        assert!(sink.has_deferred());

        rx.try_recv().unwrap();
        sink.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ChannelError {
                message: "boom".to_string()
            }
        );
        sink.flush();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::ChannelClosed);
        assert!(!sink.has_deferred());
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_consumer() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        sink.on_event(SessionEvent::PublisherJoined {
            handle_id: HandleId(1),
        });
        sink.on_event(SessionEvent::ChannelClosed);

        let consumer = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(event) = rx.recv().await {
                received.push(event);
            }
            received
        });

        sink.drain(Duration::from_secs(1)).await;
        assert!(!sink.has_deferred());
        drop(sink);

        let received = consumer.await.unwrap();
        assert_eq!(received.last(), Some(&SessionEvent::ChannelClosed));
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        sink.on_event(SessionEvent::ChannelError {
            message: "x".to_string(),
        });
        sink.on_event(SessionEvent::ChannelClosed);
        assert!(sink.has_deferred());

        sink.drain(Duration::from_millis(20)).await;
        assert!(!sink.has_deferred());
    }
}
