//! 事务注册表
//!
//! Each outstanding request owns one entry keyed by its transaction id. The
//! entry records what the request was for, so the reply is handled by matching
//! on [`PendingRequest`] instead of by a stored callback.

use crate::protocol::{FeedId, HandleId, Jsep, random_transaction_id};
use janus_common::Plugin;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// What an outstanding transaction is waiting to complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    CreateSession,
    /// `feed_id == None` attaches the local publisher handle
    Attach {
        plugin: Plugin,
        feed_id: Option<FeedId>,
        display: String,
    },
    Join {
        handle_id: HandleId,
    },
    Configure {
        handle_id: HandleId,
    },
    Start {
        handle_id: HandleId,
    },
    Mute {
        handle_id: HandleId,
        muted: bool,
    },
    Detach {
        handle_id: HandleId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequestKind {
    CreateSession,
    Attach,
    Join,
    Configure,
    Start,
    Mute,
    Detach,
}

impl PendingRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            PendingRequest::CreateSession => RequestKind::CreateSession,
            PendingRequest::Attach { .. } => RequestKind::Attach,
            PendingRequest::Join { .. } => RequestKind::Join,
            PendingRequest::Configure { .. } => RequestKind::Configure,
            PendingRequest::Start { .. } => RequestKind::Start,
            PendingRequest::Mute { .. } => RequestKind::Mute,
            PendingRequest::Detach { .. } => RequestKind::Detach,
        }
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        match self {
            PendingRequest::Join { handle_id }
            | PendingRequest::Configure { handle_id }
            | PendingRequest::Start { handle_id }
            | PendingRequest::Mute { handle_id, .. }
            | PendingRequest::Detach { handle_id } => Some(*handle_id),
            PendingRequest::CreateSession | PendingRequest::Attach { .. } => None,
        }
    }
}

/// 已解析的回复结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// `id` is `data.id` of the reply, 0 when absent
    Success { id: u64, jsep: Option<Jsep> },
    Failure { reason: String, code: String },
}

impl TransactionOutcome {
    pub fn success(id: u64) -> Self {
        TransactionOutcome::Success { id, jsep: None }
    }

    pub fn failure(reason: impl Into<String>, code: impl Into<String>) -> Self {
        TransactionOutcome::Failure {
            reason: reason.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub request: PendingRequest,
    pub created_at: Instant,
}

/// Outstanding transactions keyed by id
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    pending: HashMap<String, Transaction>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under a fresh id, unique among outstanding entries
    pub fn begin(&mut self, request: PendingRequest) -> String {
        let mut id = random_transaction_id();
        while self.pending.contains_key(&id) {
            id = random_transaction_id();
        }
        self.pending.insert(
            id.clone(),
            Transaction {
                id: id.clone(),
                request,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Remove and return the entry; a second call for the same id yields `None`
    pub fn take(&mut self, id: &str) -> Option<Transaction> {
        self.pending.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.pending.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Remove and return every entry older than `timeout` at `now`
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Transaction> {
        let stale: Vec<String> = self
            .pending
            .values()
            .filter(|tx| now.saturating_duration_since(tx.created_at) >= timeout)
            .map(|tx| tx.id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    /// Whether a subscriber attach for `feed_id` is already in flight
    pub fn pending_attach_for(&self, feed_id: FeedId) -> bool {
        self.pending.values().any(|tx| {
            matches!(&tx.request, PendingRequest::Attach { feed_id: Some(f), .. } if *f == feed_id)
        })
    }
}
