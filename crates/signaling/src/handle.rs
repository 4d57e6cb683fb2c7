//! 句柄注册表
//!
//! `handles` (handle id -> handle) and `feeds` (feed id -> handle id) are two
//! views over one set. Every mutation goes through [`HandleRegistry::insert`]
//! or [`HandleRegistry::remove`] so `feeds[h.feed_id] == h.handle_id` holds for
//! every registered handle.

use crate::protocol::{FeedId, HandleId};
use janus_common::Plugin;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub handle_id: HandleId,
    /// Equals `handle_id` for the local publisher handle
    pub feed_id: FeedId,
    pub role: Role,
    pub plugin: Plugin,
    pub display: String,
}

impl Handle {
    pub fn publisher(handle_id: HandleId, plugin: Plugin, display: impl Into<String>) -> Self {
        Self {
            handle_id,
            feed_id: FeedId::from(handle_id),
            role: Role::Publisher,
            plugin,
            display: display.into(),
        }
    }

    pub fn subscriber(
        handle_id: HandleId,
        feed_id: FeedId,
        plugin: Plugin,
        display: impl Into<String>,
    ) -> Self {
        Self {
            handle_id,
            feed_id,
            role: Role::Subscriber,
            plugin,
            display: display.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: HashMap<HandleId, Handle>,
    feeds: HashMap<FeedId, HandleId>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. Any handle previously bound to the same handle id or
    /// feed id is evicted first and returned.
    pub fn insert(&mut self, handle: Handle) -> Vec<Handle> {
        let mut evicted = Vec::new();
        if let Some(old) = self.remove(handle.handle_id) {
            evicted.push(old);
        }
        if let Some(old_handle) = self.feeds.get(&handle.feed_id).copied()
            && let Some(old) = self.remove(old_handle)
        {
            evicted.push(old);
        }

        self.feeds.insert(handle.feed_id, handle.handle_id);
        self.handles.insert(handle.handle_id, handle);
        evicted
    }

    pub fn get(&self, handle_id: HandleId) -> Option<&Handle> {
        self.handles.get(&handle_id)
    }

    pub fn by_feed(&self, feed_id: FeedId) -> Option<&Handle> {
        self.feeds
            .get(&feed_id)
            .and_then(|handle_id| self.handles.get(handle_id))
    }

    pub fn handle_for_feed(&self, feed_id: FeedId) -> Option<HandleId> {
        self.feeds.get(&feed_id).copied()
    }

    pub fn contains(&self, handle_id: HandleId) -> bool {
        self.handles.contains_key(&handle_id)
    }

    pub fn contains_feed(&self, feed_id: FeedId) -> bool {
        self.feeds.contains_key(&feed_id)
    }

    /// Remove a handle from both views
    pub fn remove(&mut self, handle_id: HandleId) -> Option<Handle> {
        let handle = self.handles.remove(&handle_id)?;
        if self.feeds.get(&handle.feed_id) == Some(&handle_id) {
            self.feeds.remove(&handle.feed_id);
        }
        Some(handle)
    }

    /// 本地发布者句柄
    pub fn publisher(&self) -> Option<&Handle> {
        self.handles.values().find(|h| h.role == Role::Publisher)
    }

    pub fn handle_ids(&self) -> Vec<HandleId> {
        self.handles.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
        self.feeds.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Check that both views describe the same set of handles
    pub fn is_consistent(&self) -> bool {
        self.handles.len() == self.feeds.len()
            && self.handles.values().all(|h| {
                self.feeds.get(&h.feed_id) == Some(&h.handle_id)
            })
            && self.feeds.iter().all(|(feed, handle_id)| {
                self.handles
                    .get(handle_id)
                    .is_some_and(|h| h.feed_id == *feed)
            })
    }
}
