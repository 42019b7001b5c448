//! Hierarchical, watch-capable coordination stores
//!
//! A [`CoordinationStore`] exposes the handful of primitives the tree
//! backend needs. Watches are one-shot: a subscription fires at most once
//! and the [`Watch`] that receives it must subscribe again to keep
//! observing the path.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::{InMemoryStore, SessionId};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Lifetime of a created node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
}

/// What a fired watch observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A child was added to or removed from the watched node
    ChildrenChanged,
    /// The watched node's value was overwritten
    DataChanged,
    /// The watched node was removed
    NodeDeleted,
}

/// Notification delivered to a [`Watch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

impl WatchedEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Receiver of one-shot watch notifications
#[async_trait]
pub trait Watch: Send + Sync {
    async fn process(&self, event: WatchedEvent);
}

/// Tree store operations used by writers and watchers
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Whether a node exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create an empty durable node, and with `recursive` every missing
    /// ancestor. Succeeds when the node already exists.
    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()>;

    /// Create a node holding `data`; fails with `NodeExists` if present
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<()>;

    /// Overwrite the value of an existing node
    async fn write_data(&self, path: &str, data: &str) -> Result<()>;

    /// Read the value of a node
    async fn read_data(&self, path: &str) -> Result<String>;

    /// Names of the direct children of `path`, sorted
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Remove a leaf node
    async fn delete(&self, path: &str) -> Result<()>;

    /// Fire `watch` once when the children of `path` change
    async fn subscribe_child_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()>;

    /// Fire `watch` once when the value of `path` changes or it is deleted
    async fn subscribe_data_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()>;

    /// Release the connection; pending watches are dropped
    async fn close(&self) -> Result<()>;

    /// Whether [`close`](CoordinationStore::close) has not been called yet
    fn is_open(&self) -> bool {
        true
    }
}

/// Every proper ancestor of `path`, shallowest first
pub(crate) fn ancestors(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current.push('/');
        current.push_str(segment);
        result.push(current.clone());
    }
    result
}

/// Parent of `path`, `None` for top-level nodes
pub(crate) fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}
