//! In-process coordination store (for testing/development)

use super::{CoordinationStore, CreateMode, Watch, WatchEventKind, WatchedEvent, ancestors, parent_of};
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

/// Identity of one client connection to the store
pub type SessionId = u64;

struct Node {
    data: String,
    ephemeral_owner: Option<SessionId>,
}

type WatchList = Vec<(SessionId, Arc<dyn Watch>)>;

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    child_watches: HashMap<String, WatchList>,
    data_watches: HashMap<String, WatchList>,
}

enum Dispatch {
    Fire(Arc<dyn Watch>, WatchedEvent),
    Barrier(oneshot::Sender<()>),
}

struct Shared {
    tree: Mutex<Tree>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
    next_session: AtomicU64,
}

/// In-memory tree store with one-shot watches.
///
/// All handles created through [`InMemoryStore::session`] share one tree and
/// one dispatcher task, which delivers notifications sequentially in the
/// order the mutations happened. Ephemeral nodes belong to the session that
/// created them and vanish when that session is closed.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    session: SessionId,
    closed: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create a new store. Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Dispatch::Fire(watch, event) => watch.process(event).await,
                    Dispatch::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(Tree::default()),
                dispatch: tx,
                next_session: AtomicU64::new(2),
            }),
            session: 1,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open another session on the same tree
    pub fn session(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            session: self.shared.next_session.fetch_add(1, Ordering::SeqCst),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// Wait until every notification queued so far has been processed
    pub async fn settle(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.dispatch.send(Dispatch::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of armed (child, data) watches on `path`
    pub async fn pending_watches(&self, path: &str) -> (usize, usize) {
        let tree = self.shared.tree.lock().await;
        (
            tree.child_watches.get(path).map(Vec::len).unwrap_or(0),
            tree.data_watches.get(path).map(Vec::len).unwrap_or(0),
        )
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::BackendUnavailable(format!(
                "session {} is closed",
                self.session
            )));
        }
        Ok(())
    }

    fn fire(&self, watches: Option<WatchList>, kind: WatchEventKind, path: &str) {
        for (_, watch) in watches.unwrap_or_default() {
            let _ = self
                .shared
                .dispatch
                .send(Dispatch::Fire(watch, WatchedEvent::new(kind, path)));
        }
    }

    fn insert_node(&self, tree: &mut Tree, path: &str, data: &str, owner: Option<SessionId>) {
        tree.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_string(),
                ephemeral_owner: owner,
            },
        );
        if let Some(parent) = parent_of(path) {
            let watches = tree.child_watches.remove(parent);
            self.fire(watches, WatchEventKind::ChildrenChanged, parent);
        }
    }

    fn remove_node(&self, tree: &mut Tree, path: &str) {
        tree.nodes.remove(path);
        let watches = tree.data_watches.remove(path);
        self.fire(watches, WatchEventKind::NodeDeleted, path);
        let watches = tree.child_watches.remove(path);
        self.fire(watches, WatchEventKind::NodeDeleted, path);
        if let Some(parent) = parent_of(path) {
            let watches = tree.child_watches.remove(parent);
            self.fire(watches, WatchEventKind::ChildrenChanged, parent);
        }
    }

    fn children_of(tree: &Tree, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        tree.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    fn parent_present(tree: &Tree, path: &str) -> bool {
        parent_of(path).is_none_or(|parent| tree.nodes.contains_key(parent))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.check_open()?;
        Ok(self.shared.tree.lock().await.nodes.contains_key(path))
    }

    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;

        if recursive {
            for ancestor in ancestors(path) {
                if !tree.nodes.contains_key(&ancestor) {
                    self.insert_node(&mut tree, &ancestor, "", None);
                }
            }
        } else if !Self::parent_present(&tree, path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }

        if !tree.nodes.contains_key(path) {
            self.insert_node(&mut tree, path, "", None);
        }
        Ok(())
    }

    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;

        if tree.nodes.contains_key(path) {
            return Err(RegistryError::NodeExists(path.to_string()));
        }
        if !Self::parent_present(&tree, path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.session),
        };
        self.insert_node(&mut tree, path, data, owner);
        Ok(())
    }

    async fn write_data(&self, path: &str, data: &str) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;

        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
        node.data = data.to_string();

        let watches = tree.data_watches.remove(path);
        self.fire(watches, WatchEventKind::DataChanged, path);
        Ok(())
    }

    async fn read_data(&self, path: &str) -> Result<String> {
        self.check_open()?;
        let tree = self.shared.tree.lock().await;
        tree.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| RegistryError::NoNode(path.to_string()))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.check_open()?;
        let tree = self.shared.tree.lock().await;
        if !tree.nodes.contains_key(path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        Ok(Self::children_of(&tree, path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;

        if !tree.nodes.contains_key(path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        if !Self::children_of(&tree, path).is_empty() {
            return Err(RegistryError::RegistrationWriteFailed(format!(
                "{} still has children",
                path
            )));
        }
        self.remove_node(&mut tree, path);
        Ok(())
    }

    async fn subscribe_child_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;
        if !tree.nodes.contains_key(path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        tree.child_watches
            .entry(path.to_string())
            .or_default()
            .push((self.session, watch));
        Ok(())
    }

    async fn subscribe_data_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
        self.check_open()?;
        let mut tree = self.shared.tree.lock().await;
        if !tree.nodes.contains_key(path) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        tree.data_watches
            .entry(path.to_string())
            .or_default()
            .push((self.session, watch));
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut tree = self.shared.tree.lock().await;

        for watches in tree.child_watches.values_mut() {
            watches.retain(|(owner, _)| *owner != self.session);
        }
        for watches in tree.data_watches.values_mut() {
            watches.retain(|(owner, _)| *owner != self.session);
        }

        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(self.session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.remove_node(&mut tree, path);
        }

        debug!(
            "Closed in-memory session {} ({} ephemeral nodes removed)",
            self.session,
            owned.len()
        );
        Ok(())
    }
}
