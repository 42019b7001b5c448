//! Consumer-side watch of the registration tree
//!
//! One kind watcher observes each `{root}/{rpcType}/{kind}` parent and
//! spawns a context watcher per context path below it. Context watchers
//! diff the leaf names they see against a snapshot of the names they already
//! processed and publish only the new ones; each published leaf gets its own
//! data watch so later overwrites are republished.
//!
//! Store watches are one-shot. Every handler subscribes again before it
//! reads, so a change landing between the read and the next notification is
//! never lost.

use crate::codec::JsonCodec;
use crate::error::{RegistryError, Result};
use crate::path::PathScheme;
use crate::publisher::Publisher;
use crate::record::{RecordBatch, RecordKind, RpcType, UriRecord};
use crate::store::{CoordinationStore, Watch, WatchEventKind, WatchedEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const REARM_RETRY_MIN: Duration = Duration::from_millis(50);
const REARM_RETRY_MAX: Duration = Duration::from_secs(5);

/// What happens to watcher state for context paths that disappear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep the state; a path that comes back is watched again
    #[default]
    Retain,
    /// Drop the state and let the path's watcher retire
    EvictRemoved,
}

impl EvictionPolicy {
    pub fn from_flag(evict: bool) -> Self {
        if evict {
            EvictionPolicy::EvictRemoved
        } else {
            EvictionPolicy::Retain
        }
    }
}

struct Shared {
    store: Arc<dyn CoordinationStore>,
    publisher: Publisher,
    codec: JsonCodec,
    policy: EvictionPolicy,
}

impl Shared {
    async fn ensure_exists(&self, path: &str) -> Result<()> {
        if !self.store.exists(path).await? {
            self.store.create_persistent(path, true).await?;
        }
        Ok(())
    }

    /// Run `arm` again while it fails with `BackendUnavailable`, backing off
    /// between attempts. Gives up once the store is closed or `retired` is set.
    async fn rearm<F, Fut>(&self, path: &str, retired: &AtomicBool, mut arm: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut delay = REARM_RETRY_MIN;
        loop {
            match arm().await {
                Err(RegistryError::BackendUnavailable(reason))
                    if self.store.is_open() && !retired.load(Ordering::SeqCst) =>
                {
                    warn!("Re-arming {} failed: {}, retrying in {:?}", path, reason, delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(REARM_RETRY_MAX);
                }
                other => return other,
            }
        }
    }
}

/// Watches every rpc type and record kind under one root
pub struct TreeWatcher {
    scheme: PathScheme,
    roots: Vec<Arc<KindWatcher>>,
}

impl TreeWatcher {
    /// Create missing placeholders, publish what is already stored and arm
    /// every watch. Any store failure here is returned.
    pub async fn start(
        store: Arc<dyn CoordinationStore>,
        publisher: Publisher,
        scheme: PathScheme,
        codec: JsonCodec,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            store,
            publisher,
            codec,
            policy,
        });

        let targets = RpcType::ALL
            .iter()
            .map(|rpc_type| (*rpc_type, RecordKind::Metadata))
            .chain(RpcType::WITH_URI.iter().map(|rpc_type| (*rpc_type, RecordKind::Uri)));

        let mut roots = Vec::new();
        for (rpc_type, kind) in targets {
            let parent = scheme.context_path_parent(rpc_type.name(), kind)?;
            let root = KindWatcher::new(shared.clone(), rpc_type, kind, parent);
            root.init().await?;
            roots.push(root);
        }

        info!(
            "Watching {} subtrees under {} ({:?})",
            roots.len(),
            scheme.root(),
            policy
        );
        Ok(Self { scheme, roots })
    }

    fn root(&self, rpc_type: RpcType, kind: RecordKind) -> Option<&Arc<KindWatcher>> {
        self.roots
            .iter()
            .find(|root| root.rpc_type == rpc_type && root.kind == kind)
    }

    /// Context paths currently tracked for one subtree, sorted
    pub fn context_paths(&self, rpc_type: RpcType, kind: RecordKind) -> Vec<String> {
        let mut paths: Vec<String> = self
            .root(rpc_type, kind)
            .map(|root| {
                root.contexts
                    .iter()
                    .map(|entry| PathScheme::context_path_of(&entry.value().path))
                    .collect()
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Leaf names last observed under a context path
    pub async fn known_children(
        &self,
        rpc_type: RpcType,
        kind: RecordKind,
        context_path: &str,
    ) -> Option<Vec<String>> {
        let parent = self.scheme.parent_path(rpc_type.name(), kind, context_path).ok()?;
        let watcher = self
            .root(rpc_type, kind)?
            .contexts
            .get(PathScheme::leaf_name(&parent))
            .map(|entry| entry.value().clone())?;
        let snapshot = watcher.snapshot.lock().await;
        Some(snapshot.known.clone())
    }

    /// Stop reacting to notifications; pending watches fire into nothing
    pub fn shutdown(&self) {
        for root in &self.roots {
            root.retired.store(true, Ordering::SeqCst);
            for entry in root.contexts.iter() {
                entry.value().retire();
            }
        }
    }
}

/// Watches the context-path children of `{root}/{rpcType}/{kind}`
struct KindWatcher {
    me: Weak<KindWatcher>,
    shared: Arc<Shared>,
    rpc_type: RpcType,
    kind: RecordKind,
    parent: String,
    contexts: DashMap<String, Arc<ContextWatcher>>,
    retired: AtomicBool,
}

impl KindWatcher {
    fn new(shared: Arc<Shared>, rpc_type: RpcType, kind: RecordKind, parent: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            shared,
            rpc_type,
            kind,
            parent,
            contexts: DashMap::new(),
            retired: AtomicBool::new(false),
        })
    }

    async fn init(&self) -> Result<()> {
        self.shared.ensure_exists(&self.parent).await?;
        self.arm().await?;
        self.sync().await
    }

    async fn arm(&self) -> Result<()> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        self.shared.store.subscribe_child_changes(&self.parent, me).await
    }

    /// Start watchers for context paths not seen before
    async fn sync(&self) -> Result<()> {
        let current = self.shared.store.get_children(&self.parent).await?;
        let mut failure = None;

        for name in &current {
            let watcher = match self.contexts.entry(name.clone()) {
                Entry::Occupied(slot) if !slot.get().is_retired() => continue,
                Entry::Occupied(mut slot) => {
                    let watcher = self.context_watcher(name);
                    slot.insert(watcher.clone());
                    watcher
                }
                Entry::Vacant(slot) => {
                    let watcher = self.context_watcher(name);
                    slot.insert(watcher.clone());
                    watcher
                }
            };

            debug!("Watching context path {}", watcher.path);
            if let Err(e) = watcher.init().await {
                error!("Failed to watch {}: {}", watcher.path, e);
                // forget it so the next notification tries again
                self.contexts.remove(name);
                failure.get_or_insert(e);
            }
        }

        if self.shared.policy == EvictionPolicy::EvictRemoved {
            let removed: Vec<String> = self
                .contexts
                .iter()
                .filter(|entry| !current.contains(entry.key()))
                .map(|entry| entry.key().clone())
                .collect();
            for name in removed {
                if let Some((_, watcher)) = self.contexts.remove(&name) {
                    watcher.retire();
                    info!("Evicted context path {}", watcher.path);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn context_watcher(&self, name: &str) -> Arc<ContextWatcher> {
        ContextWatcher::new(
            self.shared.clone(),
            self.kind,
            PathScheme::real_node(&self.parent, name),
        )
    }

    async fn refresh(&self) -> Result<()> {
        self.shared
            .rearm(&self.parent, &self.retired, || self.arm_or_recreate())
            .await?;
        self.sync().await
    }

    async fn arm_or_recreate(&self) -> Result<()> {
        match self.arm().await {
            Err(RegistryError::NoNode(_)) => {
                // someone removed the placeholder itself
                self.shared.ensure_exists(&self.parent).await?;
                self.arm().await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Watch for KindWatcher {
    async fn process(&self, event: WatchedEvent) {
        if self.retired.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.refresh().await {
            error!("Failed to refresh {} after {:?}: {}", self.parent, event.kind, e);
        }
    }
}

struct Snapshot {
    known: Vec<String>,
    // nothing live has been delivered since the last withdrawal
    withdrawn: bool,
    // as producers wrote it; the tree segment flattens inner `/`
    context_path: Option<String>,
}

impl Snapshot {
    fn remember(&mut self, batch: &RecordBatch) {
        if let RecordBatch::Uri(records) = batch {
            if let Some(record) = records.first() {
                self.context_path = Some(record.context_path.clone());
            }
        }
    }
}

/// Watches the leaves of one context path
struct ContextWatcher {
    me: Weak<ContextWatcher>,
    shared: Arc<Shared>,
    kind: RecordKind,
    path: String,
    snapshot: Mutex<Snapshot>,
    retired: AtomicBool,
}

impl ContextWatcher {
    fn new(shared: Arc<Shared>, kind: RecordKind, path: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            shared,
            kind,
            path,
            snapshot: Mutex::new(Snapshot {
                known: Vec::new(),
                withdrawn: true,
                context_path: None,
            }),
            retired: AtomicBool::new(false),
        })
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    async fn init(&self) -> Result<()> {
        self.arm().await?;
        self.resync().await
    }

    async fn arm(&self) -> Result<()> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        self.shared.store.subscribe_child_changes(&self.path, me).await
    }

    /// Publish leaves not in the snapshot, then replace the snapshot
    async fn resync(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        if self.is_retired() {
            return Ok(());
        }

        let current = match self.shared.store.get_children(&self.path).await {
            Ok(children) => children,
            Err(RegistryError::NoNode(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let added: Vec<String> = current
            .iter()
            .filter(|name| !snapshot.known.contains(name))
            .cloned()
            .collect();
        if !added.is_empty() {
            let batch = self.load(&added).await;
            snapshot.remember(&batch);
            self.publish(batch);
        }

        if !current.is_empty() {
            snapshot.withdrawn = false;
        } else if self.kind == RecordKind::Uri && !snapshot.withdrawn {
            let context_path = snapshot
                .context_path
                .clone()
                .unwrap_or_else(|| PathScheme::context_path_of(&self.path));
            info!("No live endpoints left for {}", context_path);
            self.publish(RecordBatch::Uri(vec![UriRecord::withdrawal(context_path)]));
            snapshot.withdrawn = true;
        }

        snapshot.known = current;
        Ok(())
    }

    /// Arm a data watch on each leaf, then read and decode it.
    ///
    /// Leaves that vanished or hold malformed values are logged and left
    /// out of the batch; their siblings are unaffected.
    async fn load(&self, leaves: &[String]) -> RecordBatch {
        let mut batch = match self.kind {
            RecordKind::Metadata => RecordBatch::Metadata(Vec::new()),
            RecordKind::Uri => RecordBatch::Uri(Vec::new()),
        };

        for leaf in leaves {
            let path = PathScheme::real_node(&self.path, leaf);
            if let Err(e) = self.arm_leaf(leaf).await {
                match e {
                    RegistryError::NoNode(_) => debug!("{} vanished before it was read", path),
                    e => warn!("Failed to watch {}: {}", path, e),
                }
                continue;
            }

            let decoded = match self.shared.store.read_data(&path).await {
                Ok(raw) => self.decode_into(&raw, &mut batch),
                Err(e) => Err(e),
            };
            if let Err(e) = decoded {
                warn!("Skipping {}: {}", path, e);
            }
        }
        batch
    }

    fn decode_into(&self, raw: &str, batch: &mut RecordBatch) -> Result<()> {
        match batch {
            RecordBatch::Metadata(records) => records.push(self.shared.codec.decode(raw)?),
            RecordBatch::Uri(records) => records.push(self.shared.codec.decode(raw)?),
        }
        Ok(())
    }

    async fn arm_leaf(&self, leaf: &str) -> Result<()> {
        let watch = Arc::new(LeafWatch {
            owner: self.me.clone(),
            leaf: leaf.to_string(),
        });
        self.shared
            .store
            .subscribe_data_changes(&PathScheme::real_node(&self.path, leaf), watch)
            .await
    }

    fn publish(&self, batch: RecordBatch) {
        let count = batch.len();
        let delivered = self.shared.publisher.publish(batch);
        debug!(
            "Published {} {} record(s) from {} to {} subscriber(s)",
            count, self.kind, self.path, delivered
        );
    }

    async fn leaf_changed(&self, leaf: &str) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        if self.is_retired() || !snapshot.known.iter().any(|known| known == leaf) {
            return Ok(());
        }
        let batch = self.load(&[leaf.to_string()]).await;
        snapshot.remember(&batch);
        self.publish(batch);
        Ok(())
    }

    async fn leaf_deleted(&self, leaf: &str) -> Result<()> {
        self.snapshot
            .lock()
            .await
            .known
            .retain(|known| known != leaf);
        // a leaf recreated before the next child notification is new again
        self.resync().await
    }

    async fn handle(&self, kind: WatchEventKind) -> Result<()> {
        match kind {
            WatchEventKind::ChildrenChanged => match self
                .shared
                .rearm(&self.path, &self.retired, || self.arm())
                .await
            {
                Err(RegistryError::NoNode(_)) => {
                    self.vanished();
                    Ok(())
                }
                Err(e) => Err(e),
                Ok(()) => self.resync().await,
            },
            WatchEventKind::NodeDeleted => {
                self.vanished();
                Ok(())
            }
            WatchEventKind::DataChanged => Ok(()),
        }
    }

    // the parent watcher starts over if the path comes back
    fn vanished(&self) {
        debug!("Context path {} removed", self.path);
        self.retire();
    }
}

#[async_trait]
impl Watch for ContextWatcher {
    async fn process(&self, event: WatchedEvent) {
        if self.is_retired() {
            debug!("Ignoring {:?} on retired {}", event.kind, self.path);
            return;
        }
        if let Err(e) = self.handle(event.kind).await {
            error!("Watch callback on {} failed: {}", self.path, e);
        }
    }
}

/// Data watch on one published leaf
struct LeafWatch {
    owner: Weak<ContextWatcher>,
    leaf: String,
}

#[async_trait]
impl Watch for LeafWatch {
    async fn process(&self, event: WatchedEvent) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let result = match event.kind {
            WatchEventKind::DataChanged => owner.leaf_changed(&self.leaf).await,
            WatchEventKind::NodeDeleted => owner.leaf_deleted(&self.leaf).await,
            WatchEventKind::ChildrenChanged => Ok(()),
        };
        if let Err(e) = result {
            error!("Watch callback on {} failed: {}", event.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RegistryBackend;
    use crate::record::MetadataRecord;
    use crate::store::{CreateMode, InMemoryStore};
    use crate::writer::RegistrationWriter;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedReceiver;

    const ROOT: &str = "/r";

    struct Harness {
        store: InMemoryStore,
        producer: InMemoryStore,
        writer: RegistrationWriter,
        watcher: TreeWatcher,
        rx: UnboundedReceiver<RecordBatch>,
    }

    impl Harness {
        async fn start(policy: EvictionPolicy) -> Self {
            let store = InMemoryStore::new();
            let producer = store.session();
            Self::start_on(store, producer, policy).await
        }

        async fn start_on(store: InMemoryStore, producer: InMemoryStore, policy: EvictionPolicy) -> Self {
            let publisher = Publisher::new();
            let rx = publisher.subscribe_channel();
            let watcher = TreeWatcher::start(
                Arc::new(store.clone()),
                publisher,
                PathScheme::new(ROOT),
                JsonCodec::new(),
                policy,
            )
            .await
            .unwrap();
            let writer = RegistrationWriter::new(
                RegistryBackend::tree(Arc::new(producer.clone())),
                PathScheme::new(ROOT),
                JsonCodec::new(),
            );
            Self {
                store,
                producer,
                writer,
                watcher,
                rx,
            }
        }

        async fn settle(&self) {
            // callbacks may queue follow-up notifications
            self.store.settle().await;
            self.store.settle().await;
        }

        async fn drain(&mut self) -> Vec<RecordBatch> {
            self.settle().await;
            let mut batches = Vec::new();
            while let Ok(batch) = self.rx.try_recv() {
                batches.push(batch);
            }
            batches
        }
    }

    fn metadata_of(batches: &[RecordBatch]) -> Vec<MetadataRecord> {
        batches
            .iter()
            .filter_map(|batch| match batch {
                RecordBatch::Metadata(records) => Some(records.clone()),
                RecordBatch::Uri(_) => None,
            })
            .flatten()
            .collect()
    }

    fn uris_of(batches: &[RecordBatch]) -> Vec<UriRecord> {
        batches
            .iter()
            .filter_map(|batch| match batch {
                RecordBatch::Uri(records) => Some(records.clone()),
                RecordBatch::Metadata(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Store whose next child subscriptions fail as if the connection dropped
    struct FlakyStore {
        inner: InMemoryStore,
        child_failures: AtomicUsize,
    }

    impl FlakyStore {
        fn fail_next_child_watches(&self, count: usize) {
            self.child_failures.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CoordinationStore for FlakyStore {
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()> {
            self.inner.create_persistent(path, recursive).await
        }

        async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<()> {
            self.inner.create(path, data, mode).await
        }

        async fn write_data(&self, path: &str, data: &str) -> Result<()> {
            self.inner.write_data(path, data).await
        }

        async fn read_data(&self, path: &str) -> Result<String> {
            self.inner.read_data(path).await
        }

        async fn get_children(&self, path: &str) -> Result<Vec<String>> {
            self.inner.get_children(path).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn subscribe_child_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
            let failing = self
                .child_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RegistryError::BackendUnavailable("connection reset".to_string()));
            }
            self.inner.subscribe_child_changes(path, watch).await
        }

        async fn subscribe_data_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
            self.inner.subscribe_data_changes(path, watch).await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    fn route(rule: &str) -> MetadataRecord {
        MetadataRecord::route(RpcType::Http, "/order", rule).with_endpoint("10.0.0.1", 8080)
    }

    #[tokio::test]
    async fn test_start_creates_placeholders() {
        let harness = Harness::start(EvictionPolicy::Retain).await;

        for rpc_type in RpcType::ALL {
            let path = format!("{}/{}/metadata", ROOT, rpc_type.name());
            assert!(harness.store.exists(&path).await.unwrap(), "{}", path);
        }
        assert!(harness.store.exists("/r/grpc/uri").await.unwrap());
        assert!(!harness.store.exists("/r/dubbo/uri").await.unwrap());
        assert_eq!(harness.store.pending_watches("/r/http/metadata").await, (1, 0));
    }

    #[tokio::test]
    async fn test_existing_records_published_on_start() {
        let store = InMemoryStore::new();
        let producer = store.session();
        let writer = RegistrationWriter::new(
            RegistryBackend::tree(Arc::new(producer.clone())),
            PathScheme::new(ROOT),
            JsonCodec::new(),
        );
        writer.register_metadata(&route("/list")).await.unwrap();
        writer.register_metadata(&route("/save")).await.unwrap();

        let mut harness = Harness::start_on(store, producer, EvictionPolicy::Retain).await;
        let batches = harness.drain().await;

        assert_eq!(
            batches,
            vec![RecordBatch::Metadata(vec![route("/list"), route("/save")])]
        );
    }

    #[tokio::test]
    async fn test_add_only_diffing_publishes_each_leaf_once() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        let rules: Vec<String> = (0..8).map(|i| format!("/rule{}", i)).collect();

        let mut published = Vec::new();
        for rule in &rules {
            harness.writer.register_metadata(&route(rule)).await.unwrap();
            published.extend(metadata_of(&harness.drain().await));
        }

        let identities: Vec<String> = published
            .iter()
            .map(|record| record.node_name().unwrap())
            .collect();
        let unique: HashSet<&String> = identities.iter().collect();
        assert_eq!(identities.len(), rules.len());
        assert_eq!(unique.len(), rules.len());

        let known = harness
            .watcher
            .known_children(RpcType::Http, RecordKind::Metadata, "/order")
            .await
            .unwrap();
        assert_eq!(known.len(), rules.len());
        assert_eq!(
            harness.store.pending_watches("/r/http/metadata/order").await,
            (1, 0)
        );
    }

    #[tokio::test]
    async fn test_child_watch_rearmed_after_every_change() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;

        for i in 0..10 {
            let record = route(&format!("/r{}", i));
            harness.writer.register_metadata(&record).await.unwrap();
            assert_eq!(metadata_of(&harness.drain().await), vec![record]);
        }
    }

    #[tokio::test]
    async fn test_child_watch_rearmed_after_transient_failures() {
        let store = InMemoryStore::new();
        let producer = store.session();
        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            child_failures: AtomicUsize::new(0),
        });
        let publisher = Publisher::new();
        let mut rx = publisher.subscribe_channel();
        let _watcher = TreeWatcher::start(
            flaky.clone(),
            publisher,
            PathScheme::new(ROOT),
            JsonCodec::new(),
            EvictionPolicy::Retain,
        )
        .await
        .unwrap();
        let writer = RegistrationWriter::new(
            RegistryBackend::tree(Arc::new(producer)),
            PathScheme::new(ROOT),
            JsonCodec::new(),
        );

        flaky.fail_next_child_watches(2);
        writer.register_metadata(&route("/list")).await.unwrap();
        store.settle().await;
        store.settle().await;

        assert_eq!(rx.try_recv().unwrap(), RecordBatch::Metadata(vec![route("/list")]));
        assert_eq!(store.pending_watches("/r/http/metadata").await, (1, 0));

        // the top level is still watched: a later context path shows up
        let record = MetadataRecord::route(RpcType::Http, "/pay", "/charge");
        writer.register_metadata(&record).await.unwrap();
        store.settle().await;
        store.settle().await;
        assert_eq!(rx.try_recv().unwrap(), RecordBatch::Metadata(vec![record]));
    }

    #[tokio::test]
    async fn test_data_watch_rearmed_after_every_update() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        harness.drain().await;

        for i in 0..10 {
            let record = route("/list").with_path(format!("/v{}", i));
            harness.writer.register_metadata(&record).await.unwrap();
            assert_eq!(metadata_of(&harness.drain().await), vec![record]);
        }
        assert_eq!(
            harness
                .store
                .pending_watches("/r/http/metadata/order/order-list")
                .await,
            (0, 1)
        );
    }

    #[tokio::test]
    async fn test_uri_withdrawal_when_last_endpoint_leaves() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        harness.writer.persist_interface(&route("/list")).await.unwrap();

        let batches = harness.drain().await;
        assert_eq!(
            uris_of(&batches),
            vec![UriRecord::from_metadata(&route("/list"))]
        );

        // producer disconnects, its ephemeral endpoint goes away
        harness.producer.close().await.unwrap();
        let batches = harness.drain().await;

        assert_eq!(batches, vec![RecordBatch::Uri(vec![UriRecord::withdrawal("/order")])]);
        assert!(uris_of(&batches)[0].is_withdrawal());
    }

    #[tokio::test]
    async fn test_withdrawal_keeps_nested_context_path() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        let record = MetadataRecord::route(RpcType::Http, "/api/order", "/list")
            .with_endpoint("10.0.0.1", 8080);
        harness.writer.persist_interface(&record).await.unwrap();

        let published = uris_of(&harness.drain().await);
        assert_eq!(published, vec![UriRecord::from_metadata(&record)]);
        assert_eq!(published[0].context_path, "/api/order");

        harness.producer.close().await.unwrap();
        let withdrawn = uris_of(&harness.drain().await);

        assert_eq!(withdrawn, vec![UriRecord::withdrawal("/api/order")]);
        assert!(withdrawn[0].is_withdrawal());
    }

    #[tokio::test]
    async fn test_no_withdrawal_while_endpoints_remain() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        let other = harness.store.session();
        let other_writer = RegistrationWriter::new(
            RegistryBackend::tree(Arc::new(other.clone())),
            PathScheme::new(ROOT),
            JsonCodec::new(),
        );

        harness.writer.persist_interface(&route("/list")).await.unwrap();
        other_writer
            .persist_interface(&route("/list").with_endpoint("10.0.0.2", 8080))
            .await
            .unwrap();
        harness.drain().await;

        other.close().await.unwrap();
        assert!(harness.drain().await.is_empty());

        harness.producer.close().await.unwrap();
        assert_eq!(
            uris_of(&harness.drain().await),
            vec![UriRecord::withdrawal("/order")]
        );
    }

    #[tokio::test]
    async fn test_malformed_sibling_does_not_block_others() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        let parent = "/r/http/metadata/order";
        harness.producer.create_persistent(parent, true).await.unwrap();
        harness
            .producer
            .create(&format!("{}/broken", parent), "not json", CreateMode::Persistent)
            .await
            .unwrap();
        harness.writer.register_metadata(&route("/list")).await.unwrap();

        assert_eq!(metadata_of(&harness.drain().await), vec![route("/list")]);

        // a later fix of the broken leaf is picked up by its data watch
        let fixed = route("/fixed");
        harness
            .producer
            .write_data(
                &format!("{}/broken", parent),
                &JsonCodec::new().encode(&fixed).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(metadata_of(&harness.drain().await), vec![fixed]);
    }

    #[tokio::test]
    async fn test_new_context_path_is_watched() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        harness.drain().await;

        let record = MetadataRecord::route(RpcType::Http, "/pay", "/charge");
        harness.writer.register_metadata(&record).await.unwrap();
        assert_eq!(metadata_of(&harness.drain().await), vec![record]);

        assert_eq!(
            harness.watcher.context_paths(RpcType::Http, RecordKind::Metadata),
            vec!["/order".to_string(), "/pay".to_string()]
        );
        // the first context path kept a single watch
        assert_eq!(
            harness.store.pending_watches("/r/http/metadata/order").await,
            (1, 0)
        );
    }

    #[tokio::test]
    async fn test_retain_keeps_removed_context_paths() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        let leaf = "/r/http/metadata/order/order-list";
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        harness.drain().await;

        harness.producer.delete(leaf).await.unwrap();
        harness.producer.delete("/r/http/metadata/order").await.unwrap();
        harness.drain().await;
        assert_eq!(
            harness.watcher.context_paths(RpcType::Http, RecordKind::Metadata),
            vec!["/order".to_string()]
        );

        // the path coming back is watched afresh
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        assert_eq!(metadata_of(&harness.drain().await), vec![route("/list")]);
    }

    #[tokio::test]
    async fn test_evict_removed_drops_context_paths() {
        let mut harness = Harness::start(EvictionPolicy::EvictRemoved).await;
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        harness.drain().await;

        harness
            .producer
            .delete("/r/http/metadata/order/order-list")
            .await
            .unwrap();
        harness.producer.delete("/r/http/metadata/order").await.unwrap();
        harness.drain().await;

        assert!(
            harness
                .watcher
                .context_paths(RpcType::Http, RecordKind::Metadata)
                .is_empty()
        );

        harness.writer.register_metadata(&route("/list")).await.unwrap();
        assert_eq!(metadata_of(&harness.drain().await), vec![route("/list")]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_publishing() {
        let mut harness = Harness::start(EvictionPolicy::Retain).await;
        harness.writer.register_metadata(&route("/list")).await.unwrap();
        harness.drain().await;

        harness.watcher.shutdown();
        harness.writer.register_metadata(&route("/save")).await.unwrap();
        assert!(harness.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_fails_on_closed_store() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();

        let result = TreeWatcher::start(
            Arc::new(store),
            Publisher::new(),
            PathScheme::new(ROOT),
            JsonCodec::new(),
            EvictionPolicy::Retain,
        )
        .await;
        assert!(matches!(result, Err(RegistryError::BackendUnavailable(_))));
    }

    #[test]
    fn test_eviction_policy_from_flag() {
        assert_eq!(EvictionPolicy::from_flag(false), EvictionPolicy::Retain);
        assert_eq!(EvictionPolicy::from_flag(true), EvictionPolicy::EvictRemoved);
    }
}
