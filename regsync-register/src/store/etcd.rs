//! etcd coordination store
//!
//! Talks to the etcd v3 JSON gateway. Tree nodes are plain keys, the
//! children of `/a/b` are the keys exactly one level below `/a/b/`.
//! Ephemeral nodes are attached to a lease kept alive for as long as the
//! store is open; watches are `/v3/watch` streams that resolve on the
//! first relevant event. A stream that is canceled or dropped still
//! resolves once the gateway answers again, so the watch gets re-armed.

use super::{CoordinationStore, CreateMode, Watch, WatchEventKind, WatchedEvent, ancestors, parent_of};
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WATCH_RETRY_MIN: Duration = Duration::from_millis(100);
const WATCH_RETRY_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyValue {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    create_revision: Option<String>,
    #[serde(default)]
    mod_revision: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct WatchEnvelope {
    #[serde(default)]
    result: Option<WatchResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WatchResult {
    #[serde(default)]
    created: bool,
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    events: Vec<WatchEventJson>,
}

#[derive(Debug, Deserialize)]
struct WatchEventJson {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    kv: Option<KeyValue>,
}

impl WatchEventJson {
    fn is_delete(&self) -> bool {
        self.kind.as_deref() == Some("DELETE")
    }

    /// A PUT that brought the key into existence
    fn is_create(&self) -> bool {
        !self.is_delete()
            && self
                .kv
                .as_ref()
                .is_some_and(|kv| kv.create_revision.is_some() && kv.create_revision == kv.mod_revision)
    }
}

fn encode(raw: &str) -> String {
    general_purpose::STANDARD.encode(raw.as_bytes())
}

fn decode(raw: &str) -> Result<String> {
    let bytes = general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))
}

/// Exclusive end of the key range sharing `prefix`
fn prefix_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

fn children_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

/// Line-delimited JSON reader over a streaming gateway response
struct WatchStream {
    response: reqwest::Response,
    buffer: Vec<u8>,
}

impl WatchStream {
    async fn next_message(&mut self) -> Result<Option<WatchResult>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let envelope: WatchEnvelope = serde_json::from_slice(&line)
                    .map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
                if let Some(error) = envelope.error {
                    return Err(RegistryError::BackendUnavailable(format!("watch error: {}", error)));
                }
                return Ok(Some(envelope.result.unwrap_or_default()));
            }

            match self.response.chunk().await? {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => return Ok(None),
            }
        }
    }
}

struct Inner {
    base_url: String,
    client: reqwest::Client,
    lease_ttl: Duration,
    lease: OnceCell<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// etcd-backed tree store
#[derive(Clone)]
pub struct EtcdStore {
    inner: Arc<Inner>,
}

impl EtcdStore {
    /// Create an etcd store client without contacting the server
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use regsync_register::store::EtcdStore;
    /// use std::time::Duration;
    ///
    /// let etcd = EtcdStore::new("http://localhost:2379", Duration::from_secs(3), Duration::from_secs(3))?;
    /// ```
    pub fn new(
        base_url: impl Into<String>,
        session_timeout: Duration,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connection_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client,
                lease_ttl: session_timeout,
                lease: OnceCell::new(),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create a client and verify the server answers
    pub async fn connect(
        base_url: impl Into<String>,
        session_timeout: Duration,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let store = Self::new(base_url, session_timeout, connection_timeout)?;
        store.post("/v3/maintenance/status", json!({})).await?;
        info!("Connected to etcd at {}", store.inner.base_url);
        Ok(store)
    }

    /// Lease TTL in whole seconds, never below one
    fn ttl_secs(&self) -> u64 {
        let millis = self.inner.lease_ttl.as_millis() as u64;
        millis.div_ceil(1000).max(1)
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::BackendUnavailable("etcd store is closed".to_string()));
        }
        Ok(())
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.inner.base_url, endpoint);
        let response = self.inner.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if status.is_client_error() {
            Err(RegistryError::RegistrationWriteFailed(format!("{} {}: {}", endpoint, status, error)))
        } else {
            Err(RegistryError::BackendUnavailable(format!("{} {}: {}", endpoint, status, error)))
        }
    }

    async fn range(&self, body: serde_json::Value) -> Result<RangeResponse> {
        let value = self.post("/v3/kv/range", body).await?;
        serde_json::from_value(value).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))
    }

    async fn lease_id(&self) -> Result<String> {
        let id = self
            .inner
            .lease
            .get_or_try_init(|| async {
                let value = self
                    .post("/v3/lease/grant", json!({ "TTL": self.ttl_secs().to_string() }))
                    .await?;
                let grant: LeaseGrantResponse = serde_json::from_value(value)
                    .map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
                self.spawn_keepalive(grant.id.clone()).await;
                debug!("Granted etcd lease {} (ttl {}s)", grant.id, self.ttl_secs());
                Ok::<_, RegistryError>(grant.id)
            })
            .await?;
        Ok(id.clone())
    }

    async fn spawn_keepalive(&self, lease_id: String) {
        let store = self.clone();
        let period = Duration::from_millis((self.ttl_secs() * 1000 / 3).max(200));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store
                    .post("/v3/lease/keepalive", json!({ "ID": lease_id }))
                    .await
                {
                    warn!("etcd lease {} keepalive failed: {}", lease_id, e);
                }
            }
        });
        self.track(handle).await;
    }

    async fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Put `value` at `key` only if the key is absent; returns whether it was written
    async fn put_if_absent(&self, key: &str, value: &str, lease: Option<String>) -> Result<bool> {
        let mut put = json!({ "key": encode(key), "value": encode(value) });
        if let Some(lease) = lease {
            put["lease"] = json!(lease);
        }
        let body = json!({
            "compare": [{
                "key": encode(key),
                "result": "EQUAL",
                "target": "CREATE",
                "create_revision": "0",
            }],
            "success": [{ "request_put": put }],
        });

        let value = self.post("/v3/kv/txn", body).await?;
        let txn: TxnResponse =
            serde_json::from_value(value).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
        Ok(txn.succeeded)
    }

    async fn require_parent(&self, path: &str) -> Result<()> {
        if let Some(parent) = parent_of(path) {
            if !self.exists(parent).await? {
                return Err(RegistryError::NoNode(parent.to_string()));
            }
        }
        Ok(())
    }

    /// Open a watch stream and wait until the server confirms it
    async fn open_watch(&self, key: &str, range_end: Option<Vec<u8>>) -> Result<WatchStream> {
        let mut request = json!({ "key": encode(key) });
        if let Some(end) = range_end {
            request["range_end"] = json!(general_purpose::STANDARD.encode(end));
        }

        let url = format!("{}/v3/watch", self.inner.base_url);
        let response = self
            .inner
            .client
            .post(&url)
            .json(&json!({ "create_request": request }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::BackendUnavailable(format!(
                "watch on {} rejected: {}",
                key,
                response.status()
            )));
        }

        let mut stream = WatchStream {
            response,
            buffer: Vec::new(),
        };
        match stream.next_message().await? {
            Some(result) if result.created => Ok(stream),
            _ => Err(RegistryError::BackendUnavailable(format!(
                "watch on {} was not created",
                key
            ))),
        }
    }

    /// Drive `stream` until `classify` maps an event to a notification, then fire once.
    ///
    /// If the stream is lost first, changes may have been missed: the watch
    /// fires with `on_loss` (or `NodeDeleted` if the node is gone) as soon as
    /// the gateway can be reached again.
    async fn spawn_watch<F>(
        &self,
        mut stream: WatchStream,
        watch: Arc<dyn Watch>,
        path: String,
        on_loss: WatchEventKind,
        classify: F,
    ) where
        F: Fn(&WatchEventJson) -> Option<WatchEventKind> + Send + 'static,
    {
        let store = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match stream.next_message().await {
                    Ok(Some(result)) => {
                        if let Some(kind) = result.events.iter().find_map(&classify) {
                            watch.process(WatchedEvent::new(kind, path)).await;
                            return;
                        }
                        if result.canceled {
                            warn!("etcd watch on {} canceled by server", path);
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!("etcd watch stream on {} ended", path);
                        break;
                    }
                    Err(e) => {
                        warn!("etcd watch on {} failed: {}", path, e);
                        break;
                    }
                }
            }

            if let Some(kind) = store.recover(&path, on_loss).await {
                watch.process(WatchedEvent::new(kind, path)).await;
            }
        });
        self.track(handle).await;
    }

    /// Wait with backoff until `path` can be checked again; `None` once closed
    async fn recover(&self, path: &str, on_loss: WatchEventKind) -> Option<WatchEventKind> {
        let mut delay = WATCH_RETRY_MIN;
        loop {
            if !self.is_open() {
                return None;
            }
            match self.exists(path).await {
                Ok(true) => return Some(on_loss),
                Ok(false) => return Some(WatchEventKind::NodeDeleted),
                Err(e) => {
                    debug!("etcd unreachable while recovering watch on {}: {}", path, e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(WATCH_RETRY_MAX);
                }
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.check_open()?;
        let response = self
            .range(json!({ "key": encode(path), "keys_only": true }))
            .await?;
        Ok(!response.kvs.is_empty())
    }

    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()> {
        self.check_open()?;
        if recursive {
            for ancestor in ancestors(path) {
                self.put_if_absent(&ancestor, "", None).await?;
            }
        } else {
            self.require_parent(path).await?;
        }
        self.put_if_absent(path, "", None).await?;
        Ok(())
    }

    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<()> {
        self.check_open()?;
        self.require_parent(path).await?;

        let lease = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.lease_id().await?),
        };
        if self.put_if_absent(path, data, lease).await? {
            Ok(())
        } else {
            Err(RegistryError::NodeExists(path.to_string()))
        }
    }

    async fn write_data(&self, path: &str, data: &str) -> Result<()> {
        self.check_open()?;
        let body = json!({
            "compare": [{
                "key": encode(path),
                "result": "GREATER",
                "target": "CREATE",
                "create_revision": "0",
            }],
            "success": [{ "request_put": {
                "key": encode(path),
                "value": encode(data),
                "ignore_lease": true,
            }}],
        });

        let value = self.post("/v3/kv/txn", body).await?;
        let txn: TxnResponse =
            serde_json::from_value(value).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
        if txn.succeeded {
            Ok(())
        } else {
            Err(RegistryError::NoNode(path.to_string()))
        }
    }

    async fn read_data(&self, path: &str) -> Result<String> {
        self.check_open()?;
        let response = self.range(json!({ "key": encode(path) })).await?;
        let kv = response
            .kvs
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
        decode(&kv.value)
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        self.check_open()?;
        if !self.exists(path).await? {
            return Err(RegistryError::NoNode(path.to_string()));
        }

        let prefix = children_prefix(path);
        let response = self
            .range(json!({
                "key": encode(&prefix),
                "range_end": general_purpose::STANDARD.encode(prefix_end(&prefix)),
                "keys_only": true,
            }))
            .await?;

        let mut children = Vec::new();
        for kv in response.kvs {
            let key = decode(&kv.key)?;
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.push(rest.to_string());
                }
            }
        }
        children.sort();
        children.dedup();
        Ok(children)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_open()?;
        if !self.get_children(path).await?.is_empty() {
            return Err(RegistryError::RegistrationWriteFailed(format!(
                "{} still has children",
                path
            )));
        }

        let value = self
            .post("/v3/kv/deleterange", json!({ "key": encode(path) }))
            .await?;
        let response: DeleteResponse =
            serde_json::from_value(value).map_err(|e| RegistryError::DeserializationFailed(e.to_string()))?;
        match response.deleted.as_deref() {
            Some("0") | None => Err(RegistryError::NoNode(path.to_string())),
            Some(_) => Ok(()),
        }
    }

    async fn subscribe_child_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
        self.check_open()?;
        if !self.exists(path).await? {
            return Err(RegistryError::NoNode(path.to_string()));
        }

        let prefix = children_prefix(path);
        let stream = self.open_watch(&prefix, Some(prefix_end(&prefix))).await?;
        let child_prefix = prefix.clone();

        self.spawn_watch(stream, watch, path.to_string(), WatchEventKind::ChildrenChanged, move |event| {
            let key = event.kv.as_ref().and_then(|kv| decode(&kv.key).ok())?;
            let rest = key.strip_prefix(&child_prefix)?;
            let direct = !rest.is_empty() && !rest.contains('/');
            (direct && (event.is_delete() || event.is_create())).then_some(WatchEventKind::ChildrenChanged)
        })
        .await;
        Ok(())
    }

    async fn subscribe_data_changes(&self, path: &str, watch: Arc<dyn Watch>) -> Result<()> {
        self.check_open()?;
        if !self.exists(path).await? {
            return Err(RegistryError::NoNode(path.to_string()));
        }

        let stream = self.open_watch(path, None).await?;
        self.spawn_watch(stream, watch, path.to_string(), WatchEventKind::DataChanged, |event| {
            if event.is_delete() {
                Some(WatchEventKind::NodeDeleted)
            } else {
                Some(WatchEventKind::DataChanged)
            }
        })
        .await;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }

        if let Some(lease) = self.inner.lease.get() {
            if let Err(e) = self
                .post("/v3/lease/revoke", json!({ "ID": lease }))
                .await
            {
                warn!("Failed to revoke etcd lease {}: {}", lease, e);
            }
        }

        info!("Closed etcd store {}", self.inner.base_url);
        Ok(())
    }
}
