//! Persistence backends a registration can be written to

use crate::error::{RegistryError, Result};
use crate::flat::{ConsulStore, FlatStore, ServiceRegistration};
use crate::store::{CoordinationStore, CreateMode, EtcdStore, InMemoryStore, parent_of};
use regsync_config::{
    PROP_HOST, PROP_SERVICE_ID, PROP_SERVICE_NAME, RegisterCenterConfig, RegisterType,
};
use std::sync::Arc;
use tracing::debug;

/// Hierarchical, watch-capable store
#[derive(Clone)]
pub struct TreeBackend {
    store: Arc<dyn CoordinationStore>,
}

impl TreeBackend {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Create-or-overwrite a durable leaf, creating missing ancestors
    pub async fn put_persistent(&self, path: &str, data: &str) -> Result<()> {
        self.put(path, data, CreateMode::Persistent).await
    }

    /// Create-or-replace a leaf that lives as long as this connection
    ///
    /// A leaf left by an earlier session (a restarted producer re-registering
    /// the same endpoint) is deleted and created again, so it is owned by
    /// this connection and outlives the old one.
    pub async fn put_ephemeral(&self, path: &str, data: &str) -> Result<()> {
        self.put(path, data, CreateMode::Ephemeral).await
    }

    async fn put(&self, path: &str, data: &str, mode: CreateMode) -> Result<()> {
        if let Some(parent) = parent_of(path) {
            if !self.store.exists(parent).await? {
                self.store.create_persistent(parent, true).await?;
            }
        }

        if self.store.exists(path).await? {
            match mode {
                CreateMode::Persistent => return self.store.write_data(path, data).await,
                CreateMode::Ephemeral => self.release(path).await?,
            }
        }
        match self.store.create(path, data, mode).await {
            // lost a race with another writer of the same identity
            Err(RegistryError::NodeExists(_)) => {
                debug!("{} appeared concurrently, replacing", path);
                match mode {
                    CreateMode::Persistent => self.store.write_data(path, data).await,
                    CreateMode::Ephemeral => {
                        self.release(path).await?;
                        self.store.create(path, data, mode).await
                    }
                }
            }
            other => other,
        }
    }

    async fn release(&self, path: &str) -> Result<()> {
        match self.store.delete(path).await {
            Err(RegistryError::NoNode(_)) => Ok(()),
            other => other,
        }
    }
}

/// Flat key-value store plus the producer's own service registration
#[derive(Clone)]
pub struct FlatBackend {
    store: Arc<dyn FlatStore>,
}

impl FlatBackend {
    pub fn new(store: Arc<dyn FlatStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FlatStore> {
        &self.store
    }

    /// Create-or-overwrite the value at `key`
    pub async fn set_value(&self, key: &str, data: &str) -> Result<()> {
        self.store.set_kv_value(key, data).await
    }

    /// Attach `data` to the producer's registration under `name`
    pub async fn attach(&self, name: &str, data: &str) -> Result<()> {
        self.store.put_registration_meta(name, data).await
    }
}

/// Where registrations are persisted, chosen once at startup
#[derive(Clone)]
pub enum RegistryBackend {
    Tree(TreeBackend),
    Flat(FlatBackend),
}

impl RegistryBackend {
    pub fn tree(store: Arc<dyn CoordinationStore>) -> Self {
        RegistryBackend::Tree(TreeBackend::new(store))
    }

    pub fn flat(store: Arc<dyn FlatStore>) -> Self {
        RegistryBackend::Flat(FlatBackend::new(store))
    }

    /// Build and connect the backend selected by `registerType`
    pub async fn connect(config: &RegisterCenterConfig) -> Result<Self> {
        Ok(match config.register_type()? {
            RegisterType::Memory => Self::tree(Arc::new(InMemoryStore::new())),
            RegisterType::Etcd => Self::tree(Arc::new(
                EtcdStore::connect(
                    first_server(config)?,
                    config.session_timeout()?,
                    config.connection_timeout()?,
                )
                .await?,
            )),
            RegisterType::Consul => {
                let store = ConsulStore::new(
                    first_server(config)?,
                    registration_from(config)?,
                    config.connection_timeout()?,
                )?;
                store.register_service().await?;
                Self::flat(Arc::new(store))
            }
        })
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, RegistryBackend::Tree(_))
    }

    /// Release the underlying connection
    pub async fn close(&self) -> Result<()> {
        match self {
            RegistryBackend::Tree(tree) => tree.store.close().await,
            RegistryBackend::Flat(_) => Ok(()),
        }
    }
}

// Only the first endpoint is used; the gateway/agent fans out itself.
fn first_server(config: &RegisterCenterConfig) -> Result<&str> {
    config
        .server_lists
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or_else(|| RegistryError::InvalidArgument("serverLists is empty".to_string()))
}

/// The producer's own registration, described by config props
pub fn registration_from(config: &RegisterCenterConfig) -> Result<ServiceRegistration> {
    let name = config
        .prop(PROP_SERVICE_NAME)
        .ok_or_else(|| RegistryError::InvalidArgument(format!("{} prop is required", PROP_SERVICE_NAME)))?;
    let host = config.prop(PROP_HOST).unwrap_or("127.0.0.1");
    let port = config.port()?.unwrap_or(0);
    let id = config
        .prop(PROP_SERVICE_ID)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{}-{}", name, host, port));

    Ok(ServiceRegistration::new(id, name, host, port))
}
