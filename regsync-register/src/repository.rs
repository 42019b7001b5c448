//! Entry points for consumers and producers

use crate::backend::RegistryBackend;
use crate::codec::JsonCodec;
use crate::error::{RegistryError, Result};
use crate::path::PathScheme;
use crate::publisher::Publisher;
use crate::record::MetadataRecord;
use crate::watcher::{EvictionPolicy, TreeWatcher};
use crate::writer::RegistrationWriter;
use regsync_config::RegisterCenterConfig;
use tracing::info;

/// Consumer side: mirrors the registration tree into a [`Publisher`]
pub struct ServerRegisterRepository {
    backend: RegistryBackend,
    watcher: TreeWatcher,
}

impl ServerRegisterRepository {
    /// Connect to the configured tree backend and start watching
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let publisher = Publisher::new();
    /// let mut batches = publisher.subscribe_channel();
    /// let repository = ServerRegisterRepository::init(publisher, &config).await?;
    /// ```
    pub async fn init(publisher: Publisher, config: &RegisterCenterConfig) -> Result<Self> {
        let backend = RegistryBackend::connect(config).await?;
        Self::with_backend(
            backend,
            publisher,
            PathScheme::new(config.root_path()),
            JsonCodec::new(),
            EvictionPolicy::from_flag(config.evict_removed_context_paths()?),
        )
        .await
    }

    /// Start watching over an already connected backend
    pub async fn with_backend(
        backend: RegistryBackend,
        publisher: Publisher,
        scheme: PathScheme,
        codec: JsonCodec,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        let store = match &backend {
            RegistryBackend::Tree(tree) => tree.store().clone(),
            RegistryBackend::Flat(_) => {
                return Err(RegistryError::InvalidArgument(
                    "flat backends cannot be watched".to_string(),
                ));
            }
        };

        let watcher = match TreeWatcher::start(store, publisher, scheme, codec, policy).await {
            Ok(watcher) => watcher,
            Err(e) => {
                let _ = backend.close().await;
                return Err(e);
            }
        };
        Ok(Self { backend, watcher })
    }

    pub fn watcher(&self) -> &TreeWatcher {
        &self.watcher
    }

    /// Stop watching and release the connection
    pub async fn close(&self) -> Result<()> {
        self.watcher.shutdown();
        self.backend.close().await?;
        info!("Register center watcher closed");
        Ok(())
    }
}

/// Producer side: persists this process's interfaces
#[derive(Clone)]
pub struct ClientRegisterRepository {
    writer: RegistrationWriter,
}

impl ClientRegisterRepository {
    /// Connect to the configured backend
    pub async fn new(config: &RegisterCenterConfig) -> Result<Self> {
        let backend = RegistryBackend::connect(config).await?;
        Ok(Self::with_backend(
            backend,
            PathScheme::new(config.root_path()),
            JsonCodec::new(),
        ))
    }

    pub fn with_backend(backend: RegistryBackend, scheme: PathScheme, codec: JsonCodec) -> Self {
        Self {
            writer: RegistrationWriter::new(backend, scheme, codec),
        }
    }

    /// Register an interface and, for URI-capable types, its endpoint
    pub async fn persist_interface(&self, metadata: &MetadataRecord) -> Result<()> {
        self.writer.persist_interface(metadata).await
    }

    /// Release the connection; tree endpoints registered by it go away
    pub async fn close(&self) -> Result<()> {
        self.writer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::{InMemoryFlatStore, ServiceRegistration};
    use crate::record::{RecordBatch, RecordKind, RpcType};
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_flat_backend_cannot_be_watched() {
        let flat = Arc::new(InMemoryFlatStore::new(ServiceRegistration::new("a", "a", "h", 1)));
        let result = ServerRegisterRepository::with_backend(
            RegistryBackend::flat(flat),
            Publisher::new(),
            PathScheme::new("/r"),
            JsonCodec::new(),
            EvictionPolicy::Retain,
        )
        .await;
        assert!(matches!(result, Err(RegistryError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_producer_to_consumer() {
        let store = InMemoryStore::new();
        let publisher = Publisher::new();
        let mut rx = publisher.subscribe_channel();

        let server = ServerRegisterRepository::with_backend(
            RegistryBackend::tree(Arc::new(store.clone())),
            publisher,
            PathScheme::new("/r"),
            JsonCodec::new(),
            EvictionPolicy::Retain,
        )
        .await
        .unwrap();
        let client = ClientRegisterRepository::with_backend(
            RegistryBackend::tree(Arc::new(store.session())),
            PathScheme::new("/r"),
            JsonCodec::new(),
        );

        let record = MetadataRecord::rpc(RpcType::Dubbo, "/order", "OrderService", "find");
        client.persist_interface(&record).await.unwrap();
        store.settle().await;

        assert_eq!(rx.recv().await.unwrap(), RecordBatch::Metadata(vec![record]));

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_init_from_memory_config() {
        let config = RegisterCenterConfig::default();
        let server = ServerRegisterRepository::init(Publisher::new(), &config)
            .await
            .unwrap();
        assert!(
            server
                .watcher()
                .context_paths(RpcType::Http, RecordKind::Metadata)
                .is_empty()
        );
        server.close().await.unwrap();
    }
}
