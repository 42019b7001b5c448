//! Producer-side registration writes

use crate::backend::RegistryBackend;
use crate::codec::JsonCodec;
use crate::error::{RegistryError, Result};
use crate::path::PathScheme;
use crate::record::{MetadataRecord, UriRecord};
use tracing::{error, info, warn};

/// Meta key the flat backend stores the endpoint record under
pub const URI_META_KEY: &str = "uri";

/// Writes metadata and endpoint records to the configured backend
///
/// Writes are create-or-update: registering the same identity again
/// replaces the stored value. Failures are logged and returned, never
/// retried.
#[derive(Clone)]
pub struct RegistrationWriter {
    backend: RegistryBackend,
    scheme: PathScheme,
    codec: JsonCodec,
}

impl RegistrationWriter {
    pub fn new(backend: RegistryBackend, scheme: PathScheme, codec: JsonCodec) -> Self {
        Self {
            backend,
            scheme,
            codec,
        }
    }

    pub fn backend(&self) -> &RegistryBackend {
        &self.backend
    }

    /// Register one interface, plus its endpoint for URI-capable types
    pub async fn persist_interface(&self, metadata: &MetadataRecord) -> Result<()> {
        self.register_metadata(metadata).await?;
        if !metadata.rpc_type.supports_uri() {
            return Ok(());
        }

        let uri = UriRecord::from_metadata(metadata);
        if uri.is_withdrawal() {
            warn!(
                "{} {} has no host/port, skipping uri registration",
                metadata.rpc_type, metadata.context_path
            );
            return Ok(());
        }
        self.register_uri(&uri).await
    }

    /// Write a metadata record at `{metadata parent}/{node name}`
    pub async fn register_metadata(&self, metadata: &MetadataRecord) -> Result<()> {
        let node = metadata.node_name()?;
        let parent = self
            .scheme
            .metadata_parent_path(metadata.rpc_type.name(), &metadata.context_path)?;
        let real_node = PathScheme::real_node(&parent, &node);
        let data = self.codec.encode(metadata)?;

        let written = match &self.backend {
            RegistryBackend::Tree(tree) => tree.put_persistent(&real_node, &data).await,
            RegistryBackend::Flat(flat) => flat.set_value(&real_node, &data).await,
        };
        if let Err(e) = written {
            error!("Failed to register metadata {}: {}", real_node, e);
            return Err(e.into_write_failure());
        }

        info!("{} client register success: {}", metadata.rpc_type, real_node);
        Ok(())
    }

    /// Advertise an endpoint record
    ///
    /// Only `http`, `tars` and `grpc` publish endpoints; other types are a
    /// no-op. The tree backend writes an ephemeral `host:port` leaf, the flat
    /// backend attaches the record to the producer's own registration.
    /// A record without `rpcType` is rejected.
    pub async fn register_uri(&self, uri: &UriRecord) -> Result<()> {
        let rpc_type = uri.rpc_type.ok_or_else(|| {
            RegistryError::InvalidArgument(format!(
                "uri record for {} has no rpc type",
                uri.context_path
            ))
        })?;
        if !rpc_type.supports_uri() {
            return Ok(());
        }
        let data = self.codec.encode(uri)?;

        let (target, written) = match &self.backend {
            RegistryBackend::Tree(tree) => {
                let parent = self
                    .scheme
                    .uri_parent_path(rpc_type.name(), &uri.context_path)?;
                let real_node = PathScheme::real_node(&parent, &uri.node_name()?);
                let written = tree.put_ephemeral(&real_node, &data).await;
                (real_node, written)
            }
            RegistryBackend::Flat(flat) => (
                format!("registration meta {:?}", URI_META_KEY),
                flat.attach(URI_META_KEY, &data).await,
            ),
        };
        if let Err(e) = written {
            error!("Failed to register uri {}: {}", target, e);
            return Err(e.into_write_failure());
        }

        info!("{} client register uri success: {}", rpc_type, target);
        Ok(())
    }

    /// Release the backend connection
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::{FlatStore, InMemoryFlatStore, ServiceRegistration};
    use crate::record::RpcType;
    use crate::store::{CoordinationStore, InMemoryStore};
    use std::sync::Arc;

    fn tree_writer(store: &InMemoryStore) -> RegistrationWriter {
        RegistrationWriter::new(
            RegistryBackend::tree(Arc::new(store.clone())),
            PathScheme::new("/r"),
            JsonCodec::new(),
        )
    }

    #[tokio::test]
    async fn test_metadata_overwrite_is_idempotent() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);

        let first = MetadataRecord::route(RpcType::Http, "/order", "/list").with_path("/v1");
        let second = MetadataRecord::route(RpcType::Http, "/order", "/list").with_path("/v2");
        writer.register_metadata(&first).await.unwrap();
        writer.register_metadata(&second).await.unwrap();

        let parent = "/r/http/metadata/order";
        assert_eq!(store.get_children(parent).await.unwrap(), vec!["order-list".to_string()]);

        let stored: MetadataRecord = JsonCodec::new()
            .decode(&store.read_data("/r/http/metadata/order/order-list").await.unwrap())
            .unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn test_persist_interface_writes_ephemeral_uri() {
        let consumer = InMemoryStore::new();
        let producer = consumer.session();
        let writer = tree_writer(&producer);

        let record = MetadataRecord::route(RpcType::Http, "/order", "/list")
            .with_endpoint("10.0.0.1", 8080);
        writer.persist_interface(&record).await.unwrap();

        let uri_path = "/r/http/uri/order/10.0.0.1:8080";
        let stored: UriRecord = JsonCodec::new()
            .decode(&consumer.read_data(uri_path).await.unwrap())
            .unwrap();
        assert_eq!(stored, UriRecord::from_metadata(&record));

        writer.close().await.unwrap();
        assert!(!consumer.exists(uri_path).await.unwrap());
        assert!(consumer.exists("/r/http/metadata/order/order-list").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_uri_types_write_metadata_only() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);

        let record = MetadataRecord::rpc(RpcType::Dubbo, "/order", "OrderService", "find")
            .with_endpoint("10.0.0.1", 20880);
        writer.persist_interface(&record).await.unwrap();

        assert!(store.exists("/r/dubbo/metadata/order/OrderService#find").await.unwrap());
        assert!(!store.exists("/r/dubbo/uri").await.unwrap());
    }

    #[tokio::test]
    async fn test_uri_skipped_without_endpoint() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);

        let record = MetadataRecord::route(RpcType::Http, "/order", "/list");
        writer.persist_interface(&record).await.unwrap();

        assert!(store.exists("/r/http/metadata/order/order-list").await.unwrap());
        assert!(!store.exists("/r/http/uri/order").await.unwrap());
    }

    #[tokio::test]
    async fn test_flat_grpc_uri_piggybacks_on_registration() {
        let flat = Arc::new(InMemoryFlatStore::new(ServiceRegistration::new(
            "order-1", "order", "10.0.0.2", 9090,
        )));
        let writer = RegistrationWriter::new(
            RegistryBackend::flat(flat.clone()),
            PathScheme::new("/r"),
            JsonCodec::new(),
        );

        let record = MetadataRecord::rpc(RpcType::Grpc, "/order", "OrderService", "create")
            .with_endpoint("10.0.0.2", 9090);
        writer.persist_interface(&record).await.unwrap();

        let expected = JsonCodec::new()
            .encode(&UriRecord::from_metadata(&record))
            .unwrap();
        let registration = flat.registration().await;
        assert_eq!(registration.meta.get(URI_META_KEY), Some(&expected));
        assert_eq!(
            flat.keys().await,
            vec!["/r/grpc/metadata/order/OrderService#create".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_record_rejected_before_io() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);

        let record = MetadataRecord::route(RpcType::Http, "", "/list");
        assert!(matches!(
            writer.persist_interface(&record).await,
            Err(RegistryError::InvalidArgument(_))
        ));
        assert!(!store.exists("/r").await.unwrap());
    }

    #[tokio::test]
    async fn test_uri_without_rpc_type_rejected() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);

        let mut uri = UriRecord::new(RpcType::Http, "/order", "10.0.0.1", 8080);
        uri.rpc_type = None;
        assert!(matches!(
            writer.register_uri(&uri).await,
            Err(RegistryError::InvalidArgument(_))
        ));
        assert!(!store.exists("/r/http/uri/order").await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let store = InMemoryStore::new();
        let writer = tree_writer(&store);
        store.close().await.unwrap();

        let record = MetadataRecord::route(RpcType::Http, "/order", "/list");
        assert!(matches!(
            writer.register_metadata(&record).await,
            Err(RegistryError::BackendUnavailable(_))
        ));
    }
}
