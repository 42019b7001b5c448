// regsync - keeps a live local view of the services registered in a register center

//! regsync - service registration sync
//!
//! Producers persist the interfaces they expose; consumers watch the store
//! and receive every new or changed registration through a [`Publisher`].
//!
//! ```rust
//! use regsync::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! let publisher = Publisher::new();
//! let mut batches = publisher.subscribe_channel();
//!
//! let consumer = ServerRegisterRepository::with_backend(
//!     RegistryBackend::tree(Arc::new(store.clone())),
//!     publisher,
//!     PathScheme::new("/regsync/register"),
//!     JsonCodec::new(),
//!     EvictionPolicy::Retain,
//! )
//! .await?;
//!
//! let producer = ClientRegisterRepository::with_backend(
//!     RegistryBackend::tree(Arc::new(store.session())),
//!     PathScheme::new("/regsync/register"),
//!     JsonCodec::new(),
//! );
//! let record = MetadataRecord::rpc(RpcType::Dubbo, "/order", "OrderService", "find");
//! producer.persist_interface(&record).await?;
//!
//! assert_eq!(batches.recv().await, Some(RecordBatch::Metadata(vec![record])));
//! consumer.close().await?;
//! # Ok::<(), RegistryError>(())
//! # }).unwrap();
//! ```

// Re-export the register center core
pub use regsync_register::*;

// Configuration is always needed to pick a backend
pub use regsync_config;
pub use regsync_config::RegisterCenterConfig;

#[cfg(feature = "log")]
pub use regsync_log;
