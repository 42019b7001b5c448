//! Service registration sync for regsync
//!
//! Producers persist the interfaces they expose into a shared store;
//! consumers watch that store and receive every new or changed record
//! through a [`Publisher`].
//!
//! ## Features
//!
//! - **Tree backends** - in-memory or etcd, with one-shot watches
//! - **Flat backend** - Consul KV plus the producer's own agent registration
//! - **Add-only diffing** - each stored record is delivered once per value
//! - **Endpoint withdrawal** - a context path losing its last endpoint is announced
//!
//! ## Quick Start
//!
//! ### Consumer
//!
//! ```rust,ignore
//! use regsync_register::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = regsync_config::RegisterCenterConfig::load(None)?;
//!     let publisher = Publisher::new();
//!     let mut batches = publisher.subscribe_channel();
//!
//!     let repository = ServerRegisterRepository::init(publisher, &config).await?;
//!     while let Some(batch) = batches.recv().await {
//!         println!("{} {} record(s)", batch.len(), batch.kind());
//!     }
//!     repository.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Producer
//!
//! ```rust,ignore
//! use regsync_register::*;
//!
//! let repository = ClientRegisterRepository::new(&config).await?;
//! let record = MetadataRecord::route(RpcType::Http, "/order", "/list")
//!     .with_endpoint("10.0.0.1", 8080);
//! repository.persist_interface(&record).await?;
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod flat;
pub mod path;
pub mod publisher;
pub mod record;
pub mod repository;
pub mod store;
pub mod watcher;
pub mod writer;

pub use backend::{FlatBackend, RegistryBackend, TreeBackend};
pub use codec::JsonCodec;
pub use error::{RegistryError, Result};
pub use flat::{ConsulStore, FlatStore, InMemoryFlatStore, ServiceRegistration};
pub use path::PathScheme;
pub use publisher::{Publisher, Subscriber, SubscriptionId};
pub use record::{MetadataRecord, RecordBatch, RecordKind, RpcType, UriRecord};
pub use repository::{ClientRegisterRepository, ServerRegisterRepository};
pub use store::{
    CoordinationStore, CreateMode, EtcdStore, InMemoryStore, Watch, WatchEventKind, WatchedEvent,
};
pub use watcher::{EvictionPolicy, TreeWatcher};
pub use writer::{RegistrationWriter, URI_META_KEY};
