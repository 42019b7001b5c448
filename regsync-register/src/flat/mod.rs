//! Flat key-value stores with attachable service registrations

pub mod consul;
pub mod memory;

pub use consul::ConsulStore;
pub use memory::InMemoryFlatStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The producer's own registration with the flat store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Registration ID (unique per producer instance)
    pub id: String,

    /// Service name
    pub name: String,

    /// Host/IP address
    pub address: String,

    /// Port number
    pub port: u16,

    /// Service tags
    pub tags: Vec<String>,

    /// Metadata attributes
    pub meta: HashMap<String, String>,
}

impl ServiceRegistration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            meta: HashMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add a metadata attribute
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Key-value store plus the producer's own service registration
#[async_trait]
pub trait FlatStore: Send + Sync {
    /// Create or overwrite the value at `key`
    async fn set_kv_value(&self, key: &str, value: &str) -> Result<()>;

    /// Set a metadata attribute on the producer's registration
    async fn put_registration_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Current state of the producer's registration
    async fn registration(&self) -> ServiceRegistration;
}
