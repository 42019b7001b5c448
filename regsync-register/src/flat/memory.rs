//! In-memory flat store (for testing/development)

use super::{FlatStore, ServiceRegistration};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory key-value map plus a pre-existing service registration
#[derive(Clone)]
pub struct InMemoryFlatStore {
    kv: Arc<RwLock<BTreeMap<String, String>>>,
    registration: Arc<RwLock<ServiceRegistration>>,
}

impl InMemoryFlatStore {
    /// Create a store around an already announced registration
    ///
    /// ```
    /// use regsync_register::flat::{FlatStore, InMemoryFlatStore, ServiceRegistration};
    ///
    /// # tokio_test::block_on(async {
    /// let store = InMemoryFlatStore::new(ServiceRegistration::new("order-1", "order", "10.0.0.1", 8080));
    /// store.put_registration_meta("uri", "{}").await.unwrap();
    /// assert_eq!(store.registration().await.meta["uri"], "{}");
    /// # });
    /// ```
    pub fn new(registration: ServiceRegistration) -> Self {
        Self {
            kv: Arc::new(RwLock::new(BTreeMap::new())),
            registration: Arc::new(RwLock::new(registration)),
        }
    }

    /// All stored keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        self.kv.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.kv.read().await.get(key).cloned()
    }
}

#[async_trait]
impl FlatStore for InMemoryFlatStore {
    async fn set_kv_value(&self, key: &str, value: &str) -> Result<()> {
        self.kv.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn put_registration_meta(&self, key: &str, value: &str) -> Result<()> {
        self.registration
            .write()
            .await
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn registration(&self) -> ServiceRegistration {
        self.registration.read().await.clone()
    }
}
