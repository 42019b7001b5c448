//! Consul flat store implementation

use super::{FlatStore, ServiceRegistration};
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Consul KV client plus the producer's agent registration
#[derive(Clone)]
pub struct ConsulStore {
    base_url: Url,
    client: reqwest::Client,
    registration: Arc<RwLock<ServiceRegistration>>,
}

impl ConsulStore {
    /// Create a Consul store for the given producer registration
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use regsync_register::flat::{ConsulStore, ServiceRegistration};
    ///
    /// let me = ServiceRegistration::new("order-1", "order", "10.0.0.1", 8080);
    /// let consul = ConsulStore::new("http://localhost:8500", me, Duration::from_secs(3))?;
    /// ```
    pub fn new(
        base_url: impl Into<String>,
        registration: ServiceRegistration,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connection_timeout)
            .build()?;
        let base_url: String = base_url.into();
        let base_url = Url::parse(&base_url)
            .map_err(|e| RegistryError::InvalidArgument(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidArgument(format!(
                "{} cannot be used as a Consul address",
                base_url
            )));
        }

        Ok(Self {
            base_url,
            client,
            registration: Arc::new(RwLock::new(registration)),
        })
    }

    /// Agent API URL for `segments`, each one percent-encoded
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// KV URL of `key`; `#` in RPC node names must not become a fragment
    fn kv_url(&self, key: &str) -> Url {
        self.endpoint(
            ["v1", "kv"]
                .into_iter()
                .chain(key.split('/').filter(|segment| !segment.is_empty())),
        )
    }

    fn payload(registration: &ServiceRegistration) -> serde_json::Value {
        serde_json::json!({
            "ID": registration.id,
            "Name": registration.name,
            "Address": registration.address,
            "Port": registration.port,
            "Tags": registration.tags,
            "Meta": registration.meta,
        })
    }

    /// Announce the current registration to the local agent.
    ///
    /// Registration is idempotent by ID, so this also republishes changes.
    pub async fn register_service(&self) -> Result<()> {
        let url = self.endpoint(["v1", "agent", "service", "register"]);
        let registration = self.registration.read().await.clone();

        let response = self
            .client
            .put(url)
            .json(&Self::payload(&registration))
            .send()
            .await?;

        if response.status().is_success() {
            info!("Registered service {} with Consul", registration.id);
            Ok(())
        } else {
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(RegistryError::RegistrationWriteFailed(error))
        }
    }
}

#[async_trait]
impl FlatStore for ConsulStore {
    async fn set_kv_value(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .client
            .put(self.kv_url(key))
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RegistryError::RegistrationWriteFailed(error));
        }

        // Consul answers `true` or `false` for the write
        let accepted = response.text().await?;
        if accepted.trim() != "true" {
            return Err(RegistryError::RegistrationWriteFailed(format!(
                "Consul refused write of {}",
                key
            )));
        }

        debug!("Stored Consul key {}", key);
        Ok(())
    }

    async fn put_registration_meta(&self, key: &str, value: &str) -> Result<()> {
        self.registration
            .write()
            .await
            .meta
            .insert(key.to_string(), value.to_string());
        self.register_service().await
    }

    async fn registration(&self) -> ServiceRegistration {
        self.registration.read().await.clone()
    }
}
