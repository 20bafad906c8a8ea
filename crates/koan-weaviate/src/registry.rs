//! Shared adapters keyed by class name.

use std::collections::HashMap;
use std::sync::Arc;

use koan_vector::VectorResult;
use tokio::sync::RwLock;

use crate::TRACING_TARGET_ADAPTER;
use crate::adapter::WeaviateAdapter;
use crate::config::WeaviateConfig;
use crate::naming::CollectionNaming;
use crate::transport::{HttpTransport, WeaviateTransport};

/// Hands out one adapter per resolved class.
///
/// Every adapter shares the store's transport and configuration. Entity
/// type and partition pairs that resolve to the same class get the same
/// adapter, and with it the same schema state.
#[derive(Debug, Clone)]
pub struct WeaviateStore {
    transport: Arc<dyn WeaviateTransport>,
    config: Arc<WeaviateConfig>,
    naming: CollectionNaming,
    adapters: Arc<RwLock<HashMap<String, Arc<WeaviateAdapter>>>>,
}

impl WeaviateStore {
    /// Creates a store talking HTTP to the configured endpoint.
    pub fn new(config: WeaviateConfig) -> VectorResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Creates a store over an existing transport.
    pub fn with_transport(transport: Arc<dyn WeaviateTransport>, config: WeaviateConfig) -> Self {
        let naming = CollectionNaming::new(&config.collection_prefix);
        Self {
            transport,
            config: Arc::new(config),
            naming,
            adapters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the configuration shared by every adapter.
    pub fn config(&self) -> &WeaviateConfig {
        &self.config
    }

    /// Resolves the class name for an entity type and partition.
    pub fn collection_name(&self, entity_type: &str, partition: Option<&str>) -> String {
        self.naming.resolve(entity_type, partition)
    }

    /// Returns the adapter for an entity type and partition, creating it on first use.
    pub async fn adapter(
        &self,
        entity_type: &str,
        partition: Option<&str>,
    ) -> Arc<WeaviateAdapter> {
        let collection = self.collection_name(entity_type, partition);
        if let Some(adapter) = self.adapters.read().await.get(&collection) {
            return adapter.clone();
        }

        let mut adapters = self.adapters.write().await;
        adapters
            .entry(collection)
            .or_insert_with_key(|collection| {
                tracing::debug!(
                    target: TRACING_TARGET_ADAPTER,
                    collection = %collection,
                    entity_type,
                    partition,
                    "Created adapter"
                );
                Arc::new(WeaviateAdapter::new(
                    self.transport.clone(),
                    self.config.clone(),
                    collection.clone(),
                ))
            })
            .clone()
    }

    /// Returns the class names of every adapter handed out so far, sorted.
    pub async fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
