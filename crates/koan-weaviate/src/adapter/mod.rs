//! The Weaviate-backed [`VectorRepository`].

mod export;
mod search;
mod upsert;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use koan_vector::{
    Metadata, RecordStream, SearchQuery, SearchResult, VectorCapabilities, VectorContext,
    VectorError, VectorRecord, VectorRepository, VectorResult,
};
use serde_json::Value;
use uuid::Uuid;

use crate::TRACING_TARGET_ADAPTER;
use crate::config::WeaviateConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::identity::remote_id;
use crate::naming::CollectionNaming;
use crate::schema::{KEY_PROPERTY, SEARCH_TEXT_PROPERTY, SchemaManager};
use crate::transport::{HttpTransport, QueryHit, WeaviateTransport};

/// Vector repository over one Weaviate class.
///
/// Owns the class's schema state and discovered dimension; instances never
/// share state, even when they address the same class.
///
/// # Examples
///
/// ```rust,no_run
/// use koan_vector::{SearchQuery, VectorContext, VectorRecord, VectorRepository};
/// use koan_weaviate::{WeaviateAdapter, WeaviateConfig};
///
/// # async fn run() -> koan_vector::VectorResult<()> {
/// let config = WeaviateConfig::from_endpoint("http://localhost:8080")?;
/// let adapter = WeaviateAdapter::connect(config, "DocumentChunk", Some("project-abc123"))?;
/// let ctx = VectorContext::new();
///
/// adapter
///     .upsert(&ctx, VectorRecord::new("chunk-1", vec![0.1, 0.2, 0.3]))
///     .await?;
/// let hits = adapter
///     .search(&ctx, SearchQuery::new(vec![0.1, 0.2, 0.3]).with_text("intro"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct WeaviateAdapter {
    transport: Arc<dyn WeaviateTransport>,
    config: Arc<WeaviateConfig>,
    collection: String,
    schema: SchemaManager,
}

impl std::fmt::Debug for WeaviateAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaviateAdapter")
            .field("collection", &self.collection)
            .field("schema", &self.schema)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl WeaviateAdapter {
    /// Creates an adapter for an already resolved class name.
    pub fn new(
        transport: Arc<dyn WeaviateTransport>,
        config: impl Into<Arc<WeaviateConfig>>,
        collection: impl Into<String>,
    ) -> Self {
        let config = config.into();
        let collection = collection.into();
        let schema = SchemaManager::new(transport.clone(), collection.clone(), &config);
        Self {
            transport,
            config,
            collection,
            schema,
        }
    }

    /// Creates an adapter for an entity type and partition.
    pub fn for_entity(
        transport: Arc<dyn WeaviateTransport>,
        config: impl Into<Arc<WeaviateConfig>>,
        entity_type: &str,
        partition: Option<&str>,
    ) -> Self {
        let config = config.into();
        let collection =
            CollectionNaming::new(&config.collection_prefix).resolve(entity_type, partition);
        Self::new(transport, config, collection)
    }

    /// Creates an adapter talking HTTP to the configured endpoint.
    pub fn connect(
        config: WeaviateConfig,
        entity_type: &str,
        partition: Option<&str>,
    ) -> VectorResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::for_entity(
            Arc::new(transport),
            config,
            entity_type,
            partition,
        ))
    }

    /// Returns the class name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WeaviateConfig {
        &self.config
    }

    /// Returns the schema manager.
    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    /// Maps an application key to its object id.
    pub fn object_id(&self, key: &str) -> Uuid {
        remote_id(&self.collection, key)
    }

    /// Creates the class if needed.
    pub async fn ensure_schema(&self, ctx: &VectorContext) -> VectorResult<()> {
        self.schema.ensure(ctx).await
    }

    /// Counts the stored objects.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection))]
    pub async fn count(&self, ctx: &VectorContext) -> VectorResult<u64> {
        self.schema.ensure(ctx).await?;
        ctx.run("count", self.transport.count(&self.collection))
            .await?
            .map_err(|e| VectorError::remote(&self.collection, "count", e))
    }

    /// The key property followed by every user property the class declares.
    async fn selected_properties(
        &self,
        ctx: &VectorContext,
        operation: &'static str,
    ) -> VectorResult<RemoteResult<Vec<String>>> {
        let known = match ctx
            .run(operation, self.transport.class_properties(&self.collection))
            .await?
        {
            Ok(known) => known,
            Err(e) => return Ok(Err(e)),
        };

        let mut properties = vec![KEY_PROPERTY.to_owned()];
        properties.extend(
            known
                .into_iter()
                .filter(|p| p != KEY_PROPERTY && p != SEARCH_TEXT_PROPERTY),
        );
        Ok(Ok(properties))
    }

    fn remote_error(&self, operation: &'static str) -> impl Fn(RemoteError) -> VectorError + '_ {
        move |e| VectorError::remote(&self.collection, operation, e)
    }
}

fn require_key(key: &str) -> VectorResult<()> {
    if key.is_empty() {
        return Err(VectorError::invalid_input("record key is empty"));
    }
    Ok(())
}

/// Reads the application key of a hit. Objects written by other tools have none.
fn hit_key(hit: &QueryHit) -> Option<String> {
    hit.properties
        .get(KEY_PROPERTY)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Stored properties minus the adapter's own and unset ones.
fn user_metadata(properties: &Metadata) -> Metadata {
    properties
        .iter()
        .filter(|(name, value)| {
            name.as_str() != KEY_PROPERTY && name.as_str() != SEARCH_TEXT_PROPERTY && !value.is_null()
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl VectorRepository for WeaviateAdapter {
    fn capabilities(&self) -> VectorCapabilities {
        VectorCapabilities {
            filters: true,
            hybrid_search: true,
            bulk_operations: true,
            dynamic_collections: true,
            unbounded_export: self.config.pagination.is_unbounded(),
        }
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, key = %record.key))]
    async fn upsert(&self, ctx: &VectorContext, record: VectorRecord) -> VectorResult<()> {
        self.upsert_one(ctx, &record).await
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, count = records.len()))]
    async fn upsert_many(
        &self,
        ctx: &VectorContext,
        records: Vec<VectorRecord>,
    ) -> VectorResult<usize> {
        self.upsert_batch(ctx, &records).await
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, key = %key))]
    async fn delete(&self, ctx: &VectorContext, key: &str) -> VectorResult<bool> {
        require_key(key)?;
        let id = self.object_id(key);
        let deleted = ctx
            .run("delete", self.transport.delete_object(&self.collection, id))
            .await?
            .map_err(self.remote_error("delete"))?;
        tracing::debug!(target: TRACING_TARGET_ADAPTER, %id, deleted, "Deleted object");
        Ok(deleted)
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, count = keys.len()))]
    async fn delete_many(&self, ctx: &VectorContext, keys: &[String]) -> VectorResult<usize> {
        for key in keys {
            require_key(key)?;
        }

        let deletes: Vec<_> = keys
            .iter()
            .map(|key| async move {
                ctx.run(
                    "delete_many",
                    self.transport
                        .delete_object(&self.collection, self.object_id(key)),
                )
                .await?
                .map_err(self.remote_error("delete_many"))
            })
            .collect();
        stream::iter(deletes)
            .buffer_unordered(self.config.bulk_concurrency.max(1))
            .try_fold(0, |deleted, existed| async move {
                Ok(deleted + usize::from(existed))
            })
            .await
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, hybrid = query.is_hybrid()))]
    async fn search(
        &self,
        ctx: &VectorContext,
        query: SearchQuery,
    ) -> VectorResult<Vec<SearchResult>> {
        self.run_search(ctx, &query).await
    }

    fn stream_export<'a>(&'a self, ctx: &'a VectorContext, batch_size: usize) -> RecordStream<'a> {
        self.export_stream(ctx, batch_size)
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection))]
    async fn flush(&self, ctx: &VectorContext, confirm: bool) -> VectorResult<()> {
        self.flush_collection(ctx, confirm).await
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, key = %key))]
    async fn get_embedding(&self, ctx: &VectorContext, key: &str) -> VectorResult<Vec<f32>> {
        self.fetch_embedding(ctx, key)
            .await?
            .ok_or_else(|| VectorError::not_found(&self.collection, key))
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_ADAPTER, fields(collection = %self.collection, count = keys.len()))]
    async fn get_embeddings(
        &self,
        ctx: &VectorContext,
        keys: &[String],
    ) -> VectorResult<HashMap<String, Vec<f32>>> {
        let fetches: Vec<_> = keys
            .iter()
            .map(|key| async move {
                let embedding = self.fetch_embedding(ctx, key).await?;
                Ok::<_, VectorError>(embedding.map(|embedding| (key.clone(), embedding)))
            })
            .collect();
        stream::iter(fetches)
            .buffer_unordered(self.config.bulk_concurrency.max(1))
            .try_filter_map(|found| async move { Ok(found) })
            .try_collect()
            .await
    }
}

impl WeaviateAdapter {
    async fn fetch_embedding(
        &self,
        ctx: &VectorContext,
        key: &str,
    ) -> VectorResult<Option<Vec<f32>>> {
        require_key(key)?;
        let object = ctx
            .run(
                "get_embedding",
                self.transport.get_object(&self.collection, self.object_id(key)),
            )
            .await?
            .map_err(self.remote_error("get_embedding"))?;
        Ok(object.and_then(|object| object.vector))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use koan_vector::FilterExpr;

    use super::*;
    use crate::config::{DimensionConflictPolicy, ExportPagination};
    use crate::mock::{MockOperation, MockWeaviate};

    pub(super) fn config() -> WeaviateConfig {
        WeaviateConfig::default().with_ensure_schedule(3, Duration::from_millis(1))
    }

    pub(super) fn adapter_with(mock: &Arc<MockWeaviate>, config: WeaviateConfig) -> WeaviateAdapter {
        WeaviateAdapter::for_entity(mock.clone(), config, "DocumentChunk", Some("project-abc123"))
    }

    pub(super) fn adapter(mock: &Arc<MockWeaviate>) -> WeaviateAdapter {
        adapter_with(mock, config())
    }

    #[test]
    fn capabilities_reflect_pagination_mode() {
        let mock = Arc::new(MockWeaviate::new());
        assert!(adapter(&mock).capabilities().unbounded_export);

        let offset = adapter_with(&mock, config().with_pagination(ExportPagination::offset()));
        let caps = offset.capabilities();
        assert!(!caps.unbounded_export);
        assert!(caps.hybrid_search && caps.filters && caps.bulk_operations);
    }

    #[tokio::test]
    async fn reference_scenario_round_trips_the_embedding() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        assert_eq!(adapter.collection(), "Koan_DocumentChunk_project_abc123");

        let embedding = vec![0.125, -0.5, 0.75, 1.0e-3];
        adapter
            .upsert(&ctx, VectorRecord::new("chunk-7", embedding.clone()))
            .await
            .unwrap();

        assert_eq!(adapter.get_embedding(&ctx, "chunk-7").await.unwrap(), embedding);
        assert!(mock.has_class("Koan_DocumentChunk_project_abc123"));
    }

    #[tokio::test]
    async fn missing_embedding_is_not_found() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let err = adapter
            .get_embedding(&VectorContext::new(), "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_embeddings_omits_absent_keys() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        adapter
            .upsert_many(
                &ctx,
                vec![
                    VectorRecord::new("a", vec![1.0, 0.0]),
                    VectorRecord::new("b", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let found = adapter
            .get_embeddings(&ctx, &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        adapter
            .upsert(&ctx, VectorRecord::new("a", vec![1.0, 0.0]))
            .await
            .unwrap();

        assert!(adapter.delete(&ctx, "a").await.unwrap());
        assert!(!adapter.delete(&ctx, "a").await.unwrap());
        assert_eq!(
            adapter
                .delete_many(&ctx, &["a".into(), "b".into()])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn delete_many_counts_existing_keys() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        let records = (0..5)
            .map(|i| VectorRecord::new(format!("k{i}"), vec![i as f32, 1.0]))
            .collect();
        adapter.upsert_many(&ctx, records).await.unwrap();

        let deleted = adapter
            .delete_many(&ctx, &["k1".into(), "k3".into(), "zz".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(adapter.count(&ctx).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn instances_do_not_share_schema_state() {
        let mock = Arc::new(MockWeaviate::new());
        let ctx = VectorContext::new();
        let first = adapter(&mock);
        let second = adapter(&mock);

        first.ensure_schema(&ctx).await.unwrap();
        assert_eq!(first.schema().state(), crate::schema::SchemaState::Ready);
        assert_eq!(second.schema().state(), crate::schema::SchemaState::Unknown);
    }

    #[tokio::test]
    async fn recreate_policy_accepts_a_new_dimension() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter_with(
            &mock,
            config().with_dimension_policy(DimensionConflictPolicy::Recreate),
        );
        let ctx = VectorContext::new();

        adapter
            .upsert(&ctx, VectorRecord::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        adapter
            .upsert(&ctx, VectorRecord::new("b", vec![1.0, 0.0]))
            .await
            .unwrap();

        assert_eq!(adapter.schema().dimension(), Some(2));
        assert_eq!(mock.calls(MockOperation::DeleteClass), 1);
        assert_eq!(adapter.count(&ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reject_policy_fails_before_any_request() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();

        adapter
            .upsert(&ctx, VectorRecord::new("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let creates = mock.calls(MockOperation::CreateObject);

        let err = adapter
            .upsert(&ctx, VectorRecord::new("b", vec![1.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(mock.calls(MockOperation::CreateObject), creates);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        ctx.cancel();

        let err = adapter
            .upsert(&ctx, VectorRecord::new("a", vec![1.0]))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(mock.calls(MockOperation::CreateObject), 0);
    }

    #[tokio::test]
    async fn query_failures_surface_as_search_failed() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        adapter.ensure_schema(&ctx).await.unwrap();
        mock.set_query_failure(Some(RemoteError::status(500, "boom")));

        // Counting does not go through `Get`, so the failure knob does not apply.
        assert_eq!(adapter.count(&ctx).await.unwrap(), 0);

        let err = adapter
            .search(
                &ctx,
                SearchQuery::new(vec![1.0]).with_filter(FilterExpr::eq("a", 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::SearchFailed { .. }));
    }
}
