//! Class lifecycle and vector dimension tracking.
//!
//! Each adapter owns one [`SchemaManager`]. Its state moves
//! `Unknown -> Ensuring -> Ready`. It falls back to `Unknown` on failure or
//! flush, and from `Ready` to `Ensuring` when a dimension conflict is
//! accepted, so that the next ensure reconciles the class. State lives in atomics and no
//! lock is held across a remote call: concurrent ensures may both try to
//! create the class, and the loser sees "already exists", which counts as
//! success.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use koan_vector::{VectorContext, VectorError, VectorResult};

use crate::TRACING_TARGET_SCHEMA;
use crate::config::{DimensionConflictPolicy, DistanceMetric, WeaviateConfig};
use crate::error::ConflictKind;
use crate::transport::{
    ClassDefinition, InvertedIndexConfig, PropertyDataType, PropertySpec, SchemaRoute,
    VectorIndexConfig, WeaviateTransport,
};

/// Property holding the application key of every object.
pub const KEY_PROPERTY: &str = "koanKey";

/// Property feeding lexical (BM25) scoring.
pub const SEARCH_TEXT_PROPERTY: &str = "searchText";

const OPERATION: &str = "ensure_schema";

const UNKNOWN: u8 = 0;
const ENSURING: u8 = 1;
const READY: u8 = 2;

/// Lifecycle state of a collection as seen by one adapter.
///
/// `Ensuring` covers both an ensure in flight and a class awaiting
/// recreation after a dimension change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Unknown,
    Ensuring,
    Ready,
}

impl SchemaState {
    fn from_u8(value: u8) -> Self {
        match value {
            READY => Self::Ready,
            ENSURING => Self::Ensuring,
            _ => Self::Unknown,
        }
    }
}

/// A property declared when the class is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    pub data_type: PropertyDataType,
    /// Tokenized into words and indexed for BM25; otherwise matched whole.
    pub keyword_indexed: bool,
}

impl PropertyDefinition {
    /// A text property matched as a whole value.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: PropertyDataType::Text,
            keyword_indexed: false,
        }
    }

    /// A text property indexed for lexical search.
    pub fn searchable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: PropertyDataType::Text,
            keyword_indexed: true,
        }
    }

    fn to_spec(&self) -> PropertySpec {
        let text = self.data_type == PropertyDataType::Text;
        PropertySpec {
            name: self.name.clone(),
            data_type: vec![self.data_type],
            tokenization: text
                .then(|| (if self.keyword_indexed { "word" } else { "field" }).to_owned()),
            index_searchable: text.then_some(self.keyword_indexed),
            index_filterable: Some(true),
        }
    }
}

/// Desired shape of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    /// `None` until the first embedding is seen.
    pub vector_dimension: Option<usize>,
    pub distance_metric: DistanceMetric,
    pub properties: Vec<PropertyDefinition>,
}

impl CollectionSchema {
    /// Schema with the key and search-text properties every collection carries.
    pub fn new(name: impl Into<String>, distance_metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            vector_dimension: None,
            distance_metric,
            properties: vec![
                PropertyDefinition::keyword(KEY_PROPERTY),
                PropertyDefinition::searchable(SEARCH_TEXT_PROPERTY),
            ],
        }
    }

    /// Builds the class creation body. Vectors are always supplied by the caller.
    pub fn class_definition(&self) -> ClassDefinition {
        ClassDefinition {
            class: self.name.clone(),
            vectorizer: "none".to_owned(),
            vector_index_config: VectorIndexConfig {
                distance: self.distance_metric.as_weaviate().to_owned(),
            },
            inverted_index_config: InvertedIndexConfig {
                index_null_state: true,
            },
            properties: self.properties.iter().map(PropertyDefinition::to_spec).collect(),
        }
    }
}

/// Ensures a class exists and guards the vector dimension written to it.
pub struct SchemaManager {
    transport: Arc<dyn WeaviateTransport>,
    collection: String,
    distance: DistanceMetric,
    policy: DimensionConflictPolicy,
    attempts: u32,
    backoff: Duration,
    state: AtomicU8,
    /// `0` while undiscovered.
    dimension: AtomicUsize,
    recreate_pending: AtomicBool,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("collection", &self.collection)
            .field("state", &self.state())
            .field("dimension", &self.dimension())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SchemaManager {
    /// Creates a manager for `collection`.
    pub fn new(
        transport: Arc<dyn WeaviateTransport>,
        collection: impl Into<String>,
        config: &WeaviateConfig,
    ) -> Self {
        Self {
            transport,
            collection: collection.into(),
            distance: config.distance,
            policy: config.dimension_policy,
            attempts: config.ensure_attempts.max(1),
            backoff: config.ensure_backoff,
            state: AtomicU8::new(UNKNOWN),
            dimension: AtomicUsize::new(0),
            recreate_pending: AtomicBool::new(false),
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the current state.
    pub fn state(&self) -> SchemaState {
        SchemaState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the discovered dimension.
    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Acquire) {
            0 => None,
            dimension => Some(dimension),
        }
    }

    /// Returns the schema this manager creates.
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            vector_dimension: self.dimension(),
            ..CollectionSchema::new(&self.collection, self.distance)
        }
    }

    /// Records the dimension of an embedding about to be written.
    ///
    /// The first call sets the dimension. Later calls with another length
    /// either fail with [`VectorError::DimensionMismatch`] or, under
    /// [`DimensionConflictPolicy::Recreate`], adopt the new length and mark
    /// the class for recreation on the next [`ensure`](Self::ensure).
    pub fn observe_dimension(&self, len: usize) -> VectorResult<()> {
        if len == 0 {
            return Err(VectorError::invalid_input("embedding is empty"));
        }

        let current = match self
            .dimension
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::debug!(
                    target: TRACING_TARGET_SCHEMA,
                    collection = %self.collection,
                    dimension = len,
                    "Discovered vector dimension"
                );
                return Ok(());
            }
            Err(current) if current == len => return Ok(()),
            Err(current) => current,
        };

        match self.policy {
            DimensionConflictPolicy::Reject => Err(VectorError::dimension_mismatch(current, len)),
            DimensionConflictPolicy::Recreate => {
                tracing::warn!(
                    target: TRACING_TARGET_SCHEMA,
                    collection = %self.collection,
                    previous = current,
                    dimension = len,
                    "Vector dimension changed; the class will be recreated and its objects dropped"
                );
                self.dimension.store(len, Ordering::Release);
                self.recreate_pending.store(true, Ordering::Release);
                self.state.store(ENSURING, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Records the dimension of a query vector. Never triggers recreation.
    pub fn observe_query_dimension(&self, len: usize) -> VectorResult<()> {
        if len == 0 {
            return Err(VectorError::invalid_input("query vector is empty"));
        }
        match self
            .dimension
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) if current == len => Ok(()),
            Err(current) => Err(VectorError::dimension_mismatch(current, len)),
        }
    }

    /// Rejects empty vectors and non-finite components.
    pub fn check_components(embedding: &[f32]) -> VectorResult<()> {
        if embedding.is_empty() {
            return Err(VectorError::invalid_input("embedding is empty"));
        }
        if embedding.iter().any(|c| !c.is_finite()) {
            return Err(VectorError::invalid_input(
                "embedding contains non-finite components",
            ));
        }
        Ok(())
    }

    /// Checks an embedding against the known dimension without recording it.
    pub fn validate(&self, embedding: &[f32]) -> VectorResult<()> {
        Self::check_components(embedding)?;
        if let Some(expected) = self.dimension()
            && expected != embedding.len()
        {
            return Err(VectorError::dimension_mismatch(expected, embedding.len()));
        }
        Ok(())
    }

    /// Makes sure the class exists, creating it when needed.
    pub async fn ensure(&self, ctx: &VectorContext) -> VectorResult<()> {
        if self.state.load(Ordering::Acquire) == READY
            && !self.recreate_pending.load(Ordering::Acquire)
        {
            return Ok(());
        }

        ctx.check(OPERATION)?;
        self.state.store(ENSURING, Ordering::Release);

        match self.ensure_remote(ctx).await {
            Ok(()) => {
                self.state.store(READY, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                self.state.store(UNKNOWN, Ordering::Release);
                tracing::warn!(
                    target: TRACING_TARGET_SCHEMA,
                    collection = %self.collection,
                    error = %err,
                    "Failed to ensure class"
                );
                Err(err)
            }
        }
    }

    #[tracing::instrument(skip_all, target = TRACING_TARGET_SCHEMA, fields(collection = %self.collection))]
    async fn ensure_remote(&self, ctx: &VectorContext) -> VectorResult<()> {
        if self.recreate_pending.swap(false, Ordering::AcqRel) {
            tracing::info!(
                target: TRACING_TARGET_SCHEMA,
                dimension = ?self.dimension(),
                "Dropping class to adopt the new vector dimension"
            );
            let dropped = ctx
                .run(OPERATION, self.transport.delete_class(&self.collection))
                .await
                .and_then(|r| r.map_err(|e| VectorError::remote(&self.collection, "delete_class", e)));
            if let Err(err) = dropped {
                self.recreate_pending.store(true, Ordering::Release);
                return Err(err);
            }
        }

        let exists = ctx
            .run(OPERATION, self.transport.class_exists(&self.collection))
            .await?
            .map_err(|e| VectorError::schema_creation_failed(&self.collection, e.to_string()))?;
        if exists {
            tracing::debug!(target: TRACING_TARGET_SCHEMA, "Class already present");
            return Ok(());
        }

        if self.create_class(ctx).await? {
            self.wait_ready(ctx).await?;
        }
        Ok(())
    }

    /// Creates the class. Returns `false` when it turned out to exist already.
    async fn create_class(&self, ctx: &VectorContext) -> VectorResult<bool> {
        let definition = self.schema().class_definition();

        let primary = ctx
            .run(
                OPERATION,
                self.transport.create_class(&definition, SchemaRoute::Primary),
            )
            .await?;

        let err = match primary {
            Ok(()) => {
                tracing::info!(target: TRACING_TARGET_SCHEMA, "Created class");
                return Ok(true);
            }
            Err(err) => err,
        };

        let err = match err.kind() {
            ConflictKind::AlreadyExists => {
                tracing::debug!(target: TRACING_TARGET_SCHEMA, "Class created concurrently");
                return Ok(false);
            }
            ConflictKind::MethodNotAllowed => {
                tracing::info!(
                    target: TRACING_TARGET_SCHEMA,
                    route = SchemaRoute::Legacy.path(),
                    "Primary schema route rejected; retrying on the legacy route"
                );
                let legacy = ctx
                    .run(
                        OPERATION,
                        self.transport.create_class(&definition, SchemaRoute::Legacy),
                    )
                    .await?;
                match legacy {
                    Ok(()) => return Ok(true),
                    Err(err) if err.kind() == ConflictKind::AlreadyExists => return Ok(false),
                    Err(err) => err,
                }
            }
            _ => err,
        };

        Err(VectorError::schema_creation_failed(
            &self.collection,
            err.to_string(),
        ))
    }

    /// Polls the class until it is visible or the attempts run out.
    ///
    /// Running out is logged and tolerated: writes that race ahead of the
    /// class are retried by the upsert path.
    pub async fn wait_ready(&self, ctx: &VectorContext) -> VectorResult<()> {
        for attempt in 1..=self.attempts {
            let probe = ctx
                .run(OPERATION, self.transport.class_exists(&self.collection))
                .await?;
            match probe {
                Ok(true) => {
                    tracing::debug!(
                        target: TRACING_TARGET_SCHEMA,
                        collection = %self.collection,
                        attempt,
                        "Class is visible"
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(
                        target: TRACING_TARGET_SCHEMA,
                        collection = %self.collection,
                        attempt,
                        error = %err,
                        "Readiness probe failed"
                    );
                }
            }

            if attempt < self.attempts {
                ctx.sleep(OPERATION, self.backoff).await?;
            }
        }

        tracing::warn!(
            target: TRACING_TARGET_SCHEMA,
            collection = %self.collection,
            attempts = self.attempts,
            "Class not visible after polling; continuing"
        );
        Ok(())
    }

    /// Forgets the ensured state so the next [`ensure`](Self::ensure) probes again.
    pub fn reset(&self) {
        self.state.store(UNKNOWN, Ordering::Release);
    }

    /// Drops the class with all its objects and creates it again, empty.
    pub async fn recreate(&self, ctx: &VectorContext) -> VectorResult<()> {
        ctx.check("flush")?;

        let existed = ctx
            .run("flush", self.transport.delete_class(&self.collection))
            .await?
            .map_err(|e| VectorError::remote(&self.collection, "delete_class", e))?;

        tracing::info!(
            target: TRACING_TARGET_SCHEMA,
            collection = %self.collection,
            existed,
            "Dropped class"
        );

        self.recreate_pending.store(false, Ordering::Release);
        self.dimension.store(0, Ordering::Release);
        self.reset();
        self.ensure(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{MockOperation, MockWeaviate};

    const CLASS: &str = "Koan_Doc_default";

    fn manager(mock: &Arc<MockWeaviate>, config: WeaviateConfig) -> SchemaManager {
        SchemaManager::new(mock.clone(), CLASS, &config)
    }

    fn fast_config() -> WeaviateConfig {
        WeaviateConfig::default().with_ensure_schedule(5, Duration::from_millis(1))
    }

    #[test]
    fn class_definition_declares_key_and_search_text() {
        let definition = CollectionSchema::new(CLASS, DistanceMetric::Dot).class_definition();
        assert_eq!(definition.vectorizer, "none");
        assert_eq!(definition.vector_index_config.distance, "dot");
        assert!(definition.inverted_index_config.index_null_state);

        let names: Vec<_> = definition.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, [KEY_PROPERTY, SEARCH_TEXT_PROPERTY]);
        assert_eq!(definition.properties[0].tokenization.as_deref(), Some("field"));
        assert_eq!(definition.properties[1].index_searchable, Some(true));
    }

    #[tokio::test]
    async fn ensure_creates_once_then_fast_paths() {
        let mock = Arc::new(MockWeaviate::new());
        let schema = manager(&mock, fast_config());
        let ctx = VectorContext::new();

        schema.ensure(&ctx).await.unwrap();
        schema.ensure(&ctx).await.unwrap();

        assert_eq!(schema.state(), SchemaState::Ready);
        assert!(mock.has_class(CLASS));
        assert_eq!(mock.calls(MockOperation::CreateClass), 1);
    }

    #[tokio::test]
    async fn existing_class_is_not_recreated() {
        let mock = Arc::new(MockWeaviate::new());
        mock.insert_class(CollectionSchema::new(CLASS, DistanceMetric::Cosine).class_definition());
        let schema = manager(&mock, fast_config());

        schema.ensure(&VectorContext::new()).await.unwrap();
        assert_eq!(mock.calls(MockOperation::CreateClass), 0);
    }

    #[tokio::test]
    async fn legacy_route_is_used_after_method_not_allowed() {
        let mock = Arc::new(MockWeaviate::new().with_primary_schema_route_disabled());
        let schema = manager(&mock, fast_config());

        schema.ensure(&VectorContext::new()).await.unwrap();
        assert!(mock.has_class(CLASS));
        assert_eq!(mock.calls(MockOperation::CreateClass), 2);
    }

    #[tokio::test]
    async fn polls_until_the_class_is_visible() {
        let mock = Arc::new(MockWeaviate::new().with_visibility_delay(3));
        let schema = manager(&mock, fast_config());

        schema.ensure(&VectorContext::new()).await.unwrap();
        // One existence check before creation, then three invisible probes and a visible one.
        assert_eq!(mock.calls(MockOperation::ClassExists), 5);
    }

    #[tokio::test]
    async fn exhausted_polling_still_marks_ready() {
        let mock = Arc::new(MockWeaviate::new().with_visibility_delay(100));
        let schema = manager(
            &mock,
            WeaviateConfig::default().with_ensure_schedule(2, Duration::from_millis(1)),
        );

        schema.ensure(&VectorContext::new()).await.unwrap();
        assert_eq!(schema.state(), SchemaState::Ready);
    }

    #[tokio::test]
    async fn cancelled_context_stops_polling() {
        let mock = Arc::new(MockWeaviate::new().with_visibility_delay(100));
        let schema = manager(
            &mock,
            WeaviateConfig::default().with_ensure_schedule(50, Duration::from_secs(60)),
        );
        let ctx = VectorContext::new();

        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = schema.ensure(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(schema.state(), SchemaState::Unknown);
    }

    #[test]
    fn reject_policy_guards_the_dimension() {
        let mock = Arc::new(MockWeaviate::new());
        let schema = manager(&mock, fast_config());

        schema.observe_dimension(3).unwrap();
        schema.observe_dimension(3).unwrap();
        let err = schema.observe_dimension(4).unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
        assert_eq!(schema.dimension(), Some(3));
        assert!(schema.validate(&[0.0; 4]).is_err());
        assert!(schema.validate(&[f32::NAN, 0.0, 0.0]).is_err());
        assert!(schema.observe_dimension(0).is_err());
    }

    #[tokio::test]
    async fn recreate_policy_drops_and_recreates_the_class() {
        let mock = Arc::new(MockWeaviate::new());
        let schema = manager(
            &mock,
            fast_config().with_dimension_policy(DimensionConflictPolicy::Recreate),
        );
        let ctx = VectorContext::new();

        schema.observe_dimension(3).unwrap();
        schema.ensure(&ctx).await.unwrap();

        schema.observe_dimension(5).unwrap();
        assert_eq!(schema.dimension(), Some(5));
        assert_eq!(schema.state(), SchemaState::Ensuring);

        schema.ensure(&ctx).await.unwrap();
        assert_eq!(mock.calls(MockOperation::DeleteClass), 1);
        assert_eq!(mock.calls(MockOperation::CreateClass), 2);
        assert_eq!(schema.state(), SchemaState::Ready);
    }

    #[test]
    fn query_dimension_never_recreates() {
        let mock = Arc::new(MockWeaviate::new());
        let schema = manager(
            &mock,
            fast_config().with_dimension_policy(DimensionConflictPolicy::Recreate),
        );
        schema.observe_query_dimension(3).unwrap();
        assert!(schema.observe_query_dimension(4).is_err());
        assert_eq!(schema.dimension(), Some(3));
    }
}
