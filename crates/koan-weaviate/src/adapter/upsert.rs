//! Create-then-update write protocol.

use futures::stream::{self, StreamExt, TryStreamExt};
use koan_vector::{Metadata, VectorContext, VectorError, VectorRecord, VectorResult};
use serde_json::Value;

use super::{WeaviateAdapter, require_key};
use crate::TRACING_TARGET_ADAPTER;
use crate::error::ConflictKind;
use crate::naming::property_name;
use crate::schema::{KEY_PROPERTY, SEARCH_TEXT_PROPERTY, SchemaManager};
use crate::transport::ObjectPayload;

const OPERATION: &str = "upsert";

impl WeaviateAdapter {
    pub(super) async fn upsert_one(
        &self,
        ctx: &VectorContext,
        record: &VectorRecord,
    ) -> VectorResult<()> {
        require_key(&record.key)?;
        SchemaManager::check_components(&record.embedding)?;
        self.schema.observe_dimension(record.embedding.len())?;
        self.schema.ensure(ctx).await?;

        let payload = self.payload(record);
        self.write(ctx, &record.key, &payload).await
    }

    /// Validates every record, ensures the class once, then writes with
    /// bounded concurrency. Stops at the first failure.
    pub(super) async fn upsert_batch(
        &self,
        ctx: &VectorContext,
        records: &[VectorRecord],
    ) -> VectorResult<usize> {
        let Some(first) = records.first() else {
            return Ok(0);
        };

        let dimension = first.embedding.len();
        for record in records {
            require_key(&record.key)?;
            SchemaManager::check_components(&record.embedding)?;
            if record.embedding.len() != dimension {
                return Err(VectorError::dimension_mismatch(
                    dimension,
                    record.embedding.len(),
                ));
            }
        }
        self.schema.observe_dimension(dimension)?;
        self.schema.ensure(ctx).await?;

        let writes: Vec<_> = records
            .iter()
            .map(|record| async move {
                let payload = self.payload(record);
                self.write(ctx, &record.key, &payload).await
            })
            .collect();
        let written = stream::iter(writes)
            .buffer_unordered(self.config.bulk_concurrency.max(1))
            .try_fold(0usize, |written, ()| async move { Ok(written + 1) })
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_ADAPTER,
            collection = %self.collection,
            written,
            "Upserted batch"
        );
        Ok(written)
    }

    /// Builds the object body: sanitized metadata, the application key and
    /// the promoted search text.
    pub(super) fn payload(&self, record: &VectorRecord) -> ObjectPayload {
        ObjectPayload {
            class: self.collection.clone(),
            id: self.object_id(&record.key),
            vector: record.embedding.clone(),
            properties: self.properties(record),
        }
    }

    fn properties(&self, record: &VectorRecord) -> Metadata {
        let mut properties = Metadata::new();
        for (key, value) in &record.metadata {
            match property_name(key) {
                Some(name) => {
                    properties.insert(name, value.clone());
                }
                None => {
                    tracing::debug!(
                        target: TRACING_TARGET_ADAPTER,
                        field = %key,
                        "Dropping metadata field without a valid property name"
                    );
                }
            }
        }

        if let Some(Value::String(text)) = record.metadata.get(&self.config.text_field) {
            properties.insert(SEARCH_TEXT_PROPERTY.to_owned(), Value::String(text.clone()));
        }
        properties.insert(KEY_PROPERTY.to_owned(), Value::String(record.key.clone()));
        properties
    }

    /// Creates the object, falling back to an update when it already exists.
    ///
    /// A create that races ahead of class propagation waits for the class
    /// once and retries; if that retry fails too, the update path is tried.
    async fn write(
        &self,
        ctx: &VectorContext,
        key: &str,
        payload: &ObjectPayload,
    ) -> VectorResult<()> {
        let created = ctx
            .run(OPERATION, self.transport.create_object(payload))
            .await?;
        let create_err = match created {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let create_err = match create_err.kind() {
            ConflictKind::AlreadyExists => create_err,
            ConflictKind::SchemaNotReady => {
                tracing::debug!(
                    target: TRACING_TARGET_ADAPTER,
                    collection = %self.collection,
                    key,
                    error = %create_err,
                    "Class not ready for writes; waiting"
                );
                self.schema.wait_ready(ctx).await?;
                match ctx
                    .run(OPERATION, self.transport.create_object(payload))
                    .await?
                {
                    Ok(()) => return Ok(()),
                    Err(err) => err,
                }
            }
            kind => {
                tracing::debug!(
                    target: TRACING_TARGET_ADAPTER,
                    collection = %self.collection,
                    key,
                    kind = kind.as_ref(),
                    "Create rejected"
                );
                return Err(VectorError::remote(
                    &self.collection,
                    "create_object",
                    create_err,
                ));
            }
        };

        match ctx
            .run(OPERATION, self.transport.update_object(payload))
            .await?
        {
            Ok(()) => Ok(()),
            Err(update_err) => Err(VectorError::upsert_failed(
                &self.collection,
                key,
                create_err,
                update_err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use koan_vector::VectorRepository;
    use serde_json::json;

    use super::super::tests::{adapter, adapter_with, config};
    use super::*;
    use crate::error::RemoteError;
    use crate::mock::{MockOperation, MockWeaviate};

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        let record = VectorRecord::new("doc-1", vec![0.1, 0.2]).with_field("title", "Intro");

        adapter.upsert(&ctx, record.clone()).await.unwrap();
        adapter.upsert(&ctx, record.clone()).await.unwrap();

        assert_eq!(mock.object_count(adapter.collection()), 1);
        assert_eq!(mock.calls(MockOperation::UpdateObject), 1);

        let stored = mock
            .stored_object(adapter.collection(), adapter.object_id("doc-1"))
            .unwrap();
        assert_eq!(stored.properties["koanKey"], "doc-1");
        assert_eq!(stored.properties["title"], "Intro");
    }

    #[tokio::test]
    async fn second_upsert_replaces_the_embedding() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();

        adapter
            .upsert(&ctx, VectorRecord::new("doc-1", vec![0.1, 0.2]))
            .await
            .unwrap();
        adapter
            .upsert(&ctx, VectorRecord::new("doc-1", vec![0.9, 0.8]))
            .await
            .unwrap();

        assert_eq!(
            adapter.get_embedding(&ctx, "doc-1").await.unwrap(),
            vec![0.9, 0.8]
        );
    }

    #[test]
    fn payload_promotes_text_and_sanitizes_keys() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let record = VectorRecord::new("doc-1", vec![1.0])
            .with_field("text", "hello world")
            .with_field("Page-Count", 3)
            .with_field("--", "dropped");

        let payload = adapter.payload(&record);
        assert_eq!(payload.class, adapter.collection());
        assert_eq!(payload.id, adapter.object_id("doc-1"));
        assert_eq!(
            Value::Object(payload.properties),
            json!({
                "text": "hello world",
                "page_Count": 3,
                "searchText": "hello world",
                "koanKey": "doc-1"
            })
        );
    }

    #[tokio::test]
    async fn retries_once_when_the_class_is_not_ready() {
        let mock = Arc::new(MockWeaviate::new().with_schema_not_ready_creates(1));
        let adapter = adapter(&mock);

        adapter
            .upsert(&VectorContext::new(), VectorRecord::new("doc-1", vec![1.0]))
            .await
            .unwrap();
        assert_eq!(mock.calls(MockOperation::CreateObject), 2);
        assert_eq!(mock.object_count(adapter.collection()), 1);
    }

    #[tokio::test]
    async fn both_paths_failing_reports_both_causes() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        adapter
            .upsert(&ctx, VectorRecord::new("doc-1", vec![1.0]))
            .await
            .unwrap();

        mock.set_update_object_failure(Some(RemoteError::status(500, "disk full")));
        let err = adapter
            .upsert(&ctx, VectorRecord::new("doc-1", vec![2.0]))
            .await
            .unwrap_err();

        let VectorError::UpsertFailed { create, update, .. } = err else {
            panic!("expected UpsertFailed, got {err:?}");
        };
        assert!(create.to_string().contains("already exists"));
        assert!(update.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn unclassified_create_failure_skips_update() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        mock.set_create_object_failure(Some(RemoteError::status(401, "anonymous access not enabled")));

        let err = adapter
            .upsert(&VectorContext::new(), VectorRecord::new("doc-1", vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::Remote { operation: "create_object", .. }));
        assert_eq!(mock.calls(MockOperation::UpdateObject), 0);
    }

    #[tokio::test]
    async fn batch_validates_before_any_request() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let records = vec![
            VectorRecord::new("a", vec![1.0, 0.0]),
            VectorRecord::new("b", vec![1.0, 0.0, 0.0]),
        ];

        let err = adapter
            .upsert_many(&VectorContext::new(), records)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(mock.calls(MockOperation::ClassExists), 0);
        assert_eq!(mock.calls(MockOperation::CreateObject), 0);
    }

    #[tokio::test]
    async fn batch_writes_every_record_with_bounded_concurrency() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter_with(&mock, config().with_bulk_concurrency(3));
        let records: Vec<_> = (0..20)
            .map(|i| VectorRecord::new(format!("doc-{i}"), vec![1.0, i as f32]))
            .collect();

        let ctx = VectorContext::new();
        assert_eq!(adapter.upsert_many(&ctx, records.clone()).await.unwrap(), 20);
        assert_eq!(adapter.upsert_many(&ctx, records).await.unwrap(), 20);
        assert_eq!(mock.object_count(adapter.collection()), 20);
        assert_eq!(mock.calls(MockOperation::CreateClass), 1);
        assert_eq!(adapter.upsert_many(&ctx, Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_key_and_embedding_are_invalid() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();

        for record in [
            VectorRecord::new("", vec![1.0]),
            VectorRecord::new("a", Vec::new()),
            VectorRecord::new("a", vec![f32::INFINITY]),
        ] {
            let err = adapter.upsert(&ctx, record).await.unwrap_err();
            assert!(matches!(err, VectorError::InvalidInput(_)));
        }
    }
}
