//! Full-collection export and flush.

use async_stream::try_stream;
use futures::Stream;
use koan_vector::{RecordStream, VectorContext, VectorError, VectorRecord, VectorResult};
use uuid::Uuid;

use super::{WeaviateAdapter, hit_key, user_metadata};
use crate::TRACING_TARGET_ADAPTER;
use crate::config::ExportPagination;
use crate::error::RemoteError;
use crate::transport::{GraphQuery, QueryHit, QueryMode};

const OPERATION: &str = "export";

impl WeaviateAdapter {
    pub(super) fn export_stream<'a>(
        &'a self,
        ctx: &'a VectorContext,
        batch_size: usize,
    ) -> RecordStream<'a> {
        Box::pin(self.pages(ctx, batch_size))
    }

    /// Pages through the class in id order.
    ///
    /// Cursor mode resumes after the last id of each page and is unbounded.
    /// Offset mode never asks for records past the configured ceiling. Once
    /// it gets there it counts the class: a class holding exactly `ceiling`
    /// objects ends cleanly, a larger one ends with
    /// [`VectorError::ExportLimitReached`] after every readable record.
    fn pages<'a>(
        &'a self,
        ctx: &'a VectorContext,
        batch_size: usize,
    ) -> impl Stream<Item = VectorResult<VectorRecord>> + Send + 'a {
        try_stream! {
            check_batch_size(batch_size)?;

            self.schema.ensure(ctx).await?;
            let properties = self
                .selected_properties(ctx, OPERATION)
                .await?
                .map_err(self.remote_error("class_properties"))?;

            let mut after: Option<Uuid> = None;
            let mut offset = 0usize;
            let mut exported = 0usize;

            loop {
                let (mode, limit) = match self.page_window(after, offset, batch_size) {
                    Page::Next { mode, limit } => (mode, limit),
                    Page::Ceiling(ceiling) => {
                        self.check_ceiling(ctx, ceiling, exported).await?;
                        break;
                    }
                };
                let request = GraphQuery {
                    class: self.collection.clone(),
                    mode,
                    filter: None,
                    limit,
                    properties: properties.clone(),
                    include_vector: true,
                };
                let hits = ctx
                    .run(OPERATION, self.transport.query(&request))
                    .await?
                    .map_err(self.remote_error("export"))?;

                let page_len = hits.len();
                let last_id = hits.last().and_then(|hit| hit.id);
                for hit in hits {
                    if let Some(record) = self.export_record(hit) {
                        exported += 1;
                        yield record;
                    }
                }

                if page_len < limit {
                    break;
                }
                offset += page_len;

                if self.config.pagination.is_unbounded() {
                    let id = last_id.ok_or_else(|| {
                        VectorError::remote(
                            &self.collection,
                            "export",
                            RemoteError::decode("page without object ids cannot be continued"),
                        )
                    })?;
                    after = Some(id);
                }
            }

            tracing::debug!(
                target: TRACING_TARGET_ADAPTER,
                collection = %self.collection,
                exported,
                "Export completed"
            );
        }
    }

    /// Returns the scan mode and page size for the next page.
    fn page_window(&self, after: Option<Uuid>, offset: usize, batch_size: usize) -> Page {
        match self.config.pagination {
            ExportPagination::Cursor => Page::Next {
                mode: QueryMode::Scan { after, offset: None },
                limit: batch_size,
            },
            ExportPagination::Offset { ceiling } if offset >= ceiling => Page::Ceiling(ceiling),
            ExportPagination::Offset { ceiling } => Page::Next {
                mode: QueryMode::Scan {
                    after: None,
                    offset: Some(offset),
                },
                limit: batch_size.min(ceiling - offset),
            },
        }
    }

    /// Fails with [`VectorError::ExportLimitReached`] if the class holds
    /// objects past the ceiling.
    async fn check_ceiling(
        &self,
        ctx: &VectorContext,
        ceiling: usize,
        exported: usize,
    ) -> VectorResult<()> {
        let total = ctx
            .run(OPERATION, self.transport.count(&self.collection))
            .await?
            .map_err(self.remote_error("count"))?;
        if total <= ceiling as u64 {
            return Ok(());
        }

        tracing::warn!(
            target: TRACING_TARGET_ADAPTER,
            collection = %self.collection,
            ceiling,
            exported,
            total,
            "Export reached the offset ceiling"
        );
        Err(VectorError::ExportLimitReached {
            collection: self.collection.clone(),
            ceiling,
        })
    }

    fn export_record(&self, hit: QueryHit) -> Option<VectorRecord> {
        let Some(key) = hit_key(&hit) else {
            tracing::debug!(
                target: TRACING_TARGET_ADAPTER,
                collection = %self.collection,
                id = ?hit.id,
                "Skipping object without an application key"
            );
            return None;
        };

        Some(VectorRecord {
            key,
            remote_id: hit.id.map(|id| id.to_string()),
            embedding: hit.vector.unwrap_or_default(),
            metadata: user_metadata(&hit.properties),
        })
    }

    pub(super) async fn flush_collection(
        &self,
        ctx: &VectorContext,
        confirm: bool,
    ) -> VectorResult<()> {
        if !confirm {
            return Err(VectorError::confirmation_required("flush"));
        }

        tracing::warn!(
            target: TRACING_TARGET_ADAPTER,
            collection = %self.collection,
            "Flushing collection"
        );
        self.schema.recreate(ctx).await
    }
}

enum Page {
    Next { mode: QueryMode, limit: usize },
    Ceiling(usize),
}

fn check_batch_size(batch_size: usize) -> VectorResult<()> {
    if batch_size == 0 {
        return Err(VectorError::invalid_input("export batch size must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use futures::{StreamExt, TryStreamExt};
    use koan_vector::VectorRepository;

    use super::super::tests::{adapter, adapter_with, config};
    use super::*;
    use crate::mock::{MockOperation, MockWeaviate};

    async fn seed(adapter: &WeaviateAdapter, count: usize) {
        let records = (0..count)
            .map(|i| {
                VectorRecord::new(format!("doc-{i}"), vec![i as f32, 1.0])
                    .with_field("position", i as u64)
            })
            .collect();
        adapter
            .upsert_many(&VectorContext::new(), records)
            .await
            .unwrap();
    }

    async fn export_all(adapter: &WeaviateAdapter, batch_size: usize) -> Vec<VectorRecord> {
        adapter
            .stream_export(&VectorContext::new(), batch_size)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn export_is_complete_for_any_batch_size() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        seed(&adapter, 10).await;

        for batch_size in [1, 3, 7, 10, 100] {
            let records = export_all(&adapter, batch_size).await;
            let keys: BTreeSet<_> = records.iter().map(|r| r.key.clone()).collect();
            assert_eq!(records.len(), 10, "batch size {batch_size}");
            assert_eq!(keys.len(), 10, "batch size {batch_size}");
        }
    }

    #[tokio::test]
    async fn exported_records_carry_embedding_and_metadata() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        seed(&adapter, 3).await;

        let records = export_all(&adapter, 2).await;
        let record = records.iter().find(|r| r.key == "doc-2").unwrap();
        assert_eq!(record.embedding, vec![2.0, 1.0]);
        assert_eq!(record.metadata["position"], 2);
        assert!(!record.metadata.contains_key("koanKey"));
        assert_eq!(
            record.remote_id.as_deref(),
            Some(adapter.object_id("doc-2").to_string().as_str())
        );
    }

    #[tokio::test]
    async fn export_restarts_from_the_beginning() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        seed(&adapter, 5).await;

        let first = export_all(&adapter, 2).await;
        let second = export_all(&adapter, 2).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_collection_exports_nothing() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        assert!(export_all(&adapter, 4).await.is_empty());
        assert_eq!(mock.calls(MockOperation::Query), 1);
    }

    #[tokio::test]
    async fn zero_batch_size_is_invalid() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);

        let ctx = VectorContext::new();
        let mut stream = adapter.stream_export(&ctx, 0);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(VectorError::InvalidInput(_))));
        assert!(stream.next().await.is_none());
        assert_eq!(mock.calls(MockOperation::ClassExists), 0);
    }

    #[tokio::test]
    async fn offset_export_stops_at_the_ceiling() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter_with(
            &mock,
            config().with_pagination(ExportPagination::Offset { ceiling: 5 }),
        );
        seed(&adapter, 8).await;

        let items: Vec<_> = adapter
            .stream_export(&VectorContext::new(), 2)
            .collect()
            .await;
        assert_eq!(items.len(), 6);
        assert!(items[..5].iter().all(Result::is_ok));
        assert!(matches!(
            items[5],
            Err(VectorError::ExportLimitReached { ceiling: 5, .. })
        ));
    }

    #[tokio::test]
    async fn offset_export_of_exactly_the_ceiling_completes() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter_with(
            &mock,
            config().with_pagination(ExportPagination::Offset { ceiling: 6 }),
        );
        seed(&adapter, 6).await;

        for batch_size in [2, 3, 4, 6] {
            let items: Vec<_> = adapter
                .stream_export(&VectorContext::new(), batch_size)
                .collect()
                .await;
            assert_eq!(items.len(), 6, "batch size {batch_size}");
            assert!(items.iter().all(Result::is_ok), "batch size {batch_size}");
        }
    }

    #[tokio::test]
    async fn offset_export_below_the_ceiling_completes() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter_with(&mock, config().with_pagination(ExportPagination::offset()));
        seed(&adapter, 7).await;

        assert_eq!(export_all(&adapter, 3).await.len(), 7);
    }

    #[tokio::test]
    async fn flush_requires_confirmation() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);

        let err = adapter
            .flush(&VectorContext::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::ConfirmationRequired { operation: "flush" }
        ));
        assert_eq!(mock.calls(MockOperation::ClassExists), 0);
        assert_eq!(mock.calls(MockOperation::DeleteClass), 0);
    }

    #[tokio::test]
    async fn confirmed_flush_empties_the_collection() {
        let mock = Arc::new(MockWeaviate::new());
        let adapter = adapter(&mock);
        let ctx = VectorContext::new();
        seed(&adapter, 4).await;

        adapter.flush(&ctx, true).await.unwrap();
        assert_eq!(adapter.count(&ctx).await.unwrap(), 0);
        assert!(mock.has_class(adapter.collection()));

        // A flushed class accepts a new dimension.
        adapter
            .upsert(&ctx, VectorRecord::new("fresh", vec![1.0, 2.0, 3.0]))
            .await
            .unwrap();
        assert_eq!(adapter.schema().dimension(), Some(3));
    }
}
