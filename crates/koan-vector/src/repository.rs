//! The repository contract every vector adapter implements.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::capability::VectorCapabilities;
use crate::context::VectorContext;
use crate::error::VectorResult;
use crate::types::{SearchQuery, SearchResult, VectorRecord};

/// Lazy, finite stream of exported records.
pub type RecordStream<'a> = BoxStream<'a, VectorResult<VectorRecord>>;

/// Trait consumed by the generic repository layer.
///
/// Keys are the string form of the application key. Implementations own their
/// collection schema and create it on demand.
#[async_trait]
pub trait VectorRepository: Send + Sync {
    /// Returns the optional features this instance supports.
    fn capabilities(&self) -> VectorCapabilities;

    /// Inserts or replaces a single record.
    async fn upsert(&self, ctx: &VectorContext, record: VectorRecord) -> VectorResult<()>;

    /// Inserts or replaces many records, returning how many were written.
    ///
    /// Every embedding is validated before anything is sent.
    async fn upsert_many(&self, ctx: &VectorContext, records: Vec<VectorRecord>)
    -> VectorResult<usize>;

    /// Deletes a record, returning `false` if it did not exist.
    async fn delete(&self, ctx: &VectorContext, key: &str) -> VectorResult<bool>;

    /// Deletes many records, returning how many existed.
    async fn delete_many(&self, ctx: &VectorContext, keys: &[String]) -> VectorResult<usize>;

    /// Runs a pure-vector or hybrid search.
    async fn search(&self, ctx: &VectorContext, query: SearchQuery)
    -> VectorResult<Vec<SearchResult>>;

    /// Streams every stored record in pages of `batch_size`.
    ///
    /// Each call starts over from the beginning of the collection.
    fn stream_export<'a>(&'a self, ctx: &'a VectorContext, batch_size: usize) -> RecordStream<'a>;

    /// Removes every record. Refuses to run unless `confirm` is `true`.
    async fn flush(&self, ctx: &VectorContext, confirm: bool) -> VectorResult<()>;

    /// Returns the stored embedding for `key`, or [`VectorError::NotFound`].
    ///
    /// [`VectorError::NotFound`]: crate::VectorError::NotFound
    async fn get_embedding(&self, ctx: &VectorContext, key: &str) -> VectorResult<Vec<f32>>;

    /// Returns the stored embeddings of the keys that exist.
    async fn get_embeddings(
        &self,
        ctx: &VectorContext,
        keys: &[String],
    ) -> VectorResult<HashMap<String, Vec<f32>>>;
}
