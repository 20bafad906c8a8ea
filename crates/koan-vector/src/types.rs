//! Records, queries and results exchanged with vector repositories.

use serde::{Deserialize, Serialize};

use crate::filter::FilterExpr;

/// Opaque key/value metadata stored alongside an embedding.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Default weight of the vector signal in hybrid search.
pub const DEFAULT_ALPHA: f32 = 0.5;

/// The unit of storage: an application key, its embedding and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Application key, in string form.
    pub key: String,
    /// Identifier the remote engine knows this record by, when read back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// The embedding vector.
    pub embedding: Vec<f32>,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl VectorRecord {
    /// Creates a record with a key and embedding.
    pub fn new(key: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            key: key.into(),
            remote_id: None,
            embedding,
            metadata: Metadata::new(),
        }
    }

    /// Replaces the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds a single metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the remote identifier.
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }
}

/// A nearest-neighbour query, optionally blended with lexical scoring.
///
/// Supplying [`text`](Self::text) switches the query to hybrid mode, where
/// [`alpha`](Self::alpha) weighs the vector signal against the lexical one
/// (`0.0` is purely lexical, `1.0` purely vector).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Query embedding.
    pub vector: Vec<f32>,
    /// Lexical query text.
    pub text: Option<String>,
    /// Vector weight in hybrid mode.
    pub alpha: Option<f32>,
    /// Number of results requested; adapters clamp it to their maximum.
    pub top_k: Option<usize>,
    /// Provider-neutral predicate applied server side.
    pub filter: Option<FilterExpr>,
    /// Return stored metadata with each hit.
    pub include_metadata: bool,
}

impl SearchQuery {
    /// Creates a pure-vector query.
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            text: None,
            alpha: None,
            top_k: None,
            filter: None,
            include_metadata: false,
        }
    }

    /// Adds lexical text, turning this into a hybrid query.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the hybrid weighting.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Sets the number of results.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Sets a filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Requests metadata in the results.
    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    /// Returns `true` when the query carries lexical text.
    pub fn is_hybrid(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Returns the hybrid weighting, defaulting to [`DEFAULT_ALPHA`].
    pub fn effective_alpha(&self) -> f32 {
        self.alpha.unwrap_or(DEFAULT_ALPHA)
    }
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Application key of the matching record.
    pub key: String,
    /// Similarity score; higher is better.
    pub score: f32,
    /// Stored metadata, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}
