//! The engine operations the adapter needs, in structured form.
//!
//! [`WeaviateTransport`] is the seam between the adapter's protocol logic
//! and the wire. [`HttpTransport`] speaks REST + GraphQL over `reqwest`; the
//! in-memory engine in [`crate::mock`] implements the same trait for tests.

mod graphql;
mod http;

use std::fmt;

use async_trait::async_trait;
use koan_vector::Metadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::graphql::{parse_count, parse_get, render_count, render_get};
pub use self::http::HttpTransport;
use crate::error::RemoteResult;
use crate::filter::WhereFilter;

/// Schema route used to create a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRoute {
    /// `POST /v1/schema`.
    Primary,
    /// `POST /v1/schema/things`, accepted by older engine versions.
    Legacy,
}

impl SchemaRoute {
    /// Returns the route path relative to the endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Primary => "v1/schema",
            Self::Legacy => "v1/schema/things",
        }
    }
}

/// Data type of a class property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyDataType {
    Text,
    Int,
    Number,
    Boolean,
}

/// Wire form of a class property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    pub name: String,
    pub data_type: Vec<PropertyDataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_searchable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_filterable: Option<bool>,
}

/// `vectorIndexConfig` of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub distance: String,
}

/// `invertedIndexConfig` of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvertedIndexConfig {
    pub index_null_state: bool,
}

/// Body of a class creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDefinition {
    pub class: String,
    pub vectorizer: String,
    pub vector_index_config: VectorIndexConfig,
    pub inverted_index_config: InvertedIndexConfig,
    pub properties: Vec<PropertySpec>,
}

/// Body of an object create or replace request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectPayload {
    pub class: String,
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub properties: Metadata,
}

/// An object read back from the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredObject {
    pub id: Uuid,
    #[serde(default)]
    pub properties: Metadata,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

/// Retrieval mode of a `Get` query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Nearest neighbours of `vector`; hits carry a distance.
    NearVector { vector: Vec<f32> },
    /// Relative-score fusion of BM25 over `properties` and the vector signal.
    Hybrid {
        query: String,
        alpha: f32,
        vector: Vec<f32>,
        properties: Vec<String>,
    },
    /// Plain listing in id order, for export.
    Scan {
        after: Option<Uuid>,
        offset: Option<usize>,
    },
}

/// A structured GraphQL `Get` query.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQuery {
    pub class: String,
    pub mode: QueryMode,
    pub filter: Option<WhereFilter>,
    pub limit: usize,
    /// Properties selected on each hit.
    pub properties: Vec<String>,
    /// Also select `_additional { vector }`.
    pub include_vector: bool,
}

/// One object returned by a `Get` query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryHit {
    pub id: Option<Uuid>,
    pub properties: Metadata,
    pub distance: Option<f32>,
    pub score: Option<f32>,
    pub vector: Option<Vec<f32>>,
}

/// Operations the adapter issues against the engine.
#[async_trait]
pub trait WeaviateTransport: fmt::Debug + Send + Sync {
    /// Probes `GET /v1/schema/{class}`.
    async fn class_exists(&self, class: &str) -> RemoteResult<bool>;

    /// Creates a class on the given route.
    async fn create_class(&self, definition: &ClassDefinition, route: SchemaRoute)
    -> RemoteResult<()>;

    /// Deletes a class. Returns `false` when it did not exist.
    async fn delete_class(&self, class: &str) -> RemoteResult<bool>;

    /// Lists the property names currently defined on a class.
    async fn class_properties(&self, class: &str) -> RemoteResult<Vec<String>>;

    /// Creates an object; fails when the id is taken.
    async fn create_object(&self, object: &ObjectPayload) -> RemoteResult<()>;

    /// Replaces an existing object.
    async fn update_object(&self, object: &ObjectPayload) -> RemoteResult<()>;

    /// Reads an object with its vector.
    async fn get_object(&self, class: &str, id: Uuid) -> RemoteResult<Option<StoredObject>>;

    /// Deletes an object. Returns `false` when it did not exist.
    async fn delete_object(&self, class: &str, id: Uuid) -> RemoteResult<bool>;

    /// Runs a `Get` query.
    async fn query(&self, query: &GraphQuery) -> RemoteResult<Vec<QueryHit>>;

    /// Counts the objects of a class.
    async fn count(&self, class: &str) -> RemoteResult<u64>;
}
