#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for repository operations.
///
/// Use this target for logging upserts, searches, exports, flushes and admin commands.
pub const TRACING_TARGET_ADAPTER: &str = "koan_weaviate::adapter";

/// Tracing target for schema management.
///
/// Use this target for logging class creation, readiness polling and dimension reconciliation.
pub const TRACING_TARGET_SCHEMA: &str = "koan_weaviate::schema";

/// Tracing target for the HTTP transport.
///
/// Use this target for logging requests, response statuses and decoding failures.
pub const TRACING_TARGET_TRANSPORT: &str = "koan_weaviate::transport";

/// Tracing target for endpoint discovery and health probing.
///
/// Use this target for logging candidate resolution, probe results and endpoint selection.
pub const TRACING_TARGET_DISCOVERY: &str = "koan_weaviate::discovery";

mod adapter;
mod admin;
mod config;
mod discovery;
mod error;
mod filter;
mod health;
mod identity;
mod naming;
mod registry;
mod schema;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod mock;

pub use adapter::WeaviateAdapter;
pub use admin::{AdminCommand, AdminOutcome};
pub use config::{
    DEFAULT_COLLECTION_PREFIX, DEFAULT_ENDPOINT, DEFAULT_OFFSET_CEILING, DEFAULT_TEXT_FIELD,
    DEFAULT_TIMEOUT, DimensionConflictPolicy, DistanceMetric, ExportPagination, WeaviateConfig,
};
pub use discovery::{
    CandidateSource, DEFAULT_CONTAINER_ENDPOINT, DiscoveryCandidate, DiscoveryContext,
    DiscoveryReport, DiscoverySettings, ENDPOINT_ENV_VARS, EndpointDiscovery,
    ORCHESTRATION_ENV_VAR, build_candidates,
};
pub use error::{ConflictKind, RemoteError, RemoteResult};
pub use filter::{WhereFilter, WhereOperator, WhereValue, translate};
pub use health::{DEFAULT_PROBE_TIMEOUT, HealthProbe, HttpHealthProbe, READINESS_PATHS};
pub use identity::{collection_namespace, remote_id};
pub use naming::{
    CollectionNaming, DEFAULT_PARTITION, MAX_COLLECTION_NAME_LEN, property_name, resolve,
};
pub use registry::WeaviateStore;
pub use schema::{
    CollectionSchema, KEY_PROPERTY, PropertyDefinition, SEARCH_TEXT_PROPERTY, SchemaManager,
    SchemaState,
};
pub use transport::{HttpTransport, WeaviateTransport};
