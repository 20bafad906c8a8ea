//! Weaviate adapter configuration.

use std::time::Duration;

use koan_vector::{VectorError, VectorResult};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use url::Url;

/// Default Weaviate REST endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";

/// Default timeout for HTTP requests: 30 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default prefix of every collection (class) name.
pub const DEFAULT_COLLECTION_PREFIX: &str = "Koan";

/// Default metadata key promoted to the lexical search property.
pub const DEFAULT_TEXT_FIELD: &str = "text";

/// Default result window of Weaviate (`QUERY_MAXIMUM_RESULTS`).
pub const DEFAULT_OFFSET_CEILING: usize = 10_000;

/// Distance metric declared on the class's vector index.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    IntoStaticStr
)]
#[cfg_attr(feature = "config", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance.
    #[default]
    Cosine,
    /// Negative dot product.
    Dot,
    /// Squared euclidean distance.
    Euclidean,
}

impl DistanceMetric {
    /// Returns the Weaviate `vectorIndexConfig.distance` value.
    pub fn as_weaviate(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::Euclidean => "l2-squared",
        }
    }
}

/// What to do when an embedding's length disagrees with the discovered dimension.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    IntoStaticStr
)]
#[cfg_attr(feature = "config", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DimensionConflictPolicy {
    /// Fail the write with a dimension mismatch before any network call.
    #[default]
    Reject,
    /// Adopt the new dimension, then drop and recreate the class.
    ///
    /// Weaviate fixes a class's vector length with its first object, so this
    /// discards every stored vector in the collection.
    Recreate,
}

/// How full-collection export pages through the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExportPagination {
    /// `after` cursors seeded by the last object id of each page.
    #[default]
    Cursor,
    /// `offset` paging, bounded by the engine's result window.
    Offset {
        /// Largest `offset + limit` the engine accepts.
        ceiling: usize,
    },
}

impl ExportPagination {
    /// Offset paging with Weaviate's default result window.
    pub fn offset() -> Self {
        Self::Offset {
            ceiling: DEFAULT_OFFSET_CEILING,
        }
    }

    /// Returns `true` when export is not bounded by an offset window.
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Cursor)
    }
}

/// Configuration of a Weaviate adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaviateConfig {
    /// REST endpoint, e.g. `http://localhost:8080`.
    pub endpoint: Url,
    /// API key sent as a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Distance metric of new classes.
    #[serde(default)]
    pub distance: DistanceMetric,
    /// Result count when a query does not ask for one.
    pub default_top_k: usize,
    /// Upper bound applied to every query.
    pub max_top_k: usize,
    /// Prefix of every class name.
    pub collection_prefix: String,
    /// Metadata key whose value feeds lexical (BM25) scoring.
    pub text_field: String,
    /// Readiness probes after creating a class.
    pub ensure_attempts: u32,
    /// Delay between readiness probes.
    pub ensure_backoff: Duration,
    /// Reaction to embeddings of a different length.
    #[serde(default)]
    pub dimension_policy: DimensionConflictPolicy,
    /// Export paging strategy.
    #[serde(default)]
    pub pagination: ExportPagination,
    /// Concurrent requests used by bulk operations.
    pub bulk_concurrency: usize,
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            distance: DistanceMetric::default(),
            default_top_k: 10,
            max_top_k: 100,
            collection_prefix: DEFAULT_COLLECTION_PREFIX.to_owned(),
            text_field: DEFAULT_TEXT_FIELD.to_owned(),
            ensure_attempts: 5,
            ensure_backoff: Duration::from_millis(200),
            dimension_policy: DimensionConflictPolicy::default(),
            pagination: ExportPagination::default(),
            bulk_concurrency: 8,
        }
    }
}

impl WeaviateConfig {
    /// Creates a configuration for the given endpoint.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Parses `endpoint` and creates a configuration for it.
    pub fn from_endpoint(endpoint: &str) -> VectorResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            VectorError::configuration(format!("invalid endpoint '{endpoint}': {e}"))
        })?;
        Ok(Self::new(endpoint))
    }

    fn default_endpoint() -> Url {
        Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL")
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the distance metric.
    pub fn with_distance(mut self, distance: DistanceMetric) -> Self {
        self.distance = distance;
        self
    }

    /// Sets the default and maximum result counts.
    pub fn with_top_k(mut self, default_top_k: usize, max_top_k: usize) -> Self {
        self.default_top_k = default_top_k;
        self.max_top_k = max_top_k;
        self
    }

    /// Sets the class name prefix.
    pub fn with_collection_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into();
        self
    }

    /// Sets the metadata key used for lexical search.
    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }

    /// Sets the readiness polling schedule.
    pub fn with_ensure_schedule(mut self, attempts: u32, backoff: Duration) -> Self {
        self.ensure_attempts = attempts;
        self.ensure_backoff = backoff;
        self
    }

    /// Sets the dimension conflict policy.
    pub fn with_dimension_policy(mut self, policy: DimensionConflictPolicy) -> Self {
        self.dimension_policy = policy;
        self
    }

    /// Sets the export pagination strategy.
    pub fn with_pagination(mut self, pagination: ExportPagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Sets the bulk operation concurrency.
    pub fn with_bulk_concurrency(mut self, concurrency: usize) -> Self {
        self.bulk_concurrency = concurrency;
        self
    }

    /// Returns the effective timeout, using default if zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Clamps a requested result count to `1..=max_top_k`.
    pub fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> VectorResult<()> {
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(VectorError::configuration(
                "endpoint must start with http:// or https://",
            ));
        }
        if self.default_top_k == 0 || self.max_top_k == 0 {
            return Err(VectorError::configuration("top-k limits must be positive"));
        }
        if self.default_top_k > self.max_top_k {
            return Err(VectorError::configuration(
                "default top-k cannot exceed the maximum",
            ));
        }
        if self.text_field.trim().is_empty() {
            return Err(VectorError::configuration("text field cannot be empty"));
        }
        if self.bulk_concurrency == 0 {
            return Err(VectorError::configuration(
                "bulk concurrency must be positive",
            ));
        }
        if let ExportPagination::Offset { ceiling } = self.pagination
            && ceiling == 0
        {
            return Err(VectorError::configuration(
                "offset ceiling must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WeaviateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.endpoint.as_str(), "http://localhost:8080/");
        assert_eq!(config.collection_prefix, "Koan");
    }

    #[test]
    fn top_k_is_clamped() {
        let config = WeaviateConfig::default().with_top_k(10, 50);
        assert_eq!(config.clamp_top_k(None), 10);
        assert_eq!(config.clamp_top_k(Some(500)), 50);
        assert_eq!(config.clamp_top_k(Some(3)), 3);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(WeaviateConfig::from_endpoint("not a url").is_err());
        assert!(
            WeaviateConfig::from_endpoint("ftp://weaviate:8080")
                .unwrap()
                .validate()
                .is_err()
        );
        assert!(
            WeaviateConfig::default()
                .with_top_k(20, 10)
                .validate()
                .is_err()
        );
        assert!(
            WeaviateConfig::default()
                .with_pagination(ExportPagination::Offset { ceiling: 0 })
                .validate()
                .is_err()
        );
    }

    #[test]
    fn metric_maps_to_engine_names() {
        assert_eq!(DistanceMetric::Euclidean.as_weaviate(), "l2-squared");
        assert_eq!(DistanceMetric::Cosine.to_string(), "cosine");
        assert_eq!(
            "recreate".parse::<DimensionConflictPolicy>().unwrap(),
            DimensionConflictPolicy::Recreate
        );
    }
}
