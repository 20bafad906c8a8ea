//! Weaviate connection and adapter configuration.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use koan_weaviate::{
    DEFAULT_COLLECTION_PREFIX, DEFAULT_ENDPOINT, DEFAULT_TEXT_FIELD, DimensionConflictPolicy,
    DistanceMetric, ExportPagination, WeaviateConfig,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::TRACING_TARGET_CONFIG;

/// Weaviate configuration.
///
/// # Environment Variables
///
/// - `WEAVIATE_URL` - REST endpoint (default: http://localhost:8080)
/// - `WEAVIATE_API_KEY` - API key sent as a bearer token
/// - `WEAVIATE_TIMEOUT_SECS` - Request timeout in seconds (default: 30)
/// - `WEAVIATE_OFFSET_CEILING` - Switches export to offset paging with this window
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
#[must_use = "config does nothing unless you use it"]
pub struct WeaviateArgs {
    /// REST endpoint of the engine.
    #[arg(long, env = "WEAVIATE_URL", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: Url,

    /// API key sent as a bearer token.
    #[arg(long, env = "WEAVIATE_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, env = "WEAVIATE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Distance metric of newly created classes.
    #[arg(long, env = "WEAVIATE_DISTANCE", value_enum, default_value_t = DistanceMetric::Cosine)]
    pub distance: DistanceMetric,

    /// Prefix of every class name.
    #[arg(long, env = "WEAVIATE_COLLECTION_PREFIX", default_value = DEFAULT_COLLECTION_PREFIX)]
    pub collection_prefix: String,

    /// Metadata key whose value feeds lexical scoring.
    #[arg(long, env = "WEAVIATE_TEXT_FIELD", default_value = DEFAULT_TEXT_FIELD)]
    pub text_field: String,

    /// Readiness probes after creating a class.
    #[arg(long, env = "WEAVIATE_ENSURE_ATTEMPTS", default_value_t = 5)]
    pub ensure_attempts: u32,

    /// Delay between readiness probes, in milliseconds.
    #[arg(long, env = "WEAVIATE_ENSURE_BACKOFF_MS", default_value_t = 200)]
    pub ensure_backoff_ms: u64,

    /// Reaction to embeddings whose length differs from the collection's.
    #[arg(
        long,
        env = "WEAVIATE_DIMENSION_POLICY",
        value_enum,
        default_value_t = DimensionConflictPolicy::Reject
    )]
    pub dimension_policy: DimensionConflictPolicy,

    /// Export with offset paging bounded by this window instead of cursors.
    #[arg(long, env = "WEAVIATE_OFFSET_CEILING")]
    pub offset_ceiling: Option<usize>,

    /// Concurrent requests used by bulk operations.
    #[arg(long, env = "WEAVIATE_BULK_CONCURRENCY", default_value_t = 8)]
    pub bulk_concurrency: usize,
}

impl WeaviateArgs {
    /// Builds and validates the adapter configuration.
    pub fn to_config(&self) -> anyhow::Result<WeaviateConfig> {
        let mut config = WeaviateConfig::new(self.endpoint.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_distance(self.distance)
            .with_collection_prefix(&self.collection_prefix)
            .with_text_field(&self.text_field)
            .with_ensure_schedule(
                self.ensure_attempts,
                Duration::from_millis(self.ensure_backoff_ms),
            )
            .with_dimension_policy(self.dimension_policy)
            .with_bulk_concurrency(self.bulk_concurrency);

        if let Some(api_key) = &self.api_key {
            config = config.with_api_key(api_key);
        }
        if let Some(ceiling) = self.offset_ceiling {
            config = config.with_pagination(ExportPagination::Offset { ceiling });
        }

        config
            .validate()
            .context("invalid Weaviate configuration")?;
        Ok(config)
    }

    /// Logs configuration at info level (no sensitive information).
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            endpoint = %self.endpoint,
            api_key = self.api_key.is_some(),
            timeout_secs = self.timeout_secs,
            distance = %self.distance,
            collection_prefix = %self.collection_prefix,
            dimension_policy = %self.dimension_policy,
            offset_ceiling = ?self.offset_ceiling,
            "Weaviate configuration"
        );
    }
}
