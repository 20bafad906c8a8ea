//! Liveness probing of engine endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use koan_vector::{ServiceHealth, VectorError, VectorResult};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::TRACING_TARGET_DISCOVERY;

/// Readiness paths, tried in order. The next one is tried only on 404.
pub const READINESS_PATHS: &[&str] = &["v1/.well-known/ready", "v1/.well-known/live", "v1/meta"];

/// Default timeout of a single probe request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks whether an endpoint is serving.
///
/// Probes never fail: an unreachable endpoint is reported as unhealthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes `endpoint`.
    async fn probe(&self, endpoint: &Url) -> ServiceHealth;
}

/// Probes the engine's readiness endpoints over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    http: Client,
    api_key: Option<String>,
}

impl HttpHealthProbe {
    /// Creates a probe with its own short-timeout client.
    pub fn new(timeout: Duration) -> VectorResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| VectorError::configuration(format!("failed to build probe client: {e}")))?;
        Ok(Self {
            http,
            api_key: None,
        })
    }

    /// Sends the API key with every probe.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    #[tracing::instrument(skip_all, target = TRACING_TARGET_DISCOVERY, fields(endpoint = %endpoint))]
    async fn probe(&self, endpoint: &Url) -> ServiceHealth {
        let mut base = endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let started = Instant::now();

        for (index, path) in READINESS_PATHS.iter().enumerate() {
            let url = match base.join(path) {
                Ok(url) => url,
                Err(e) => return ServiceHealth::unhealthy(format!("invalid probe URL: {e}")),
            };

            let mut request = self.http.get(url);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }

            let status = match request.send().await {
                Ok(response) => response.status(),
                Err(e) => {
                    tracing::debug!(
                        target: TRACING_TARGET_DISCOVERY,
                        path,
                        error = %e,
                        "Probe request failed"
                    );
                    return ServiceHealth::unhealthy(e.to_string())
                        .with_endpoint(endpoint.as_str())
                        .with_response_time(started.elapsed());
                }
            };

            if status == StatusCode::NOT_FOUND {
                continue;
            }

            let health = if !status.is_success() {
                ServiceHealth::unhealthy(format!("HTTP {status} from /{path}"))
            } else if index == 0 {
                ServiceHealth::healthy()
            } else {
                ServiceHealth::degraded(format!("readiness answered on alternate path /{path}"))
            };

            tracing::debug!(
                target: TRACING_TARGET_DISCOVERY,
                path,
                status = status.as_u16(),
                "Probe answered"
            );

            return health
                .with_endpoint(endpoint.as_str())
                .with_response_time(started.elapsed());
        }

        ServiceHealth::unhealthy("no readiness path answered")
            .with_endpoint(endpoint.as_str())
            .with_response_time(started.elapsed())
    }
}
