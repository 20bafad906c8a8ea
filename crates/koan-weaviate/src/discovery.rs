//! Endpoint discovery.
//!
//! Candidates come from an explicit override, environment variables, the
//! orchestrator's service binding, the container network and loopback, in
//! that priority. They are deduplicated by URL (keeping the best priority),
//! probed in order, and the first live one wins. The candidate list is cached
//! and rebuilt whenever the [`DiscoveryContext`] it was built from changes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use koan_vector::{ServiceHealth, VectorContext, VectorResult};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, IntoStaticStr};
use url::Url;

use crate::TRACING_TARGET_DISCOVERY;
use crate::config::DEFAULT_ENDPOINT;
use crate::health::{DEFAULT_PROBE_TIMEOUT, HealthProbe};

/// Environment variables holding an endpoint, in order of preference.
pub const ENDPOINT_ENV_VARS: &[&str] = &["WEAVIATE_URL", "KOAN_DATA_WEAVIATE_ENDPOINT"];

/// Service binding injected by the orchestrator.
pub const ORCHESTRATION_ENV_VAR: &str = "services__weaviate__http__0";

/// Endpoint of the engine on a container network.
pub const DEFAULT_CONTAINER_ENDPOINT: &str = "http://weaviate:8080";

/// Where a candidate came from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    IntoStaticStr
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CandidateSource {
    Explicit,
    Environment,
    Orchestration,
    Container,
    Loopback,
}

impl CandidateSource {
    /// Returns the priority of this source; lower is tried first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Explicit => 0,
            Self::Environment => 1,
            Self::Orchestration => 2,
            Self::Container => 3,
            Self::Loopback => 4,
        }
    }
}

/// A possible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCandidate {
    pub url: Url,
    pub source: CandidateSource,
    pub priority: u8,
}

impl DiscoveryCandidate {
    /// Creates a candidate with its source's priority.
    pub fn new(url: Url, source: CandidateSource) -> Self {
        Self {
            url,
            source,
            priority: source.priority(),
        }
    }

    /// URL form used for deduplication.
    fn dedup_key(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_ascii_lowercase()
    }
}

/// Facts about the process environment that shape the candidate list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryContext {
    /// Values of [`ENDPOINT_ENV_VARS`] that were set.
    pub env_endpoints: Vec<String>,
    /// Value of [`ORCHESTRATION_ENV_VAR`].
    pub orchestration_endpoint: Option<String>,
    /// Whether the process runs inside a container.
    pub in_container: bool,
}

impl DiscoveryContext {
    /// Reads the context from the process environment.
    pub fn from_env() -> Self {
        let env_endpoints = ENDPOINT_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .filter(|value| !value.trim().is_empty())
            .collect();
        let orchestration_endpoint = std::env::var(ORCHESTRATION_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty());
        let in_container = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
            || std::env::var("KOAN_IN_CONTAINER").is_ok_and(|v| v == "1" || v == "true")
            || std::path::Path::new("/.dockerenv").exists();

        Self {
            env_endpoints,
            orchestration_endpoint,
            in_container,
        }
    }

    /// Adds an environment-provided endpoint.
    pub fn with_env_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.env_endpoints.push(endpoint.into());
        self
    }

    /// Sets the orchestrator's endpoint.
    pub fn with_orchestration_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.orchestration_endpoint = Some(endpoint.into());
        self
    }

    /// Marks the process as running in a container.
    pub fn with_container(mut self, in_container: bool) -> Self {
        self.in_container = in_container;
        self
    }
}

/// Static discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Endpoint that overrides every other source.
    pub explicit: Option<Url>,
    pub container_endpoint: Url,
    pub loopback_endpoint: Url,
    pub probe_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            explicit: None,
            container_endpoint: parse_builtin(DEFAULT_CONTAINER_ENDPOINT),
            loopback_endpoint: parse_builtin(DEFAULT_ENDPOINT),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl DiscoverySettings {
    /// Sets the explicit override.
    pub fn with_explicit(mut self, endpoint: Url) -> Self {
        self.explicit = Some(endpoint);
        self
    }
}

#[allow(clippy::expect_used)]
fn parse_builtin(endpoint: &str) -> Url {
    Url::parse(endpoint).expect("built-in endpoint is a valid URL")
}

/// Builds the sorted, deduplicated candidate list.
pub fn build_candidates(
    settings: &DiscoverySettings,
    context: &DiscoveryContext,
) -> Vec<DiscoveryCandidate> {
    let mut raw = Vec::new();

    if let Some(explicit) = &settings.explicit {
        raw.push(DiscoveryCandidate::new(explicit.clone(), CandidateSource::Explicit));
    }
    for endpoint in &context.env_endpoints {
        push_parsed(&mut raw, endpoint, CandidateSource::Environment);
    }
    if let Some(endpoint) = &context.orchestration_endpoint {
        push_parsed(&mut raw, endpoint, CandidateSource::Orchestration);
    }
    if context.in_container {
        raw.push(DiscoveryCandidate::new(
            settings.container_endpoint.clone(),
            CandidateSource::Container,
        ));
    }
    raw.push(DiscoveryCandidate::new(
        settings.loopback_endpoint.clone(),
        CandidateSource::Loopback,
    ));

    // Stable sort keeps declaration order within one priority, so the first
    // occurrence of a URL is also its best-priority occurrence.
    raw.sort_by_key(|candidate| candidate.priority);
    let mut seen = std::collections::HashSet::new();
    raw.retain(|candidate| seen.insert(candidate.dedup_key()));
    raw
}

fn push_parsed(out: &mut Vec<DiscoveryCandidate>, endpoint: &str, source: CandidateSource) {
    match Url::parse(endpoint.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            out.push(DiscoveryCandidate::new(url, source));
        }
        Ok(_) | Err(_) => {
            tracing::warn!(
                target: TRACING_TARGET_DISCOVERY,
                source = %source,
                endpoint,
                "Ignoring unusable endpoint"
            );
        }
    }
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    /// The first live candidate, if any.
    pub selected: Option<DiscoveryCandidate>,
    /// Every probe made, in order.
    pub probes: Vec<(DiscoveryCandidate, ServiceHealth)>,
}

/// Resolves the engine endpoint and reports its liveness.
pub struct EndpointDiscovery {
    settings: DiscoverySettings,
    probe: Arc<dyn HealthProbe>,
    cache: Mutex<Option<(DiscoveryContext, Vec<DiscoveryCandidate>)>>,
}

impl std::fmt::Debug for EndpointDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointDiscovery")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EndpointDiscovery {
    /// Creates a discovery service using `probe` for liveness checks.
    pub fn new(settings: DiscoverySettings, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            settings,
            probe,
            cache: Mutex::new(None),
        }
    }

    /// Returns the settings.
    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Returns the candidates for `context`, rebuilding them if it changed.
    pub fn candidates(&self, context: &DiscoveryContext) -> Vec<DiscoveryCandidate> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached, candidates)) = cache.as_ref()
            && cached == context
        {
            return candidates.clone();
        }

        let candidates = build_candidates(&self.settings, context);
        tracing::debug!(
            target: TRACING_TARGET_DISCOVERY,
            count = candidates.len(),
            "Rebuilt discovery candidates"
        );
        *cache = Some((context.clone(), candidates.clone()));
        candidates
    }

    /// Probes candidates in priority order and selects the first live one.
    pub async fn discover(
        &self,
        ctx: &VectorContext,
        context: &DiscoveryContext,
    ) -> VectorResult<DiscoveryReport> {
        let mut probes = Vec::new();

        for candidate in self.candidates(context) {
            let health = ctx.run("discover", self.probe.probe(&candidate.url)).await?;
            let live = health.is_live();

            tracing::debug!(
                target: TRACING_TARGET_DISCOVERY,
                url = %candidate.url,
                source = %candidate.source,
                status = ?health.status,
                "Probed candidate"
            );

            probes.push((candidate.clone(), health));
            if live {
                tracing::info!(
                    target: TRACING_TARGET_DISCOVERY,
                    url = %candidate.url,
                    source = %candidate.source,
                    "Selected endpoint"
                );
                return Ok(DiscoveryReport {
                    selected: Some(candidate),
                    probes,
                });
            }
        }

        tracing::warn!(
            target: TRACING_TARGET_DISCOVERY,
            probed = probes.len(),
            "No live endpoint found"
        );
        Ok(DiscoveryReport {
            selected: None,
            probes,
        })
    }

    /// Probes one endpoint; the periodic liveness signal.
    pub async fn check(&self, ctx: &VectorContext, endpoint: &Url) -> VectorResult<ServiceHealth> {
        ctx.run("health_check", self.probe.probe(endpoint)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHealthProbe;

    fn urls(candidates: &[DiscoveryCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.url.as_str()).collect()
    }

    #[test]
    fn candidates_follow_source_priority() {
        let settings =
            DiscoverySettings::default().with_explicit(Url::parse("http://explicit:8080").unwrap());
        let context = DiscoveryContext::default()
            .with_orchestration_endpoint("http://orchestrated:8080")
            .with_env_endpoint("http://env:8080")
            .with_container(true);

        let candidates = build_candidates(&settings, &context);
        assert_eq!(
            urls(&candidates),
            [
                "http://explicit:8080/",
                "http://env:8080/",
                "http://orchestrated:8080/",
                "http://weaviate:8080/",
                "http://localhost:8080/",
            ]
        );
        assert!(candidates.windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[test]
    fn duplicates_keep_the_best_priority() {
        let context = DiscoveryContext::default()
            .with_orchestration_endpoint("http://localhost:8080")
            .with_env_endpoint("http://LOCALHOST:8080/");

        let candidates = build_candidates(&DiscoverySettings::default(), &context);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, CandidateSource::Environment);
    }

    #[test]
    fn container_endpoint_only_inside_containers() {
        let candidates = build_candidates(&DiscoverySettings::default(), &DiscoveryContext::default());
        assert_eq!(urls(&candidates), ["http://localhost:8080/"]);
    }

    #[test]
    fn unusable_endpoints_are_skipped() {
        let context = DiscoveryContext::default()
            .with_env_endpoint("not a url")
            .with_env_endpoint("ftp://weaviate");
        let candidates = build_candidates(&DiscoverySettings::default(), &context);
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn first_live_candidate_wins() {
        let probe = Arc::new(MockHealthProbe::new().with_live("http://weaviate:8080"));
        let discovery = EndpointDiscovery::new(DiscoverySettings::default(), probe.clone());
        let context = DiscoveryContext::default()
            .with_env_endpoint("http://down:8080")
            .with_container(true);

        let report = discovery.discover(&VectorContext::new(), &context).await.unwrap();
        let selected = report.selected.unwrap();
        assert_eq!(selected.source, CandidateSource::Container);
        assert_eq!(report.probes.len(), 2);
        assert_eq!(probe.probed(), ["http://down:8080", "http://weaviate:8080"]);
    }

    #[tokio::test]
    async fn no_live_candidate_selects_nothing() {
        let discovery = EndpointDiscovery::new(
            DiscoverySettings::default(),
            Arc::new(MockHealthProbe::new()),
        );
        let report = discovery
            .discover(&VectorContext::new(), &DiscoveryContext::default())
            .await
            .unwrap();
        assert!(report.selected.is_none());
        assert_eq!(report.probes.len(), 1);
    }

    #[test]
    fn candidates_are_rebuilt_when_context_changes() {
        let discovery = EndpointDiscovery::new(
            DiscoverySettings::default(),
            Arc::new(MockHealthProbe::new()),
        );
        let plain = DiscoveryContext::default();
        assert_eq!(discovery.candidates(&plain).len(), 1);
        assert_eq!(discovery.candidates(&plain).len(), 1);

        let containerized = plain.clone().with_container(true);
        assert_eq!(discovery.candidates(&containerized).len(), 2);
    }
}
