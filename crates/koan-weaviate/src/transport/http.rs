//! REST + GraphQL transport over `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use koan_vector::{VectorError, VectorResult};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use super::graphql::{parse_count, parse_get, render_count, render_get};
use super::{
    ClassDefinition, GraphQuery, ObjectPayload, QueryHit, SchemaRoute, StoredObject,
    WeaviateTransport,
};
use crate::TRACING_TARGET_TRANSPORT;
use crate::config::WeaviateConfig;
use crate::error::{RemoteError, RemoteResult};

struct HttpTransportInner {
    http: Client,
    endpoint: Url,
    api_key: Option<String>,
}

/// Transport speaking the engine's HTTP interface.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<HttpTransportInner>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("authenticated", &self.inner.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport for the configured endpoint.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_TRANSPORT, fields(endpoint = %config.endpoint))]
    pub fn new(config: &WeaviateConfig) -> VectorResult<Self> {
        config.validate()?;

        let timeout = config.effective_timeout();
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("koan-weaviate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VectorError::configuration(format!("failed to build HTTP client: {e}")))?;

        let mut endpoint = config.endpoint.clone();
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        tracing::debug!(
            target: TRACING_TARGET_TRANSPORT,
            timeout_ms = timeout.as_millis(),
            "Created HTTP transport"
        );

        Ok(Self {
            inner: Arc::new(HttpTransportInner {
                http,
                endpoint,
                api_key: config.api_key.clone(),
            }),
        })
    }

    /// Returns the endpoint requests are resolved against.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    fn request(&self, method: Method, path: &str) -> RemoteResult<RequestBuilder> {
        let url = self
            .inner
            .endpoint
            .join(path)
            .map_err(|e| RemoteError::transport(format!("invalid request path '{path}': {e}")))?;

        let mut builder = self.inner.http.request(method, url);
        if let Some(api_key) = &self.inner.api_key {
            builder = builder.bearer_auth(api_key);
        }
        Ok(builder)
    }

    /// Sends a request, turning non-success statuses into [`RemoteError::Status`].
    async fn send(&self, builder: RequestBuilder) -> RemoteResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        });

        tracing::debug!(
            target: TRACING_TARGET_TRANSPORT,
            status = status.as_u16(),
            message = %message,
            "Request rejected"
        );

        Err(RemoteError::status(status.as_u16(), message))
    }

    /// Like [`send`](Self::send) but maps 404 to `None`.
    async fn send_optional(&self, builder: RequestBuilder) -> RemoteResult<Option<Response>> {
        match self.send(builder).await {
            Ok(response) => Ok(Some(response)),
            Err(err) if err.status_code() == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn graphql(&self, query: String) -> RemoteResult<Value> {
        tracing::trace!(target: TRACING_TARGET_TRANSPORT, %query, "GraphQL request");
        let builder = self
            .request(Method::POST, "v1/graphql")?
            .json(&json!({ "query": query }));
        let response = self.send(builder).await?;
        Ok(response.json().await?)
    }
}

/// Extracts `error[].message` from an engine error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let messages: Vec<&str> = value
        .get("error")?
        .as_array()?
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();
    if messages.is_empty() {
        let trimmed = body.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_owned());
    }
    Some(messages.join("; "))
}

#[async_trait]
impl WeaviateTransport for HttpTransport {
    async fn class_exists(&self, class: &str) -> RemoteResult<bool> {
        let builder = self.request(Method::GET, &format!("v1/schema/{class}"))?;
        Ok(self.send_optional(builder).await?.is_some())
    }

    async fn create_class(
        &self,
        definition: &ClassDefinition,
        route: SchemaRoute,
    ) -> RemoteResult<()> {
        let builder = self.request(Method::POST, route.path())?.json(definition);
        self.send(builder).await?;
        Ok(())
    }

    async fn delete_class(&self, class: &str) -> RemoteResult<bool> {
        let builder = self.request(Method::DELETE, &format!("v1/schema/{class}"))?;
        Ok(self.send_optional(builder).await?.is_some())
    }

    async fn class_properties(&self, class: &str) -> RemoteResult<Vec<String>> {
        let builder = self.request(Method::GET, &format!("v1/schema/{class}"))?;
        let Some(response) = self.send_optional(builder).await? else {
            return Ok(Vec::new());
        };

        let definition: Value = response.json().await?;
        let names = definition
            .get("properties")
            .and_then(Value::as_array)
            .map(|properties| {
                properties
                    .iter()
                    .filter_map(|p| p.get("name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn create_object(&self, object: &ObjectPayload) -> RemoteResult<()> {
        let builder = self.request(Method::POST, "v1/objects")?.json(object);
        self.send(builder).await?;
        Ok(())
    }

    async fn update_object(&self, object: &ObjectPayload) -> RemoteResult<()> {
        let path = format!("v1/objects/{}/{}", object.class, object.id.hyphenated());
        let builder = self.request(Method::PUT, &path)?.json(object);
        self.send(builder).await?;
        Ok(())
    }

    async fn get_object(&self, class: &str, id: Uuid) -> RemoteResult<Option<StoredObject>> {
        let path = format!("v1/objects/{class}/{}?include=vector", id.hyphenated());
        let builder = self.request(Method::GET, &path)?;
        match self.send_optional(builder).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    async fn delete_object(&self, class: &str, id: Uuid) -> RemoteResult<bool> {
        let path = format!("v1/objects/{class}/{}", id.hyphenated());
        let builder = self.request(Method::DELETE, &path)?;
        Ok(self.send_optional(builder).await?.is_some())
    }

    async fn query(&self, query: &GraphQuery) -> RemoteResult<Vec<QueryHit>> {
        let body = self.graphql(render_get(query)).await?;
        parse_get(&query.class, &body)
    }

    async fn count(&self, class: &str) -> RemoteResult<u64> {
        let body = self.graphql(render_count(class)).await?;
        parse_count(class, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gains_trailing_slash() {
        let config = WeaviateConfig::from_endpoint("http://weaviate:8080/base").unwrap();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint().as_str(), "http://weaviate:8080/base/");

        let url = transport.endpoint().join("v1/schema").unwrap();
        assert_eq!(url.as_str(), "http://weaviate:8080/base/v1/schema");
    }

    #[test]
    fn engine_error_bodies_are_unwrapped() {
        let body = r#"{"error":[{"message":"id already exists"},{"message":"second"}]}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("id already exists; second")
        );
        assert_eq!(error_message("not json"), None);
        assert_eq!(error_message(r#"{"error":[]}"#).as_deref(), Some(r#"{"error":[]}"#));
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let config = WeaviateConfig::default().with_api_key("secret");
        let transport = HttpTransport::new(&config).unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("authenticated: true"));
    }
}
