//! Pure-vector and hybrid retrieval.

use koan_vector::{SearchQuery, SearchResult, VectorContext, VectorError, VectorResult};

use super::{WeaviateAdapter, hit_key, user_metadata};
use crate::TRACING_TARGET_ADAPTER;
use crate::filter::translate;
use crate::schema::{KEY_PROPERTY, SEARCH_TEXT_PROPERTY, SchemaManager};
use crate::transport::{GraphQuery, QueryMode};

const OPERATION: &str = "search";

impl WeaviateAdapter {
    pub(super) async fn run_search(
        &self,
        ctx: &VectorContext,
        query: &SearchQuery,
    ) -> VectorResult<Vec<SearchResult>> {
        if let Some(alpha) = query.alpha
            && !(0.0..=1.0).contains(&alpha)
        {
            return Err(VectorError::invalid_input(format!(
                "alpha must be within 0..=1, got {alpha}"
            )));
        }
        if query.top_k == Some(0) {
            return Err(VectorError::invalid_input("top_k must be positive"));
        }
        SchemaManager::check_components(&query.vector)?;
        let filter = translate(query.filter.as_ref())?;
        self.schema.observe_query_dimension(query.vector.len())?;
        self.schema.ensure(ctx).await?;

        let properties = if query.include_metadata {
            self.selected_properties(ctx, OPERATION)
                .await?
                .map_err(|e| VectorError::search_failed(&self.collection, e.to_string()))?
        } else {
            vec![KEY_PROPERTY.to_owned()]
        };

        let hybrid = query.is_hybrid();
        let mode = match &query.text {
            Some(text) if hybrid => QueryMode::Hybrid {
                query: text.trim().to_owned(),
                alpha: query.effective_alpha(),
                vector: query.vector.clone(),
                properties: vec![SEARCH_TEXT_PROPERTY.to_owned()],
            },
            _ => QueryMode::NearVector {
                vector: query.vector.clone(),
            },
        };

        let request = GraphQuery {
            class: self.collection.clone(),
            mode,
            filter,
            limit: self.config.clamp_top_k(query.top_k),
            properties,
            include_vector: false,
        };

        let hits = ctx
            .run(OPERATION, self.transport.query(&request))
            .await?
            .map_err(|e| VectorError::search_failed(&self.collection, e.to_string()))?;

        let returned = hits.len();
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|hit| {
                let Some(key) = hit_key(&hit) else {
                    tracing::debug!(
                        target: TRACING_TARGET_ADAPTER,
                        collection = %self.collection,
                        id = ?hit.id,
                        "Dropping hit without an application key"
                    );
                    return None;
                };

                // Hybrid hits carry a fused score; vector hits a distance.
                let score = if hybrid {
                    hit.score.unwrap_or(0.0)
                } else {
                    hit.distance.map_or(0.0, |distance| 1.0 - distance)
                };
                let metadata = query
                    .include_metadata
                    .then(|| user_metadata(&hit.properties));

                Some(SearchResult {
                    key,
                    score,
                    metadata,
                })
            })
            .collect();

        tracing::debug!(
            target: TRACING_TARGET_ADAPTER,
            collection = %self.collection,
            hybrid,
            returned,
            kept = results.len(),
            "Search completed"
        );
        Ok(results)
    }
}
