//! In-memory engine doubles for tests.
//!
//! [`MockWeaviate`] implements [`WeaviateTransport`] with the engine
//! behaviours the adapter depends on:
//!
//! - duplicate ids and classes are rejected
//! - a class fixes its vector length with its first object
//! - `where` filters are evaluated
//! - `nearVector` ranks by the class's distance metric
//! - hybrid queries use relative-score fusion
//! - `after` cursors page in id order
//!
//! Knobs inject the races and legacy behaviours real deployments show.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use koan_vector::{Metadata, ServiceHealth};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::{RemoteError, RemoteResult};
use crate::filter::{WhereFilter, WhereOperator, WhereValue};
use crate::health::HealthProbe;
use crate::transport::{
    ClassDefinition, GraphQuery, ObjectPayload, PropertyDataType, PropertySpec, QueryHit,
    QueryMode, SchemaRoute, StoredObject, WeaviateTransport,
};

/// Transport operations counted by [`MockWeaviate::calls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    ClassExists,
    CreateClass,
    DeleteClass,
    ClassProperties,
    CreateObject,
    UpdateObject,
    GetObject,
    DeleteObject,
    Query,
    Count,
}

#[derive(Debug)]
struct MockClass {
    definition: ClassDefinition,
    objects: BTreeMap<Uuid, StoredObject>,
    vector_len: Option<usize>,
    hidden_probes: usize,
}

impl MockClass {
    fn new(definition: ClassDefinition, hidden_probes: usize) -> Self {
        Self {
            definition,
            objects: BTreeMap::new(),
            vector_len: None,
            hidden_probes,
        }
    }

    /// Mirrors auto-schema: unknown properties are added on write.
    fn extend_properties(&mut self, properties: &Metadata) {
        let known: HashSet<String> = self
            .definition
            .properties
            .iter()
            .map(|p| p.name.clone())
            .collect();
        for (name, value) in properties {
            if known.contains(name) {
                continue;
            }
            let data_type = match value {
                Value::Bool(_) => PropertyDataType::Boolean,
                Value::Number(n) if n.is_i64() || n.is_u64() => PropertyDataType::Int,
                Value::Number(_) => PropertyDataType::Number,
                _ => PropertyDataType::Text,
            };
            self.definition.properties.push(PropertySpec {
                name: name.clone(),
                data_type: vec![data_type],
                tokenization: None,
                index_searchable: None,
                index_filterable: None,
            });
        }
    }

    fn check_vector(&mut self, vector: &[f32]) -> RemoteResult<()> {
        match self.vector_len {
            Some(len) if len != vector.len() => Err(RemoteError::status(
                422,
                format!(
                    "new node has a vector with length {}. Existing nodes have vectors with length {len}",
                    vector.len()
                ),
            )),
            _ => {
                self.vector_len = Some(vector.len());
                Ok(())
            }
        }
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self.definition.vector_index_config.distance.as_str() {
            "dot" => -dot,
            "l2-squared" => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            _ => {
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    classes: HashMap<String, MockClass>,
    calls: HashMap<MockOperation, usize>,
    schema_not_ready_creates: usize,
    create_object_failure: Option<RemoteError>,
    update_object_failure: Option<RemoteError>,
    query_failure: Option<RemoteError>,
    last_query: Option<GraphQuery>,
}

impl MockState {
    fn record(&mut self, operation: MockOperation) {
        *self.calls.entry(operation).or_default() += 1;
    }
}

/// In-memory Weaviate.
#[derive(Debug, Default)]
pub struct MockWeaviate {
    state: Mutex<MockState>,
    primary_route_disabled: bool,
    visibility_delay: usize,
}

impl MockWeaviate {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `POST /v1/schema` with 405, like engines that only know the legacy route.
    pub fn with_primary_schema_route_disabled(mut self) -> Self {
        self.primary_route_disabled = true;
        self
    }

    /// Hides newly created classes from the next `probes` existence checks.
    pub fn with_visibility_delay(mut self, probes: usize) -> Self {
        self.visibility_delay = probes;
        self
    }

    /// Fails the next `count` object creates as if the class had not propagated.
    pub fn with_schema_not_ready_creates(self, count: usize) -> Self {
        self.state().schema_not_ready_creates = count;
        self
    }

    /// Fails every object create with `error` until cleared.
    pub fn set_create_object_failure(&self, error: Option<RemoteError>) {
        self.state().create_object_failure = error;
    }

    /// Fails every object update with `error` until cleared.
    pub fn set_update_object_failure(&self, error: Option<RemoteError>) {
        self.state().update_object_failure = error;
    }

    /// Fails every query with `error` until cleared.
    pub fn set_query_failure(&self, error: Option<RemoteError>) {
        self.state().query_failure = error;
    }

    /// Registers a class directly, bypassing the transport.
    pub fn insert_class(&self, definition: ClassDefinition) {
        let name = definition.class.clone();
        self.state()
            .classes
            .insert(name, MockClass::new(definition, 0));
    }

    /// Returns `true` if the class exists.
    pub fn has_class(&self, class: &str) -> bool {
        self.state().classes.contains_key(class)
    }

    /// Returns the current definition of a class, including auto-added properties.
    pub fn class_definition(&self, class: &str) -> Option<ClassDefinition> {
        self.state()
            .classes
            .get(class)
            .map(|c| c.definition.clone())
    }

    /// Stores an object without the application key, as another writer would.
    ///
    /// Returns the generated id. Panics if the class does not exist.
    pub fn create_foreign_object(&self, class: &str, vector: Vec<f32>) -> Uuid {
        let mut state = self.state();
        let entry = state
            .classes
            .get_mut(class)
            .unwrap_or_else(|| panic!("class {class} does not exist"));
        let id = Uuid::from_u128(u128::MAX - entry.objects.len() as u128);
        entry.objects.insert(
            id,
            StoredObject {
                id,
                properties: Metadata::new(),
                vector: Some(vector),
            },
        );
        id
    }

    /// Returns a stored object.
    pub fn stored_object(&self, class: &str, id: Uuid) -> Option<StoredObject> {
        self.state()
            .classes
            .get(class)
            .and_then(|c| c.objects.get(&id).cloned())
    }

    /// Returns the number of objects in a class.
    pub fn object_count(&self, class: &str) -> usize {
        self.state()
            .classes
            .get(class)
            .map_or(0, |c| c.objects.len())
    }

    /// Returns the most recent query the engine received.
    pub fn last_query(&self) -> Option<GraphQuery> {
        self.state().last_query.clone()
    }

    /// Returns how often an operation was called.
    pub fn calls(&self, operation: MockOperation) -> usize {
        self.state().calls.get(&operation).copied().unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn class_missing(class: &str) -> RemoteError {
    RemoteError::status(422, format!("class '{class}' not found in schema"))
}

#[async_trait]
impl WeaviateTransport for MockWeaviate {
    async fn class_exists(&self, class: &str) -> RemoteResult<bool> {
        let mut state = self.state();
        state.record(MockOperation::ClassExists);
        match state.classes.get_mut(class) {
            Some(entry) if entry.hidden_probes > 0 => {
                entry.hidden_probes -= 1;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn create_class(
        &self,
        definition: &ClassDefinition,
        route: SchemaRoute,
    ) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(MockOperation::CreateClass);
        if route == SchemaRoute::Primary && self.primary_route_disabled {
            return Err(RemoteError::status(405, "method not allowed"));
        }
        if state.classes.contains_key(&definition.class) {
            return Err(RemoteError::status(
                422,
                format!("class name {:?} already exists", definition.class),
            ));
        }
        state.classes.insert(
            definition.class.clone(),
            MockClass::new(definition.clone(), self.visibility_delay),
        );
        Ok(())
    }

    async fn delete_class(&self, class: &str) -> RemoteResult<bool> {
        let mut state = self.state();
        state.record(MockOperation::DeleteClass);
        Ok(state.classes.remove(class).is_some())
    }

    async fn class_properties(&self, class: &str) -> RemoteResult<Vec<String>> {
        let mut state = self.state();
        state.record(MockOperation::ClassProperties);
        Ok(state
            .classes
            .get(class)
            .map(|c| c.definition.properties.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_object(&self, object: &ObjectPayload) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(MockOperation::CreateObject);
        if state.schema_not_ready_creates > 0 {
            state.schema_not_ready_creates -= 1;
            return Err(class_missing(&object.class));
        }
        if let Some(error) = &state.create_object_failure {
            return Err(error.clone());
        }

        let class = state
            .classes
            .get_mut(&object.class)
            .ok_or_else(|| class_missing(&object.class))?;
        if class.objects.contains_key(&object.id) {
            return Err(RemoteError::status(
                422,
                format!("id '{}' already exists", object.id),
            ));
        }
        class.check_vector(&object.vector)?;
        class.extend_properties(&object.properties);
        class.objects.insert(
            object.id,
            StoredObject {
                id: object.id,
                properties: object.properties.clone(),
                vector: Some(object.vector.clone()),
            },
        );
        Ok(())
    }

    async fn update_object(&self, object: &ObjectPayload) -> RemoteResult<()> {
        let mut state = self.state();
        state.record(MockOperation::UpdateObject);
        if let Some(error) = &state.update_object_failure {
            return Err(error.clone());
        }

        let class = state
            .classes
            .get_mut(&object.class)
            .ok_or_else(|| class_missing(&object.class))?;
        if !class.objects.contains_key(&object.id) {
            return Err(RemoteError::status(404, "object not found"));
        }
        class.check_vector(&object.vector)?;
        class.extend_properties(&object.properties);
        class.objects.insert(
            object.id,
            StoredObject {
                id: object.id,
                properties: object.properties.clone(),
                vector: Some(object.vector.clone()),
            },
        );
        Ok(())
    }

    async fn get_object(&self, class: &str, id: Uuid) -> RemoteResult<Option<StoredObject>> {
        let mut state = self.state();
        state.record(MockOperation::GetObject);
        Ok(state
            .classes
            .get(class)
            .and_then(|c| c.objects.get(&id).cloned()))
    }

    async fn delete_object(&self, class: &str, id: Uuid) -> RemoteResult<bool> {
        let mut state = self.state();
        state.record(MockOperation::DeleteObject);
        Ok(state
            .classes
            .get_mut(class)
            .is_some_and(|c| c.objects.remove(&id).is_some()))
    }

    async fn query(&self, query: &GraphQuery) -> RemoteResult<Vec<QueryHit>> {
        let mut state = self.state();
        state.record(MockOperation::Query);
        state.last_query = Some(query.clone());
        if let Some(error) = &state.query_failure {
            return Err(error.clone());
        }

        let class = state.classes.get(&query.class).ok_or_else(|| {
            RemoteError::graphql(format!(
                "Cannot query field \"{}\" on type \"GetObjectsObj\".",
                query.class
            ))
        })?;

        let candidates: Vec<&StoredObject> = class
            .objects
            .values()
            .filter(|o| {
                query
                    .filter
                    .as_ref()
                    .is_none_or(|f| matches_filter(f, &o.properties))
            })
            .collect();

        let ranked: Vec<(&StoredObject, Option<f32>, Option<f32>)> = match &query.mode {
            QueryMode::Scan { after, offset } => candidates
                .into_iter()
                .filter(|o| after.is_none_or(|after| o.id > after))
                .skip(offset.unwrap_or(0))
                .map(|o| (o, None, None))
                .collect(),
            QueryMode::NearVector { vector } => {
                let mut scored: Vec<_> = candidates
                    .into_iter()
                    .map(|o| (o, class.distance(vector, stored_vector(o))))
                    .collect();
                scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
                scored.into_iter().map(|(o, d)| (o, Some(d), None)).collect()
            }
            QueryMode::Hybrid {
                query: text,
                alpha,
                vector,
                properties,
            } => {
                let terms = tokens(text);
                let vector_scores: Vec<f32> = candidates
                    .iter()
                    .map(|o| -class.distance(vector, stored_vector(o)))
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let lexical_scores: Vec<f32> = candidates
                    .iter()
                    .map(|o| lexical_score(&terms, properties, &o.properties) as f32)
                    .collect();

                let vector_scores = normalize(&vector_scores);
                let lexical_scores = normalize(&lexical_scores);

                let mut scored: Vec<_> = candidates
                    .into_iter()
                    .enumerate()
                    .map(|(i, o)| {
                        (o, alpha * vector_scores[i] + (1.0 - alpha) * lexical_scores[i])
                    })
                    .collect();
                scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
                scored.into_iter().map(|(o, s)| (o, None, Some(s))).collect()
            }
        };

        Ok(ranked
            .into_iter()
            .take(query.limit)
            .map(|(object, distance, score)| QueryHit {
                id: Some(object.id),
                properties: query
                    .properties
                    .iter()
                    .map(|name| {
                        let value = object.properties.get(name).cloned().unwrap_or(Value::Null);
                        (name.clone(), value)
                    })
                    .collect(),
                distance,
                score,
                vector: query.include_vector.then(|| stored_vector(object).to_vec()),
            })
            .collect())
    }

    async fn count(&self, class: &str) -> RemoteResult<u64> {
        let mut state = self.state();
        state.record(MockOperation::Count);
        state
            .classes
            .get(class)
            .map(|c| c.objects.len() as u64)
            .ok_or_else(|| RemoteError::graphql(format!("class '{class}' not found")))
    }
}

fn stored_vector(object: &StoredObject) -> &[f32] {
    object.vector.as_deref().unwrap_or_default()
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn lexical_score(terms: &[String], properties: &[String], values: &Metadata) -> usize {
    let words: HashSet<String> = properties
        .iter()
        .filter_map(|p| values.get(p).and_then(Value::as_str))
        .flat_map(tokens)
        .collect();
    terms.iter().filter(|t| words.contains(*t)).count()
}

/// Min-max normalization to `0..=1`; a flat set maps to 1 if non-zero.
fn normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    scores
        .iter()
        .map(|s| {
            if range > f32::EPSILON {
                (s - min) / range
            } else if *s != 0.0 {
                1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn matches_filter(filter: &WhereFilter, properties: &Metadata) -> bool {
    match filter.operator {
        WhereOperator::And => filter.operands.iter().all(|f| matches_filter(f, properties)),
        WhereOperator::Or => filter.operands.iter().any(|f| matches_filter(f, properties)),
        _ => {
            let value = filter
                .property()
                .and_then(|p| properties.get(p))
                .filter(|v| !v.is_null());
            let Some(operand) = &filter.value else {
                return false;
            };
            matches_leaf(filter.operator, value, operand)
        }
    }
}

fn matches_leaf(operator: WhereOperator, value: Option<&Value>, operand: &WhereValue) -> bool {
    use std::cmp::Ordering;

    match operator {
        WhereOperator::IsNull => matches!(operand, WhereValue::Boolean(b) if *b == value.is_none()),
        WhereOperator::Equal => value.is_some_and(|v| compare(v, operand) == Some(Ordering::Equal)),
        WhereOperator::NotEqual => {
            value.is_none_or(|v| compare(v, operand) != Some(Ordering::Equal))
        }
        WhereOperator::GreaterThan => {
            value.is_some_and(|v| compare(v, operand) == Some(Ordering::Greater))
        }
        WhereOperator::GreaterThanEqual => value.is_some_and(|v| {
            matches!(compare(v, operand), Some(Ordering::Greater | Ordering::Equal))
        }),
        WhereOperator::LessThan => {
            value.is_some_and(|v| compare(v, operand) == Some(Ordering::Less))
        }
        WhereOperator::LessThanEqual => value.is_some_and(|v| {
            matches!(compare(v, operand), Some(Ordering::Less | Ordering::Equal))
        }),
        WhereOperator::Like => match (value.and_then(Value::as_str), operand) {
            (Some(text), WhereValue::Text(pattern)) => wildcard(pattern, text),
            _ => false,
        },
        WhereOperator::ContainsAny => value.is_some_and(|v| {
            let scalars: Vec<WhereValue> = match operand {
                WhereValue::TextArray(items) => items.iter().cloned().map(WhereValue::Text).collect(),
                WhereValue::IntArray(items) => items.iter().copied().map(WhereValue::Int).collect(),
                WhereValue::NumberArray(items) => {
                    items.iter().copied().map(WhereValue::Number).collect()
                }
                WhereValue::BooleanArray(items) => {
                    items.iter().copied().map(WhereValue::Boolean).collect()
                }
                scalar => vec![scalar.clone()],
            };
            let values: Vec<&Value> = match v {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            values.iter().any(|v| {
                scalars
                    .iter()
                    .any(|s| compare(v, s) == Some(Ordering::Equal))
            })
        }),
        WhereOperator::And | WhereOperator::Or => false,
    }
}

fn compare(value: &Value, operand: &WhereValue) -> Option<std::cmp::Ordering> {
    match (value, operand) {
        (Value::String(s), WhereValue::Text(t)) => Some(s.as_str().cmp(t.as_str())),
        (Value::Bool(b), WhereValue::Boolean(o)) => Some(b.cmp(o)),
        #[allow(clippy::cast_precision_loss)]
        (Value::Number(n), WhereValue::Int(i)) => n.as_f64()?.partial_cmp(&(*i as f64)),
        (Value::Number(n), WhereValue::Number(o)) => n.as_f64()?.partial_cmp(o),
        _ => None,
    }
}

/// Glob match with `*` (any run) and `?` (one character).
fn wildcard(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Health probe answering from a fixed table; unknown endpoints are unhealthy.
#[derive(Debug, Default)]
pub struct MockHealthProbe {
    table: HashMap<String, ServiceHealth>,
    probed: Mutex<Vec<String>>,
}

impl MockHealthProbe {
    /// Creates a probe that considers every endpoint unhealthy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `endpoint` as healthy.
    pub fn with_live(self, endpoint: &str) -> Self {
        self.with_health(endpoint, ServiceHealth::healthy())
    }

    /// Reports `health` for `endpoint`.
    pub fn with_health(mut self, endpoint: &str, health: ServiceHealth) -> Self {
        self.table.insert(normalize_key(endpoint), health);
        self
    }

    /// Returns every endpoint probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn normalize_key(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_owned()
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn probe(&self, endpoint: &Url) -> ServiceHealth {
        let key = normalize_key(endpoint.as_str());
        self.probed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());
        self.table
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ServiceHealth::unhealthy("connection refused"))
            .with_endpoint(key)
    }
}
