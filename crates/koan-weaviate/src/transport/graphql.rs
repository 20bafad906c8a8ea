//! GraphQL query rendering and response parsing.

use std::fmt::Write as _;

use koan_vector::Metadata;
use serde_json::Value;
use uuid::Uuid;

use super::{GraphQuery, QueryHit, QueryMode};
use crate::error::{RemoteError, RemoteResult};

/// Renders a structured query as a GraphQL `Get` document.
pub fn render_get(query: &GraphQuery) -> String {
    let mut args = Vec::with_capacity(4);

    match &query.mode {
        QueryMode::NearVector { vector } => {
            args.push(format!("nearVector: {{vector: {}}}", vector_literal(vector)));
        }
        QueryMode::Hybrid {
            query: text,
            alpha,
            vector,
            properties,
        } => {
            args.push(format!(
                "hybrid: {{query: {}, alpha: {alpha:?}, vector: {}, properties: {}, fusionType: relativeScoreFusion}}",
                string_literal(text),
                vector_literal(vector),
                list_literal(properties),
            ));
        }
        QueryMode::Scan { after, offset } => {
            if let Some(after) = after {
                args.push(format!("after: \"{}\"", after.hyphenated()));
            }
            if let Some(offset) = offset {
                args.push(format!("offset: {offset}"));
            }
        }
    }

    args.push(format!("limit: {}", query.limit));
    if let Some(filter) = &query.filter {
        args.push(format!("where: {filter}"));
    }

    let mut additional = vec!["id"];
    match query.mode {
        QueryMode::NearVector { .. } => additional.push("distance"),
        QueryMode::Hybrid { .. } => additional.push("score"),
        QueryMode::Scan { .. } => {}
    }
    if query.include_vector {
        additional.push("vector");
    }

    let mut selection = String::new();
    for property in &query.properties {
        let _ = write!(selection, "{property} ");
    }

    format!(
        "{{ Get {{ {}({}) {{ {selection}_additional {{ {} }} }} }} }}",
        query.class,
        args.join(", "),
        additional.join(" "),
    )
}

/// Renders an `Aggregate` count document.
pub fn render_count(class: &str) -> String {
    format!("{{ Aggregate {{ {class} {{ meta {{ count }} }} }} }}")
}

/// Parses the hits of a `Get` response.
pub fn parse_get(class: &str, body: &Value) -> RemoteResult<Vec<QueryHit>> {
    check_errors(body)?;

    let items = match body
        .get("data")
        .and_then(|data| data.get("Get"))
        .and_then(|get| get.get(class))
    {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(RemoteError::decode(format!(
                "expected a list of '{class}' objects, got {other}"
            )));
        }
    };

    items.iter().map(parse_hit).collect()
}

/// Parses the object count of an `Aggregate` response.
pub fn parse_count(class: &str, body: &Value) -> RemoteResult<u64> {
    check_errors(body)?;

    let groups = body
        .get("data")
        .and_then(|data| data.get("Aggregate"))
        .and_then(|aggregate| aggregate.get(class));

    match groups {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Array(groups)) => Ok(groups
            .first()
            .and_then(|group| group.pointer("/meta/count"))
            .and_then(Value::as_u64)
            .unwrap_or(0)),
        Some(other) => Err(RemoteError::decode(format!(
            "expected aggregate groups for '{class}', got {other}"
        ))),
    }
}

fn check_errors(body: &Value) -> RemoteResult<()> {
    let Some(Value::Array(errors)) = body.get("errors") else {
        return Ok(());
    };
    if errors.is_empty() {
        return Ok(());
    }

    let messages: Vec<String> = errors
        .iter()
        .map(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned)
        })
        .collect();
    Err(RemoteError::graphql(messages.join("; ")))
}

fn parse_hit(item: &Value) -> RemoteResult<QueryHit> {
    let Value::Object(object) = item else {
        return Err(RemoteError::decode(format!("expected an object, got {item}")));
    };

    let mut properties = Metadata::new();
    let mut hit = QueryHit::default();

    for (name, value) in object {
        if name != "_additional" {
            properties.insert(name.clone(), value.clone());
            continue;
        }

        if let Some(id) = value.get("id").and_then(Value::as_str) {
            let id = Uuid::parse_str(id)
                .map_err(|e| RemoteError::decode(format!("invalid object id '{id}': {e}")))?;
            hit.id = Some(id);
        }
        hit.distance = value.get("distance").and_then(number);
        hit.score = value.get("score").and_then(number);
        if let Some(Value::Array(components)) = value.get("vector") {
            let vector = components
                .iter()
                .map(|c| number(c).ok_or_else(|| RemoteError::decode("non-numeric vector component")))
                .collect::<RemoteResult<Vec<_>>>()?;
            hit.vector = Some(vector);
        }
    }

    hit.properties = properties;
    Ok(hit)
}

/// Reads a score or distance; the engine reports fused scores as strings.
#[allow(clippy::cast_possible_truncation)]
fn number(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|n| n as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_literal(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

fn list_literal(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| string_literal(s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 8 + 2);
    out.push('[');
    for (i, component) in vector.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{component:?}");
    }
    out.push(']');
    out
}
