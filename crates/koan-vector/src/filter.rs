//! Provider-neutral filter expressions.
//!
//! Adapters translate [`FilterExpr`] into their native filter syntax and must
//! reject nodes they cannot represent instead of dropping them.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, IntoStaticStr};

use crate::error::VectorError;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Returns the logical complement (`Gt` ⇔ `Lte`, ...).
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Lte,
            Self::Gte => Self::Lt,
            Self::Lt => Self::Gte,
            Self::Lte => Self::Gt,
        }
    }

    /// Returns `true` for ordering comparisons.
    pub fn is_range(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

/// Scalar operand of a filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

impl FilterValue {
    /// Returns the variant name, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl TryFrom<serde_json::Value> for FilterValue {
    type Error = VectorError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Self::Int(i)),
                None => n
                    .as_f64()
                    .map(Self::Number)
                    .ok_or_else(|| VectorError::unsupported_filter(format!("number {n}"))),
            },
            serde_json::Value::String(s) => Ok(Self::Text(s)),
            other => Err(VectorError::unsupported_filter(format!(
                "non-scalar filter value {other}"
            ))),
        }
    }
}

/// Filter expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpr {
    /// `field <op> value`.
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    /// `field` equals any of `values`.
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    /// Wildcard text match (`*` and `?`).
    Like { field: String, pattern: String },
    /// `field` is present and not null.
    Exists { field: String },
    And { all: Vec<FilterExpr> },
    Or { any: Vec<FilterExpr> },
    Not { expr: Box<FilterExpr> },
}

impl FilterExpr {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    /// Creates a comparison node.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<FilterValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Creates a membership node.
    pub fn is_in<V: Into<FilterValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a wildcard match node.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Creates an existence check.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    /// Conjunction of `all`.
    pub fn and(all: impl IntoIterator<Item = FilterExpr>) -> Self {
        Self::And {
            all: all.into_iter().collect(),
        }
    }

    /// Disjunction of `any`.
    pub fn or(any: impl IntoIterator<Item = FilterExpr>) -> Self {
        Self::Or {
            any: any.into_iter().collect(),
        }
    }

    /// Negation of `expr`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: FilterExpr) -> Self {
        Self::Not {
            expr: Box::new(expr),
        }
    }
}
