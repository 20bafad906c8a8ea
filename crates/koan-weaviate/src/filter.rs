//! Translation of [`FilterExpr`] trees into Weaviate `where` filters.
//!
//! Weaviate has no negation operator, so `Not` nodes are pushed down to the
//! leaves while translating. Comparisons flip their operator, and a flipped
//! range comparison also admits objects where the property is null, so that
//! `Not` keeps the same objects whichever operator it wraps. `And`/`Or` swap
//! under De Morgan, membership becomes a conjunction of `NotEqual`, and
//! existence becomes `IsNull: true`.

use std::fmt;

use koan_vector::{CompareOp, FilterExpr, FilterValue, VectorError, VectorResult};
use strum::{AsRefStr, IntoStaticStr};

use crate::naming::property_name;

/// Operators of the Weaviate `where` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
pub enum WhereOperator {
    And,
    Or,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    IsNull,
    ContainsAny,
}

impl From<CompareOp> for WhereOperator {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq => Self::Equal,
            CompareOp::Ne => Self::NotEqual,
            CompareOp::Gt => Self::GreaterThan,
            CompareOp::Gte => Self::GreaterThanEqual,
            CompareOp::Lt => Self::LessThan,
            CompareOp::Lte => Self::LessThanEqual,
        }
    }
}

/// Typed operand of a leaf filter.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereValue {
    Text(String),
    Int(i64),
    Number(f64),
    Boolean(bool),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    NumberArray(Vec<f64>),
    BooleanArray(Vec<bool>),
}

impl WhereValue {
    /// Returns the GraphQL argument name carrying this value.
    pub fn argument(&self) -> &'static str {
        match self {
            Self::Text(_) | Self::TextArray(_) => "valueText",
            Self::Int(_) | Self::IntArray(_) => "valueInt",
            Self::Number(_) | Self::NumberArray(_) => "valueNumber",
            Self::Boolean(_) | Self::BooleanArray(_) => "valueBoolean",
        }
    }
}

impl From<FilterValue> for WhereValue {
    fn from(value: FilterValue) -> Self {
        match value {
            FilterValue::Bool(b) => Self::Boolean(b),
            FilterValue::Int(i) => Self::Int(i),
            FilterValue::Number(n) => Self::Number(n),
            FilterValue::Text(s) => Self::Text(s),
        }
    }
}

/// A node of the Weaviate `where` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereFilter {
    pub operator: WhereOperator,
    pub path: Vec<String>,
    pub value: Option<WhereValue>,
    pub operands: Vec<WhereFilter>,
}

impl WhereFilter {
    /// Creates a leaf node on a single property.
    pub fn leaf(operator: WhereOperator, property: impl Into<String>, value: WhereValue) -> Self {
        Self {
            operator,
            path: vec![property.into()],
            value: Some(value),
            operands: Vec::new(),
        }
    }

    /// Creates an `And`/`Or` node. A single operand is returned unwrapped.
    pub fn group(operator: WhereOperator, mut operands: Vec<WhereFilter>) -> Self {
        if operands.len() == 1 {
            return operands.remove(0);
        }
        Self {
            operator,
            path: Vec::new(),
            value: None,
            operands,
        }
    }

    /// Returns the property a leaf node tests.
    pub fn property(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }
}

/// Renders the node as a GraphQL input object.
impl fmt::Display for WhereFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{operator: {}", self.operator.as_ref())?;

        if !self.path.is_empty() {
            f.write_str(", path: [")?;
            for (i, segment) in self.path.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_string(f, segment)?;
            }
            f.write_str("]")?;
        }

        if let Some(value) = &self.value {
            write!(f, ", {}: ", value.argument())?;
            write_value(f, value)?;
        }

        if !self.operands.is_empty() {
            f.write_str(", operands: [")?;
            for (i, operand) in self.operands.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{operand}")?;
            }
            f.write_str("]")?;
        }

        f.write_str("}")
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    // JSON string escaping is a subset of what GraphQL string literals accept.
    let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
    f.write_str(&quoted)
}

fn write_list<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    mut write_item: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_item(f, item)?;
    }
    f.write_str("]")
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &WhereValue) -> fmt::Result {
    match value {
        WhereValue::Text(s) => write_string(f, s),
        WhereValue::Int(i) => write!(f, "{i}"),
        WhereValue::Number(n) => write!(f, "{n:?}"),
        WhereValue::Boolean(b) => write!(f, "{b}"),
        WhereValue::TextArray(items) => write_list(f, items, |f, s| write_string(f, s)),
        WhereValue::IntArray(items) => write_list(f, items, |f, i| write!(f, "{i}")),
        WhereValue::NumberArray(items) => write_list(f, items, |f, n| write!(f, "{n:?}")),
        WhereValue::BooleanArray(items) => write_list(f, items, |f, b| write!(f, "{b}")),
    }
}

/// Translates an optional filter. `None` stays `None`.
pub fn translate(filter: Option<&FilterExpr>) -> VectorResult<Option<WhereFilter>> {
    filter.map(|expr| translate_node(expr, false)).transpose()
}

/// Translates `expr`, negating it when `negated` is set.
fn translate_node(expr: &FilterExpr, negated: bool) -> VectorResult<WhereFilter> {
    match expr {
        FilterExpr::Compare { field, op, value } => {
            let property = field_path(field)?;
            if op.is_range() && matches!(value, FilterValue::Bool(_)) {
                return Err(VectorError::unsupported_filter(format!(
                    "ordering comparison '{}' on boolean field '{field}'",
                    op.as_ref()
                )));
            }
            let value = checked_scalar(field, value.clone())?;
            if !negated {
                return Ok(WhereFilter::leaf((*op).into(), property, value));
            }

            let flipped = WhereFilter::leaf(op.negate().into(), property.clone(), value);
            if !op.is_range() {
                return Ok(flipped);
            }
            // Range operators never match a missing property, while the
            // negated predicate must.
            let missing =
                WhereFilter::leaf(WhereOperator::IsNull, property, WhereValue::Boolean(true));
            Ok(WhereFilter::group(WhereOperator::Or, vec![flipped, missing]))
        }

        FilterExpr::In { field, values } => {
            let property = field_path(field)?;
            if values.is_empty() {
                return Err(VectorError::unsupported_filter(format!(
                    "empty membership list on field '{field}'"
                )));
            }
            if negated {
                let operands = values
                    .iter()
                    .map(|value| {
                        Ok(WhereFilter::leaf(
                            WhereOperator::NotEqual,
                            property.clone(),
                            checked_scalar(field, value.clone())?,
                        ))
                    })
                    .collect::<VectorResult<Vec<_>>>()?;
                Ok(WhereFilter::group(WhereOperator::And, operands))
            } else {
                Ok(WhereFilter::leaf(
                    WhereOperator::ContainsAny,
                    property,
                    membership_array(field, values)?,
                ))
            }
        }

        FilterExpr::Like { field, pattern } => {
            if negated {
                return Err(VectorError::unsupported_filter(format!(
                    "negated wildcard match on field '{field}'"
                )));
            }
            Ok(WhereFilter::leaf(
                WhereOperator::Like,
                field_path(field)?,
                WhereValue::Text(pattern.clone()),
            ))
        }

        FilterExpr::Exists { field } => Ok(WhereFilter::leaf(
            WhereOperator::IsNull,
            field_path(field)?,
            WhereValue::Boolean(negated),
        )),

        FilterExpr::And { all } => {
            let operator = if negated {
                WhereOperator::Or
            } else {
                WhereOperator::And
            };
            translate_group(all, operator, negated, "and")
        }

        FilterExpr::Or { any } => {
            let operator = if negated {
                WhereOperator::And
            } else {
                WhereOperator::Or
            };
            translate_group(any, operator, negated, "or")
        }

        FilterExpr::Not { expr } => translate_node(expr, !negated),
    }
}

fn translate_group(
    children: &[FilterExpr],
    operator: WhereOperator,
    negated: bool,
    label: &str,
) -> VectorResult<WhereFilter> {
    if children.is_empty() {
        return Err(VectorError::unsupported_filter(format!(
            "'{label}' without operands"
        )));
    }
    let operands = children
        .iter()
        .map(|child| translate_node(child, negated))
        .collect::<VectorResult<Vec<_>>>()?;
    Ok(WhereFilter::group(operator, operands))
}

fn field_path(field: &str) -> VectorResult<String> {
    property_name(field).ok_or_else(|| {
        VectorError::unsupported_filter(format!("field name '{field}' has no valid property form"))
    })
}

fn checked_scalar(field: &str, value: FilterValue) -> VectorResult<WhereValue> {
    if let FilterValue::Number(n) = value
        && !n.is_finite()
    {
        return Err(VectorError::unsupported_filter(format!(
            "non-finite number on field '{field}'"
        )));
    }
    Ok(value.into())
}

/// Builds the typed array of a `ContainsAny` node. Ints widen to numbers when
/// mixed with them; any other mix is rejected.
fn membership_array(field: &str, values: &[FilterValue]) -> VectorResult<WhereValue> {
    let mixed = || {
        let kinds: Vec<_> = values.iter().map(FilterValue::type_name).collect();
        VectorError::unsupported_filter(format!(
            "mixed value types [{}] in membership on field '{field}'",
            kinds.join(", ")
        ))
    };

    let array = match &values[0] {
        FilterValue::Text(_) => WhereValue::TextArray(
            values
                .iter()
                .map(|v| match v {
                    FilterValue::Text(s) => Ok(s.clone()),
                    _ => Err(mixed()),
                })
                .collect::<VectorResult<_>>()?,
        ),
        FilterValue::Bool(_) => WhereValue::BooleanArray(
            values
                .iter()
                .map(|v| match v {
                    FilterValue::Bool(b) => Ok(*b),
                    _ => Err(mixed()),
                })
                .collect::<VectorResult<_>>()?,
        ),
        FilterValue::Int(_) | FilterValue::Number(_) => {
            if values.iter().all(|v| matches!(v, FilterValue::Int(_))) {
                WhereValue::IntArray(
                    values
                        .iter()
                        .filter_map(|v| match v {
                            FilterValue::Int(i) => Some(*i),
                            _ => None,
                        })
                        .collect(),
                )
            } else {
                WhereValue::NumberArray(
                    values
                        .iter()
                        .map(|v| match v {
                            #[allow(clippy::cast_precision_loss)]
                            FilterValue::Int(i) => Ok(*i as f64),
                            FilterValue::Number(n) if n.is_finite() => Ok(*n),
                            _ => Err(mixed()),
                        })
                        .collect::<VectorResult<_>>()?,
                )
            }
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(expr: &FilterExpr) -> String {
        translate(Some(expr)).unwrap().unwrap().to_string()
    }

    fn rejected(expr: FilterExpr) -> bool {
        matches!(
            translate(Some(&expr)),
            Err(VectorError::UnsupportedFilter(_))
        )
    }

    #[test]
    fn none_stays_none() {
        assert!(translate(None).unwrap().is_none());
    }

    #[test]
    fn comparison_renders_typed_value() {
        assert_eq!(
            render(&FilterExpr::eq("tenant", "acme")),
            r#"{operator: Equal, path: ["tenant"], valueText: "acme"}"#
        );
        assert_eq!(
            render(&FilterExpr::gte("Page-Count", 3)),
            r#"{operator: GreaterThanEqual, path: ["page_Count"], valueInt: 3}"#
        );
        assert_eq!(
            render(&FilterExpr::lt("score", 0.5)),
            r#"{operator: LessThan, path: ["score"], valueNumber: 0.5}"#
        );
    }

    #[test]
    fn text_values_are_escaped() {
        assert_eq!(
            render(&FilterExpr::eq("title", "say \"hi\"\n")),
            r#"{operator: Equal, path: ["title"], valueText: "say \"hi\"\n"}"#
        );
    }

    #[test]
    fn membership_becomes_contains_any() {
        assert_eq!(
            render(&FilterExpr::is_in("lang", ["en", "de"])),
            r#"{operator: ContainsAny, path: ["lang"], valueText: ["en", "de"]}"#
        );
        let widened = translate(Some(&FilterExpr::is_in(
            "n",
            [FilterValue::Int(1), FilterValue::Number(2.5)],
        )))
        .unwrap()
        .unwrap();
        assert_eq!(widened.value, Some(WhereValue::NumberArray(vec![1.0, 2.5])));
    }

    #[test]
    fn negation_is_pushed_to_the_leaves() {
        let expr = FilterExpr::not(FilterExpr::and([
            FilterExpr::gt("year", 2020),
            FilterExpr::exists("author"),
        ]));
        assert_eq!(
            render(&expr),
            concat!(
                r#"{operator: Or, operands: ["#,
                r#"{operator: Or, operands: ["#,
                r#"{operator: LessThanEqual, path: ["year"], valueInt: 2020}, "#,
                r#"{operator: IsNull, path: ["year"], valueBoolean: true}]}, "#,
                r#"{operator: IsNull, path: ["author"], valueBoolean: true}]}"#
            )
        );
    }

    #[test]
    fn negated_range_admits_missing_properties() {
        let filter = translate(Some(&FilterExpr::not(FilterExpr::gt("year", 2020))))
            .unwrap()
            .unwrap();
        assert_eq!(filter.operator, WhereOperator::Or);
        assert_eq!(
            filter.operands,
            vec![
                WhereFilter::leaf(WhereOperator::LessThanEqual, "year", WhereValue::Int(2020)),
                WhereFilter::leaf(WhereOperator::IsNull, "year", WhereValue::Boolean(true)),
            ]
        );
    }

    #[test]
    fn negated_equality_stays_a_single_leaf() {
        assert_eq!(
            render(&FilterExpr::not(FilterExpr::eq("year", 2024))),
            r#"{operator: NotEqual, path: ["year"], valueInt: 2024}"#
        );
        assert_eq!(
            render(&FilterExpr::not(FilterExpr::ne("year", 2024))),
            r#"{operator: Equal, path: ["year"], valueInt: 2024}"#
        );
    }

    #[test]
    fn double_negation_cancels() {
        let expr = FilterExpr::not(FilterExpr::not(FilterExpr::eq("a", 1)));
        assert_eq!(render(&expr), render(&FilterExpr::eq("a", 1)));
    }

    #[test]
    fn negated_membership_is_conjunction_of_not_equal() {
        let expr = FilterExpr::not(FilterExpr::is_in("lang", ["en", "de"]));
        let filter = translate(Some(&expr)).unwrap().unwrap();
        assert_eq!(filter.operator, WhereOperator::And);
        assert_eq!(filter.operands.len(), 2);
        assert!(
            filter
                .operands
                .iter()
                .all(|op| op.operator == WhereOperator::NotEqual)
        );
    }

    #[test]
    fn exists_maps_to_is_null() {
        let filter = translate(Some(&FilterExpr::exists("author")))
            .unwrap()
            .unwrap();
        assert_eq!(filter.operator, WhereOperator::IsNull);
        assert_eq!(filter.value, Some(WhereValue::Boolean(false)));
    }

    #[test]
    fn unrepresentable_nodes_are_rejected() {
        assert!(rejected(FilterExpr::and([])));
        assert!(rejected(FilterExpr::or([])));
        assert!(rejected(FilterExpr::is_in("a", Vec::<FilterValue>::new())));
        assert!(rejected(FilterExpr::is_in(
            "a",
            [FilterValue::Text("x".into()), FilterValue::Int(1)]
        )));
        assert!(rejected(FilterExpr::gt("flag", true)));
        assert!(rejected(FilterExpr::not(FilterExpr::like("title", "ru*"))));
        assert!(rejected(FilterExpr::eq("--", 1)));
        assert!(rejected(FilterExpr::eq("x", f64::NAN)));
    }

    #[test]
    fn rejection_inside_a_group_fails_the_whole_filter() {
        assert!(rejected(FilterExpr::and([
            FilterExpr::eq("a", 1),
            FilterExpr::gt("b", false),
        ])));
    }
}
