//! Filter expressions evaluated both by the external store and in memory
//!
//! A [`Filter`] is the caller's query predicate. The external query executor
//! translates it into its native query language; the reconciliation engine
//! evaluates the very same filter against cached record snapshots, so both
//! sides agree on what "matches" means.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::PredicateError;
use crate::Record;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (strings) or element (arrays)
    Contains,
    /// In list of values
    In,
    /// Matches regular expression
    Regex,
}

impl FilterOperator {
    /// Parse a field-lookup suffix (`gt` in `age__gt`).
    pub fn from_lookup(suffix: &str) -> Option<Self> {
        match suffix {
            "exact" | "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "gte" => Some(Self::Gte),
            "lte" => Some(Self::Lte),
            "contains" => Some(Self::Contains),
            "in" => Some(Self::In),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }

    /// The lookup suffix for this operator (`None` for plain equality).
    pub fn lookup_suffix(self) -> Option<&'static str> {
        match self {
            Self::Eq => None,
            Self::Ne => Some("ne"),
            Self::Gt => Some("gt"),
            Self::Lt => Some("lt"),
            Self::Gte => Some("gte"),
            Self::Lte => Some("lte"),
            Self::Contains => Some("contains"),
            Self::In => Some("in"),
            Self::Regex => Some("regex"),
        }
    }
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on. Dotted paths address nested objects.
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against (JSON value for flexibility)
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    /// Parse a field lookup such as `name`, `age__gte` or `author.name__in`.
    ///
    /// A trailing `__<suffix>` selects the operator only when the suffix is a
    /// known lookup; otherwise the whole key is taken as the field name.
    pub fn from_lookup(key: &str, value: Value) -> Result<Self, PredicateError> {
        if key.is_empty() {
            return Err(PredicateError::InvalidLookup {
                lookup: key.to_string(),
                reason: "empty field name".to_string(),
            });
        }
        let (field, operator) = match key.rsplit_once("__") {
            Some((field, suffix)) if !field.is_empty() => {
                match FilterOperator::from_lookup(suffix) {
                    Some(op) => (field, op),
                    None => (key, FilterOperator::Eq),
                }
            }
            _ => (key, FilterOperator::Eq),
        };
        if operator == FilterOperator::In && !value.is_array() {
            return Err(PredicateError::InvalidLookup {
                lookup: key.to_string(),
                reason: "`in` lookups require a list value".to_string(),
            });
        }
        Ok(Self::new(field, operator, value))
    }

    /// The lookup key this expression was (or could have been) parsed from.
    pub fn lookup_key(&self) -> String {
        match self.operator.lookup_suffix() {
            Some(suffix) => format!("{}__{}", self.field, suffix),
            None => self.field.clone(),
        }
    }

    /// Evaluate this expression against a record snapshot.
    pub fn evaluate(&self, record: &Record) -> Result<bool, PredicateError> {
        let actual = resolve_field(record, &self.field)?;
        match self.operator {
            FilterOperator::Eq => Ok(values_equal(actual, &self.value)),
            FilterOperator::Ne => Ok(!values_equal(actual, &self.value)),
            FilterOperator::Gt => Ok(self.compare(actual)? == Ordering::Greater),
            FilterOperator::Lt => Ok(self.compare(actual)? == Ordering::Less),
            FilterOperator::Gte => Ok(self.compare(actual)? != Ordering::Less),
            FilterOperator::Lte => Ok(self.compare(actual)? != Ordering::Greater),
            FilterOperator::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => {
                    Ok(haystack.contains(needle.as_str()))
                }
                (Value::Array(items), needle) => {
                    Ok(items.iter().any(|item| values_equal(item, needle)))
                }
                (other, _) => Err(self.mismatch("string or array", other)),
            },
            FilterOperator::In => match &self.value {
                Value::Array(options) => Ok(options.iter().any(|o| values_equal(actual, o))),
                _ => Err(PredicateError::InvalidLookup {
                    lookup: self.lookup_key(),
                    reason: "`in` lookups require a list value".to_string(),
                }),
            },
            FilterOperator::Regex => {
                let pattern = self.value.as_str().ok_or_else(|| PredicateError::InvalidLookup {
                    lookup: self.lookup_key(),
                    reason: "regex pattern must be a string".to_string(),
                })?;
                let re = regex::Regex::new(pattern).map_err(|e| PredicateError::InvalidLookup {
                    lookup: self.lookup_key(),
                    reason: e.to_string(),
                })?;
                match actual {
                    Value::String(s) => Ok(re.is_match(s)),
                    other => Err(self.mismatch("string", other)),
                }
            }
        }
    }

    fn compare(&self, actual: &Value) -> Result<Ordering, PredicateError> {
        compare_values(actual, &self.value).ok_or_else(|| PredicateError::TypeMismatch {
            field: self.field.clone(),
            expected: type_name(&self.value).to_string(),
            found: type_name(actual).to_string(),
        })
    }

    fn mismatch(&self, expected: &str, found: &Value) -> PredicateError {
        PredicateError::TypeMismatch {
            field: self.field.clone(),
            expected: expected.to_string(),
            found: type_name(found).to_string(),
        }
    }
}

/// Query predicate: a boolean tree of field comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Matches every record.
    All,
    Expr(FilterExpr),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::All
    }
}

impl From<FilterExpr> for Filter {
    fn from(expr: FilterExpr) -> Self {
        Self::Expr(expr)
    }
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::Expr(FilterExpr::eq(field, value))
    }

    pub fn expr(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self::Expr(FilterExpr::new(field, operator, value))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            this => Self::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            this => Self::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Build a conjunction from Django-style lookups (`{"age__gt": 3}`).
    pub fn from_lookups(lookups: &Record) -> Result<Self, PredicateError> {
        let exprs = lookups
            .iter()
            .map(|(key, value)| FilterExpr::from_lookup(key, value.clone()).map(Filter::Expr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match exprs.len() {
            0 => Self::All,
            1 => exprs.into_iter().next().unwrap_or(Self::All),
            _ => Self::And(exprs),
        })
    }

    /// Evaluate the filter against a snapshot.
    ///
    /// Any sub-expression that cannot be evaluated makes the whole filter
    /// unevaluable: a snapshot missing a referenced field is an error, not a
    /// silent non-match.
    pub fn evaluate(&self, record: &Record) -> Result<bool, PredicateError> {
        match self {
            Self::All => Ok(true),
            Self::Expr(expr) => expr.evaluate(record),
            Self::And(parts) => {
                for part in parts {
                    if !part.evaluate(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.evaluate(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => inner.evaluate(record).map(|matched| !matched),
        }
    }
}

/// Look up a (possibly dotted) field path in a snapshot.
fn resolve_field<'a>(record: &'a Record, path: &str) -> Result<&'a Value, PredicateError> {
    let missing = || PredicateError::MissingField {
        field: path.to_string(),
    };
    if let Some(value) = record.get(path) {
        return Ok(value);
    }
    let mut segments = path.split('.');
    let first = segments.next().ok_or_else(missing)?;
    let mut current = record.get(first).ok_or_else(missing)?;
    for segment in segments {
        current = current
            .as_object()
            .and_then(|obj| obj.get(segment))
            .ok_or_else(missing)?;
    }
    Ok(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
