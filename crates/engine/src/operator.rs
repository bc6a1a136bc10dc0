//! Comparison operators and how they shape bound values.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{EngineResult, QueryError};

/// Comparison operators for predicates.
///
/// Names are matched case-insensitively with `_`/`-` ignored, so `not_in`,
/// `NOT_IN` and `notIn` are the same operator. The older spellings
/// (`GREATER_OR_EQUAL_THAN`, `CONTAIN`, `START_WITH`, ...) are accepted too.
/// An unrecognised or missing name yields [`Operator::Equal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
    StartsWith,
    EndsWith,
    Contains,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
}

/// Number of parameters an operator binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No value at all (`IS NULL`).
    None,
    One,
    /// Exactly two values (`BETWEEN`).
    Two,
    /// A whole sequence bound under one name (`IN`).
    Many,
}

/// A value after the operator's shaping transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    None,
    Single(Value),
    Pair(Value, Value),
    List(Vec<Value>),
}

impl Operator {
    /// Dialect operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "<>",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Like => "LIKE",
            Operator::StartsWith | Operator::EndsWith | Operator::Contains => "ILIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Operator::IsNull | Operator::IsNotNull => Arity::None,
            Operator::Between => Arity::Two,
            Operator::In | Operator::NotIn => Arity::Many,
            _ => Arity::One,
        }
    }

    /// Apply the operator's value-shaping rule.
    pub fn shape(self, value: &Value) -> EngineResult<Shaped> {
        match self.arity() {
            Arity::None => Ok(Shaped::None),
            Arity::Many => Ok(match value {
                Value::Array(items) => Shaped::List(items.clone()),
                other => Shaped::List(vec![other.clone()]),
            }),
            Arity::Two => match value {
                Value::Array(items) if items.len() == 2 => {
                    Ok(Shaped::Pair(items[0].clone(), items[1].clone()))
                }
                other => Err(QueryError::config(format!(
                    "between expects a two-element array, got {other}"
                ))),
            },
            Arity::One => Ok(Shaped::Single(match self {
                Operator::Contains => wildcard(value, "%", "%"),
                Operator::StartsWith => wildcard(value, "", "%"),
                Operator::EndsWith => wildcard(value, "%", ""),
                _ => value.clone(),
            })),
        }
    }
}

impl Operator {
    fn from_name(name: &str) -> Self {
        let key: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "notequal" | "ne" => Operator::NotEqual,
            "greater" | "greaterthan" | "gt" => Operator::Greater,
            "greaterorequal" | "greaterthanorequal" | "greaterorequalthan" | "gte" => {
                Operator::GreaterOrEqual
            }
            "less" | "lessthan" | "lt" => Operator::Less,
            "lessorequal" | "lessthanorequal" | "lessorequalthan" | "lte" => Operator::LessOrEqual,
            "like" => Operator::Like,
            "startswith" | "startwith" => Operator::StartsWith,
            "endswith" | "endwith" => Operator::EndsWith,
            "contains" | "contain" => Operator::Contains,
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            "between" => Operator::Between,
            "isnull" => Operator::IsNull,
            "isnotnull" => Operator::IsNotNull,
            _ => Operator::Equal,
        }
    }
}

impl FromStr for Operator {
    type Err = std::convert::Infallible;

    /// Never fails: unknown names fall back to [`Operator::Equal`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Operator::from_name(s))
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.as_deref().map(Operator::from_name).unwrap_or_default())
    }
}

fn wildcard(value: &Value, prefix: &str, suffix: &str) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("{prefix}{}{suffix}", escape_like_wildcards(&text)))
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub(crate) fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_match_operators_wrap_in_wildcards() {
        assert_eq!(
            Operator::Contains.shape(&json!("rust")).unwrap(),
            Shaped::Single(json!("%rust%"))
        );
        assert_eq!(
            Operator::StartsWith.shape(&json!("ru")).unwrap(),
            Shaped::Single(json!("ru%"))
        );
        assert_eq!(
            Operator::EndsWith.shape(&json!("st")).unwrap(),
            Shaped::Single(json!("%st"))
        );
    }

    #[test]
    fn like_passes_pattern_through() {
        assert_eq!(
            Operator::Like.shape(&json!("a_%")).unwrap(),
            Shaped::Single(json!("a_%"))
        );
    }

    #[test]
    fn contains_escapes_user_wildcards() {
        assert_eq!(
            Operator::Contains.shape(&json!("100%_done")).unwrap(),
            Shaped::Single(json!("%100\\%\\_done%"))
        );
    }

    #[test]
    fn between_requires_pair() {
        assert_eq!(
            Operator::Between.shape(&json!([1, 5])).unwrap(),
            Shaped::Pair(json!(1), json!(5))
        );
        assert!(matches!(
            Operator::Between.shape(&json!([1, 2, 3])),
            Err(QueryError::Configuration(_))
        ));
        assert!(Operator::Between.shape(&json!(4)).is_err());
    }

    #[test]
    fn in_accepts_sequence_or_scalar() {
        assert_eq!(
            Operator::In.shape(&json!(["a", "b"])).unwrap(),
            Shaped::List(vec![json!("a"), json!("b")])
        );
        assert_eq!(
            Operator::NotIn.shape(&json!(7)).unwrap(),
            Shaped::List(vec![json!(7)])
        );
    }

    #[test]
    fn unknown_operator_defaults_to_equal() {
        let op: Operator = serde_json::from_str("\"regex_match\"").unwrap();
        assert_eq!(op, Operator::Equal);
        assert_eq!("whatever".parse::<Operator>().unwrap(), Operator::Equal);
        assert_eq!(Operator::default().symbol(), "=");
    }

    #[test]
    fn legacy_spellings_accepted() {
        let op: Operator = serde_json::from_str("\"GREATER_OR_EQUAL_THAN\"").unwrap();
        assert_eq!(op, Operator::GreaterOrEqual);
        let op: Operator = serde_json::from_str("\"CONTAIN\"").unwrap();
        assert_eq!(op, Operator::Contains);
        assert_eq!("not_in".parse::<Operator>().unwrap(), Operator::NotIn);
        assert_eq!("isNotNull".parse::<Operator>().unwrap(), Operator::IsNotNull);
        let op: Operator = serde_json::from_str("null").unwrap();
        assert_eq!(op, Operator::Equal);
    }

    #[test]
    fn arities() {
        assert_eq!(Operator::IsNull.arity(), Arity::None);
        assert_eq!(Operator::Between.arity(), Arity::Two);
        assert_eq!(Operator::In.arity(), Arity::Many);
        assert_eq!(Operator::Less.arity(), Arity::One);
    }
}
