//! Filter trees and their compilation into parameterized predicates.
//!
//! A condition list is a sequence of [`Condition`]s, each attaching to the
//! clause accumulated so far through its [`Combinator`]. Compilation walks
//! the list left to right against a [`WhereBuilder`], which owns the
//! predicate text and the named parameter map shared by the whole statement.
//!
//! Placeholders use the `:name` form; `(:...name)` marks a sequence that is
//! expanded element by element when the statement is rendered.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{EngineResult, QueryError};
use crate::operator::{Arity, Operator, Shaped};

/// Regex for valid SQL identifiers (table/column/alias names).
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static VALID_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid regex literal"));

/// Named parameters bound by a statement.
pub type Params = BTreeMap<String, Value>;

/// How a condition attaches to the clause before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Establishes (or replaces) the base clause.
    #[serde(alias = "WHERE")]
    First,
    #[default]
    #[serde(alias = "WHERE_AND")]
    And,
    #[serde(alias = "WHERE_OR")]
    Or,
}

impl Combinator {
    fn keyword(self) -> &'static str {
        match self {
            Combinator::Or => "OR",
            Combinator::First | Combinator::And => "AND",
        }
    }
}

/// A column reference, optionally pre-qualified with an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ColumnRef {
    pub alias: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Reference `name` under an explicit alias.
    pub fn qualified(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            name: name.into(),
        }
    }

    /// Render as a quoted `"alias"."name"`, using `default_alias` for bare names.
    pub fn render(&self, default_alias: &str) -> EngineResult<String> {
        let alias = self.alias.as_deref().unwrap_or(default_alias);
        Ok(format!("{}.{}", quote_ident(alias)?, quote_ident(&self.name)?))
    }
}

impl From<&str> for ColumnRef {
    fn from(value: &str) -> Self {
        match value.split_once('.') {
            Some((alias, name)) => Self::qualified(alias, name),
            None => Self {
                alias: None,
                name: value.to_string(),
            },
        }
    }
}

impl From<String> for ColumnRef {
    fn from(value: String) -> Self {
        ColumnRef::from(value.as_str())
    }
}

impl From<ColumnRef> for String {
    fn from(value: ColumnRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Quote a validated identifier.
pub(crate) fn quote_ident(ident: &str) -> EngineResult<String> {
    if !VALID_IDENTIFIER.is_match(ident) {
        return Err(QueryError::config(format!(
            "unqualifiable identifier '{ident}'"
        )));
    }
    Ok(format!("\"{ident}\""))
}

/// Reject parameter names a `:name` placeholder could not carry whole.
fn check_param_name(name: &str) -> EngineResult<()> {
    if !VALID_IDENTIFIER.is_match(name) {
        return Err(QueryError::config(format!("invalid parameter name '{name}'")));
    }
    Ok(())
}

/// One column/operator/value comparison.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub combinator: Combinator,
    pub column: ColumnRef,
    #[serde(default)]
    pub operator: Operator,
    /// `null` means "no filter" and skips the predicate.
    #[serde(default)]
    pub value: Value,
    /// Overrides the parameter base name derived from the column.
    #[serde(default)]
    pub param_name: Option<String>,
}

impl Predicate {
    pub fn new(
        combinator: Combinator,
        column: impl Into<ColumnRef>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            combinator,
            column: column.into(),
            operator,
            value: value.into(),
            param_name: None,
        }
    }

    pub fn first(column: impl Into<ColumnRef>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(Combinator::First, column, operator, value)
    }

    pub fn and(column: impl Into<ColumnRef>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(Combinator::And, column, operator, value)
    }

    pub fn or(column: impl Into<ColumnRef>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(Combinator::Or, column, operator, value)
    }

    pub fn with_param_name(mut self, name: impl Into<String>) -> Self {
        self.param_name = Some(name.into());
        self
    }

    /// Compile to predicate text, binding parameters into `builder`.
    ///
    /// `index` is the predicate's position in its containing sequence.
    /// Returns `None` when the predicate is skipped.
    pub(crate) fn compile(
        &self,
        builder: &mut WhereBuilder,
        index: usize,
    ) -> EngineResult<Option<String>> {
        if self.value.is_null() && self.operator.arity() != Arity::None {
            return Ok(None);
        }

        let column = self.column.render(&builder.alias)?;
        let base = self.param_name.as_deref().unwrap_or(&self.column.name);
        check_param_name(base)?;
        let symbol = self.operator.symbol();

        let sql = match self.operator.shape(&self.value)? {
            Shaped::None => format!("{column} {symbol}"),
            Shaped::Single(value) => {
                let name = builder.bind(base, value)?;
                format!("{column} {symbol} :{name}")
            }
            Shaped::Pair(from, to) => {
                let from = builder.bind(&format!("{base}_{index}_from"), from)?;
                let to = builder.bind(&format!("{base}_{index}_to"), to)?;
                format!("{column} {symbol} :{from} AND :{to}")
            }
            Shaped::List(items) if items.is_empty() => match self.operator {
                Operator::NotIn => "TRUE".to_string(),
                _ => "FALSE".to_string(),
            },
            Shaped::List(items) => {
                let name = builder.bind(base, Value::Array(items))?;
                format!("{column} {symbol} (:...{name})")
            }
        };

        Ok(Some(sql))
    }
}

/// A parenthesized sub-tree with its own combinator.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub combinator: Combinator,
    pub conditions: Vec<Condition>,
}

type RawFn = dyn Fn(&mut WhereBuilder) -> EngineResult<()> + Send + Sync;

/// Escape hatch: a callback with direct access to the builder.
///
/// The callback must call the combinator method it wants itself; whatever
/// it leaves on the builder is taken as already applied.
#[derive(Clone)]
pub struct RawBuilder(Arc<RawFn>);

impl RawBuilder {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut WhereBuilder) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for RawBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawBuilder(..)")
    }
}

/// Unit of a condition list.
#[derive(Debug, Clone)]
pub enum Condition {
    Predicate(Predicate),
    Group(Group),
    Raw(RawBuilder),
}

impl Condition {
    pub fn group(combinator: Combinator, conditions: Vec<Condition>) -> Self {
        Condition::Group(Group {
            combinator,
            conditions,
        })
    }

    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&mut WhereBuilder) -> EngineResult<()> + Send + Sync + 'static,
    {
        Condition::Raw(RawBuilder::new(f))
    }
}

impl From<Predicate> for Condition {
    fn from(value: Predicate) -> Self {
        Condition::Predicate(value)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Group(Group),
            Predicate(Predicate),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Group(group) => Condition::Group(group),
            Repr::Predicate(predicate) => Condition::Predicate(predicate),
        })
    }
}

/// Mutable query-construction context for predicates.
///
/// Accumulates one clause, evaluated strictly left to right, plus the named
/// parameters bound so far.
#[derive(Debug, Clone)]
pub struct WhereBuilder {
    alias: String,
    parts: Vec<(Combinator, String)>,
    params: Params,
}

impl WhereBuilder {
    /// Create an empty builder qualifying bare columns with `alias`.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            parts: Vec::new(),
            params: Params::new(),
        }
    }

    pub(crate) fn with_params(alias: impl Into<String>, params: Params) -> Self {
        Self {
            alias: alias.into(),
            parts: Vec::new(),
            params,
        }
    }

    /// Alias bare column references resolve against.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Replace the clause with `sql`.
    pub fn where_clause(&mut self, sql: impl Into<String>) -> &mut Self {
        self.parts.clear();
        self.parts.push((Combinator::First, sql.into()));
        self
    }

    pub fn and_where(&mut self, sql: impl Into<String>) -> &mut Self {
        self.parts.push((Combinator::And, sql.into()));
        self
    }

    pub fn or_where(&mut self, sql: impl Into<String>) -> &mut Self {
        self.parts.push((Combinator::Or, sql.into()));
        self
    }

    /// Set a parameter under an exact name, overwriting any previous value.
    pub fn set_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> EngineResult<&mut Self> {
        let name = name.into();
        check_param_name(&name)?;
        self.params.insert(name, value.into());
        Ok(self)
    }

    /// Bind `value` under `base`, or `base_2`, `base_3`, … when taken.
    /// Returns the name actually used.
    pub fn bind(&mut self, base: &str, value: Value) -> EngineResult<String> {
        check_param_name(base)?;
        let mut name = base.to_string();
        let mut n = 1;
        while self.params.contains_key(&name) {
            n += 1;
            name = format!("{base}_{n}");
        }
        self.params.insert(name.clone(), value);
        Ok(name)
    }

    fn apply(&mut self, combinator: Combinator, sql: String) {
        match combinator {
            Combinator::First => {
                self.where_clause(sql);
            }
            Combinator::And => {
                self.and_where(sql);
            }
            Combinator::Or => {
                self.or_where(sql);
            }
        }
    }

    /// Whether anything has been applied yet.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Parameters bound so far.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The accumulated clause, folded left to right.
    ///
    /// Parentheses are only introduced where the combinator changes, so
    /// `a AND b OR c` renders as `(a AND b) OR c`.
    pub fn sql(&self) -> Option<String> {
        let mut iter = self.parts.iter();
        let (_, first) = iter.next()?;
        let mut acc = first.clone();
        let mut last: Option<&str> = None;
        for (combinator, sql) in iter {
            let keyword = combinator.keyword();
            if last.is_some_and(|prev| prev != keyword) {
                acc = format!("({acc})");
            }
            acc = format!("{acc} {keyword} {sql}");
            last = Some(keyword);
        }
        Some(acc)
    }

    pub fn into_parts(self) -> (Option<String>, Params) {
        (self.sql(), self.params)
    }

    /// Apply a condition list, in order.
    pub fn apply_conditions(&mut self, conditions: &[Condition]) -> EngineResult<()> {
        for (index, condition) in conditions.iter().enumerate() {
            match condition {
                Condition::Predicate(predicate) => {
                    if let Some(sql) = predicate.compile(self, index)? {
                        self.apply(predicate.combinator, sql);
                    }
                }
                Condition::Group(group) => {
                    if group.conditions.is_empty() {
                        return Err(QueryError::config("group has no nested conditions"));
                    }
                    let mut nested =
                        WhereBuilder::with_params(self.alias.clone(), std::mem::take(&mut self.params));
                    let outcome = nested.apply_conditions(&group.conditions);
                    let (sql, params) = nested.into_parts();
                    self.params = params;
                    outcome?;
                    if let Some(sql) = sql {
                        self.apply(group.combinator, format!("({sql})"));
                    }
                }
                Condition::Raw(raw) => (raw.0)(self)?,
            }
        }
        Ok(())
    }
}

/// Compile a condition list that must produce a predicate.
///
/// Fails with a configuration error when the list is empty or every entry
/// was skipped, rather than silently dropping all filtering.
pub fn compile_required(
    alias: &str,
    conditions: &[Condition],
) -> EngineResult<(String, Params)> {
    if conditions.is_empty() {
        return Err(QueryError::config("missing condition"));
    }
    let mut builder = WhereBuilder::new(alias);
    builder.apply_conditions(conditions)?;
    match builder.into_parts() {
        (Some(sql), params) => Ok((sql, params)),
        (None, _) => Err(QueryError::config("missing condition")),
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(conditions: &[Condition]) -> (String, Params) {
        compile_required("users", conditions).unwrap()
    }

    #[test]
    fn single_predicate_binds_column_name() {
        let (sql, params) = compile(&[Predicate::first("name", Operator::Equal, "ada").into()]);
        assert_eq!(sql, "\"users\".\"name\" = :name");
        assert_eq!(params["name"], json!("ada"));
    }

    #[test]
    fn qualified_column_used_as_is() {
        let (sql, params) = compile(&[Predicate::first(
            "company.name",
            Operator::Contains,
            "acme",
        )
        .into()]);
        assert_eq!(sql, "\"company\".\"name\" ILIKE :name");
        assert_eq!(params["name"], json!("%acme%"));
    }

    #[test]
    fn and_chain() {
        let (sql, params) = compile(&[
            Predicate::first("age", Operator::GreaterOrEqual, 18).into(),
            Predicate::and("status", Operator::Equal, "active").into(),
            Predicate::and("name", Operator::StartsWith, "a").into(),
        ]);
        assert_eq!(
            sql,
            "\"users\".\"age\" >= :age AND \"users\".\"status\" = :status AND \"users\".\"name\" ILIKE :name"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn mixed_combinators_fold_left_to_right() {
        let (sql, _) = compile(&[
            Predicate::first("a", Operator::Equal, 1).into(),
            Predicate::and("b", Operator::Equal, 2).into(),
            Predicate::or("c", Operator::Equal, 3).into(),
            Predicate::and("d", Operator::Equal, 4).into(),
        ]);
        assert_eq!(
            sql,
            "((\"users\".\"a\" = :a AND \"users\".\"b\" = :b) OR \"users\".\"c\" = :c) AND \"users\".\"d\" = :d"
        );
    }

    #[test]
    fn between_params_are_indexed_by_position() {
        let (sql, params) = compile(&[
            Predicate::first("age", Operator::Between, json!([10, 20])).into(),
            Predicate::or("age", Operator::Between, json!([40, 50])).into(),
        ]);
        assert_eq!(
            sql,
            "\"users\".\"age\" BETWEEN :age_0_from AND :age_0_to OR \"users\".\"age\" BETWEEN :age_1_from AND :age_1_to"
        );
        assert_eq!(params["age_0_from"], json!(10));
        assert_eq!(params["age_0_to"], json!(20));
        assert_eq!(params["age_1_from"], json!(40));
        assert_eq!(params["age_1_to"], json!(50));
    }

    #[test]
    fn in_binds_whole_array() {
        let (sql, params) = compile(&[Predicate::first("id", Operator::In, json!([1, 2, 3])).into()]);
        assert_eq!(sql, "\"users\".\"id\" IN (:...id)");
        assert_eq!(params["id"], json!([1, 2, 3]));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let (sql, params) = compile(&[Predicate::first("id", Operator::In, json!([])).into()]);
        assert_eq!(sql, "FALSE");
        assert!(params.is_empty());

        let (sql, _) = compile(&[Predicate::first("id", Operator::NotIn, json!([])).into()]);
        assert_eq!(sql, "TRUE");
    }

    #[test]
    fn repeated_column_gets_distinct_names() {
        let (sql, params) = compile(&[
            Predicate::first("age", Operator::Greater, 18).into(),
            Predicate::and("age", Operator::Less, 65).into(),
        ]);
        assert_eq!(sql, "\"users\".\"age\" > :age AND \"users\".\"age\" < :age_2");
        assert_eq!(params["age"], json!(18));
        assert_eq!(params["age_2"], json!(65));
    }

    #[test]
    fn param_name_override() {
        let (sql, params) = compile(&[Predicate::first("status", Operator::Equal, "x")
            .with_param_name("wanted_status")
            .into()]);
        assert_eq!(sql, "\"users\".\"status\" = :wanted_status");
        assert!(params.contains_key("wanted_status"));
    }

    #[test]
    fn param_name_must_be_an_identifier() {
        let err = compile_required(
            "users",
            &[
                Predicate::first("age", Operator::Greater, 1).into(),
                Predicate::and("status", Operator::Equal, "inactive")
                    .with_param_name("age-x")
                    .into(),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));

        let err = compile_required(
            "users",
            &[Condition::raw(|qb| {
                qb.where_clause("\"users\".\"id\" = :id");
                qb.set_parameter("id; DROP", 1)?;
                Ok(())
            })],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));
    }

    #[test]
    fn null_value_skips_predicate() {
        let (sql, params) = compile(&[
            Predicate::first("name", Operator::Equal, "ada").into(),
            Predicate::and("email", Operator::Equal, Value::Null).into(),
        ]);
        assert_eq!(sql, "\"users\".\"name\" = :name");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn explicit_null_checks() {
        let (sql, params) = compile(&[Predicate::first("deleted_at", Operator::IsNull, Value::Null).into()]);
        assert_eq!(sql, "\"users\".\"deleted_at\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn group_keeps_its_own_combinator() {
        let (sql, _) = compile(&[
            Predicate::first("status", Operator::Equal, "active").into(),
            Condition::group(
                Combinator::And,
                vec![
                    Predicate::first("name", Operator::Contains, "a").into(),
                    Predicate::or("email", Operator::Contains, "a").into(),
                ],
            ),
        ]);
        assert_eq!(
            sql,
            "\"users\".\"status\" = :status AND (\"users\".\"name\" ILIKE :name OR \"users\".\"email\" ILIKE :email)"
        );
    }

    #[test]
    fn nested_group_shares_parameter_namespace() {
        let (sql, params) = compile(&[
            Predicate::first("age", Operator::Between, json!([1, 2])).into(),
            Condition::group(
                Combinator::Or,
                vec![Predicate::first("age", Operator::Between, json!([5, 6])).into()],
            ),
        ]);
        assert!(sql.contains(":age_0_from AND :age_0_to"));
        assert!(sql.contains(":age_0_from_2 AND :age_0_to_2"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn empty_group_is_configuration_error() {
        let err = compile_required(
            "users",
            &[
                Predicate::first("a", Operator::Equal, 1).into(),
                Condition::group(Combinator::And, vec![]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));
    }

    #[test]
    fn empty_sequence_is_missing_condition() {
        let err = compile_required("users", &[]).unwrap_err();
        assert_eq!(err.to_string(), "configuration error: missing condition");

        let err = compile_required(
            "users",
            &[Predicate::first("a", Operator::Equal, Value::Null).into()],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));
    }

    #[test]
    fn raw_builder_ignores_combinator_and_is_not_rewrapped() {
        let (sql, params) = compile(&[
            Predicate::first("name", Operator::Equal, "ada").into(),
            Condition::raw(|qb| {
                qb.or_where("lower(\"users\".\"email\") = :email_lower");
                qb.set_parameter("email_lower", "ada@example.com")?;
                Ok(())
            }),
        ]);
        assert_eq!(
            sql,
            "\"users\".\"name\" = :name OR lower(\"users\".\"email\") = :email_lower"
        );
        assert_eq!(params["email_lower"], json!("ada@example.com"));
    }

    #[test]
    fn later_first_replaces_clause() {
        let (sql, _) = compile(&[
            Predicate::first("a", Operator::Equal, 1).into(),
            Predicate::first("b", Operator::Equal, 2).into(),
        ]);
        assert_eq!(sql, "\"users\".\"b\" = :b");
    }

    #[test]
    fn invalid_identifier_rejected() {
        let err = compile_required(
            "users",
            &[Predicate::first("name; DROP TABLE users", Operator::Equal, 1).into()],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));

        let err = compile_required("users", &[Predicate::first("a.b.c", Operator::Equal, 1).into()])
            .unwrap_err();
        assert!(matches!(err, QueryError::Configuration(_)));
    }

    #[test]
    fn conditions_deserialize_from_json() {
        let conditions: Vec<Condition> = serde_json::from_value(json!([
            {"combinator": "WHERE", "column": "status", "value": "active"},
            {"combinator": "or", "conditions": [
                {"column": "company.name", "operator": "CONTAINS", "value": "acme"}
            ]}
        ]))
        .unwrap();
        assert_eq!(conditions.len(), 2);
        let (sql, params) = compile(&conditions);
        assert_eq!(
            sql,
            "\"users\".\"status\" = :status OR (\"company\".\"name\" ILIKE :name)"
        );
        assert_eq!(params["name"], json!("%acme%"));
    }
}
