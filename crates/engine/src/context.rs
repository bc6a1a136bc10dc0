//! Query-construction context and statement rendering.
//!
//! A [`SelectContext`] is built fresh for every call. Conditions, relations
//! and orders are applied to it in call order; rendering turns it into
//! PostgreSQL text with sea-query, inlining bound values as escaped literals.

use sea_query::{Alias, Expr, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr};
use serde_json::Value;

use crate::condition::{Condition, Params, WhereBuilder, quote_ident};
use crate::entity::{Cardinality, EntityMeta};
use crate::error::{EngineResult, QueryError};
use crate::pagination::{OrderSpec, Pagination, SortDirection};

/// How a joined relation is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinStyle {
    Left,
    Inner,
}

/// A relation joined and selected under its alias.
#[derive(Debug, Clone)]
pub(crate) struct JoinPlan {
    pub alias: String,
    pub parent_alias: String,
    pub cardinality: Cardinality,
    pub style: JoinStyle,
    pub target: EntityMeta,
    /// ON clause with named placeholders.
    pub on: String,
}

/// A relation exposed only as a row count on its parent.
#[derive(Debug, Clone)]
pub(crate) struct CountPlan {
    pub alias: String,
    pub parent_alias: String,
    /// Correlated scalar subquery with named placeholders.
    pub subquery: String,
}

/// Mutable per-call query state.
#[derive(Debug, Clone)]
pub struct SelectContext {
    pub(crate) meta: EntityMeta,
    pub(crate) filter: WhereBuilder,
    pub(crate) joins: Vec<JoinPlan>,
    pub(crate) counts: Vec<CountPlan>,
    pub(crate) orders: Vec<(String, SortDirection)>,
    pub(crate) page: Option<Pagination>,
}

impl SelectContext {
    /// Start a context for `meta`, aliased by its table name.
    pub fn new(meta: EntityMeta) -> Self {
        Self {
            meta,
            filter: WhereBuilder::new(meta.table),
            joins: Vec::new(),
            counts: Vec::new(),
            orders: Vec::new(),
            page: None,
        }
    }

    pub fn alias(&self) -> &str {
        self.filter.alias()
    }

    pub fn params(&self) -> &Params {
        self.filter.params()
    }

    /// The compiled WHERE predicate, if any.
    pub fn predicate(&self) -> Option<String> {
        self.filter.sql()
    }

    /// Apply a condition list to the WHERE clause.
    pub fn apply_conditions(&mut self, conditions: &[Condition]) -> EngineResult<&mut Self> {
        self.filter.apply_conditions(conditions)?;
        Ok(self)
    }

    /// Append a sort key. A column already ordered keeps its position and
    /// takes the new direction.
    pub fn order_by(&mut self, order: &OrderSpec) -> EngineResult<&mut Self> {
        let column = order.column.render(self.alias())?;
        match self.orders.iter_mut().find(|(c, _)| *c == column) {
            Some(existing) => existing.1 = order.direction,
            None => self.orders.push((column, order.direction)),
        }
        Ok(self)
    }

    /// Make `order` the primary sort key; keys applied earlier follow it.
    pub fn order_first(&mut self, order: &OrderSpec) -> EngineResult<&mut Self> {
        let column = order.column.render(self.alias())?;
        self.orders.retain(|(c, _)| *c != column);
        self.orders.insert(0, (column, order.direction));
        Ok(self)
    }

    pub fn paginate(&mut self, page: Pagination) -> &mut Self {
        self.page = Some(page);
        self
    }

    /// Whether `alias` is already taken in this statement.
    pub(crate) fn has_alias(&self, alias: &str) -> bool {
        alias == self.alias()
            || self.joins.iter().any(|j| j.alias == alias)
            || self.counts.iter().any(|c| c.alias == alias)
    }

    /// Metadata for the entity reachable under `alias`.
    pub(crate) fn meta_for(&self, alias: &str) -> Option<EntityMeta> {
        if alias == self.alias() {
            return Some(self.meta);
        }
        self.joins.iter().find(|j| j.alias == alias).map(|j| j.target)
    }

    fn has_to_many(&self) -> bool {
        self.joins.iter().any(|j| j.cardinality == Cardinality::Many)
    }

    /// Quoted root primary-key columns.
    fn key_columns(&self) -> EngineResult<Vec<String>> {
        let alias = quote_ident(self.alias())?;
        self.meta
            .primary_key
            .iter()
            .map(|pk| Ok(format!("{alias}.{}", quote_ident(pk)?)))
            .collect()
    }

    fn order_clause(&self) -> String {
        self.orders
            .iter()
            .map(|(c, d)| format!("{c} {}", d.keyword()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// FROM, JOINs and WHERE shared by every statement this context renders.
    fn base_statement(&self) -> EngineResult<SelectStatement> {
        let mut query = Query::select();
        query.from_as(Alias::new(self.meta.table), Alias::new(self.alias()));

        for join in &self.joins {
            let join_type = match join.style {
                JoinStyle::Left => sea_query::JoinType::LeftJoin,
                JoinStyle::Inner => sea_query::JoinType::InnerJoin,
            };
            query.join_as(
                join_type,
                Alias::new(join.target.table),
                Alias::new(&join.alias),
                bind_named(&join.on, self.params())?,
            );
        }

        if let Some(predicate) = self.predicate() {
            // Parenthesized so later AND-ed filters cannot bind into a trailing OR.
            query.and_where(bind_named(&format!("({predicate})"), self.params())?);
        }

        Ok(query)
    }

    /// Render the page-fetching statement.
    ///
    /// Selects one `jsonb` column per alias plus one `bigint` per count.
    pub fn render_select(&self) -> EngineResult<String> {
        let mut query = self.base_statement()?;

        query.expr_as(
            Expr::cust(format!("to_jsonb({}.*)", quote_ident(self.alias())?)),
            Alias::new(self.alias()),
        );
        for join in &self.joins {
            query.expr_as(
                Expr::cust(format!("to_jsonb({}.*)", quote_ident(&join.alias)?)),
                Alias::new(&join.alias),
            );
        }
        for count in &self.counts {
            query.expr_as(
                bind_named(&count.subquery, self.params())?,
                Alias::new(&count.alias),
            );
        }

        for (column, direction) in &self.orders {
            query.order_by_expr(Expr::cust(column.clone()), (*direction).into());
        }

        if let Some(page) = self.page {
            if self.has_to_many() {
                // Joined children multiply rows; page over root keys instead.
                let keys = self.key_columns()?.join(", ");
                query.and_where(Expr::cust(format!("({keys}) IN ({})", self.render_page_keys(page)?)));
            } else {
                query.limit(u64::from(page.limit));
                query.offset(page.offset());
            }
        }

        Ok(query.to_string(PostgresQueryBuilder))
    }

    /// Root keys of the requested page, in first-appearance order.
    fn render_page_keys(&self, page: Pagination) -> EngineResult<String> {
        let mut inner = self.base_statement()?;
        let keys = self.key_columns()?;
        let mut outer = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let name = format!("__k{i}");
            inner.expr_as(Expr::cust(key.clone()), Alias::new(&name));
            outer.push(format!("\"__page\".\"{name}\""));
        }
        inner.expr_as(
            Expr::cust(format!("ROW_NUMBER() OVER (ORDER BY {})", self.window_order())),
            Alias::new("__rn"),
        );
        let outer = outer.join(", ");

        Ok(format!(
            "SELECT {outer} FROM ({}) AS \"__page\" GROUP BY {outer} ORDER BY MIN(\"__page\".\"__rn\") LIMIT {} OFFSET {}",
            inner.to_string(PostgresQueryBuilder),
            page.limit,
            page.offset()
        ))
    }

    fn window_order(&self) -> String {
        if self.orders.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            self.order_clause()
        }
    }

    /// Render the statement counting matching root rows.
    pub fn render_count(&self) -> EngineResult<String> {
        let mut query = self.base_statement()?;
        if self.has_to_many() {
            query.distinct();
            for key in self.key_columns()? {
                query.expr(Expr::cust(key));
            }
            return Ok(format!(
                "SELECT COUNT(*) FROM ({}) AS \"__count\"",
                query.to_string(PostgresQueryBuilder)
            ));
        }
        query.expr(Expr::cust("COUNT(*)"));
        Ok(query.to_string(PostgresQueryBuilder))
    }
}

/// Rewrite named placeholders to positional markers and attach their values.
///
/// `:name` binds one value; `(:...name)` expands a sequence into a
/// parenthesized list. Quoted text and `::` casts are left alone.
pub(crate) fn bind_named(sql: &str, params: &Params) -> EngineResult<SimpleExpr> {
    let (text, values) = rewrite_named(sql, params)?;
    if values.is_empty() {
        return Ok(Expr::cust(text));
    }
    Ok(Expr::cust_with_values(text, values))
}

fn rewrite_named(sql: &str, params: &Params) -> EngineResult<(String, Vec<sea_query::Value>)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' => {
                let spread = chars[i + 1..].starts_with(&['.', '.', '.']);
                let start = if spread { i + 4 } else { i + 1 };
                let end = start
                    + chars[start..]
                        .iter()
                        .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                        .count();
                if end == start {
                    out.push(c);
                    i += 1;
                    continue;
                }
                let name: String = chars[start..end].iter().collect();
                let value = params
                    .get(&name)
                    .ok_or_else(|| QueryError::config(format!("unbound parameter :{name}")))?;
                if spread {
                    let items = match value {
                        Value::Array(items) => items.as_slice(),
                        other => std::slice::from_ref(other),
                    };
                    let markers: Vec<String> = items
                        .iter()
                        .map(|item| {
                            values.push(to_sql_value(item));
                            format!("${}", values.len())
                        })
                        .collect();
                    out.push_str(&markers.join(", "));
                } else {
                    values.push(to_sql_value(value));
                    out.push_str(&format!("${}", values.len()));
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((out, values))
}

/// Convert a JSON parameter into a sea-query value.
pub(crate) fn to_sql_value(value: &Value) -> sea_query::Value {
    match value {
        Value::Null => sea_query::Value::from(None::<String>),
        Value::Bool(b) => sea_query::Value::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => sea_query::Value::from(i),
            None => sea_query::Value::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => sea_query::Value::from(s.clone()),
        // Arrays/objects: bind as JSON text
        other => sea_query::Value::from(other.to_string()),
    }
}

/// Convert a JSON field into a written column value.
///
/// Arrays of scalars become `ARRAY[...]`, with `'{}'` for an empty one.
/// Objects and arrays holding objects or arrays stay JSON text.
pub(crate) fn to_column_expr(value: &Value) -> SimpleExpr {
    match value {
        Value::Array(items) if items.is_empty() => Expr::cust("'{}'"),
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => {
            let markers: Vec<String> = (1..=items.len()).map(|i| format!("${i}")).collect();
            Expr::cust_with_values(
                format!("ARRAY[{}]", markers.join(", ")),
                items.iter().map(to_sql_value),
            )
        }
        other => SimpleExpr::Value(to_sql_value(other)),
    }
}
