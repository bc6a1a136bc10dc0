//! Relation specs and how they attach to a query context.

use serde::Deserialize;

use crate::condition::{Predicate, quote_ident};
use crate::context::{CountPlan, JoinPlan, JoinStyle, SelectContext};
use crate::error::{EngineResult, QueryError};
use crate::pagination::OrderSpec;

/// How a relation is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
    /// Only the number of related rows, exposed under the alias.
    Count,
}

/// A related entity to fetch alongside the primary rows.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationSpec {
    /// `relation` on the bound entity, or `parentAlias.relation`.
    pub path: String,
    /// Unique within one query.
    pub alias: String,
    #[serde(default)]
    pub kind: JoinKind,
    /// Extra flat predicate ANDed onto the join.
    #[serde(default)]
    pub join_condition: Option<Predicate>,
    #[serde(default)]
    pub order: Option<OrderSpec>,
}

impl RelationSpec {
    pub fn new(path: impl Into<String>, alias: impl Into<String>, kind: JoinKind) -> Self {
        Self {
            path: path.into(),
            alias: alias.into(),
            kind,
            join_condition: None,
            order: None,
        }
    }

    pub fn left(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(path, alias, JoinKind::Left)
    }

    pub fn inner(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(path, alias, JoinKind::Inner)
    }

    pub fn count(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::new(path, alias, JoinKind::Count)
    }

    pub fn on(mut self, predicate: Predicate) -> Self {
        self.join_condition = Some(predicate);
        self
    }

    pub fn ordered(mut self, order: OrderSpec) -> Self {
        self.order = Some(order);
        self
    }
}

impl SelectContext {
    /// Attach relations in order. Each relation's own order is applied
    /// right after its join.
    pub fn apply_relations(&mut self, relations: &[RelationSpec]) -> EngineResult<&mut Self> {
        for spec in relations {
            self.apply_relation(spec)?;
        }
        Ok(self)
    }

    fn apply_relation(&mut self, spec: &RelationSpec) -> EngineResult<()> {
        if self.has_alias(&spec.alias) {
            return Err(QueryError::config(format!(
                "alias '{}' is already used in this query",
                spec.alias
            )));
        }

        let (parent_alias, name) = match spec.path.split_once('.') {
            Some((parent, name)) => (parent.to_string(), name),
            None => (self.alias().to_string(), spec.path.as_str()),
        };
        let parent = self.meta_for(&parent_alias).ok_or_else(|| {
            QueryError::config(format!("unknown alias '{parent_alias}' in '{}'", spec.path))
        })?;
        let def = parent.relation(name).ok_or_else(|| {
            QueryError::config(format!("'{}' has no relation '{name}'", parent.table))
        })?;
        let target = (def.target)();

        let alias = quote_ident(&spec.alias)?;
        let mut on = format!(
            "{alias}.{} = {}.{}",
            quote_ident(def.foreign_column)?,
            quote_ident(&parent_alias)?,
            quote_ident(def.local_column)?
        );
        if let Some(predicate) = &spec.join_condition
            && let Some(extra) = predicate.compile(&mut self.filter, 0)?
        {
            on = format!("{on} AND {extra}");
        }

        match spec.kind {
            JoinKind::Count => self.counts.push(CountPlan {
                alias: spec.alias.clone(),
                parent_alias,
                subquery: format!(
                    "(SELECT COUNT(*) FROM {} AS {alias} WHERE {on})",
                    quote_ident(target.table)?
                ),
            }),
            JoinKind::Left | JoinKind::Inner => self.joins.push(JoinPlan {
                alias: spec.alias.clone(),
                parent_alias,
                cardinality: def.cardinality,
                style: if spec.kind == JoinKind::Inner {
                    JoinStyle::Inner
                } else {
                    JoinStyle::Left
                },
                target,
                on,
            }),
        }

        if let Some(order) = &spec.order {
            self.order_by(order)?;
        }

        Ok(())
    }
}
