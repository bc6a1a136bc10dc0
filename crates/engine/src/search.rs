//! Free-text search across direct and associated columns.
//!
//! A raw query such as `"foo bar, baz"` splits on commas into groups (ORed)
//! and each group on whitespace into terms (ANDed within one column). Every
//! column/group pair becomes one alternative; a row matches when any
//! alternative does.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::condition::{ColumnRef, Combinator, Condition, Predicate};
use crate::operator::Operator;

/// Columns of one associated entity, or of its own associations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AssociationColumns {
    Columns(Vec<String>),
    /// Nested association alias → columns.
    Nested(BTreeMap<String, Vec<String>>),
}

/// A search request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPattern {
    /// Raw user input.
    pub query: String,
    /// Columns of the searched entity.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Alias for `columns`; the bound entity's alias when absent.
    #[serde(default)]
    pub alias: Option<String>,
    /// Association alias → columns. Aliases must be joined by the query.
    #[serde(default)]
    pub associations: BTreeMap<String, AssociationColumns>,
    /// Columns matched by exact numeric equality, never by wildcard.
    /// Direct columns are named bare, associated ones `alias.column`.
    #[serde(default)]
    pub numeric_columns: Vec<String>,
}

impl SearchPattern {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn association<I, S>(mut self, alias: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.associations.insert(
            alias.into(),
            AssociationColumns::Columns(columns.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn numeric<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.numeric_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Comma-separated groups, each split into whitespace-separated terms.
    fn groups(&self) -> Vec<(&str, Vec<&str>)> {
        self.query
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(|g| (g, g.split_whitespace().collect()))
            .collect()
    }

    /// Every searched column as (reference, numeric-lookup key).
    fn targets(&self) -> Vec<(ColumnRef, String)> {
        let mut targets = Vec::new();
        for column in &self.columns {
            let reference = match &self.alias {
                Some(alias) => ColumnRef::qualified(alias, column),
                None => ColumnRef::from(column.as_str()),
            };
            targets.push((reference, column.clone()));
        }
        for (alias, columns) in &self.associations {
            match columns {
                AssociationColumns::Columns(columns) => {
                    for column in columns {
                        targets.push((ColumnRef::qualified(alias, column), format!("{alias}.{column}")));
                    }
                }
                AssociationColumns::Nested(nested) => {
                    for (nested_alias, columns) in nested {
                        for column in columns {
                            targets.push((
                                ColumnRef::qualified(nested_alias, column),
                                format!("{nested_alias}.{column}"),
                            ));
                        }
                    }
                }
            }
        }
        targets
    }

    /// Compile to one AND-attached group, or `None` when the query is blank.
    pub fn compile(&self) -> Option<Condition> {
        let groups = self.groups();
        if groups.is_empty() {
            return None;
        }

        let mut alternatives = Vec::new();
        for (column, key) in self.targets() {
            let numeric = self.numeric_columns.iter().any(|c| *c == key);
            for (group, terms) in &groups {
                let combinator = if alternatives.is_empty() {
                    Combinator::First
                } else {
                    Combinator::Or
                };
                if numeric {
                    // Whole group must be a number; otherwise this column sits out.
                    if let Some(number) = parse_number(group) {
                        alternatives.push(Condition::Predicate(
                            Predicate::new(combinator, column.clone(), Operator::Equal, number)
                                .with_param_name("search"),
                        ));
                    }
                    continue;
                }
                let matches = terms
                    .iter()
                    .enumerate()
                    .map(|(i, term)| {
                        let combinator = if i == 0 { Combinator::First } else { Combinator::And };
                        Condition::Predicate(
                            Predicate::new(combinator, column.clone(), Operator::Contains, *term)
                                .with_param_name("search"),
                        )
                    })
                    .collect();
                alternatives.push(Condition::group(combinator, matches));
            }
        }

        if alternatives.is_empty() {
            // Only numeric columns and no numeric group: nothing can match.
            return Some(Condition::raw(|qb| {
                qb.and_where("FALSE");
                Ok(())
            }));
        }
        Some(Condition::group(Combinator::And, alternatives))
    }
}

fn parse_number(group: &str) -> Option<Value> {
    if let Ok(i) = group.parse::<i64>() {
        return Some(Value::from(i));
    }
    group
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::from)
}
