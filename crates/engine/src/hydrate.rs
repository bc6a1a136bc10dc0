//! Assemble flat joined rows into nested JSON records.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::context::SelectContext;
use crate::entity::Cardinality;

struct Node<'a> {
    alias: &'a str,
    data: Map<String, Value>,
    /// Child node indices per join, by join position.
    children: Vec<Vec<usize>>,
}

/// Group `rows` by root primary key and nest every joined alias under its
/// parent. Each row maps alias → `jsonb` object (or `null`) and count
/// alias → integer. Root order is first appearance; children keep row order.
pub(crate) fn hydrate(ctx: &SelectContext, rows: Vec<Map<String, Value>>) -> Vec<Value> {
    let root = ctx.alias();
    let joins = &ctx.joins;
    let mut nodes: Vec<Node<'_>> = Vec::new();
    let mut roots = Vec::new();
    let mut root_index: HashMap<String, usize> = HashMap::new();
    let mut child_index: HashMap<(usize, usize, String), usize> = HashMap::new();

    for mut row in rows {
        let Some(Value::Object(data)) = row.remove(root) else {
            continue;
        };
        let Some(key) = identity(&data, ctx.meta.primary_key) else {
            continue;
        };
        let root_node = match root_index.entry(key) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                nodes.push(Node {
                    alias: root,
                    data,
                    children: vec![Vec::new(); joins.len()],
                });
                roots.push(nodes.len() - 1);
                *e.insert(nodes.len() - 1)
            }
        };

        let mut in_row: HashMap<&str, usize> = HashMap::from([(root, root_node)]);
        for (j, join) in joins.iter().enumerate() {
            let Some(&parent) = in_row.get(join.parent_alias.as_str()) else {
                continue;
            };
            let Some(Value::Object(data)) = row.remove(&join.alias) else {
                continue;
            };
            // Outer-join misses can surface as an all-null object.
            let Some(key) = identity(&data, join.target.primary_key) else {
                continue;
            };
            let child = match child_index.entry((parent, j, key)) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    nodes.push(Node {
                        alias: &join.alias,
                        data,
                        children: vec![Vec::new(); joins.len()],
                    });
                    let idx = nodes.len() - 1;
                    nodes[parent].children[j].push(idx);
                    *e.insert(idx)
                }
            };
            in_row.insert(&join.alias, child);
        }

        for count in &ctx.counts {
            if let Some(&owner) = in_row.get(count.parent_alias.as_str()) {
                let n = match row.remove(&count.alias) {
                    Some(Value::Null) | None => Value::from(0),
                    Some(n) => n,
                };
                nodes[owner].data.insert(count.alias.clone(), n);
            }
        }
    }

    roots
        .into_iter()
        .map(|idx| render(&mut nodes, ctx, idx))
        .collect()
}

fn render(nodes: &mut [Node<'_>], ctx: &SelectContext, idx: usize) -> Value {
    let alias = nodes[idx].alias;
    let mut data = std::mem::take(&mut nodes[idx].data);
    let children = std::mem::take(&mut nodes[idx].children);

    for (j, join) in ctx.joins.iter().enumerate() {
        if join.parent_alias != alias {
            continue;
        }
        let items: Vec<Value> = children[j]
            .iter()
            .map(|&child| render(nodes, ctx, child))
            .collect();
        let value = match join.cardinality {
            Cardinality::One => items.into_iter().next().unwrap_or(Value::Null),
            Cardinality::Many => Value::Array(items),
        };
        data.insert(join.alias.clone(), value);
    }

    Value::Object(data)
}

/// Identity of a row object by its key columns; `None` when all are null.
fn identity(data: &Map<String, Value>, primary_key: &[&str]) -> Option<String> {
    let parts: Vec<Value> = primary_key
        .iter()
        .map(|column| data.get(*column).cloned().unwrap_or(Value::Null))
        .collect();
    if parts.iter().all(Value::is_null) {
        return None;
    }
    Some(Value::Array(parts).to_string())
}
