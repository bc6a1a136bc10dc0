//! Entity metadata the engine binds to.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A table-backed record type.
///
/// Rows are hydrated through `serde_json`, so relation and count fields the
/// caller wants to receive should be declared with `#[serde(default)]`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Table name; also the alias bare column references resolve against.
    const TABLE: &'static str;

    /// Primary-key column names.
    const PRIMARY_KEY: &'static [&'static str] = &["id"];

    /// Relations other queries may join through.
    const RELATIONS: &'static [RelationDef] = &[];
}

/// Whether a relation yields at most one row or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A named relation from one entity to another.
///
/// Joins on `"<alias>"."<foreign_column>" = "<parent>"."<local_column>"`.
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    /// Property name used in relation paths.
    pub name: &'static str,
    /// Metadata of the related entity.
    pub target: fn() -> EntityMeta,
    pub cardinality: Cardinality,
    /// Column on the owning side.
    pub local_column: &'static str,
    /// Column on the related side.
    pub foreign_column: &'static str,
}

/// Type-erased view of an [`Entity`]'s metadata.
#[derive(Debug, Clone, Copy)]
pub struct EntityMeta {
    pub table: &'static str,
    pub primary_key: &'static [&'static str],
    pub relations: &'static [RelationDef],
}

impl EntityMeta {
    /// Find a relation by property name.
    pub fn relation(&self, name: &str) -> Option<&'static RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Metadata for `E`; usable as a [`RelationDef::target`].
pub fn meta<E: Entity>() -> EntityMeta {
    EntityMeta {
        table: E::TABLE,
        primary_key: E::PRIMARY_KEY,
        relations: E::RELATIONS,
    }
}
