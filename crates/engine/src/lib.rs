//! Quarry query engine.
//!
//! Compiles filter trees, relation specs, free-text searches and paging
//! requests into PostgreSQL statements, and exposes them through an
//! entity-bound [`Repository`].

pub mod condition;
pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
mod hydrate;
pub mod operator;
pub mod pagination;
pub mod relation;
pub mod repository;
pub mod search;

pub use condition::{ColumnRef, Combinator, Condition, Group, Params, Predicate, WhereBuilder};
pub use config::EngineConfig;
pub use context::SelectContext;
pub use entity::{Cardinality, Entity, EntityMeta, RelationDef};
pub use error::{EngineResult, QueryError, StoreErrorKind};
pub use operator::Operator;
pub use pagination::{OrderSpec, PaginatedResponse, Pagination, QueryDefaults, QueryResult, SortDirection};
pub use relation::{JoinKind, RelationSpec};
pub use repository::{FindManyParams, GetOneParams, Repository};
pub use search::{AssociationColumns, SearchPattern};
