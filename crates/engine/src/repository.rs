//! Entity-bound query façade.
//!
//! A [`Repository`] holds the pool and the entity metadata; every call
//! builds a fresh [`SelectContext`], so one repository can serve concurrent
//! tasks. Each public method takes an optional connection: pass a
//! transaction (`&mut *tx`) to join it, or `None` to run in a transaction
//! opened and committed by the call.

use sea_query::{Alias, Expr, PostgresQueryBuilder, Query, SimpleExpr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::marker::PhantomData;

use crate::condition::{Condition, Predicate, quote_ident};
use crate::context::{SelectContext, to_column_expr, to_sql_value};
use crate::entity::{Entity, EntityMeta, meta};
use crate::error::{EngineResult, QueryError};
use crate::hydrate::hydrate;
use crate::operator::Operator;
use crate::pagination::{OrderSpec, Pagination, QueryDefaults, QueryResult};
use crate::relation::RelationSpec;
use crate::search::SearchPattern;

/// Arguments of [`Repository::find_many`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FindManyParams {
    pub conditions: Vec<Condition>,
    pub relations: Vec<RelationSpec>,
    /// Page 1 of the repository's default size when omitted.
    pub pagination: Option<Pagination>,
    pub orders: Vec<OrderSpec>,
}

/// Arguments of [`Repository::get_one`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetOneParams {
    pub conditions: Vec<Condition>,
    pub relations: Vec<RelationSpec>,
}

/// The caller's connection, or a transaction owned by one call.
enum Scope<'c> {
    Caller(&'c mut PgConnection),
    Owned(Transaction<'static, Postgres>),
}

impl<'c> Scope<'c> {
    async fn open(pool: &PgPool, conn: Option<&'c mut PgConnection>) -> EngineResult<Self> {
        Ok(match conn {
            Some(conn) => Scope::Caller(conn),
            None => Scope::Owned(pool.begin().await?),
        })
    }

    fn conn(&mut self) -> &mut PgConnection {
        match self {
            Scope::Caller(conn) => &mut **conn,
            Scope::Owned(tx) => &mut **tx,
        }
    }

    /// Commit an owned transaction; a caller's is left alone.
    async fn finish(self) -> EngineResult<()> {
        if let Scope::Owned(tx) = self {
            tx.commit().await?;
        }
        Ok(())
    }
}

/// Query façade bound to one entity type.
pub struct Repository<T: Entity> {
    pool: PgPool,
    meta: EntityMeta,
    defaults: QueryDefaults,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            meta: self.meta,
            defaults: self.defaults,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(pool: PgPool) -> Self {
        Self::with_defaults(pool, QueryDefaults::default())
    }

    /// Use `defaults` when a call omits pagination.
    pub fn with_defaults(pool: PgPool, defaults: QueryDefaults) -> Self {
        Self {
            pool,
            meta: meta::<T>(),
            defaults,
            _entity: PhantomData,
        }
    }

    /// Alias bare column references resolve against.
    pub fn alias(&self) -> &'static str {
        self.meta.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// One page of matching records plus the unpaged total.
    pub async fn find_many(
        &self,
        params: FindManyParams,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<QueryResult<T>> {
        let mut scope = Scope::open(&self.pool, conn).await?;
        let result = self.find_many_on(&params, scope.conn()).await?;
        scope.finish().await?;
        Ok(result)
    }

    /// The first record matching a non-empty condition list.
    pub async fn get_one(
        &self,
        params: GetOneParams,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<T> {
        let mut scope = Scope::open(&self.pool, conn).await?;
        let value = self
            .find_one_value(&params.conditions, &params.relations, scope.conn())
            .await?;
        scope.finish().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Re-fetch `entity` by primary key together with `relations`.
    pub async fn get_relations(
        &self,
        entity: &T,
        relations: Vec<RelationSpec>,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<T> {
        let Value::Object(row) = serde_json::to_value(entity)? else {
            return Err(QueryError::config("entity must serialize to an object"));
        };
        let conditions: Vec<Condition> = self
            .meta
            .primary_key
            .iter()
            .map(|pk| {
                let value = row.get(*pk).cloned().unwrap_or(Value::Null);
                Condition::from(Predicate::and(*pk, Operator::Equal, value))
            })
            .collect();
        self.get_one(GetOneParams { conditions, relations }, conn)
            .await
    }

    /// Insert a row from `data`; `null` fields are left to column defaults.
    pub async fn create_one(
        &self,
        data: impl Serialize,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<T> {
        let Value::Object(data) = serde_json::to_value(data)? else {
            return Err(QueryError::config("create data must be an object"));
        };

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in data.iter().filter(|(_, v)| !v.is_null()) {
            quote_ident(column)?;
            columns.push(Alias::new(column));
            values.push(to_column_expr(value));
        }

        let mut insert = Query::insert();
        insert.into_table(Alias::new(self.meta.table));
        if columns.is_empty() {
            insert.or_default_values();
        } else {
            insert.columns(columns);
            insert.values(values)?;
        }
        insert.returning_all();
        let sql = insert.to_string(PostgresQueryBuilder);

        let mut scope = Scope::open(&self.pool, conn).await?;
        let row = self.write_returning(&sql, scope.conn()).await?;
        scope.finish().await?;
        row.ok_or_else(|| self.not_found())
    }

    /// Shallow-merge `data` onto the one row matching `conditions`.
    ///
    /// Every supplied key is written; an explicit `null` clears the column.
    /// Returns the row as persisted.
    pub async fn update_one(
        &self,
        conditions: Vec<Condition>,
        data: impl Serialize,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<T> {
        let Value::Object(data) = serde_json::to_value(data)? else {
            return Err(QueryError::config("update data must be an object"));
        };

        let mut scope = Scope::open(&self.pool, conn).await?;
        let current = self.find_one_value(&conditions, &[], scope.conn()).await?;
        if data.is_empty() {
            scope.finish().await?;
            return Ok(serde_json::from_value(current)?);
        }

        let mut update = Query::update();
        update.table(Alias::new(self.meta.table));
        for (column, value) in &data {
            quote_ident(column)?;
            update.value(Alias::new(column), to_column_expr(value));
        }
        for key in self.key_filter(&current)? {
            update.and_where(key);
        }
        update.returning_all();
        let sql = update.to_string(PostgresQueryBuilder);

        let row = self.write_returning(&sql, scope.conn()).await?;
        scope.finish().await?;
        row.ok_or_else(|| self.not_found())
    }

    /// Delete the one row matching `conditions` and return it as it was.
    pub async fn remove_one(
        &self,
        conditions: Vec<Condition>,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<T> {
        let mut scope = Scope::open(&self.pool, conn).await?;
        let current = self.find_one_value(&conditions, &[], scope.conn()).await?;

        let mut delete = Query::delete();
        delete.from_table(Alias::new(self.meta.table));
        for key in self.key_filter(&current)? {
            delete.and_where(key);
        }
        let sql = delete.to_string(PostgresQueryBuilder);
        tracing::debug!(entity = self.meta.table, sql = %sql, "remove_one");
        sqlx::query(&sql)
            .execute(&mut *scope.conn())
            .await
            .inspect_err(|e| self.log_store_failure(e))?;

        scope.finish().await?;
        Ok(serde_json::from_value(current)?)
    }

    /// [`find_many`](Self::find_many) narrowed by a free-text search.
    ///
    /// A blank search adds no filter.
    pub async fn search_with_pattern(
        &self,
        mut params: FindManyParams,
        pattern: &SearchPattern,
        conn: Option<&mut PgConnection>,
    ) -> EngineResult<QueryResult<T>> {
        if let Some(search) = pattern.compile() {
            params.conditions.push(search);
        }
        self.find_many(params, conn).await
    }

    fn not_found(&self) -> QueryError {
        tracing::debug!(entity = self.meta.table, "no matching row");
        QueryError::NotFound {
            entity: self.meta.table,
        }
    }

    fn log_store_failure(&self, err: &sqlx::Error) {
        tracing::warn!(entity = self.meta.table, error = %err, "statement rejected by store");
    }

    fn context(
        &self,
        conditions: &[Condition],
        relations: &[RelationSpec],
    ) -> EngineResult<SelectContext> {
        let mut ctx = SelectContext::new(self.meta);
        ctx.apply_conditions(conditions)?;
        ctx.apply_relations(relations)?;
        Ok(ctx)
    }

    async fn find_many_on(
        &self,
        params: &FindManyParams,
        conn: &mut PgConnection,
    ) -> EngineResult<QueryResult<T>> {
        let page = Pagination::resolve(params.pagination, self.defaults);
        let mut ctx = self.context(&params.conditions, &params.relations)?;
        // Relation orders were applied with their joins; the caller's
        // first order still leads.
        if let Some((first, rest)) = params.orders.split_first() {
            ctx.order_first(first)?;
            for order in rest {
                ctx.order_by(order)?;
            }
        }

        let count_sql = ctx.render_count()?;
        tracing::debug!(entity = self.meta.table, sql = %count_sql, "find_many count");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&mut *conn)
            .await
            .inspect_err(|e| self.log_store_failure(e))?;

        ctx.paginate(page);
        let records = self
            .fetch(&ctx, conn)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;

        Ok(QueryResult::new(
            records,
            u64::try_from(total).unwrap_or_default(),
            page.limit,
        ))
    }

    /// First hydrated match as JSON, or NotFound.
    async fn find_one_value(
        &self,
        conditions: &[Condition],
        relations: &[RelationSpec],
        conn: &mut PgConnection,
    ) -> EngineResult<Value> {
        let mut ctx = self.context(conditions, relations)?;
        if ctx.predicate().is_none() {
            return Err(QueryError::config("missing condition"));
        }
        ctx.paginate(Pagination::new(1, 1));
        self.fetch(&ctx, conn)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found())
    }

    async fn fetch(&self, ctx: &SelectContext, conn: &mut PgConnection) -> EngineResult<Vec<Value>> {
        let sql = ctx.render_select()?;
        tracing::debug!(entity = self.meta.table, sql = %sql, "select");
        let rows: Vec<Value> = sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
            .fetch_all(&mut *conn)
            .await
            .inspect_err(|e| self.log_store_failure(e))?;

        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Ok(hydrate(ctx, rows))
    }

    /// Run an INSERT/UPDATE ... RETURNING and decode the affected row.
    async fn write_returning(&self, sql: &str, conn: &mut PgConnection) -> EngineResult<Option<T>> {
        tracing::debug!(entity = self.meta.table, sql = %sql, "write");
        let row: Option<Value> = sqlx::query_scalar(&format!(
            "WITH affected AS ({sql}) SELECT row_to_json(affected) FROM affected"
        ))
        .fetch_optional(&mut *conn)
        .await
        .inspect_err(|e| self.log_store_failure(e))?;

        row.map(serde_json::from_value).transpose().map_err(Into::into)
    }

    /// Primary-key equality filters for a fetched row.
    fn key_filter(&self, row: &Value) -> EngineResult<Vec<SimpleExpr>> {
        let row: &Map<String, Value> = row
            .as_object()
            .ok_or_else(|| QueryError::config("row is not an object"))?;
        self.meta
            .primary_key
            .iter()
            .map(|pk| match row.get(*pk) {
                Some(value) if !value.is_null() => {
                    Ok(Expr::col(Alias::new(*pk)).eq(SimpleExpr::Value(to_sql_value(value))))
                }
                _ => Err(QueryError::config(format!(
                    "row has no value for key column '{pk}'"
                ))),
            })
            .collect()
    }
}
