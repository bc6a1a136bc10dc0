#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Shared fixtures for database-backed tests.
//!
//! Every test gets its own transaction holding `TEMP` tables that are
//! dropped on commit; the transaction is never committed, so nothing
//! outlives the test. Tests pass `Some(&mut *fx.tx)` to every call, except
//! those exercising self-committed calls on [`LedgerEntry`]'s real table.
//! Without `DATABASE_URL` the fixture is `None` and the test returns early.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use quarry_engine::entity::meta;
use quarry_engine::{Cardinality, EngineConfig, Entity, RelationDef};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: i32,
    pub name: String,
}

impl Entity for Company {
    const TABLE: &'static str = "companies";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub status: String,
    pub company_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<Company>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<Vec<Post>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_count: Option<i64>,
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const RELATIONS: &'static [RelationDef] = &[
        RelationDef {
            name: "company",
            target: meta::<Company>,
            cardinality: Cardinality::One,
            local_column: "company_id",
            foreign_column: "id",
        },
        RelationDef {
            name: "posts",
            target: meta::<Post>,
            cardinality: Cardinality::Many,
            local_column: "id",
            foreign_column: "author_id",
        },
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i32,
    pub author_id: i32,
    pub title: String,
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

impl Entity for Post {
    const TABLE: &'static str = "posts";
    const RELATIONS: &'static [RelationDef] = &[RelationDef {
        name: "author",
        target: meta::<User>,
        cardinality: Cardinality::One,
        local_column: "author_id",
        foreign_column: "id",
    }];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i32,
    pub tags: Vec<String>,
}

impl Entity for Note {
    const TABLE: &'static str = "notes";
}

/// Row of a real (non-temporary) table, for calls that commit on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i32,
    pub label: String,
}

impl Entity for LedgerEntry {
    const TABLE: &'static str = "quarry_autocommit_entries";
}

/// Insert payload; `None` fields fall back to column defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub age: Option<i32>,
    pub status: Option<String>,
    pub company_id: Option<i32>,
}

const SCHEMA: &[&str] = &[
    "CREATE TEMP TABLE companies (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL
    ) ON COMMIT DROP",
    "CREATE TEMP TABLE users (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE,
        age INTEGER,
        status TEXT NOT NULL DEFAULT 'active',
        company_id INTEGER REFERENCES companies(id),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    ) ON COMMIT DROP",
    "CREATE TEMP TABLE posts (
        id SERIAL PRIMARY KEY,
        author_id INTEGER NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        published BOOLEAN NOT NULL DEFAULT false
    ) ON COMMIT DROP",
    "CREATE TEMP TABLE notes (
        id SERIAL PRIMARY KEY,
        tags TEXT[] NOT NULL DEFAULT '{}'
    ) ON COMMIT DROP",
];

/// Seed rows. Serial ids follow insertion order:
///
/// | id | name          | age | status   | company | posts (published) |
/// |----|---------------|-----|----------|---------|-------------------|
/// | 1  | foo bar qux   | 30  | active   | Acme    | 3 (1)             |
/// | 2  | bar only      | 42  | active   | Acme    | 1 (0)             |
/// | 3  | baz           | 142 | inactive | Globex  | 0                 |
/// | 4  | ada           | 25  | active   | -       | 2 (1)             |
/// | 5  | nobody foo    | 60  | active   | Globex  | 0                 |
const SEED: &[&str] = &[
    "INSERT INTO companies (name) VALUES ('Acme'), ('Globex')",
    "INSERT INTO users (name, email, age, status, company_id) VALUES
        ('foo bar qux', 'foo@example.com', 30, 'active', 1),
        ('bar only', 'bar@example.com', 42, 'active', 1),
        ('baz', NULL, 142, 'inactive', 2),
        ('ada', 'ada@example.com', 25, 'active', NULL),
        ('nobody foo', NULL, 60, 'active', 2)",
    "INSERT INTO posts (author_id, title, published) VALUES
        (1, 'first', true),
        (1, 'second', false),
        (1, 'third', false),
        (2, 'hello', false),
        (4, 'notes', true),
        (4, 'drafts', false)",
    "INSERT INTO notes (tags) VALUES ('{a,b}')",
];

pub struct Fixture {
    pub pool: PgPool,
    pub tx: Transaction<'static, Postgres>,
    pub config: EngineConfig,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open a pool and a seeded transaction, or `None` without a database.
pub async fn fixture() -> Option<Fixture> {
    dotenvy::dotenv().ok();
    init_tracing();

    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set; skipping database test");
        return None;
    }

    let config = EngineConfig::from_env().expect("Failed to load config");
    let pool = quarry_engine::db::create_pool(&config)
        .await
        .expect("Failed to connect to database");
    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    for statement in SCHEMA.iter().chain(SEED) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .expect("Failed to prepare fixture");
    }

    Some(Fixture { pool, tx, config })
}
