//! sqlgate — fluent SQL query builder and multi-backend connection layer.
//!
//! Two halves:
//!
//! - a **query builder** compiling an in-memory query description into
//!   parameterized, dialect-correct SQL (MySQL, PostgreSQL, SQLite
//!   executing; Oracle render-only), with injection-safe identifier quoting
//!   and named-placeholder binding;
//! - a **connection layer** over backend-specific sqlx pools with
//!   read/write splitting, broken-link recovery, nested transactions via
//!   savepoints, distributed (XA) transactions and cache-backed lazy
//!   counters.
//!
//! ```no_run
//! use sqlgate::{ConnectionConfig, DbConfig, DbManager};
//!
//! # async fn demo() -> sqlgate::Result<()> {
//! let manager = DbManager::new(DbConfig::single(
//!     "main",
//!     ConnectionConfig::new("sqlite:app.db"),
//! ));
//!
//! let users = manager
//!     .table("user")
//!     .await?
//!     .where_eq("status", 1i64)
//!     .order("id desc")
//!     .limit(10)
//!     .select()
//!     .await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```
//!
//! Every connection and its transaction depth belong to one execution
//! context. The layer is async but spawns nothing and performs no internal
//! concurrency; callers that need parallelism run separate connections in
//! separate tasks.

pub mod builder;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod query;

pub use builder::condition::{CondValue, Logic, WhereItem, WhereNode, cond};
pub use builder::expr::{BindSet, BindType, BindValue, DataRow, DataValue, ParamStyle, Raw};
pub use builder::{MysqlBuilder, OracleBuilder, PgsqlBuilder, SqlBuilder, SqliteBuilder, builder_for};
pub use cache::{Cache, MemoryCache, TagScope};
pub use config::{ConnectionConfig, DbConfig, DbType, PoolOptions};
pub use connection::{Connection, FieldInfo, LazyWrite, Link, Row};
pub use error::{Error, Result};
pub use manager::DbManager;
pub use query::{Direction, JoinType, Lock, Query, QueryOptions};
