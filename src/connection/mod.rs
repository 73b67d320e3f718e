//! Connection layer.
//!
//! A [`Connection`] owns one write link and any number of replica links for
//! a logical backend, routes statements to the correct link (read/write
//! split, sticky master, open transaction), recovers broken links, fires the
//! listener hook after every executed statement and drives the lazy counter
//! protocol.
//!
//! Each connection and its transaction depth belong to one execution
//! context; the layer performs no internal concurrency and documents
//! single-owner links as a precondition, not something it enforces.

pub mod link;
mod transaction;

pub use link::{Link, LinkConn, Row};

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::builder::expr::{BindSet, BindValue, expand_placeholders};
use crate::builder::{SqlBuilder, builder_for};
use crate::cache::Cache;
use crate::config::{ConnectionConfig, DbType};
use crate::error::{Error, Result};

/// Statement listener: `(sql, runtime_secs, is_master)`. `is_master` is
/// `None` when the backend is not deployed in read/write-split mode.
pub type ListenerFn = dyn Fn(&str, f64, Option<bool>) + Send + Sync;

/// Listener registry shared between a manager and its connections.
#[derive(Default)]
pub struct Listeners {
    inner: StdRwLock<Vec<Box<ListenerFn>>>,
}

impl Listeners {
    pub fn add(&self, listener: Box<ListenerFn>) {
        self.inner.write().expect("listener lock poisoned").push(listener);
    }

    /// Invoke every listener; returns false when none is registered.
    fn notify(&self, sql: &str, runtime: f64, master: Option<bool>) -> bool {
        let listeners = self.inner.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(sql, runtime, master);
        }
        !listeners.is_empty()
    }
}

/// Outcome of a lazy counter call: still aggregating, persisted a nonzero
/// delta, or the window elapsed with a net-zero delta (nothing written).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LazyWrite {
    Pending,
    Written(f64),
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyOp {
    Inc,
    Dec,
}

/// Column description returned by [`Connection::table_fields`].
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub type_name: String,
    pub notnull: bool,
    pub default: Option<String>,
    pub primary: bool,
}

#[derive(Default)]
struct LinkSet {
    write: Option<Link>,
    reads: Vec<Option<Link>>,
}

pub(crate) struct TransState {
    pub(crate) depth: u32,
    pub(crate) conn: Option<LinkConn>,
    pub(crate) xa: Option<String>,
}

/// One logical backend connection.
pub struct Connection {
    name: String,
    config: ConnectionConfig,
    db_type: DbType,
    links: Mutex<LinkSet>,
    read_cursor: AtomicUsize,
    read_master: AtomicBool,
    pub(crate) trans: Mutex<TransState>,
    listeners: Arc<Listeners>,
    cache: Option<Arc<dyn Cache>>,
    last_sql: StdMutex<String>,
    sql_log: StdMutex<Vec<String>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        name: &str,
        config: ConnectionConfig,
        cache: Option<Arc<dyn Cache>>,
        listeners: Arc<Listeners>,
    ) -> Result<Self> {
        let db_type = config.db_type()?;
        if db_type == DbType::Oracle {
            return Err(Error::config(
                "oracle is a render-only dialect; no executing connector",
            ));
        }
        let reads = (0..config.replicas.len()).map(|_| None).collect();
        Ok(Self {
            name: name.to_string(),
            config,
            db_type,
            links: Mutex::new(LinkSet {
                write: None,
                reads,
            }),
            read_cursor: AtomicUsize::new(0),
            read_master: AtomicBool::new(false),
            trans: Mutex::new(TransState {
                depth: 0,
                conn: None,
                xa: None,
            }),
            listeners,
            cache,
            last_sql: StdMutex::new(String::new()),
            sql_log: StdMutex::new(Vec::new()),
        })
    }

    /// Standalone connection, outside any manager.
    pub fn open(name: &str, config: ConnectionConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(
            name,
            config,
            None,
            Arc::new(Listeners::default()),
        )?))
    }

    /// Standalone connection with a cache for lazy counters and query
    /// caching.
    pub fn open_with_cache(
        name: &str,
        config: ConnectionConfig,
        cache: Arc<dyn Cache>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(
            name,
            config,
            Some(cache),
            Arc::new(Listeners::default()),
        )?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub fn builder(&self) -> &'static dyn SqlBuilder {
        builder_for(self.db_type)
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Text of the most recently executed statement.
    pub fn last_sql(&self) -> String {
        self.last_sql.lock().expect("log lock poisoned").clone()
    }

    /// Buffered statement traces. Populated only while no listener is
    /// registered.
    pub fn sql_log(&self) -> Vec<String> {
        self.sql_log.lock().expect("log lock poisoned").clone()
    }

    // ------------------------------------------------------------------
    // Link management
    // ------------------------------------------------------------------

    async fn write_link(&self) -> Result<Link> {
        let mut links = self.links.lock().await;
        if let Some(link) = &links.write {
            return Ok(link.clone());
        }
        let link = Link::connect(&self.config, &self.config.url).await?;
        links.write = Some(link.clone());
        Ok(link)
    }

    /// Replica link for a plain read, round-robin over the configured
    /// replicas. Falls back to the master when not deployed in split mode or
    /// when the sticky master flag is set.
    async fn read_link(&self) -> Result<(Link, bool)> {
        if !self.config.is_deploy() || self.read_master.load(Ordering::Relaxed) {
            return Ok((self.write_link().await?, true));
        }
        let count = self.config.replicas.len();
        let idx = self.read_cursor.fetch_add(1, Ordering::Relaxed) % count;
        let mut links = self.links.lock().await;
        if let Some(link) = &links.reads[idx] {
            return Ok((link.clone(), false));
        }
        let link = Link::connect(&self.config, &self.config.replicas[idx]).await?;
        links.reads[idx] = Some(link.clone());
        Ok((link, false))
    }

    /// Discard every live link after a broken connection.
    async fn reset_links(&self) {
        let mut links = self.links.lock().await;
        if let Some(link) = links.write.take() {
            link.close().await;
        }
        for slot in links.reads.iter_mut() {
            if let Some(link) = slot.take() {
                link.close().await;
            }
        }
        warn!(connection = %self.name, "links discarded after broken connection");
    }

    /// Tear down all links and any open transaction. The transaction, if
    /// one was open, is lost.
    pub async fn close(&self) {
        {
            let mut st = self.trans.lock().await;
            st.conn = None;
            st.depth = 0;
            st.xa = None;
        }
        self.reset_links().await;
        debug!(connection = %self.name, "connection closed");
    }

    // ------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------

    /// Run a read statement with named binds.
    pub async fn query_bound(
        &self,
        sql: &str,
        binds: &BindSet,
        force_master: bool,
    ) -> Result<Vec<Row>> {
        let (expanded, params) =
            expand_placeholders(sql, binds, self.builder().param_style())?;
        self.run_fetch(&expanded, &params, force_master).await
    }

    /// Run a write statement with named binds, returning affected rows.
    pub async fn execute_bound(&self, sql: &str, binds: &BindSet) -> Result<u64> {
        let (expanded, params) =
            expand_placeholders(sql, binds, self.builder().param_style())?;
        self.run_execute(&expanded, &params).await
    }

    /// Run a plain SQL read (no bindings).
    pub async fn query_sql(&self, sql: &str) -> Result<Vec<Row>> {
        self.run_fetch(sql, &[], false).await
    }

    /// Run a plain SQL statement (no bindings).
    pub async fn execute_sql(&self, sql: &str) -> Result<u64> {
        self.run_execute(sql, &[]).await
    }

    async fn run_fetch(
        &self,
        sql: &str,
        params: &[BindValue],
        force_master: bool,
    ) -> Result<Vec<Row>> {
        // An open transaction pins every statement to its session.
        {
            let mut st = self.trans.lock().await;
            if st.depth > 0 {
                let started = Instant::now();
                let conn = st
                    .conn
                    .as_mut()
                    .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                let result = conn.fetch(sql, params).await;
                drop(st);
                return match result {
                    Ok(rows) => {
                        self.trigger(sql, started.elapsed(), Some(true));
                        Ok(rows)
                    }
                    Err(e) => Err(self.map_statement_error(e, sql, params)),
                };
            }
        }

        let use_master = force_master || !self.config.is_deploy();
        let (link, is_master) = if use_master {
            (self.write_link().await?, true)
        } else {
            self.read_link().await?
        };

        let started = Instant::now();
        match link.fetch(sql, params).await {
            Ok(rows) => {
                self.trigger(sql, started.elapsed(), Some(is_master));
                Ok(rows)
            }
            Err(e) if self.should_reconnect(&e) => {
                warn!(connection = %self.name, error = %e, "retrying on a fresh link");
                self.reset_links().await;
                let (link, is_master) = if use_master {
                    (self.write_link().await?, true)
                } else {
                    self.read_link().await?
                };
                let started = Instant::now();
                match link.fetch(sql, params).await {
                    Ok(rows) => {
                        self.trigger(sql, started.elapsed(), Some(is_master));
                        Ok(rows)
                    }
                    Err(e) => Err(self.map_statement_error(e, sql, params)),
                }
            }
            Err(e) => Err(self.map_statement_error(e, sql, params)),
        }
    }

    async fn run_execute(&self, sql: &str, params: &[BindValue]) -> Result<u64> {
        {
            let mut st = self.trans.lock().await;
            if st.depth > 0 {
                let started = Instant::now();
                let conn = st
                    .conn
                    .as_mut()
                    .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                let result = conn.execute(sql, params).await;
                drop(st);
                return match result {
                    Ok(affected) => {
                        self.trigger(sql, started.elapsed(), Some(true));
                        Ok(affected)
                    }
                    Err(e) => Err(self.map_statement_error(e, sql, params)),
                };
            }
        }

        let link = self.write_link().await?;
        let started = Instant::now();
        let outcome = match link.execute(sql, params).await {
            Ok(affected) => Ok(affected),
            Err(e) if self.should_reconnect(&e) => {
                warn!(connection = %self.name, error = %e, "retrying on a fresh link");
                self.reset_links().await;
                let link = self.write_link().await?;
                let started = Instant::now();
                match link.execute(sql, params).await {
                    Ok(affected) => {
                        self.trigger(sql, started.elapsed(), Some(true));
                        self.after_write();
                        return Ok(affected);
                    }
                    Err(e) => Err(self.map_statement_error(e, sql, params)),
                }
            }
            Err(e) => Err(self.map_statement_error(e, sql, params)),
        };

        match outcome {
            Ok(affected) => {
                self.trigger(sql, started.elapsed(), Some(true));
                self.after_write();
                Ok(affected)
            }
            Err(e) => Err(e),
        }
    }

    /// After a write in split mode, later reads on this logical connection
    /// stick to the master.
    fn after_write(&self) {
        if self.config.read_master && self.config.is_deploy() {
            self.read_master.store(true, Ordering::Relaxed);
        }
    }

    fn is_break_error(&self, err: &sqlx::Error) -> bool {
        self.config.matches_break(&err.to_string())
    }

    fn should_reconnect(&self, err: &sqlx::Error) -> bool {
        self.config.break_reconnect && self.is_break_error(err)
    }

    fn map_statement_error(&self, err: sqlx::Error, sql: &str, params: &[BindValue]) -> Error {
        if self.is_break_error(&err) {
            Error::broken(err.to_string())
        } else {
            Error::from_sqlx(err, sql, params)
        }
    }

    fn trigger(&self, sql: &str, elapsed: Duration, master: Option<bool>) {
        let runtime = elapsed.as_secs_f64();
        let master = if self.config.is_deploy() { master } else { None };
        *self.last_sql.lock().expect("log lock poisoned") = sql.to_string();
        let notified = self.listeners.notify(sql, runtime, master);
        if !notified {
            self.sql_log
                .lock()
                .expect("log lock poisoned")
                .push(format!("[ {runtime:.6}s ] {sql}"));
        }
        debug!(connection = %self.name, sql = %sql, runtime = %format!("{runtime:.6}"), "sql executed");
    }

    // ------------------------------------------------------------------
    // Session / schema
    // ------------------------------------------------------------------

    /// Backend session id of the link a read would currently use; `None`
    /// for backends without a session concept.
    pub async fn session_id(&self) -> Result<Option<i64>> {
        let sql = match self.db_type {
            DbType::Mysql => "SELECT CONNECTION_ID() AS session_id",
            DbType::Pgsql => "SELECT pg_backend_pid() AS session_id",
            DbType::Sqlite | DbType::Oracle => return Ok(None),
        };
        let rows = self.run_fetch(sql, &[], true).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("session_id"))
            .and_then(|v| v.as_i64().or_else(|| v.as_u64().map(|u| u as i64))))
    }

    /// Column descriptions for a table.
    pub async fn table_fields(&self, table: &str) -> Result<Vec<FieldInfo>> {
        let table = safe_table_ident(table)?;
        match self.db_type {
            DbType::Mysql => {
                let rows = self
                    .run_fetch(&format!("SHOW FULL COLUMNS FROM `{table}`"), &[], true)
                    .await?;
                Ok(rows
                    .iter()
                    .map(|row| FieldInfo {
                        name: str_field(row, "Field"),
                        type_name: str_field(row, "Type"),
                        notnull: str_field(row, "Null").eq_ignore_ascii_case("no"),
                        default: opt_str_field(row, "Default"),
                        primary: str_field(row, "Key").eq_ignore_ascii_case("pri"),
                    })
                    .collect())
            }
            DbType::Pgsql => {
                let mut binds = BindSet::new();
                let name = binds.bind(
                    BindValue::Str(table),
                    crate::builder::expr::BindType::Str,
                );
                let sql = format!(
                    "SELECT column_name, data_type, is_nullable, column_default \
                     FROM information_schema.columns WHERE table_name = :{name} \
                     ORDER BY ordinal_position"
                );
                let rows = self.query_bound(&sql, &binds, true).await?;
                Ok(rows
                    .iter()
                    .map(|row| FieldInfo {
                        name: str_field(row, "column_name"),
                        type_name: str_field(row, "data_type"),
                        notnull: str_field(row, "is_nullable").eq_ignore_ascii_case("no"),
                        default: opt_str_field(row, "column_default"),
                        primary: false,
                    })
                    .collect())
            }
            DbType::Sqlite => {
                let rows = self
                    .run_fetch(&format!("PRAGMA table_info('{table}')"), &[], true)
                    .await?;
                Ok(rows
                    .iter()
                    .map(|row| FieldInfo {
                        name: str_field(row, "name"),
                        type_name: str_field(row, "type"),
                        notnull: int_field(row, "notnull") == 1,
                        default: opt_str_field(row, "dflt_value"),
                        primary: int_field(row, "pk") == 1,
                    })
                    .collect())
            }
            DbType::Oracle => Err(Error::config(
                "oracle is a render-only dialect; no executing connector",
            )),
        }
    }

    /// Table names of the connected database.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let sql = match self.db_type {
            DbType::Mysql => "SHOW TABLES",
            DbType::Pgsql => {
                "SELECT tablename AS name FROM pg_tables WHERE schemaname = 'public' ORDER BY tablename"
            }
            DbType::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            DbType::Oracle => {
                return Err(Error::config(
                    "oracle is a render-only dialect; no executing connector",
                ));
            }
        };
        let rows = self.run_fetch(sql, &[], true).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.into_iter()
                    .next()
                    .and_then(|(_, v)| v.as_str().map(str::to_string))
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Lazy counters
    // ------------------------------------------------------------------

    /// Lazy counter step. Without a cache the delta is written through
    /// immediately. With one, the first call inside the delay window stamps
    /// the start time and aggregates; calls after the window flush the
    /// accumulated delta and clear the counter.
    pub(crate) fn lazy_write(
        &self,
        op: LazyOp,
        guid: &str,
        step: f64,
        window: Duration,
    ) -> LazyWrite {
        let signed = match op {
            LazyOp::Inc => step,
            LazyOp::Dec => -step,
        };
        let Some(cache) = &self.cache else {
            return LazyWrite::Written(signed);
        };

        let time_key = format!("{guid}_time");
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        if !cache.has(&time_key) {
            cache.set(&time_key, JsonValue::from(now), None);
            cache.inc(guid, signed);
            return LazyWrite::Pending;
        }

        let started = cache
            .get(&time_key)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        if now - started >= window.as_secs_f64() {
            let total = cache.inc(guid, signed);
            cache.delete(guid);
            cache.delete(&time_key);
            if total == 0.0 {
                LazyWrite::Zero
            } else {
                LazyWrite::Written(total)
            }
        } else {
            cache.inc(guid, signed);
            LazyWrite::Pending
        }
    }
}

/// First whitespace-separated token, restricted to identifier characters.
fn safe_table_ident(table: &str) -> Result<String> {
    let token = table.split_whitespace().next().unwrap_or("");
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(Error::condition(format!("not support table: {table}")));
    }
    Ok(token.to_string())
}

fn str_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn opt_str_field(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn int_field(row: &Row, key: &str) -> i64 {
    row.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
}
