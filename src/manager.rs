//! Connection manager.
//!
//! A [`DbManager`] instance owns a keyed map of live connections — there is
//! no ambient global state. Identical connection names reuse the cached
//! instance; `force` returns a fresh, uncached one. The manager also carries
//! the listener registry and the cache handle shared with its connections,
//! and coordinates distributed transactions across them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::DbConfig;
use crate::connection::{Connection, Listeners};
use crate::error::Result;
use crate::query::Query;

pub struct DbManager {
    config: DbConfig,
    instances: RwLock<HashMap<String, Arc<Connection>>>,
    cache: Option<Arc<dyn Cache>>,
    listeners: Arc<Listeners>,
}

impl DbManager {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
            cache: None,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Attach a cache used for query-result caching and lazy counters.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Connection by name (the configured default when `None`). Cached per
    /// name; `force` builds a fresh instance that bypasses the cache.
    pub async fn connect(&self, name: Option<&str>, force: bool) -> Result<Arc<Connection>> {
        let name = name.unwrap_or(&self.config.default).to_string();

        if !force {
            let instances = self.instances.read().await;
            if let Some(conn) = instances.get(&name) {
                return Ok(conn.clone());
            }
        }

        let config = self.config.connection(&name)?.clone();
        let conn = Arc::new(Connection::new(
            &name,
            config,
            self.cache.clone(),
            self.listeners.clone(),
        )?);
        debug!(connection = %name, force = force, "connection instance created");

        if force {
            return Ok(conn);
        }

        let mut instances = self.instances.write().await;
        // Another context may have registered the name meanwhile; reuse its
        // instance so one name maps to one cached link set.
        if let Some(existing) = instances.get(&name) {
            return Ok(existing.clone());
        }
        instances.insert(name, conn.clone());
        Ok(conn)
    }

    /// Query on the default connection.
    pub async fn table(&self, table: &str) -> Result<Query> {
        let conn = self.connect(None, false).await?;
        Ok(Query::table_on(&conn, table))
    }

    /// Register a statement listener, invoked after every executed
    /// statement of every connection of this manager.
    pub fn listen(&self, callback: impl Fn(&str, f64, Option<bool>) + Send + Sync + 'static) {
        self.listeners.add(Box::new(callback));
    }

    /// Close every cached connection and drop the instances.
    pub async fn close_all(&self) {
        let mut instances = self.instances.write().await;
        for (name, conn) in instances.drain() {
            info!(connection = %name, "closing connection");
            conn.close().await;
        }
    }

    /// Run a closure under one global transaction spanning `participants`.
    ///
    /// Every participant prepares before any commits; a failed prepare (or
    /// a failed closure) rolls all of them back.
    pub async fn transaction_xa<T, F, Fut>(
        &self,
        participants: &[Arc<Connection>],
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let xid = format!("xa_{}", uuid::Uuid::new_v4().simple());

        for (i, conn) in participants.iter().enumerate() {
            if let Err(e) = conn.start_trans_xa(&xid).await {
                for started in &participants[..i] {
                    let _ = started.rollback_xa(&xid).await;
                }
                return Err(e);
            }
        }

        match f(xid.clone()).await {
            Ok(value) => {
                for (i, conn) in participants.iter().enumerate() {
                    if let Err(e) = conn.prepare_xa(&xid).await {
                        for participant in &participants[..i] {
                            let _ = participant.rollback_xa(&xid).await;
                        }
                        for participant in &participants[i..] {
                            let _ = participant.rollback_xa(&xid).await;
                        }
                        return Err(e);
                    }
                }
                for conn in participants {
                    conn.commit_xa(&xid).await?;
                }
                Ok(value)
            }
            Err(e) => {
                for conn in participants {
                    let _ = conn.rollback_xa(&xid).await;
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn sqlite_config() -> DbConfig {
        DbConfig::single("main", ConnectionConfig::new("sqlite::memory:"))
    }

    #[tokio::test]
    async fn test_connect_caches_instances() {
        let manager = DbManager::new(sqlite_config());
        let a = manager.connect(None, false).await.unwrap();
        let b = manager.connect(Some("main"), false).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_force_returns_fresh_instance() {
        let manager = DbManager::new(sqlite_config());
        let a = manager.connect(None, false).await.unwrap();
        let b = manager.connect(None, true).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        // The cached instance is untouched
        let c = manager.connect(None, false).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_unknown_connection_name() {
        let manager = DbManager::new(sqlite_config());
        assert!(manager.connect(Some("missing"), false).await.is_err());
    }
}
