//! Transaction coordination.
//!
//! Depth 0 -> 1 issues a real `BEGIN` on a connection pinned out of the
//! write pool; deeper levels use savepoints named by depth. A broken link
//! inside any depth aborts the whole outer transaction — the coordinator
//! never swaps the pinned session.
//!
//! The XA verbs implement the two-phase protocol per participant; the
//! manager coordinates prepare-before-commit across participants.

use std::future::Future;

use tracing::{debug, warn};

use crate::config::DbType;
use crate::connection::link::{Link, LinkConn};
use crate::connection::Connection;
use crate::error::{Error, Result};

impl Connection {
    /// Open a transaction, or push a savepoint when one is already open.
    pub async fn start_trans(&self) -> Result<()> {
        let mut st = self.trans.lock().await;
        if st.xa.is_some() {
            return Err(Error::transaction(
                "distributed transaction active; plain transaction verbs are unavailable",
            ));
        }
        if st.depth == 0 {
            st.conn = Some(self.begin_pinned().await?);
            st.depth = 1;
            debug!(connection = %self.name(), "transaction started");
        } else {
            st.depth += 1;
            if self.db_type().supports_savepoint() {
                let sql = format!("SAVEPOINT sp_{}", st.depth);
                let conn = st
                    .conn
                    .as_mut()
                    .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                conn.execute_raw(&sql)
                    .await
                    .map_err(|e| self.map_trans_error(e, &sql))?;
            }
            debug!(connection = %self.name(), depth = st.depth, "savepoint created");
        }
        Ok(())
    }

    /// Commit the innermost level: release the matching savepoint above
    /// depth 1, a real `COMMIT` at depth 1. Depth 0 is an error.
    pub async fn commit(&self) -> Result<()> {
        let mut st = self.trans.lock().await;
        if st.xa.is_some() {
            return Err(Error::transaction(
                "distributed transaction active; use commit_xa",
            ));
        }
        match st.depth {
            0 => Err(Error::transaction("cannot commit: no active transaction")),
            1 => {
                let mut conn = st
                    .conn
                    .take()
                    .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                let result = conn.execute_raw("COMMIT").await;
                st.depth = 0;
                result.map_err(|e| self.map_trans_error(e, "COMMIT"))?;
                debug!(connection = %self.name(), "transaction committed");
                Ok(())
            }
            depth => {
                if self.db_type().supports_savepoint() {
                    let sql = format!("RELEASE SAVEPOINT sp_{depth}");
                    let conn = st
                        .conn
                        .as_mut()
                        .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                    conn.execute_raw(&sql)
                        .await
                        .map_err(|e| self.map_trans_error(e, &sql))?;
                }
                st.depth -= 1;
                Ok(())
            }
        }
    }

    /// Roll back the innermost level: back to the matching savepoint above
    /// depth 1, a real `ROLLBACK` at depth 1. Depth 0 is an error.
    pub async fn rollback(&self) -> Result<()> {
        let mut st = self.trans.lock().await;
        if st.xa.is_some() {
            return Err(Error::transaction(
                "distributed transaction active; use rollback_xa",
            ));
        }
        match st.depth {
            0 => Err(Error::transaction("cannot rollback: no active transaction")),
            1 => {
                let mut conn = st
                    .conn
                    .take()
                    .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                let result = conn.execute_raw("ROLLBACK").await;
                st.depth = 0;
                result.map_err(|e| self.map_trans_error(e, "ROLLBACK"))?;
                debug!(connection = %self.name(), "transaction rolled back");
                Ok(())
            }
            depth => {
                if self.db_type().supports_savepoint() {
                    let sql = format!("ROLLBACK TO SAVEPOINT sp_{depth}");
                    let conn = st
                        .conn
                        .as_mut()
                        .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
                    conn.execute_raw(&sql)
                        .await
                        .map_err(|e| self.map_trans_error(e, &sql))?;
                }
                st.depth -= 1;
                Ok(())
            }
        }
    }

    /// Current nesting depth; 0 when no transaction is open.
    pub async fn trans_depth(&self) -> u32 {
        self.trans.lock().await.depth
    }

    /// Run a closure inside a transaction: commit on `Ok`, roll back on
    /// `Err`. The closure result propagates either way.
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.start_trans().await?;
        match f().await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(
                        connection = %self.name(),
                        error = %rollback_err,
                        "rollback after failed transaction body also failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Pin a connection from the write pool and open a transaction on it.
    /// A broken link here happens before anything is open, so one reconnect
    /// attempt is safe.
    async fn begin_pinned(&self) -> Result<LinkConn> {
        let link = self.write_link().await?;
        match Self::begin_on(&link).await {
            Ok(conn) => Ok(conn),
            Err(e) if self.should_reconnect(&e) => {
                warn!(connection = %self.name(), error = %e, "reconnecting before BEGIN");
                self.reset_links().await;
                let link = self.write_link().await?;
                Self::begin_on(&link)
                    .await
                    .map_err(|e| self.map_trans_error(e, "BEGIN"))
            }
            Err(e) => Err(self.map_trans_error(e, "BEGIN")),
        }
    }

    async fn begin_on(link: &Link) -> sqlx::Result<LinkConn> {
        let mut conn = link.acquire().await?;
        conn.execute_raw("BEGIN").await?;
        Ok(conn)
    }

    fn map_trans_error(&self, err: sqlx::Error, sql: &str) -> Error {
        if self.is_break_error(&err) {
            Error::broken(err.to_string())
        } else {
            Error::from_sqlx(err, sql, &[])
        }
    }

    // ------------------------------------------------------------------
    // Distributed (XA) transactions
    // ------------------------------------------------------------------

    /// Join a global transaction under `xid`.
    pub async fn start_trans_xa(&self, xid: &str) -> Result<()> {
        check_xid(xid)?;
        let mut st = self.trans.lock().await;
        if st.depth > 0 || st.xa.is_some() {
            return Err(Error::transaction(
                "a transaction is already active on this connection",
            ));
        }
        let link = self.write_link().await?;
        let conn = match self.db_type() {
            DbType::Mysql => {
                let mut conn = link
                    .acquire()
                    .await
                    .map_err(|e| self.map_trans_error(e, "XA START"))?;
                let sql = format!("XA START '{xid}'");
                conn.execute_raw(&sql)
                    .await
                    .map_err(|e| self.map_trans_error(e, &sql))?;
                conn
            }
            // PostgreSQL joins with a plain transaction; the xid only
            // matters at prepare time.
            DbType::Pgsql => Self::begin_on(&link)
                .await
                .map_err(|e| self.map_trans_error(e, "BEGIN"))?,
            other => {
                return Err(Error::config(format!(
                    "distributed transactions not supported for {other}"
                )));
            }
        };
        st.conn = Some(conn);
        st.xa = Some(xid.to_string());
        st.depth = 1;
        debug!(connection = %self.name(), xid = %xid, "xa transaction started");
        Ok(())
    }

    /// First phase: make this participant's work durable. Must succeed on
    /// every participant before any commit.
    pub async fn prepare_xa(&self, xid: &str) -> Result<()> {
        check_xid(xid)?;
        let mut st = self.trans.lock().await;
        if st.xa.as_deref() != Some(xid) {
            return Err(Error::transaction(format!("unknown xa transaction: {xid}")));
        }
        let conn = st
            .conn
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
        match self.db_type() {
            DbType::Mysql => {
                let sql = format!("XA END '{xid}'");
                conn.execute_raw(&sql)
                    .await
                    .map_err(|e| self.map_trans_error(e, &sql))?;
                let sql = format!("XA PREPARE '{xid}'");
                conn.execute_raw(&sql)
                    .await
                    .map_err(|e| self.map_trans_error(e, &sql))?;
            }
            _ => {
                let sql = format!("PREPARE TRANSACTION '{xid}'");
                conn.execute_raw(&sql)
                    .await
                    .map_err(|e| self.map_trans_error(e, &sql))?;
            }
        }
        debug!(connection = %self.name(), xid = %xid, "xa transaction prepared");
        Ok(())
    }

    /// Second phase: commit the prepared work.
    pub async fn commit_xa(&self, xid: &str) -> Result<()> {
        check_xid(xid)?;
        let mut st = self.trans.lock().await;
        if st.xa.as_deref() != Some(xid) {
            return Err(Error::transaction(format!("unknown xa transaction: {xid}")));
        }
        let conn = st
            .conn
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
        let sql = match self.db_type() {
            DbType::Mysql => format!("XA COMMIT '{xid}'"),
            _ => format!("COMMIT PREPARED '{xid}'"),
        };
        let result = conn.execute_raw(&sql).await;
        st.conn = None;
        st.xa = None;
        st.depth = 0;
        result.map_err(|e| self.map_trans_error(e, &sql))?;
        debug!(connection = %self.name(), xid = %xid, "xa transaction committed");
        Ok(())
    }

    /// Abort the participant, whether or not it reached the prepared state.
    pub async fn rollback_xa(&self, xid: &str) -> Result<()> {
        check_xid(xid)?;
        let mut st = self.trans.lock().await;
        if st.xa.as_deref() != Some(xid) {
            return Err(Error::transaction(format!("unknown xa transaction: {xid}")));
        }
        let conn = st
            .conn
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction has no pinned connection"))?;
        let result = match self.db_type() {
            DbType::Mysql => {
                // XA END fails when already ended or prepared; either state
                // still accepts the rollback.
                let _ = conn.execute_raw(&format!("XA END '{xid}'")).await;
                conn.execute_raw(&format!("XA ROLLBACK '{xid}'")).await
            }
            _ => {
                match conn
                    .execute_raw(&format!("ROLLBACK PREPARED '{xid}'"))
                    .await
                {
                    Ok(()) => Ok(()),
                    // Not yet prepared: a plain rollback aborts the open
                    // transaction
                    Err(_) => conn.execute_raw("ROLLBACK").await,
                }
            }
        };
        st.conn = None;
        st.xa = None;
        st.depth = 0;
        result.map_err(|e| self.map_trans_error(e, "XA ROLLBACK"))?;
        debug!(connection = %self.name(), xid = %xid, "xa transaction rolled back");
        Ok(())
    }
}

/// Global transaction ids are inlined into XA statements; restrict them to
/// safe characters.
fn check_xid(xid: &str) -> Result<()> {
    let valid = !xid.is_empty()
        && xid.len() <= 64
        && xid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::transaction(format!("invalid xa transaction id: {xid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_xid() {
        assert!(check_xid("xa_7f3a").is_ok());
        assert!(check_xid("order-2024.01").is_ok());
        assert!(check_xid("").is_err());
        assert!(check_xid("bad'xid").is_err());
        assert!(check_xid(&"x".repeat(65)).is_err());
    }
}
