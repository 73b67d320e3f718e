//! Error types for sqlgate.
//!
//! All failures surface as typed variants of [`Error`] carrying enough context
//! (failing SQL, bound values, backend detail) to reproduce the problem.
//! Nothing in this layer logs-and-continues on a write.

use thiserror::Error;

use crate::builder::expr::BindValue;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid connection configuration, unknown backend type.
    /// Fatal, never retried.
    #[error("invalid database config: {message}")]
    Config { message: String },

    /// Malformed condition tree: unrecognized operator, non-scalar value
    /// where a scalar is required. Fatal per statement.
    #[error("where express error: {message}")]
    Condition { message: String },

    /// Write data referenced a field outside the allowed set in strict mode.
    /// Raised before any SQL is sent.
    #[error("fields not exists: [{field}]")]
    StrictField { field: String },

    /// A named placeholder in the statement had no bound value at expansion
    /// time.
    #[error("missing bind parameter :{name} in statement: {sql}")]
    BindParam { name: String, sql: String },

    /// The backend dropped or interrupted the link. Recovered transparently
    /// (single retry on a fresh link) only when break-reconnect is enabled
    /// and no transaction is open; otherwise fatal.
    #[error("connection broken: {message}")]
    ConnectionBroken { message: String },

    /// Commit or rollback called with no active transaction, or a protocol
    /// violation such as mixing plain and distributed transaction verbs.
    #[error("transaction error: {message}")]
    TransactionState { message: String },

    /// Any other backend-reported failure (syntax error, constraint
    /// violation). Wraps the native code/message verbatim with the
    /// correlated SQL and bound values attached.
    #[error("backend error: {message} [sql: {sql}]")]
    Execution {
        message: String,
        code: Option<String>,
        sql: String,
        binds: Vec<BindValue>,
    },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn condition(message: impl Into<String>) -> Self {
        Self::Condition {
            message: message.into(),
        }
    }

    pub fn strict_field(field: impl Into<String>) -> Self {
        Self::StrictField {
            field: field.into(),
        }
    }

    pub fn bind_param(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::BindParam {
            name: name.into(),
            sql: sql.into(),
        }
    }

    pub fn broken(message: impl Into<String>) -> Self {
        Self::ConnectionBroken {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    pub fn execution(
        message: impl Into<String>,
        code: Option<String>,
        sql: impl Into<String>,
        binds: Vec<BindValue>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            code,
            sql: sql.into(),
            binds,
        }
    }

    /// Wrap a driver error, attaching the statement and its bound values.
    ///
    /// Broken-link classification happens before this point (the connection
    /// layer matches the raw message against its break patterns); anything
    /// arriving here is a genuine execution failure.
    pub fn from_sqlx(err: sqlx::Error, sql: &str, binds: &[BindValue]) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => Self::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                Self::execution(db_err.message(), code, sql, binds.to_vec())
            }
            sqlx::Error::PoolClosed => Self::broken("connection pool is closed"),
            sqlx::Error::Io(io_err) => Self::broken(format!("I/O error: {io_err}")),
            sqlx::Error::Tls(tls_err) => Self::broken(format!("TLS error: {tls_err}")),
            sqlx::Error::Protocol(msg) => Self::broken(format!("protocol error: {msg}")),
            other => Self::execution(other.to_string(), None, sql, binds.to_vec()),
        }
    }

    /// Whether a transparent retry on a fresh link may recover this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionBroken { .. })
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;
