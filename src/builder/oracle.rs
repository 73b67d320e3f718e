//! Oracle dialect (render-only; no executing connector).
//!
//! Pagination wraps the whole statement in a subquery filtering on a
//! synthetic `rownum` column, so the select template itself carries the
//! wrapping — a structurally different rendering path from the clause-swap
//! dialects.

use crate::builder::{SqlBuilder, has_unsafe_chars, is_field_token, is_splittable};
use crate::config::DbType;
use crate::error::{Error, Result};
use crate::query::{Lock, QueryOptions};

pub struct OracleBuilder;

impl SqlBuilder for OracleBuilder {
    fn db_type(&self) -> DbType {
        DbType::Oracle
    }

    fn select_sql(&self) -> &str {
        "SELECT * FROM (SELECT paged.*, rownum AS numrow FROM (SELECT%DISTINCT%%EXTRA% %FIELD% FROM %TABLE%%JOIN%%WHERE%%GROUP%%HAVING%%ORDER%) paged )%LIMIT%%LOCK%%COMMENT%"
    }

    fn parse_key(&self, opts: &QueryOptions, key: &str, strict: bool) -> Result<String> {
        let key = key.trim();
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            return Ok(key.to_string());
        }

        if let Some((field, path)) = key.split_once("->") {
            if !key.contains('(') {
                return Ok(format!("{field}.\"{path}\""));
            }
        }

        let mut table: Option<String> = None;
        let mut key = key.to_string();
        if key.contains('.') && is_splittable(&key) {
            if let Some((qualifier, column)) = key.split_once('.') {
                let mut qualifier = qualifier.to_string();
                if qualifier == "__TABLE__" {
                    if let Some(current) = opts.current_table() {
                        qualifier = current.to_string();
                    }
                }
                if let Some(alias) = opts.alias.get(&qualifier) {
                    qualifier = alias.clone();
                }
                table = Some(qualifier);
                key = column.to_string();
            }
        }

        if strict && !is_field_token(&key) {
            return Err(Error::condition(format!("not support data: {key}")));
        }

        if key != "*" && !has_unsafe_chars(&key) {
            key = format!("\"{key}\"");
        }

        match table {
            Some(table) => Ok(format!("\"{table}\".{key}")),
            None => Ok(key),
        }
    }

    /// Row-number window over the wrapped statement.
    fn parse_limit(&self, limit: Option<(u64, u64)>) -> String {
        match limit {
            None => String::new(),
            Some((0, count)) => format!(" WHERE (numrow > 0 AND numrow <= {count})"),
            Some((offset, count)) => {
                format!(" WHERE (numrow > {offset}) AND (numrow <= {})", offset + count)
            }
        }
    }

    fn parse_lock(&self, lock: Option<&Lock>) -> String {
        match lock {
            None => String::new(),
            Some(Lock::ForUpdate) => " FOR UPDATE NOWAIT ".to_string(),
            Some(Lock::Clause(clause)) => format!(" {} ", clause.trim()),
        }
    }

    fn parse_rand(&self) -> String {
        "DBMS_RANDOM.value".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_rownum_window() {
        let b = OracleBuilder;
        assert_eq!(
            b.parse_limit(Some((0, 10))),
            " WHERE (numrow > 0 AND numrow <= 10)"
        );
        assert_eq!(
            b.parse_limit(Some((20, 10))),
            " WHERE (numrow > 20) AND (numrow <= 30)"
        );
    }

    #[test]
    fn test_lock_nowait() {
        let b = OracleBuilder;
        assert_eq!(b.parse_lock(Some(&Lock::ForUpdate)), " FOR UPDATE NOWAIT ");
    }
}
