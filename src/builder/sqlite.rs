//! SQLite dialect.

use crate::builder::expr::{BindSet, DataRow};
use crate::builder::{
    SqlBuilder, build_insert_all_values, has_unsafe_chars, is_field_token, is_splittable,
};
use crate::config::DbType;
use crate::error::{Error, Result};
use crate::query::{Lock, QueryOptions};

pub struct SqliteBuilder;

impl SqlBuilder for SqliteBuilder {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn parse_key(&self, opts: &QueryOptions, key: &str, strict: bool) -> Result<String> {
        let key = key.trim();
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            return Ok(key.to_string());
        }

        // JSON member access; json_extract yields SQL NULL both for an
        // absent member and an explicit null.
        if let Some((field, path)) = key.split_once("->") {
            if !key.contains('(') {
                let column = self.parse_key(opts, field, false)?;
                return Ok(format!("json_extract({column}, '$.{path}')"));
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

    fn parse_rand(&self) -> String {
        "RANDOM()".to_string()
    }

    fn parse_limit(&self, limit: Option<(u64, u64)>) -> String {
        match limit {
            None => String::new(),
            Some((0, count)) => format!(" LIMIT {count}"),
            Some((offset, count)) => format!(" LIMIT {offset},{count}"),
        }
    }

    /// SQLite has no row-level locking clause.
    fn parse_lock(&self, _lock: Option<&Lock>) -> String {
        String::new()
    }

    fn build_insert_all(
        &self,
        opts: &QueryOptions,
        rows: &[DataRow],
        binds: &mut BindSet,
    ) -> Result<String> {
        build_insert_all_values(self, opts, rows, binds)
    }
}
