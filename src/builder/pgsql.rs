//! PostgreSQL dialect.

use crate::builder::{SqlBuilder, has_unsafe_chars, is_field_token, is_splittable};
use crate::config::DbType;
use crate::error::{Error, Result};
use crate::query::QueryOptions;

pub struct PgsqlBuilder;

impl SqlBuilder for PgsqlBuilder {
    fn db_type(&self) -> DbType {
        DbType::Pgsql
    }

    fn insert_sql(&self) -> &str {
        "INSERT INTO %TABLE% (%FIELD%) VALUES (%DATA%)%COMMENT%"
    }

    fn insert_all_sql(&self) -> &str {
        "INSERT INTO %TABLE% (%FIELD%) %DATA%%COMMENT%"
    }

    fn parse_key(&self, opts: &QueryOptions, key: &str, strict: bool) -> Result<String> {
        let key = key.trim();
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            return Ok(key.to_string());
        }

        // JSON member access: `->>` extracts as text, so an absent member and
        // an explicit null both come back as SQL NULL.
        if let Some((field, path)) = key.split_once("->") {
            if !key.contains('(') {
                return Ok(format!("\"{field}\"->>'{path}'"));
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
            Some(table) => Ok(format!("{table}.{key}")),
            None => Ok(key),
        }
    }

    fn parse_rand(&self) -> String {
        "RANDOM()".to_string()
    }

    fn json_set_expr(&self, column: &str, path: &str, value_sql: &str) -> String {
        format!("jsonb_set({column}, '{{{path}}}', to_jsonb({value_sql}))")
    }
}
