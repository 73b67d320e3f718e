//! MySQL dialect.

use crate::builder::expr::{BindSet, DataRow};
use crate::builder::{
    SqlBuilder, build_insert_all_values, has_unsafe_chars, is_field_token, is_splittable,
};
use crate::config::DbType;
use crate::error::{Error, Result};
use crate::query::QueryOptions;

pub struct MysqlBuilder;

impl SqlBuilder for MysqlBuilder {
    fn db_type(&self) -> DbType {
        DbType::Mysql
    }

    fn parse_key(&self, opts: &QueryOptions, key: &str, strict: bool) -> Result<String> {
        let key = key.trim();
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            return Ok(key.to_string());
        }

        // JSON member access
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
            key = format!("`{key}`");
        }

        match table {
            Some(table) => Ok(format!("`{table}`.{key}")),
            None => Ok(key),
        }
    }

    fn parse_rand(&self) -> String {
        "rand()".to_string()
    }

    fn parse_limit(&self, limit: Option<(u64, u64)>) -> String {
        match limit {
            None => String::new(),
            Some((0, count)) => format!(" LIMIT {count}"),
            Some((offset, count)) => format!(" LIMIT {offset},{count}"),
        }
    }

    /// `json_extract` yields a JSON `null` (not SQL NULL) for an explicit
    /// null member, and SQL NULL for an absent one; match both.
    fn parse_json_null(&self, opts: &QueryOptions, field: &str, not: bool) -> Result<String> {
        let extract = self.parse_key(opts, field, false)?;
        if not {
            Ok(format!(
                "({extract} IS NOT NULL AND json_type({extract}) <> 'NULL')"
            ))
        } else {
            Ok(format!(
                "({extract} IS NULL OR json_type({extract}) = 'NULL')"
            ))
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> QueryOptions {
        let mut opts = QueryOptions::default();
        opts.table.push(crate::query::TableRef::Name("user".into()));
        opts
    }

    #[test]
    fn test_parse_key_quoting() {
        let b = MysqlBuilder;
        let opts = opts();
        assert_eq!(b.parse_key(&opts, "name", false).unwrap(), "`name`");
        assert_eq!(b.parse_key(&opts, "*", false).unwrap(), "*");
        assert_eq!(b.parse_key(&opts, "u.name", false).unwrap(), "`u`.`name`");
        // expressions pass through unquoted
        assert_eq!(
            b.parse_key(&opts, "count(*)", false).unwrap(),
            "count(*)"
        );
    }

    #[test]
    fn test_parse_key_table_placeholder() {
        let b = MysqlBuilder;
        let opts = opts();
        assert_eq!(
            b.parse_key(&opts, "__TABLE__.name", false).unwrap(),
            "`user`.`name`"
        );
    }

    #[test]
    fn test_parse_key_alias_resolution() {
        let b = MysqlBuilder;
        let mut opts = opts();
        opts.alias.insert("user".into(), "u".into());
        assert_eq!(
            b.parse_key(&opts, "user.name", false).unwrap(),
            "`u`.`name`"
        );
    }

    #[test]
    fn test_parse_key_json_member() {
        let b = MysqlBuilder;
        let opts = opts();
        assert_eq!(
            b.parse_key(&opts, "extend->brand", false).unwrap(),
            "json_extract(`extend`, '$.brand')"
        );
    }

    #[test]
    fn test_parse_key_strict_rejects_expressions() {
        let b = MysqlBuilder;
        let opts = opts();
        assert!(b.parse_key(&opts, "name; drop table user", true).is_err());
    }

    #[test]
    fn test_limit_syntax() {
        let b = MysqlBuilder;
        assert_eq!(b.parse_limit(Some((0, 10))), " LIMIT 10");
        assert_eq!(b.parse_limit(Some((20, 10))), " LIMIT 20,10");
        assert_eq!(b.parse_limit(None), "");
    }
}
