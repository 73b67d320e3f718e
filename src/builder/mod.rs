//! Statement builder and dialect adapters.
//!
//! A statement is assembled by substituting rendered clause fragments into a
//! per-kind template string. The [`SqlBuilder`] trait supplies ANSI-ish
//! defaults; each dialect overrides identifier quoting, pagination, locking
//! and the random-order token. Rendering is deterministic for identical
//! input — the only nondeterminism a statement can carry is the explicit
//! random-order directive.

pub mod condition;
pub mod expr;

mod mysql;
mod oracle;
mod pgsql;
mod sqlite;

pub use mysql::MysqlBuilder;
pub use oracle::OracleBuilder;
pub use pgsql::PgsqlBuilder;
pub use sqlite::SqliteBuilder;

use crate::builder::condition::{build_where, coerce_bind};
use crate::builder::expr::{BindSet, BindValue, DataRow, DataValue, ParamStyle};
use crate::config::DbType;
use crate::error::{Error, Result};
use crate::query::{Direction, FieldRef, JoinClause, Lock, OrderItem, QueryOptions, TableRef};

pub(crate) const SELECT_SQL: &str =
    "SELECT%DISTINCT%%EXTRA% %FIELD% FROM %TABLE%%FORCE%%JOIN%%WHERE%%GROUP%%HAVING%%ORDER%%LIMIT%%LOCK%%COMMENT%";
pub(crate) const INSERT_SQL: &str =
    "%INSERT%%EXTRA% INTO %TABLE% (%FIELD%) VALUES (%DATA%)%COMMENT%";
pub(crate) const INSERT_ALL_SQL: &str = "%INSERT%%EXTRA% INTO %TABLE% (%FIELD%) %DATA%%COMMENT%";
pub(crate) const UPDATE_SQL: &str =
    "UPDATE%EXTRA% %TABLE% SET %SET%%JOIN%%WHERE%%ORDER%%LIMIT%%LOCK%%COMMENT%";
pub(crate) const DELETE_SQL: &str =
    "DELETE%EXTRA% FROM %TABLE%%JOIN%%WHERE%%ORDER%%LIMIT%%LOCK%%COMMENT%";

/// The builder for a backend dialect.
pub fn builder_for(ty: DbType) -> &'static dyn SqlBuilder {
    match ty {
        DbType::Mysql => &MysqlBuilder,
        DbType::Pgsql => &PgsqlBuilder,
        DbType::Sqlite => &SqliteBuilder,
        DbType::Oracle => &OracleBuilder,
    }
}

/// Dialect adapter: clause templates plus the syntax points backends differ
/// on. Everything else is provided.
pub trait SqlBuilder: Send + Sync {
    fn db_type(&self) -> DbType;

    fn param_style(&self) -> ParamStyle {
        match self.db_type() {
            DbType::Pgsql => ParamStyle::Dollar,
            _ => ParamStyle::Question,
        }
    }

    fn select_sql(&self) -> &str {
        SELECT_SQL
    }

    fn insert_sql(&self) -> &str {
        INSERT_SQL
    }

    fn insert_all_sql(&self) -> &str {
        INSERT_ALL_SQL
    }

    fn update_sql(&self) -> &str {
        UPDATE_SQL
    }

    fn delete_sql(&self) -> &str {
        DELETE_SQL
    }

    /// Quote one identifier, resolving `table.column`, `alias.column` and
    /// the `__TABLE__` placeholder. Expressions containing unsafe characters
    /// pass through unquoted; under `strict` a token outside `[\w.*]` is an
    /// error.
    fn parse_key(&self, _opts: &QueryOptions, key: &str, strict: bool) -> Result<String> {
        let key = key.trim();
        if strict && !is_field_token(key) {
            return Err(Error::condition(format!("not support data: {key}")));
        }
        Ok(key.to_string())
    }

    /// Random-order token; empty when the dialect has none.
    fn parse_rand(&self) -> String {
        String::new()
    }

    /// Pagination clause from `(offset, count)`.
    fn parse_limit(&self, limit: Option<(u64, u64)>) -> String {
        match limit {
            None => String::new(),
            Some((0, count)) => format!(" LIMIT {count}"),
            Some((offset, count)) => format!(" LIMIT {count} OFFSET {offset}"),
        }
    }

    fn parse_lock(&self, lock: Option<&Lock>) -> String {
        match lock {
            None => String::new(),
            Some(Lock::ForUpdate) => " FOR UPDATE ".to_string(),
            Some(Lock::Clause(clause)) => format!(" {} ", clause.trim()),
        }
    }

    /// Predicate matching a JSON member that is explicit `null` or absent.
    /// The two must match identically.
    fn parse_json_null(&self, opts: &QueryOptions, field: &str, not: bool) -> Result<String> {
        let key = self.parse_key(opts, field, false)?;
        Ok(format!("{key} IS {}", if not { "NOT NULL" } else { "NULL" }))
    }

    /// In-place JSON member assignment for UPDATE/INSERT data.
    fn json_set_expr(&self, column: &str, path: &str, value_sql: &str) -> String {
        format!("json_set({column}, '$.{path}', {value_sql})")
    }

    // ------------------------------------------------------------------
    // Statement assembly
    // ------------------------------------------------------------------

    fn build_select(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        let sql = self
            .select_sql()
            .replace("%DISTINCT%", if opts.distinct { " DISTINCT" } else { "" })
            .replace("%EXTRA%", &self.parse_extra(opts))
            .replace("%FIELD%", &self.parse_field(opts, binds)?)
            .replace("%TABLE%", &self.parse_table(opts, binds)?)
            .replace("%FORCE%", &self.parse_force(opts))
            .replace("%JOIN%", &self.parse_join(opts, binds)?)
            .replace("%WHERE%", &build_where(self, opts, binds)?)
            .replace("%GROUP%", &self.parse_group(opts)?)
            .replace("%HAVING%", &self.parse_having(opts))
            .replace("%ORDER%", &self.parse_order(opts, binds)?)
            .replace("%LIMIT%", &self.parse_limit(opts.limit))
            .replace("%LOCK%", &self.parse_lock(opts.lock.as_ref()))
            .replace("%COMMENT%", &self.parse_comment(opts));
        Ok(sql.trim_end().to_string())
    }

    fn build_insert(&self, opts: &QueryOptions, data: &DataRow, binds: &mut BindSet) -> Result<String> {
        let entries = self.parse_data(opts, data, binds)?;
        if entries.is_empty() {
            return Err(Error::condition("no data to insert"));
        }
        let fields: Vec<&str> = entries.iter().map(|(c, _)| c.as_str()).collect();
        let values: Vec<&str> = entries.iter().map(|(_, v)| v.as_str()).collect();

        let sql = self
            .insert_sql()
            .replace("%INSERT%", if opts.replace { "REPLACE" } else { "INSERT" })
            .replace("%EXTRA%", &self.parse_extra(opts))
            .replace("%TABLE%", &self.parse_table(opts, binds)?)
            .replace("%FIELD%", &fields.join(","))
            .replace("%DATA%", &values.join(","))
            .replace("%COMMENT%", &self.parse_comment(opts));
        Ok(sql.trim_end().to_string())
    }

    /// Batch insert. The ANSI form renders `SELECT ... UNION ALL SELECT ...`;
    /// dialects with multi-row `VALUES` lists override.
    fn build_insert_all(
        &self,
        opts: &QueryOptions,
        rows: &[DataRow],
        binds: &mut BindSet,
    ) -> Result<String> {
        let (fields, row_values) = parse_data_rows(self, opts, rows, binds)?;
        let selects: Vec<String> = row_values
            .into_iter()
            .map(|values| format!("SELECT {}", values.join(",")))
            .collect();

        let sql = self
            .insert_all_sql()
            .replace("%INSERT%", if opts.replace { "REPLACE" } else { "INSERT" })
            .replace("%EXTRA%", &self.parse_extra(opts))
            .replace("%TABLE%", &self.parse_table(opts, binds)?)
            .replace("%FIELD%", &fields.join(","))
            .replace("%DATA%", &selects.join(" UNION ALL "))
            .replace("%COMMENT%", &self.parse_comment(opts));
        Ok(sql.trim_end().to_string())
    }

    fn build_update(&self, opts: &QueryOptions, data: &DataRow, binds: &mut BindSet) -> Result<String> {
        let entries = self.parse_data(opts, data, binds)?;
        if entries.is_empty() {
            return Err(Error::condition("no data to update"));
        }
        let set: Vec<String> = entries
            .into_iter()
            .map(|(col, val)| format!("{col} = {val}"))
            .collect();

        let sql = self
            .update_sql()
            .replace("%EXTRA%", &self.parse_extra(opts))
            .replace("%TABLE%", &self.parse_table(opts, binds)?)
            .replace("%SET%", &set.join(" , "))
            .replace("%JOIN%", &self.parse_join(opts, binds)?)
            .replace("%WHERE%", &build_where(self, opts, binds)?)
            .replace("%ORDER%", &self.parse_order(opts, binds)?)
            .replace("%LIMIT%", &self.parse_limit(opts.limit))
            .replace("%LOCK%", &self.parse_lock(opts.lock.as_ref()))
            .replace("%COMMENT%", &self.parse_comment(opts));
        Ok(sql.trim_end().to_string())
    }

    fn build_delete(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        let sql = self
            .delete_sql()
            .replace("%EXTRA%", &self.parse_extra(opts))
            .replace("%TABLE%", &self.parse_table(opts, binds)?)
            .replace("%JOIN%", &self.parse_join(opts, binds)?)
            .replace("%WHERE%", &build_where(self, opts, binds)?)
            .replace("%ORDER%", &self.parse_order(opts, binds)?)
            .replace("%LIMIT%", &self.parse_limit(opts.limit))
            .replace("%LOCK%", &self.parse_lock(opts.lock.as_ref()))
            .replace("%COMMENT%", &self.parse_comment(opts));
        Ok(sql.trim_end().to_string())
    }

    // ------------------------------------------------------------------
    // Clause fragments
    // ------------------------------------------------------------------

    fn parse_field(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        if opts.fields.is_empty() {
            return Ok("*".to_string());
        }
        let mut parts = Vec::with_capacity(opts.fields.len());
        for field in &opts.fields {
            match field {
                FieldRef::Name(name) => parts.push(self.parse_key(opts, name, false)?),
                FieldRef::Alias { field, alias } => parts.push(format!(
                    "{} AS {}",
                    self.parse_key(opts, field, false)?,
                    self.parse_key(opts, alias, true)?
                )),
                FieldRef::Raw(raw) => parts.push(binds.bind_raw(raw)),
            }
        }
        Ok(parts.join(","))
    }

    fn parse_table(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        if opts.table.is_empty() {
            return Err(Error::condition("query has no table"));
        }
        let mut parts = Vec::with_capacity(opts.table.len());
        for table in &opts.table {
            parts.push(self.parse_table_ref(opts, table, binds)?);
        }
        Ok(parts.join(","))
    }

    fn parse_table_ref(
        &self,
        opts: &QueryOptions,
        table: &TableRef,
        binds: &mut BindSet,
    ) -> Result<String> {
        match table {
            TableRef::Raw(raw) => Ok(binds.bind_raw(raw)),
            TableRef::Alias { table, alias } => Ok(format!(
                "{} {}",
                self.parse_key(opts, table, false)?,
                self.parse_key(opts, alias, false)?
            )),
            TableRef::Name(name) => match opts.alias.get(name) {
                Some(alias) => Ok(format!(
                    "{} {}",
                    self.parse_key(opts, name, false)?,
                    self.parse_key(opts, alias, false)?
                )),
                None => self.parse_key(opts, name, false),
            },
        }
    }

    fn parse_join(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        let mut out = String::new();
        for JoinClause { table, kind, on } in &opts.joins {
            let table_sql = self.parse_table_ref(opts, table, binds)?;
            let cond = match on.split_once('=') {
                Some((left, right)) => format!(
                    "{}={}",
                    self.parse_key(opts, left.trim(), false)?,
                    self.parse_key(opts, right.trim(), false)?
                ),
                None => on.clone(),
            };
            out.push_str(&format!(" {} JOIN {} ON {}", kind.as_str(), table_sql, cond));
        }
        Ok(out)
    }

    fn parse_order(&self, opts: &QueryOptions, binds: &mut BindSet) -> Result<String> {
        if opts.order.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(opts.order.len());
        for item in &opts.order {
            match item {
                OrderItem::Raw(raw) => parts.push(binds.bind_raw(raw)),
                OrderItem::Rand => {
                    let rand = self.parse_rand();
                    if !rand.is_empty() {
                        parts.push(rand);
                    }
                }
                OrderItem::Field { name, dir } => {
                    if !is_field_token(name) {
                        return Err(Error::condition(format!("order express error: {name}")));
                    }
                    let sort = match dir {
                        Some(Direction::Asc) => " ASC",
                        Some(Direction::Desc) => " DESC",
                        None => "",
                    };
                    parts.push(format!("{}{}", self.parse_key(opts, name, true)?, sort));
                }
                OrderItem::FieldList { field, values, dir } => {
                    let bind_type = opts.bind_type_of(field);
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| {
                            format!(":{}", binds.bind(coerce_bind(v.clone(), bind_type), bind_type))
                        })
                        .collect();
                    let sort = match dir {
                        Some(Direction::Asc) => " ASC",
                        Some(Direction::Desc) => " DESC",
                        None => "",
                    };
                    parts.push(format!(
                        "field({},{}){}",
                        self.parse_key(opts, field, true)?,
                        placeholders.join(","),
                        sort
                    ));
                }
            }
        }
        if parts.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" ORDER BY {}", parts.join(",")))
    }

    fn parse_group(&self, opts: &QueryOptions) -> Result<String> {
        if opts.group.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(opts.group.len());
        for key in &opts.group {
            parts.push(self.parse_key(opts, key, false)?);
        }
        Ok(format!(" GROUP BY {}", parts.join(",")))
    }

    fn parse_having(&self, opts: &QueryOptions) -> String {
        match &opts.having {
            Some(having) if !having.is_empty() => format!(" HAVING {having}"),
            _ => String::new(),
        }
    }

    fn parse_comment(&self, opts: &QueryOptions) -> String {
        match &opts.comment {
            Some(comment) => {
                // Keep the comment from closing itself
                let comment = match comment.find("*/") {
                    Some(pos) => &comment[..pos],
                    None => comment.as_str(),
                };
                if comment.is_empty() {
                    String::new()
                } else {
                    format!(" /* {comment} */")
                }
            }
            None => String::new(),
        }
    }

    /// Single-word statement modifier (`IGNORE`, `DELAYED`); anything else
    /// renders nothing.
    fn parse_extra(&self, opts: &QueryOptions) -> String {
        match &opts.extra {
            Some(extra) if is_plain_ident(extra) => format!(" {}", extra.to_uppercase()),
            _ => String::new(),
        }
    }

    fn parse_force(&self, opts: &QueryOptions) -> String {
        if opts.force_index.is_empty() {
            String::new()
        } else {
            format!(" FORCE INDEX ( {} ) ", opts.force_index.join(","))
        }
    }

    /// Render a write payload into `(column, value-expression)` pairs.
    ///
    /// Unknown fields are skipped, or rejected under strict mode before any
    /// SQL is sent. `NULL` renders as a literal, deltas as in-place
    /// arithmetic, raw expressions verbatim; scalars are bound or inlined
    /// depending on the auto-bind flag.
    fn parse_data(
        &self,
        opts: &QueryOptions,
        data: &DataRow,
        binds: &mut BindSet,
    ) -> Result<Vec<(String, String)>> {
        let allowed = opts.allowed_fields();
        let strict = opts.effective_strict();
        let mut result = Vec::with_capacity(data.len());

        for (key, value) in data {
            if let Some((field, path)) = key.split_once("->") {
                let col = self.parse_key(opts, field, false)?;
                let value_sql = match value {
                    DataValue::Raw(raw) => binds.bind_raw(raw),
                    DataValue::Value(v) => {
                        format!(":{}", binds.bind(v.clone(), opts.bind_type_of(key)))
                    }
                    DataValue::Inc(_) | DataValue::Dec(_) => {
                        return Err(Error::condition(format!(
                            "cannot apply a delta to a json member: {key}"
                        )));
                    }
                };
                result.push((col.clone(), self.json_set_expr(&col, path, &value_sql)));
                continue;
            }

            if !key.contains('.') {
                if let Some(allowed) = &allowed {
                    if !allowed.iter().any(|f| f == key) {
                        if strict {
                            return Err(Error::strict_field(key));
                        }
                        continue;
                    }
                }
            }

            let col = self.parse_key(opts, key, true)?;
            let rendered = match value {
                DataValue::Raw(raw) => binds.bind_raw(raw),
                DataValue::Value(BindValue::Null) => "NULL".to_string(),
                DataValue::Inc(step) if *step < 0.0 => format!("{col} - {}", -step),
                DataValue::Inc(step) => format!("{col} + {step}"),
                DataValue::Dec(step) if *step < 0.0 => format!("{col} + {}", -step),
                DataValue::Dec(step) => format!("{col} - {step}"),
                DataValue::Value(v) => {
                    let bind_type = opts.bind_type_of(key);
                    let coerced = coerce_bind(v.clone(), bind_type);
                    if opts.auto_bind {
                        format!(":{}", binds.bind(coerced, bind_type))
                    } else {
                        coerced.inline_literal()
                    }
                }
            };
            result.push((col, rendered));
        }

        Ok(result)
    }
}

/// Render every row of a batch payload, enforcing a shared field list.
/// Returns the field list and per-row value expressions.
pub(crate) fn parse_data_rows<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    rows: &[DataRow],
    binds: &mut BindSet,
) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    if rows.is_empty() {
        return Err(Error::condition("no data to insert"));
    }
    let mut fields: Vec<String> = Vec::new();
    let mut row_values = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let entries = builder.parse_data(opts, row, binds)?;
        if i == 0 {
            fields = entries.iter().map(|(c, _)| c.clone()).collect();
        } else if entries.len() != fields.len()
            || entries.iter().zip(&fields).any(|((c, _), f)| c != f)
        {
            return Err(Error::condition("batch insert rows must share the same fields"));
        }
        row_values.push(entries.into_iter().map(|(_, v)| v).collect());
    }
    Ok((fields, row_values))
}

/// Multi-row `VALUES` batch insert, shared by the dialects that support it.
pub(crate) fn build_insert_all_values<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    rows: &[DataRow],
    binds: &mut BindSet,
) -> Result<String> {
    let (fields, row_values) = parse_data_rows(builder, opts, rows, binds)?;
    let tuples: Vec<String> = row_values
        .into_iter()
        .map(|values| format!("( {} )", values.join(",")))
        .collect();

    let sql = builder
        .insert_all_sql()
        .replace("%INSERT%", if opts.replace { "REPLACE" } else { "INSERT" })
        .replace("%EXTRA%", &builder.parse_extra(opts))
        .replace("%TABLE%", &builder.parse_table(opts, binds)?)
        .replace("%FIELD%", &fields.join(","))
        .replace("%DATA%", &format!("VALUES {}", tuples.join(" , ")))
        .replace("%COMMENT%", &builder.parse_comment(opts));
    Ok(sql.trim_end().to_string())
}

// ----------------------------------------------------------------------
// Identifier character classes
// ----------------------------------------------------------------------

/// `[A-Za-z0-9_]+`
pub(crate) fn is_plain_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `[\w.*]+` — a bare or qualified field token.
pub(crate) fn is_field_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '*')
}

/// Characters that make an identifier unsafe to quote; such expressions are
/// passed through rather than mis-quoted.
pub(crate) fn has_unsafe_chars(s: &str) -> bool {
    s.chars().any(|c| {
        matches!(c, ',' | '\'' | '"' | '*' | '(' | ')' | '`' | '[' | '.') || c.is_whitespace()
    })
}

/// Whether a dotted token can be split into `qualifier.column`.
pub(crate) fn is_splittable(s: &str) -> bool {
    !s.chars()
        .any(|c| matches!(c, ',' | '\'' | '"' | '(' | ')' | '`') || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_classes() {
        assert!(is_plain_ident("ignore"));
        assert!(!is_plain_ident("ignore me"));
        assert!(is_field_token("user.name"));
        assert!(is_field_token("*"));
        assert!(!is_field_token("count(*)"));
        assert!(has_unsafe_chars("count(*)"));
        assert!(!has_unsafe_chars("username"));
        assert!(is_splittable("u.name"));
        assert!(!is_splittable("max(u.name)"));
    }

    #[test]
    fn test_builder_for_param_style() {
        assert_eq!(
            builder_for(DbType::Mysql).param_style(),
            ParamStyle::Question
        );
        assert_eq!(builder_for(DbType::Pgsql).param_style(), ParamStyle::Dollar);
        assert_eq!(
            builder_for(DbType::Sqlite).param_style(),
            ParamStyle::Question
        );
    }
}
