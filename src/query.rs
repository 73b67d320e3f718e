//! Query description and the fluent query interface.
//!
//! A [`Query`] accumulates a [`QueryOptions`] through chained setters, then
//! either renders SQL (usable detached from any connection) or executes
//! against its [`Connection`]. The options struct is the in-memory query
//! description the statement builder consumes.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::builder::condition::{CondValue, Logic, WhereItem, WhereNode};
use crate::builder::expr::{BindSet, BindType, BindValue, DataRow, DataValue, Raw, inline_placeholders};
use crate::builder::builder_for;
use crate::config::DbType;
use crate::connection::{Connection, LazyOp, LazyWrite, Row};
use crate::error::{Error, Result};

/// One entry of the field list.
#[derive(Debug, Clone)]
pub enum FieldRef {
    Name(String),
    Alias { field: String, alias: String },
    Raw(Raw),
}

/// One entry of the table list.
#[derive(Debug, Clone)]
pub enum TableRef {
    Name(String),
    Alias { table: String, alias: String },
    Raw(Raw),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Full => "FULL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: TableRef,
    pub kind: JoinType,
    pub on: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One ORDER BY entry.
#[derive(Debug, Clone)]
pub enum OrderItem {
    Field {
        name: String,
        dir: Option<Direction>,
    },
    /// `field(col, v1, v2, ...)` per-value ordering.
    FieldList {
        field: String,
        values: Vec<BindValue>,
        dir: Option<Direction>,
    },
    Raw(Raw),
    Rand,
}

#[derive(Debug, Clone)]
pub enum Lock {
    ForUpdate,
    Clause(String),
}

/// Cache directive attached to a query.
#[derive(Debug, Clone, Default)]
pub struct CacheDirective {
    pub key: Option<String>,
    pub ttl: Option<Duration>,
    pub tag: Option<String>,
}

/// The in-memory query description: clause-name to clause-value, built
/// incrementally and consumed by the statement builder.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub(crate) table: Vec<TableRef>,
    pub(crate) alias: HashMap<String, String>,
    pub(crate) fields: Vec<FieldRef>,
    pub(crate) distinct: bool,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) wheres: Vec<WhereNode>,
    pub(crate) group: Vec<String>,
    pub(crate) having: Option<String>,
    pub(crate) order: Vec<OrderItem>,
    pub(crate) limit: Option<(u64, u64)>,
    pub(crate) lock: Option<Lock>,
    pub(crate) comment: Option<String>,
    pub(crate) extra: Option<String>,
    pub(crate) force_index: Vec<String>,
    pub(crate) strict: Option<bool>,
    pub(crate) auto_bind: bool,
    pub(crate) field_types: HashMap<String, String>,
    pub(crate) soft_delete: Option<(String, String, CondValue)>,
    pub(crate) cache: Option<CacheDirective>,
    pub(crate) master: bool,
    pub(crate) replace: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            table: Vec::new(),
            alias: HashMap::new(),
            fields: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            group: Vec::new(),
            having: None,
            order: Vec::new(),
            limit: None,
            lock: None,
            comment: None,
            extra: None,
            force_index: Vec::new(),
            strict: None,
            auto_bind: true,
            field_types: HashMap::new(),
            soft_delete: None,
            cache: None,
            master: false,
            replace: false,
        }
    }
}

impl QueryOptions {
    /// Base name of the primary table, for `__TABLE__` substitution.
    pub(crate) fn current_table(&self) -> Option<&str> {
        self.table.first().and_then(|t| match t {
            TableRef::Name(name) => Some(name.as_str()),
            TableRef::Alias { table, .. } => Some(table.as_str()),
            TableRef::Raw(_) => None,
        })
    }

    /// Declared type of a field, qualifier and JSON path stripped.
    pub(crate) fn field_type_of(&self, field: &str) -> Option<&str> {
        let base = field.split_once("->").map(|(f, _)| f).unwrap_or(field);
        let base = base.rsplit_once('.').map(|(_, c)| c).unwrap_or(base);
        self.field_types.get(base).map(String::as_str)
    }

    /// Binding type from the declared field type; the value's shape never
    /// decides quoting.
    pub(crate) fn bind_type_of(&self, field: &str) -> BindType {
        self.field_type_of(field)
            .map(BindType::from_field_type)
            .unwrap_or(BindType::Str)
    }

    /// The restrictive field set consulted before accepting write data.
    /// `None` means everything is allowed.
    pub(crate) fn allowed_fields(&self) -> Option<Vec<String>> {
        let wildcard = self.fields.is_empty()
            || self
                .fields
                .iter()
                .any(|f| matches!(f, FieldRef::Name(n) if n == "*"));
        if !wildcard {
            let named: Vec<String> = self
                .fields
                .iter()
                .filter_map(|f| match f {
                    FieldRef::Name(n) => Some(n.clone()),
                    FieldRef::Alias { field, .. } => Some(field.clone()),
                    FieldRef::Raw(_) => None,
                })
                .collect();
            if !named.is_empty() {
                return Some(named);
            }
        }
        if !self.field_types.is_empty() {
            return Some(self.field_types.keys().cloned().collect());
        }
        None
    }

    pub(crate) fn effective_strict(&self) -> bool {
        self.strict.unwrap_or(true)
    }
}

/// Fluent query over one table.
///
/// Detached queries (no connection) can still render SQL for any dialect;
/// executing operations require a bound connection.
#[derive(Clone)]
pub struct Query {
    conn: Option<Arc<Connection>>,
    db_type: DbType,
    pub(crate) options: QueryOptions,
}

impl Query {
    /// Detached query rendering SQL for the given dialect.
    pub fn table_for(db_type: DbType, table: &str) -> Self {
        let mut options = QueryOptions::default();
        options.table.push(TableRef::Name(table.to_string()));
        Self {
            conn: None,
            db_type,
            options,
        }
    }

    /// Query bound to a connection.
    pub fn table_on(conn: &Arc<Connection>, table: &str) -> Self {
        let mut query = Self::table_for(conn.db_type(), table);
        query.options.strict = Some(conn.config().fields_strict);
        query.options.auto_bind = conn.config().auto_bind;
        query.conn = Some(conn.clone());
        query
    }

    fn conn(&self) -> Result<Arc<Connection>> {
        self.conn
            .clone()
            .ok_or_else(|| Error::config("query is not bound to a connection"))
    }

    // ------------------------------------------------------------------
    // Chained clause setters
    // ------------------------------------------------------------------

    /// Alias the primary table.
    pub fn alias(mut self, alias: &str) -> Self {
        if let Some(name) = self.options.current_table().map(str::to_string) {
            self.options.alias.insert(name, alias.to_string());
        }
        self
    }

    /// Field list: comma-separated names, `*`, or `expr as alias` entries.
    pub fn field(mut self, fields: &str) -> Self {
        if fields.trim() == "*" {
            self.options.fields.clear();
            return self;
        }
        for token in fields.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let lower = token.to_lowercase();
            if let Some(pos) = lower.find(" as ") {
                let field = token[..pos].trim().to_string();
                let alias = token[pos + 4..].trim().to_string();
                self.options.fields.push(FieldRef::Alias { field, alias });
            } else {
                self.options.fields.push(FieldRef::Name(token.to_string()));
            }
        }
        self
    }

    pub fn field_alias(mut self, field: &str, alias: &str) -> Self {
        self.options.fields.push(FieldRef::Alias {
            field: field.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn field_raw(mut self, raw: Raw) -> Self {
        self.options.fields.push(FieldRef::Raw(raw));
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.options.distinct = distinct;
        self
    }

    fn push_join(mut self, table: &str, kind: JoinType, on: &str) -> Self {
        let table_ref = match table.trim().split_once(' ') {
            Some((name, alias)) => TableRef::Alias {
                table: name.trim().to_string(),
                alias: alias.trim().to_string(),
            },
            None => TableRef::Name(table.trim().to_string()),
        };
        self.options.joins.push(JoinClause {
            table: table_ref,
            kind,
            on: on.to_string(),
        });
        self
    }

    /// `table` accepts `"name"` or `"name alias"`.
    pub fn join(self, table: &str, on: &str) -> Self {
        self.push_join(table, JoinType::Inner, on)
    }

    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.push_join(table, JoinType::Left, on)
    }

    pub fn right_join(self, table: &str, on: &str) -> Self {
        self.push_join(table, JoinType::Right, on)
    }

    pub fn full_join(self, table: &str, on: &str) -> Self {
        self.push_join(table, JoinType::Full, on)
    }

    pub fn where_node(mut self, node: WhereNode) -> Self {
        self.options.wheres.push(node);
        self
    }

    /// `(field, operator, value)` — the operator token is validated at
    /// render time.
    pub fn where_op(self, field: &str, op: &str, value: impl Into<CondValue>) -> Self {
        self.where_node(WhereNode::Item(WhereItem::new(field, op, value)))
    }

    pub fn where_eq(self, field: &str, value: impl Into<BindValue>) -> Self {
        self.where_op(field, "=", CondValue::Value(value.into()))
    }

    pub fn where_null(self, field: &str) -> Self {
        self.where_op(field, "NULL", CondValue::None)
    }

    pub fn where_not_null(self, field: &str) -> Self {
        self.where_op(field, "NOT NULL", CondValue::None)
    }

    pub fn where_in<V: Into<BindValue>>(self, field: &str, values: Vec<V>) -> Self {
        self.where_op(field, "IN", CondValue::List(values.into_iter().map(Into::into).collect()))
    }

    pub fn where_not_in<V: Into<BindValue>>(self, field: &str, values: Vec<V>) -> Self {
        self.where_op(
            field,
            "NOT IN",
            CondValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// IN over a subquery, rendered in place.
    pub fn where_in_query(self, field: &str, sub: Query) -> Self {
        self.where_op(field, "IN", CondValue::Query(Box::new(sub.options)))
    }

    pub fn where_between(self, field: &str, value: impl Into<CondValue>) -> Self {
        self.where_op(field, "BETWEEN", value)
    }

    pub fn where_not_between(self, field: &str, value: impl Into<CondValue>) -> Self {
        self.where_op(field, "NOT BETWEEN", value)
    }

    pub fn where_like(self, field: &str, pattern: &str) -> Self {
        self.where_op(field, "LIKE", pattern)
    }

    pub fn where_not_like(self, field: &str, pattern: &str) -> Self {
        self.where_op(field, "NOT LIKE", pattern)
    }

    /// Several LIKE patterns for one field, joined by `logic`.
    pub fn where_like_any(self, field: &str, patterns: Vec<&str>, logic: Logic) -> Self {
        let values: Vec<BindValue> = patterns.into_iter().map(Into::into).collect();
        self.where_node(WhereNode::Item(
            WhereItem::new(field, "LIKE", CondValue::List(values)).with_logic(logic),
        ))
    }

    /// `( field <raw expression> )`
    pub fn where_exp(self, field: &str, raw: Raw) -> Self {
        self.where_op(field, "EXP", CondValue::Raw(raw))
    }

    pub fn where_raw(self, raw: Raw) -> Self {
        self.where_node(WhereNode::Raw(raw))
    }

    /// Nested group joined by `logic`, e.g. `( a OR b )`.
    pub fn where_group(self, logic: Logic, nodes: Vec<WhereNode>) -> Self {
        self.where_node(WhereNode::Group { logic, nodes })
    }

    /// `"name"`, `"name desc"` or `"name asc"`.
    pub fn order(mut self, field: &str) -> Self {
        let token = field.trim();
        let (name, dir) = match token.rsplit_once(' ') {
            Some((n, d)) if d.eq_ignore_ascii_case("desc") => (n.trim(), Some(Direction::Desc)),
            Some((n, d)) if d.eq_ignore_ascii_case("asc") => (n.trim(), Some(Direction::Asc)),
            _ => (token, None),
        };
        self.options.order.push(OrderItem::Field {
            name: name.to_string(),
            dir,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.options.order.push(OrderItem::Field {
            name: field.to_string(),
            dir: Some(Direction::Desc),
        });
        self
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.options.order.push(OrderItem::Field {
            name: field.to_string(),
            dir: Some(Direction::Asc),
        });
        self
    }

    pub fn order_raw(mut self, raw: Raw) -> Self {
        self.options.order.push(OrderItem::Raw(raw));
        self
    }

    pub fn order_rand(mut self) -> Self {
        self.options.order.push(OrderItem::Rand);
        self
    }

    /// Explicit per-value ordering with a sort direction.
    pub fn order_field<V: Into<BindValue>>(
        mut self,
        field: &str,
        values: Vec<V>,
        dir: Option<Direction>,
    ) -> Self {
        self.options.order.push(OrderItem::FieldList {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            dir,
        });
        self
    }

    pub fn group(mut self, fields: &str) -> Self {
        for token in fields.split(',') {
            let token = token.trim();
            if !token.is_empty() {
                self.options.group.push(token.to_string());
            }
        }
        self
    }

    pub fn having(mut self, having: &str) -> Self {
        self.options.having = Some(having.to_string());
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.options.limit = Some((0, count));
        self
    }

    pub fn limit_offset(mut self, offset: u64, count: u64) -> Self {
        self.options.limit = Some((offset, count));
        self
    }

    /// 1-based pagination.
    pub fn page(mut self, page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        self.options.limit = Some(((page - 1) * per_page, per_page));
        self
    }

    pub fn lock(mut self, lock: bool) -> Self {
        self.options.lock = lock.then_some(Lock::ForUpdate);
        self
    }

    pub fn lock_clause(mut self, clause: &str) -> Self {
        self.options.lock = Some(Lock::Clause(clause.to_string()));
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.options.comment = Some(comment.to_string());
        self
    }

    pub fn extra(mut self, extra: &str) -> Self {
        self.options.extra = Some(extra.to_string());
        self
    }

    pub fn force_index(mut self, index: &str) -> Self {
        self.options.force_index.push(index.to_string());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = Some(strict);
        self
    }

    pub fn auto_bind(mut self, auto_bind: bool) -> Self {
        self.options.auto_bind = auto_bind;
        self
    }

    /// Declare column types, used for bind typing and temporal coercion.
    pub fn field_types<K: Into<String>, V: Into<String>>(mut self, types: Vec<(K, V)>) -> Self {
        for (field, ty) in types {
            self.options.field_types.insert(field.into(), ty.into());
        }
        self
    }

    /// Soft-delete filter appended to every WHERE clause of this query.
    pub fn soft_delete(mut self, field: &str, op: &str, value: impl Into<CondValue>) -> Self {
        self.options.soft_delete = Some((field.to_string(), op.to_string(), value.into()));
        self
    }

    /// Cache the select result (and invalidate on writes through the same
    /// directive). `key` defaults to a hash of the rendered statement.
    pub fn cache(mut self, key: Option<&str>, ttl: Option<Duration>, tag: Option<&str>) -> Self {
        self.options.cache = Some(CacheDirective {
            key: key.map(str::to_string),
            ttl,
            tag: tag.map(str::to_string),
        });
        self
    }

    /// Force this query onto the write link.
    pub fn master(mut self) -> Self {
        self.options.master = true;
        self
    }

    /// Render `REPLACE` instead of `INSERT`.
    pub fn replace(mut self) -> Self {
        self.options.replace = true;
        self
    }

    /// Remove a previously set clause by name.
    pub fn remove_option(mut self, name: &str) -> Self {
        match name {
            "field" => self.options.fields.clear(),
            "where" => self.options.wheres.clear(),
            "order" => self.options.order.clear(),
            "group" => self.options.group.clear(),
            "having" => self.options.having = None,
            "limit" => self.options.limit = None,
            "lock" => self.options.lock = None,
            "comment" => self.options.comment = None,
            "extra" => self.options.extra = None,
            "cache" => self.options.cache = None,
            "distinct" => self.options.distinct = false,
            "join" => self.options.joins.clear(),
            "soft_delete" => self.options.soft_delete = None,
            _ => {}
        }
        self
    }

    // ------------------------------------------------------------------
    // SQL rendering
    // ------------------------------------------------------------------

    pub fn build_select(&self) -> Result<(String, BindSet)> {
        let mut binds = BindSet::new();
        let sql = builder_for(self.db_type).build_select(&self.options, &mut binds)?;
        Ok((sql, binds))
    }

    pub fn build_insert(&self, data: &DataRow) -> Result<(String, BindSet)> {
        let mut binds = BindSet::new();
        let sql = builder_for(self.db_type).build_insert(&self.options, data, &mut binds)?;
        Ok((sql, binds))
    }

    pub fn build_insert_all(&self, rows: &[DataRow]) -> Result<(String, BindSet)> {
        let mut binds = BindSet::new();
        let sql = builder_for(self.db_type).build_insert_all(&self.options, rows, &mut binds)?;
        Ok((sql, binds))
    }

    pub fn build_update(&self, data: &DataRow) -> Result<(String, BindSet)> {
        let mut binds = BindSet::new();
        let sql = builder_for(self.db_type).build_update(&self.options, data, &mut binds)?;
        Ok((sql, binds))
    }

    pub fn build_delete(&self) -> Result<(String, BindSet)> {
        let mut binds = BindSet::new();
        let sql = builder_for(self.db_type).build_delete(&self.options, &mut binds)?;
        Ok((sql, binds))
    }

    /// Rendered SELECT with bind values inlined, for inspection.
    pub fn select_sql(&self) -> Result<String> {
        let (sql, binds) = self.build_select()?;
        inline_placeholders(&sql, &binds)
    }

    pub fn insert_sql(&self, data: &DataRow) -> Result<String> {
        let (sql, binds) = self.build_insert(data)?;
        inline_placeholders(&sql, &binds)
    }

    pub fn update_sql(&self, data: &DataRow) -> Result<String> {
        let (sql, binds) = self.build_update(data)?;
        inline_placeholders(&sql, &binds)
    }

    pub fn delete_sql(&self) -> Result<String> {
        let (sql, binds) = self.build_delete()?;
        inline_placeholders(&sql, &binds)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run the select, consulting the cache directive when one is set.
    pub async fn select(self) -> Result<Vec<Row>> {
        let conn = self.conn()?;
        let (sql, binds) = self.build_select()?;

        let cache_key = self.cache_key(&sql, &binds);
        if let (Some(cache), Some(key)) = (conn.cache(), &cache_key) {
            if let Some(value) = cache.get(key) {
                if let Some(rows) = rows_from_json(value) {
                    return Ok(rows);
                }
            }
        }

        let rows = conn.query_bound(&sql, &binds, self.options.master).await?;

        if let (Some(cache), Some(key), Some(directive)) =
            (conn.cache(), &cache_key, &self.options.cache)
        {
            let value = rows_to_json(&rows);
            match &directive.tag {
                Some(tag) => cache.set_tagged(tag, key, value, directive.ttl),
                None => cache.set(key, value, directive.ttl),
            }
        }

        Ok(rows)
    }

    /// First matching row.
    pub async fn find(mut self) -> Result<Option<Row>> {
        self.options.limit = Some((0, 1));
        Ok(self.select().await?.into_iter().next())
    }

    /// One field of the first matching row.
    pub async fn value(mut self, field: &str) -> Result<Option<JsonValue>> {
        self.options.fields.clear();
        self = self.field(field);
        self.options.limit = Some((0, 1));
        let rows = self.select().await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v)))
    }

    /// One field of every matching row.
    pub async fn column(mut self, field: &str) -> Result<Vec<JsonValue>> {
        self.options.fields.clear();
        self = self.field(field);
        let rows = self.select().await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().map(|(_, v)| v))
            .collect())
    }

    pub async fn count(self) -> Result<u64> {
        let conn = self.conn()?;
        let builder = builder_for(self.db_type);
        let mut binds = BindSet::new();

        let sql = if self.options.group.is_empty() {
            let mut opts = self.options.clone();
            opts.fields = vec![FieldRef::Raw(Raw::new("COUNT(*) AS sqlgate_count"))];
            opts.order.clear();
            opts.limit = None;
            builder.build_select(&opts, &mut binds)?
        } else {
            // Grouped counts need the whole statement wrapped
            let inner = builder.build_select(&self.options, &mut binds)?;
            format!("SELECT COUNT(*) AS sqlgate_count FROM ( {inner} ) count_alias")
        };

        let rows = conn.query_bound(&sql, &binds, self.options.master).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("sqlgate_count"))
            .and_then(json_to_u64)
            .unwrap_or(0))
    }

    pub async fn insert<I, K, V>(self, data: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let data: DataRow = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let conn = self.conn()?;
        let (sql, binds) = self.build_insert(&data)?;
        let affected = conn.execute_bound(&sql, &binds).await?;
        self.invalidate_cache(&conn);
        Ok(affected)
    }

    pub async fn insert_all<I, K, V>(self, rows: Vec<I>) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let rows: Vec<DataRow> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            .collect();
        let conn = self.conn()?;
        let (sql, binds) = self.build_insert_all(&rows)?;
        let affected = conn.execute_bound(&sql, &binds).await?;
        self.invalidate_cache(&conn);
        Ok(affected)
    }

    pub async fn update<I, K, V>(self, data: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DataValue>,
    {
        let data: DataRow = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.update_row(data).await
    }

    async fn update_row(self, data: DataRow) -> Result<u64> {
        if self.options.wheres.is_empty() && self.options.soft_delete.is_none() {
            return Err(Error::condition("miss update condition"));
        }
        let conn = self.conn()?;
        let (sql, binds) = self.build_update(&data)?;
        let affected = conn.execute_bound(&sql, &binds).await?;
        self.invalidate_cache(&conn);
        Ok(affected)
    }

    pub async fn delete(self) -> Result<u64> {
        if self.options.wheres.is_empty() && self.options.soft_delete.is_none() {
            return Err(Error::condition("miss delete condition"));
        }
        self.delete_all().await
    }

    /// Delete without requiring a condition.
    pub async fn delete_all(self) -> Result<u64> {
        let conn = self.conn()?;
        let (sql, binds) = self.build_delete()?;
        let affected = conn.execute_bound(&sql, &binds).await?;
        self.invalidate_cache(&conn);
        Ok(affected)
    }

    /// Immediate `col = col + step`.
    pub async fn set_inc(self, field: &str, step: f64) -> Result<u64> {
        self.update_row(vec![(field.to_string(), DataValue::Inc(step))])
            .await
    }

    /// Immediate `col = col - step`.
    pub async fn set_dec(self, field: &str, step: f64) -> Result<u64> {
        self.update_row(vec![(field.to_string(), DataValue::Dec(step))])
            .await
    }

    /// Lazy counter increment: deltas accumulate in the cache during the
    /// delay window; the first call after the window persists the total.
    pub async fn set_inc_lazy(self, field: &str, step: f64, window: Duration) -> Result<LazyWrite> {
        self.lazy(field, step, window, LazyOp::Inc).await
    }

    pub async fn set_dec_lazy(self, field: &str, step: f64, window: Duration) -> Result<LazyWrite> {
        self.lazy(field, step, window, LazyOp::Dec).await
    }

    async fn lazy(self, field: &str, step: f64, window: Duration, op: LazyOp) -> Result<LazyWrite> {
        let conn = self.conn()?;
        let guid = self.lazy_guid(&conn, field);
        match conn.lazy_write(op, &guid, step, window) {
            LazyWrite::Written(delta) => {
                self.update_row(vec![(field.to_string(), DataValue::Inc(delta))])
                    .await?;
                Ok(LazyWrite::Written(delta))
            }
            outcome => Ok(outcome),
        }
    }

    fn lazy_guid(&self, conn: &Connection, field: &str) -> String {
        let mut hasher = DefaultHasher::new();
        conn.name().hash(&mut hasher);
        if let Some(table) = self.options.current_table() {
            table.hash(&mut hasher);
        }
        field.hash(&mut hasher);
        format!("{:?}", self.options.wheres).hash(&mut hasher);
        format!("sqlgate:lazy:{:x}", hasher.finish())
    }

    fn cache_key(&self, sql: &str, binds: &BindSet) -> Option<String> {
        let directive = self.options.cache.as_ref()?;
        if let Some(key) = &directive.key {
            return Some(key.clone());
        }
        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        format!("{:?}", binds.values()).hash(&mut hasher);
        Some(format!("sqlgate:query:{:x}", hasher.finish()))
    }

    fn invalidate_cache(&self, conn: &Connection) {
        let Some(directive) = &self.options.cache else {
            return;
        };
        let Some(cache) = conn.cache() else {
            return;
        };
        if let Some(tag) = &directive.tag {
            cache.clear_tag(tag);
        }
        if let Some(key) = &directive.key {
            cache.delete(key);
        }
    }
}

fn rows_to_json(rows: &[Row]) -> JsonValue {
    JsonValue::Array(rows.iter().cloned().map(JsonValue::Object).collect())
}

fn rows_from_json(value: JsonValue) -> Option<Vec<Row>> {
    let JsonValue::Array(items) = value else {
        return None;
    };
    items
        .into_iter()
        .map(|item| match item {
            JsonValue::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

fn json_to_u64(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v.max(0) as u64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parsing() {
        let q = Query::table_for(DbType::Mysql, "user").field("id, username as name2 ,nickname");
        assert_eq!(q.options.fields.len(), 3);
        assert!(matches!(&q.options.fields[1], FieldRef::Alias { field, alias }
            if field == "username" && alias == "name2"));
    }

    #[test]
    fn test_wildcard_clears_fields() {
        let q = Query::table_for(DbType::Mysql, "user").field("id").field("*");
        assert!(q.options.fields.is_empty());
    }

    #[test]
    fn test_order_parsing() {
        let q = Query::table_for(DbType::Mysql, "user").order("id desc").order("name");
        assert!(matches!(&q.options.order[0], OrderItem::Field { name, dir }
            if name == "id" && *dir == Some(Direction::Desc)));
        assert!(matches!(&q.options.order[1], OrderItem::Field { name, dir }
            if name == "name" && dir.is_none()));
    }

    #[test]
    fn test_page_computes_offset() {
        let q = Query::table_for(DbType::Mysql, "user").page(3, 20);
        assert_eq!(q.options.limit, Some((40, 20)));

        let q = Query::table_for(DbType::Mysql, "user").page(0, 20);
        assert_eq!(q.options.limit, Some((0, 20)));
    }

    #[test]
    fn test_allowed_fields_from_field_list() {
        let q = Query::table_for(DbType::Mysql, "user").field("id,name");
        let allowed = q.options.allowed_fields().unwrap();
        assert!(allowed.contains(&"id".to_string()));
        assert!(allowed.contains(&"name".to_string()));
    }

    #[test]
    fn test_bind_type_lookup_strips_qualifiers() {
        let q = Query::table_for(DbType::Mysql, "user")
            .field_types(vec![("age", "int(10)"), ("name", "varchar(32)")]);
        assert_eq!(q.options.bind_type_of("u.age"), BindType::Int);
        assert_eq!(q.options.bind_type_of("name"), BindType::Str);
        // Undeclared fields default to string binding
        assert_eq!(q.options.bind_type_of("other"), BindType::Str);
    }

    #[test]
    fn test_detached_execution_is_config_error() {
        let q = Query::table_for(DbType::Mysql, "user");
        let err = q.conn().expect_err("detached query has no connection");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_remove_option() {
        let q = Query::table_for(DbType::Mysql, "user")
            .where_eq("id", 1i64)
            .order("id")
            .limit(5);
        let q = q.remove_option("where").remove_option("limit");
        assert!(q.options.wheres.is_empty());
        assert!(q.options.limit.is_none());
        assert_eq!(q.options.order.len(), 1);
    }
}
