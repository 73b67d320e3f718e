//! Condition tree and its rendering into SQL boolean expressions.
//!
//! Leaves carry the caller's operator token verbatim; validation happens at
//! render time so an unused malformed condition never fails early. Rendering
//! dispatches per operator class and accumulates bindings into the
//! statement's [`BindSet`].

use crate::builder::SqlBuilder;
use crate::builder::expr::{BindSet, BindType, BindValue, Raw};
use crate::error::{Error, Result};
use crate::query::QueryOptions;

/// Boolean connective joining the children of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Right-hand side of a condition leaf.
#[derive(Debug, Clone)]
pub enum CondValue {
    /// For `NULL` / `NOT NULL`.
    None,
    Value(BindValue),
    List(Vec<BindValue>),
    Raw(Raw),
    /// Correlated subquery, rendered in place (`IN (SELECT ...)`).
    Query(Box<QueryOptions>),
}

impl From<BindValue> for CondValue {
    fn from(v: BindValue) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for CondValue {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for CondValue {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

impl From<i64> for CondValue {
    fn from(v: i64) -> Self {
        Self::Value(v.into())
    }
}

impl From<i32> for CondValue {
    fn from(v: i32) -> Self {
        Self::Value(v.into())
    }
}

impl From<f64> for CondValue {
    fn from(v: f64) -> Self {
        Self::Value(v.into())
    }
}

impl From<Raw> for CondValue {
    fn from(v: Raw) -> Self {
        Self::Raw(v)
    }
}

impl<T: Into<BindValue>> From<Vec<T>> for CondValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// One condition leaf: `(field, operator, value, logic)`.
///
/// `logic` only affects operators that expand to several predicates for one
/// leaf (an array of LIKE patterns).
#[derive(Debug, Clone)]
pub struct WhereItem {
    pub field: String,
    pub op: String,
    pub value: CondValue,
    pub logic: Logic,
}

impl WhereItem {
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: impl Into<CondValue>) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value: value.into(),
            logic: Logic::And,
        }
    }

    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }
}

/// A node of the condition tree. Groups nest arbitrarily; an empty group
/// renders as nothing and is omitted from its parent.
#[derive(Debug, Clone)]
pub enum WhereNode {
    Item(WhereItem),
    Group { logic: Logic, nodes: Vec<WhereNode> },
    Raw(Raw),
}

/// Shorthand for a condition leaf node.
pub fn cond(
    field: impl Into<String>,
    op: impl Into<String>,
    value: impl Into<CondValue>,
) -> WhereNode {
    WhereNode::Item(WhereItem::new(field, op, value))
}

/// Normalize an operator token: uppercase, aliases mapped to canonical form.
/// Unknown tokens pass through and fail in [`render_item`].
fn normalize_op(op: &str) -> String {
    let upper = op.trim().to_uppercase();
    match upper.as_str() {
        "EQ" => "=".to_string(),
        "NEQ" | "NE" => "<>".to_string(),
        "GT" => ">".to_string(),
        "EGT" | "GTE" => ">=".to_string(),
        "LT" => "<".to_string(),
        "ELT" | "LTE" => "<=".to_string(),
        "NOTLIKE" => "NOT LIKE".to_string(),
        "NOTIN" => "NOT IN".to_string(),
        "NOTNULL" => "NOT NULL".to_string(),
        "NOTBETWEEN" => "NOT BETWEEN".to_string(),
        _ => upper,
    }
}

/// Render the WHERE clause of a query, soft-delete filter included.
/// Returns an empty string when there is nothing to render, otherwise a
/// string starting with ` WHERE `.
pub(crate) fn build_where<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    binds: &mut BindSet,
) -> Result<String> {
    let mut where_str = render_group(builder, opts, &opts.wheres, Logic::And, binds)?;

    if let Some((field, op, value)) = &opts.soft_delete {
        let item = WhereItem::new(field.clone(), op.clone(), value.clone());
        let soft = render_item(builder, opts, &item, binds)?;
        where_str = if where_str.is_empty() {
            soft
        } else {
            format!("( {where_str} ) AND {soft}")
        };
    }

    if where_str.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {where_str}"))
    }
}

/// Render a list of nodes joined by `logic`. Empty renders empty.
fn render_group<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    nodes: &[WhereNode],
    logic: Logic,
    binds: &mut BindSet,
) -> Result<String> {
    let mut parts = Vec::new();
    for node in nodes {
        let rendered = match node {
            WhereNode::Item(item) => render_item(builder, opts, item, binds)?,
            WhereNode::Raw(raw) => binds.bind_raw(raw),
            WhereNode::Group { logic, nodes } => {
                let inner = render_group(builder, opts, nodes, *logic, binds)?;
                if inner.is_empty() {
                    String::new()
                } else {
                    format!("( {inner} )")
                }
            }
        };
        if !rendered.is_empty() {
            parts.push(rendered);
        }
    }
    Ok(parts.join(&format!(" {} ", logic.as_str())))
}

/// Render a single condition leaf via the operator-class dispatch table.
fn render_item<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    item: &WhereItem,
    binds: &mut BindSet,
) -> Result<String> {
    let op = normalize_op(&item.op);
    let key = builder.parse_key(opts, &item.field, true)?;
    let bind_type = opts.bind_type_of(&item.field);

    match op.as_str() {
        "=" | "<>" | ">" | ">=" | "<" | "<=" => {
            render_compare(builder, opts, item, &key, &op, bind_type, binds)
        }
        "LIKE" | "NOT LIKE" => render_like(item, &key, &op, binds),
        "NULL" | "NOT NULL" => render_null(builder, opts, item, &op),
        "BETWEEN" | "NOT BETWEEN" => render_between(item, &key, &op, bind_type, binds),
        "IN" | "NOT IN" => render_in(builder, item, &key, &op, bind_type, binds),
        "EXP" => match &item.value {
            CondValue::Raw(raw) => Ok(format!("( {key} {} )", binds.bind_raw(raw))),
            _ => Err(Error::condition(format!(
                "EXP requires a raw expression: {}",
                item.field
            ))),
        },
        other => Err(Error::condition(format!("unknown operator: {other}"))),
    }
}

fn render_compare<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    item: &WhereItem,
    key: &str,
    op: &str,
    bind_type: BindType,
    binds: &mut BindSet,
) -> Result<String> {
    match &item.value {
        CondValue::Value(BindValue::Null) => {
            // NULL with equality semantics degrades to IS [NOT] NULL
            let null_op = if op == "<>" { "NOT NULL" } else { "NULL" };
            render_null(builder, opts, item, null_op)
        }
        CondValue::Value(v) => {
            let placeholder = bind_scalar(opts, &item.field, v, bind_type, binds);
            Ok(format!("{key} {op} {placeholder}"))
        }
        CondValue::Raw(raw) => Ok(format!("{key} {op} {}", binds.bind_raw(raw))),
        CondValue::Query(sub) => {
            let sub_sql = builder.build_select(sub, binds)?;
            Ok(format!("{key} {op} ( {sub_sql} )"))
        }
        CondValue::List(_) | CondValue::None => Err(Error::condition(format!(
            "scalar value required for operator {op}: {}",
            item.field
        ))),
    }
}

fn render_like(item: &WhereItem, key: &str, op: &str, binds: &mut BindSet) -> Result<String> {
    match &item.value {
        CondValue::Value(v) => {
            let name = binds.bind(v.clone(), BindType::Str);
            Ok(format!("{key} {op} :{name}"))
        }
        CondValue::List(values) => {
            let parts: Vec<String> = values
                .iter()
                .map(|v| {
                    let name = binds.bind(v.clone(), BindType::Str);
                    format!("{key} {op} :{name}")
                })
                .collect();
            Ok(format!("({})", parts.join(&format!(" {} ", item.logic.as_str()))))
        }
        _ => Err(Error::condition(format!(
            "LIKE requires a pattern or pattern list: {}",
            item.field
        ))),
    }
}

fn render_null<B: SqlBuilder + ?Sized>(
    builder: &B,
    opts: &QueryOptions,
    item: &WhereItem,
    op: &str,
) -> Result<String> {
    let not = op == "NOT NULL";
    if item.field.contains("->") {
        // JSON member: explicit null and absent member must match identically
        return builder.parse_json_null(opts, &item.field, not);
    }
    let key = builder.parse_key(opts, &item.field, true)?;
    Ok(format!("{key} IS {op}"))
}

fn render_between(
    item: &WhereItem,
    key: &str,
    op: &str,
    bind_type: BindType,
    binds: &mut BindSet,
) -> Result<String> {
    let pair: Vec<BindValue> = match &item.value {
        CondValue::List(values) if values.len() == 2 => values.clone(),
        CondValue::Value(BindValue::Str(s)) if s.contains(',') => {
            let parts: Vec<&str> = s.splitn(2, ',').collect();
            parts.iter().map(|p| BindValue::Str(p.trim().to_string())).collect()
        }
        _ => {
            return Err(Error::condition(format!(
                "BETWEEN requires two values: {}",
                item.field
            )));
        }
    };

    let min = binds.bind(coerce_bind(pair[0].clone(), bind_type), bind_type);
    let max = binds.bind(coerce_bind(pair[1].clone(), bind_type), bind_type);
    Ok(format!("{key} {op} :{min} AND :{max}"))
}

fn render_in<B: SqlBuilder + ?Sized>(
    builder: &B,
    item: &WhereItem,
    key: &str,
    op: &str,
    bind_type: BindType,
    binds: &mut BindSet,
) -> Result<String> {
    let values: Vec<BindValue> = match &item.value {
        CondValue::Query(sub) => {
            let sub_sql = builder.build_select(sub, binds)?;
            return Ok(format!("{key} {op} ( {sub_sql} )"));
        }
        CondValue::Raw(raw) => {
            let sql = binds.bind_raw(raw);
            return Ok(format!("{key} {op} ({sql})"));
        }
        CondValue::List(values) => values.clone(),
        CondValue::Value(BindValue::Str(s)) => s
            .split(',')
            .map(|p| BindValue::Str(p.trim().to_string()))
            .collect(),
        CondValue::Value(v) => vec![v.clone()],
        CondValue::None => Vec::new(),
    };

    let deduped = dedup_values(values);

    // Empty-set policy: IN over nothing can never match, NOT IN always does.
    if deduped.is_empty() {
        return Ok(if op == "IN" { "0 = 1" } else { "1 = 1" }.to_string());
    }

    // A single value collapses to plain equality.
    if deduped.len() == 1 {
        let name = binds.bind(coerce_bind(deduped[0].clone(), bind_type), bind_type);
        let eq = if op == "IN" { "=" } else { "<>" };
        return Ok(format!("{key} {eq} :{name}"));
    }

    let placeholders: Vec<String> = deduped
        .into_iter()
        .map(|v| format!(":{}", binds.bind(coerce_bind(v, bind_type), bind_type)))
        .collect();
    Ok(format!("{key} {op} ({})", placeholders.join(",")))
}

/// Deduplicate preserving first-encounter order.
pub(crate) fn dedup_values(values: Vec<BindValue>) -> Vec<BindValue> {
    let mut seen: Vec<BindValue> = Vec::with_capacity(values.len());
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen
}

/// Coerce a value toward its declared bind type. Strings that fail to parse
/// stay strings; the declared type, not the value shape, decides quoting.
pub(crate) fn coerce_bind(value: BindValue, bind_type: BindType) -> BindValue {
    match bind_type {
        BindType::Int => {
            if let BindValue::Str(s) = &value {
                if let Ok(parsed) = s.trim().parse::<i64>() {
                    return BindValue::Int(parsed);
                }
            }
            value
        }
        BindType::Float => {
            if let BindValue::Str(s) = &value {
                if let Ok(parsed) = s.trim().parse::<f64>() {
                    return BindValue::Float(parsed);
                }
            }
            value
        }
        _ => value,
    }
}

/// Bind one scalar, honoring pre-registered placeholders and temporal
/// coercion for date/datetime/timestamp columns.
fn bind_scalar(
    opts: &QueryOptions,
    field: &str,
    value: &BindValue,
    bind_type: BindType,
    binds: &mut BindSet,
) -> String {
    // A string that is already a registered placeholder passes through.
    if let BindValue::Str(s) = value {
        if let Some(name) = s.strip_prefix(':') {
            if binds.contains(name) {
                return s.clone();
            }
        }
    }

    let value = match opts.field_type_of(field) {
        Some(ty) if is_temporal_type(ty) => coerce_temporal(value.clone(), ty),
        _ => coerce_bind(value.clone(), bind_type),
    };

    let name = binds.bind(value, bind_type);
    format!(":{name}")
}

pub(crate) fn is_temporal_type(ty: &str) -> bool {
    let lower = ty.to_lowercase();
    lower.contains("datetime") || lower.contains("timestamp") || lower.contains("date")
}

/// Convert a numeric or parseable value on a temporal column to the
/// canonical format; non-convertible values pass through unchanged.
pub(crate) fn coerce_temporal(value: BindValue, field_type: &str) -> BindValue {
    let lower = field_type.to_lowercase();
    let datetime = lower.contains("datetime") || lower.contains("timestamp");

    let ts = match &value {
        BindValue::Int(v) => Some(*v),
        BindValue::Str(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match ts.and_then(|t| chrono::DateTime::from_timestamp(t, 0)) {
        Some(dt) if datetime => BindValue::Str(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Some(dt) => BindValue::Str(dt.format("%Y-%m-%d").to_string()),
        None => value,
    }
}
