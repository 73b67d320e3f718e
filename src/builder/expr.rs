//! Expression model: bound values, raw SQL fragments, data payload variants
//! and the named-placeholder set accumulated while rendering one statement.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// A value bound to a named placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Json(JsonValue),
}

impl BindValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Json(_) => "json",
        }
    }

    /// Render as a SQL literal, for inlined (non-bound) statements.
    /// Single quotes in strings are doubled.
    pub fn inline_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Str(v) => format!("'{}'", v.replace('\'', "''")),
            Self::Json(v) => format!("'{}'", v.to_string().replace('\'', "''")),
        }
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for BindValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<JsonValue> for BindValue {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

/// Binding type of a column, looked up from its declared type rather than
/// inspected from the value. Keeps numeric-looking strings quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    Str,
    Int,
    Float,
    Bool,
}

impl BindType {
    /// Classify a declared column type ("int(10) unsigned", "varchar(32)",
    /// "decimal(10,2)", ...).
    pub fn from_field_type(field_type: &str) -> Self {
        let lower = field_type.to_lowercase();
        if lower == "bool" || lower == "boolean" {
            Self::Bool
        } else if lower.contains("int") || lower.contains("serial") {
            Self::Int
        } else if lower.contains("float")
            || lower.contains("double")
            || lower.contains("decimal")
            || lower.contains("numeric")
            || lower.contains("real")
        {
            Self::Float
        } else {
            Self::Str
        }
    }
}

/// An opaque SQL fragment with optional named bind values. Never mutated
/// after construction; ownership stays with the clause holding it.
#[derive(Debug, Clone)]
pub struct Raw {
    sql: String,
    binds: Vec<(String, BindValue)>,
}

impl Raw {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn with_binds(sql: impl Into<String>, binds: Vec<(String, BindValue)>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[(String, BindValue)] {
        &self.binds
    }
}

/// A value in an INSERT/UPDATE payload.
///
/// `Inc`/`Dec` render in-place arithmetic (`col + n` / `col - n`) instead of
/// binding a value; `Raw` is inlined verbatim.
#[derive(Debug, Clone)]
pub enum DataValue {
    Value(BindValue),
    Raw(Raw),
    Inc(f64),
    Dec(f64),
}

impl From<BindValue> for DataValue {
    fn from(v: BindValue) -> Self {
        Self::Value(v)
    }
}

impl From<Raw> for DataValue {
    fn from(v: Raw) -> Self {
        Self::Raw(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Value(v.into())
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        Self::Value(v.into())
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::Value(v.into())
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::Value(v.into())
    }
}

impl From<JsonValue> for DataValue {
    fn from(v: JsonValue) -> Self {
        Self::Value(v.into())
    }
}

/// One row of write data, in caller order.
pub type DataRow = Vec<(String, DataValue)>;

/// Positional placeholder style of the executing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` — MySQL, SQLite
    Question,
    /// `$1`, `$2`, ... — PostgreSQL
    Dollar,
}

/// Append-only set of named bind parameters accumulated while rendering one
/// statement. Names are unique within the set; lifetime is one render +
/// execute cycle.
#[derive(Debug, Default)]
pub struct BindSet {
    params: Vec<(String, BindValue, BindType)>,
    seq: usize,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value under a generated unique name; returns the name.
    pub fn bind(&mut self, value: BindValue, ty: BindType) -> String {
        self.seq += 1;
        let name = format!("p{}", self.seq);
        self.params.push((name.clone(), value, ty));
        name
    }

    /// Merge a raw fragment's binds into the set, renaming on collision.
    /// Returns the fragment SQL with any renamed placeholders substituted.
    pub fn bind_raw(&mut self, raw: &Raw) -> String {
        let mut sql = raw.sql().to_string();
        for (name, value) in raw.binds() {
            if self.contains(name) {
                let fresh = self.bind(value.clone(), BindType::Str);
                sql = sql.replace(&format!(":{name}"), &format!(":{fresh}"));
            } else {
                self.params
                    .push((name.clone(), value.clone(), BindType::Str));
            }
        }
        sql
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&BindValue> {
        self.params
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn values(&self) -> Vec<BindValue> {
        self.params.iter().map(|(_, v, _)| v.clone()).collect()
    }
}

/// Rewrite named `:name` placeholders into the backend's positional style,
/// returning the rewritten SQL and the values in occurrence order.
///
/// The scanner skips quoted literals (`'...'`, `"..."`, backticks) and
/// PostgreSQL `::type` casts. A placeholder with no bound value is a
/// [`Error::BindParam`].
pub fn expand_placeholders(
    sql: &str,
    binds: &BindSet,
    style: ParamStyle,
) -> Result<(String, Vec<BindValue>)> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            ':' => {
                if chars.peek() == Some(&':') {
                    // `::` cast, copy both
                    out.push(':');
                    out.push(chars.next().unwrap_or(':'));
                    continue;
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                    continue;
                }
                let value = binds
                    .get(&name)
                    .ok_or_else(|| Error::bind_param(&name, sql))?;
                values.push(value.clone());
                match style {
                    ParamStyle::Question => out.push('?'),
                    ParamStyle::Dollar => {
                        out.push('$');
                        out.push_str(&values.len().to_string());
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    Ok((out, values))
}

/// Replace named placeholders with inline literals, producing runnable SQL
/// for inspection.
pub fn inline_placeholders(sql: &str, binds: &BindSet) -> Result<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            ':' => {
                if chars.peek() == Some(&':') {
                    out.push(':');
                    out.push(chars.next().unwrap_or(':'));
                    continue;
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                    continue;
                }
                let value = binds
                    .get(&name)
                    .ok_or_else(|| Error::bind_param(&name, sql))?;
                out.push_str(&value.inline_literal());
            }
            _ => out.push(ch),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_names_unique() {
        let mut binds = BindSet::new();
        let a = binds.bind(BindValue::Int(1), BindType::Int);
        let b = binds.bind(BindValue::Int(2), BindType::Int);
        assert_ne!(a, b);
        assert_eq!(binds.len(), 2);
        assert!(binds.contains(&a));
    }

    #[test]
    fn test_bind_raw_renames_collisions() {
        let mut binds = BindSet::new();
        let name = binds.bind(BindValue::Int(1), BindType::Int);
        assert_eq!(name, "p1");

        let raw = Raw::with_binds("type > :p1", vec![("p1".to_string(), BindValue::Int(5))]);
        let sql = binds.bind_raw(&raw);
        assert_ne!(sql, "type > :p1");
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn test_expand_question_style() {
        let mut binds = BindSet::new();
        let a = binds.bind(BindValue::Int(1), BindType::Int);
        let b = binds.bind(BindValue::Str("x".into()), BindType::Str);
        let sql = format!("SELECT * FROM t WHERE id = :{a} AND name = :{b}");
        let (out, values) = expand_placeholders(&sql, &binds, ParamStyle::Question).unwrap();
        assert_eq!(out, "SELECT * FROM t WHERE id = ? AND name = ?");
        assert_eq!(values, vec![BindValue::Int(1), BindValue::Str("x".into())]);
    }

    #[test]
    fn test_expand_dollar_style() {
        let mut binds = BindSet::new();
        let a = binds.bind(BindValue::Int(1), BindType::Int);
        let sql = format!("SELECT * FROM t WHERE id = :{a} OR parent = :{a}");
        let (out, values) = expand_placeholders(&sql, &binds, ParamStyle::Dollar).unwrap();
        assert_eq!(out, "SELECT * FROM t WHERE id = $1 OR parent = $2");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_expand_skips_quoted_and_casts() {
        let mut binds = BindSet::new();
        let a = binds.bind(BindValue::Int(1), BindType::Int);
        let sql = format!("SELECT ':nope', x::text FROM t WHERE id = :{a}");
        let (out, values) = expand_placeholders(&sql, &binds, ParamStyle::Question).unwrap();
        assert_eq!(out, "SELECT ':nope', x::text FROM t WHERE id = ?");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_expand_missing_bind() {
        let binds = BindSet::new();
        let err = expand_placeholders("SELECT :missing", &binds, ParamStyle::Question)
            .expect_err("should fail");
        assert!(matches!(err, crate::error::Error::BindParam { .. }));
    }

    #[test]
    fn test_inline_literals() {
        let mut binds = BindSet::new();
        let a = binds.bind(BindValue::Str("o'brien".into()), BindType::Str);
        let sql = format!("SELECT * FROM t WHERE name = :{a}");
        let out = inline_placeholders(&sql, &binds).unwrap();
        assert_eq!(out, "SELECT * FROM t WHERE name = 'o''brien'");
    }

    #[test]
    fn test_bind_type_classification() {
        assert_eq!(BindType::from_field_type("int(10) unsigned"), BindType::Int);
        assert_eq!(BindType::from_field_type("varchar(32)"), BindType::Str);
        assert_eq!(BindType::from_field_type("decimal(10,2)"), BindType::Float);
        assert_eq!(BindType::from_field_type("boolean"), BindType::Bool);
        assert_eq!(BindType::from_field_type("char(8)"), BindType::Str);
    }
}
