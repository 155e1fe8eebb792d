//! `%(name)s` templates and parameterized column types.
//!
//! Backend `data_types` entries and schema editor `sql_*` statements are
//! written as `%(name)s` templates. Scalar context values are inlined; list
//! values expand to one `%s` placeholder per item and the items become
//! positional parameters of the rendered [`DbType`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value as Json};
use thiserror::Error;

use django_more_core::DjangoError;

use crate::value::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\((\w+)\)s").expect("valid regex"));

/// A template referenced a parameter the context does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("template '{template}' is missing parameter '{key}'")]
pub struct MissingParameter {
    pub template: String,
    pub key: String,
}

impl From<MissingParameter> for DjangoError {
    fn from(err: MissingParameter) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}

/// A rendered SQL fragment together with its positional parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DbType {
    sql: String,
    params: Vec<Value>,
}

impl DbType {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_parameterized(&self) -> bool {
        !self.params.is_empty()
    }

    /// The `(sql, params)` pair.
    pub fn parameterized(&self) -> (&str, &[Value]) {
        (&self.sql, &self.params)
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    /// `{"sql": .., "params": [..]}`, the form passed to host methods.
    pub fn to_json(&self) -> Json {
        json!({
            "sql": self.sql,
            "params": self.params.iter().map(Value::to_json).collect::<Vec<_>>(),
        })
    }

    /// Accepts the object form or a bare SQL string.
    pub fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::String(sql) => Some(Self::new(sql.clone())),
            Json::Object(map) => {
                let sql = map.get("sql")?.as_str()?;
                let params = map
                    .get("params")
                    .and_then(Json::as_array)
                    .map(|items| items.iter().map(Value::from_json).collect())
                    .unwrap_or_default();
                Some(Self::with_params(sql, params))
            }
            _ => None,
        }
    }
}

/// Renders `template` against `context`.
///
/// # Examples
///
/// ```
/// use django_more_db::template::render;
/// use serde_json::json;
///
/// let context = json!({"values": ["on", "off"]});
/// let db_type = render("enum(%(values)s)", context.as_object().unwrap()).unwrap();
/// assert_eq!(db_type.sql(), "enum(%s, %s)");
/// assert_eq!(db_type.params().len(), 2);
/// ```
pub fn render(template: &str, context: &Map<String, Json>) -> Result<DbType, MissingParameter> {
    let mut sql = String::with_capacity(template.len());
    let mut params = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        sql.push_str(&template[last..whole.start()]);
        last = whole.end();

        let value = context.get(key.as_str()).ok_or_else(|| MissingParameter {
            template: template.to_string(),
            key: key.as_str().to_string(),
        })?;
        match value {
            Json::Array(items) => {
                sql.push_str(&vec!["%s"; items.len()].join(", "));
                params.extend(items.iter().map(Value::from_json));
            }
            Json::String(s) => sql.push_str(s),
            Json::Null => sql.push_str("NULL"),
            other => sql.push_str(&other.to_string()),
        }
    }
    sql.push_str(&template[last..]);

    Ok(DbType::with_params(sql, params))
}

/// Renders a template whose parameters are all scalars.
pub fn render_sql(template: &str, context: &Map<String, Json>) -> Result<String, MissingParameter> {
    render(template, context).map(|db_type| db_type.sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(value: Json) -> Map<String, Json> {
        value.as_object().cloned().unwrap()
    }

    // ── render ──

    #[test]
    fn test_render_scalars_inline() {
        let rendered = render(
            "varchar(%(max_length)s)",
            &ctx(json!({"max_length": 12})),
        )
        .unwrap();
        assert_eq!(rendered.sql(), "varchar(12)");
        assert!(!rendered.is_parameterized());
    }

    #[test]
    fn test_render_lists_become_params() {
        let rendered = render(
            "CREATE TYPE %(enum_type)s AS ENUM (%(values)s)",
            &ctx(json!({"enum_type": "shop_status", "values": ["A", "B"]})),
        )
        .unwrap();
        assert_eq!(rendered.sql(), "CREATE TYPE shop_status AS ENUM (%s, %s)");
        assert_eq!(rendered.params(), &[Value::from("A"), Value::from("B")]);
    }

    #[test]
    fn test_render_missing_parameter() {
        let err = render("%(type_name)s", &Map::new()).unwrap_err();
        assert_eq!(err.key, "type_name");
        let django: DjangoError = err.into();
        assert!(matches!(django, DjangoError::ConfigurationError(_)));
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(render_sql("text", &Map::new()).unwrap(), "text");
    }

    // ── DbType ──

    #[test]
    fn test_db_type_json_forms() {
        let db_type = DbType::with_params("enum(%s)", vec![Value::from("x")]);
        let json = db_type.to_json();
        assert_eq!(json, json!({"sql": "enum(%s)", "params": ["x"]}));
        assert_eq!(DbType::from_json(&json), Some(db_type));
        assert_eq!(DbType::from_json(&json!("integer")), Some(DbType::new("integer")));
        assert_eq!(DbType::from_json(&json!(3)), None);
    }

    #[test]
    fn test_parameterized_pair() {
        let db_type = DbType::with_params("enum(%s, %s)", vec![Value::from("a"), Value::from("b")]);
        let (sql, params) = db_type.parameterized();
        assert_eq!(sql, "enum(%s, %s)");
        assert_eq!(params.len(), 2);
    }
}
