//! SQL-over-HTTP wire types
//!
//! `POST /lsp/new` takes a store blob and answers [`NewLixResponse`].
//! `POST /lsp/lix/{id}/query` takes a [`QueryRequest`] and answers a
//! [`QueryResponse`]. Column values travel as plain JSON except blobs, which
//! are sent as `{"$blob": "<base64>"}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::Connection;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{LixError, Result};

const BLOB_KEY: &str = "$blob";

/// One SQLite value on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn to_sqlite(&self) -> SqliteValue {
        match self {
            SqlValue::Null => SqliteValue::Null,
            SqlValue::Integer(i) => SqliteValue::Integer(*i),
            SqlValue::Real(f) => SqliteValue::Real(*f),
            SqlValue::Text(s) => SqliteValue::Text(s.clone()),
            SqlValue::Blob(b) => SqliteValue::Blob(b.clone()),
        }
    }

    pub fn from_sqlite(value: ValueRef<'_>) -> Result<Self> {
        Ok(match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(
                std::str::from_utf8(t)
                    .map_err(|e| LixError::Other(format!("Invalid UTF-8 in text column: {}", e)))?
                    .to_string(),
            ),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        })
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Integer(i) => serializer.serialize_i64(*i),
            SqlValue::Real(f) => serializer.serialize_f64(*f),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Blob(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BLOB_KEY, &STANDARD.encode(b))?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(b as i64)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
            },
            Value::String(s) => Ok(SqlValue::Text(s)),
            Value::Object(map) => match map.get(BLOB_KEY).and_then(Value::as_str) {
                Some(encoded) if map.len() == 1 => STANDARD
                    .decode(encoded)
                    .map(SqlValue::Blob)
                    .map_err(|e| D::Error::custom(format!("invalid base64 blob: {}", e))),
                _ => Err(D::Error::custom("objects must be {\"$blob\": \"<base64>\"}")),
            },
            Value::Array(_) => Err(D::Error::custom("arrays are not SQL values")),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

/// A result row keyed by column name
pub type SqlRow = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<SqlValue>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<SqlValue>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<SqlRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLixResponse {
    pub id: String,
}

/// Run one statement. Statements without result columns return no rows.
pub fn execute_query(conn: &Connection, request: &QueryRequest) -> Result<QueryResponse> {
    let params: Vec<SqliteValue> = request.params.iter().map(SqlValue::to_sqlite).collect();
    let mut stmt = conn.prepare(&request.sql)?;

    if stmt.column_count() == 0 {
        stmt.execute(rusqlite::params_from_iter(params.iter()))?;
        return Ok(QueryResponse::default());
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = SqlRow::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), SqlValue::from_sqlite(row.get_ref(idx)?)?);
        }
        out.push(record);
    }
    Ok(QueryResponse { rows: out })
}
