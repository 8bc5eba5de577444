//! Bind parameter values.
//!
//! A [`Param`] is one positional bind value carried by a
//! [`SqlFragment`](crate::SqlFragment). Values are plain data with value
//! equality, so fragments can be compared, cached, and rendered for debug
//! logging; [`Param::as_pg_param`] bridges to the `tokio-postgres` binding
//! layer at execution time.

use chrono::{NaiveDate, NaiveDateTime};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

/// A single positional bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Json(serde_json::Value),
}

static NULL_TEXT: Option<String> = None;

impl Param {
    /// Borrow this value as a `tokio-postgres` bind parameter.
    pub fn as_pg_param(&self) -> &(dyn ToSql + Sync) {
        match self {
            Param::Null => &NULL_TEXT,
            Param::Bool(v) => v,
            Param::Int32(v) => v,
            Param::Int64(v) => v,
            Param::Float(v) => v,
            Param::Text(v) => v,
            Param::Bytes(v) => v,
            Param::Uuid(v) => v,
            Param::Timestamp(v) => v,
            Param::Date(v) => v,
            Param::Json(v) => v,
        }
    }

    /// Collect a slice of params into the ref form `tokio-postgres` expects.
    pub fn pg_params(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
        params.iter().map(Param::as_pg_param).collect()
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int32(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int64(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Bytes(v)
    }
}

impl From<Uuid> for Param {
    fn from(v: Uuid) -> Self {
        Param::Uuid(v)
    }
}

impl From<NaiveDateTime> for Param {
    fn from(v: NaiveDateTime) -> Self {
        Param::Timestamp(v)
    }
}

impl From<NaiveDate> for Param {
    fn from(v: NaiveDate) -> Self {
        Param::Date(v)
    }
}

impl From<serde_json::Value> for Param {
    fn from(v: serde_json::Value) -> Self {
        Param::Json(v)
    }
}

impl<T> From<Option<T>> for Param
where
    T: Into<Param>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}
