//! SQL dialect abstraction.
//!
//! A [`SqlDialect`] is a stateless strategy object encapsulating one
//! backend's syntax differences: row limiting, boolean literals, identifier
//! quoting policy, type-name mapping, temp-table naming, and debug parameter
//! substitution. One instance per backend is selected when a connection pool
//! is configured and shared read-only by all threads.
//!
//! Methods with no sane portable fallback return
//! [`DbError::Unsupported`](crate::DbError) naming the missing capability,
//! distinctly from composition defects, so callers can pick a fallback
//! strategy or fail fast.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DbError, DbResult};
use crate::fragment::SqlFragment;
use crate::scan;
use crate::value::Param;
use regex::Regex;

mod mssql;
mod postgres;


pub use mssql::SqlServerDialect;
pub use postgres::PostgresDialect;

/// Portable type codes, the JDBC-style lingua franca between native
/// type names and column metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Bigint,
    Boolean,
    Char,
    Date,
    Decimal,
    Double,
    Integer,
    LongVarchar,
    Numeric,
    Real,
    Smallint,
    Time,
    Timestamp,
    Tinyint,
    Varbinary,
    Varchar,
    Guid,
    Json,
    Other,
}

impl SqlType {
    /// The portable name for this type code.
    pub fn portable_name(self) -> &'static str {
        match self {
            SqlType::Bigint => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Char => "CHAR",
            SqlType::Date => "DATE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Double => "DOUBLE",
            SqlType::Integer => "INTEGER",
            SqlType::LongVarchar => "LONGVARCHAR",
            SqlType::Numeric => "NUMERIC",
            SqlType::Real => "REAL",
            SqlType::Smallint => "SMALLINT",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Tinyint => "TINYINT",
            SqlType::Varbinary => "VARBINARY",
            SqlType::Varchar => "VARCHAR",
            SqlType::Guid => "GUID",
            SqlType::Json => "JSON",
            SqlType::Other => "OTHER",
        }
    }
}

static LEGAL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// True when `id` can appear unquoted in any supported dialect.
pub fn is_legal_bare_identifier(id: &str) -> bool {
    LEGAL_IDENTIFIER.is_match(id)
}

static TEMP_TABLE_COUNTER: AtomicU64 = AtomicU64::new(0);

// Shared fallback used by the dialect type-name lookups.
pub(crate) fn lookup_type(
    product: &'static str,
    map: &std::collections::HashMap<&'static str, SqlType>,
    type_name: &str,
) -> SqlType {
    match map.get(type_name.to_ascii_lowercase().as_str()) {
        Some(t) => *t,
        None => {
            tracing::warn!(
                dialect = product,
                type_name,
                "unknown SQL type name, treating as OTHER"
            );
            SqlType::Other
        }
    }
}

/// One backend's SQL syntax strategy. Implementations are stateless and
/// shared freely across threads.
pub trait SqlDialect: Send + Sync {
    /// Product name used in logs and capability errors.
    fn product_name(&self) -> &'static str;

    // ==================== Row limiting ====================

    /// Compose a single SELECT from the given pieces, honoring `row_count`
    /// (0 = unlimited) and a 0-based `offset`.
    fn limit_rows(
        &self,
        select: &SqlFragment,
        from: &SqlFragment,
        filter: Option<&SqlFragment>,
        order: Option<&str>,
        row_count: u64,
        offset: u64,
    ) -> DbResult<SqlFragment>;

    /// Apply `row_count`/`offset` to an already-composed SELECT.
    fn append_limit(&self, sql: SqlFragment, row_count: u64, offset: u64)
    -> DbResult<SqlFragment>;

    /// Does `limit_rows` accept a nonzero offset?
    fn supports_offset(&self) -> bool;

    /// Can comments be embedded in statement text?
    fn supports_comments(&self) -> bool;

    // ==================== Literals ====================

    /// Boolean literal syntax; not portable across backends.
    fn boolean_literal(&self, value: bool) -> &'static str;

    fn boolean_true(&self) -> SqlFragment {
        SqlFragment::new(self.boolean_literal(true))
    }

    fn boolean_false(&self) -> SqlFragment {
        SqlFragment::new(self.boolean_literal(false))
    }

    /// Quote a string literal (embedded quotes doubled).
    fn quote_string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Binary literal rendering for debug output.
    fn binary_literal(&self, value: &[u8]) -> String {
        let hex: String = value.iter().map(|b| format!("{b:02x}")).collect();
        format!("X'{hex}'")
    }

    /// Render one parameter value as a dialect literal. Debug output only.
    fn literal(&self, value: &Param) -> String {
        match value {
            Param::Null => "NULL".to_string(),
            Param::Bool(b) => self.boolean_literal(*b).to_string(),
            Param::Int32(v) => v.to_string(),
            Param::Int64(v) => v.to_string(),
            Param::Float(v) => v.to_string(),
            Param::Text(s) => self.quote_string_literal(s),
            Param::Bytes(b) => self.binary_literal(b),
            Param::Uuid(u) => self.quote_string_literal(&u.to_string()),
            Param::Timestamp(ts) => {
                self.quote_string_literal(&ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            Param::Date(d) => self.quote_string_literal(&d.format("%Y-%m-%d").to_string()),
            Param::Json(v) => self.quote_string_literal(&v.to_string()),
        }
    }

    // ==================== Identifiers ====================

    /// Is `word` reserved in this dialect (case-insensitive)?
    fn is_reserved(&self, word: &str) -> bool;

    /// Quote an identifier unconditionally, doubling embedded quotes.
    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id.replace('"', "\"\""))
    }

    /// Quote only when required: reserved words and names that are not
    /// legal bare identifiers.
    fn make_legal_identifier(&self, id: &str) -> String {
        if self.is_reserved(id) || !is_legal_bare_identifier(id) {
            self.quote_identifier(id)
        } else {
            id.to_string()
        }
    }

    /// Name usable in a select list. `*` passes through unquoted.
    fn column_select_name(&self, name: &str) -> String {
        if name == "*" {
            name.to_string()
        } else {
            self.make_legal_identifier(name)
        }
    }

    // ==================== Type mapping ====================

    /// Map a native type name to a portable type code. Unknown names
    /// degrade to [`SqlType::Other`] with a logged warning, never an error.
    fn sql_type_from_name(&self, type_name: &str) -> SqlType;

    /// The native type name for a portable type code, if this backend has
    /// one.
    fn sql_type_name(&self, sql_type: SqlType) -> Option<&'static str>;

    // ==================== Temp tables and DDL ====================

    /// Prefix that routes a table name to globally-visible temp storage.
    fn global_temp_table_prefix(&self) -> &'static str;

    /// A process-unique temp table name built from `base`.
    fn temp_table_name(&self, base: &str) -> String {
        let n = TEMP_TABLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{}", self.global_temp_table_prefix(), base, n)
    }

    /// Idempotent drop of a table or view: succeeds whether or not the
    /// object exists.
    fn drop_if_exists(&self, schema: &str, object: &str, object_type: &str) -> SqlFragment {
        SqlFragment::new(format!(
            "DROP {} IF EXISTS {}.{}",
            object_type,
            self.make_legal_identifier(schema),
            self.make_legal_identifier(object)
        ))
    }

    /// Idempotent drop of an entire schema.
    fn drop_schema(&self, schema: &str) -> SqlFragment {
        SqlFragment::new(format!(
            "DROP SCHEMA IF EXISTS {}",
            self.make_legal_identifier(schema)
        ))
    }

    // ==================== Debug rendering ====================

    /// Best-effort rendering of a fragment with parameter values substituted
    /// in-line, for logs and diagnostics.
    ///
    /// Placeholders are located with a quote-aware scan, so a `?` inside a
    /// string literal or quoted identifier is never touched. This output
    /// must never be executed; parameter boundaries are judged textually and
    /// an executable statement built this way would be an injection risk.
    fn substitute_parameters(&self, frag: &SqlFragment) -> String {
        match frag.to_sql() {
            Ok(sql) => {
                let params = frag.params();
                scan::replace_placeholders(&sql, |i| {
                    params
                        .get(i)
                        .map_or_else(|| "?".to_string(), |p| self.literal(p))
                })
            }
            Err(e) => format!("/* unrenderable SQL: {e} */"),
        }
    }
}

// Shared compose step: SELECT, FROM, optional filter and ORDER BY, each on
// its own line, before dialect limiting applies.
pub(crate) fn compose_select(
    select: &SqlFragment,
    from: &SqlFragment,
    filter: Option<&SqlFragment>,
    order: Option<&str>,
) -> DbResult<SqlFragment> {
    if select.is_empty() {
        return Err(DbError::composition("limit_rows requires a SELECT clause"));
    }
    if from.is_empty() {
        return Err(DbError::composition("limit_rows requires a FROM clause"));
    }
    let mut sql = SqlFragment::empty();
    sql.append_fragment(select);
    sql.append("\n").append_fragment(from);
    if let Some(filter) = filter {
        sql.append("\n").append_fragment(filter);
    }
    if let Some(order) = order {
        sql.append("\n").append(order);
    }
    Ok(sql)
}
