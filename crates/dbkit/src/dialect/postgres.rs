//! PostgreSQL dialect, the reference implementation.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::{SqlDialect, SqlType, compose_select, lookup_type};
use crate::error::DbResult;
use crate::fragment::SqlFragment;

/// Dialect strategy for PostgreSQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

static RESERVED: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
        "AUTHORIZATION", "BETWEEN", "BINARY", "BOTH", "CASE", "CAST", "CHECK", "COLLATE",
        "COLUMN", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_ROLE",
        "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DEFAULT", "DEFERRABLE", "DESC",
        "DISTINCT", "DO", "ELSE", "END", "EXCEPT", "FALSE", "FOR", "FOREIGN", "FREEZE", "FROM",
        "FULL", "GRANT", "GROUP", "HAVING", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT",
        "INTO", "IS", "ISNULL", "JOIN", "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME",
        "LOCALTIMESTAMP", "NATURAL", "NEW", "NOT", "NOTNULL", "NULL", "OFF", "OFFSET", "OLD",
        "ON", "ONLY", "OR", "ORDER", "OUTER", "OVERLAPS", "PLACING", "PRIMARY", "REFERENCES",
        "RIGHT", "SELECT", "SESSION_USER", "SIMILAR", "SOME", "SYMMETRIC", "TABLE", "THEN",
        "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER", "USING", "VERBOSE", "WHEN", "WHERE",
    ]
    .into_iter()
    .collect()
});

// Postgres metadata reports driver-level names (int4, bpchar) rather than
// the standard names.
static TYPE_NAMES: LazyLock<HashMap<&'static str, SqlType>> = LazyLock::new(|| {
    HashMap::from([
        ("bigint", SqlType::Bigint),
        ("int8", SqlType::Bigint),
        ("bigserial", SqlType::Bigint),
        ("boolean", SqlType::Boolean),
        ("bool", SqlType::Boolean),
        ("character", SqlType::Char),
        ("bpchar", SqlType::Char),
        ("char", SqlType::Char),
        ("date", SqlType::Date),
        ("decimal", SqlType::Decimal),
        ("double precision", SqlType::Double),
        ("float8", SqlType::Double),
        ("integer", SqlType::Integer),
        ("int", SqlType::Integer),
        ("int2", SqlType::Integer),
        ("int4", SqlType::Integer),
        ("smallint", SqlType::Smallint),
        ("serial", SqlType::Integer),
        ("text", SqlType::LongVarchar),
        ("numeric", SqlType::Numeric),
        ("real", SqlType::Real),
        ("float4", SqlType::Real),
        ("time", SqlType::Time),
        ("time without time zone", SqlType::Time),
        ("timestamp", SqlType::Timestamp),
        ("timestamp without time zone", SqlType::Timestamp),
        ("timestamptz", SqlType::Timestamp),
        ("bytea", SqlType::Varbinary),
        ("character varying", SqlType::Varchar),
        ("varchar", SqlType::Varchar),
        ("uuid", SqlType::Guid),
        ("json", SqlType::Json),
        ("jsonb", SqlType::Json),
    ])
});

impl SqlDialect for PostgresDialect {
    fn product_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn limit_rows(
        &self,
        select: &SqlFragment,
        from: &SqlFragment,
        filter: Option<&SqlFragment>,
        order: Option<&str>,
        row_count: u64,
        offset: u64,
    ) -> DbResult<SqlFragment> {
        let sql = compose_select(select, from, filter, order)?;
        self.append_limit(sql, row_count, offset)
    }

    fn append_limit(
        &self,
        mut sql: SqlFragment,
        row_count: u64,
        offset: u64,
    ) -> DbResult<SqlFragment> {
        if row_count > 0 {
            sql.append("\nLIMIT ").append(&row_count.to_string());
        }
        if offset > 0 {
            sql.append(if row_count > 0 { " OFFSET " } else { "\nOFFSET " })
                .append(&offset.to_string());
        }
        Ok(sql)
    }

    fn supports_offset(&self) -> bool {
        true
    }

    fn supports_comments(&self) -> bool {
        true
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn quote_string_literal(&self, value: &str) -> String {
        // Escape-string form whenever backslashes are present, so the
        // rendering is correct regardless of standard_conforming_strings.
        if value.contains('\\') {
            format!(
                "E'{}'",
                value.replace('\\', "\\\\").replace('\'', "''")
            )
        } else {
            format!("'{}'", value.replace('\'', "''"))
        }
    }

    fn binary_literal(&self, value: &[u8]) -> String {
        let hex: String = value.iter().map(|b| format!("{b:02x}")).collect();
        format!("'\\x{hex}'")
    }

    fn is_reserved(&self, word: &str) -> bool {
        RESERVED.contains(word.to_ascii_uppercase().as_str())
    }

    fn sql_type_from_name(&self, type_name: &str) -> SqlType {
        lookup_type(self.product_name(), &TYPE_NAMES, type_name)
    }

    fn sql_type_name(&self, sql_type: SqlType) -> Option<&'static str> {
        Some(match sql_type {
            SqlType::Bigint => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Char => "CHAR",
            SqlType::Date => "DATE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Integer => "INTEGER",
            SqlType::LongVarchar => "TEXT",
            SqlType::Numeric => "NUMERIC",
            SqlType::Real => "REAL",
            SqlType::Smallint => "SMALLINT",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Tinyint => "SMALLINT",
            SqlType::Varbinary => "BYTEA",
            SqlType::Varchar => "VARCHAR",
            SqlType::Guid => "UUID",
            SqlType::Json => "JSONB",
            SqlType::Other => return None,
        })
    }

    fn global_temp_table_prefix(&self) -> &'static str {
        "temp."
    }

    fn drop_schema(&self, schema: &str) -> SqlFragment {
        SqlFragment::new(format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            self.make_legal_identifier(schema)
        ))
    }
}
