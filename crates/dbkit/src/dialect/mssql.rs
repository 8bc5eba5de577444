//! Microsoft SQL Server dialect.
//!
//! Covers the syntax points where SQL Server departs from the reference
//! dialect: `TOP n` row limiting with no offset support, bit-typed booleans,
//! bracket-free quoted identifiers (the ANSI form works here too), and
//! `tempdb..` global temp naming.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::{SqlDialect, SqlType, compose_select, lookup_type};
use crate::error::{DbError, DbResult};
use crate::fragment::SqlFragment;

/// Dialect strategy for Microsoft SQL Server.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerDialect;

static RESERVED: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "AUTHORIZATION", "BACKUP", "BEGIN",
        "BETWEEN", "BREAK", "BROWSE", "BULK", "BY", "CASCADE", "CASE", "CHECK", "CHECKPOINT",
        "CLOSE", "CLUSTERED", "COLLATE", "COLUMN", "COMMIT", "COMPUTE", "CONSTRAINT",
        "CONTAINS", "CONTINUE", "CONVERT", "CREATE", "CROSS", "CURRENT", "CURRENT_DATE",
        "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "CURSOR", "DATABASE", "DEALLOCATE",
        "DECLARE", "DEFAULT", "DELETE", "DENY", "DESC", "DISTINCT", "DISTRIBUTED", "DOUBLE",
        "DROP", "ELSE", "END", "ERRLVL", "ESCAPE", "EXCEPT", "EXEC", "EXECUTE", "EXISTS",
        "EXIT", "EXTERNAL", "FETCH", "FILE", "FILLFACTOR", "FOR", "FOREIGN", "FREETEXT",
        "FROM", "FULL", "FUNCTION", "GOTO", "GRANT", "GROUP", "HAVING", "HOLDLOCK", "IDENTITY",
        "IF", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY",
        "KILL", "LEFT", "LIKE", "LINENO", "LOAD", "NATIONAL", "NOCHECK", "NONCLUSTERED", "NOT",
        "NULL", "NULLIF", "OF", "OFF", "OFFSETS", "ON", "OPEN", "OPTION", "OR", "ORDER",
        "OUTER", "OVER", "PERCENT", "PLAN", "PRECISION", "PRIMARY", "PRINT", "PROC",
        "PROCEDURE", "PUBLIC", "RAISERROR", "READ", "READTEXT", "RECONFIGURE", "REFERENCES",
        "REPLICATION", "RESTORE", "RESTRICT", "RETURN", "REVOKE", "RIGHT", "ROLLBACK",
        "ROWCOUNT", "ROWGUIDCOL", "RULE", "SAVE", "SCHEMA", "SELECT", "SESSION_USER", "SET",
        "SETUSER", "SHUTDOWN", "SOME", "STATISTICS", "SYSTEM_USER", "TABLE", "TEXTSIZE",
        "THEN", "TO", "TOP", "TRAN", "TRANSACTION", "TRIGGER", "TRUNCATE", "TSEQUAL", "UNION",
        "UNIQUE", "UPDATE", "UPDATETEXT", "USE", "USER", "VALUES", "VARYING", "VIEW", "WAITFOR",
        "WHEN", "WHERE", "WHILE", "WITH", "WRITETEXT",
    ]
    .into_iter()
    .collect()
});

static TYPE_NAMES: LazyLock<HashMap<&'static str, SqlType>> = LazyLock::new(|| {
    HashMap::from([
        ("bigint", SqlType::Bigint),
        ("bit", SqlType::Boolean),
        ("char", SqlType::Char),
        ("nchar", SqlType::Char),
        ("date", SqlType::Date),
        ("decimal", SqlType::Decimal),
        ("float", SqlType::Double),
        ("int", SqlType::Integer),
        ("ntext", SqlType::LongVarchar),
        ("text", SqlType::LongVarchar),
        ("numeric", SqlType::Numeric),
        ("real", SqlType::Real),
        ("smallint", SqlType::Smallint),
        ("time", SqlType::Time),
        ("datetime", SqlType::Timestamp),
        ("datetime2", SqlType::Timestamp),
        ("smalldatetime", SqlType::Timestamp),
        ("tinyint", SqlType::Tinyint),
        ("varbinary", SqlType::Varbinary),
        ("image", SqlType::Varbinary),
        ("varchar", SqlType::Varchar),
        ("nvarchar", SqlType::Varchar),
        ("uniqueidentifier", SqlType::Guid),
    ])
});

impl SqlDialect for SqlServerDialect {
    fn product_name(&self) -> &'static str {
        "Microsoft SQL Server"
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

    // Row limiting injects TOP right after the SELECT keyword; there is no
    // portable offset form here, so a nonzero offset is a capability error.
    fn append_limit(&self, sql: SqlFragment, row_count: u64, offset: u64) -> DbResult<SqlFragment> {
        if offset > 0 {
            return Err(DbError::unsupported(
                self.product_name(),
                "limit_rows() with a row offset",
            ));
        }
        if row_count == 0 {
            return Ok(sql);
        }

        let text = sql.to_sql()?;
        let upper = text.to_ascii_uppercase();
        if upper.starts_with("WITH") {
            return Err(DbError::unsupported(
                self.product_name(),
                "limit_rows() on a query with a WITH clause; apply TOP inside the outer SELECT instead",
            ));
        }
        if !upper.starts_with("SELECT") {
            return Err(DbError::composition(format!(
                "row-limited SQL must start with SELECT: {text}"
            )));
        }
        let insert_at = if upper.starts_with("SELECT DISTINCT") {
            "SELECT DISTINCT".len()
        } else {
            "SELECT".len()
        };

        let mut limited = SqlFragment::new(format!(
            "{} TOP {}{}",
            &text[..insert_at],
            row_count,
            &text[insert_at..]
        ));
        limited.add_all(sql.params());
        Ok(limited)
    }

    fn supports_offset(&self) -> bool {
        false
    }

    fn supports_comments(&self) -> bool {
        true
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn boolean_true(&self) -> SqlFragment {
        SqlFragment::new("CAST(1 AS BIT)")
    }

    fn boolean_false(&self) -> SqlFragment {
        SqlFragment::new("CAST(0 AS BIT)")
    }

    fn binary_literal(&self, value: &[u8]) -> String {
        let hex: String = value.iter().map(|b| format!("{b:02x}")).collect();
        format!("0x{hex}")
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
            SqlType::Boolean => "BIT",
            SqlType::Char => "NCHAR",
            SqlType::Date => "DATE",
            SqlType::Decimal => "DECIMAL",
            SqlType::Double => "FLOAT",
            SqlType::Integer => "INT",
            SqlType::LongVarchar => "NVARCHAR(MAX)",
            SqlType::Numeric => "NUMERIC",
            SqlType::Real => "REAL",
            SqlType::Smallint => "SMALLINT",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "DATETIME2",
            SqlType::Tinyint => "TINYINT",
            SqlType::Varbinary => "VARBINARY(MAX)",
            SqlType::Varchar => "NVARCHAR",
            SqlType::Guid => "UNIQUEIDENTIFIER",
            SqlType::Json => "NVARCHAR(MAX)",
            SqlType::Other => return None,
        })
    }

    fn global_temp_table_prefix(&self) -> &'static str {
        "tempdb.."
    }
}
