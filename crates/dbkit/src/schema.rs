//! Table metadata loading and override descriptors.
//!
//! Metadata comes from `information_schema.columns`, with native type names
//! mapped to portable [`SqlType`] codes by the active dialect. Deployments
//! can adjust what introspection reports through a serde-loaded
//! [`TableOverrides`] document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::Executor;
use crate::dialect::{SqlDialect, SqlType};
use crate::error::{DbError, DbResult};
use crate::fragment::SqlFragment;

/// One column as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Native type name as the database spells it, e.g. `int4` or `nvarchar`.
    pub type_name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Declared character length, where the type has one.
    pub max_length: Option<i32>,
    /// 1-based position within the table.
    pub ordinal: i32,
    pub description: Option<String>,
    /// Hidden columns stay loadable but are left out of default select lists.
    pub hidden: bool,
}

/// A table plus its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Look up a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Comma-separated select list of the visible columns, identifiers
    /// legalized for `dialect`.
    pub fn select_list(&self, dialect: &dyn SqlDialect) -> String {
        self.columns
            .iter()
            .filter(|c| !c.hidden)
            .map(|c| dialect.column_select_name(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Apply `overrides`, warning about entries that name no actual column.
    pub fn apply_overrides(&mut self, overrides: &TableOverrides) {
        for (name, over) in &overrides.columns {
            let Some(col) = self
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(name))
            else {
                warn!(
                    schema = %self.schema,
                    table = %self.name,
                    column = %name,
                    "override names a column that does not exist"
                );
                continue;
            };
            if let Some(t) = over.sql_type {
                col.sql_type = t;
            }
            if let Some(n) = over.nullable {
                col.nullable = n;
            }
            if let Some(d) = &over.description {
                col.description = Some(d.clone());
            }
            if let Some(h) = over.hidden {
                col.hidden = h;
            }
        }
    }
}

/// Per-column adjustments; absent fields leave introspected values alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<SqlType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

/// Deployment-supplied metadata corrections for one table, keyed by column
/// name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOverrides {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnOverride>,
}

/// Parameterized introspection query for one table's columns.
pub fn introspection_sql(schema: &str, table: &str) -> SqlFragment {
    let mut sql = SqlFragment::new(
        "SELECT column_name, data_type, is_nullable, character_maximum_length, ordinal_position\n\
         FROM information_schema.columns\n\
         WHERE table_schema = ? AND table_name = ?\n\
         ORDER BY ordinal_position",
    );
    sql.add(schema).add(table);
    sql
}

/// Load column metadata for `schema.table`, mapping native type names
/// through `dialect`.
pub async fn load_table(
    conn: &impl Executor,
    dialect: &dyn SqlDialect,
    schema: &str,
    table: &str,
) -> DbResult<TableMetadata> {
    let rows = introspection_sql(schema, table).fetch_all(conn).await?;
    if rows.is_empty() {
        return Err(DbError::not_found(format!(
            "table {schema}.{table} has no columns or does not exist"
        )));
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row
            .try_get("column_name")
            .map_err(|e| DbError::decode("column_name", e.to_string()))?;
        let type_name: String = row
            .try_get("data_type")
            .map_err(|e| DbError::decode("data_type", e.to_string()))?;
        let is_nullable: String = row
            .try_get("is_nullable")
            .map_err(|e| DbError::decode("is_nullable", e.to_string()))?;
        let max_length: Option<i32> = row
            .try_get("character_maximum_length")
            .map_err(|e| DbError::decode("character_maximum_length", e.to_string()))?;
        let ordinal: i32 = row
            .try_get("ordinal_position")
            .map_err(|e| DbError::decode("ordinal_position", e.to_string()))?;

        let sql_type = dialect.sql_type_from_name(&type_name);
        columns.push(ColumnMetadata {
            name,
            type_name,
            sql_type,
            nullable: is_nullable.eq_ignore_ascii_case("YES"),
            max_length,
            ordinal,
            description: None,
            hidden: false,
        });
    }

    Ok(TableMetadata {
        schema: schema.to_string(),
        name: table.to_string(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::value::Param;

    fn users_table() -> TableMetadata {
        TableMetadata {
            schema: "core".to_string(),
            name: "users".to_string(),
            columns: vec![
                ColumnMetadata {
                    name: "user_id".to_string(),
                    type_name: "int4".to_string(),
                    sql_type: SqlType::Integer,
                    nullable: false,
                    max_length: None,
                    ordinal: 1,
                    description: None,
                    hidden: false,
                },
                ColumnMetadata {
                    name: "order".to_string(),
                    type_name: "text".to_string(),
                    sql_type: SqlType::LongVarchar,
                    nullable: true,
                    max_length: None,
                    ordinal: 2,
                    description: None,
                    hidden: false,
                },
            ],
        }
    }

    #[test]
    fn introspection_query_is_parameterized() {
        let sql = introspection_sql("core", "users");
        assert_eq!(
            sql.to_sql().unwrap(),
            "SELECT column_name, data_type, is_nullable, character_maximum_length, ordinal_position\n\
             FROM information_schema.columns\n\
             WHERE table_schema = ? AND table_name = ?\n\
             ORDER BY ordinal_position"
        );
        assert_eq!(
            sql.params(),
            vec![
                Param::Text("core".to_string()),
                Param::Text("users".to_string())
            ]
        );
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let t = users_table();
        assert!(t.column("USER_ID").is_some());
        assert!(t.column("missing").is_none());
    }

    #[test]
    fn select_list_quotes_reserved_names() {
        let t = users_table();
        assert_eq!(
            t.select_list(&PostgresDialect),
            "user_id, \"order\""
        );
    }

    #[test]
    fn overrides_adjust_type_and_nullability() {
        let mut t = users_table();
        let doc = r#"{"columns": {"user_id": {"sql_type": "Bigint", "nullable": true}}}"#;
        let overrides: TableOverrides = serde_json::from_str(doc).unwrap();
        t.apply_overrides(&overrides);

        let col = t.column("user_id").unwrap();
        assert_eq!(col.sql_type, SqlType::Bigint);
        assert!(col.nullable);
        // Untouched column keeps its introspected shape.
        assert_eq!(t.column("order").unwrap().sql_type, SqlType::LongVarchar);
    }

    #[test]
    fn hidden_override_drops_the_column_from_select_lists() {
        let mut t = users_table();
        let doc = r#"{"columns": {"order": {"hidden": true, "description": "legacy"}}}"#;
        let overrides: TableOverrides = serde_json::from_str(doc).unwrap();
        t.apply_overrides(&overrides);

        assert_eq!(t.select_list(&PostgresDialect), "user_id");
        assert_eq!(t.column("order").unwrap().description.as_deref(), Some("legacy"));
    }

    #[test]
    fn unknown_override_column_is_ignored() {
        let mut t = users_table();
        let mut overrides = TableOverrides::default();
        overrides.columns.insert(
            "no_such_column".to_string(),
            ColumnOverride {
                sql_type: Some(SqlType::Guid),
                ..Default::default()
            },
        );
        let before = t.clone();
        t.apply_overrides(&overrides);
        assert_eq!(t, before);
    }
}
