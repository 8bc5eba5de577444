//! Postgres-backed [`PropertyBackend`].
//!
//! Property sets live in two tables: `prop.property_sets` holds one header
//! row per (user, object, category) with a unique constraint across the
//! three, and `prop.properties` holds the name/value rows keyed by
//! (set_id, name). The unique header constraint is what turns a creation
//! race into the [`DbError::UniqueViolation`](crate::DbError::UniqueViolation)
//! the store recovers from.
//!
//! `tokio_postgres` multiplexes one connection, so transactions here are
//! explicit `BEGIN`/`COMMIT`/`ROLLBACK` statements serialized by an async
//! gate; only one property transaction is open on the connection at a time.
//! A transaction dropped without commit or rollback leaves the connection
//! inside an open transaction; the backend notices on the next `begin()`
//! and issues the pending `ROLLBACK` first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::backend::{PropertyBackend, PropertyTx, StoredSet};
use super::{Encryption, SetIdentity};
use crate::client::Executor;
use crate::error::{DbError, DbResult};
use crate::fragment::SqlFragment;

pub struct SqlPropertyBackend {
    client: Arc<tokio_postgres::Client>,
    gate: Arc<Mutex<()>>,
    // Set between BEGIN and COMMIT/ROLLBACK. A transaction dropped without
    // closing leaves it set, and the next begin() rolls the connection back
    // before starting over.
    tx_open: AtomicBool,
}

impl SqlPropertyBackend {
    pub fn new(client: Arc<tokio_postgres::Client>) -> Self {
        SqlPropertyBackend {
            client,
            gate: Arc::new(Mutex::new(())),
            tx_open: AtomicBool::new(false),
        }
    }

    /// Create the backing schema and tables if they are missing.
    pub async fn ensure_tables(&self) -> DbResult<()> {
        for stmt in [
            "CREATE SCHEMA IF NOT EXISTS prop",
            "CREATE TABLE IF NOT EXISTS prop.property_sets (\n\
             \x20   set_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,\n\
             \x20   user_id INTEGER NOT NULL,\n\
             \x20   object_id VARCHAR(255) NOT NULL,\n\
             \x20   category VARCHAR(255) NOT NULL,\n\
             \x20   encrypted BOOLEAN NOT NULL DEFAULT FALSE,\n\
             \x20   UNIQUE (user_id, object_id, category)\n\
             )",
            "CREATE TABLE IF NOT EXISTS prop.properties (\n\
             \x20   set_id BIGINT NOT NULL REFERENCES prop.property_sets (set_id) ON DELETE CASCADE,\n\
             \x20   name VARCHAR(255) NOT NULL,\n\
             \x20   value TEXT NOT NULL,\n\
             \x20   PRIMARY KEY (set_id, name)\n\
             )",
        ] {
            self.client.execute(stmt, &[]).await?;
        }
        Ok(())
    }
}

pub struct SqlTx<'a> {
    client: &'a tokio_postgres::Client,
    tx_open: &'a AtomicBool,
    _gate: OwnedMutexGuard<()>,
}

/// Clear the open-transaction flag, reporting whether it was set.
fn take_open_flag(flag: &AtomicBool) -> bool {
    flag.swap(false, Ordering::AcqRel)
}

fn encrypted_flag(encryption: Encryption) -> bool {
    matches!(encryption, Encryption::Aes)
}

fn encryption_from_flag(encrypted: bool) -> Encryption {
    if encrypted { Encryption::Aes } else { Encryption::None }
}

fn select_header(identity: &SetIdentity) -> SqlFragment {
    let mut sql = SqlFragment::new(
        "SELECT set_id, encrypted FROM prop.property_sets \
         WHERE user_id = ? AND object_id = ? AND category = ?",
    );
    sql.add(identity.user.0)
        .add(identity.object.0.as_str())
        .add(identity.category.as_str());
    sql
}

fn select_values(set_id: i64) -> SqlFragment {
    SqlFragment::with_params(
        "SELECT name, value FROM prop.properties WHERE set_id = ?",
        [set_id],
    )
}

fn insert_header(identity: &SetIdentity, encryption: Encryption) -> SqlFragment {
    let mut sql = SqlFragment::new(
        "INSERT INTO prop.property_sets (user_id, object_id, category, encrypted) \
         VALUES (?, ?, ?, ?) RETURNING set_id",
    );
    sql.add(identity.user.0)
        .add(identity.object.0.as_str())
        .add(identity.category.as_str())
        .add(encrypted_flag(encryption));
    sql
}

fn update_value(set_id: i64, name: &str, value: &str) -> SqlFragment {
    let mut sql =
        SqlFragment::new("UPDATE prop.properties SET value = ? WHERE set_id = ? AND name = ?");
    sql.add(value).add(set_id).add(name);
    sql
}

fn insert_value(set_id: i64, name: &str, value: &str) -> SqlFragment {
    let mut sql =
        SqlFragment::new("INSERT INTO prop.properties (set_id, name, value) VALUES (?, ?, ?)");
    sql.add(set_id).add(name).add(value);
    sql
}

fn delete_values(set_id: i64, names: &[String]) -> SqlFragment {
    let mut sql = SqlFragment::new("DELETE FROM prop.properties WHERE set_id = ? AND name IN (");
    sql.add(set_id);
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            sql.append(", ");
        }
        sql.append("?").add(name.as_str());
    }
    sql.append(")");
    sql
}

fn delete_all_values(set_id: i64) -> SqlFragment {
    SqlFragment::with_params("DELETE FROM prop.properties WHERE set_id = ?", [set_id])
}

fn delete_header(set_id: i64) -> SqlFragment {
    SqlFragment::with_params("DELETE FROM prop.property_sets WHERE set_id = ?", [set_id])
}

impl PropertyTx for SqlTx<'_> {
    async fn load_set(&mut self, identity: &SetIdentity) -> DbResult<Option<StoredSet>> {
        let Some(header) = select_header(identity).fetch_opt(self.client).await? else {
            return Ok(None);
        };
        let set_id: i64 = header
            .try_get("set_id")
            .map_err(|e| DbError::decode("set_id", e.to_string()))?;
        let encrypted: bool = header
            .try_get("encrypted")
            .map_err(|e| DbError::decode("encrypted", e.to_string()))?;

        let mut values = std::collections::BTreeMap::new();
        for row in select_values(set_id).fetch_all(self.client).await? {
            let name: String = row
                .try_get("name")
                .map_err(|e| DbError::decode("name", e.to_string()))?;
            let value: String = row
                .try_get("value")
                .map_err(|e| DbError::decode("value", e.to_string()))?;
            values.insert(name, value);
        }
        Ok(Some(StoredSet {
            set_id,
            encryption: encryption_from_flag(encrypted),
            values,
        }))
    }

    async fn insert_set(
        &mut self,
        identity: &SetIdentity,
        encryption: Encryption,
    ) -> DbResult<i64> {
        let row = insert_header(identity, encryption)
            .fetch_one(self.client)
            .await?;
        row.try_get("set_id")
            .map_err(|e| DbError::decode("set_id", e.to_string()))
    }

    async fn upsert_property(&mut self, set_id: i64, name: &str, value: &str) -> DbResult<()> {
        let updated = update_value(set_id, name, value)
            .execute(self.client)
            .await?;
        if updated == 0 {
            insert_value(set_id, name, value).execute(self.client).await?;
        }
        Ok(())
    }

    async fn delete_properties(&mut self, set_id: i64, names: &[String]) -> DbResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        delete_values(set_id, names).execute(self.client).await?;
        Ok(())
    }

    async fn delete_set(&mut self, set_id: i64) -> DbResult<()> {
        delete_all_values(set_id).execute(self.client).await?;
        delete_header(set_id).execute(self.client).await?;
        Ok(())
    }

    async fn commit(self) -> DbResult<()> {
        self.client.execute("COMMIT", &[]).await?;
        take_open_flag(self.tx_open);
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        self.client.execute("ROLLBACK", &[]).await?;
        take_open_flag(self.tx_open);
        Ok(())
    }
}

impl PropertyBackend for SqlPropertyBackend {
    type Tx<'a>
        = SqlTx<'a>
    where
        Self: 'a;

    async fn begin(&self) -> DbResult<SqlTx<'_>> {
        let gate = Arc::clone(&self.gate).lock_owned().await;
        if take_open_flag(&self.tx_open) {
            warn!("property transaction dropped without commit or rollback, rolling back");
            self.client.execute("ROLLBACK", &[]).await?;
        }
        self.client.execute("BEGIN", &[]).await?;
        self.tx_open.store(true, Ordering::Release);
        Ok(SqlTx {
            client: &*self.client,
            tx_open: &self.tx_open,
            _gate: gate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserId;
    use crate::value::Param;

    fn identity() -> SetIdentity {
        SetIdentity::new(UserId(7), "/home/project", "analysis-defaults")
    }

    #[test]
    fn header_select_binds_the_full_identity() {
        let sql = select_header(&identity());
        assert_eq!(
            sql.to_sql().unwrap(),
            "SELECT set_id, encrypted FROM prop.property_sets \
             WHERE user_id = ? AND object_id = ? AND category = ?"
        );
        assert_eq!(
            sql.params(),
            vec![
                Param::Int32(7),
                Param::Text("/home/project".to_string()),
                Param::Text("analysis-defaults".to_string()),
            ]
        );
    }

    #[test]
    fn insert_header_returns_generated_id() {
        let sql = insert_header(&identity(), Encryption::Aes);
        assert!(sql.to_sql().unwrap().ends_with("RETURNING set_id"));
        assert_eq!(sql.params().last(), Some(&Param::Bool(true)));
    }

    #[test]
    fn delete_values_builds_an_in_list() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let sql = delete_values(42, &names);
        assert_eq!(
            sql.to_sql().unwrap(),
            "DELETE FROM prop.properties WHERE set_id = ? AND name IN (?, ?, ?)"
        );
        assert_eq!(
            sql.params(),
            vec![
                Param::Int64(42),
                Param::Text("a".to_string()),
                Param::Text("b".to_string()),
                Param::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn upsert_statements_bind_in_declaration_order() {
        let upd = update_value(1, "theme", "dark");
        assert_eq!(
            upd.params(),
            vec![
                Param::Text("dark".to_string()),
                Param::Int64(1),
                Param::Text("theme".to_string()),
            ]
        );
        let ins = insert_value(1, "theme", "dark");
        assert_eq!(
            ins.params(),
            vec![
                Param::Int64(1),
                Param::Text("theme".to_string()),
                Param::Text("dark".to_string()),
            ]
        );
    }

    #[test]
    fn dropped_transaction_is_noticed_by_the_next_begin() {
        let flag = AtomicBool::new(false);

        // begin -> commit: the next begin finds nothing to recover.
        assert!(!take_open_flag(&flag));
        flag.store(true, Ordering::Release);
        take_open_flag(&flag);
        assert!(!take_open_flag(&flag));

        // begin -> dropped without closing: the flag stays set until the
        // next begin consumes it exactly once.
        flag.store(true, Ordering::Release);
        assert!(take_open_flag(&flag));
        assert!(!take_open_flag(&flag));
    }
}
