//! Storage seam for property sets.
//!
//! [`PropertyStore`](super::PropertyStore) owns caching and locking; a
//! [`PropertyBackend`] only has to provide transactional reads and writes of
//! the raw header/value rows. The SQL backend talks to Postgres; the memory
//! backend backs the test suite.

use std::collections::BTreeMap;
use std::future::Future;

use super::{Encryption, SetIdentity};
use crate::error::DbResult;

/// A property set as the backend stores it: the header row's id and
/// encryption mode plus the name/value rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSet {
    pub set_id: i64,
    pub encryption: Encryption,
    pub values: BTreeMap<String, String>,
}

/// One open transaction against property storage.
///
/// `commit` and `rollback` consume the transaction; dropping without either
/// abandons the work (the backend rolls back).
pub trait PropertyTx: Send {
    /// Read the full set for `identity`, or `None` if no header row exists.
    fn load_set(
        &mut self,
        identity: &SetIdentity,
    ) -> impl Future<Output = DbResult<Option<StoredSet>>> + Send;

    /// Create the header row for `identity` and return its new id.
    ///
    /// Fails with [`DbError::UniqueViolation`](crate::DbError::UniqueViolation)
    /// if a header for the same identity already exists; callers treat that
    /// as losing a race and re-read.
    fn insert_set(
        &mut self,
        identity: &SetIdentity,
        encryption: Encryption,
    ) -> impl Future<Output = DbResult<i64>> + Send;

    /// Write one name/value pair, replacing any existing value for `name`.
    fn upsert_property(
        &mut self,
        set_id: i64,
        name: &str,
        value: &str,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Delete the named properties from the set. Missing names are not an
    /// error.
    fn delete_properties(
        &mut self,
        set_id: i64,
        names: &[String],
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Delete the header and all values for the set.
    fn delete_set(&mut self, set_id: i64) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Factory for property-storage transactions.
pub trait PropertyBackend: Send + Sync {
    type Tx<'a>: PropertyTx + Send
    where
        Self: 'a;

    fn begin(&self) -> impl Future<Output = DbResult<Self::Tx<'_>>> + Send;
}
