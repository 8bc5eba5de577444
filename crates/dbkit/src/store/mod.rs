//! Property stores: small keyed string maps attached to a (user, object,
//! category) identity, cached per process and written back under a
//! re-read-then-write discipline.
//!
//! Reads hand out immutable [`PropertyMap`]s; mutation goes through a
//! [`WritablePropertyMap`] obtained separately, so a cached read view can
//! never be edited in place. [`PropertyStore::save`] takes a per-identity
//! async lock, re-reads the authoritative rows inside the transaction, and
//! only then applies the delta, so two writers racing on the same identity
//! converge instead of clobbering each other.

mod backend;
pub mod memory;
pub mod sql;


pub use backend::{PropertyBackend, PropertyTx, StoredSet};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{DbError, DbResult};

/// Owner of a property set. `UserId(0)` is the shared, site-wide owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i32);

impl UserId {
    /// The site-wide owner used for settings not tied to a user.
    pub const SITE: UserId = UserId(0);
}

/// Scope of a property set, typically a container path or entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub String);

impl From<&str> for ObjectId {
    fn from(v: &str) -> Self {
        ObjectId(v.to_string())
    }
}

/// The full key of one property set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetIdentity {
    pub user: UserId,
    pub object: ObjectId,
    pub category: String,
}

impl SetIdentity {
    pub fn new(user: UserId, object: impl Into<ObjectId>, category: impl Into<String>) -> Self {
        SetIdentity {
            user,
            object: object.into(),
            category: category.into(),
        }
    }
}

/// How values are stored at rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encryption {
    #[default]
    None,
    Aes,
}

/// When a save removes the identity's cached read view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidateWhen {
    /// As soon as the save starts, before the transaction commits. Readers
    /// may re-load and briefly see pre-save values again.
    Immediate,
    /// Only after the transaction commits, so readers never observe
    /// uncommitted state.
    #[default]
    PostCommit,
}

/// An immutable read view of one property set.
///
/// There is deliberately no mutating API here: instances are shared out of
/// the store's cache, and edits go through [`WritablePropertyMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMap {
    identity: SetIdentity,
    set_id: i64,
    encryption: Encryption,
    values: BTreeMap<String, String>,
}

impl PropertyMap {
    fn new(
        identity: SetIdentity,
        set_id: i64,
        encryption: Encryption,
        values: BTreeMap<String, String>,
    ) -> Self {
        PropertyMap {
            identity,
            set_id,
            encryption,
            values,
        }
    }

    pub fn identity(&self) -> &SetIdentity {
        &self.identity
    }

    /// Backing row id, or 0 for a set that has never been saved.
    pub fn set_id(&self) -> i64 {
        self.set_id
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A mutable working copy of one property set, saved back through
/// [`PropertyStore::save`].
///
/// Tracks removals explicitly: the save applies deletes for removed names
/// and upserts for changed values rather than rewriting the whole set.
#[derive(Debug, Clone)]
pub struct WritablePropertyMap {
    identity: SetIdentity,
    encryption: Encryption,
    values: BTreeMap<String, String>,
    removed: BTreeSet<String>,
    dirty: bool,
}

impl WritablePropertyMap {
    fn from_stored(identity: SetIdentity, encryption: Encryption, values: BTreeMap<String, String>) -> Self {
        WritablePropertyMap {
            identity,
            encryption,
            values,
            removed: BTreeSet::new(),
            dirty: false,
        }
    }

    pub fn identity(&self) -> &SetIdentity {
        &self.identity
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Set one property, returning the previous value if any.
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.removed.remove(&name);
        self.dirty = true;
        self.values.insert(name, value.into())
    }

    /// Remove one property, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.removed.insert(name.to_string());
        self.dirty = true;
        self.values.remove(name)
    }

    /// Remove every property.
    pub fn clear(&mut self) {
        self.removed.extend(self.values.keys().cloned());
        self.values.clear();
        self.dirty = true;
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (k, v) in entries {
            self.put(k, v);
        }
    }

    /// Has anything been put, removed, or cleared since this copy was read?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// One cached identity. The generation count survives eviction: a reader
// that loaded backend state under an older generation must not install its
// (possibly pre-commit) snapshot after a writer invalidated.
#[derive(Debug, Default)]
struct CacheSlot {
    generation: u64,
    map: Option<Arc<PropertyMap>>,
}

/// A caching property store over some [`PropertyBackend`].
pub struct PropertyStore<B: PropertyBackend> {
    backend: B,
    invalidate: InvalidateWhen,
    encryption: Encryption,
    cache: Mutex<HashMap<SetIdentity, CacheSlot>>,
    locks: Mutex<HashMap<SetIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: PropertyBackend> PropertyStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_invalidation(backend, InvalidateWhen::default())
    }

    pub fn with_invalidation(backend: B, invalidate: InvalidateWhen) -> Self {
        PropertyStore {
            backend,
            invalidate,
            encryption: Encryption::default(),
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Store values encrypted at rest: sets created through this store get
    /// the given mode stamped on their header.
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Read the property set for `identity`.
    ///
    /// Never returns "no map": an identity with no stored set yields an
    /// empty map with `set_id() == 0`, and that empty result is cached like
    /// any other.
    pub async fn get_properties(&self, identity: &SetIdentity) -> DbResult<Arc<PropertyMap>> {
        // Note the generation before touching the backend; a save that
        // commits while this load is in flight bumps it.
        let load_generation = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            let slot = cache.entry(identity.clone()).or_default();
            if let Some(hit) = &slot.map {
                return Ok(Arc::clone(hit));
            }
            slot.generation
        };

        let mut tx = self.backend.begin().await?;
        let loaded = tx.load_set(identity).await;
        let map = match loaded {
            Ok(stored) => {
                tx.commit().await?;
                match stored {
                    Some(s) => PropertyMap::new(identity.clone(), s.set_id, s.encryption, s.values),
                    None => {
                        PropertyMap::new(identity.clone(), 0, self.encryption, BTreeMap::new())
                    }
                }
            }
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        let map = Arc::new(map);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let slot = cache.entry(identity.clone()).or_default();
        if slot.generation == load_generation {
            // An intervening invalidation means this snapshot may predate a
            // committed write; serve it to this caller but do not cache it.
            slot.map.get_or_insert_with(|| Arc::clone(&map));
        }
        Ok(map)
    }

    /// Read a mutable working copy, seeded from a fresh backend read rather
    /// than the cache.
    ///
    /// With `create` false, an identity with no stored set yields `None`;
    /// with `create` true it yields an empty writable copy whose first save
    /// creates the set.
    pub async fn get_writable_properties(
        &self,
        identity: &SetIdentity,
        create: bool,
    ) -> DbResult<Option<WritablePropertyMap>> {
        let mut tx = self.backend.begin().await?;
        let loaded = tx.load_set(identity).await;
        match loaded {
            Ok(Some(s)) => {
                tx.commit().await?;
                Ok(Some(WritablePropertyMap::from_stored(
                    identity.clone(),
                    s.encryption,
                    s.values,
                )))
            }
            Ok(None) => {
                tx.commit().await?;
                if create {
                    Ok(Some(WritablePropertyMap::from_stored(
                        identity.clone(),
                        self.encryption,
                        BTreeMap::new(),
                    )))
                } else {
                    Ok(None)
                }
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Write a working copy back.
    ///
    /// A copy that was never mutated is a no-op and touches neither the
    /// backend nor the cache. Otherwise the save serializes on a
    /// per-identity lock, re-reads the stored rows inside the transaction,
    /// and applies only the difference: deletes for removed names, upserts
    /// for new or changed values.
    pub async fn save(&self, map: WritablePropertyMap) -> DbResult<()> {
        if !map.dirty {
            return Ok(());
        }
        let identity = map.identity.clone();

        if self.invalidate == InvalidateWhen::Immediate {
            self.invalidate_cache(&identity);
        }

        let lock = self.identity_lock(&identity);
        let _held = lock.lock().await;

        let mut tx = self.backend.begin().await?;
        let result = Self::save_in_tx(&mut tx, &map).await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                self.invalidate_cache(&identity);
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Delete the whole set for `identity`. Deleting an absent set is not
    /// an error.
    pub async fn delete_property_set(&self, identity: &SetIdentity) -> DbResult<()> {
        if self.invalidate == InvalidateWhen::Immediate {
            self.invalidate_cache(identity);
        }

        let lock = self.identity_lock(identity);
        let _held = lock.lock().await;

        let mut tx = self.backend.begin().await?;
        let result = async {
            if let Some(stored) = tx.load_set(identity).await? {
                tx.delete_set(stored.set_id).await?;
            }
            Ok(())
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                self.invalidate_cache(identity);
                Ok(())
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn save_in_tx(tx: &mut B::Tx<'_>, map: &WritablePropertyMap) -> DbResult<()> {
        // Authoritative state, read under the identity lock.
        let stored = tx.load_set(&map.identity).await?;
        let (set_id, stored_values) = match stored {
            Some(s) => (s.set_id, s.values),
            None => {
                let id = match tx.insert_set(&map.identity, map.encryption).await {
                    Ok(id) => id,
                    // Lost a creation race to another process; the set now
                    // exists, so adopt it.
                    Err(e) if e.is_unique_violation() => {
                        debug!(identity = ?map.identity, "property set appeared during save, re-reading");
                        let s = tx.load_set(&map.identity).await?.ok_or_else(|| {
                            DbError::Other(
                                "property set vanished after duplicate-key insert".to_string(),
                            )
                        })?;
                        return Self::apply_delta(tx, s.set_id, &s.values, map).await;
                    }
                    Err(e) => return Err(e),
                };
                (id, BTreeMap::new())
            }
        };
        Self::apply_delta(tx, set_id, &stored_values, map).await
    }

    async fn apply_delta(
        tx: &mut B::Tx<'_>,
        set_id: i64,
        stored: &BTreeMap<String, String>,
        map: &WritablePropertyMap,
    ) -> DbResult<()> {
        let doomed: Vec<String> = map
            .removed
            .iter()
            .filter(|name| stored.contains_key(*name))
            .cloned()
            .collect();
        if !doomed.is_empty() {
            tx.delete_properties(set_id, &doomed).await?;
        }
        for (name, value) in &map.values {
            if stored.get(name) != Some(value) {
                tx.upsert_property(set_id, name, value).await?;
            }
        }
        Ok(())
    }

    fn invalidate_cache(&self, identity: &SetIdentity) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let slot = cache.entry(identity.clone()).or_default();
        // The generation bump makes any in-flight load stale: a reader that
        // started before this call will see the mismatch and skip the cache.
        slot.generation += 1;
        slot.map = None;
    }

    fn identity_lock(&self, identity: &SetIdentity) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
