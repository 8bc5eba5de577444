//! Composable, parameterized SQL.
//!
//! [`SqlFragment`] stores SQL pieces and bind parameters separately, so
//! independent builders can be appended without manually tracking placeholder
//! positions. A fragment also carries named common table expressions; on
//! rendering, every CTE registered anywhere in the tree is flattened,
//! de-duplicated by key, and emitted once in a single `WITH` clause ahead of
//! the main text.
//!
//! # Example
//!
//! ```ignore
//! use dbkit::{CteKey, SqlFragment};
//!
//! let body = SqlFragment::with_params("SELECT id FROM users WHERE status = ?", ["active"]);
//! let mut q = SqlFragment::empty();
//! let token = q.add_common_table_expression(CteKey::new("active"), "active_users", body, false);
//! q.append("SELECT * FROM ").append_token(&token).append(" WHERE age > ?").add(30);
//!
//! assert_eq!(
//!     q.to_sql()?,
//!     "WITH active_users AS (SELECT id FROM users WHERE status = ?) \
//!      SELECT * FROM active_users WHERE age > ?"
//! );
//! ```
//!
//! Fragments are single-writer: build on one thread, then share read-only.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::Executor;
use crate::error::{DbError, DbResult};
use crate::scan;
use crate::value::Param;
use tokio_postgres::Row;
use uuid::Uuid;

mod cte;

#[cfg(test)]
mod tests;

/// Identity of a logical CTE. Registrations under equal keys refer to the
/// same logical subquery and are merged; distinct keys never merge, even when
/// their bodies are textually identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CteKey(String);

impl CteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A key no other call site can collide with, for CTEs that must stay
    /// private to one builder.
    pub fn unique() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CteKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CteKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Handle returned by [`SqlFragment::add_common_table_expression`]; embed it
/// in SQL text with [`SqlFragment::append_token`]. The final alias is chosen
/// at render time, so a token may be embedded long before the name is known.
#[derive(Debug, Clone)]
pub struct CteToken {
    key: CteKey,
}

impl CteToken {
    /// A token for `key`, for references that must be embedded before the
    /// registration exists (a recursive CTE body referring to itself).
    /// Rendering fails if the key is never registered.
    pub fn new(key: impl Into<CteKey>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &CteKey {
        &self.key
    }
}

/// Shared handle to a registered CTE body. Every fragment that picked up the
/// registration (directly or via [`SqlFragment::append_fragment`]) sees
/// mutations made through this handle.
#[derive(Debug, Clone)]
pub struct CteBody(Arc<Mutex<SqlFragment>>);

impl CteBody {
    /// Mutate the shared body in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut SqlFragment) -> R) -> R {
        f(&mut lock_ignore_poison(&self.0))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Raw(String),
    CteRef(CteKey),
}

#[derive(Debug, Clone)]
pub(crate) struct Cte {
    pub(crate) preferred_name: String,
    pub(crate) body: Arc<Mutex<SqlFragment>>,
    pub(crate) recursive: bool,
}

// Lock poisoning only matters if a panic escaped mid-mutation; rendering
// still wants the data.
pub(crate) fn lock_ignore_poison<'a>(m: &'a Mutex<SqlFragment>) -> MutexGuard<'a, SqlFragment> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A composable unit of SQL text plus its positional bind parameters.
///
/// Cloning is shallow: registered CTE bodies stay shared between the clone
/// and the original (use [`SqlFragment::deep_clone`] for isolation).
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    segments: Vec<Segment>,
    params: Vec<Param>,
    // Insertion-ordered and key-unique; small in practice.
    ctes: Vec<(CteKey, Cte)>,
}

impl SqlFragment {
    /// Create a fragment with an initial piece of SQL text.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let segments = if sql.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Raw(sql)]
        };
        Self {
            segments,
            params: Vec::new(),
            ctes: Vec::new(),
        }
    }

    /// Create an empty fragment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a fragment with initial text and its bind parameters.
    pub fn with_params(
        sql: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<Param>>,
    ) -> Self {
        let mut frag = Self::new(sql);
        frag.params.extend(params.into_iter().map(Into::into));
        frag
    }

    /// Append literal SQL text; no parameter effect.
    pub fn append(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.segments.last_mut() {
            Some(Segment::Raw(last)) => last.push_str(sql),
            _ => self.segments.push(Segment::Raw(sql.to_string())),
        }
        self
    }

    /// Append a single character of literal SQL text.
    pub fn append_char(&mut self, c: char) -> &mut Self {
        match self.segments.last_mut() {
            Some(Segment::Raw(last)) => last.push(c),
            _ => self.segments.push(Segment::Raw(c.to_string())),
        }
        self
    }

    /// Append a bind parameter. The caller is responsible for placing the
    /// matching `?` placeholder in the literal text.
    pub fn add(&mut self, value: impl Into<Param>) -> &mut Self {
        self.params.push(value.into());
        self
    }

    /// Append several bind parameters, preserving order.
    pub fn add_all(&mut self, values: impl IntoIterator<Item = impl Into<Param>>) -> &mut Self {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Append another fragment: its text segments, its parameter list (in
    /// order), and its CTE registrations all merge into this fragment. When
    /// both sides registered the same key, the earlier registration wins and
    /// both sides' references resolve to it. CTE bodies remain shared, not
    /// copied.
    pub fn append_fragment(&mut self, other: &SqlFragment) -> &mut Self {
        for seg in &other.segments {
            match seg {
                Segment::Raw(s) => {
                    self.append(s);
                }
                Segment::CteRef(k) => self.segments.push(Segment::CteRef(k.clone())),
            }
        }
        self.params.extend(other.params.iter().cloned());
        for (key, cte) in &other.ctes {
            if !self.has_cte(key) {
                self.ctes.push((key.clone(), cte.clone()));
            }
        }
        self
    }

    /// Embed a CTE reference at the current position. The reference renders
    /// as the CTE's final alias once `to_sql()` resolves names.
    pub fn append_token(&mut self, token: &CteToken) -> &mut Self {
        self.segments.push(Segment::CteRef(token.key.clone()));
        self
    }

    /// Register a common table expression under `key` and return a token for
    /// embedding references to it.
    ///
    /// Idempotent per key: if `key` is already registered, the existing
    /// entry is kept (its name and body win) and a token for it is returned,
    /// so independent code paths that each want the same logical CTE
    /// converge on one definition.
    pub fn add_common_table_expression(
        &mut self,
        key: impl Into<CteKey>,
        preferred_name: &str,
        body: SqlFragment,
        recursive: bool,
    ) -> CteToken {
        let key = key.into();
        if !self.has_cte(&key) {
            self.ctes.push((
                key.clone(),
                Cte {
                    preferred_name: preferred_name.to_string(),
                    body: Arc::new(Mutex::new(body)),
                    recursive,
                },
            ));
        }
        CteToken { key }
    }

    /// Shared handle to a registered CTE body, for post-registration
    /// mutation visible from every referring fragment.
    pub fn common_table_expression(&self, key: &CteKey) -> Option<CteBody> {
        self.ctes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, cte)| CteBody(Arc::clone(&cte.body)))
    }

    /// True when a CTE is registered under `key` on this fragment.
    pub fn has_cte(&self, key: &CteKey) -> bool {
        self.ctes.iter().any(|(k, _)| k == key)
    }

    /// True when no text, parameters, or CTEs have been added.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.params.is_empty() && self.ctes.is_empty()
    }

    /// A copy whose CTE bodies are themselves copied, severing the shared
    /// ownership that [`Clone`] preserves.
    pub fn deep_clone(&self) -> Self {
        let mut copy = self.clone();
        copy.ctes = self
            .ctes
            .iter()
            .map(|(key, cte)| {
                let body = lock_ignore_poison(&cte.body).deep_clone();
                (
                    key.clone(),
                    Cte {
                        preferred_name: cte.preferred_name.clone(),
                        body: Arc::new(Mutex::new(body)),
                        recursive: cte.recursive,
                    },
                )
            })
            .collect();
        copy
    }

    /// Render the execution-ready SQL text.
    ///
    /// With no CTEs registered anywhere in the tree this is the raw text
    /// unchanged. Otherwise every CTE is collected (dependencies first),
    /// de-duplicated by key, given a collision-free alias derived from its
    /// preferred name, and emitted in a single `WITH [RECURSIVE]` prefix;
    /// all embedded references are resolved to the final aliases.
    ///
    /// Fails with [`DbError::Composition`] when a reference points at a key
    /// never registered, or when the rendered placeholder count disagrees
    /// with the flattened parameter count. Both are caller bugs, reported
    /// immediately rather than truncated or padded.
    pub fn to_sql(&self) -> DbResult<String> {
        let (sql, params) = cte::render(self)?;
        let placeholders = scan::count_placeholders(&sql);
        if placeholders != params.len() {
            return Err(DbError::composition(format!(
                "{} placeholder(s) but {} parameter(s) in: {}",
                placeholders,
                params.len(),
                sql
            )));
        }
        Ok(sql)
    }

    /// Flattened bind parameters in execution order: every collected CTE
    /// body's parameters (in the same dependency order `to_sql()` emits the
    /// `WITH` entries) followed by this fragment's own parameters. `WITH`
    /// bodies come textually first, and placeholders bind strictly
    /// left-to-right by position.
    pub fn params(&self) -> Vec<Param> {
        cte::flattened_params(self)
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn own_params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn cte_entries(&self) -> &[(CteKey, Cte)] {
        &self.ctes
    }

    // ==================== Execution ====================

    fn wire_form(&self) -> DbResult<(String, Vec<Param>)> {
        let sql = self.to_sql()?;
        Ok((scan::to_positional(&sql), self.params()))
    }

    /// Execute against `conn` and return all rows.
    pub async fn fetch_all(&self, conn: &impl Executor) -> DbResult<Vec<Row>> {
        let (sql, params) = self.wire_form()?;
        conn.query(&sql, &params).await
    }

    /// Execute against `conn` and return exactly one row.
    pub async fn fetch_one(&self, conn: &impl Executor) -> DbResult<Row> {
        let (sql, params) = self.wire_form()?;
        conn.query_one(&sql, &params).await
    }

    /// Execute against `conn` and return at most one row.
    pub async fn fetch_opt(&self, conn: &impl Executor) -> DbResult<Option<Row>> {
        let (sql, params) = self.wire_form()?;
        conn.query_opt(&sql, &params).await
    }

    /// Execute against `conn` and return the affected row count.
    pub async fn execute(&self, conn: &impl Executor) -> DbResult<u64> {
        let (sql, params) = self.wire_form()?;
        conn.execute(&sql, &params).await
    }
}

/// Equality is over the fully-rendered text and fully-flattened parameters,
/// not raw pre-resolution text. Unrenderable fragments compare equal only to
/// other unrenderable fragments with equal parameter lists.
impl PartialEq for SqlFragment {
    fn eq(&self, other: &Self) -> bool {
        self.to_sql().ok() == other.to_sql().ok() && self.params() == other.params()
    }
}
