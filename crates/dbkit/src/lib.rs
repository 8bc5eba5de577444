//! # dbkit
//!
//! Composable SQL fragments, dialect portability, and cached property
//! stores over `tokio-postgres`.
//!
//! ## Features
//!
//! - **SQL explicit**: build statements as [`SqlFragment`]s that carry text
//!   and bound parameters together, with portable `?` placeholders
//! - **Common table expressions**: register CTE bodies by key and reference
//!   them by token; rendering flattens nested registrations into a single
//!   `WITH` clause with deterministic parameter order
//! - **Dialect seam**: [`SqlDialect`] abstracts row limiting, literals,
//!   identifier quoting, and type-name mapping; Postgres and SQL Server
//!   implementations included
//! - **Property stores**: [`PropertyStore`] caches small keyed string maps
//!   per (user, object, category) and writes them back under a
//!   re-read-then-write discipline safe for concurrent savers
//!
//! ## Building a query
//!
//! ```ignore
//! use dbkit::{CteKey, SqlFragment};
//!
//! let mut body = SqlFragment::new("SELECT * FROM assay.runs WHERE batch = ?");
//! body.add(42);
//!
//! let mut query = SqlFragment::empty();
//! let token = query.add_common_table_expression(
//!     CteKey::new("assay:runs:42"),
//!     "runs",
//!     body,
//!     false,
//! );
//! query.append("SELECT COUNT(*) FROM ");
//! query.append_token(&token);
//!
//! let rows = query.fetch_all(&client).await?;
//! ```

pub mod client;
pub mod dialect;
pub mod error;
pub mod fragment;
pub mod schema;
pub mod store;
pub mod value;

mod scan;

pub use client::Executor;
pub use dialect::{PostgresDialect, SqlDialect, SqlServerDialect, SqlType};
pub use error::{DbError, DbResult};
pub use fragment::{CteBody, CteKey, CteToken, SqlFragment};
pub use schema::{ColumnMetadata, ColumnOverride, TableMetadata, TableOverrides};
pub use store::{
    Encryption, InvalidateWhen, ObjectId, PropertyBackend, PropertyMap, PropertyStore, PropertyTx,
    SetIdentity, StoredSet, UserId, WritablePropertyMap,
};
pub use value::Param;
