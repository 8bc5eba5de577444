//! Executor seam for unified statement submission.
//!
//! [`Executor`] accepts a rendered SQL string plus a positional parameter
//! vector, and is implemented for both `tokio_postgres::Client` and
//! `tokio_postgres::Transaction`, so code that runs fragments composes with
//! or without an open transaction.

use crate::error::{DbError, DbResult};
use crate::value::Param;
use tokio_postgres::Row;

/// A statement executor: rendered SQL in, rows or affected count out.
/// Parameters bind positionally, left to right.
pub trait Executor: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[Param],
    ) -> impl std::future::Future<Output = DbResult<Vec<Row>>> + Send;

    /// Execute a query and return exactly one row.
    fn query_one(
        &self,
        sql: &str,
        params: &[Param],
    ) -> impl std::future::Future<Output = DbResult<Row>> + Send;

    /// Execute a query and return at most one row.
    fn query_opt(
        &self,
        sql: &str,
        params: &[Param],
    ) -> impl std::future::Future<Output = DbResult<Option<Row>>> + Send;

    /// Execute a statement and return the affected row count.
    fn execute(
        &self,
        sql: &str,
        params: &[Param],
    ) -> impl std::future::Future<Output = DbResult<u64>> + Send;
}

impl Executor for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[Param]) -> DbResult<Vec<Row>> {
        let refs = Param::pg_params(params);
        tokio_postgres::Client::query(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn query_one(&self, sql: &str, params: &[Param]) -> DbResult<Row> {
        let refs = Param::pg_params(params);
        tokio_postgres::Client::query_one(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn query_opt(&self, sql: &str, params: &[Param]) -> DbResult<Option<Row>> {
        let refs = Param::pg_params(params);
        tokio_postgres::Client::query_opt(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> DbResult<u64> {
        let refs = Param::pg_params(params);
        tokio_postgres::Client::execute(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[Param]) -> DbResult<Vec<Row>> {
        let refs = Param::pg_params(params);
        tokio_postgres::Transaction::query(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn query_one(&self, sql: &str, params: &[Param]) -> DbResult<Row> {
        let refs = Param::pg_params(params);
        tokio_postgres::Transaction::query_one(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn query_opt(&self, sql: &str, params: &[Param]) -> DbResult<Option<Row>> {
        let refs = Param::pg_params(params);
        tokio_postgres::Transaction::query_opt(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> DbResult<u64> {
        let refs = Param::pg_params(params);
        tokio_postgres::Transaction::execute(self, sql, &refs)
            .await
            .map_err(DbError::from_db_error)
    }
}
