use anyhow::Result;
use async_trait::async_trait;

use crate::domain::schema::TableSchema;
use crate::domain::snapshot::Snapshot;
use crate::domain::sql_type::BindValue;

/// Port: everything the engine needs from a live database session
/// (implemented by `SqlxDataSource`).
///
/// The engine never manages transactions on its own — `commit` and
/// `rollback` are explicit caller actions taken after an apply returns.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Read schema metadata, then stream the rows matched by the optional
    /// filter into a [`Snapshot`], converting every value to canonical text
    /// as it is read.
    async fn fetch(&self, table: &str, filter: Option<&str>) -> Result<Snapshot>;

    /// Column, primary-key and foreign-key catalog metadata for one table.
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;

    /// Names of the tables matching a SQL `LIKE` pattern (all tables when
    /// `None`).
    async fn table_names(&self, pattern: Option<&str>) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn create_table(&self, schema: &TableSchema) -> Result<()>;

    /// Execute raw SQL, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Execute one statement with positional bind parameters.
    async fn execute_bound(&self, sql: &str, params: &[BindValue]) -> Result<u64>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// The 1-based bind placeholder for this session's SQL dialect
    /// (`$1` on PostgreSQL, `?` elsewhere).
    fn bind_marker(&self, index: usize) -> String;
}
