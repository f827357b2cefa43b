//! Seams to the source database.
//!
//! The replication core never talks to a database directly. Discovery reads
//! structure through a [`MetadataProvider`] and extraction reads rows through
//! a [`RowProvider`]. Connection setup and retry policy live behind these
//! traits.

pub mod postgres;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

pub use postgres::PostgresProvider;
pub use types::*;

/// A forward-only cursor over the rows of one query.
///
/// Each item holds the values of one row in the order the columns were
/// requested. Dropping the stream releases the underlying cursor.
pub type RowStream = BoxStream<'static, Result<Vec<RowValue>>>;

/// Supplies raw table, column and primary-key descriptors.
#[async_trait]
pub trait MetadataProvider {
    async fn tables(&self) -> Result<Vec<Table>>;

    async fn columns(&self) -> Result<Vec<Column>>;

    async fn primary_keys(&self) -> Result<Vec<PrimaryKey>>;
}

/// Executes extraction queries.
#[async_trait]
pub trait RowProvider {
    /// SQL flavour used when building statements for this provider.
    fn dialect(&self) -> Dialect {
        Dialect::Db2
    }

    async fn execute(&self, sql: &str, params: &[RowValue]) -> Result<RowStream>;
}
