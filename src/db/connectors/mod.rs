pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use std::time::Duration;

use async_trait::async_trait;

use crate::db::dialect::Dialect;
use crate::judge::result::ResultSet;

/// Pool sizing shared by every sandbox dialect.
pub const POOL_MAX_OPEN: u32 = 10;
pub const POOL_MAX_IDLE: u32 = 5;
pub const POOL_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
pub const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// A pooled connection source for one sandbox dialect.
#[async_trait]
pub trait SandboxConnector: Send + Sync + std::fmt::Debug {
    fn dialect(&self) -> Dialect;

    /// Cheap liveness probe; a failure tells the registry to rebuild the pool.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Check out a dedicated session for one execution. The session owns its
    /// connection until dropped; concurrent executions hold distinct sessions.
    async fn session(&self) -> anyhow::Result<Box<dyn SandboxSession>>;
}

/// One checked-out connection, optionally wrapped in a transaction.
///
/// Sessions with an open transaction roll it back when dropped, so an
/// abandoned execution can never commit sandbox state.
#[async_trait]
pub trait SandboxSession: Send {
    /// Open a read-write transaction on this session's connection.
    async fn begin(&mut self) -> anyhow::Result<()>;

    /// Run one setup statement, discarding any output.
    async fn exec(&mut self, statement: &str) -> anyhow::Result<()>;

    /// Run one query and materialize its rows in canonical string form:
    /// every present cell as text, NULL as the empty string.
    async fn query(&mut self, query: &str) -> anyhow::Result<ResultSet>;

    /// Roll the transaction back. Safe to call when no transaction is open.
    async fn rollback(&mut self) -> anyhow::Result<()>;
}
