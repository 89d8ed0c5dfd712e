use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::{NoTls, SimpleQueryMessage};

use super::{
    SandboxConnector, SandboxSession, POOL_ACQUIRE_TIMEOUT, POOL_MAX_IDLE, POOL_MAX_LIFETIME,
    POOL_MAX_OPEN,
};
use crate::db::dialect::Dialect;
use crate::judge::result::ResultSet;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;
type PgConn = PooledConnection<'static, PostgresConnectionManager<NoTls>>;

/// PostgreSQL sandbox connector using tokio-postgres behind a bb8 pool.
///
/// Queries go through the simple (text) protocol so every cell arrives in
/// PostgreSQL's own text rendering, which is the canonical cell form.
#[derive(Debug)]
pub struct PostgresConnector {
    pool: PgPool,
}

impl PostgresConnector {
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let manager = PostgresConnectionManager::new_from_stringlike(uri, NoTls)
            .context("Invalid PostgreSQL connection string")?;

        let pool = Pool::builder()
            .max_size(POOL_MAX_OPEN)
            .min_idle(Some(POOL_MAX_IDLE))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .connection_timeout(POOL_ACQUIRE_TIMEOUT)
            .build(manager)
            .await
            .context("Failed to create PostgreSQL pool")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SandboxConnector for PostgresConnector {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection from pool")?;
        conn.simple_query("SELECT 1")
            .await
            .context("PostgreSQL ping failed")?;
        Ok(())
    }

    async fn session(&self) -> anyhow::Result<Box<dyn SandboxSession>> {
        let conn = self
            .pool
            .get_owned()
            .await
            .context("Failed to get PostgreSQL connection from pool")?;
        Ok(Box::new(PostgresSession {
            conn: Some(conn),
            tx_open: false,
        }))
    }
}

struct PostgresSession {
    conn: Option<PgConn>,
    tx_open: bool,
}

impl PostgresSession {
    fn conn(&mut self) -> anyhow::Result<&mut PgConn> {
        self.conn
            .as_mut()
            .ok_or_else(|| anyhow!("PostgreSQL session connection already released"))
    }
}

#[async_trait]
impl SandboxSession for PostgresSession {
    async fn begin(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .batch_execute("BEGIN")
            .await
            .context("Failed to begin transaction")?;
        self.tx_open = true;
        Ok(())
    }

    async fn exec(&mut self, statement: &str) -> anyhow::Result<()> {
        self.conn()?.batch_execute(statement).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<ResultSet> {
        let messages = self.conn()?.simple_query(query).await?;

        let mut set = ResultSet::default();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    set.columns = description.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    // NULL cells come back as None and normalize to "".
                    let cells = (0..row.len())
                        .map(|i| row.get(i).unwrap_or("").to_string())
                        .collect();
                    set.rows.push(cells);
                }
                SimpleQueryMessage::CommandComplete(_) => {}
                _ => {}
            }
        }
        Ok(set)
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .batch_execute("ROLLBACK")
            .await
            .context("Failed to rollback transaction")?;
        self.tx_open = false;
        Ok(())
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if !self.tx_open {
            return;
        }
        // Deferred rollback: the transaction must die even when the owning
        // execution was cancelled before its explicit rollback ran.
        if let Some(conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = conn.batch_execute("ROLLBACK").await {
                        log::warn!("Deferred PostgreSQL rollback failed: {}", err);
                    }
                });
            }
        }
    }
}
