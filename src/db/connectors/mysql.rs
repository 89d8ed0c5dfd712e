use anyhow::{anyhow, Context};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, Value};

use super::{SandboxConnector, SandboxSession, POOL_MAX_IDLE, POOL_MAX_LIFETIME, POOL_MAX_OPEN};
use crate::db::dialect::Dialect;
use crate::judge::result::{Cell, ResultSet};

/// MySQL sandbox connector using mysql_async and its built-in pool.
#[derive(Debug)]
pub struct MySqlConnector {
    pool: Pool,
}

impl MySqlConnector {
    pub fn connect(uri: &str) -> anyhow::Result<Self> {
        let opts =
            Opts::from_url(uri).map_err(|e| anyhow!("Invalid MySQL connection string: {}", e))?;

        let constraints = PoolConstraints::new(POOL_MAX_IDLE as usize, POOL_MAX_OPEN as usize)
            .ok_or_else(|| anyhow!("Invalid MySQL pool constraints"))?;
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_abs_conn_ttl(Some(POOL_MAX_LIFETIME));

        let opts = OptsBuilder::from_opts(opts).pool_opts(pool_opts);
        Ok(Self {
            pool: Pool::new(opts),
        })
    }
}

#[async_trait]
impl SandboxConnector for MySqlConnector {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .context("Failed to get MySQL connection from pool")?;
        conn.ping().await.context("MySQL ping failed")?;
        Ok(())
    }

    async fn session(&self) -> anyhow::Result<Box<dyn SandboxSession>> {
        let conn = self
            .pool
            .get_conn()
            .await
            .context("Failed to get MySQL connection from pool")?;
        Ok(Box::new(MySqlSession {
            conn: Some(conn),
            tx_open: false,
        }))
    }
}

struct MySqlSession {
    conn: Option<Conn>,
    tx_open: bool,
}

impl MySqlSession {
    fn conn(&mut self) -> anyhow::Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| anyhow!("MySQL session connection already released"))
    }
}

#[async_trait]
impl SandboxSession for MySqlSession {
    async fn begin(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .query_drop("START TRANSACTION")
            .await
            .context("Failed to begin transaction")?;
        self.tx_open = true;
        Ok(())
    }

    async fn exec(&mut self, statement: &str) -> anyhow::Result<()> {
        self.conn()?.query_drop(statement).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<ResultSet> {
        let conn = self.conn()?;
        let mut result = conn.query_iter(query).await?;

        let columns = result
            .columns()
            .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();

        let native: Vec<mysql_async::Row> = result.collect().await?;

        let mut set = ResultSet {
            columns,
            rows: Vec::with_capacity(native.len()),
        };
        for row in &native {
            let cells = (0..row.len())
                .map(|i| row.as_ref(i).map(value_to_cell).unwrap_or_default())
                .collect();
            set.rows.push(cells);
        }
        Ok(set)
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .query_drop("ROLLBACK")
            .await
            .context("Failed to rollback transaction")?;
        self.tx_open = false;
        Ok(())
    }
}

impl Drop for MySqlSession {
    fn drop(&mut self) {
        if !self.tx_open {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = conn.query_drop("ROLLBACK").await {
                        log::warn!("Deferred MySQL rollback failed: {}", err);
                    }
                });
            }
        }
    }
}

/// Render a MySQL value as a canonical cell. Text-protocol results arrive as
/// `Bytes`; the remaining variants cover the binary protocol.
fn value_to_cell(value: &Value) -> Cell {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => hex::encode(bytes),
        },
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Date(y, m, d, h, min, s, _us) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            y, m, d, h, min, s
        ),
        Value::Time(neg, d, h, min, s, _us) => {
            let sign = if *neg { "-" } else { "" };
            let total_hours = *d * 24 + (*h as u32);
            format!("{}{:02}:{:02}:{:02}", sign, total_hours, min, s)
        }
    }
}
