use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_tiberius::ConnectionManager;
use tiberius::{ColumnData, Config};

use super::{
    SandboxConnector, SandboxSession, POOL_ACQUIRE_TIMEOUT, POOL_MAX_IDLE, POOL_MAX_LIFETIME,
    POOL_MAX_OPEN,
};
use crate::db::dialect::Dialect;
use crate::judge::result::{Cell, ResultSet};

type MssqlPool = Pool<ConnectionManager>;
type MssqlConn = PooledConnection<'static, ConnectionManager>;

/// SQL Server sandbox connector using tiberius behind a bb8 pool.
#[derive(Debug)]
pub struct SqlServerConnector {
    pool: MssqlPool,
}

impl SqlServerConnector {
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let config = Config::from_ado_string(uri)
            .context("Failed to parse SQL Server connection string")?;
        let manager = ConnectionManager::new(config);

        let pool = Pool::builder()
            .max_size(POOL_MAX_OPEN)
            .min_idle(Some(POOL_MAX_IDLE))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .connection_timeout(POOL_ACQUIRE_TIMEOUT)
            .build(manager)
            .await
            .context("Failed to create SQL Server pool")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SandboxConnector for SqlServerConnector {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get SQL Server connection from pool")?;
        conn.simple_query("SELECT 1")
            .await
            .context("SQL Server ping failed")?
            .into_results()
            .await
            .context("SQL Server ping failed")?;
        Ok(())
    }

    async fn session(&self) -> anyhow::Result<Box<dyn SandboxSession>> {
        let conn = self
            .pool
            .get_owned()
            .await
            .context("Failed to get SQL Server connection from pool")?;
        Ok(Box::new(SqlServerSession {
            conn: Some(conn),
            tx_open: false,
        }))
    }
}

struct SqlServerSession {
    conn: Option<MssqlConn>,
    tx_open: bool,
}

impl SqlServerSession {
    fn conn(&mut self) -> anyhow::Result<&mut MssqlConn> {
        self.conn
            .as_mut()
            .ok_or_else(|| anyhow!("SQL Server session connection already released"))
    }
}

#[async_trait]
impl SandboxSession for SqlServerSession {
    async fn begin(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .simple_query("BEGIN TRANSACTION")
            .await
            .context("Failed to begin transaction")?
            .into_results()
            .await
            .context("Failed to begin transaction")?;
        self.tx_open = true;
        Ok(())
    }

    async fn exec(&mut self, statement: &str) -> anyhow::Result<()> {
        self.conn()?
            .simple_query(statement)
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<ResultSet> {
        let mut stream = self.conn()?.simple_query(query).await?;

        let columns = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let native = stream.into_first_result().await?;

        let mut set = ResultSet {
            columns,
            rows: Vec::with_capacity(native.len()),
        };
        for row in &native {
            let cells = row
                .cells()
                .enumerate()
                .map(|(i, (_col, data))| cell_to_string(row, i, data))
                .collect();
            set.rows.push(cells);
        }
        Ok(set)
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.conn()?
            .simple_query("ROLLBACK TRANSACTION")
            .await
            .context("Failed to rollback transaction")?
            .into_results()
            .await
            .context("Failed to rollback transaction")?;
        self.tx_open = false;
        Ok(())
    }
}

impl Drop for SqlServerSession {
    fn drop(&mut self) {
        if !self.tx_open {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let rolled_back = match conn.simple_query("ROLLBACK TRANSACTION").await {
                        Ok(stream) => stream.into_results().await.map(|_| ()),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = rolled_back {
                        log::warn!("Deferred SQL Server rollback failed: {}", err);
                    }
                });
            }
        }
    }
}

/// Render one tiberius cell as a canonical string, NULL as the empty string.
/// Date/time variants go through the typed chrono getters.
fn cell_to_string(row: &tiberius::Row, idx: usize, data: &ColumnData<'_>) -> Cell {
    match data {
        ColumnData::Bit(Some(b)) => b.to_string(),
        ColumnData::U8(Some(v)) => v.to_string(),
        ColumnData::I16(Some(v)) => v.to_string(),
        ColumnData::I32(Some(v)) => v.to_string(),
        ColumnData::I64(Some(v)) => v.to_string(),
        ColumnData::F32(Some(v)) => v.to_string(),
        ColumnData::F64(Some(v)) => v.to_string(),
        ColumnData::Numeric(Some(n)) => {
            (n.value() as f64 / 10f64.powi(n.scale() as i32)).to_string()
        }
        ColumnData::String(Some(s)) => s.to_string(),
        ColumnData::Guid(Some(g)) => format!("{}", g),
        ColumnData::Binary(Some(bytes)) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => hex::encode(bytes.as_ref()),
        },
        ColumnData::Xml(Some(xml)) => xml.to_string(),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        ColumnData::DateTimeOffset(Some(_)) => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        ColumnData::Date(Some(_)) => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        ColumnData::Time(Some(_)) => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default(),
        // Every None variant is NULL.
        _ => String::new(),
    }
}
