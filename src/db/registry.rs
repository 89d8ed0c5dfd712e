use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::connectors::{
    mysql::MySqlConnector, postgres::PostgresConnector, sqlserver::SqlServerConnector,
    SandboxConnector,
};
use crate::db::dialect::Dialect;
use crate::judge::result::EngineError;

/// Holds one lazily-built sandbox connector per dialect.
///
/// Connectors are created on first use and kept for the process lifetime.
/// Each acquire pings the cached connector; a failed ping drops it and
/// rebuilds the pool from configuration.
pub struct DialectRegistry {
    config: Config,
    connectors: Mutex<HashMap<Dialect, Arc<dyn SandboxConnector>>>,
}

impl DialectRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connectors: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a dialect to a live connector, building or rebuilding its
    /// pool as needed.
    pub async fn acquire(&self, dialect: Dialect) -> Result<Arc<dyn SandboxConnector>, EngineError> {
        let mut connectors = self.connectors.lock().await;

        if let Some(existing) = connectors.get(&dialect) {
            if existing.ping().await.is_ok() {
                return Ok(existing.clone());
            }
            log::warn!("Stale {} sandbox connection, rebuilding pool", dialect);
            connectors.remove(&dialect);
        }

        let uri = self.uri_for(dialect)?;
        let connector = build_connector(dialect, uri).await.map_err(|err| {
            EngineError::connection(format!(
                "failed to connect to sandbox database: {:#}",
                err
            ))
        })?;

        connector.ping().await.map_err(|err| {
            EngineError::connection(format!(
                "failed to connect to sandbox database: {:#}",
                err
            ))
        })?;

        log::info!("Connected {} sandbox pool", dialect);
        connectors.insert(dialect, connector.clone());
        Ok(connector)
    }

    fn uri_for(&self, dialect: Dialect) -> Result<&str, EngineError> {
        let uri = match dialect {
            Dialect::PostgreSql => &self.config.sandbox_postgres_uri,
            Dialect::MySql => &self.config.sandbox_mysql_uri,
            Dialect::SqlServer => &self.config.sandbox_sqlserver_uri,
        };
        if uri.is_empty() {
            return Err(EngineError::connection(format!(
                "failed to connect to sandbox database: {} sandbox not configured",
                dialect
            )));
        }
        Ok(uri)
    }
}

async fn build_connector(
    dialect: Dialect,
    uri: &str,
) -> anyhow::Result<Arc<dyn SandboxConnector>> {
    let connector: Arc<dyn SandboxConnector> = match dialect {
        Dialect::PostgreSql => Arc::new(PostgresConnector::connect(uri).await?),
        Dialect::MySql => Arc::new(MySqlConnector::connect(uri)?),
        Dialect::SqlServer => Arc::new(SqlServerConnector::connect(uri).await?),
    };
    Ok(connector)
}
