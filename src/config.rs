use std::env;

/// Process configuration for the judge, read from the environment at startup.
///
/// Sandbox URIs may be left unset; executing against the corresponding
/// dialect then fails with a connection error instead of at load time.
#[derive(Debug, Clone)]
pub struct Config {
    pub sandbox_postgres_uri: String,
    pub sandbox_mysql_uri: String,
    pub sandbox_sqlserver_uri: String,
    pub query_timeout_seconds: u64,
    pub query_max_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox_postgres_uri: String::new(),
            sandbox_mysql_uri: String::new(),
            sandbox_sqlserver_uri: String::new(),
            query_timeout_seconds: 3,
            query_max_rows: 1000,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for the execution limits when unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            sandbox_postgres_uri: env_string("SANDBOX_POSTGRES_URI"),
            sandbox_mysql_uri: env_string("SANDBOX_MYSQL_URI"),
            sandbox_sqlserver_uri: env_string("SANDBOX_SQLSERVER_URI"),
            query_timeout_seconds: env_parse("QUERY_TIMEOUT_SECONDS", 3),
            query_max_rows: env_parse("QUERY_MAX_ROWS", 1000),
        }
    }
}

fn env_string(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
