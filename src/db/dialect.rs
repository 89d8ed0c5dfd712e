use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported sandbox dialects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    PostgreSql,
    MySql,
    SqlServer,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::PostgreSql, Dialect::MySql, Dialect::SqlServer];

    /// The wire/storage tag for this dialect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::PostgreSql => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(Dialect::PostgreSql),
            "mysql" => Ok(Dialect::MySql),
            "sqlserver" => Ok(Dialect::SqlServer),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

/// Error for a dialect tag outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDialect(pub String);

impl std::fmt::Display for UnknownDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported database type: {}", self.0)
    }
}

impl std::error::Error for UnknownDialect {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.as_str().parse::<Dialect>().unwrap(), dialect);
        }
    }

    #[test]
    fn test_unknown_tag() {
        let err = "oracle".parse::<Dialect>().unwrap_err();
        assert_eq!(err, UnknownDialect("oracle".to_string()));
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_serde_tags() {
        assert_eq!(
            serde_json::to_string(&Dialect::PostgreSql).unwrap(),
            "\"postgresql\""
        );
        let parsed: Dialect = serde_json::from_str("\"sqlserver\"").unwrap();
        assert_eq!(parsed, Dialect::SqlServer);
    }

    #[test]
    fn test_display() {
        assert_eq!(Dialect::MySql.to_string(), "mysql");
    }
}
