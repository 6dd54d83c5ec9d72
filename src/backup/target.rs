// dbbackup/src/backup/target.rs
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{BackupError, Result};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

// Accepts both `mysql://` and the JDBC form `jdbc:mysql://`.
static MYSQL_LOCATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:jdbc:)?mysql://(?P<host>[^:/?#@\s]+)(?::(?P<port>\d+))?/(?:[^?#\s]*/)?(?P<db>[^/?#\s]+)(?:\?.*)?$")
        .expect("locator pattern is valid")
});

/// Host, port and database name resolved from a connection locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionTarget {
    /// Parses `scheme://host[:port]/database[?params]`.
    ///
    /// The database is the last path segment. Query parameters are ignored. The raw locator is echoed in the error so a
    /// misconfigured `database_url` can be spotted in the logs.
    pub fn parse(locator: &str) -> Result<Self> {
        let malformed = || BackupError::MalformedConnectionLocator {
            locator: locator.to_string(),
        };

        let caps = MYSQL_LOCATOR.captures(locator.trim()).ok_or_else(malformed)?;

        let port = match caps.name("port") {
            Some(raw) => match raw.as_str().parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => return Err(malformed()),
            },
            None => DEFAULT_MYSQL_PORT,
        };

        Ok(ConnectionTarget {
            host: caps["host"].to_string(),
            port,
            database: caps["db"].to_string(),
        })
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}
