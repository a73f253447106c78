use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{LedgerError, Result};
use crate::transaction::NestedPolicy;

const URL_SCHEME: &str = "sqlite://";

/// Store configuration
///
/// Builder-style, in the manner of a database driver's connection options.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Path of the single database file
    pub path: PathBuf,

    /// Upper bound a writer waits for the exclusive lock before failing with `Busy`
    pub busy_timeout: Duration,

    /// How long to wait for a free pooled connection
    pub connect_timeout: Duration,

    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Minimum number of connections in pool
    pub min_connections: usize,

    /// Connection idle timeout
    pub idle_timeout: Option<Duration>,

    /// Maximum connection lifetime
    pub max_lifetime: Option<Duration>,

    /// Use write-ahead logging so readers never block on the writer
    pub wal: bool,

    /// Enforce foreign keys on every connection
    pub foreign_keys: bool,

    /// Version tag stamped on every event record
    pub event_version: String,

    /// What `run_exclusive` does when the context already carries a transaction
    pub nested: NestedPolicy,
}

impl LedgerConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(30),
            max_connections: 10,
            min_connections: 1,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            wal: true,
            foreign_keys: true,
            event_version: env!("CARGO_PKG_VERSION").to_string(),
            nested: NestedPolicy::default(),
        }
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn event_version(mut self, version: impl Into<String>) -> Self {
        self.event_version = version.into();
        self
    }

    pub fn nested(mut self, policy: NestedPolicy) -> Self {
        self.nested = policy;
        self
    }

    /// Parse configuration from a connection string
    ///
    /// Format: `sqlite://<path>[?key=value&...]` with keys `busy_timeout_ms`,
    /// `connect_timeout_ms`, `max_connections`, `min_connections`, `wal`,
    /// `foreign_keys`. The path is percent-decoded, so `%20` and `%3F` stand
    /// for a space and a literal `?` in the file name.
    ///
    /// ```ignore
    /// let config = LedgerConfig::from_url("sqlite:///var/lib/orc/ledger.db?busy_timeout_ms=2000")?;
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| LedgerError::Config(format!("URL must start with '{}'", URL_SCHEME)))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(LedgerError::Config("URL has no database path".into()));
        }

        let mut config = Self::new(decode_path(path)?);
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| LedgerError::Config(format!("malformed option '{}'", pair)))?;
            config = match key {
                "busy_timeout_ms" => config.busy_timeout(Duration::from_millis(parse_opt(key, value)?)),
                "connect_timeout_ms" => {
                    config.connect_timeout(Duration::from_millis(parse_opt(key, value)?))
                }
                "max_connections" => config.max_connections(parse_opt(key, value)?),
                "min_connections" => config.min_connections(parse_opt(key, value)?),
                "wal" => config.wal(parse_opt(key, value)?),
                "foreign_keys" => config.foreign_keys(parse_opt(key, value)?),
                other => return Err(LedgerError::Config(format!("unknown option '{}'", other))),
            };
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        format!(
            "{}{}?busy_timeout_ms={}&max_connections={}",
            URL_SCHEME,
            encode_path(&self.path.to_string_lossy()),
            self.busy_timeout.as_millis(),
            self.max_connections
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let raw = self.path.to_string_lossy();
        if raw.is_empty() {
            return Err(LedgerError::Config("database path cannot be empty".into()));
        }

        // Every pooled connection would open its own private database.
        if raw == ":memory:" || raw.starts_with("file::memory:") {
            return Err(LedgerError::Config(
                "in-memory databases cannot be shared across pooled connections".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(LedgerError::Config("max_connections must be > 0".into()));
        }

        if self.min_connections > self.max_connections {
            return Err(LedgerError::Config(
                "min_connections cannot exceed max_connections".into(),
            ));
        }

        Ok(())
    }
}

/// Bytes in a path that would otherwise be read as URL syntax.
const PATH_RESERVED: &[char] = &['%', '?', '&', '#', ' '];

fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        if PATH_RESERVED.contains(&c) {
            encoded.push_str(&format!("%{:02X}", c as u32));
        } else {
            encoded.push(c);
        }
    }
    encoded
}

/// Percent-decode the path part of a connection string.
fn decode_path(raw: &str) -> Result<String> {
    let malformed = || LedgerError::Config(format!("malformed percent-encoding in path '{}'", raw));

    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = raw
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .ok_or_else(malformed)?;
            decoded.push(u8::from_str_radix(hex, 16).map_err(|_| malformed())?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).map_err(|_| malformed())
}

fn parse_opt<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| LedgerError::Config(format!("invalid value '{}' for '{}'", value, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::new("/tmp/ledger.db");
        assert_eq!(config.busy_timeout, Duration::from_millis(5000));
        assert_eq!(config.max_connections, 10);
        assert!(config.wal);
        assert!(config.foreign_keys);
        assert_eq!(config.nested, NestedPolicy::Join);
    }

    #[test]
    fn test_builder_pattern() {
        let config = LedgerConfig::new("ledger.db")
            .busy_timeout(Duration::from_millis(250))
            .max_connections(4)
            .event_version("abc123")
            .nested(NestedPolicy::Reject);

        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.event_version, "abc123");
        assert_eq!(config.nested, NestedPolicy::Reject);
    }

    #[test]
    fn test_from_url() {
        let config = LedgerConfig::from_url(
            "sqlite:///var/lib/orc/ledger.db?busy_timeout_ms=2000&max_connections=3&wal=false",
        )
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/var/lib/orc/ledger.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(2000));
        assert_eq!(config.max_connections, 3);
        assert!(!config.wal);
    }

    #[test]
    fn test_invalid_url() {
        assert!(LedgerConfig::from_url("postgres://db").is_err());
        assert!(LedgerConfig::from_url("sqlite://").is_err());
        assert!(LedgerConfig::from_url("sqlite://a.db?colour=blue").is_err());
        assert!(LedgerConfig::from_url("sqlite://a.db?max_connections=lots").is_err());
        assert!(LedgerConfig::from_url("sqlite://a.db?wal").is_err());
    }

    #[test]
    fn test_from_url_decodes_path() {
        let config =
            LedgerConfig::from_url("sqlite:///srv/my%20ledger%3Fv2.db?busy_timeout_ms=100").unwrap();
        assert_eq!(config.path, PathBuf::from("/srv/my ledger?v2.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(100));

        assert!(LedgerConfig::from_url("sqlite:///srv/bad%zz.db").is_err());
        assert!(LedgerConfig::from_url("sqlite:///srv/cut%2").is_err());
        assert!(LedgerConfig::from_url("sqlite:///srv/%FF.db").is_err());
    }

    #[test]
    fn test_to_url_encodes_reserved_path_characters() {
        let config = LedgerConfig::new("/srv/100% ledger?.db");
        let url = config.to_url();
        assert!(url.starts_with("sqlite:///srv/100%25%20ledger%3F.db?"));

        let parsed = LedgerConfig::from_url(&url).unwrap();
        assert_eq!(parsed.path, config.path);
    }

    #[test]
    fn test_validate() {
        assert!(LedgerConfig::new("ledger.db").validate().is_ok());
        assert!(LedgerConfig::new("").validate().is_err());
        assert!(LedgerConfig::new(":memory:").validate().is_err());
        assert!(LedgerConfig::new("ledger.db").max_connections(0).validate().is_err());
        assert!(
            LedgerConfig::new("ledger.db")
                .min_connections(10)
                .max_connections(5)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_to_url_round_trips_path() {
        let config = LedgerConfig::new("/data/ledger.db");
        let parsed = LedgerConfig::from_url(&config.to_url()).unwrap();
        assert_eq!(parsed.path, config.path);
        assert_eq!(parsed.busy_timeout, config.busy_timeout);
    }
}
