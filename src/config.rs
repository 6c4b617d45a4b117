//! Configuration handling.
//!
//! [`DatabaseUrl`] is the structured form of a connection string
//! (`dialect[+driver]://[user[:password]@][host[:port]]/database[?k=v&...]`).
//! [`PoolOptions`] holds the pool tunables recognised by the backend, resolved
//! from the URL query and from explicitly supplied [`BackendOptions`].

use crate::error::{DbError, DbResult};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Fixed placeholder shown instead of a password.
pub const MASKED_PASSWORD: &str = "********";

const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH: &AsciiSet = &USERINFO.remove(b'/');

/// Structured connection parameters.
///
/// Immutable: the `with_*` methods return a copy with exactly one component
/// changed. `Display` and `Debug` mask the password; [`DatabaseUrl::to_url`]
/// is the functional serialization used to open connections.
#[derive(Clone)]
pub struct DatabaseUrl {
    dialect: String,
    driver: String,
    username: Option<String>,
    password: Option<String>,
    hostname: Option<String>,
    port: Option<u16>,
    database: String,
    /// Unique keys, in the order first seen.
    options: Vec<(String, String)>,
}

impl DatabaseUrl {
    /// Parse a connection string.
    pub fn parse(s: &str) -> DbResult<Self> {
        let url = Url::parse(s).map_err(|e| DbError::invalid_url(e.to_string()))?;

        let (dialect, driver) = match url.scheme().split_once('+') {
            Some((dialect, driver)) => (dialect.to_string(), driver.to_string()),
            None => (url.scheme().to_string(), String::new()),
        };
        if dialect.is_empty() {
            return Err(DbError::invalid_url("Missing dialect"));
        }

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(decode)
            .transpose()?;
        let password = url.password().map(decode).transpose()?;
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(decode)
            .transpose()?;

        // One leading slash separates the authority; anything after it,
        // including a second slash for absolute file paths, is the database.
        let path = url.path();
        let database = decode(path.strip_prefix('/').unwrap_or(path))?;

        let mut options: Vec<(String, String)> = Vec::new();
        for (key, value) in url.query_pairs() {
            upsert(&mut options, key.into_owned(), value.into_owned());
        }

        Ok(Self {
            dialect,
            driver,
            username,
            password,
            hostname,
            port: url.port(),
            database,
            options,
        })
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Driver tag after `+` in the scheme; empty when absent.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Database name, or a filesystem path for file-based engines.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Value of a single query option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Query options as a map.
    pub fn options(&self) -> HashMap<&str, &str> {
        self.options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    pub fn with_dialect(&self, dialect: &str) -> Self {
        Self {
            dialect: dialect.to_string(),
            ..self.clone()
        }
    }

    pub fn with_driver(&self, driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            ..self.clone()
        }
    }

    pub fn with_username(&self, username: Option<&str>) -> Self {
        Self {
            username: username.map(String::from),
            ..self.clone()
        }
    }

    pub fn with_password(&self, password: Option<&str>) -> Self {
        Self {
            password: password.map(String::from),
            ..self.clone()
        }
    }

    pub fn with_hostname(&self, hostname: Option<&str>) -> Self {
        Self {
            hostname: hostname.map(String::from),
            ..self.clone()
        }
    }

    pub fn with_port(&self, port: Option<u16>) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Replace the whole option set.
    pub fn with_options<K, V>(&self, options: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut opts = Vec::new();
        for (k, v) in options {
            upsert(&mut opts, k.into(), v.into());
        }
        Self {
            options: opts,
            ..self.clone()
        }
    }

    /// Serialize back to a connection string, password included.
    pub fn to_url(&self) -> String {
        self.render(self.password.as_deref())
    }

    /// Connection string with the password replaced by [`MASKED_PASSWORD`].
    pub fn masked(&self) -> String {
        self.render(self.password.as_ref().map(|_| MASKED_PASSWORD))
    }

    fn render(&self, password: Option<&str>) -> String {
        let mut out = self.dialect.clone();
        if !self.driver.is_empty() {
            out.push('+');
            out.push_str(&self.driver);
        }
        out.push_str("://");

        if self.username.is_some() || password.is_some() {
            if let Some(username) = &self.username {
                out.extend(utf8_percent_encode(username, USERINFO));
            }
            if let Some(password) = password {
                out.push(':');
                if password == MASKED_PASSWORD {
                    out.push_str(password);
                } else {
                    out.extend(utf8_percent_encode(password, USERINFO));
                }
            }
            out.push('@');
        }

        if let Some(hostname) = &self.hostname {
            out.push_str(hostname);
        }
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }

        out.push('/');
        out.extend(utf8_percent_encode(&self.database, PATH));

        if !self.options.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.options.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        out
    }
}

impl FromStr for DatabaseUrl {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DatabaseUrl").field(&self.masked()).finish()
    }
}

/// Options compare as a map; their order is irrelevant.
impl PartialEq for DatabaseUrl {
    fn eq(&self, other: &Self) -> bool {
        self.dialect == other.dialect
            && self.driver == other.driver
            && self.username == other.username
            && self.password == other.password
            && self.hostname == other.hostname
            && self.port == other.port
            && self.database == other.database
            && self.options() == other.options()
    }
}

impl Eq for DatabaseUrl {}

fn decode(s: &str) -> DbResult<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| DbError::invalid_url(format!("Invalid percent-encoding: {e}")))
}

/// Insert or overwrite `key`, keeping the position of its first occurrence.
fn upsert(options: &mut Vec<(String, String)>, key: String, value: String) {
    match options.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => options.push((key, value)),
    }
}

/// Options supplied when constructing a backend.
///
/// They take precedence over the same keys in the URL query. Keys not
/// recognised as pool tunables are passed to the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    entries: Vec<(String, String)>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        upsert(&mut self.entries, key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for BackendOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// Connection pool configuration resolved from URL query and backend options.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Replace connections older than this many seconds
    pub recycle_secs: Option<u64>,
    /// Require (true) or disable (false) TLS; driver default when unset
    pub ssl: Option<bool>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value, never above the maximum.
    pub fn min_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.min_connections
            .unwrap_or(DEFAULT_MIN_CONNECTIONS)
            .min(self.max_connections_or_default(is_sqlite))
    }

    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.recycle_secs.map(Duration::from_secs)
    }

    /// Validate pool options.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == Some(0) {
            return Err(DbError::invalid_input(
                "max_size must be greater than 0",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_connections, self.max_connections) {
            if min > max {
                return Err(DbError::invalid_input(format!(
                    "min_size ({}) cannot exceed max_size ({})",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// Login name of the invoking OS user, used when a URL omits the username.
///
/// Checks `LOGNAME`, `USER`, `LNAME` and `USERNAME` in that order.
pub fn default_username() -> Option<String> {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}

/// Canonical name for a pool option key; `None` for driver passthrough keys.
fn canonical_pool_key(key: &str) -> Option<&'static str> {
    match key.to_ascii_lowercase().as_str() {
        "min_size" | "minsize" | "min_connections" => Some("min_size"),
        "max_size" | "maxsize" | "max_connections" => Some("max_size"),
        "pool_recycle" => Some("pool_recycle"),
        "ssl" => Some("ssl"),
        "acquire_timeout" => Some("acquire_timeout"),
        "idle_timeout" => Some("idle_timeout"),
        "test_before_acquire" => Some("test_before_acquire"),
        _ => None,
    }
}

/// Merge URL query options with explicit options.
///
/// Explicit options win. Returns the typed pool options and the remaining
/// driver passthrough pairs (explicit values overriding URL values).
pub fn resolve_options(
    url: &DatabaseUrl,
    explicit: &BackendOptions,
) -> DbResult<(PoolOptions, Vec<(String, String)>)> {
    let mut pool_values: HashMap<&'static str, String> = HashMap::new();
    let mut passthrough: Vec<(String, String)> = Vec::new();

    let sources = url
        .options
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(explicit.iter());
    for (key, value) in sources {
        match canonical_pool_key(key) {
            Some(canonical) => {
                pool_values.insert(canonical, value.to_string());
            }
            None => upsert(&mut passthrough, key.to_string(), value.to_string()),
        }
    }

    let options = PoolOptions {
        max_connections: parse_value(&pool_values, "max_size")?,
        min_connections: parse_value(&pool_values, "min_size")?,
        recycle_secs: parse_value(&pool_values, "pool_recycle")?,
        ssl: parse_bool(&pool_values, "ssl")?,
        idle_timeout_secs: parse_value(&pool_values, "idle_timeout")?,
        acquire_timeout_secs: parse_value(&pool_values, "acquire_timeout")?,
        test_before_acquire: parse_bool(&pool_values, "test_before_acquire")?,
    };
    options.validate()?;

    Ok((options, passthrough))
}

fn parse_value<T: FromStr>(values: &HashMap<&'static str, String>, key: &str) -> DbResult<Option<T>> {
    values
        .get(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| DbError::invalid_input(format!("Invalid value for {key}: '{v}'")))
        })
        .transpose()
}

fn parse_bool(values: &HashMap<&'static str, String>, key: &str) -> DbResult<Option<bool>> {
    values
        .get(key)
        .map(|v| {
            if v.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if v.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(DbError::invalid_input(format!(
                    "Invalid value for {key}: '{v}' (expected true or false)"
                )))
            }
        })
        .transpose()
}
