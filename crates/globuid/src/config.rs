//! Static tunables for a [`Pool`](crate::Pool).
//!
//! A [`Config`] is immutable once built. Changing it means handing a new one
//! to [`Pool::reconfigure`](crate::Pool::reconfigure), which also throws away
//! every connection and rolling window built under the old one.

use core::{fmt, time::Duration};
use std::{collections::HashSet, sync::Arc};

use crate::{Error, Notifier, Result, TracingNotifier, table::validate_identifier};

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Default cooldown after a failed connect before the server is tried again.
pub const DEFAULT_CONNECTION_RETRY: Duration = Duration::from_secs(600);

/// Default bound on a single allocation statement.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cooldown after a server is evicted by a failed allocation.
pub const DEFAULT_EVICTION_COOLDOWN: Duration = Duration::from_secs(60);

/// Default modulus shared by all alloc servers.
pub const DEFAULT_INCREMENT_BY: u64 = 5;

/// Default storage engine for companion tables.
pub const DEFAULT_STORAGE_ENGINE: &str = "MyISAM";

/// Validated configuration shared by every server in a pool.
#[derive(Clone)]
pub struct Config {
    servers: Vec<String>,
    increment_by: u64,
    connection_timeout: Duration,
    connection_retry: Duration,
    query_timeout: Duration,
    eviction_cooldown: Duration,
    connection_shuffling: bool,
    suppress_increment_exceptions: bool,
    storage_engine: String,
    notifier: Arc<dyn Notifier>,
}

impl Config {
    /// Starts a builder for the given alloc server identifiers.
    pub fn builder<I, S>(servers: I) -> ConfigBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConfigBuilder::new(servers)
    }

    /// Alloc server identifiers, in configured order.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// The modulus `N`. Every alloc server must advance its counter by this.
    ///
    /// This value does not configure the servers. It is only compared with
    /// `auto_increment_increment` on each of them.
    pub const fn increment_by(&self) -> u64 {
        self.increment_by
    }

    pub const fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub const fn connection_retry(&self) -> Duration {
        self.connection_retry
    }

    pub const fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub const fn eviction_cooldown(&self) -> Duration {
        self.eviction_cooldown
    }

    /// Whether server order is reshuffled on every call instead of being
    /// fixed for the life of the process.
    pub const fn connection_shuffling(&self) -> bool {
        self.connection_shuffling
    }

    /// Whether a step mismatch is only reported instead of evicting the
    /// server.
    ///
    /// While this is on, an id produced under a drifted step is still handed
    /// out. Uniqueness of that id cannot be proven locally. Enable it only for
    /// the duration of a planned `auto_increment_increment` change.
    pub const fn suppress_increment_exceptions(&self) -> bool {
        self.suppress_increment_exceptions
    }

    pub fn storage_engine(&self) -> &str {
        &self.storage_engine
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Returns a builder preloaded with this configuration.
    pub fn to_builder(&self) -> ConfigBuilder {
        ConfigBuilder {
            servers: self.servers.clone(),
            increment_by: self.increment_by,
            connection_timeout: self.connection_timeout,
            connection_retry: self.connection_retry,
            query_timeout: self.query_timeout,
            eviction_cooldown: self.eviction_cooldown,
            connection_shuffling: self.connection_shuffling,
            suppress_increment_exceptions: self.suppress_increment_exceptions,
            storage_engine: self.storage_engine.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("servers", &self.servers)
            .field("increment_by", &self.increment_by)
            .field("connection_timeout", &self.connection_timeout)
            .field("connection_retry", &self.connection_retry)
            .field("query_timeout", &self.query_timeout)
            .field("eviction_cooldown", &self.eviction_cooldown)
            .field("connection_shuffling", &self.connection_shuffling)
            .field(
                "suppress_increment_exceptions",
                &self.suppress_increment_exceptions,
            )
            .field("storage_engine", &self.storage_engine)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Config`].
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use globuid::Config;
///
/// let config = Config::builder(["id_server_1", "id_server_2"])
///     .increment_by(2)
///     .query_timeout(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// assert_eq!(config.servers().len(), 2);
///
/// // More servers than residue classes would hand out duplicate ids.
/// assert!(Config::builder(["a", "b", "c"]).increment_by(2).build().is_err());
/// ```
#[must_use]
pub struct ConfigBuilder {
    servers: Vec<String>,
    increment_by: u64,
    connection_timeout: Duration,
    connection_retry: Duration,
    query_timeout: Duration,
    eviction_cooldown: Duration,
    connection_shuffling: bool,
    suppress_increment_exceptions: bool,
    storage_engine: String,
    notifier: Arc<dyn Notifier>,
}

impl ConfigBuilder {
    fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            increment_by: DEFAULT_INCREMENT_BY,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connection_retry: DEFAULT_CONNECTION_RETRY,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            eviction_cooldown: DEFAULT_EVICTION_COOLDOWN,
            connection_shuffling: false,
            suppress_increment_exceptions: false,
            storage_engine: DEFAULT_STORAGE_ENGINE.to_owned(),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn increment_by(mut self, increment_by: u64) -> Self {
        self.increment_by = increment_by;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn connection_retry(mut self, retry: Duration) -> Self {
        self.connection_retry = retry;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn eviction_cooldown(mut self, cooldown: Duration) -> Self {
        self.eviction_cooldown = cooldown;
        self
    }

    pub fn connection_shuffling(mut self, enabled: bool) -> Self {
        self.connection_shuffling = enabled;
        self
    }

    pub fn suppress_increment_exceptions(mut self, enabled: bool) -> Self {
        self.suppress_increment_exceptions = enabled;
        self
    }

    pub fn storage_engine(mut self, engine: impl Into<String>) -> Self {
        self.storage_engine = engine.into();
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if:
    /// - no servers are configured, or an identifier repeats
    /// - `increment_by` is zero or smaller than the number of servers
    /// - the storage engine is not a plain identifier
    pub fn build(self) -> Result<Config> {
        if self.servers.is_empty() {
            return Err(Error::configuration("You haven't configured any id servers"));
        }
        if self.increment_by == 0 {
            return Err(Error::configuration("increment_by must be positive"));
        }
        if self.servers.len() as u64 > self.increment_by {
            return Err(Error::configuration(format!(
                "More servers configured than increment_by: {} > {} -- this will create duplicate IDs.",
                self.servers.len(),
                self.increment_by
            )));
        }
        let mut seen = HashSet::with_capacity(self.servers.len());
        if let Some(dup) = self.servers.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(Error::configuration(format!(
                "Server '{dup}' is configured more than once"
            )));
        }
        validate_identifier(&self.storage_engine).map_err(|_| {
            Error::configuration(format!("Invalid storage engine: {:?}", self.storage_engine))
        })?;

        Ok(Config {
            servers: self.servers,
            increment_by: self.increment_by,
            connection_timeout: self.connection_timeout,
            connection_retry: self.connection_retry,
            query_timeout: self.query_timeout,
            eviction_cooldown: self.eviction_cooldown,
            connection_shuffling: self.connection_shuffling,
            suppress_increment_exceptions: self.suppress_increment_exceptions,
            storage_engine: self.storage_engine,
            notifier: self.notifier,
        })
    }
}

/// Deserializable mirror of [`Config`], with durations in whole seconds.
///
/// Every field except `servers` falls back to its default. Convert with
/// `Config::try_from`, which applies the same validation as
/// [`ConfigBuilder::build`]. The notifier is always the default and can be
/// replaced afterwards through [`Config::to_builder`].
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
#[cfg(feature = "serde")]
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub id_servers: Vec<String>,
    pub increment_by: u64,
    pub connection_timeout: u64,
    pub connection_retry: u64,
    pub query_timeout: u64,
    pub eviction_cooldown: u64,
    pub connection_shuffling: bool,
    pub suppress_increment_exceptions: bool,
    pub storage_engine: String,
}

#[cfg(feature = "serde")]
impl Default for Settings {
    fn default() -> Self {
        Self {
            id_servers: Vec::new(),
            increment_by: DEFAULT_INCREMENT_BY,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT.as_secs(),
            connection_retry: DEFAULT_CONNECTION_RETRY.as_secs(),
            query_timeout: DEFAULT_QUERY_TIMEOUT.as_secs(),
            eviction_cooldown: DEFAULT_EVICTION_COOLDOWN.as_secs(),
            connection_shuffling: false,
            suppress_increment_exceptions: false,
            storage_engine: DEFAULT_STORAGE_ENGINE.to_owned(),
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<Settings> for Config {
    type Error = Error;

    fn try_from(settings: Settings) -> Result<Self> {
        Config::builder(settings.id_servers)
            .increment_by(settings.increment_by)
            .connection_timeout(Duration::from_secs(settings.connection_timeout))
            .connection_retry(Duration::from_secs(settings.connection_retry))
            .query_timeout(Duration::from_secs(settings.query_timeout))
            .eviction_cooldown(Duration::from_secs(settings.eviction_cooldown))
            .connection_shuffling(settings.connection_shuffling)
            .suppress_increment_exceptions(settings.suppress_increment_exceptions)
            .storage_engine(settings.storage_engine)
            .build()
    }
}
