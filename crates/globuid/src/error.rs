//! Error types for id allocation.
//!
//! Only [`Error::NoServersAvailable`] escapes the pool during normal
//! operation. Everything else is raised at the server or allocator layer,
//! reported through the configured [`Notifier`], and folded into the
//! aggregate carried by `NoServersAvailable` when every server fails a pass.
//!
//! [`Notifier`]: crate::Notifier

use core::{fmt, time::Duration};

/// Errors produced by a backend connection or connector.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for id allocation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration was rejected at build time.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Establishing a connection exceeded `connection_timeout`.
    #[error("Timed out establishing a connection to {server}")]
    ConnectionTimeout { server: String },

    /// Establishing a connection failed for any reason other than a timeout.
    #[error("Establishing a connection to {server}: {source}")]
    Connection {
        server: String,
        #[source]
        source: BoxError,
    },

    /// A statement did not complete within `query_timeout`.
    #[error("Query on {server} exceeded {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    /// The live step of an alloc server no longer matches `increment_by`.
    ///
    /// Two servers could now emit the same id.
    #[error("{message}")]
    InvalidIncrement { message: String },

    /// An allocation was attempted on a server without a live connection.
    #[error("{server} is not connected")]
    NotConnected { server: String },

    /// The backend rejected a statement.
    #[error("Query on {server} failed: {source}")]
    Query {
        server: String,
        #[source]
        source: BoxError,
    },

    /// The table name cannot be used as an SQL identifier.
    #[error("Invalid table name: {name:?}")]
    InvalidTableName { name: String },

    /// Every configured server failed during one pass.
    #[error("{}", Aggregate(.errors))]
    NoServersAvailable { errors: Vec<Error> },
}

impl Error {
    /// A short, stable name for the error class, used in notifications.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::ConnectionTimeout { .. } => "ConnectionTimeoutException",
            Self::Connection { .. } => "ConnectionError",
            Self::Timeout { .. } => "TimeoutException",
            Self::InvalidIncrement { .. } => "InvalidIncrementException",
            Self::NotConnected { .. } => "NotConnected",
            Self::Query { .. } => "QueryError",
            Self::InvalidTableName { .. } => "InvalidTableName",
            Self::NoServersAvailable { .. } => "NoServersAvailableException",
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

struct Aggregate<'a>(&'a [Error]);

impl fmt::Display for Aggregate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("Errors hit: ")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
