use core::future::Future;

use crate::BoxError;

/// Opens connections to alloc servers by their configured identifier.
///
/// The host application owns the registry that maps each identifier to
/// connection parameters. An identifier missing from that registry is an
/// ordinary connect failure.
pub trait Connector: Send + Sync + 'static {
    /// The connection type handed to a [`Server`](crate::Server).
    type Connection: Connection;

    /// Opens a new connection to `server`.
    ///
    /// Implementations do not need to enforce a deadline. The caller bounds
    /// the returned future by `connection_timeout` and drops it on expiry.
    fn connect(
        &self,
        server: &str,
    ) -> impl Future<Output = Result<Self::Connection, BoxError>> + Send;
}

/// A single session against an alloc server.
///
/// Only scalar results are ever needed: the value generated by the last
/// insert, and single-value selects.
pub trait Connection: Send + 'static {
    /// Name of the database this session is bound to, used in diagnostics.
    fn database(&self) -> &str;

    /// Runs a statement and discards its result.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Runs an insert and returns the first value it generated.
    fn insert(&mut self, sql: &str) -> impl Future<Output = Result<u64, BoxError>> + Send;

    /// Runs a select that yields exactly one unsigned integer.
    fn select_value(&mut self, sql: &str) -> impl Future<Output = Result<u64, BoxError>> + Send;
}
