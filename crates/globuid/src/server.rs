use core::{future::Future, time::Duration};
use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Mutex, time::Instant};

use crate::{
    Allocator, Config, Connection, Connector, Error, Result, TableOptions,
    allocator::check_increment,
    table::{create_table_sql, drop_table_sql, seed_sql, validate_column_type, validate_identifier},
};

/// One alloc server and the lifecycle of its single connection.
///
/// ```text
/// Unconnected ──connect ok──▶ Connected ──disconnect / eviction──▶ Unconnected (retry_at set)
///      ▲                                                                 │
///      └──────────────────────── retry_at elapses ───────────────────────┘
/// ```
///
/// The connection is opened lazily by [`Server::connect`]. A failed connect
/// is reported to the notifier and schedules the next attempt
/// `connection_retry` later. A failed statement drops the session and keeps
/// the server out for `eviction_cooldown`, before the lock is released. All state transitions, and every allocation,
/// run under one lock per server, so concurrent callers never share a
/// session or a rolling window.
pub struct Server<C: Connector> {
    name: Arc<str>,
    config: Arc<Config>,
    connector: Arc<C>,
    state: Mutex<ServerState<C::Connection>>,
}

struct ServerState<T> {
    connection: Option<T>,
    retry_at: Option<Instant>,
    allocators: HashMap<String, Allocator>,
}

impl<T> ServerState<T> {
    fn drop_connection(&mut self) {
        self.connection = None;
        self.allocators.clear();
    }
}

impl<C: Connector> Server<C> {
    pub fn new(name: impl Into<Arc<str>>, config: Arc<Config>, connector: Arc<C>) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            state: Mutex::new(ServerState {
                connection: None,
                retry_at: None,
                allocators: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    /// Instant before which no reconnect is attempted.
    pub async fn retry_at(&self) -> Option<Instant> {
        self.state.lock().await.retry_at
    }

    /// Ids recently allocated for `table` on the current session.
    pub async fn recent_allocations(&self, table: &str) -> Option<Vec<u64>> {
        self.state
            .lock()
            .await
            .allocators
            .get(table)
            .map(Allocator::recent_allocations)
    }

    /// Ensures a live connection, opening one if the retry cooldown allows.
    ///
    /// Already connected is a no-op. Within the cooldown the call fails with
    /// [`Error::NotConnected`] without touching the network.
    ///
    /// A new connection must open within `connection_timeout` and pass the
    /// increment check before it is kept. On failure the error is reported
    /// to the notifier, the next attempt is scheduled `connection_retry`
    /// from now, and the error is returned so the caller can aggregate it.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connection.is_some() {
            return Ok(());
        }
        if state.retry_at.is_some_and(|at| Instant::now() < at) {
            return Err(self.not_connected());
        }

        match self.open().await {
            Ok(conn) => {
                tracing::debug!(server = %self.name, "connected to alloc server");
                state.connection = Some(conn);
                state.retry_at = None;
                Ok(())
            }
            Err(err) => {
                self.config.notifier().report(&err);
                state.drop_connection();
                state.retry_at = Some(Instant::now() + self.config.connection_retry());
                Err(err)
            }
        }
    }

    /// Drops the connection and every allocator built on it.
    pub async fn disconnect(&self) {
        self.state.lock().await.drop_connection();
    }

    /// Drops the connection and keeps the server out of rotation for
    /// `cooldown`.
    pub async fn evict(&self, cooldown: Duration) {
        let mut state = self.state.lock().await;
        state.drop_connection();
        state.retry_at = Some(Instant::now() + cooldown);
    }

    /// Clears the cooldown so the next [`Server::connect`] tries again.
    pub(crate) async fn reset_retry(&self) {
        self.state.lock().await.retry_at = Some(Instant::now());
    }

    /// Allocates one id from the companion table `table`.
    ///
    /// Any failure evicts the server. Callers queued behind this one see
    /// [`Error::NotConnected`] instead of the suspect session.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] without a live connection
    /// - [`Error::Timeout`] if the allocation exceeds `query_timeout`
    /// - any error raised by [`Allocator::allocate_one`]
    pub async fn allocate_one(&self, table: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let ServerState {
            connection,
            allocators,
            ..
        } = &mut *state;
        let conn = connection.as_mut().ok_or_else(|| self.not_connected())?;
        let allocator = allocators
            .entry(table.to_owned())
            .or_insert_with(|| self.allocator(table));
        let result = self.bounded(allocator.allocate_one(conn)).await;
        self.settle(&mut state, result)
    }

    /// Allocates `count` ids from the companion table `table`, in order.
    ///
    /// A count of one takes the single-id path. Zero does no I/O.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate_one`].
    pub async fn allocate(&self, table: &str, count: usize) -> Result<Vec<u64>> {
        match count {
            0 => Ok(Vec::new()),
            1 => self.allocate_one(table).await.map(|id| vec![id]),
            _ => {
                let mut state = self.state.lock().await;
                let ServerState {
                    connection,
                    allocators,
                    ..
                } = &mut *state;
                let conn = connection.as_mut().ok_or_else(|| self.not_connected())?;
                let allocator = allocators
                    .entry(table.to_owned())
                    .or_insert_with(|| self.allocator(table));
                let result = self.bounded(allocator.allocate_many(conn, count)).await;
                self.settle(&mut state, result)
            }
        }
    }

    /// Creates the companion table `name` and seeds its stub row. Idempotent.
    pub async fn create_companion_table(&self, name: &str, options: &TableOptions) -> Result<()> {
        validate_identifier(name)?;
        validate_column_type(&options.uid_type)?;
        let create = create_table_sql(name, &options.uid_type, self.config.storage_engine());
        let seed = seed_sql(name, options.start_id);
        self.execute(&[create, seed]).await
    }

    /// Drops the companion table `name` if present.
    pub async fn drop_companion_table(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        self.execute(&[drop_table_sql(name)]).await
    }

    async fn execute(&self, statements: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        let conn = state
            .connection
            .as_mut()
            .ok_or_else(|| self.not_connected())?;
        let result = self
            .bounded(async {
                for sql in statements {
                    conn.execute(sql).await.map_err(|source| Error::Query {
                        server: self.name.to_string(),
                        source,
                    })?;
                }
                Ok(())
            })
            .await;
        self.settle(&mut state, result)
    }

    /// Drops the session under the state lock when `result` failed. Callers
    /// queued on the lock then get [`Error::NotConnected`].
    fn settle<T>(&self, state: &mut ServerState<C::Connection>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            tracing::debug!(server = %self.name, "dropping suspect session: {err}");
            state.drop_connection();
            state.retry_at = Some(Instant::now() + self.config.eviction_cooldown());
        }
        result
    }

    async fn open(&self) -> Result<C::Connection> {
        let timeout = self.config.connection_timeout();
        let mut conn = match tokio::time::timeout(timeout, self.connector.connect(&self.name)).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                return Err(Error::Connection {
                    server: self.name.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(Error::ConnectionTimeout {
                    server: self.name.to_string(),
                });
            }
        };
        self.bounded(check_increment(&mut conn, &self.name, &self.config))
            .await?;
        Ok(conn)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.query_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                server: self.name.to_string(),
                timeout,
            }),
        }
    }

    fn allocator(&self, table: &str) -> Allocator {
        Allocator::new(Arc::clone(&self.name), table, Arc::clone(&self.config))
    }

    fn not_connected(&self) -> Error {
        Error::NotConnected {
            server: self.name.to_string(),
        }
    }
}

impl<C: Connector> core::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
