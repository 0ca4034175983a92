//! Failover across alloc servers.
//!
//! A [`Pool`] owns the process-local set of [`Server`]s. Retrieval walks the
//! servers in order and returns the first success. Every failure on the way
//! is reported, and the failing server has already evicted itself for
//! `eviction_cooldown`. When a
//! pass ends with no server connected, every cooldown is cleared so the next
//! call retries immediately, and the caller gets
//! [`Error::NoServersAvailable`] with every error of the pass.

use core::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::{
    Config, Connector, Error, Result, Server, TableOptions,
    table::{id_table_name, validate_column_type, validate_identifier},
};


/// The set of alloc servers shared by one process.
///
/// Server state is keyed by the OS process id. After a fork the child sees
/// a different id on its first call, drops the inherited servers without
/// using their connections, and builds a fresh set.
///
/// # Example
///
/// ```ignore
/// let config = Config::builder(["id_server_1", "id_server_2"]).increment_by(5).build()?;
/// let pool = Pool::new(config, connector);
///
/// let id = pool.get_uid("users").await?;
/// let block = pool.get_many_uids("users", 100).await?;
/// ```
pub struct Pool<C: Connector> {
    connector: Arc<C>,
    inner: Mutex<Inner<C>>,
}

struct Inner<C: Connector> {
    config: Arc<Config>,
    servers: Option<ServerSet<C>>,
}

struct ServerSet<C: Connector> {
    pid: u32,
    servers: Vec<Arc<Server<C>>>,
}

impl<C: Connector> Pool<C> {
    pub fn new(config: Config, connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            inner: Mutex::new(Inner {
                config: Arc::new(config),
                servers: None,
            }),
        }
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.inner.lock().config)
    }

    /// Replaces the configuration and drops every server built under the
    /// old one, along with their connections and rolling windows.
    ///
    /// Calls already in flight finish on the old servers.
    pub fn reconfigure(&self, config: Config) {
        let mut inner = self.inner.lock();
        inner.config = Arc::new(config);
        inner.servers = None;
    }

    /// Disconnects every server and forgets the server set.
    ///
    /// The next call builds a new set, in a new random order.
    pub async fn disconnect_all(&self) {
        let set = self.inner.lock().servers.take();
        if let Some(set) = set {
            for server in &set.servers {
                server.disconnect().await;
            }
        }
    }

    /// Number of servers currently holding a live connection.
    pub async fn connected_servers(&self) -> usize {
        let servers = self
            .inner
            .lock()
            .servers
            .as_ref()
            .map(|set| set.servers.clone())
            .unwrap_or_default();
        let mut connected = 0;
        for server in &servers {
            if server.is_connected().await {
                connected += 1;
            }
        }
        connected
    }

    /// Allocates one id for `table`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTableName`] if `table` is not a plain identifier
    /// - [`Error::NoServersAvailable`] if every server failed
    pub async fn get_uid(&self, table: &str) -> Result<u64> {
        let id_table = id_table(table)?;
        let id_table = id_table.as_str();
        self.first_success(move |server| async move { server.allocate_one(id_table).await })
            .await
    }

    /// Allocates `count` ids for `table`, in increasing order, from a single
    /// server.
    ///
    /// A count of zero returns an empty list without touching any server.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_uid`].
    pub async fn get_many_uids(&self, table: &str, count: usize) -> Result<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let id_table = id_table(table)?;
        let id_table = id_table.as_str();
        self.first_success(move |server| async move { server.allocate(id_table, count).await })
            .await
    }

    /// Creates the companion table of `table` on every reachable server.
    ///
    /// Servers that fail are evicted and reported. The call only fails if no
    /// server is left connected.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_uid`].
    pub async fn create_companion_table(&self, table: &str, options: &TableOptions) -> Result<()> {
        let id_table = id_table(table)?;
        validate_column_type(&options.uid_type)?;
        let id_table = id_table.as_str();
        self.broadcast(move |server| async move {
            server.create_companion_table(id_table, options).await
        })
        .await
    }

    /// Drops the companion table of `table` on every reachable server.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_companion_table`].
    pub async fn drop_companion_table(&self, table: &str) -> Result<()> {
        let id_table = id_table(table)?;
        let id_table = id_table.as_str();
        self.broadcast(move |server| async move { server.drop_companion_table(id_table).await })
            .await
    }

    /// Drops and recreates the companion tables of `tables` on every
    /// reachable server, then disconnects everything so no rolling window
    /// outlives the tables it was built on.
    ///
    /// Meant for test setup.
    ///
    /// # Errors
    ///
    /// The first error hit by [`Self::drop_companion_table`] or
    /// [`Self::create_companion_table`].
    pub async fn recreate_companion_tables(
        &self,
        tables: &[&str],
        options: &TableOptions,
    ) -> Result<()> {
        for table in tables {
            self.drop_companion_table(table).await?;
        }
        for table in tables {
            self.create_companion_table(table, options).await?;
        }
        self.disconnect_all().await;
        Ok(())
    }

    /// Returns the configuration and the servers in the order to try them.
    ///
    /// The set is built on first use in this process, in a random order so
    /// that processes spread their load. With `connection_shuffling` the
    /// order is reshuffled on every call.
    fn setup(&self) -> (Arc<Config>, Vec<Arc<Server<C>>>) {
        let pid = std::process::id();
        let mut inner = self.inner.lock();
        let config = Arc::clone(&inner.config);

        let stale = inner.servers.as_ref().is_none_or(|set| set.pid != pid);
        if stale {
            if inner.servers.is_some() {
                tracing::debug!(pid, "process changed, rebuilding alloc servers");
            }
            let mut servers: Vec<_> = config
                .servers()
                .iter()
                .map(|name| {
                    Arc::new(Server::new(
                        name.as_str(),
                        Arc::clone(&config),
                        Arc::clone(&self.connector),
                    ))
                })
                .collect();
            servers.shuffle(&mut rand::rng());
            inner.servers = Some(ServerSet { pid, servers });
        }

        let mut servers = inner
            .servers
            .as_ref()
            .map(|set| set.servers.clone())
            .unwrap_or_default();
        drop(inner);

        if config.connection_shuffling() {
            servers.shuffle(&mut rand::rng());
        }
        (config, servers)
    }

    async fn first_success<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<Server<C>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (config, servers) = self.setup();
        let mut errors = Vec::new();

        for server in &servers {
            if let Err(err) = server.connect().await {
                errors.push(err);
                continue;
            }
            match op(Arc::clone(server)).await {
                Ok(value) => return Ok(value),
                // Evicted by a concurrent caller after our connect check.
                Err(err @ Error::NotConnected { .. }) => errors.push(err),
                Err(err) => failed(&config, server, err, &mut errors),
            }
        }

        Err(all_down(&config, &servers, errors).await)
    }

    async fn broadcast<F, Fut>(&self, op: F) -> Result<()>
    where
        F: Fn(Arc<Server<C>>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (config, servers) = self.setup();
        let mut errors = Vec::new();

        for server in &servers {
            if let Err(err) = server.connect().await {
                errors.push(err);
                continue;
            }
            match op(Arc::clone(server)).await {
                Ok(()) => {}
                Err(err @ Error::NotConnected { .. }) => errors.push(err),
                Err(err) => failed(&config, server, err, &mut errors),
            }
        }

        for server in &servers {
            if server.is_connected().await {
                return Ok(());
            }
        }
        Err(all_down(&config, &servers, errors).await)
    }
}

impl<C: Connector> core::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.lock().config)
            .finish_non_exhaustive()
    }
}

fn id_table(table: &str) -> Result<String> {
    validate_identifier(table)?;
    let name = id_table_name(table);
    validate_identifier(&name)?;
    Ok(name)
}

fn failed<C: Connector>(config: &Config, server: &Server<C>, err: Error, errors: &mut Vec<Error>) {
    tracing::warn!(
        server = server.name(),
        cooldown = ?config.eviction_cooldown(),
        "evicted alloc server: {err}"
    );
    config.notifier().report(&err);
    errors.push(err);
}

async fn all_down<C: Connector>(
    config: &Config,
    servers: &[Arc<Server<C>>],
    errors: Vec<Error>,
) -> Error {
    for server in servers {
        server.reset_retry().await;
    }
    let err = Error::NoServersAvailable { errors };
    tracing::error!("no alloc servers available: {err}");
    config.notifier().report(&err);
    err
}
