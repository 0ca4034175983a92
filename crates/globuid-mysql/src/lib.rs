//! MySQL alloc servers for [`globuid`], on top of `sqlx`.
//!
//! ```ignore
//! let connector = MySqlConnector::from_urls([
//!     ("id_server_1", "mysql://globuid@10.0.0.1/ids"),
//!     ("id_server_2", "mysql://globuid@10.0.0.2/ids"),
//! ])?;
//! let config = globuid::Config::builder(["id_server_1", "id_server_2"]).build()?;
//! let pool = globuid::Pool::new(config, connector);
//! ```

use std::{collections::HashMap, str::FromStr};

use globuid::{BoxError, Connection, Connector};
use sqlx::{
    Connection as _, Row as _,
    mysql::{MySqlConnectOptions, MySqlConnection},
};

#[derive(thiserror::Error, Debug)]
pub enum MySqlError {
    #[error("Invalid connection URL for {server}: {source}")]
    InvalidUrl {
        server: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("No id server '{server}' configured")]
    UnknownServer { server: String },
}

/// Session values for `auto_increment_increment` and
/// `auto_increment_offset`.
///
/// Production alloc servers set both globally. Applying them per session
/// lets a single MySQL instance stand in for several alloc servers during
/// development and tests. An offset above the increment is ignored by MySQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerVariables {
    pub increment: u64,
    pub offset: u64,
}

impl ServerVariables {
    pub const fn new(increment: u64, offset: u64) -> Self {
        Self { increment, offset }
    }

    pub fn statements(&self) -> [String; 2] {
        [
            format!("SET SESSION auto_increment_increment = {}", self.increment),
            format!("SET SESSION auto_increment_offset = {}", self.offset),
        ]
    }

    pub async fn apply(&self, conn: &mut MySqlConnection) -> Result<(), sqlx::Error> {
        for sql in self.statements() {
            sqlx::query(&sql).execute(&mut *conn).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    options: MySqlConnectOptions,
    variables: Option<ServerVariables>,
}

/// Registry of alloc servers, keyed by the identifiers used in
/// [`globuid::Config`].
#[derive(Debug, Clone, Default)]
pub struct MySqlConnector {
    servers: HashMap<String, Entry>,
}

impl MySqlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `(identifier, url)` pairs.
    ///
    /// # Errors
    ///
    /// [`MySqlError::InvalidUrl`] for the first url that does not parse.
    pub fn from_urls<I, K, V>(urls: I) -> Result<Self, MySqlError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut connector = Self::new();
        for (server, url) in urls {
            let server = server.into();
            let options = MySqlConnectOptions::from_str(url.as_ref())
                .map_err(|source| MySqlError::InvalidUrl {
                    server: server.clone(),
                    source,
                })?;
            connector.insert(server, options);
        }
        Ok(connector)
    }

    /// Registers `server`, replacing any previous entry under that name.
    pub fn insert(&mut self, server: impl Into<String>, options: MySqlConnectOptions) {
        self.servers.insert(
            server.into(),
            Entry {
                options,
                variables: None,
            },
        );
    }

    /// Applies `variables` to every session opened against `server`.
    ///
    /// # Errors
    ///
    /// [`MySqlError::UnknownServer`] if `server` was never inserted.
    pub fn set_variables(
        &mut self,
        server: &str,
        variables: ServerVariables,
    ) -> Result<(), MySqlError> {
        let entry = self
            .servers
            .get_mut(server)
            .ok_or_else(|| MySqlError::UnknownServer {
                server: server.to_owned(),
            })?;
        entry.variables = Some(variables);
        Ok(())
    }

    pub fn contains(&self, server: &str) -> bool {
        self.servers.contains_key(server)
    }
}

impl Connector for MySqlConnector {
    type Connection = MySqlIdConnection;

    async fn connect(&self, server: &str) -> Result<MySqlIdConnection, BoxError> {
        let entry = self
            .servers
            .get(server)
            .ok_or_else(|| MySqlError::UnknownServer {
                server: server.to_owned(),
            })?;

        let mut conn = MySqlConnection::connect_with(&entry.options).await?;
        if let Some(variables) = entry.variables {
            variables.apply(&mut conn).await?;
        }
        let database: Option<String> = sqlx::query_scalar("SELECT DATABASE()")
            .fetch_one(&mut conn)
            .await?;
        let database = database.unwrap_or_else(|| server.to_owned());

        tracing::debug!(server, database = %database, "opened MySQL session");
        Ok(MySqlIdConnection { conn, database })
    }
}

/// One MySQL session bound to an alloc server.
#[derive(Debug)]
pub struct MySqlIdConnection {
    conn: MySqlConnection,
    database: String,
}

impl Connection for MySqlIdConnection {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> Result<(), BoxError> {
        sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn insert(&mut self, sql: &str) -> Result<u64, BoxError> {
        let result = sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(result.last_insert_id())
    }

    async fn select_value(&mut self, sql: &str) -> Result<u64, BoxError> {
        let row = sqlx::query(sql).fetch_one(&mut self.conn).await?;
        // System variables come back signed on some server versions.
        Ok(row.try_get_unchecked::<u64, _>(0)?)
    }
}
