//! In-memory alloc servers for tests.
//!
//! Each simulated server follows MySQL's `auto_increment_increment` and
//! `auto_increment_offset` rules for the companion tables it holds, and can
//! be told to fail or hang on connect and on queries.

use core::future;
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{BoxError, Connection, Connector, Error, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    Ok,
    Fail,
    Hang,
}

#[derive(Debug)]
struct SimServer {
    increment: u64,
    offset: u64,
    tables: HashMap<String, u64>,
    on_connect: Behavior,
    on_query: Behavior,
    connects: usize,
    statements: Vec<String>,
}

/// A set of simulated alloc servers, shared by every connection opened on it.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimCluster {
    servers: Arc<Mutex<HashMap<String, SimServer>>>,
}

impl SimCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn server(self, name: &str, increment: u64, offset: u64) -> Self {
        self.servers.lock().insert(
            name.to_owned(),
            SimServer {
                increment,
                offset,
                tables: HashMap::new(),
                on_connect: Behavior::Ok,
                on_query: Behavior::Ok,
                connects: 0,
                statements: Vec::new(),
            },
        );
        self
    }

    /// Adds a companion table whose counter last produced `last`.
    pub(crate) fn table(self, server: &str, table: &str, last: u64) -> Self {
        self.rewind(server, table, last);
        self
    }

    pub(crate) fn rewind(&self, server: &str, table: &str, last: u64) {
        self.with(server, |s| {
            s.tables.insert(table.to_owned(), last);
        });
    }

    pub(crate) fn set_increment(&self, server: &str, increment: u64, offset: u64) {
        self.with(server, |s| {
            s.increment = increment;
            s.offset = offset;
        });
    }

    pub(crate) fn on_connect(&self, server: &str, behavior: Behavior) {
        self.with(server, |s| s.on_connect = behavior);
    }

    pub(crate) fn on_query(&self, server: &str, behavior: Behavior) {
        self.with(server, |s| s.on_query = behavior);
    }

    pub(crate) fn connects(&self, server: &str) -> usize {
        self.with(server, |s| s.connects)
    }

    pub(crate) fn statements(&self, server: &str) -> Vec<String> {
        self.with(server, |s| s.statements.clone())
    }

    pub(crate) fn has_table(&self, server: &str, table: &str) -> bool {
        self.with(server, |s| s.tables.contains_key(table))
    }

    /// Opens a connection without going through a [`Connector`] deadline.
    pub(crate) fn open(&self, server: &str) -> SimConnection {
        SimConnection {
            cluster: self.clone(),
            server: server.to_owned(),
        }
    }

    fn with<R>(&self, server: &str, f: impl FnOnce(&mut SimServer) -> R) -> R {
        let mut servers = self.servers.lock();
        let s = servers
            .get_mut(server)
            .unwrap_or_else(|| panic!("no simulated server {server}"));
        f(s)
    }

    fn run(&self, server: &str, sql: &str) -> Result<Option<u64>, BoxError> {
        let mut servers = self.servers.lock();
        let s = servers
            .get_mut(server)
            .ok_or_else(|| format!("server {server} went away"))?;
        s.statements.push(sql.to_owned());
        if s.on_query == Behavior::Fail {
            return Err("Lost connection to MySQL server during query".into());
        }

        if sql == "SELECT @@auto_increment_increment" {
            return Ok(Some(s.increment));
        }
        if let Some(rest) = sql.strip_prefix("REPLACE INTO `") {
            let (table, values) = rest.split_once('`').ok_or("malformed REPLACE")?;
            let rows = values.matches("('a')").count() as u64;
            let (increment, offset) = (s.increment, s.offset);
            let last = s
                .tables
                .get_mut(table)
                .ok_or_else(|| format!("Table '{table}' doesn't exist"))?;
            let first = next_value(*last, increment, offset);
            *last = first.saturating_add((rows - 1).saturating_mul(increment));
            return Ok(Some(first));
        }
        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS `") {
            let (table, _) = rest.split_once('`').ok_or("malformed CREATE")?;
            s.tables.entry(table.to_owned()).or_insert(0);
            return Ok(None);
        }
        if let Some(rest) = sql.strip_prefix("INSERT IGNORE INTO `") {
            let (table, values) = rest.split_once('`').ok_or("malformed INSERT")?;
            let start: u64 = values
                .trim_start_matches(" VALUES(")
                .split(',')
                .next()
                .ok_or("malformed INSERT")?
                .parse()?;
            let last = s
                .tables
                .get_mut(table)
                .ok_or_else(|| format!("Table '{table}' doesn't exist"))?;
            if *last == 0 {
                *last = start;
            }
            return Ok(None);
        }
        if let Some(rest) = sql.strip_prefix("DROP TABLE IF EXISTS `") {
            let (table, _) = rest.split_once('`').ok_or("malformed DROP")?;
            s.tables.remove(table);
            return Ok(None);
        }
        Err(format!("unsupported statement: {sql}").into())
    }

    fn query_behavior(&self, server: &str) -> Behavior {
        self.servers
            .lock()
            .get(server)
            .map_or(Behavior::Fail, |s| s.on_query)
    }
}

/// Smallest value above `last` in the series `offset + k * increment`.
///
/// Like MySQL, an offset larger than the increment is ignored.
fn next_value(last: u64, increment: u64, offset: u64) -> u64 {
    let offset = if offset > increment { 1 } else { offset };
    if last < offset {
        return offset;
    }
    offset + ((last - offset) / increment + 1) * increment
}

impl Connector for SimCluster {
    type Connection = SimConnection;

    async fn connect(&self, server: &str) -> Result<SimConnection, BoxError> {
        let behavior = {
            let mut servers = self.servers.lock();
            let s = servers
                .get_mut(server)
                .ok_or_else(|| format!("No id server '{server}' configured"))?;
            s.connects += 1;
            s.on_connect
        };
        match behavior {
            Behavior::Ok => Ok(self.open(server)),
            Behavior::Fail => Err(format!("Can't connect to MySQL server on '{server}'").into()),
            Behavior::Hang => future::pending().await,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SimConnection {
    cluster: SimCluster,
    server: String,
}

impl SimConnection {
    async fn run(&mut self, sql: &str) -> Result<Option<u64>, BoxError> {
        if self.cluster.query_behavior(&self.server) == Behavior::Hang {
            self.cluster.with(&self.server, |s| s.statements.push(sql.to_owned()));
            return future::pending().await;
        }
        self.cluster.run(&self.server, sql)
    }
}

impl Connection for SimConnection {
    fn database(&self) -> &str {
        &self.server
    }

    async fn execute(&mut self, sql: &str) -> Result<(), BoxError> {
        self.run(sql).await.map(|_| ())
    }

    async fn insert(&mut self, sql: &str) -> Result<u64, BoxError> {
        self.run(sql).await?.ok_or_else(|| "statement generated no id".into())
    }

    async fn select_value(&mut self, sql: &str) -> Result<u64, BoxError> {
        self.run(sql).await?.ok_or_else(|| "statement returned no rows".into())
    }
}

/// Notifier that keeps everything it is told.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    seen: Arc<Mutex<Vec<(&'static str, String)>>>,
}

impl Recorder {
    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.seen.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(_, msg)| msg.clone()).collect()
    }

    pub(crate) fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl Notifier for Recorder {
    fn report(&self, error: &Error) {
        self.seen.lock().push((error.kind(), error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_value_follows_offset_and_increment() {
        assert_eq!(next_value(0, 2, 1), 1);
        assert_eq!(next_value(1, 2, 1), 3);
        assert_eq!(next_value(0, 2, 2), 2);
        assert_eq!(next_value(2, 2, 2), 4);
        assert_eq!(next_value(20, 5, 5), 25);
        assert_eq!(next_value(10, 5, 10), 11);
    }
}
