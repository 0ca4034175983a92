use std::{collections::VecDeque, sync::Arc};

use crate::{
    BoxError, Config, Connection, Error, Result,
    table::{SELECT_INCREMENT, format_window, replace_sql},
};

/// Number of recent ids kept per allocator for drift detection.
pub const MAX_WINDOW_SIZE: usize = 5;

/// Issues ids for one companion table on one alloc server.
///
/// Every id handed out is first pushed into a small rolling window. After
/// each push the window must satisfy, for every `i > 0`:
///
/// - `window[i] > window[0]`
/// - `(window[i] - window[0]) % increment_by == 0`
///
/// A violation means the server's live step no longer matches the
/// configuration, so its residue class may now overlap another server's.
///
/// The window belongs to a single session. It is dropped whenever the owning
/// [`Server`](crate::Server) disconnects.
#[derive(Debug)]
pub struct Allocator {
    server: Arc<str>,
    table: String,
    config: Arc<Config>,
    recent_allocations: VecDeque<u64>,
}

impl Allocator {
    /// Creates an allocator for the companion table `table` on `server`.
    pub fn new(server: Arc<str>, table: impl Into<String>, config: Arc<Config>) -> Self {
        Self {
            server,
            table: table.into(),
            config,
            recent_allocations: VecDeque::with_capacity(MAX_WINDOW_SIZE),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ids allocated most recently, oldest first.
    pub fn recent_allocations(&self) -> Vec<u64> {
        self.recent_allocations.iter().copied().collect()
    }

    pub const fn max_window_size(&self) -> usize {
        MAX_WINDOW_SIZE
    }

    /// Advances the counter by one step and returns the generated id.
    ///
    /// # Errors
    ///
    /// - [`Error::Query`] if the backend rejects a statement
    /// - [`Error::InvalidIncrement`] if the window check fails and increment
    ///   exceptions are not suppressed
    #[tracing::instrument(level = "trace", skip(self, conn), fields(server = %self.server, table = %self.table))]
    pub async fn allocate_one<C: Connection>(&mut self, conn: &mut C) -> Result<u64> {
        let id = conn
            .insert(&replace_sql(&self.table, 1))
            .await
            .map_err(|e| self.query_error(e))?;
        self.record(conn, id).await?;
        Ok(id)
    }

    /// Allocates a contiguous block of `count` ids with one statement.
    ///
    /// The live step is probed first, and a mismatch is alerted before any
    /// insert is issued. Only the first id of the block is read back. The
    /// rest are derived as `first + i * step`, which holds only because the
    /// database assigns the ids of a single multi-row insert contiguously. A
    /// concurrent writer that could interleave with that insert would break
    /// the derivation. Each derived id still goes through the window check.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate_one`].
    #[tracing::instrument(level = "trace", skip(self, conn), fields(server = %self.server, table = %self.table))]
    pub async fn allocate_many<C: Connection>(
        &mut self,
        conn: &mut C,
        count: usize,
    ) -> Result<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let step = check_increment(conn, &self.server, &self.config).await?;

        let first = conn
            .insert(&replace_sql(&self.table, count))
            .await
            .map_err(|e| self.query_error(e))?;

        let ids = (0..count as u64)
            .map(|i| i.checked_mul(step).and_then(|offset| first.checked_add(offset)))
            .collect::<Option<Vec<u64>>>()
            .ok_or_else(|| {
                self.query_error(
                    format!("block of {count} ids from {first} by {step} overflows u64").into(),
                )
            })?;
        for &id in &ids {
            self.record(conn, id).await?;
        }
        Ok(ids)
    }

    async fn record<C: Connection>(&mut self, conn: &mut C, id: u64) -> Result<()> {
        if self.recent_allocations.len() >= MAX_WINDOW_SIZE {
            self.recent_allocations.pop_front();
        }
        self.recent_allocations.push_back(id);

        if self.is_valid() {
            return Ok(());
        }

        let found = conn
            .select_value(SELECT_INCREMENT)
            .await
            .map_err(|e| self.query_error(e))?;
        let message = format!(
            "{}. Recently allocated IDs: {}",
            mismatch_message(self.config.increment_by(), found, conn.database()),
            format_window(self.recent_allocations.iter().copied())
        );
        alert(&self.config, Error::InvalidIncrement { message })
    }

    fn is_valid(&self) -> bool {
        let mut iter = self.recent_allocations.iter();
        let Some(&base) = iter.next() else {
            return true;
        };
        let step = self.config.increment_by();
        iter.all(|&id| id > base && (id - base) % step == 0)
    }

    fn query_error(&self, source: BoxError) -> Error {
        Error::Query {
            server: self.server.to_string(),
            source,
        }
    }
}

/// Reads the live step of the server behind `conn` and compares it with
/// `increment_by`.
///
/// Returns the live step. A mismatch goes through the alert policy, so with
/// suppression on the mismatched step is returned after a notification.
pub(crate) async fn check_increment<C: Connection>(
    conn: &mut C,
    server: &str,
    config: &Config,
) -> Result<u64> {
    let found = conn
        .select_value(SELECT_INCREMENT)
        .await
        .map_err(|source| Error::Query {
            server: server.to_owned(),
            source,
        })?;

    if found != config.increment_by() {
        let message = mismatch_message(config.increment_by(), found, conn.database());
        alert(config, Error::InvalidIncrement { message })?;
    }
    Ok(found)
}

fn mismatch_message(configured: u64, found: u64, database: &str) -> String {
    format!("Configured: '{configured}', Found: '{found}' on '{database}'")
}

fn alert(config: &Config, error: Error) -> Result<()> {
    if config.suppress_increment_exceptions() {
        tracing::warn!("increment mismatch tolerated: {error}");
        config.notifier().report(&error);
        Ok(())
    } else {
        Err(error)
    }
}
