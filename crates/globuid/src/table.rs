//! Companion id tables and the statements issued against them.
//!
//! Every target table `t` has a companion `t_ids` on each alloc server: an
//! auto-incrementing primary key and a single-character `stub` column with a
//! unique key. The table holds exactly one row. Allocation replaces that row,
//! which advances the counter by the server's step without growing the table.

use core::fmt::Write as _;

use crate::{Error, Result};

/// Column type used for the companion primary key unless overridden.
pub const DEFAULT_UID_TYPE: &str = "bigint(21) UNSIGNED";

/// Id seeded into a freshly created companion table unless overridden.
pub const DEFAULT_START_ID: u64 = 1;

const MAX_IDENTIFIER_LEN: usize = 64;

pub(crate) const SELECT_INCREMENT: &str = "SELECT @@auto_increment_increment";

/// Options for [`Pool::create_companion_table`](crate::Pool::create_companion_table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    /// SQL type of the `id` column.
    pub uid_type: String,
    /// Value of the seeded stub row.
    pub start_id: u64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            uid_type: DEFAULT_UID_TYPE.to_owned(),
            start_id: DEFAULT_START_ID,
        }
    }
}

impl TableOptions {
    pub fn uid_type(mut self, uid_type: impl Into<String>) -> Self {
        self.uid_type = uid_type.into();
        self
    }

    pub fn start_id(mut self, start_id: u64) -> Self {
        self.start_id = start_id;
        self
    }
}

/// Returns the companion table name for `table`.
///
/// ```
/// assert_eq!(globuid::id_table_name("users"), "users_ids");
/// ```
pub fn id_table_name(table: &str) -> String {
    format!("{table}_ids")
}

/// Rejects anything that is not a plain identifier, so names can be quoted
/// into statements.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTableName {
            name: name.to_owned(),
        })
    }
}

pub(crate) fn validate_column_type(uid_type: &str) -> Result<()> {
    let valid = !uid_type.trim().is_empty()
        && uid_type
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b' ' | b'(' | b')' | b','));
    if valid {
        Ok(())
    } else {
        Err(Error::configuration(format!("Invalid uid type: {uid_type:?}")))
    }
}

pub(crate) fn create_table_sql(name: &str, uid_type: &str, storage_engine: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{name}` (\
         `id` {uid_type} NOT NULL AUTO_INCREMENT, \
         `stub` char(1) NOT NULL DEFAULT '', \
         PRIMARY KEY (`id`), \
         UNIQUE KEY `stub` (`stub`)\
         ) ENGINE={storage_engine}"
    )
}

pub(crate) fn seed_sql(name: &str, start_id: u64) -> String {
    format!("INSERT IGNORE INTO `{name}` VALUES({start_id}, 'a')")
}

pub(crate) fn drop_table_sql(name: &str) -> String {
    format!("DROP TABLE IF EXISTS `{name}`")
}

/// A single statement that replaces the stub row `count` times.
///
/// The database assigns the generated ids as one contiguous block and reports
/// the first of them.
pub(crate) fn replace_sql(name: &str, count: usize) -> String {
    let mut sql = format!("REPLACE INTO `{name}` (stub) VALUES ");
    for i in 0..count {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str("('a')");
    }
    sql
}

pub(crate) fn format_window(window: impl IntoIterator<Item = u64>) -> String {
    let mut out = String::from("[");
    for (i, id) in window.into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{id}");
    }
    out.push(']');
    out
}
