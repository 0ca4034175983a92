//! Globally unique integer ids from a set of MySQL ticket servers.
//!
//! Each alloc server generates ids from its own `auto_increment` sequence,
//! configured with a shared step `N` and a distinct offset, so no two servers
//! can ever produce the same value. A [`Pool`] walks the servers and fails
//! over between them. Database access goes through the [`Connector`] and
//! [`Connection`] traits; `globuid-mysql` provides the MySQL implementation.

mod allocator;
mod backend;
mod config;
mod error;
mod notify;
mod pool;
mod server;
mod table;
#[cfg(test)]
mod testing;

pub use crate::allocator::*;
pub use crate::backend::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::notify::*;
pub use crate::pool::*;
pub use crate::server::*;
pub use crate::table::*;
