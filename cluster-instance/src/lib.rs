//! The Instance handle (spec §2, "Instance handle"): a connected SQL
//! session plus cached sysvars for one MySQL server. Grounded on
//! `replicators/src/mysql_connector/connector.rs`'s use of `mysql_async`
//! (`Conn`, `query_drop`, `write_command`) for talking to a live server.

mod handle;
mod locks;
mod sysvars;

pub use handle::Instance;
pub use locks::{LockMode, LockName};
pub use sysvars::ServerVersion;
