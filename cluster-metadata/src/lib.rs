//! The Metadata store (spec §4.5, §6.4): typed access to the persistent
//! topology schema on the current primary, with a transaction object that
//! records an undo log capable of regenerating the pre-state.

mod compat;
mod store;
mod transaction;

pub use compat::SchemaCompat;
pub use store::{MetadataLookup, MetadataStore};
pub use transaction::{MetadataTransaction, SqlUndoList};
