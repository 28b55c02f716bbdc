//! Recovery-method decision and donor selection (spec §4.4), grounded on
//! `rejoin_replica_instance.cc`/`cluster_impl.cc`'s GTID-set comparison and
//! the clone-vs-incremental decision they drive.

mod donor;
mod gtid;
mod method;

pub use donor::{select_donor, Donor};
pub use gtid::{compare_gtid_sets, GtidSet, ReplicaGtidState};
pub use method::{decide_recovery_method, RecoveryInput, RecoveryMethod};
