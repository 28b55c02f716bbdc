mod add_instance;
mod add_replica;
mod clusterset;
mod dissolve;
mod failover;
mod fence;
mod force_quorum;
mod mode_switch;
mod rejoin_instance;
mod remove_instance;
mod rescan;
mod set_primary;

pub use add_instance::{add_instance, AddInstanceOptions};
pub use add_replica::{add_replica_instance, AddReplicaOptions};
pub use clusterset::{create_cluster_set, get_cluster_set};
pub use dissolve::dissolve;
pub use failover::{clusterset_failover, FailoverCandidate};
pub use fence::{fence_all_traffic, fence_writes, unfence_writes};
pub use force_quorum::force_quorum_using_partition_of;
pub use mode_switch::{switch_to_multi_primary_mode, switch_to_single_primary_mode};
pub use rejoin_instance::{rejoin_instance, RejoinInstanceOptions};
pub use remove_instance::{remove_instance, RemoveInstanceOptions};
pub use rescan::{rescan, RescanOptions, RescanReport};
pub use set_primary::set_primary;
