//! Topology view and managers (spec §4.1, §9): the in-memory snapshot
//! combining Metadata rows with live GR/async status, the precondition
//! gates, and the two topology-manager flavors (GR, star-async) that share
//! one validation contract.

mod gates;
mod manager;
mod node_status;
mod view;

pub use gates::{AsyncGlobalStatusFilter, CommandGate, InstanceKind, QuorumRequirement};
pub use manager::{AnyTopologyManager, GrTopologyManager, StarAsyncTopologyManager, TopologyManager};
pub use node_status::{validate_node_status, NodeStatus};
pub use view::{MemberState, TopologyView};
