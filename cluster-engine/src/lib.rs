//! Command executors (spec §4.2-§4.3, §4.10, §6.1): the top-level
//! entrypoints that compose the topology view, topology manager, recovery
//! decider, account manager, channel configurator, config applier, and
//! undo tracker into the engine's public command surface.

mod group_status;
mod pure;

pub mod commands;

pub use group_status::{build_topology_view, live_endpoints_not_in_metadata};
pub use pure::{
    auto_increment_values, build_gr_sysvars, compute_group_seeds, needs_auto_increment_update,
    reset_binary_logs_and_gtids_statement, resolve_gr_local_address, GrSysvarParams,
};
