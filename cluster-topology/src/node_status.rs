use cluster_errors::{ClusterError, ClusterResult};

/// A node's observed status (spec §5 supplement, grounded on
/// `global_topology_check.cc`'s `Node_status`), used by ClusterSet failover
/// candidate filtering and `rescan`'s unavailable-instance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Online,
    Offline,
    Unreachable,
    Invalidated,
    /// Replication or configuration error on the node's primary channel.
    Error,
    /// Transaction set is inconsistent with the rest of the replica set.
    Inconsistent,
}

/// spec §5 supplement: validates a node is usable as a source/target,
/// producing the same distinctions the original's `validate_node_status`
/// does (UNREACHABLE, INVALIDATED, ERROR, OFFLINE, INCONSISTENT, ONLINE).
pub fn validate_node_status(label: &str, status: Option<NodeStatus>) -> ClusterResult<()> {
    let status = status.ok_or_else(|| {
        ClusterError::MetadataMissing(format!("unable to find '{label}' in the topology"))
    })?;

    match status {
        NodeStatus::Unreachable => Err(ClusterError::PrimaryUnavailable(format!("{label} is unreachable"))),
        NodeStatus::Invalidated => Err(ClusterError::UnsupportedClusterType(format!(
            "{label} was invalidated by a failover"
        ))),
        NodeStatus::Error => Err(ClusterError::ReplicationError(
            label.to_string(),
            "replication or configuration error".to_string(),
        )),
        NodeStatus::Offline => Err(ClusterError::ReplicationOff(label.to_string())),
        NodeStatus::Inconsistent => Err(ClusterError::DataErrantTransactions),
        NodeStatus::Online => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_passes() {
        assert!(validate_node_status("host1", Some(NodeStatus::Online)).is_ok());
    }

    #[test]
    fn missing_node_is_metadata_missing() {
        let err = validate_node_status("host1", None).unwrap_err();
        assert!(matches!(err, ClusterError::MetadataMissing(_)));
    }

    #[test]
    fn invalidated_is_rejected() {
        let err = validate_node_status("host1", Some(NodeStatus::Invalidated)).unwrap_err();
        assert!(matches!(err, ClusterError::UnsupportedClusterType(_)));
    }
}
