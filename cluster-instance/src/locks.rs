use std::fmt;

/// Shared/exclusive named-lock modes (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A named lock in the `AdminAPI_cluster`-style namespace (spec §5). Scopes
/// are either the whole cluster or a single instance, matching "Write-type
/// operations... take EXCLUSIVE on the Cluster lock; read-like or
/// per-instance operations... take SHARED on the Cluster lock plus
/// EXCLUSIVE on the target instance's lock".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockName {
    Cluster { cluster_id: u64 },
    Instance { instance_id: u64 },
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockName::Cluster { cluster_id } => write!(f, "cluster-{cluster_id}"),
            LockName::Instance { instance_id } => write!(f, "instance-{instance_id}"),
        }
    }
}

impl LockName {
    pub fn qualified(&self, namespace: &str) -> String {
        format!("{namespace}.{self}")
    }
}
