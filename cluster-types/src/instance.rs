use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// spec §3.1: HA members participate in GR; Read-Replicas follow a Cluster
/// via an async channel and never join the GR group (invariant 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceRole {
    Ha,
    ReadReplica,
}

/// A MySQL server participating in a Cluster (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: u64,
    pub cluster_id: u64,
    pub server_uuid: String,
    pub server_id: u32,
    pub endpoint: Endpoint,
    pub x_endpoint: Option<Endpoint>,
    /// `group_replication_local_address`, HA members only.
    pub gr_local_address: Option<Endpoint>,
    pub label: String,
    pub role: InstanceRole,
    pub hidden_from_router: bool,
    /// Recovery account name, e.g. `mysql_innodb_cluster_<server_id>`
    /// (invariant 6).
    pub recovery_account_user: Option<String>,
    pub recovery_account_host: Option<String>,
}

impl Instance {
    pub fn is_ha(&self) -> bool {
        self.role == InstanceRole::Ha
    }

    pub fn recovery_account_name(prefix: &str, server_id: u32) -> String {
        format!("{prefix}{server_id}")
    }

    /// Invariant 6: the stored recovery account must equal
    /// `<prefix><server_id>`.
    pub fn recovery_account_is_canonical(&self, prefix: &str) -> bool {
        match &self.recovery_account_user {
            Some(user) => *user == Self::recovery_account_name(prefix, self.server_id),
            None => false,
        }
    }
}
