//! Managed channel configurator (spec §4.7): configures a Read-Replica's or
//! a ClusterSet REPLICA cluster's async channel with automatic source
//! failover.

use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::{Instance, ServerVersion};
use cluster_types::{Endpoint, ManagedChannel, ReplicationSourcesPolicy, SourceEntry, WeightedSource};
use tracing::{info, instrument};

/// What the configurator needs to know about one candidate cluster member,
/// decoupled from the full topology view so this crate doesn't need to
/// depend on `cluster-topology` (spec §9 "Polymorphism": narrow contracts
/// at the seams).
#[derive(Debug, Clone)]
pub struct MemberView {
    pub endpoint: Endpoint,
    pub online: bool,
    pub is_primary: bool,
    pub is_read_replica: bool,
    pub version: ServerVersion,
}

/// spec §4.7: source weighting policy.
const PRIMARY_POLICY_PRIMARY_WEIGHT: u8 = 80;
const PRIMARY_POLICY_SECONDARY_WEIGHT: u8 = 60;
const SECONDARY_POLICY_PRIMARY_WEIGHT: u8 = 60;
const SECONDARY_POLICY_SECONDARY_WEIGHT: u8 = 80;

pub struct ChannelConfigurator;

impl ChannelConfigurator {
    /// spec §4.7.3: validates replication sources are reachable, ONLINE
    /// cluster members, not the replica itself, not Read-Replicas, and
    /// version-compatible with the replica.
    pub fn validate_replication_sources(
        replica: &Endpoint,
        replica_version: ServerVersion,
        candidates: &[MemberView],
    ) -> ClusterResult<()> {
        if candidates.is_empty() {
            return Err(ClusterError::ReadReplicaInvalidSourceList(
                "source list is empty".to_string(),
            ));
        }
        for c in candidates {
            if &c.endpoint == replica {
                return Err(ClusterError::ReadReplicaInvalidSourceList(format!(
                    "'{}' cannot be its own replication source",
                    c.endpoint
                )));
            }
            if c.is_read_replica {
                return Err(ClusterError::ReadReplicaInvalidSourceList(format!(
                    "'{}' is a Read-Replica and cannot act as a source",
                    c.endpoint
                )));
            }
            if !c.online {
                return Err(ClusterError::ReadReplicaInvalidSourceList(format!(
                    "'{}' is not reachable or not ONLINE",
                    c.endpoint
                )));
            }
            if c.version.major != replica_version.major {
                return Err(ClusterError::ReadReplicaInvalidSourceList(format!(
                    "'{}' is not version-compatible with the replica",
                    c.endpoint
                )));
            }
        }
        Ok(())
    }

    /// spec §4.7.1: resolve the effective primary source for the channel.
    pub fn resolve_effective_source<'a>(
        policy: &'a ReplicationSourcesPolicy,
        members: &'a [MemberView],
    ) -> ClusterResult<&'a Endpoint> {
        match policy {
            ReplicationSourcesPolicy::Primary => members
                .iter()
                .find(|m| m.is_primary)
                .map(|m| &m.endpoint)
                .ok_or_else(|| ClusterError::ReadReplicaInvalidSourceList("no cluster primary available".to_string())),
            ReplicationSourcesPolicy::Secondary => {
                let online_secondaries: Vec<&MemberView> =
                    members.iter().filter(|m| !m.is_primary && m.online).collect();
                if let Some(m) = online_secondaries.first() {
                    Ok(&m.endpoint)
                } else {
                    // "fall back to primary if only one ONLINE exists"
                    members
                        .iter()
                        .find(|m| m.is_primary)
                        .map(|m| &m.endpoint)
                        .ok_or_else(|| {
                            ClusterError::ReadReplicaInvalidSourceList("no secondary or primary available".to_string())
                        })
                }
            }
            ReplicationSourcesPolicy::Custom(list) => list
                .first()
                .map(|s| &s.endpoint)
                .ok_or_else(|| ClusterError::ReadReplicaInvalidSourceList("custom source list is empty".to_string())),
        }
    }

    /// spec §4.7.3: assigns weights for the connection-failover list
    /// depending on policy.
    pub fn build_source_entries(policy: &ReplicationSourcesPolicy, members: &[MemberView]) -> Vec<SourceEntry> {
        match policy {
            ReplicationSourcesPolicy::Primary => members
                .iter()
                .map(|m| SourceEntry {
                    endpoint: m.endpoint.clone(),
                    weight: if m.is_primary {
                        PRIMARY_POLICY_PRIMARY_WEIGHT
                    } else {
                        PRIMARY_POLICY_SECONDARY_WEIGHT
                    },
                })
                .collect(),
            ReplicationSourcesPolicy::Secondary => members
                .iter()
                .map(|m| SourceEntry {
                    endpoint: m.endpoint.clone(),
                    weight: if m.is_primary {
                        SECONDARY_POLICY_PRIMARY_WEIGHT
                    } else {
                        SECONDARY_POLICY_SECONDARY_WEIGHT
                    },
                })
                .collect(),
            ReplicationSourcesPolicy::Custom(list) => {
                let n = list.len();
                list.iter()
                    .enumerate()
                    .map(|(i, s): (usize, &WeightedSource)| SourceEntry {
                        endpoint: s.endpoint.clone(),
                        // monotonically decreasing from 100 down to 1
                        weight: (100u32.saturating_sub(((i as u32) * 99) / n.max(1) as u32)).min(255) as u8,
                    })
                    .collect()
            }
        }
    }

    /// spec §4.7: `setup_read_replica(replica, ar_options, sources, rejoin,
    /// dry_run)`. Runs the full sequence unless `dry_run` is set, in which
    /// case only the resulting [`ManagedChannel`] description is returned.
    #[instrument(skip(instance, members), fields(endpoint = %instance.label(), %channel_name))]
    pub async fn setup_channel(
        instance: &mut Instance,
        channel_name: &str,
        policy: &ReplicationSourcesPolicy,
        members: &[MemberView],
        account_user: &str,
        account_password: &str,
        retry_count: u32,
        connect_retry_seconds: u32,
        dry_run: bool,
    ) -> ClusterResult<ManagedChannel> {
        let source = Self::resolve_effective_source(policy, members)?.clone();
        let entries = Self::build_source_entries(policy, members);

        let channel = ManagedChannel {
            channel_name: channel_name.to_string(),
            sources: entries.clone(),
            retry_count,
            connect_retry_seconds,
            account_user: account_user.to_string(),
        };

        if dry_run {
            return Ok(channel);
        }

        instance
            .exec(&format!(
                "CHANGE REPLICATION SOURCE TO \
                 SOURCE_HOST='{}', SOURCE_PORT={}, SOURCE_USER='{}', SOURCE_PASSWORD='{}', \
                 SOURCE_CONNECTION_AUTO_FAILOVER=1, SOURCE_CONNECT_RETRY={}, SOURCE_RETRY_COUNT={} \
                 FOR CHANNEL '{channel_name}'",
                source.host,
                source.port,
                account_user,
                account_password.replace('\'', "''"),
                connect_retry_seconds,
                retry_count,
            ))
            .await?;

        // Reset any pre-existing managed-connection-failover configuration.
        instance
            .exec(&format!(
                "SELECT asynchronous_connection_failover_reset_managed('{channel_name}')"
            ))
            .await
            .ok(); // absence of a prior config is not an error

        for entry in &entries {
            instance
                .exec(&format!(
                    "SELECT asynchronous_connection_failover_add_managed(\
                     '{channel_name}', 'GroupReplication', '{}', {}, '{}', {})",
                    entry.endpoint.host, entry.endpoint.port, "", entry.weight
                ))
                .await?;
        }

        instance
            .exec(&format!("START REPLICA FOR CHANNEL '{channel_name}'"))
            .await?;

        info!(sources = entries.len(), "managed channel configured");
        Ok(channel)
    }

    /// spec §4.3 remove_instance: stop and fully remove a channel, used
    /// when a Read-Replica's effective source list becomes empty.
    pub async fn stop_and_remove(instance: &mut Instance, channel_name: &str) -> ClusterResult<()> {
        instance
            .exec(&format!("STOP REPLICA FOR CHANNEL '{channel_name}'"))
            .await?;
        instance
            .exec(&format!("RESET REPLICA ALL FOR CHANNEL '{channel_name}'"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(host: &str, online: bool, is_primary: bool, is_rr: bool) -> MemberView {
        MemberView {
            endpoint: Endpoint::new(host, 3306),
            online,
            is_primary,
            is_read_replica: is_rr,
            version: ServerVersion { major: 8, minor: 0, patch: 34 },
        }
    }

    #[test]
    fn primary_policy_weights_primary_high_secondaries_low() {
        let members = vec![member("h1", true, true, false), member("h2", true, false, false)];
        let entries = ChannelConfigurator::build_source_entries(&ReplicationSourcesPolicy::Primary, &members);
        assert_eq!(entries[0].weight, 80);
        assert_eq!(entries[1].weight, 60);
    }

    #[test]
    fn secondary_policy_inverts_weights() {
        let members = vec![member("h1", true, true, false), member("h2", true, false, false)];
        let entries = ChannelConfigurator::build_source_entries(&ReplicationSourcesPolicy::Secondary, &members);
        assert_eq!(entries[0].weight, 60);
        assert_eq!(entries[1].weight, 80);
    }

    #[test]
    fn custom_weights_are_monotonically_decreasing() {
        let policy = ReplicationSourcesPolicy::Custom(vec![
            WeightedSource { endpoint: Endpoint::new("h1", 3306), weight: 100 },
            WeightedSource { endpoint: Endpoint::new("h2", 3306), weight: 99 },
            WeightedSource { endpoint: Endpoint::new("h3", 3306), weight: 1 },
        ]);
        let entries = ChannelConfigurator::build_source_entries(&policy, &[]);
        assert!(entries[0].weight >= entries[1].weight);
        assert!(entries[1].weight >= entries[2].weight);
    }

    #[test]
    fn secondary_resolution_falls_back_to_primary_when_no_secondary_online() {
        let members = vec![member("h1", true, true, false)];
        let source = ChannelConfigurator::resolve_effective_source(&ReplicationSourcesPolicy::Secondary, &members)
            .unwrap();
        assert_eq!(source.host, "h1");
    }

    #[test]
    fn validation_rejects_read_replica_as_source() {
        let members = vec![member("h1", true, false, true)];
        let err = ChannelConfigurator::validate_replication_sources(
            &Endpoint::new("replica", 3306),
            ServerVersion { major: 8, minor: 0, patch: 34 },
            &members,
        )
        .unwrap_err();
        assert_eq!(err.code(), ClusterError::ReadReplicaInvalidSourceList(String::new()).code());
    }
}
