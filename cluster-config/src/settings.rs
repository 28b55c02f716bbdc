use std::time::Duration;

use serde::Deserialize;

/// Ambient engine configuration: timeouts, lock namespace, account naming.
/// Loaded the way `spineldb`'s `Settings` layers defaults, a TOML file, and
/// environment overrides through the `config` crate, rather than hand-rolled
/// `env::var` parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// §5 "Acquisition timeout is configurable".
    pub lock_acquire_timeout_secs: u64,
    /// §4.2 step 10: bound on RECOVERING → ONLINE.
    pub gr_state_timeout_secs: u64,
    /// §4.4/§7: bound on clone completion + restart.
    pub clone_restart_timeout_secs: u64,
    /// §4.3 remove_instance: bound on syncing transactions from primary.
    pub gtid_sync_timeout_secs: u64,
    /// §4.1: bound on quorum-forcing reconfiguration settling.
    pub force_quorum_timeout_secs: u64,
    /// §4.6: recovery-account name prefix.
    pub recovery_account_prefix: String,
    /// §4.6/§6.4: ClusterSet/Read-Replica channel account name prefix.
    pub channel_account_prefix: String,
    /// §5: the named-lock namespace, e.g. `AdminAPI_cluster`.
    pub lock_namespace: String,
    /// §4.2 step 11 / §5: whether a best-effort step tolerates unreachable
    /// members rather than failing the whole command.
    pub best_effort_member_updates: bool,
    /// §3.2 invariant 6 / §6.4 `replication_allowed_host` default.
    pub default_replication_allowed_host: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            lock_acquire_timeout_secs: 60,
            gr_state_timeout_secs: 300,
            clone_restart_timeout_secs: 900,
            gtid_sync_timeout_secs: 120,
            force_quorum_timeout_secs: 60,
            recovery_account_prefix: "mysql_innodb_cluster_".to_string(),
            channel_account_prefix: "mysql_innodb_cs_".to_string(),
            lock_namespace: "AdminAPI_cluster".to_string(),
            best_effort_member_updates: true,
            default_replication_allowed_host: "%".to_string(),
        }
    }
}

impl EngineConfig {
    /// Layers defaults → an optional TOML file → `CLUSTER_*` environment
    /// overrides, mirroring the teacher's config-loading idiom.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("CLUSTER").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_acquire_timeout_secs)
    }

    pub fn gr_state_timeout(&self) -> Duration {
        Duration::from_secs(self.gr_state_timeout_secs)
    }

    pub fn clone_restart_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_restart_timeout_secs)
    }

    pub fn gtid_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.gtid_sync_timeout_secs)
    }

    pub fn force_quorum_timeout(&self) -> Duration {
        Duration::from_secs(self.force_quorum_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg.lock_namespace, "AdminAPI_cluster");
        assert!(cfg.best_effort_member_updates);
    }
}
