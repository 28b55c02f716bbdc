use async_trait::async_trait;
use cluster_errors::ClusterResult;
use tracing::warn;

/// How a sysvar change is persisted (spec §4.8, §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Global,
    Persist,
    PersistOnly,
}

/// One sysvar assignment to make on a member.
#[derive(Debug, Clone)]
pub struct SysvarChange {
    pub name: String,
    pub value: String,
    pub mode: SetMode,
}

impl SysvarChange {
    pub fn new(name: impl Into<String>, value: impl Into<String>, mode: SetMode) -> Self {
        SysvarChange {
            name: name.into(),
            value: value.into(),
            mode,
        }
    }
}

/// The contract a per-member handler needs from its target. Implemented by
/// `cluster_instance::Instance`; kept here (rather than depending on
/// `cluster-instance`) so the applier has no knowledge of how a session is
/// actually opened, matching the teacher's pattern of putting the wire
/// session behind a narrow trait consumed by orchestration code.
#[async_trait]
pub trait ConfigTarget: Send {
    /// A label used only for diagnostics (endpoint or instance label).
    fn label(&self) -> String;

    /// Whether the server supports `SET PERSIST` (8.0.11+); if not, the
    /// applier falls back to `GLOBAL` only (spec §4.8).
    fn supports_persist(&self) -> bool;

    /// Whether the target is currently reachable/online; `PERSIST_ONLY` is
    /// used when the target is offline and cannot accept `SET GLOBAL`.
    fn is_offline(&self) -> bool;

    async fn set_sysvar(&mut self, name: &str, value: &str, mode: SetMode) -> ClusterResult<()>;
}

/// Aggregates per-member handlers and applies a set of sysvar changes
/// across reachable members (spec §4.8). Used by group-seeds updates,
/// auto_increment updates, `view_change_uuid` initial set,
/// `transaction_size_limit` alignment, and `super_read_only` fencing.
pub struct Config {
    changes: Vec<SysvarChange>,
    /// §4.8: failures are per-member and optionally tolerated with a
    /// warning instead of propagated.
    best_effort: bool,
}

impl Config {
    pub fn new(best_effort: bool) -> Self {
        Config {
            changes: Vec::new(),
            best_effort,
        }
    }

    pub fn push(&mut self, change: SysvarChange) -> &mut Self {
        self.changes.push(change);
        self
    }

    pub fn extend(&mut self, changes: impl IntoIterator<Item = SysvarChange>) -> &mut Self {
        self.changes.extend(changes);
        self
    }

    /// Resolves the effective `SetMode` for a requested change given the
    /// target's capabilities: `PERSIST` where supported, otherwise
    /// `GLOBAL`; `PERSIST_ONLY` is honored as-is since it is an explicit
    /// request for an offline target (spec §4.8).
    fn effective_mode(target: &dyn ConfigTarget, requested: SetMode) -> SetMode {
        match requested {
            SetMode::PersistOnly => SetMode::PersistOnly,
            SetMode::Persist if target.supports_persist() => SetMode::Persist,
            SetMode::Persist => SetMode::Global,
            SetMode::Global => SetMode::Global,
        }
    }

    /// Applies every queued change to `target`. On the first failure: in
    /// best-effort mode, log a warning and continue with the next change;
    /// otherwise propagate immediately.
    pub async fn apply(&self, target: &mut dyn ConfigTarget) -> ClusterResult<()> {
        for change in &self.changes {
            let mode = Self::effective_mode(target, change.mode);
            if let Err(err) = target.set_sysvar(&change.name, &change.value, mode).await {
                if self.best_effort {
                    warn!(member = %target.label(), var = %change.name, %err, "sysvar change failed, continuing (best-effort)");
                    continue;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FakeTarget {
        label: String,
        supports_persist: bool,
        applied: Mutex<Vec<(String, String, SetMode)>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ConfigTarget for FakeTarget {
        fn label(&self) -> String {
            self.label.clone()
        }

        fn supports_persist(&self) -> bool {
            self.supports_persist
        }

        fn is_offline(&self) -> bool {
            false
        }

        async fn set_sysvar(&mut self, name: &str, value: &str, mode: SetMode) -> ClusterResult<()> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(cluster_errors::ClusterError::BadArg(format!(
                    "cannot set {name}"
                )));
            }
            self.applied
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string(), mode));
            Ok(())
        }
    }

    #[tokio::test]
    async fn persist_falls_back_to_global_when_unsupported() {
        let mut target = FakeTarget {
            label: "host1:3306".into(),
            supports_persist: false,
            applied: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let mut cfg = Config::new(false);
        cfg.push(SysvarChange::new("x", "1", SetMode::Persist));
        cfg.apply(&mut target).await.unwrap();
        let applied = target.applied.lock().unwrap();
        assert_eq!(applied[0].2, SetMode::Global);
    }

    #[tokio::test]
    async fn persist_only_is_never_downgraded() {
        let mut target = FakeTarget {
            label: "host1:3306".into(),
            supports_persist: true,
            applied: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let mut cfg = Config::new(false);
        cfg.push(SysvarChange::new("skip_replica_start", "1", SetMode::PersistOnly));
        cfg.apply(&mut target).await.unwrap();
        let applied = target.applied.lock().unwrap();
        assert_eq!(applied[0].2, SetMode::PersistOnly);
    }

    #[tokio::test]
    async fn best_effort_swallows_failures_and_continues() {
        let mut target = FakeTarget {
            label: "host1:3306".into(),
            supports_persist: true,
            applied: Mutex::new(Vec::new()),
            fail_on: Some("a".into()),
        };
        let mut cfg = Config::new(true);
        cfg.push(SysvarChange::new("a", "1", SetMode::Global));
        cfg.push(SysvarChange::new("b", "2", SetMode::Global));
        cfg.apply(&mut target).await.unwrap();
        let applied = target.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, "b");
    }

    #[tokio::test]
    async fn strict_mode_propagates_first_failure() {
        let mut target = FakeTarget {
            label: "host1:3306".into(),
            supports_persist: true,
            applied: Mutex::new(Vec::new()),
            fail_on: Some("a".into()),
        };
        let mut cfg = Config::new(false);
        cfg.push(SysvarChange::new("a", "1", SetMode::Global));
        cfg.push(SysvarChange::new("b", "2", SetMode::Global));
        let err = cfg.apply(&mut target).await.unwrap_err();
        assert_eq!(err.code(), cluster_errors::ClusterError::BadArg(String::new()).code());
        assert!(target.applied.lock().unwrap().is_empty());
    }
}
