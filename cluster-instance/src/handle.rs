use async_trait::async_trait;
use cluster_config::{ConfigTarget, SetMode};
use cluster_errors::{ClusterError, ClusterResult};
use cluster_types::Endpoint;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts};
use tracing::{debug, instrument, warn};

use crate::locks::{LockMode, LockName};
use crate::sysvars::{ServerVersion, SysvarCache};

/// A connected SQL session plus cached sysvars for one MySQL server (spec
/// §2). Every remote call in the engine's coordination protocols (§4.2-§4.3)
/// goes through one of these.
pub struct Instance {
    conn: Conn,
    pub endpoint: Endpoint,
    pub server_uuid: String,
    pub server_id: u32,
    pub version: ServerVersion,
    sysvars: SysvarCache,
    held_locks: Vec<(LockName, LockMode)>,
}

impl Instance {
    /// Connects and populates the initial sysvar/identity cache, the way
    /// `MySqlBinlogConnector::connect` opens a session and immediately
    /// bootstraps protocol state before doing anything else.
    #[instrument(skip(opts), fields(endpoint = %endpoint))]
    pub async fn connect<O: Into<Opts>>(opts: O, endpoint: Endpoint) -> ClusterResult<Self> {
        let mut conn = Conn::new(opts)
            .await
            .map_err(|e| ClusterError::ConnectionError(endpoint.to_string(), e.to_string()))?;

        let server_uuid: String = conn
            .query_first("SELECT @@server_uuid")
            .await
            .map_err(to_query_error(&endpoint))?
            .unwrap_or_default();
        let server_id: u32 = conn
            .query_first("SELECT @@server_id")
            .await
            .map_err(to_query_error(&endpoint))?
            .unwrap_or_default();
        let version_str: String = conn
            .query_first("SELECT @@version")
            .await
            .map_err(to_query_error(&endpoint))?
            .unwrap_or_default();
        let version = ServerVersion::parse(&version_str).ok_or_else(|| {
            ClusterError::BadArg(format!("unparseable server version '{version_str}'"))
        })?;

        debug!(%server_uuid, server_id, ?version, "instance connected");

        Ok(Instance {
            conn,
            endpoint,
            server_uuid,
            server_id,
            version,
            sysvars: SysvarCache::new(),
            held_locks: Vec::new(),
        })
    }

    fn query_error(&self) -> impl Fn(mysql_async::Error) -> ClusterError + '_ {
        to_query_error(&self.endpoint)
    }

    /// Executes a statement discarding any result set.
    pub async fn exec(&mut self, stmt: &str) -> ClusterResult<()> {
        self.conn.query_drop(stmt).await.map_err(self.query_error())
    }

    /// Fetches the first row of a single-column query, uncached.
    pub async fn query_scalar(&mut self, stmt: &str) -> ClusterResult<Option<String>> {
        self.conn
            .query_first(stmt)
            .await
            .map_err(self.query_error())
    }

    /// Fetches all rows of a query as raw strings (the engine never needs
    /// typed result sets beyond what the admin protocol consumes directly).
    pub async fn query_rows(&mut self, stmt: &str) -> ClusterResult<Vec<Vec<Option<String>>>> {
        let rows: Vec<mysql_async::Row> = self.conn.query(stmt).await.map_err(self.query_error())?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|i| row.take::<String, _>(i))
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// Reads a sysvar, consulting the cache first (spec §2: "performs
    /// queries, sets variables... caches sysvars").
    pub async fn get_sysvar(&mut self, name: &str) -> ClusterResult<String> {
        if let Some(v) = self.sysvars.get(name) {
            return Ok(v.to_string());
        }
        let value = self
            .query_scalar(&format!("SELECT @@{name}"))
            .await?
            .unwrap_or_default();
        self.sysvars.set(name, value.clone());
        Ok(value)
    }

    /// Sets a sysvar with the requested persistence mode (spec §4.8, §6.5).
    /// Invalidates the cache entry so a later read reflects the new value.
    pub async fn set_sysvar_raw(&mut self, name: &str, value: &str, mode: SetMode) -> ClusterResult<()> {
        let scope = match mode {
            SetMode::Global => "GLOBAL",
            SetMode::Persist => "PERSIST",
            SetMode::PersistOnly => "PERSIST_ONLY",
        };
        // Values are always engine-controlled (never raw user input routed
        // through here), so a direct format is safe and matches the
        // teacher's direct `query_drop` usage for fixed administrative
        // statements.
        let stmt = format!("SET {scope} {name} = {value}");
        self.exec(&stmt).await?;
        self.sysvars.invalidate(name);
        if mode != SetMode::PersistOnly {
            self.sysvars.set(name, value.to_string());
        }
        Ok(())
    }

    /// Acquires a named lock via the locking-service UDFs (spec §5, §6.3:
    /// `service_get_write_locks`/`service_get_read_locks`).
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn acquire_lock(
        &mut self,
        namespace: &str,
        name: &LockName,
        mode: LockMode,
        timeout_secs: u64,
    ) -> ClusterResult<()> {
        let func = match mode {
            LockMode::Shared => "service_get_read_locks",
            LockMode::Exclusive => "service_get_write_locks",
        };
        let lock_name = name.to_string();
        let stmt = format!("DO {func}('{namespace}', '{lock_name}', {timeout_secs})");
        self.exec(&stmt).await.map_err(|_| ClusterError::LockGetFailed {
            lock_name: name.qualified(namespace),
            contending_primary: self.endpoint.to_string(),
        })?;
        self.held_locks.push((name.clone(), mode));
        Ok(())
    }

    /// Releases every lock acquired through this instance (spec §5: "release
    /// locks" at the end of a command).
    pub async fn release_all_locks(&mut self, namespace: &str) {
        if self.held_locks.is_empty() {
            return;
        }
        if let Err(err) = self
            .exec(&format!("DO service_release_locks('{namespace}')"))
            .await
        {
            warn!(%err, "failed to release locks; they will expire with the session");
        }
        self.held_locks.clear();
    }

    pub fn label(&self) -> String {
        self.endpoint.to_string()
    }
}

fn to_query_error(endpoint: &Endpoint) -> impl Fn(mysql_async::Error) -> ClusterError + '_ {
    move |source| ClusterError::TargetQueryError {
        endpoint: endpoint.to_string(),
        source,
    }
}

#[async_trait]
impl ConfigTarget for Instance {
    fn label(&self) -> String {
        Instance::label(self)
    }

    fn supports_persist(&self) -> bool {
        self.version.supports_persist()
    }

    fn is_offline(&self) -> bool {
        false
    }

    async fn set_sysvar(&mut self, name: &str, value: &str, mode: SetMode) -> ClusterResult<()> {
        self.set_sysvar_raw(name, value, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_name_qualification() {
        let n = LockName::Cluster { cluster_id: 7 };
        assert_eq!(n.qualified("AdminAPI_cluster"), "AdminAPI_cluster.cluster-7");
    }
}
