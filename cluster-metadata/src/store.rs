use async_trait::async_trait;
use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::Instance;
use cluster_types::{Cluster, ClusterAvailability, CommStack, Endpoint, Instance as InstanceRow, InstanceRole, TopologyMode};
use serde_json::Value as Json;

use crate::transaction::MetadataTransaction;

/// Lookup by uuid/endpoint/address (spec §4.5): "returning 'missing from
/// metadata' when absent".
#[async_trait]
pub trait MetadataLookup {
    async fn instance_by_uuid(&mut self, server_uuid: &str) -> ClusterResult<InstanceRow>;
    async fn instance_by_endpoint(&mut self, endpoint: &Endpoint) -> ClusterResult<InstanceRow>;
    async fn instance_by_address(&mut self, address: &str) -> ClusterResult<InstanceRow>;
}

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Typed access to the persistent topology schema on the current primary
/// (spec §4.5, §6.4). Table names mirror the logical schema named in
/// spec §6.4 (`clusters`, `instances`, `cluster_set_members`,
/// `async_cluster_views`) under a fixed `mysql_innodb_cluster_metadata`
/// schema.
pub struct MetadataStore<'a> {
    primary: &'a mut Instance,
    schema: &'static str,
}

impl<'a> MetadataStore<'a> {
    pub const SCHEMA: &'static str = "mysql_innodb_cluster_metadata";
    pub const ENGINE_SCHEMA_VERSION: (u32, u32, u32) = (2, 1, 0);

    pub fn new(primary: &'a mut Instance) -> Self {
        MetadataStore {
            primary,
            schema: Self::SCHEMA,
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    /// spec §4.5 `state()`: compares the stored schema version against the
    /// version this engine build expects.
    pub async fn schema_version(&mut self) -> ClusterResult<Option<(u32, u32, u32)>> {
        let row = self
            .primary
            .query_scalar(&format!(
                "SELECT CONCAT(major, '.', minor, '.', patch) FROM {}.schema_version",
                self.schema
            ))
            .await?;
        Ok(row.and_then(|s| {
            let mut parts = s.split('.');
            Some((
                parts.next()?.parse().ok()?,
                parts.next()?.parse().ok()?,
                parts.next()?.parse().ok()?,
            ))
        }))
    }

    /// spec §6.4 cluster attribute keys: `assume_gtid_set_complete`,
    /// `disable_clone`, `manual_start_on_boot`, `replication_allowed_host`,
    /// `transaction_size_limit`, `view_change_uuid`.
    pub async fn cluster_attribute(&mut self, cluster_id: u64, key: &str) -> ClusterResult<Option<Json>> {
        let raw = self
            .primary
            .query_scalar(&format!(
                "SELECT JSON_EXTRACT(attributes, '$.{key}') FROM {} WHERE cluster_id = {cluster_id}",
                self.table("clusters")
            ))
            .await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn set_cluster_attribute(
        &mut self,
        txn: &mut MetadataTransaction,
        cluster_id: u64,
        key: &str,
        value: &Json,
    ) -> ClusterResult<()> {
        let previous = self.cluster_attribute(cluster_id, key).await?;
        let value_json = sql_quote(&value.to_string());
        self.primary
            .exec(&format!(
                "UPDATE {} SET attributes = JSON_SET(attributes, '$.{key}', CAST({value_json} AS JSON)) WHERE cluster_id = {cluster_id}",
                self.table("clusters")
            ))
            .await?;

        let undo = match previous {
            Some(prev) => format!(
                "UPDATE {} SET attributes = JSON_SET(attributes, '$.{key}', CAST({} AS JSON)) WHERE cluster_id = {cluster_id}",
                self.table("clusters"),
                sql_quote(&prev.to_string()),
            ),
            None => format!(
                "UPDATE {} SET attributes = JSON_REMOVE(attributes, '$.{key}') WHERE cluster_id = {cluster_id}",
                self.table("clusters")
            ),
        };
        txn.record_undo(undo);
        Ok(())
    }

    /// spec §6.4 instance attribute keys: `read_replica_replication_sources`,
    /// `clusterset_channel_account`.
    pub async fn instance_attribute(&mut self, instance_id: u64, key: &str) -> ClusterResult<Option<Json>> {
        let raw = self
            .primary
            .query_scalar(&format!(
                "SELECT JSON_EXTRACT(attributes, '$.{key}') FROM {} WHERE instance_id = {instance_id}",
                self.table("instances")
            ))
            .await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn set_instance_attribute(
        &mut self,
        txn: &mut MetadataTransaction,
        instance_id: u64,
        key: &str,
        value: &Json,
    ) -> ClusterResult<()> {
        let previous = self.instance_attribute(instance_id, key).await?;
        let value_json = sql_quote(&value.to_string());
        self.primary
            .exec(&format!(
                "UPDATE {} SET attributes = JSON_SET(attributes, '$.{key}', CAST({value_json} AS JSON)) WHERE instance_id = {instance_id}",
                self.table("instances")
            ))
            .await?;

        let undo = match previous {
            Some(prev) => format!(
                "UPDATE {} SET attributes = JSON_SET(attributes, '$.{key}', CAST({} AS JSON)) WHERE instance_id = {instance_id}",
                self.table("instances"),
                sql_quote(&prev.to_string()),
            ),
            None => format!(
                "UPDATE {} SET attributes = JSON_REMOVE(attributes, '$.{key}') WHERE instance_id = {instance_id}",
                self.table("instances")
            ),
        };
        txn.record_undo(undo);
        Ok(())
    }

    pub async fn get_cluster(&mut self, cluster_id: u64) -> ClusterResult<Cluster> {
        let rows = self
            .primary
            .query_rows(&format!(
                "SELECT cluster_id, cluster_name, group_name, topology_mode, view_change_uuid, comm_stack, clusterset_id, attributes FROM {} WHERE cluster_id = {cluster_id}",
                self.table("clusters")
            ))
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClusterError::MetadataMissing(format!("cluster {cluster_id}")))?;
        parse_cluster_row(row)
    }

    pub async fn list_instances(&mut self, cluster_id: u64) -> ClusterResult<Vec<InstanceRow>> {
        let rows = self
            .primary
            .query_rows(&format!(
                "SELECT instance_id, cluster_id, server_uuid, server_id, host, port, x_host, x_port, gr_host, gr_port, label, role, hidden_from_router, recovery_account_user, recovery_account_host FROM {} WHERE cluster_id = {cluster_id} ORDER BY instance_id",
                self.table("instances")
            ))
            .await?;
        rows.into_iter().map(parse_instance_row).collect()
    }

    /// spec §4.2 step 9: "Insert Metadata row for the new Instance within a
    /// Metadata transaction; record undo."
    pub async fn insert_instance(
        &mut self,
        txn: &mut MetadataTransaction,
        instance: &InstanceRow,
    ) -> ClusterResult<()> {
        let role = match instance.role {
            InstanceRole::Ha => "HA",
            InstanceRole::ReadReplica => "READ_REPLICA",
        };
        self.primary
            .exec(&format!(
                "INSERT INTO {} (instance_id, cluster_id, server_uuid, server_id, host, port, label, role, hidden_from_router, recovery_account_user, recovery_account_host) \
                 VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
                self.table("instances"),
                instance.instance_id,
                instance.cluster_id,
                sql_quote(&instance.server_uuid),
                instance.server_id,
                sql_quote(&instance.endpoint.host),
                instance.endpoint.port,
                sql_quote(&instance.label),
                sql_quote(role),
                instance.hidden_from_router,
                instance
                    .recovery_account_user
                    .as_deref()
                    .map(sql_quote)
                    .unwrap_or_else(|| "NULL".to_string()),
                instance
                    .recovery_account_host
                    .as_deref()
                    .map(sql_quote)
                    .unwrap_or_else(|| "NULL".to_string()),
            ))
            .await?;

        txn.record_undo(format!(
            "DELETE FROM {} WHERE instance_id = {}",
            self.table("instances"),
            instance.instance_id
        ));
        Ok(())
    }

    /// spec §4.3 remove_instance: "delete Metadata row".
    pub async fn remove_instance(
        &mut self,
        txn: &mut MetadataTransaction,
        instance: &InstanceRow,
    ) -> ClusterResult<()> {
        self.primary
            .exec(&format!(
                "DELETE FROM {} WHERE instance_id = {}",
                self.table("instances"),
                instance.instance_id
            ))
            .await?;

        let role = match instance.role {
            InstanceRole::Ha => "HA",
            InstanceRole::ReadReplica => "READ_REPLICA",
        };
        txn.record_undo(format!(
            "INSERT INTO {} (instance_id, cluster_id, server_uuid, server_id, host, port, label, role, hidden_from_router, recovery_account_user, recovery_account_host) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            self.table("instances"),
            instance.instance_id,
            instance.cluster_id,
            sql_quote(&instance.server_uuid),
            instance.server_id,
            sql_quote(&instance.endpoint.host),
            instance.endpoint.port,
            sql_quote(&instance.label),
            sql_quote(role),
            instance.hidden_from_router,
            instance.recovery_account_user.as_deref().map(sql_quote).unwrap_or_else(|| "NULL".to_string()),
            instance.recovery_account_host.as_deref().map(sql_quote).unwrap_or_else(|| "NULL".to_string()),
        ));
        Ok(())
    }

    /// spec §4.3 rescan "updated" instances: endpoint/UUID/X-port changed.
    pub async fn update_instance_endpoint(
        &mut self,
        txn: &mut MetadataTransaction,
        instance_id: u64,
        old_endpoint: &Endpoint,
        new_endpoint: &Endpoint,
    ) -> ClusterResult<()> {
        self.primary
            .exec(&format!(
                "UPDATE {} SET host = {}, port = {} WHERE instance_id = {instance_id}",
                self.table("instances"),
                sql_quote(&new_endpoint.host),
                new_endpoint.port,
            ))
            .await?;
        txn.record_undo(format!(
            "UPDATE {} SET host = {}, port = {} WHERE instance_id = {instance_id}",
            self.table("instances"),
            sql_quote(&old_endpoint.host),
            old_endpoint.port,
        ));
        Ok(())
    }

    /// invariant 3/uniqueness checks (spec §4.2 step 2).
    pub async fn server_id_exists(&mut self, cluster_id: u64, server_id: u32) -> ClusterResult<bool> {
        let count = self
            .primary
            .query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE cluster_id = {cluster_id} AND server_id = {server_id}",
                self.table("instances")
            ))
            .await?
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(count > 0)
    }

    pub async fn server_uuid_exists(&mut self, server_uuid: &str) -> ClusterResult<bool> {
        let count = self
            .primary
            .query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE server_uuid = {}",
                self.table("instances"),
                sql_quote(server_uuid)
            ))
            .await?
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(count > 0)
    }
}

#[async_trait]
impl<'a> MetadataLookup for MetadataStore<'a> {
    async fn instance_by_uuid(&mut self, server_uuid: &str) -> ClusterResult<InstanceRow> {
        let rows = self
            .primary
            .query_rows(&format!(
                "SELECT instance_id, cluster_id, server_uuid, server_id, host, port, x_host, x_port, gr_host, gr_port, label, role, hidden_from_router, recovery_account_user, recovery_account_host FROM {} WHERE server_uuid = {}",
                self.table("instances"),
                sql_quote(server_uuid)
            ))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClusterError::MetadataMissing(format!("instance uuid {server_uuid}")))
            .and_then(parse_instance_row)
    }

    async fn instance_by_endpoint(&mut self, endpoint: &Endpoint) -> ClusterResult<InstanceRow> {
        let rows = self
            .primary
            .query_rows(&format!(
                "SELECT instance_id, cluster_id, server_uuid, server_id, host, port, x_host, x_port, gr_host, gr_port, label, role, hidden_from_router, recovery_account_user, recovery_account_host FROM {} WHERE host = {} AND port = {}",
                self.table("instances"),
                sql_quote(&endpoint.host),
                endpoint.port,
            ))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ClusterError::MetadataMissing(format!("instance endpoint {endpoint}")))
            .and_then(parse_instance_row)
    }

    async fn instance_by_address(&mut self, address: &str) -> ClusterResult<InstanceRow> {
        if let Ok(endpoint) = address.parse::<Endpoint>() {
            if let Ok(found) = self.instance_by_endpoint(&endpoint).await {
                return Ok(found);
            }
        }
        self.instance_by_uuid(address).await
    }
}

fn cell(row: &[Option<String>], i: usize) -> Option<&str> {
    row.get(i).and_then(|c| c.as_deref())
}

fn parse_instance_row(row: Vec<Option<String>>) -> ClusterResult<InstanceRow> {
    let bad = |field: &str| ClusterError::MetadataInconsistent(format!("instance row missing {field}"));
    let instance_id = cell(&row, 0).ok_or_else(|| bad("instance_id"))?.parse().map_err(|_| bad("instance_id"))?;
    let cluster_id = cell(&row, 1).ok_or_else(|| bad("cluster_id"))?.parse().map_err(|_| bad("cluster_id"))?;
    let server_uuid = cell(&row, 2).ok_or_else(|| bad("server_uuid"))?.to_string();
    let server_id = cell(&row, 3).ok_or_else(|| bad("server_id"))?.parse().map_err(|_| bad("server_id"))?;
    let host = cell(&row, 4).ok_or_else(|| bad("host"))?.to_string();
    let port = cell(&row, 5).ok_or_else(|| bad("port"))?.parse().map_err(|_| bad("port"))?;
    let x_endpoint = match (cell(&row, 6), cell(&row, 7)) {
        (Some(h), Some(p)) => p.parse().ok().map(|p| Endpoint::new(h, p)),
        _ => None,
    };
    let gr_local_address = match (cell(&row, 8), cell(&row, 9)) {
        (Some(h), Some(p)) => p.parse().ok().map(|p| Endpoint::new(h, p)),
        _ => None,
    };
    let label = cell(&row, 10).unwrap_or(&host).to_string();
    let role = match cell(&row, 11) {
        Some("READ_REPLICA") => InstanceRole::ReadReplica,
        _ => InstanceRole::Ha,
    };
    let hidden_from_router = matches!(cell(&row, 12), Some("1") | Some("true"));
    let recovery_account_user = cell(&row, 13).map(str::to_string);
    let recovery_account_host = cell(&row, 14).map(str::to_string);

    Ok(InstanceRow {
        instance_id,
        cluster_id,
        server_uuid,
        server_id,
        endpoint: Endpoint::new(host, port),
        x_endpoint,
        gr_local_address,
        label,
        role,
        hidden_from_router,
        recovery_account_user,
        recovery_account_host,
    })
}

fn parse_cluster_row(row: Vec<Option<String>>) -> ClusterResult<Cluster> {
    let bad = |field: &str| ClusterError::MetadataInconsistent(format!("cluster row missing {field}"));
    let cluster_id = cell(&row, 0).ok_or_else(|| bad("cluster_id"))?.parse().map_err(|_| bad("cluster_id"))?;
    let name = cell(&row, 1).ok_or_else(|| bad("cluster_name"))?.to_string();
    let group_name = cell(&row, 2).ok_or_else(|| bad("group_name"))?.to_string();
    let topology_mode = match cell(&row, 3) {
        Some("MULTI_PRIMARY") => TopologyMode::MultiPrimary,
        _ => TopologyMode::SinglePrimary,
    };
    let view_change_uuid = cell(&row, 4).map(str::to_string);
    let comm_stack = match cell(&row, 5) {
        Some("MYSQL") => CommStack::Mysql,
        _ => CommStack::Xcom,
    };
    let clusterset_id = cell(&row, 6).and_then(|s| s.parse().ok());
    let attributes: Json = cell(&row, 7)
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Json::Object(Default::default()));

    Ok(Cluster {
        cluster_id,
        name,
        group_name,
        topology_mode,
        view_change_uuid,
        comm_stack,
        clusterset_id,
        availability: ClusterAvailability::Online,
        attributes,
    })
}
