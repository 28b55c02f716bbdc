use cluster_errors::ClusterResult;
use cluster_instance::Instance;
use tracing::info;

/// A structured inverse-DML log (spec §4.9: "a `Sql_undo_list`, a structured
/// inverse-DML log that runs inside a local Metadata transaction on a
/// designated instance provider"). Statements are recorded in the order
/// their forward effect happened and replayed in reverse.
#[derive(Debug, Default, Clone)]
pub struct SqlUndoList {
    statements: Vec<String>,
}

impl SqlUndoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, inverse_sql: impl Into<String>) {
        self.statements.push(inverse_sql.into());
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Runs every recorded inverse statement, most-recent-first, against the
    /// designated instance (typically the current Metadata primary).
    pub async fn execute(&self, instance: &mut Instance) -> ClusterResult<()> {
        for stmt in self.statements.iter().rev() {
            info!(%stmt, "metadata undo: executing inverse statement");
            instance.exec(stmt).await?;
        }
        Ok(())
    }
}

/// A Metadata mutation's undo log. Forward effects are applied immediately
/// against the store (the "transaction" is logical bookkeeping, not
/// deferred writes); `commit` hands the accumulated undo log to the caller
/// so it can register a single `Sql_undo_list` unit with the undo tracker,
/// exactly as the original's `Undo_tracker::add(note, sql_undo, get_instance)`
/// does for one Metadata write.
#[derive(Debug, Default)]
pub struct MetadataTransaction {
    undo: SqlUndoList,
}

impl MetadataTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_undo(&mut self, inverse_sql: impl Into<String>) {
        self.undo.push(inverse_sql);
    }

    /// Ends the transaction, returning its undo log for registration with
    /// the undo tracker.
    pub fn commit(self) -> SqlUndoList {
        self.undo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_log_accumulates_in_order() {
        let mut txn = MetadataTransaction::new();
        txn.record_undo("DELETE FROM instances WHERE instance_id = 1");
        txn.record_undo("UPDATE clusters SET cluster_name = 'old' WHERE cluster_id = 1");
        let undo = txn.commit();
        assert!(!undo.is_empty());
    }
}
