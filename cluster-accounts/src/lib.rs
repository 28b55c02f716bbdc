//! Replication account manager (spec §4.6): creates, drops, rotates, and
//! records per-member replication credentials.

use cluster_errors::{ClusterError, ClusterResult};
use cluster_instance::Instance;
use cluster_types::{AuthType, ReplicationAccount};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, instrument};

/// A snapshot of an account's grants, sufficient to recreate it verbatim on
/// undo (spec §4.6: "Records an undo snapshot of `SHOW GRANTS` + `SHOW
/// CREATE USER` so a drop can be reverted").
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub create_user_stmt: String,
    pub grant_stmts: Vec<String>,
}

pub struct AccountManager;

impl AccountManager {
    /// Generates a random password for a newly created account. Never
    /// logged; only ever sent directly in the `CREATE USER`/`ALTER USER`
    /// statement.
    pub fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// spec §4.6: cert-based auth requires `ssl_cert`, `ssl_key`, and one of
    /// `ssl_ca`/`ssl_capath` to already be set on the server.
    pub async fn validate_cert_prerequisites(instance: &mut Instance, auth_type: AuthType) -> ClusterResult<()> {
        if !auth_type.requires_cert_options() {
            return Ok(());
        }
        for var in ["ssl_cert", "ssl_key"] {
            let value = instance.get_sysvar(var).await?;
            if value.is_empty() {
                return Err(ClusterError::MissingCertOption(var.to_string()));
            }
        }
        let ca = instance.get_sysvar("ssl_ca").await?;
        let capath = instance.get_sysvar("ssl_capath").await?;
        if ca.is_empty() && capath.is_empty() {
            return Err(ClusterError::MissingCertOption("ssl_ca or ssl_capath".to_string()));
        }
        Ok(())
    }

    /// Creates `account` on `instance`, snapshotting nothing (there's
    /// nothing to snapshot yet — use [`Self::drop_with_snapshot`] on the
    /// way out if this needs to be undoable).
    #[instrument(skip(instance, password), fields(endpoint = %instance.label()))]
    pub async fn create(
        instance: &mut Instance,
        account: &ReplicationAccount,
        password: &str,
    ) -> ClusterResult<()> {
        let identified = match account.auth_type {
            AuthType::Password => format!("IDENTIFIED BY '{}'", escape(password)),
            AuthType::CertIssuer | AuthType::CertIssuerPassword => {
                format!("REQUIRE ISSUER '{}'", escape(password))
            }
            AuthType::CertSubject | AuthType::CertSubjectPassword => {
                format!("REQUIRE SUBJECT '{}'", escape(password))
            }
        };
        instance
            .exec(&format!(
                "CREATE USER {} {identified}",
                account.quoted_user_at_host()
            ))
            .await?;
        instance
            .exec(&format!(
                "GRANT REPLICATION SLAVE ON *.* TO {}",
                account.quoted_user_at_host()
            ))
            .await?;
        info!(user = %account.user, "replication account created");
        Ok(())
    }

    /// Records `SHOW GRANTS` + `SHOW CREATE USER` for `account` so it can
    /// be recreated verbatim if a later step needs to undo a drop.
    pub async fn snapshot(instance: &mut Instance, account: &ReplicationAccount) -> ClusterResult<AccountSnapshot> {
        let user_at_host = account.quoted_user_at_host();
        let create_user_stmt = instance
            .query_scalar(&format!("SHOW CREATE USER {user_at_host}"))
            .await?
            .ok_or_else(|| ClusterError::MetadataMissing(format!("account {}", account.user)))?;
        let grant_rows = instance
            .query_rows(&format!("SHOW GRANTS FOR {user_at_host}"))
            .await?;
        let grant_stmts = grant_rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();
        Ok(AccountSnapshot {
            create_user_stmt,
            grant_stmts,
        })
    }

    /// Drops `account` after recording its snapshot, returning the snapshot
    /// so the caller can register an undo step that replays it verbatim
    /// (spec §3.3: "recreated on undo").
    pub async fn drop_with_snapshot(
        instance: &mut Instance,
        account: &ReplicationAccount,
    ) -> ClusterResult<AccountSnapshot> {
        let snapshot = Self::snapshot(instance, account).await?;
        instance
            .exec(&format!("DROP USER {}", account.quoted_user_at_host()))
            .await?;
        Ok(snapshot)
    }

    /// Replays a snapshot verbatim to recreate a dropped account (spec
    /// §5 supplement: "the recreate path replays both statements verbatim").
    pub async fn recreate_from_snapshot(instance: &mut Instance, snapshot: &AccountSnapshot) -> ClusterResult<()> {
        instance.exec(&snapshot.create_user_stmt).await?;
        for grant in &snapshot.grant_stmts {
            instance.exec(grant).await?;
        }
        Ok(())
    }

    /// spec §4.6 `refresh_replication_user`: rotates the password and
    /// pushes new credentials to the channel via `CHANGE REPLICATION
    /// SOURCE`. The channel update itself is the caller's job (it needs
    /// the channel name); this only rotates the account.
    pub async fn rotate_password(
        instance: &mut Instance,
        account: &ReplicationAccount,
        new_password: &str,
    ) -> ClusterResult<()> {
        instance
            .exec(&format!(
                "ALTER USER {} IDENTIFIED BY '{}'",
                account.quoted_user_at_host(),
                escape(new_password)
            ))
            .await
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_random_and_sized() {
        let a = AccountManager::generate_password();
        let b = AccountManager::generate_password();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn escape_doubles_single_quotes() {
        assert_eq!(escape("a'b"), "a''b");
    }
}
