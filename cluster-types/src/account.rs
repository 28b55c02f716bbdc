use serde::{Deserialize, Serialize};

/// Auth types a replication account can use (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    Password,
    CertIssuer,
    CertIssuerPassword,
    CertSubject,
    CertSubjectPassword,
}

impl AuthType {
    pub fn is_cert_based(&self) -> bool {
        !matches!(self, AuthType::Password)
    }

    /// Spec §4.6: cert-based auth requires `ssl_cert`, `ssl_key`, and one
    /// of `ssl_ca`/`ssl_capath` on the server before account creation.
    pub fn requires_cert_options(&self) -> bool {
        self.is_cert_based()
    }
}

/// A dedicated MySQL user for GR recovery or an async channel (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationAccount {
    pub user: String,
    /// The allowed-host pattern, e.g. `%` or a specific subnet.
    pub host_pattern: String,
    pub auth_type: AuthType,
}

impl ReplicationAccount {
    pub fn for_recovery(prefix: &str, server_id: u32, host_pattern: impl Into<String>) -> Self {
        ReplicationAccount {
            user: format!("{prefix}{server_id}"),
            host_pattern: host_pattern.into(),
            auth_type: AuthType::Password,
        }
    }

    pub fn for_channel(prefix: &str, uuid_suffix: &str, host_pattern: impl Into<String>) -> Self {
        ReplicationAccount {
            user: format!("{prefix}{uuid_suffix}"),
            host_pattern: host_pattern.into(),
            auth_type: AuthType::Password,
        }
    }

    pub fn quoted_user_at_host(&self) -> String {
        format!("'{}'@'{}'", self.user, self.host_pattern)
    }
}
