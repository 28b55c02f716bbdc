use cluster_errors::{ClusterError, ClusterResult};

use crate::method::RecoveryMethod;

/// A cluster member considered as a donor (spec §4.4 "Donor selection").
#[derive(Debug, Clone)]
pub struct DonorCandidate {
    pub label: String,
    pub is_online: bool,
    pub in_cluster: bool,
    /// Whether `@@GLOBAL.report_host` resolves to an IPv4 address; CLONE
    /// cannot read from an IPv6-only donor.
    pub ipv4_resolvable: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donor {
    pub label: String,
}

/// Validates and resolves the donor for a recovery (spec §4.4: "Donor
/// selection: caller may override; default is the current primary. Donor
/// must be ONLINE, belong to the cluster, and — for CLONE — have
/// `report_host` resolvable via IPv4").
pub fn select_donor(
    candidates: &[DonorCandidate],
    override_label: Option<&str>,
    method: RecoveryMethod,
) -> ClusterResult<Donor> {
    let chosen = match override_label {
        Some(label) => candidates
            .iter()
            .find(|c| c.label == label)
            .ok_or_else(|| ClusterError::MetadataMissing(format!("donor '{label}' not found in the cluster")))?,
        None => candidates
            .iter()
            .find(|c| c.is_primary)
            .ok_or(ClusterError::GroupHasNoPrimary)?,
    };

    if !chosen.in_cluster {
        return Err(ClusterError::BadArg(format!("'{}' does not belong to this cluster", chosen.label)));
    }

    if !chosen.is_online {
        return Err(ClusterError::PrimaryUnavailable(format!("donor '{}' is not ONLINE", chosen.label)));
    }

    if method == RecoveryMethod::Clone && !chosen.ipv4_resolvable {
        return Err(ClusterError::CloneRecoveryFailed(format!(
            "donor '{}' has no IPv4-resolvable report_host",
            chosen.label
        )));
    }

    Ok(Donor { label: chosen.label.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<DonorCandidate> {
        vec![
            DonorCandidate {
                label: "primary".into(),
                is_online: true,
                in_cluster: true,
                ipv4_resolvable: true,
                is_primary: true,
            },
            DonorCandidate {
                label: "ipv6only".into(),
                is_online: true,
                in_cluster: true,
                ipv4_resolvable: false,
                is_primary: false,
            },
            DonorCandidate {
                label: "offline".into(),
                is_online: false,
                in_cluster: true,
                ipv4_resolvable: true,
                is_primary: false,
            },
        ]
    }

    #[test]
    fn defaults_to_primary() {
        let donor = select_donor(&candidates(), None, RecoveryMethod::Incremental).unwrap();
        assert_eq!(donor.label, "primary");
    }

    #[test]
    fn override_must_be_online() {
        let err = select_donor(&candidates(), Some("offline"), RecoveryMethod::Incremental).unwrap_err();
        assert!(matches!(err, ClusterError::PrimaryUnavailable(_)));
    }

    #[test]
    fn clone_rejects_ipv6_only_donor() {
        let err = select_donor(&candidates(), Some("ipv6only"), RecoveryMethod::Clone).unwrap_err();
        assert!(matches!(err, ClusterError::CloneRecoveryFailed(_)));
    }

    #[test]
    fn unknown_override_is_metadata_missing() {
        let err = select_donor(&candidates(), Some("ghost"), RecoveryMethod::Incremental).unwrap_err();
        assert!(matches!(err, ClusterError::MetadataMissing(_)));
    }
}
