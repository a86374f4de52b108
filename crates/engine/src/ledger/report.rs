//! Compliance report built from a contract's audit trail and evidence
//! records.

use std::collections::BTreeMap;

use firma_storage::{
    AuditEntryRecord, ContractStatus, EvidenceKind, EvidencePayload, EvidenceRecordRow,
    WorkflowStore,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::Ledger;
use crate::error::EngineError;

/// Certificate issuers accepted as qualified for the internal signature.
/// Matching is a case-insensitive substring test against the recorded
/// issuer DN, so "CN=FNMT-RCM, O=FNMT" matches "FNMT".
pub const RECOGNIZED_ISSUERS: &[&str] = &["FNMT", "DNIE", "CAMERFIRMA", "IZENPE", "ACCV"];

/// Aggregated conformance view of one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub contract_id: String,
    pub contract_status: ContractStatus,
    pub finalized: bool,
    pub generated_at: String,
    /// Audit-entry counts keyed by the event kind's wire name.
    pub events_by_kind: BTreeMap<String, usize>,
    pub signature_count: usize,
    /// `contract_updated` entries in the trail. The engine itself never
    /// edits contract content, so these come from host applications
    /// recording draft edits through the ledger.
    pub edit_count: usize,
    pub access_attempt_count: usize,
    pub evidence_complete: bool,
    pub timestamps_valid: bool,
    pub qualified_certificate_present: bool,
    pub integrity_evidence_present: bool,
}

impl ComplianceReport {
    /// A contract is legally valid only when finalized and every
    /// conformance flag holds.
    pub fn legally_valid(&self) -> bool {
        self.finalized
            && self.evidence_complete
            && self.timestamps_valid
            && self.qualified_certificate_present
            && self.integrity_evidence_present
    }
}

pub(crate) fn issuer_recognized(issuer: &str) -> bool {
    let issuer = issuer.to_uppercase();
    RECOGNIZED_ISSUERS.iter().any(|known| issuer.contains(known))
}

fn timestamp_valid(ts: &str, now: OffsetDateTime) -> bool {
    match OffsetDateTime::parse(ts, &Rfc3339) {
        Ok(t) => t <= now,
        Err(_) => false,
    }
}

pub(crate) fn assemble_report(
    contract_id: &str,
    status: ContractStatus,
    finalized_at: Option<&str>,
    entries: &[AuditEntryRecord],
    evidence: &[EvidenceRecordRow],
    now: OffsetDateTime,
    generated_at: String,
) -> ComplianceReport {
    let mut events_by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries {
        *events_by_kind.entry(entry.kind.to_string()).or_default() += 1;
    }

    let signature_count = evidence
        .iter()
        .filter(|row| row.kind == EvidenceKind::Signature)
        .count();
    let edit_count = entries
        .iter()
        .filter(|e| e.kind == firma_storage::AuditKind::ContractUpdated)
        .count();
    let access_attempt_count = entries
        .iter()
        .filter(|e| e.kind == firma_storage::AuditKind::AccessAttempt)
        .count();

    let evidence_complete = !entries.is_empty()
        && entries
            .iter()
            .all(|e| !e.evidence.ip.is_empty() && !e.evidence.user_agent.is_empty());
    let timestamps_valid = !entries.is_empty()
        && entries.iter().all(|e| timestamp_valid(&e.occurred_at, now));
    let qualified_certificate_present = evidence.iter().any(|row| match &row.payload {
        EvidencePayload::Signature { certificate, .. } => certificate
            .as_ref()
            .map(|c| issuer_recognized(&c.issuer))
            .unwrap_or(false),
        _ => false,
    });
    let integrity_evidence_present = evidence
        .iter()
        .any(|row| row.kind == EvidenceKind::Integrity);

    ComplianceReport {
        contract_id: contract_id.to_string(),
        contract_status: status,
        finalized: status == ContractStatus::Finalized && finalized_at.is_some(),
        generated_at,
        events_by_kind,
        signature_count,
        edit_count,
        access_attempt_count,
        evidence_complete,
        timestamps_valid,
        qualified_certificate_present,
        integrity_evidence_present,
    }
}

impl<S: WorkflowStore> Ledger<S> {
    /// Read the full trail for a contract and derive the conformance
    /// flags. Pending audit events should be flushed first if the caller
    /// needs them counted.
    pub async fn build_report(&self, contract_id: &str) -> Result<ComplianceReport, EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        let entries = self.store.list_audit(contract_id).await?;
        let evidence = self.store.list_evidence(contract_id).await?;
        let now = self.clock.now();
        Ok(assemble_report(
            contract_id,
            contract.status,
            contract.finalized_at.as_deref(),
            &entries,
            &evidence,
            now,
            self.clock.now_rfc3339(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firma_storage::{AuditKind, AuditPayload, CertificateMetadata, ClientEvidence};
    use time::macros::datetime;

    fn entry(kind: AuditKind, payload: AuditPayload, ip: &str, occurred_at: &str) -> AuditEntryRecord {
        AuditEntryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: "c1".to_string(),
            kind,
            description: String::new(),
            payload,
            evidence: ClientEvidence {
                ip: ip.to_string(),
                user_agent: "ua".to_string(),
                timestamp: occurred_at.to_string(),
                timezone: "UTC".to_string(),
                geolocation: None,
            },
            actor_id: None,
            occurred_at: occurred_at.to_string(),
        }
    }

    fn signature_evidence(issuer: Option<&str>) -> EvidenceRecordRow {
        EvidenceRecordRow {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: "c1".to_string(),
            kind: EvidenceKind::Signature,
            payload: EvidencePayload::Signature {
                role: firma_storage::SignerRole::InternalQualified,
                signer_name: "Ana".to_string(),
                signer_email: "ana@example.com".to_string(),
                ip: "127.0.0.1".to_string(),
                user_agent: "ua".to_string(),
                certificate: issuer.map(|i| CertificateMetadata {
                    issuer: i.to_string(),
                    subject: "CN=Ana".to_string(),
                    valid_from: "2025-01-01T00:00:00Z".to_string(),
                    valid_to: "2027-01-01T00:00:00Z".to_string(),
                    thumbprint: "ab".to_string(),
                }),
            },
            content_sha256: "0".repeat(64),
            collected_at: "2026-01-01T00:00:00Z".to_string(),
            valid: true,
        }
    }

    fn integrity_evidence() -> EvidenceRecordRow {
        EvidenceRecordRow {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: "c1".to_string(),
            kind: EvidenceKind::Integrity,
            payload: EvidencePayload::Integrity {
                sha256: "0".repeat(64),
                url: "mem://c1.pdf".to_string(),
                generated_at: "2026-01-01T00:00:00Z".to_string(),
            },
            content_sha256: "0".repeat(64),
            collected_at: "2026-01-01T00:00:00Z".to_string(),
            valid: true,
        }
    }

    #[test]
    fn issuer_matching_is_case_insensitive_substring() {
        assert!(issuer_recognized("CN=AC FNMT Usuarios, O=FNMT-RCM"));
        assert!(issuer_recognized("cn=izenpe.com"));
        assert!(!issuer_recognized("CN=Some Unknown CA"));
    }

    #[test]
    fn legally_valid_requires_finalization_and_all_flags() {
        let now = datetime!(2026-02-01 00:00:00 UTC);
        let entries = vec![
            entry(
                AuditKind::ContractCreated,
                AuditPayload::ContractCreated {
                    title: "NDA".to_string(),
                },
                "127.0.0.1",
                "2026-01-01T00:00:00Z",
            ),
            entry(
                AuditKind::AccessAttempt,
                AuditPayload::AccessAttempt {
                    resource: "signing-page".to_string(),
                    granted: true,
                },
                "203.0.113.9",
                "2026-01-02T00:00:00Z",
            ),
        ];
        let evidence = vec![signature_evidence(Some("CN=AC FNMT Usuarios")), integrity_evidence()];

        let report = assemble_report(
            "c1",
            ContractStatus::Finalized,
            Some("2026-01-03T00:00:00Z"),
            &entries,
            &evidence,
            now,
            "2026-02-01T00:00:00Z".to_string(),
        );
        assert!(report.legally_valid());
        assert_eq!(report.signature_count, 1);
        assert_eq!(report.access_attempt_count, 1);
        assert_eq!(report.events_by_kind.get("contract_created"), Some(&1));

        let not_final = assemble_report(
            "c1",
            ContractStatus::PendingExternalSignature,
            None,
            &entries,
            &evidence,
            now,
            "2026-02-01T00:00:00Z".to_string(),
        );
        assert!(!not_final.legally_valid());
    }

    #[test]
    fn future_timestamp_clears_the_validity_flag() {
        let now = datetime!(2026-01-01 00:00:00 UTC);
        let entries = vec![entry(
            AuditKind::ContractCreated,
            AuditPayload::ContractCreated {
                title: "NDA".to_string(),
            },
            "127.0.0.1",
            "2026-06-01T00:00:00Z",
        )];
        let report = assemble_report(
            "c1",
            ContractStatus::Draft,
            None,
            &entries,
            &[],
            now,
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert!(!report.timestamps_valid);
        assert!(report.evidence_complete);
    }

    #[test]
    fn unrecognized_issuer_clears_the_certificate_flag() {
        let now = datetime!(2026-02-01 00:00:00 UTC);
        let evidence = vec![signature_evidence(Some("CN=Some Unknown CA"))];
        let report = assemble_report(
            "c1",
            ContractStatus::Finalized,
            Some("2026-01-03T00:00:00Z"),
            &[],
            &evidence,
            now,
            "2026-02-01T00:00:00Z".to_string(),
        );
        assert!(!report.qualified_certificate_present);
        assert!(!report.legally_valid());
    }
}
