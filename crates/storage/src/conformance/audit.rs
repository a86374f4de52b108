use std::future::Future;

use super::{make_audit_entry, TestResult};
use crate::record::{parse_rfc3339, EvidenceKind, EvidencePayload, EvidenceRecordRow};
use crate::WorkflowStore;

pub(super) async fn run_audit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "audit",
            "entries_replay_in_timestamp_order",
            entries_replay_in_timestamp_order(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "entries_are_scoped_per_contract",
            entries_are_scoped_per_contract(factory).await,
        ),
        TestResult::from_result(
            "audit",
            "evidence_roundtrips_with_hash_and_flag",
            evidence_roundtrips_with_hash_and_flag(factory).await,
        ),
    ]
}

async fn entries_replay_in_timestamp_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    // Appended out of order on purpose.
    for (id, at) in [
        ("a2", "2026-01-01T00:02:00Z"),
        ("a1", "2026-01-01T00:01:00Z"),
        ("a3", "2026-01-01T00:03:00Z"),
    ] {
        store
            .append_audit(make_audit_entry(id, "c1", at))
            .await
            .map_err(|e| e.to_string())?;
    }
    let entries = store.list_audit("c1").await.map_err(|e| e.to_string())?;
    if entries.len() != 3 {
        return Err(format!("expected 3 entries, got {}", entries.len()));
    }
    let mut last = None;
    for entry in &entries {
        let t = parse_rfc3339(&entry.occurred_at).ok_or("unparseable timestamp")?;
        if let Some(prev) = last {
            if t < prev {
                return Err("entries not in non-decreasing timestamp order".to_string());
            }
        }
        last = Some(t);
    }
    Ok(())
}

async fn entries_are_scoped_per_contract<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .append_audit(make_audit_entry("a1", "c1", "2026-01-01T00:01:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .append_audit(make_audit_entry("a2", "c2", "2026-01-01T00:02:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    let entries = store.list_audit("c1").await.map_err(|e| e.to_string())?;
    if entries.len() != 1 || entries[0].id != "a1" {
        return Err("audit listing leaked entries across contracts".to_string());
    }
    Ok(())
}

async fn evidence_roundtrips_with_hash_and_flag<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let row = EvidenceRecordRow {
        id: "e1".to_string(),
        contract_id: "c1".to_string(),
        kind: EvidenceKind::Integrity,
        payload: EvidencePayload::Integrity {
            sha256: "deadbeef".to_string(),
            url: "mem://doc.pdf".to_string(),
            generated_at: "2026-01-01T00:05:00Z".to_string(),
        },
        content_sha256: "cafebabe".to_string(),
        collected_at: "2026-01-01T00:05:00Z".to_string(),
        valid: true,
    };
    store
        .insert_evidence(row)
        .await
        .map_err(|e| e.to_string())?;
    let listed = store.list_evidence("c1").await.map_err(|e| e.to_string())?;
    if listed.len() != 1 {
        return Err(format!("expected 1 evidence record, got {}", listed.len()));
    }
    let read = &listed[0];
    if read.kind != EvidenceKind::Integrity || read.content_sha256 != "cafebabe" || !read.valid {
        return Err("evidence record did not roundtrip".to_string());
    }
    Ok(())
}
