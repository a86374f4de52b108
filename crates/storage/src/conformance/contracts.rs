use std::future::Future;

use super::{make_contract, TestResult};
use crate::record::ContractStatus;
use crate::{StorageError, WorkflowStore};

pub(super) async fn run_contract_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "contracts",
            "insert_then_get_roundtrips",
            insert_then_get_roundtrips(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "duplicate_insert_is_rejected",
            duplicate_insert_is_rejected(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "get_unknown_contract_is_not_found",
            get_unknown_contract_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "advance_status_cas_succeeds_on_match",
            advance_status_cas_succeeds_on_match(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "advance_status_cas_rejects_mismatch",
            advance_status_cas_rejects_mismatch(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "advance_status_rejects_backward_transition",
            advance_status_rejects_backward_transition(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "finalized_at_patched_only_when_provided",
            finalized_at_patched_only_when_provided(factory).await,
        ),
        TestResult::from_result(
            "contracts",
            "set_document_patches_only_document_fields",
            set_document_patches_only_document_fields(factory).await,
        ),
    ]
}

async fn insert_then_get_roundtrips<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.title != "Supply agreement" {
        return Err(format!("unexpected title: {}", read.title));
    }
    if read.status != ContractStatus::PendingInternalSignature {
        return Err(format!("unexpected status: {}", read.status));
    }
    Ok(())
}

async fn duplicate_insert_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    match store.insert_contract(make_contract("c1")).await {
        Err(StorageError::ContractExists { .. }) => Ok(()),
        Err(e) => Err(format!("wrong error: {e}")),
        Ok(()) => Err("duplicate insert was accepted".to_string()),
    }
}

async fn get_unknown_contract_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store.get_contract("missing").await {
        Err(StorageError::ContractNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("wrong error: {e}")),
        Ok(_) => Err("unknown contract was found".to_string()),
    }
}

async fn advance_status_cas_succeeds_on_match<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .advance_status(
            "c1",
            ContractStatus::PendingInternalSignature,
            ContractStatus::PendingExternalSignature,
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.status != ContractStatus::PendingExternalSignature {
        return Err(format!("status not advanced: {}", read.status));
    }
    Ok(())
}

async fn advance_status_cas_rejects_mismatch<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    // Expect a status the contract is not in.
    let result = store
        .advance_status(
            "c1",
            ContractStatus::PendingExternalSignature,
            ContractStatus::Finalized,
            None,
        )
        .await;
    match result {
        Err(StorageError::StatusConflict { .. }) => {}
        Err(e) => return Err(format!("wrong error: {e}")),
        Ok(()) => return Err("CAS mismatch was accepted".to_string()),
    }
    // Row must be untouched.
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.status != ContractStatus::PendingInternalSignature {
        return Err(format!("row mutated on failed CAS: {}", read.status));
    }
    Ok(())
}

async fn advance_status_rejects_backward_transition<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut contract = make_contract("c1");
    contract.status = ContractStatus::Finalized;
    store
        .insert_contract(contract)
        .await
        .map_err(|e| e.to_string())?;
    let result = store
        .advance_status(
            "c1",
            ContractStatus::Finalized,
            ContractStatus::PendingExternalSignature,
            None,
        )
        .await;
    match result {
        Err(StorageError::BackwardTransition { .. }) => Ok(()),
        Err(e) => Err(format!("wrong error: {e}")),
        Ok(()) => Err("backward transition was accepted".to_string()),
    }
}

async fn finalized_at_patched_only_when_provided<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .advance_status(
            "c1",
            ContractStatus::PendingInternalSignature,
            ContractStatus::PendingExternalSignature,
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.finalized_at.is_some() {
        return Err("finalized_at set on a non-final transition".to_string());
    }
    store
        .advance_status(
            "c1",
            ContractStatus::PendingExternalSignature,
            ContractStatus::Finalized,
            Some("2026-01-05T12:00:00Z"),
        )
        .await
        .map_err(|e| e.to_string())?;
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.finalized_at.as_deref() != Some("2026-01-05T12:00:00Z") {
        return Err(format!("finalized_at not patched: {:?}", read.finalized_at));
    }
    Ok(())
}

async fn set_document_patches_only_document_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_contract(make_contract("c1"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .set_document("c1", "mem://doc.pdf", "abc123")
        .await
        .map_err(|e| e.to_string())?;
    let read = store.get_contract("c1").await.map_err(|e| e.to_string())?;
    if read.document_url.as_deref() != Some("mem://doc.pdf") {
        return Err(format!("document_url not patched: {:?}", read.document_url));
    }
    if read.document_sha256.as_deref() != Some("abc123") {
        return Err(format!(
            "document_sha256 not patched: {:?}",
            read.document_sha256
        ));
    }
    if read.status != ContractStatus::PendingInternalSignature {
        return Err("document patch clobbered status".to_string());
    }
    Ok(())
}
