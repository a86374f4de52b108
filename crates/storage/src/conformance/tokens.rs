use std::future::Future;

use super::{make_token, TestResult};
use crate::{StorageError, WorkflowStore};

pub(super) async fn run_token_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "tokens",
            "find_token_scoped_by_contract",
            find_token_scoped_by_contract(factory).await,
        ),
        TestResult::from_result(
            "tokens",
            "mark_used_is_single_shot",
            mark_used_is_single_shot(factory).await,
        ),
        TestResult::from_result(
            "tokens",
            "mark_used_records_client_context",
            mark_used_records_client_context(factory).await,
        ),
        TestResult::from_result(
            "tokens",
            "supersede_marks_open_tokens_without_client_context",
            supersede_marks_open_tokens_without_client_context(factory).await,
        ),
        TestResult::from_result(
            "tokens",
            "supersede_skips_already_used_tokens",
            supersede_skips_already_used_tokens(factory).await,
        ),
        TestResult::from_result(
            "tokens",
            "mark_used_unknown_token_is_not_found",
            mark_used_unknown_token_is_not_found(factory).await,
        ),
    ]
}

async fn find_token_scoped_by_contract<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_token(make_token("t1", "c1", "123456"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .insert_token(make_token("t2", "c2", "123456"))
        .await
        .map_err(|e| e.to_string())?;

    let found = store
        .find_token("c1", "123456")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("token not found for its own contract")?;
    if found.id != "t1" {
        return Err(format!("wrong token found: {}", found.id));
    }
    if store
        .find_token("c3", "123456")
        .await
        .map_err(|e| e.to_string())?
        .is_some()
    {
        return Err("code matched across an unrelated contract".to_string());
    }
    Ok(())
}

async fn mark_used_is_single_shot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_token(make_token("t1", "c1", "123456"))
        .await
        .map_err(|e| e.to_string())?;

    store
        .mark_token_used("t1", "2026-01-01T11:00:00Z", "10.0.0.1", "agent/1")
        .await
        .map_err(|e| e.to_string())?;

    match store
        .mark_token_used("t1", "2026-01-01T11:00:01Z", "10.0.0.2", "agent/2")
        .await
    {
        Err(StorageError::TokenAlreadyUsed { .. }) => {}
        Err(e) => return Err(format!("wrong error: {e}")),
        Ok(()) => return Err("second mark_used succeeded".to_string()),
    }

    // First redemption's context must survive.
    let token = store
        .find_token("c1", "123456")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("token vanished")?;
    if token.used_ip.as_deref() != Some("10.0.0.1") {
        return Err(format!("redemption context clobbered: {:?}", token.used_ip));
    }
    Ok(())
}

async fn mark_used_records_client_context<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_token(make_token("t1", "c1", "654321"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .mark_token_used("t1", "2026-01-01T11:00:00Z", "10.1.1.1", "agent/9")
        .await
        .map_err(|e| e.to_string())?;
    let token = store
        .find_token("c1", "654321")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("token vanished")?;
    if token.used_at.as_deref() != Some("2026-01-01T11:00:00Z")
        || token.used_ip.as_deref() != Some("10.1.1.1")
        || token.used_user_agent.as_deref() != Some("agent/9")
    {
        return Err(format!(
            "redemption context incomplete: {:?}/{:?}/{:?}",
            token.used_at, token.used_ip, token.used_user_agent
        ));
    }
    Ok(())
}

async fn supersede_marks_open_tokens_without_client_context<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_token(make_token("t1", "c1", "111111"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .insert_token(make_token("t2", "c1", "222222"))
        .await
        .map_err(|e| e.to_string())?;

    let count = store
        .supersede_open_tokens("c1", "2026-01-01T12:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if count != 2 {
        return Err(format!("expected 2 superseded, got {count}"));
    }

    let token = store
        .find_token("c1", "111111")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("token vanished")?;
    if !token.is_used() {
        return Err("superseded token still open".to_string());
    }
    if token.used_ip.is_some() || token.used_user_agent.is_some() {
        return Err("supersession recorded a client context".to_string());
    }
    Ok(())
}

async fn supersede_skips_already_used_tokens<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_token(make_token("t1", "c1", "111111"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .mark_token_used("t1", "2026-01-01T11:00:00Z", "10.0.0.1", "agent/1")
        .await
        .map_err(|e| e.to_string())?;

    let count = store
        .supersede_open_tokens("c1", "2026-01-01T12:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if count != 0 {
        return Err(format!("expected 0 superseded, got {count}"));
    }
    // The redeemed token's original timestamp must be untouched.
    let token = store
        .find_token("c1", "111111")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("token vanished")?;
    if token.used_at.as_deref() != Some("2026-01-01T11:00:00Z") {
        return Err("supersession rewrote a redeemed token".to_string());
    }
    Ok(())
}

async fn mark_used_unknown_token_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store
        .mark_token_used("missing", "2026-01-01T11:00:00Z", "10.0.0.1", "agent/1")
        .await
    {
        Err(StorageError::TokenNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("wrong error: {e}")),
        Ok(()) => Err("unknown token was marked used".to_string()),
    }
}
