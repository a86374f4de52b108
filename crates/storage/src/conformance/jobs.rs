use std::future::Future;

use super::{make_job, TestResult};
use crate::record::JobStatus;
use crate::WorkflowStore;

pub(super) async fn run_job_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "jobs",
            "second_active_job_is_not_inserted",
            second_active_job_is_not_inserted(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "new_job_allowed_after_completion",
            new_job_allowed_after_completion(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "claim_marks_processing_and_bumps_attempts",
            claim_marks_processing_and_bumps_attempts(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "claim_is_fifo_and_respects_limit",
            claim_is_fifo_and_respects_limit(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "claim_skips_leased_jobs",
            claim_skips_leased_jobs(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "claim_skips_exhausted_jobs",
            claim_skips_exhausted_jobs(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "expired_lease_is_reclaimable",
            expired_lease_is_reclaimable(factory).await,
        ),
        TestResult::from_result(
            "jobs",
            "abandoned_processing_claim_is_reclaimable",
            abandoned_processing_claim_is_reclaimable(factory).await,
        ),
    ]
}

async fn second_active_job_is_not_inserted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let inserted = store
        .insert_job_if_none_active(make_job("j1", "c1", "2026-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    if !inserted {
        return Err("first job not inserted".to_string());
    }
    let inserted = store
        .insert_job_if_none_active(make_job("j2", "c1", "2026-01-01T00:01:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    if inserted {
        return Err("second active job inserted for same contract".to_string());
    }
    Ok(())
}

async fn new_job_allowed_after_completion<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_job_if_none_active(make_job("j1", "c1", "2026-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    let mut done = store.get_job("j1").await.map_err(|e| e.to_string())?;
    done.status = JobStatus::Completed;
    store.update_job(done).await.map_err(|e| e.to_string())?;

    let inserted = store
        .insert_job_if_none_active(make_job("j2", "c1", "2026-01-01T00:01:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    if !inserted {
        return Err("job not inserted after the previous one completed".to_string());
    }
    Ok(())
}

async fn claim_marks_processing_and_bumps_attempts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_job_if_none_active(make_job("j1", "c1", "2026-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    let claimed = store
        .claim_due_jobs(5, "2026-01-01T01:00:00Z", "2026-01-01T01:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if claimed.len() != 1 {
        return Err(format!("expected 1 claim, got {}", claimed.len()));
    }
    let job = &claimed[0];
    if job.status != JobStatus::Processing || job.attempts != 1 {
        return Err(format!(
            "claim did not mark processing/bump attempts: {} attempts={}",
            job.status, job.attempts
        ));
    }
    if job.lease_until.as_deref() != Some("2026-01-01T01:05:00Z") {
        return Err(format!("lease not set: {:?}", job.lease_until));
    }
    // A second claim in the same window must find nothing.
    let again = store
        .claim_due_jobs(5, "2026-01-01T01:00:01Z", "2026-01-01T01:05:01Z")
        .await
        .map_err(|e| e.to_string())?;
    if !again.is_empty() {
        return Err("claimed job was claimable again".to_string());
    }
    Ok(())
}

async fn claim_is_fifo_and_respects_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    // Different contracts so all three are active at once.
    store
        .insert_job_if_none_active(make_job("j3", "c3", "2026-01-01T00:03:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .insert_job_if_none_active(make_job("j1", "c1", "2026-01-01T00:01:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    store
        .insert_job_if_none_active(make_job("j2", "c2", "2026-01-01T00:02:00Z"))
        .await
        .map_err(|e| e.to_string())?;

    let claimed = store
        .claim_due_jobs(2, "2026-01-01T01:00:00Z", "2026-01-01T01:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = claimed.iter().map(|j| j.id.as_str()).collect();
    if ids != ["j1", "j2"] {
        return Err(format!("expected FIFO [j1, j2], got {ids:?}"));
    }
    Ok(())
}

async fn claim_skips_leased_jobs<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut job = make_job("j1", "c1", "2026-01-01T00:00:00Z");
    // Requeued after a failure with a minimum retry delay.
    job.lease_until = Some("2026-01-01T02:00:00Z".to_string());
    store
        .insert_job_if_none_active(job)
        .await
        .map_err(|e| e.to_string())?;

    let claimed = store
        .claim_due_jobs(5, "2026-01-01T01:00:00Z", "2026-01-01T01:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if !claimed.is_empty() {
        return Err("job claimed before its retry delay elapsed".to_string());
    }
    Ok(())
}

async fn claim_skips_exhausted_jobs<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut job = make_job("j1", "c1", "2026-01-01T00:00:00Z");
    job.attempts = job.max_attempts;
    store
        .insert_job_if_none_active(job)
        .await
        .map_err(|e| e.to_string())?;

    let claimed = store
        .claim_due_jobs(5, "2026-01-01T01:00:00Z", "2026-01-01T01:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if !claimed.is_empty() {
        return Err("exhausted job was claimed".to_string());
    }
    Ok(())
}

async fn expired_lease_is_reclaimable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut job = make_job("j1", "c1", "2026-01-01T00:00:00Z");
    job.lease_until = Some("2026-01-01T00:30:00Z".to_string());
    store
        .insert_job_if_none_active(job)
        .await
        .map_err(|e| e.to_string())?;

    let claimed = store
        .claim_due_jobs(5, "2026-01-01T01:00:00Z", "2026-01-01T01:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if claimed.len() != 1 {
        return Err("job with expired lease not reclaimable".to_string());
    }
    Ok(())
}

async fn abandoned_processing_claim_is_reclaimable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_job_if_none_active(make_job("j1", "c1", "2026-01-01T00:00:00Z"))
        .await
        .map_err(|e| e.to_string())?;
    // First worker claims the job and then dies without writing back.
    let claimed = store
        .claim_due_jobs(5, "2026-01-01T00:00:00Z", "2026-01-01T00:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if claimed.len() != 1 || claimed[0].status != JobStatus::Processing {
        return Err("setup claim did not mark the job processing".to_string());
    }

    // Inside the lease nobody else may touch it.
    let contested = store
        .claim_due_jobs(5, "2026-01-01T00:04:00Z", "2026-01-01T00:09:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if !contested.is_empty() {
        return Err("processing job claimed before its lease expired".to_string());
    }

    // Long after the lease expired the job must come back.
    let reclaimed = store
        .claim_due_jobs(5, "2026-01-01T12:00:00Z", "2026-01-01T12:05:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if reclaimed.len() != 1 {
        return Err("abandoned processing job never reclaimed".to_string());
    }
    let job = &reclaimed[0];
    if job.status != JobStatus::Processing || job.attempts != 2 {
        return Err(format!(
            "reclaim did not re-mark processing/bump attempts: {} attempts={}",
            job.status, job.attempts
        ));
    }
    Ok(())
}
