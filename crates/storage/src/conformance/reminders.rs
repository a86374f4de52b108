use std::future::Future;

use super::{make_reminder, TestResult};
use crate::record::ReminderOffset;
use crate::WorkflowStore;

pub(super) async fn run_reminder_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "reminders",
            "due_selection_honors_due_at",
            due_selection_honors_due_at(factory).await,
        ),
        TestResult::from_result(
            "reminders",
            "cancel_open_is_logical_and_counted",
            cancel_open_is_logical_and_counted(factory).await,
        ),
        TestResult::from_result(
            "reminders",
            "sent_reminder_is_not_due_or_cancellable",
            sent_reminder_is_not_due_or_cancellable(factory).await,
        ),
        TestResult::from_result(
            "reminders",
            "failed_send_bumps_attempts_and_stays_due",
            failed_send_bumps_attempts_and_stays_due(factory).await,
        ),
    ]
}

async fn due_selection_honors_due_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_reminders(vec![
            make_reminder("r1", "c1", ReminderOffset::H24, "2026-01-02T00:00:00Z"),
            make_reminder("r2", "c1", ReminderOffset::H72, "2026-01-04T00:00:00Z"),
            make_reminder("r3", "c1", ReminderOffset::D7, "2026-01-08T00:00:00Z"),
        ])
        .await
        .map_err(|e| e.to_string())?;

    let due = store
        .due_reminders("2026-01-01T12:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if !due.is_empty() {
        return Err(format!("{} reminders due before any due_at", due.len()));
    }

    let due = store
        .due_reminders("2026-01-04T00:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = due.iter().map(|r| r.id.as_str()).collect();
    if ids != ["r1", "r2"] {
        return Err(format!("expected [r1, r2] due, got {ids:?}"));
    }
    Ok(())
}

async fn cancel_open_is_logical_and_counted<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_reminders(vec![
            make_reminder("r1", "c1", ReminderOffset::H24, "2026-01-02T00:00:00Z"),
            make_reminder("r2", "c1", ReminderOffset::H72, "2026-01-04T00:00:00Z"),
            make_reminder("r3", "c2", ReminderOffset::H24, "2026-01-02T00:00:00Z"),
        ])
        .await
        .map_err(|e| e.to_string())?;

    let cancelled = store
        .cancel_open_reminders("c1")
        .await
        .map_err(|e| e.to_string())?;
    if cancelled != 2 {
        return Err(format!("expected 2 cancelled, got {cancelled}"));
    }

    // Rows survive, flagged cancelled.
    let rows = store
        .list_reminders("c1")
        .await
        .map_err(|e| e.to_string())?;
    if rows.len() != 2 || !rows.iter().all(|r| r.cancelled) {
        return Err("cancellation deleted or missed rows".to_string());
    }

    // The other contract's reminder is untouched and still becomes due.
    let due = store
        .due_reminders("2026-01-03T00:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if due.len() != 1 || due[0].id != "r3" {
        return Err("cancellation leaked across contracts".to_string());
    }
    Ok(())
}

async fn sent_reminder_is_not_due_or_cancellable<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_reminders(vec![make_reminder(
            "r1",
            "c1",
            ReminderOffset::H24,
            "2026-01-02T00:00:00Z",
        )])
        .await
        .map_err(|e| e.to_string())?;
    store
        .mark_reminder_sent("r1", "2026-01-02T00:00:05Z")
        .await
        .map_err(|e| e.to_string())?;

    let due = store
        .due_reminders("2026-01-03T00:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if !due.is_empty() {
        return Err("sent reminder still due".to_string());
    }
    let cancelled = store
        .cancel_open_reminders("c1")
        .await
        .map_err(|e| e.to_string())?;
    if cancelled != 0 {
        return Err("sent reminder was counted as cancelled".to_string());
    }
    Ok(())
}

async fn failed_send_bumps_attempts_and_stays_due<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: WorkflowStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .insert_reminders(vec![make_reminder(
            "r1",
            "c1",
            ReminderOffset::H24,
            "2026-01-02T00:00:00Z",
        )])
        .await
        .map_err(|e| e.to_string())?;
    store
        .bump_reminder_attempts("r1")
        .await
        .map_err(|e| e.to_string())?;

    let due = store
        .due_reminders("2026-01-03T00:00:00Z")
        .await
        .map_err(|e| e.to_string())?;
    if due.len() != 1 || due[0].attempts != 1 {
        return Err("failed send did not keep the reminder due with attempts=1".to_string());
    }
    Ok(())
}
