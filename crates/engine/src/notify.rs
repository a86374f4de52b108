//! Scheduled and manual signer notifications.
//!
//! Reminders are rows, not timers: three fixed offsets are persisted when
//! the external signature becomes pending, and an hourly sweep sends the
//! due ones. The sweep re-checks the owning contract's status before
//! sending, so schedules left behind by a finalized contract cancel
//! themselves instead of mailing a signer about a signed contract.

use std::sync::Arc;

use firma_storage::{
    format_rfc3339, AuditPayload, ContractRecord, ContractStatus, ReminderOffset, ReminderRecord,
    WorkflowStore,
};

use crate::adapter::{EmailSender, OutboundEmail};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::worker::{spawn_interval_worker, WorkerHandle};

/// Default sweep interval.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

pub struct NotificationScheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn EmailSender>,
    ledger: Ledger<S>,
}

impl<S> Clone for NotificationScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            mailer: Arc::clone(&self.mailer),
            ledger: self.ledger.clone(),
        }
    }
}

/// Signing-invitation email carrying the verification code.
pub fn invitation_email(contract: &ContractRecord, code: &str) -> OutboundEmail {
    let subject = format!("Signature requested: {}", contract.title);
    let text = format!(
        "Hello {},\n\nYou have been asked to sign \"{}\".\nYour verification code is {} and it is valid for 24 hours.\n",
        contract.signer_name, contract.title, code
    );
    let html = format!(
        "<p>Hello {},</p><p>You have been asked to sign <strong>{}</strong>.</p><p>Your verification code is <strong>{}</strong> and it is valid for 24 hours.</p>",
        contract.signer_name, contract.title, code
    );
    OutboundEmail {
        to: contract.signer_email.clone(),
        subject,
        html,
        text,
    }
}

/// Pending-signature reminder email.
pub fn reminder_email(contract: &ContractRecord) -> OutboundEmail {
    let subject = format!("Reminder: \"{}\" is awaiting your signature", contract.title);
    let text = format!(
        "Hello {},\n\nThe contract \"{}\" is still awaiting your signature.\n",
        contract.signer_name, contract.title
    );
    let html = format!(
        "<p>Hello {},</p><p>The contract <strong>{}</strong> is still awaiting your signature.</p>",
        contract.signer_name, contract.title
    );
    OutboundEmail {
        to: contract.signer_email.clone(),
        subject,
        html,
        text,
    }
}

/// Finalization notice sent once both signatures are in place.
pub fn finalization_email(contract: &ContractRecord) -> OutboundEmail {
    let subject = format!("\"{}\" is fully signed", contract.title);
    let text = format!(
        "Hello {},\n\nThe contract \"{}\" has been signed by both parties and is now final.\n",
        contract.signer_name, contract.title
    );
    let html = format!(
        "<p>Hello {},</p><p>The contract <strong>{}</strong> has been signed by both parties and is now final.</p>",
        contract.signer_name, contract.title
    );
    OutboundEmail {
        to: contract.signer_email.clone(),
        subject,
        html,
        text,
    }
}

impl<S: WorkflowStore> NotificationScheduler<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn EmailSender>,
        ledger: Ledger<S>,
    ) -> Self {
        Self {
            store,
            clock,
            mailer,
            ledger,
        }
    }

    /// Create the three reminder rows at now+24h, now+72h, and now+7d.
    ///
    /// Idempotent: a contract that already has open reminders keeps them,
    /// so the saga tail of the internal-signature transition can be
    /// re-run safely. Returns how many rows were created.
    pub async fn schedule_reminders(&self, contract_id: &str) -> Result<usize, EngineError> {
        let existing = self.store.list_reminders(contract_id).await?;
        if existing.iter().any(|r| r.is_open()) {
            tracing::debug!(contract_id, "open reminders exist, scheduling skipped");
            return Ok(0);
        }

        let now = self.clock.now();
        let now_s = format_rfc3339(now);
        let rows: Vec<ReminderRecord> = ReminderOffset::ALL
            .iter()
            .map(|offset| ReminderRecord {
                id: uuid::Uuid::new_v4().to_string(),
                contract_id: contract_id.to_string(),
                offset: *offset,
                due_at: format_rfc3339(now + offset.duration()),
                sent: false,
                sent_at: None,
                cancelled: false,
                attempts: 0,
                created_at: now_s.clone(),
            })
            .collect();
        let created = rows.len();
        self.store.insert_reminders(rows).await?;
        tracing::info!(contract_id, created, "reminders scheduled");
        Ok(created)
    }

    /// Logically cancel every open reminder for the contract and record
    /// why. Returns how many were cancelled.
    pub async fn cancel_reminders(
        &self,
        contract_id: &str,
        reason: &str,
    ) -> Result<usize, EngineError> {
        let cancelled = self.store.cancel_open_reminders(contract_id).await?;
        if cancelled > 0 {
            self.ledger.record_event(
                contract_id,
                "reminders cancelled",
                AuditPayload::RemindersCancelled {
                    reason: reason.to_string(),
                    cancelled,
                },
                None,
                None,
            );
        }
        tracing::info!(contract_id, cancelled, reason, "reminders cancelled");
        Ok(cancelled)
    }

    /// Process every due, open reminder. Returns how many were sent.
    ///
    /// A reminder whose contract has left `PendingExternalSignature` is
    /// cancelled without sending. A failed send bumps the attempt counter
    /// and leaves the reminder due for the next sweep.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let now = self.clock.now_rfc3339();
        let due = self.store.due_reminders(&now).await?;
        let mut sent = 0;
        for reminder in due {
            let contract = match self.store.get_contract(&reminder.contract_id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(reminder_id = %reminder.id, error = %e, "reminder contract unreadable, skipping");
                    continue;
                }
            };
            if contract.status != ContractStatus::PendingExternalSignature {
                tracing::info!(
                    reminder_id = %reminder.id,
                    contract_id = %contract.id,
                    status = %contract.status,
                    "contract no longer pending, cancelling stale reminder"
                );
                self.store.cancel_reminder(&reminder.id).await?;
                continue;
            }

            match self.mailer.send(reminder_email(&contract)).await {
                Ok(_) => {
                    self.store
                        .mark_reminder_sent(&reminder.id, &self.clock.now_rfc3339())
                        .await?;
                    self.ledger.record_event(
                        &contract.id,
                        "reminder sent",
                        AuditPayload::ReminderSent {
                            offset: Some(reminder.offset),
                        },
                        None,
                        None,
                    );
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(reminder_id = %reminder.id, error = %e, "reminder send failed");
                    self.store.bump_reminder_attempts(&reminder.id).await?;
                }
            }
        }
        Ok(sent)
    }

    /// Operator-triggered out-of-band reminder. Requires the contract to
    /// currently await its external signature. Returns whether the email
    /// actually went out; a transport failure degrades to `false`.
    pub async fn send_manual_reminder(&self, contract_id: &str) -> Result<bool, EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        if contract.status != ContractStatus::PendingExternalSignature {
            return Err(EngineError::InvalidState {
                contract_id: contract_id.to_string(),
                expected: "pending_external_signature",
                found: contract.status,
            });
        }
        match self.mailer.send(reminder_email(&contract)).await {
            Ok(_) => {
                self.ledger.record_event(
                    contract_id,
                    "manual reminder sent",
                    AuditPayload::ReminderSent { offset: None },
                    None,
                    None,
                );
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(contract_id, error = %e, "manual reminder send failed");
                Ok(false)
            }
        }
    }

    /// Background worker sweeping due reminders on a fixed interval.
    pub fn spawn_worker(&self, interval: std::time::Duration) -> WorkerHandle {
        let this = self.clone();
        spawn_interval_worker("reminders", interval, move || {
            let this = this.clone();
            async move {
                if let Err(e) = this.sweep().await {
                    tracing::error!(error = %e, "reminder sweep failed");
                }
            }
        })
    }
}
