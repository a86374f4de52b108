//! The contract lifecycle state machine.
//!
//! `ContractWorkflow` orchestrates the other services. Status moves
//! forward only, through the storage compare-and-set, so two racing
//! transitions resolve to one winner and one conflict.
//!
//! The internal-signature transition is a saga: once the signature is
//! committed and the status advanced, the tail (token, invitation email,
//! reminders) may fail without rolling anything back. [`ContractWorkflow::reissue_token`]
//! is the single compensating action -- it can always be safely re-run
//! for a contract awaiting its external signature.

use std::sync::Arc;

use firma_storage::{
    format_rfc3339, AuditEntryRecord, AuditPayload, CertificateMetadata, ContractRecord,
    ContractStatus, SignatureRecord, SignerRole, TokenRecord, WorkflowStore,
};

use crate::adapter::EmailSender;
use crate::clock::Clock;
use crate::docjob::DocumentJobProcessor;
use crate::error::EngineError;
use crate::ledger::{report::ComplianceReport, ClientContext, Ledger};
use crate::notify::{finalization_email, invitation_email, NotificationScheduler};
use crate::token::TokenService;

/// Input for [`ContractWorkflow::create_contract`].
#[derive(Debug, Clone)]
pub struct NewContract {
    pub title: String,
    pub body: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_national_id: String,
}

/// The company-side signer applying the qualified signature.
#[derive(Debug, Clone)]
pub struct InternalSigner {
    pub name: String,
    pub email: String,
    pub certificate: CertificateMetadata,
}

pub struct ContractWorkflow<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn EmailSender>,
    ledger: Ledger<S>,
    tokens: TokenService<S>,
    jobs: DocumentJobProcessor<S>,
    notify: NotificationScheduler<S>,
}

impl<S> Clone for ContractWorkflow<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            mailer: Arc::clone(&self.mailer),
            ledger: self.ledger.clone(),
            tokens: self.tokens.clone(),
            jobs: self.jobs.clone(),
            notify: self.notify.clone(),
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_new_contract(input: &NewContract) -> Result<(), EngineError> {
    require_non_empty("title", &input.title)?;
    require_non_empty("body", &input.body)?;
    require_non_empty("signer_name", &input.signer_name)?;
    require_non_empty("signer_email", &input.signer_email)?;
    require_non_empty("signer_national_id", &input.signer_national_id)?;
    if !input.signer_email.contains('@') {
        return Err(EngineError::Validation {
            field: "signer_email",
            message: format!("'{}' is not an email address", input.signer_email),
        });
    }
    Ok(())
}

impl<S: WorkflowStore> ContractWorkflow<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn EmailSender>,
        ledger: Ledger<S>,
        tokens: TokenService<S>,
        jobs: DocumentJobProcessor<S>,
        notify: NotificationScheduler<S>,
    ) -> Self {
        Self {
            store,
            clock,
            mailer,
            ledger,
            tokens,
            jobs,
            notify,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────

    /// Create a contract awaiting its internal signature, and queue the
    /// first document job.
    pub async fn create_contract(
        &self,
        input: NewContract,
        actor_id: Option<String>,
    ) -> Result<ContractRecord, EngineError> {
        validate_new_contract(&input)?;

        let contract = ContractRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title,
            body: input.body,
            signer_name: input.signer_name,
            signer_email: input.signer_email,
            signer_national_id: input.signer_national_id,
            status: ContractStatus::PendingInternalSignature,
            created_at: self.clock.now_rfc3339(),
            finalized_at: None,
            document_url: None,
            document_sha256: None,
        };
        self.store.insert_contract(contract.clone()).await?;

        self.ledger.record_event(
            &contract.id,
            "contract created",
            AuditPayload::ContractCreated {
                title: contract.title.clone(),
            },
            actor_id,
            None,
        );
        self.jobs.enqueue(&contract.id).await?;
        tracing::info!(contract_id = %contract.id, "contract created");
        Ok(contract)
    }

    /// Apply the qualified internal signature and open the external
    /// signing window.
    ///
    /// Everything after the signature commit is the saga tail: a failed
    /// email or reminder write leaves the contract in
    /// `PendingExternalSignature`, recoverable via [`Self::reissue_token`].
    pub async fn apply_internal_signature(
        &self,
        contract_id: &str,
        signer: InternalSigner,
        client: ClientContext,
    ) -> Result<SignatureRecord, EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        if !matches!(
            contract.status,
            ContractStatus::Draft | ContractStatus::PendingInternalSignature
        ) {
            return Err(EngineError::InvalidState {
                contract_id: contract_id.to_string(),
                expected: "draft or pending_internal_signature",
                found: contract.status,
            });
        }
        if self
            .store
            .find_signature(contract_id, SignerRole::InternalQualified)
            .await?
            .is_some()
        {
            return Err(EngineError::SignatureExists {
                contract_id: contract_id.to_string(),
                role: SignerRole::InternalQualified,
            });
        }

        let signature = SignatureRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            role: SignerRole::InternalQualified,
            signer_name: signer.name.clone(),
            signer_email: signer.email.clone(),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            signed_at: self.clock.now_rfc3339(),
            certificate: Some(signer.certificate.clone()),
        };
        self.store.insert_signature(signature.clone()).await?;

        self.ledger
            .record_evidence(
                contract_id,
                firma_storage::EvidencePayload::Signature {
                    role: SignerRole::InternalQualified,
                    signer_name: signer.name,
                    signer_email: signer.email.clone(),
                    ip: client.ip.clone(),
                    user_agent: client.user_agent.clone(),
                    certificate: Some(signer.certificate),
                },
            )
            .await?;
        self.ledger.record_event(
            contract_id,
            "internal signature applied",
            AuditPayload::SignatureApplied {
                role: SignerRole::InternalQualified,
                signer_email: signer.email,
            },
            None,
            Some(client.clone()),
        );

        self.advance(
            &contract,
            contract.status,
            ContractStatus::PendingExternalSignature,
            None,
        )
        .await?;

        // Saga tail. Token issuance is idempotent (issue supersedes), so
        // any failure from here on is recovered by `reissue_token`.
        self.issue_and_invite(&contract).await?;
        self.notify.schedule_reminders(contract_id).await?;

        tracing::info!(contract_id, "internal signature applied");
        Ok(signature)
    }

    /// Re-issue the verification token and re-send the invitation for a
    /// contract stuck in `PendingExternalSignature`. The previous code
    /// stops working.
    pub async fn reissue_token(&self, contract_id: &str) -> Result<TokenRecord, EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        if contract.status != ContractStatus::PendingExternalSignature {
            return Err(EngineError::InvalidState {
                contract_id: contract_id.to_string(),
                expected: "pending_external_signature",
                found: contract.status,
            });
        }
        self.issue_and_invite(&contract).await
    }

    async fn issue_and_invite(
        &self,
        contract: &ContractRecord,
    ) -> Result<TokenRecord, EngineError> {
        let token = self.tokens.issue(&contract.id, &contract.signer_email).await?;
        if let Err(e) = self.mailer.send(invitation_email(contract, &token.code)).await {
            tracing::warn!(contract_id = %contract.id, error = %e, "invitation email failed");
        }
        Ok(token)
    }

    /// Redeem the signer's token, apply the external signature, and
    /// finalize the contract.
    ///
    /// A token refusal surfaces as `EngineError::Token` with the specific
    /// reason and leaves no partial signature behind.
    pub async fn validate_and_sign_external(
        &self,
        contract_id: &str,
        code: &str,
        client: ClientContext,
    ) -> Result<ContractRecord, EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        if contract.status != ContractStatus::PendingExternalSignature {
            self.ledger
                .record_access_attempt(contract_id, "signing-page", false, Some(client));
            return Err(EngineError::InvalidState {
                contract_id: contract_id.to_string(),
                expected: "pending_external_signature",
                found: contract.status,
            });
        }
        if self
            .store
            .find_signature(contract_id, SignerRole::ExternalSimple)
            .await?
            .is_some()
        {
            return Err(EngineError::SignatureExists {
                contract_id: contract_id.to_string(),
                role: SignerRole::ExternalSimple,
            });
        }

        // Checked before any signature write; the refusal reason reaches
        // the caller untouched.
        self.tokens.validate(contract_id, code, &client).await?;

        let signature = SignatureRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            role: SignerRole::ExternalSimple,
            signer_name: contract.signer_name.clone(),
            signer_email: contract.signer_email.clone(),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            signed_at: self.clock.now_rfc3339(),
            certificate: None,
        };
        self.store.insert_signature(signature).await?;

        self.ledger
            .record_evidence(
                contract_id,
                firma_storage::EvidencePayload::Signature {
                    role: SignerRole::ExternalSimple,
                    signer_name: contract.signer_name.clone(),
                    signer_email: contract.signer_email.clone(),
                    ip: client.ip.clone(),
                    user_agent: client.user_agent.clone(),
                    certificate: None,
                },
            )
            .await?;
        self.ledger.record_event(
            contract_id,
            "external signature applied",
            AuditPayload::SignatureApplied {
                role: SignerRole::ExternalSimple,
                signer_email: contract.signer_email.clone(),
            },
            None,
            Some(client.clone()),
        );

        let finalized_at = format_rfc3339(self.clock.now());
        self.advance(
            &contract,
            ContractStatus::PendingExternalSignature,
            ContractStatus::Finalized,
            Some(&finalized_at),
        )
        .await?;

        self.notify
            .cancel_reminders(contract_id, "contract finalized")
            .await?;

        // The stored document predates the external signature; regenerate
        // the canonical one. A render failure here is recoverable by hand
        // and must not unwind an already-final contract.
        if let Err(e) = self.jobs.regenerate(contract_id).await {
            tracing::error!(contract_id, error = %e, "finalization document regeneration failed");
        }

        let finalized = self.store.get_contract(contract_id).await?;
        if let Err(e) = self.mailer.send(finalization_email(&finalized)).await {
            tracing::warn!(contract_id, error = %e, "finalization email failed");
        }

        tracing::info!(contract_id, "contract finalized");
        Ok(finalized)
    }

    async fn advance(
        &self,
        contract: &ContractRecord,
        expected: ContractStatus,
        to: ContractStatus,
        finalized_at: Option<&str>,
    ) -> Result<(), EngineError> {
        self.store
            .advance_status(&contract.id, expected, to, finalized_at)
            .await?;
        self.ledger.record_event(
            &contract.id,
            "status changed",
            AuditPayload::StatusChanged { from: expected, to },
            None,
            None,
        );
        Ok(())
    }

    // ── Read side ───────────────────────────────────────────────────────

    pub async fn contract(&self, contract_id: &str) -> Result<ContractRecord, EngineError> {
        Ok(self.store.get_contract(contract_id).await?)
    }

    pub async fn signatures(
        &self,
        contract_id: &str,
    ) -> Result<Vec<SignatureRecord>, EngineError> {
        Ok(self.store.list_signatures(contract_id).await?)
    }

    pub async fn audit_trail(
        &self,
        contract_id: &str,
    ) -> Result<Vec<AuditEntryRecord>, EngineError> {
        self.ledger.flush().await;
        self.ledger.audit_trail(contract_id).await
    }

    /// Flushes pending audit events first, so the report sees everything
    /// recorded before this call.
    pub async fn compliance_report(
        &self,
        contract_id: &str,
    ) -> Result<ComplianceReport, EngineError> {
        self.ledger.flush().await;
        self.ledger.build_report(contract_id).await
    }
}
