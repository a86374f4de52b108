//! End-to-end workflow tests: creation, dual signature, finalization,
//! document jobs, reminders, and the compliance report, all against the
//! in-memory store with a manual clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use firma_engine::adapter::{
    BlobStore, ClientInfoResolver, ContractSnapshot, DocumentRenderer, EmailSender,
    MemoryBlobStore, RecordingMailer, RenderError, StaticResolver, TextRenderer,
};
use firma_engine::{
    Clock, ClientContext, ContractWorkflow, Engine, EngineError, InternalSigner, ManualClock,
    NewContract,
};
use firma_storage::{
    CertificateMetadata, ContractStatus, JobStatus, MemoryStore, SignerRole, TokenRefusal,
    WorkflowStore,
};
use time::macros::datetime;
use time::Duration;

/// Fails the first `failures` renders, then delegates to the text
/// renderer.
struct FlakyRenderer {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyRenderer {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRenderer for FlakyRenderer {
    async fn render(&self, snapshot: &ContractSnapshot) -> Result<Vec<u8>, RenderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(RenderError::Failed("renderer offline".to_string()));
        }
        TextRenderer.render(snapshot).await
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    mailer: RecordingMailer,
    blobs: Arc<MemoryBlobStore>,
    engine: Engine<MemoryStore>,
}

fn fixture_with_renderer(renderer: Arc<dyn DocumentRenderer>) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(datetime!(2026-03-01 09:00:00 UTC)));
    let mailer = RecordingMailer::new();
    let blobs = Arc::new(MemoryBlobStore::new());
    let engine = Engine::assemble(
        Arc::clone(&store),
        clock.clone() as Arc<dyn Clock>,
        Arc::new(mailer.clone()) as Arc<dyn EmailSender>,
        renderer,
        blobs.clone() as Arc<dyn BlobStore>,
        Arc::new(StaticResolver::localhost()) as Arc<dyn ClientInfoResolver>,
    );
    Fixture {
        store,
        clock,
        mailer,
        blobs,
        engine,
    }
}

fn fixture() -> Fixture {
    fixture_with_renderer(Arc::new(TextRenderer))
}

fn new_contract() -> NewContract {
    NewContract {
        title: "Supply agreement".to_string(),
        body: "Between the company and {{signer_name}} ({{signer_national_id}}).".to_string(),
        signer_name: "Alex Doe".to_string(),
        signer_email: "alex@example.com".to_string(),
        signer_national_id: "00000000A".to_string(),
    }
}

fn internal_signer() -> InternalSigner {
    InternalSigner {
        name: "Carmen Rep".to_string(),
        email: "carmen@corp.example".to_string(),
        certificate: CertificateMetadata {
            issuer: "CN=AC FNMT Usuarios, O=FNMT-RCM".to_string(),
            subject: "CN=Carmen Rep".to_string(),
            valid_from: "2025-01-01T00:00:00Z".to_string(),
            valid_to: "2028-01-01T00:00:00Z".to_string(),
            thumbprint: "3f:9a".to_string(),
        },
    }
}

fn signer_client() -> ClientContext {
    ClientContext {
        ip: "203.0.113.9".to_string(),
        user_agent: "signer-browser/2".to_string(),
    }
}

/// Pull the 6-digit verification code out of the latest invitation email.
fn code_from_invitation(mailer: &RecordingMailer) -> String {
    let email = mailer
        .sent()
        .into_iter()
        .filter(|e| e.subject.starts_with("Signature requested"))
        .next_back()
        .expect("invitation email sent");
    let code: String = email
        .text
        .split("code is ")
        .nth(1)
        .expect("code in invitation body")
        .chars()
        .take(6)
        .collect();
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    code
}

/// Drive a contract up to `PendingExternalSignature` and return (id, code).
async fn up_to_external(workflow: &ContractWorkflow<MemoryStore>, mailer: &RecordingMailer) -> (String, String) {
    let contract = workflow.create_contract(new_contract(), Some("ops-1".to_string())).await.unwrap();
    workflow
        .apply_internal_signature(&contract.id, internal_signer(), ClientContext::internal())
        .await
        .unwrap();
    let code = code_from_invitation(mailer);
    (contract.id, code)
}

#[tokio::test]
async fn internal_signature_issues_token_invitation_and_reminders() {
    let f = fixture();
    let contract = f
        .engine
        .workflow
        .create_contract(new_contract(), None)
        .await
        .unwrap();
    assert_eq!(contract.status, ContractStatus::PendingInternalSignature);

    f.engine
        .workflow
        .apply_internal_signature(&contract.id, internal_signer(), ClientContext::internal())
        .await
        .unwrap();

    let stored = f.store.get_contract(&contract.id).await.unwrap();
    assert_eq!(stored.status, ContractStatus::PendingExternalSignature);

    let invitations = f.mailer.sent();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].to, "alex@example.com");
    let code = code_from_invitation(&f.mailer);
    assert_eq!(code.len(), 6);

    let reminders = f.store.list_reminders(&contract.id).await.unwrap();
    assert_eq!(reminders.len(), 3);
    assert!(reminders.iter().all(|r| r.is_open()));
}

#[tokio::test]
async fn token_is_single_use_through_the_signing_flow() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;

    f.engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap();

    // A second redemption of the same code fails; the contract being
    // finalized is detected even before the token is consulted.
    let err = f
        .engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { .. }));

    let err = f.engine.tokens.validate(&id, &code, &signer_client()).await.unwrap_err();
    assert_eq!(err.token_refusal(), Some(TokenRefusal::AlreadyUsed));
}

#[tokio::test]
async fn token_expires_after_24_hours() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;

    f.clock.advance(Duration::hours(25));
    let err = f
        .engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap_err();
    assert_eq!(err.token_refusal(), Some(TokenRefusal::Expired));

    // No partial signature, no status change.
    let contract = f.store.get_contract(&id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::PendingExternalSignature);
    assert!(f
        .store
        .find_signature(&id, SignerRole::ExternalSimple)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn reissue_supersedes_the_invited_code() {
    let f = fixture();
    let (id, old_code) = up_to_external(&f.engine.workflow, &f.mailer).await;

    let token = f.engine.workflow.reissue_token(&id).await.unwrap();
    assert_eq!(f.mailer.sent().len(), 2);

    if old_code != token.code {
        let err = f.engine.tokens.validate(&id, &old_code, &signer_client()).await.unwrap_err();
        assert_eq!(err.token_refusal(), Some(TokenRefusal::AlreadyUsed));
    }
    f.engine
        .workflow
        .validate_and_sign_external(&id, &token.code, signer_client())
        .await
        .unwrap();
}

#[tokio::test]
async fn finalization_cancels_reminders_and_regenerates_the_document() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;

    // First document, produced by the queued job before finalization.
    f.engine.jobs.process_due().await.unwrap();
    let before = f.store.get_contract(&id).await.unwrap();
    let first_sha = before.document_sha256.clone().expect("initial document");

    let finalized = f
        .engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap();
    assert_eq!(finalized.status, ContractStatus::Finalized);
    assert!(finalized.finalized_at.is_some());

    let signatures = f.store.list_signatures(&id).await.unwrap();
    assert_eq!(signatures.len(), 2);
    assert!(signatures.iter().any(|s| s.role == SignerRole::InternalQualified));
    assert!(signatures.iter().any(|s| s.role == SignerRole::ExternalSimple));

    let reminders = f.store.list_reminders(&id).await.unwrap();
    assert_eq!(reminders.len(), 3);
    assert!(reminders.iter().all(|r| r.cancelled));

    // Regeneration replaced the pre-finalization document.
    let after_sha = finalized.document_sha256.expect("final document");
    assert_ne!(after_sha, first_sha);

    // Finalization notice went out after the invitation.
    let sent = f.mailer.sent();
    assert!(sent.iter().any(|e| e.subject.contains("fully signed")));

    // A reminder sweep far in the future sends nothing.
    f.clock.advance(Duration::days(30));
    assert_eq!(f.engine.notify.sweep().await.unwrap(), 0);
    assert_eq!(
        f.mailer
            .sent()
            .iter()
            .filter(|e| e.subject.contains("Reminder"))
            .count(),
        0
    );
}

#[tokio::test]
async fn finalized_contracts_never_move_backwards() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;
    f.engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap();

    let err = f
        .store
        .advance_status(
            &id,
            ContractStatus::Finalized,
            ContractStatus::PendingExternalSignature,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        firma_storage::StorageError::BackwardTransition { .. }
    ));
    assert_eq!(
        f.store.get_contract(&id).await.unwrap().status,
        ContractStatus::Finalized
    );
}

#[tokio::test]
async fn job_processor_never_rerenders_an_existing_document() {
    let renderer = FlakyRenderer::new(0);
    let f = fixture_with_renderer(renderer.clone());
    let contract = f
        .engine
        .workflow
        .create_contract(new_contract(), None)
        .await
        .unwrap();

    f.engine.jobs.process_due().await.unwrap();
    assert_eq!(renderer.calls(), 1);

    // A second job for the same contract short-circuits to the stored
    // reference.
    f.engine.jobs.enqueue(&contract.id).await.unwrap();
    f.engine.jobs.process_due().await.unwrap();
    assert_eq!(renderer.calls(), 1);

    let jobs = f.store.list_jobs(&contract.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert_eq!(jobs[0].document_sha256, jobs[1].document_sha256);
}

#[tokio::test]
async fn flaky_renderer_completes_on_the_third_attempt() {
    let renderer = FlakyRenderer::new(2);
    let f = fixture_with_renderer(renderer.clone());
    let contract = f
        .engine
        .workflow
        .create_contract(new_contract(), None)
        .await
        .unwrap();

    for _ in 0..3 {
        f.engine.jobs.process_due().await.unwrap();
        f.clock.advance(Duration::seconds(31));
    }

    assert_eq!(renderer.calls(), 3);
    let jobs = f.store.list_jobs(&contract.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].attempts, 3);
    assert!(jobs[0].document_sha256.is_some());
    assert!(f.blobs.object_count() > 0);
}

#[tokio::test]
async fn broken_renderer_exhausts_the_job_and_leaves_the_contract_untouched() {
    let renderer = FlakyRenderer::new(usize::MAX);
    let f = fixture_with_renderer(renderer.clone());
    let contract = f
        .engine
        .workflow
        .create_contract(new_contract(), None)
        .await
        .unwrap();

    for _ in 0..4 {
        f.engine.jobs.process_due().await.unwrap();
        f.clock.advance(Duration::seconds(31));
    }

    assert_eq!(renderer.calls(), 3);
    let jobs = f.store.list_jobs(&contract.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Error);
    assert!(jobs[0].error.as_deref().unwrap().contains("renderer offline"));

    let stored = f.store.get_contract(&contract.id).await.unwrap();
    assert!(stored.document_url.is_none());
    assert!(stored.document_sha256.is_none());
}

#[tokio::test]
async fn audit_trail_replays_the_whole_story_in_order() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;
    f.clock.advance(Duration::minutes(5));
    f.engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap();

    let trail = f.engine.workflow.audit_trail(&id).await.unwrap();
    assert!(trail.len() >= 6);
    for pair in trail.windows(2) {
        assert!(pair[0].occurred_at <= pair[1].occurred_at);
    }
    let kinds: Vec<String> = trail.iter().map(|e| e.kind.to_string()).collect();
    assert!(kinds.contains(&"contract_created".to_string()));
    assert!(kinds.contains(&"token_issued".to_string()));
    assert!(kinds.contains(&"token_validated".to_string()));
    assert!(kinds.contains(&"document_generated".to_string()));
    assert!(kinds.contains(&"reminders_cancelled".to_string()));
}

#[tokio::test]
async fn fully_signed_contract_is_legally_valid() {
    let f = fixture();
    let (id, code) = up_to_external(&f.engine.workflow, &f.mailer).await;
    f.engine
        .workflow
        .validate_and_sign_external(&id, &code, signer_client())
        .await
        .unwrap();

    let report = f.engine.workflow.compliance_report(&id).await.unwrap();
    assert!(report.finalized);
    assert!(report.evidence_complete);
    assert!(report.timestamps_valid);
    assert!(report.qualified_certificate_present);
    assert!(report.integrity_evidence_present);
    assert!(report.legally_valid());
    assert_eq!(report.signature_count, 2);
}

#[tokio::test]
async fn unfinalized_contract_is_not_legally_valid() {
    let f = fixture();
    let (id, _code) = up_to_external(&f.engine.workflow, &f.mailer).await;
    f.engine.jobs.process_due().await.unwrap();

    let report = f.engine.workflow.compliance_report(&id).await.unwrap();
    assert!(!report.finalized);
    assert!(!report.legally_valid());
    // The qualified signature is already evidenced even before
    // finalization.
    assert!(report.qualified_certificate_present);
}

#[tokio::test]
async fn engine_shutdown_drains_the_outbox() {
    let f = fixture();
    let contract = f
        .engine
        .workflow
        .create_contract(new_contract(), None)
        .await
        .unwrap();
    let store = Arc::clone(&f.store);
    f.engine.shutdown().await;

    let trail = store.list_audit(&contract.id).await.unwrap();
    assert!(trail.iter().any(|e| e.kind.to_string() == "contract_created"));
}
