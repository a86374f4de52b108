//! Asynchronous document jobs.
//!
//! A job produces the canonical signed document for one contract: render,
//! hash, upload, patch the contract's document reference. Workers claim
//! due jobs through the storage compare-and-set, which bumps the attempt
//! counter and sets a per-job lease, so one slow job never starves the
//! batch and a crashed worker's claims become reclaimable when the lease
//! runs out.

use std::sync::Arc;

use firma_storage::{
    format_rfc3339, AuditPayload, ContractRecord, DocumentJobRecord, EvidencePayload, JobStatus,
    WorkflowStore,
};
use time::Duration;

use crate::adapter::{BlobStore, ContractSnapshot, DocumentRenderer};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::ledger::{sha256_hex, Ledger};
use crate::worker::{spawn_interval_worker, WorkerHandle};

/// Jobs claimed per poll.
pub const BATCH_SIZE: usize = 5;

/// Default poll interval for the background worker.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// How long a claim lease lasts before another worker may reclaim the job.
pub const CLAIM_LEASE: Duration = Duration::minutes(5);

/// Minimum delay before a failed job may be claimed again.
pub const RETRY_DELAY: Duration = Duration::seconds(30);

pub struct DocumentJobProcessor<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn DocumentRenderer>,
    blobs: Arc<dyn BlobStore>,
    ledger: Ledger<S>,
}

impl<S> Clone for DocumentJobProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            renderer: Arc::clone(&self.renderer),
            blobs: Arc::clone(&self.blobs),
            ledger: self.ledger.clone(),
        }
    }
}

/// Result of producing one document.
struct ProducedDocument {
    url: String,
    sha256: String,
}

impl<S: WorkflowStore> DocumentJobProcessor<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn DocumentRenderer>,
        blobs: Arc<dyn BlobStore>,
        ledger: Ledger<S>,
    ) -> Self {
        Self {
            store,
            clock,
            renderer,
            blobs,
            ledger,
        }
    }

    /// Queue a document job unless the contract already has an active one.
    /// Returns whether a new job was created.
    pub async fn enqueue(&self, contract_id: &str) -> Result<bool, EngineError> {
        let now = self.clock.now_rfc3339();
        let job = DocumentJobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: DocumentJobRecord::DEFAULT_MAX_ATTEMPTS,
            error: None,
            document_url: None,
            document_sha256: None,
            created_at: now.clone(),
            updated_at: now,
            processed_at: None,
            lease_until: None,
        };
        let inserted = self.store.insert_job_if_none_active(job).await?;
        if inserted {
            tracing::info!(contract_id, "document job enqueued");
        } else {
            tracing::debug!(contract_id, "active document job exists, enqueue skipped");
        }
        Ok(inserted)
    }

    /// Claim and process up to [`BATCH_SIZE`] due jobs sequentially.
    /// Returns how many jobs were claimed.
    pub async fn process_due(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let lease_until = format_rfc3339(now + CLAIM_LEASE);
        let claimed = self
            .store
            .claim_due_jobs(BATCH_SIZE, &format_rfc3339(now), &lease_until)
            .await?;
        let count = claimed.len();
        for job in claimed {
            let job_id = job.id.clone();
            // A storage failure on one job must not strand the rest of
            // the claimed batch mid-lease; log it and move on. The
            // abandoned claim becomes reclaimable once its lease runs
            // out.
            if let Err(e) = self.process_one(job).await {
                tracing::error!(job_id = %job_id, error = %e, "document job pass failed");
            }
        }
        Ok(count)
    }

    /// Run one claimed job to a terminal write-back. Processing failures
    /// land on the job row; only storage failures propagate.
    async fn process_one(&self, mut job: DocumentJobRecord) -> Result<(), EngineError> {
        let contract = match self.store.get_contract(&job.contract_id).await {
            Ok(contract) => contract,
            Err(e) => {
                self.fail_job(&mut job, e.to_string()).await?;
                return Ok(());
            }
        };

        // Idempotency: a contract that already carries a document keeps
        // it; the job completes against the existing reference without a
        // second render.
        if let (Some(url), Some(sha256)) = (&contract.document_url, &contract.document_sha256) {
            tracing::debug!(job_id = %job.id, "document already present, short-circuiting");
            self.complete_job(&mut job, url.clone(), sha256.clone())
                .await?;
            return Ok(());
        }

        match self.produce(&contract, &job.id).await {
            Ok(doc) => {
                self.complete_job(&mut job, doc.url, doc.sha256).await?;
                Ok(())
            }
            Err(EngineError::Render(message)) => {
                self.fail_job(&mut job, message).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Render, hash, upload, and patch the contract's document reference.
    /// Falls back to a local object reference when the blob store is
    /// unreachable, and records which path was used.
    async fn produce(
        &self,
        contract: &ContractRecord,
        job_id: &str,
    ) -> Result<ProducedDocument, EngineError> {
        let signatures = self.store.list_signatures(&contract.id).await?;
        let snapshot = ContractSnapshot {
            contract: contract.clone(),
            signatures,
        };
        let bytes = self
            .renderer
            .render(&snapshot)
            .await
            .map_err(|e| EngineError::Render(e.to_string()))?;
        let sha256 = sha256_hex(&bytes);

        let name = format!("contracts/{}/{}.txt", contract.id, job_id);
        let (url, stored_locally) = match self.blobs.upload(&bytes, &name, "text/plain").await {
            Ok(url) => (url, false),
            Err(e) => {
                tracing::warn!(error = %e, "blob upload failed, keeping local reference");
                (format!("local://{name}"), true)
            }
        };

        self.store
            .set_document(&contract.id, &url, &sha256)
            .await?;

        let generated_at = self.clock.now_rfc3339();
        self.ledger
            .record_evidence(
                &contract.id,
                EvidencePayload::Integrity {
                    sha256: sha256.clone(),
                    url: url.clone(),
                    generated_at,
                },
            )
            .await?;
        self.ledger.record_event(
            &contract.id,
            "canonical document generated",
            AuditPayload::DocumentGenerated {
                sha256: sha256.clone(),
                url: url.clone(),
                stored_locally,
            },
            None,
            None,
        );
        tracing::info!(contract_id = %contract.id, %url, "document generated");
        Ok(ProducedDocument { url, sha256 })
    }

    async fn complete_job(
        &self,
        job: &mut DocumentJobRecord,
        url: String,
        sha256: String,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_rfc3339();
        job.status = JobStatus::Completed;
        job.error = None;
        job.document_url = Some(url);
        job.document_sha256 = Some(sha256);
        job.updated_at = now.clone();
        job.processed_at = Some(now);
        job.lease_until = None;
        self.store.update_job(job.clone()).await?;
        Ok(())
    }

    /// Attempts were already counted at claim time; this decides between
    /// requeue and terminal error.
    async fn fail_job(
        &self,
        job: &mut DocumentJobRecord,
        message: String,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        job.error = Some(message.clone());
        job.updated_at = format_rfc3339(now);
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Error;
            job.lease_until = None;
            tracing::error!(job_id = %job.id, attempts = job.attempts, %message, "document job exhausted");
        } else {
            job.status = JobStatus::Pending;
            job.lease_until = Some(format_rfc3339(now + RETRY_DELAY));
            tracing::warn!(job_id = %job.id, attempts = job.attempts, %message, "document job failed, requeued");
        }
        self.store.update_job(job.clone()).await?;
        Ok(())
    }

    /// Manual escape hatch for a terminally failed job: reset the attempt
    /// counter, clear the error, and requeue.
    pub async fn reprocess(&self, job_id: &str) -> Result<DocumentJobRecord, EngineError> {
        let mut job = self.store.get_job(job_id).await?;
        job.status = JobStatus::Pending;
        job.attempts = 0;
        job.error = None;
        job.lease_until = None;
        job.updated_at = self.clock.now_rfc3339();
        self.store.update_job(job.clone()).await?;
        tracing::info!(job_id, "document job reset for reprocessing");
        Ok(job)
    }

    /// Regenerate the document immediately, bypassing the queue and the
    /// idempotency short-circuit. Used at finalization, when the existing
    /// reference predates the external signature. Records a completed job
    /// row for traceability.
    pub async fn regenerate(&self, contract_id: &str) -> Result<(), EngineError> {
        let contract = self.store.get_contract(contract_id).await?;
        let job_id = uuid::Uuid::new_v4().to_string();
        let doc = self.produce(&contract, &job_id).await?;

        let now = self.clock.now_rfc3339();
        let job = DocumentJobRecord {
            id: job_id,
            contract_id: contract_id.to_string(),
            status: JobStatus::Completed,
            attempts: 1,
            max_attempts: DocumentJobRecord::DEFAULT_MAX_ATTEMPTS,
            error: None,
            document_url: Some(doc.url),
            document_sha256: Some(doc.sha256),
            created_at: now.clone(),
            updated_at: now.clone(),
            processed_at: Some(now),
            lease_until: None,
        };
        // An active queued job for this contract would now short-circuit
        // to the fresh reference anyway, so a skipped insert is harmless.
        let _ = self.store.insert_job_if_none_active(job).await?;
        Ok(())
    }

    /// Background worker polling `process_due` on a fixed interval.
    pub fn spawn_worker(&self, interval: std::time::Duration) -> WorkerHandle {
        let this = self.clone();
        spawn_interval_worker("document-jobs", interval, move || {
            let this = this.clone();
            async move {
                if let Err(e) = this.process_due().await {
                    tracing::error!(error = %e, "document job poll failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        ClientInfoResolver, MemoryBlobStore, RenderError, StaticResolver, TextRenderer,
    };
    use crate::clock::ManualClock;
    use crate::ledger::AuditOutbox;
    use async_trait::async_trait;
    use firma_storage::{ContractStatus, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    /// Fails the first `failures` renders, then delegates to the text
    /// renderer.
    struct FlakyRenderer {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyRenderer {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
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
        blobs: Arc<MemoryBlobStore>,
        jobs: DocumentJobProcessor<MemoryStore>,
    }

    fn fixture(renderer: Arc<dyn DocumentRenderer>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00:00 UTC)));
        let resolver: Arc<dyn ClientInfoResolver> = Arc::new(StaticResolver::localhost());
        let (outbox, _join) = AuditOutbox::spawn(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            resolver,
        );
        let ledger = Ledger::new(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            outbox,
        );
        let blobs = Arc::new(MemoryBlobStore::new());
        let jobs = DocumentJobProcessor::new(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            renderer,
            blobs.clone() as Arc<dyn BlobStore>,
            ledger,
        );
        Fixture {
            store,
            clock,
            blobs,
            jobs,
        }
    }

    async fn seed_contract(store: &MemoryStore, id: &str) {
        store
            .insert_contract(ContractRecord {
                id: id.to_string(),
                title: "NDA".to_string(),
                body: "Agreement with {{signer_name}}.".to_string(),
                signer_name: "Alex Doe".to_string(),
                signer_email: "alex@example.com".to_string(),
                signer_national_id: "00000000A".to_string(),
                status: ContractStatus::PendingInternalSignature,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                finalized_at: None,
                document_url: None,
                document_sha256: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_skips_when_a_job_is_active() {
        let f = fixture(Arc::new(TextRenderer));
        seed_contract(&f.store, "c1").await;
        assert!(f.jobs.enqueue("c1").await.unwrap());
        assert!(!f.jobs.enqueue("c1").await.unwrap());
    }

    #[tokio::test]
    async fn successful_job_writes_document_and_evidence() {
        let f = fixture(Arc::new(TextRenderer));
        seed_contract(&f.store, "c1").await;
        f.jobs.enqueue("c1").await.unwrap();

        assert_eq!(f.jobs.process_due().await.unwrap(), 1);

        let contract = f.store.get_contract("c1").await.unwrap();
        let sha = contract.document_sha256.expect("hash set");
        assert_eq!(sha.len(), 64);
        assert!(contract.document_url.unwrap().starts_with("mem://contracts/c1/"));

        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].attempts, 1);
        assert!(jobs[0].processed_at.is_some());

        let evidence = f.store.list_evidence("c1").await.unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].kind, firma_storage::EvidenceKind::Integrity);
    }

    #[tokio::test]
    async fn existing_document_short_circuits_without_rendering() {
        let renderer = Arc::new(FlakyRenderer::new(0));
        let f = fixture(renderer.clone());
        seed_contract(&f.store, "c1").await;
        f.store
            .set_document("c1", "mem://existing", "cafe".repeat(16).as_str())
            .await
            .unwrap();
        f.jobs.enqueue("c1").await.unwrap();

        f.jobs.process_due().await.unwrap();

        assert_eq!(renderer.calls(), 0);
        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].document_url.as_deref(), Some("mem://existing"));
    }

    #[tokio::test]
    async fn abandoned_claim_completes_after_lease_expiry() {
        let f = fixture(Arc::new(TextRenderer));
        seed_contract(&f.store, "c1").await;
        f.jobs.enqueue("c1").await.unwrap();

        // A worker claims the job and dies before writing back, leaving
        // the row processing under a live lease.
        let now = f.clock.now();
        let claimed = f
            .store
            .claim_due_jobs(
                BATCH_SIZE,
                &format_rfc3339(now),
                &format_rfc3339(now + CLAIM_LEASE),
            )
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        // Inside the lease the poll finds nothing.
        f.clock.advance(Duration::minutes(1));
        assert_eq!(f.jobs.process_due().await.unwrap(), 0);

        // Once the lease runs out the next poll reclaims and finishes it.
        f.clock.advance(Duration::hours(12));
        assert_eq!(f.jobs.process_due().await.unwrap(), 1);

        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].attempts, 2);
        let contract = f.store.get_contract("c1").await.unwrap();
        assert!(contract.document_url.is_some());
    }

    #[tokio::test]
    async fn two_failures_then_success_completes_with_three_attempts() {
        let renderer = Arc::new(FlakyRenderer::new(2));
        let f = fixture(renderer.clone());
        seed_contract(&f.store, "c1").await;
        f.jobs.enqueue("c1").await.unwrap();

        for _ in 0..3 {
            f.jobs.process_due().await.unwrap();
            // Past the retry delay for the next claim.
            f.clock.advance(Duration::seconds(31));
        }

        assert_eq!(renderer.calls(), 3);
        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].attempts, 3);
        assert!(jobs[0].document_sha256.is_some());
    }

    #[tokio::test]
    async fn exhausted_job_goes_terminal_and_stays_there() {
        let renderer = Arc::new(FlakyRenderer::new(usize::MAX));
        let f = fixture(renderer.clone());
        seed_contract(&f.store, "c1").await;
        f.jobs.enqueue("c1").await.unwrap();

        for _ in 0..4 {
            f.jobs.process_due().await.unwrap();
            f.clock.advance(Duration::seconds(31));
        }

        assert_eq!(renderer.calls(), 3);
        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Error);
        assert_eq!(jobs[0].attempts, 3);
        assert_eq!(jobs[0].error.as_deref(), Some("render failed: renderer offline"));

        let contract = f.store.get_contract("c1").await.unwrap();
        assert!(contract.document_url.is_none());
        assert!(contract.document_sha256.is_none());
    }

    #[tokio::test]
    async fn reprocess_resets_an_exhausted_job() {
        let renderer = Arc::new(FlakyRenderer::new(3));
        let f = fixture(renderer.clone());
        seed_contract(&f.store, "c1").await;
        f.jobs.enqueue("c1").await.unwrap();

        for _ in 0..3 {
            f.jobs.process_due().await.unwrap();
            f.clock.advance(Duration::seconds(31));
        }
        let job_id = f.store.list_jobs("c1").await.unwrap()[0].id.clone();
        assert_eq!(
            f.store.get_job(&job_id).await.unwrap().status,
            JobStatus::Error
        );

        let job = f.jobs.reprocess(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error.is_none());

        f.jobs.process_due().await.unwrap();
        assert_eq!(
            f.store.get_job(&job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn unreachable_blob_store_falls_back_to_local_reference() {
        let f = fixture(Arc::new(TextRenderer));
        seed_contract(&f.store, "c1").await;
        f.blobs.set_unreachable(true);
        f.jobs.enqueue("c1").await.unwrap();

        f.jobs.process_due().await.unwrap();

        let contract = f.store.get_contract("c1").await.unwrap();
        assert!(contract.document_url.unwrap().starts_with("local://contracts/c1/"));
        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn regenerate_renders_even_when_a_document_exists() {
        let renderer = Arc::new(FlakyRenderer::new(0));
        let f = fixture(renderer.clone());
        seed_contract(&f.store, "c1").await;
        f.store
            .set_document("c1", "mem://stale", "00".repeat(32).as_str())
            .await
            .unwrap();

        f.jobs.regenerate("c1").await.unwrap();

        assert_eq!(renderer.calls(), 1);
        let contract = f.store.get_contract("c1").await.unwrap();
        assert_ne!(contract.document_url.as_deref(), Some("mem://stale"));
        let jobs = f.store.list_jobs("c1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }
}
