//! Contract e-signature workflow engine -- drives a contract from
//! creation through dual electronic signature to finalization, building
//! a tamper-evident audit trail and asynchronously producing a
//! hash-verified canonical document.
//!
//! The engine is a library consumed by a host application. Its boundary
//! is the set of collaborator traits in [`adapter`] plus the
//! [`firma_storage::WorkflowStore`] persistence trait; it exposes no wire
//! protocol of its own.

pub mod adapter;
pub mod clock;
pub mod docjob;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod token;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use docjob::DocumentJobProcessor;
pub use error::EngineError;
pub use ledger::report::{ComplianceReport, RECOGNIZED_ISSUERS};
pub use ledger::{sha256_hex, AuditOutbox, ClientContext, Ledger};
pub use lifecycle::{ContractWorkflow, InternalSigner, NewContract};
pub use notify::NotificationScheduler;
pub use token::TokenService;
pub use worker::WorkerHandle;

use std::sync::Arc;

use adapter::{BlobStore, ClientInfoResolver, DocumentRenderer, EmailSender};
use firma_storage::WorkflowStore;
use tokio::task::JoinHandle;

/// Fully assembled engine: the workflow facade plus every service it
/// orchestrates, sharing one store, clock, and audit outbox.
pub struct Engine<S> {
    pub workflow: ContractWorkflow<S>,
    pub tokens: TokenService<S>,
    pub jobs: DocumentJobProcessor<S>,
    pub notify: NotificationScheduler<S>,
    pub ledger: Ledger<S>,
    pub outbox: AuditOutbox,
    outbox_task: JoinHandle<()>,
}

impl<S: WorkflowStore> Engine<S> {
    /// Wire every service against one store and one set of collaborators.
    pub fn assemble(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn EmailSender>,
        renderer: Arc<dyn DocumentRenderer>,
        blobs: Arc<dyn BlobStore>,
        client_info: Arc<dyn ClientInfoResolver>,
    ) -> Self {
        let (outbox, outbox_task) =
            AuditOutbox::spawn(Arc::clone(&store), Arc::clone(&clock), client_info);
        let ledger = Ledger::new(Arc::clone(&store), Arc::clone(&clock), outbox.clone());
        let tokens = TokenService::new(Arc::clone(&store), Arc::clone(&clock), ledger.clone());
        let jobs = DocumentJobProcessor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            renderer,
            blobs,
            ledger.clone(),
        );
        let notify = NotificationScheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&mailer),
            ledger.clone(),
        );
        let workflow = ContractWorkflow::new(
            store,
            clock,
            mailer,
            ledger.clone(),
            tokens.clone(),
            jobs.clone(),
            notify.clone(),
        );
        Self {
            workflow,
            tokens,
            jobs,
            notify,
            ledger,
            outbox,
            outbox_task,
        }
    }

    /// Spawn the two background workers with their default intervals.
    pub fn spawn_workers(&self) -> (WorkerHandle, WorkerHandle) {
        (
            self.jobs.spawn_worker(docjob::POLL_INTERVAL),
            self.notify.spawn_worker(notify::SWEEP_INTERVAL),
        )
    }

    /// Drain pending audit events and stop the outbox writer. The engine
    /// is unusable afterwards.
    pub async fn shutdown(self) {
        self.outbox.flush().await;
        let Engine {
            workflow,
            tokens,
            jobs,
            notify,
            ledger,
            outbox,
            outbox_task,
        } = self;
        // Every outbox clone must drop for the writer's channel to close.
        drop((workflow, tokens, jobs, notify, ledger, outbox));
        if let Err(e) = outbox_task.await {
            tracing::error!(error = %e, "audit outbox task panicked");
        }
    }
}
