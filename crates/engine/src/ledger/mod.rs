//! Audit & evidence ledger.
//!
//! The ledger observes every workflow transition; it never drives one.
//! Two write paths with different contracts:
//!
//! - `AuditOutbox::record` is fire-and-forget: events go through a bounded
//!   channel to a dedicated writer task that collects the technical
//!   evidence bundle and appends the entry. A full channel or a failed
//!   write is logged and swallowed -- an audit problem must never fail or
//!   roll back the operation that triggered it.
//! - `Ledger::record_evidence` is a plain fallible write: legal-evidence
//!   records are load-bearing, so the caller sees the error.

pub mod report;

use std::sync::Arc;

use firma_storage::{
    AuditEntryRecord, AuditPayload, ClientEvidence, EvidencePayload, EvidenceRecordRow,
    WorkflowStore,
};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::adapter::ClientInfoResolver;
use crate::clock::Clock;
use crate::error::EngineError;

/// Default bound of the audit outbox channel.
pub const OUTBOX_CAPACITY: usize = 256;

/// SHA-256 hex digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        use std::fmt::Write as _;
        let _ = write!(s, "{:02x}", b);
        s
    })
}

/// Caller-side client context attached to an event when the caller knows
/// it (e.g. the external signer's request). Absent for internal events;
/// the writer task then resolves a best-effort IP.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn internal() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            user_agent: "firma-engine/internal".to_string(),
        }
    }
}

enum OutboxMsg {
    Event {
        contract_id: String,
        description: String,
        payload: AuditPayload,
        actor_id: Option<String>,
        client: Option<ClientContext>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone; every service holds
/// one.
#[derive(Clone)]
pub struct AuditOutbox {
    tx: mpsc::Sender<OutboxMsg>,
}

impl AuditOutbox {
    /// Spawn the writer task and return its handle plus join handle.
    ///
    /// Dropping every `AuditOutbox` clone closes the channel; the task
    /// drains remaining events and exits.
    pub fn spawn<S: WorkflowStore>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        client_info: Arc<dyn ClientInfoResolver>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OutboxMsg>(OUTBOX_CAPACITY);
        let join = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    OutboxMsg::Event {
                        contract_id,
                        description,
                        payload,
                        actor_id,
                        client,
                    } => {
                        let entry = build_entry(
                            &*clock,
                            &*client_info,
                            contract_id,
                            description,
                            payload,
                            actor_id,
                            client,
                        )
                        .await;
                        if let Err(e) = store.append_audit(entry).await {
                            tracing::warn!(error = %e, "audit write failed, event dropped");
                        }
                    }
                    OutboxMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            tracing::debug!("audit outbox drained");
        });
        (Self { tx }, join)
    }

    /// Enqueue an audit event. Never blocks and never fails the caller:
    /// a full or closed channel drops the event with a warning.
    pub fn record(
        &self,
        contract_id: &str,
        description: &str,
        payload: AuditPayload,
        actor_id: Option<String>,
        client: Option<ClientContext>,
    ) {
        let msg = OutboxMsg::Event {
            contract_id: contract_id.to_string(),
            description: description.to_string(),
            payload,
            actor_id,
            client,
        };
        if let Err(e) = self.tx.try_send(msg) {
            tracing::warn!(error = %e, "audit outbox full or closed, event dropped");
        }
    }

    /// Wait until every event enqueued before this call has been written.
    /// Test and shutdown hook.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(OutboxMsg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn build_entry(
    clock: &dyn Clock,
    client_info: &dyn ClientInfoResolver,
    contract_id: String,
    description: String,
    payload: AuditPayload,
    actor_id: Option<String>,
    client: Option<ClientContext>,
) -> AuditEntryRecord {
    let now = clock.now_rfc3339();
    let (ip, user_agent) = match client {
        Some(c) => (c.ip, c.user_agent),
        None => (
            client_info.resolve_ip().await,
            "firma-engine/internal".to_string(),
        ),
    };
    let geolocation = client_info.resolve_geolocation().await;
    AuditEntryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        contract_id,
        kind: payload.kind(),
        description,
        payload,
        evidence: ClientEvidence {
            ip,
            user_agent,
            timestamp: now.clone(),
            timezone: client_info.timezone(),
            geolocation,
        },
        actor_id,
        occurred_at: now,
    }
}

/// Evidence and report side of the ledger.
pub struct Ledger<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    outbox: AuditOutbox,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            outbox: self.outbox.clone(),
        }
    }
}

impl<S: WorkflowStore> Ledger<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, outbox: AuditOutbox) -> Self {
        Self {
            store,
            clock,
            outbox,
        }
    }

    /// Fire-and-forget audit event. See [`AuditOutbox::record`].
    pub fn record_event(
        &self,
        contract_id: &str,
        description: &str,
        payload: AuditPayload,
        actor_id: Option<String>,
        client: Option<ClientContext>,
    ) {
        self.outbox
            .record(contract_id, description, payload, actor_id, client);
    }

    /// Record an access attempt against a contract's resources.
    pub fn record_access_attempt(
        &self,
        contract_id: &str,
        resource: &str,
        granted: bool,
        client: Option<ClientContext>,
    ) {
        self.record_event(
            contract_id,
            "access attempt",
            AuditPayload::AccessAttempt {
                resource: resource.to_string(),
                granted,
            },
            None,
            client,
        );
    }

    /// Persist a hashed legal-evidence record and emit the matching audit
    /// event. Unlike audit events this is fallible: evidence carries the
    /// contract's legal validity.
    pub async fn record_evidence(
        &self,
        contract_id: &str,
        payload: EvidencePayload,
    ) -> Result<EvidenceRecordRow, EngineError> {
        let canonical = serde_json::to_vec(&payload)?;
        let content_sha256 = sha256_hex(&canonical);
        let row = EvidenceRecordRow {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            kind: payload.kind(),
            payload,
            content_sha256: content_sha256.clone(),
            collected_at: self.clock.now_rfc3339(),
            valid: true,
        };
        self.store.insert_evidence(row.clone()).await?;
        self.outbox.record(
            contract_id,
            "evidence collected",
            AuditPayload::EvidenceRecorded {
                evidence_id: row.id.clone(),
                evidence_kind: row.kind,
                content_sha256,
            },
            None,
            None,
        );
        Ok(row)
    }

    /// Wait for every already-enqueued audit event to land. See
    /// [`AuditOutbox::flush`].
    pub async fn flush(&self) {
        self.outbox.flush().await;
    }

    /// The contract's audit trail in replay order.
    pub async fn audit_trail(
        &self,
        contract_id: &str,
    ) -> Result<Vec<AuditEntryRecord>, EngineError> {
        Ok(self.store.list_audit(contract_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticResolver;
    use crate::clock::ManualClock;
    use firma_storage::{AuditKind, EvidenceKind, MemoryStore};
    use time::macros::datetime;

    fn fixture() -> (Arc<MemoryStore>, Ledger<MemoryStore>, AuditOutbox) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00:00 UTC)));
        let resolver: Arc<dyn ClientInfoResolver> = Arc::new(StaticResolver::localhost());
        let (outbox, _join) = AuditOutbox::spawn(Arc::clone(&store), clock.clone(), resolver);
        let ledger = Ledger::new(Arc::clone(&store), clock, outbox.clone());
        (store, ledger, outbox)
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn record_event_is_written_by_the_outbox_task() {
        let (store, ledger, outbox) = fixture();
        ledger.record_event(
            "c1",
            "contract created",
            AuditPayload::ContractCreated {
                title: "NDA".to_string(),
            },
            Some("user-1".to_string()),
            None,
        );
        outbox.flush().await;

        let entries = store.list_audit("c1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::ContractCreated);
        assert_eq!(entries[0].actor_id.as_deref(), Some("user-1"));
        assert_eq!(entries[0].evidence.ip, "127.0.0.1");
        assert_eq!(entries[0].occurred_at, "2026-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn caller_client_context_wins_over_resolver() {
        let (store, ledger, outbox) = fixture();
        ledger.record_access_attempt(
            "c1",
            "signing-page",
            true,
            Some(ClientContext {
                ip: "203.0.113.9".to_string(),
                user_agent: "browser/1".to_string(),
            }),
        );
        outbox.flush().await;

        let entries = store.list_audit("c1").await.unwrap();
        assert_eq!(entries[0].evidence.ip, "203.0.113.9");
        assert_eq!(entries[0].evidence.user_agent, "browser/1");
    }

    #[tokio::test]
    async fn record_evidence_hashes_payload_and_emits_audit_event() {
        let (store, ledger, outbox) = fixture();
        let row = ledger
            .record_evidence(
                "c1",
                EvidencePayload::Integrity {
                    sha256: "deadbeef".to_string(),
                    url: "mem://doc.pdf".to_string(),
                    generated_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(row.kind, EvidenceKind::Integrity);
        assert_eq!(row.content_sha256.len(), 64);
        assert!(row.valid);

        outbox.flush().await;
        let entries = store.list_audit("c1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::EvidenceRecorded);
    }

    #[tokio::test]
    async fn host_recorded_edit_counts_into_the_report() {
        let (store, ledger, outbox) = fixture();
        store
            .insert_contract(firma_storage::ContractRecord {
                id: "c1".to_string(),
                title: "NDA".to_string(),
                body: "Agreement.".to_string(),
                signer_name: "Alex Doe".to_string(),
                signer_email: "alex@example.com".to_string(),
                signer_national_id: "00000000A".to_string(),
                status: firma_storage::ContractStatus::Draft,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                finalized_at: None,
                document_url: None,
                document_sha256: None,
            })
            .await
            .unwrap();

        ledger.record_event(
            "c1",
            "draft body amended",
            AuditPayload::ContractUpdated {
                fields: vec!["body".to_string()],
            },
            Some("user-1".to_string()),
            None,
        );
        outbox.flush().await;

        let report = ledger.build_report("c1").await.unwrap();
        assert_eq!(report.edit_count, 1);
        assert_eq!(report.events_by_kind.get("contract_updated"), Some(&1));
    }
}
