//! Single-use verification tokens.
//!
//! Issuing supersedes every open token for the contract, so at most one
//! unexpired, unused token exists per contract at any time. Validation
//! checks existence, then prior use, then expiry, in that order, and only
//! then redeems the token through the storage compare-and-set: two
//! concurrent validations of the same code yield exactly one success and
//! one `already_used`.

use std::sync::Arc;

use firma_storage::{
    format_rfc3339, parse_rfc3339, AuditPayload, EvidencePayload, TokenRecord, TokenRefusal,
    WorkflowStore,
};
use rand::Rng;
use time::Duration;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::ledger::{ClientContext, Ledger};

/// Tokens expire this long after issuance.
pub const TOKEN_TTL: Duration = Duration::hours(24);

pub struct TokenService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ledger: Ledger<S>,
}

impl<S> Clone for TokenService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ledger: self.ledger.clone(),
        }
    }
}

fn random_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", n)
}

impl<S: WorkflowStore> TokenService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, ledger: Ledger<S>) -> Self {
        Self {
            store,
            clock,
            ledger,
        }
    }

    /// Issue a fresh token for the contract, superseding any open ones.
    ///
    /// Safe to re-invoke at any time for a contract awaiting its external
    /// signature: the previous code simply stops working.
    pub async fn issue(
        &self,
        contract_id: &str,
        destination_email: &str,
    ) -> Result<TokenRecord, EngineError> {
        let now = self.clock.now();
        let now_s = format_rfc3339(now);
        let superseded = self
            .store
            .supersede_open_tokens(contract_id, &now_s)
            .await?;
        if superseded > 0 {
            tracing::debug!(contract_id, superseded, "superseded open tokens");
        }

        let token = TokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contract_id: contract_id.to_string(),
            email: destination_email.to_string(),
            code: random_code(),
            issued_at: now_s,
            valid_until: format_rfc3339(now + TOKEN_TTL),
            used_at: None,
            used_ip: None,
            used_user_agent: None,
        };
        self.store.insert_token(token.clone()).await?;

        self.ledger.record_event(
            contract_id,
            "verification token issued",
            AuditPayload::TokenIssued {
                token_id: token.id.clone(),
                valid_until: token.valid_until.clone(),
            },
            None,
            None,
        );
        tracing::info!(contract_id, token_id = %token.id, "token issued");
        Ok(token)
    }

    /// Validate and redeem a token code.
    ///
    /// Refusals come back as `EngineError::Token` with the specific
    /// reason; each refusal also leaves a `token_rejected` audit entry.
    /// The token row is untouched on every failure path.
    pub async fn validate(
        &self,
        contract_id: &str,
        code: &str,
        client: &ClientContext,
    ) -> Result<TokenRecord, EngineError> {
        let token = match self.store.find_token(contract_id, code).await? {
            Some(token) => token,
            None => return Err(self.refuse(contract_id, TokenRefusal::NotFound, client).await),
        };
        if token.is_used() {
            return Err(self
                .refuse(contract_id, TokenRefusal::AlreadyUsed, client)
                .await);
        }
        let now = self.clock.now();
        let expired = match parse_rfc3339(&token.valid_until) {
            Some(valid_until) => now > valid_until,
            // Unparseable expiry means the row is corrupt; refuse rather
            // than treating it as eternally valid.
            None => true,
        };
        if expired {
            return Err(self.refuse(contract_id, TokenRefusal::Expired, client).await);
        }

        let used_at = format_rfc3339(now);
        match self
            .store
            .mark_token_used(&token.id, &used_at, &client.ip, &client.user_agent)
            .await
        {
            Ok(()) => {}
            // Lost the race against a concurrent redemption.
            Err(firma_storage::StorageError::TokenAlreadyUsed { .. }) => {
                return Err(self
                    .refuse(contract_id, TokenRefusal::AlreadyUsed, client)
                    .await);
            }
            Err(e) => return Err(e.into()),
        }

        self.ledger
            .record_evidence(
                contract_id,
                EvidencePayload::Token {
                    token_id: token.id.clone(),
                    token_email: token.email.clone(),
                    redeemed_at: used_at.clone(),
                    ip: client.ip.clone(),
                    user_agent: client.user_agent.clone(),
                },
            )
            .await?;
        self.ledger.record_event(
            contract_id,
            "verification token validated",
            AuditPayload::TokenValidated {
                token_id: token.id.clone(),
            },
            None,
            Some(client.clone()),
        );
        tracing::info!(contract_id, token_id = %token.id, "token redeemed");

        Ok(TokenRecord {
            used_at: Some(used_at),
            used_ip: Some(client.ip.clone()),
            used_user_agent: Some(client.user_agent.clone()),
            ..token
        })
    }

    async fn refuse(
        &self,
        contract_id: &str,
        reason: TokenRefusal,
        client: &ClientContext,
    ) -> EngineError {
        self.ledger.record_event(
            contract_id,
            "verification token refused",
            AuditPayload::TokenRejected { reason },
            None,
            Some(client.clone()),
        );
        tracing::info!(contract_id, %reason, "token refused");
        EngineError::Token(reason)
    }
}
