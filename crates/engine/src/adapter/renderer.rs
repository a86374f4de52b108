//! Document renderer boundary.
//!
//! The renderer is opaque to the engine: it receives a contract snapshot
//! (body, placeholder substitutions, signature metadata) and returns the
//! canonical document bytes. Hashing and storage are the engine's job.

use async_trait::async_trait;
use firma_storage::{ContractRecord, SignatureRecord};

/// Everything the renderer needs to produce the canonical document.
#[derive(Debug, Clone)]
pub struct ContractSnapshot {
    pub contract: ContractRecord,
    pub signatures: Vec<SignatureRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, snapshot: &ContractSnapshot) -> Result<Vec<u8>, RenderError>;
}

/// Plain-text reference renderer: substitutes `{{placeholder}}` variables
/// in the body and appends a signature block per applied signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl TextRenderer {
    fn substitute(body: &str, contract: &ContractRecord) -> String {
        body.replace("{{title}}", &contract.title)
            .replace("{{signer_name}}", &contract.signer_name)
            .replace("{{signer_email}}", &contract.signer_email)
            .replace("{{signer_national_id}}", &contract.signer_national_id)
    }
}

#[async_trait]
impl DocumentRenderer for TextRenderer {
    async fn render(&self, snapshot: &ContractSnapshot) -> Result<Vec<u8>, RenderError> {
        let contract = &snapshot.contract;
        let mut out = String::new();
        out.push_str(&contract.title);
        out.push_str("\n\n");
        out.push_str(&Self::substitute(&contract.body, contract));
        out.push_str("\n\n");
        for signature in &snapshot.signatures {
            out.push_str(&format!(
                "Signed ({}) by {} <{}> at {}",
                signature.role, signature.signer_name, signature.signer_email, signature.signed_at
            ));
            if let Some(cert) = &signature.certificate {
                out.push_str(&format!(
                    " [certificate: {} / {}]",
                    cert.issuer, cert.thumbprint
                ));
            }
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}
