//! Collaborator abstractions the engine consumes as capabilities.
//!
//! The engine's boundary is this set of traits, not a wire protocol: host
//! applications plug in real transports (SMTP, S3, a PDF renderer, an IP
//! lookup service); the shipped reference implementations keep the engine
//! runnable end-to-end without any of them.

pub mod blob;
pub mod client_info;
pub mod email;
pub mod renderer;

pub use blob::{BlobError, BlobStore, MemoryBlobStore};
pub use client_info::{ClientInfoResolver, HttpClientInfoResolver, StaticResolver};
pub use email::{EmailReceipt, EmailSender, MailError, NoopMailer, OutboundEmail, RecordingMailer};
pub use renderer::{ContractSnapshot, DocumentRenderer, RenderError, TextRenderer};
