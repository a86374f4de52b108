//! Blob store boundary.
//!
//! When the primary store is unreachable the job processor falls back to
//! an in-process object-URL reference; the store itself just reports
//! failure and the caller decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob store unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes under `name`, returning the object URL.
    async fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        content_type: &str,
    ) -> Result<String, BlobError>;
}

/// In-memory blob store. Reference implementation and test double; can be
/// switched to unreachable to exercise the fallback path.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    unreachable: Arc<Mutex<bool>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap_or_else(|e| e.into_inner()) = unreachable;
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        _content_type: &str,
    ) -> Result<String, BlobError> {
        if *self.unreachable.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(BlobError::Unreachable("memory store set unreachable".to_string()));
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), bytes.to_vec());
        Ok(format!("mem://{name}"))
    }
}
