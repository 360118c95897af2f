//! Fixtures shared by unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use skillport_core::{EmbeddingBackend, EmbeddingError, EmbeddingProvider, ProviderKind};

use crate::repository::DESCRIPTOR_FILE;

pub fn write_skill(root: &Path, id: &str, name: &str, description: &str, body: &str) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(DESCRIPTOR_FILE),
        format!("---\nname: {name}\ndescription: {description}\n---\n\n{body}\n"),
    )
    .unwrap();
}

/// Deterministic bag-of-letters embedding that counts calls.
#[derive(Default)]
pub struct CountingBackend {
    pub calls: AtomicUsize,
}

impl CountingBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                vector[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        Ok(vector)
    }
}

/// Backend that always fails.
pub struct FailingBackend;

#[async_trait]
impl EmbeddingBackend for FailingBackend {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Request {
            provider: ProviderKind::OpenAiCompatible,
            message: "connection refused".to_string(),
        })
    }
}

pub fn counting_provider(kind: ProviderKind) -> (EmbeddingProvider, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());
    let provider = EmbeddingProvider::with_backend(kind, "test-model", backend.clone());
    (provider, backend)
}

pub fn failing_provider(kind: ProviderKind) -> EmbeddingProvider {
    EmbeddingProvider::with_backend(kind, "test-model", Arc::new(FailingBackend))
}
