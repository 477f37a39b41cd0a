use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::AppError;
use crate::models::whitelist::WhitelistEntry;

/// The opaque text-to-vector capability. Implementations live outside the
/// engine (local model, remote service); the engine only assumes `embed`
/// can fail.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

const AVAILABILITY_UNKNOWN: u8 = 0;
const AVAILABILITY_UP: u8 = 1;
const AVAILABILITY_DOWN: u8 = 2;

/// In-memory vector cache for whitelist descriptions, keyed by folder id.
/// Nothing here is ever persisted; entries drop on invalidation or
/// process exit. A provider failure latches the index unavailable until
/// `invalidate_all`, which is how a reindex retries the provider.
pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    vectors: RwLock<HashMap<i64, Arc<Vec<f32>>>>,
    availability: AtomicU8,
}

impl EmbeddingIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            vectors: RwLock::new(HashMap::new()),
            availability: AtomicU8::new(AVAILABILITY_UNKNOWN),
        }
    }

    /// Cached vector for a folder's description, computed on first use.
    /// `None` means the provider is down and the caller should degrade.
    pub fn embedding_for(&self, entry: &WhitelistEntry) -> Option<Arc<Vec<f32>>> {
        if self.is_down() {
            return None;
        }

        {
            let vectors = self
                .vectors
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(vector) = vectors.get(&entry.id) {
                return Some(Arc::clone(vector));
            }
        }

        let text = format!("{}. {}", entry.name(), entry.description);
        let vector = Arc::new(self.try_embed(&text)?);
        self.vectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(entry.id, Arc::clone(&vector));
        Some(vector)
    }

    /// One-off embedding for the file side of a comparison. Never cached.
    pub fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        if self.is_down() {
            return None;
        }
        self.try_embed(text)
    }

    pub fn invalidate(&self, folder_id: i64) {
        self.vectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&folder_id);
    }

    /// Drops every cached vector and clears the unavailability latch so
    /// the next call gives the provider another chance.
    pub fn invalidate_all(&self) {
        self.vectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.availability
            .store(AVAILABILITY_UNKNOWN, Ordering::Relaxed);
    }

    /// `None` until the provider has been tried at least once.
    pub fn availability(&self) -> Option<bool> {
        match self.availability.load(Ordering::Relaxed) {
            AVAILABILITY_UP => Some(true),
            AVAILABILITY_DOWN => Some(false),
            _ => None,
        }
    }

    /// Primes the cache for every given folder. Intended to run on a
    /// background thread; readiness must not wait for it.
    pub fn warm_up(&self, folders: &[WhitelistEntry]) -> usize {
        let mut cached = 0;
        for folder in folders {
            if self.embedding_for(folder).is_some() {
                cached += 1;
            } else {
                break;
            }
        }
        tracing::info!("embedding warm-up cached {}/{} folders", cached, folders.len());
        cached
    }

    fn is_down(&self) -> bool {
        self.availability.load(Ordering::Relaxed) == AVAILABILITY_DOWN
    }

    fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.provider.embed(text) {
            Ok(vector) if !vector.is_empty() => {
                self.availability.store(AVAILABILITY_UP, Ordering::Relaxed);
                Some(vector)
            }
            Ok(_) => {
                self.mark_down("provider returned an empty vector");
                None
            }
            Err(e) => {
                self.mark_down(&e.to_string());
                None
            }
        }
    }

    fn mark_down(&self, reason: &str) {
        let prev = self.availability.swap(AVAILABILITY_DOWN, Ordering::Relaxed);
        if prev != AVAILABILITY_DOWN {
            tracing::warn!(
                "embedding provider unavailable ({}); semantic scoring disabled until reindex",
                reason
            );
        }
    }
}

const HASH_DIMENSIONS: usize = 256;

/// Feature-hashed bag-of-tokens embedder. Deterministic and fully
/// local, so the default build carries no model runtime; texts sharing
/// tokens land on shared components and score a positive cosine.
pub struct HashedEmbedder;

impl EmbeddingProvider for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vector = vec![0.0f32; HASH_DIMENSIONS];
        for token in hash_tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hashed = hasher.finish();
            let idx = (hashed % HASH_DIMENSIONS as u64) as usize;
            let sign = if hashed & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

// folds crude plurals so "screenshots" and "screenshot" share a bucket
fn hash_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .map(|token| token.to_ascii_lowercase())
        .filter(|token| token.len() >= 2)
        .map(|token| {
            if token.len() > 3 && token.ends_with('s') {
                token[..token.len() - 1].to_string()
            } else {
                token
            }
        })
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for CountingProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // deterministic toy vector derived from the text bytes
            let sum = text.bytes().map(|b| b as f32).sum::<f32>();
            Ok(vec![sum, text.len() as f32, 1.0])
        }
    }

    struct FailingProvider {
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for FailingProvider {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Provider("model offline".to_string()))
        }
    }

    fn folder(id: i64, path: &str, description: &str) -> WhitelistEntry {
        WhitelistEntry {
            id,
            path: path.to_string(),
            description: description.to_string(),
            position: id,
            added_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn caches_one_vector_per_folder() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let index = EmbeddingIndex::new(provider.clone());
        let entry = folder(1, "/sorted/Pictures", "images and screenshots");

        let first = index.embedding_for(&entry).unwrap();
        let second = index.embedding_for(&entry).unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(index.availability(), Some(true));
    }

    #[test]
    fn invalidate_forces_recompute() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let index = EmbeddingIndex::new(provider.clone());
        let entry = folder(7, "/sorted/PDF", "pdf documents");

        index.embedding_for(&entry).unwrap();
        index.invalidate(entry.id);
        index.embedding_for(&entry).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_latches_until_invalidate_all() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let index = EmbeddingIndex::new(provider.clone());
        let entry = folder(3, "/sorted/Music", "albums");

        assert!(index.embedding_for(&entry).is_none());
        assert_eq!(index.availability(), Some(false));

        // latched: no further provider calls while down
        assert!(index.embedding_for(&entry).is_none());
        assert!(index.embed_query("song.mp3").is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // reindex clears the latch and retries
        index.invalidate_all();
        assert_eq!(index.availability(), None);
        assert!(index.embedding_for(&entry).is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn warm_up_counts_cached_folders() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let index = EmbeddingIndex::new(provider);
        let folders = vec![
            folder(1, "/sorted/Pictures", "images"),
            folder(2, "/sorted/PDF", "pdf documents"),
        ];
        assert_eq!(index.warm_up(&folders), 2);
        assert_eq!(index.availability(), Some(true));
    }

    #[test]
    fn cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < 0.0);
    }

    #[test]
    fn hashed_embedder_is_deterministic_and_token_sensitive() {
        let embedder = HashedEmbedder;
        let a = embedder.embed("acme invoice 2024").unwrap();
        let b = embedder.embed("acme invoice 2024").unwrap();
        assert_eq!(a, b);

        let related = embedder.embed("invoice from acme").unwrap();
        let unrelated = embedder.embed("holiday beach photos").unwrap();
        assert!(cosine_similarity(&a, &related) > cosine_similarity(&a, &unrelated));

        let plural = embedder.embed("screenshots").unwrap();
        let singular = embedder.embed("screenshot").unwrap();
        assert!(cosine_similarity(&plural, &singular) > 0.99);
    }
}
