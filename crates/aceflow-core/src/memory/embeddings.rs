//! Embedding Providers for Semantic Recall
//!
//! The memory store only sees the narrow [`Embedder`] trait. Two providers
//! ship with the crate:
//!
//! - [`KeywordEmbedder`]: deterministic hashed term-frequency vectors. No
//!   model download, identical output for identical input.
//! - `FastEmbedder` (feature `embeddings`): local all-MiniLM-L6-v2 inference
//!   via `fastembed`.
//!
//! Providers fail closed. When no usable vector can be produced they return
//! [`AceflowError::EmbeddingUnavailable`], never a zero vector, so the store
//! can fall back to keyword matching.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::{AceflowError, AceflowResult};

/// Embedding dimensions for all-MiniLM-L6-v2, reused by the keyword embedder
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Turns text into a fixed-length vector
pub trait Embedder: Send + Sync {
    /// Embed a single text
    fn embed(&self, text: &str) -> AceflowResult<Vec<f32>>;

    /// Length of every vector this embedder returns
    fn dimensions(&self) -> usize;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Deterministic keyword-hashing embedder
///
/// Each token is hashed into one of `dimensions` buckets with a hash-derived
/// sign, weighted by `1 + ln(tf)`, and the result is L2-normalized.
#[derive(Debug, Clone)]
pub struct KeywordEmbedder {
    dimensions: usize,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSIONS)
    }
}

impl KeywordEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(bytes);
        let index = (value % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

/// Lowercase alphanumeric tokens with a naive plural trim
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let lower = t.to_lowercase();
            if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
                lower[..lower.len() - 1].to_string()
            } else {
                lower
            }
        })
        .collect()
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, text: &str) -> AceflowResult<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(AceflowError::embedding_unavailable(
                "text contains no indexable terms",
            ));
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (token, count) in counts {
            let (index, sign) = self.bucket(token);
            vector[index] += sign * (1.0 + (count as f32).ln());
        }

        normalize(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "keyword-hash"
    }
}

/// L2-normalize, failing on a zero vector
fn normalize(mut vector: Vec<f32>) -> AceflowResult<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(AceflowError::embedding_unavailable(
            "embedding collapsed to a zero vector",
        ));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(vector)
}

/// Local model embedder backed by `fastembed`
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    /// Load the all-MiniLM-L6-v2 model (downloads on first use)
    pub fn new() -> AceflowResult<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options).map_err(|e| {
            AceflowError::embedding_unavailable(format!("failed to load embedding model: {}", e))
        })?;

        tracing::info!("Embedding model loaded in {:?}", start.elapsed());
        Ok(Self {
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "embeddings")]
impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> AceflowResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AceflowError::embedding_unavailable("empty text"));
        }

        let model = self
            .model
            .lock()
            .map_err(|_| AceflowError::embedding_unavailable("embedding model lock poisoned"))?;
        let vector = model
            .embed(vec![text], None)
            .map_err(|e| {
                AceflowError::embedding_unavailable(format!("failed to generate embedding: {}", e))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| AceflowError::embedding_unavailable("no embedding generated"))?;

        normalize(vector)
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn name(&self) -> &str {
        "fastembed-all-minilm-l6-v2"
    }
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0. Mismatched lengths and zero
/// vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Embedder that is never available, for degradation tests
#[cfg(test)]
pub(crate) struct FailingEmbedder;

#[cfg(test)]
impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> AceflowResult<Vec<f32>> {
        Err(AceflowError::embedding_unavailable("model offline"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn name(&self) -> &str {
        "failing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_mismatched() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_keyword_embedder_is_deterministic_and_normalized() {
        let embedder = KeywordEmbedder::default();
        let a = embedder.embed("Refactor the auth service").unwrap();
        let b = embedder.embed("Refactor the auth service").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_keyword_embedder_similarity_tracks_overlap() {
        let embedder = KeywordEmbedder::default();
        let base = embedder.embed("jwt token rotation for auth").unwrap();
        let close = embedder.embed("auth tokens with jwt").unwrap();
        let far = embedder.embed("billing invoice export").unwrap();

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_keyword_embedder_fails_closed() {
        let embedder = KeywordEmbedder::default();
        let err = embedder.embed("  ... !!! ").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EmbeddingUnavailableError);
    }

    #[test]
    fn test_tokenize_trims_plurals() {
        assert_eq!(tokenize("Tokens, class; API"), vec!["token", "class", "api"]);
    }

    #[cfg(feature = "embeddings")]
    #[test]
    #[ignore = "requires model download (~90MB)"]
    fn test_fastembed_single() {
        let embedder = FastEmbedder::new().unwrap();
        let vector = embedder.embed("hello world").unwrap();
        assert_eq!(vector.len(), EMBEDDING_DIMENSIONS);
    }
}
