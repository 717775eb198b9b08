//! Default in-process vector index (spec §4.5): cosine similarity over
//! a flat `Vec`, the always-available fallback when no external vector
//! store is configured. Grounded on the original project's in-memory
//! fallback mode for its vector backends.

use async_trait::async_trait;
use ocn_domain::interfaces::{VectorHit, VectorIndex};
use ocn_domain::Result;
use parking_lot::Mutex;
use serde_json::Value;

struct Doc {
    id: String,
    embedding: Vec<f32>,
    metadata: Value,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    docs: Mutex<Vec<Doc>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A deterministic bag-of-characters embedding used when no real text
/// embedding model is wired up: every character hashes into one of
/// `dims` buckets, then the vector is L2-normalized. Ported from the
/// original project's placeholder `_embed`, which used the same trick
/// to give its in-memory fallback something to do cosine similarity
/// over.
pub fn bag_of_chars_embedding(text: &str, dims: usize) -> Vec<f32> {
    let dims = dims.max(1);
    let mut vec = vec![0f32; dims];
    let normalized = text.trim().to_lowercase();
    for token in normalized.split_whitespace() {
        let hash = token.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        vec[(hash as usize) % dims] += 1.0;
    }
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
    vec
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let dot: f32 = a[..len].iter().zip(&b[..len]).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b[..len].iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &str, embedding: Vec<f32>, metadata: Value) -> Result<()> {
        let mut docs = self.docs.lock();
        docs.retain(|d| d.id != id);
        docs.push(Doc { id: id.to_string(), embedding, metadata });
        Ok(())
    }

    async fn query(&self, embedding: Vec<f32>, top_k: usize) -> Result<Vec<VectorHit>> {
        let docs = self.docs.lock();
        let mut scored: Vec<VectorHit> = docs
            .iter()
            .map(|d| VectorHit { id: d.id.clone(), score: cosine(&embedding, &d.embedding), metadata: d.metadata.clone() })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.docs.lock().retain(|d| d.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_ranks_the_closest_embedding_first() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], serde_json::json!({"session_id": "s1"})).await.unwrap();
        index.upsert("b", vec![0.0, 1.0], serde_json::json!({"session_id": "s1"})).await.unwrap();
        let hits = index.query(vec![0.9, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_replaces_an_existing_id_instead_of_duplicating() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], serde_json::json!({})).await.unwrap();
        index.upsert("a", vec![0.0, 1.0], serde_json::json!({})).await.unwrap();
        let hits = index.query(vec![0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }

    #[test]
    fn embedding_is_deterministic_and_unit_length() {
        let a = bag_of_chars_embedding("step ahead watch out", 32);
        let b = bag_of_chars_embedding("step ahead watch out", 32);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn delete_removes_a_document() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], serde_json::json!({})).await.unwrap();
        index.delete("a").await.unwrap();
        let hits = index.query(vec![1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
