//! Feature-hashing embedding provider.
//!
//! Produces deterministic dense vectors by hashing text features into
//! fixed-dimension buckets. ASCII words are features as-is; non-ASCII runs
//! (CJK text has no word separators) contribute character unigrams and
//! bigrams. Not as semantically rich as a neural model, but always available.

use super::{check_batch, EmbeddingProvider};
use crate::error::Result;
use crate::text::word_segments;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct HashingEmbedder {
    dimensions: usize,
    max_batch_size: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize, max_batch_size: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// FNV-1a bucket for a feature.
    fn bucket(feature: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in feature.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    fn features(text: &str) -> HashMap<String, f32> {
        let mut counts: HashMap<String, f32> = HashMap::new();

        for segment in word_segments(text) {
            if segment.is_ascii() {
                *counts.entry(segment).or_default() += 1.0;
                continue;
            }

            let chars: Vec<char> = segment.chars().collect();
            for c in &chars {
                *counts.entry(c.to_string()).or_default() += 1.0;
            }
            for pair in chars.windows(2) {
                *counts.entry(pair.iter().collect()).or_default() += 1.0;
            }
        }

        counts
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];

        for (feature, count) in Self::features(text) {
            vec[Self::bucket(&feature, self.dimensions)] += count;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }

        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch(self.name(), self.max_batch_size, texts)?;
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::cosine_similarity;

    async fn embed(p: &HashingEmbedder, text: &str) -> Vec<f32> {
        p.embed(&[text.to_string()]).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_empty_text_returns_zero_vector() {
        let p = HashingEmbedder::new(128, 10);
        let v = embed(&p, "").await;
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_output_is_normalized() {
        let p = HashingEmbedder::new(256, 10);
        let v = embed(&p, "rust programming language systems").await;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn test_deterministic() {
        let p = HashingEmbedder::new(256, 10);
        assert_eq!(embed(&p, "查询天气").await, embed(&p, "查询天气").await);
    }

    #[tokio::test]
    async fn test_shared_cjk_bigrams_raise_similarity() {
        let p = HashingEmbedder::new(1024, 10);
        let q = embed(&p, "查询股票价格").await;
        let stock = embed(&p, "用于查询指定股票代码的实时价格").await;
        let weather = embed(&p, "查询指定城市当前的天气状况").await;

        let s = cosine_similarity(&q, &stock).unwrap();
        let w = cosine_similarity(&q, &weather).unwrap();
        assert!(s > w, "stock {s} should beat weather {w}");
    }

    #[tokio::test]
    async fn test_rejects_batch_over_limit() {
        let p = HashingEmbedder::new(16, 2);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(p.embed(&texts).await.is_err());
    }
}
