//! Offline embedding function based on feature hashing.
//!
//! Each lowercase alphanumeric token is hashed into one of `D` buckets
//! with a hash-derived sign, and the resulting bag-of-words vector is
//! L2-normalized. It needs no model download, which makes it the
//! embedding function of choice for tests and air-gapped machines.

use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use crate::{
    embedding::{Embedder, EmbeddingMatrix},
    error::{Error, Result},
};

/// Model id prefix selecting this embedder, e.g. `hash:256`.
pub const HASH_MODEL_PREFIX: &str = "hash:";

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "hash embedder dimension must be greater than zero".into(),
            ));
        }
        Ok(Self {
            dimension,
            model_id: format!("{HASH_MODEL_PREFIX}{dimension}"),
        })
    }

    /// Parse a `hash:<D>` model id. Returns `Ok(None)` for other ids.
    ///
    /// # Examples
    ///
    /// ```
    /// use docsift::hash_embedder::HashEmbedder;
    ///
    /// let embedder = HashEmbedder::from_model_id("hash:64").unwrap().unwrap();
    /// assert_eq!(embedder.width(), 64);
    /// assert!(HashEmbedder::from_model_id("sentence-transformers/all-MiniLM-L6-v2")
    ///     .unwrap()
    ///     .is_none());
    /// assert!(HashEmbedder::from_model_id("hash:wide").is_err());
    /// ```
    pub fn from_model_id(model_id: &str) -> Result<Option<Self>> {
        let Some(width) = model_id.strip_prefix(HASH_MODEL_PREFIX) else {
            return Ok(None);
        };
        let dimension = width.parse::<usize>().map_err(|_| {
            Error::Config(format!("invalid hash embedder width in '{model_id}'"))
        })?;
        Self::new(dimension).map(Some)
    }

    pub fn width(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str, out: &mut [f32]) {
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            out[bucket] += sign;
        }

        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            out.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&mut self) -> Result<usize> {
        Ok(self.dimension)
    }

    fn embed(&mut self, texts: &[String]) -> Result<EmbeddingMatrix> {
        let mut data = vec![0.0f32; texts.len() * self.dimension];
        for (text, out) in texts.iter().zip(data.chunks_exact_mut(self.dimension))
        {
            self.embed_one(text, out);
        }
        EmbeddingMatrix::from_flat(texts.len(), self.dimension, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn rows_are_unit_length() {
        let mut embedder = HashEmbedder::new(32).unwrap();
        let matrix = embedder
            .embed(&["brake pedal travel".into(), "x".into()])
            .unwrap();
        for row in matrix.iter_rows() {
            assert!((norm(row) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let mut embedder = HashEmbedder::new(64).unwrap();
        let a = embedder.embed_query("Aero, Summary!").unwrap();
        let b = embedder.embed_query("aero summary").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let mut embedder = HashEmbedder::new(8).unwrap();
        let v = embedder.embed_query("   ").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn batching_does_not_change_rows() {
        let mut embedder = HashEmbedder::new(16).unwrap();
        let texts: Vec<String> =
            vec!["engine torque".into(), "suspension".into(), "ks9".into()];
        let together = embedder.embed(&texts).unwrap();
        for (i, text) in texts.iter().enumerate() {
            let alone = embedder.embed_query(text).unwrap();
            assert_eq!(together.row(i).unwrap(), alone.as_slice());
        }
    }

    #[test]
    fn zero_width_rejected() {
        assert!(matches!(HashEmbedder::new(0), Err(Error::Config(_))));
        assert!(HashEmbedder::from_model_id("hash:0").is_err());
    }
}
