use kdam::{BarExt, tqdm};
use tracing::debug;

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// Default number of texts sent to the embedding function per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// A text → fixed-width vector function.
///
/// Implementations must be pure with respect to their input: row `i` of
/// the returned matrix depends only on `texts[i]`, so batching and batch
/// boundaries never change results. Methods take `&mut self` because
/// backends may load their model lazily on first use.
pub trait Embedder {
    /// Identifier of the embedding function, stored for diagnostics.
    fn model_id(&self) -> &str;

    /// Output width `D` of every embedding produced by this function.
    fn dimension(&mut self) -> Result<usize>;

    /// Embed a batch of texts into a `(texts.len(), D)` matrix.
    fn embed(&mut self, texts: &[String]) -> Result<EmbeddingMatrix>;

    /// Embed a single query string.
    fn embed_query(&mut self, query: &str) -> Result<Vec<f32>> {
        let matrix = self.embed(&[query.to_string()])?;
        matrix.row(0).map(<[f32]>::to_vec).ok_or_else(|| {
            Error::Model("embedding function returned no rows".into())
        })
    }
}

/// A dense row-major `f32` matrix, one row per embedded text.
///
/// # Examples
///
/// ```
/// use docsift::embedding::EmbeddingMatrix;
///
/// let matrix = EmbeddingMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
/// assert_eq!(matrix.rows(), 2);
/// assert_eq!(matrix.dimension(), 2);
/// assert_eq!(matrix.row(1), Some(&[3.0, 4.0][..]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dimension: usize,
    /// Flat values: `data[row * dimension + col]`.
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// An empty matrix of the given width.
    pub fn empty(dimension: usize) -> Self {
        Self {
            rows: 0,
            dimension,
            data: Vec::new(),
        }
    }

    /// Wrap a flat buffer. `data.len()` must equal `rows * dimension`.
    pub fn from_flat(
        rows: usize,
        dimension: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        if rows.checked_mul(dimension) != Some(data.len()) {
            return Err(Error::Integrity(format!(
                "matrix data has {} values, expected {rows} x {dimension}",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }

    /// Build a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dimension = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(Error::Integrity(format!(
                    "row {i} has width {}, expected {dimension}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            dimension,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on a zero chunk size.
        let width = self.dimension.max(1);
        self.data.chunks_exact(width).take(self.rows)
    }

    /// Append all rows of `other`. Widths must agree unless `self` is empty.
    pub fn append(&mut self, other: EmbeddingMatrix) -> Result<()> {
        if self.rows == 0 {
            *self = other;
            return Ok(());
        }
        if other.rows == 0 {
            return Ok(());
        }
        if other.dimension != self.dimension {
            return Err(Error::Integrity(format!(
                "cannot append rows of width {} to a matrix of width {}",
                other.dimension, self.dimension
            )));
        }
        self.rows += other.rows;
        self.data.extend(other.data);
        Ok(())
    }
}

/// Embed the text of every chunk, in order, `batch_size` texts at a time.
///
/// Every batch is checked to come back with one row per text and the
/// embedder's declared width. A progress bar is drawn on stderr.
pub fn embed_chunks(
    embedder: &mut dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<EmbeddingMatrix> {
    if batch_size == 0 {
        return Err(Error::Config("batch size must be greater than zero".into()));
    }

    let dimension = embedder.dimension()?;
    let mut matrix = EmbeddingMatrix::empty(dimension);
    if chunks.is_empty() {
        return Ok(matrix);
    }

    let mut progress = tqdm!(
        total = chunks.len(),
        desc = "Embedding",
        unit = " chunks",
        leave = false
    );

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts)?;
        debug!(rows = embedded.rows(), "embedded batch");

        if embedded.rows() != texts.len() {
            return Err(Error::Model(format!(
                "embedding function returned {} rows for {} texts",
                embedded.rows(),
                texts.len()
            )));
        }
        if embedded.dimension() != dimension {
            return Err(Error::Model(format!(
                "embedding function returned width {}, declared {dimension}",
                embedded.dimension()
            )));
        }

        matrix.append(embedded)?;
        progress.update(batch.len())?;
    }

    Ok(matrix)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Counts letters a..d; deterministic and cheap.
    pub(crate) struct LetterEmbedder {
        pub calls: usize,
    }

    impl LetterEmbedder {
        pub(crate) fn new() -> Self {
            Self { calls: 0 }
        }
    }

    impl Embedder for LetterEmbedder {
        fn model_id(&self) -> &str {
            "test:letters"
        }

        fn dimension(&mut self) -> Result<usize> {
            Ok(4)
        }

        fn embed(&mut self, texts: &[String]) -> Result<EmbeddingMatrix> {
            self.calls += 1;
            let rows: Vec<Vec<f32>> = texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 4];
                    for c in t.chars() {
                        if let Some(i) = "abcd".find(c) {
                            v[i] += 1.0;
                        }
                    }
                    v
                })
                .collect();
            if rows.is_empty() {
                return Ok(EmbeddingMatrix::empty(4));
            }
            EmbeddingMatrix::from_rows(&rows)
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            chunk_id: 0,
            start_word: 0,
            end_word: 0,
            text: text.to_string(),
            file: None,
        }
    }

    #[test]
    fn batching_preserves_order_and_values() {
        let chunks: Vec<Chunk> =
            ["a", "bb", "ccc", "dddd", "ab"].into_iter().map(chunk).collect();

        let mut one_shot = LetterEmbedder::new();
        let whole = embed_chunks(&mut one_shot, &chunks, 100).unwrap();

        let mut batched = LetterEmbedder::new();
        let pieces = embed_chunks(&mut batched, &chunks, 2).unwrap();

        assert_eq!(one_shot.calls, 1);
        assert_eq!(batched.calls, 3);
        assert_eq!(whole, pieces);
        assert_eq!(pieces.rows(), 5);
        assert_eq!(pieces.row(3), Some(&[0.0, 0.0, 0.0, 4.0][..]));
    }

    #[test]
    fn empty_input_keeps_dimension() {
        let mut embedder = LetterEmbedder::new();
        let matrix = embed_chunks(&mut embedder, &[], 8).unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.dimension(), 4);
        assert_eq!(embedder.calls, 0);
    }

    #[test]
    fn zero_batch_size_is_config_error() {
        let mut embedder = LetterEmbedder::new();
        let err = embed_chunks(&mut embedder, &[chunk("a")], 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn embed_query_returns_first_row() {
        let mut embedder = LetterEmbedder::new();
        assert_eq!(
            embedder.embed_query("abba").unwrap(),
            vec![2.0, 2.0, 0.0, 0.0]
        );
    }

    #[test]
    fn from_flat_rejects_bad_length() {
        assert!(matches!(
            EmbeddingMatrix::from_flat(2, 3, vec![0.0; 5]),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err =
            EmbeddingMatrix::from_rows(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn append_checks_width() {
        let mut a = EmbeddingMatrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let b = EmbeddingMatrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(a.append(b).is_err());

        let c = EmbeddingMatrix::from_rows(&[vec![3.0, 4.0]]).unwrap();
        a.append(c).unwrap();
        let rows: Vec<_> = a.iter_rows().collect();
        assert_eq!(rows, vec![&[1.0, 2.0][..], &[3.0, 4.0][..]]);
    }
}
