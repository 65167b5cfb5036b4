//! Persistence for the chunk list and its embedding matrix.
//!
//! An index is two co-located files sharing a prefix:
//!
//! - `<prefix>_chunks.json`: JSON array of [`Chunk`] objects
//! - `<prefix>_embeddings.bin`: the embedding matrix, row `i` belonging
//!   to chunk `i`
//!
//! Matrix file format (little endian):
//! - 4 bytes: magic `DSFT`
//! - 4 bytes: format version (u32)
//! - 4 bytes: row count R (u32)
//! - 4 bytes: dimension D (u32)
//! - R * D * 4 bytes: f32 values in row-major order
//!
//! The chunk staging file (`documents.json`) uses the same chunk JSON
//! shape and only ever grows through [`append_chunks`] until the next
//! full rebuild.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{
    chunking::Chunk,
    embedding::{self, Embedder, EmbeddingMatrix},
    error::{Error, Result},
};

const MATRIX_MAGIC: [u8; 4] = *b"DSFT";
const MATRIX_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

/// Locations of the two halves of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub chunks: PathBuf,
    pub embeddings: PathBuf,
}

impl IndexPaths {
    /// Derive both file names from a shared prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use docsift::index_store::IndexPaths;
    ///
    /// let paths = IndexPaths::from_prefix(Path::new("/data/search_index"));
    /// assert_eq!(paths.chunks, Path::new("/data/search_index_chunks.json"));
    /// assert_eq!(paths.embeddings, Path::new("/data/search_index_embeddings.bin"));
    /// ```
    pub fn from_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = prefix.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            chunks: with_suffix("_chunks.json"),
            embeddings: with_suffix("_embeddings.bin"),
        }
    }

    pub fn exists(&self) -> bool {
        self.chunks.is_file() && self.embeddings.is_file()
    }
}

/// Chunks paired row-for-row with their embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    chunks: Vec<Chunk>,
    embeddings: EmbeddingMatrix,
}

impl Index {
    /// Pair chunks with embeddings; row counts must match.
    pub fn new(chunks: Vec<Chunk>, embeddings: EmbeddingMatrix) -> Result<Self> {
        if chunks.len() != embeddings.rows() {
            return Err(Error::Integrity(format!(
                "{} chunks but {} embedding rows",
                chunks.len(),
                embeddings.rows()
            )));
        }
        Ok(Self { chunks, embeddings })
    }

    /// Embed `chunks` and pair them with their embeddings.
    ///
    /// Chunks whose embedding has zero or non-finite norm cannot be
    /// compared by cosine similarity; they are logged and left out of the
    /// index.
    pub fn build(
        chunks: Vec<Chunk>,
        embedder: &mut dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        let embeddings = embedding::embed_chunks(embedder, &chunks, batch_size)?;
        Self::new(chunks, embeddings)?.without_unscorable_rows()
    }

    fn without_unscorable_rows(self) -> Result<Self> {
        let Self { chunks, embeddings } = self;
        let dimension = embeddings.dimension();
        let mut kept = Vec::with_capacity(chunks.len());
        let mut data = Vec::with_capacity(embeddings.as_slice().len());

        for (chunk, row) in chunks.into_iter().zip(embeddings.iter_rows()) {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm == 0.0 || !norm.is_finite() {
                warn!(
                    chunk_id = chunk.chunk_id,
                    file = chunk.file.as_deref().unwrap_or("-"),
                    "embedding has no direction, leaving chunk out of the index"
                );
                continue;
            }
            data.extend_from_slice(row);
            kept.push(chunk);
        }

        let embeddings = EmbeddingMatrix::from_flat(kept.len(), dimension, data)?;
        Self::new(kept, embeddings)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn embeddings(&self) -> &EmbeddingMatrix {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    /// Write both files under `prefix`.
    ///
    /// Each file is written to a temporary sibling and renamed into place,
    /// embeddings first. A reader racing the second rename sees a row-count
    /// mismatch and gets [`Error::Integrity`] rather than misaligned rows.
    pub fn save(&self, prefix: &Path) -> Result<IndexPaths> {
        let paths = IndexPaths::from_prefix(prefix);
        let dir = parent_dir(&paths.chunks);
        std::fs::create_dir_all(dir)?;

        let mut matrix_file = NamedTempFile::new_in(dir)?;
        write_matrix(matrix_file.as_file_mut(), &self.embeddings)?;
        matrix_file.as_file().sync_all()?;

        let mut chunks_file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(chunks_file.as_file_mut(), &self.chunks)?;
        chunks_file.as_file_mut().flush()?;
        chunks_file.as_file().sync_all()?;

        matrix_file
            .persist(&paths.embeddings)
            .map_err(|e| Error::Io(e.error))?;
        chunks_file
            .persist(&paths.chunks)
            .map_err(|e| Error::Io(e.error))?;

        info!(
            chunks = self.len(),
            dimension = self.dimension(),
            path = %paths.chunks.display(),
            "saved index"
        );
        Ok(paths)
    }

    /// Load the index under `prefix` and check it against the width of
    /// the active embedding function.
    pub fn load(prefix: &Path, expected_dimension: usize) -> Result<Self> {
        let paths = IndexPaths::from_prefix(prefix);
        if !paths.exists() {
            return Err(Error::NotFound {
                kind: "index",
                name: prefix.display().to_string(),
            });
        }

        let chunks: Vec<Chunk> = read_chunk_file(&paths.chunks)?;
        let embeddings = read_matrix(&paths.embeddings)?;

        if embeddings.dimension() != expected_dimension {
            return Err(Error::Integrity(format!(
                "index embeddings have width {}, active embedding function produces {expected_dimension}",
                embeddings.dimension()
            )));
        }

        let index = Self::new(chunks, embeddings)?;
        info!(
            chunks = index.len(),
            dimension = index.dimension(),
            "loaded index"
        );
        Ok(index)
    }
}

/// Append `new_chunks` to the chunk list at `path`, creating it if needed.
///
/// Existing entries keep their order. Embeddings are not touched; the
/// index has to be re-embedded before the new chunks become searchable.
pub fn append_chunks(path: &Path, new_chunks: &[Chunk]) -> Result<usize> {
    let mut chunks = load_chunks(path)?;
    chunks.extend_from_slice(new_chunks);
    write_chunk_file(path, &chunks)?;
    Ok(chunks.len())
}

/// Read a chunk list. A missing or empty file is an empty list.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Ok(Vec::new()),
        Ok(_) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the chunk list at `path` with an empty one.
pub fn reset_chunks(path: &Path) -> Result<()> {
    write_chunk_file(path, &[])
}

fn write_chunk_file(path: &Path, chunks: &[Chunk]) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(file.as_file_mut(), chunks)?;
    file.as_file_mut().flush()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Chunk JSON inside an index is part of the integrity contract, so a
/// parse failure there is reported as such.
fn read_chunk_file(path: &Path) -> Result<Vec<Chunk>> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Integrity(format!("malformed chunk file {}: {e}", path.display()))
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn write_matrix(out: &mut impl Write, matrix: &EmbeddingMatrix) -> Result<()> {
    let rows = u32::try_from(matrix.rows())
        .map_err(|_| Error::Config("too many embedding rows".into()))?;
    let dimension = u32::try_from(matrix.dimension())
        .map_err(|_| Error::Config("embedding dimension too large".into()))?;

    out.write_all(&MATRIX_MAGIC)?;
    out.write_all(&MATRIX_VERSION.to_le_bytes())?;
    out.write_all(&rows.to_le_bytes())?;
    out.write_all(&dimension.to_le_bytes())?;
    out.write_all(bytemuck::cast_slice(matrix.as_slice()))?;
    out.flush()?;
    Ok(())
}

fn read_matrix(path: &Path) -> Result<EmbeddingMatrix> {
    let bytes = std::fs::read(path)?;
    decode_matrix(&bytes)
        .map_err(|reason| Error::Integrity(format!("{}: {reason}", path.display())))
}

/// Row count and width recorded in a matrix file's header, without
/// reading the payload.
pub fn matrix_shape(path: &Path) -> Result<(usize, usize)> {
    let mut header = [0u8; HEADER_SIZE];
    std::fs::File::open(path)?
        .read_exact(&mut header)
        .map_err(|e| Error::Integrity(format!("{}: {e}", path.display())))?;
    if header[0..4] != MATRIX_MAGIC {
        return Err(Error::Integrity(format!(
            "{}: not an embedding matrix file (bad magic)",
            path.display()
        )));
    }
    Ok((read_u32(&header, 8) as usize, read_u32(&header, 12) as usize))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn decode_matrix(bytes: &[u8]) -> std::result::Result<EmbeddingMatrix, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("file too short ({} bytes)", bytes.len()));
    }
    if bytes[0..4] != MATRIX_MAGIC {
        return Err("not an embedding matrix file (bad magic)".into());
    }
    let version = read_u32(bytes, 4);
    if version != MATRIX_VERSION {
        return Err(format!("unsupported matrix format version {version}"));
    }

    let rows = read_u32(bytes, 8) as usize;
    let dimension = read_u32(bytes, 12) as usize;
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_SIZE));
    if expected != Some(bytes.len()) {
        return Err(format!(
            "size mismatch: {} bytes for {rows} x {dimension} matrix",
            bytes.len()
        ));
    }

    // The payload has no alignment guarantee inside the Vec<u8>.
    let data: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..]);
    if let Some(i) = data.iter().position(|v| !v.is_finite()) {
        let (row, col) = (i / dimension.max(1), i % dimension.max(1));
        return Err(format!("non-finite value at row {row}, column {col}"));
    }
    EmbeddingMatrix::from_flat(rows, dimension, data).map_err(|e| e.to_string())
}
