//! Word-window chunking of extracted document text.
//!
//! A document is tokenized on whitespace and cut into windows of
//! `chunk_size` words. Consecutive windows share `overlap` words, so the
//! window starts are `0, S, 2S, ...` with `S = chunk_size - overlap`. The
//! last window may be shorter than `chunk_size` but always ends on the
//! final word of the document.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default window length in words.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Default number of words shared by adjacent windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Chunking parameters, validated on construction.
///
/// # Examples
///
/// ```
/// use docsift::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::new(200, 50).unwrap();
/// assert_eq!(config.step(), 150);
///
/// assert!(ChunkingConfig::new(50, 50).is_err());
/// assert!(ChunkingConfig::new(0, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config(
                "chunk size must be greater than zero".into(),
            ));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance in words between the starts of two consecutive windows.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A contiguous word window taken from one source document.
///
/// This is also the on-disk shape of one entry in the chunk JSON files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Emission index within the chunking run that produced this chunk.
    pub chunk_id: usize,
    /// First word of the window (inclusive, 0-based).
    pub start_word: usize,
    /// Last word of the window (inclusive, 0-based).
    pub end_word: usize,
    /// The words of the window joined with single spaces.
    pub text: String,
    /// Source document identifier, used by query filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Chunk {
    /// Number of words covered by this chunk.
    pub fn word_count(&self) -> usize {
        self.end_word + 1 - self.start_word
    }
}

/// Split `text` into overlapping word windows tagged with `file_id`.
///
/// Fails with [`Error::Config`] when `overlap >= chunk_size` or
/// `chunk_size == 0`. Text without any words yields no chunks.
///
/// # Examples
///
/// ```
/// use docsift::chunking::chunk_words;
///
/// let text = "one two three four five six seven";
/// let chunks = chunk_words(text, "notes.txt", 3, 1).unwrap();
///
/// let starts: Vec<_> = chunks.iter().map(|c| c.start_word).collect();
/// assert_eq!(starts, vec![0, 2, 4]);
/// assert_eq!(chunks[2].text, "five six seven");
/// assert_eq!(chunks[2].end_word, 6);
/// ```
pub fn chunk_words(
    text: &str,
    file_id: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(chunk_with_config(text, Some(file_id), &config))
}

/// Chunk with an already validated configuration.
///
/// `file_id` is optional so that chunks without a source can be built
/// for ad-hoc indexes.
pub fn chunk_with_config(
    text: &str,
    file_id: Option<&str>,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let total = words.len();
    let step = config.step();

    let mut chunks = Vec::with_capacity(total.div_ceil(step));
    let mut start = 0;

    while start < total {
        let end = (start + config.chunk_size).min(total);
        chunks.push(Chunk {
            chunk_id: chunks.len(),
            start_word: start,
            end_word: end - 1,
            text: words[start..end].join(" "),
            file: file_id.map(str::to_string),
        });

        // The window that reaches the last word is the final one.
        if end == total {
            break;
        }
        start += step;
    }

    chunks
}
