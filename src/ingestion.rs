use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    chunking::{self, Chunk, ChunkingConfig},
    error::{Error, Result},
    walker::{self, DiscoveredFile},
};

/// File extensions whose content is read as plain text.
const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text", "rst", "csv"];

/// Why a file produced no chunks.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of ingesting a batch of files.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Chunks of all ingested documents, in discovery order.
    pub chunks: Vec<Chunk>,
    /// Number of documents that were read and chunked.
    pub documents: usize,
    pub skipped: Vec<SkippedFile>,
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Extract the text of a source document.
///
/// Only plain-text formats are understood; anything else (scanned PDFs,
/// images, office documents) is rejected with [`Error::Config`] so the
/// caller can log and skip it.
pub fn extract_text(path: &Path) -> Result<String> {
    if !is_text_file(path) {
        return Err(Error::Config(format!(
            "unsupported document type: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Extract and chunk a batch of discovered files.
///
/// Files are read in parallel; results are put back in discovery order
/// before chunking, so the output does not depend on scheduling. Files
/// that cannot be read or are of an unsupported type are logged and
/// skipped without aborting the batch.
pub fn ingest_files(
    files: &[DiscoveredFile],
    config: &ChunkingConfig,
) -> IngestReport {
    let extracted: Vec<(usize, Result<String>)> = files
        .par_iter()
        .enumerate()
        .map(|(i, file)| (i, extract_text(&file.absolute_path)))
        .collect();

    let mut report = IngestReport::default();
    for (i, text) in extracted {
        let file = &files[i];
        match text {
            Ok(text) => {
                let chunks = chunking::chunk_with_config(
                    &text,
                    Some(file.file_id.as_str()),
                    config,
                );
                if chunks.is_empty() {
                    warn!(file = %file.file_id, "document has no words, skipping");
                    report.skipped.push(SkippedFile {
                        path: file.absolute_path.clone(),
                        reason: "no text".into(),
                    });
                    continue;
                }
                report.documents += 1;
                report.chunks.extend(chunks);
            }
            Err(e) => {
                warn!(file = %file.file_id, error = %e, "skipping file");
                report.skipped.push(SkippedFile {
                    path: file.absolute_path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        documents = report.documents,
        chunks = report.chunks.len(),
        skipped = report.skipped.len(),
        "chunking completed"
    );
    report
}

/// Discover and ingest every document under `root`.
pub fn ingest_directory(
    root: &Path,
    config: &ChunkingConfig,
) -> Result<IngestReport> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let files = walker::discover_files(root)?;
    info!(files = files.len(), root = %root.display(), "discovered files");
    Ok(ingest_files(&files, config))
}
