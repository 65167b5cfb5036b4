use std::io::Write;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    chunking::Chunk,
    embedding::Embedder,
    error::{Error, Result},
    filters::{self, Filters, ParsedQuery},
    index_store::Index,
};

/// Default number of candidates taken from the similarity ranking.
pub const DEFAULT_TOP_K: usize = 5;

/// Default minimum similarity.
pub const DEFAULT_THRESHOLD: f32 = 0.0;

/// Characters of chunk text shown in preview mode.
const PREVIEW_CHARS: usize = 200;

/// One retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub score: f32,
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// Query parameters as they arrive from a user-facing surface.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub top_k: usize,
    pub threshold: f32,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Result of [`execute_search`]: the parsed query and what it found.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub parsed: ParsedQuery,
    pub results: Vec<SearchResult>,
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two equally sized, non-zero vectors.
///
/// # Examples
///
/// ```
/// use docsift::search::cosine_similarity;
///
/// let a = [1.0, 2.0, 3.0];
/// assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
/// assert!(cosine_similarity(&a, &[0.0, 0.0, 0.0]).is_err());
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::InvalidVector(format!(
            "vector widths differ ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na == 0.0 || nb == 0.0 {
        return Err(Error::InvalidVector(
            "cosine similarity is undefined for a zero-norm vector".into(),
        ));
    }
    Ok(dot(a, b) / (na * nb))
}

/// Cosine similarity of `query` against every stored embedding, in
/// index order.
pub fn score_all(index: &Index, query: &[f32]) -> Result<Vec<f32>> {
    if query.len() != index.dimension() && !index.is_empty() {
        return Err(Error::InvalidVector(format!(
            "query vector has width {}, index has width {}",
            query.len(),
            index.dimension()
        )));
    }

    let query_norm = l2_norm(query);
    if query_norm == 0.0 {
        return Err(Error::InvalidVector("query vector has zero norm".into()));
    }

    index
        .embeddings()
        .iter_rows()
        .enumerate()
        .map(|(i, row)| {
            let row_norm = l2_norm(row);
            if row_norm == 0.0 {
                return Err(Error::InvalidVector(format!(
                    "stored embedding {i} has zero norm"
                )));
            }
            Ok(dot(row, query) / (row_norm * query_norm))
        })
        .collect()
}

/// Rank the index against `query_vector` and return filtered results.
///
/// The `top_k` best candidates are chosen first (ties go to the lower
/// index), and only then are filters and the inclusive `threshold`
/// applied, so fewer than `top_k` results is a normal outcome.
pub fn search(
    index: &Index,
    query_vector: &[f32],
    filters: &Filters,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<SearchResult>> {
    if top_k == 0 {
        return Err(Error::Config("top_k must be at least 1".into()));
    }

    let scores = score_all(index, query_vector)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    // Stable sort keeps lower indices first among equal scores.
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(top_k);

    let results: Vec<SearchResult> = order
        .into_iter()
        .filter(|&i| filters.matches(index.chunks()[i].file.as_deref()))
        .filter(|&i| scores[i] >= threshold)
        .map(|i| SearchResult {
            score: scores[i],
            chunk: index.chunks()[i].clone(),
        })
        .collect();

    debug!(
        candidates = scores.len(),
        returned = results.len(),
        "ranked index"
    );
    Ok(results)
}

/// Execute the full query pipeline.
///
/// 1. Extract filters from the query text
/// 2. Embed the residual query (the raw query if nothing is left)
/// 3. Rank, filter and threshold against the index
pub fn execute_search(
    params: &SearchParams,
    index: &Index,
    embedder: &mut dyn Embedder,
) -> Result<SearchOutcome> {
    let parsed = filters::parse_query(&params.query);
    for (key, value) in parsed.filters.iter() {
        info!("Filtering results for {key}: {value}");
    }

    let text = if parsed.residual.is_empty() {
        params.query.trim()
    } else {
        parsed.residual.as_str()
    };
    let query_vector = embedder.embed_query(text)?;

    let results = search(
        index,
        &query_vector,
        &parsed.filters,
        params.top_k,
        params.threshold,
    )?;

    Ok(SearchOutcome { parsed, results })
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SearchResult], full_text: bool) -> Result<()> {
    write_human(&mut std::io::stdout().lock(), results, full_text)?;
    Ok(())
}

/// Write ranked results: similarity, every metadata field, then the
/// chunk text in full or as a preview.
pub fn write_human(
    out: &mut impl Write,
    results: &[SearchResult],
    full_text: bool,
) -> std::io::Result<()> {
    if results.is_empty() {
        return writeln!(out, "No results found.");
    }

    writeln!(out, "\nFound {} results:\n", results.len())?;
    writeln!(out, "{}", "=".repeat(80))?;

    for (i, r) in results.iter().enumerate() {
        let chunk = &r.chunk;
        writeln!(out, "\n{}. Similarity: {:.4}", i + 1, r.score)?;
        writeln!(out, "   chunk_id: {}", chunk.chunk_id)?;
        writeln!(out, "   start_word: {}", chunk.start_word)?;
        writeln!(out, "   end_word: {}", chunk.end_word)?;
        if let Some(file) = &chunk.file {
            writeln!(out, "   file: {file}")?;
        }

        if full_text {
            writeln!(out, "\n   Text: {}", chunk.text)?;
        } else {
            writeln!(out, "\n   Text: {}", preview(&chunk.text, PREVIEW_CHARS))?;
        }
        writeln!(out, "{}", "-".repeat(80))?;
    }
    Ok(())
}

/// Format results as JSON output.
pub fn format_json(outcome: &SearchOutcome, query: &str) -> Result<()> {
    #[derive(Serialize)]
    struct JsonOutput<'a> {
        query: &'a str,
        residual_query: &'a str,
        filters: &'a Filters,
        result_count: usize,
        results: &'a [SearchResult],
    }

    let out = JsonOutput {
        query,
        residual_query: &outcome.parsed.residual,
        filters: &outcome.parsed.filters,
        result_count: outcome.results.len(),
        results: &outcome.results,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

/// First `max_chars` characters of `text`, with an ellipsis if cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::{EmbeddingMatrix, tests::LetterEmbedder},
        filters::FilterKey,
    };

    fn chunk(id: usize, text: &str, file: Option<&str>) -> Chunk {
        Chunk {
            chunk_id: id,
            start_word: 0,
            end_word: 0,
            text: text.to_string(),
            file: file.map(str::to_string),
        }
    }

    fn index_of(rows: &[(Vec<f32>, Option<&str>)]) -> Index {
        let chunks = rows
            .iter()
            .enumerate()
            .map(|(i, (_, file))| chunk(i, &format!("chunk {i}"), *file))
            .collect();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|(v, _)| v.clone()).collect();
        Index::new(chunks, EmbeddingMatrix::from_rows(&vectors).unwrap()).unwrap()
    }

    fn four_docs() -> Index {
        index_of(&[
            (vec![1.0, 0.0], Some("Data/aero/ks9_wing.md")),
            (vec![0.9, 0.1], Some("Data/engine/ks9_torque.md")),
            (vec![0.0, 1.0], Some("Data/aero/ks8_floor.md")),
            (vec![0.7, 0.7], None),
        ])
    }

    #[test]
    fn self_similarity_is_one() {
        let v = [0.3, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = [1.0, 2.0, -0.5];
        let b = [-3.0, 0.25, 2.0];
        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-7);
    }

    #[test]
    fn similarity_rejects_width_mismatch() {
        assert!(matches!(
            cosine_similarity(&[1.0], &[1.0, 2.0]),
            Err(Error::InvalidVector(_))
        ));
    }

    #[test]
    fn never_exceeds_top_k_and_sorted() {
        let index = four_docs();
        let results =
            search(&index, &[1.0, 0.2], &Filters::new(), 3, -1.0).unwrap();

        assert_eq!(results.len(), 3);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(results[0].chunk.chunk_id, 1);
    }

    #[test]
    fn ties_prefer_lower_index() {
        let index = index_of(&[
            (vec![0.0, 1.0], None),
            (vec![1.0, 0.0], None),
            (vec![2.0, 0.0], None),
            (vec![3.0, 0.0], None),
        ]);
        let results =
            search(&index, &[1.0, 0.0], &Filters::new(), 2, -1.0).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.chunk_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn filters_apply_after_top_k() {
        let index = four_docs();
        let mut filters = Filters::new();
        filters.insert(FilterKey::Folder, "aero");

        // Top 2 by similarity are chunks 0 and 1; only chunk 0 is in aero.
        // Chunk 2 is in aero too but was never a candidate.
        let results = search(&index, &[1.0, 0.0], &filters, 2, -1.0).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.chunk_id).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn all_filters_must_match() {
        let index = four_docs();
        let mut filters = Filters::new();
        filters.insert(FilterKey::Code, "KS9");
        filters.insert(FilterKey::Folder, "engine");

        let results = search(&index, &[1.0, 0.0], &filters, 4, -1.0).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.chunk_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn chunks_without_file_dropped_when_filtering() {
        let index = four_docs();
        let mut filters = Filters::new();
        filters.insert(FilterKey::Code, "ks");

        let results = search(&index, &[0.7, 0.7], &filters, 4, -1.0).unwrap();
        assert!(results.iter().all(|r| r.chunk.file.is_some()));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn threshold_is_inclusive() {
        let index = index_of(&[(vec![1.0, 0.0], None), (vec![0.0, 1.0], None)]);
        let exact = search(&index, &[1.0, 0.0], &Filters::new(), 2, 1.0).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].score, 1.0);

        let zero = search(&index, &[1.0, 0.0], &Filters::new(), 2, 0.0).unwrap();
        assert_eq!(zero.len(), 2);

        let none =
            search(&index, &[1.0, 0.0], &Filters::new(), 2, 1.0001).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn zero_query_vector_is_rejected() {
        let index = four_docs();
        let err = search(&index, &[0.0, 0.0], &Filters::new(), 3, 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
    }

    #[test]
    fn zero_stored_vector_is_rejected() {
        let index = index_of(&[(vec![1.0, 0.0], None), (vec![0.0, 0.0], None)]);
        let err = search(&index, &[1.0, 0.0], &Filters::new(), 1, 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
    }

    #[test]
    fn query_width_must_match_index() {
        let index = four_docs();
        let err = search(&index, &[1.0, 0.0, 0.0], &Filters::new(), 1, 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
    }

    #[test]
    fn zero_top_k_is_config_error() {
        let index = four_docs();
        assert!(matches!(
            search(&index, &[1.0, 0.0], &Filters::new(), 0, 0.0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = Index::new(Vec::new(), EmbeddingMatrix::empty(4)).unwrap();
        let results =
            search(&index, &[1.0, 0.0, 0.0, 0.0], &Filters::new(), 5, 0.0)
                .unwrap();
        assert!(results.is_empty());
    }

    fn letter_index() -> Index {
        let texts = [
            ("aaaa", "Data/aero/ks9_notes.md"),
            ("bbbb", "Data/engine/ks2_notes.md"),
            ("aabb", "Data/aero/ks2_notes.md"),
        ];
        let mut embedder = LetterEmbedder::new();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, (t, f))| chunk(i, t, Some(f)))
            .collect();
        let matrix = crate::embedding::embed_chunks(&mut embedder, &chunks, 2)
            .unwrap();
        Index::new(chunks, matrix).unwrap()
    }

    #[test]
    fn execute_search_strips_filters_before_embedding() {
        let index = letter_index();
        let mut embedder = LetterEmbedder::new();
        let mut params = SearchParams::new("ks2 aaaa");
        params.top_k = 3;

        let outcome = execute_search(&params, &index, &mut embedder).unwrap();
        assert_eq!(outcome.parsed.residual, "aaaa");
        assert_eq!(outcome.parsed.filters.get(FilterKey::Code), Some("ks2"));

        let files: Vec<_> = outcome
            .results
            .iter()
            .map(|r| r.chunk.file.clone().unwrap())
            .collect();
        assert_eq!(
            files,
            vec!["Data/aero/ks2_notes.md", "Data/engine/ks2_notes.md"]
        );
    }

    #[test]
    fn execute_search_filter_only_query_uses_raw_text() {
        let index = letter_index();
        let mut embedder = LetterEmbedder::new();
        let mut params = SearchParams::new("folder:aero");
        params.top_k = 3;

        // "folder:aero" has an 'a' and a 'd', so it embeds to a non-zero vector.
        let outcome = execute_search(&params, &index, &mut embedder).unwrap();
        assert_eq!(outcome.parsed.residual, "");
        assert!(
            outcome
                .results
                .iter()
                .all(|r| r.chunk.file.as_deref().unwrap().contains("aero"))
        );
        assert_eq!(outcome.results.len(), 2);
    }

    #[test]
    fn human_output_lists_metadata_and_preview() {
        let results = vec![SearchResult {
            score: 0.87654,
            chunk: Chunk {
                chunk_id: 2,
                start_word: 300,
                end_word: 499,
                text: "x".repeat(250),
                file: Some("Data/aero/ks9.md".into()),
            },
        }];
        let mut out = Vec::new();
        write_human(&mut out, &results, false).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("Found 1 results:"));
        assert!(out.contains("1. Similarity: 0.8765"));
        assert!(out.contains("   start_word: 300"));
        assert!(out.contains("   file: Data/aero/ks9.md"));
        assert!(out.contains(&format!("Text: {}...", "x".repeat(200))));
    }

    #[test]
    fn human_output_for_no_results() {
        let mut out = Vec::new();
        write_human(&mut out, &[], true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No results found.\n");
    }

    #[test]
    fn results_serialize_flat() {
        let result = SearchResult {
            score: 0.5,
            chunk: chunk(1, "body", Some("Data/x.md")),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["score"], 0.5);
        assert_eq!(value["chunk_id"], 1);
        assert_eq!(value["file"], "Data/x.md");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 4), "héll...");
        assert_eq!(preview("short", 200), "short");
    }
}
