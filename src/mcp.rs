use std::sync::{Arc, Mutex};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    data_dir::DataDir,
    embedding::Embedder,
    error,
    filters::Filters,
    index_store::Index,
    model_manager::ModelManager,
    search::{self, DEFAULT_THRESHOLD, DEFAULT_TOP_K, SearchParams},
};

const PREVIEW_CHARS: usize = 200;

struct DocsiftState {
    index: Index,
    model: Mutex<ModelManager>,
}

#[derive(Clone)]
pub struct DocsiftMcpServer {
    state: Arc<DocsiftState>,
    tool_router: ToolRouter<Self>,
}

impl DocsiftMcpServer {
    fn new(state: DocsiftState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocsiftMcpServer {
    /// Semantic search over the chunk index.
    #[tool(
        name = "semantic_search",
        description = "Semantic search over indexed document chunks. Filters can be written into the query: 'ks<number>' restricts to files containing that code, 'folder:<name>' to files under that folder."
    )]
    pub async fn semantic_search(
        &self,
        params: Parameters<SemanticSearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let include_text = params.include_text.unwrap_or(true);
        let search_params = SearchParams {
            query: params.query.clone(),
            top_k: params.top_k.unwrap_or(DEFAULT_TOP_K),
            threshold: params.threshold.unwrap_or(DEFAULT_THRESHOLD),
        };

        let mut model = self.state.model.lock().map_err(|_| {
            rmcp::ErrorData::internal_error("model lock poisoned", None)
        })?;

        let outcome =
            search::execute_search(&search_params, &self.state.index, &mut *model)
                .map_err(|e| mcp_error("search failed", e))?;

        let items: Vec<SearchResultItem> = outcome
            .results
            .into_iter()
            .map(|r| SearchResultItem {
                score: r.score,
                chunk_id: r.chunk.chunk_id,
                start_word: r.chunk.start_word,
                end_word: r.chunk.end_word,
                file: r.chunk.file,
                text: if include_text {
                    r.chunk.text
                } else {
                    search::preview(&r.chunk.text, PREVIEW_CHARS)
                },
            })
            .collect();

        let summary = format_search_summary(&items, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            residual_query: outcome.parsed.residual,
            filters: outcome.parsed.filters,
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsiftMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docsift", env!("CARGO_PKG_VERSION")).with_title("docsift MCP"),
            )
            .with_instructions(
                "Use semantic_search to find passages by meaning. Put 'ks<number>' or 'folder:<name>' in the query to narrow results.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSearchParams {
    /// Search query, optionally containing filters.
    pub query: String,
    /// Candidates ranked before filtering (default: 5).
    pub top_k: Option<usize>,
    /// Minimum cosine similarity (default: 0.0).
    pub threshold: Option<f32>,
    /// Return full chunk text instead of a preview (default: true).
    pub include_text: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    residual_query: String,
    filters: Filters,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    score: f32,
    chunk_id: usize,
    start_word: usize,
    end_word: usize,
    file: Option<String>,
    text: String,
}

fn format_search_summary(results: &[SearchResultItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        lines.push(format!(
            "{:.3} {} (words {}-{})",
            item.score,
            item.file.as_deref().unwrap_or("-"),
            item.start_word,
            item.end_word
        ));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: &DataDir, mut model: ModelManager) -> error::Result<()> {
    let dimension = model.dimension()?;
    let index = Index::load(&data_dir.index_prefix(), dimension)?;
    info!(
        model = model.model_id(),
        chunks = index.len(),
        "starting MCP server"
    );

    let server = DocsiftMcpServer::new(DocsiftState {
        index,
        model: Mutex::new(model),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
