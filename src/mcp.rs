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

use crate::{
    chunk_db::ChunkDb,
    config::RagConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    error,
    rag::{AskOptions, RagService},
    search::SearchMode,
};

struct PocketragState {
    config_db: ConfigDb,
    rag: Mutex<RagService<ChunkDb>>,
    defaults: AskOptions,
}

#[derive(Clone)]
pub struct PocketragMcpServer {
    state: Arc<PocketragState>,
    tool_router: ToolRouter<Self>,
}

impl PocketragMcpServer {
    fn new(state: PocketragState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }

    fn options(
        &self,
        limit: Option<usize>,
        min_score: Option<f32>,
        mode: Option<SearchMode>,
        documents: Option<Vec<String>>,
    ) -> Result<AskOptions, rmcp::ErrorData> {
        let mut options = self.state.defaults.clone();
        if let Some(limit) = limit {
            options.top_k = limit.max(1);
        }
        if let Some(min_score) = min_score {
            options.min_similarity = min_score;
        }
        if let Some(mode) = mode {
            options.mode = mode;
        }
        if let Some(documents) = documents {
            let ids = self
                .state
                .config_db
                .resolve_document_ids(&documents)
                .map_err(|e| {
                    rmcp::ErrorData::invalid_params(e.to_string(), None)
                })?;
            options.document_ids = Some(ids);
        }
        Ok(options)
    }
}

#[tool_router(router = tool_router)]
impl PocketragMcpServer {
    /// Rank stored chunks for a query.
    #[tool(
        name = "pocketrag_search",
        description = "Search imported documents. Returns the best matching passages with document names, page numbers and scores."
    )]
    pub async fn pocketrag_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = self.options(
            params.limit,
            params.min_score,
            params.mode,
            params.documents,
        )?;

        let retrieval = {
            let mut rag = self.state.rag.lock().map_err(|_| {
                rmcp::ErrorData::internal_error("service lock poisoned", None)
            })?;
            rag.retrieve(&params.query, &options)
                .map_err(|e| mcp_error("search failed", e))?
        };

        let names = self
            .state
            .config_db
            .document_names()
            .map_err(|e| mcp_error("failed to read documents", e))?;

        let items: Vec<PassageItem> = retrieval
            .chunks
            .iter()
            .enumerate()
            .map(|(i, scored)| {
                let chunk = &scored.chunk.chunk;
                PassageItem {
                    rank: i + 1,
                    document_id: chunk.document_id.clone(),
                    document_name: names
                        .get(&chunk.document_id)
                        .cloned()
                        .unwrap_or_default(),
                    page_number: chunk.page_number,
                    chunk_index: chunk.chunk_index,
                    score: scored.score,
                    text: chunk.text.clone(),
                }
            })
            .collect();

        let summary = format_search_summary(&items, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            mode: options.mode,
            degraded_embedding: retrieval.degraded_embedding,
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Assemble grounding context for a question.
    #[tool(
        name = "pocketrag_context",
        description = "Build the context for answering a question from imported documents: the relevant passages joined without duplicated text, plus page citations. Answer only from this context."
    )]
    pub async fn pocketrag_context(
        &self,
        params: Parameters<ContextParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = self.options(
            params.limit,
            params.min_score,
            None,
            params.documents,
        )?;

        let retrieval = {
            let mut rag = self.state.rag.lock().map_err(|_| {
                rmcp::ErrorData::internal_error("service lock poisoned", None)
            })?;
            rag.retrieve(&params.question, &options)
                .map_err(|e| mcp_error("retrieval failed", e))?
        };

        let names = self
            .state
            .config_db
            .document_names()
            .map_err(|e| mcp_error("failed to read documents", e))?;

        let sources: Vec<SourceItem> = retrieval
            .sources()
            .into_iter()
            .map(|s| SourceItem {
                document_name: names
                    .get(&s.document_id)
                    .cloned()
                    .unwrap_or_default(),
                document_id: s.document_id,
                page_number: s.page_number,
                score: s.score,
            })
            .collect();

        let text = if retrieval.is_empty() {
            format!(
                "No passages relevant to \"{}\" were found.",
                params.question
            )
        } else {
            let cited = sources
                .iter()
                .map(|s| format!("{} p.{}", s.document_name, s.page_number))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}\n\nSources: {cited}", retrieval.context)
        };

        let structured = serde_json::to_value(ContextResponse {
            question: params.question,
            context: retrieval.context,
            degraded_embedding: retrieval.degraded_embedding,
            sources,
        })
        .map_err(|e| mcp_error("failed to serialize context", e))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for PocketragMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("pocketrag", env!("CARGO_PKG_VERSION"))
                    .with_title("pocketrag MCP"),
            )
            .with_instructions(
                "Use pocketrag_context to ground an answer in the user's documents and cite the returned pages. Use pocketrag_search to browse matching passages.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of passages (default: configured top_k).
    pub limit: Option<usize>,
    /// Minimum score threshold.
    pub min_score: Option<f32>,
    /// Ranking strategy: hybrid, semantic or keyword.
    pub mode: Option<SearchMode>,
    /// Restrict to these documents (id, id prefix or file name).
    pub documents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextParams {
    /// The question to be answered.
    pub question: String,
    /// Maximum number of passages to draw from.
    pub limit: Option<usize>,
    /// Minimum score threshold.
    pub min_score: Option<f32>,
    /// Restrict to these documents (id, id prefix or file name).
    pub documents: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    mode: SearchMode,
    degraded_embedding: bool,
    result_count: usize,
    results: Vec<PassageItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PassageItem {
    rank: usize,
    document_id: String,
    document_name: String,
    page_number: u32,
    chunk_index: u32,
    score: f32,
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextResponse {
    question: String,
    context: String,
    degraded_embedding: bool,
    sources: Vec<SourceItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceItem {
    document_id: String,
    document_name: String,
    page_number: u32,
    score: f32,
}

fn format_search_summary(results: &[PassageItem], query: &str) -> String {
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
            "{:.3} {} p.{}",
            item.score, item.document_name, item.page_number
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

pub fn run_mcp(
    data_dir: DataDir,
    config_db: ConfigDb,
    config: &RagConfig,
) -> error::Result<()> {
    let store = ChunkDb::open(&data_dir.chunks_db())?;
    let state = PocketragState {
        config_db,
        rag: Mutex::new(config.rag_service(store)?),
        defaults: AskOptions::from_config(config),
    };

    let server = PocketragMcpServer::new(state);

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
