use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::{
        stdio,
        streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager},
    },
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use kg_merge_mcp_rs::builder::BuildOptions;
use kg_merge_mcp_rs::extract::ExtractedBatch;
use kg_merge_mcp_rs::logging::{init_logging, TransportMode};
use kg_merge_mcp_rs::manager::KnowledgeGraphManager;
use kg_merge_mcp_rs::similarity::EntityWeights;

/// Knowledge graph merge server (MCP)
#[derive(Parser, Debug)]
#[command(name = "kg-merge-mcp-rs", version, about)]
struct Cli {
    /// Serve streamable HTTP instead of stdio
    #[arg(short = 's', long)]
    stream: bool,

    /// HTTP port (stream mode)
    #[arg(short = 'p', long, default_value_t = 8000)]
    port: u16,

    /// HTTP bind address (stream mode)
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// SQLite database file (.db)
    #[arg(long, env = "KG_MERGE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Append logs to this file
    #[arg(short = 'l', long)]
    log: Option<String>,

    /// Default entity similarity threshold
    #[arg(long, default_value_t = 0.7)]
    ent_threshold: f32,

    /// Default relationship similarity threshold
    #[arg(long, default_value_t = 0.7)]
    rel_threshold: f32,

    /// Default weight of the name embedding in entity similarity
    #[arg(long, default_value_t = 0.6)]
    entity_name_weight: f32,

    /// Default weight of the label embedding in entity similarity
    #[arg(long, default_value_t = 0.4)]
    entity_label_weight: f32,

    /// Retry budget handed to relation extraction
    #[arg(long, default_value_t = 5)]
    max_tries: usize,

    /// Retry budget handed to isolated-entity handling
    #[arg(long, default_value_t = 3)]
    max_tries_isolated_entities: usize,
}

impl Cli {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            ent_threshold: self.ent_threshold,
            rel_threshold: self.rel_threshold,
            weights: EntityWeights::new(self.entity_name_weight, self.entity_label_weight),
            max_tries: self.max_tries,
            max_tries_isolated_entities: self.max_tries_isolated_entities,
        }
    }
}

#[derive(Clone)]
struct MergeServer {
    manager: Arc<KnowledgeGraphManager>,
    tool_router: ToolRouter<Self>,
}

impl MergeServer {
    fn new(manager: Arc<KnowledgeGraphManager>) -> Self {
        Self {
            manager,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "kg-merge-mcp-rs".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Extract entities and relationships with embeddings yourself, then call \
                 merge_batches to fold them into the stored knowledge graph."
                    .to_string(),
            ),
        }
    }
}

#[tool_router]
impl MergeServer {
    /// Merge extracted batches into the stored graph
    #[tool(
        name = "merge_batches",
        description = "Merge batches of extracted entities and relationships (with embeddings) into the stored knowledge graph, resolving duplicates by embedding similarity"
    )]
    async fn merge_batches(
        &self,
        Parameters(args): Parameters<MergeBatchesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let options = args.overrides.apply(self.manager.defaults());
        let summary = self
            .manager
            .merge_batches(args.batches, options)
            .await
            .map_err(internal_err("Failed to merge batches"))?;

        let text = format!(
            "Graph now has {} entities (was {}) and {} relationships (was {})",
            summary.entities, summary.entities_before,
            summary.relationships, summary.relationships_before
        );

        Ok(CallToolResult {
            content: vec![Content::text(&text)],
            structured_content: Some(json!(summary)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Read entire knowledge graph
    #[tool(
        name = "read_graph",
        description = "Read the entire stored knowledge graph"
    )]
    async fn read_graph(&self) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .read_graph()
            .await
            .map_err(internal_err("Failed to read graph"))?;

        let summary = format!(
            "Knowledge graph contains {} entities and {} relationships",
            graph.entities.len(),
            graph.relationships.len()
        );

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(graph)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Dump the stored graph to a JSON file
    #[tool(
        name = "export_graph",
        description = "Write the stored knowledge graph to a .json file"
    )]
    async fn export_graph(
        &self,
        Parameters(args): Parameters<ExportGraphArgs>,
    ) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .export_graph(&args.path)
            .await
            .map_err(internal_err("Failed to export graph"))?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Exported {} entities and {} relationships to {}",
            graph.entities.len(),
            graph.relationships.len(),
            args.path.display()
        ))]))
    }

    /// Reconcile a JSON graph into the stored graph
    #[tool(
        name = "import_graph",
        description = "Load a knowledge graph from a .json file and reconcile it with the stored graph"
    )]
    async fn import_graph(
        &self,
        Parameters(args): Parameters<ImportGraphArgs>,
    ) -> Result<CallToolResult, McpError> {
        let options = args.overrides.apply(self.manager.defaults());
        let summary = self
            .manager
            .import_graph(&args.path, options)
            .await
            .map_err(internal_err("Failed to import graph"))?;

        let text = format!(
            "Graph now has {} entities (was {}) and {} relationships (was {})",
            summary.entities, summary.entities_before,
            summary.relationships, summary.relationships_before
        );

        Ok(CallToolResult {
            content: vec![Content::text(&text)],
            structured_content: Some(json!(summary)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Delete everything
    #[tool(
        name = "clear_graph",
        description = "Delete all entities and relationships from the stored knowledge graph"
    )]
    async fn clear_graph(&self) -> Result<CallToolResult, McpError> {
        let (entities, relationships) = self
            .manager
            .clear_graph()
            .await
            .map_err(internal_err("Failed to clear graph"))?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "Removed {} entities and {} relationships",
            entities, relationships
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for MergeServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

// Tool argument schemas

/// Per-call overrides of the server defaults
#[derive(Debug, Default, Deserialize, JsonSchema)]
struct OptionOverrides {
    ent_threshold: Option<f32>,
    rel_threshold: Option<f32>,
    entity_name_weight: Option<f32>,
    entity_label_weight: Option<f32>,
}

impl OptionOverrides {
    fn apply(&self, mut options: BuildOptions) -> BuildOptions {
        if let Some(t) = self.ent_threshold {
            options.ent_threshold = t;
        }
        if let Some(t) = self.rel_threshold {
            options.rel_threshold = t;
        }
        if let Some(w) = self.entity_name_weight {
            options.weights.name = w;
        }
        if let Some(w) = self.entity_label_weight {
            options.weights.label = w;
        }
        options
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MergeBatchesArgs {
    batches: Vec<ExtractedBatch>,
    #[serde(flatten)]
    overrides: OptionOverrides,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExportGraphArgs {
    path: PathBuf,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ImportGraphArgs {
    path: PathBuf,
    #[serde(flatten)]
    overrides: OptionOverrides,
}

// Helper for error conversion
fn internal_err<T: std::fmt::Display>(msg: &'static str) -> impl FnOnce(T) -> McpError + Clone {
    move |err| McpError::internal_error(msg, Some(json!({ "error": format!("{:#}", err) })))
}

/// Default location under the platform data directory
fn default_db_path() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("kg-merge");
    path.push("knowledge_graph.db");
    path
}

/// Resolve database path: .db extension, parents created, canonical absolute path
fn resolve_db_path(path: &std::path::Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match path.extension() {
        Some(ext) if ext == "db" => {}
        _ => return Err("Database path must have .db extension".into()),
    }

    let filename = path.file_name().ok_or("Invalid path: no filename")?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    Ok(parent.canonicalize()?.join(filename))
}

async fn serve_http(
    server: MergeServer,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = axum::Router::new()
        .route("/health", axum::routing::get(|| async { "OK" }))
        .nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    info!("Serving MCP over HTTP at http://{}/mcp", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mode = if cli.stream { TransportMode::Stream } else { TransportMode::Stdio };
    init_logging(mode, cli.log.as_deref())?;

    let db_path = resolve_db_path(&cli.db_path.clone().unwrap_or_else(default_db_path))?;
    info!("Using database {}", db_path.display());

    let manager = Arc::new(KnowledgeGraphManager::new(db_path, cli.build_options())?);
    let server = MergeServer::new(manager);

    match mode {
        TransportMode::Stdio => {
            let svc = server.serve(stdio()).await?;
            svc.waiting().await?;
        }
        TransportMode::Stream => serve_http(server, &cli.bind, cli.port).await?,
    }

    Ok(())
}
