//! Graph Reader CLI - main entry point

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use graph_reader::{commands, metrics, Config};
use tracing::warn;

#[derive(Parser)]
#[command(name = "graph_reader")]
#[command(about = "Knowledge-graph question answering over long documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./config.yml, then ../config.yml)
    #[arg(long, global = true, env = "GRAPH_READER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, global = true, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a PDF or text document into the chunk store
    Chunk {
        /// Document to read (.pdf or plain text)
        document: PathBuf,

        /// Maximum chunk length in characters
        #[arg(long)]
        chunk_len: Option<usize>,

        /// Characters to drop at the start of every page
        #[arg(long, default_value_t = 0)]
        header: usize,

        /// Character offset where every page is cut (0 = end of page)
        #[arg(long, default_value_t = 0)]
        footer: usize,

        /// Output file for the chunk store
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Extract facts, build the graph, export GML and index it
    Build {
        /// Chunk store to read
        #[arg(long)]
        chunks: Option<PathBuf>,

        /// Output GML file
        #[arg(long)]
        graph_out: Option<PathBuf>,

        /// Do not index the graph
        #[arg(long, default_value_t = false)]
        no_index: bool,
    },

    /// Index an exported graph
    Index {
        /// GML file to index
        #[arg(long)]
        graph: Option<PathBuf>,
    },

    /// Answer a question over the graph
    Ask {
        /// Question to answer
        query: String,

        /// Print the stages, selected nodes and agent actions
        #[arg(long, default_value_t = false)]
        show_trace: bool,
    },

    /// Print graph statistics or one node with its neighbours
    Inspect {
        /// GML file to inspect
        #[arg(long)]
        graph: Option<PathBuf>,

        /// Node to show
        #[arg(long)]
        node: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Chunk { .. } => "chunk",
            Commands::Build { .. } => "build",
            Commands::Index { .. } => "index",
            Commands::Ask { .. } => "ask",
            Commands::Inspect { .. } => "inspect",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("graph_reader=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(&config, cli.command).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Chunk {
            document,
            chunk_len,
            header,
            footer,
            out,
        } => {
            commands::chunk::run(
                config,
                commands::chunk::ChunkArgs {
                    document,
                    chunk_len,
                    header,
                    footer,
                    out,
                },
            )?;
        }
        Commands::Build {
            chunks,
            graph_out,
            no_index,
        } => {
            commands::build::run(
                config,
                commands::build::BuildArgs {
                    chunks,
                    graph_out,
                    no_index,
                },
            )
            .await?;
        }
        Commands::Index { graph } => {
            commands::index::run(config, graph).await?;
        }
        Commands::Ask { query, show_trace } => {
            commands::ask::run(config, &query, show_trace).await?;
        }
        Commands::Inspect { graph, node } => {
            commands::inspect::run(config, graph, node.as_deref())?;
        }
    }

    Ok(())
}
