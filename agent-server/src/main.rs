//! Agent server: runs agent cycles over HTTP and streams their trace as SSE.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use agent::io::config::{config_path, load_config};
use agent::io::planner::HttpPlanner;
use agent::io::sandbox::Sandbox;
use agent::io::trace::{HttpTraceSink, TraceSink};
use agent::logging;
use agent::orchestrator::Agent;
use anyhow::Context;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::{AppState, TraceBus};

#[derive(Parser)]
#[command(name = "agent-server")]
#[command(about = "HTTP front for the agent with a per-session trace stream")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project root the agent edits
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/.agent/config.toml`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Push trace events to `{planner base}/trace/push` instead of the local bus
    #[arg(long)]
    remote_trace: bool,

    /// Directory containing UI static files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_with_default("warn,agent_server=info");

    let args = Args::parse();

    let config_file = args.config.clone().unwrap_or_else(|| config_path(&args.root));
    let config = load_config(&config_file)?;
    let sandbox = Sandbox::new(&args.root).context("open project root")?;
    info!(
        root = %sandbox.root().display(),
        planner_url = %config.planner_url,
        "starting agent-server"
    );

    let bus = Arc::new(TraceBus::new());
    let sink: Arc<dyn TraceSink> = if args.remote_trace {
        info!("trace events go to the planner's trace endpoint");
        Arc::new(HttpTraceSink::new(config.trace_timeout()))
    } else {
        bus.clone()
    };
    let planner = Arc::new(HttpPlanner::new(config.planning_timeout()));
    let agent = Agent::new(sandbox, config, planner, sink);
    let state = AppState::new(agent, bus);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = routes::router().layer(cors).with_state(state);

    if let Some(ui_dir) = args.ui_dir {
        if ui_dir.exists() {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
        } else {
            info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        }
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
