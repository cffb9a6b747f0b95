//! Connection broker for a sandboxed Claude agent.
//!
//! Run with: cargo run -p broker-server -- --workspace-dir /tmp/agent
//!
//! Then `POST /config` for a connection token and open `/ws?token=...`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use sandbox_bridge_core::{AgentOptions, DEFAULT_TOKEN_TTL, SessionConfig};
use sandbox_bridge_executor::ClaudeRuntime;
use sandbox_bridge_transport::{Broker, create_broker_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "broker-server", about = "Connection broker for a sandboxed agent")]
struct Args {
    #[arg(long, env = "BROKER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "BROKER_PORT", default_value_t = 3000)]
    port: u16,

    /// Model used unless the client picks one.
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    system_prompt: Option<String>,

    /// Directory the agent works in; created on first start.
    #[arg(long, env = "WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Command that launches the Claude CLI, e.g. `npx -y @anthropic-ai/claude-code`.
    #[arg(long, env = "CLAUDE_COMMAND", default_value = "claude")]
    claude_command: String,

    /// Lifetime of an unused connection token.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL.as_secs())]
    token_ttl_secs: u64,
}

impl Args {
    fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            session: SessionConfig {
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                ..SessionConfig::default()
            },
            workspace_dir: self.workspace_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let runtime = Arc::new(ClaudeRuntime::new(args.claude_command.clone()));
    let broker = Arc::new(
        Broker::new(runtime, args.agent_options())
            .with_token_ttl(Duration::from_secs(args.token_ttl_secs)),
    );
    let config = broker.effective_config();
    tracing::info!(
        model = %config.model,
        workspace = %config.workspace_dir.display(),
        "Broker configured"
    );

    let app = create_broker_router(broker);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let addr = listener.local_addr()?;
    tracing::info!("Broker listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Broker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
