//! Interactive agent session from the terminal.
//!
//! Run with: cargo run -p session-cli -- --url http://localhost:3000
//!
//! Each stdin line is sent as a user message; every broker message is
//! printed to stdout as one JSON line. Logs go to stderr.

use clap::Parser;
use sandbox_bridge_session::{InputMessage, SessionConfig, SessionManager, SessionOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "session-cli", about = "Talk to a sandboxed agent")]
struct Args {
    /// Broker URL; skips sandbox provisioning.
    #[arg(long)]
    url: Option<String>,

    /// Provisioning platform URL (falls back to SANDBOX_PLATFORM_URL).
    #[arg(long)]
    platform_url: Option<String>,

    /// Client id (falls back to SANDBOX_CLIENT_ID).
    #[arg(long)]
    client_id: Option<String>,

    /// Connect to the sandbox directly instead of through the platform proxy.
    #[arg(long)]
    no_proxy: bool,

    #[arg(long)]
    snapshot: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    system_prompt: Option<String>,

    /// Agent session to resume.
    #[arg(long)]
    resume: Option<String>,

    /// Stop the sandbox on exit without deleting it.
    #[arg(long)]
    keep_sandbox: bool,
}

impl Args {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            direct_url: self.url.clone(),
            platform_url: self.platform_url.clone(),
            client_id: self.client_id.clone(),
            use_proxy: self.no_proxy.then_some(false),
            snapshot: self.snapshot.clone(),
            config: SessionConfig {
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                resume_session_id: self.resume.clone(),
                ..SessionConfig::default()
            },
            ..SessionOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let session = SessionManager::new(args.session_options());

    let _printer = session.on_message(|msg| match serde_json::to_string(msg) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!("Failed to serialize message: {e}"),
    });

    session.start().await?;
    if let Some(id) = session.sandbox_id() {
        tracing::info!(sandbox_id = %id, "Session open");
    }

    let result = relay_stdin(&session).await;
    session.stop_with(!args.keep_sandbox).await;
    result
}

async fn relay_stdin(session: &SessionManager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let message = if line == "/interrupt" {
                    InputMessage::Interrupt
                } else {
                    InputMessage::user(line)
                };
                session.send(&message)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing session");
                break;
            }
        }
    }
    Ok(())
}
