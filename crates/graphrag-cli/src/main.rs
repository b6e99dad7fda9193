//! graphrag CLI - routed knowledge-graph question answering

mod doctor;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use graphrag_core::config::Config;
use graphrag_core::protocol::{SSE_DONE, ToolView};
use graphrag_core::service::{ChatService, InboundRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::doctor::HealthStatus;

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(author, version, about = "Routed knowledge-graph RAG over a chat-completion protocol", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Output options shared by request commands
#[derive(clap::Args, Debug, Clone, Default)]
struct OutputArgs {
    /// Stream SSE chunks instead of printing one response
    #[arg(long)]
    stream: bool,

    /// Render tool activity as assistant step envelopes
    #[arg(long)]
    assistant_view: bool,

    /// Request header as `Name: value` (repeatable); `X-Ai-Interface: assistant` selects the assistant view
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

impl OutputArgs {
    fn view(&self) -> ToolView {
        if self.assistant_view {
            return ToolView::Assistant;
        }
        ToolView::from_headers(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got '{}'", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// Question text
        question: String,
        /// Override the default assistant persona
        #[arg(short, long)]
        system: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run a raw `{messages: [...]}` request body
    Request {
        /// Read the body from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries protocol output only
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("graphrag=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            question,
            system,
            output,
        } => {
            let mut request = InboundRequest::question(question);
            if let Some(system) = system {
                request = request.with_system(system);
            }
            cmd_request(request, output).await
        }

        Commands::Request { file, output } => {
            let body = read_body(file.as_deref())?;
            let request = InboundRequest::from_json(&body).map_err(report)?;
            cmd_request(request, output).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

fn read_body(path: Option<&Path>) -> anyhow::Result<String> {
    let body = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        None => {
            let mut body = String::new();
            io::stdin().read_to_string(&mut body)?;
            body
        }
    };

    if body.trim().is_empty() {
        anyhow::bail!("Request body is empty");
    }
    Ok(body)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling request");
                token.cancel();
            }
            Err(e) => debug!(error = %e, "Could not listen for Ctrl-C"),
        }
    });
}

async fn cmd_request(request: InboundRequest, output: OutputArgs) -> anyhow::Result<()> {
    let config = Config::load()?;
    let service = ChatService::connect(&config).await.map_err(report)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let view = output.view();
    debug!(?view, stream = output.stream, "Dispatching request");

    if output.stream {
        stream_request(&service, request, view, cancel).await
    } else {
        let response = service
            .generate(request, view, cancel)
            .await
            .map_err(report)?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }
}

async fn stream_request(
    service: &ChatService,
    request: InboundRequest,
    view: ToolView,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut chunks = service.generate_stream(request, view, cancel).map_err(report)?;
    let mut stdout = io::stdout();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(report)?;
        stdout.write_all(chunk.to_sse()?.as_bytes())?;
        stdout.flush()?;
    }

    stdout.write_all(SSE_DONE.as_bytes())?;
    stdout.flush()?;
    info!("Stream finished");
    Ok(())
}

/// Log a request failure with its code and hint before handing it to anyhow
///
/// Rejected input is a warning; failures on the service side are errors.
fn report(err: graphrag_core::Error) -> anyhow::Error {
    let hint = err.suggestion().unwrap_or_default();
    if err.is_client_error() {
        warn!(code = err.code(), status = err.status_code(), hint = %hint, "Request rejected");
    } else {
        error!(code = err.code(), status = err.status_code(), hint = %hint, "Request failed");
    }
    anyhow::anyhow!("[{}] {}", err.code(), err)
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.validate()?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    let checks = doctor::run_checks().await;

    if !quiet {
        println!("graphrag Health Check");
        println!("=====================");
        println!();
        for check in &checks {
            println!("{}", check.line());
        }
        println!();
    }

    match doctor::overall(&checks) {
        HealthStatus::Error => {
            if !quiet {
                println!("Some checks failed. See above for details.");
            }
            anyhow::bail!("health check failed")
        }
        _ => {
            if !quiet {
                println!("All checks passed!");
            }
            Ok(())
        }
    }
}
