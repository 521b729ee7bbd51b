//! Tide engine: host process for the tide orchestration core.
//!
//! Reads bus messages (commands, events, flow triggers) as JSON lines on
//! stdin, runs them through the engine and its listeners, and prints the
//! commands meant for the external builders, deployers and runners on stdout.

mod bus;
mod config;
mod dispatcher;
mod github;
mod metrics;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tide_core::concurrency::FlowConcurrencyManager;
use tide_core::events::TideEvent;
use tide_core::flow::Flow;
use tide_core::memory::{InMemoryConcurrencyRecords, InMemoryEventStore, InMemoryTideTimeline};
use tide_core::pipeline::Pipeline;
use tide_core::ports::{SystemClock, TideRepository};
use tide_core::status::{DeploymentCommentListener, TideStatusListener};
use tide_core::{Tide, TideEngine};

use crate::bus::{ChannelPublisher, Message, StdoutExecutor, TimerScheduler, TracingLogStream};
use crate::dispatcher::Dispatcher;
use crate::github::GitHubClient;

#[derive(Parser)]
#[command(name = "tide-engine", about = "Tide orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process bus messages from stdin until interrupted
    Serve {
        /// JSON file with the registered flows
        #[arg(long, env = "TIDE_FLOWS")]
        flows: Option<PathBuf>,
    },
    /// Rebuild a tide from a JSON array of events and print its state
    Replay {
        #[arg(long)]
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { flows } => serve(flows.as_deref()).await,
        Command::Replay { events } => replay(&events).await,
    }
}

async fn serve(flows_path: Option<&Path>) -> anyhow::Result<()> {
    tracing::info!("Starting tide engine...");

    let config = config::ServerConfig::from_env();
    metrics::init_metrics(config.metrics_port);

    let flows = match flows_path {
        Some(path) => load_flows(path).await?,
        None => Vec::new(),
    };

    let concurrency = Arc::new(InMemoryConcurrencyRecords::new(
        config.default_concurrency_limit(),
    ));
    for flow in &flows {
        if let Some(limit) = flow.concurrency_limit {
            concurrency.set_limit(flow.uuid, Some(limit)).await;
        }
    }
    tracing::info!("Registered {} flows", flows.len());

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let store = Arc::new(InMemoryEventStore::new());
    let timeline = Arc::new(InMemoryTideTimeline::new());
    let logs = Arc::new(TracingLogStream);
    let github = Arc::new(GitHubClient::new(
        config.github_token.clone(),
        config.dashboard_url.clone(),
        config.status_context.clone(),
    ));
    let clock = Arc::new(SystemClock);
    let tides = TideRepository::new(store.clone());

    let engine = TideEngine::new(
        store,
        Arc::new(ChannelPublisher::new(tx.clone())),
        Arc::new(TimerScheduler::new(tx.clone())),
        Arc::new(StdoutExecutor),
        Arc::new(FlowConcurrencyManager::new(concurrency.clone())),
    );

    let dispatcher = Dispatcher {
        engine,
        flows: flows.into_iter().map(|flow| (flow.uuid, flow)).collect::<HashMap<_, _>>(),
        concurrency,
        timeline: timeline.clone(),
        clock: clock.clone(),
        status: TideStatusListener::new(
            tides.clone(),
            github.clone(),
            logs.clone(),
            timeline,
            clock,
        ),
        comments: DeploymentCommentListener::new(tides, github, logs),
    };

    tokio::spawn(read_stdin(tx));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => dispatcher.handle(message).await,
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn read_stdin(tx: mpsc::UnboundedSender<Message>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Message>(&line) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring malformed message: {e}"),
        }
    }

    tracing::info!("Input closed, waiting for scheduled commands");
}

async fn load_flows(path: &Path) -> anyhow::Result<Vec<Flow>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading flows from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing flows in {}", path.display()))
}

async fn replay(path: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading events from {}", path.display()))?;
    let events: Vec<TideEvent> = serde_json::from_str(&content)?;

    let tide = Tide::from_events(events)?;
    let mut pipeline = Pipeline::for_tide(&tide);
    pipeline.replay(tide.events());

    let reference = tide.code_reference();
    println!(
        "tide {} on {}@{} ({})",
        tide.uuid(),
        reference.repository.full_name,
        reference.branch,
        reference.sha
    );
    println!("status: {}", tide.status().as_str());
    for (task_id, status) in pipeline.statuses() {
        println!("  {:<24} {}", task_id.as_str(), status.as_str());
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
