use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use chat_outbox::config::{Settings, SimulatorConfig};
use chat_outbox::delivery::MemoryDeliverer;
use chat_outbox::error::AppError;
use chat_outbox::message::Message;
use chat_outbox::metrics::encode_metrics;
use chat_outbox::queue::MessageQueueService;
use chat_outbox::shutdown::GracefulShutdown;
use chat_outbox::telemetry;

/// Interval between periodic status log lines
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

const HELP: &str = "\
Type a line to send it as a chat message.
  /status          queue counts
  /queued          messages awaiting delivery
  /failed          messages that exhausted their retries
  /retry <id>      retry one failed message
  /retry-all       retry every failed message
  /discard <id>    drop one failed message
  /clear           drop every failed message
  /metrics         prometheus metrics
  /quit            shut down";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Status,
    Queued,
    Failed,
    Retry(String),
    RetryAll,
    Discard(String),
    Clear,
    Metrics,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Send(line.to_string()));
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match (name, arg) {
            ("/status", None) => Some(Command::Status),
            ("/queued", None) => Some(Command::Queued),
            ("/failed", None) => Some(Command::Failed),
            ("/retry", Some(id)) => Some(Command::Retry(id.to_string())),
            ("/retry-all", None) => Some(Command::RetryAll),
            ("/discard", Some(id)) => Some(Command::Discard(id.to_string())),
            ("/clear", None) => Some(Command::Clear),
            ("/metrics", None) => Some(Command::Metrics),
            ("/quit", None) => Some(Command::Quit),
            _ => Some(Command::Help),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().map_err(AppError::from)?;

    // Initialize tracing
    telemetry::init_tracing(&settings.log).map_err(|e| AppError::Telemetry(e.to_string()))?;
    tracing::info!("Configuration loaded");

    let deliverer = Arc::new(MemoryDeliverer::with_simulation(
        settings.simulator.failure_rate,
        Duration::from_millis(settings.simulator.latency_ms),
    ));
    let service = Arc::new(MessageQueueService::from_settings(
        deliverer,
        &settings.queue,
    ));
    tracing::info!(
        chat_id = %settings.simulator.chat_id,
        failure_rate = settings.simulator.failure_rate,
        "Outbox ready"
    );
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_timer = tokio::time::interval(STATUS_LOG_INTERVAL);
    // Skip immediate first tick
    status_timer.tick().await;

    let shutdown = shutdown_signal_handler();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line.map_err(AppError::from)? else {
                    tracing::info!("Input closed");
                    break;
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if command == Command::Quit {
                    break;
                }
                run_command(&service, &settings.simulator, command).await?;
            }
            _ = status_timer.tick() => {
                let status = service.queue_status().await;
                tracing::info!(
                    queued = status.queued_count,
                    failed = status.failed_count,
                    "Outbox status"
                );
            }
        }
    }

    let result = GracefulShutdown::new(service).execute("console exit").await;
    print_json(&result)?;

    Ok(())
}

async fn run_command(
    service: &MessageQueueService,
    simulator: &SimulatorConfig,
    command: Command,
) -> Result<()> {
    match command {
        Command::Send(content) => {
            let message = Message::text(&simulator.chat_id, &simulator.sender_id, content);
            let id = message.id.clone();
            if service.enqueue(message).await {
                println!("queued {}", id);
            }
        }
        Command::Status => print_json(&service.queue_status().await)?,
        Command::Queued => print_json(&service.queued_messages().await)?,
        Command::Failed => print_json(&service.failed_messages().await)?,
        Command::Retry(id) => match service.retry_message(&id).await {
            Ok(message) => println!("delivered {} ({})", message.id, message.status),
            Err(e) => println!("retry failed: {}", e),
        },
        Command::RetryAll => match service.retry_all_failed_messages().await {
            Ok(report) => print_json(&report)?,
            Err(e) => println!("retry-all failed: {}", e),
        },
        Command::Discard(id) => match service.remove_failed_message(&id).await {
            Ok(()) => println!("discarded {}", id),
            Err(e) => println!("{}", e),
        },
        Command::Clear => match service.clear_failed_messages().await {
            Ok(()) => println!("failure store cleared"),
            Err(e) => println!("{}", e),
        },
        Command::Metrics => print!("{}", encode_metrics()?),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
