//! Swarmhub CLI — run the helper hub or fire one-shot commands at it.
//!
//! `serve` runs the hub in the foreground until interrupted; the remaining
//! subcommands are thin one-shot clients over the hub socket, for use from
//! scripts and agent playbooks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use swarmhub::runtime::CommandRuntime;
use swarmhub::{send_request, Config, ContainerRuntime, Hub, HubOptions, MessageLog, Request};

#[derive(Parser)]
#[command(name = "swarmhub", version, about = "Helper hub for trees of sandboxed coding agents")]
struct Cli {
    /// Override the hub socket path.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub server until interrupted.
    Serve {
        /// Override the configured breadth (-1 = unbounded).
        #[arg(long)]
        breadth: Option<i64>,
        /// Override the configured helper image.
        #[arg(long)]
        image: Option<String>,
    },
    /// Ask the hub to spawn a helper container.
    Spawn {
        /// Child address to spawn.
        helper_num: u64,
        /// Model variant for the child agent (e.g. sonnet).
        #[arg(long)]
        model: Option<String>,
        /// Helpers directory to mount into the child container.
        #[arg(long)]
        helpers_dir: Option<String>,
    },
    /// Ask the hub to stop a helper container.
    Stop {
        /// Container name, as returned by spawn.
        container_name: String,
    },
    /// Send a text message to a specific helper.
    Send {
        /// Target helper number.
        to: u64,
        /// Message text.
        message: String,
    },
    /// Broadcast a text message to all connected helpers.
    Broadcast {
        /// Message text.
        message: String,
    },
    /// Render the inter-agent message log.
    Log {
        /// Show only the last N entries.
        #[arg(long)]
        last: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    match cli.command {
        Commands::Serve { breadth, image } => run_serve(config, breadth, image).await,
        Commands::Spawn {
            helper_num,
            model,
            helpers_dir,
        } => {
            let resp = one_shot(
                &config,
                Request::Spawn {
                    helper_num,
                    model,
                    helpers_dir,
                },
            )
            .await?;
            println!(
                "Spawned helper {helper_num} as {}.",
                resp.container_name.as_deref().unwrap_or("<unnamed>")
            );
            Ok(())
        }
        Commands::Stop { container_name } => {
            one_shot(&config, Request::Stop { container_name }).await?;
            println!("Stopped.");
            Ok(())
        }
        Commands::Send { to, message } => {
            one_shot(
                &config,
                Request::Send {
                    to,
                    payload: serde_json::json!({"text": message}),
                },
            )
            .await?;
            println!("Message sent to helper {to}.");
            Ok(())
        }
        Commands::Broadcast { message } => {
            one_shot(
                &config,
                Request::Broadcast {
                    payload: serde_json::json!({"text": message}),
                },
            )
            .await?;
            println!("Message broadcast to all helpers.");
            Ok(())
        }
        Commands::Log { last } => render_log(&config, last),
    }
}

/// Run the hub in the foreground until SIGINT.
async fn run_serve(mut config: Config, breadth: Option<i64>, image: Option<String>) -> Result<()> {
    if let Some(breadth) = breadth {
        config.breadth = breadth;
    }
    if let Some(image) = image {
        config.image = image;
    }
    let breadth = config.breadth()?;

    let runtime: Arc<dyn ContainerRuntime> = match &config.runtime_command {
        Some(command) => Arc::new(CommandRuntime::new(
            command,
            &config.image,
            &config.container_prefix,
        )),
        None => Arc::new(CommandRuntime::detect(
            &config.image,
            &config.container_prefix,
        )?),
    };

    let message_log = config
        .message_log
        .as_ref()
        .map(MessageLog::open)
        .transpose()?;

    let hub = Hub::start(HubOptions {
        socket_path: config.socket_path.clone(),
        breadth,
        spawn_depth: config.spawn_depth,
        runtime,
        message_log,
    })?;

    println!("Hub listening on {}. Press Ctrl-C to stop.", hub.socket_path().display());
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    println!("Shutting down...");
    hub.shutdown().await;
    Ok(())
}

/// Fire one request at the hub and fail on an error response.
async fn one_shot(config: &Config, request: Request) -> Result<swarmhub::Response> {
    let resp = send_request(&config.socket_path, &request).await?;
    if !resp.is_ok() {
        bail!(
            "{}",
            resp.message
                .unwrap_or_else(|| "hub reported an error".to_string())
        );
    }
    Ok(resp)
}

/// Pretty-print the JSONL message log.
fn render_log(config: &Config, last: Option<usize>) -> Result<()> {
    let Some(path) = &config.message_log else {
        bail!("no message log configured");
    };
    if !path.is_file() {
        bail!("no message log found at {}", path.display());
    }

    let content = std::fs::read_to_string(path)?;
    let entries: Vec<serde_json::Value> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let skip = last.map_or(0, |n| entries.len().saturating_sub(n));
    for entry in &entries[skip..] {
        let ts = entry["ts"].as_str().unwrap_or("?");
        match entry["type"].as_str() {
            Some("message") => {
                let text = entry["payload"]["text"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| entry["payload"].to_string());
                println!("{ts}  {} -> {}: {text}", entry["from"], entry["to"]);
            }
            Some("control") => {
                println!(
                    "{ts}  [{}] helper {}",
                    entry["event"].as_str().unwrap_or("?"),
                    entry["helper"]
                );
            }
            _ => println!("{ts}  {entry}"),
        }
    }
    Ok(())
}
