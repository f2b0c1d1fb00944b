//! Command-line client for a running agent's control channel

use clap::{Parser, Subcommand};
use fincache_proto::{ControlMessage, ControlReply};
use fincache_server::server::CONTROL_PATH;
use futures_util::{SinkExt, StreamExt};
use std::error::Error;
use std::process::ExitCode;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "fincache-ctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the running agent
    #[arg(long, env = "FINCACHE_LISTEN_ADDR", default_value = "127.0.0.1:8724")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the active generation and its entry count
    Status,

    /// Delete cached entries
    Clear {
        /// Only delete entries of the active generation whose target starts with this
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Activate the waiting generation now
    SkipWaiting,

    /// Install a new cache version
    Install { version: String },

    /// Print lifecycle announcements as they happen
    Watch {
        /// Answer every update announcement with skip-waiting
        #[arg(long)]
        auto_activate: bool,
    },
}

impl Command {
    fn request(&self) -> Option<ControlMessage> {
        match self {
            Command::Status => Some(ControlMessage::QueryStatus),
            Command::Clear { prefix } => Some(ControlMessage::ClearCache {
                prefix: prefix.clone(),
            }),
            Command::SkipWaiting => Some(ControlMessage::SkipWaiting),
            Command::Install { version } => Some(ControlMessage::InstallUpdate {
                version: version.clone(),
            }),
            Command::Watch { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("fincache-ctl: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when the agent answered with an error reply
async fn run(cli: Cli) -> Result<bool, Box<dyn Error>> {
    let url = format!("ws://{}{}", cli.addr, CONTROL_PATH);
    debug!("Connecting to {}", url);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sender, mut receiver) = socket.split();

    let auto_activate = match &cli.command {
        Command::Watch { auto_activate } => *auto_activate,
        _ => false,
    };

    if let Some(message) = cli.command.request() {
        sender.send(Message::Text(message.to_json()?.into())).await?;
    }

    while let Some(msg) = receiver.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let reply = ControlReply::from_json(text.as_str())?;
        println!("{}", serde_json::to_string_pretty(&reply)?);

        if auto_activate && matches!(reply, ControlReply::UpdateAvailable { .. }) {
            info!("Update available, activating");
            sender
                .send(Message::Text(ControlMessage::SkipWaiting.to_json()?.into()))
                .await?;
            continue;
        }

        // One-shot commands finish at their own reply; announcements may arrive first
        if cli.command.request().is_some() && !reply.is_announcement() {
            let _ = sender.close().await;
            return Ok(!matches!(reply, ControlReply::Error { .. }));
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clear_with_prefix() {
        let cli = Cli::try_parse_from(["fincache-ctl", "clear", "--prefix", "/api/categories"]).unwrap();
        assert_eq!(
            cli.command.request(),
            Some(ControlMessage::ClearCache {
                prefix: Some("/api/categories".to_string())
            })
        );
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["fincache-ctl", "--addr", "127.0.0.1:9999", "install", "v9"]).unwrap();
        assert_eq!(cli.addr, "127.0.0.1:9999");
        assert_eq!(
            cli.command.request(),
            Some(ControlMessage::InstallUpdate {
                version: "v9".to_string()
            })
        );
    }

    #[test]
    fn test_watch_sends_nothing() {
        let cli = Cli::try_parse_from(["fincache-ctl", "watch", "--auto-activate"]).unwrap();
        assert!(cli.command.request().is_none());
        assert!(matches!(cli.command, Command::Watch { auto_activate: true }));
    }
}
