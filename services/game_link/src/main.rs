//! Foundation link command line
//!
//! `connect` plays the game side: it opens a link with the configured role,
//! logs the negotiated categories and stays up until Ctrl-C or a foundation
//! shutdown. `host` plays a simulated foundation for one game.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use link::{
    ConnectOutcome, HostOptions, HostSession, Link, LinkEvent, LinkMessage, LinkOptions, NegotiationLevel,
};
use link_config::LinkConfig;
use network::{SocketTransport, TransportListener};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "game-link", author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides `[logging] level`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a foundation as a game
    Connect {
        /// Foundation host, overrides `[transport] host`
        #[arg(long)]
        host: Option<String>,

        /// Foundation port, overrides `[transport] port`
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Simulate a foundation for one game
    Host {
        /// Listen address; defaults to the configured host and port
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Send `ShutDown` this many seconds after negotiation
        #[arg(long)]
        shutdown_after_secs: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = LinkConfig::load(args.config.as_deref())?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, args.json_logs || config.logging.json)?;
    info!("game-link {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Connect { host, port } => run_connect(config, host, port).await,
        Command::Host {
            bind,
            shutdown_after_secs,
        } => run_host(config, bind, shutdown_after_secs.map(Duration::from_secs)).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log filter {level:?}"))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

async fn run_connect(mut config: LinkConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.transport.host = host;
    }
    if let Some(port) = port {
        config.transport.port = port;
    }
    config.validate()?;

    let role = config.role()?;
    let transport = SocketTransport::client(config.transport_config());
    let options = LinkOptions::default().with_reply_timeout(config.reply_timeout());
    let link = Link::new(role.clone(), transport, options);
    // Before connecting: faults right after `connect()` must reach the loop
    let mut events = link.subscribe_events();

    info!(%role, host = %config.transport.host, port = config.transport.port, "Connecting");
    match link.connect().await.context("Link connect failed")? {
        ConnectOutcome::Connected => {
            let levels = std::iter::once(NegotiationLevel::Link).chain(role.levels());
            for level in levels {
                let categories: Vec<String> = link
                    .installed_categories(level)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                info!(%level, categories = %categories.join(", "), "Negotiated");
            }
        }
        ConnectOutcome::ShutDown => {
            warn!("Foundation shut the link down during negotiation");
            link.disconnect().await?;
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                if session_ended(event) {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    link.disconnect().await?;
    Ok(())
}

/// Log a link event; `true` once the session is over
fn session_ended(event: Option<LinkEvent>) -> bool {
    match event {
        Some(LinkEvent::ShutDown) => {
            info!("Foundation shut the link down");
            true
        }
        Some(LinkEvent::TransportFailed) => {
            error!("Transport to the foundation failed");
            true
        }
        // Queued during connect, already logged with the categories
        Some(LinkEvent::LevelNegotiated(level)) => {
            debug!(%level, "Level negotiated");
            false
        }
        None => true,
    }
}

async fn run_host(config: LinkConfig, bind: Option<SocketAddr>, shutdown_after: Option<Duration>) -> Result<()> {
    let address = match bind {
        Some(address) => address,
        None => format!("{}:{}", config.transport.host, config.transport.port)
            .parse()
            .context("Configured host is not a listen address")?,
    };
    let listener = TransportListener::bind(address, config.transport_config()).await?;
    info!(address = %listener.local_addr()?, "Waiting for a game");

    let options = HostOptions::default().with_reply_timeout(config.reply_timeout());
    let session = HostSession::accept(&listener, options).await?;
    info!(role = %session.role(), "Negotiating");

    for outcome in session.negotiate_role().await? {
        if outcome.accepted {
            info!(level = %outcome.level, selected = outcome.selected.len(), "Level accepted");
        } else {
            error!(level = %outcome.level, "Game rejected the level");
        }
    }

    let shutdown = async {
        match shutdown_after {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            message = session.next_inbound() => match message {
                Some(LinkMessage::Category { level, category, kind, payload }) => {
                    info!(%level, %category, ?kind, bytes = payload.len(), "Game message");
                }
                Some(other) => warn!(message = %other.describe(), "Unexpected game message"),
                None => break,
            },
            _ = &mut shutdown => {
                session.shut_down().await?;
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown signal received");
                session.shut_down().await?;
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_arguments() {
        let args = Args::try_parse_from([
            "game-link",
            "--config",
            "link.toml",
            "--json-logs",
            "connect",
            "--port",
            "9400",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("link.toml")));
        assert!(args.json_logs);
        assert!(matches!(
            args.command,
            Command::Connect {
                host: None,
                port: Some(9400)
            }
        ));
    }

    #[test]
    fn test_host_arguments() {
        let args = Args::try_parse_from([
            "game-link",
            "host",
            "--bind",
            "0.0.0.0:9300",
            "--shutdown-after-secs",
            "3",
        ])
        .unwrap();
        match args.command {
            Command::Host {
                bind,
                shutdown_after_secs,
            } => {
                assert_eq!(bind, Some("0.0.0.0:9300".parse().unwrap()));
                assert_eq!(shutdown_after_secs, Some(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_session_events() {
        assert!(!session_ended(Some(LinkEvent::LevelNegotiated(NegotiationLevel::Link))));
        assert!(!session_ended(Some(LinkEvent::LevelNegotiated(NegotiationLevel::Shell))));
        assert!(session_ended(Some(LinkEvent::ShutDown)));
        assert!(session_ended(Some(LinkEvent::TransportFailed)));
        assert!(session_ended(None));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["game-link"]).is_err());
    }
}
