use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use sipsimple::{Route, SimpleConfig, SipUri, TransportKind};

mod commands;
mod logging;

use logging::{LoggingConfig, log_welcome, setup_logging};

/// SIP SIMPLE command-line client
#[derive(Parser, Debug)]
#[command(name = "sipsimple", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to <config dir>/sipsimple/config.toml when it exists
    #[arg(short, long, env = "SIPSIMPLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Account address of record, e.g. sip:alice@192.0.2.1
    #[arg(short, long, global = true)]
    account: Option<SipUri>,

    /// Account password
    #[arg(long, env = "SIPSIMPLE_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Outbound proxy / registrar IPv4 address
    #[arg(long, global = true, value_parser = parse_route)]
    proxy: Option<Route>,

    /// Local address to bind the UDP transport to
    #[arg(short, long, global = true)]
    local_address: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the account and keep the registration refreshed until Ctrl-C
    Register {
        /// Registration lifetime in seconds
        #[arg(short, long)]
        duration: Option<u32>,
        /// Unregister right after the first successful registration
        #[arg(long)]
        once: bool,
    },
    /// Send a pager-mode message
    Message {
        /// Recipient URI
        to: SipUri,
        /// Message text
        text: String,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },
    /// Publish event state and keep it refreshed until Ctrl-C
    Publish {
        #[arg(long, default_value = "presence")]
        event: String,
        #[arg(long, default_value = "application/pidf+xml")]
        content_type: String,
        /// File holding the document to publish
        #[arg(long)]
        body_file: PathBuf,
        /// Publication lifetime in seconds
        #[arg(short, long)]
        duration: Option<u32>,
        /// Remove the publication right after it succeeded
        #[arg(long)]
        once: bool,
    },
    /// Show how a route is addressed
    Route {
        address: String,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long, default_value = "udp")]
        transport: TransportKind,
    },
    /// Parse an RFC 3339 timestamp, or print the current time
    Timestamp { value: Option<String> },
}

fn parse_route(value: &str) -> Result<Route, String> {
    match value.rsplit_once(':') {
        Some((address, port)) => {
            let port = port.parse::<u16>().map_err(|e| format!("invalid port: {}", e))?;
            Route::new(address)
                .and_then(|route| route.with_port(port))
                .map_err(|e| e.to_string())
        }
        None => Route::new(value).map_err(|e| e.to_string()),
    }
}

fn load_config(cli: &Cli) -> Result<SimpleConfig> {
    let mut config = match &cli.config {
        Some(path) => SimpleConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let default_path = dirs::config_dir().map(|dir| dir.join("sipsimple").join("config.toml"));
            match default_path.filter(|path| path.is_file()) {
                Some(path) => SimpleConfig::from_file(&path)
                    .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
                None => SimpleConfig::default(),
            }
        }
    };

    if let Some(account) = &cli.account {
        config.account.uri = Some(account.clone());
    }
    if let Some(password) = &cli.password {
        config.account.password = Some(password.clone());
    }
    if let Some(route) = &cli.proxy {
        config.registrar.route = Some(route.clone());
    }
    if let Some(addr) = cli.local_address {
        config.sip.local_address = addr;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    setup_logging(&LoggingConfig::from_section(&config.logging)?)?;
    log_welcome("sipsimple", sipsimple::VERSION);
    debug!("Effective configuration: {:?}", config.sip);

    match cli.command {
        Command::Register { duration, once } => commands::register(&config, duration, once).await,
        Command::Message {
            to,
            text,
            content_type,
        } => commands::message(&config, to, text, content_type).await,
        Command::Publish {
            event,
            content_type,
            body_file,
            duration,
            once,
        } => commands::publish(&config, event, content_type, body_file, duration, once).await,
        Command::Route {
            address,
            port,
            transport,
        } => commands::route(&address, port, transport),
        Command::Timestamp { value } => commands::timestamp(value.as_deref()),
    }
}
