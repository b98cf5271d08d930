use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{debug, error, info};

use chatlink::config::{auth_scheme_from_env, StreamProtocol};
use chatlink::{event_handler, BotAdapter, Config, Error, EventHandler, InboundEvent};

#[derive(Debug, Parser)]
#[command(name = "chatlink", version, about = "Keep a bot connected to its platform gateway")]
struct Cli {
    /// Stream protocol. Overrides CHATLINK_PROTOCOL.
    #[arg(long, value_enum)]
    protocol: Option<ProtocolArg>,

    /// Websocket URL for the relay protocol. Overrides CHATLINK_RELAY_URL.
    #[arg(long)]
    relay_url: Option<String>,

    /// Log every inbound event body at info level.
    #[arg(long)]
    print_events: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Signal,
    Relay,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatlink=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::from_env().and_then(|config| apply_cli(config, &cli)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chatlink: {e}");
            std::process::exit(2);
        }
    };
    print_banner(&config);

    let adapter = BotAdapter::new(config);
    let handler = if cli.print_events {
        event_handler(|event: InboundEvent| async move {
            info!(sequence = ?event.sequence, data = %event.data, "event");
        })
    } else {
        quiet_handler()
    };

    let runner = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.connect(handler).await })
    };

    shutdown_signal().await;
    info!("shutdown signal received");
    adapter.close();

    if let Err(e) = runner.await {
        error!(error = %e, "connection task failed");
    }
}

fn quiet_handler() -> EventHandler {
    event_handler(|event: InboundEvent| async move {
        debug!(sequence = ?event.sequence, "event received");
    })
}

fn apply_cli(mut config: Config, cli: &Cli) -> chatlink::Result<Config> {
    let configured_relay = match &config.protocol {
        StreamProtocol::Relay { url } => Some(url.clone()),
        StreamProtocol::Signal => None,
    };

    match cli.protocol {
        Some(ProtocolArg::Signal) => config = config.with_protocol(StreamProtocol::Signal),
        Some(ProtocolArg::Relay) => {
            let url = cli
                .relay_url
                .clone()
                .or(configured_relay)
                .ok_or_else(|| Error::Config("--relay-url is required for the relay protocol".into()))?;
            config = config.with_relay(url);
        }
        None => {
            if let (Some(url), Some(_)) = (&cli.relay_url, configured_relay) {
                config = config.with_relay(url.clone());
            }
        }
    }

    // A protocol switch resets the scheme to its default; an explicit one wins.
    if let Some(scheme) = auth_scheme_from_env()? {
        config.auth_scheme = scheme;
    }
    Ok(config)
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let sha = env!("GIT_SHA");
    let protocol = match &config.protocol {
        StreamProtocol::Signal => "signal".to_string(),
        StreamProtocol::Relay { url } => format!("relay ({url})"),
    };

    eprintln!();
    eprintln!("  \x1b[1;36mchatlink\x1b[0m \x1b[2mv{version} ({sha})\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mappid\x1b[0m        {}", config.appid);
    eprintln!("  \x1b[2mprotocol\x1b[0m     {protocol}");
    eprintln!("  \x1b[2mapi\x1b[0m          {}", config.api_base);
    eprintln!(
        "  \x1b[2mheartbeat\x1b[0m    {}s / {}s",
        config.heartbeat.interval.as_secs(),
        config.heartbeat.timeout.as_secs()
    );
    eprintln!("  \x1b[2mreconnect\x1b[0m    {}s", config.reconnect_delay.as_secs());
    eprintln!();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
