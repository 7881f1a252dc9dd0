//! sigbridge: relay hub server and companion tools.
//!
//! - `serve` runs the hub: UDP transport to the application, WebSocket
//!   fan-out to observers, `/health` and `/metrics`.
//! - `watch` connects as an observer and prints relayed signals.
//! - `emit` sends hand-written JSON datagrams to a UDP port.

#![deny(unsafe_code)]

mod emit;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sigbridge_core::logging::init_subscriber;
use sigbridge_observer::ObserverClient;
use sigbridge_server::metrics::install_recorder;
use sigbridge_server::protocol::ConstructParams;
use sigbridge_server::{BridgeServer, HubConfig, ObserverEvent, ServerConfig};
use sigbridge_settings::{BridgeSettings, load_settings_from_path, settings_path};

#[derive(Parser)]
#[command(name = "sigbridge", about = "UDP signal bridge with WebSocket observers")]
struct Cli {
    /// Settings file (defaults to ~/.sigbridge/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay hub.
    Serve {
        /// Host for the HTTP/WebSocket listener.
        #[arg(long)]
        host: Option<String>,
        /// Port for the HTTP/WebSocket listener.
        #[arg(long)]
        port: Option<u16>,
        /// Local UDP port the application sends signals to.
        #[arg(long)]
        signal_port: Option<u16>,
        /// UDP port the application listens on for commands.
        #[arg(long)]
        command_port: Option<u16>,
        /// Bind the transport at startup instead of waiting for `construct`.
        #[arg(long)]
        construct: bool,
    },
    /// Connect as an observer and print relayed signals as JSON lines.
    Watch {
        /// Hub WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Probe the server chain at this period.
        #[arg(long)]
        probe_interval_ms: Option<u64>,
        /// Log server chain averages at this period.
        #[arg(long, default_value_t = 5000)]
        report_interval_ms: u64,
    },
    /// Send JSON datagrams to a UDP port.
    Emit {
        /// Target host.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Target port.
        #[arg(long)]
        port: u16,
        /// JSON object to send once; reads lines from stdin when omitted.
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Command::Serve {
        host,
        port,
        signal_port,
        command_port,
        construct,
    } = &cli.command
    {
        apply_serve_overrides(&mut settings, host.clone(), *port, *signal_port, *command_port);
        settings.transport.construct_on_start |= *construct;
        settings.validate().context("Invalid settings")?;
    }

    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Command::Serve { .. } => serve(&settings).await,
        Command::Watch {
            url,
            probe_interval_ms,
            report_interval_ms,
        } => watch(&url, probe_interval_ms, report_interval_ms).await,
        Command::Emit { host, port, body } => match body {
            Some(body) => emit::send_once(&host, port, &body).await,
            None => emit::interactive(&host, port).await,
        },
    }
}

fn apply_serve_overrides(
    settings: &mut BridgeSettings,
    host: Option<String>,
    port: Option<u16>,
    signal_port: Option<u16>,
    command_port: Option<u16>,
) {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(port) = signal_port {
        settings.transport.signal_port = port;
    }
    if let Some(port) = command_port {
        settings.transport.command_port = port;
    }
}

async fn serve(settings: &BridgeSettings) -> Result<()> {
    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let server = BridgeServer::new(
        ServerConfig::from(settings),
        HubConfig::from(settings),
        metrics,
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(%addr, "sigbridge listening");
    tracing::info!("  WebSocket: ws://{addr}/ws");
    tracing::info!("  Health:    http://{addr}/health");
    tracing::info!("  Metrics:   http://{addr}/metrics");

    if settings.transport.construct_on_start {
        // a bind failure leaves the hub up; observers can still construct
        match server.hub().construct(ConstructParams::default()).await {
            Ok(ObserverEvent::Configured { signal_addr, command_port, .. }) => {
                tracing::info!(%signal_addr, command_port, "transport bound at startup");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "transport construct at startup failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    server.shutdown_gracefully(handle, None).await;
    Ok(())
}

async fn watch(url: &str, probe_interval_ms: Option<u64>, report_interval_ms: u64) -> Result<()> {
    let (client, mut events) = ObserverClient::connect(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    if let Some(ms) = probe_interval_ms.filter(|ms| *ms > 0) {
        client.enable_server_probe(Duration::from_millis(ms));
    }

    let mut report = tokio::time::interval(Duration::from_millis(report_interval_ms.max(1)));
    let _ = report.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
            event = events.recv() => match event {
                Some(ObserverEvent::Receive { msg }) => {
                    println!("{}", serde_json::to_string(&msg)?);
                }
                Some(ObserverEvent::Rejected { command, reason }) => {
                    tracing::warn!(command, reason, "command rejected");
                }
                Some(_) => {}
                None => {
                    tracing::info!("hub closed the connection");
                    break;
                }
            },
            _ = report.tick() => {
                let status = client.server_status();
                match status.averages {
                    Some(avg) => tracing::info!(
                        alive = status.alive,
                        samples = status.samples,
                        latency_ms = client.last_known_latency(),
                        round_trip_ms = avg.round_trip,
                        request_leg_ms = avg.request_leg,
                        response_leg_ms = avg.response_leg,
                        processing_ms = avg.remote_processing,
                        "server chain"
                    ),
                    None => tracing::debug!(
                        latency_ms = client.last_known_latency(),
                        "server chain has no samples"
                    ),
                }
            }
        }
    }

    client.close();
    Ok(())
}
