//! tp-inspect
//!
//! Connects to a bus, drives Telepathy proxies to readiness and prints
//! what they report as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::rc::Rc;
use tokio::task::LocalSet;
use tracing::{info, warn};

use tp_client::contact::{
    self, FEATURE_ALIAS, FEATURE_AVATAR_DATA, FEATURE_AVATAR_TOKEN, FEATURE_CAPABILITIES,
    FEATURE_INFO, FEATURE_LOCATION, FEATURE_ROSTER_GROUPS, FEATURE_SIMPLE_PRESENCE,
};
use tp_client::interfaces;
use tp_client::media_channel::{FEATURE_CONTENTS, FEATURE_LOCAL_HOLD_STATE};
use tp_client::{
    ChannelClassSpec, ChannelRequest, ContactManager, DbusTransport, MediaChannel, ReadyObject,
    Transport,
};
use tp_core::{features, BusType, ClientConfig, Features};

#[derive(Parser, Debug)]
#[command(name = "tp-inspect")]
#[command(about = "Inspect Telepathy channels and channel requests over D-Bus")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Bus to connect to (session or system)
    #[arg(long)]
    bus: Option<String>,

    /// Bus name of the connection manager or channel dispatcher
    #[arg(short, long)]
    service: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make a media channel ready and print its summary
    Channel {
        /// Object path of the owning connection
        connection: String,
        /// Object path of the channel
        channel: String,
        /// Only introspect the channel core
        #[arg(long)]
        no_contents: bool,
        /// Also fetch the local hold state
        #[arg(long)]
        hold: bool,
    },
    /// Cancel a pending channel request
    CancelRequest {
        /// Object path of the channel request
        request: String,
    },
    /// Print the standard channel class specs
    ClassSpecs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment from /etc/tp-client/environment (if exists)
    tp_core::config::load_environment();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tp_inspect=info".parse()?)
                .add_directive("tp_client=info".parse()?)
                .add_directive("tp_readiness=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = client_config(&args)?;
    LocalSet::new().run_until(run(args, config)).await
}

/// Environment configuration with command line overrides applied
fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env();
    if let Some(bus) = &args.bus {
        config.bus_type = bus
            .parse::<BusType>()
            .with_context(|| format!("invalid --bus value '{}'", bus))?;
    }
    if let Some(service) = &args.service {
        config.service = Some(service.clone());
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.call_timeout_ms = timeout_ms;
    }
    Ok(config)
}

async fn connect(config: &ClientConfig) -> Result<Rc<dyn Transport>> {
    let transport = DbusTransport::connect(config)
        .await
        .context("Failed to connect to the bus")?;
    Ok(Rc::new(transport))
}

async fn run(args: Args, config: ClientConfig) -> Result<()> {
    match args.command {
        Commands::Channel {
            connection,
            channel,
            no_contents,
            hold,
        } => {
            let transport = connect(&config).await?;
            let manager = contact_manager(transport, &connection).await;
            let channel = MediaChannel::new(&manager, channel);

            channel
                .become_ready(&Features::new())
                .await
                .context("Channel core did not become ready")?;
            info!(channel = %channel.object_path(), kind = ?channel.kind(), "Channel ready");

            let mut wanted = Features::new();
            if !no_contents {
                wanted.insert(FEATURE_CONTENTS);
            }
            if hold {
                if channel.has_interface(interfaces::CHANNEL_INTERFACE_HOLD) {
                    wanted.insert(FEATURE_LOCAL_HOLD_STATE);
                } else {
                    warn!("Channel has no Hold interface, skipping the hold state");
                }
            }
            if let Err(err) = channel.become_ready(&wanted).await {
                warn!(error = %err, "Some channel features did not become ready");
            }

            print(&channel.summary(), args.pretty)
        }
        Commands::CancelRequest { request } => {
            let transport = connect(&config).await?;
            let proxy = ChannelRequest::new(transport, request.clone());
            proxy
                .cancel()
                .await
                .with_context(|| format!("Cancelling {} failed", request))?;
            info!(request = %request, "Channel request cancelled");
            print(&json!({ "request": request, "cancelled": true }), args.pretty)
        }
        Commands::ClassSpecs => {
            let specs: serde_json::Map<String, Value> = ChannelClassSpec::standard()
                .into_iter()
                .map(|(name, spec)| (name.to_string(), Value::Object(spec.all_properties().clone())))
                .collect();
            print(&specs, args.pretty)
        }
    }
}

/// Contact manager for `connection`, supporting the contact features whose
/// interfaces the connection announces
async fn contact_manager(transport: Rc<dyn Transport>, connection: &str) -> ContactManager {
    let connection_interfaces: Vec<String> =
        match transport.get_all(connection, interfaces::CONNECTION).await {
            Ok(props) => props
                .get("Interfaces")
                .and_then(Value::as_array)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            Err(err) => {
                warn!(connection, error = %err, "Could not read connection interfaces");
                Vec::new()
            }
        };

    let supported = features(&[
        FEATURE_ALIAS,
        FEATURE_AVATAR_DATA,
        FEATURE_AVATAR_TOKEN,
        FEATURE_CAPABILITIES,
        FEATURE_INFO,
        FEATURE_LOCATION,
        FEATURE_SIMPLE_PRESENCE,
        FEATURE_ROSTER_GROUPS,
    ])
    .into_iter()
    .filter(|feature| {
        contact::interface_for(feature)
            .is_some_and(|iface| connection_interfaces.iter().any(|i| i == iface))
    })
    .collect();

    ContactManager::new(transport, connection, supported, connection_interfaces)
}

fn print<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}
