//! sharemic command line interface.
//!
//! Talks to the daemon over its Unix socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use sharemic_core::{FilterSpec, Properties, PropertyMatch};
use sharemic_ipc::IpcClient;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sharemic")]
#[command(version)]
#[command(about = "Route application audio into a virtual microphone", long_about = None)]
struct Cli {
    /// Daemon socket (defaults to the runtime dir)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Log IPC traffic to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List nodes that can be routed
    #[command(alias = "ls")]
    List {
        /// Property every listed node must carry (repeatable)
        #[arg(short, long = "prop", value_name = "KEY")]
        props: Vec<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Start routing, replacing the active filter
    Link(LinkArgs),

    /// Stop routing and remove the virtual microphone
    Unlink,

    /// Check whether the sound server is PipeWire
    Probe,

    /// Stop the daemon
    Shutdown,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
struct LinkArgs {
    /// Filter spec as inline JSON or a path to a JSON file
    #[arg(conflicts_with_all = ["include", "exclude", "workaround"])]
    spec: Option<String>,

    /// Route nodes with this property (KEY=VALUE, repeatable)
    #[arg(short, long, value_parser = parse_match)]
    include: Vec<PropertyMatch>,

    /// Never route nodes with this property (KEY=VALUE, repeatable)
    #[arg(short, long, value_parser = parse_match)]
    exclude: Vec<PropertyMatch>,

    /// Redirect matching streams onto the virtual microphone (KEY=VALUE)
    #[arg(long, value_parser = parse_match)]
    workaround: Vec<PropertyMatch>,

    /// Skip hardware device nodes
    #[arg(long)]
    ignore_devices: bool,

    /// Skip nodes whose media class is an input
    #[arg(long)]
    ignore_input_media: bool,

    /// Without includes, only capture what plays on the default speaker
    #[arg(long)]
    only_default_speakers: bool,
}

fn parse_match(arg: &str) -> Result<PropertyMatch, String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(PropertyMatch::new(key, value)),
        _ => Err(format!("expected KEY=VALUE, got '{arg}'")),
    }
}

impl LinkArgs {
    /// The filter document to send: the positional one if given, else one
    /// assembled from the flags.
    fn spec(&self) -> Result<Value> {
        let Some(spec) = &self.spec else {
            let spec = FilterSpec {
                include: self.include.iter().cloned().collect(),
                exclude: self.exclude.iter().cloned().collect(),
                ignore_devices: self.ignore_devices,
                ignore_input_media: self.ignore_input_media,
                only_default_speakers: self.only_default_speakers,
                workaround: self.workaround.iter().cloned().collect(),
            };
            return Ok(serde_json::to_value(spec)?);
        };

        let text = if spec.trim_start().starts_with('{') {
            spec.clone()
        } else {
            std::fs::read_to_string(spec).with_context(|| format!("Failed to read spec file: {spec}"))?
        };

        serde_json::from_str(&text).context("Filter spec is not valid JSON")
    }
}

fn print_nodes(nodes: &[Properties], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(nodes)?),
        OutputFormat::Text => {
            if nodes.is_empty() {
                println!("No nodes found");
            }

            for node in nodes {
                let mut pairs: Vec<_> = node.iter().collect();
                pairs.sort();
                let line: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!("{}", line.join("  "));
            }
        }
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let socket = cli.socket.unwrap_or_else(sharemic_ipc::socket_path);
    debug!(?socket, "Connecting to daemon");

    let client = IpcClient::connect(&socket)
        .await
        .with_context(|| format!("Failed to connect to the daemon at {}", socket.display()))?;

    match cli.command {
        Commands::List { props, format } => {
            let nodes = client.list_nodes(props).await?;
            print_nodes(&nodes, format)?;
        }

        Commands::Link(args) => {
            client.link_raw(args.spec()?).await?;
            println!("Routing started");
        }

        Commands::Unlink => {
            client.unlink().await?;
            println!("Routing stopped");
        }

        Commands::Probe => {
            if client.has_pipewire().await? {
                println!("PipeWire");
            } else {
                println!("Not PipeWire");
                std::process::exit(1);
            }
        }

        Commands::Shutdown => {
            client.shutdown().await?;
            println!("Daemon stopping");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli).await
}
