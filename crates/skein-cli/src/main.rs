//! Skein CLI - command-line MCP client
//!
//! Connects to an MCP server over WebSocket, HTTP or a spawned process and
//! runs one command against it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

mod commands;
mod config;
mod utils;

use commands::{
    call::CallCommand,
    info::InfoCommand,
    ping::PingCommand,
    resources::{ReadCommand, ResourcesCommand},
    tools::ToolsCommand,
    Command, ConnectArgs,
};
use skein_mcp::{client::McpClient, transport::connect_transport};

#[derive(Parser)]
#[command(
    name = "skein",
    version = env!("CARGO_PKG_VERSION"),
    about = "Command-line client for Model Context Protocol servers",
    long_about = "Lists and calls tools, reads resources and inspects plugins on any MCP server reachable over WebSocket, HTTP or a child process's stdio."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    connection: ConnectArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SKEIN_CONFIG")]
    config: Option<PathBuf>,

    /// JSON output format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server identity and plugin status
    #[command(name = "info", alias = "i")]
    Info(InfoCommand),

    /// List available tools
    #[command(name = "tools", alias = "t")]
    Tools(ToolsCommand),

    /// Call a tool
    #[command(name = "call", alias = "c")]
    Call(CallCommand),

    /// List available resources
    #[command(name = "resources", alias = "r")]
    Resources(ResourcesCommand),

    /// Read a resource
    #[command(name = "read")]
    Read(ReadCommand),

    /// Measure round-trip latency
    #[command(name = "ping")]
    Ping(PingCommand),
}

impl Commands {
    fn as_command(&self) -> &(dyn Command + Sync) {
        match self {
            Commands::Info(cmd) => cmd,
            Commands::Tools(cmd) => cmd,
            Commands::Call(cmd) => cmd,
            Commands::Resources(cmd) => cmd,
            Commands::Read(cmd) => cmd,
            Commands::Ping(cmd) => cmd,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;
    debug!("Skein CLI v{} starting", env!("CARGO_PKG_VERSION"));

    match run(&cli).await {
        Ok(()) => {
            if !cli.quiet {
                info!("Command completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            utils::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = config::Config::load(cli.config.as_deref())?;
    debug!("Configuration loaded: {:?}", config);

    let settings = cli.connection.settings(&config)?;
    let transport = connect_transport(settings).await?;
    let client = McpClient::new(transport.clone()).with_client_info("skein-cli", env!("CARGO_PKG_VERSION"));

    let result = cli.command.as_command().execute(&client, cli.json).await;
    if let Err(e) = transport.disconnect().await {
        debug!(error = %e, "disconnect failed");
    }
    result
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
