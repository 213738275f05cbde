//! Skein Server - MCP over HTTP, WebSocket and stdio
//!
//! This binary hosts the MCP router with the built-in capabilities and the
//! bundled plugins.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skein_server::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    server::{run_server, ServerState, SkeinServer},
    stdio::run_stdio,
};

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "skein-server",
    about = "Model Context Protocol server with pluggable tools and resources",
    long_about = "Serves MCP requests over HTTP, WebSocket or framed stdio, with built-in file, command and fetch tools plus managed plugins."
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable compact single-line logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve,
    /// Serve one client over stdin/stdout
    Stdio,
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "skein-server.toml")]
        output: PathBuf,
        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> ServerResult<()> {
    let args = Args::parse();
    init_logging(&args)?;

    match args.command {
        Some(Commands::Stdio) => start_stdio(&args).await,
        Some(Commands::Config { ref output, force }) => generate_config(output, force),
        Some(Commands::Validate { ref config }) => validate_config(config),
        Some(Commands::Info) => {
            show_info();
            Ok(())
        }
        Some(Commands::Serve) | None => start_server(&args).await,
    }
}

/// Logs always go to stderr so stdio mode keeps stdout clean
fn init_logging(args: &Args) -> ServerResult<()> {
    let log_level = args
        .log_level
        .parse::<Level>()
        .map_err(|_| ServerError::Config(format!("Invalid log level: {}", args.log_level)))?;

    let mut env_filter = EnvFilter::from_default_env();
    for target in ["skein_server", "skein_mcp"] {
        let directive = format!("{}={}", target, log_level)
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid log directive: {}", e)))?;
        env_filter = env_filter.add_directive(directive);
    }

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }

    Ok(())
}

fn load_config(args: &Args) -> ServerResult<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            ServerConfig::from_file(path)?
        }
        None => {
            info!("Using default configuration");
            ServerConfig::default()
        }
    };

    if let Some(bind) = &args.bind {
        config.bind = bind
            .parse()
            .map_err(|e| ServerError::Config(format!("Invalid bind address: {}", e)))?;
    }
    Ok(config)
}

async fn start_server(args: &Args) -> ServerResult<()> {
    info!("Starting Skein Server v{}", skein_server::VERSION);
    let config = load_config(args)?;
    let server = SkeinServer::new(config).await?;

    info!("Server configuration:");
    info!("  Bind address: {}", server.config().bind);
    info!("  Sandbox root: {:?}", server.config().mcp.builtins.root);
    info!("  Plugins configured: {}", server.config().mcp.plugins.len());

    run_server(server).await
}

async fn start_stdio(args: &Args) -> ServerResult<()> {
    let config = load_config(args)?;
    let delimiter = config.stdio.delimiter.clone();
    let max_frame = config.limits.max_body_size;
    let state = ServerState::build(config, Arc::new(skein_server::plugins::bundled_loader())).await?;

    let result = run_stdio(Arc::clone(&state.router), &delimiter, max_frame).await;
    state.registry.plugins().shutdown().await;
    result
}

fn generate_config(output: &PathBuf, force: bool) -> ServerResult<()> {
    if output.exists() && !force {
        error!("Configuration file already exists: {:?}", output);
        error!("Use --force to overwrite");
        return Err(ServerError::Config("Configuration file already exists".to_string()));
    }

    ServerConfig::default().to_file(output)?;
    info!("Generated default configuration file: {:?}", output);
    Ok(())
}

fn validate_config(path: &PathBuf) -> ServerResult<()> {
    info!("Validating configuration file: {:?}", path);
    match ServerConfig::from_file(path) {
        Ok(config) => {
            info!("Configuration is valid");
            info!("  Bind address: {}", config.bind);
            info!("  Plugins: {}", config.mcp.plugins.len());
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

fn show_info() {
    println!("Skein Server v{}", skein_server::VERSION);
    println!("MCP protocol {}", skein_mcp::types::MCP_VERSION);
    println!();
    println!("Endpoints:");
    println!("  POST /mcp                     JSON-RPC message or batch");
    println!("  GET  /ws                      JSON-RPC over WebSocket");
    println!("  GET  /plugins[/<name>]        plugin status");
    println!("  POST /plugins/<name>/reload   reload, enable or disable");
    println!("  GET  /health                  liveness");
    println!();
    println!("Usage:");
    println!("  skein-server                      # Start with default config");
    println!("  skein-server -c config.toml       # Start with custom config");
    println!("  skein-server stdio                # Serve over stdin/stdout");
    println!("  skein-server config               # Generate default config");
    println!("  skein-server validate config.toml # Validate config file");
}
