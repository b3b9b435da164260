use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use vice_mcp::machine::headless::HeadlessMachine;
use vice_mcp::{Dispatcher, ExecutionContext, McpContext};
use vice_mcp_config::McpConfig;

/// VICE MCP server.
///
/// Serves the JSON-RPC debugging tools against the built-in headless machine,
/// over TCP or over stdio.
#[derive(Debug, Parser)]
#[command(name = "vice-mcp", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `VICE_MCP_CONFIG` is used as a fallback. When neither are
    /// provided the server uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve a single session over stdin/stdout instead of listening on TCP.
    #[arg(long)]
    stdio: bool,

    /// Listen address (`host:port`), overriding `[server]` in the config.
    #[arg(long, value_name = "HOST:PORT")]
    listen: Option<String>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config)?;
    vice_mcp::hardening::init(&config);

    let ctx = McpContext::from_config(Box::new(HeadlessMachine::new()), &config);
    let (exec, bridge) = ExecutionContext::new(ctx);
    let exec_thread = exec.spawn().context("failed to start execution thread")?;
    let dispatcher = Dispatcher::new(bridge);

    let served = if cli.stdio {
        vice_mcp::rpc::serve_stdio(dispatcher).await
    } else {
        if !config.server.enabled && cli.listen.is_none() {
            tracing::info!(target: "vice.mcp", "server disabled in config; exiting");
            return Ok(());
        }
        let addr = cli.listen.unwrap_or_else(|| config.server.listen_addr());
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        vice_mcp::rpc::serve_tcp(listener, dispatcher).await
    };
    served.context("transport failed")?;

    // Every bridge handle is gone once the transport returns.
    tokio::task::spawn_blocking(move || exec_thread.join())
        .await
        .context("failed to join execution thread")?
        .map_err(|_| anyhow::anyhow!("execution thread panicked"))?;
    Ok(())
}

fn load_config(cli_path: Option<PathBuf>) -> anyhow::Result<McpConfig> {
    let path = cli_path.or_else(|| std::env::var_os("VICE_MCP_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return Ok(McpConfig::default());
    };
    McpConfig::load_from_path(&path).with_context(|| format!("failed to load config from {}", path.display()))
}
