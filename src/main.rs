//! Crew MCP - Entry Point
//!
//! Commands:
//! - run <workflow.toml>: execute a workflow, exit 0 / 1 / 2
//! - check <workflow.toml>: validate a workflow without running it
//! - serve [--stdio]: run the reference research data server

use crew_mcp::orchestrator::{EXIT_CONFIGURATION_ERROR, EXIT_SUCCESS};
use crew_mcp::{ClaudeReasoner, Config, McpServer, ReasoningFn, ResearchDataStore, ScriptedReasoner, Workflow};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn print_help() {
    println!("Crew MCP v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: crew-mcp <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run <workflow.toml>    Execute a workflow");
    println!("  check <workflow.toml>  Validate a workflow and print the dispatch order");
    println!("  serve                  Run the research data server over HTTP");
    println!();
    println!("Options:");
    println!("  --json                 Print the run report as JSON (run)");
    println!("  --stdio                Serve JSON-RPC on stdin/stdout (serve)");
    println!("  --help, -h             Show this help");
    println!();
    println!("Exit status (run, check):");
    println!("  0  every required task accepted");
    println!("  1  configuration error");
    println!("  2  a required task was rejected, or the run was cancelled");
    println!();
    println!("Environment variables:");
    println!("  ANTHROPIC_API_KEY    Claude API key (run)");
    println!("  CREW_MODEL           Model hint: haiku, sonnet, opus (default: sonnet)");
    println!("  CREW_MCP_URL         Data server URL (default: http://localhost:8000)");
    println!("  CREW_MCP_API_KEY     Data server bearer token");
    println!("  CREW_BIND_ADDR       serve bind address (default: 127.0.0.1:8000)");
    println!("  CREW_HTTP_TIMEOUT    HTTP timeout in seconds (default: 30)");
}

fn init_logging(to_stderr: bool) -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if to_stderr {
        // stdout carries protocol or report output - log to stderr as JSON
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().skip(1).collect();
    let help_mode = args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h");
    let json_mode = args.iter().any(|a| a == "--json");
    let stdio_mode = args.iter().any(|a| a == "--stdio");
    let positional: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with('-'))
        .map(|a| a.as_str())
        .collect();

    if help_mode {
        print_help();
        return Ok(());
    }

    init_logging(json_mode || stdio_mode)?;
    let config = Config::from_env()?;

    match positional.as_slice() {
        ["run", path] => {
            let code = run_workflow(Path::new(path), &config, json_mode).await?;
            std::process::exit(code);
        }
        ["check", path] => {
            let code = check_workflow(Path::new(path), &config);
            std::process::exit(code);
        }
        ["serve"] => {
            info!("Crew MCP data server v{}", env!("CARGO_PKG_VERSION"));
            let server = Arc::new(
                McpServer::new(Arc::new(ResearchDataStore::new())).with_api_key(config.mcp_api_key.clone()),
            );
            if stdio_mode {
                server.run_stdio().await?;
            } else {
                server.serve(config.bind_addr).await?;
            }
        }
        _ => {
            print_help();
            std::process::exit(EXIT_CONFIGURATION_ERROR);
        }
    }

    Ok(())
}

async fn run_workflow(path: &Path, config: &Config, json_mode: bool) -> anyhow::Result<i32> {
    info!("Crew MCP v{}", env!("CARGO_PKG_VERSION"));

    let reasoner: Arc<dyn ReasoningFn> = match ClaudeReasoner::from_config(config) {
        Some(r) => Arc::new(r),
        None => {
            error!("ANTHROPIC_API_KEY is not set");
            return Ok(EXIT_CONFIGURATION_ERROR);
        }
    };

    let orchestrator = match Workflow::load(path).and_then(|wf| wf.build_http(reasoner, config)) {
        Ok(o) => o,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("Configuration error: {}", e);
            return Ok(EXIT_CONFIGURATION_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let report = orchestrator.run(cancel).await?;

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render());
    }

    Ok(report.exit_code())
}

fn check_workflow(path: &Path, config: &Config) -> i32 {
    // Building never calls the reasoner or the network
    let reasoner: Arc<dyn ReasoningFn> = Arc::new(ScriptedReasoner::failing("check only"));

    match Workflow::load(path).and_then(|wf| wf.build_http(reasoner, config)) {
        Ok(orchestrator) => {
            println!("{}: OK", path.display());
            println!("Mode: {:?}", orchestrator.mode());
            println!("Dispatch order: {}", orchestrator.execution_order().join(" -> "));
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            EXIT_CONFIGURATION_ERROR
        }
    }
}
