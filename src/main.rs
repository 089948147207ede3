//! Browser Coordinator - Main Entry Point
//!
//! Handles CLI argument parsing, configuration loading, and the serve/wrap
//! entry points. `serve` runs the coordinator until a shutdown signal;
//! `wrap` runs a downstream program against a live coordinator.

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use browser_coordinator::config::CliArgs;
use browser_coordinator::controller::Coordinator;
use browser_coordinator::{wrap, NAME, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Build the CLI definition.
fn build_cli() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .about("Owns a local CDP browser and publishes a stable proxy port for automation clients")
        .subcommand(
            Command::new("serve")
                .about("Run the coordinator until a shutdown signal arrives")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .help("Configuration file (TOML or JSON)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("port")
                        .long("port")
                        .short('p')
                        .help("Proxy listen port (0 = OS-assigned)")
                        .value_parser(clap::value_parser!(u16)),
                )
                .arg(
                    Arg::new("browser")
                        .long("browser")
                        .short('b')
                        .help("Preferred browser kind (chrome, edge, chromium, brave, firefox)"),
                )
                .arg(
                    Arg::new("workspace")
                        .long("workspace")
                        .short('w')
                        .help("Workspace root for editor-host discovery")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("headless")
                        .long("headless")
                        .help("Launch browsers headless")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("no-headless"),
                )
                .arg(
                    Arg::new("no-headless")
                        .long("no-headless")
                        .help("Launch browsers with a visible window")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-editor")
                        .long("no-editor")
                        .help("Skip editor-host detection")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("wrap")
                .about("Run a program against the live coordinator, substituting {cdp_port} and {cdp_endpoint}")
                .arg(
                    Arg::new("command")
                        .help("Program and arguments, after --")
                        .num_args(1..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .required(true),
                ),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
}

/// Collect CLI overrides for the serve subcommand.
fn parse_serve_args(matches: &ArgMatches) -> Result<CliArgs> {
    let browser = match matches.get_one::<String>("browser") {
        Some(raw) => Some(raw.parse().map_err(|e: String| anyhow::anyhow!(e))?),
        None => None,
    };

    let headless = if matches.get_flag("headless") {
        Some(true)
    } else if matches.get_flag("no-headless") {
        Some(false)
    } else {
        None
    };

    Ok(CliArgs {
        config_file: matches.get_one::<PathBuf>("config").cloned(),
        proxy_port: matches.get_one::<u16>("port").copied(),
        headless,
        browser,
        workspace: matches.get_one::<PathBuf>("workspace").cloned(),
        detect_editor: matches.get_flag("no-editor").then_some(false),
    })
}

/// Print the startup summary.
fn print_startup(proxy_port: u16) {
    println!(
        "{cyan}{bold}{name} v{version}{reset}",
        name = NAME,
        version = VERSION,
        cyan = colors::CYAN,
        bold = colors::BOLD,
        reset = colors::RESET
    );
    println!(
        "{green}{bold}Proxy listening:{reset} 127.0.0.1:{port}",
        port = proxy_port,
        green = colors::GREEN,
        bold = colors::BOLD,
        reset = colors::RESET
    );
    println!(
        "{dim}Press Ctrl+C to stop{reset}",
        dim = colors::DIM,
        reset = colors::RESET
    );
}

/// Block until SIGINT, SIGTERM, or SIGHUP.
///
/// Failed unix signal registration degrades to Ctrl+C-only shutdown; it
/// never takes the running coordinator down.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).ok();
        let mut hangup = signal(SignalKind::hangup()).ok();
        if terminate.is_none() || hangup.is_none() {
            warn!("unix signal registration failed; shutting down on Ctrl+C only");
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for Ctrl+C: {}", e);
                }
            }
            _ = recv_signal(&mut terminate) => {}
            _ = recv_signal(&mut hangup) => {}
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
        }
    }
}

/// Wait on a signal stream, or forever when registration failed.
#[cfg(unix)]
async fn recv_signal(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending().await,
    }
}

/// Run the coordinator until shutdown. Returns the process exit code.
async fn run_serve(matches: &ArgMatches) -> i32 {
    let settings = match parse_serve_args(matches).and_then(|args| Ok(args.resolve()?)) {
        Ok(settings) => settings,
        Err(e) => {
            error!("invalid configuration: {:#}", e);
            return 1;
        }
    };

    let coordinator = match Coordinator::start(settings).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("startup failed: {:#}", e);
            return 1;
        }
    };

    print_startup(coordinator.proxy_port());
    wait_for_shutdown_signal().await;

    println!();
    info!("received shutdown signal, stopping gracefully");
    coordinator.shutdown().await;
    0
}

/// Run the wrap subcommand. Returns the child's exit code.
async fn run_wrap(matches: &ArgMatches) -> i32 {
    let command: Vec<String> = matches
        .get_many::<String>("command")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => {
            error!("wrap requires a program to run");
            return 1;
        }
    };

    match wrap::run(program, args).await {
        Ok(code) => code,
        Err(e) => {
            error!("wrap failed: {:#}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("browser_coordinator=info")),
        )
        .init();

    let matches = build_cli().get_matches();

    let code = match matches.subcommand() {
        Some(("serve", serve_matches)) => run_serve(serve_matches).await,
        Some(("wrap", wrap_matches)) => run_wrap(wrap_matches).await,
        _ => 1,
    };

    std::process::exit(code);
}
