use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ptyflow::domain::model::SessionOptions;
use ptyflow::domain::primitive::{StrategyPreference, event_channel};
use ptyflow::infrastructure::bridge::stdio_bridge;
use ptyflow::infrastructure::host::passthrough;
use ptyflow::interface_adapter::adapter::strategy_factory;
use ptyflow::interface_adapter::controller::bridge_controller::BridgeController;
use ptyflow::shared::config::FlowControlConfig;
use ptyflow::shared::logging::{self, LogTarget};
use ptyflow::usecase::session_manager::SessionManager;

#[derive(Parser)]
#[command(name = "ptyflow", version, about = "Flow-controlled pseudo-terminal sessions")]
struct Cli {
    /// JSON file with flow-control settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// auto, native_pty, script_wrapper or direct_spawn
    #[arg(long, global = true)]
    strategy: Option<StrategyPreference>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a shell on this terminal
    Run {
        #[arg(long)]
        shell: Option<String>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Arguments for the shell
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Serve sessions over JSON lines on stdin/stdout
    Bridge,
    /// Print the detected platform and strategy chain
    Probe,
}

fn load_config(cli: &Cli) -> anyhow::Result<FlowControlConfig> {
    let mut config = match &cli.config {
        Some(path) => FlowControlConfig::from_json_file(path)?,
        None => FlowControlConfig::default(),
    };
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // The run mode owns the terminal, so it only logs when asked to.
    match (&cli.command, &cli.log_file) {
        (_, Some(path)) => logging::init(LogTarget::File(path))?,
        (Command::Run { .. }, None) => {}
        (_, None) => logging::init(LogTarget::Stderr)?,
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Run { shell, cwd, args } => {
            let options = SessionOptions {
                shell,
                cwd,
                args,
                ..SessionOptions::default()
            };
            let strategies = strategy_factory::platform_strategy_chain(config.strategy);
            let code = runtime.block_on(passthrough::run(options, config, strategies))?;
            // The host stdin reader may still be blocked in read().
            std::process::exit(code);
        }
        Command::Bridge => {
            let strategies = strategy_factory::platform_strategy_chain(config.strategy);
            let (events_tx, events) = event_channel();
            runtime.block_on(async {
                let manager = SessionManager::new(config, strategies, events_tx);
                stdio_bridge::run(BridgeController::new(manager), events).await
            })?;
        }
        Command::Probe => {
            let report = strategy_factory::probe_report(config.strategy);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
