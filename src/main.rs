use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, FromArgMatches};
use crossbeam_channel::{unbounded, Receiver};
use std::io::IsTerminal;
use std::thread;
use tracing_subscriber::EnvFilter;

use pairlog::cli::{Cli, LogLevel};
use pairlog::config::PairlogConfig;
use pairlog::config_file::{extract_config_file_arg, ConfigFile};
use pairlog::parallel::{PairingEngine, RunReport, StopReason};
use pairlog::platform::{Ctrl, ExitCode, SafeStdout, SignalHandler};
use pairlog::source::{feed_lines, open_input};
use pairlog::store::EventStore;

fn main() {
    // Control channel fed by the signal handler, read by the engine supervisor
    let (ctrl_tx, ctrl_rx) = unbounded::<Ctrl>();

    let _signal_handler = match SignalHandler::new(ctrl_tx) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("pairlog: Failed to initialize signal handling: {}", e);
            ExitCode::GeneralError.exit();
        }
    };

    let cli = process_args_with_config();
    init_tracing(cli.effective_log_level());

    let config = match PairlogConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pairlog: Error: {:#}", e);
            ExitCode::InvalidUsage.exit();
        }
    };

    match run(&config, &ctrl_rx) {
        Ok(code) => code.exit(),
        Err(e) => {
            eprintln!("pairlog: Error: {:#}", e);
            ExitCode::GeneralError.exit();
        }
    }
}

/// Log to stderr; RUST_LOG takes precedence over --log-level
fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn run(config: &PairlogConfig, ctrl_rx: &Receiver<Ctrl>) -> Result<ExitCode> {
    // Open the input before anything is created on disk
    let reader = open_input(&config.input.path)?;
    let store = EventStore::open(&config.store.path)?;

    let engine = PairingEngine::new(config.engine.clone(), store)
        .start()
        .context("Failed to start the pairing engine")?;

    let feeder = engine.feeder();
    let source = thread::Builder::new()
        .name("pairlog-source".to_string())
        .spawn(move || feed_lines(reader, &feeder))
        .context("Failed to spawn the line source")?;

    let report = engine.wait(ctrl_rx);

    // After a stop that did not come from the input ending, the source may
    // still be blocked in a read that never returns.
    let input_ended = matches!(
        report.stop_reason,
        Some(StopReason::InputDrained | StopReason::AllPaired | StopReason::GraceExpired)
    );
    let source_failed = if input_ended || source.is_finished() {
        let source_result = source
            .join()
            .map_err(|_| anyhow!("line source thread panicked"))
            .and_then(|result| result);
        match source_result {
            Ok(_) => false,
            Err(e) => {
                tracing::error!("{:#}", e);
                true
            }
        }
    } else {
        tracing::debug!("line source still waiting for input; not joining it");
        false
    };

    write_outputs(config, &report)?;

    if let Some(code) = ExitCode::from_termination_signal() {
        return Ok(code);
    }
    if report.degraded || source_failed {
        return Ok(ExitCode::GeneralError);
    }
    Ok(ExitCode::Success)
}

fn write_outputs(config: &PairlogConfig, report: &RunReport) -> Result<()> {
    if config.output.dump_orphans {
        let mut stdout = SafeStdout::new();
        for record in &report.orphans {
            stdout.writeln(&serde_json::to_string(record)?)?;
        }
        stdout.flush()?;
    }

    if config.output.stats {
        eprintln!("{}", report.stats.format_stats());
        eprintln!(
            "Records: {} orphaned, {} evicted; Stopped: {}",
            report.orphans.len(),
            report.evicted,
            report
                .stop_reason
                .map(|reason| reason.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }

    Ok(())
}

/// Apply config file defaults to the raw arguments, then parse them
fn process_args_with_config() -> Cli {
    let raw_args: Vec<String> = std::env::args().collect();

    if raw_args.iter().any(|arg| arg == "--show-config") {
        ConfigFile::show_config();
        ExitCode::Success.exit();
    }

    let processed_args = if raw_args.iter().any(|arg| arg == "--ignore-config") {
        raw_args
    } else {
        let config_file_path = extract_config_file_arg(&raw_args);
        match ConfigFile::load_with_custom_path(config_file_path.as_deref())
            .and_then(|config_file| config_file.process_args(raw_args))
        {
            Ok(processed) => processed,
            Err(e) => {
                eprintln!("pairlog: Config error: {:#}", e);
                ExitCode::InvalidUsage.exit();
            }
        }
    };

    let matches = Cli::command().get_matches_from(processed_args);
    Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}
