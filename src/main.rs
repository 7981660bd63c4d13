use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::gallery::config::{Config, ConfigError};
use crate::program::Program;

mod gallery;
mod program;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let inputs: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if inputs.is_empty() {
        eprintln!("Inputs required");
        return -1;
    }

    let config_path = program::config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::Read(e)) => {
            eprintln!("Failed to read config {}: {e}", config_path.display());
            return -2;
        }
        Err(ConfigError::Parse(e)) => {
            eprintln!("Failed to parse config {}: {e}", config_path.display());
            return -3;
        }
    };
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    if initialize_logger(&config).is_err() {
        eprintln!("Failed to initialize logging");
        return -4;
    }

    let separator = "=".repeat(70);
    log::debug!("{separator}");
    log::debug!(
        "Started running at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {e}");
            return 1;
        }
    };

    let program = Program::new(config, config_dir);
    let code = runtime.block_on(program.run(&inputs));

    log::debug!(
        "Completed running at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    log::debug!("{separator}");
    code
}

/// Terminal logging at Info, plus Debug logging appended to the configured
/// log file. An unopenable log file degrades to terminal-only logging.
fn initialize_logger(config: &Config) -> Result<(), log::SetLoggerError> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(log_file_name) = &config.general.log_file_name {
        match OpenOptions::new().create(true).append(true).open(log_file_name) {
            Ok(file) => {
                loggers.push(WriteLogger::new(LevelFilter::Debug, LogConfig::default(), file));
            }
            Err(e) => {
                eprintln!(
                    "Failed to open log file {log_file_name}: {e}. Logging will only output to terminal."
                );
            }
        }
    }

    CombinedLogger::init(loggers)
}
