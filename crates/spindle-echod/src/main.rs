//! `spindle-echod`: a minimal embedding module for the spindle framework.
//!
//! Watches stdin and echoes complete lines through tracing, answers `ping`
//! and `stats` commands over the control channel, and shuts down on signal
//! or on the shutdown command like every other module.

use std::cell::Cell;
use std::io::{self, BufRead};
use std::os::fd::AsRawFd;
use std::process::ExitCode;
use std::rc::Rc;

use camino::Utf8PathBuf;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};

use spindle::{Answer, ModuleError, Server, ServiceModule, watch_callback};
use spindle_config::{Config, ConfigError};

const MODULE_NAME: &str = "echod";

#[derive(Debug, Parser)]
#[command(
    name = "spindle-echod",
    about = "Echo module for the spindle framework",
    version
)]
struct Cli {
    /// Module name registered on the control channel.
    #[arg(long, default_value = MODULE_NAME)]
    module_name: String,
    /// Configuration file; defaults plus environment apply when omitted.
    #[arg(long)]
    config: Option<Utf8PathBuf>,
}

/// Module state: a line counter shared with the stdin watch callback.
struct EchoModule {
    echoed: Rc<Cell<u64>>,
    verbose: bool,
}

impl ServiceModule for EchoModule {
    fn config_update(&mut self, config: Value) {
        if let Some(verbose) = config.get("verbose").and_then(Value::as_bool) {
            self.verbose = verbose;
            info!(verbose, "configuration applied");
        }
    }

    fn setup(&mut self) -> Result<(), ModuleError> {
        info!("echo module ready");
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), ModuleError> {
        info!(echoed = self.echoed.get(), "echo module stopping");
        Ok(())
    }

    fn handle_command(&mut self, command: &str, _args: Option<&Value>) -> Option<Answer> {
        match command {
            "ping" => Some(Answer::success_with("pong")),
            "stats" => Some(Answer::success_with(
                json!({ "echoed": self.echoed.get(), "verbose": self.verbose }),
            )),
            _ => None,
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("spindle-echod: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = spindle::telemetry::initialise(&config) {
        eprintln!("spindle-echod: {error}");
        return ExitCode::FAILURE;
    }

    let echoed = Rc::new(Cell::new(0_u64));
    let module = EchoModule {
        echoed: Rc::clone(&echoed),
        verbose: false,
    };
    let mut server = Server::new(config, module);

    let registry = server.registry();
    let stdin_fd = io::stdin().as_raw_fd();
    server.watch_fileno(
        stdin_fd,
        Some(watch_callback(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    // EOF: stop watching or the descriptor reports readable
                    // forever.
                    info!("stdin closed; no further echoes");
                    registry.unwatch_fileno(stdin_fd, true, false, false).ok();
                }
                Ok(_) => {
                    echoed.set(echoed.get() + 1);
                    info!(line = line.trim_end(), "echo");
                }
                Err(error) => warn!(%error, "stdin read failed"),
            }
        })),
        None,
        None,
    );

    match server.run(&cli.module_name) {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
