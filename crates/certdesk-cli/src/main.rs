mod cli;
mod commands;
mod events;
mod state;

use std::process::ExitCode;

use log::{debug, info};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use cli::{Cli, Command, USAGE};
use commands::{CliError, CommandResponse};
use state::CliState;

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = if log_json {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    // Library code logs through the `log` facade
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to bridge log records into tracing: {}", e);
    }
}

fn report(error: &CliError, json: bool) {
    if json {
        match serde_json::to_string_pretty(&CommandResponse::err(error.to_string())) {
            Ok(body) => println!("{}", body),
            Err(_) => eprintln!("error: {}", error),
        }
    } else {
        eprintln!("error: {}", error);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::from_env() {
        Ok(cli) => cli,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!("error: {}\n\n{}", error, USAGE);
            return ExitCode::from(error.exit_code() as u8);
        }
    };
    if cli.command == Command::Help {
        print!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    init_tracing(cli.log_json);
    info!("Starting certdesk v{}", env!("CARGO_PKG_VERSION"));

    let mut state = match CliState::init(cli.config.as_deref()) {
        Ok(state) => state,
        Err(e) => {
            let error = CliError::from(e);
            report(&error, cli.json);
            return ExitCode::from(error.exit_code() as u8);
        }
    };

    let result = commands::run(cli.command, cli.json, &mut state).await;
    state.shutdown().await;
    debug!("Shutdown complete");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, cli.json);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
