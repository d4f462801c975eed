use std::process::ExitCode;

use clap::Parser;
use pill_core::config::PillPalConfig;
use pill_core::error::AppError;
use pillpal_lib::cli::Cli;
use pillpal_lib::{execute, logging};

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to encode output: {e}"),
    }
}

fn print_error(err: &AppError) {
    match serde_json::to_string_pretty(err) {
        Ok(s) => eprintln!("{s}"),
        Err(_) => eprintln!("{err}"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config loading logs before the configured subscriber can exist.
    let loaded = tracing::subscriber::with_default(logging::bootstrap_subscriber(std::io::stderr), || {
        PillPalConfig::load(cli.config.as_deref())
    });
    let cfg = match loaded {
        Ok(c) => c,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&cfg.logging) {
        print_error(&e);
        return ExitCode::FAILURE;
    }

    match execute(&cfg, cli.command) {
        Ok(out) => {
            print_json(&out.json);
            if out.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!(code = %e.code, message = %e.message, "command failed");
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}
