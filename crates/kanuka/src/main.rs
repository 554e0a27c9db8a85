//! Kanuka command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # First member creates the project
//! kanuka --email alice@example.com init payments
//! kanuka encrypt
//!
//! # A new device asks for access, an existing member grants it
//! kanuka --email bob@example.com create
//! kanuka grant bob@example.com
//!
//! # Remove a device, then make it final
//! kanuka revoke bob@example.com --device old-laptop --yes
//! kanuka rotate --content-key --yes
//! ```

mod cli;

use std::process::ExitCode;

use clap::Parser;
use kanuka::{AccessError, KanukaError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_env("KANUKA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let json = cli.json;
    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let hint = hint(&err);
            if json {
                let body = serde_json::json!({ "error": format!("{:#}", err), "hint": hint });
                println!("{}", body);
            } else {
                println!("✗ {:#}", err);
                if let Some(hint) = hint {
                    println!("  hint: {}", hint);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn hint(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(err) = err.downcast_ref::<KanukaError>() {
        return err.hint();
    }
    err.downcast_ref::<AccessError>().and_then(AccessError::hint)
}
