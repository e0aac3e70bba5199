//! HAPI client CLI - read catalogs, dataset info and data from HAPI servers
//!
//! Data records are printed to stdout as CSV; logs go to stderr.

use std::io::{self, BufWriter, Write};

use clap::Parser;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hapi_client::cli::{Cli, Command};
use hapi_client::{ClientConfig, HapiClient};

/// Maps `--log-level` onto a tracing level, defaulting to warn
fn log_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.client_config(ClientConfig::from_env());
    debug!(?config, "client configuration");
    let client = HapiClient::new(config)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match cli.command {
        Command::Catalog { server } => {
            for entry in client.catalog(&server)?.catalog {
                match entry.title {
                    Some(title) => writeln!(out, "{}\t{}", entry.id, title)?,
                    None => writeln!(out, "{}", entry.id)?,
                }
            }
        }
        Command::Info {
            server,
            id,
            parameters,
        } => {
            let info = match parameters {
                Some(parameters) => client.info_parameters(&server, &id, &parameters)?,
                None => client.info(&server, &id)?,
            };
            writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
        }
        Command::Data {
            server,
            id,
            start,
            end,
            parameters,
            binary,
        } => {
            let parameters = parameters.as_deref();
            if binary {
                for record in client.data_binary(&server, &id, parameters, &start, &end)? {
                    writeln!(out, "{}", record?)?;
                }
            } else {
                for record in client.data(&server, &id, parameters, &start, &end)? {
                    writeln!(out, "{}", record?)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG, when set, wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(&cli.log_level).as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: unable to install logger: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
