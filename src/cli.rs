//! Command-line interface parsing for the `hapi` tool
//!
//! This module handles parsing of CLI arguments using clap: one subcommand
//! per request type, plus global flags that override the client
//! configuration taken from the environment.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::ClientConfig;
use crate::time;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A time argument is not an ISO-8601 time
    #[error("Invalid time: '{0}'. Use e.g. 2020-01-01T00:00Z or 2020-001")]
    InvalidTime(String),

    /// The parameter list has an empty name in it
    #[error("Invalid parameter name: '{0}'. Use comma-separated names, e.g. Time,flux")]
    InvalidParameter(String),
}

/// HAPI client - fetch catalogs, dataset info and data from HAPI servers
#[derive(Parser, Debug)]
#[command(name = "hapi")]
#[command(about = "Read time series from HAPI servers, with a local disk cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Use the disk cache (reads and writes)
    #[arg(long, global = true)]
    pub cache: bool,

    /// Never contact the server, serve only what is cached
    #[arg(long, global = true)]
    pub offline: bool,

    /// Cache root directory (default: $HAPI_DATA or ~/hapi)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Write gzip-compressed cache files
    #[arg(long, global = true)]
    pub compress: bool,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, env = "HAPI_LOG", default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the datasets a server provides
    Catalog {
        /// Server URL, e.g. https://cdaweb.gsfc.nasa.gov/hapi
        server: String,
    },
    /// Show the info document of a dataset
    Info {
        server: String,
        /// Dataset id
        id: String,
        /// Comma-separated subset of parameters
        #[arg(long, value_delimiter = ',', value_parser = parse_parameter_arg)]
        parameters: Option<Vec<String>>,
    },
    /// Print data records as CSV
    ///
    /// Examples:
    ///   hapi data https://example.org/hapi ds1 2020-01-01 2020-01-03
    ///   hapi --cache data https://example.org/hapi ds1 2020-001 2020-002 --parameters Time,flux
    Data {
        server: String,
        /// Dataset id
        id: String,
        /// Inclusive start time
        #[arg(value_parser = parse_time_arg)]
        start: String,
        /// Exclusive end time
        #[arg(value_parser = parse_time_arg)]
        end: String,
        /// Comma-separated subset of parameters
        #[arg(long, value_delimiter = ',', value_parser = parse_parameter_arg)]
        parameters: Option<Vec<String>>,
        /// Request the binary format (never cached)
        #[arg(long)]
        binary: bool,
    },
}

/// Checks that a time argument parses.
///
/// # Returns
/// * `Ok(String)` with the argument unchanged
/// * `Err(CliError::InvalidTime)` if it is not a recognized time
pub fn parse_time_arg(s: &str) -> Result<String, CliError> {
    time::parse(s)
        .map(|_| s.to_string())
        .map_err(|_| CliError::InvalidTime(s.to_string()))
}

/// Checks one name of a comma-separated parameter list.
///
/// # Returns
/// * `Ok(String)` with surrounding whitespace removed
/// * `Err(CliError::InvalidParameter)` if the name is empty
pub fn parse_parameter_arg(s: &str) -> Result<String, CliError> {
    let name = s.trim();
    if name.is_empty() {
        return Err(CliError::InvalidParameter(s.to_string()));
    }
    Ok(name.to_string())
}

impl Cli {
    /// Applies the command-line overrides to `base`
    ///
    /// Flags can only switch features on; leaving one out keeps whatever the
    /// environment chose.
    pub fn client_config(&self, base: ClientConfig) -> ClientConfig {
        let mut config = base;
        if self.cache {
            config.use_cache = true;
        }
        if self.offline {
            config.offline = true;
        }
        if self.compress {
            config.compress_cache = true;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_root = dir.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_arg_accepts_both_shapes() {
        assert_eq!(parse_time_arg("2020-01-01T00:00Z").unwrap(), "2020-01-01T00:00Z");
        assert_eq!(parse_time_arg("2020-001").unwrap(), "2020-001");
        assert_eq!(parse_time_arg("2020").unwrap(), "2020");
    }

    #[test]
    fn test_parse_time_arg_invalid() {
        let err = parse_time_arg("yesterday").unwrap_err();
        assert!(err.to_string().contains("Invalid time"));
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_parse_parameter_arg() {
        assert_eq!(parse_parameter_arg(" flux").unwrap(), "flux");
        assert!(parse_parameter_arg("").is_err());
    }

    #[test]
    fn test_cli_rejects_empty_parameter_name() {
        let result = Cli::try_parse_from([
            "hapi",
            "info",
            "https://example.org/hapi",
            "ds1",
            "--parameters",
            "Time,,flux",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_catalog() {
        let cli = Cli::parse_from(["hapi", "catalog", "https://example.org/hapi"]);
        assert!(matches!(
            cli.command,
            Command::Catalog { ref server } if server == "https://example.org/hapi"
        ));
        assert!(!cli.cache);
        assert!(!cli.offline);
    }

    #[test]
    fn test_cli_parse_data_with_flags() {
        let cli = Cli::parse_from([
            "hapi",
            "--cache",
            "data",
            "https://example.org/hapi",
            "ds1",
            "2020-01-01",
            "2020-01-02",
            "--parameters",
            "Time,flux",
            "--offline",
        ]);
        assert!(cli.cache);
        assert!(cli.offline);
        match cli.command {
            Command::Data {
                id,
                start,
                parameters,
                binary,
                ..
            } => {
                assert_eq!(id, "ds1");
                assert_eq!(start, "2020-01-01");
                assert_eq!(parameters, Some(vec!["Time".to_string(), "flux".to_string()]));
                assert!(!binary);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_rejects_bad_time() {
        let result = Cli::try_parse_from([
            "hapi",
            "data",
            "https://example.org/hapi",
            "ds1",
            "soon",
            "2020-01-02",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_config_overrides() {
        let cli = Cli::parse_from([
            "hapi",
            "--cache",
            "--cache-dir",
            "/tmp/hapi",
            "catalog",
            "https://example.org/hapi",
        ]);
        let config = cli.client_config(ClientConfig::default());
        assert!(config.use_cache);
        assert!(!config.offline);
        assert_eq!(config.cache_root, PathBuf::from("/tmp/hapi"));
    }
}
