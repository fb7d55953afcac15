//! CLI module for kantaloupe
//!
//! Subcommands:
//! - `kantaloupe serve` - Run the gateway
//! - `kantaloupe clusters` - List clusters of a running gateway
//! - `kantaloupe validate-kubeconfig` - Check a kubeconfig file
//! - `kantaloupe check-config` - Load and validate the gateway config

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "kantaloupe")]
#[command(about = "Multi-cluster resource gateway for accelerator workloads")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.kantaloupe/config)
    #[arg(long, global = true, env = "KANTALOUPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway server
    Serve(ServeArgs),

    /// List clusters registered with a running gateway
    Clusters(ClustersArgs),

    /// Check that a kubeconfig file is usable
    #[command(name = "validate-kubeconfig")]
    ValidateKubeconfig(ValidateKubeconfigArgs),

    /// Load and validate the config file
    #[command(name = "check-config")]
    CheckConfig,
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Override the configured bind address
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Cluster-wide Prometheus address, overriding the config
    #[arg(long, env = "KANTALOUPE_PROMETHEUS")]
    pub prometheus: Option<String>,
}

/// Arguments for the clusters command
#[derive(Parser, Debug)]
pub struct ClustersArgs {
    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "KANTALOUPE_URL")]
    pub url: String,

    /// Fuzzy name filter
    #[arg(long)]
    pub name: Option<String>,

    /// Print raw JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the validate-kubeconfig command
#[derive(Parser, Debug)]
pub struct ValidateKubeconfigArgs {
    /// Kubeconfig file
    pub file: PathBuf,

    /// Also connect to the API server
    #[arg(long)]
    pub connect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["kantaloupe", "-vv", "serve", "--port", "9090"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9090));
                assert!(args.bind_addr.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate_kubeconfig() {
        let cli = Cli::try_parse_from([
            "kantaloupe",
            "validate-kubeconfig",
            "/tmp/kubeconfig",
            "--connect",
            "--config",
            "/tmp/gateway.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/gateway.yaml")));
        match cli.command {
            Commands::ValidateKubeconfig(args) => {
                assert_eq!(args.file, PathBuf::from("/tmp/kubeconfig"));
                assert!(args.connect);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["kantaloupe"]).is_err());
    }
}
