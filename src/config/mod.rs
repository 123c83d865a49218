pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "cli")]
use std::path::PathBuf;

pub use toml_config::{load_config, ProjectConfig, StepConfig};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "spandex")]
#[command(about = "Spatial data preparation for UrbanSim models")]
pub struct CliConfig {
    /// Project TOML file, layered over ~/.spandex/user.toml and $SPANDEX_CFG
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Extract and transform, but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Override the synthesis seed from the config
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_args() {
        let cli = CliConfig::parse_from(["spandex", "--config", "bay.toml", "--dry-run", "--seed", "42", "-v"]);
        assert_eq!(cli.config, Some(PathBuf::from("bay.toml")));
        assert!(cli.dry_run);
        assert!(cli.verbose);
        assert_eq!(cli.seed, Some(42));
        assert!(!cli.json_logs);
    }
}
