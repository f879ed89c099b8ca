//! CLI module for topograph
//!
//! Subcommands:
//! - `topograph synth` - Build a topology and write the manifest or a provider template
//! - `topograph validate` - Check a topology file or manifest without writing anything
//! - `topograph show` - Print the resources of a topology as a table

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "topograph")]
#[command(about = "Declare a cloud deployment topology and synthesize it into a provisioning manifest")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file used to resolve ${VAR} placeholders
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a topology and write the result
    Synth(SynthArgs),

    /// Validate a topology file or a manifest
    Validate(InputArgs),

    /// Show the resources of a topology file or a manifest
    Show(InputArgs),
}

/// What to synthesize
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SynthTarget {
    /// Provider-agnostic manifest
    #[default]
    Manifest,
    /// AWS CloudFormation template
    Cloudformation,
}

/// Serialization of the written document
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Arguments for the synth command
#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Topology file (YAML, JSON or JSONC) or manifest
    pub file: PathBuf,

    /// Document to produce
    #[arg(long, value_enum, default_value_t = SynthTarget::Manifest)]
    pub format: SynthTarget,

    /// Serialization of the output
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    /// Write to this path instead of stdout
    #[arg(long, value_name = "PATH")]
    pub out: Option<PathBuf>,
}

/// Arguments for commands that only read an input file
#[derive(Args, Debug)]
pub struct InputArgs {
    /// Topology file (YAML, JSON or JSONC) or manifest
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synth_defaults() {
        let cli = Cli::parse_from(["topograph", "synth", "taco.yaml"]);
        match cli.command {
            Commands::Synth(args) => {
                assert_eq!(args.file, PathBuf::from("taco.yaml"));
                assert_eq!(args.format, SynthTarget::Manifest);
                assert_eq!(args.output, OutputFormat::Json);
                assert!(args.out.is_none());
            }
            _ => panic!("Expected Synth command"),
        }
    }

    #[test]
    fn test_parse_synth_cloudformation_yaml() {
        let cli = Cli::parse_from([
            "topograph",
            "synth",
            "taco.yaml",
            "--format",
            "cloudformation",
            "-o",
            "yaml",
            "--out",
            "template.yaml",
        ]);
        match cli.command {
            Commands::Synth(args) => {
                assert_eq!(args.format, SynthTarget::Cloudformation);
                assert_eq!(args.output, OutputFormat::Yaml);
                assert_eq!(args.out, Some(PathBuf::from("template.yaml")));
            }
            _ => panic!("Expected Synth command"),
        }
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from(["topograph", "validate", "manifest.json"]);
        match cli.command {
            Commands::Validate(args) => assert_eq!(args.file, PathBuf::from("manifest.json")),
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_parse_show_with_env_file() {
        let cli = Cli::parse_from(["topograph", "show", "taco.yaml", "--env-file", ".env"]);
        assert_eq!(cli.env_file, Some(PathBuf::from(".env")));
        assert!(matches!(cli.command, Commands::Show(_)));
    }

    #[test]
    fn test_rejects_unknown_format() {
        let result = Cli::try_parse_from(["topograph", "synth", "taco.yaml", "--format", "terraform"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbose_global() {
        let cli = Cli::parse_from(["topograph", "-vvv", "validate", "taco.yaml"]);
        assert_eq!(cli.verbose, 3);
    }
}
