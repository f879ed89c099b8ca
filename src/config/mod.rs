pub mod interpolate;
pub mod topology;

pub use interpolate::{interpolate, interpolate_env};
pub use topology::{strip_jsonc_comments, TopologyFile};

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::topology::{TopologyBuilder, TopologyError};

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unresolved variable(s) in topology file: {0}")]
    UnresolvedVariable(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl ConfigError {
    /// Process exit code for this kind of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Topology(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// Input syntax of a topology file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON, comments allowed
    Json,
    Yaml,
}

impl FileFormat {
    /// `.json` and `.jsonc` are JSON; anything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonc") => {
                FileFormat::Json
            }
            _ => FileFormat::Yaml,
        }
    }
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

/// Interpolate and parse topology file content
pub fn parse_topology<F>(content: &str, format: FileFormat, lookup: F) -> Result<TopologyFile, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let content = interpolate(content, lookup)?;
    match format {
        FileFormat::Json => {
            TopologyFile::from_json_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        FileFormat::Yaml => {
            TopologyFile::from_yaml_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and parse a topology file from disk, resolving placeholders from the
/// process environment.
pub fn load_topology_file(path: &Path) -> Result<TopologyFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let format = FileFormat::from_path(path);
    debug!(path = %path.display(), ?format, "Loading topology file");
    parse_topology(&content, format, |name| std::env::var(name).ok())
}

/// Load a topology file and replay it into a builder
pub fn load_topology(path: &Path) -> Result<TopologyBuilder, ConfigError> {
    let file = load_topology_file(path)?;
    Ok(file.apply()?)
}
