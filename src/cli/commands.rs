//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::{OutputFormat, SynthTarget};
use crate::config::{self, ConfigError, FileFormat};
use crate::synth::{cloudformation, SynthError};
use crate::topology::manifest::API_VERSION;
use crate::topology::validation::validate_manifest;
use crate::topology::{Manifest, ManifestError, TopologyError, ValidationReport};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Synth(#[from] SynthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CommandError {
    /// 1 for I/O and parse failures, 2 for configuration errors and 3 for
    /// validation errors
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Config(err) => err.exit_code(),
            CommandError::Topology(err) => err.exit_code(),
            CommandError::Synth(err) => err.exit_code(),
            _ => 1,
        }
    }

    /// Violations behind a validation failure, wherever it was raised
    pub fn violations(&self) -> &[crate::topology::Violation] {
        match self {
            CommandError::Config(ConfigError::Topology(err))
            | CommandError::Topology(err)
            | CommandError::Synth(SynthError::Invalid(err)) => err.violations(),
            _ => &[],
        }
    }
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Input loading
// ============================================================================

/// What kind of document an input file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Declarations to replay through the builder
    Topology,
    /// A previously synthesized manifest
    Manifest,
}

/// Manifests carry the envelope's `apiVersion`; topology files never do.
/// This is a pure function - no I/O.
pub fn detect_input_kind(content: &str, format: FileFormat) -> InputKind {
    let has_api_version = match format {
        FileFormat::Json => {
            serde_json::from_str::<serde_json::Value>(&config::strip_jsonc_comments(content))
                .map(|v| v.get("apiVersion").is_some())
                .unwrap_or(false)
        }
        FileFormat::Yaml => serde_yaml::from_str::<serde_yaml::Value>(content)
            .map(|v| v.get("apiVersion").is_some())
            .unwrap_or(false),
    };
    if has_api_version {
        InputKind::Manifest
    } else {
        InputKind::Topology
    }
}

/// Parse a manifest document without validating it
pub fn parse_manifest(content: &str, format: FileFormat) -> CommandResult<Manifest> {
    let manifest = match format {
        FileFormat::Json => Manifest::from_json(&config::strip_jsonc_comments(content))?,
        FileFormat::Yaml => Manifest::from_yaml(content)?,
    };
    Ok(manifest)
}

/// Load an input file as a manifest. Topology files are built, which
/// validates them; manifests are parsed as they are.
fn load_input(path: &Path) -> CommandResult<(Manifest, InputKind)> {
    let content = std::fs::read_to_string(path)?;
    let format = FileFormat::from_path(path);

    match detect_input_kind(&content, format) {
        InputKind::Manifest => {
            debug!(path = %path.display(), "Reading manifest");
            Ok((parse_manifest(&content, format)?, InputKind::Manifest))
        }
        InputKind::Topology => {
            debug!(path = %path.display(), "Building topology file");
            let builder = config::load_topology(path)?;
            Ok((builder.build()?, InputKind::Topology))
        }
    }
}

/// Load a topology file or manifest and make sure it passes validation
pub fn load_manifest(path: &Path) -> CommandResult<Manifest> {
    let (manifest, kind) = load_input(path)?;
    if kind == InputKind::Manifest {
        manifest.validate()?;
    }
    Ok(manifest)
}

// ============================================================================
// Commands (Pure business logic)
// ============================================================================

/// Render a validated manifest as the requested document
pub fn synthesize(
    manifest: &Manifest,
    target: SynthTarget,
    output: OutputFormat,
) -> CommandResult<String> {
    let rendered = match (target, output) {
        (SynthTarget::Manifest, OutputFormat::Json) => manifest.to_json()?,
        (SynthTarget::Manifest, OutputFormat::Yaml) => manifest.to_yaml()?,
        (SynthTarget::Cloudformation, format) => {
            let template = cloudformation::render(manifest)?;
            match format {
                OutputFormat::Json => serde_json::to_string_pretty(&template)?,
                OutputFormat::Yaml => serde_yaml::to_string(&template)?,
            }
        }
    };

    info!(
        deployment = %manifest.metadata.name,
        format = ?target,
        entities = manifest.entity_count(),
        "Synthesized {}",
        match target {
            SynthTarget::Manifest => API_VERSION,
            SynthTarget::Cloudformation => cloudformation::TEMPLATE_FORMAT_VERSION,
        }
    );
    Ok(rendered)
}

/// Result of validating an input file
#[derive(Debug)]
pub struct ValidationResult {
    pub manifest: Manifest,
    pub report: ValidationReport,
}

/// Validate a topology file or manifest. Error-severity violations fail the
/// call; warnings and hints come back in the report.
pub fn validate_file(path: &Path) -> CommandResult<ValidationResult> {
    let (manifest, _) = load_input(path)?;
    let report = validate_manifest(&manifest).into_result()?;
    Ok(ValidationResult { manifest, report })
}

/// Write to `out` (with `~` expanded) or return the content for stdout
pub fn write_output(content: &str, out: Option<&Path>) -> CommandResult<Option<PathBuf>> {
    let Some(out) = out else {
        return Ok(None);
    };
    let expanded = shellexpand::tilde(&out.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    std::fs::write(&path, content)?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote output");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOPOLOGY: &str = r#"
name: cmd
region: us-east-1
networks:
  - name: vpc
    az-count: 2
clusters:
  - name: cluster
    network: vpc
    instance-type: t3.micro
    min-capacity: 1
    max-capacity: 1
load-balancers:
  - name: lb
    network: vpc
    internet-facing: true
services:
  - name: svc
    cluster: cluster
    container:
      name: web
      image: example/server
      memory-limit-mib: 128
      port-mappings:
        - container-port: 8080
          host-port: 8080
    target-group:
      name: tg
      port: 8080
listeners:
  - name: http
    load-balancer: lb
    port: 80
    default-action:
      forward: [tg]
"#;

    fn create_temp_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_detect_input_kind() {
        assert_eq!(detect_input_kind(TOPOLOGY, FileFormat::Yaml), InputKind::Topology);
        assert_eq!(
            detect_input_kind(
                "// manifest\n{\"apiVersion\": \"topograph/v1\"}",
                FileFormat::Json
            ),
            InputKind::Manifest
        );
        assert_eq!(detect_input_kind("not: [valid", FileFormat::Yaml), InputKind::Topology);
    }

    #[test]
    fn test_load_manifest_from_topology_and_back() {
        let topology = create_temp_file(".yaml", TOPOLOGY);
        let manifest = load_manifest(topology.path()).unwrap();
        assert_eq!(manifest.entity_count(), 6);

        let json = synthesize(&manifest, SynthTarget::Manifest, OutputFormat::Json).unwrap();
        let written = create_temp_file(".json", &json);
        let reloaded = load_manifest(written.path()).unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn test_validate_reports_warnings() {
        let content = TOPOLOGY.replace("      port: 8080\nlisteners", "      port: 9090\nlisteners");
        let topology = create_temp_file(".yaml", &content);
        let result = validate_file(topology.path()).unwrap();
        assert!(result.report.has_warnings());
        assert!(!result.report.has_errors());
    }

    #[test]
    fn test_validate_edited_manifest_exit_code() {
        let topology = create_temp_file(".yaml", TOPOLOGY);
        let mut manifest = load_manifest(topology.path()).unwrap();
        manifest.resources.retain(|r| r.name != "tg");
        let edited = create_temp_file(".yaml", &manifest.to_yaml().unwrap());

        let err = validate_file(edited.path()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.violations().iter().any(|v| v.code == "service-unattached"));
        assert!(err.violations().iter().any(|v| v.code == "dangling-reference"));
    }

    #[test]
    fn test_configuration_error_exit_code() {
        let content = TOPOLOGY.replace("max-capacity: 1", "max-capacity: -4");
        let topology = create_temp_file(".yaml", &content);
        let err = load_manifest(topology.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_file_exit_code() {
        let err = load_manifest(Path::new("/nonexistent/topology.yaml")).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_synthesize_cloudformation_yaml() {
        let topology = create_temp_file(".yaml", TOPOLOGY);
        let manifest = load_manifest(topology.path()).unwrap();
        let yaml = synthesize(&manifest, SynthTarget::Cloudformation, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("AWS::ElasticLoadBalancingV2::Listener"));
    }

    #[test]
    fn test_write_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("manifest.json");
        let written = write_output("{}", Some(target.as_path())).unwrap();
        assert_eq!(written, Some(target.clone()));
        assert_eq!(std::fs::read_to_string(target).unwrap(), "{}");
        assert_eq!(write_output("{}", None).unwrap(), None);
    }
}
