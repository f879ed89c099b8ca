//! The immutable output of a topology build

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use super::error::TopologyError;
use super::resources::{Resource, ResourceKind};
use super::validation::{validate_manifest, ValidationReport};

/// Manifest schema version
pub const API_VERSION: &str = "topograph/v1";

/// Manifest document kind
pub const MANIFEST_KIND: &str = "Manifest";

/// Errors reading or writing a serialized manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(
        "Unsupported manifest: apiVersion '{api_version}', kind '{kind}' (expected {}, {})",
        API_VERSION,
        MANIFEST_KIND
    )]
    Unsupported { api_version: String, kind: String },
}

/// Deployment identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    pub region: String,
}

/// Attribute of a resource exported as a stack output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attribute", rename_all = "kebab-case")]
pub enum OutputValue {
    LoadBalancerDns {
        #[serde(rename = "load-balancer")]
        load_balancer: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: OutputValue,
}

/// Serialized resource graph handed to a provisioning engine.
///
/// Resources are listed in declaration order, which is also a valid
/// creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub resources: Vec<Resource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

impl Manifest {
    pub fn new(metadata: ManifestMetadata, resources: Vec<Resource>, outputs: Vec<Output>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: MANIFEST_KIND.to_string(),
            metadata,
            resources,
            outputs,
        }
    }

    /// Number of declared resources; outputs are not entities
    pub fn entity_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    /// Re-check every graph invariant. Warnings are logged and returned in
    /// the report; errors fail the call.
    pub fn validate(&self) -> Result<ValidationReport, TopologyError> {
        let report = validate_manifest(self);
        for violation in report.warnings() {
            warn!(
                deployment = %self.metadata.name,
                code = %violation.code,
                entity = %violation.entity,
                "{}",
                violation.constraint
            );
        }
        report.into_result()
    }

    /// SHA-256 over the compact JSON form, hex encoded
    pub fn fingerprint(&self) -> Result<String, ManifestError> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_str(content)?;
        manifest.check_envelope()
    }

    pub fn from_yaml(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_yaml::from_str(content)?;
        manifest.check_envelope()
    }

    fn check_envelope(self) -> Result<Self, ManifestError> {
        if self.api_version != API_VERSION || self.kind != MANIFEST_KIND {
            return Err(ManifestError::Unsupported {
                api_version: self.api_version,
                kind: self.kind,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::resources::{NetworkSpec, ResourceSpec};

    fn sample() -> Manifest {
        Manifest::new(
            ManifestMetadata {
                name: "sample".to_string(),
                region: "eu-west-1".to_string(),
            },
            vec![Resource::new(
                "vpc",
                ResourceSpec::Network(NetworkSpec::new(2)),
            )],
            Vec::new(),
        )
    }

    #[test]
    fn test_envelope_fields() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["apiVersion"], "topograph/v1");
        assert_eq!(value["kind"], "Manifest");
        assert_eq!(value["resources"][0]["spec"]["kind"], "network");
        assert_eq!(value["resources"][0]["spec"]["az-count"], 2);
        assert!(value.get("outputs").is_none());
    }

    #[test]
    fn test_rejects_foreign_documents() {
        let json = r#"{
            "apiVersion": "other/v1",
            "kind": "Pipeline",
            "metadata": {"name": "x", "region": "y"}
        }"#;
        let err = Manifest::from_json(json).unwrap_err();
        assert!(matches!(err, ManifestError::Unsupported { .. }));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        b.metadata.region = "us-east-1".to_string();
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_lookups() {
        let manifest = sample();
        assert_eq!(manifest.entity_count(), 1);
        assert!(manifest.resource("vpc").is_some());
        assert!(manifest.resource("nope").is_none());
        assert_eq!(manifest.resources_of(ResourceKind::Network).count(), 1);
        assert_eq!(manifest.resources_of(ResourceKind::Cluster).count(), 0);
    }
}
