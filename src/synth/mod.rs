//! Provider-specific renderings of a manifest

pub mod cloudformation;

use thiserror::Error;

use crate::topology::TopologyError;

/// Errors turning a manifest into a provider template
#[derive(Error, Debug)]
pub enum SynthError {
    #[error(transparent)]
    Invalid(#[from] TopologyError),

    #[error("Resource name '{0}' has no characters usable in a logical ID")]
    InvalidLogicalId(String),

    #[error("Logical ID '{logical_id}' is produced by both '{first}' and '{second}'")]
    LogicalIdCollision {
        logical_id: String,
        first: String,
        second: String,
    },

    #[error("Resource '{0}' is referenced before it was rendered")]
    MissingResource(String),
}

impl SynthError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SynthError::Invalid(err) => err.exit_code(),
            _ => 2,
        }
    }
}
