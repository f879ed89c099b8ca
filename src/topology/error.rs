use thiserror::Error;

use super::validation::Violation;

/// Errors raised while declaring or building a topology
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    /// A single declaration violates a local constraint. Raised by the call
    /// that introduced it.
    #[error("configuration error in '{entity}': {constraint}")]
    Configuration { entity: String, constraint: String },

    /// The assembled graph violates one or more cross-resource invariants.
    #[error("validation failed with {} error(s):\n{}", .0.len(), render_violations(.0))]
    Validation(Vec<Violation>),
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

impl TopologyError {
    pub fn configuration(entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        TopologyError::Configuration {
            entity: entity.into(),
            constraint: constraint.into(),
        }
    }

    /// Violations carried by a validation error; empty for configuration errors
    pub fn violations(&self) -> &[Violation] {
        match self {
            TopologyError::Configuration { .. } => &[],
            TopologyError::Validation(violations) => violations,
        }
    }

    /// Process exit code for this kind of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            TopologyError::Configuration { .. } => 2,
            TopologyError::Validation(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message_names_entity() {
        let err = TopologyError::configuration("cluster", "min-capacity (3) cannot exceed max-capacity (2)");
        assert_eq!(
            err.to_string(),
            "configuration error in 'cluster': min-capacity (3) cannot exceed max-capacity (2)"
        );
        assert_eq!(err.exit_code(), 2);
        assert!(err.violations().is_empty());
    }

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = TopologyError::Validation(vec![
            Violation::error("dangling-reference", "service", "cluster 'gone' does not exist"),
            Violation::error("service-unattached", "service", "not attached to any target group"),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("validation failed with 2 error(s):"));
        assert!(message.contains("[dangling-reference] 'service': cluster 'gone' does not exist"));
        assert!(message.contains("[service-unattached]"));
        assert_eq!(err.exit_code(), 3);
    }
}
