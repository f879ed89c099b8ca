//! `${VAR}` placeholders in topology files
//!
//! `${VAR}` is replaced by the variable's value and `${VAR:-fallback}` falls
//! back when the variable is unset or empty. `$${` escapes a literal `${`.

use regex::{Captures, Regex};

use super::ConfigError;

const PLACEHOLDER: &str = r"\$\$\{|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// Replace every placeholder using `lookup`. All unresolved variables are
/// reported together.
pub fn interpolate<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = Regex::new(PLACEHOLDER).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut missing: Vec<String> = Vec::new();

    let result = pattern.replace_all(content, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "${".to_string();
        };
        match (lookup(name).filter(|v| !v.is_empty()), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::UnresolvedVariable(missing.join(", ")));
    }
    Ok(result.into_owned())
}

/// Interpolate from the process environment
pub fn interpolate_env(content: &str) -> Result<String, ConfigError> {
    interpolate(content, |name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_variables() {
        let env = vars(&[("REGION", "eu-central-1"), ("IMAGE_TAG", "1.4")]);
        let out = interpolate("region: ${REGION}\nimage: app:${IMAGE_TAG}", |n| {
            env.get(n).cloned()
        })
        .unwrap();
        assert_eq!(out, "region: eu-central-1\nimage: app:1.4");
    }

    #[test]
    fn test_fallback_values() {
        let env = vars(&[("EMPTY", "")]);
        let out = interpolate("${MISSING:-us-east-1} ${EMPTY:-x} ${NONE:-}", |n| {
            env.get(n).cloned()
        })
        .unwrap();
        assert_eq!(out, "us-east-1 x ");
    }

    #[test]
    fn test_reports_every_unresolved_variable() {
        let err = interpolate("${A} ${B} ${A}", |_| None).unwrap_err();
        match err {
            ConfigError::UnresolvedVariable(names) => assert_eq!(names, "A, B"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_escaped_placeholder() {
        let out = interpolate("literal $${HOME}", |_| Some("/root".to_string())).unwrap();
        assert_eq!(out, "literal ${HOME}");
    }

    #[test]
    fn test_plain_dollar_signs_are_untouched() {
        let out = interpolate("cost: $5 and $HOME", |_| None).unwrap();
        assert_eq!(out, "cost: $5 and $HOME");
    }
}
