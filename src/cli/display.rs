//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use crate::topology::manifest::OutputValue;
use crate::topology::resources::ResourceSpec;
use crate::topology::{Manifest, Severity, ValidationReport, Violation};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    let last = headers.len().saturating_sub(1);

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        if i == last {
            output.push_str(&header.to_uppercase());
        } else {
            output.push_str(&format!("{:width$}", header.to_uppercase(), width = widths[i]));
        }
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < last {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Manifest display
// ============================================================================

/// One-line description of a resource's key attributes
fn describe(spec: &ResourceSpec) -> String {
    match spec {
        ResourceSpec::Network(n) => format!(
            "{} AZ, {} NAT, subnets: {}",
            n.az_count,
            n.nat_gateways,
            n.subnets
                .iter()
                .map(|g| format!("{} ({})", g.name, g.visibility))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        ResourceSpec::Cluster(c) => format!(
            "{} x{}..{} on {} subnets",
            c.instance_type, c.min_capacity, c.max_capacity, c.subnets.visibility
        ),
        ResourceSpec::LoadBalancer(lb) => {
            if lb.internet_facing {
                "internet-facing".to_string()
            } else {
                format!("internal on {} subnets", lb.subnets.visibility)
            }
        }
        ResourceSpec::Service(s) => {
            let ports = s
                .container
                .port_mappings
                .iter()
                .map(|m| format!("{}->{}", m.container_port, m.host_port))
                .collect::<Vec<_>>()
                .join(",");
            format!("{} [{}] {} MiB", s.container.image, ports, s.container.memory_limit_mib)
        }
        ResourceSpec::TargetGroup(tg) => {
            format!("{} {} ({})", tg.protocol, tg.port, tg.target_type)
        }
        ResourceSpec::Listener(l) => format!("{} {}", l.protocol, l.port),
        ResourceSpec::Rule(r) => {
            let mut conditions: Vec<String> = r.path_patterns.clone();
            conditions.extend(r.http_methods.iter().map(|m| m.to_string()));
            format!("priority {}: {}", r.priority, conditions.join(" "))
        }
    }
}

/// Format the resources and outputs of a manifest for display
pub fn format_manifest_summary(manifest: &Manifest, fingerprint: Option<&str>) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Deployment: {} ({})\n",
        manifest.metadata.name, manifest.metadata.region
    ));
    if let Some(fingerprint) = fingerprint {
        output.push_str(&format!("Fingerprint: {}\n", fingerprint));
    }
    output.push_str(&format!("Resources ({}):\n\n", manifest.entity_count()));

    let rows: Vec<Vec<String>> = manifest
        .resources
        .iter()
        .map(|r| {
            vec![
                r.name.clone(),
                r.kind().to_string(),
                if r.depends_on.is_empty() {
                    "-".to_string()
                } else {
                    r.depends_on.join(",")
                },
                describe(&r.spec),
            ]
        })
        .collect();
    output.push_str(&format_table(&["name", "kind", "depends-on", "details"], rows));

    if !manifest.outputs.is_empty() {
        output.push_str(&format!("\nOutputs ({}):\n\n", manifest.outputs.len()));
        let rows = manifest
            .outputs
            .iter()
            .map(|o| {
                let OutputValue::LoadBalancerDns { load_balancer } = &o.value;
                vec![
                    o.name.clone(),
                    format!("{} dns-name", load_balancer),
                    o.description.clone().unwrap_or_default(),
                ]
            })
            .collect();
        output.push_str(&format_table(&["name", "value", "description"], rows));
    }

    output
}

// ============================================================================
// Validation display
// ============================================================================

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "i",
        Severity::Warning => "!",
        Severity::Error => "✗",
    }
}

/// Format violations one per line, most severe first
pub fn format_violations(violations: &[Violation]) -> String {
    let mut sorted: Vec<&Violation> = violations.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));

    let mut output = String::new();
    for violation in sorted {
        output.push_str(&format!(
            "  {} {}: {}\n",
            severity_marker(violation.severity),
            violation.severity,
            violation
        ));
    }
    output
}

/// Format the outcome of `validate`
pub fn format_validation_result(path: &str, manifest: &Manifest, report: &ValidationReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("✓ {} is valid\n\n", path));
    output.push_str(&format!("  Deployment: {}\n", manifest.metadata.name));
    output.push_str(&format!("  Region:     {}\n", manifest.metadata.region));
    output.push_str(&format!("  Resources:  {}\n", manifest.entity_count()));
    output.push_str(&format!("  Outputs:    {}\n", manifest.outputs.len()));

    if !report.violations.is_empty() {
        output.push('\n');
        output.push_str(&format_violations(&report.violations));
    }

    output
}

/// Format a failed validation
pub fn format_validation_failure(path: &str, violations: &[Violation]) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "✗ {} is invalid ({} error(s))\n\n",
        path,
        violations.len()
    ));
    output.push_str(&format_violations(violations));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::builder::{Action, ListenerSpec, OutputSource, TopologyBuilder};
    use crate::topology::resources::{LoadBalancerSpec, NetworkSpec, Protocol};

    #[test]
    fn test_format_table_aligns_columns() {
        let table = format_table(
            &["name", "kind"],
            vec![
                vec!["vpc".to_string(), "network".to_string()],
                vec!["app-target-group".to_string(), "target-group".to_string()],
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "NAME               KIND");
        assert_eq!(lines[1], "vpc                network");
        assert_eq!(lines[2], "app-target-group   target-group");
    }

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&["name"], vec![]), "No resources found.\n");
    }

    #[test]
    fn test_manifest_summary() {
        let mut b = TopologyBuilder::new("demo", "us-east-1");
        let vpc = b.create_network("vpc", NetworkSpec::new(2)).unwrap();
        let lb = b
            .create_load_balancer("lb", vpc, LoadBalancerSpec::internet_facing())
            .unwrap();
        b.add_listener(
            "http",
            lb,
            ListenerSpec::new(80, Protocol::Http, Action::fixed_response(404, "Not found")),
        )
        .unwrap();
        b.add_output("endpoint", OutputSource::LoadBalancerDns(lb), Some("entry"))
            .unwrap();
        let manifest = b.build().unwrap();

        let summary = format_manifest_summary(&manifest, Some("abc123"));
        assert!(summary.starts_with("Deployment: demo (us-east-1)\n"));
        assert!(summary.contains("Fingerprint: abc123"));
        assert!(summary.contains("Resources (3):"));
        assert!(summary.contains("2 AZ, 0 NAT, subnets: public (public)"));
        assert!(summary.contains("lb dns-name"));
    }

    #[test]
    fn test_violations_sorted_by_severity() {
        let violations = vec![
            Violation::warning("unexposed-target-port", "tg", "port 9090 is not a host port"),
            Violation::error("dangling-reference", "svc", "cluster 'x' does not exist"),
        ];
        let text = format_violations(&violations);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("error: [dangling-reference]"));
        assert!(lines[1].contains("warning: [unexposed-target-port]"));
    }
}
