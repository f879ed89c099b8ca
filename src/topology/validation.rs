//! Whole-graph validation
//!
//! Checks a manifest against the cross-resource invariants of a deployment:
//! references resolve to the right kind of resource, every dependency edge
//! is declared, networks are source nodes, the graph is acyclic, services are
//! attached to exactly one target group and rule priorities are unique per
//! listener. Every violation is collected; nothing stops at the first one.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::constraints;
use super::error::TopologyError;
use super::manifest::{Manifest, OutputValue};
use super::resources::{Resource, ResourceKind, ResourceSpec};

/// How bad a violation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational hint
    Info,
    /// Deployable, but probably not what was meant
    Warning,
    /// The manifest cannot be provisioned
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub code: String,
    pub entity: String,
    pub constraint: String,
}

impl Violation {
    pub fn new(
        severity: Severity,
        code: &str,
        entity: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code: code.to_string(),
            entity: entity.into(),
            constraint: constraint.into(),
        }
    }

    pub fn error(code: &str, entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, entity, constraint)
    }

    pub fn warning(code: &str, entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, entity, constraint)
    }

    pub fn info(code: &str, entity: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, entity, constraint)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] '{}': {}", self.code, self.entity, self.constraint)
    }
}

/// All violations found in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn has_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.with_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.with_severity(Severity::Warning)
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(move |v| v.severity == severity)
    }

    /// Fails with every error-severity violation; otherwise hands the report
    /// back so warnings can still be shown
    pub fn into_result(self) -> Result<Self, TopologyError> {
        if self.has_errors() {
            Err(TopologyError::Validation(self.errors().cloned().collect()))
        } else {
            Ok(self)
        }
    }
}

// ============================================================================
// Pure validation logic (no I/O)
// ============================================================================

/// Run every check over a manifest
pub fn validate_manifest(manifest: &Manifest) -> ValidationReport {
    let mut report = ValidationReport::new();
    let index = index_by_name(&manifest.resources);

    check_metadata(manifest, &mut report);
    check_unique_names(&manifest.resources, &mut report);
    check_local_constraints(&manifest.resources, &index, &mut report);
    check_references(&manifest.resources, &index, &mut report);
    check_cycles(&manifest.resources, &index, &mut report);
    check_attachments(&manifest.resources, &index, &mut report);
    check_listeners(&manifest.resources, &index, &mut report);
    check_outputs(manifest, &index, &mut report);

    report
}

type Index<'a> = HashMap<&'a str, &'a Resource>;

/// First declaration wins for duplicated names
fn index_by_name(resources: &[Resource]) -> Index<'_> {
    let mut index = HashMap::new();
    for resource in resources {
        index.entry(resource.name.as_str()).or_insert(resource);
    }
    index
}

fn lookup<'a>(index: &Index<'a>, name: &str, kind: ResourceKind) -> Option<&'a ResourceSpec> {
    index
        .get(name)
        .copied()
        .filter(|r| r.kind() == kind)
        .map(|r| &r.spec)
}

/// Network a resource lives in. Every hop is resolved by kind, so a
/// reference to the wrong kind of resource ends the walk instead of looping.
fn network_of<'a>(index: &Index<'a>, resource: &'a Resource) -> Option<&'a str> {
    match &resource.spec {
        ResourceSpec::Network(_) => Some(resource.name.as_str()),
        ResourceSpec::Cluster(c) => Some(c.network.as_str()),
        ResourceSpec::LoadBalancer(lb) => Some(lb.network.as_str()),
        ResourceSpec::TargetGroup(tg) => Some(tg.network.as_str()),
        ResourceSpec::Service(s) => match lookup(index, &s.cluster, ResourceKind::Cluster) {
            Some(ResourceSpec::Cluster(c)) => Some(c.network.as_str()),
            _ => None,
        },
        ResourceSpec::Listener(l) => load_balancer_network(index, &l.load_balancer),
        ResourceSpec::Rule(r) => match lookup(index, &r.listener, ResourceKind::Listener) {
            Some(ResourceSpec::Listener(l)) => load_balancer_network(index, &l.load_balancer),
            _ => None,
        },
    }
}

fn load_balancer_network<'a>(index: &Index<'a>, name: &str) -> Option<&'a str> {
    match lookup(index, name, ResourceKind::LoadBalancer) {
        Some(ResourceSpec::LoadBalancer(lb)) => Some(lb.network.as_str()),
        _ => None,
    }
}

fn check_metadata(manifest: &Manifest, report: &mut ValidationReport) {
    if manifest.metadata.name.trim().is_empty() {
        report.add(Violation::error(
            "empty-deployment-name",
            "metadata",
            "deployment name cannot be empty",
        ));
    }
    if manifest.metadata.region.trim().is_empty() {
        report.add(Violation::error(
            "empty-region",
            manifest.metadata.name.as_str(),
            "deployment region cannot be empty",
        ));
    }
    if manifest.resources.is_empty() {
        report.add(Violation::info(
            "empty-topology",
            manifest.metadata.name.as_str(),
            "the manifest declares no resources",
        ));
    }
}

fn check_unique_names(resources: &[Resource], report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for resource in resources {
        if resource.name.trim().is_empty() {
            report.add(Violation::error(
                "empty-name",
                resource.kind().as_str(),
                "resource names cannot be empty",
            ));
        } else if !seen.insert(resource.name.as_str()) {
            report.add(Violation::error(
                "duplicate-name",
                resource.name.as_str(),
                "name is declared more than once",
            ));
        }
    }
}

fn check_local_constraints(resources: &[Resource], index: &Index<'_>, report: &mut ValidationReport) {
    for resource in resources {
        let checks = match &resource.spec {
            ResourceSpec::Network(n) => vec![constraints::network(n)],
            ResourceSpec::Cluster(c) => {
                let mut checks = vec![constraints::cluster(c)];
                if let Some(ResourceSpec::Network(n)) =
                    lookup(index, &c.network, ResourceKind::Network)
                {
                    checks.push(constraints::placement(n, &c.subnets));
                }
                checks
            }
            ResourceSpec::LoadBalancer(lb) => {
                let mut checks = vec![constraints::load_balancer(lb)];
                if let Some(ResourceSpec::Network(n)) =
                    lookup(index, &lb.network, ResourceKind::Network)
                {
                    checks.push(constraints::placement(n, &lb.subnets));
                }
                checks
            }
            ResourceSpec::Service(s) => vec![constraints::service(s)],
            ResourceSpec::TargetGroup(tg) => vec![constraints::target_group(tg)],
            ResourceSpec::Listener(l) => vec![constraints::listener(l)],
            ResourceSpec::Rule(r) => vec![constraints::rule(r)],
        };

        for constraint in checks.into_iter().filter_map(Result::err) {
            report.add(Violation::error(
                "constraint",
                resource.name.as_str(),
                constraint,
            ));
        }
    }
}

fn check_references(resources: &[Resource], index: &Index<'_>, report: &mut ValidationReport) {
    for resource in resources {
        if resource.kind() == ResourceKind::Network && !resource.depends_on.is_empty() {
            report.add(Violation::error(
                "network-not-source",
                resource.name.as_str(),
                format!(
                    "networks cannot depend on other resources (depends on {})",
                    resource.depends_on.join(", ")
                ),
            ));
        }

        for reference in resource.references() {
            match index.get(reference.target) {
                None => report.add(Violation::error(
                    "dangling-reference",
                    resource.name.as_str(),
                    format!(
                        "{} references {} '{}', which does not exist",
                        reference.field, reference.kind, reference.target
                    ),
                )),
                Some(target) if target.kind() != reference.kind => report.add(Violation::error(
                    "wrong-reference-kind",
                    resource.name.as_str(),
                    format!(
                        "{} must reference a {}, but '{}' is a {}",
                        reference.field,
                        reference.kind,
                        reference.target,
                        target.kind()
                    ),
                )),
                Some(_) => {}
            }

            if !resource.depends_on.iter().any(|d| d == reference.target) {
                report.add(Violation::error(
                    "undeclared-dependency",
                    resource.name.as_str(),
                    format!(
                        "references '{}' but does not list it in depends-on",
                        reference.target
                    ),
                ));
            }
        }

        for dependency in &resource.depends_on {
            if !index.contains_key(dependency.as_str()) {
                report.add(Violation::error(
                    "dangling-dependency",
                    resource.name.as_str(),
                    format!("depends on '{}', which does not exist", dependency),
                ));
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over depends-on edges; every back edge is a cycle.
/// The walk keeps its own stack so long chains cannot exhaust the thread's.
fn check_cycles<'a>(resources: &'a [Resource], index: &Index<'a>, report: &mut ValidationReport) {
    let mut marks: HashMap<&'a str, Mark> = HashMap::new();

    for resource in resources {
        let root = resource.name.as_str();
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        // (resource, index of the next dependency to follow)
        let mut stack: Vec<(&'a str, usize)> = vec![(root, 0)];

        while let Some(frame) = stack.last_mut() {
            let (name, next) = *frame;
            let dependency = index
                .get(name)
                .copied()
                .and_then(|r| r.depends_on.get(next))
                .map(String::as_str);
            let Some(dependency) = dependency else {
                marks.insert(name, Mark::Done);
                stack.pop();
                continue;
            };
            frame.1 += 1;

            if !index.contains_key(dependency) {
                continue;
            }
            match marks.get(dependency) {
                Some(Mark::Visiting) => {
                    let start = stack
                        .iter()
                        .position(|(n, _)| *n == dependency)
                        .unwrap_or(0);
                    let mut path: Vec<&str> = stack[start..].iter().map(|(n, _)| *n).collect();
                    path.push(dependency);
                    report.add(Violation::error(
                        "cyclic-dependency",
                        dependency,
                        format!("dependency cycle: {}", path.join(" -> ")),
                    ));
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(dependency, Mark::Visiting);
                    stack.push((dependency, 0));
                }
            }
        }
    }
}

fn check_attachments(resources: &[Resource], index: &Index<'_>, report: &mut ValidationReport) {
    let mut attachments: HashMap<&str, Vec<&str>> = HashMap::new();
    for resource in resources {
        if let ResourceSpec::TargetGroup(tg) = &resource.spec {
            attachments
                .entry(tg.service.as_str())
                .or_default()
                .push(resource.name.as_str());

            if let Some(ResourceSpec::Service(service)) =
                lookup(index, &tg.service, ResourceKind::Service)
            {
                let service_network = index
                    .get(tg.service.as_str())
                    .copied()
                    .and_then(|s| network_of(index, s));
                if let Some(service_network) = service_network {
                    if service_network != tg.network {
                        report.add(Violation::error(
                            "cross-network-attachment",
                            resource.name.as_str(),
                            format!(
                                "target group is in network '{}' but service '{}' runs in network '{}'",
                                tg.network, tg.service, service_network
                            ),
                        ));
                    }
                }

                if service.container.mapping_for_host_port(tg.port).is_none() {
                    report.add(Violation::warning(
                        "unexposed-target-port",
                        resource.name.as_str(),
                        format!(
                            "port {} is not a host port of service '{}'",
                            tg.port, tg.service
                        ),
                    ));
                }
            }
        }
    }

    for resource in resources {
        if resource.kind() != ResourceKind::Service {
            continue;
        }
        match attachments.get(resource.name.as_str()).map(Vec::as_slice) {
            None | Some([]) => report.add(Violation::error(
                "service-unattached",
                resource.name.as_str(),
                "service is not attached to any target group",
            )),
            Some([_]) => {}
            Some(groups) => report.add(Violation::error(
                "service-multiply-attached",
                resource.name.as_str(),
                format!(
                    "service is attached to {} target groups ({}); exactly one is allowed",
                    groups.len(),
                    groups.join(", ")
                ),
            )),
        }
    }
}

fn check_listeners(resources: &[Resource], index: &Index<'_>, report: &mut ValidationReport) {
    let mut listener_ports: HashMap<(&str, u32), &str> = HashMap::new();
    let mut rule_priorities: HashMap<(&str, u32), &str> = HashMap::new();
    let mut balancers_with_listeners: HashSet<&str> = HashSet::new();

    for resource in resources {
        let (action, own_network) = match &resource.spec {
            ResourceSpec::Listener(l) => {
                balancers_with_listeners.insert(l.load_balancer.as_str());
                if let Some(first) =
                    listener_ports.insert((l.load_balancer.as_str(), l.port), resource.name.as_str())
                {
                    report.add(Violation::error(
                        "duplicate-listener-port",
                        resource.name.as_str(),
                        format!(
                            "port {} on load balancer '{}' is already bound by listener '{}'",
                            l.port, l.load_balancer, first
                        ),
                    ));
                }
                (&l.default_action, network_of(index, resource))
            }
            ResourceSpec::Rule(r) => {
                if let Some(first) =
                    rule_priorities.insert((r.listener.as_str(), r.priority), resource.name.as_str())
                {
                    report.add(Violation::error(
                        "duplicate-rule-priority",
                        resource.name.as_str(),
                        format!(
                            "priority {} on listener '{}' is already used by rule '{}'",
                            r.priority, r.listener, first
                        ),
                    ));
                }
                (&r.action, network_of(index, resource))
            }
            _ => continue,
        };

        let Some(own_network) = own_network else {
            continue;
        };
        for tg_name in action.target_groups() {
            if let Some(ResourceSpec::TargetGroup(tg)) =
                lookup(index, tg_name, ResourceKind::TargetGroup)
            {
                if tg.network != own_network {
                    report.add(Violation::error(
                        "cross-network-forward",
                        resource.name.as_str(),
                        format!(
                            "forwards to target group '{}' in network '{}', but its load balancer is in network '{}'",
                            tg_name, tg.network, own_network
                        ),
                    ));
                }
            }
        }
    }

    for resource in resources {
        if resource.kind() == ResourceKind::LoadBalancer
            && !balancers_with_listeners.contains(resource.name.as_str())
        {
            report.add(Violation::warning(
                "load-balancer-without-listener",
                resource.name.as_str(),
                "load balancer has no listeners and will not accept traffic",
            ));
        }
    }
}

fn check_outputs(manifest: &Manifest, index: &Index<'_>, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for output in &manifest.outputs {
        if !seen.insert(output.name.as_str()) {
            report.add(Violation::error(
                "duplicate-output",
                output.name.as_str(),
                "output name is declared more than once",
            ));
        }

        let OutputValue::LoadBalancerDns { load_balancer } = &output.value;
        if lookup(index, load_balancer, ResourceKind::LoadBalancer).is_none() {
            report.add(Violation::error(
                "dangling-output",
                output.name.as_str(),
                format!("load balancer '{}' does not exist", load_balancer),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::manifest::ManifestMetadata;
    use crate::topology::resources::{
        Cluster, ContainerSpec, InstanceType, ListenerAction, NetworkSpec, Protocol, Service,
        SubnetSelection, TargetGroup, TargetType,
    };

    fn network(name: &str) -> Resource {
        Resource::new(name, ResourceSpec::Network(NetworkSpec::new(2)))
    }

    fn cluster(name: &str, network: &str) -> Resource {
        Resource::new(
            name,
            ResourceSpec::Cluster(Cluster {
                network: network.to_string(),
                instance_type: InstanceType::new("t3", "micro").unwrap(),
                min_capacity: 1,
                max_capacity: 1,
                subnets: SubnetSelection::default(),
            }),
        )
    }

    fn service(name: &str, cluster: &str) -> Resource {
        Resource::new(
            name,
            ResourceSpec::Service(Service {
                cluster: cluster.to_string(),
                cpu: None,
                desired_count: 1,
                container: ContainerSpec::new("web", "example/server", 256)
                    .with_port_mapping(8080, 25111),
            }),
        )
    }

    fn target_group(name: &str, network: &str, service: &str, port: u32) -> Resource {
        Resource::new(
            name,
            ResourceSpec::TargetGroup(TargetGroup {
                network: network.to_string(),
                service: service.to_string(),
                port,
                protocol: Protocol::Http,
                target_type: TargetType::Instance,
            }),
        )
    }

    fn manifest(resources: Vec<Resource>) -> Manifest {
        Manifest::new(
            ManifestMetadata {
                name: "test".to_string(),
                region: "us-east-1".to_string(),
            },
            resources,
            Vec::new(),
        )
    }

    fn codes(report: &ValidationReport) -> Vec<&str> {
        report.violations.iter().map(|v| v.code.as_str()).collect()
    }

    #[test]
    fn test_valid_graph_has_no_errors() {
        let m = manifest(vec![
            network("vpc"),
            cluster("cluster", "vpc"),
            service("svc", "cluster"),
            target_group("tg", "vpc", "svc", 25111),
        ]);
        let report = validate_manifest(&m);
        assert!(!report.has_errors(), "{:?}", report);
    }

    #[test]
    fn test_collects_every_violation() {
        let m = manifest(vec![
            network("vpc"),
            cluster("cluster", "missing-vpc"),
            service("svc", "cluster"),
            service("lonely", "cluster"),
            target_group("tg", "vpc", "svc", 25111),
        ]);
        let report = validate_manifest(&m);
        let codes = codes(&report);
        assert!(codes.contains(&"dangling-reference"));
        assert!(codes.contains(&"dangling-dependency"));
        assert!(codes.contains(&"service-unattached"));
        assert!(report.errors().count() >= 3);
    }

    #[test]
    fn test_wrong_reference_kind() {
        let m = manifest(vec![
            network("vpc"),
            cluster("cluster", "vpc"),
            service("svc", "vpc"),
            target_group("tg", "vpc", "svc", 25111),
        ]);
        let report = validate_manifest(&m);
        let violation = report
            .errors()
            .find(|v| v.code == "wrong-reference-kind")
            .expect("wrong kind should be reported");
        assert_eq!(violation.entity, "svc");
        assert!(violation.constraint.contains("'vpc' is a network"));
    }

    #[test]
    fn test_detects_cycle_with_path() {
        let mut vpc = network("vpc");
        vpc.depends_on.push("cluster".to_string());
        let m = manifest(vec![vpc, cluster("cluster", "vpc")]);
        let report = validate_manifest(&m);
        let codes = codes(&report);
        assert!(codes.contains(&"network-not-source"));
        let cycle = report
            .errors()
            .find(|v| v.code == "cyclic-dependency")
            .expect("cycle should be reported");
        assert!(cycle.constraint.contains("vpc -> cluster -> vpc"));
    }

    #[test]
    fn test_undeclared_dependency() {
        let mut c = cluster("cluster", "vpc");
        c.depends_on.clear();
        let report = validate_manifest(&manifest(vec![network("vpc"), c]));
        assert!(codes(&report).contains(&"undeclared-dependency"));
    }

    #[test]
    fn test_multiply_attached_service() {
        let m = manifest(vec![
            network("vpc"),
            cluster("cluster", "vpc"),
            service("svc", "cluster"),
            target_group("tg-a", "vpc", "svc", 25111),
            target_group("tg-b", "vpc", "svc", 25111),
        ]);
        let report = validate_manifest(&m);
        assert!(codes(&report).contains(&"service-multiply-attached"));
    }

    #[test]
    fn test_unexposed_port_is_a_warning() {
        let m = manifest(vec![
            network("vpc"),
            cluster("cluster", "vpc"),
            service("svc", "cluster"),
            target_group("tg", "vpc", "svc", 9999),
        ]);
        let report = validate_manifest(&m);
        assert!(!report.has_errors());
        assert!(report.has_warnings());
        assert_eq!(report.warnings().next().unwrap().code, "unexposed-target-port");
    }

    #[test]
    fn test_cross_network_attachment() {
        let m = manifest(vec![
            network("vpc-a"),
            network("vpc-b"),
            cluster("cluster", "vpc-a"),
            service("svc", "cluster"),
            target_group("tg", "vpc-b", "svc", 25111),
        ]);
        let report = validate_manifest(&m);
        assert!(codes(&report).contains(&"cross-network-attachment"));
    }

    #[test]
    fn test_into_result_keeps_only_errors() {
        let mut report = ValidationReport::new();
        report.add(Violation::warning("w", "a", "warn"));
        report.add(Violation::error("e", "b", "broken"));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].code, "e");
    }

    #[test]
    fn test_empty_forward_is_reported() {
        let m = manifest(vec![Resource::new(
            "listener",
            ResourceSpec::Listener(crate::topology::resources::Listener {
                load_balancer: "lb".to_string(),
                port: 80,
                protocol: Protocol::Http,
                default_action: ListenerAction::Forward {
                    target_groups: vec![],
                },
            }),
        )]);
        let report = validate_manifest(&m);
        let constraint = report
            .errors()
            .find(|v| v.code == "constraint")
            .expect("empty forward should be reported");
        assert!(constraint.constraint.contains("at least one target group"));
    }
}
