//! Validation of manifests that did not come straight out of a builder:
//! parsed from disk, edited by hand, or assembled from raw resources.

use std::io::Write;

use tempfile::NamedTempFile;

use topograph::cli::{load_manifest, validate_file};
use topograph::topology::resources::{ListenerAction, ResourceSpec};
use topograph::topology::{Manifest, TopologyError};

const MANIFEST: &str = r#"
apiVersion: topograph/v1
kind: Manifest
metadata:
  name: edited
  region: us-east-1
resources:
  - name: vpc
    spec:
      kind: network
      az-count: 2
  - name: cluster
    depends-on: [vpc]
    spec:
      kind: cluster
      network: vpc
      instance-type: t3.micro
      min-capacity: 1
      max-capacity: 2
  - name: lb
    depends-on: [vpc]
    spec:
      kind: load-balancer
      network: vpc
      internet-facing: true
  - name: api
    depends-on: [cluster]
    spec:
      kind: service
      cluster: cluster
      container:
        name: api
        image: example/api
        memory-limit-mib: 256
        port-mappings:
          - container-port: 8080
            host-port: 8080
  - name: api-tg
    depends-on: [vpc, api]
    spec:
      kind: target-group
      network: vpc
      service: api
      port: 8080
      protocol: HTTP
  - name: http
    depends-on: [lb, api-tg]
    spec:
      kind: listener
      load-balancer: lb
      port: 80
      protocol: HTTP
      default-action:
        type: forward
        target-groups: [api-tg]
"#;

fn parsed() -> Manifest {
    Manifest::from_yaml(MANIFEST).unwrap()
}

fn codes(err: &TopologyError) -> Vec<&str> {
    err.violations().iter().map(|v| v.code.as_str()).collect()
}

#[test]
fn test_hand_written_manifest_is_valid() {
    let manifest = parsed();
    assert_eq!(manifest.entity_count(), 6);
    let report = manifest.validate().unwrap();
    assert!(!report.has_errors());
    assert_eq!(manifest.resource("api").unwrap().depends_on, vec!["cluster"]);
}

#[test]
fn test_every_violation_is_reported() {
    let mut manifest = parsed();
    manifest.metadata.region = String::new();
    manifest.resources.retain(|r| r.name != "api-tg");
    if let Some(cluster) = manifest.resources.iter_mut().find(|r| r.name == "cluster") {
        if let ResourceSpec::Cluster(spec) = &mut cluster.spec {
            spec.min_capacity = 5;
        }
    }

    let err = manifest.validate().unwrap_err();
    let codes = codes(&err);
    assert!(codes.contains(&"empty-region"));
    assert!(codes.contains(&"constraint"));
    assert!(codes.contains(&"service-unattached"));
    assert!(codes.contains(&"dangling-reference"));
    assert!(codes.contains(&"dangling-dependency"));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_cycle_is_reported_with_path() {
    let mut manifest = parsed();
    if let Some(cluster) = manifest.resources.iter_mut().find(|r| r.name == "cluster") {
        cluster.depends_on.push("api".to_string());
    }

    let err = manifest.validate().unwrap_err();
    let cycle = err
        .violations()
        .iter()
        .find(|v| v.code == "cyclic-dependency")
        .expect("cycle should be reported");
    assert!(
        cycle.constraint.contains("cluster -> api -> cluster"),
        "unexpected cycle text: {}",
        cycle.constraint
    );
}

#[test]
fn test_network_with_dependencies_is_rejected() {
    let mut manifest = parsed();
    manifest.resources[0].depends_on.push("lb".to_string());

    let err = manifest.validate().unwrap_err();
    let codes = codes(&err);
    assert!(codes.contains(&"network-not-source"));
    assert!(codes.contains(&"cyclic-dependency"));
}

#[test]
fn test_cross_network_forward() {
    let content = MANIFEST.replace(
        "  - name: cluster\n",
        "  - name: other-vpc\n    spec:\n      kind: network\n      az-count: 1\n  - name: cluster\n",
    );
    let mut manifest = Manifest::from_yaml(&content).unwrap();
    if let Some(lb) = manifest.resources.iter_mut().find(|r| r.name == "lb") {
        if let ResourceSpec::LoadBalancer(spec) = &mut lb.spec {
            spec.network = "other-vpc".to_string();
        }
        lb.depends_on = vec!["other-vpc".to_string()];
    }

    let err = manifest.validate().unwrap_err();
    assert!(codes(&err).contains(&"cross-network-forward"));
}

#[test]
fn test_forward_to_wrong_kind() {
    let mut manifest = parsed();
    if let Some(listener) = manifest.resources.iter_mut().find(|r| r.name == "http") {
        if let ResourceSpec::Listener(spec) = &mut listener.spec {
            spec.default_action = ListenerAction::Forward {
                target_groups: vec!["api".to_string()],
            };
        }
        listener.depends_on = vec!["lb".to_string(), "api".to_string()];
    }

    let err = manifest.validate().unwrap_err();
    let violation = err
        .violations()
        .iter()
        .find(|v| v.code == "wrong-reference-kind")
        .expect("wrong kind should be reported");
    assert_eq!(violation.entity, "http");
}

#[test]
fn test_cli_loads_manifest_files() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();

    let manifest = load_manifest(file.path()).unwrap();
    assert_eq!(manifest, parsed());

    let result = validate_file(file.path()).unwrap();
    assert!(!result.report.has_errors());
}

#[test]
fn test_cli_rejects_broken_manifest_file() {
    let broken = MANIFEST.replace("cluster: cluster", "cluster: gone");
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(broken.as_bytes()).unwrap();

    let err = validate_file(file.path()).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(err
        .violations()
        .iter()
        .any(|v| v.code == "dangling-reference" && v.entity == "api"));
}

#[test]
fn test_unsupported_envelope() {
    let content = MANIFEST.replace("apiVersion: topograph/v1", "apiVersion: topograph/v2");
    assert!(Manifest::from_yaml(&content).is_err());
}

#[test]
fn test_self_referencing_listener_is_reported() {
    let content = MANIFEST
        .replace("load-balancer: lb", "load-balancer: http")
        .replace("depends-on: [lb, api-tg]", "depends-on: [http, api-tg]");
    let manifest = Manifest::from_yaml(&content).unwrap();

    let err = manifest.validate().unwrap_err();
    assert!(err
        .violations()
        .iter()
        .any(|v| v.code == "wrong-reference-kind" && v.entity == "http"));
    let cycle = err
        .violations()
        .iter()
        .find(|v| v.code == "cyclic-dependency")
        .expect("self reference should be a cycle");
    assert!(cycle.constraint.contains("http -> http"));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_listener_and_rule_naming_each_other() {
    let content = MANIFEST.replace("load-balancer: lb", "load-balancer: loop").replace(
        "    depends-on: [lb, api-tg]\n",
        "    depends-on: [loop, api-tg]\n",
    ) + r#"  - name: loop
    depends-on: [http]
    spec:
      kind: rule
      listener: http
      priority: 1
      path-patterns: ["/*"]
      action:
        type: forward
        target-groups: [api-tg]
"#;
    let manifest = Manifest::from_yaml(&content).unwrap();

    let err = manifest.validate().unwrap_err();
    let codes = codes(&err);
    assert!(codes.contains(&"wrong-reference-kind"));
    assert!(codes.contains(&"cyclic-dependency"));
}

#[test]
fn test_long_dependency_chain() {
    let mut manifest = parsed();
    let template = manifest.resource("cluster").unwrap().clone();
    let mut previous = template.name.clone();
    for i in 0..50_000 {
        let mut link = template.clone();
        link.name = format!("cluster-{}", i);
        link.depends_on.push(previous.clone());
        previous = link.name.clone();
        manifest.resources.push(link);
    }
    assert!(manifest.validate().is_ok());

    if let Some(cluster) = manifest.resources.iter_mut().find(|r| r.name == "cluster") {
        cluster.depends_on.push(previous);
    }
    let err = manifest.validate().unwrap_err();
    assert!(codes(&err).contains(&"cyclic-dependency"));
}

#[test]
fn test_network_beyond_address_space() {
    let content = MANIFEST.replace("az-count: 2", "az-count: 300");
    let manifest = Manifest::from_yaml(&content).unwrap();

    let err = manifest.validate().unwrap_err();
    assert!(err
        .violations()
        .iter()
        .any(|v| v.code == "constraint" && v.entity == "vpc" && v.constraint.contains("300")));
}
