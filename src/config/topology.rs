//! Declarative topology files
//!
//! A topology file lists the same declarations the builder API takes, keyed by
//! resource name. `TopologyFile::apply` replays them into a
//! [`TopologyBuilder`] in dependency order.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::topology::builder::{
    Action, ClusterRef, ListenerRef, ListenerSpec, LoadBalancerRef, NetworkRef, OutputSource,
    RuleSpec, TargetGroupRef, TopologyBuilder,
};
use crate::topology::error::TopologyError;
use crate::topology::resources::{
    ClusterSpec, ContainerSpec, FixedResponse, HttpMethod, InstanceType, InvalidInstanceType,
    LoadBalancerSpec, NetworkSpec, PortMapping, Protocol, ServiceSpec, SubnetGroup,
    SubnetSelection, TargetGroupSpec, TargetType, TransportProtocol,
};

/// The complete topology file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TopologyFile {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub networks: Vec<NetworkDecl>,
    #[serde(default)]
    pub clusters: Vec<ClusterDecl>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerDecl>,
    #[serde(default)]
    pub services: Vec<ServiceDecl>,
    #[serde(default)]
    pub listeners: Vec<ListenerDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkDecl {
    pub name: String,
    pub az_count: i64,
    #[serde(default)]
    pub nat_gateways: i64,
    /// Defaults to a single public group named `public`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnets: Option<Vec<SubnetGroup>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterDecl {
    pub name: String,
    pub network: String,
    pub instance_type: String,
    pub min_capacity: i64,
    pub max_capacity: i64,
    #[serde(default)]
    pub subnets: SubnetSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadBalancerDecl {
    pub name: String,
    pub network: String,
    #[serde(default)]
    pub internet_facing: bool,
    /// Defaults to the public subnets
    #[serde(default)]
    pub subnets: SubnetSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortMappingDecl {
    pub container_port: i64,
    pub host_port: i64,
    #[serde(default)]
    pub protocol: TransportProtocol,
}

fn default_essential() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerDecl {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMappingDecl>,
    pub memory_limit_mib: i64,
    #[serde(default = "default_essential")]
    pub essential: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetGroupDecl {
    pub name: String,
    /// Defaults to the network of the service's cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    pub port: i64,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceDecl {
    pub name: String,
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<i64>,
    pub container: ContainerDecl,
    pub target_group: TargetGroupDecl,
}

/// Exactly one of `forward` or `fixed-response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActionDecl {
    /// Target group names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_response: Option<FixedResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleDecl {
    pub name: String,
    pub priority: i64,
    #[serde(default)]
    pub path_patterns: Vec<String>,
    #[serde(default)]
    pub http_methods: Vec<HttpMethod>,
    pub action: ActionDecl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListenerDecl {
    pub name: String,
    pub load_balancer: String,
    pub port: i64,
    #[serde(default)]
    pub protocol: Protocol,
    pub default_action: ActionDecl,
    #[serde(default)]
    pub rules: Vec<RuleDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Load balancer whose DNS name is exported
    pub load_balancer_dns: String,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Strip C-style comments from JSONC content.
/// This is a pure function - no I/O.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }

        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                // Keep the newline so line numbers in parse errors still match
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    if nc == '\n' {
                        result.push('\n');
                    }
                    prev = nc;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

impl TopologyFile {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Parse JSON, with or without comments
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&strip_jsonc_comments(content))
    }

    /// Number of resources the file declares, rules and target groups
    /// included
    pub fn declaration_count(&self) -> usize {
        self.networks.len()
            + self.clusters.len()
            + self.load_balancers.len()
            + self.services.len() * 2
            + self
                .listeners
                .iter()
                .map(|l| 1 + l.rules.len())
                .sum::<usize>()
    }

    /// Replay every declaration into a fresh builder
    pub fn apply(&self) -> Result<TopologyBuilder, TopologyError> {
        let mut builder = TopologyBuilder::new(&self.name, &self.region);
        let mut handles = Handles::default();

        for decl in &self.networks {
            let mut spec = NetworkSpec::new(count(&decl.name, "az-count", decl.az_count)?)
                .with_nat_gateways(count(&decl.name, "nat-gateways", decl.nat_gateways)?);
            if let Some(subnets) = &decl.subnets {
                spec = spec.with_subnets(subnets.clone());
            }
            let network = builder.create_network(&decl.name, spec)?;
            handles.networks.insert(&decl.name, network);
        }

        for decl in &self.clusters {
            let network = lookup(&handles.networks, &decl.name, "network", &decl.network)?;
            let instance_type: InstanceType = decl
                .instance_type
                .parse()
                .map_err(|e: InvalidInstanceType| {
                    TopologyError::configuration(&decl.name, e.to_string())
                })?;
            let spec = ClusterSpec::new(
                instance_type,
                count(&decl.name, "min-capacity", decl.min_capacity)?,
                count(&decl.name, "max-capacity", decl.max_capacity)?,
            )
            .with_subnets(decl.subnets);
            let cluster = builder.create_cluster(&decl.name, network, spec)?;
            handles.networks_of_clusters.insert(&decl.name, &decl.network);
            handles.clusters.insert(&decl.name, cluster);
        }

        for decl in &self.load_balancers {
            let network = lookup(&handles.networks, &decl.name, "network", &decl.network)?;
            let spec = if decl.internet_facing {
                LoadBalancerSpec {
                    internet_facing: true,
                    subnets: decl.subnets,
                }
            } else {
                LoadBalancerSpec::internal(decl.subnets)
            };
            let lb = builder.create_load_balancer(&decl.name, network, spec)?;
            handles.load_balancers.insert(&decl.name, lb);
        }

        for decl in &self.services {
            let cluster = lookup(&handles.clusters, &decl.name, "cluster", &decl.cluster)?;
            let service = builder.create_service(&decl.name, cluster, service_spec(decl)?)?;

            let tg = &decl.target_group;
            let network_name = match &tg.network {
                Some(network) => network.as_str(),
                None => handles
                    .networks_of_clusters
                    .get(decl.cluster.as_str())
                    .copied()
                    .unwrap_or_default(),
            };
            let network = lookup(&handles.networks, &tg.name, "network", network_name)?;
            let spec = TargetGroupSpec::new(port(&tg.name, "port", tg.port)?, tg.protocol)
                .with_target_type(tg.target_type);
            let target_group =
                builder.attach_service_to_target_group(&tg.name, service, network, spec)?;
            handles.target_groups.insert(&tg.name, target_group);
        }

        for decl in &self.listeners {
            let lb = lookup(
                &handles.load_balancers,
                &decl.name,
                "load balancer",
                &decl.load_balancer,
            )?;
            let spec = ListenerSpec::new(
                port(&decl.name, "port", decl.port)?,
                decl.protocol,
                action(&handles, &decl.name, &decl.default_action)?,
            );
            let listener = builder.add_listener(&decl.name, lb, spec)?;
            handles.listeners.insert(&decl.name, listener);

            for rule in &decl.rules {
                let priority = count(&rule.name, "priority", rule.priority)?;
                let spec = RuleSpec::new(priority, action(&handles, &rule.name, &rule.action)?)
                    .with_path_patterns(rule.path_patterns.iter().cloned())
                    .with_http_methods(rule.http_methods.iter().copied());
                builder.add_routing_rule(&rule.name, listener, spec)?;
            }
        }

        for decl in &self.outputs {
            let lb = lookup(
                &handles.load_balancers,
                &decl.name,
                "load balancer",
                &decl.load_balancer_dns,
            )?;
            builder.add_output(
                &decl.name,
                OutputSource::LoadBalancerDns(lb),
                decl.description.as_deref(),
            )?;
        }

        debug!(
            deployment = %self.name,
            declarations = builder.len(),
            "Applied topology file"
        );
        Ok(builder)
    }
}

/// Handles minted so far, by declared name
#[derive(Default)]
struct Handles<'a> {
    networks: HashMap<&'a str, NetworkRef>,
    networks_of_clusters: HashMap<&'a str, &'a str>,
    clusters: HashMap<&'a str, ClusterRef>,
    load_balancers: HashMap<&'a str, LoadBalancerRef>,
    target_groups: HashMap<&'a str, TargetGroupRef>,
    listeners: HashMap<&'a str, ListenerRef>,
}

fn lookup<H: Copy>(
    handles: &HashMap<&str, H>,
    entity: &str,
    kind: &str,
    target: &str,
) -> Result<H, TopologyError> {
    handles.get(target).copied().ok_or_else(|| {
        TopologyError::configuration(entity, format!("references unknown {} '{}'", kind, target))
    })
}

/// Non-negative count or size
fn count(entity: &str, field: &str, value: i64) -> Result<u32, TopologyError> {
    if value < 0 {
        return Err(TopologyError::configuration(
            entity,
            format!("{} cannot be negative (got {})", field, value),
        ));
    }
    u32::try_from(value).map_err(|_| {
        TopologyError::configuration(entity, format!("{} is out of range (got {})", field, value))
    })
}

/// Ports are range-checked by the builder; only the sign is checked here so
/// that 70000 reports the port range rather than an overflow
fn port(entity: &str, field: &str, value: i64) -> Result<u32, TopologyError> {
    if value < 0 {
        return Err(TopologyError::configuration(
            entity,
            format!("{} must be between 1 and 65535 (got {})", field, value),
        ));
    }
    count(entity, field, value)
}

fn service_spec(decl: &ServiceDecl) -> Result<ServiceSpec, TopologyError> {
    let c = &decl.container;
    let mut container = ContainerSpec::new(
        &c.name,
        &c.image,
        count(&decl.name, "memory-limit-mib", c.memory_limit_mib)?,
    )
    .essential(c.essential);
    container.environment = c.environment.clone();
    for mapping in &c.port_mappings {
        container.port_mappings.push(PortMapping {
            container_port: port(&decl.name, "container-port", mapping.container_port)?,
            host_port: port(&decl.name, "host-port", mapping.host_port)?,
            protocol: mapping.protocol,
        });
    }

    let mut spec = ServiceSpec::new(container);
    if let Some(cpu) = decl.cpu {
        spec = spec.with_cpu(count(&decl.name, "cpu", cpu)?);
    }
    if let Some(desired_count) = decl.desired_count {
        spec = spec.with_desired_count(count(&decl.name, "desired-count", desired_count)?);
    }
    Ok(spec)
}

fn action(handles: &Handles<'_>, entity: &str, decl: &ActionDecl) -> Result<Action, TopologyError> {
    match (&decl.forward, &decl.fixed_response) {
        (Some(names), None) => {
            let target_groups = names
                .iter()
                .map(|name| lookup(&handles.target_groups, entity, "target group", name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Action::Forward(target_groups))
        }
        (None, Some(response)) => Ok(Action::FixedResponse(response.clone())),
        (Some(_), Some(_)) => Err(TopologyError::configuration(
            entity,
            "an action is either forward or fixed-response, not both",
        )),
        (None, None) => Err(TopologyError::configuration(
            entity,
            "an action needs forward or fixed-response",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
region: eu-west-1
networks:
  - name: vpc
    az-count: 2
clusters:
  - name: cluster
    network: vpc
    instance-type: t3.small
    min-capacity: 1
    max-capacity: 3
load-balancers:
  - name: lb
    network: vpc
    internet-facing: true
services:
  - name: api
    cluster: cluster
    container:
      name: api
      image: example/api:1.0
      memory-limit-mib: 512
      port-mappings:
        - container-port: 8080
          host-port: 8080
    target-group:
      name: api-tg
      port: 8080
listeners:
  - name: http
    load-balancer: lb
    port: 80
    default-action:
      forward: [api-tg]
"#;

    #[test]
    fn test_parse_minimal_yaml() {
        let file = TopologyFile::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(file.name, "minimal");
        assert_eq!(file.networks[0].nat_gateways, 0);
        assert!(file.networks[0].subnets.is_none());
        assert_eq!(file.services[0].target_group.protocol, Protocol::Http);
        assert!(file.services[0].container.essential);
        assert_eq!(file.declaration_count(), 6);
    }

    #[test]
    fn test_apply_minimal() {
        let file = TopologyFile::from_yaml_str(MINIMAL).unwrap();
        let manifest = file.apply().unwrap().build().unwrap();
        assert_eq!(manifest.entity_count(), 6);

        // Target group network defaults to the cluster's network
        let tg = manifest.resource("api-tg").unwrap();
        assert_eq!(tg.depends_on, vec!["vpc".to_string(), "api".to_string()]);
    }

    #[test]
    fn test_unknown_reference_names_the_referrer() {
        let content = MINIMAL.replace("network: vpc\n    instance-type", "network: nope\n    instance-type");
        let file = TopologyFile::from_yaml_str(&content).unwrap();
        let err = file.apply().unwrap_err();
        assert_eq!(
            err,
            TopologyError::configuration("cluster", "references unknown network 'nope'")
        );
    }

    #[test]
    fn test_unknown_forward_target() {
        let content = MINIMAL.replace("forward: [api-tg]", "forward: [ghost]");
        let file = TopologyFile::from_yaml_str(&content).unwrap();
        let err = file.apply().unwrap_err();
        assert!(err.to_string().contains("'http'"));
        assert!(err.to_string().contains("unknown target group 'ghost'"));
    }

    #[test]
    fn test_negative_capacity_is_a_configuration_error() {
        let content = MINIMAL.replace("min-capacity: 1", "min-capacity: -1");
        let err = TopologyFile::from_yaml_str(&content)
            .unwrap()
            .apply()
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::configuration("cluster", "min-capacity cannot be negative (got -1)")
        );
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_out_of_range_port() {
        let content = MINIMAL.replace("container-port: 8080", "container-port: 70000");
        let err = TopologyFile::from_yaml_str(&content)
            .unwrap()
            .apply()
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::configuration("api", "container-port must be between 1 and 65535 (got 70000)")
        );
    }

    #[test]
    fn test_action_needs_exactly_one_kind() {
        let content = MINIMAL.replace(
            "forward: [api-tg]",
            "forward: [api-tg]\n      fixed-response:\n        status-code: 404",
        );
        let err = TopologyFile::from_yaml_str(&content)
            .unwrap()
            .apply()
            .unwrap_err();
        assert!(err.to_string().contains("not both"));
    }

    #[test]
    fn test_parse_jsonc() {
        let content = r#"{
            // deployment identity
            "name": "json", /* inline */ "region": "us-west-2",
            "networks": [{"name": "vpc", "az-count": 1}]
        }"#;
        let file = TopologyFile::from_json_str(content).unwrap();
        assert_eq!(file.region, "us-west-2");
        assert_eq!(file.networks.len(), 1);
    }

    #[test]
    fn test_strip_jsonc_keeps_strings() {
        let input = r#"{"url": "http://example.com/*x*/", "a": "say \"//hi\""} // tail"#;
        let stripped = strip_jsonc_comments(input);
        assert_eq!(
            stripped,
            r#"{"url": "http://example.com/*x*/", "a": "say \"//hi\""} "#
        );
    }
}
