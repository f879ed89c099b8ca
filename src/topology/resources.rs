//! Resource entities that make up a deployment topology.
//!
//! These are plain data: the builder produces them, the manifest serializes
//! them, and the validator and renderers read them. References between
//! resources are by name.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant for every kind of resource in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Cluster,
    LoadBalancer,
    Service,
    TargetGroup,
    Listener,
    Rule,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Cluster => "cluster",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::Service => "service",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::Listener => "listener",
            ResourceKind::Rule => "rule",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Network
// ============================================================================

/// Reachability of a subnet group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetVisibility {
    /// Routed through an internet gateway
    #[default]
    Public,
    /// Egress only, through NAT gateways
    Private,
    /// No route out of the network
    Isolated,
}

impl fmt::Display for SubnetVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetVisibility::Public => f.write_str("public"),
            SubnetVisibility::Private => f.write_str("private"),
            SubnetVisibility::Isolated => f.write_str("isolated"),
        }
    }
}

/// A named group of subnets, one subnet per availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroup {
    pub name: String,
    pub visibility: SubnetVisibility,
}

impl SubnetGroup {
    pub fn public(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: SubnetVisibility::Public,
        }
    }

    pub fn private(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: SubnetVisibility::Private,
        }
    }

    pub fn isolated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: SubnetVisibility::Isolated,
        }
    }
}

fn default_subnets() -> Vec<SubnetGroup> {
    vec![SubnetGroup::public("public")]
}

/// An isolated virtual network. Always a source node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkSpec {
    pub az_count: u32,
    /// NAT gateways cost money around the clock, so none unless asked for
    #[serde(default)]
    pub nat_gateways: u32,
    #[serde(default = "default_subnets")]
    pub subnets: Vec<SubnetGroup>,
}

impl NetworkSpec {
    /// A network spanning `az_count` zones with a single public subnet group
    /// and no NAT gateways
    pub fn new(az_count: u32) -> Self {
        Self {
            az_count,
            nat_gateways: 0,
            subnets: default_subnets(),
        }
    }

    pub fn with_nat_gateways(mut self, nat_gateways: u32) -> Self {
        self.nat_gateways = nat_gateways;
        self
    }

    pub fn with_subnets(mut self, subnets: Vec<SubnetGroup>) -> Self {
        self.subnets = subnets;
        self
    }

    /// Subnet groups with the given visibility, in declaration order
    pub fn groups_with(&self, visibility: SubnetVisibility) -> impl Iterator<Item = &SubnetGroup> {
        self.subnets
            .iter()
            .filter(move |g| g.visibility == visibility)
    }

    pub fn has_visibility(&self, visibility: SubnetVisibility) -> bool {
        self.groups_with(visibility).next().is_some()
    }
}

/// Which subnets of the network a resource is placed on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubnetSelection {
    #[serde(default)]
    pub visibility: SubnetVisibility,
    /// Use only one subnet per availability zone
    #[serde(default)]
    pub one_per_az: bool,
}

impl SubnetSelection {
    pub fn new(visibility: SubnetVisibility) -> Self {
        Self {
            visibility,
            one_per_az: false,
        }
    }

    pub fn one_per_az(mut self) -> Self {
        self.one_per_az = true;
        self
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid instance type '{0}': expected <family>.<size>, e.g. t3.micro")]
pub struct InvalidInstanceType(pub String);

/// Compute instance class and size, written `family.size`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceType {
    family: String,
    size: String,
}

impl InstanceType {
    pub fn new(family: &str, size: &str) -> Result<Self, InvalidInstanceType> {
        format!("{}.{}", family, size).parse()
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn size(&self) -> &str {
        &self.size
    }
}

impl FromStr for InstanceType {
    type Err = InvalidInstanceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_part =
            |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

        let (family, size) = s
            .split_once('.')
            .ok_or_else(|| InvalidInstanceType(s.to_string()))?;
        if !valid_part(family) || !valid_part(size) {
            return Err(InvalidInstanceType(s.to_string()));
        }

        Ok(Self {
            family: family.to_ascii_lowercase(),
            size: size.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for InstanceType {
    type Error = InvalidInstanceType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstanceType> for String {
    fn from(value: InstanceType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.size)
    }
}

/// Builder input for a cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub instance_type: InstanceType,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub subnets: SubnetSelection,
}

impl ClusterSpec {
    pub fn new(instance_type: InstanceType, min_capacity: u32, max_capacity: u32) -> Self {
        Self {
            instance_type,
            min_capacity,
            max_capacity,
            subnets: SubnetSelection::default(),
        }
    }

    pub fn with_subnets(mut self, subnets: SubnetSelection) -> Self {
        self.subnets = subnets;
        self
    }
}

/// A pool of compute instances attached to a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub network: String,
    pub instance_type: InstanceType,
    pub min_capacity: u32,
    pub max_capacity: u32,
    #[serde(default)]
    pub subnets: SubnetSelection,
}

// ============================================================================
// Load balancer
// ============================================================================

/// Builder input for a load balancer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadBalancerSpec {
    pub internet_facing: bool,
    pub subnets: SubnetSelection,
}

impl LoadBalancerSpec {
    /// Public entry point on the public subnets
    pub fn internet_facing() -> Self {
        Self {
            internet_facing: true,
            subnets: SubnetSelection::new(SubnetVisibility::Public),
        }
    }

    pub fn internal(subnets: SubnetSelection) -> Self {
        Self {
            internet_facing: false,
            subnets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadBalancer {
    pub network: String,
    pub internet_facing: bool,
    #[serde(default)]
    pub subnets: SubnetSelection,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => f.write_str("tcp"),
            TransportProtocol::Udp => f.write_str("udp"),
        }
    }
}

/// Container port exposed on a host port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    #[serde(default)]
    pub protocol: TransportProtocol,
}

impl PortMapping {
    pub fn tcp(container_port: u32, host_port: u32) -> Self {
        Self {
            container_port,
            host_port,
            protocol: TransportProtocol::Tcp,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One container definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerSpec {
    pub name: String,
    /// Registry reference; resolved by the container runtime, not here
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    pub memory_limit_mib: u32,
    /// If this container stops, the whole task is considered failed
    #[serde(default = "default_true")]
    pub essential: bool,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, memory_limit_mib: u32) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            environment: BTreeMap::new(),
            port_mappings: Vec::new(),
            memory_limit_mib,
            essential: true,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_port_mapping(mut self, container_port: u32, host_port: u32) -> Self {
        self.port_mappings
            .push(PortMapping::tcp(container_port, host_port));
        self
    }

    pub fn essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }

    /// The mapping published on `host_port`, if any
    pub fn mapping_for_host_port(&self, host_port: u32) -> Option<&PortMapping> {
        self.port_mappings.iter().find(|m| m.host_port == host_port)
    }
}

fn default_desired_count() -> u32 {
    1
}

/// Builder input for a service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub container: ContainerSpec,
    /// Task-level CPU units (1024 = one vCPU)
    pub cpu: Option<u32>,
    pub desired_count: u32,
}

impl ServiceSpec {
    pub fn new(container: ContainerSpec) -> Self {
        Self {
            container,
            cpu: None,
            desired_count: default_desired_count(),
        }
    }

    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_desired_count(mut self, desired_count: u32) -> Self {
        self.desired_count = desired_count;
        self
    }
}

/// A long-running task scheduled onto a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    pub container: ContainerSpec,
}

// ============================================================================
// Target group
// ============================================================================

/// Application-layer protocol of a listener or target group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("HTTP"),
            Protocol::Https => f.write_str("HTTPS"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetType {
    /// Targets are registered by instance and host port
    #[default]
    Instance,
    Ip,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Instance => f.write_str("instance"),
            TargetType::Ip => f.write_str("ip"),
        }
    }
}

/// Builder input for a target group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGroupSpec {
    pub port: u32,
    pub protocol: Protocol,
    pub target_type: TargetType,
}

impl TargetGroupSpec {
    pub fn new(port: u32, protocol: Protocol) -> Self {
        Self {
            port,
            protocol,
            target_type: TargetType::Instance,
        }
    }

    pub fn with_target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = target_type;
        self
    }
}

/// A pool of service endpoints used as a routing destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetGroup {
    pub network: String,
    pub service: String,
    pub port: u32,
    pub protocol: Protocol,
    #[serde(default)]
    pub target_type: TargetType,
}

// ============================================================================
// Listener and rules
// ============================================================================

/// Canned response returned by the load balancer itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixedResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_body: Option<String>,
}

impl FixedResponse {
    /// Plain-text response
    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            content_type: Some("text/plain".to_string()),
            message_body: Some(body.into()),
        }
    }
}

/// What a listener or rule does with a matched request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListenerAction {
    Forward {
        #[serde(rename = "target-groups")]
        target_groups: Vec<String>,
    },
    FixedResponse(FixedResponse),
}

impl ListenerAction {
    /// Target groups this action forwards to
    pub fn target_groups(&self) -> &[String] {
        match self {
            ListenerAction::Forward { target_groups } => target_groups,
            ListenerAction::FixedResponse(_) => &[],
        }
    }
}

/// A load balancer's port/protocol binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Listener {
    pub load_balancer: String,
    pub port: u32,
    pub protocol: Protocol,
    pub default_action: ListenerAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        };
        f.write_str(s)
    }
}

/// A prioritized routing rule on a listener. Lower priorities are
/// evaluated first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rule {
    pub listener: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_methods: Vec<HttpMethod>,
    pub action: ListenerAction,
}

impl Rule {
    pub fn has_conditions(&self) -> bool {
        !self.path_patterns.is_empty() || !self.http_methods.is_empty()
    }
}

// ============================================================================
// Graph nodes
// ============================================================================

/// Kind-specific attributes of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Network(NetworkSpec),
    Cluster(Cluster),
    LoadBalancer(LoadBalancer),
    Service(Service),
    TargetGroup(TargetGroup),
    Listener(Listener),
    Rule(Rule),
}

/// An outgoing reference from one resource to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub target: &'a str,
    pub kind: ResourceKind,
}

/// A named node of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub spec: ResourceSpec,
}

impl Resource {
    /// Create a resource whose dependency edges are exactly its references
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        let mut resource = Self {
            name: name.into(),
            depends_on: Vec::new(),
            spec,
        };
        let mut depends_on: Vec<String> = Vec::new();
        for reference in resource.references() {
            if !depends_on.iter().any(|d| d == reference.target) {
                depends_on.push(reference.target.to_string());
            }
        }
        resource.depends_on = depends_on;
        resource
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.spec {
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::Cluster(_) => ResourceKind::Cluster,
            ResourceSpec::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceSpec::Listener(_) => ResourceKind::Listener,
            ResourceSpec::Rule(_) => ResourceKind::Rule,
        }
    }

    /// Every resource this one names in its attributes
    pub fn references(&self) -> Vec<Reference<'_>> {
        fn reference<'a>(field: &'static str, target: &'a str, kind: ResourceKind) -> Reference<'a> {
            Reference {
                field,
                target,
                kind,
            }
        }

        match &self.spec {
            ResourceSpec::Network(_) => Vec::new(),
            ResourceSpec::Cluster(c) => {
                vec![reference("network", &c.network, ResourceKind::Network)]
            }
            ResourceSpec::LoadBalancer(lb) => {
                vec![reference("network", &lb.network, ResourceKind::Network)]
            }
            ResourceSpec::Service(s) => {
                vec![reference("cluster", &s.cluster, ResourceKind::Cluster)]
            }
            ResourceSpec::TargetGroup(tg) => vec![
                reference("network", &tg.network, ResourceKind::Network),
                reference("service", &tg.service, ResourceKind::Service),
            ],
            ResourceSpec::Listener(l) => {
                let mut refs = vec![reference(
                    "load-balancer",
                    &l.load_balancer,
                    ResourceKind::LoadBalancer,
                )];
                refs.extend(
                    l.default_action
                        .target_groups()
                        .iter()
                        .map(|tg| reference("default-action", tg, ResourceKind::TargetGroup)),
                );
                refs
            }
            ResourceSpec::Rule(r) => {
                let mut refs = vec![reference("listener", &r.listener, ResourceKind::Listener)];
                refs.extend(
                    r.action
                        .target_groups()
                        .iter()
                        .map(|tg| reference("action", tg, ResourceKind::TargetGroup)),
                );
                refs
            }
        }
    }
}
