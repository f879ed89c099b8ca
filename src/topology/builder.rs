//! Explicit builder for a deployment topology
//!
//! Each `create_*` / `add_*` call declares one resource, checks its local
//! constraints immediately and returns a typed handle. Handles are passed to
//! later calls to express dependencies; `build()` validates the whole graph
//! and freezes it into a [`Manifest`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use super::constraints;
use super::error::TopologyError;
use super::manifest::{Manifest, ManifestMetadata, Output, OutputValue};
use super::resources::{
    Cluster, ClusterSpec, FixedResponse, HttpMethod, Listener, ListenerAction, LoadBalancer,
    LoadBalancerSpec, NetworkSpec, Protocol, Resource, ResourceKind, ResourceSpec, Rule, Service,
    ServiceSpec, TargetGroup, TargetGroupSpec,
};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

/// Position of a resource inside the builder that declared it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    builder: u64,
    index: usize,
}

/// A handle that is statically known to point at one kind of resource
pub trait TypedHandle: Copy {
    const KIND: ResourceKind;

    fn handle(&self) -> Handle;
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Handle);

        impl TypedHandle for $name {
            const KIND: ResourceKind = $kind;

            fn handle(&self) -> Handle {
                self.0
            }
        }
    };
}

typed_handle!(
    /// Handle to a declared network
    NetworkRef => ResourceKind::Network
);
typed_handle!(
    /// Handle to a declared cluster
    ClusterRef => ResourceKind::Cluster
);
typed_handle!(
    /// Handle to a declared load balancer
    LoadBalancerRef => ResourceKind::LoadBalancer
);
typed_handle!(
    /// Handle to a declared service
    ServiceRef => ResourceKind::Service
);
typed_handle!(
    /// Handle to a declared target group
    TargetGroupRef => ResourceKind::TargetGroup
);
typed_handle!(
    /// Handle to a declared listener
    ListenerRef => ResourceKind::Listener
);
typed_handle!(
    /// Handle to a declared routing rule
    RuleRef => ResourceKind::Rule
);

/// Action input for listeners and rules
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Forward(Vec<TargetGroupRef>),
    FixedResponse(FixedResponse),
}

impl Action {
    pub fn forward(target_group: TargetGroupRef) -> Self {
        Action::Forward(vec![target_group])
    }

    /// Plain-text fixed response
    pub fn fixed_response(status_code: u16, body: impl Into<String>) -> Self {
        Action::FixedResponse(FixedResponse::text(status_code, body))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSpec {
    pub port: u32,
    pub protocol: Protocol,
    pub default_action: Action,
}

impl ListenerSpec {
    pub fn new(port: u32, protocol: Protocol, default_action: Action) -> Self {
        Self {
            port,
            protocol,
            default_action,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSpec {
    pub priority: u32,
    pub path_patterns: Vec<String>,
    pub http_methods: Vec<HttpMethod>,
    pub action: Action,
}

impl RuleSpec {
    pub fn new(priority: u32, action: Action) -> Self {
        Self {
            priority,
            path_patterns: Vec::new(),
            http_methods: Vec::new(),
            action,
        }
    }

    pub fn with_path_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_http_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.http_methods.extend(methods);
        self
    }
}

/// Source of a stack output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputSource {
    LoadBalancerDns(LoadBalancerRef),
}

/// Accumulated graph state for one deployment
#[derive(Debug)]
pub struct TopologyBuilder {
    id: u64,
    name: String,
    region: String,
    resources: Vec<Resource>,
    names: HashMap<String, usize>,
    outputs: Vec<Output>,
}

impl TopologyBuilder {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            region: region.into(),
            resources: Vec::new(),
            names: HashMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Number of resources declared so far
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Declared name behind a handle
    pub fn name_of<H: TypedHandle>(&self, handle: H) -> Option<&str> {
        self.lookup(handle).map(|r| r.name.as_str())
    }

    pub fn create_network(
        &mut self,
        name: impl Into<String>,
        spec: NetworkSpec,
    ) -> Result<NetworkRef, TopologyError> {
        let name = self.claim(name.into())?;
        constraints::network(&spec).map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            network = %name,
            az_count = spec.az_count,
            nat_gateways = spec.nat_gateways,
            "Declared network"
        );
        Ok(NetworkRef(self.push(name, ResourceSpec::Network(spec))))
    }

    pub fn create_cluster(
        &mut self,
        name: impl Into<String>,
        network: NetworkRef,
        spec: ClusterSpec,
    ) -> Result<ClusterRef, TopologyError> {
        let name = self.claim(name.into())?;
        let (network_name, network_spec) = self.network(network, &name)?;

        let cluster = Cluster {
            network: network_name.to_string(),
            instance_type: spec.instance_type,
            min_capacity: spec.min_capacity,
            max_capacity: spec.max_capacity,
            subnets: spec.subnets,
        };
        constraints::cluster(&cluster)
            .and_then(|_| constraints::placement(network_spec, &cluster.subnets))
            .map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            cluster = %name,
            network = %cluster.network,
            instance_type = %cluster.instance_type,
            min = cluster.min_capacity,
            max = cluster.max_capacity,
            "Declared cluster"
        );
        Ok(ClusterRef(self.push(name, ResourceSpec::Cluster(cluster))))
    }

    pub fn create_load_balancer(
        &mut self,
        name: impl Into<String>,
        network: NetworkRef,
        spec: LoadBalancerSpec,
    ) -> Result<LoadBalancerRef, TopologyError> {
        let name = self.claim(name.into())?;
        let (network_name, network_spec) = self.network(network, &name)?;

        let lb = LoadBalancer {
            network: network_name.to_string(),
            internet_facing: spec.internet_facing,
            subnets: spec.subnets,
        };
        constraints::load_balancer(&lb)
            .and_then(|_| constraints::placement(network_spec, &lb.subnets))
            .map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            load_balancer = %name,
            network = %lb.network,
            internet_facing = lb.internet_facing,
            "Declared load balancer"
        );
        Ok(LoadBalancerRef(
            self.push(name, ResourceSpec::LoadBalancer(lb)),
        ))
    }

    pub fn create_service(
        &mut self,
        name: impl Into<String>,
        cluster: ClusterRef,
        spec: ServiceSpec,
    ) -> Result<ServiceRef, TopologyError> {
        let name = self.claim(name.into())?;
        let cluster_name = self.resolve(cluster, &name)?.name.clone();

        let service = Service {
            cluster: cluster_name,
            cpu: spec.cpu,
            desired_count: spec.desired_count,
            container: spec.container,
        };
        constraints::service(&service).map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            service = %name,
            cluster = %service.cluster,
            image = %service.container.image,
            "Declared service"
        );
        Ok(ServiceRef(self.push(name, ResourceSpec::Service(service))))
    }

    pub fn attach_service_to_target_group(
        &mut self,
        name: impl Into<String>,
        service: ServiceRef,
        network: NetworkRef,
        spec: TargetGroupSpec,
    ) -> Result<TargetGroupRef, TopologyError> {
        let name = self.claim(name.into())?;
        let service_name = self.resolve(service, &name)?.name.clone();
        let network_name = self.resolve(network, &name)?.name.clone();

        if let Some(existing) = self.target_group_of(&service_name) {
            return Err(TopologyError::configuration(
                &name,
                format!(
                    "service '{}' is already attached to target group '{}'",
                    service_name, existing
                ),
            ));
        }

        let tg = TargetGroup {
            network: network_name,
            service: service_name,
            port: spec.port,
            protocol: spec.protocol,
            target_type: spec.target_type,
        };
        constraints::target_group(&tg).map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            target_group = %name,
            service = %tg.service,
            port = tg.port,
            protocol = %tg.protocol,
            "Attached service to target group"
        );
        Ok(TargetGroupRef(
            self.push(name, ResourceSpec::TargetGroup(tg)),
        ))
    }

    pub fn add_listener(
        &mut self,
        name: impl Into<String>,
        load_balancer: LoadBalancerRef,
        spec: ListenerSpec,
    ) -> Result<ListenerRef, TopologyError> {
        let name = self.claim(name.into())?;
        let lb_name = self.resolve(load_balancer, &name)?.name.clone();
        let default_action = self.action(spec.default_action, &name)?;

        let bound = self.resources.iter().find(|r| {
            matches!(&r.spec, ResourceSpec::Listener(l)
                if l.load_balancer == lb_name && l.port == spec.port)
        });
        if let Some(existing) = bound {
            return Err(TopologyError::configuration(
                &name,
                format!(
                    "port {} on load balancer '{}' is already bound by listener '{}'",
                    spec.port, lb_name, existing.name
                ),
            ));
        }

        let listener = Listener {
            load_balancer: lb_name,
            port: spec.port,
            protocol: spec.protocol,
            default_action,
        };
        constraints::listener(&listener).map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            listener = %name,
            load_balancer = %listener.load_balancer,
            port = listener.port,
            "Declared listener"
        );
        Ok(ListenerRef(self.push(name, ResourceSpec::Listener(listener))))
    }

    pub fn add_routing_rule(
        &mut self,
        name: impl Into<String>,
        listener: ListenerRef,
        spec: RuleSpec,
    ) -> Result<RuleRef, TopologyError> {
        let name = self.claim(name.into())?;
        let listener_name = self.resolve(listener, &name)?.name.clone();
        let action = self.action(spec.action, &name)?;

        let collision = self.resources.iter().find(|r| {
            matches!(&r.spec, ResourceSpec::Rule(rule)
                if rule.listener == listener_name && rule.priority == spec.priority)
        });
        if let Some(existing) = collision {
            return Err(TopologyError::configuration(
                &name,
                format!(
                    "priority {} on listener '{}' is already used by rule '{}'",
                    spec.priority, listener_name, existing.name
                ),
            ));
        }

        let rule = Rule {
            listener: listener_name,
            priority: spec.priority,
            path_patterns: spec.path_patterns,
            http_methods: spec.http_methods,
            action,
        };
        constraints::rule(&rule).map_err(|c| TopologyError::configuration(&name, c))?;

        debug!(
            rule = %name,
            listener = %rule.listener,
            priority = rule.priority,
            "Declared routing rule"
        );
        Ok(RuleRef(self.push(name, ResourceSpec::Rule(rule))))
    }

    /// Export a resource attribute as a stack output
    pub fn add_output(
        &mut self,
        name: impl Into<String>,
        source: OutputSource,
        description: Option<&str>,
    ) -> Result<(), TopologyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TopologyError::configuration("output", "output names cannot be empty"));
        }
        if self.outputs.iter().any(|o| o.name == name) {
            return Err(TopologyError::configuration(
                &name,
                "output name is already declared",
            ));
        }

        let value = match source {
            OutputSource::LoadBalancerDns(lb) => OutputValue::LoadBalancerDns {
                load_balancer: self.resolve(lb, &name)?.name.clone(),
            },
        };
        self.outputs.push(Output {
            name,
            description: description.map(String::from),
            value,
        });
        Ok(())
    }

    /// Validate the whole graph and freeze it into a manifest
    pub fn build(&self) -> Result<Manifest, TopologyError> {
        let manifest = Manifest::new(
            ManifestMetadata {
                name: self.name.clone(),
                region: self.region.clone(),
            },
            self.resources.clone(),
            self.outputs.clone(),
        );
        let report = manifest.validate()?;

        info!(
            deployment = %self.name,
            region = %self.region,
            entities = manifest.entity_count(),
            outputs = manifest.outputs.len(),
            warnings = report.warnings().count(),
            "Built topology manifest"
        );
        Ok(manifest)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn claim(&self, name: String) -> Result<String, TopologyError> {
        if name.trim().is_empty() {
            return Err(TopologyError::configuration(
                "<unnamed>",
                "resource names cannot be empty",
            ));
        }
        if let Some(&index) = self.names.get(&name) {
            return Err(TopologyError::configuration(
                &name,
                format!(
                    "name is already used by a {}",
                    self.resources[index].kind()
                ),
            ));
        }
        Ok(name)
    }

    fn push(&mut self, name: String, spec: ResourceSpec) -> Handle {
        let index = self.resources.len();
        self.names.insert(name.clone(), index);
        self.resources.push(Resource::new(name, spec));
        Handle {
            builder: self.id,
            index,
        }
    }

    fn lookup<H: TypedHandle>(&self, handle: H) -> Option<&Resource> {
        let Handle { builder, index } = handle.handle();
        if builder != self.id {
            return None;
        }
        self.resources
            .get(index)
            .filter(|r| r.kind() == H::KIND)
    }

    fn resolve<H: TypedHandle>(&self, handle: H, entity: &str) -> Result<&Resource, TopologyError> {
        self.lookup(handle).ok_or_else(|| {
            TopologyError::configuration(
                entity,
                format!("references a {} that was not declared by this builder", H::KIND),
            )
        })
    }

    fn network(&self, handle: NetworkRef, entity: &str) -> Result<(&str, &NetworkSpec), TopologyError> {
        let resource = self.resolve(handle, entity)?;
        match &resource.spec {
            ResourceSpec::Network(spec) => Ok((resource.name.as_str(), spec)),
            _ => Err(TopologyError::configuration(
                entity,
                format!("'{}' is not a network", resource.name),
            )),
        }
    }

    fn action(&self, action: Action, entity: &str) -> Result<ListenerAction, TopologyError> {
        match action {
            Action::Forward(target_groups) => {
                let target_groups = target_groups
                    .into_iter()
                    .map(|tg| self.resolve(tg, entity).map(|r| r.name.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ListenerAction::Forward { target_groups })
            }
            Action::FixedResponse(response) => Ok(ListenerAction::FixedResponse(response)),
        }
    }

    fn target_group_of(&self, service: &str) -> Option<&str> {
        self.resources.iter().find_map(|r| match &r.spec {
            ResourceSpec::TargetGroup(tg) if tg.service == service => Some(r.name.as_str()),
            _ => None,
        })
    }
}
