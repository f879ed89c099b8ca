//! Local constraints on a single resource.
//!
//! Each check returns the first violated constraint as a message. The builder
//! turns that into a configuration error at declaration time; the validator
//! re-runs the same checks over parsed manifests.

use std::collections::HashSet;

use super::resources::{
    Cluster, ContainerSpec, FixedResponse, Listener, ListenerAction, LoadBalancer, NetworkSpec,
    Rule, Service, SubnetSelection, SubnetVisibility, TargetGroup,
};

pub type Check = Result<(), String>;

/// Highest priority a listener rule may carry
pub const MAX_RULE_PRIORITY: u32 = 50_000;

/// /24 subnets that fit in a network's /16 address space
pub const MAX_SUBNETS_PER_NETWORK: u64 = 256;

pub fn network(spec: &NetworkSpec) -> Check {
    if spec.az_count < 1 {
        return Err(format!("az-count must be at least 1 (got {})", spec.az_count));
    }
    if spec.subnets.is_empty() {
        return Err("at least one subnet group is required".to_string());
    }

    let mut seen = HashSet::new();
    for group in &spec.subnets {
        if group.name.trim().is_empty() {
            return Err("subnet group names cannot be empty".to_string());
        }
        if !seen.insert(group.name.as_str()) {
            return Err(format!("duplicate subnet group name '{}'", group.name));
        }
    }

    let subnet_count = spec.subnets.len() as u64 * u64::from(spec.az_count);
    if subnet_count > MAX_SUBNETS_PER_NETWORK {
        return Err(format!(
            "{} subnet groups across {} availability zones need {} subnets, \
             but the network address space holds at most {}",
            spec.subnets.len(),
            spec.az_count,
            subnet_count,
            MAX_SUBNETS_PER_NETWORK
        ));
    }

    if spec.nat_gateways > spec.az_count {
        return Err(format!(
            "nat-gateways ({}) cannot exceed az-count ({})",
            spec.nat_gateways, spec.az_count
        ));
    }
    if spec.nat_gateways > 0 && !spec.has_visibility(SubnetVisibility::Public) {
        return Err("NAT gateways require a public subnet group to live in".to_string());
    }
    if spec.nat_gateways == 0 {
        if let Some(group) = spec.groups_with(SubnetVisibility::Private).next() {
            return Err(format!(
                "private subnet group '{}' needs at least one NAT gateway for egress; \
                 declare it isolated instead",
                group.name
            ));
        }
    }

    Ok(())
}

/// The network must offer the subnets a resource asks to be placed on
pub fn placement(network: &NetworkSpec, selection: &SubnetSelection) -> Check {
    if network.has_visibility(selection.visibility) {
        Ok(())
    } else {
        Err(format!(
            "network has no {} subnet group to place this resource on",
            selection.visibility
        ))
    }
}

pub fn capacity(min_capacity: u32, max_capacity: u32) -> Check {
    if min_capacity > max_capacity {
        return Err(format!(
            "min-capacity ({}) cannot exceed max-capacity ({})",
            min_capacity, max_capacity
        ));
    }
    Ok(())
}

pub fn cluster(cluster: &Cluster) -> Check {
    capacity(cluster.min_capacity, cluster.max_capacity)
}

pub fn load_balancer(lb: &LoadBalancer) -> Check {
    if lb.internet_facing && lb.subnets.visibility != SubnetVisibility::Public {
        return Err(format!(
            "an internet-facing load balancer must be placed on public subnets, not {}",
            lb.subnets.visibility
        ));
    }
    Ok(())
}

pub fn port(field: &str, value: u32) -> Check {
    if (1..=u32::from(u16::MAX)).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be between 1 and 65535 (got {})", field, value))
    }
}

pub fn container(container: &ContainerSpec) -> Check {
    if container.name.trim().is_empty() {
        return Err("container name cannot be empty".to_string());
    }
    if container.image.trim().is_empty() {
        return Err(format!("container '{}' has an empty image reference", container.name));
    }
    if container.memory_limit_mib == 0 {
        return Err(format!(
            "memory-limit-mib of container '{}' must be greater than 0",
            container.name
        ));
    }
    if container.environment.keys().any(|k| k.trim().is_empty()) {
        return Err(format!(
            "container '{}' declares an environment variable with an empty name",
            container.name
        ));
    }

    let mut host_ports = HashSet::new();
    for mapping in &container.port_mappings {
        port("container-port", mapping.container_port)?;
        port("host-port", mapping.host_port)?;
        if !host_ports.insert((mapping.host_port, mapping.protocol)) {
            return Err(format!(
                "host-port {}/{} is mapped more than once",
                mapping.host_port, mapping.protocol
            ));
        }
    }

    Ok(())
}

pub fn service(service: &Service) -> Check {
    container(&service.container)
}

pub fn target_group(tg: &TargetGroup) -> Check {
    port("port", tg.port)
}

pub fn fixed_response(response: &FixedResponse) -> Check {
    if !(200..=599).contains(&response.status_code) {
        return Err(format!(
            "fixed-response status-code must be between 200 and 599 (got {})",
            response.status_code
        ));
    }
    Ok(())
}

pub fn action(action: &ListenerAction) -> Check {
    match action {
        ListenerAction::Forward { target_groups } if target_groups.is_empty() => {
            Err("forward action needs at least one target group".to_string())
        }
        ListenerAction::Forward { .. } => Ok(()),
        ListenerAction::FixedResponse(response) => fixed_response(response),
    }
}

pub fn listener(listener: &Listener) -> Check {
    port("port", listener.port)?;
    action(&listener.default_action)
}

pub fn rule(rule: &Rule) -> Check {
    if !(1..=MAX_RULE_PRIORITY).contains(&rule.priority) {
        return Err(format!(
            "priority must be between 1 and {} (got {})",
            MAX_RULE_PRIORITY, rule.priority
        ));
    }
    if !rule.has_conditions() {
        return Err("a rule needs at least one path pattern or HTTP method condition".to_string());
    }
    if rule.path_patterns.iter().any(|p| p.trim().is_empty()) {
        return Err("path patterns cannot be empty".to_string());
    }
    action(&rule.action)
}
