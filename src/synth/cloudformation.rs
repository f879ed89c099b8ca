//! CloudFormation rendering of a manifest
//!
//! Every manifest resource expands into the handful of AWS resources that
//! implement it on EC2-backed ECS. Logical IDs are the PascalCase form of the
//! resource name, with suffixes for the supporting resources.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Map, Value};
use tracing::debug;

use super::SynthError;
use crate::topology::manifest::{Manifest, OutputValue};
use crate::topology::resources::{
    Cluster, FixedResponse, Listener, ListenerAction, LoadBalancer, NetworkSpec, Resource,
    ResourceSpec, Rule, Service, SubnetSelection, SubnetVisibility, TargetGroup,
};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Address space of every rendered VPC
const VPC_CIDR: &str = "10.0.0.0/16";

/// Host bits per subnet, i.e. /24 subnets out of the /16
const SUBNET_CIDR_BITS: &str = "8";

const ECS_AMI_PARAMETER: &str =
    "{{resolve:ssm:/aws/service/ecs/optimized-ami/amazon-linux-2/recommended/image_id}}";

const ECS_INSTANCE_POLICY: &str =
    "arn:${AWS::Partition}:iam::aws:policy/service-role/AmazonEC2ContainerServiceforEC2Role";

/// PascalCase logical ID for a resource name: `app-target-group` becomes
/// `AppTargetGroup`
pub fn logical_id(name: &str) -> Result<String, SynthError> {
    let mut id = String::with_capacity(name.len());
    for segment in name.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            id.push(first.to_ascii_uppercase());
            id.extend(chars);
        }
    }

    if id.is_empty() {
        return Err(SynthError::InvalidLogicalId(name.to_string()));
    }
    if id.starts_with(|c: char| c.is_ascii_digit()) {
        id.insert(0, 'R');
    }
    Ok(id)
}

/// Render a manifest into a CloudFormation template
pub fn render(manifest: &Manifest) -> Result<Value, SynthError> {
    manifest.validate()?;

    let mut renderer = Renderer::new(manifest)?;
    for resource in dependency_order(&manifest.resources) {
        renderer.render_resource(resource)?;
    }
    renderer.render_outputs()?;

    debug!(
        deployment = %manifest.metadata.name,
        resources = renderer.resources.len(),
        outputs = renderer.outputs.len(),
        "Rendered CloudFormation template"
    );

    let mut template = Map::new();
    template.insert(
        "AWSTemplateFormatVersion".to_string(),
        json!(TEMPLATE_FORMAT_VERSION),
    );
    template.insert(
        "Description".to_string(),
        json!(format!(
            "{} ({})",
            manifest.metadata.name, manifest.metadata.region
        )),
    );
    template.insert("Resources".to_string(), Value::Object(renderer.resources));
    if !renderer.outputs.is_empty() {
        template.insert("Outputs".to_string(), Value::Object(renderer.outputs));
    }
    Ok(Value::Object(template))
}

/// Resources ordered so that each one follows everything it depends on.
/// Declaration order is kept wherever the graph allows it. The manifest has
/// been validated, so the graph is acyclic and every edge resolves.
fn dependency_order(resources: &[Resource]) -> Vec<&Resource> {
    let position: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();

    let mut pending = vec![0usize; resources.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    for (i, resource) in resources.iter().enumerate() {
        for dependency in &resource.depends_on {
            if let Some(&j) = position.get(dependency.as_str()) {
                pending[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..resources.len()).filter(|&i| pending[i] == 0).collect();
    let mut ordered = Vec::with_capacity(resources.len());
    while let Some(i) = ready.pop_first() {
        ordered.push(&resources[i]);
        for &j in &dependents[i] {
            pending[j] -= 1;
            if pending[j] == 0 {
                ready.insert(j);
            }
        }
    }
    ordered
}

// ============================================================================
// Renderer state
// ============================================================================

/// Subnet logical IDs of one subnet group, one per availability zone
struct SubnetGroupLayout {
    visibility: SubnetVisibility,
    subnets: Vec<String>,
}

/// What later resources need to know about a rendered network
struct NetworkLayout {
    vpc: String,
    groups: Vec<SubnetGroupLayout>,
    public_routes: Vec<String>,
}

impl NetworkLayout {
    fn subnets(&self, selection: &SubnetSelection) -> Vec<Value> {
        let mut groups = self
            .groups
            .iter()
            .filter(|g| g.visibility == selection.visibility);
        let selected: Vec<&SubnetGroupLayout> = if selection.one_per_az {
            groups.next().into_iter().collect()
        } else {
            groups.collect()
        };
        selected
            .iter()
            .flat_map(|g| g.subnets.iter())
            .map(|id| reference(id))
            .collect()
    }
}

struct Renderer<'a> {
    manifest: &'a Manifest,
    ids: HashMap<&'a str, String>,
    networks: HashMap<&'a str, NetworkLayout>,
    owners: HashMap<String, String>,
    resources: Map<String, Value>,
    outputs: Map<String, Value>,
}

fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

fn name_tag(deployment: &str, name: &str) -> Value {
    json!([{ "Key": "Name", "Value": format!("{}/{}", deployment, name) }])
}

impl<'a> Renderer<'a> {
    fn new(manifest: &'a Manifest) -> Result<Self, SynthError> {
        let mut ids = HashMap::new();
        let mut taken: HashMap<String, &str> = HashMap::new();
        for resource in &manifest.resources {
            let id = logical_id(&resource.name)?;
            if let Some(first) = taken.insert(id.clone(), resource.name.as_str()) {
                return Err(SynthError::LogicalIdCollision {
                    logical_id: id,
                    first: first.to_string(),
                    second: resource.name.clone(),
                });
            }
            ids.insert(resource.name.as_str(), id);
        }

        Ok(Self {
            manifest,
            ids,
            networks: HashMap::new(),
            owners: HashMap::new(),
            resources: Map::new(),
            outputs: Map::new(),
        })
    }

    fn id(&self, name: &str) -> Result<&str, SynthError> {
        self.ids
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| SynthError::MissingResource(name.to_string()))
    }

    fn network(&self, name: &str) -> Result<&NetworkLayout, SynthError> {
        self.networks
            .get(name)
            .ok_or_else(|| SynthError::MissingResource(name.to_string()))
    }

    /// Insert one template resource; logical IDs must be unique across the
    /// whole template, including derived ones
    fn add(&mut self, logical_id: String, owner: &str, resource: Value) -> Result<(), SynthError> {
        if let Some(first) = self.owners.get(&logical_id) {
            return Err(SynthError::LogicalIdCollision {
                logical_id,
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        self.owners.insert(logical_id.clone(), owner.to_string());
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    fn render_resource(&mut self, resource: &'a Resource) -> Result<(), SynthError> {
        let name = resource.name.as_str();
        match &resource.spec {
            ResourceSpec::Network(spec) => self.render_network(name, spec),
            ResourceSpec::Cluster(cluster) => self.render_cluster(name, cluster),
            ResourceSpec::LoadBalancer(lb) => self.render_load_balancer(name, lb),
            ResourceSpec::Service(service) => self.render_service(name, service),
            ResourceSpec::TargetGroup(tg) => self.render_target_group(name, tg),
            ResourceSpec::Listener(listener) => self.render_listener(name, listener),
            ResourceSpec::Rule(rule) => self.render_rule(name, rule),
        }
    }

    // ------------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------------

    fn render_network(&mut self, name: &'a str, spec: &NetworkSpec) -> Result<(), SynthError> {
        let manifest = self.manifest;
        let deployment = manifest.metadata.name.as_str();
        let vpc = self.id(name)?.to_string();

        self.add(
            vpc.clone(),
            name,
            json!({
                "Type": "AWS::EC2::VPC",
                "Properties": {
                    "CidrBlock": VPC_CIDR,
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "Tags": name_tag(deployment, name),
                }
            }),
        )?;

        let has_public = spec.has_visibility(SubnetVisibility::Public);
        let gateway_attachment = format!("{}GatewayAttachment", vpc);
        if has_public {
            let gateway = format!("{}InternetGateway", vpc);
            self.add(
                gateway.clone(),
                name,
                json!({
                    "Type": "AWS::EC2::InternetGateway",
                    "Properties": { "Tags": name_tag(deployment, name) }
                }),
            )?;
            self.add(
                gateway_attachment.clone(),
                name,
                json!({
                    "Type": "AWS::EC2::VPCGatewayAttachment",
                    "Properties": {
                        "VpcId": reference(&vpc),
                        "InternetGatewayId": reference(&gateway),
                    }
                }),
            )?;
        }

        let az_count = spec.az_count as usize;
        let subnet_count = spec.subnets.len() * az_count;
        let mut layout = NetworkLayout {
            vpc: vpc.clone(),
            groups: Vec::new(),
            public_routes: Vec::new(),
        };

        // NAT gateways live in the first public group, one per AZ up to the
        // requested count
        let nat_group = spec
            .subnets
            .iter()
            .position(|g| g.visibility == SubnetVisibility::Public);
        let mut nat_gateways = Vec::new();

        for (group_index, group) in spec.subnets.iter().enumerate() {
            let group_id = logical_id(&group.name)?;
            let mut subnets = Vec::with_capacity(az_count);

            for az in 0..az_count {
                let subnet = format!("{}{}Subnet{}", vpc, group_id, az + 1);
                let cidr_index = group_index * az_count + az;
                self.add(
                    subnet.clone(),
                    name,
                    json!({
                        "Type": "AWS::EC2::Subnet",
                        "Properties": {
                            "VpcId": reference(&vpc),
                            "AvailabilityZone": { "Fn::Select": [az, { "Fn::GetAZs": "" }] },
                            "CidrBlock": {
                                "Fn::Select": [
                                    cidr_index,
                                    { "Fn::Cidr": [get_att(&vpc, "CidrBlock"), subnet_count, SUBNET_CIDR_BITS] }
                                ]
                            },
                            "MapPublicIpOnLaunch": group.visibility == SubnetVisibility::Public,
                            "Tags": name_tag(deployment, &format!("{}/{}{}", name, group.name, az + 1)),
                        }
                    }),
                )?;

                let route_table = format!("{}RouteTable", subnet);
                self.add(
                    route_table.clone(),
                    name,
                    json!({
                        "Type": "AWS::EC2::RouteTable",
                        "Properties": { "VpcId": reference(&vpc) }
                    }),
                )?;
                self.add(
                    format!("{}RouteTableAssociation", subnet),
                    name,
                    json!({
                        "Type": "AWS::EC2::SubnetRouteTableAssociation",
                        "Properties": {
                            "RouteTableId": reference(&route_table),
                            "SubnetId": reference(&subnet),
                        }
                    }),
                )?;

                if group.visibility == SubnetVisibility::Public {
                    let route = format!("{}DefaultRoute", subnet);
                    self.add(
                        route.clone(),
                        name,
                        json!({
                            "Type": "AWS::EC2::Route",
                            "DependsOn": [gateway_attachment.as_str()],
                            "Properties": {
                                "RouteTableId": reference(&route_table),
                                "DestinationCidrBlock": "0.0.0.0/0",
                                "GatewayId": reference(&format!("{}InternetGateway", vpc)),
                            }
                        }),
                    )?;

                    if Some(group_index) == nat_group && az < spec.nat_gateways as usize {
                        let eip = format!("{}NatEip{}", vpc, az + 1);
                        let nat = format!("{}NatGateway{}", vpc, az + 1);
                        self.add(
                            eip.clone(),
                            name,
                            json!({
                                "Type": "AWS::EC2::EIP",
                                "Properties": { "Domain": "vpc" }
                            }),
                        )?;
                        self.add(
                            nat.clone(),
                            name,
                            json!({
                                "Type": "AWS::EC2::NatGateway",
                                "DependsOn": [route.as_str()],
                                "Properties": {
                                    "AllocationId": get_att(&eip, "AllocationId"),
                                    "SubnetId": reference(&subnet),
                                    "Tags": name_tag(deployment, name),
                                }
                            }),
                        )?;
                        nat_gateways.push(nat);
                    }
                    layout.public_routes.push(route);
                }

                subnets.push(subnet);
            }

            layout.groups.push(SubnetGroupLayout {
                visibility: group.visibility,
                subnets,
            });
        }

        // Private subnets spread their egress over the NAT gateways
        let private_subnets: Vec<String> = layout
            .groups
            .iter()
            .filter(|g| g.visibility == SubnetVisibility::Private)
            .flat_map(|g| g.subnets.iter().cloned())
            .collect();
        if !nat_gateways.is_empty() {
            for (i, subnet) in private_subnets.iter().enumerate() {
                let nat = &nat_gateways[i % nat_gateways.len()];
                self.add(
                    format!("{}DefaultRoute", subnet),
                    name,
                    json!({
                        "Type": "AWS::EC2::Route",
                        "Properties": {
                            "RouteTableId": reference(&format!("{}RouteTable", subnet)),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "NatGatewayId": reference(nat),
                        }
                    }),
                )?;
            }
        }

        self.networks.insert(name, layout);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Compute
    // ------------------------------------------------------------------------

    fn render_cluster(&mut self, name: &'a str, cluster: &Cluster) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let network = self.network(&cluster.network)?;
        let vpc = network.vpc.clone();
        let subnets = network.subnets(&cluster.subnets);
        let public_routes = if cluster.subnets.visibility == SubnetVisibility::Public {
            network.public_routes.clone()
        } else {
            Vec::new()
        };

        let role = format!("{}InstanceRole", id);
        let profile = format!("{}InstanceProfile", id);
        let security_group = format!("{}SecurityGroup", id);
        let launch_template = format!("{}LaunchTemplate", id);

        self.add(
            id.clone(),
            name,
            json!({ "Type": "AWS::ECS::Cluster" }),
        )?;
        self.add(
            role.clone(),
            name,
            json!({
                "Type": "AWS::IAM::Role",
                "Properties": {
                    "AssumeRolePolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": "ec2.amazonaws.com" },
                            "Action": "sts:AssumeRole",
                        }]
                    },
                    "ManagedPolicyArns": [{ "Fn::Sub": ECS_INSTANCE_POLICY }],
                }
            }),
        )?;
        self.add(
            profile.clone(),
            name,
            json!({
                "Type": "AWS::IAM::InstanceProfile",
                "Properties": { "Roles": [reference(&role)] }
            }),
        )?;
        self.add(
            security_group.clone(),
            name,
            json!({
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": format!("{} cluster instances", name),
                    "VpcId": reference(&vpc),
                    "SecurityGroupEgress": [{ "IpProtocol": "-1", "CidrIp": "0.0.0.0/0" }],
                }
            }),
        )?;
        self.add(
            launch_template.clone(),
            name,
            json!({
                "Type": "AWS::EC2::LaunchTemplate",
                "Properties": {
                    "LaunchTemplateData": {
                        "ImageId": ECS_AMI_PARAMETER,
                        "InstanceType": cluster.instance_type.to_string(),
                        "IamInstanceProfile": { "Arn": get_att(&profile, "Arn") },
                        "SecurityGroupIds": [get_att(&security_group, "GroupId")],
                        "UserData": {
                            "Fn::Base64": {
                                "Fn::Sub": format!(
                                    "#!/bin/bash\necho ECS_CLUSTER=${{{}}} >> /etc/ecs/ecs.config",
                                    id
                                )
                            }
                        },
                    }
                }
            }),
        )?;

        let mut asg = json!({
            "Type": "AWS::AutoScaling::AutoScalingGroup",
            "Properties": {
                "MinSize": cluster.min_capacity.to_string(),
                "MaxSize": cluster.max_capacity.to_string(),
                "LaunchTemplate": {
                    "LaunchTemplateId": reference(&launch_template),
                    "Version": get_att(&launch_template, "LatestVersionNumber"),
                },
                "VPCZoneIdentifier": subnets,
            }
        });
        if !public_routes.is_empty() {
            asg["DependsOn"] = json!(public_routes);
        }
        self.add(format!("{}AutoScalingGroup", id), name, asg)
    }

    fn render_service(&mut self, name: &'a str, service: &Service) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let cluster = self.id(&service.cluster)?.to_string();
        let manifest = self.manifest;
        let deployment = manifest.metadata.name.as_str();
        let container = &service.container;

        let environment: Vec<Value> = container
            .environment
            .iter()
            .map(|(k, v)| json!({ "Name": k, "Value": v }))
            .collect();
        let port_mappings: Vec<Value> = container
            .port_mappings
            .iter()
            .map(|m| {
                json!({
                    "ContainerPort": m.container_port,
                    "HostPort": m.host_port,
                    "Protocol": m.protocol.to_string(),
                })
            })
            .collect();

        let mut definition = json!({
            "Name": container.name,
            "Image": container.image,
            "Essential": container.essential,
            "Memory": container.memory_limit_mib,
            "PortMappings": port_mappings,
        });
        if !environment.is_empty() {
            definition["Environment"] = json!(environment);
        }

        let task_definition = format!("{}TaskDefinition", id);
        let mut task_properties = json!({
            "Family": format!("{}-{}", deployment, name),
            "NetworkMode": "bridge",
            "RequiresCompatibilities": ["EC2"],
            "ContainerDefinitions": [definition],
        });
        if let Some(cpu) = service.cpu {
            task_properties["Cpu"] = json!(cpu.to_string());
        }
        self.add(
            task_definition.clone(),
            name,
            json!({ "Type": "AWS::ECS::TaskDefinition", "Properties": task_properties }),
        )?;

        // Load balancer wiring comes from the target group this service is
        // attached to; ECS refuses target groups that no listener uses yet
        let mut load_balancers = Vec::new();
        let mut depends_on = Vec::new();
        for resource in &manifest.resources {
            let ResourceSpec::TargetGroup(tg) = &resource.spec else {
                continue;
            };
            if tg.service != name {
                continue;
            }
            let container_port = container
                .mapping_for_host_port(tg.port)
                .map(|m| m.container_port)
                .unwrap_or(tg.port);
            load_balancers.push(json!({
                "ContainerName": container.name,
                "ContainerPort": container_port,
                "TargetGroupArn": reference(self.id(&resource.name)?),
            }));
            for user in self.forwarders_of(&resource.name) {
                depends_on.push(self.id(&user.name)?.to_string());
            }
        }

        let mut ecs_service = json!({
            "Type": "AWS::ECS::Service",
            "Properties": {
                "Cluster": reference(&cluster),
                "TaskDefinition": reference(&task_definition),
                "DesiredCount": service.desired_count,
                "LaunchType": "EC2",
                "LoadBalancers": load_balancers,
            }
        });
        if !depends_on.is_empty() {
            ecs_service["DependsOn"] = json!(depends_on);
        }
        self.add(id, name, ecs_service)
    }

    // ------------------------------------------------------------------------
    // Load balancing
    // ------------------------------------------------------------------------

    fn render_load_balancer(&mut self, name: &'a str, lb: &LoadBalancer) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let network = self.network(&lb.network)?;
        let vpc = network.vpc.clone();
        let subnets = network.subnets(&lb.subnets);
        let public_routes = if lb.internet_facing {
            network.public_routes.clone()
        } else {
            Vec::new()
        };

        let scheme = if lb.internet_facing {
            "internet-facing"
        } else {
            "internal"
        };
        let source = if lb.internet_facing {
            json!("0.0.0.0/0")
        } else {
            get_att(&vpc, "CidrBlock")
        };
        let ingress: Vec<Value> = self
            .manifest
            .resources
            .iter()
            .filter_map(|r| match &r.spec {
                ResourceSpec::Listener(l) if l.load_balancer == name => Some(l.port),
                _ => None,
            })
            .map(|port| {
                json!({
                    "IpProtocol": "tcp",
                    "CidrIp": source,
                    "FromPort": port,
                    "ToPort": port,
                    "Description": format!("listener port {}", port),
                })
            })
            .collect();

        let security_group = format!("{}SecurityGroup", id);
        self.add(
            security_group.clone(),
            name,
            json!({
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": format!("{} load balancer", name),
                    "VpcId": reference(&vpc),
                    "SecurityGroupIngress": ingress,
                }
            }),
        )?;

        let mut alb = json!({
            "Type": "AWS::ElasticLoadBalancingV2::LoadBalancer",
            "Properties": {
                "Type": "application",
                "Scheme": scheme,
                "Subnets": subnets,
                "SecurityGroups": [get_att(&security_group, "GroupId")],
            }
        });
        if !public_routes.is_empty() {
            alb["DependsOn"] = json!(public_routes);
        }
        self.add(id, name, alb)
    }

    fn render_target_group(&mut self, name: &'a str, tg: &TargetGroup) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let vpc = self.network(&tg.network)?.vpc.clone();

        self.add(
            id.clone(),
            name,
            json!({
                "Type": "AWS::ElasticLoadBalancingV2::TargetGroup",
                "Properties": {
                    "Port": tg.port,
                    "Protocol": tg.protocol.to_string(),
                    "TargetType": tg.target_type.to_string(),
                    "VpcId": reference(&vpc),
                }
            }),
        )?;

        // Open the target port on the cluster instances to every load
        // balancer that forwards here
        let Some(cluster) = self.cluster_of_service(&tg.service) else {
            return Ok(());
        };
        let cluster_id = self.id(cluster)?.to_string();
        let mut balancers: Vec<&str> = self
            .forwarders_of(name)
            .into_iter()
            .filter_map(|r| self.load_balancer_of(r))
            .collect();
        balancers.sort_unstable();
        balancers.dedup();

        for lb in balancers {
            let lb_id = self.id(lb)?.to_string();
            self.add(
                format!("{}From{}", id, lb_id),
                name,
                json!({
                    "Type": "AWS::EC2::SecurityGroupIngress",
                    "Properties": {
                        "GroupId": get_att(&format!("{}SecurityGroup", cluster_id), "GroupId"),
                        "SourceSecurityGroupId": get_att(&format!("{}SecurityGroup", lb_id), "GroupId"),
                        "IpProtocol": "tcp",
                        "FromPort": tg.port,
                        "ToPort": tg.port,
                        "Description": format!("{} to {}", lb, name),
                    }
                }),
            )?;
        }
        Ok(())
    }

    fn render_listener(&mut self, name: &'a str, listener: &Listener) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let lb = self.id(&listener.load_balancer)?.to_string();
        let action = self.action(&listener.default_action)?;

        self.add(
            id,
            name,
            json!({
                "Type": "AWS::ElasticLoadBalancingV2::Listener",
                "Properties": {
                    "LoadBalancerArn": reference(&lb),
                    "Port": listener.port,
                    "Protocol": listener.protocol.to_string(),
                    "DefaultActions": [action],
                }
            }),
        )
    }

    fn render_rule(&mut self, name: &'a str, rule: &Rule) -> Result<(), SynthError> {
        let id = self.id(name)?.to_string();
        let listener = self.id(&rule.listener)?.to_string();
        let action = self.action(&rule.action)?;

        let mut conditions = Vec::new();
        if !rule.path_patterns.is_empty() {
            conditions.push(json!({
                "Field": "path-pattern",
                "PathPatternConfig": { "Values": rule.path_patterns },
            }));
        }
        if !rule.http_methods.is_empty() {
            let methods: Vec<String> = rule.http_methods.iter().map(|m| m.to_string()).collect();
            conditions.push(json!({
                "Field": "http-request-method",
                "HttpRequestMethodConfig": { "Values": methods },
            }));
        }

        self.add(
            id,
            name,
            json!({
                "Type": "AWS::ElasticLoadBalancingV2::ListenerRule",
                "Properties": {
                    "ListenerArn": reference(&listener),
                    "Priority": rule.priority,
                    "Conditions": conditions,
                    "Actions": [action],
                }
            }),
        )
    }

    fn action(&self, action: &ListenerAction) -> Result<Value, SynthError> {
        match action {
            ListenerAction::Forward { target_groups } => match target_groups.as_slice() {
                [single] => Ok(json!({
                    "Type": "forward",
                    "TargetGroupArn": reference(self.id(single)?),
                })),
                many => {
                    let groups = many
                        .iter()
                        .map(|tg| -> Result<Value, SynthError> {
                            Ok(json!({ "TargetGroupArn": reference(self.id(tg)?), "Weight": 1 }))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(json!({
                        "Type": "forward",
                        "ForwardConfig": { "TargetGroups": groups },
                    }))
                }
            },
            ListenerAction::FixedResponse(response) => Ok(fixed_response(response)),
        }
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    fn render_outputs(&mut self) -> Result<(), SynthError> {
        let manifest = self.manifest;
        let mut taken: HashMap<String, &str> = HashMap::new();
        for output in &manifest.outputs {
            let output_id = logical_id(&output.name)?;
            let value = match &output.value {
                OutputValue::LoadBalancerDns { load_balancer } => {
                    get_att(self.id(load_balancer)?, "DNSName")
                }
            };

            let mut rendered = json!({ "Value": value });
            if let Some(description) = &output.description {
                rendered["Description"] = json!(description);
            }
            if let Some(first) = taken.insert(output_id.clone(), output.name.as_str()) {
                return Err(SynthError::LogicalIdCollision {
                    logical_id: output_id,
                    first: first.to_string(),
                    second: output.name.clone(),
                });
            }
            self.outputs.insert(output_id, rendered);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Graph lookups
    // ------------------------------------------------------------------------

    /// Listeners and rules whose action forwards to the target group
    fn forwarders_of(&self, target_group: &str) -> Vec<&'a Resource> {
        self.manifest
            .resources
            .iter()
            .filter(|r| {
                let action = match &r.spec {
                    ResourceSpec::Listener(l) => &l.default_action,
                    ResourceSpec::Rule(rule) => &rule.action,
                    _ => return false,
                };
                action.target_groups().iter().any(|tg| tg == target_group)
            })
            .collect()
    }

    fn load_balancer_of(&self, resource: &'a Resource) -> Option<&'a str> {
        match &resource.spec {
            ResourceSpec::Listener(l) => Some(l.load_balancer.as_str()),
            ResourceSpec::Rule(rule) => self
                .manifest
                .resource(&rule.listener)
                .and_then(|listener| self.load_balancer_of(listener)),
            _ => None,
        }
    }

    fn cluster_of_service(&self, service: &str) -> Option<&'a str> {
        match self.manifest.resource(service).map(|r| &r.spec) {
            Some(ResourceSpec::Service(s)) => Some(s.cluster.as_str()),
            _ => None,
        }
    }
}

fn fixed_response(response: &FixedResponse) -> Value {
    let mut config = json!({ "StatusCode": response.status_code.to_string() });
    if let Some(content_type) = &response.content_type {
        config["ContentType"] = json!(content_type);
    }
    if let Some(body) = &response.message_body {
        config["MessageBody"] = json!(body);
    }
    json!({ "Type": "fixed-response", "FixedResponseConfig": config })
}
