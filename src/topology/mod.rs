//! Topology model: resources, the builder that declares them, and the
//! manifest they are frozen into

pub mod builder;
pub mod constraints;
pub mod error;
pub mod manifest;
pub mod resources;
pub mod validation;

pub use builder::{
    Action, ClusterRef, ListenerRef, ListenerSpec, LoadBalancerRef, NetworkRef, OutputSource,
    RuleRef, RuleSpec, ServiceRef, TargetGroupRef, TopologyBuilder,
};
pub use error::TopologyError;
pub use manifest::{Manifest, ManifestError, ManifestMetadata, Output, OutputValue};
pub use resources::{
    ClusterSpec, ContainerSpec, FixedResponse, HttpMethod, InstanceType, LoadBalancerSpec,
    NetworkSpec, Protocol, Resource, ResourceKind, ResourceSpec, ServiceSpec, SubnetGroup,
    SubnetSelection, SubnetVisibility, TargetGroupSpec, TargetType,
};
pub use validation::{Severity, ValidationReport, Violation};
