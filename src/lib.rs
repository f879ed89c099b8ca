//! topograph: declare a cloud deployment topology (network, cluster, load
//! balancer, service, routing) through an explicit builder, validate it as a
//! dependency graph and synthesize it into a provisioning manifest.

pub mod cli;
pub mod config;
pub mod synth;
pub mod topology;

pub use topology::{Manifest, TopologyBuilder, TopologyError};
