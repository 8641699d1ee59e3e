//! Synthesize flow-level traffic traces that match target distributions under capacity
//! constraints.
//!
//! A trace is a sequence of flows, each with a source and destination endpoint, a size, and an
//! arrival time. [generate] draws flow sizes and inter-arrival times from configured
//! distributions, assigns node pairs to match a target node distribution, and admits flows only
//! while every endpoint stays within its share of the configured capacity. It stops once the
//! trace holds enough flows, spans the required horizon, and realizes the target node
//! distribution within a Jensen-Shannon distance threshold.
//!
//! # Example
//!
//! ```
//! use flowpack_generator::{
//!     generate, CapacityConfig, DistributionSpec, DistributionSpecs, EndpointSet,
//!     NodeDistSpec, StoppingCriteria,
//! };
//!
//! let endpoints = EndpointSet::new(["a", "b", "c", "d"]).unwrap();
//! let capacity = CapacityConfig::uniform(4, 100_000.0, 0.9).unwrap();
//! let specs = DistributionSpecs {
//!     flow_size: DistributionSpec::constant(100.0),
//!     interarrival_time: DistributionSpec::constant(0.125),
//!     node_dist: NodeDistSpec::Uniform,
//! };
//! let criteria = StoppingCriteria {
//!     min_num_flows: 16,
//!     min_last_arrival: 2.0,
//!     ..Default::default()
//! };
//! let (trace, state) = generate(endpoints, &capacity, &specs, &criteria, 0).unwrap();
//! assert!(state.is_converged());
//! assert!(trace.len() >= 16);
//! ```

use thiserror::Error;

pub mod allocator;
pub mod capacity;
pub mod config;
pub mod distribution;
pub mod divergence;
pub mod endpoints;
pub mod node_dist;
pub mod packer;
pub mod topology;
pub mod trace;

pub use allocator::NodePairAllocator;
pub use capacity::{CapacityConfig, CapacityTracker};
pub use config::Config;
pub use distribution::{DistributionSpec, Family, Mass, Sampler};
pub use endpoints::{EndpointSet, Pair};
pub use node_dist::{NodeDist, NodeDistSpec};
pub use packer::{
    generate, ConvergenceState, ConvergenceTimeout, DistributionSpecs, PackingController,
    StoppingCriteria, Termination,
};
pub use topology::Topology;
pub use trace::{FlowRecord, PairWeighting, Trace};

/// Errors that prevent a run from starting.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),
    #[error("infeasible capacity: {0}")]
    InfeasibleCapacity(String),
    #[error("no node pair can carry the requested mass")]
    InfeasiblePair,
    #[error("invalid endpoints: {0}")]
    InvalidEndpoints(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
