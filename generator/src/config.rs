//! YAML configuration of a generation run.
//!
//! ```yaml
//! network:
//!   num_eps: 64
//!   ep_capacity: 1250
//!   load: 0.5
//! flow_size_dist:
//!   kind: named
//!   family: { name: lognormal, mu: 7.4, sigma: 2.1 }
//!   round_to_nearest: 1
//! interarrival_time_dist:
//!   kind: named
//!   family: { name: weibull, alpha: 0.9, lambda: 6000 }
//! node_dist:
//!   kind: multimodal
//!   num_skewed_nodes: 4
//!   skewed_node_probs: [0.1, 0.1, 0.1, 0.1]
//! generator:
//!   min_num_demands: auto
//!   jensen_shannon_distance_threshold: 0.1
//! experiment:
//!   seed: 0
//! ```

use crate::{
    capacity::CapacityConfig,
    distribution::{DistributionSpec, Sampler},
    endpoints::EndpointSet,
    node_dist::NodeDistSpec,
    packer::{generate, ConvergenceState, DistributionSpecs, StoppingCriteria},
    topology::Topology,
    trace::{PairWeighting, Trace},
    Error,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, path::Path, str::FromStr, time::Duration};

/// Flows required per ordered endpoint pair when the minimum is derived automatically.
const AUTO_DEMANDS_PER_PAIR: usize = 5;

/// Endpoints and capacities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Number of endpoints, named `"0".."n-1"`.
    #[serde(default)]
    pub num_eps: Option<usize>,
    /// Explicit endpoint names (instead of `num_eps`).
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
    pub ep_capacity: f64,
    #[serde(default)]
    pub ep_capacity_overrides: BTreeMap<String, f64>,
    /// Target load fraction.
    pub load: f64,
}

/// Minimum number of flows in a trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinNumDemands {
    /// Five flows per ordered endpoint pair.
    #[default]
    Auto,
    #[serde(untagged)]
    Count(usize),
}

impl MinNumDemands {
    pub fn resolve(self, num_eps: usize) -> usize {
        match self {
            Self::Auto => num_eps * num_eps * AUTO_DEMANDS_PER_PAIR,
            Self::Count(count) => count,
        }
    }
}

/// Stopping conditions and packing knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub min_num_demands: MinNumDemands,
    pub min_last_demand_arrival_time: f64,
    pub jensen_shannon_distance_threshold: f64,
    pub max_iterations: usize,
    pub max_seconds: Option<f64>,
    pub auto_node_dist_correction: bool,
    pub batch_size: Option<usize>,
    pub max_batch_size: usize,
    pub max_rejection_rate: f64,
    pub node_dist_weighting: PairWeighting,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let criteria = StoppingCriteria::default();
        Self {
            min_num_demands: MinNumDemands::Auto,
            min_last_demand_arrival_time: criteria.min_last_arrival,
            jensen_shannon_distance_threshold: criteria.jsd_threshold,
            max_iterations: criteria.max_iterations,
            max_seconds: None,
            auto_node_dist_correction: criteria.auto_node_dist_correction,
            batch_size: criteria.batch_size,
            max_batch_size: criteria.max_batch_size,
            max_rejection_rate: criteria.max_rejection_rate,
            node_dist_weighting: criteria.weighting,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub seed: u64,
}

fn uniform() -> NodeDistSpec {
    NodeDistSpec::Uniform
}

/// A complete run description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub flow_size_dist: DistributionSpec,
    pub interarrival_time_dist: DistributionSpec,
    #[serde(default = "uniform")]
    pub node_dist: NodeDistSpec,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub experiment: ExperimentConfig,
}

/// Validated inputs of [generate].
#[derive(Clone, Debug)]
pub struct Experiment {
    pub endpoints: EndpointSet,
    pub capacity: CapacityConfig,
    pub specs: DistributionSpecs,
    pub criteria: StoppingCriteria,
    pub seed: u64,
}

impl Experiment {
    pub fn run(self) -> Result<(Trace, ConvergenceState), Error> {
        generate(
            self.endpoints,
            &self.capacity,
            &self.specs,
            &self.criteria,
            self.seed,
        )
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(yaml: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config: Self = {
            let file = File::open(path)?;
            serde_yaml::from_reader(file)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the network described by `network`.
    pub fn topology(&self) -> Result<Topology, Error> {
        let network = &self.network;
        let mut topology = match (&network.endpoints, network.num_eps) {
            (Some(names), None) => Topology::new(names.iter().cloned(), network.ep_capacity)?,
            (None, Some(num_eps)) => Topology::arbitrary(num_eps, network.ep_capacity)?,
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfig(
                    "network sets both num_eps and endpoints".into(),
                ))
            }
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "network requires num_eps or endpoints".into(),
                ))
            }
        };
        for (name, &capacity) in &network.ep_capacity_overrides {
            topology.set_capacity(name, capacity)?;
        }
        Ok(topology)
    }

    pub fn specs(&self) -> DistributionSpecs {
        DistributionSpecs {
            flow_size: self.flow_size_dist.clone(),
            interarrival_time: self.interarrival_time_dist.clone(),
            node_dist: self.node_dist.clone(),
        }
    }

    /// Stopping criteria for a network of `num_eps` endpoints.
    pub fn criteria(&self, num_eps: usize) -> Result<StoppingCriteria, Error> {
        let generator = &self.generator;
        let max_duration = generator
            .max_seconds
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds).map_err(|err| {
                    Error::InvalidConfig(format!("invalid max_seconds {seconds}: {err}"))
                })
            })
            .transpose()?;
        let criteria = StoppingCriteria {
            min_num_flows: generator.min_num_demands.resolve(num_eps),
            min_last_arrival: generator.min_last_demand_arrival_time,
            jsd_threshold: generator.jensen_shannon_distance_threshold,
            max_iterations: generator.max_iterations,
            max_duration,
            auto_node_dist_correction: generator.auto_node_dist_correction,
            batch_size: generator.batch_size,
            max_batch_size: generator.max_batch_size,
            max_rejection_rate: generator.max_rejection_rate,
            weighting: generator.node_dist_weighting,
        };
        criteria.validate()?;
        Ok(criteria)
    }

    /// Check every section without sampling any flow.
    pub fn validate(&self) -> Result<(), Error> {
        let topology = self.topology()?;
        topology.capacity_config(self.network.load)?;
        Sampler::new(&self.flow_size_dist)?;
        Sampler::new(&self.interarrival_time_dist)?;
        let mut rng = StdRng::seed_from_u64(self.experiment.seed);
        self.node_dist.build(topology.endpoints(), &mut rng)?;
        self.criteria(topology.endpoints().len())?;
        Ok(())
    }

    /// Resolve the configuration into run inputs.
    pub fn experiment(&self) -> Result<Experiment, Error> {
        let topology = self.topology()?;
        let capacity = topology.capacity_config(self.network.load)?;
        let criteria = self.criteria(topology.endpoints().len())?;
        Ok(Experiment {
            endpoints: topology.endpoints().clone(),
            capacity,
            specs: self.specs(),
            criteria,
            seed: self.experiment.seed,
        })
    }
}
