//! Generated traces and the statistics derived from them.

use crate::{
    capacity::CapacityConfig,
    endpoints::{EndpointSet, Pair},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One admitted flow.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowRecord {
    /// Unique, assigned in admission order starting at 0.
    pub flow_id: u64,
    pub src: usize,
    pub dst: usize,
    pub size: f64,
    pub arrival_time: f64,
    /// Time to transfer `size` at the slower of the two endpoint capacities.
    pub duration: f64,
    pub completion_time: f64,
}

impl FlowRecord {
    pub fn pair(&self) -> Pair {
        Pair::new(self.src, self.dst)
    }
}

/// What a flow contributes to the empirical node distribution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairWeighting {
    /// Each flow counts once.
    #[default]
    Count,
    /// Each flow counts with its size.
    Volume,
}

impl PairWeighting {
    fn weight(self, size: f64) -> f64 {
        match self {
            Self::Count => 1.0,
            Self::Volume => size,
        }
    }
}

/// Flows admitted over one run, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    endpoints: EndpointSet,
    flows: Vec<FlowRecord>,
}

impl Trace {
    pub fn new(endpoints: EndpointSet) -> Self {
        Self {
            endpoints,
            flows: Vec::new(),
        }
    }

    /// Append a flow.
    ///
    /// # Panics
    ///
    /// Panics if the flow references an unknown endpoint or arrives before the last flow.
    pub(crate) fn push(&mut self, flow: FlowRecord) {
        assert!(
            flow.src < self.endpoints.len() && flow.dst < self.endpoints.len(),
            "flow references an unknown endpoint"
        );
        if let Some(last) = self.flows.last() {
            assert!(
                flow.arrival_time >= last.arrival_time,
                "flow arrives out of order"
            );
        }
        self.flows.push(flow);
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    pub fn flows(&self) -> &[FlowRecord] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Arrival time of the last flow, if any.
    pub fn last_arrival(&self) -> Option<f64> {
        self.flows.last().map(|flow| flow.arrival_time)
    }

    /// Sum of all flow sizes.
    pub fn total_volume(&self) -> f64 {
        self.flows.iter().map(|flow| flow.size).sum()
    }

    /// Volume touching each endpoint (as source or destination).
    pub fn endpoint_loads(&self) -> Vec<f64> {
        let mut loads = vec![0.0; self.endpoints.len()];
        for flow in &self.flows {
            loads[flow.src] += flow.size;
            loads[flow.dst] += flow.size;
        }
        loads
    }

    /// Realized load of every endpoint relative to its budget under `capacity`.
    pub fn load_report(&self, capacity: &CapacityConfig) -> Vec<EndpointLoad> {
        self.endpoint_loads()
            .into_iter()
            .enumerate()
            .map(|(ep, load)| {
                let budget = capacity.endpoint_budget(ep);
                EndpointLoad {
                    endpoint: self.endpoints.name(ep).to_string(),
                    load,
                    budget,
                    fraction: load / budget,
                }
            })
            .collect()
    }

    /// Recompute the realized node-pair distribution.
    pub fn node_distribution(&self, weighting: PairWeighting) -> EmpiricalNodeDistribution {
        let mut weights = vec![0.0; self.endpoints.num_pairs()];
        for flow in &self.flows {
            weights[self.endpoints.pair_index(flow.pair())] += weighting.weight(flow.size);
        }
        EmpiricalNodeDistribution::from_weights(self.endpoints.len(), weights)
    }

    /// Tabular form keyed by flow id, with endpoint names resolved.
    pub fn rows(&self) -> Vec<FlowRow> {
        self.flows
            .iter()
            .map(|flow| FlowRow {
                flow_id: flow.flow_id,
                src: self.endpoints.name(flow.src).to_string(),
                dst: self.endpoints.name(flow.dst).to_string(),
                size: flow.size,
                arrival_time: flow.arrival_time,
                duration: flow.duration,
                completion_time: flow.completion_time,
            })
            .collect()
    }
}

/// Exported row of a [Trace].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowRow {
    pub flow_id: u64,
    pub src: String,
    pub dst: String,
    pub size: f64,
    pub arrival_time: f64,
    pub duration: f64,
    pub completion_time: f64,
}

/// Realized load of one endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointLoad {
    pub endpoint: String,
    pub load: f64,
    pub budget: f64,
    /// `load / budget`, never above 1 for a generated trace.
    pub fraction: f64,
}

/// Realized probability mass per ordered pair.
///
/// Holds raw (unnormalized) weights; probabilities are derived on read.
#[derive(Clone, Debug, PartialEq)]
pub struct EmpiricalNodeDistribution {
    num_endpoints: usize,
    weights: Vec<f64>,
    total: f64,
}

impl EmpiricalNodeDistribution {
    /// Build from raw weights indexed by flat pair index.
    pub fn from_weights(num_endpoints: usize, weights: Vec<f64>) -> Self {
        debug_assert_eq!(weights.len(), num_endpoints * num_endpoints);
        let total = weights.iter().sum();
        Self {
            num_endpoints,
            weights,
            total,
        }
    }

    /// Raw weights indexed by flat pair index.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Total raw weight (flow count or volume).
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Realized probability of `pair` (zero for an empty distribution).
    pub fn probability(&self, pair: Pair) -> f64 {
        if self.total == 0.0 {
            return 0.0;
        }
        self.weights[pair.src * self.num_endpoints + pair.dst] / self.total
    }

    /// Pairs with non-zero mass and their probabilities.
    pub fn to_map(&self) -> BTreeMap<Pair, f64> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, &weight)| weight > 0.0)
            .map(|(index, &weight)| {
                let pair = Pair::new(index / self.num_endpoints, index % self.num_endpoints);
                (pair, weight / self.total)
            })
            .collect()
    }
}
