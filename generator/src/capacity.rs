//! Track admitted load against per-endpoint and aggregate capacity.
//!
//! Capacities are configured as rates. Over one run, an endpoint may absorb at most
//! `capacity * target_load` units of flow volume (its budget), and the whole network at most
//! `aggregate_capacity * target_load`. A flow charges its size to both of its endpoints.
//!
//! Admission is all-or-nothing per flow: a flow is admitted only if both endpoints (and the
//! aggregate) can absorb it. Batches are admitted in two steps: [CapacityTracker::plan] decides
//! which flows fit using a single snapshot of the current loads, and [CapacityTracker::commit]
//! applies the plan. A plan that is never committed leaves the tracker untouched.

use crate::{
    endpoints::{EndpointSet, Pair},
    Error,
};
use tracing::trace;

/// Capacity limits for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct CapacityConfig {
    ep_capacities: Vec<f64>,
    aggregate: f64,
    target_load: f64,
}

impl CapacityConfig {
    /// Create a config from per-endpoint capacities, an aggregate capacity, and a target load
    /// fraction in `(0, 1]`.
    ///
    /// Returns [Error::InfeasibleCapacity] if `target_load * aggregate` exceeds the sum of
    /// per-endpoint capacities.
    pub fn new(ep_capacities: Vec<f64>, aggregate: f64, target_load: f64) -> Result<Self, Error> {
        if let Some(capacity) = ep_capacities
            .iter()
            .find(|c| !(c.is_finite() && **c > 0.0))
        {
            return Err(Error::InvalidConfig(format!(
                "endpoint capacity must be finite and positive, got {capacity}"
            )));
        }
        if !(aggregate.is_finite() && aggregate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "aggregate capacity must be finite and positive, got {aggregate}"
            )));
        }
        if !(target_load > 0.0 && target_load <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "target load fraction must be in (0, 1], got {target_load}"
            )));
        }
        let total: f64 = ep_capacities.iter().sum();
        if target_load * aggregate > total {
            return Err(Error::InfeasibleCapacity(format!(
                "target load {} exceeds total endpoint capacity {total}",
                target_load * aggregate
            )));
        }
        Ok(Self {
            ep_capacities,
            aggregate,
            target_load,
        })
    }

    /// Every endpoint gets `ep_capacity`; the aggregate is their sum.
    pub fn uniform(num_eps: usize, ep_capacity: f64, target_load: f64) -> Result<Self, Error> {
        Self::new(
            vec![ep_capacity; num_eps],
            num_eps as f64 * ep_capacity,
            target_load,
        )
    }

    /// Number of endpoints with a configured capacity.
    pub fn num_endpoints(&self) -> usize {
        self.ep_capacities.len()
    }

    /// Link capacity (rate) of endpoint `ep`.
    pub fn ep_capacity(&self, ep: usize) -> f64 {
        self.ep_capacities[ep]
    }

    pub fn aggregate(&self) -> f64 {
        self.aggregate
    }

    pub fn target_load(&self) -> f64 {
        self.target_load
    }

    /// Volume endpoint `ep` may absorb over a run.
    pub fn endpoint_budget(&self, ep: usize) -> f64 {
        self.ep_capacities[ep] * self.target_load
    }

    /// Volume the whole network may absorb over a run.
    pub fn aggregate_budget(&self) -> f64 {
        self.aggregate * self.target_load
    }

    /// Largest total flow volume any trace can hold.
    ///
    /// Every flow charges two endpoints, so the endpoint budgets bound the volume at half their
    /// sum.
    pub fn admissible_volume(&self) -> f64 {
        let endpoints: f64 = (0..self.ep_capacities.len())
            .map(|ep| self.endpoint_budget(ep))
            .sum();
        self.aggregate_budget().min(endpoints / 2.0)
    }

    /// Static check that `min_flows` flows of (expected) size `mean_size` can fit.
    pub fn check_demand(&self, min_flows: usize, mean_size: f64) -> Result<(), Error> {
        let required = min_flows as f64 * mean_size;
        let available = self.admissible_volume();
        if required > available {
            return Err(Error::InfeasibleCapacity(format!(
                "{min_flows} flows of mean size {mean_size} require {required}, but capacity allows {available}"
            )));
        }
        Ok(())
    }
}

/// Outcome of planning the admission of a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Admission {
    accepted: Vec<usize>,
    rejected: usize,
}

impl Admission {
    /// Positions (within the batch) of admitted flows, in batch order.
    pub fn accepted(&self) -> &[usize] {
        &self.accepted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Fraction of the batch that was rejected (zero for an empty batch).
    pub fn rejection_rate(&self) -> f64 {
        let total = self.accepted.len() + self.rejected;
        if total == 0 {
            return 0.0;
        }
        self.rejected as f64 / total as f64
    }
}

/// Running load per endpoint and per ordered pair.
#[derive(Clone, Debug)]
pub struct CapacityTracker {
    num_endpoints: usize,
    budgets: Vec<f64>,
    loads: Vec<f64>,
    aggregate_budget: f64,
    aggregate_load: f64,
    pair_loads: Vec<f64>,
    pair_counts: Vec<u64>,
}

impl CapacityTracker {
    /// Create an empty tracker for `endpoints`.
    pub fn new(config: &CapacityConfig, endpoints: &EndpointSet) -> Result<Self, Error> {
        if config.num_endpoints() != endpoints.len() {
            return Err(Error::InvalidConfig(format!(
                "{} endpoint capacities for {} endpoints",
                config.num_endpoints(),
                endpoints.len()
            )));
        }
        let n = endpoints.len();
        Ok(Self {
            num_endpoints: n,
            budgets: (0..n).map(|ep| config.endpoint_budget(ep)).collect(),
            loads: vec![0.0; n],
            aggregate_budget: config.aggregate_budget(),
            aggregate_load: 0.0,
            pair_loads: vec![0.0; n * n],
            pair_counts: vec![0; n * n],
        })
    }

    fn fits_within(
        loads: &[f64],
        budgets: &[f64],
        aggregate: f64,
        limit: f64,
        pair: Pair,
        size: f64,
    ) -> bool {
        !pair.is_self()
            && size >= 0.0
            && loads[pair.src] + size <= budgets[pair.src]
            && loads[pair.dst] + size <= budgets[pair.dst]
            && aggregate + size <= limit
    }

    /// Returns true if a flow of `size` on `pair` can be admitted now.
    pub fn fits(&self, pair: Pair, size: f64) -> bool {
        Self::fits_within(
            &self.loads,
            &self.budgets,
            self.aggregate_load,
            self.aggregate_budget,
            pair,
            size,
        )
    }

    fn apply(&mut self, pair: Pair, size: f64) {
        self.loads[pair.src] += size;
        self.loads[pair.dst] += size;
        self.aggregate_load += size;
        let index = pair.src * self.num_endpoints + pair.dst;
        self.pair_loads[index] += size;
        self.pair_counts[index] += 1;
    }

    /// Admit a single flow, returning whether it was admitted.
    pub fn admit(&mut self, pair: Pair, size: f64) -> bool {
        if !self.fits(pair, size) {
            trace!(src = pair.src, dst = pair.dst, size, "rejected flow");
            return false;
        }
        self.apply(pair, size);
        true
    }

    /// Decide which flows of a batch fit, processing them in order against one snapshot of the
    /// current loads.
    pub fn plan(&self, pairs: &[Pair], sizes: &[f64]) -> Admission {
        assert_eq!(pairs.len(), sizes.len(), "mismatched batch columns");
        let mut loads = self.loads.clone();
        let mut aggregate = self.aggregate_load;
        let mut admission = Admission::default();
        for (position, (&pair, &size)) in pairs.iter().zip(sizes).enumerate() {
            if !Self::fits_within(
                &loads,
                &self.budgets,
                aggregate,
                self.aggregate_budget,
                pair,
                size,
            ) {
                admission.rejected += 1;
                continue;
            }
            loads[pair.src] += size;
            loads[pair.dst] += size;
            aggregate += size;
            admission.accepted.push(position);
        }
        admission
    }

    /// Apply a plan produced by [CapacityTracker::plan] for the same batch.
    ///
    /// Every flow is re-checked as it is applied, so a stale plan can never push an endpoint
    /// over its budget. Returns the positions that were actually admitted.
    pub fn commit(&mut self, pairs: &[Pair], sizes: &[f64], admission: &Admission) -> Vec<usize> {
        let mut admitted = Vec::with_capacity(admission.accepted.len());
        for &position in &admission.accepted {
            if self.admit(pairs[position], sizes[position]) {
                admitted.push(position);
            }
        }
        admitted
    }

    /// Budget of endpoint `ep`.
    pub fn budget(&self, ep: usize) -> f64 {
        self.budgets[ep]
    }

    /// Volume admitted at endpoint `ep` so far.
    pub fn load(&self, ep: usize) -> f64 {
        self.loads[ep]
    }

    /// Remaining volume endpoint `ep` can absorb.
    pub fn remaining_budget(&self, ep: usize) -> f64 {
        (self.budgets[ep] - self.loads[ep]).max(0.0)
    }

    /// Remaining budget of `ep` as a fraction of its budget, in `[0, 1]`.
    pub fn headroom(&self, ep: usize) -> f64 {
        (self.remaining_budget(ep) / self.budgets[ep]).clamp(0.0, 1.0)
    }

    /// Remaining volume the network as a whole can absorb.
    pub fn aggregate_remaining(&self) -> f64 {
        (self.aggregate_budget - self.aggregate_load).max(0.0)
    }

    /// Volume admitted per flat pair index.
    pub fn pair_loads(&self) -> &[f64] {
        &self.pair_loads
    }

    /// Flows admitted per flat pair index.
    pub fn pair_counts(&self) -> &[u64] {
        &self.pair_counts
    }
}
