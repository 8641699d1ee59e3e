//! Pack sampled flows into a capacity-feasible trace that matches a target node distribution.
//!
//! [PackingController] is a state machine that repeatedly:
//!
//! 1. samples a batch of flow sizes and inter-arrival times (`Sampling`),
//! 2. assigns every flow of the batch a node pair in one bulk draw (`Allocating`),
//! 3. admits the batch against the [CapacityTracker] (`Admitting`), and
//! 4. compares the realized node distribution with the target (`Checking`).
//!
//! A check either ends the run (`Converged` or `Failed`), continues filling toward the minimum
//! flow count and horizon (`Sampling`), or re-weights pair sampling toward under-represented
//! pairs (`Correcting`).
//!
//! Every run owns a single [StdRng] seeded from the caller's seed, so a run is reproducible from
//! its inputs.

use crate::{
    allocator::NodePairAllocator,
    capacity::{CapacityConfig, CapacityTracker},
    distribution::{DistributionSpec, Sampler},
    divergence::jensen_shannon_distance,
    endpoints::{EndpointSet, Pair},
    node_dist::NodeDistSpec,
    trace::{EmpiricalNodeDistribution, FlowRecord, PairWeighting, Trace},
    Error,
};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    mem,
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

/// Distributions that drive a run.
#[derive(Clone, Debug, PartialEq)]
pub struct DistributionSpecs {
    pub flow_size: DistributionSpec,
    pub interarrival_time: DistributionSpec,
    pub node_dist: NodeDistSpec,
}

/// When a run stops, and how the controller steers it until then.
#[derive(Clone, Debug, PartialEq)]
pub struct StoppingCriteria {
    /// Minimum number of admitted flows.
    pub min_num_flows: usize,
    /// Minimum arrival time of the last admitted flow.
    pub min_last_arrival: f64,
    /// Largest acceptable Jensen-Shannon distance between target and realized node distribution.
    pub jsd_threshold: f64,
    /// Checks (and failed allocations) allowed before the run fails.
    pub max_iterations: usize,
    /// Wall-clock budget of the run.
    pub max_duration: Option<Duration>,
    /// Scale pair weights by the remaining headroom of their endpoints.
    pub auto_node_dist_correction: bool,
    /// Fixed batch size. When `None`, the size is derived from the remaining demand.
    pub batch_size: Option<usize>,
    pub max_batch_size: usize,
    /// Batches rejecting a larger fraction of their flows are discarded.
    pub max_rejection_rate: f64,
    pub weighting: PairWeighting,
}

impl Default for StoppingCriteria {
    fn default() -> Self {
        Self {
            min_num_flows: 0,
            min_last_arrival: 0.0,
            jsd_threshold: 0.1,
            max_iterations: 1_000,
            max_duration: None,
            auto_node_dist_correction: true,
            batch_size: None,
            max_batch_size: 1 << 20,
            max_rejection_rate: 0.5,
            weighting: PairWeighting::Count,
        }
    }
}

impl StoppingCriteria {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.min_last_arrival.is_finite() && self.min_last_arrival >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "minimum last arrival must be finite and non-negative, got {}",
                self.min_last_arrival
            )));
        }
        if !(0.0..=1.0).contains(&self.jsd_threshold) {
            return Err(Error::InvalidConfig(format!(
                "divergence threshold must be in [0, 1], got {}",
                self.jsd_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig(
                "iteration budget must be positive".into(),
            ));
        }
        if self.batch_size == Some(0) || self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.max_rejection_rate) {
            return Err(Error::InvalidConfig(format!(
                "maximum rejection rate must be in [0, 1], got {}",
                self.max_rejection_rate
            )));
        }
        Ok(())
    }
}

/// Phase of a [PackingController].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Sampling,
    Allocating,
    Admitting,
    Checking,
    Correcting,
    Converged,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Failed)
    }
}

/// A stopping condition that was not met.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    MinNumFlows,
    MinLastArrival,
    Divergence,
}

/// Budget exhausted before every stopping condition held.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error(
    "no convergence after {iterations} iterations (unmet: {unmet:?}, flows: {accepted}, divergence: {divergence:?})"
)]
pub struct ConvergenceTimeout {
    pub unmet: Vec<Condition>,
    /// Divergence at the last check.
    pub divergence: Option<f64>,
    pub accepted: usize,
    pub last_arrival: Option<f64>,
    pub iterations: usize,
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Termination {
    Converged,
    Failed(ConvergenceTimeout),
}

/// Progress of a run, reported alongside its [Trace].
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergenceState {
    /// Divergence at the last check (`None` if the run never had to check).
    pub divergence: Option<f64>,
    pub iterations: usize,
    /// Number of correction passes.
    pub corrections: usize,
    pub elapsed: Duration,
    /// Divergence measured at every check, in order.
    pub history: Vec<f64>,
    pub termination: Termination,
}

impl ConvergenceState {
    pub fn is_converged(&self) -> bool {
        matches!(self.termination, Termination::Converged)
    }
}

/// Candidate flows of the current iteration.
#[derive(Default)]
struct Batch {
    /// Clock before the batch was sampled.
    start: f64,
    sizes: Vec<f64>,
    arrivals: Vec<f64>,
    pairs: Vec<Pair>,
}

/// Drives one packing run.
pub struct PackingController {
    capacity: CapacityConfig,
    criteria: StoppingCriteria,
    sizes: Sampler,
    interarrivals: Sampler,
    allocator: NodePairAllocator,
    tracker: CapacityTracker,
    trace: Trace,
    rng: StdRng,

    state: State,
    batch: Batch,
    clock: f64,
    batch_limit: usize,
    correcting: bool,
    headroom: bool,

    iterations: usize,
    corrections: usize,
    divergence: Option<f64>,
    history: Vec<f64>,
    started: Instant,
}

impl PackingController {
    /// Validate every input and prepare a run.
    ///
    /// All configuration errors (including static capacity infeasibility) surface here, before
    /// anything is sampled.
    pub fn new(
        endpoints: EndpointSet,
        capacity: &CapacityConfig,
        specs: &DistributionSpecs,
        criteria: &StoppingCriteria,
        seed: u64,
    ) -> Result<Self, Error> {
        criteria.validate()?;
        let sizes = Sampler::new(&specs.flow_size)?;
        let interarrivals = Sampler::new(&specs.interarrival_time)?;
        let tracker = CapacityTracker::new(capacity, &endpoints)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let node_dist = specs.node_dist.build(&endpoints, &mut rng)?;
        let allocator = NodePairAllocator::new(&node_dist)?;

        // Heavy-tailed laws without a finite mean cannot be checked statically
        capacity.check_demand(criteria.min_num_flows, sizes.mean().unwrap_or(0.0))?;

        let state = if criteria.min_num_flows == 0 && criteria.min_last_arrival == 0.0 {
            State::Converged
        } else {
            State::Sampling
        };
        info!(
            endpoints = endpoints.len(),
            seed,
            min_num_flows = criteria.min_num_flows,
            min_last_arrival = criteria.min_last_arrival,
            threshold = criteria.jsd_threshold,
            "starting packing run"
        );
        Ok(Self {
            capacity: capacity.clone(),
            criteria: criteria.clone(),
            sizes,
            interarrivals,
            allocator,
            tracker,
            trace: Trace::new(endpoints),
            rng,
            state,
            batch: Batch::default(),
            clock: 0.0,
            batch_limit: criteria.max_batch_size,
            correcting: false,
            headroom: false,
            iterations: 0,
            corrections: 0,
            divergence: None,
            history: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Flows admitted so far.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn tracker(&self) -> &CapacityTracker {
        &self.tracker
    }

    /// Realized node distribution of the flows admitted so far.
    pub fn empirical(&self) -> EmpiricalNodeDistribution {
        let weights = match self.criteria.weighting {
            PairWeighting::Count => self
                .tracker
                .pair_counts()
                .iter()
                .map(|&count| count as f64)
                .collect(),
            PairWeighting::Volume => self.tracker.pair_loads().to_vec(),
        };
        EmpiricalNodeDistribution::from_weights(self.trace.endpoints().len(), weights)
    }

    /// Execute the current state and move to the next one.
    ///
    /// Terminal states are left unchanged.
    pub fn step(&mut self) -> State {
        let next = match self.state {
            State::Sampling => self.sample(),
            State::Allocating => self.allocate(),
            State::Admitting => self.admit(),
            State::Checking => self.check(),
            State::Correcting => {
                self.corrections += 1;
                self.correcting = true;
                State::Sampling
            }
            terminal => terminal,
        };
        if next != self.state {
            trace!(from = ?self.state, to = ?next, "transition");
        }
        self.state = next;
        next
    }

    /// Step until the run terminates.
    pub fn run(mut self) -> (Trace, ConvergenceState) {
        while !self.state.is_terminal() {
            self.step();
        }
        self.finish()
    }

    /// End the run, returning the trace and its convergence report.
    ///
    /// A run that has not reached a terminal state is reported as failed.
    pub fn finish(self) -> (Trace, ConvergenceState) {
        let elapsed = self.started.elapsed();
        let termination = if self.state == State::Converged {
            info!(
                flows = self.trace.len(),
                divergence = ?self.divergence,
                iterations = self.iterations,
                corrections = self.corrections,
                ?elapsed,
                "packing converged"
            );
            Termination::Converged
        } else {
            let timeout = ConvergenceTimeout {
                unmet: self.unmet(),
                divergence: self.divergence,
                accepted: self.trace.len(),
                last_arrival: self.trace.last_arrival(),
                iterations: self.iterations,
            };
            warn!(%timeout, ?elapsed, "packing failed");
            Termination::Failed(timeout)
        };
        let state = ConvergenceState {
            divergence: self.divergence,
            iterations: self.iterations,
            corrections: self.corrections,
            elapsed,
            history: self.history,
            termination,
        };
        (self.trace, state)
    }

    fn batch_size(&self) -> usize {
        let n = match self.criteria.batch_size {
            Some(n) => n,
            None if self.correcting => self.allocator.support().max(self.trace.len() / 4),
            None => {
                let by_count = self
                    .criteria
                    .min_num_flows
                    .saturating_sub(self.trace.len());
                let remaining = self.criteria.min_last_arrival - self.clock;
                let by_horizon = match self.interarrivals.mean() {
                    _ if remaining <= 0.0 => 0,
                    Some(mean) if mean > 0.0 => {
                        let needed = (remaining / mean).ceil().min(self.batch_limit as f64);
                        (needed as usize).saturating_add(1)
                    }
                    _ => self.allocator.support(),
                };
                by_count.max(by_horizon)
            }
        };
        n.clamp(1, self.batch_limit)
    }

    fn sample(&mut self) -> State {
        let n = self.batch_size();
        let start = self.clock;
        let sizes = self.sizes.sample_n(&mut self.rng, n);
        let gaps = self.interarrivals.sample_n(&mut self.rng, n);
        let mut arrivals = Vec::with_capacity(n);
        for gap in gaps {
            arrivals.push(self.clock);
            self.clock += gap;
        }
        trace!(n, start, end = self.clock, "sampled batch");
        self.batch = Batch {
            start,
            sizes,
            arrivals,
            pairs: Vec::new(),
        };
        State::Allocating
    }

    /// Sampling weights for the next batch.
    fn weights(&self) -> Vec<f64> {
        let headroom = self.criteria.auto_node_dist_correction || self.headroom;
        let mut weights = if self.correcting {
            let (observed, total) = match self.criteria.weighting {
                PairWeighting::Count => {
                    let observed: Vec<f64> = self
                        .tracker
                        .pair_counts()
                        .iter()
                        .map(|&count| count as f64)
                        .collect();
                    (observed, (self.trace.len() + self.batch.sizes.len()) as f64)
                }
                PairWeighting::Volume => {
                    let observed = self.tracker.pair_loads().to_vec();
                    let total = observed.iter().sum::<f64>() + self.batch.sizes.iter().sum::<f64>();
                    (observed, total)
                }
            };
            self.allocator.deficit_weights(&observed, total)
        } else {
            self.allocator.target().to_vec()
        };
        if headroom {
            self.allocator.apply_headroom(&mut weights, &self.tracker);
            if self.correcting && weights.iter().all(|&weight| weight == 0.0) {
                weights = self.allocator.target().to_vec();
                self.allocator.apply_headroom(&mut weights, &self.tracker);
            }
        }
        weights
    }

    fn allocate(&mut self) -> State {
        let weights = self.weights();
        let n = self.batch.sizes.len();
        match self.allocator.allocate(&mut self.rng, &weights, n) {
            Ok(pairs) => {
                self.batch.pairs = pairs;
                State::Admitting
            }
            Err(err) => {
                self.iterations += 1;
                self.clock = self.batch.start;
                self.headroom = true;
                debug!(?err, iteration = self.iterations, "allocation failed");
                if self.exhausted() {
                    State::Failed
                } else {
                    State::Correcting
                }
            }
        }
    }

    fn admit(&mut self) -> State {
        let batch = mem::take(&mut self.batch);
        let admission = self.tracker.plan(&batch.pairs, &batch.sizes);
        let rate = admission.rejection_rate();
        if rate > self.criteria.max_rejection_rate {
            self.clock = batch.start;
            self.batch_limit = (batch.sizes.len() / 2).max(1);
            self.headroom = true;
            debug!(
                rate,
                rejected = admission.rejected(),
                limit = self.batch_limit,
                "discarded batch"
            );
            return State::Checking;
        }

        let admitted = self.tracker.commit(&batch.pairs, &batch.sizes, &admission);
        for &position in &admitted {
            let pair = batch.pairs[position];
            let size = batch.sizes[position];
            let arrival_time = batch.arrivals[position];
            let rate = self
                .capacity
                .ep_capacity(pair.src)
                .min(self.capacity.ep_capacity(pair.dst));
            let duration = size / rate;
            self.trace.push(FlowRecord {
                flow_id: self.trace.len() as u64,
                src: pair.src,
                dst: pair.dst,
                size,
                arrival_time,
                duration,
                completion_time: arrival_time + duration,
            });
        }
        self.batch_limit = self
            .batch_limit
            .saturating_mul(2)
            .min(self.criteria.max_batch_size);
        trace!(
            admitted = admitted.len(),
            rejected = batch.sizes.len() - admitted.len(),
            "admitted batch"
        );
        State::Checking
    }

    fn check(&mut self) -> State {
        self.iterations += 1;
        let empirical = self.empirical();
        let divergence = jensen_shannon_distance(self.allocator.target(), empirical.weights());
        self.divergence = Some(divergence);
        self.history.push(divergence);

        let unmet = self.unmet();
        debug!(
            iteration = self.iterations,
            flows = self.trace.len(),
            last_arrival = ?self.trace.last_arrival(),
            divergence,
            ?unmet,
            "checked trace"
        );
        if unmet.is_empty() {
            return State::Converged;
        }
        if self.exhausted() {
            return State::Failed;
        }
        if unmet.contains(&Condition::Divergence) {
            State::Correcting
        } else {
            self.correcting = false;
            State::Sampling
        }
    }

    fn unmet(&self) -> Vec<Condition> {
        let mut unmet = Vec::new();
        if self.trace.len() < self.criteria.min_num_flows {
            unmet.push(Condition::MinNumFlows);
        }
        if self.trace.last_arrival().unwrap_or(0.0) < self.criteria.min_last_arrival {
            unmet.push(Condition::MinLastArrival);
        }
        match self.divergence {
            Some(divergence) if divergence <= self.criteria.jsd_threshold => {}
            _ => unmet.push(Condition::Divergence),
        }
        unmet
    }

    fn exhausted(&self) -> bool {
        self.iterations >= self.criteria.max_iterations
            || self
                .criteria
                .max_duration
                .is_some_and(|budget| self.started.elapsed() >= budget)
    }
}

/// Generate a trace for `endpoints` under `capacity`.
///
/// Returns an error only for invalid or statically infeasible inputs. A run that exhausts its
/// budget still returns its trace, with [Termination::Failed] in the [ConvergenceState].
pub fn generate(
    endpoints: EndpointSet,
    capacity: &CapacityConfig,
    specs: &DistributionSpecs,
    criteria: &StoppingCriteria,
    seed: u64,
) -> Result<(Trace, ConvergenceState), Error> {
    Ok(PackingController::new(endpoints, capacity, specs, criteria, seed)?.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        distribution::Family,
        node_dist::{NodeDistSpec, PairMass},
    };
    use flowpack_macros::test_traced;
    use proptest::prelude::*;

    fn endpoints(n: usize) -> EndpointSet {
        EndpointSet::new((0..n).map(|i| i.to_string())).unwrap()
    }

    fn constant_specs(size: f64, gap: f64, node_dist: NodeDistSpec) -> DistributionSpecs {
        DistributionSpecs {
            flow_size: DistributionSpec::constant(size),
            interarrival_time: DistributionSpec::constant(gap),
            node_dist,
        }
    }

    /// One pair carries 0.9 of the mass; the other 11 pairs share the rest.
    fn skewed() -> NodeDistSpec {
        let names = ["0", "1", "2", "3"];
        let mut pairs = Vec::new();
        for src in names {
            for dst in names {
                if src == dst {
                    continue;
                }
                let probability = if (src, dst) == ("0", "1") {
                    0.9
                } else {
                    0.1 / 11.0
                };
                pairs.push(PairMass {
                    src: src.into(),
                    dst: dst.into(),
                    probability,
                });
            }
        }
        NodeDistSpec::Explicit { pairs }
    }

    fn assert_within_budgets(trace: &Trace, capacity: &CapacityConfig) {
        for (ep, load) in trace.endpoint_loads().into_iter().enumerate() {
            assert!(
                load <= capacity.endpoint_budget(ep),
                "endpoint {ep} carries {load}"
            );
        }
    }

    #[test_traced]
    fn test_uniform_four_endpoints() {
        let capacity = CapacityConfig::uniform(4, 100_000.0, 0.9).unwrap();
        let specs = constant_specs(100.0, 0.125, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria {
            min_num_flows: 16,
            min_last_arrival: 2.0,
            jsd_threshold: 0.1,
            ..Default::default()
        };
        let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 0).unwrap();

        assert!(state.is_converged());
        assert!(state.divergence.unwrap() <= 0.1);
        assert!(trace.len() >= 16);
        assert!(trace.last_arrival().unwrap() >= 2.0);
        for load in trace.endpoint_loads() {
            assert!(load <= 90_000.0);
        }
        for flow in trace.flows() {
            assert_ne!(flow.src, flow.dst);
            assert_eq!(flow.size, 100.0);
            assert_eq!(flow.duration, 100.0 / 100_000.0);
            assert_eq!(flow.completion_time, flow.arrival_time + flow.duration);
        }
        let realized = jensen_shannon_distance(
            NodePairAllocator::new(&crate::node_dist::NodeDist::uniform(trace.endpoints()))
                .unwrap()
                .target(),
            trace.node_distribution(PairWeighting::Count).weights(),
        );
        assert_eq!(Some(realized), state.divergence);
    }

    #[test_traced]
    fn test_skewed_corrects_before_converging() {
        let capacity =
            CapacityConfig::new(vec![5_000.0, 5_000.0, 100_000.0, 100_000.0], 210_000.0, 1.0)
                .unwrap();
        let specs = constant_specs(10.0, 0.01, skewed());
        let criteria = StoppingCriteria {
            min_num_flows: 20,
            jsd_threshold: 0.1,
            max_iterations: 200,
            ..Default::default()
        };
        let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 3).unwrap();

        assert!(state.is_converged(), "{:?}", state.termination);
        assert!(state.corrections >= 1);
        assert!(state.history[0] > 0.1);
        assert!(state.divergence.unwrap() <= 0.1);
        assert_within_budgets(&trace, &capacity);
    }

    #[test_traced]
    fn test_skewed_fails_without_capacity() {
        let capacity =
            CapacityConfig::new(vec![100.0, 100.0, 100_000.0, 100_000.0], 200_200.0, 1.0).unwrap();
        let specs = constant_specs(10.0, 0.01, skewed());
        let criteria = StoppingCriteria {
            min_num_flows: 100,
            jsd_threshold: 0.1,
            max_iterations: 100,
            auto_node_dist_correction: false,
            ..Default::default()
        };
        let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 1).unwrap();

        let Termination::Failed(timeout) = &state.termination else {
            panic!("expected failure, got {:?}", state.termination);
        };
        assert!(timeout.unmet.contains(&Condition::Divergence));
        assert_eq!(timeout.iterations, state.iterations);
        assert_eq!(timeout.accepted, trace.len());
        assert!(state.corrections >= 1);
        assert_within_budgets(&trace, &capacity);
    }

    #[test]
    fn test_deterministic_by_seed() {
        let capacity = CapacityConfig::uniform(6, 1e9, 0.5).unwrap();
        let specs = DistributionSpecs {
            flow_size: DistributionSpec::named(Family::Lognormal {
                mu: 7.0,
                sigma: 1.5,
            }),
            interarrival_time: DistributionSpec::named(Family::Exponential { scale: 10.0 }),
            node_dist: NodeDistSpec::Multimodal {
                skewed_nodes: vec![],
                num_skewed_nodes: Some(2),
                skewed_node_probs: vec![0.3, 0.2],
            },
        };
        let criteria = StoppingCriteria {
            min_num_flows: 200,
            min_last_arrival: 500.0,
            max_iterations: 50,
            ..Default::default()
        };
        let run = |seed| generate(endpoints(6), &capacity, &specs, &criteria, seed).unwrap();

        let (a, state_a) = run(11);
        let (b, state_b) = run(11);
        assert_eq!(a, b);
        assert_eq!(state_a.history, state_b.history);
        assert_eq!(state_a.termination, state_b.termination);

        let (c, _) = run(12);
        assert_ne!(a, c);
    }

    #[test]
    fn test_zero_flows_converge_immediately() {
        let capacity = CapacityConfig::uniform(3, 10.0, 1.0).unwrap();
        let specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria::default();
        let mut controller =
            PackingController::new(endpoints(3), &capacity, &specs, &criteria, 0).unwrap();
        assert_eq!(controller.state(), State::Converged);
        assert_eq!(controller.step(), State::Converged);

        let (trace, state) = controller.run();
        assert!(trace.is_empty());
        assert!(state.is_converged());
        assert_eq!(state.divergence, None);
        assert_eq!(state.iterations, 0);
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_infeasible_demand_rejected_before_sampling() {
        let capacity = CapacityConfig::uniform(4, 1_000.0, 0.5).unwrap();
        let specs = constant_specs(100.0, 1.0, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria {
            min_num_flows: 11,
            ..Default::default()
        };
        assert!(matches!(
            generate(endpoints(4), &capacity, &specs, &criteria, 0),
            Err(Error::InfeasibleCapacity(_))
        ));
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let capacity = CapacityConfig::uniform(4, 1_000.0, 0.5).unwrap();
        let mut specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        specs.flow_size = DistributionSpec::named(Family::Exponential { scale: -1.0 });
        let criteria = StoppingCriteria {
            min_num_flows: 1,
            ..Default::default()
        };
        assert!(matches!(
            generate(endpoints(4), &capacity, &specs, &criteria, 0),
            Err(Error::InvalidDistribution(_))
        ));

        let specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria {
            jsd_threshold: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            generate(endpoints(4), &capacity, &specs, &criteria, 0),
            Err(Error::InvalidConfig(_))
        ));

        assert!(matches!(
            generate(endpoints(5), &capacity, &specs, &StoppingCriteria::default(), 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_state_sequence() {
        let capacity = CapacityConfig::uniform(3, 1e6, 1.0).unwrap();
        let specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria {
            min_num_flows: 5,
            jsd_threshold: 0.0,
            max_iterations: 3,
            ..Default::default()
        };
        let mut controller =
            PackingController::new(endpoints(3), &capacity, &specs, &criteria, 0).unwrap();
        let mut states = vec![controller.state()];
        while !controller.state().is_terminal() {
            states.push(controller.step());
        }
        assert_eq!(
            &states[..5],
            &[
                State::Sampling,
                State::Allocating,
                State::Admitting,
                State::Checking,
                State::Correcting,
            ]
        );
        assert_eq!(states.last(), Some(&State::Failed));
        assert_eq!(
            controller.empirical(),
            controller.trace().node_distribution(PairWeighting::Count)
        );

        let (_, state) = controller.finish();
        assert_eq!(state.iterations, 3);
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.corrections, 2);
    }

    #[test]
    fn test_volume_weighting() {
        let capacity = CapacityConfig::uniform(4, 1e9, 1.0).unwrap();
        let specs = DistributionSpecs {
            flow_size: DistributionSpec::named(Family::Uniform {
                low: 1.0,
                high: 100.0,
            }),
            interarrival_time: DistributionSpec::constant(1.0),
            node_dist: NodeDistSpec::Uniform,
        };
        let criteria = StoppingCriteria {
            min_num_flows: 100,
            weighting: PairWeighting::Volume,
            max_iterations: 500,
            ..Default::default()
        };
        let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 5).unwrap();
        assert!(state.is_converged());
        let target = NodePairAllocator::new(&crate::node_dist::NodeDist::uniform(trace.endpoints()))
            .unwrap();
        let realized = jensen_shannon_distance(
            target.target(),
            trace.node_distribution(PairWeighting::Volume).weights(),
        );
        assert!(realized <= 0.1);
    }

    #[test]
    fn test_divergence_decreases_under_correction() {
        let capacity = CapacityConfig::uniform(8, 1e9, 1.0).unwrap();
        let specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        let criteria = StoppingCriteria {
            min_num_flows: 10,
            jsd_threshold: 0.0,
            max_iterations: 30,
            ..Default::default()
        };
        for seed in 0..5 {
            let (_, state) = generate(endpoints(8), &capacity, &specs, &criteria, seed).unwrap();
            assert_eq!(state.history.len(), 30);
            let (early, late) = state.history.split_at(15);
            let mean = |window: &[f64]| window.iter().sum::<f64>() / window.len() as f64;
            assert!(mean(late) < mean(early), "seed {seed}: {:?}", state.history);
        }
    }

    #[test]
    fn test_discarded_batches_shrink() {
        let capacity =
            CapacityConfig::new(vec![100.0, 100.0, 1_000.0, 1_000.0], 2_200.0, 1.0).unwrap();
        let specs = constant_specs(10.0, 1.0, skewed());
        let criteria = StoppingCriteria {
            min_num_flows: 50,
            auto_node_dist_correction: false,
            max_iterations: 40,
            ..Default::default()
        };
        let mut controller =
            PackingController::new(endpoints(4), &capacity, &specs, &criteria, 9).unwrap();
        // First batch: 50 flows, ~45 on a pair whose endpoints take at most 10
        for _ in 0..4 {
            controller.step();
        }
        assert!(controller.trace().is_empty());
        assert_eq!(controller.batch_limit, 25);
        assert!(controller.headroom);
        assert_eq!(controller.clock, 0.0);

        let (trace, _) = controller.run();
        assert_within_budgets(&trace, &capacity);
    }

    #[test]
    fn test_distant_horizon_bounded_by_batch_limit() {
        let capacity = CapacityConfig::uniform(4, 1e9, 1.0).unwrap();
        for (gap, min_last_arrival) in [(1.0, 1e20), (1e-300, 1.0)] {
            let specs = constant_specs(1.0, gap, NodeDistSpec::Uniform);
            let criteria = StoppingCriteria {
                min_last_arrival,
                max_iterations: 2,
                max_batch_size: 64,
                ..Default::default()
            };
            let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 0).unwrap();

            let Termination::Failed(timeout) = &state.termination else {
                panic!("expected failure, got {:?}", state.termination);
            };
            assert!(timeout.unmet.contains(&Condition::MinLastArrival));
            assert!(trace.len() <= 128);
        }
    }

    #[test]
    fn test_saturated_pair_fails_after_corrections() {
        let capacity =
            CapacityConfig::new(vec![100.0, 100.0, 1_000.0, 1_000.0], 2_200.0, 1.0).unwrap();
        let node_dist = NodeDistSpec::Explicit {
            pairs: vec![PairMass {
                src: "0".into(),
                dst: "1".into(),
                probability: 1.0,
            }],
        };
        let specs = constant_specs(10.0, 1.0, node_dist);
        let criteria = StoppingCriteria {
            min_num_flows: 50,
            max_iterations: 10,
            ..Default::default()
        };
        let mut controller =
            PackingController::new(endpoints(4), &capacity, &specs, &criteria, 0).unwrap();

        // Failed allocations roll the clock back to the start of the batch
        let mut start = controller.clock;
        let mut failed_allocations = 0;
        while !controller.state().is_terminal() {
            let from = controller.state();
            if from == State::Sampling {
                start = controller.clock;
            }
            let to = controller.step();
            if from == State::Allocating && to != State::Admitting {
                failed_allocations += 1;
                assert_eq!(controller.clock, start);
            }
        }
        assert!(failed_allocations >= 1);

        let (trace, state) = controller.finish();
        assert_eq!(trace.len(), 10);
        assert!(state.corrections >= 1);
        assert_eq!(state.iterations, criteria.max_iterations);
        let Termination::Failed(timeout) = &state.termination else {
            panic!("expected failure, got {:?}", state.termination);
        };
        assert_eq!(timeout.unmet, vec![Condition::MinNumFlows]);
        assert_within_budgets(&trace, &capacity);
    }

    #[test]
    fn test_wall_clock_budget_ends_run() {
        let capacity = CapacityConfig::uniform(4, 100.0, 1.0).unwrap();
        let specs = constant_specs(1.0, 1.0, NodeDistSpec::Uniform);
        let budget = Duration::from_millis(50);
        let criteria = StoppingCriteria {
            min_last_arrival: 1e12,
            jsd_threshold: 0.0,
            max_iterations: usize::MAX,
            max_duration: Some(budget),
            max_batch_size: 16,
            ..Default::default()
        };
        let (trace, state) = generate(endpoints(4), &capacity, &specs, &criteria, 0).unwrap();

        let Termination::Failed(timeout) = &state.termination else {
            panic!("expected failure, got {:?}", state.termination);
        };
        assert!(timeout.unmet.contains(&Condition::MinLastArrival));
        assert!(state.elapsed >= budget);
        assert_within_budgets(&trace, &capacity);
    }

    fn family() -> impl Strategy<Value = DistributionSpec> {
        prop_oneof![
            (1.0f64..50.0).prop_map(DistributionSpec::constant),
            (1.0f64..20.0, 20.0f64..80.0)
                .prop_map(|(low, high)| DistributionSpec::named(Family::Uniform { low, high })),
            (1.0f64..30.0)
                .prop_map(|scale| DistributionSpec::named(Family::Exponential { scale })),
            (0.5f64..3.0, 1.0f64..30.0).prop_map(|(alpha, lambda)| {
                DistributionSpec::named(Family::Weibull { alpha, lambda })
            }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn traces_respect_capacity_and_order(
            caps in prop::collection::vec(50.0f64..2_000.0, 2..6),
            load in 0.1f64..1.0,
            flow_size in family(),
            interarrival_time in family(),
            min_num_flows in 0usize..40,
            auto_node_dist_correction in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let n = caps.len();
            let aggregate = caps.iter().sum::<f64>();
            let capacity = CapacityConfig::new(caps, aggregate, load).unwrap();
            let specs = DistributionSpecs {
                flow_size,
                interarrival_time,
                node_dist: NodeDistSpec::Uniform,
            };
            let criteria = StoppingCriteria {
                min_num_flows,
                min_last_arrival: 10.0,
                max_iterations: 20,
                auto_node_dist_correction,
                ..Default::default()
            };
            let (trace, state) = match generate(endpoints(n), &capacity, &specs, &criteria, seed) {
                Ok(result) => result,
                Err(Error::InfeasibleCapacity(_)) => return Ok(()),
                Err(err) => panic!("unexpected error: {err}"),
            };

            for (ep, load) in trace.endpoint_loads().into_iter().enumerate() {
                prop_assert!(load <= capacity.endpoint_budget(ep));
            }
            prop_assert!(trace.total_volume() <= capacity.aggregate_budget());
            for (expected, flow) in trace.flows().iter().enumerate() {
                prop_assert_eq!(flow.flow_id, expected as u64);
                prop_assert!(flow.size >= 0.0);
                prop_assert!(flow.arrival_time >= 0.0);
            }
            for window in trace.flows().windows(2) {
                prop_assert!(window[0].arrival_time <= window[1].arrival_time);
            }
            prop_assert!(state.iterations <= criteria.max_iterations);
        }
    }
}
