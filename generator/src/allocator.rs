//! Assign ordered endpoint pairs to a batch of flows.
//!
//! The allocator owns the target pair mass (with self-pairs removed and the rest renormalized)
//! and derives per-batch sampling weights from it. Every batch is allocated with a single
//! categorical distribution over the flattened pair index space, built once and sampled for
//! the whole batch.

use crate::{capacity::CapacityTracker, endpoints::Pair, node_dist::NodeDist, Error};
use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use tracing::trace;

/// Draws node pairs for batches of flows.
#[derive(Clone, Debug)]
pub struct NodePairAllocator {
    num_endpoints: usize,
    target: Vec<f64>,
}

impl NodePairAllocator {
    /// Create an allocator for `dist`.
    ///
    /// Returns [Error::InfeasiblePair] if `dist` places no mass on any non-self pair.
    pub fn new(dist: &NodeDist) -> Result<Self, Error> {
        let n = dist.num_endpoints();
        let mut target = dist.mass().to_vec();
        for ep in 0..n {
            target[ep * n + ep] = 0.0;
        }
        let total: f64 = target.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::InfeasiblePair);
        }
        target.iter_mut().for_each(|m| *m /= total);
        Ok(Self {
            num_endpoints: n,
            target,
        })
    }

    /// Normalized target mass indexed by flat pair index (self-pairs are zero).
    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn num_endpoints(&self) -> usize {
        self.num_endpoints
    }

    /// Number of pairs with positive target mass.
    pub fn support(&self) -> usize {
        self.target.iter().filter(|&&m| m > 0.0).count()
    }

    /// Weights that steer the realized distribution back toward the target.
    ///
    /// `observed` holds the realized weight per pair (counts or volumes) and `total` the
    /// expected overall weight once the next batch has been admitted. Each pair is weighted by
    /// how far it falls short of its target share of `total`. If no pair falls short, the
    /// target itself is returned.
    pub fn deficit_weights(&self, observed: &[f64], total: f64) -> Vec<f64> {
        let weights: Vec<f64> = self
            .target
            .iter()
            .zip(observed)
            .map(|(&target, &observed)| (target * total - observed).max(0.0))
            .collect();
        if weights.iter().all(|&w| w == 0.0) {
            return self.target.clone();
        }
        weights
    }

    /// Scale each pair weight by the smaller headroom of its two endpoints.
    ///
    /// Pairs touching a saturated endpoint end up with zero weight.
    pub fn apply_headroom(&self, weights: &mut [f64], tracker: &CapacityTracker) {
        let headroom: Vec<f64> = (0..self.num_endpoints)
            .map(|ep| tracker.headroom(ep))
            .collect();
        for (index, weight) in weights.iter_mut().enumerate() {
            let pair = self.pair(index);
            *weight *= headroom[pair.src].min(headroom[pair.dst]);
        }
    }

    fn pair(&self, index: usize) -> Pair {
        Pair::new(index / self.num_endpoints, index % self.num_endpoints)
    }

    /// Draw `n` pairs according to `weights` (indexed by flat pair index).
    ///
    /// Self-pairs never receive an assignment regardless of their weight. Returns
    /// [Error::InfeasiblePair] if no non-self pair has positive weight.
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        weights: &[f64],
        n: usize,
    ) -> Result<Vec<Pair>, Error> {
        assert_eq!(weights.len(), self.target.len(), "weights are not aligned");
        let weights = weights.iter().enumerate().map(|(index, &weight)| {
            if self.pair(index).is_self() || !weight.is_finite() {
                0.0
            } else {
                weight.max(0.0)
            }
        });
        let index = WeightedIndex::new(weights).map_err(|err| {
            trace!(?err, "degenerate pair weights");
            Error::InfeasiblePair
        })?;
        Ok(index
            .sample_iter(rng)
            .take(n)
            .map(|index| self.pair(index))
            .collect())
    }
}
