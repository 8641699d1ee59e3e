//! Target distributions over ordered endpoint pairs.

use crate::{
    distribution::PROBABILITY_TOLERANCE,
    endpoints::{EndpointSet, Pair},
    Error,
};
use rand::{seq::index::sample, Rng};
use serde::{Deserialize, Serialize};

/// Probability assigned to one ordered pair of named endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairMass {
    pub src: String,
    pub dst: String,
    pub probability: f64,
}

/// Configured shape of the target node-pair distribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDistSpec {
    /// Every non-self pair is equally likely.
    Uniform,
    /// A set of skewed endpoints takes given shares of all traffic; the remaining share is
    /// spread evenly over the other endpoints.
    ///
    /// Skewed endpoints are named in `skewed_nodes`, or, when that list is empty,
    /// `num_skewed_nodes` endpoints are picked at random.
    Multimodal {
        #[serde(default)]
        skewed_nodes: Vec<String>,
        num_skewed_nodes: Option<usize>,
        skewed_node_probs: Vec<f64>,
    },
    /// Explicit probability mass per pair.
    Explicit { pairs: Vec<PairMass> },
}

impl NodeDistSpec {
    /// Resolve this description against `endpoints`.
    ///
    /// `rng` is only consumed when skewed endpoints have to be picked at random.
    pub fn build<R: Rng + ?Sized>(
        &self,
        endpoints: &EndpointSet,
        rng: &mut R,
    ) -> Result<NodeDist, Error> {
        match self {
            Self::Uniform => Ok(NodeDist::uniform(endpoints)),
            Self::Multimodal {
                skewed_nodes,
                num_skewed_nodes,
                skewed_node_probs,
            } => {
                let skewed = if skewed_nodes.is_empty() {
                    let count = num_skewed_nodes.unwrap_or(skewed_node_probs.len());
                    if count > endpoints.len() {
                        return Err(Error::InvalidDistribution(format!(
                            "{count} skewed nodes requested from {} endpoints",
                            endpoints.len()
                        )));
                    }
                    let mut picked = sample(rng, endpoints.len(), count).into_vec();
                    picked.sort_unstable();
                    picked
                } else {
                    skewed_nodes
                        .iter()
                        .map(|name| {
                            endpoints.position(name).ok_or_else(|| {
                                Error::InvalidEndpoints(format!("unknown endpoint: {name}"))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?
                };
                NodeDist::multimodal(endpoints, &skewed, skewed_node_probs)
            }
            Self::Explicit { pairs } => {
                let masses = pairs
                    .iter()
                    .map(|mass| Ok((endpoints.resolve(&mass.src, &mass.dst)?, mass.probability)))
                    .collect::<Result<Vec<_>, Error>>()?;
                NodeDist::from_masses(endpoints, masses)
            }
        }
    }
}

/// Probability mass over the flattened ordered-pair space of an [EndpointSet].
#[derive(Clone, Debug, PartialEq)]
pub struct NodeDist {
    num_endpoints: usize,
    mass: Vec<f64>,
}

impl NodeDist {
    /// Equal mass on every non-self pair.
    pub fn uniform(endpoints: &EndpointSet) -> Self {
        let n = endpoints.len();
        let share = 1.0 / (n * (n - 1)) as f64;
        let mut mass = vec![0.0; endpoints.num_pairs()];
        for pair in endpoints.non_self_pairs() {
            mass[endpoints.pair_index(pair)] = share;
        }
        Self {
            num_endpoints: n,
            mass,
        }
    }

    /// Mass derived from per-endpoint traffic shares.
    ///
    /// Endpoint `skewed[i]` receives share `probs[i]`; every other endpoint receives an equal part
    /// of the remainder. A pair's mass is proportional to the product of its endpoints' shares.
    pub fn multimodal(
        endpoints: &EndpointSet,
        skewed: &[usize],
        probs: &[f64],
    ) -> Result<Self, Error> {
        let n = endpoints.len();
        if skewed.len() != probs.len() {
            return Err(Error::InvalidDistribution(format!(
                "{} skewed nodes but {} skewed probabilities",
                skewed.len(),
                probs.len()
            )));
        }
        let mut shares = vec![None; n];
        let mut skewed_total = 0.0;
        for (&node, &prob) in skewed.iter().zip(probs) {
            if !(prob.is_finite() && (0.0..=1.0).contains(&prob)) {
                return Err(Error::InvalidDistribution(format!(
                    "skewed probability must be in [0, 1], got {prob}"
                )));
            }
            if node >= n || shares[node].replace(prob).is_some() {
                return Err(Error::InvalidDistribution(format!(
                    "skewed node {node} is invalid or repeated"
                )));
            }
            skewed_total += prob;
        }
        if skewed_total > 1.0 + PROBABILITY_TOLERANCE {
            return Err(Error::InvalidDistribution(format!(
                "skewed probabilities sum to {skewed_total}, which exceeds 1"
            )));
        }
        let others = n - skewed.len();
        let rest = (1.0 - skewed_total).max(0.0);
        if others == 0 && rest > PROBABILITY_TOLERANCE {
            return Err(Error::InvalidDistribution(format!(
                "all endpoints are skewed but their probabilities sum to {skewed_total}"
            )));
        }
        let shares: Vec<f64> = shares
            .into_iter()
            .map(|share| share.unwrap_or(rest / others.max(1) as f64))
            .collect();

        let masses = endpoints
            .non_self_pairs()
            .map(|pair| (pair, shares[pair.src] * shares[pair.dst]));
        Self::normalized(endpoints, masses)
    }

    /// Explicit masses that must sum to 1 (within tolerance).
    ///
    /// Repeated pairs accumulate. Self-pairs are kept here and excluded at allocation time.
    pub fn from_masses<I>(endpoints: &EndpointSet, masses: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (Pair, f64)>,
    {
        let mut mass = vec![0.0; endpoints.num_pairs()];
        let mut total = 0.0;
        for (pair, probability) in masses {
            if !(probability.is_finite() && probability >= 0.0) {
                return Err(Error::InvalidDistribution(format!(
                    "pair probabilities must be finite and non-negative, got {probability}"
                )));
            }
            mass[endpoints.pair_index(pair)] += probability;
            total += probability;
        }
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(Error::InvalidDistribution(format!(
                "pair probabilities sum to {total}, expected 1"
            )));
        }
        Ok(Self {
            num_endpoints: endpoints.len(),
            mass,
        })
    }

    /// Normalize arbitrary non-negative weights into a distribution.
    fn normalized<I>(endpoints: &EndpointSet, weights: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (Pair, f64)>,
    {
        let mut mass = vec![0.0; endpoints.num_pairs()];
        for (pair, weight) in weights {
            mass[endpoints.pair_index(pair)] += weight;
        }
        let total: f64 = mass.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::InvalidDistribution(
                "node distribution has no mass".into(),
            ));
        }
        mass.iter_mut().for_each(|m| *m /= total);
        Ok(Self {
            num_endpoints: endpoints.len(),
            mass,
        })
    }

    /// Number of endpoints the distribution was built for.
    pub fn num_endpoints(&self) -> usize {
        self.num_endpoints
    }

    /// Dense mass indexed by flat pair index.
    pub fn mass(&self) -> &[f64] {
        &self.mass
    }

    /// Number of pairs with non-zero mass.
    pub fn support(&self) -> usize {
        self.mass.iter().filter(|&&m| m > 0.0).count()
    }
}
