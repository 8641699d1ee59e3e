//! Ordered endpoint sets and the flattened space of ordered endpoint pairs.
//!
//! Endpoints are addressed by their position in the [EndpointSet]. An ordered pair `(src, dst)`
//! maps to the flat index `src * n + dst`, which is the index space that bulk sampling operates
//! over.

use crate::Error;
use std::collections::HashMap;

/// An ordered (source, destination) combination of endpoint positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pair {
    pub src: usize,
    pub dst: usize,
}

impl Pair {
    pub const fn new(src: usize, dst: usize) -> Self {
        Self { src, dst }
    }

    /// Returns true if the pair connects an endpoint to itself.
    pub const fn is_self(&self) -> bool {
        self.src == self.dst
    }
}

/// Ordered, unique collection of endpoint names.
///
/// The set is immutable once built and always holds at least two endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSet {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl EndpointSet {
    /// Build a set from `names`, preserving their order.
    pub fn new<I, S>(names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() < 2 {
            return Err(Error::InvalidEndpoints(format!(
                "at least 2 endpoints required, got {}",
                names.len()
            )));
        }
        let mut positions = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if positions.insert(name.clone(), idx).is_some() {
                return Err(Error::InvalidEndpoints(format!("duplicate endpoint: {name}")));
            }
        }
        Ok(Self { names, positions })
    }

    /// Number of endpoints in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false (a valid set holds at least two endpoints).
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the endpoint at `position`.
    pub fn name(&self, position: usize) -> &str {
        &self.names[position]
    }

    /// Position of the endpoint called `name`, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Iterate over endpoint names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Size of the flattened ordered-pair space (including self-pairs).
    pub fn num_pairs(&self) -> usize {
        self.names.len() * self.names.len()
    }

    /// Flat index of `pair`.
    pub fn pair_index(&self, pair: Pair) -> usize {
        pair.src * self.names.len() + pair.dst
    }

    /// Pair stored at flat `index`.
    pub fn pair(&self, index: usize) -> Pair {
        let n = self.names.len();
        Pair::new(index / n, index % n)
    }

    /// Resolve a pair of endpoint names.
    pub fn resolve(&self, src: &str, dst: &str) -> Result<Pair, Error> {
        let lookup = |name: &str| {
            self.position(name)
                .ok_or_else(|| Error::InvalidEndpoints(format!("unknown endpoint: {name}")))
        };
        Ok(Pair::new(lookup(src)?, lookup(dst)?))
    }

    /// Iterate over every ordered pair with distinct endpoints.
    pub fn non_self_pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        let n = self.names.len();
        (0..n)
            .flat_map(move |src| (0..n).map(move |dst| Pair::new(src, dst)))
            .filter(|pair| !pair.is_self())
    }
}
