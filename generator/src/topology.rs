//! Minimal network description: named endpoints and their link capacities.

use crate::{capacity::CapacityConfig, endpoints::EndpointSet, Error};

/// Endpoints with per-endpoint link capacity.
///
/// The aggregate capacity is the sum of the endpoint capacities.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    endpoints: EndpointSet,
    ep_capacities: Vec<f64>,
}

impl Topology {
    /// `num_eps` endpoints named `"0"` to `"{num_eps - 1}"`, each with `ep_capacity`.
    pub fn arbitrary(num_eps: usize, ep_capacity: f64) -> Result<Self, Error> {
        Self::new((0..num_eps).map(|i| i.to_string()), ep_capacity)
    }

    /// Named endpoints that all share `ep_capacity`.
    pub fn new<I, S>(names: I, ep_capacity: f64) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = EndpointSet::new(names)?;
        let capacity = Self::checked(ep_capacity)?;
        Ok(Self {
            ep_capacities: vec![capacity; endpoints.len()],
            endpoints,
        })
    }

    fn checked(capacity: f64) -> Result<f64, Error> {
        if capacity.is_finite() && capacity > 0.0 {
            Ok(capacity)
        } else {
            Err(Error::InvalidConfig(format!(
                "endpoint capacity must be finite and positive, got {capacity}"
            )))
        }
    }

    /// Override the capacity of the endpoint called `name`.
    pub fn set_capacity(&mut self, name: &str, capacity: f64) -> Result<(), Error> {
        let ep = self
            .endpoints
            .position(name)
            .ok_or_else(|| Error::InvalidEndpoints(format!("unknown endpoint: {name}")))?;
        self.ep_capacities[ep] = Self::checked(capacity)?;
        Ok(())
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Capacity of the endpoint at `ep`.
    pub fn ep_capacity(&self, ep: usize) -> f64 {
        self.ep_capacities[ep]
    }

    pub fn aggregate(&self) -> f64 {
        self.ep_capacities.iter().sum()
    }

    /// Capacity limits for a run targeting `load` of the network.
    pub fn capacity_config(&self, load: f64) -> Result<CapacityConfig, Error> {
        CapacityConfig::new(self.ep_capacities.clone(), self.aggregate(), load)
    }
}
