//! Draw samples from configured distributions.
//!
//! A [DistributionSpec] is either a named law from a closed set of [Family]s or an explicit
//! table of `value -> probability` masses. [Sampler::new] validates the description once so that
//! drawing never fails afterwards.
//!
//! Every draw consumes the caller-provided random stream. Callers own a single seeded stream
//! per run and pass it to every sampling call, so a run is reproducible from one seed.

use crate::Error;
use rand::{
    distributions::{Distribution, Uniform, WeightedIndex},
    Rng,
};
use rand_distr::{Exp, Gamma, LogNormal, Normal, Pareto, Weibull};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Allowed deviation of a probability table's total mass from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Supported parametric families.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Family {
    /// Always `value`.
    Constant { value: f64 },
    /// Uniform on `[low, high)`.
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std_dev: f64 },
    /// Log-normal with underlying normal `N(mu, sigma^2)`.
    Lognormal { mu: f64, sigma: f64 },
    /// Exponential with mean `scale`.
    Exponential { scale: f64 },
    /// Weibull with shape `alpha` and scale `lambda`.
    Weibull { alpha: f64, lambda: f64 },
    Pareto { shape: f64, scale: f64 },
    Gamma { shape: f64, scale: f64 },
}

/// A single entry of an explicit probability table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mass {
    pub value: f64,
    pub probability: f64,
}

/// Configured distribution of a non-negative quantity (flow size, inter-arrival time).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionSpec {
    /// A parametric law with optional clipping and quantization.
    Named {
        family: Family,
        /// Round every draw to the nearest multiple of this unit.
        round_to_nearest: Option<f64>,
        min_val: Option<f64>,
        max_val: Option<f64>,
    },
    /// Categorical draw over explicit values.
    Discrete { masses: Vec<Mass> },
}

impl DistributionSpec {
    /// A law that always yields `value`.
    pub fn constant(value: f64) -> Self {
        Self::Discrete {
            masses: vec![Mass {
                value,
                probability: 1.0,
            }],
        }
    }

    /// A parametric law without clipping or quantization.
    pub fn named(family: Family) -> Self {
        Self::Named {
            family,
            round_to_nearest: None,
            min_val: None,
            max_val: None,
        }
    }
}

/// Validated, ready-to-sample form of a [Family].
#[derive(Clone, Debug)]
enum Law {
    Constant(f64),
    Uniform(Uniform<f64>),
    Normal(Normal<f64>),
    Lognormal(LogNormal<f64>),
    Exponential(Exp<f64>),
    Weibull(Weibull<f64>),
    Pareto(Pareto<f64>),
    Gamma(Gamma<f64>),
}

impl Law {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Uniform(law) => law.sample(rng),
            Self::Normal(law) => law.sample(rng),
            Self::Lognormal(law) => law.sample(rng),
            Self::Exponential(law) => law.sample(rng),
            Self::Weibull(law) => law.sample(rng),
            Self::Pareto(law) => law.sample(rng),
            Self::Gamma(law) => law.sample(rng),
        }
    }
}

/// Post-processing applied to every named draw.
#[derive(Clone, Copy, Debug)]
struct Shaping {
    round_to_nearest: Option<f64>,
    min_val: Option<f64>,
    max_val: Option<f64>,
}

impl Shaping {
    fn apply(&self, mut value: f64) -> f64 {
        if let Some(min) = self.min_val {
            value = value.max(min);
        }
        if let Some(max) = self.max_val {
            value = value.min(max);
        }
        if let Some(unit) = self.round_to_nearest {
            value = (value / unit).round() * unit;
        }
        value.max(0.0)
    }
}

/// Validated source of draws for a [Sampler].
#[derive(Clone, Debug)]
enum Source {
    Named { law: Law, shaping: Shaping },
    Table {
        values: Vec<f64>,
        index: WeightedIndex<f64>,
    },
}

/// Draws non-negative samples consistent with a [DistributionSpec].
#[derive(Clone, Debug)]
pub struct Sampler {
    source: Source,
    mean: Option<f64>,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidDistribution(msg.into())
}

fn require_positive(name: &str, value: f64) -> Result<f64, Error> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(format!("{name} must be finite and positive, got {value}")))
    }
}

fn require_finite(name: &str, value: f64) -> Result<f64, Error> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(format!("{name} must be finite, got {value}")))
    }
}

impl Sampler {
    /// Validate `spec` and build a sampler for it.
    pub fn new(spec: &DistributionSpec) -> Result<Self, Error> {
        match spec {
            DistributionSpec::Named {
                family,
                round_to_nearest,
                min_val,
                max_val,
            } => {
                let shaping = Shaping {
                    round_to_nearest: round_to_nearest
                        .map(|unit| require_positive("round_to_nearest", unit))
                        .transpose()?,
                    min_val: min_val.map(|v| require_finite("min_val", v)).transpose()?,
                    max_val: max_val.map(|v| require_finite("max_val", v)).transpose()?,
                };
                if let (Some(min), Some(max)) = (shaping.min_val, shaping.max_val) {
                    if min > max {
                        return Err(invalid(format!("min_val {min} exceeds max_val {max}")));
                    }
                }
                let (law, mean) = Self::law(family)?;
                let mean = mean.map(|mean| {
                    let lower = shaping.min_val.unwrap_or(f64::MIN);
                    let upper = shaping.max_val.unwrap_or(f64::MAX);
                    mean.clamp(lower, upper).max(0.0)
                });
                Ok(Self {
                    source: Source::Named { law, shaping },
                    mean,
                })
            }
            DistributionSpec::Discrete { masses } => Self::table(masses),
        }
    }

    fn law(family: &Family) -> Result<(Law, Option<f64>), Error> {
        let built = match *family {
            Family::Constant { value } => {
                let value = require_finite("value", value)?;
                (Law::Constant(value), Some(value))
            }
            Family::Uniform { low, high } => {
                require_finite("low", low)?;
                require_finite("high", high)?;
                if low >= high {
                    return Err(invalid(format!("uniform requires low < high ({low} >= {high})")));
                }
                if !(high - low).is_finite() {
                    return Err(invalid(format!("uniform range [{low}, {high}) overflows")));
                }
                (Law::Uniform(Uniform::new(low, high)), Some((low + high) / 2.0))
            }
            Family::Normal { mean, std_dev } => {
                require_finite("mean", mean)?;
                if !(std_dev.is_finite() && std_dev >= 0.0) {
                    return Err(invalid(format!("std_dev must be non-negative, got {std_dev}")));
                }
                let law = Normal::new(mean, std_dev).map_err(|e| invalid(e.to_string()))?;
                (Law::Normal(law), Some(mean))
            }
            Family::Lognormal { mu, sigma } => {
                require_finite("mu", mu)?;
                if !(sigma.is_finite() && sigma >= 0.0) {
                    return Err(invalid(format!("sigma must be non-negative, got {sigma}")));
                }
                let law = LogNormal::new(mu, sigma).map_err(|e| invalid(e.to_string()))?;
                (Law::Lognormal(law), Some((mu + sigma * sigma / 2.0).exp()))
            }
            Family::Exponential { scale } => {
                let scale = require_positive("scale", scale)?;
                let law = Exp::new(1.0 / scale).map_err(|e| invalid(e.to_string()))?;
                (Law::Exponential(law), Some(scale))
            }
            Family::Weibull { alpha, lambda } => {
                let alpha = require_positive("alpha", alpha)?;
                let lambda = require_positive("lambda", lambda)?;
                let law = Weibull::new(lambda, alpha).map_err(|e| invalid(e.to_string()))?;
                (Law::Weibull(law), Some(lambda * gamma(1.0 + 1.0 / alpha)))
            }
            Family::Pareto { shape, scale } => {
                let shape = require_positive("shape", shape)?;
                let scale = require_positive("scale", scale)?;
                let law = Pareto::new(scale, shape).map_err(|e| invalid(e.to_string()))?;
                let mean = (shape > 1.0).then(|| shape * scale / (shape - 1.0));
                (Law::Pareto(law), mean)
            }
            Family::Gamma { shape, scale } => {
                let shape = require_positive("shape", shape)?;
                let scale = require_positive("scale", scale)?;
                let law = Gamma::new(shape, scale).map_err(|e| invalid(e.to_string()))?;
                (Law::Gamma(law), Some(shape * scale))
            }
        };
        Ok(built)
    }

    fn table(masses: &[Mass]) -> Result<Self, Error> {
        if masses.is_empty() {
            return Err(invalid("probability table is empty"));
        }
        let mut total = 0.0;
        for mass in masses {
            if !(mass.value.is_finite() && mass.value >= 0.0) {
                return Err(invalid(format!(
                    "table values must be finite and non-negative, got {}",
                    mass.value
                )));
            }
            if !(mass.probability.is_finite() && mass.probability >= 0.0) {
                return Err(invalid(format!(
                    "probabilities must be finite and non-negative, got {}",
                    mass.probability
                )));
            }
            total += mass.probability;
        }
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(invalid(format!("probabilities sum to {total}, expected 1")));
        }
        let values: Vec<f64> = masses.iter().map(|mass| mass.value).collect();
        let index = WeightedIndex::new(masses.iter().map(|mass| mass.probability))
            .map_err(|e| invalid(e.to_string()))?;
        let mean = masses.iter().map(|m| m.value * m.probability).sum::<f64>() / total;
        Ok(Self {
            source: Source::Table { values, index },
            mean: Some(mean),
        })
    }

    /// Draw a single sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.source {
            Source::Named { law, shaping } => shaping.apply(law.sample(rng)),
            Source::Table { values, index } => values[index.sample(rng)],
        }
    }

    /// Draw `n` independent samples.
    pub fn sample_n<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.sample(rng)).collect()
    }

    /// Expected value of a draw, if finite.
    ///
    /// For clipped named laws this is the unclipped mean clamped into the clipping window, which
    /// is an estimate rather than the exact mean.
    pub fn mean(&self) -> Option<f64> {
        self.mean
    }
}

/// Gamma function via the Lanczos approximation (g = 7, n = 9).
fn gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula
        return PI / ((PI * x).sin() * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let t = x + G + 0.5;
    let mut sum = COEFFICIENTS[0];
    for (i, coefficient) in COEFFICIENTS.iter().enumerate().skip(1) {
        sum += coefficient / (x + i as f64);
    }
    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn table(entries: &[(f64, f64)]) -> DistributionSpec {
        DistributionSpec::Discrete {
            masses: entries
                .iter()
                .map(|&(value, probability)| Mass { value, probability })
                .collect(),
        }
    }

    #[test]
    fn test_table_must_sum_to_one() {
        let err = Sampler::new(&table(&[(1.0, 0.5), (2.0, 0.4)])).unwrap_err();
        assert!(matches!(err, Error::InvalidDistribution(_)));

        // Within tolerance
        Sampler::new(&table(&[(1.0, 0.5), (2.0, 0.5 + 1e-9)])).unwrap();
    }

    #[test]
    fn test_table_rejects_bad_entries() {
        assert!(Sampler::new(&table(&[])).is_err());
        assert!(Sampler::new(&table(&[(1.0, 1.5), (2.0, -0.5)])).is_err());
        assert!(Sampler::new(&table(&[(-1.0, 1.0)])).is_err());
        assert!(Sampler::new(&table(&[(f64::NAN, 1.0)])).is_err());
    }

    #[test]
    fn test_named_rejects_out_of_domain() {
        let cases = [
            Family::Exponential { scale: -1.0 },
            Family::Exponential { scale: 0.0 },
            Family::Uniform {
                low: 2.0,
                high: 1.0,
            },
            Family::Uniform {
                low: -1e308,
                high: 1e308,
            },
            Family::Normal {
                mean: 0.0,
                std_dev: -1.0,
            },
            Family::Lognormal {
                mu: 0.0,
                sigma: f64::INFINITY,
            },
            Family::Weibull {
                alpha: 0.0,
                lambda: 1.0,
            },
            Family::Pareto {
                shape: 1.0,
                scale: -2.0,
            },
            Family::Gamma {
                shape: -1.0,
                scale: 1.0,
            },
        ];
        for family in cases {
            let err = Sampler::new(&DistributionSpec::named(family)).unwrap_err();
            assert!(matches!(err, Error::InvalidDistribution(_)), "{family:?}");
        }
    }

    #[test]
    fn test_shaping_rejects_inverted_window() {
        let spec = DistributionSpec::Named {
            family: Family::Constant { value: 1.0 },
            round_to_nearest: None,
            min_val: Some(5.0),
            max_val: Some(1.0),
        };
        assert!(Sampler::new(&spec).is_err());
    }

    #[test]
    fn test_table_frequencies() {
        let sampler = Sampler::new(&table(&[(10.0, 0.25), (20.0, 0.75)])).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let samples = sampler.sample_n(&mut rng, 20_000);
        let tens = samples.iter().filter(|&&v| v == 10.0).count() as f64;
        assert!((tens / 20_000.0 - 0.25).abs() < 0.02);
        assert!(samples.iter().all(|&v| v == 10.0 || v == 20.0));
        assert_eq!(sampler.mean(), Some(17.5));
    }

    #[test]
    fn test_quantization_and_clipping() {
        let spec = DistributionSpec::Named {
            family: Family::Weibull {
                alpha: 4.8,
                lambda: 2100.0,
            },
            round_to_nearest: Some(1000.0),
            min_val: Some(1000.0),
            max_val: Some(3000.0),
        };
        let sampler = Sampler::new(&spec).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for value in sampler.sample_n(&mut rng, 1_000) {
            assert_eq!(value % 1000.0, 0.0);
            assert!((1000.0..=3000.0).contains(&value));
        }
    }

    #[test]
    fn test_negative_draws_clamped() {
        let spec = DistributionSpec::named(Family::Normal {
            mean: 0.0,
            std_dev: 10.0,
        });
        let sampler = Sampler::new(&spec).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(sampler.sample_n(&mut rng, 1_000).iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_same_seed_same_samples() {
        let spec = DistributionSpec::named(Family::Exponential { scale: 3.0 });
        let sampler = Sampler::new(&spec).unwrap();
        let a = sampler.sample_n(&mut StdRng::seed_from_u64(42), 64);
        let b = sampler.sample_n(&mut StdRng::seed_from_u64(42), 64);
        assert_eq!(a, b);

        let mut rng = StdRng::seed_from_u64(42);
        let c: Vec<f64> = (0..64).map(|_| sampler.sample(&mut rng)).collect();
        assert_eq!(a, c);
    }

    #[test]
    fn test_means() {
        let mean = |family| Sampler::new(&DistributionSpec::named(family)).unwrap().mean();
        assert_eq!(mean(Family::Exponential { scale: 3.0 }), Some(3.0));
        assert_eq!(
            mean(Family::Gamma {
                shape: 2.0,
                scale: 1.5
            }),
            Some(3.0)
        );
        assert_eq!(
            mean(Family::Pareto {
                shape: 1.0,
                scale: 1.0
            }),
            None
        );
        // Weibull with shape 1 is exponential with mean `lambda`
        let weibull = mean(Family::Weibull {
            alpha: 1.0,
            lambda: 2.0,
        })
        .unwrap();
        assert!((weibull - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_gamma_function() {
        assert!((gamma(1.0) - 1.0).abs() < 1e-12);
        assert!((gamma(5.0) - 24.0).abs() < 1e-9);
        assert!((gamma(0.5) - PI.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = "
kind: named
family:
  name: weibull
  alpha: 4.8
  lambda: 2100
round_to_nearest: 1000
";
        let spec: DistributionSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            spec,
            DistributionSpec::Named {
                family: Family::Weibull {
                    alpha: 4.8,
                    lambda: 2100.0
                },
                round_to_nearest: Some(1000.0),
                min_val: None,
                max_val: None,
            }
        );

        let yaml = "
kind: discrete
masses:
  - value: 0.125
    probability: 1.0
";
        let spec: DistributionSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, DistributionSpec::constant(0.125));
    }
}
