use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, Triangular, Uniform};

use crate::error::EngineError;
use crate::EngineResult;

/// Number of draws used to approximate a percentile for kinds without a closed-form inverse CDF.
pub const EMPIRICAL_PERCENTILE_DRAWS: usize = 10_000;

/// Draws per month used when previewing a stochastic distribution's band.
pub const PREVIEW_DRAWS_PER_MONTH: usize = 500;

/// A tagged probability distribution (or, for `Logistic`/`Linear`, a time-indexed
/// deterministic curve dressed up in the same interface).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "params")]
pub enum Distribution {
    #[serde(rename = "FIXED")]
    Fixed { value: f64 },
    #[serde(rename = "NORMAL")]
    Normal { mean: f64, std: f64 },
    #[serde(rename = "LOGNORMAL")]
    Lognormal { mean: f64, std: f64 },
    #[serde(rename = "UNIFORM")]
    Uniform { min: f64, max: f64 },
    #[serde(rename = "TRIANGULAR")]
    Triangular { min: f64, likely: f64, max: f64 },
    #[serde(rename = "LOGISTIC")]
    Logistic {
        midpoint: f64,
        steepness: f64,
        amplitude: f64,
    },
    #[serde(rename = "LINEAR")]
    Linear { rate: f64, amplitude: f64 },
}

/// A single point of a distribution preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PreviewPoint {
    Deterministic { month: u32, value: f64 },
    Stochastic {
        month: u32,
        mean: f64,
        p10: f64,
        p90: f64,
    },
}

impl Distribution {
    /// True for `Logistic`/`Linear`: their "sample" is a deterministic, time-indexed
    /// function rather than a draw from a random variable.
    pub fn is_time_dependent(&self) -> bool {
        matches!(self, Distribution::Logistic { .. } | Distribution::Linear { .. })
    }

    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Distribution::Fixed { value } => {
                if !value.is_finite() {
                    return Err(EngineError::InvalidInput {
                        field: "value".into(),
                        reason: "FIXED value must be finite".into(),
                    });
                }
            }
            Distribution::Normal { std, .. } => require_non_negative("std", *std)?,
            Distribution::Lognormal { std, .. } => require_non_negative("std", *std)?,
            Distribution::Uniform { min, max } => {
                if min > max {
                    return Err(EngineError::InvalidInput {
                        field: "min".into(),
                        reason: format!("UNIFORM min ({min}) must be <= max ({max})"),
                    });
                }
            }
            Distribution::Triangular { min, likely, max } => {
                if !(min <= likely && likely <= max) {
                    return Err(EngineError::InvalidInput {
                        field: "likely".into(),
                        reason: format!(
                            "TRIANGULAR requires min ({min}) <= likely ({likely}) <= max ({max})"
                        ),
                    });
                }
            }
            Distribution::Logistic { .. } | Distribution::Linear { .. } => {}
        }
        Ok(())
    }

    /// Deterministic "expected" value, as tabulated in the data model.
    pub fn deterministic(&self) -> f64 {
        match self {
            Distribution::Fixed { value } => *value,
            Distribution::Normal { mean, .. } => *mean,
            Distribution::Lognormal { mean, std } => (mean + std * std / 2.0).exp(),
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Triangular { min, likely, max } => (min + likely + max) / 3.0,
            Distribution::Logistic { .. } => self.logistic_increment(0),
            Distribution::Linear { rate, amplitude } => amplitude * rate,
        }
    }

    /// Draw a value. For time-dependent kinds, `month` selects the point on the
    /// curve; if omitted, `Logistic` returns 0 and `Linear` returns its constant.
    pub fn sample(&self, month: Option<u32>, rng: &mut impl Rng) -> f64 {
        match self {
            Distribution::Fixed { value } => *value,
            Distribution::Normal { mean, std } => {
                if *std == 0.0 {
                    *mean
                } else {
                    Normal::new(*mean, *std).map(|d| rng.sample(d)).unwrap_or(*mean)
                }
            }
            Distribution::Lognormal { mean, std } => {
                if *std == 0.0 {
                    mean.exp()
                } else {
                    Normal::new(*mean, *std)
                        .map(|d| rng.sample(d).exp())
                        .unwrap_or_else(|_| mean.exp())
                }
            }
            Distribution::Uniform { min, max } => {
                if min == max {
                    *min
                } else {
                    Uniform::new(*min, *max).map(|d| rng.sample(d)).unwrap_or(*min)
                }
            }
            Distribution::Triangular { min, likely, max } => {
                if min == max {
                    *min
                } else {
                    Triangular::new(*min, *max, *likely)
                        .map(|d| rng.sample(d))
                        .unwrap_or(*likely)
                }
            }
            Distribution::Logistic { .. } => self.logistic_increment(month.unwrap_or(0)),
            Distribution::Linear { rate, amplitude } => {
                let _ = month;
                amplitude * rate
            }
        }
    }

    /// `percentile(p)`: closed-form where cheap, empirical-by-sampling otherwise.
    pub fn percentile(&self, p: f64) -> EngineResult<f64> {
        if !(0.0..=1.0).contains(&p) {
            return Err(EngineError::InvalidInput {
                field: "p".into(),
                reason: format!("percentile must be within [0, 1], got {p}"),
            });
        }
        let value = match self {
            Distribution::Fixed { .. } | Distribution::Logistic { .. } | Distribution::Linear { .. } => {
                self.deterministic()
            }
            Distribution::Normal { mean, std } => {
                if *std == 0.0 {
                    *mean
                } else {
                    Normal::new(*mean, *std)
                        .map(|d| d.inverse_cdf(p))
                        .unwrap_or(*mean)
                }
            }
            _ => self.empirical_percentile(p),
        };
        Ok(value)
    }

    fn empirical_percentile(&self, p: f64) -> f64 {
        let mut rng = rand::thread_rng();
        let mut draws: Vec<f64> = (0..EMPIRICAL_PERCENTILE_DRAWS)
            .map(|_| self.sample(None, &mut rng))
            .collect();
        draws.sort_by(|a, b| a.partial_cmp(b).unwrap());
        percentile_sorted(&draws, p)
    }

    /// Lazy, finite, restartable preview over `[0, horizon)`.
    pub fn preview(
        &self,
        start_month: u32,
        end_month: Option<u32>,
        horizon: u32,
    ) -> Vec<PreviewPoint> {
        let mut rng = rand::thread_rng();
        (0..horizon)
            .map(|month| {
                let active = month >= start_month && end_month.map_or(true, |e| month <= e);
                if !active {
                    return PreviewPoint::Deterministic { month, value: 0.0 };
                }
                if self.is_stochastic() {
                    let mut draws: Vec<f64> = (0..PREVIEW_DRAWS_PER_MONTH)
                        .map(|_| self.sample(Some(month), &mut rng))
                        .collect();
                    draws.sort_by(|a, b| a.partial_cmp(b).unwrap());
                    let mean = draws.iter().sum::<f64>() / draws.len() as f64;
                    PreviewPoint::Stochastic {
                        month,
                        mean,
                        p10: percentile_sorted(&draws, 0.10),
                        p90: percentile_sorted(&draws, 0.90),
                    }
                } else {
                    PreviewPoint::Deterministic {
                        month,
                        value: self.sample(Some(month), &mut rng),
                    }
                }
            })
            .collect()
    }

    fn is_stochastic(&self) -> bool {
        !matches!(self, Distribution::Fixed { .. }) && !self.is_time_dependent()
    }

    /// Derivative of the logistic S-curve at month `m`: the per-month incremental
    /// adoption, not the cumulative level.
    fn logistic_increment(&self, m: u32) -> f64 {
        let Distribution::Logistic {
            midpoint,
            steepness,
            amplitude,
        } = self
        else {
            return 0.0;
        };
        let k = *steepness;
        let s = 1.0 / (1.0 + (-k * (m as f64 - midpoint)).exp());
        amplitude * k * s * (1.0 - s)
    }
}

fn require_non_negative(field: &str, value: f64) -> EngineResult<()> {
    if value < 0.0 {
        return Err(EngineError::InvalidInput {
            field: field.into(),
            reason: format!("{field} must be >= 0, got {value}"),
        });
    }
    Ok(())
}

/// Linear interpolation into an already-sorted sample array, matching the
/// Monte Carlo driver's aggregation method so the two agree within sampling noise.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant_everywhere() {
        let d = Distribution::Fixed { value: 42.0 };
        let mut rng = rand::thread_rng();
        assert_eq!(d.deterministic(), 42.0);
        assert_eq!(d.sample(None, &mut rng), 42.0);
        assert_eq!(d.percentile(0.1).unwrap(), 42.0);
        assert_eq!(d.percentile(0.9).unwrap(), 42.0);
    }

    #[test]
    fn normal_deterministic_is_mean() {
        let d = Distribution::Normal { mean: 10.0, std: 2.0 };
        assert_eq!(d.deterministic(), 10.0);
    }

    #[test]
    fn lognormal_deterministic_matches_formula() {
        let d = Distribution::Lognormal { mean: 0.0, std: 1.0 };
        let expected = (0.0_f64 + 0.5).exp();
        assert!((d.deterministic() - expected).abs() < 1e-9);
    }

    #[test]
    fn uniform_deterministic_is_midpoint() {
        let d = Distribution::Uniform { min: 2.0, max: 8.0 };
        assert_eq!(d.deterministic(), 5.0);
    }

    #[test]
    fn triangular_deterministic_is_average() {
        let d = Distribution::Triangular {
            min: 1.0,
            likely: 2.0,
            max: 9.0,
        };
        assert!((d.deterministic() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn percentile_monotonic_for_normal() {
        let d = Distribution::Normal { mean: 0.0, std: 1.0 };
        let p10 = d.percentile(0.10).unwrap();
        let p50 = d.percentile(0.50).unwrap();
        let p90 = d.percentile(0.90).unwrap();
        assert!(p10 <= p50 && p50 <= p90);
    }

    #[test]
    fn percentile_monotonic_for_uniform_empirical() {
        let d = Distribution::Uniform { min: 0.0, max: 100.0 };
        let p10 = d.percentile(0.10).unwrap();
        let p90 = d.percentile(0.90).unwrap();
        assert!(p10 < p90);
        assert!(p10 > 0.0 && p90 < 100.0);
    }

    #[test]
    fn percentile_out_of_range_is_configuration_error() {
        let d = Distribution::Fixed { value: 1.0 };
        assert!(d.percentile(1.5).is_err());
        assert!(d.percentile(-0.1).is_err());
    }

    #[test]
    fn logistic_sample_is_derivative_not_level() {
        let d = Distribution::Logistic {
            midpoint: 12.0,
            steepness: 0.5,
            amplitude: 1000.0,
        };
        let mut rng = rand::thread_rng();
        let far_before = d.sample(Some(0), &mut rng);
        let at_midpoint = d.sample(Some(12), &mut rng);
        let far_after = d.sample(Some(24), &mut rng);
        assert!(at_midpoint > far_before);
        assert!(at_midpoint > far_after);
    }

    #[test]
    fn logistic_percentile_ignores_randomness() {
        let d = Distribution::Logistic {
            midpoint: 6.0,
            steepness: 1.0,
            amplitude: 500.0,
        };
        assert_eq!(d.percentile(0.1).unwrap(), d.percentile(0.9).unwrap());
    }

    #[test]
    fn linear_sample_is_constant_across_months() {
        let d = Distribution::Linear { rate: 0.05, amplitude: 1000.0 };
        let mut rng = rand::thread_rng();
        assert_eq!(d.sample(Some(0), &mut rng), d.sample(Some(50), &mut rng));
    }

    #[test]
    fn validate_rejects_bad_uniform() {
        let d = Distribution::Uniform { min: 10.0, max: 1.0 };
        assert!(d.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_triangular() {
        let d = Distribution::Triangular {
            min: 5.0,
            likely: 1.0,
            max: 10.0,
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_std() {
        let d = Distribution::Normal { mean: 0.0, std: -1.0 };
        assert!(d.validate().is_err());
    }

    #[test]
    fn preview_is_zero_outside_window() {
        let d = Distribution::Fixed { value: 100.0 };
        let points = d.preview(2, Some(4), 8);
        match &points[0] {
            PreviewPoint::Deterministic { value, .. } => assert_eq!(*value, 0.0),
            _ => panic!("expected deterministic point"),
        }
        match &points[6] {
            PreviewPoint::Deterministic { value, .. } => assert_eq!(*value, 0.0),
            _ => panic!("expected deterministic point"),
        }
    }

    #[test]
    fn preview_stochastic_bands_are_ordered() {
        let d = Distribution::Uniform { min: 0.0, max: 10.0 };
        let points = d.preview(0, None, 3);
        for point in points {
            if let PreviewPoint::Stochastic { p10, p90, .. } = point {
                assert!(p10 <= p90);
            } else {
                panic!("expected stochastic point");
            }
        }
    }
}
