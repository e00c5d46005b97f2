use std::collections::HashMap;
use std::time::Instant;

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use serde_json::json;

use crate::cashflow::{build_all, SamplingPolicy, ESCALATION_RATE_PARAM};
use crate::distribution::percentile_sorted;
use crate::model::{CalculationMode, FinancialModel};
use crate::types::{timed_metadata, ComputationOutput};
use crate::valuation::{irr, npv, payback_period, terminal_value_pv};
use crate::EngineResult;

/// Driver-level defaults for a Monte Carlo run, following the rest of the
/// codebase's convention of per-call configuration structs.
#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub n_simulations: usize,
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        MonteCarloConfig { n_simulations: 10_000, seed: None }
    }
}

/// Summary statistics over a sample array.
#[derive(Debug, Clone, Serialize)]
pub struct SampleStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
}

fn compute_stats(samples: &[f64]) -> SampleStats {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    SampleStats {
        mean,
        median: percentile_sorted(&sorted, 0.50),
        std: variance.sqrt(),
        p10: percentile_sorted(&sorted, 0.10),
        p25: percentile_sorted(&sorted, 0.25),
        p75: percentile_sorted(&sorted, 0.75),
        p90: percentile_sorted(&sorted, 0.90),
    }
}

/// Mean/median/P10/P90 of one month's cashflow across all simulations.
#[derive(Debug, Clone, Serialize)]
pub struct MonthSummary {
    pub month: u32,
    pub mean: f64,
    pub median: f64,
    pub p10: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloNpvResult {
    pub npv_stats: SampleStats,
    pub npv_samples: Vec<f64>,
    pub payback_stats: Option<SampleStats>,
    pub cashflow_by_month: Vec<MonthSummary>,
    pub discount_rate_clamped_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloIrrResult {
    pub irr_stats: Option<SampleStats>,
    pub irr_samples: Vec<f64>,
    pub irr_failed_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MonteCarloResult {
    Npv(MonteCarloNpvResult),
    Irr(MonteCarloIrrResult),
}

/// Run `n_simulations` independent stochastic passes. Each simulation rebuilds
/// every stream's cashflow from scratch with `SamplingMode::Stochastic`; no
/// iteration observes another's draws.
pub fn run_monte_carlo(
    model: &FinancialModel,
    config: &MonteCarloConfig,
) -> EngineResult<ComputationOutput<MonteCarloResult>> {
    let started = Instant::now();
    model.validate()?;
    let settings = &model.settings;
    let order = model.get_execution_order();
    let forecast_months = settings.forecast_months as usize;

    let mut rng: StdRng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut warnings = Vec::new();
    let mut clamp_count = 0usize;

    let result = match settings.calculation_mode {
        CalculationMode::Npv => {
            let mut npv_samples = Vec::with_capacity(config.n_simulations);
            let mut payback_samples = Vec::new();
            let mut month_samples: Vec<Vec<f64>> = vec![Vec::with_capacity(config.n_simulations); forecast_months];

            for _ in 0..config.n_simulations {
                let mut discount_rate = settings.discount_rate.sample(None, &mut rng);
                if discount_rate <= settings.terminal_growth_rate {
                    discount_rate = settings.terminal_growth_rate + 0.001;
                    clamp_count += 1;
                }

                let mut policy = SamplingPolicy::stochastic();
                if let Some(escalation) = &settings.escalation_rate {
                    let r = escalation.sample(None, &mut rng);
                    policy = policy.with_override(ESCALATION_RATE_PARAM, r);
                }

                let (aggregate, per_stream_final) = build_all(model, &order, &policy, &mut rng)?;

                let npv_value = npv(&aggregate, discount_rate);
                let mut terminal_value = 0.0;
                for (stream_id, c_final) in &per_stream_final {
                    let stream = model.get_stream(stream_id).expect("stream exists");
                    if stream.is_perpetual(settings.forecast_months) {
                        terminal_value += terminal_value_pv(
                            *c_final,
                            discount_rate,
                            settings.terminal_growth_rate,
                            settings.forecast_months,
                        );
                    }
                }
                npv_samples.push(npv_value + terminal_value);
                if let Some(p) = payback_period(&aggregate) {
                    payback_samples.push(p);
                }
                for (m, v) in aggregate.iter().enumerate() {
                    month_samples[m].push(*v);
                }
            }

            if clamp_count > 0 {
                warnings.push(format!(
                    "discount rate clamped to terminal_growth_rate + 0.001 in {clamp_count} of {} simulations",
                    config.n_simulations
                ));
            }

            let cashflow_by_month = month_samples
                .iter()
                .enumerate()
                .map(|(m, samples)| {
                    let stats = compute_stats(samples);
                    MonthSummary {
                        month: m as u32,
                        mean: stats.mean,
                        median: stats.median,
                        p10: stats.p10,
                        p90: stats.p90,
                    }
                })
                .collect();

            MonteCarloResult::Npv(MonteCarloNpvResult {
                npv_stats: compute_stats(&npv_samples),
                npv_samples,
                payback_stats: if payback_samples.is_empty() { None } else { Some(compute_stats(&payback_samples)) },
                cashflow_by_month,
                discount_rate_clamped_count: clamp_count,
            })
        }
        CalculationMode::Irr => {
            let mut irr_samples = Vec::with_capacity(config.n_simulations);
            let mut irr_failed_count = 0usize;

            for _ in 0..config.n_simulations {
                let mut policy = SamplingPolicy::stochastic();
                if let Some(escalation) = &settings.escalation_rate {
                    let r = escalation.sample(None, &mut rng);
                    policy = policy.with_override(ESCALATION_RATE_PARAM, r);
                }

                let (aggregate, _) = build_all(model, &order, &policy, &mut rng)?;
                let outcome = irr(&aggregate);
                match outcome.irr {
                    Some(rate) => irr_samples.push(rate),
                    None => irr_failed_count += 1,
                }
            }

            if irr_failed_count > 0 {
                warnings.push(format!(
                    "IRR could not be found in {irr_failed_count} of {} simulations",
                    config.n_simulations
                ));
            }

            MonteCarloResult::Irr(MonteCarloIrrResult {
                irr_stats: if irr_samples.is_empty() { None } else { Some(compute_stats(&irr_samples)) },
                irr_samples,
                irr_failed_count,
            })
        }
    };

    let assumptions = json!({
        "n_simulations": config.n_simulations,
        "seed": config.seed,
        "calculation_mode": match settings.calculation_mode {
            CalculationMode::Npv => "NPV",
            CalculationMode::Irr => "IRR",
        },
    });

    Ok(timed_metadata("monte_carlo_driver_v1", &assumptions, warnings, started, result))
}
