use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::cashflow::{build_all, build_cashflows, SamplingPolicy, DISCOUNT_RATE_PARAM};
use crate::model::{CalculationMode, FinancialModel};
use crate::types::{timed_metadata, ComputationOutput};
use crate::valuation::{irr, npv, payback_period, terminal_value_pv};
use crate::EngineResult;

/// One stream's cashflow vector from a single pass.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCashflow {
    pub stream_id: String,
    pub cashflows: Vec<f64>,
}

/// A single deterministic pass: expected-value cashflows plus the valuation
/// derived from them. In IRR mode, `terminal_value`/`discount_rate` are null
/// and `npv` is reported as 0, matching the mode's contract.
#[derive(Debug, Clone, Serialize)]
pub struct DeterministicResult {
    pub per_stream: Vec<StreamCashflow>,
    pub aggregate_cashflows: Vec<f64>,
    pub npv: f64,
    pub irr: Option<f64>,
    pub irr_error: Option<String>,
    pub terminal_value: Option<f64>,
    pub discount_rate: Option<f64>,
    pub payback: Option<f64>,
}

/// Run the deterministic driver: every distribution resolves to its expected
/// value, streams are evaluated in topological order, and valuation follows
/// from the aggregate cashflow vector.
pub fn run_deterministic(model: &FinancialModel) -> EngineResult<ComputationOutput<DeterministicResult>> {
    let started = Instant::now();
    model.validate()?;
    let settings = &model.settings;
    let order = model.get_execution_order();
    let mut rng = rand::thread_rng();
    let mut by_id: HashMap<String, Vec<f64>> = HashMap::with_capacity(order.len());
    let mut per_stream = Vec::with_capacity(order.len());

    for id in &order {
        let stream = model
            .get_stream(id)
            .expect("execution order only contains ids present in the model");
        let parent_cf = stream
            .parent_stream_id
            .as_ref()
            .and_then(|p| by_id.get(p).map(|v| v.as_slice()));
        let cf = build_cashflows(stream, &SamplingPolicy::deterministic(), parent_cf, settings, &mut rng)?;
        by_id.insert(id.clone(), cf.clone());
        per_stream.push(StreamCashflow {
            stream_id: id.clone(),
            cashflows: cf,
        });
    }

    let aggregate = aggregate_cashflows(&per_stream, settings.forecast_months);

    let result = match settings.calculation_mode {
        CalculationMode::Npv => {
            let discount_rate = settings.discount_rate.deterministic();
            let npv_value = npv(&aggregate, discount_rate);
            let mut terminal_value = 0.0;
            for sc in &per_stream {
                let stream = model.get_stream(&sc.stream_id).expect("stream exists");
                if stream.is_perpetual(settings.forecast_months) {
                    let c_final = sc.cashflows.last().copied().unwrap_or(0.0);
                    terminal_value += terminal_value_pv(
                        c_final,
                        discount_rate,
                        settings.terminal_growth_rate,
                        settings.forecast_months,
                    );
                }
            }
            let irr_outcome = irr(&aggregate);
            DeterministicResult {
                per_stream,
                aggregate_cashflows: aggregate.clone(),
                npv: npv_value + terminal_value,
                irr: irr_outcome.irr,
                irr_error: irr_outcome.error,
                terminal_value: Some(terminal_value),
                discount_rate: Some(discount_rate),
                payback: payback_period(&aggregate),
            }
        }
        CalculationMode::Irr => {
            let irr_outcome = irr(&aggregate);
            DeterministicResult {
                per_stream,
                aggregate_cashflows: aggregate.clone(),
                npv: 0.0,
                irr: irr_outcome.irr,
                irr_error: irr_outcome.error,
                terminal_value: None,
                discount_rate: None,
                payback: None,
            }
        }
    };

    let mut warnings = Vec::new();
    if let Some(reason) = &result.irr_error {
        warnings.push(format!("IRR not found: {reason}"));
    }

    let assumptions = json!({
        "forecast_months": settings.forecast_months,
        "calculation_mode": match settings.calculation_mode {
            CalculationMode::Npv => "NPV",
            CalculationMode::Irr => "IRR",
        },
        "terminal_growth_rate": settings.terminal_growth_rate,
    });

    Ok(timed_metadata("deterministic_driver_v1", &assumptions, warnings, started, result))
}

fn aggregate_cashflows(per_stream: &[StreamCashflow], forecast_months: u32) -> Vec<f64> {
    let mut aggregate = vec![0.0; forecast_months as usize];
    for sc in per_stream {
        for (i, v) in sc.cashflows.iter().enumerate() {
            aggregate[i] += v;
        }
    }
    aggregate
}

/// NPV of a model under an arbitrary sampling policy, without the metadata
/// envelope. Used by the sensitivity/breakeven drivers to rerun the model
/// with one distribution overridden, without mutating the model itself — so
/// the override is local to the pass and the model is bit-identical before
/// and after (see invariant 8).
pub fn npv_with_policy(model: &FinancialModel, policy: &SamplingPolicy) -> EngineResult<f64> {
    let settings = &model.settings;
    let order = model.get_execution_order();
    let mut rng = rand::thread_rng();
    let (aggregate, finals) = build_all(model, &order, policy, &mut rng)?;

    let discount_rate = policy.draw(&settings.discount_rate, DISCOUNT_RATE_PARAM, None, &mut rng);
    let mut total = npv(&aggregate, discount_rate);
    for (stream_id, c_final) in &finals {
        let stream = model.get_stream(stream_id).expect("stream exists");
        if stream.is_perpetual(settings.forecast_months) {
            total += terminal_value_pv(*c_final, discount_rate, settings.terminal_growth_rate, settings.forecast_months);
        }
    }
    Ok(total)
}
