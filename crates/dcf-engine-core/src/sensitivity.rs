use std::time::Instant;

use serde::Serialize;
use serde_json::json;

use crate::cashflow::{parameter_name, SamplingPolicy, DISCOUNT_RATE_PARAM, ESCALATION_RATE_PARAM};
use crate::deterministic::npv_with_policy;
use crate::distribution::Distribution;
use crate::error::EngineError;
use crate::model::FinancialModel;
use crate::types::{timed_metadata, ComputationOutput};
use crate::valuation::find_root;
use crate::EngineResult;

const TORNADO_TOP_N: usize = 15;
const BREAKEVEN_XTOL: f64 = 1e-8;
const BREAKEVEN_MAX_ITER: usize = 200;

/// One non-`FIXED` distribution somewhere in the model, named stably so it
/// can be targeted by an override in the tornado and breakeven drivers.
#[derive(Debug, Clone, Serialize)]
pub struct UncertainParameter {
    pub parameter_name: String,
    pub stream_id: Option<String>,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// Every non-`FIXED` distribution in the model: `discount_rate`,
/// `escalation_rate`, and each stream's `amount`/`unit_value`/`market_units`/
/// `adoption_curve`. `LOGISTIC`/`LINEAR` curves are included (they are not
/// `FIXED`) even though their P10 equals their P90.
pub fn enumerate_uncertain_parameters(model: &FinancialModel) -> EngineResult<Vec<UncertainParameter>> {
    let mut params = Vec::new();

    if !matches!(model.settings.discount_rate, Distribution::Fixed { .. }) {
        params.push(uncertain_parameter(DISCOUNT_RATE_PARAM.to_string(), None, &model.settings.discount_rate)?);
    }
    if let Some(escalation) = &model.settings.escalation_rate {
        if !matches!(escalation, Distribution::Fixed { .. }) {
            params.push(uncertain_parameter(ESCALATION_RATE_PARAM.to_string(), None, escalation)?);
        }
    }

    for stream in model.streams() {
        for (field, dist) in [
            ("amount", &stream.amount),
            ("unit_value", &stream.unit_value),
            ("market_units", &stream.market_units),
            ("adoption_curve", &stream.adoption_curve),
        ] {
            if let Some(d) = dist {
                if !matches!(d, Distribution::Fixed { .. }) {
                    params.push(uncertain_parameter(parameter_name(&stream.id, field), Some(stream.id.clone()), d)?);
                }
            }
        }
    }
    Ok(params)
}

fn uncertain_parameter(name: String, stream_id: Option<String>, dist: &Distribution) -> EngineResult<UncertainParameter> {
    Ok(UncertainParameter {
        parameter_name: name,
        stream_id,
        p10: dist.percentile(0.10)?,
        p50: dist.percentile(0.50)?,
        p90: dist.percentile(0.90)?,
    })
}

/// One parameter's contribution to NPV swing in a tornado ranking.
#[derive(Debug, Clone, Serialize)]
pub struct TornadoEntry {
    pub parameter_name: String,
    pub npv_low: f64,
    pub npv_high: f64,
    pub swing: f64,
}

/// Baseline NPV plus the top 15 parameters by `|npv_high - npv_low|`, each
/// computed by overriding that one parameter to its P10 then its P90 and
/// rerunning the deterministic driver. The override is passed through a
/// `SamplingPolicy`, never written into the model, so the model is
/// bit-identical before and after (invariant 8).
pub fn run_tornado(model: &FinancialModel) -> EngineResult<ComputationOutput<Vec<TornadoEntry>>> {
    let started = Instant::now();
    model.validate()?;
    let baseline = npv_with_policy(model, &SamplingPolicy::deterministic())?;

    let mut entries = Vec::new();
    for param in enumerate_uncertain_parameters(model)? {
        let low_policy = SamplingPolicy::deterministic().with_override(param.parameter_name.clone(), param.p10);
        let npv_low = npv_with_policy(model, &low_policy)?;

        let high_policy = SamplingPolicy::deterministic().with_override(param.parameter_name.clone(), param.p90);
        let npv_high = npv_with_policy(model, &high_policy)?;

        entries.push(TornadoEntry {
            parameter_name: param.parameter_name,
            npv_low,
            npv_high,
            swing: (npv_high - npv_low).abs(),
        });
    }
    entries.sort_by(|a, b| b.swing.partial_cmp(&a.swing).unwrap());
    entries.truncate(TORNADO_TOP_N);

    let assumptions = json!({ "baseline_npv": baseline, "parameters_scanned": entries.len() });
    Ok(timed_metadata("tornado_driver_v1", &assumptions, Vec::new(), started, entries))
}

/// Result of a breakeven search: a value if one was found, else a reason and
/// the bracket actually attempted.
#[derive(Debug, Clone, Serialize)]
pub struct BreakevenOutcome {
    pub found: bool,
    pub value: Option<f64>,
    pub reason: Option<String>,
    pub attempted_bracket: (f64, f64),
}

/// Solve for the scalar value of `parameter_name` at which deterministic NPV
/// equals `target_npv`, via Brent's method on a bracket chosen by the
/// parameter's kind (current source of under-specification; see design notes).
pub fn run_breakeven(
    model: &FinancialModel,
    parameter_name: &str,
    target_npv: f64,
) -> EngineResult<ComputationOutput<BreakevenOutcome>> {
    let started = Instant::now();
    model.validate()?;
    let current = current_parameter_value(model, parameter_name)?;
    let (lo, hi) = default_bracket(parameter_name, current);

    let f = |v: f64| -> f64 {
        let policy = SamplingPolicy::deterministic().with_override(parameter_name.to_string(), v);
        npv_with_policy(model, &policy).unwrap_or(f64::NAN) - target_npv
    };

    let f_lo = f(lo);
    let f_hi = f(hi);
    let outcome = if f_lo.is_nan() || f_hi.is_nan() || f_lo * f_hi > 0.0 {
        BreakevenOutcome {
            found: false,
            value: None,
            reason: Some(format!(
                "no sign change found over bracket [{lo}, {hi}] for parameter '{parameter_name}'"
            )),
            attempted_bracket: (lo, hi),
        }
    } else {
        match find_root(f, lo, hi, BREAKEVEN_XTOL, BREAKEVEN_MAX_ITER) {
            Some(v) => BreakevenOutcome { found: true, value: Some(v), reason: None, attempted_bracket: (lo, hi) },
            None => BreakevenOutcome {
                found: false,
                value: None,
                reason: Some("Brent's method failed to converge within the bracket".to_string()),
                attempted_bracket: (lo, hi),
            },
        }
    };

    let assumptions = json!({ "parameter_name": parameter_name, "target_npv": target_npv, "current_value": current });
    Ok(timed_metadata("breakeven_driver_v1", &assumptions, Vec::new(), started, outcome))
}

fn current_parameter_value(model: &FinancialModel, parameter_name: &str) -> EngineResult<f64> {
    if parameter_name == DISCOUNT_RATE_PARAM {
        return Ok(model.settings.discount_rate.deterministic());
    }
    if parameter_name == ESCALATION_RATE_PARAM {
        return model
            .settings
            .escalation_rate
            .as_ref()
            .map(|d| d.deterministic())
            .ok_or_else(|| EngineError::InvalidInput {
                field: "parameter_name".into(),
                reason: "model has no escalation_rate configured".into(),
            });
    }
    let (stream_id, field) = parameter_name.split_once('.').ok_or_else(|| EngineError::InvalidInput {
        field: "parameter_name".into(),
        reason: format!("unrecognized parameter name '{parameter_name}'"),
    })?;
    let stream = model.get_stream(stream_id).ok_or_else(|| EngineError::InvalidInput {
        field: "parameter_name".into(),
        reason: format!("unknown stream '{stream_id}'"),
    })?;
    let dist = match field {
        "amount" => &stream.amount,
        "unit_value" => &stream.unit_value,
        "market_units" => &stream.market_units,
        "adoption_curve" => &stream.adoption_curve,
        other => {
            return Err(EngineError::InvalidInput {
                field: "parameter_name".into(),
                reason: format!("unknown field '{other}'"),
            })
        }
    };
    dist.as_ref().map(|d| d.deterministic()).ok_or_else(|| EngineError::InvalidInput {
        field: "parameter_name".into(),
        reason: format!("stream '{stream_id}' has no '{field}' distribution"),
    })
}

/// Bracket heuristic by parameter kind: `[0, 1]` for rates/ratios, `[current/10,
/// current*10]` for signed amounts, widened outward from zero if the current
/// value is itself zero. See the design note on under-specified breakeven
/// bracket construction.
fn default_bracket(parameter_name: &str, current_value: f64) -> (f64, f64) {
    if parameter_name == DISCOUNT_RATE_PARAM
        || parameter_name == ESCALATION_RATE_PARAM
        || parameter_name.ends_with(".adoption_curve")
    {
        return (0.0, 1.0);
    }
    if current_value == 0.0 {
        return (-1_000_000.0, 1_000_000.0);
    }
    if current_value > 0.0 {
        (current_value / 10.0, current_value * 10.0)
    } else {
        (current_value * 10.0, current_value / 10.0)
    }
}
