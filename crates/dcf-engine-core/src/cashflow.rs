use std::collections::HashMap;

use rand::Rng;

use crate::distribution::Distribution;
use crate::error::EngineError;
use crate::model::{FinancialModel, ModelSettings, Stream, StreamKind};
use crate::EngineResult;

/// Parameter name used for the settings-level escalation rate in overrides and
/// sensitivity enumeration.
pub const ESCALATION_RATE_PARAM: &str = "Escalation Rate";

/// Parameter name used for the settings-level discount rate.
pub const DISCOUNT_RATE_PARAM: &str = "Discount Rate";

/// Stable name for a per-stream distribution field, e.g. `"rev1.amount"`.
pub fn parameter_name(stream_id: &str, field: &str) -> String {
    format!("{stream_id}.{field}")
}

/// Base mode a `SamplingPolicy` falls back to once its overrides are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMode {
    /// Use each distribution's expected value.
    #[default]
    Deterministic,
    /// Draw a fresh sample from each distribution.
    Stochastic,
}

/// How the builder resolves a `Distribution` encountered during evaluation.
/// Passed explicitly into every call rather than selected via global state, so
/// that Monte Carlo's independence and sensitivity's override/restore are both
/// expressible with the same builder: a base mode plus zero or more named
/// overrides that win regardless of mode (a tornado leg, or Monte Carlo's
/// once-per-simulation escalation draw shared across every stream).
#[derive(Debug, Clone, Default)]
pub struct SamplingPolicy {
    pub mode: SamplingMode,
    overrides: HashMap<String, f64>,
}

impl SamplingPolicy {
    pub fn deterministic() -> Self {
        SamplingPolicy { mode: SamplingMode::Deterministic, overrides: HashMap::new() }
    }

    pub fn stochastic() -> Self {
        SamplingPolicy { mode: SamplingMode::Stochastic, overrides: HashMap::new() }
    }

    /// Add a named override; the distribution at that parameter name resolves
    /// to `value` regardless of mode for the rest of this build.
    pub fn with_override(mut self, parameter_name: impl Into<String>, value: f64) -> Self {
        self.overrides.insert(parameter_name.into(), value);
        self
    }

    /// Resolve one distribution encountered at `parameter_name`, optionally at `month`.
    pub fn draw(
        &self,
        dist: &Distribution,
        parameter_name: &str,
        month: Option<u32>,
        rng: &mut impl Rng,
    ) -> f64 {
        if let Some(value) = self.overrides.get(parameter_name) {
            return *value;
        }
        match self.mode {
            SamplingMode::Stochastic => dist.sample(month, rng),
            SamplingMode::Deterministic => {
                if dist.is_time_dependent() {
                    dist.sample(month, rng)
                } else {
                    dist.deterministic()
                }
            }
        }
    }
}

/// Turn one stream into a monthly cashflow vector of length `settings.forecast_months`.
///
/// Root streams are driven directly by their own distributions; child streams
/// derive a sparse, delayed echo of `parent_cashflows`, which must already be
/// built for the same pass (see `FinancialModel::get_execution_order`).
pub fn build_cashflows(
    stream: &Stream,
    policy: &SamplingPolicy,
    parent_cashflows: Option<&[f64]>,
    settings: &ModelSettings,
    rng: &mut impl Rng,
) -> EngineResult<Vec<f64>> {
    if stream.is_root() {
        build_root_cashflows(stream, policy, settings, rng)
    } else {
        let parent = parent_cashflows.ok_or_else(|| {
            EngineError::GraphError(format!(
                "stream '{}' has a parent but no parent cashflow vector was supplied",
                stream.id
            ))
        })?;
        build_child_cashflows(stream, policy, parent, settings, rng)
    }
}

/// Rebuild every stream's cashflow in topological order for one pass, as every
/// driver (deterministic, Monte Carlo, sensitivity) needs: the aggregate
/// vector plus each stream's final-month cashflow (for perpetual-stream
/// terminal value).
pub fn build_all(
    model: &FinancialModel,
    order: &[String],
    policy: &SamplingPolicy,
    rng: &mut impl Rng,
) -> EngineResult<(Vec<f64>, HashMap<String, f64>)> {
    let settings = &model.settings;
    let mut by_id: HashMap<String, Vec<f64>> = HashMap::with_capacity(order.len());
    let mut aggregate = vec![0.0; settings.forecast_months as usize];
    let mut finals = HashMap::with_capacity(order.len());

    for id in order {
        let stream = model
            .get_stream(id)
            .expect("execution order only contains ids present in the model");
        let parent_cf = stream
            .parent_stream_id
            .as_ref()
            .and_then(|p| by_id.get(p).map(|v| v.as_slice()));
        let cf = build_cashflows(stream, policy, parent_cf, settings, rng)?;
        for (i, v) in cf.iter().enumerate() {
            aggregate[i] += v;
        }
        finals.insert(id.clone(), cf.last().copied().unwrap_or(0.0));
        by_id.insert(id.clone(), cf);
    }
    Ok((aggregate, finals))
}

fn active_window(stream: &Stream, forecast_months: u32) -> Option<(u32, u32)> {
    if forecast_months == 0 {
        return None;
    }
    let cap = forecast_months - 1;
    let end = stream.end_month.map_or(cap, |e| e.min(cap));
    if stream.start_month > end {
        None
    } else {
        Some((stream.start_month, end))
    }
}

fn build_root_cashflows(
    stream: &Stream,
    policy: &SamplingPolicy,
    settings: &ModelSettings,
    rng: &mut impl Rng,
) -> EngineResult<Vec<f64>> {
    let forecast_months = settings.forecast_months as usize;
    let mut cashflows = vec![0.0; forecast_months];
    let Some((start, end)) = active_window(stream, settings.forecast_months) else {
        return Ok(cashflows);
    };

    let escalation_r = settings
        .escalation_rate
        .as_ref()
        .map(|d| policy.draw(d, ESCALATION_RATE_PARAM, None, rng));

    for m in start..=end {
        let base = if let (Some(uv), Some(mu)) = (&stream.unit_value, &stream.market_units) {
            let unit_value = policy.draw(uv, &parameter_name(&stream.id, "unit_value"), Some(m), rng);
            let market_units = policy.draw(mu, &parameter_name(&stream.id, "market_units"), Some(m), rng);
            unit_value * market_units
        } else {
            let amount = stream.amount.as_ref().ok_or_else(|| EngineError::InvalidInput {
                field: "amount".into(),
                reason: format!("root stream '{}' has no amount distribution", stream.id),
            })?;
            policy.draw(amount, &parameter_name(&stream.id, "amount"), Some(m), rng)
        };

        let mut value = base;
        if let Some(r) = escalation_r {
            value *= (1.0 + r / 12.0).powi((m - start) as i32);
        }
        if let Some(adoption) = &stream.adoption_curve {
            value *= policy.draw(adoption, &parameter_name(&stream.id, "adoption_curve"), Some(m), rng);
        }
        if stream.kind == StreamKind::Cost {
            value = -value.abs();
        }
        cashflows[m as usize] = value;
    }
    Ok(cashflows)
}

fn build_child_cashflows(
    stream: &Stream,
    policy: &SamplingPolicy,
    parent_cashflows: &[f64],
    settings: &ModelSettings,
    rng: &mut impl Rng,
) -> EngineResult<Vec<f64>> {
    let forecast_months = settings.forecast_months as usize;
    let mut cashflows = vec![0.0; forecast_months];
    let Some((start, end)) = active_window(stream, settings.forecast_months) else {
        return Ok(cashflows);
    };

    let amount_dist = stream.amount.as_ref().ok_or_else(|| EngineError::InvalidInput {
        field: "amount".into(),
        reason: format!("child stream '{}' has no amount distribution", stream.id),
    })?;
    // Drawn once per build: all events in this pass share the same child amount.
    let amount = policy.draw(amount_dist, &parameter_name(&stream.id, "amount"), None, rng);

    let escalation_r = settings
        .escalation_rate
        .as_ref()
        .map(|d| policy.draw(d, ESCALATION_RATE_PARAM, None, rng));

    for (pm, &parent_value) in parent_cashflows.iter().enumerate() {
        if parent_value == 0.0 {
            continue;
        }
        let pm = pm as u32;
        let event_value = if stream.amount_is_ratio {
            parent_value.abs() * amount
        } else {
            amount
        } * stream.conversion_rate;

        let mut m = pm + stream.trigger_delay_months;
        loop {
            if m > end {
                break;
            }
            if m >= start {
                let mut v = event_value;
                if let Some(r) = escalation_r {
                    v *= (1.0 + r / 12.0).powi((m - start) as i32);
                }
                cashflows[m as usize] += v;
            }
            match stream.periodicity_months {
                Some(period) if period > 0 => m += period,
                _ => break,
            }
        }
    }

    if stream.kind == StreamKind::Cost {
        for v in cashflows.iter_mut() {
            *v = -*v;
        }
    }
    Ok(cashflows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CalculationMode;

    fn settings(forecast_months: u32) -> ModelSettings {
        ModelSettings {
            forecast_months,
            discount_rate: Distribution::Fixed { value: 0.12 },
            terminal_growth_rate: 0.0,
            escalation_rate: None,
            calculation_mode: CalculationMode::Npv,
        }
    }

    fn stream(id: &str, kind: StreamKind, amount: f64, start: u32, end: Option<u32>) -> Stream {
        Stream {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            start_month: start,
            end_month: end,
            amount: Some(Distribution::Fixed { value: amount }),
            unit_value: None,
            market_units: None,
            adoption_curve: None,
            parent_stream_id: None,
            conversion_rate: 1.0,
            trigger_delay_months: 0,
            periodicity_months: None,
            amount_is_ratio: false,
        }
    }

    #[test]
    fn s2_cost_sign_vector() {
        let s = stream("cost1", StreamKind::Cost, 500.0, 0, Some(5));
        let settings = settings(8);
        let mut rng = rand::thread_rng();
        let cf = build_cashflows(&s, &SamplingPolicy::deterministic(), None, &settings, &mut rng).unwrap();
        assert_eq!(cf, vec![-500.0, -500.0, -500.0, -500.0, -500.0, -500.0, 0.0, 0.0]);
    }

    #[test]
    fn s3_child_ratio_with_delay() {
        let parent = stream("parent", StreamKind::Revenue, 1000.0, 0, Some(11));
        let settings = settings(14);
        let mut rng = rand::thread_rng();
        let parent_cf = build_cashflows(&parent, &SamplingPolicy::deterministic(), None, &settings, &mut rng).unwrap();

        let mut child = stream("child", StreamKind::Cost, 0.2, 0, Some(13));
        child.parent_stream_id = Some("parent".into());
        child.amount_is_ratio = true;
        child.conversion_rate = 1.0;
        child.trigger_delay_months = 1;
        let child_cf = build_cashflows(&child, &SamplingPolicy::deterministic(), Some(&parent_cf), &settings, &mut rng).unwrap();

        assert_eq!(child_cf[0], 0.0);
        for m in 1..=12 {
            assert_eq!(child_cf[m], -200.0, "month {m}");
        }
        assert_eq!(child_cf[13], 0.0);
    }

    #[test]
    fn s4_periodic_child() {
        let parent = stream("parent", StreamKind::Revenue, 1000.0, 0, Some(11));
        let settings = settings(14);
        let mut rng = rand::thread_rng();
        let parent_cf = build_cashflows(&parent, &SamplingPolicy::deterministic(), None, &settings, &mut rng).unwrap();

        let mut child = stream("child", StreamKind::Revenue, 100.0, 0, Some(13));
        child.parent_stream_id = Some("parent".into());
        child.conversion_rate = 0.5;
        child.trigger_delay_months = 0;
        child.periodicity_months = Some(3);
        let child_cf = build_cashflows(&child, &SamplingPolicy::deterministic(), Some(&parent_cf), &settings, &mut rng).unwrap();

        for m in 0..=11u32 {
            let expected = if m % 3 == 0 { 50.0 } else { 0.0 };
            assert_eq!(child_cf[m as usize], expected, "month {m}");
        }
    }

    #[test]
    fn invariant_cost_never_positive() {
        let s = stream("cost1", StreamKind::Cost, 500.0, 0, Some(11));
        let settings = settings(12);
        let mut rng = rand::thread_rng();
        let cf = build_cashflows(&s, &SamplingPolicy::stochastic(), None, &settings, &mut rng).unwrap();
        assert!(cf.iter().all(|&v| v <= 0.0));
    }

    #[test]
    fn invariant_window_is_zero_outside_range() {
        let s = stream("rev", StreamKind::Revenue, 100.0, 3, Some(5));
        let settings = settings(10);
        let mut rng = rand::thread_rng();
        let cf = build_cashflows(&s, &SamplingPolicy::deterministic(), None, &settings, &mut rng).unwrap();
        for m in 0..3 {
            assert_eq!(cf[m], 0.0);
        }
        for m in 6..10 {
            assert_eq!(cf[m], 0.0);
        }
    }

    #[test]
    fn invariant_child_sparsity_tracks_zero_parent() {
        let settings = settings(6);
        let mut rng = rand::thread_rng();
        let parent_cf = vec![0.0; 6];

        let mut child = stream("child", StreamKind::Revenue, 10.0, 0, Some(5));
        child.parent_stream_id = Some("parent".into());
        let child_cf = build_cashflows(&child, &SamplingPolicy::deterministic(), Some(&parent_cf), &settings, &mut rng).unwrap();
        assert!(child_cf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn invariant_conversion_rate_monotonicity() {
        let parent = stream("parent", StreamKind::Revenue, 1000.0, 0, Some(5));
        let settings = settings(6);
        let mut rng = rand::thread_rng();
        let parent_cf = build_cashflows(&parent, &SamplingPolicy::deterministic(), None, &settings, &mut rng).unwrap();

        let mut low = stream("child", StreamKind::Revenue, 100.0, 0, Some(5));
        low.parent_stream_id = Some("parent".into());
        low.conversion_rate = 0.2;
        let low_cf = build_cashflows(&low, &SamplingPolicy::deterministic(), Some(&parent_cf), &settings, &mut rng).unwrap();

        let mut high = low.clone();
        high.conversion_rate = 0.8;
        let high_cf = build_cashflows(&high, &SamplingPolicy::deterministic(), Some(&parent_cf), &settings, &mut rng).unwrap();

        for (l, h) in low_cf.iter().zip(high_cf.iter()) {
            assert!(h.abs() >= l.abs());
        }
    }

    #[test]
    fn fixed_override_replaces_only_named_parameter() {
        let s = stream("rev", StreamKind::Revenue, 1000.0, 0, Some(2));
        let settings = settings(3);
        let mut rng = rand::thread_rng();
        let policy = SamplingPolicy::deterministic().with_override(parameter_name("rev", "amount"), 42.0);
        let cf = build_cashflows(&s, &policy, None, &settings, &mut rng).unwrap();
        assert_eq!(cf, vec![42.0, 42.0, 42.0]);
    }
}
