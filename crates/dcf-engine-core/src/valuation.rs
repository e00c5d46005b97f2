/// Net present value of a monthly cashflow vector at an annual discount rate.
pub fn npv(cashflows: &[f64], annual_rate: f64) -> f64 {
    npv_monthly(cashflows, annual_rate / 12.0)
}

fn npv_monthly(cashflows: &[f64], monthly_rate: f64) -> f64 {
    cashflows
        .iter()
        .enumerate()
        .map(|(t, c)| c / (1.0 + monthly_rate).powi(t as i32))
        .sum()
}

/// Present value of a Gordon Growth terminal value for one perpetual stream's
/// final-month cashflow. Returns 0 if `discount_rate <= terminal_growth_rate`,
/// matching the degenerate-relationship guard.
pub fn terminal_value_pv(
    final_month_cashflow: f64,
    discount_rate: f64,
    terminal_growth_rate: f64,
    forecast_months: u32,
) -> f64 {
    let d = discount_rate;
    let g = terminal_growth_rate;
    if d <= g {
        return 0.0;
    }
    let tv = final_month_cashflow * (1.0 + g) / (d - g);
    let monthly = d / 12.0;
    tv / (1.0 + monthly).powi(forecast_months as i32)
}

/// Result of an IRR search: either a rate or a human-readable reason it could
/// not be found. Never a thrown error — see the engine's error-handling contract.
#[derive(Debug, Clone)]
pub struct IrrOutcome {
    pub irr: Option<f64>,
    pub error: Option<String>,
}

const IRR_BRACKET_LOW: f64 = -0.5;
const IRR_BRACKET_HIGH: f64 = 10.0;
const IRR_XTOL: f64 = 1e-10;
const IRR_MAX_ITER: usize = 1000;

/// Annualized internal rate of return via Brent's method on the monthly rate,
/// bracketed to `[-0.5, 10.0]` and annualized by multiplying by 12.
pub fn irr(cashflows: &[f64]) -> IrrOutcome {
    let f = |monthly: f64| npv_monthly(cashflows, monthly);
    let fa = f(IRR_BRACKET_LOW);
    let fb = f(IRR_BRACKET_HIGH);
    if fa * fb > 0.0 {
        return IrrOutcome {
            irr: None,
            error: Some(
                "no sign change in NPV over the monthly rate bracket [-0.5, 10.0]; cashflows may all share one sign"
                    .to_string(),
            ),
        };
    }
    match brent(f, IRR_BRACKET_LOW, IRR_BRACKET_HIGH, IRR_XTOL, IRR_MAX_ITER) {
        Some(monthly) => IrrOutcome {
            irr: Some(monthly * 12.0),
            error: None,
        },
        None => IrrOutcome {
            irr: None,
            error: Some(format!(
                "Brent's method failed to converge within {IRR_MAX_ITER} iterations"
            )),
        },
    }
}

/// Brent's method exposed for callers outside this module that need a root of
/// their own scalar function (the breakeven driver, notably).
pub fn find_root<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> Option<f64> {
    brent(f, lo, hi, tol, max_iter)
}

/// Brent's root-finding method. Returns `None` if the bracket does not contain
/// a sign change or the iteration cap is exceeded without meeting `tol`.
fn brent<F: Fn(f64) -> f64>(f: F, a0: f64, b0: f64, tol: f64, max_iter: usize) -> Option<f64> {
    let mut a = a0;
    let mut b = b0;
    let mut fa = f(a);
    let mut fb = f(b);
    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }
    if fa * fb > 0.0 {
        return None;
    }
    if fa.abs() < fb.abs() {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut c = a;
    let mut fc = fa;
    let mut mflag = true;
    let mut d = a;

    for _ in 0..max_iter {
        if fb == 0.0 || (b - a).abs() < tol {
            return Some(b);
        }

        let mut s = if (fa - fc).abs() > f64::EPSILON && (fb - fc).abs() > f64::EPSILON {
            a * fb * fc / ((fa - fb) * (fa - fc))
                + b * fa * fc / ((fb - fa) * (fb - fc))
                + c * fa * fb / ((fc - fa) * (fc - fb))
        } else {
            b - fb * (b - a) / (fb - fa)
        };

        let midpoint = (3.0 * a + b) / 4.0;
        let lower = midpoint.min(b);
        let upper = midpoint.max(b);
        let cond1 = s < lower || s > upper;
        let cond2 = mflag && (s - b).abs() >= (b - c).abs() / 2.0;
        let cond3 = !mflag && (s - b).abs() >= (c - d).abs() / 2.0;
        let cond4 = mflag && (b - c).abs() < tol;
        let cond5 = !mflag && (c - d).abs() < tol;

        if cond1 || cond2 || cond3 || cond4 || cond5 {
            s = (a + b) / 2.0;
            mflag = true;
        } else {
            mflag = false;
        }

        let fs = f(s);
        d = c;
        c = b;
        fc = fb;
        if fa * fs < 0.0 {
            b = s;
            fb = fs;
        } else {
            a = s;
            fa = fs;
        }
        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }
    }
    None
}

/// Smallest month `t` at which cumulative cashflow first reaches zero or
/// above, linearly interpolated within the crossing month. `None` if the
/// cumulative sum never reaches zero.
pub fn payback_period(cashflows: &[f64]) -> Option<f64> {
    let mut cumulative = 0.0;
    for (t, &c) in cashflows.iter().enumerate() {
        let prev_cumulative = cumulative;
        cumulative += c;
        if cumulative >= 0.0 {
            if t == 0 {
                return Some(0.0);
            }
            let frac = if c != 0.0 { -prev_cumulative / c } else { 0.0 };
            return Some((t - 1) as f64 + frac);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_flat_revenue_npv() {
        let cashflows = vec![1000.0; 12];
        let result = npv(&cashflows, 0.12);
        assert!((result - 11255.08).abs() < 0.01, "got {result}");
    }

    #[test]
    fn s5_perpetual_terminal_value() {
        let pv_tv = terminal_value_pv(100.0, 0.12, 0.02, 60);
        assert!((pv_tv - 561.43).abs() < 0.01, "got {pv_tv}");
    }

    #[test]
    fn s6_irr_of_simple_project() {
        let cashflows = vec![-1000.0, 300.0, 400.0, 500.0, 600.0];
        let outcome = irr(&cashflows);
        let rate = outcome.irr.expect("irr should be found");
        let check = npv(&cashflows, rate);
        assert!(check.abs() < 1e-4, "NPV(c; IRR) = {check}");
    }

    #[test]
    fn irr_reports_no_sign_change() {
        let cashflows = vec![100.0, 200.0, 300.0];
        let outcome = irr(&cashflows);
        assert!(outcome.irr.is_none());
        assert!(outcome.error.is_some());
    }

    #[test]
    fn terminal_value_is_zero_when_discount_not_above_growth() {
        let pv_tv = terminal_value_pv(100.0, 0.02, 0.05, 60);
        assert_eq!(pv_tv, 0.0);
    }

    #[test]
    fn payback_interpolates_within_crossing_month() {
        let cashflows = vec![-1000.0, 400.0, 400.0, 400.0];
        let payback = payback_period(&cashflows).unwrap();
        assert!((payback - 2.5).abs() < 1e-9, "got {payback}");
    }

    #[test]
    fn payback_is_none_if_never_recovered() {
        let cashflows = vec![-1000.0, 10.0, 10.0];
        assert!(payback_period(&cashflows).is_none());
    }

    #[test]
    fn invariant_irr_npv_consistency_holds_within_bracket() {
        let cashflows = vec![-5000.0, 1000.0, 1500.0, 2000.0, 2500.0, 1000.0];
        let outcome = irr(&cashflows);
        if let Some(rate) = outcome.irr {
            let monthly = rate / 12.0;
            if (-0.5..10.0).contains(&monthly) {
                assert!(npv(&cashflows, rate).abs() < 1e-4);
            }
        }
    }
}
