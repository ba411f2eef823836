//! Per-tip-cell average width from the tip-asymptote profile.
//!
//! For a tip cell with zero-vertex perpendicular distance `l` to the front,
//! the crack-occupied area is the corner triangle with area fraction
//! `fill_frac`. Writing the asymptote as a function `w(s)` of distance `s`
//! behind the front (`s` ranging from 0 at the front to `l` at the zero
//! vertex), the area-weighted average width over that triangle reduces
//! (via the substitution used throughout this module, see DESIGN.md) to
//! `avg = (2/l) * integral_0^l w(s) (1 - s/l) ds`, which for the pure
//! power-law families (K, M, Mt) has the closed form
//! `w(l) * 2 / ((beta+1)(beta+2))`.

use crate::config::TipAsymptoteFamily;
use crate::error::{FailureCode, StepError};
use crate::grid::Grid;
use crate::root_find::brent;
use crate::tip_asymptote::g0;

fn power_law_avg_factor(beta: f64) -> f64 {
    2.0 / ((beta + 1.0) * (beta + 2.0))
}

fn w_k(s: f64, k_prime: f64, e_prime: f64) -> f64 {
    (k_prime / e_prime) * s.sqrt()
}

fn w_m(s: f64, v: f64, mu_prime: f64, e_prime: f64) -> f64 {
    (18.0 * 3f64.sqrt() * v.max(0.0) * mu_prime / e_prime).powf(1.0 / 3.0) * s.powf(2.0 / 3.0)
}

fn w_mt(s: f64, v: f64, c_prime: f64, mu_prime: f64, e_prime: f64) -> f64 {
    4.0 / (15.0 * (std::f64::consts::PI / 8.0).tan()).powf(0.25)
        * (c_prime * mu_prime / e_prime).powf(0.25)
        * v.max(0.0).powf(0.125)
        * s.powf(5.0 / 8.0)
}

/// Universal asymptote: width at distance `s`, front velocity `v`, solved
/// implicitly (same residual family as `res_u`, here with `s` fixed
/// and `w` the unknown).
fn w_u(s: f64, v: f64, k_prime: f64, c_prime: f64, mu_prime: f64, e_prime: f64) -> Option<f64> {
    if v <= 0.0 || s <= 0.0 {
        return Some(w_k(s, k_prime, e_prime));
    }
    let residual = |w: f64| -> f64 {
        let kh = k_prime * s.sqrt() / (e_prime * w);
        let ch = 2.0 * c_prime * s.sqrt() / (v.sqrt() * w);
        let sh = mu_prime * v * s * s / (e_prime * w.powi(3));
        sh - g0(kh, 0.9911799823 * ch, 6.0 * 3f64.sqrt())
    };
    let lo = 1e-12;
    let hi = 10.0 * w_k(s, k_prime, e_prime).max(w_m(s, v, mu_prime, e_prime)).max(1e-9);
    brent(residual, lo, hi, 1e-12, 100)
}

/// Numerically integrate `(2/l) * w(s) * (1 - s/l)` over `s in [0, l]` with
/// Simpson's rule (used for the `U` family, which has no power-law closed
/// form).
fn numeric_weighted_avg<F: Fn(f64) -> f64>(w: F, l: f64, n_intervals: usize) -> f64 {
    let n = if n_intervals % 2 == 0 { n_intervals } else { n_intervals + 1 };
    let h = l / n as f64;
    let f = |s: f64| w(s) * (1.0 - s / l);
    let mut sum = f(0.0) + f(l);
    for i in 1..n {
        let s = i as f64 * h;
        sum += if i % 2 == 0 { 2.0 * f(s) } else { 4.0 * f(s) };
    }
    (2.0 / l) * (h / 3.0) * sum
}

/// Inputs for one tip cell's average width.
#[derive(Clone, Copy, Debug)]
pub struct TipCellInputs {
    pub l: f64,
    pub alpha: f64,
    pub fill_frac: f64,
    pub k_prime: f64,
    pub e_prime: f64,
    pub mu_prime: f64,
    pub c_prime: f64,
    pub v: f64,
    pub stagnant: bool,
    /// Stress-intensity factor from ribbon fallback; only used when `stagnant`.
    pub stagnant_k_i_prime: f64,
}

/// Average width in one tip cell under the chosen asymptote mode.
pub fn average_width(family: TipAsymptoteFamily, mode_area_only: bool, t: &TipCellInputs) -> Result<f64, StepError> {
    if t.l < 0.0 || !t.l.is_finite() {
        return Err(StepError::Failure {
            code: FailureCode::InvalidTipVolume,
        });
    }
    if mode_area_only {
        return Ok(t.fill_frac);
    }
    if t.l == 0.0 {
        return Ok(0.0);
    }

    let k_prime = if t.stagnant { t.stagnant_k_i_prime } else { t.k_prime };

    let value = if t.stagnant {
        w_k(t.l, k_prime, t.e_prime) * power_law_avg_factor(0.5)
    } else {
        match family {
            TipAsymptoteFamily::K => w_k(t.l, k_prime, t.e_prime) * power_law_avg_factor(0.5),
            TipAsymptoteFamily::M => w_m(t.l, t.v, t.mu_prime, t.e_prime) * power_law_avg_factor(2.0 / 3.0),
            TipAsymptoteFamily::Mt => w_mt(t.l, t.v, t.c_prime, t.mu_prime, t.e_prime) * power_law_avg_factor(5.0 / 8.0),
            TipAsymptoteFamily::Mk => {
                // MK transition has no single power-law exponent; integrate directly
                // using the K-family profile modulated by the same closed form as the
                // MK residual, i.e. numeric quadrature over the blended profile.
                numeric_weighted_avg(
                    |s| {
                        (1.0 + 18.0 * 3f64.sqrt() * t.e_prime.powi(2) * t.v.max(0.0) * s.sqrt() / k_prime.powi(3))
                            .powf(1.0 / 3.0)
                            * k_prime
                            / t.e_prime
                            * s.sqrt()
                    },
                    t.l,
                    32,
                )
            }
            TipAsymptoteFamily::U => numeric_weighted_avg(
                |s| w_u(s, t.v, k_prime, t.c_prime, t.mu_prime, t.e_prime).unwrap_or(0.0),
                t.l,
                32,
            ),
        }
    };

    if !value.is_finite() || value < 0.0 {
        return Err(StepError::Failure {
            code: FailureCode::InvalidTipVolume,
        });
    }
    Ok(value)
}

/// Stress-intensity-factor fallback for stagnant tip cells: one
/// ribbon neighbor uses it directly, two use a least-squares combination,
/// zero falls back to the nearest ribbon cell by Euclidean distance.
pub fn stress_intensity_fallback(
    grid: &Grid,
    tip_cell: usize,
    ribbon: &[usize],
    w: &[f64],
    signed_dist: &[f64],
    e_prime: f64,
) -> Result<f64, StepError> {
    let nb = grid.neighbors(tip_cell);
    let mut enclosing = vec![nb.left, nb.right, nb.bottom, nb.up];
    let bnb = grid.neighbors(nb.bottom);
    let unb = grid.neighbors(nb.up);
    enclosing.extend([bnb.left, bnb.right, unb.left, unb.right]);

    let ribbon_set: std::collections::HashSet<usize> = ribbon.iter().copied().collect();
    let in_ribbon: Vec<usize> = enclosing.into_iter().filter(|c| ribbon_set.contains(c)).collect();

    if in_ribbon.len() == 1 {
        let r = in_ribbon[0];
        return Ok(w[r] * e_prime / (-signed_dist[r]).sqrt());
    }
    if in_ribbon.len() >= 2 {
        let (r0, r1) = (in_ribbon[0], in_ribbon[1]);
        let num = w[r0] * (-signed_dist[r0]).sqrt() + w[r1] * (-signed_dist[r1]).sqrt();
        let den = -signed_dist[r0] - signed_dist[r1];
        if den.abs() < 1e-300 {
            return Err(StepError::Failure {
                code: FailureCode::RibbonNotFoundInEnclosure,
            });
        }
        return Ok(e_prime * num / den);
    }

    if ribbon.is_empty() {
        return Err(StepError::Failure {
            code: FailureCode::RibbonNotFoundInEnclosure,
        });
    }
    let (xt, yt) = grid.center_coor[tip_cell];
    let closest = *ribbon
        .iter()
        .min_by(|&&a, &&b| {
            let (xa, ya) = grid.center_coor[a];
            let (xb, yb) = grid.center_coor[b];
            let da = (xa - xt).powi(2) + (ya - yt).powi(2);
            let db = (xb - xt).powi(2) + (yb - yt).powi(2);
            da.partial_cmp(&db).unwrap()
        })
        .unwrap();
    Ok(w[closest] * e_prime / (-signed_dist[closest]).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> TipCellInputs {
        TipCellInputs {
            l: 0.5,
            alpha: 0.5,
            fill_frac: 0.6,
            k_prime: 9.27e6,
            e_prime: 3.93e10,
            mu_prime: 1.2e-2,
            c_prime: 2e-6,
            v: 1e-4,
            stagnant: false,
            stagnant_k_i_prime: 0.0,
        }
    }

    #[test]
    fn area_only_mode_returns_fill_frac() {
        let t = base_inputs();
        let v = average_width(TipAsymptoteFamily::K, true, &t).unwrap();
        assert_eq!(v, t.fill_frac);
    }

    #[test]
    fn k_family_average_is_positive_and_below_tip_value() {
        let t = base_inputs();
        let avg = average_width(TipAsymptoteFamily::K, false, &t).unwrap();
        let tip_val = w_k(t.l, t.k_prime, t.e_prime);
        assert!(avg > 0.0 && avg < tip_val);
    }

    #[test]
    fn m_and_mt_families_are_finite() {
        let t = base_inputs();
        assert!(average_width(TipAsymptoteFamily::M, false, &t).unwrap().is_finite());
        assert!(average_width(TipAsymptoteFamily::Mt, false, &t).unwrap().is_finite());
    }

    #[test]
    fn u_family_matches_power_law_factor_order_of_magnitude() {
        let t = base_inputs();
        let u = average_width(TipAsymptoteFamily::U, false, &t).unwrap();
        assert!(u > 0.0 && u.is_finite());
    }
}
