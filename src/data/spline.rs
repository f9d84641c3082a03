//! Natural cubic spline basis for smooth covariate effects.
//!
//! Uses the truncated power parameterisation: with knots `xi_1 < ... < xi_K`,
//! the basis is `x` followed by `d_k(x) - d_{K-1}(x)` for `k = 1..K-2`, where
//! `d_k(x) = ((x - xi_k)^3_+ - (x - xi_K)^3_+) / (xi_K - xi_k)`. The fit is
//! linear beyond the boundary knots. The constant column is left to the
//! intercept, so `df` knots-minus-one columns are produced.

use crate::error::{GlmmError, Result};
use serde::{Deserialize, Serialize};

/// A fitted natural spline basis (knot placement frozen at fit time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalSpline {
    /// Number of basis columns.
    pub df: usize,
    /// Lower boundary knot (data scale).
    pub lower: f64,
    /// Upper boundary knot (data scale).
    pub upper: f64,
    /// All knots including boundaries, rescaled to [0, 1].
    knots: Vec<f64>,
}

impl NaturalSpline {
    /// Place `df - 1` interior knots at quantiles of the distinct observed values.
    pub fn fit(values: &[f64], df: usize) -> Result<Self> {
        let mut distinct: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        distinct.dedup();

        if df == 0 {
            return Err(GlmmError::InvalidParameter(
                "Spline needs at least one degree of freedom".to_string(),
            ));
        }
        if distinct.len() < df + 1 {
            return Err(GlmmError::InvalidParameter(format!(
                "Spline with df = {} needs at least {} distinct values, got {}",
                df,
                df + 1,
                distinct.len()
            )));
        }

        let lower = distinct[0];
        let upper = distinct[distinct.len() - 1];
        let range = upper - lower;

        let mut knots = Vec::with_capacity(df + 1);
        knots.push(0.0);
        for i in 1..df {
            let q = quantile_sorted(&distinct, i as f64 / df as f64);
            knots.push((q - lower) / range);
        }
        knots.push(1.0);

        Ok(Self {
            df,
            lower,
            upper,
            knots,
        })
    }

    /// Basis row for a single covariate value.
    pub fn basis(&self, x: f64) -> Vec<f64> {
        let u = (x - self.lower) / (self.upper - self.lower);
        let k = self.knots.len();
        let mut row = Vec::with_capacity(self.df);
        row.push(u);
        if k > 2 {
            let d_last = self.d(u, k - 2);
            for j in 0..k - 2 {
                row.push(self.d(u, j) - d_last);
            }
        }
        row
    }

    /// Names for the basis columns, e.g. `ns(distance, 3)1`.
    pub fn column_names(&self, label: &str) -> Vec<String> {
        (1..=self.df).map(|i| format!("{}{}", label, i)).collect()
    }

    fn d(&self, u: f64, j: usize) -> f64 {
        let last = self.knots[self.knots.len() - 1];
        let cube = |v: f64| if v > 0.0 { v * v * v } else { 0.0 };
        (cube(u - self.knots[j]) - cube(u - last)) / (last - self.knots[j])
    }
}

/// Linear-interpolation quantile of sorted data.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn distances() -> Vec<f64> {
        (1..=10).map(|i| i as f64 * 10.0).collect()
    }

    #[test]
    fn test_df_one_is_linear() {
        let spline = NaturalSpline::fit(&distances(), 1).unwrap();
        assert_eq!(spline.basis(10.0), vec![0.0]);
        assert_relative_eq!(spline.basis(55.0)[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_basis_width() {
        let spline = NaturalSpline::fit(&distances(), 4).unwrap();
        assert_eq!(spline.basis(35.0).len(), 4);
        assert_eq!(spline.column_names("ns(distance, 4)").len(), 4);
    }

    #[test]
    fn test_linear_beyond_boundary() {
        let spline = NaturalSpline::fit(&distances(), 3).unwrap();
        let b1 = spline.basis(110.0);
        let b2 = spline.basis(120.0);
        let b3 = spline.basis(130.0);
        for j in 0..3 {
            let step1 = b2[j] - b1[j];
            let step2 = b3[j] - b2[j];
            assert_relative_eq!(step1, step2, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_basis_zero_below_first_interior_knot() {
        let spline = NaturalSpline::fit(&distances(), 3).unwrap();
        let row = spline.basis(10.0);
        assert!(row.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn test_too_few_distinct_values() {
        assert!(NaturalSpline::fit(&[1.0, 1.0, 2.0], 3).is_err());
        assert!(NaturalSpline::fit(&distances(), 0).is_err());
    }
}
