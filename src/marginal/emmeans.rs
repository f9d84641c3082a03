//! Marginal means from a fitted model.

use crate::error::{GlmmError, Result};
use crate::marginal::{cell_label, reference_grid, CellEntry, EmmeansRequest};
use crate::model::FittedModel;
use log::debug;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Marginal mean of one grid cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginalMean {
    /// Values of the requested variables.
    pub cell: Vec<CellEntry>,
    /// Values of the stratification variables (empty when unstratified).
    pub stratum: Vec<CellEntry>,
    /// Estimate on the link scale.
    pub estimate: f64,
    pub std_error: f64,
    pub lower: f64,
    pub upper: f64,
    /// Estimate on the response scale.
    pub response: f64,
    /// Delta-method SE on the response scale.
    pub response_std_error: f64,
    /// Back-transformed link-scale interval.
    pub response_lower: f64,
    pub response_upper: f64,
    /// Confidence level of the intervals.
    pub level: f64,
    /// Coefficient weights of this mean.
    #[serde(skip)]
    pub linfct: Vec<f64>,
}

impl MarginalMean {
    /// Label of the cell, e.g. `treatment=LPS`.
    pub fn label(&self) -> String {
        cell_label(&self.cell)
    }

    /// Label of the stratum; empty when unstratified.
    pub fn stratum_label(&self) -> String {
        cell_label(&self.stratum)
    }
}

/// Two-sided normal critical value for a confidence level.
pub(crate) fn z_critical(level: f64) -> Result<f64> {
    if !(level > 0.0 && level < 1.0) {
        return Err(GlmmError::InvalidParameter(format!(
            "Confidence level must be in (0, 1), got {}",
            level
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| GlmmError::InvalidParameter(e.to_string()))?;
    Ok(normal.inverse_cdf(1.0 - (1.0 - level) / 2.0))
}

/// Estimated marginal means for each cell of the request's reference grid.
///
/// Link-scale intervals are Wald intervals; response-scale intervals are the
/// link-scale bounds mapped through the inverse link, so they stay inside the
/// family's support.
///
/// # Errors
/// * `UnsupportedCell` - a requested level or covariate value was not observed
/// * `SingularCovariance` - a mean has no positive variance
pub fn estimate_marginal_means(fit: &FittedModel, request: &EmmeansRequest) -> Result<Vec<MarginalMean>> {
    let z = z_critical(request.level)?;
    let family = fit.family;
    let link = family.link();

    let grid = reference_grid(fit, request)?;
    debug!(
        "{}: reference grid with {} cells for {:?}",
        fit.outcome,
        grid.len(),
        request.specs
    );

    grid.into_iter()
        .map(|row| {
            let (estimate, std_error) = fit.linear_combination(&row.linfct)?;
            let lower = estimate - z * std_error;
            let upper = estimate + z * std_error;
            let to_response = |eta: f64| family.clamp_mu(link.linkinv(eta));
            Ok(MarginalMean {
                cell: row.cell,
                stratum: row.stratum,
                estimate,
                std_error,
                lower,
                upper,
                response: to_response(estimate),
                response_std_error: link.mu_eta(estimate).abs() * std_error,
                response_lower: to_response(lower),
                response_upper: to_response(upper),
                level: request.level,
                linfct: row.linfct,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_z_critical() {
        assert_relative_eq!(z_critical(0.95).unwrap(), 1.959964, epsilon = 1e-6);
        assert!(z_critical(1.0).is_err());
        assert!(z_critical(0.0).is_err());
    }
}
