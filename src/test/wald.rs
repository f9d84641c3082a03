//! Wald tests for fixed-effect coefficients.

use crate::error::{GlmmError, Result};
use crate::model::FittedModel;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Wald test of a single coefficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResultSingle {
    /// Coefficient name, e.g. `treatmentLPS`.
    pub coefficient: String,
    /// Estimated coefficient value (link scale).
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// z statistic.
    pub statistic: f64,
    /// P-value (two-sided).
    pub p_value: f64,
}

/// Coefficient table of one fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResult {
    /// Outcome the model was fitted to.
    pub outcome: String,
    pub results: Vec<WaldResultSingle>,
}

impl WaldResult {
    /// Number of coefficients.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get p-values for all coefficients.
    pub fn p_values(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.p_value).collect()
    }

    /// Get the test of a specific coefficient.
    pub fn get(&self, coefficient: &str) -> Option<&WaldResultSingle> {
        self.results.iter().find(|r| r.coefficient == coefficient)
    }
}

/// Wald z tests of H0: beta = 0 for every fixed-effect coefficient.
///
/// Uses the standard normal reference for all families; a coefficient with a
/// non-positive SE gets NaN statistic and p-value.
pub fn test_wald(fit: &FittedModel) -> Result<WaldResult> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| GlmmError::InvalidParameter(e.to_string()))?;

    let results = fit
        .coefficient_names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let statistic = fit.z_statistic(j).unwrap_or(f64::NAN);
            let p_value = if statistic.is_nan() {
                f64::NAN
            } else {
                2.0 * (1.0 - normal.cdf(statistic.abs()))
            };
            WaldResultSingle {
                coefficient: name.clone(),
                estimate: fit.coefficients[j],
                std_error: fit.std_errors[j],
                statistic,
                p_value,
            }
        })
        .collect();

    Ok(WaldResult {
        outcome: fit.outcome.clone(),
        results,
    })
}

/// Wald test of one named coefficient.
pub fn test_wald_coefficient(fit: &FittedModel, coefficient: &str) -> Result<WaldResultSingle> {
    let table = test_wald(fit)?;
    table.get(coefficient).cloned().ok_or_else(|| {
        GlmmError::InvalidParameter(format!(
            "Coefficient '{}' not found. Available: {:?}",
            coefficient, fit.coefficient_names
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataTable;
    use crate::model::{fit_glmm, Family, GlmmConfig, ModelSpec};
    use approx::assert_relative_eq;

    fn fit() -> FittedModel {
        let table = DataTable::new()
            .with_categorical("treatment", &["C", "C", "C", "C", "T", "T", "T", "T"])
            .unwrap()
            .with_continuous("y", &[4.1, 3.9, 4.3, 3.7, 6.2, 5.8, 6.1, 5.9])
            .unwrap();
        let spec = ModelSpec::new("y", "~ treatment", Family::gaussian()).unwrap();
        fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap()
    }

    #[test]
    fn test_coefficient_table() {
        let fit = fit();
        let table = test_wald(&fit).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.outcome, "y");

        let t = table.get("treatmentT").unwrap();
        assert_relative_eq!(t.statistic, t.estimate / t.std_error, epsilon = 1e-12);
        assert!(t.p_value < 1e-6);
        assert!(table.p_values().iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_unknown_coefficient() {
        let fit = fit();
        assert!(test_wald_coefficient(&fit, "treatmentT").is_ok());
        assert!(matches!(
            test_wald_coefficient(&fit, "dose"),
            Err(GlmmError::InvalidParameter(_))
        ));
    }
}
