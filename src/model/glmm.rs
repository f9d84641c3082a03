//! Generalized linear mixed models fitted by Laplace approximation.
//!
//! Variance parameters (random-intercept SDs and the family dispersion) are
//! optimized on the log scale by Nelder-Mead; for each candidate the
//! conditional mode of fixed and random effects comes from PIRLS.
//! Without random intercepts the objective is the ordinary ML deviance.

use crate::data::{DataTable, DesignCoding, DesignMatrix, RandomDesign, VariableType};
use crate::error::{GlmmError, Result};
use crate::model::family::Family;
use crate::model::pirls::{ConditionalMode, PirlsProblem};
use crate::model::spec::ModelSpec;
use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cost returned for variance parameters at which PIRLS fails.
const FAILED_COST: f64 = 1e100;

/// Bounds on log-scale variance parameters.
const LOG_PARAM_MIN: f64 = -20.0;
const LOG_PARAM_MAX: f64 = 15.0;

/// Random-intercept SD below which a fit is reported as singular.
const BOUNDARY_SD: f64 = 1e-4;

/// Configuration for GLMM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmmConfig {
    /// Maximum Nelder-Mead iterations over the variance parameters.
    pub max_iter: u64,
    /// Stop when the SD of the simplex objective values falls below this.
    pub tol: f64,
    /// Maximum PIRLS iterations per objective evaluation.
    pub pirls_max_iter: usize,
    /// Relative deviance change at which PIRLS stops.
    pub pirls_tol: f64,
}

impl Default for GlmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 2000,
            tol: 1e-8,
            pirls_max_iter: 50,
            pirls_tol: 1e-10,
        }
    }
}

/// SD of one random-intercept term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceComponent {
    /// Grouping factor name.
    pub group: String,
    /// Number of levels.
    pub n_groups: usize,
    /// Standard deviation on the link scale.
    pub sd: f64,
}

/// Conditional modes (BLUPs) of one grouping factor, link scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalModes {
    pub group: String,
    pub levels: Vec<String>,
    pub values: Vec<f64>,
}

/// A fitted GLMM.
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// Outcome column.
    pub outcome: String,
    /// Model formula as written.
    pub formula: String,
    pub family: Family,
    pub coefficient_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// Covariance matrix of the fixed effects.
    pub covariance: DMatrix<f64>,
    /// Family dispersion parameter (see [`Family::dispersion_name`]).
    pub dispersion: f64,
    pub variance_components: Vec<VarianceComponent>,
    pub conditional_modes: Vec<ConditionalModes>,
    /// Laplace-approximated log-likelihood.
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    /// Number of estimated parameters (fixed effects, SDs and dispersion).
    pub n_parameters: usize,
    pub n_obs: usize,
    /// Rows dropped for missing values.
    pub n_dropped: usize,
    /// Outer optimizer iterations.
    pub iterations: u64,
    /// PIRLS iterations at the optimum.
    pub pirls_iterations: usize,
    /// Fitted means on the response scale.
    pub fitted_values: Vec<f64>,
    coding: DesignCoding,
}

impl FittedModel {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Get a coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name).map(|i| self.coefficients[i])
    }

    /// Get a standard error by name.
    pub fn std_error(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name).map(|i| self.std_errors[i])
    }

    /// Calculate the z-statistic for a coefficient.
    pub fn z_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }

    /// Number of fixed-effect coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// Design coding for building new linear-predictor rows.
    pub fn coding(&self) -> &DesignCoding {
        &self.coding
    }

    /// Scale used for standardized effect sizes.
    pub fn sigma(&self) -> f64 {
        self.family.sigma(self.dispersion)
    }

    /// Estimate and SE of `l' beta`.
    pub fn linear_combination(&self, l: &[f64]) -> Result<(f64, f64)> {
        if l.len() != self.n_coefficients() {
            return Err(GlmmError::DimensionMismatch {
                expected: self.n_coefficients(),
                actual: l.len(),
            });
        }
        let l = DVector::from_column_slice(l);
        let estimate = l.dot(&DVector::from_column_slice(&self.coefficients));
        let variance = (l.transpose() * &self.covariance * &l)[(0, 0)];
        if !variance.is_finite() || variance <= 0.0 {
            return Err(self.singular_covariance(format!(
                "variance of linear combination is {}",
                variance
            )));
        }
        Ok((estimate, variance.sqrt()))
    }

    pub(crate) fn unsupported_cell(&self, detail: String) -> GlmmError {
        GlmmError::UnsupportedCell {
            outcome: self.outcome.clone(),
            formula: self.formula.clone(),
            detail,
        }
    }

    pub(crate) fn singular_covariance(&self, detail: String) -> GlmmError {
        GlmmError::SingularCovariance {
            outcome: self.outcome.clone(),
            formula: self.formula.clone(),
            detail,
        }
    }

    pub(crate) fn insufficient_pairs(&self, n_cells: usize, context: String) -> GlmmError {
        GlmmError::InsufficientPairs {
            outcome: self.outcome.clone(),
            formula: self.formula.clone(),
            n_cells,
            context,
        }
    }

    /// Whether any random-intercept SD collapsed to the boundary.
    pub fn is_singular(&self) -> bool {
        self.variance_components.iter().any(|v| v.sd < BOUNDARY_SD)
    }
}

/// Laplace objective over log-scale variance parameters.
struct LaplaceObjective<'a> {
    problem: PirlsProblem<'a>,
    beta_start: DVector<f64>,
}

impl LaplaceObjective<'_> {
    /// Split log-scale parameters into SDs and dispersion.
    fn unpack(params: &[f64]) -> (Vec<f64>, f64) {
        let natural: Vec<f64> = params
            .iter()
            .map(|p| p.clamp(LOG_PARAM_MIN, LOG_PARAM_MAX).exp())
            .collect();
        let (sigmas, dispersion) = natural.split_at(natural.len() - 1);
        (sigmas.to_vec(), dispersion[0])
    }

    fn mode(&self, params: &[f64]) -> std::result::Result<ConditionalMode, String> {
        let (sigmas, dispersion) = Self::unpack(params);
        self.problem.solve(&sigmas, dispersion, &self.beta_start)
    }
}

impl CostFunction for LaplaceObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        match self.mode(params) {
            Ok(mode) => {
                let deviance = mode.laplace_deviance();
                Ok(if deviance.is_finite() { deviance } else { FAILED_COST })
            }
            Err(_) => Ok(FAILED_COST),
        }
    }
}

/// Fit a GLMM to one outcome.
///
/// Rows with a missing value in any column used by the model are dropped
/// (with a warning). The outcome must lie in the family's support and every
/// grouping factor needs at least two levels.
///
/// # Errors
/// * `DomainViolation` - outcome outside the family's support
/// * `RankDeficiency` - fixed-effect design is not of full column rank
/// * `ConvergenceFailure` - optimizer hit its cap, the mode could not be found,
///   or a fitted mean is pinned at the edge of the support (separation)
pub fn fit_glmm(table: &DataTable, spec: &ModelSpec, config: &GlmmConfig) -> Result<FittedModel> {
    let formula_str = spec.formula.to_string();
    let convergence = |detail: String| GlmmError::ConvergenceFailure {
        outcome: spec.outcome.clone(),
        formula: formula_str.clone(),
        detail,
    };

    let retyped;
    let table = if spec.factors.is_empty() {
        table
    } else {
        let types: HashMap<String, VariableType> = spec
            .factors
            .iter()
            .map(|f| (f.clone(), VariableType::Categorical))
            .collect();
        retyped = table.clone().with_column_types(types)?;
        &retyped
    };

    let columns = spec.columns();
    let rows = table.complete_rows(&columns)?;
    let n_dropped = table.n_rows() - rows.len();
    if n_dropped > 0 {
        warn!(
            "{}: dropped {} of {} rows with missing values",
            spec.outcome,
            n_dropped,
            table.n_rows()
        );
    }
    if rows.is_empty() {
        return Err(GlmmError::EmptyData(format!(
            "No complete observations for '{}'",
            spec.outcome
        )));
    }

    let y = outcome_values(table, spec, &rows)?;

    let design = DesignMatrix::from_formula(table, &spec.formula.fixed, &rows)?;
    let rank = design.rank();
    if rank < design.n_coefficients() {
        return Err(GlmmError::RankDeficiency {
            outcome: spec.outcome.clone(),
            formula: formula_str.clone(),
            rank,
            n_coefficients: design.n_coefficients(),
        });
    }
    if rows.len() <= design.n_coefficients() {
        return Err(GlmmError::InvalidParameter(format!(
            "Model for '{}' is saturated ({} observations, {} coefficients)",
            spec.outcome,
            rows.len(),
            design.n_coefficients()
        )));
    }

    let random = RandomDesign::from_formula(table, &spec.formula, &rows)?;
    for factor in &random.factors {
        if factor.n_groups() < 2 {
            return Err(GlmmError::InvalidParameter(format!(
                "Grouping factor '{}' needs at least two levels, got {}",
                factor.name,
                factor.n_groups()
            )));
        }
    }

    let problem = PirlsProblem {
        y: &y,
        x: design.matrix(),
        random: &random,
        family: spec.family,
        max_iter: config.pirls_max_iter,
        tol: config.pirls_tol,
    };

    // Fixed-effects-only fit for starting values.
    let beta_start = initial_coefficients(&y, design.matrix(), spec.family)
        .ok_or_else(|| convergence("could not compute starting coefficients".to_string()))?;
    let no_sigmas = vec![0.0; random.n_factors()];
    let glm_dispersion = spec.family.initial_dispersion(&y, &beta_means(&beta_start, &design, spec.family));
    let glm = problem
        .solve(&no_sigmas, glm_dispersion, &beta_start)
        .map_err(|e| convergence(format!("fixed-effects start: {}", e)))?;
    let dispersion0 = spec.family.initial_dispersion(&y, &glm.mu);
    let sigma0 = link_residual_sd(&y, &glm.mu, spec.family).max(0.05) / 2.0;

    let mut x0: Vec<f64> = vec![sigma0.ln(); random.n_factors()];
    x0.push(dispersion0.ln());
    let mut simplex = vec![x0.clone()];
    for j in 0..x0.len() {
        let mut vertex = x0.clone();
        vertex[j] += if j < random.n_factors() { 1.0 } else { 0.5 };
        simplex.push(vertex);
    }

    let objective = LaplaceObjective {
        problem,
        beta_start: glm.beta.clone(),
    };
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(config.tol)
        .map_err(|e| convergence(e.to_string()))?;
    let res = Executor::new(objective, solver)
        .configure(|state| state.max_iters(config.max_iter))
        .run()
        .map_err(|e| convergence(e.to_string()))?;

    let iterations = res.state().get_iter();
    let best = res
        .state()
        .get_best_param()
        .cloned()
        .ok_or_else(|| convergence("optimizer returned no parameters".to_string()))?;
    debug!(
        "{}: Nelder-Mead stopped after {} iterations, objective {:.6}",
        spec.outcome,
        iterations,
        res.state().get_best_cost()
    );
    if iterations >= config.max_iter {
        return Err(convergence(format!(
            "variance parameters did not converge in {} iterations",
            config.max_iter
        )));
    }

    let objective = LaplaceObjective {
        problem: PirlsProblem {
            y: &y,
            x: design.matrix(),
            random: &random,
            family: spec.family,
            max_iter: config.pirls_max_iter,
            tol: config.pirls_tol,
        },
        beta_start: glm.beta,
    };
    let mode = objective
        .mode(&best)
        .map_err(|e| convergence(format!("at the optimum: {}", e)))?;
    let pinned: Vec<usize> = rows
        .iter()
        .zip(&mode.mu)
        .filter(|(_, m)| spec.family.is_boundary_mean(**m))
        .map(|(&r, _)| r)
        .collect();
    if let Some(first) = pinned.first() {
        return Err(convergence(format!(
            "separation: {} fitted mean(s) at the boundary of the {} support, first at row {}",
            pinned.len(),
            spec.family,
            first
        )));
    }
    let (sigmas, dispersion) = LaplaceObjective::unpack(&best);

    let p = design.n_coefficients();
    let inverse = mode
        .information
        .clone()
        .cholesky()
        .ok_or_else(|| convergence("information matrix is not positive definite".to_string()))?
        .inverse();
    let covariance = inverse.view((0, 0), (p, p)).clone_owned();
    let std_errors: Vec<f64> = (0..p).map(|j| covariance[(j, j)].sqrt()).collect();
    if std_errors.iter().chain(mode.beta.iter()).any(|v| !v.is_finite()) {
        return Err(convergence("non-finite estimates".to_string()));
    }

    let offsets = random.offsets();
    let variance_components: Vec<VarianceComponent> = random
        .factors
        .iter()
        .zip(&sigmas)
        .map(|(f, &sd)| VarianceComponent {
            group: f.name.clone(),
            n_groups: f.n_groups(),
            sd,
        })
        .collect();
    let conditional_modes: Vec<ConditionalModes> = random
        .factors
        .iter()
        .enumerate()
        .map(|(k, f)| ConditionalModes {
            group: f.name.clone(),
            levels: f.group_ids.clone(),
            values: (0..f.n_groups())
                .map(|g| sigmas[k] * mode.u[offsets[k] + g])
                .collect(),
        })
        .collect();
    for vc in &variance_components {
        if vc.sd < BOUNDARY_SD {
            warn!(
                "{}: random intercept SD for '{}' is at the boundary ({:.2e})",
                spec.outcome, vc.group, vc.sd
            );
        }
    }

    let deviance = mode.laplace_deviance();
    let n_parameters = p + random.n_factors() + 1;
    let n_obs = rows.len();
    let log_likelihood = -0.5 * deviance;
    let aic = deviance + 2.0 * n_parameters as f64;
    let bic = deviance + (n_obs as f64).ln() * n_parameters as f64;

    info!(
        "{}: fitted {} with {} observations (logLik {:.3}, {} = {:.4})",
        spec.outcome,
        spec.family,
        n_obs,
        log_likelihood,
        spec.family.dispersion_name(),
        dispersion
    );

    Ok(FittedModel {
        outcome: spec.outcome.clone(),
        formula: formula_str,
        family: spec.family,
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: mode.beta.iter().copied().collect(),
        std_errors,
        covariance,
        dispersion,
        variance_components,
        conditional_modes,
        log_likelihood,
        aic,
        bic,
        n_parameters,
        n_obs,
        n_dropped,
        iterations,
        pirls_iterations: mode.iterations,
        fitted_values: mode.mu,
        coding: design.coding().clone(),
    })
}

/// Outcome values for `rows`, checked against the family's support.
fn outcome_values(table: &DataTable, spec: &ModelSpec, rows: &[usize]) -> Result<Vec<f64>> {
    let column = table.column(&spec.outcome)?;
    let mut y = Vec::with_capacity(rows.len());
    let mut violations = Vec::new();
    for &r in rows {
        let value = column[r]
            .as_f64()
            .ok_or_else(|| GlmmError::InvalidVariableType {
                column: spec.outcome.clone(),
                reason: format!("outcome must be numeric, found {:?}", column[r]),
            })?;
        if let Err(detail) = spec.family.check_value(value) {
            violations.push(format!("row {}: {}", r, detail));
        }
        y.push(value);
    }
    if let Some(first) = violations.first() {
        return Err(GlmmError::DomainViolation {
            outcome: spec.outcome.clone(),
            family: spec.family.to_string(),
            detail: format!("{} value(s) outside the support, first at {}", violations.len(), first),
        });
    }
    Ok(y)
}

/// Least-squares coefficients for the linked starting means.
fn initial_coefficients(y: &[f64], x: &DMatrix<f64>, family: Family) -> Option<DVector<f64>> {
    let link = family.link();
    let eta = DVector::from_iterator(
        y.len(),
        y.iter().map(|&v| link.link(family.clamp_mu(family.initial_mu(v)))),
    );
    x.clone().svd(true, true).solve(&eta, 1e-12).ok()
}

fn beta_means(beta: &DVector<f64>, design: &DesignMatrix, family: Family) -> Vec<f64> {
    (design.matrix() * beta).iter().map(|&e| family.mean(e)).collect()
}

/// SD of residuals on the link scale, used to seed random-intercept SDs.
fn link_residual_sd(y: &[f64], mu: &[f64], family: Family) -> f64 {
    let link = family.link();
    let resid: Vec<f64> = y
        .iter()
        .zip(mu)
        .map(|(&v, &m)| link.link(family.clamp_mu(family.initial_mu(v))) - link.link(m))
        .collect();
    let n = resid.len() as f64;
    let mean = resid.iter().sum::<f64>() / n;
    (resid.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_group_table(values: &[f64], groups: &[&str]) -> DataTable {
        DataTable::new()
            .with_categorical("treatment", groups)
            .unwrap()
            .with_continuous("y", values)
            .unwrap()
    }

    #[test]
    fn test_gaussian_fixed_effects_match_ols() {
        let y = [4.1, 3.9, 4.3, 3.7, 6.2, 5.8, 6.1, 5.9];
        let groups = ["C", "C", "C", "C", "T", "T", "T", "T"];
        let table = two_group_table(&y, &groups);
        let spec = ModelSpec::new("y", "~ treatment", Family::gaussian()).unwrap();
        let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();

        assert_relative_eq!(fit.coefficients[0], 4.0, epsilon = 1e-6);
        assert_relative_eq!(fit.coefficient("treatmentT").unwrap(), 2.0, epsilon = 1e-6);
        // ML residual SD: sqrt(RSS / n) with RSS = 0.2 + 0.1
        assert_relative_eq!(fit.dispersion, (0.3f64 / 8.0).sqrt(), epsilon = 1e-4);
        // SE of the difference: sd * sqrt(1/4 + 1/4)
        assert_relative_eq!(
            fit.std_error("treatmentT").unwrap(),
            fit.dispersion * 0.5f64.sqrt(),
            epsilon = 1e-6
        );
        assert!(fit.variance_components.is_empty());
        assert_eq!(fit.n_parameters, 3);
    }

    #[test]
    fn test_domain_violation() {
        let table = two_group_table(&[0.2, 0.4, 1.0, 0.5], &["C", "C", "T", "T"]);
        let spec = ModelSpec::new("y", "~ treatment", Family::beta()).unwrap();
        let err = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap_err();
        assert!(matches!(err, GlmmError::DomainViolation { .. }));
    }

    #[test]
    fn test_rank_deficiency() {
        let table = DataTable::new()
            .with_categorical("treatment", &["C", "C", "T", "T", "C", "T"])
            .unwrap()
            .with_categorical("arm", &["C", "C", "T", "T", "C", "T"])
            .unwrap()
            .with_continuous("y", &[1.0, 1.2, 2.0, 2.1, 0.9, 1.8])
            .unwrap();
        let spec = ModelSpec::new("y", "~ treatment + arm", Family::gaussian()).unwrap();
        let err = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap_err();
        assert!(matches!(err, GlmmError::RankDeficiency { rank: 2, n_coefficients: 3, .. }));
    }

    #[test]
    fn test_single_level_grouping_rejected() {
        let table = two_group_table(&[1.0, 2.0, 3.0, 4.0], &["C", "C", "T", "T"])
            .with_categorical("mouse", &["M1", "M1", "M1", "M1"])
            .unwrap();
        let spec = ModelSpec::new("y", "~ treatment + (1 | mouse)", Family::gaussian()).unwrap();
        assert!(matches!(
            fit_glmm(&table, &spec, &GlmmConfig::default()),
            Err(GlmmError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_missing_rows_dropped() {
        let table = DataTable::new()
            .with_raw_column("treatment", &["C", "C", "C", "T", "T", "T", "T"])
            .unwrap()
            .with_raw_column("y", &["1.0", "1.4", "NA", "2.0", "2.4", "2.2", "1.8"])
            .unwrap();
        let spec = ModelSpec::new("y", "~ treatment", Family::gaussian()).unwrap();
        let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();
        assert_eq!(fit.n_obs, 6);
        assert_eq!(fit.n_dropped, 1);
        assert_relative_eq!(fit.coefficients[0], 1.2, epsilon = 1e-6);
    }

    #[test]
    fn test_random_intercept_recovered() {
        // Five subjects with offsets -2..2 and tiny within-subject noise.
        let mut subjects = Vec::new();
        let mut y = Vec::new();
        for s in 0..5 {
            for e in [-0.1, 0.0, 0.1, 0.05, -0.05] {
                subjects.push(format!("S{}", s));
                y.push(10.0 + (s as f64 - 2.0) + e);
            }
        }
        let table = DataTable::new()
            .with_categorical("subject", &subjects)
            .unwrap()
            .with_continuous("y", &y)
            .unwrap();
        let spec = ModelSpec::new("y", "~ 1 + (1 | subject)", Family::gaussian()).unwrap();
        let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();

        assert_relative_eq!(fit.coefficients[0], 10.0, epsilon = 1e-4);
        let sd = fit.variance_components[0].sd;
        // ML estimate of the between-subject SD is close to sqrt(mean(offset^2)) = sqrt(2)
        assert!(sd > 1.1 && sd < 1.6, "sd = {}", sd);
        assert!(fit.dispersion < 0.1);
        let blups = &fit.conditional_modes[0];
        assert_eq!(blups.levels[0], "S0");
        assert!(blups.values[0] < -1.9 && blups.values[4] > 1.9);
        assert!(!fit.is_singular());
    }

    #[test]
    fn test_separated_cell_rejected() {
        // Every control count is zero, so the control mean runs to the clamp.
        let table = two_group_table(
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0, 5.0, 2.0, 4.0, 6.0, 3.0],
            &["C", "C", "C", "C", "C", "C", "T", "T", "T", "T", "T", "T"],
        );
        let spec = ModelSpec::new("y", "~ treatment", Family::negative_binomial()).unwrap();
        let err = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap_err();
        match err {
            GlmmError::ConvergenceFailure { outcome, detail, .. } => {
                assert_eq!(outcome, "y");
                assert!(detail.contains("boundary"), "detail: {}", detail);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_iteration_cap_reported() {
        let mut subjects = Vec::new();
        let mut y = Vec::new();
        for s in 0..5 {
            for e in [-0.3, 0.1, 0.2] {
                subjects.push(format!("S{}", s));
                y.push(5.0 + 0.5 * s as f64 + e);
            }
        }
        let table = DataTable::new()
            .with_categorical("subject", &subjects)
            .unwrap()
            .with_continuous("y", &y)
            .unwrap();
        let spec = ModelSpec::new("y", "~ 1 + (1 | subject)", Family::gaussian()).unwrap();
        let config = GlmmConfig {
            max_iter: 2,
            ..GlmmConfig::default()
        };
        let err = fit_glmm(&table, &spec, &config).unwrap_err();
        match err {
            GlmmError::ConvergenceFailure { detail, .. } => {
                assert!(detail.contains("did not converge in 2 iterations"), "detail: {}", detail);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_zero_linear_combination_is_singular() {
        let table = two_group_table(&[4.1, 3.9, 4.3, 6.2, 5.8, 6.1], &["C", "C", "C", "T", "T", "T"]);
        let spec = ModelSpec::new("y", "~ treatment", Family::gaussian()).unwrap();
        let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();

        let (estimate, se) = fit.linear_combination(&[1.0, 1.0]).unwrap();
        assert_relative_eq!(estimate, 6.0 + 1.0 / 30.0, epsilon = 1e-6);
        assert!(se > 0.0);

        let err = fit.linear_combination(&[0.0, 0.0]).unwrap_err();
        match err {
            GlmmError::SingularCovariance { outcome, formula, .. } => {
                assert_eq!(outcome, "y");
                assert_eq!(formula, fit.formula);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(matches!(
            fit.linear_combination(&[1.0]),
            Err(GlmmError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_factor_override() {
        let table = DataTable::new()
            .with_continuous("distance", &[10.0, 10.0, 20.0, 20.0, 30.0, 30.0])
            .unwrap()
            .with_continuous("y", &[1.0, 1.2, 2.0, 2.2, 1.5, 1.7])
            .unwrap();
        let spec = ModelSpec::new("y", "~ distance", Family::gaussian())
            .unwrap()
            .with_factor("distance");
        let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();
        assert_eq!(
            fit.coefficient_names,
            vec!["(Intercept)", "distance20", "distance30"]
        );
        assert_relative_eq!(fit.coefficient("distance20").unwrap(), 1.0, epsilon = 1e-6);
    }
}
