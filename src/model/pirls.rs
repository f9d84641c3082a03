//! Penalized iteratively reweighted least squares.
//!
//! For fixed random-intercept SDs `sigma_k` and dispersion, finds the joint
//! conditional mode of the fixed effects `beta` and the spherical random
//! effects `u` (with `b_k = sigma_k * u_k`) by Fisher scoring on
//! `-2 loglik(y | beta, u) + |u|^2`, halving steps that do not decrease it.

use crate::data::RandomDesign;
use crate::model::family::Family;
use nalgebra::{DMatrix, DVector};

/// Maximum number of step halvings per iteration.
const MAX_HALVING: usize = 12;

/// Inputs that stay fixed across variance-parameter evaluations.
pub(crate) struct PirlsProblem<'a> {
    pub y: &'a [f64],
    pub x: &'a DMatrix<f64>,
    pub random: &'a RandomDesign,
    pub family: Family,
    pub max_iter: usize,
    pub tol: f64,
}

/// Conditional mode for one setting of the variance parameters.
#[derive(Debug, Clone)]
pub(crate) struct ConditionalMode {
    pub beta: DVector<f64>,
    /// Spherical random effects, one block per grouping factor.
    pub u: DVector<f64>,
    pub mu: Vec<f64>,
    pub loglik: f64,
    /// |u|^2.
    pub penalty: f64,
    /// log det of the random-effect block of the penalized information.
    pub log_det: f64,
    /// Penalized Fisher information over (beta, u) at the mode.
    pub information: DMatrix<f64>,
    pub iterations: usize,
}

impl ConditionalMode {
    /// Laplace approximation to -2 log marginal likelihood.
    pub fn laplace_deviance(&self) -> f64 {
        -2.0 * self.loglik + self.penalty + self.log_det
    }
}

impl<'a> PirlsProblem<'a> {
    fn n_obs(&self) -> usize {
        self.y.len()
    }

    fn n_fixed(&self) -> usize {
        self.x.ncols()
    }

    fn n_random(&self) -> usize {
        self.random.n_random_effects()
    }

    /// Column of `u` loaded by observation `i` for factor `k`.
    fn random_column(&self, offsets: &[usize], k: usize, i: usize) -> usize {
        offsets[k] + self.random.factors[k].group_indices[i]
    }

    fn linear_predictor(
        &self,
        beta: &DVector<f64>,
        u: &DVector<f64>,
        sigmas: &[f64],
        offsets: &[usize],
    ) -> Vec<f64> {
        let xb = self.x * beta;
        (0..self.n_obs())
            .map(|i| {
                let mut eta = xb[i];
                for (k, sigma) in sigmas.iter().enumerate() {
                    eta += sigma * u[self.random_column(offsets, k, i)];
                }
                eta
            })
            .collect()
    }

    fn means(&self, eta: &[f64]) -> Vec<f64> {
        eta.iter().map(|&e| self.family.mean(e)).collect()
    }

    fn loglik(&self, mu: &[f64], dispersion: f64) -> f64 {
        self.y
            .iter()
            .zip(mu)
            .map(|(&y, &m)| self.family.log_density(y, m, dispersion))
            .sum()
    }

    /// Penalized information `A'WA + diag(0, I)` and right-hand side `A'Wz`
    /// for `A = [X, Z Lambda]`.
    fn normal_equations(
        &self,
        eta: &[f64],
        mu: &[f64],
        sigmas: &[f64],
        offsets: &[usize],
        dispersion: f64,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let p = self.n_fixed();
        let dim = p + self.n_random();
        let link = self.family.link();

        let mut h = DMatrix::zeros(dim, dim);
        let mut rhs = DVector::zeros(dim);
        let mut row: Vec<(usize, f64)> = Vec::with_capacity(p + sigmas.len());

        for i in 0..self.n_obs() {
            let d = link.mu_eta(eta[i]);
            let (score, info) = self.family.score_info(self.y[i], mu[i], dispersion);
            let w = info * d * d;
            // w * z with z = eta + score / (info * d)
            let wz = w * eta[i] + d * score;

            row.clear();
            row.extend((0..p).map(|j| (j, self.x[(i, j)])));
            for (k, &sigma) in sigmas.iter().enumerate() {
                row.push((p + self.random_column(offsets, k, i), sigma));
            }

            for &(a, va) in &row {
                rhs[a] += wz * va;
                for &(b, vb) in &row {
                    h[(a, b)] += w * va * vb;
                }
            }
        }
        for j in p..dim {
            h[(j, j)] += 1.0;
        }
        (h, rhs)
    }

    /// Find the conditional mode starting from `beta_start` and `u = 0`.
    pub fn solve(
        &self,
        sigmas: &[f64],
        dispersion: f64,
        beta_start: &DVector<f64>,
    ) -> Result<ConditionalMode, String> {
        let p = self.n_fixed();
        let q = self.n_random();
        let offsets = self.random.offsets();

        let mut beta = beta_start.clone();
        let mut u = DVector::zeros(q);
        let mut eta = self.linear_predictor(&beta, &u, sigmas, &offsets);
        let mut mu = self.means(&eta);
        let mut pdev = -2.0 * self.loglik(&mu, dispersion);
        if !pdev.is_finite() {
            return Err("non-finite deviance at starting values".to_string());
        }

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iter {
            iterations += 1;
            let (h, rhs) = self.normal_equations(&eta, &mu, sigmas, &offsets, dispersion);
            let target = h
                .cholesky()
                .ok_or("penalized information is not positive definite")?
                .solve(&rhs);
            let beta_target = target.rows(0, p).clone_owned();
            let u_target = target.rows(p, q).clone_owned();

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVING {
                let beta_new = &beta + (&beta_target - &beta) * step;
                let u_new = &u + (&u_target - &u) * step;
                let eta_new = self.linear_predictor(&beta_new, &u_new, sigmas, &offsets);
                let mu_new = self.means(&eta_new);
                let pdev_new = -2.0 * self.loglik(&mu_new, dispersion) + u_new.norm_squared();
                if pdev_new.is_finite() && pdev_new <= pdev + 1e-12 * pdev.abs() {
                    accepted = Some((beta_new, u_new, eta_new, mu_new, pdev_new));
                    break;
                }
                step *= 0.5;
            }

            // No decrease along the scoring direction: already at the mode.
            let Some((beta_new, u_new, eta_new, mu_new, pdev_new)) = accepted else {
                converged = true;
                break;
            };

            let change = (pdev - pdev_new).abs();
            beta = beta_new;
            u = u_new;
            eta = eta_new;
            mu = mu_new;
            pdev = pdev_new;

            if change < self.tol * (pdev.abs() + 0.1) {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(format!("PIRLS did not converge in {} iterations", self.max_iter));
        }
        if beta.iter().chain(u.iter()).any(|v| !v.is_finite()) {
            return Err("non-finite conditional mode".to_string());
        }

        let (information, _) = self.normal_equations(&eta, &mu, sigmas, &offsets, dispersion);
        let log_det = if q > 0 {
            let block = information.view((p, p), (q, q)).clone_owned();
            let chol = block
                .cholesky()
                .ok_or("random-effect information is not positive definite")?;
            2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>()
        } else {
            0.0
        };

        Ok(ConditionalMode {
            penalty: u.norm_squared(),
            loglik: self.loglik(&mu, dispersion),
            beta,
            u,
            mu,
            log_det,
            information,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataTable, MixedFormula};
    use approx::assert_relative_eq;

    fn no_random() -> RandomDesign {
        RandomDesign { factors: vec![] }
    }

    #[test]
    fn test_gaussian_matches_least_squares() {
        let y = [1.0, 2.0, 2.5, 4.0, 5.5];
        let x = DMatrix::from_row_slice(
            5,
            2,
            &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0, 1.0, 4.0],
        );
        let random = no_random();
        let problem = PirlsProblem {
            y: &y,
            x: &x,
            random: &random,
            family: Family::gaussian(),
            max_iter: 50,
            tol: 1e-12,
        };
        let mode = problem.solve(&[], 1.0, &DVector::zeros(2)).unwrap();

        // Closed-form OLS: slope = Sxy / Sxx, intercept = ybar - slope * xbar
        assert_relative_eq!(mode.beta[1], 1.1, epsilon = 1e-8);
        assert_relative_eq!(mode.beta[0], 3.0 - 1.1 * 2.0, epsilon = 1e-8);
        assert_eq!(mode.log_det, 0.0);
    }

    #[test]
    fn test_random_effects_shrink_toward_zero() {
        let table = DataTable::new()
            .with_categorical("subject", &["a", "a", "b", "b", "c", "c"])
            .unwrap();
        let formula = MixedFormula::parse("~ 1 + (1 | subject)").unwrap();
        let random = RandomDesign::from_formula(&table, &formula, &[0, 1, 2, 3, 4, 5]).unwrap();
        let y = [1.0, 1.2, 2.0, 2.2, 3.0, 3.2];
        let x = DMatrix::from_element(6, 1, 1.0);
        let problem = PirlsProblem {
            y: &y,
            x: &x,
            random: &random,
            family: Family::gaussian(),
            max_iter: 50,
            tol: 1e-12,
        };
        let mode = problem.solve(&[1.0], 0.5, &DVector::zeros(1)).unwrap();

        assert_relative_eq!(mode.beta[0], 2.1, epsilon = 1e-8);
        // Group means deviate by -1, 0, +1; shrunk by n / (n + sd^2 / sigma^2) = 2 / 2.25
        assert_relative_eq!(mode.u[0], -2.0 / 2.25, epsilon = 1e-8);
        assert_relative_eq!(mode.u[2], 2.0 / 2.25, epsilon = 1e-8);
        assert!(mode.log_det > 0.0);
    }

    #[test]
    fn test_poisson_like_negative_binomial_converges() {
        let y = [0.0, 1.0, 3.0, 2.0, 5.0, 8.0, 4.0, 9.0];
        let x = DMatrix::from_fn(8, 2, |i, j| if j == 0 { 1.0 } else { (i / 4) as f64 });
        let random = no_random();
        let problem = PirlsProblem {
            y: &y,
            x: &x,
            random: &random,
            family: Family::negative_binomial(),
            max_iter: 50,
            tol: 1e-12,
        };
        let mode = problem.solve(&[], 5.0, &DVector::zeros(2)).unwrap();

        // Log link with a single binary covariate reproduces the group means
        assert_relative_eq!(mode.beta[0].exp(), 1.5, epsilon = 1e-5);
        assert_relative_eq!((mode.beta[0] + mode.beta[1]).exp(), 6.5, epsilon = 1e-5);
    }
}
