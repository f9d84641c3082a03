//! Error families and link functions.
//!
//! Each family has a single dispersion-type parameter, held on the natural
//! scale the family is usually reported on:
//!
//! | family            | parameter | variance            | sigma (effect-size scale) |
//! |-------------------|-----------|---------------------|---------------------------|
//! | gaussian          | sd        | sd^2                | sd                        |
//! | gamma             | shape nu  | mu^2 / nu           | 1 / sqrt(nu)              |
//! | beta              | precision | mu(1-mu) / (1+phi)  | phi                       |
//! | negative binomial | size      | mu + mu^2 / theta   | theta                     |

use crate::error::{GlmmError, Result};
use serde::{Deserialize, Serialize};
use statrs::function::erf::{erfc, erfc_inv};
use statrs::function::gamma::{digamma, ln_gamma};
use std::f64::consts::{PI, SQRT_2};

/// Smallest fitted mean allowed away from a boundary of the response domain.
const MU_EPS: f64 = 1e-10;

/// Fitted means within this distance of a boundary are treated as pinned.
const BOUNDARY_MU: f64 = 10.0 * MU_EPS;

/// Link function between the linear predictor and the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    Identity,
    Log,
    Logit,
    Probit,
}

impl Link {
    /// eta = g(mu).
    pub fn link(&self, mu: f64) -> f64 {
        match self {
            Link::Identity => mu,
            Link::Log => mu.ln(),
            Link::Logit => (mu / (1.0 - mu)).ln(),
            Link::Probit => -SQRT_2 * erfc_inv(2.0 * mu),
        }
    }

    /// mu = g^-1(eta).
    pub fn linkinv(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Log => eta.exp(),
            Link::Logit => 1.0 / (1.0 + (-eta).exp()),
            Link::Probit => 0.5 * erfc(-eta / SQRT_2),
        }
    }

    /// Derivative d mu / d eta.
    pub fn mu_eta(&self, eta: f64) -> f64 {
        match self {
            Link::Identity => 1.0,
            Link::Log => eta.exp(),
            Link::Logit => {
                let mu = self.linkinv(eta);
                mu * (1.0 - mu)
            }
            Link::Probit => (-0.5 * eta * eta).exp() / (2.0 * PI).sqrt(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Link::Identity => "identity",
            Link::Log => "log",
            Link::Logit => "logit",
            Link::Probit => "probit",
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Family names as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyName {
    Gaussian,
    Gamma,
    Beta,
    NegativeBinomial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FamilyRepr {
    name: FamilyName,
    #[serde(default)]
    link: Option<Link>,
}

/// Error family with its link.
///
/// Construct through [`Family::new`] or the per-family helpers so that the
/// link is always one the family supports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FamilyRepr", into = "FamilyRepr")]
pub enum Family {
    Gaussian(Link),
    Gamma(Link),
    Beta(Link),
    NegativeBinomial(Link),
}

impl TryFrom<FamilyRepr> for Family {
    type Error = GlmmError;

    fn try_from(repr: FamilyRepr) -> Result<Self> {
        match repr.link {
            Some(link) => Family::new(repr.name, link),
            None => Ok(Family::canonical(repr.name)),
        }
    }
}

impl From<Family> for FamilyRepr {
    fn from(family: Family) -> Self {
        FamilyRepr {
            name: family.kind(),
            link: Some(family.link()),
        }
    }
}

impl Family {
    /// Build a family, rejecting links it does not support.
    pub fn new(name: FamilyName, link: Link) -> Result<Self> {
        let family = match name {
            FamilyName::Gaussian => Family::Gaussian(link),
            FamilyName::Gamma => Family::Gamma(link),
            FamilyName::Beta => Family::Beta(link),
            FamilyName::NegativeBinomial => Family::NegativeBinomial(link),
        };
        if !family.allowed_links().contains(&link) {
            return Err(GlmmError::InvalidParameter(format!(
                "The {} family does not support the {} link (allowed: {:?})",
                family.name(),
                link,
                family.allowed_links()
            )));
        }
        Ok(family)
    }

    /// Family with its default link.
    pub fn canonical(name: FamilyName) -> Self {
        match name {
            FamilyName::Gaussian => Family::Gaussian(Link::Identity),
            FamilyName::Gamma => Family::Gamma(Link::Log),
            FamilyName::Beta => Family::Beta(Link::Logit),
            FamilyName::NegativeBinomial => Family::NegativeBinomial(Link::Log),
        }
    }

    pub fn gaussian() -> Self {
        Family::canonical(FamilyName::Gaussian)
    }

    pub fn gamma() -> Self {
        Family::canonical(FamilyName::Gamma)
    }

    pub fn beta() -> Self {
        Family::canonical(FamilyName::Beta)
    }

    pub fn negative_binomial() -> Self {
        Family::canonical(FamilyName::NegativeBinomial)
    }

    pub fn kind(&self) -> FamilyName {
        match self {
            Family::Gaussian(_) => FamilyName::Gaussian,
            Family::Gamma(_) => FamilyName::Gamma,
            Family::Beta(_) => FamilyName::Beta,
            Family::NegativeBinomial(_) => FamilyName::NegativeBinomial,
        }
    }

    pub fn link(&self) -> Link {
        match self {
            Family::Gaussian(l) | Family::Gamma(l) | Family::Beta(l) | Family::NegativeBinomial(l) => *l,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::Gaussian(_) => "gaussian",
            Family::Gamma(_) => "gamma",
            Family::Beta(_) => "beta",
            Family::NegativeBinomial(_) => "negative_binomial",
        }
    }

    /// Name of the dispersion-type parameter.
    pub fn dispersion_name(&self) -> &'static str {
        match self {
            Family::Gaussian(_) => "residual_sd",
            Family::Gamma(_) => "shape",
            Family::Beta(_) => "precision",
            Family::NegativeBinomial(_) => "size",
        }
    }

    pub fn allowed_links(&self) -> &'static [Link] {
        match self {
            Family::Gaussian(_) => &[Link::Identity, Link::Log],
            Family::Gamma(_) => &[Link::Log, Link::Identity],
            Family::Beta(_) => &[Link::Logit, Link::Probit],
            Family::NegativeBinomial(_) => &[Link::Log],
        }
    }

    /// Check that one outcome value lies in the family's support.
    pub fn check_value(&self, y: f64) -> std::result::Result<(), String> {
        if !y.is_finite() {
            return Err(format!("non-finite value {}", y));
        }
        match self {
            Family::Gaussian(_) => Ok(()),
            Family::Gamma(_) if y <= 0.0 => Err(format!("{} is not strictly positive", y)),
            Family::Beta(_) if y <= 0.0 || y >= 1.0 => {
                Err(format!("{} is not strictly between 0 and 1", y))
            }
            Family::NegativeBinomial(_) if y < 0.0 || y.fract() != 0.0 => {
                Err(format!("{} is not a non-negative integer", y))
            }
            _ => Ok(()),
        }
    }

    /// Keep a mean inside the open support of the family.
    pub fn clamp_mu(&self, mu: f64) -> f64 {
        match self {
            Family::Gaussian(Link::Identity) => mu,
            Family::Beta(_) => mu.clamp(MU_EPS, 1.0 - MU_EPS),
            _ => mu.max(MU_EPS),
        }
    }

    /// Whether a fitted mean sits on the clamp at the edge of the support,
    /// as happens when a cell is perfectly separated (e.g. all-zero counts).
    pub fn is_boundary_mean(&self, mu: f64) -> bool {
        match self {
            Family::Gaussian(Link::Identity) => false,
            Family::Beta(_) => mu <= BOUNDARY_MU || mu >= 1.0 - BOUNDARY_MU,
            _ => mu <= BOUNDARY_MU,
        }
    }

    /// Starting mean for an observation, inside the support of the link.
    pub fn initial_mu(&self, y: f64) -> f64 {
        match self {
            Family::NegativeBinomial(_) => y + 0.1,
            Family::Gaussian(Link::Log) => y.max(MU_EPS),
            _ => y,
        }
    }

    /// Mean on the response scale for a linear predictor value.
    pub fn mean(&self, eta: f64) -> f64 {
        self.clamp_mu(self.link().linkinv(eta))
    }

    /// Log density of one observation.
    pub fn log_density(&self, y: f64, mu: f64, dispersion: f64) -> f64 {
        match self {
            Family::Gaussian(_) => {
                let sd = dispersion;
                let r = (y - mu) / sd;
                -0.5 * r * r - sd.ln() - 0.5 * (2.0 * PI).ln()
            }
            Family::Gamma(_) => {
                let nu = dispersion;
                nu * nu.ln() - nu * mu.ln() + (nu - 1.0) * y.ln() - nu * y / mu - ln_gamma(nu)
            }
            Family::Beta(_) => {
                let phi = dispersion;
                let a = mu * phi;
                let b = (1.0 - mu) * phi;
                ln_gamma(phi) - ln_gamma(a) - ln_gamma(b) + (a - 1.0) * y.ln()
                    + (b - 1.0) * (1.0 - y).ln()
            }
            Family::NegativeBinomial(_) => {
                let theta = dispersion;
                ln_gamma(y + theta) - ln_gamma(theta) - ln_gamma(y + 1.0)
                    + theta * (theta / (theta + mu)).ln()
                    + y * (mu / (theta + mu)).ln()
            }
        }
    }

    /// Score d loglik / d mu and expected information for one observation.
    pub fn score_info(&self, y: f64, mu: f64, dispersion: f64) -> (f64, f64) {
        match self {
            Family::Gaussian(_) => {
                let v = dispersion * dispersion;
                ((y - mu) / v, 1.0 / v)
            }
            Family::Gamma(_) => {
                let nu = dispersion;
                (nu * (y - mu) / (mu * mu), nu / (mu * mu))
            }
            Family::Beta(_) => {
                let phi = dispersion;
                let a = mu * phi;
                let b = (1.0 - mu) * phi;
                let y_star = (y / (1.0 - y)).ln();
                let mu_star = digamma(a) - digamma(b);
                (
                    phi * (y_star - mu_star),
                    phi * phi * (trigamma(a) + trigamma(b)),
                )
            }
            Family::NegativeBinomial(_) => {
                let theta = dispersion;
                let denom = mu * (mu + theta);
                (theta * (y - mu) / denom, theta / denom)
            }
        }
    }

    /// Moment estimate of the dispersion parameter given fitted means.
    pub fn initial_dispersion(&self, y: &[f64], mu: &[f64]) -> f64 {
        let n = y.len().max(1) as f64;
        let estimate = match self {
            Family::Gaussian(_) => {
                let ss: f64 = y.iter().zip(mu).map(|(y, m)| (y - m).powi(2)).sum();
                (ss / n).sqrt()
            }
            Family::Gamma(_) => {
                let cv2: f64 = y.iter().zip(mu).map(|(y, m)| ((y - m) / m).powi(2)).sum();
                n / cv2
            }
            Family::Beta(_) => {
                let v: f64 = y.iter().zip(mu).map(|(y, m)| (y - m).powi(2)).sum::<f64>() / n;
                let m: f64 = mu.iter().map(|m| m * (1.0 - m)).sum::<f64>() / n;
                m / v - 1.0
            }
            Family::NegativeBinomial(_) => {
                let excess: f64 = y.iter().zip(mu).map(|(y, m)| (y - m).powi(2) - m).sum();
                let m2: f64 = mu.iter().map(|m| m * m).sum();
                if excess > 0.0 {
                    m2 / excess
                } else {
                    100.0
                }
            }
        };
        if estimate.is_finite() {
            estimate.clamp(1e-3, 1e6)
        } else {
            1.0
        }
    }

    /// Scale used to standardise link-scale contrasts.
    pub fn sigma(&self, dispersion: f64) -> f64 {
        match self {
            Family::Gamma(_) => 1.0 / dispersion.sqrt(),
            _ => dispersion,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.link())
    }
}

/// Trigamma function for positive arguments.
///
/// Shifts the argument above 10 with the recurrence, then sums the asymptotic
/// series.
pub fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let t = 1.0 / x;
    let t2 = t * t;
    acc + t + 0.5 * t2 + t * t2 * (1.0 / 6.0 - t2 * (1.0 / 30.0 - t2 * (1.0 / 42.0 - t2 / 30.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_link_roundtrip() {
        let cases = [
            (Link::Identity, vec![-3.0, 0.0, 2.5]),
            (Link::Log, vec![-5.0, 0.0, 3.0]),
            (Link::Logit, vec![-6.0, -0.5, 0.0, 4.0]),
            (Link::Probit, vec![-3.0, -0.2, 0.0, 2.0]),
        ];
        for (link, etas) in cases {
            for eta in etas {
                assert_relative_eq!(link.link(link.linkinv(eta)), eta, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_mu_eta_matches_finite_difference() {
        let h = 1e-6;
        for link in [Link::Identity, Link::Log, Link::Logit, Link::Probit] {
            let eta = 0.3;
            let fd = (link.linkinv(eta + h) - link.linkinv(eta - h)) / (2.0 * h);
            assert_relative_eq!(link.mu_eta(eta), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_family_link_validation() {
        assert!(Family::new(FamilyName::Beta, Link::Logit).is_ok());
        assert!(Family::new(FamilyName::Beta, Link::Log).is_err());
        assert!(Family::new(FamilyName::NegativeBinomial, Link::Identity).is_err());
        assert_eq!(Family::gamma().link(), Link::Log);
    }

    #[test]
    fn test_domain_checks() {
        assert!(Family::beta().check_value(0.5).is_ok());
        assert!(Family::beta().check_value(1.0).is_err());
        assert!(Family::beta().check_value(0.0).is_err());
        assert!(Family::negative_binomial().check_value(3.0).is_ok());
        assert!(Family::negative_binomial().check_value(2.5).is_err());
        assert!(Family::negative_binomial().check_value(-1.0).is_err());
        assert!(Family::gamma().check_value(0.0).is_err());
        assert!(Family::gaussian().check_value(-4.0).is_ok());
        assert!(Family::gaussian().check_value(f64::NAN).is_err());
    }

    #[test]
    fn test_trigamma() {
        assert_relative_eq!(trigamma(1.0), PI * PI / 6.0, epsilon = 1e-10);
        assert_relative_eq!(trigamma(0.5), PI * PI / 2.0, epsilon = 1e-10);
        assert_relative_eq!(trigamma(10.0), 0.10516633568168575, epsilon = 1e-10);
    }

    #[test]
    fn test_score_is_derivative_of_log_density() {
        let h = 1e-6;
        let cases = [
            (Family::gaussian(), 1.3, 1.0, 0.7),
            (Family::gamma(), 2.0, 1.5, 3.0),
            (Family::beta(), 0.3, 0.4, 20.0),
            (Family::negative_binomial(), 4.0, 2.5, 1.7),
        ];
        for (family, y, mu, disp) in cases {
            let fd = (family.log_density(y, mu + h, disp) - family.log_density(y, mu - h, disp))
                / (2.0 * h);
            let (score, info) = family.score_info(y, mu, disp);
            assert_relative_eq!(score, fd, epsilon = 1e-5);
            assert!(info > 0.0);
        }
    }

    #[test]
    fn test_negative_binomial_density_sums_to_one() {
        let family = Family::negative_binomial();
        let total: f64 = (0..500)
            .map(|y| family.log_density(y as f64, 3.0, 2.0).exp())
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn test_boundary_mean() {
        let nb = Family::negative_binomial();
        assert!(nb.is_boundary_mean(nb.mean(-30.0)));
        assert!(!nb.is_boundary_mean(nb.mean(-5.0)));
        let beta = Family::beta();
        assert!(beta.is_boundary_mean(beta.mean(40.0)));
        assert!(beta.is_boundary_mean(beta.mean(-40.0)));
        assert!(!beta.is_boundary_mean(0.09));
        assert!(!Family::gaussian().is_boundary_mean(0.0));
    }

    #[test]
    fn test_sigma_scale() {
        assert_eq!(Family::gaussian().sigma(0.5), 0.5);
        assert_relative_eq!(Family::gamma().sigma(4.0), 0.5);
        assert_eq!(Family::beta().sigma(120.0), 120.0);
    }

    #[test]
    fn test_serde_repr() {
        let family: Family = serde_yaml::from_str("name: beta\nlink: probit\n").unwrap();
        assert_eq!(family, Family::Beta(Link::Probit));

        let default: Family = serde_yaml::from_str("name: negative_binomial\n").unwrap();
        assert_eq!(default, Family::NegativeBinomial(Link::Log));

        let bad: std::result::Result<Family, _> = serde_yaml::from_str("name: beta\nlink: log\n");
        assert!(bad.is_err());
    }
}
