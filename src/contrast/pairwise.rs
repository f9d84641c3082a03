//! All pairwise differences of marginal means.

use crate::correct::{correct_bonferroni, tukey_p_value, Adjustment};
use crate::error::{GlmmError, Result};
use crate::marginal::{z_critical, MarginalMean};
use crate::model::{FittedModel, Link};
use log::debug;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Difference of two marginal means on the link scale.
///
/// The sign is fixed by the pair: `estimate = minuend - subtrahend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contrast {
    /// Label of the first mean of the difference.
    pub minuend: String,
    /// Label of the mean subtracted from it.
    pub subtrahend: String,
    /// Position of the minuend in the means the contrasts were built from.
    pub minuend_index: usize,
    pub subtrahend_index: usize,
    /// Stratum label; empty when unstratified.
    pub stratum: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z: f64,
    pub p_value: f64,
    pub p_adjusted: f64,
    /// Adjustment method applied.
    pub adjustment: Adjustment,
    /// Number of comparisons in the family the adjustment accounts for.
    pub family_size: usize,
    /// Link-scale interval (unadjusted).
    pub lower: f64,
    pub upper: f64,
    /// `exp(estimate)` with interval when the link is log (ratio) or logit (odds ratio).
    pub ratio: Option<Ratio>,
    /// Standardized effect size `estimate / sigma`.
    pub effect_size: f64,
    pub effect_lower: f64,
    pub effect_upper: f64,
}

/// Back-transformed contrast for log and logit links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ratio {
    /// `ratio` or `odds_ratio`.
    pub kind: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Contrast {
    /// Whether the adjusted p-value is below `alpha`.
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_adjusted < alpha
    }
}

/// Contrasts for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastSet {
    pub contrasts: Vec<Contrast>,
    /// Adjustment actually applied.
    pub adjustment: Adjustment,
    /// Scale used for effect sizes.
    pub sigma: f64,
    pub confidence: f64,
}

impl ContrastSet {
    /// Number of contrasts.
    pub fn len(&self) -> usize {
        self.contrasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contrasts.is_empty()
    }

    /// Find the contrast between two cells, in either order.
    ///
    /// The returned contrast keeps its stored sign.
    pub fn find(&self, a: &str, b: &str) -> Option<&Contrast> {
        self.contrasts.iter().find(|c| {
            (c.minuend == a && c.subtrahend == b) || (c.minuend == b && c.subtrahend == a)
        })
    }
}

/// All pairwise contrasts among `means`, within each stratum.
///
/// For cells `i < j` (in the order of `means`) the contrast is
/// `means[j] - means[i]`, so a treatment listed after its control is reported
/// as treatment minus control. The SE uses the full coefficient covariance.
///
/// # Errors
/// * `InsufficientPairs` - a stratum has fewer than two cells
/// * `SingularCovariance` - a difference has no positive variance
pub fn pairwise_contrasts(
    fit: &FittedModel,
    means: &[MarginalMean],
    adjustment: Adjustment,
    confidence: f64,
) -> Result<ContrastSet> {
    let z_crit = z_critical(confidence)?;
    let normal = Normal::new(0.0, 1.0).map_err(|e| GlmmError::InvalidParameter(e.to_string()))?;

    // Strata in order of first appearance.
    let mut strata: Vec<(String, Vec<usize>)> = Vec::new();
    for (i, m) in means.iter().enumerate() {
        let label = m.stratum_label();
        match strata.iter_mut().find(|(l, _)| *l == label) {
            Some((_, idx)) => idx.push(i),
            None => strata.push((label, vec![i])),
        }
    }
    if strata.is_empty() {
        return Err(fit.insufficient_pairs(0, "no marginal means".to_string()));
    }
    for (label, idx) in &strata {
        if idx.len() < 2 {
            let context = if label.is_empty() {
                "unstratified".to_string()
            } else {
                format!("stratum {}", label)
            };
            return Err(fit.insufficient_pairs(idx.len(), context));
        }
    }

    let stratified = means.iter().any(|m| !m.stratum.is_empty());
    let method = adjustment.resolve(stratified);
    let total_pairs: usize = strata.iter().map(|(_, idx)| idx.len() * (idx.len() - 1) / 2).sum();
    let sigma = fit.sigma();
    let ratio_kind = match fit.family.link() {
        Link::Log => Some("ratio"),
        Link::Logit => Some("odds_ratio"),
        _ => None,
    };

    let mut contrasts = Vec::with_capacity(total_pairs);
    for (label, idx) in &strata {
        let k = idx.len();
        for (a, &i) in idx.iter().enumerate() {
            for &j in &idx[a + 1..] {
                let linfct: Vec<f64> = means[j]
                    .linfct
                    .iter()
                    .zip(&means[i].linfct)
                    .map(|(lj, li)| lj - li)
                    .collect();
                let (estimate, std_error) = fit.linear_combination(&linfct).map_err(|e| match e {
                    GlmmError::SingularCovariance { detail, .. } => fit.singular_covariance(format!(
                        "{} - {}: {}",
                        means[j].label(),
                        means[i].label(),
                        detail
                    )),
                    other => other,
                })?;
                let z = estimate / std_error;
                let p_value = (2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0);
                let (p_adjusted, family_size) = match method {
                    Adjustment::Tukey => (tukey_p_value(z, k, f64::INFINITY), k * (k - 1) / 2),
                    Adjustment::Bonferroni => {
                        (correct_bonferroni(&[p_value], total_pairs)[0], total_pairs)
                    }
                    _ => (p_value, 1),
                };
                let lower = estimate - z_crit * std_error;
                let upper = estimate + z_crit * std_error;

                contrasts.push(Contrast {
                    minuend: means[j].label(),
                    subtrahend: means[i].label(),
                    minuend_index: j,
                    subtrahend_index: i,
                    stratum: label.clone(),
                    estimate,
                    std_error,
                    z,
                    p_value,
                    p_adjusted: p_adjusted.max(p_value),
                    adjustment: method,
                    family_size,
                    lower,
                    upper,
                    ratio: ratio_kind.map(|kind| Ratio {
                        kind: kind.to_string(),
                        estimate: estimate.exp(),
                        lower: lower.exp(),
                        upper: upper.exp(),
                    }),
                    effect_size: estimate / sigma,
                    effect_lower: lower / sigma,
                    effect_upper: upper / sigma,
                });
            }
        }
    }
    debug!(
        "{}: {} contrasts, {} adjustment",
        fit.outcome,
        contrasts.len(),
        method
    );

    Ok(ContrastSet {
        contrasts,
        adjustment: method,
        sigma,
        confidence,
    })
}
