//! Synthetic morphology data with subject and bin random intercepts.
//!
//! Each subject receives one treatment and contributes `n_bins` replicate
//! bins with `n_per_bin` observations each (one per distance when distances
//! are given). The linear predictor is
//!
//! `eta = link(baseline) + effect[treatment] + slope * distance + a_subject + b_bin`
//!
//! and outcomes are drawn from the family with the configured dispersion.

use crate::data::DataTable;
use crate::error::{GlmmError, Result};
use crate::model::{Family, FamilyName};
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution, Gamma, Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for synthetic data generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Name/identifier for this dataset.
    pub name: String,
    /// Outcome column name.
    pub outcome: String,
    pub family: Family,
    /// Treatment labels; the first is the reference.
    pub treatments: Vec<String>,
    /// Subjects per treatment, aligned with `treatments`.
    pub subjects_per_group: Vec<usize>,
    /// Replicate bins per subject.
    pub n_bins: usize,
    /// Observations per bin (ignored when `distances` is set).
    pub n_per_bin: usize,
    /// Sholl radii; each bin gets one observation per radius.
    #[serde(default)]
    pub distances: Vec<f64>,
    /// Reference-group mean on the response scale.
    pub baseline: f64,
    /// Link-scale shift of every non-reference treatment.
    pub effect: f64,
    /// Link-scale change per unit of distance.
    #[serde(default)]
    pub distance_slope: f64,
    /// Random-intercept SDs.
    pub subject_sd: f64,
    pub bin_sd: f64,
    /// Family dispersion (sd, shape, precision or size).
    pub dispersion: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            outcome: "y".to_string(),
            family: Family::gaussian(),
            treatments: vec!["Control".to_string(), "LPS".to_string()],
            subjects_per_group: vec![5, 5],
            n_bins: 3,
            n_per_bin: 5,
            distances: Vec::new(),
            baseline: 10.0,
            effect: 1.0,
            distance_slope: 0.0,
            subject_sd: 0.5,
            bin_sd: 0.25,
            dispersion: 1.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Create a new config with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set family, outcome name and reference mean.
    pub fn with_family(mut self, family: Family, outcome: &str, baseline: f64) -> Self {
        self.family = family;
        self.outcome = outcome.to_string();
        self.baseline = baseline;
        self
    }

    /// Set treatment labels with their subject counts.
    pub fn with_groups(mut self, groups: &[(&str, usize)]) -> Self {
        self.treatments = groups.iter().map(|(t, _)| t.to_string()).collect();
        self.subjects_per_group = groups.iter().map(|(_, n)| *n).collect();
        self
    }

    /// Set bins per subject and observations per bin.
    pub fn with_layout(mut self, n_bins: usize, n_per_bin: usize) -> Self {
        self.n_bins = n_bins;
        self.n_per_bin = n_per_bin;
        self
    }

    /// Record one observation per bin at each distance.
    pub fn with_distances(mut self, distances: &[f64], slope: f64) -> Self {
        self.distances = distances.to_vec();
        self.distance_slope = slope;
        self
    }

    /// Set the treatment effect on the link scale.
    pub fn with_effect(mut self, effect: f64) -> Self {
        self.effect = effect;
        self
    }

    /// Set random-intercept SDs.
    pub fn with_random_sd(mut self, subject_sd: f64, bin_sd: f64) -> Self {
        self.subject_sd = subject_sd;
        self.bin_sd = bin_sd;
        self
    }

    pub fn with_dispersion(mut self, dispersion: f64) -> Self {
        self.dispersion = dispersion;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // Preset configurations

    /// Proportion outcome (e.g. branch fraction), beta family.
    pub fn fraction() -> Self {
        Self::new("fraction")
            .with_family(Family::beta(), "fraction", 0.3)
            .with_effect(0.6)
            .with_random_sd(0.2, 0.1)
            .with_dispersion(40.0)
    }

    /// Sholl intersection counts by distance, negative binomial family.
    pub fn sholl() -> Self {
        Self::new("sholl")
            .with_family(Family::negative_binomial(), "intersections", 8.0)
            .with_distances(&[10.0, 20.0, 30.0, 40.0, 50.0], -0.03)
            .with_layout(2, 1)
            .with_effect(-0.3)
            .with_random_sd(0.2, 0.1)
            .with_dispersion(10.0)
    }

    /// Soma area, gamma family.
    pub fn soma_area() -> Self {
        Self::new("soma_area")
            .with_family(Family::gamma(), "soma_area", 60.0)
            .with_effect(0.25)
            .with_random_sd(0.15, 0.05)
            .with_dispersion(12.0)
    }

    fn validate(&self) -> Result<()> {
        if self.treatments.len() < 2 || self.treatments.len() != self.subjects_per_group.len() {
            return Err(GlmmError::InvalidParameter(format!(
                "Need at least two treatments with one subject count each, got {:?} and {:?}",
                self.treatments, self.subjects_per_group
            )));
        }
        if self.subjects_per_group.iter().any(|&n| n == 0) || self.n_bins == 0 {
            return Err(GlmmError::InvalidParameter(
                "Every treatment needs subjects and every subject needs bins".to_string(),
            ));
        }
        if self.distances.is_empty() && self.n_per_bin == 0 {
            return Err(GlmmError::InvalidParameter(
                "n_per_bin must be positive".to_string(),
            ));
        }
        if !(self.dispersion > 0.0) || self.subject_sd < 0.0 || self.bin_sd < 0.0 {
            return Err(GlmmError::InvalidParameter(
                "Dispersion must be positive and SDs non-negative".to_string(),
            ));
        }
        // A count mean need not be an integer.
        if self.family.kind() == FamilyName::NegativeBinomial {
            if !(self.baseline > 0.0) {
                return Err(GlmmError::InvalidParameter(
                    "baseline count mean must be positive".to_string(),
                ));
            }
            return Ok(());
        }
        self.family
            .check_value(self.baseline)
            .map_err(|e| GlmmError::InvalidParameter(format!("baseline: {}", e)))
    }
}

/// Generated table with its configuration.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    /// Columns `mouse`, `treatment`, `bin`, optionally `distance`, and the outcome.
    pub table: DataTable,
    pub config: SyntheticConfig,
}

impl SyntheticData {
    /// Write the table as CSV.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let columns = self.table.column_names();
        writer.write_record(&columns)?;
        for row in 0..self.table.n_rows() {
            let record: Vec<String> = columns
                .iter()
                .map(|c| match self.table.get(row, c) {
                    Some(v) if !v.is_missing() => v.level_key().unwrap_or_default(),
                    _ => "NA".to_string(),
                })
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn param_error<E: std::fmt::Display>(e: E) -> GlmmError {
    GlmmError::InvalidParameter(format!("Sampling distribution: {}", e))
}

/// Generate a synthetic dataset.
pub fn generate_synthetic(config: &SyntheticConfig) -> Result<SyntheticData> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let family = config.family;
    let link = family.link();
    let intercept = link.link(config.baseline);

    let subject_dist = Normal::new(0.0, config.subject_sd).map_err(param_error)?;
    let bin_dist = Normal::new(0.0, config.bin_sd).map_err(param_error)?;
    let positions: Vec<Option<f64>> = if config.distances.is_empty() {
        vec![None; config.n_per_bin]
    } else {
        config.distances.iter().map(|&d| Some(d)).collect()
    };

    let mut mouse = Vec::new();
    let mut treatment = Vec::new();
    let mut bin = Vec::new();
    let mut distance = Vec::new();
    let mut y = Vec::new();

    let mut subject_id = 0;
    for (t, (label, &n_subjects)) in config
        .treatments
        .iter()
        .zip(&config.subjects_per_group)
        .enumerate()
    {
        let shift = if t == 0 { 0.0 } else { config.effect };
        for _ in 0..n_subjects {
            subject_id += 1;
            let a = subject_dist.sample(&mut rng);
            for b in 1..=config.n_bins {
                let bin_effect = bin_dist.sample(&mut rng);
                for &pos in &positions {
                    let eta = intercept
                        + shift
                        + pos.map_or(0.0, |d| config.distance_slope * d)
                        + a
                        + bin_effect;
                    let mu = family.clamp_mu(link.linkinv(eta));
                    y.push(draw(family, mu, config.dispersion, &mut rng)?);
                    mouse.push(format!("M{:02}", subject_id));
                    treatment.push(label.clone());
                    bin.push(format!("B{}", b));
                    if let Some(d) = pos {
                        distance.push(d);
                    }
                }
            }
        }
    }
    debug!("{}: generated {} observations", config.name, y.len());

    let mut table = DataTable::new()
        .with_categorical("mouse", &mouse)?
        .with_categorical("treatment", &treatment)?
        .with_level_order("treatment", &config.treatments)?
        .with_categorical("bin", &bin)?;
    if !distance.is_empty() {
        table = table.with_continuous("distance", &distance)?;
    }
    let table = table.with_continuous(&config.outcome, &y)?;

    Ok(SyntheticData {
        table,
        config: config.clone(),
    })
}

/// One draw with mean `mu`.
fn draw(family: Family, mu: f64, dispersion: f64, rng: &mut StdRng) -> Result<f64> {
    let value = match family.kind() {
        FamilyName::Gaussian => Normal::new(mu, dispersion).map_err(param_error)?.sample(rng),
        FamilyName::Gamma => Gamma::new(dispersion, mu / dispersion)
            .map_err(param_error)?
            .sample(rng),
        FamilyName::Beta => {
            let y = Beta::new(mu * dispersion, (1.0 - mu) * dispersion)
                .map_err(param_error)?
                .sample(rng);
            y.clamp(1e-6, 1.0 - 1e-6)
        }
        // Gamma-Poisson mixture
        FamilyName::NegativeBinomial => {
            let lambda = Gamma::new(dispersion, mu / dispersion)
                .map_err(param_error)?
                .sample(rng);
            if lambda <= 0.0 {
                0.0
            } else {
                Poisson::new(lambda).map_err(param_error)?.sample(rng)
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyntheticConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.treatments, vec!["Control", "LPS"]);
    }

    #[test]
    fn test_layout() {
        let data = generate_synthetic(&SyntheticConfig::fraction().with_seed(7)).unwrap();
        // 10 subjects x 3 bins x 5 observations
        assert_eq!(data.table.n_rows(), 150);
        assert_eq!(data.table.levels("mouse").unwrap().len(), 10);
        assert_eq!(data.table.levels("treatment").unwrap(), vec!["Control", "LPS"]);
        let y = data.table.numeric("fraction").unwrap();
        assert!(y.iter().all(|v| matches!(v, Some(x) if *x > 0.0 && *x < 1.0)));
    }

    #[test]
    fn test_sholl_counts() {
        let data = generate_synthetic(&SyntheticConfig::sholl()).unwrap();
        // 10 subjects x 2 bins x 5 distances
        assert_eq!(data.table.n_rows(), 100);
        assert!(data.table.has_column("distance"));
        let y = data.table.numeric("intersections").unwrap();
        assert!(y
            .iter()
            .all(|v| matches!(v, Some(x) if *x >= 0.0 && x.fract() == 0.0)));
    }

    #[test]
    fn test_deterministic_generation() {
        let config = SyntheticConfig::soma_area().with_seed(999);
        let a = generate_synthetic(&config).unwrap();
        let b = generate_synthetic(&config).unwrap();
        // Same seed should produce identical results
        assert_eq!(
            a.table.numeric("soma_area").unwrap(),
            b.table.numeric("soma_area").unwrap()
        );
        let c = generate_synthetic(&config.clone().with_seed(1000)).unwrap();
        assert_ne!(
            a.table.numeric("soma_area").unwrap(),
            c.table.numeric("soma_area").unwrap()
        );
    }

    #[test]
    fn test_invalid_config() {
        let config = SyntheticConfig::default().with_groups(&[("Control", 3)]);
        assert!(generate_synthetic(&config).is_err());
        let config = SyntheticConfig::fraction().with_family(Family::beta(), "fraction", 1.5);
        assert!(generate_synthetic(&config).is_err());
    }

    #[test]
    fn test_write_csv_roundtrip() {
        let data = generate_synthetic(&SyntheticConfig::sholl().with_seed(3)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sholl.csv");
        data.write_csv(&path).unwrap();

        let loaded = DataTable::from_csv(&path).unwrap();
        assert_eq!(loaded.n_rows(), data.table.n_rows());
        assert_eq!(
            loaded.numeric("intersections").unwrap(),
            data.table.numeric("intersections").unwrap()
        );
    }
}
