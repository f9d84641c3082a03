//! Per-analysis reports and their JSON/TSV writers.

use crate::contrast::ContrastSet;
use crate::error::Result;
use crate::marginal::MarginalMean;
use crate::model::{ConditionalModes, FittedModel, ModelCriteria, ModelSpec, VarianceComponent};
use crate::test::WaldResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// What was fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub outcome: String,
    pub formula: String,
    pub family: String,
    pub link: String,
    /// Random-intercept grouping factors, e.g. `["mouse", "mouse:bin"]`.
    pub random_effects: Vec<String>,
    /// Columns coded as factors regardless of their values.
    pub factors: Vec<String>,
}

impl ModelMetadata {
    pub fn from_spec(spec: &ModelSpec) -> Self {
        Self {
            outcome: spec.outcome.clone(),
            formula: spec.formula.to_string(),
            family: spec.family.name().to_string(),
            link: spec.family.link().name().to_string(),
            random_effects: spec.formula.grouping_names(),
            factors: spec.factors.clone(),
        }
    }
}

/// Goodness of fit and optimizer bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitStatistics {
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub n_dropped: usize,
    pub n_parameters: usize,
    /// Name of the dispersion parameter (`sd`, `shape`, `precision`, `size`).
    pub dispersion_name: String,
    pub dispersion: f64,
    /// Scale used for effect sizes.
    pub sigma: f64,
    pub iterations: u64,
    /// A random-intercept SD is at the boundary.
    pub singular: bool,
}

impl FitStatistics {
    pub fn from_fit(fit: &FittedModel) -> Self {
        Self {
            log_likelihood: fit.log_likelihood,
            aic: fit.aic,
            bic: fit.bic,
            n_obs: fit.n_obs,
            n_dropped: fit.n_dropped,
            n_parameters: fit.n_parameters,
            dispersion_name: fit.family.dispersion_name().to_string(),
            dispersion: fit.dispersion,
            sigma: fit.sigma(),
            iterations: fit.iterations,
            singular: fit.is_singular(),
        }
    }
}

/// Everything one analysis produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Analysis name from the configuration.
    pub name: String,
    pub model: ModelMetadata,
    pub fit: FitStatistics,
    pub coefficients: WaldResult,
    pub variance_components: Vec<VarianceComponent>,
    pub conditional_modes: Vec<ConditionalModes>,
    pub means: Vec<MarginalMean>,
    pub contrasts: ContrastSet,
}

impl AnalysisReport {
    /// Information criteria for model comparison.
    pub fn criteria(&self) -> ModelCriteria {
        ModelCriteria::new(
            &self.name,
            &self.model.formula,
            self.fit.log_likelihood,
            self.fit.n_parameters,
            self.fit.n_obs,
        )
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Write the coefficient table as TSV.
    pub fn write_coefficients_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "analysis\tcoefficient\testimate\tstd_error\tz\tp_value")?;
        for r in &self.coefficients.results {
            writeln!(
                writer,
                "{}\t{}\t{:.6}\t{:.6}\t{:.4}\t{:.4e}",
                self.name, r.coefficient, r.estimate, r.std_error, r.statistic, r.p_value
            )?;
        }
        Ok(())
    }

    /// Write the marginal means as TSV.
    pub fn write_means_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(
            writer,
            "analysis\tstratum\tcell\testimate\tstd_error\tlower\tupper\tresponse\tresponse_std_error\tresponse_lower\tresponse_upper"
        )?;
        for m in &self.means {
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}",
                self.name,
                m.stratum_label(),
                m.label(),
                m.estimate,
                m.std_error,
                m.lower,
                m.upper,
                m.response,
                m.response_std_error,
                m.response_lower,
                m.response_upper
            )?;
        }
        Ok(())
    }

    /// Write the contrasts as TSV.
    ///
    /// Ratio columns are empty for links without a multiplicative scale.
    pub fn write_contrasts_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(
            writer,
            "analysis\tstratum\tminuend\tsubtrahend\testimate\tstd_error\tz\tp_value\tp_adjusted\tadjustment\tfamily_size\tlower\tupper\tratio\tratio_lower\tratio_upper\teffect_size\teffect_lower\teffect_upper"
        )?;
        for c in &self.contrasts.contrasts {
            let (ratio, ratio_lower, ratio_upper) = match &c.ratio {
                Some(r) => (
                    format!("{:.6}", r.estimate),
                    format!("{:.6}", r.lower),
                    format!("{:.6}", r.upper),
                ),
                None => (String::new(), String::new(), String::new()),
            };
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{:.4}\t{:.4e}\t{:.4e}\t{}\t{}\t{:.6}\t{:.6}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{:.4}",
                self.name,
                c.stratum,
                c.minuend,
                c.subtrahend,
                c.estimate,
                c.std_error,
                c.z,
                c.p_value,
                c.p_adjusted,
                c.adjustment,
                c.family_size,
                c.lower,
                c.upper,
                ratio,
                ratio_lower,
                ratio_upper,
                c.effect_size,
                c.effect_lower,
                c.effect_upper
            )?;
        }
        Ok(())
    }

    /// Write `<name>.json` and the three TSV tables into `dir`.
    ///
    /// Returns the paths written.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let stem = file_stem(&self.name);

        let json = dir.join(format!("{}.json", stem));
        self.write_json(BufWriter::new(File::create(&json)?))?;
        let coefficients = dir.join(format!("{}_coefficients.tsv", stem));
        self.write_coefficients_tsv(BufWriter::new(File::create(&coefficients)?))?;
        let means = dir.join(format!("{}_emmeans.tsv", stem));
        self.write_means_tsv(BufWriter::new(File::create(&means)?))?;
        let contrasts = dir.join(format!("{}_contrasts.tsv", stem));
        self.write_contrasts_tsv(BufWriter::new(File::create(&contrasts)?))?;

        Ok(vec![json, coefficients, means, contrasts])
    }
}

/// Analysis name made safe for a file name.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("soma area (gamma)"), "soma_area__gamma_");
        assert_eq!(file_stem("sholl-spline_3"), "sholl-spline_3");
    }
}
