//! Analysis runner: fit, marginal means and contrasts for one configuration.

use crate::contrast::pairwise_contrasts;
use crate::correct::Adjustment;
use crate::data::DataTable;
use crate::error::{GlmmError, Result};
use crate::marginal::{estimate_marginal_means, EmmeansRequest};
use crate::model::{
    fit_glmm, rank_criteria, GlmmConfig, ModelComparison, ModelSpec, SelectionCriterion,
};
use crate::pipeline::report::{AnalysisReport, FitStatistics, ModelMetadata};
use crate::test::test_wald;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_confidence() -> f64 {
    0.95
}

/// Average rows before fitting, e.g. per subject and treatment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    /// Columns identifying a group of rows.
    pub group_by: Vec<String>,
    /// Columns averaged within each group; defaults to the outcome.
    #[serde(default)]
    pub values: Vec<String>,
}

/// One analysis: a model, the means to estimate and how to compare them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model: ModelSpec,
    /// Optimizer settings; the batch default applies when absent.
    #[serde(default)]
    pub glmm: Option<GlmmConfig>,
    pub emmeans: EmmeansRequest,
    #[serde(default)]
    pub adjustment: Adjustment,
    /// Confidence level of contrast intervals.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub aggregate: Option<Aggregation>,
}

/// Alternative analyses of one outcome to rank by an information criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    pub name: String,
    /// Names of the analyses to compare.
    pub analyses: Vec<String>,
    #[serde(default)]
    pub criterion: SelectionCriterion,
}

/// A set of analyses over one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Data file (CSV, or TSV when the extension is `.tsv`), relative to the
    /// working directory.
    #[serde(default)]
    pub data: Option<String>,
    /// Default optimizer settings.
    #[serde(default)]
    pub glmm: GlmmConfig,
    pub analyses: Vec<AnalysisConfig>,
    #[serde(default)]
    pub comparisons: Vec<ComparisonConfig>,
}

impl BatchConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(GlmmError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(GlmmError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Analysis names must be unique and comparisons must refer to them.
    fn validate(&self) -> Result<()> {
        for (i, a) in self.analyses.iter().enumerate() {
            if self.analyses[..i].iter().any(|b| b.name == a.name) {
                return Err(GlmmError::InvalidParameter(format!(
                    "Duplicate analysis name '{}'",
                    a.name
                )));
            }
        }
        for c in &self.comparisons {
            if let Some(missing) = c
                .analyses
                .iter()
                .find(|n| !self.analyses.iter().any(|a| &a.name == *n))
            {
                return Err(GlmmError::InvalidParameter(format!(
                    "Comparison '{}' refers to unknown analysis '{}'",
                    c.name, missing
                )));
            }
        }
        Ok(())
    }

    /// Read the configured data file.
    pub fn load_data(&self) -> Result<DataTable> {
        let path = self.data.as_deref().ok_or_else(|| {
            GlmmError::InvalidParameter(format!("Batch '{}' names no data file", self.name))
        })?;
        if path.ends_with(".tsv") {
            DataTable::from_tsv(path)
        } else {
            DataTable::from_csv(path)
        }
    }
}

/// Builder for a single analysis.
#[derive(Debug, Clone)]
pub struct Analysis {
    config: AnalysisConfig,
}

impl Analysis {
    /// Marginal means of `specs`, compared pairwise.
    pub fn new(name: &str, model: ModelSpec, specs: &[&str]) -> Self {
        Self {
            config: AnalysisConfig {
                name: name.to_string(),
                description: None,
                model,
                glmm: None,
                emmeans: EmmeansRequest::new(specs),
                adjustment: Adjustment::default(),
                confidence: default_confidence(),
                aggregate: None,
            },
        }
    }

    pub fn from_config(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Replace the marginal-means request.
    pub fn emmeans(mut self, request: EmmeansRequest) -> Self {
        self.config.emmeans = request;
        self
    }

    pub fn adjustment(mut self, adjustment: Adjustment) -> Self {
        self.config.adjustment = adjustment;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.config.confidence = confidence;
        self
    }

    pub fn glmm(mut self, config: GlmmConfig) -> Self {
        self.config.glmm = Some(config);
        self
    }

    /// Average `values` (default: the outcome) within `group_by` before fitting.
    pub fn aggregate(mut self, group_by: &[&str], values: &[&str]) -> Self {
        self.config.aggregate = Some(Aggregation {
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            values: values.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Convert to config for serialization.
    pub fn to_config(&self) -> AnalysisConfig {
        self.config.clone()
    }

    /// Run with default optimizer settings unless the analysis overrides them.
    pub fn run(&self, table: &DataTable) -> Result<AnalysisReport> {
        run_analysis(table, &self.config, &GlmmConfig::default())
    }
}

/// Fit, estimate marginal means and contrast them for one analysis.
///
/// `defaults` applies when the analysis has no optimizer settings of its own.
pub fn run_analysis(
    table: &DataTable,
    config: &AnalysisConfig,
    defaults: &GlmmConfig,
) -> Result<AnalysisReport> {
    let aggregated;
    let table = match &config.aggregate {
        Some(agg) => {
            let group_by: Vec<&str> = agg.group_by.iter().map(String::as_str).collect();
            let values: Vec<&str> = if agg.values.is_empty() {
                vec![config.model.outcome.as_str()]
            } else {
                agg.values.iter().map(String::as_str).collect()
            };
            aggregated = table.aggregate_mean(&group_by, &values)?;
            info!(
                "{}: aggregated {} rows to {} by {:?}",
                config.name,
                table.n_rows(),
                aggregated.n_rows(),
                group_by
            );
            &aggregated
        }
        None => table,
    };

    let glmm = config.glmm.as_ref().unwrap_or(defaults);
    let fit = fit_glmm(table, &config.model, glmm)?;
    let coefficients = test_wald(&fit)?;
    let means = estimate_marginal_means(&fit, &config.emmeans)?;
    let contrasts = pairwise_contrasts(&fit, &means, config.adjustment, config.confidence)?;

    Ok(AnalysisReport {
        name: config.name.clone(),
        model: ModelMetadata::from_spec(&config.model),
        fit: FitStatistics::from_fit(&fit),
        coefficients,
        variance_components: fit.variance_components.clone(),
        conditional_modes: fit.conditional_modes.clone(),
        means,
        contrasts,
    })
}

/// Outcome of a batch run.
#[derive(Debug)]
pub struct BatchReport {
    /// One entry per analysis, in configuration order. Failures are wrapped
    /// in `GlmmError::Analysis`.
    pub analyses: Vec<Result<AnalysisReport>>,
    /// Comparisons whose analyses all succeeded.
    pub comparisons: Vec<ModelComparison>,
}

impl BatchReport {
    /// Successful reports.
    pub fn reports(&self) -> impl Iterator<Item = &AnalysisReport> {
        self.analyses.iter().filter_map(|r| r.as_ref().ok())
    }

    /// Failed analyses.
    pub fn failures(&self) -> impl Iterator<Item = &GlmmError> {
        self.analyses.iter().filter_map(|r| r.as_ref().err())
    }

    pub fn get(&self, name: &str) -> Option<&AnalysisReport> {
        self.reports().find(|r| r.name == name)
    }
}

/// Run every analysis of a batch in parallel over a shared table.
///
/// A failing analysis does not stop the others.
pub fn run_batch(table: &DataTable, batch: &BatchConfig) -> Result<BatchReport> {
    batch.validate()?;
    info!("Batch '{}': {} analyses", batch.name, batch.analyses.len());

    let analyses: Vec<Result<AnalysisReport>> = batch
        .analyses
        .par_iter()
        .map(|a| run_analysis(table, a, &batch.glmm).map_err(|e| e.in_analysis(&a.name)))
        .collect();
    for err in analyses.iter().filter_map(|r| r.as_ref().err()) {
        warn!("{}", err);
    }

    let mut comparisons = Vec::new();
    for c in &batch.comparisons {
        let reports: Option<Vec<&AnalysisReport>> = c
            .analyses
            .iter()
            .map(|name| {
                analyses
                    .iter()
                    .filter_map(|r| r.as_ref().ok())
                    .find(|r| &r.name == name)
            })
            .collect();
        let Some(reports) = reports else {
            warn!("Comparison '{}' skipped: an analysis failed", c.name);
            continue;
        };
        let outcome = &reports[0].model.outcome;
        if reports.iter().any(|r| &r.model.outcome != outcome) {
            return Err(GlmmError::InvalidParameter(format!(
                "Comparison '{}' mixes outcomes",
                c.name
            )));
        }
        let criteria = reports.iter().map(|r| r.criteria()).collect();
        comparisons.push(rank_criteria(outcome, criteria, c.criterion)?);
    }

    Ok(BatchReport {
        analyses,
        comparisons,
    })
}

/// Example configuration covering the three error families of the study.
pub fn example_config() -> &'static str {
    r#"name: microglia-morphology
description: Treatment effects on microglia morphology
data: morphology.csv
glmm:
  max_iter: 2000
analyses:
  - name: soma_area
    model:
      outcome: soma_area
      formula: "~ treatment + (1 | mouse)"
      family: {name: gamma, link: log}
    emmeans:
      specs: [treatment]
  - name: branch_fraction
    model:
      outcome: branch_fraction
      formula: "~ treatment + (1 | mouse) + (1 | mouse:bin)"
      family: {name: beta, link: logit}
    emmeans:
      specs: [treatment]
  - name: sholl_factor
    model:
      outcome: intersections
      formula: "~ treatment * distance + (1 | mouse/bin)"
      family: {name: negative_binomial}
      factors: [distance]
    emmeans:
      specs: [treatment]
      by: [distance]
    adjustment: bonferroni
  - name: sholl_spline
    model:
      outcome: intersections
      formula: "~ treatment * ns(distance, 3) + (1 | mouse/bin)"
      family: {name: negative_binomial}
    emmeans:
      specs: [treatment]
      by: [distance]
comparisons:
  - name: sholl_distance
    analyses: [sholl_factor, sholl_spline]
    criterion: aic
"#
}
