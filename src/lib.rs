//! Mixed-model reanalysis of morphology measurements
//!
//! This library fits generalized linear mixed models to tabular measurements,
//! turns the fixed effects into estimated marginal means, and compares those
//! means pairwise with multiplicity-adjusted p-values and effect sizes.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Typed tables, formulas, random-intercept terms, design matrices, splines
//! - **model**: Error families and links, Laplace/PIRLS GLMM fitting, model comparison
//! - **test**: Wald tests of fixed-effect coefficients
//! - **marginal**: Reference grids and estimated marginal means
//! - **contrast**: Pairwise contrasts of marginal means
//! - **correct**: Tukey and Bonferroni adjustment
//! - **pipeline**: Analysis configuration, batch runs and reports
//! - **simulate**: Seeded synthetic datasets
//!
//! # Example
//!
//! ```no_run
//! use morpho_glmm::prelude::*;
//!
//! let table = DataTable::from_csv("morphology.csv").unwrap();
//! let spec = ModelSpec::new(
//!     "branch_fraction",
//!     "~ treatment + (1 | mouse) + (1 | mouse:bin)",
//!     Family::beta(),
//! )
//! .unwrap();
//!
//! let fit = fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap();
//! let means = estimate_marginal_means(&fit, &EmmeansRequest::new(&["treatment"])).unwrap();
//! let contrasts = pairwise_contrasts(&fit, &means, Adjustment::Auto, 0.95).unwrap();
//! for c in &contrasts.contrasts {
//!     println!("{} - {}: p = {:.4}", c.minuend, c.subtrahend, c.p_adjusted);
//! }
//! ```

pub mod contrast;
pub mod correct;
pub mod data;
pub mod error;
pub mod marginal;
pub mod model;
pub mod pipeline;
pub mod simulate;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::contrast::{pairwise_contrasts, Contrast, ContrastSet};
    pub use crate::correct::{correct_bonferroni, tukey_p_value, Adjustment};
    pub use crate::data::{DataTable, Formula, MixedFormula, Variable, VariableType};
    pub use crate::error::{GlmmError, Result};
    pub use crate::marginal::{estimate_marginal_means, Averaging, EmmeansRequest, MarginalMean};
    pub use crate::model::{
        compare_models, fit_glmm, Family, FamilyName, FittedModel, GlmmConfig, Link,
        ModelComparison, ModelSpec, SelectionCriterion,
    };
    pub use crate::pipeline::{
        run_analysis, run_batch, Analysis, AnalysisConfig, AnalysisReport, BatchConfig,
    };
    pub use crate::simulate::{generate_synthetic, SyntheticConfig, SyntheticData};
    pub use crate::test::{test_wald, WaldResult};
}
