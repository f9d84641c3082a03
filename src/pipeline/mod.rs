//! Analysis configuration, batch execution and reports.

mod report;
mod runner;

pub use report::{AnalysisReport, FitStatistics, ModelMetadata};
pub use runner::{
    example_config, run_analysis, run_batch, Aggregation, Analysis, AnalysisConfig, BatchConfig,
    BatchReport, ComparisonConfig,
};
