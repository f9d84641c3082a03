//! Synthetic datasets for exercising the pipeline.
//!
//! Outcomes follow the study's designs: subjects nested in treatment, replicate
//! bins nested in subjects, and optional Sholl distances.

mod generate;

pub use generate::{generate_synthetic, SyntheticConfig, SyntheticData};
