//! Hypothesis tests on fitted model coefficients.

pub mod wald;

pub use wald::{test_wald, test_wald_coefficient, WaldResult, WaldResultSingle};
