//! Bonferroni family-wise error rate correction.

/// Multiply each p-value by the number of tests, capped at one.
///
/// `n_tests` may exceed `p_values.len()` when the family spans several calls.
pub fn correct_bonferroni(p_values: &[f64], n_tests: usize) -> Vec<f64> {
    let m = n_tests.max(p_values.len()) as f64;
    p_values.iter().map(|&p| (p * m).min(1.0)).collect()
}
