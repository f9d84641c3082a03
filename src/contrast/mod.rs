//! Pairwise contrasts of marginal means with multiplicity adjustment.

mod pairwise;

pub use pairwise::{pairwise_contrasts, Contrast, ContrastSet, Ratio};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correct::Adjustment;
    use crate::data::DataTable;
    use crate::error::GlmmError;
    use crate::marginal::{estimate_marginal_means, EmmeansRequest};
    use crate::model::{fit_glmm, Family, FittedModel, GlmmConfig, ModelSpec};
    use approx::assert_relative_eq;

    fn three_group_fit() -> FittedModel {
        let groups = [
            "A", "A", "A", "A", "B", "B", "B", "B", "C", "C", "C", "C",
        ];
        let y = [
            5.0, 5.2, 4.8, 5.1, 6.0, 6.3, 5.8, 6.1, 5.1, 5.3, 4.9, 5.0,
        ];
        let table = DataTable::new()
            .with_categorical("treatment", &groups)
            .unwrap()
            .with_continuous("y", &y)
            .unwrap();
        let spec = ModelSpec::new("y", "~ treatment", Family::gaussian()).unwrap();
        fit_glmm(&table, &spec, &GlmmConfig::default()).unwrap()
    }

    #[test]
    fn test_sign_and_count() {
        let fit = three_group_fit();
        let means = estimate_marginal_means(&fit, &EmmeansRequest::new(&["treatment"])).unwrap();
        let set = pairwise_contrasts(&fit, &means, Adjustment::Auto, 0.95).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.adjustment, Adjustment::Tukey);
        let ba = set.find("treatment=A", "treatment=B").unwrap();
        assert_eq!(ba.minuend, "treatment=B");
        assert_relative_eq!(ba.estimate, means[1].estimate - means[0].estimate, epsilon = 1e-10);
        assert!(ba.estimate > 0.0);
        // Identity link: no ratio scale
        assert!(ba.ratio.is_none());
    }

    #[test]
    fn test_adjusted_not_below_raw() {
        let fit = three_group_fit();
        let means = estimate_marginal_means(&fit, &EmmeansRequest::new(&["treatment"])).unwrap();
        for adjustment in [Adjustment::Tukey, Adjustment::Bonferroni, Adjustment::None] {
            let set = pairwise_contrasts(&fit, &means, adjustment, 0.95).unwrap();
            for c in &set.contrasts {
                assert!(c.p_adjusted >= c.p_value);
                assert!(c.p_adjusted <= 1.0);
                if adjustment == Adjustment::None {
                    assert_eq!(c.p_adjusted, c.p_value);
                }
            }
        }
    }

    #[test]
    fn test_effect_size_scaled_by_sigma() {
        let fit = three_group_fit();
        let means = estimate_marginal_means(&fit, &EmmeansRequest::new(&["treatment"])).unwrap();
        let set = pairwise_contrasts(&fit, &means, Adjustment::None, 0.95).unwrap();
        let c = &set.contrasts[0];
        assert_relative_eq!(c.effect_size, c.estimate / fit.dispersion, epsilon = 1e-10);
        assert_relative_eq!(c.effect_lower, c.lower / fit.dispersion, epsilon = 1e-10);
        assert!(c.lower < c.estimate && c.estimate < c.upper);
    }

    #[test]
    fn test_single_cell_rejected() {
        let fit = three_group_fit();
        let request = EmmeansRequest::new(&["treatment"]).at_levels("treatment", &["A"]);
        let means = estimate_marginal_means(&fit, &request).unwrap();
        let err = pairwise_contrasts(&fit, &means, Adjustment::Auto, 0.95).unwrap_err();
        match err {
            GlmmError::InsufficientPairs {
                outcome,
                formula,
                n_cells,
                ..
            } => {
                assert_eq!(outcome, "y");
                assert!(formula.contains("treatment"));
                assert_eq!(n_cells, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_identical_cells_have_singular_difference() {
        let fit = three_group_fit();
        let means = estimate_marginal_means(&fit, &EmmeansRequest::new(&["treatment"])).unwrap();
        let duplicated = vec![means[0].clone(), means[0].clone()];
        let err = pairwise_contrasts(&fit, &duplicated, Adjustment::None, 0.95).unwrap_err();
        match err {
            GlmmError::SingularCovariance { outcome, detail, .. } => {
                assert_eq!(outcome, "y");
                assert!(detail.starts_with("treatment=A - treatment=A"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
