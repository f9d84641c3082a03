//! Multiple testing correction for pairwise contrasts.

pub mod bonferroni;
pub mod tukey;

pub use bonferroni::correct_bonferroni;
pub use tukey::{ptukey, tukey_p_value};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested multiplicity adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    /// Tukey HSD: studentized range over the means in one family.
    Tukey,
    /// Bonferroni over every reported pair.
    Bonferroni,
    /// Raw p-values.
    None,
    /// Tukey without stratification, Bonferroni with.
    #[default]
    Auto,
}

impl Adjustment {
    /// Method actually applied for a request that is (or is not) stratified.
    pub fn resolve(self, stratified: bool) -> Adjustment {
        match self {
            Adjustment::Auto if stratified => Adjustment::Bonferroni,
            Adjustment::Auto => Adjustment::Tukey,
            other => other,
        }
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::Tukey => write!(f, "tukey"),
            Adjustment::Bonferroni => write!(f, "bonferroni"),
            Adjustment::None => write!(f, "none"),
            Adjustment::Auto => write!(f, "auto"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_auto() {
        assert_eq!(Adjustment::Auto.resolve(false), Adjustment::Tukey);
        assert_eq!(Adjustment::Auto.resolve(true), Adjustment::Bonferroni);
        assert_eq!(Adjustment::None.resolve(true), Adjustment::None);
        assert_eq!(Adjustment::Tukey.resolve(true), Adjustment::Tukey);
    }
}
