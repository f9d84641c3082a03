//! Model specifications.

use crate::data::MixedFormula;
use crate::error::Result;
use crate::model::family::Family;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What to fit: outcome, fixed and random structure, family and factor columns.
///
/// In YAML the formula is written as a string:
///
/// ```yaml
/// outcome: soma_area
/// formula: "~ treatment + (1 | mouse)"
/// family:
///   name: gamma
///   link: log
/// factors: [distance]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Outcome column.
    pub outcome: String,
    /// Fixed effects plus random intercepts.
    #[serde(
        serialize_with = "serialize_formula",
        deserialize_with = "deserialize_formula"
    )]
    pub formula: MixedFormula,
    /// Error family and link.
    pub family: Family,
    /// Columns treated as factors even when their values are numeric.
    #[serde(default)]
    pub factors: Vec<String>,
}

impl ModelSpec {
    /// Create a specification from a formula string.
    pub fn new(outcome: &str, formula: &str, family: Family) -> Result<Self> {
        Ok(Self {
            outcome: outcome.to_string(),
            formula: MixedFormula::parse(formula)?,
            family,
            factors: Vec::new(),
        })
    }

    /// Treat a column as a factor.
    pub fn with_factor(mut self, column: &str) -> Self {
        if !self.factors.iter().any(|f| f == column) {
            self.factors.push(column.to_string());
        }
        self
    }

    /// All columns needed to fit the model, outcome included.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = self.formula.all_variables();
        columns.push(&self.outcome);
        columns.sort();
        columns.dedup();
        columns
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.outcome, self.formula, self.family)
    }
}

fn serialize_formula<S: Serializer>(formula: &MixedFormula, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(formula.formula_str.trim())
}

fn deserialize_formula<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<MixedFormula, D::Error> {
    let raw = String::deserialize(d)?;
    MixedFormula::parse(&raw).map_err(serde::de::Error::custom)
}
