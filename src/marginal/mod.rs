//! Estimated marginal means on the link and response scales.

mod emmeans;
mod grid;

pub(crate) use emmeans::z_critical;
pub use emmeans::{estimate_marginal_means, MarginalMean};
pub use grid::{reference_grid, GridRow};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value a variable takes in a grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Value(f64),
    Level(String),
}

impl CellValue {
    /// Numeric value, parsing levels that look like numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Value(x) => Some(*x),
            CellValue::Level(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Value(x) => write!(f, "{}", x),
            CellValue::Level(s) => write!(f, "{}", s),
        }
    }
}

/// One variable's value in a grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEntry {
    pub variable: String,
    pub value: CellValue,
}

impl fmt::Display for CellEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.variable, self.value)
    }
}

/// Human-readable label for a set of cell entries, e.g. `treatment=LPS, distance=30`.
pub fn cell_label(entries: &[CellEntry]) -> String {
    entries
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How factors outside the request enter a marginal mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Averaging {
    /// Held at their reference (first) level.
    Reference,
    /// Averaged over their levels with equal weights.
    #[default]
    Equal,
}

fn default_level() -> f64 {
    0.95
}

/// Which marginal means to compute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmmeansRequest {
    /// Variables whose cells are compared.
    pub specs: Vec<String>,
    /// Stratification variables; contrasts are formed within strata.
    #[serde(default)]
    pub by: Vec<String>,
    /// Explicit values for requested variables.
    #[serde(default)]
    pub at: BTreeMap<String, Vec<CellValue>>,
    #[serde(default)]
    pub averaging: Averaging,
    /// Confidence level for intervals.
    #[serde(default = "default_level")]
    pub level: f64,
}

impl EmmeansRequest {
    /// Means for each cell of the given variables.
    pub fn new(specs: &[&str]) -> Self {
        Self {
            specs: specs.iter().map(|s| s.to_string()).collect(),
            by: Vec::new(),
            at: BTreeMap::new(),
            averaging: Averaging::default(),
            level: default_level(),
        }
    }

    /// Stratify by a variable.
    pub fn by(mut self, variable: &str) -> Self {
        self.by.push(variable.to_string());
        self
    }

    /// Evaluate a numeric variable at the given values only.
    pub fn at(mut self, variable: &str, values: &[f64]) -> Self {
        self.at.insert(
            variable.to_string(),
            values.iter().map(|&v| CellValue::Value(v)).collect(),
        );
        self
    }

    /// Restrict a factor to the given levels.
    pub fn at_levels(mut self, variable: &str, levels: &[&str]) -> Self {
        self.at.insert(
            variable.to_string(),
            levels.iter().map(|l| CellValue::Level(l.to_string())).collect(),
        );
        self
    }

    pub fn averaging(mut self, averaging: Averaging) -> Self {
        self.averaging = averaging;
        self
    }

    pub fn level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_yaml() {
        let yaml = r#"
specs: [treatment]
by: [distance]
at:
  distance: [10, 20]
"#;
        let request: EmmeansRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.averaging, Averaging::Equal);
        assert_eq!(request.level, 0.95);
        assert_eq!(
            request.at["distance"],
            vec![CellValue::Value(10.0), CellValue::Value(20.0)]
        );
    }

    #[test]
    fn test_cell_label() {
        let entries = vec![
            CellEntry {
                variable: "treatment".into(),
                value: CellValue::Level("LPS".into()),
            },
            CellEntry {
                variable: "distance".into(),
                value: CellValue::Value(30.0),
            },
        ];
        assert_eq!(cell_label(&entries), "treatment=LPS, distance=30");
    }
}
