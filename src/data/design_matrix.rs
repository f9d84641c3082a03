//! Design matrix construction from a table and a fixed-effect formula.
//!
//! The coding used for each predictor is kept alongside the matrix so that
//! arbitrary reference-grid cells can be encoded exactly like the data rows.

use crate::data::{DataTable, Formula, NaturalSpline, Predictor, Term, Variable, VariableType};
use crate::error::{GlmmError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How one predictor maps a value to design columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PredictorCoding {
    /// Numeric column entered linearly.
    Numeric { variable: String },
    /// Dummy (treatment) coding; `levels[dropped]` is absorbed by the intercept.
    Factor {
        variable: String,
        levels: Vec<String>,
        dropped: Option<usize>,
    },
    /// Natural spline basis of a numeric column.
    Spline {
        variable: String,
        spline: NaturalSpline,
    },
}

impl PredictorCoding {
    /// Underlying column name.
    pub fn variable(&self) -> &str {
        match self {
            PredictorCoding::Numeric { variable }
            | PredictorCoding::Factor { variable, .. }
            | PredictorCoding::Spline { variable, .. } => variable,
        }
    }

    fn names(&self, label: &str) -> Vec<String> {
        match self {
            PredictorCoding::Numeric { variable } => vec![variable.clone()],
            PredictorCoding::Factor {
                variable,
                levels,
                dropped,
            } => levels
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != *dropped)
                .map(|(_, l)| format!("{}{}", variable, l))
                .collect(),
            PredictorCoding::Spline { spline, .. } => spline.column_names(label),
        }
    }

    fn encode(&self, value: &Variable) -> Result<Vec<f64>> {
        match self {
            PredictorCoding::Numeric { variable } => {
                let x = value.as_f64().ok_or_else(|| not_numeric(variable, value))?;
                Ok(vec![x])
            }
            PredictorCoding::Spline { variable, spline } => {
                let x = value.as_f64().ok_or_else(|| not_numeric(variable, value))?;
                Ok(spline.basis(x))
            }
            PredictorCoding::Factor {
                variable,
                levels,
                dropped,
            } => {
                let key = value.level_key().ok_or_else(|| {
                    GlmmError::InvalidParameter(format!("Missing level for factor '{}'", variable))
                })?;
                let idx = levels.iter().position(|l| *l == key).ok_or_else(|| {
                    GlmmError::InvalidParameter(format!(
                        "Level '{}' is not a level of factor '{}' (levels: {:?})",
                        key, variable, levels
                    ))
                })?;
                Ok(levels
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != *dropped)
                    .map(|(i, _)| if i == idx { 1.0 } else { 0.0 })
                    .collect())
            }
        }
    }
}

fn not_numeric(variable: &str, value: &Variable) -> GlmmError {
    GlmmError::InvalidVariableType {
        column: variable.to_string(),
        reason: format!("expected a numeric value, got {:?}", value),
    }
}

/// Coding of one formula term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TermCoding {
    Main(PredictorCoding),
    Interaction(PredictorCoding, PredictorCoding),
}

impl TermCoding {
    fn names(&self, labels: &(String, Option<String>)) -> Vec<String> {
        match self {
            TermCoding::Main(p) => p.names(&labels.0),
            TermCoding::Interaction(p1, p2) => {
                let n1 = p1.names(&labels.0);
                let n2 = p2.names(labels.1.as_deref().unwrap_or_default());
                n1.iter()
                    .flat_map(|a| n2.iter().map(move |b| format!("{}:{}", a, b)))
                    .collect()
            }
        }
    }

    fn encode<F>(&self, lookup: &F) -> Result<Vec<f64>>
    where
        F: Fn(&str) -> Result<Variable>,
    {
        match self {
            TermCoding::Main(p) => p.encode(&lookup(p.variable())?),
            TermCoding::Interaction(p1, p2) => {
                let c1 = p1.encode(&lookup(p1.variable())?)?;
                let c2 = p2.encode(&lookup(p2.variable())?)?;
                Ok(c1
                    .iter()
                    .flat_map(|a| c2.iter().map(move |b| a * b))
                    .collect())
            }
        }
    }
}

/// A design matrix for the fixed effects of a model.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (observations x coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Coding needed to rebuild rows for new cells.
    coding: DesignCoding,
}

/// Everything needed to encode a new row the way the fitted rows were encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignCoding {
    /// Whether the first column is an intercept.
    pub intercept: bool,
    /// Per-term coding, in formula order.
    pub terms: Vec<TermCoding>,
    /// Fixed formula the coding was built from.
    pub formula: Formula,
    /// Levels of every factor used by the formula, reference first.
    pub factor_levels: HashMap<String, Vec<String>>,
    /// Observed mean of every numeric predictor.
    pub covariate_means: HashMap<String, f64>,
    /// Distinct observed values of every numeric predictor, ascending.
    pub covariate_values: HashMap<String, Vec<f64>>,
    /// Factor level of each fitted row, per factor.
    pub row_levels: HashMap<String, Vec<String>>,
}

impl DesignCoding {
    /// Encode one row. `lookup` returns the value of a column for this row.
    pub fn encode_with<F>(&self, lookup: F) -> Result<Vec<f64>>
    where
        F: Fn(&str) -> Result<Variable>,
    {
        let mut row = Vec::new();
        if self.intercept {
            row.push(1.0);
        }
        for term in &self.terms {
            row.extend(term.encode(&lookup)?);
        }
        Ok(row)
    }

    /// Whether a column is treated as a factor.
    pub fn is_factor(&self, variable: &str) -> bool {
        self.factor_levels.contains_key(variable)
    }

    /// Whether the combination of factor levels occurs among the fitted rows.
    pub fn combination_observed(&self, levels: &[(&str, &str)]) -> bool {
        let columns: Vec<(&Vec<String>, &str)> = levels
            .iter()
            .filter_map(|(var, level)| self.row_levels.get(*var).map(|c| (c, *level)))
            .collect();
        let n = columns.first().map(|(c, _)| c.len()).unwrap_or(0);
        (0..n).any(|i| columns.iter().all(|(c, level)| c[i] == *level))
    }
}

impl DesignMatrix {
    /// Build a design matrix from the table rows in `rows`.
    ///
    /// Categorical columns are dummy coded against their first level (sorted,
    /// or as fixed by [`DataTable::with_level_order`]); only levels present in
    /// `rows` are kept.
    pub fn from_formula(table: &DataTable, formula: &Formula, rows: &[usize]) -> Result<Self> {
        for var in formula.variables() {
            if !table.has_column(var) {
                return Err(GlmmError::MissingColumn(var.to_string()));
            }
        }
        if rows.is_empty() {
            return Err(GlmmError::EmptyData("No rows to build a design from".to_string()));
        }

        let mut factor_levels = HashMap::new();
        let mut row_levels = HashMap::new();
        let mut covariate_means = HashMap::new();
        let mut covariate_values = HashMap::new();

        for var in formula.variables() {
            let column = table.column(var)?;
            if table.column_type(var) == Some(VariableType::Categorical) {
                let keys: Vec<String> = rows
                    .iter()
                    .map(|&r| column[r].level_key().unwrap_or_default())
                    .collect();
                let present: HashSet<&String> = keys.iter().collect();
                let levels: Vec<String> = table
                    .levels(var)?
                    .into_iter()
                    .filter(|l| present.contains(l))
                    .collect();
                factor_levels.insert(var.to_string(), levels);
                row_levels.insert(var.to_string(), keys);
            } else {
                let values: Vec<f64> = rows
                    .iter()
                    .map(|&r| column[r].as_f64().ok_or_else(|| not_numeric(var, &column[r])))
                    .collect::<Result<_>>()?;
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let mut distinct = values;
                distinct.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                distinct.dedup();
                covariate_means.insert(var.to_string(), mean);
                covariate_values.insert(var.to_string(), distinct);
            }
        }

        let mut full_factor_used = false;
        let mut make = |p: &Predictor, main: bool| -> Result<PredictorCoding> {
            let var = p.variable().to_string();
            match p {
                Predictor::Spline { df, .. } => {
                    let values = covariate_values.get(&var).ok_or_else(|| {
                        GlmmError::InvalidVariableType {
                            column: var.clone(),
                            reason: "spline terms need a numeric column".to_string(),
                        }
                    })?;
                    Ok(PredictorCoding::Spline {
                        spline: NaturalSpline::fit(values, *df)?,
                        variable: var,
                    })
                }
                Predictor::Variable(_) => match factor_levels.get(&var) {
                    Some(levels) => {
                        // Without an intercept the first factor main effect keeps every level.
                        let dropped = if main && !formula.intercept && !full_factor_used {
                            full_factor_used = true;
                            None
                        } else {
                            Some(0)
                        };
                        Ok(PredictorCoding::Factor {
                            variable: var,
                            levels: levels.clone(),
                            dropped,
                        })
                    }
                    None => Ok(PredictorCoding::Numeric { variable: var }),
                },
            }
        };

        let mut terms = Vec::new();
        let mut labels = Vec::new();
        for term in &formula.terms {
            match term {
                Term::Intercept => {}
                Term::Main(p) => {
                    terms.push(TermCoding::Main(make(p, true)?));
                    labels.push((p.to_string(), None));
                }
                Term::Interaction(p1, p2) => {
                    terms.push(TermCoding::Interaction(make(p1, false)?, make(p2, false)?));
                    labels.push((p1.to_string(), Some(p2.to_string())));
                }
            }
        }

        let coding = DesignCoding {
            intercept: formula.intercept,
            terms,
            formula: formula.clone(),
            factor_levels,
            covariate_means,
            covariate_values,
            row_levels,
        };

        let mut coefficient_names = Vec::new();
        if formula.intercept {
            coefficient_names.push("(Intercept)".to_string());
        }
        for (term, label) in coding.terms.iter().zip(&labels) {
            coefficient_names.extend(term.names(label));
        }

        let n_coef = coefficient_names.len();
        let mut matrix = DMatrix::zeros(rows.len(), n_coef);
        for (i, &r) in rows.iter().enumerate() {
            let encoded = coding.encode_with(|var| Ok(table.column(var)?[r].clone()))?;
            for (j, v) in encoded.into_iter().enumerate() {
                matrix[(i, j)] = v;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            coding,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Coding used to build the rows.
    pub fn coding(&self) -> &DesignCoding {
        &self.coding
    }

    /// Number of observations (rows).
    pub fn n_obs(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a factor.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.coding
            .factor_levels
            .get(variable)
            .and_then(|l| l.first())
            .map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coding.intercept
    }

    /// Numerical rank of the design.
    pub fn rank(&self) -> usize {
        if self.matrix.ncols() == 0 {
            return 0;
        }
        let scale = self.matrix.amax().max(1.0);
        self.matrix
            .clone()
            .svd(false, false)
            .rank(1e-9 * scale * self.matrix.nrows().max(self.matrix.ncols()) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> DataTable {
        DataTable::new()
            .with_categorical("treatment", &["Control", "LPS", "Control", "LPS"])
            .unwrap()
            .with_continuous("distance", &[25.0, 30.0, 35.0, 28.0])
            .unwrap()
            .with_categorical("region", &["CA1", "CA1", "DG", "DG"])
            .unwrap()
    }

    fn all_rows(table: &DataTable) -> Vec<usize> {
        (0..table.n_rows()).collect()
    }

    #[test]
    fn test_intercept_only() {
        let table = create_test_table();
        let formula = Formula::parse("~ 1").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert_eq!(dm.n_obs(), 4);
        assert_eq!(dm.coefficient_names(), &["(Intercept)"]);
        assert!(dm.matrix().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_continuous_variable() {
        let table = create_test_table();
        let formula = Formula::parse("~ distance").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "distance"]);
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![25.0, 30.0, 35.0, 28.0]);
        assert_eq!(dm.coding().covariate_means["distance"], 29.5);
    }

    #[test]
    fn test_categorical_variable() {
        let table = create_test_table();
        let formula = Formula::parse("~ treatment").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "treatmentLPS"]);
        assert_eq!(dm.reference_level("treatment"), Some("Control"));
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(dm.rank(), 2);
    }

    #[test]
    fn test_no_intercept_keeps_all_levels_of_first_factor() {
        let table = create_test_table();
        let formula = Formula::parse("~ 0 + treatment + region").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert!(!dm.has_intercept());
        assert_eq!(
            dm.coefficient_names(),
            &["treatmentControl", "treatmentLPS", "regionDG"]
        );
    }

    #[test]
    fn test_interaction() {
        let table = create_test_table();
        let formula = Formula::parse("~ treatment * distance").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "treatmentLPS", "distance", "treatmentLPS:distance"]
        );
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(col, vec![0.0, 30.0, 0.0, 28.0]);
    }

    #[test]
    fn test_spline_columns() {
        let distances: Vec<f64> = (0..20).map(|i| 10.0 + 5.0 * (i % 10) as f64).collect();
        let groups: Vec<&str> = (0..20).map(|i| if i < 10 { "C" } else { "T" }).collect();
        let table = DataTable::new()
            .with_categorical("treatment", &groups)
            .unwrap()
            .with_continuous("distance", &distances)
            .unwrap();
        let formula = Formula::parse("~ treatment * ns(distance, 3)").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        assert_eq!(dm.n_coefficients(), 1 + 1 + 3 + 3);
        assert_eq!(dm.coefficient_names()[2], "ns(distance, 3)1");
        assert_eq!(dm.coefficient_names()[5], "treatmentT:ns(distance, 3)1");
        assert_eq!(dm.rank(), 8);
    }

    #[test]
    fn test_encode_new_cell_matches_row() {
        let table = create_test_table();
        let formula = Formula::parse("~ treatment + distance").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();

        let row = dm
            .coding()
            .encode_with(|var| match var {
                "treatment" => Ok(Variable::Categorical("LPS".to_string())),
                _ => Ok(Variable::Continuous(30.0)),
            })
            .unwrap();
        let expected: Vec<f64> = (0..3).map(|j| dm.matrix()[(1, j)]).collect();
        assert_eq!(row, expected);

        let unknown = dm.coding().encode_with(|var| match var {
            "treatment" => Ok(Variable::Categorical("Minocycline".to_string())),
            _ => Ok(Variable::Continuous(30.0)),
        });
        assert!(matches!(unknown, Err(GlmmError::InvalidParameter(_))));
    }

    #[test]
    fn test_combination_observed() {
        let table = create_test_table();
        let formula = Formula::parse("~ treatment * region").unwrap();
        let dm = DesignMatrix::from_formula(&table, &formula, &all_rows(&table)).unwrap();
        let coding = dm.coding();

        assert!(coding.combination_observed(&[("treatment", "LPS"), ("region", "CA1")]));
        assert!(coding.combination_observed(&[("treatment", "Control"), ("region", "DG")]));

        let subset = DesignMatrix::from_formula(&table, &formula, &[0, 1, 2]).unwrap();
        assert!(!subset
            .coding()
            .combination_observed(&[("treatment", "LPS"), ("region", "DG")]));
        assert!(subset.rank() < subset.n_coefficients());
    }

    #[test]
    fn test_missing_column() {
        let table = create_test_table();
        let formula = Formula::parse("~ genotype").unwrap();
        let result = DesignMatrix::from_formula(&table, &formula, &all_rows(&table));
        assert!(matches!(result, Err(GlmmError::MissingColumn(_))));
    }
}
