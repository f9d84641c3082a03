//! Observation tables for mixed-model analyses.

use crate::error::{GlmmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// A cell value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of continuous or ordinal cells.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String key used when the value acts as a factor level or grouping key.
    pub fn level_key(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }

    fn parse(raw: &str, var_type: VariableType) -> Self {
        let raw = raw.trim();
        if is_missing_token(raw) {
            return Variable::Missing;
        }
        match var_type {
            VariableType::Continuous => raw
                .parse::<f64>()
                .map(Variable::Continuous)
                .unwrap_or(Variable::Missing),
            VariableType::Ordinal => raw
                .parse::<i64>()
                .map(Variable::Ordinal)
                .unwrap_or(Variable::Missing),
            VariableType::Categorical => Variable::Categorical(raw.to_string()),
        }
    }

    fn convert(&self, var_type: VariableType) -> Self {
        match (self, var_type) {
            (Variable::Missing, _) => Variable::Missing,
            (Variable::Categorical(s), t) => Variable::parse(s, t),
            (Variable::Continuous(v), VariableType::Continuous) => Variable::Continuous(*v),
            (Variable::Continuous(v), VariableType::Ordinal) => Variable::Ordinal(v.round() as i64),
            (Variable::Ordinal(v), VariableType::Continuous) => Variable::Continuous(*v as f64),
            (Variable::Ordinal(v), VariableType::Ordinal) => Variable::Ordinal(*v),
            (v, VariableType::Categorical) => {
                Variable::Categorical(v.level_key().unwrap_or_default())
            }
        }
    }
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na" || raw == "NaN"
}

/// Type hint for columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// A typed column of observations.
#[derive(Debug, Clone)]
struct Column {
    name: String,
    var_type: VariableType,
    values: Vec<Variable>,
}

/// Observation table: one row per measured cell, image or animal.
///
/// Columns are inferred as continuous if every non-missing value parses as a
/// number, otherwise categorical. Use [`DataTable::with_column_types`] to
/// override, e.g. to treat a numeric distance as a factor.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    n_rows: usize,
    /// Explicit level orderings; the first level is the reference.
    level_orders: HashMap<String, Vec<String>>,
}

impl DataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a comma-separated file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_delimited(path, b',')
    }

    /// Load a tab-separated file with a header row.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_delimited(path, b'\t')
    }

    fn from_delimited<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        if header.is_empty() {
            return Err(GlmmError::EmptyData("Table has no columns".to_string()));
        }

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); header.len()];
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            for (col_idx, col) in raw.iter_mut().enumerate() {
                col.push(record.get(col_idx).unwrap_or("").to_string());
            }
        }

        if raw[0].is_empty() {
            return Err(GlmmError::EmptyData("No rows in table".to_string()));
        }

        let mut table = DataTable::new();
        for (name, values) in header.into_iter().zip(raw) {
            table = table.with_raw_column(&name, &values)?;
        }
        Ok(table)
    }

    /// Add a column from raw strings, inferring its type.
    pub fn with_raw_column<S: AsRef<str>>(self, name: &str, raw: &[S]) -> Result<Self> {
        let all_numeric = raw.iter().all(|v| {
            let v = v.as_ref().trim();
            is_missing_token(v) || v.parse::<f64>().is_ok()
        });
        let var_type = if all_numeric {
            VariableType::Continuous
        } else {
            VariableType::Categorical
        };
        let values = raw
            .iter()
            .map(|v| Variable::parse(v.as_ref(), var_type))
            .collect();
        self.with_column(name, var_type, values)
    }

    /// Add a categorical column.
    pub fn with_categorical<S: AsRef<str>>(self, name: &str, values: &[S]) -> Result<Self> {
        let values = values
            .iter()
            .map(|v| Variable::parse(v.as_ref(), VariableType::Categorical))
            .collect();
        self.with_column(name, VariableType::Categorical, values)
    }

    /// Add a continuous column. Non-finite values are stored as missing.
    pub fn with_continuous(self, name: &str, values: &[f64]) -> Result<Self> {
        let values = values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    Variable::Continuous(v)
                } else {
                    Variable::Missing
                }
            })
            .collect();
        self.with_column(name, VariableType::Continuous, values)
    }

    /// Add a typed column.
    pub fn with_column(
        mut self,
        name: &str,
        var_type: VariableType,
        values: Vec<Variable>,
    ) -> Result<Self> {
        if self.index.contains_key(name) {
            return Err(GlmmError::InvalidParameter(format!(
                "Duplicate column '{}'",
                name
            )));
        }
        if !self.columns.is_empty() && values.len() != self.n_rows {
            return Err(GlmmError::DimensionMismatch {
                expected: self.n_rows,
                actual: values.len(),
            });
        }
        self.n_rows = values.len();
        self.index.insert(name.to_string(), self.columns.len());
        self.columns.push(Column {
            name: name.to_string(),
            var_type,
            values,
        });
        Ok(self)
    }

    /// Override column types, re-interpreting existing values.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Result<Self> {
        for (col_name, var_type) in &types {
            let idx = *self
                .index
                .get(col_name)
                .ok_or_else(|| GlmmError::MissingColumn(col_name.clone()))?;
            let column = &mut self.columns[idx];
            column.values = column.values.iter().map(|v| v.convert(*var_type)).collect();
            column.var_type = *var_type;
        }
        Ok(self)
    }

    /// Fix the level order of a categorical column. The first level becomes the
    /// reference level for treatment coding.
    pub fn with_level_order<S: AsRef<str>>(mut self, column: &str, order: &[S]) -> Result<Self> {
        let observed = self.levels(column)?;
        let order: Vec<String> = order.iter().map(|s| s.as_ref().to_string()).collect();
        for level in &observed {
            if !order.contains(level) {
                return Err(GlmmError::InvalidParameter(format!(
                    "Level order for '{}' is missing observed level '{}'",
                    column, level
                )));
            }
        }
        self.level_orders.insert(column.to_string(), order);
        Ok(self)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.index.get(column).map(|&i| self.columns[i].var_type)
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<&[Variable]> {
        self.index
            .get(column)
            .map(|&i| self.columns[i].values.as_slice())
            .ok_or_else(|| GlmmError::MissingColumn(column.to_string()))
    }

    /// Get a single value.
    pub fn get(&self, row: usize, column: &str) -> Option<&Variable> {
        self.column(column).ok().and_then(|c| c.get(row))
    }

    /// Numeric view of a column; categorical and missing cells become `None`.
    pub fn numeric(&self, column: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.column(column)?.iter().map(|v| v.as_f64()).collect())
    }

    /// Unique levels of a column used as a factor.
    ///
    /// An explicit level order wins. Otherwise levels are sorted numerically
    /// when every level parses as a number, alphabetically when not.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let values = self.column(column)?;
        let observed: HashSet<String> = values.iter().filter_map(|v| v.level_key()).collect();

        if let Some(order) = self.level_orders.get(column) {
            return Ok(order
                .iter()
                .filter(|l| observed.contains(*l))
                .cloned()
                .collect());
        }

        let mut levels: Vec<String> = observed.into_iter().collect();
        let numeric: Option<Vec<f64>> = levels.iter().map(|l| l.parse::<f64>().ok()).collect();
        match numeric {
            Some(_) => levels.sort_by(|a, b| {
                let (x, y) = (a.parse::<f64>().unwrap_or(0.0), b.parse::<f64>().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
            }),
            None => levels.sort(),
        }
        Ok(levels)
    }

    /// Rows with no missing value in any of the given columns.
    pub fn complete_rows(&self, columns: &[&str]) -> Result<Vec<usize>> {
        let cols: Vec<&[Variable]> = columns
            .iter()
            .map(|c| self.column(c))
            .collect::<Result<_>>()?;
        Ok((0..self.n_rows)
            .filter(|&i| cols.iter().all(|c| !c[i].is_missing()))
            .collect())
    }

    /// Subset the table to the given row indices (in the given order).
    pub fn subset_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(GlmmError::InvalidParameter(format!(
                "Row index {} out of range ({} rows)",
                bad, self.n_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                var_type: c.var_type,
                values: rows.iter().map(|&r| c.values[r].clone()).collect(),
            })
            .collect();
        Ok(Self {
            columns,
            index: self.index.clone(),
            n_rows: rows.len(),
            level_orders: self.level_orders.clone(),
        })
    }

    /// Collapse rows sharing the same values of `group_by` into one row holding
    /// the mean of each `value` column (e.g. per-animal averages).
    ///
    /// Missing values are skipped; a group whose values are all missing gets a
    /// missing mean. Groups appear in order of first occurrence.
    pub fn aggregate_mean(&self, group_by: &[&str], values: &[&str]) -> Result<Self> {
        if group_by.is_empty() {
            return Err(GlmmError::InvalidParameter(
                "aggregate_mean needs at least one grouping column".to_string(),
            ));
        }
        let keys: Vec<&[Variable]> = group_by
            .iter()
            .map(|c| self.column(c))
            .collect::<Result<_>>()?;
        let vals: Vec<Vec<Option<f64>>> = values
            .iter()
            .map(|c| self.numeric(c))
            .collect::<Result<_>>()?;

        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: BTreeMap<Vec<String>, (usize, Vec<usize>)> = BTreeMap::new();
        for row in 0..self.n_rows {
            let key: Option<Vec<String>> = keys.iter().map(|c| c[row].level_key()).collect();
            let Some(key) = key else { continue };
            let next = order.len();
            let entry = groups.entry(key.clone()).or_insert_with(|| (next, Vec::new()));
            if entry.0 == next {
                order.push(key);
            }
            entry.1.push(row);
        }

        let mut table = DataTable::new();
        for (k, name) in group_by.iter().enumerate() {
            let source = &self.columns[self.index[*name]];
            let column_values: Vec<Variable> = order
                .iter()
                .map(|key| {
                    let first_row = groups[key].1[0];
                    keys[k][first_row].clone()
                })
                .collect();
            table = table.with_column(name, source.var_type, column_values)?;
        }
        for (v, name) in values.iter().enumerate() {
            let means: Vec<Variable> = order
                .iter()
                .map(|key| {
                    let present: Vec<f64> =
                        groups[key].1.iter().filter_map(|&r| vals[v][r]).collect();
                    if present.is_empty() {
                        Variable::Missing
                    } else {
                        Variable::Continuous(present.iter().sum::<f64>() / present.len() as f64)
                    }
                })
                .collect();
            table = table.with_column(name, VariableType::Continuous, means)?;
        }
        for name in group_by {
            if let Some(order) = self.level_orders.get(*name) {
                table.level_orders.insert(name.to_string(), order.clone());
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "mouse,treatment,distance,soma_area").unwrap();
        writeln!(file, "M1,Control,10,120.5").unwrap();
        writeln!(file, "M1,Control,20,118.0").unwrap();
        writeln!(file, "M2,LPS,10,140.2").unwrap();
        writeln!(file, "M2,LPS,100,NA").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv();
        let table = DataTable::from_csv(file.path()).unwrap();

        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.n_columns(), 4);
        assert_eq!(
            table.column_names(),
            vec!["mouse", "treatment", "distance", "soma_area"]
        );
        assert_eq!(table.column_type("treatment"), Some(VariableType::Categorical));
        assert_eq!(table.column_type("soma_area"), Some(VariableType::Continuous));
        assert!(table.get(3, "soma_area").unwrap().is_missing());
    }

    #[test]
    fn test_levels_sorted() {
        let file = create_test_csv();
        let table = DataTable::from_csv(file.path()).unwrap();
        assert_eq!(table.levels("treatment").unwrap(), vec!["Control", "LPS"]);
    }

    #[test]
    fn test_numeric_levels_sort_numerically() {
        let file = create_test_csv();
        let mut types = HashMap::new();
        types.insert("distance".to_string(), VariableType::Categorical);
        let table = DataTable::from_csv(file.path())
            .unwrap()
            .with_column_types(types)
            .unwrap();

        assert_eq!(table.column_type("distance"), Some(VariableType::Categorical));
        assert_eq!(table.levels("distance").unwrap(), vec!["10", "20", "100"]);
    }

    #[test]
    fn test_level_order_override() {
        let table = DataTable::new()
            .with_categorical("treatment", &["Saline", "LPS", "Saline"])
            .unwrap()
            .with_level_order("treatment", &["Saline", "LPS"])
            .unwrap();
        assert_eq!(table.levels("treatment").unwrap(), vec!["Saline", "LPS"]);

        let bad = DataTable::new()
            .with_categorical("treatment", &["Saline", "LPS"])
            .unwrap()
            .with_level_order("treatment", &["Saline"]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_complete_rows_and_subset() {
        let file = create_test_csv();
        let table = DataTable::from_csv(file.path()).unwrap();
        let rows = table.complete_rows(&["treatment", "soma_area"]).unwrap();
        assert_eq!(rows, vec![0, 1, 2]);

        let subset = table.subset_rows(&rows).unwrap();
        assert_eq!(subset.n_rows(), 3);
        assert!(table.subset_rows(&[10]).is_err());
    }

    #[test]
    fn test_column_length_mismatch() {
        let result = DataTable::new()
            .with_continuous("y", &[1.0, 2.0])
            .unwrap()
            .with_categorical("g", &["a"]);
        assert!(matches!(result, Err(GlmmError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_aggregate_mean() {
        let table = DataTable::new()
            .with_categorical("mouse", &["M1", "M1", "M2", "M2", "M3"])
            .unwrap()
            .with_categorical("treatment", &["C", "C", "T", "T", "T"])
            .unwrap()
            .with_continuous("y", &[1.0, 3.0, 4.0, f64::NAN, 7.0])
            .unwrap();

        let agg = table.aggregate_mean(&["mouse", "treatment"], &["y"]).unwrap();
        assert_eq!(agg.n_rows(), 3);
        assert_eq!(agg.get(0, "mouse").unwrap().as_categorical(), Some("M1"));
        assert_eq!(agg.get(0, "y").unwrap().as_f64(), Some(2.0));
        assert_eq!(agg.get(1, "y").unwrap().as_f64(), Some(4.0));
        assert_eq!(agg.get(2, "treatment").unwrap().as_categorical(), Some("T"));
    }

    #[test]
    fn test_missing_column() {
        let table = DataTable::new().with_continuous("y", &[1.0]).unwrap();
        assert!(matches!(table.column("x"), Err(GlmmError::MissingColumn(_))));
    }
}
