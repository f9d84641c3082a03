//! Random-intercept specification for mixed models.
//!
//! Supports lme4-style syntax for grouping structures:
//! - `(1 | mouse)` - random intercept per mouse
//! - `(1 | mouse) + (1 | bin)` - crossed random intercepts
//! - `(1 | cohort/mouse)` - nested, expands to `(1 | cohort) + (1 | cohort:mouse)`
//! - `(1 | cohort:mouse)` - intercept per combination of two columns

use crate::data::{DataTable, Formula};
use crate::error::{GlmmError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A single random-intercept term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Columns whose joint value defines a group (one column for simple terms).
    pub grouping: Vec<String>,
}

impl RandomEffect {
    /// Random intercept for a single grouping column.
    pub fn intercept(column: &str) -> Self {
        Self {
            grouping: vec![column.to_string()],
        }
    }

    /// Parse a random effect specification string.
    ///
    /// Nested specifications (`a/b`) expand to several terms, so this returns a list.
    pub fn parse(spec: &str) -> Result<Vec<Self>> {
        let spec = spec.trim();

        if !spec.starts_with('(') || !spec.ends_with(')') {
            return Err(GlmmError::FormulaParse(format!(
                "Random effect must be wrapped in parentheses: {}",
                spec
            )));
        }

        let inner = spec[1..spec.len() - 1].trim();
        let parts: Vec<&str> = inner.split('|').collect();
        if parts.len() != 2 {
            return Err(GlmmError::FormulaParse(format!(
                "Random effect must have exactly one '|': {}",
                spec
            )));
        }

        let terms_str = parts[0].trim();
        let grouping = parts[1].trim();

        if grouping.is_empty() {
            return Err(GlmmError::FormulaParse(
                "Random effect grouping variable cannot be empty".to_string(),
            ));
        }
        if terms_str != "1" {
            return Err(GlmmError::FormulaParse(format!(
                "Only random intercepts '(1 | group)' are supported, got: {}",
                spec
            )));
        }

        let split = |s: &str, sep: char| -> Result<Vec<String>> {
            let cols: Vec<String> = s.split(sep).map(|c| c.trim().to_string()).collect();
            if cols.iter().any(|c| c.is_empty()) {
                return Err(GlmmError::FormulaParse(format!(
                    "Empty grouping column in: {}",
                    spec
                )));
            }
            Ok(cols)
        };

        if grouping.contains('/') {
            let levels = split(grouping, '/')?;
            Ok((1..=levels.len())
                .map(|depth| Self {
                    grouping: levels[..depth].to_vec(),
                })
                .collect())
        } else {
            Ok(vec![Self {
                grouping: split(grouping, ':')?,
            }])
        }
    }

    /// Display name of the grouping factor (`a` or `a:b`).
    pub fn name(&self) -> String {
        self.grouping.join(":")
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(1 | {})", self.name())
    }
}

/// A formula with fixed effects and random intercepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedFormula {
    /// Fixed effects formula.
    pub fixed: Formula,
    /// Random intercept terms, nested specifications already expanded.
    pub random: Vec<RandomEffect>,
    /// Original formula string.
    pub formula_str: String,
}

impl MixedFormula {
    /// Parse a mixed model formula.
    ///
    /// # Examples
    /// ```
    /// use morpho_glmm::data::MixedFormula;
    /// let f = MixedFormula::parse("~ treatment + (1 | mouse) + (1 | bin)").unwrap();
    /// assert!(f.fixed.intercept);
    /// assert_eq!(f.random.len(), 2);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        static RANDOM: OnceLock<Regex> = OnceLock::new();
        let re = RANDOM.get_or_init(|| Regex::new(r"\([^()]+\|[^()]+\)").expect("valid pattern"));

        let formula_str = formula.to_string();
        let formula = formula.trim();

        if !formula.starts_with('~') {
            return Err(GlmmError::FormulaParse(
                "Formula must start with '~'".to_string(),
            ));
        }

        let rhs = formula[1..].trim();
        if rhs.is_empty() {
            return Err(GlmmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();

        let mut random: Vec<RandomEffect> = Vec::new();
        for s in &random_strs {
            for effect in RandomEffect::parse(s)? {
                if !random.contains(&effect) {
                    random.push(effect);
                }
            }
        }

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replace(re_str, "");
        }

        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");

        let fixed_formula_str = if fixed_str.is_empty() {
            "~ 1".to_string()
        } else {
            format!("~ {}", fixed_str)
        };

        let fixed = Formula::parse(&fixed_formula_str)?;

        Ok(Self {
            fixed,
            random,
            formula_str,
        })
    }

    /// Check if the formula has any random effects.
    pub fn has_random_effects(&self) -> bool {
        !self.random.is_empty()
    }

    /// Get all grouping factor names.
    pub fn grouping_names(&self) -> Vec<String> {
        self.random.iter().map(|r| r.name()).collect()
    }

    /// Get all columns used (fixed terms and grouping columns).
    pub fn all_variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.fixed.variables();
        for re in &self.random {
            vars.extend(re.grouping.iter().map(|g| g.as_str()));
        }
        vars.sort();
        vars.dedup();
        vars
    }
}

impl std::fmt::Display for MixedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula_str.trim())
    }
}

/// Group membership for one random-intercept term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingFactor {
    /// Factor name (`a` or `a:b`).
    pub name: String,
    /// Unique group labels in order of first appearance.
    pub group_ids: Vec<String>,
    /// Group index of each observation.
    pub group_indices: Vec<usize>,
}

impl GroupingFactor {
    /// Build from a table restricted to `rows`.
    pub fn from_random_effect(
        table: &DataTable,
        effect: &RandomEffect,
        rows: &[usize],
    ) -> Result<Self> {
        let columns = effect
            .grouping
            .iter()
            .map(|c| table.column(c))
            .collect::<Result<Vec<_>>>()?;

        let mut group_map: HashMap<String, usize> = HashMap::new();
        let mut group_ids: Vec<String> = Vec::new();
        let mut group_indices: Vec<usize> = Vec::with_capacity(rows.len());

        for &row in rows {
            let parts: Option<Vec<String>> = columns.iter().map(|c| c[row].level_key()).collect();
            let key = parts
                .ok_or_else(|| {
                    GlmmError::InvalidParameter(format!(
                        "Missing value in grouping factor '{}' at row {}",
                        effect.name(),
                        row
                    ))
                })?
                .join(":");

            let idx = match group_map.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = group_ids.len();
                    group_map.insert(key.clone(), idx);
                    group_ids.push(key);
                    idx
                }
            };
            group_indices.push(idx);
        }

        Ok(Self {
            name: effect.name(),
            group_ids,
            group_indices,
        })
    }

    /// Number of groups.
    pub fn n_groups(&self) -> usize {
        self.group_ids.len()
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.group_indices.len()
    }

    /// Get number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups()];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }
}

/// All random-intercept terms of a model, laid out as consecutive blocks of
/// spherical random effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomDesign {
    /// Grouping factors in formula order.
    pub factors: Vec<GroupingFactor>,
}

impl RandomDesign {
    /// Build the random design for the given rows.
    pub fn from_formula(table: &DataTable, formula: &MixedFormula, rows: &[usize]) -> Result<Self> {
        let factors = formula
            .random
            .iter()
            .map(|re| GroupingFactor::from_random_effect(table, re, rows))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { factors })
    }

    /// Number of grouping factors.
    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }

    /// Total number of random effects across all factors.
    pub fn n_random_effects(&self) -> usize {
        self.factors.iter().map(|f| f.n_groups()).sum()
    }

    /// Column offset of each factor's block.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.factors.len());
        let mut acc = 0;
        for f in &self.factors {
            offsets.push(acc);
            acc += f.n_groups();
        }
        offsets
    }
}
