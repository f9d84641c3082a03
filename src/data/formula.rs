//! Formula parsing for fixed-effect model specification.

use crate::error::{GlmmError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A single predictor appearing in a formula term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predictor {
    /// A column used as-is: dummy coded when categorical, linear when numeric.
    Variable(String),
    /// Natural cubic spline basis of a numeric column with `df` columns.
    Spline { variable: String, df: usize },
}

impl Predictor {
    /// Name of the underlying data column.
    pub fn variable(&self) -> &str {
        match self {
            Predictor::Variable(v) => v,
            Predictor::Spline { variable, .. } => variable,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        static SPLINE: OnceLock<Regex> = OnceLock::new();
        let spline = SPLINE.get_or_init(|| {
            Regex::new(r"^ns\(\s*([A-Za-z_][A-Za-z0-9_.]*)\s*,\s*(?:df\s*=\s*)?(\d+)\s*\)$")
                .expect("valid spline pattern")
        });

        let s = s.trim();
        if let Some(caps) = spline.captures(s) {
            let df: usize = caps[2].parse().map_err(|_| {
                GlmmError::FormulaParse(format!("Invalid spline degrees of freedom in '{}'", s))
            })?;
            if df == 0 {
                return Err(GlmmError::FormulaParse(format!(
                    "Spline needs at least one degree of freedom: '{}'",
                    s
                )));
            }
            return Ok(Predictor::Spline {
                variable: caps[1].to_string(),
                df,
            });
        }
        if s.is_empty() || s.contains(|c: char| "()|,".contains(c)) {
            return Err(GlmmError::FormulaParse(format!("Invalid predictor '{}'", s)));
        }
        Ok(Predictor::Variable(s.to_string()))
    }
}

impl std::fmt::Display for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predictor::Variable(v) => write!(f, "{}", v),
            Predictor::Spline { variable, df } => write!(f, "ns({}, {})", variable, df),
        }
    }
}

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a predictor.
    Main(Predictor),
    /// Interaction between two predictors.
    Interaction(Predictor, Predictor),
}

impl Term {
    /// Get the column names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(p) => vec![p.variable()],
            Term::Interaction(p1, p2) => vec![p1.variable(), p2.variable()],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(p) => write!(f, "{}", p),
            Term::Interaction(p1, p2) => write!(f, "{}:{}", p1, p2),
        }
    }
}

/// A parsed fixed-effect formula.
///
/// Supports R-style formula syntax:
/// - `~ treatment` - intercept + treatment
/// - `~ treatment + distance` - intercept + treatment + distance
/// - `~ treatment * distance` - main effects + treatment:distance
/// - `~ treatment * ns(distance, 3)` - spline in distance, interacted with treatment
/// - `~ 0 + treatment` - no intercept, one column per level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept).
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use morpho_glmm::data::Formula;
    /// let f = Formula::parse("~ treatment + distance").unwrap();
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 2);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
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

        let (intercept, rhs) = if rhs == "0" || rhs == "-1" {
            return Err(GlmmError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        } else if rhs.starts_with("0 +") || rhs.starts_with("0+") {
            (false, rhs.trim_start_matches('0').trim_start().trim_start_matches('+').trim())
        } else if rhs.starts_with("-1 +") || rhs.starts_with("-1+") {
            (false, rhs.trim_start_matches("-1").trim_start().trim_start_matches('+').trim())
        } else {
            (true, rhs)
        };

        let mut terms = Vec::new();

        for term_str in rhs.split('+').map(|s| s.trim()) {
            if term_str.is_empty() || term_str == "1" {
                continue;
            }

            if term_str.contains('*') {
                let parts: Vec<&str> = term_str.split('*').map(|s| s.trim()).collect();
                if parts.len() != 2 {
                    return Err(GlmmError::FormulaParse(format!(
                        "Invalid interaction term: {}",
                        term_str
                    )));
                }
                let p1 = Predictor::parse(parts[0])?;
                let p2 = Predictor::parse(parts[1])?;
                push(Term::Main(p1.clone()), &mut terms);
                push(Term::Main(p2.clone()), &mut terms);
                push(Term::Interaction(p1, p2), &mut terms);
            } else if term_str.contains(':') {
                let parts: Vec<&str> = term_str.split(':').map(|s| s.trim()).collect();
                if parts.len() != 2 {
                    return Err(GlmmError::FormulaParse(format!(
                        "Invalid interaction term: {}",
                        term_str
                    )));
                }
                push(
                    Term::Interaction(Predictor::parse(parts[0])?, Predictor::parse(parts[1])?),
                    &mut terms,
                );
            } else {
                push(Term::Main(Predictor::parse(term_str)?), &mut terms);
            }
        }

        if terms.is_empty() && !intercept {
            return Err(GlmmError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all column names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check if a column is used in the formula.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }

    /// Check whether two columns appear together in an interaction term.
    pub fn interacts(&self, a: &str, b: &str) -> bool {
        self.terms.iter().any(|t| match t {
            Term::Interaction(p1, p2) => {
                (p1.variable() == a && p2.variable() == b)
                    || (p1.variable() == b && p2.variable() == a)
            }
            _ => false,
        })
    }
}

fn push(term: Term, terms: &mut Vec<Term>) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}
