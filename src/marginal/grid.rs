//! Reference grids: the cells at which marginal means are evaluated.

use crate::data::{DesignCoding, Variable};
use crate::error::{GlmmError, Result};
use crate::marginal::{Averaging, CellEntry, CellValue, EmmeansRequest};
use crate::model::FittedModel;

/// Relative tolerance when matching a requested covariate value to the data.
const VALUE_TOL: f64 = 1e-9;

/// One cell of a reference grid with its linear function of the coefficients.
#[derive(Debug, Clone)]
pub struct GridRow {
    /// Values of the `specs` variables.
    pub cell: Vec<CellEntry>,
    /// Values of the `by` variables.
    pub stratum: Vec<CellEntry>,
    /// Row `L` such that the cell mean on the link scale is `L beta`.
    pub linfct: Vec<f64>,
}

/// Build the reference grid for a request.
///
/// Strata vary slowest; within a stratum the first `specs` variable varies
/// slowest. Factors not in the request are averaged with equal weights (or
/// held at their reference level); numeric covariates not in the request are
/// held at their observed mean.
pub fn reference_grid(fit: &FittedModel, request: &EmmeansRequest) -> Result<Vec<GridRow>> {
    let coding = fit.coding();
    let model_vars = coding.formula.variables();

    if request.specs.is_empty() {
        return Err(GlmmError::InvalidParameter(
            "A marginal-means request needs at least one variable in specs".to_string(),
        ));
    }
    let requested: Vec<&String> = request.specs.iter().chain(&request.by).collect();
    for (i, var) in requested.iter().enumerate() {
        if !model_vars.contains(&var.as_str()) {
            return Err(GlmmError::InvalidParameter(format!(
                "'{}' is not a fixed-effect variable of the model for '{}'",
                var, fit.outcome
            )));
        }
        if requested[..i].contains(var) {
            return Err(GlmmError::InvalidParameter(format!(
                "'{}' appears more than once in specs/by",
                var
            )));
        }
    }

    let spec_dims = request
        .specs
        .iter()
        .map(|v| Ok((v.clone(), grid_values(fit, v, request)?)))
        .collect::<Result<Vec<_>>>()?;
    let by_dims = request
        .by
        .iter()
        .map(|v| Ok((v.clone(), grid_values(fit, v, request)?)))
        .collect::<Result<Vec<_>>>()?;

    // Factors averaged over (or fixed at the reference level).
    let mut other_dims: Vec<(String, Vec<CellValue>)> = Vec::new();
    for var in &model_vars {
        if requested.iter().any(|r| r.as_str() == *var) {
            continue;
        }
        if let Some(levels) = coding.factor_levels.get(*var) {
            let levels: Vec<CellValue> = match request.averaging {
                Averaging::Equal => levels.iter().map(|l| CellValue::Level(l.clone())).collect(),
                Averaging::Reference => levels
                    .iter()
                    .take(1)
                    .map(|l| CellValue::Level(l.clone()))
                    .collect(),
            };
            other_dims.push((var.to_string(), levels));
        }
    }
    let other_combos = cartesian(&other_dims);

    let mut rows = Vec::new();
    for stratum in cartesian(&by_dims) {
        for cell in cartesian(&spec_dims) {
            let mut linfct: Vec<f64> = Vec::new();
            for other in &other_combos {
                let assignment: Vec<&CellEntry> =
                    stratum.iter().chain(&cell).chain(other).collect();
                check_estimable(fit, &assignment)?;
                let row = coding.encode_with(|var| lookup(coding, &assignment, var))?;
                if linfct.is_empty() {
                    linfct = vec![0.0; row.len()];
                }
                for (acc, v) in linfct.iter_mut().zip(row) {
                    *acc += v;
                }
            }
            let weight = 1.0 / other_combos.len() as f64;
            linfct.iter_mut().for_each(|v| *v *= weight);
            rows.push(GridRow {
                cell,
                stratum: stratum.clone(),
                linfct,
            });
        }
    }
    Ok(rows)
}

/// Values a requested variable takes in the grid.
fn grid_values(fit: &FittedModel, var: &str, request: &EmmeansRequest) -> Result<Vec<CellValue>> {
    let coding = fit.coding();
    let at = request.at.get(var);
    if let Some(levels) = coding.factor_levels.get(var) {
        let Some(at) = at else {
            return Ok(levels.iter().map(|l| CellValue::Level(l.clone())).collect());
        };
        return at
            .iter()
            .map(|value| {
                let key = value.to_string();
                if levels.contains(&key) {
                    Ok(CellValue::Level(key))
                } else {
                    Err(fit.unsupported_cell(format!(
                        "'{}' is not an observed level of '{}' (levels: {:?})",
                        key, var, levels
                    )))
                }
            })
            .collect();
    }

    let observed = coding.covariate_values.get(var).ok_or_else(|| {
        GlmmError::InvalidParameter(format!("No observed values recorded for '{}'", var))
    })?;
    let Some(at) = at else {
        return Ok(observed.iter().map(|&x| CellValue::Value(x)).collect());
    };
    at.iter()
        .map(|value| {
            let x = value.as_f64().ok_or_else(|| {
                GlmmError::InvalidParameter(format!(
                    "'{}' is numeric; '{}' is not a number",
                    var, value
                ))
            })?;
            if observed
                .iter()
                .any(|&o| (o - x).abs() <= VALUE_TOL * o.abs().max(1.0))
            {
                Ok(CellValue::Value(x))
            } else {
                Err(fit.unsupported_cell(format!(
                    "{} = {} was never observed (observed values: {:?})",
                    var, x, observed
                )))
            }
        })
        .collect()
}

/// Reject factor combinations that were never observed when the model
/// contains their interaction.
fn check_estimable(fit: &FittedModel, assignment: &[&CellEntry]) -> Result<()> {
    let coding = fit.coding();
    let factors: Vec<(&str, &str)> = assignment
        .iter()
        .filter_map(|e| match &e.value {
            CellValue::Level(l) if coding.is_factor(&e.variable) => {
                Some((e.variable.as_str(), l.as_str()))
            }
            _ => None,
        })
        .collect();
    for (i, &(a, la)) in factors.iter().enumerate() {
        for &(b, lb) in &factors[i + 1..] {
            if coding.formula.interacts(a, b) && !coding.combination_observed(&[(a, la), (b, lb)]) {
                return Err(fit.unsupported_cell(format!(
                    "{}={} with {}={} was never observed and the model includes {}:{}",
                    a, la, b, lb, a, b
                )));
            }
        }
    }
    Ok(())
}

fn lookup(coding: &DesignCoding, assignment: &[&CellEntry], var: &str) -> Result<Variable> {
    if let Some(entry) = assignment.iter().find(|e| e.variable == var) {
        return Ok(match &entry.value {
            CellValue::Level(l) => Variable::Categorical(l.clone()),
            CellValue::Value(x) => Variable::Continuous(*x),
        });
    }
    coding
        .covariate_means
        .get(var)
        .map(|&m| Variable::Continuous(m))
        .ok_or_else(|| GlmmError::InvalidParameter(format!("No grid value for '{}'", var)))
}

/// All combinations of the given dimensions, first dimension varying slowest.
fn cartesian(dims: &[(String, Vec<CellValue>)]) -> Vec<Vec<CellEntry>> {
    let mut combos: Vec<Vec<CellEntry>> = vec![Vec::new()];
    for (var, values) in dims {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(CellEntry {
                        variable: var.clone(),
                        value: v.clone(),
                    });
                    next
                })
            })
            .collect();
    }
    combos
}
