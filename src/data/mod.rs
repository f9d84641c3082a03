//! Data structures: observation tables, formulas and design encodings.

mod design_matrix;
mod formula;
mod random_effects;
mod spline;
mod table;

pub use design_matrix::{DesignCoding, DesignMatrix, PredictorCoding, TermCoding};
pub use formula::{Formula, Predictor, Term};
pub use random_effects::{GroupingFactor, MixedFormula, RandomDesign, RandomEffect};
pub use spline::NaturalSpline;
pub use table::{DataTable, Variable, VariableType};
