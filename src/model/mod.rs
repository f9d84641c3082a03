//! Mixed-model fitting.

pub mod compare;
pub mod family;
pub mod glmm;
mod pirls;
pub mod spec;

pub use compare::{
    compare_models, rank_criteria, EvidenceStrength, ModelComparison, ModelCriteria, RankedModel,
    SelectionCriterion,
};
pub use family::{Family, FamilyName, Link};
pub use glmm::{fit_glmm, ConditionalModes, FittedModel, GlmmConfig, VarianceComponent};
pub use spec::ModelSpec;
