//! Error types for the morpho-glmm library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum GlmmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing column '{0}' in data table")]
    MissingColumn(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Outcome '{outcome}' is incompatible with the {family} family: {detail}")]
    DomainViolation {
        outcome: String,
        family: String,
        detail: String,
    },

    #[error("Fixed-effect design for '{outcome}' ({formula}) is rank deficient: rank {rank} < {n_coefficients} columns")]
    RankDeficiency {
        outcome: String,
        formula: String,
        rank: usize,
        n_coefficients: usize,
    },

    #[error("Model for '{outcome}' ({formula}) failed to converge: {detail}")]
    ConvergenceFailure {
        outcome: String,
        formula: String,
        detail: String,
    },

    #[error("Unsupported reference grid cell for '{outcome}' ({formula}): {detail}")]
    UnsupportedCell {
        outcome: String,
        formula: String,
        detail: String,
    },

    #[error("Pairwise contrasts for '{outcome}' ({formula}) need at least two cells, got {n_cells} ({context})")]
    InsufficientPairs {
        outcome: String,
        formula: String,
        n_cells: usize,
        context: String,
    },

    #[error("Singular covariance for '{outcome}' ({formula}): {detail}")]
    SingularCovariance {
        outcome: String,
        formula: String,
        detail: String,
    },

    #[error("Analysis '{name}' failed: {source}")]
    Analysis {
        name: String,
        #[source]
        source: Box<GlmmError>,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GlmmError {
    /// The innermost error, unwrapping any analysis context.
    pub fn root(&self) -> &GlmmError {
        match self {
            GlmmError::Analysis { source, .. } => source.root(),
            other => other,
        }
    }

    /// Attach the name of the analysis that produced this error.
    pub fn in_analysis(self, name: &str) -> Self {
        GlmmError::Analysis {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, GlmmError>;
