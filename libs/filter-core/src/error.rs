use thiserror::Error;

/// Errors raised while building or rendering a filter tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Operation '{0}' is not managed by the filter query generator")]
    UnknownOperator(String),

    #[error("operator '{op}' on field '{field}' needs {needed} operand(s)")]
    MissingOperand {
        field: String,
        op: &'static str,
        needed: usize,
    },

    #[error("invalid field name: '{0}'")]
    InvalidField(String),

    #[error("invalid group operator: '{0}'")]
    InvalidGlue(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("sub groups are not supported in flat where pairs")]
    SubGroupsNotSupported,
}

pub type FilterResult<T> = Result<T, FilterError>;
