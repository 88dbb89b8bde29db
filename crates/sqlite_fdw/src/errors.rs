use std::path::PathBuf;

use pgrepr::types::PgType;

use crate::host::{AttrNumber, Oid};
use crate::shippable::CatalogKind;

/// Coarse classification of a failure, surfaced to the host alongside the
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOption,
    FileNotFound,
    ConnectionFailure,
    StatementPrepareFailure,
    BindFailure,
    ExecutionFailure,
    EstimateFailure,
    SchemaNotFound,
    LookupCorruption,
    TypeMismatch,
    UnsupportedParameterType,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum SqliteFdwError {
    #[error("invalid option \"{name}\" (valid options in this context are: {valid})")]
    InvalidOption { name: String, valid: String },

    #[error("redundant options: {name} ({value})")]
    RedundantOption { name: String, value: String },

    #[error("invalid value for option \"{name}\": {value}")]
    InvalidOptionValue { name: String, value: String },

    #[error("{0}")]
    MissingOption(&'static str),

    #[error("unknown extension \"{0}\"")]
    UnknownExtension(String),

    #[error("could not access file \"{0}\"")]
    FileNotFound(PathBuf),

    #[error("Can't open sqlite database {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    #[error("SQL error during prepare: {0}")]
    PrepareFailed(String),

    #[error("error while trying to bind param \"{0}\"")]
    BindFailed(String),

    #[error("SQL error during step: {0}")]
    StepFailed(String),

    #[error("Could not run sqlite_stmt_scanstatus: {0}")]
    EstimateFailed(String),

    #[error("Foreign schema \"{0}\" is invalid")]
    SchemaNotFound(String),

    #[error("cache lookup failed for {kind} {oid}")]
    LookupFailed { kind: CatalogKind, oid: Oid },

    #[error("no column with attribute number {0}")]
    UnknownAttribute(AttrNumber),

    #[error("cannot convert sqlite value {value} to {ty} for column \"{column}\"")]
    InvalidConversion {
        value: String,
        ty: PgType,
        column: String,
    },

    #[error("null value in column \"{0}\" violates not-null constraint")]
    NotNullViolation(String),

    #[error("expected {expected} result columns, sqlite returned {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("unsupported parameter type: {0}")]
    UnsupportedParamType(PgType),

    #[error("parameter ${index} declared as {ty} but got a {got} value")]
    ParamTypeMismatch {
        index: usize,
        ty: PgType,
        got: &'static str,
    },

    #[error(transparent)]
    PgRepr(#[from] pgrepr::error::PgReprError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl SqliteFdwError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOption { .. }
            | Self::RedundantOption { .. }
            | Self::InvalidOptionValue { .. }
            | Self::MissingOption(_)
            | Self::UnknownExtension(_) => ErrorKind::InvalidOption,
            Self::FileNotFound(_) | Self::Io(_) => ErrorKind::FileNotFound,
            Self::OpenFailed { .. } => ErrorKind::ConnectionFailure,
            Self::PrepareFailed(_) => ErrorKind::StatementPrepareFailure,
            Self::BindFailed(_) => ErrorKind::BindFailure,
            Self::StepFailed(_) => ErrorKind::ExecutionFailure,
            Self::EstimateFailed(_) => ErrorKind::EstimateFailure,
            Self::SchemaNotFound(_) => ErrorKind::SchemaNotFound,
            Self::LookupFailed { .. } | Self::UnknownAttribute(_) => ErrorKind::LookupCorruption,
            Self::InvalidConversion { .. }
            | Self::NotNullViolation(_)
            | Self::ColumnCountMismatch { .. }
            | Self::ParamTypeMismatch { .. }
            | Self::PgRepr(_) => ErrorKind::TypeMismatch,
            Self::UnsupportedParamType(_) => ErrorKind::UnsupportedParameterType,
            Self::Json(_) | Self::Fmt(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = SqliteFdwError> = std::result::Result<T, E>;

macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::SqliteFdwError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;
