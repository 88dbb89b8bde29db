use crate::types::PgType;

#[derive(Debug, thiserror::Error)]
pub enum PgReprError {
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),

    #[error("Failed to parse '{input}' as {ty}")]
    ParseError { input: String, ty: PgType },
}

pub type Result<T, E = PgReprError> = std::result::Result<T, E>;
