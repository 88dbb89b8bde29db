pub use postgres_types::Type as PgType;

/// Returns true if values of this type are carried as `Scalar::Text`.
pub fn is_text_type(ty: &PgType) -> bool {
    matches!(
        *ty,
        PgType::TEXT | PgType::VARCHAR | PgType::BPCHAR | PgType::NAME
    )
}

/// Returns true if the type has its own `Scalar` variant. Values of every
/// other type are carried as `Scalar::Other` in the type's text syntax.
pub fn has_native_repr(ty: &PgType) -> bool {
    is_text_type(ty)
        || matches!(
            *ty,
            PgType::BOOL
                | PgType::INT2
                | PgType::INT4
                | PgType::INT8
                | PgType::FLOAT4
                | PgType::FLOAT8
                | PgType::NUMERIC
                | PgType::BYTEA
                | PgType::DATE
                | PgType::TIME
                | PgType::TIMESTAMP
                | PgType::TIMESTAMPTZ
        )
}
