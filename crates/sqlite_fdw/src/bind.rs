use pgrepr::scalar::Scalar;
use pgrepr::types::{PgType, is_text_type};
use tracing::trace;

use crate::errors::{Result, SqliteFdwError};
use crate::host::ParamEvaluator;
use crate::sqlite::ParamTarget;

/// An evaluated runtime parameter ready for binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    /// One-based placeholder index.
    pub index: usize,
    pub ty: PgType,
    pub value: Scalar,
}

/// Binds a single value, dispatching on the declared host type.
///
/// NULL always binds as NULL. A declared type without a binding rule is an
/// error rather than a silently missing value.
pub fn bind_param<T>(target: &mut T, index: usize, ty: &PgType, value: &Scalar) -> Result<()>
where
    T: ParamTarget + ?Sized,
{
    trace!(index, %ty, ?value, "binding parameter");

    if value.is_null() {
        return target.bind_null(index);
    }

    let mismatch = || SqliteFdwError::ParamTypeMismatch {
        index,
        ty: ty.clone(),
        got: value.variant_name(),
    };

    match *ty {
        PgType::BOOL => match value {
            Scalar::Bool(v) => target.bind_int(index, *v as i32),
            _ => Err(mismatch()),
        },
        PgType::INT2 => match value {
            Scalar::Int2(v) => target.bind_int(index, *v as i32),
            _ => Err(mismatch()),
        },
        PgType::INT4 => match value {
            Scalar::Int4(v) => target.bind_int(index, *v),
            _ => Err(mismatch()),
        },
        PgType::INT8 => match value {
            Scalar::Int8(v) => target.bind_int64(index, *v),
            _ => Err(mismatch()),
        },
        PgType::FLOAT4 => match value {
            Scalar::Float4(v) => target.bind_double(index, *v as f64),
            _ => Err(mismatch()),
        },
        PgType::FLOAT8 => match value {
            Scalar::Float8(v) => target.bind_double(index, *v),
            _ => Err(mismatch()),
        },
        PgType::BYTEA => match value {
            Scalar::Bytea(v) => target.bind_blob(index, v),
            _ => Err(mismatch()),
        },
        PgType::NUMERIC => match value {
            // Text keeps every digit. Columns with numeric affinity convert
            // it on comparison.
            Scalar::Decimal(v) => target.bind_text(index, &v.to_string()),
            _ => Err(mismatch()),
        },
        PgType::DATE | PgType::TIME | PgType::TIMESTAMP | PgType::TIMESTAMPTZ => {
            if !value.is_of_type(ty) {
                return Err(mismatch());
            }
            // sqlite has no temporal storage class, ISO-8601 text sorts and
            // compares correctly with its date functions.
            let mut buf = String::new();
            value.encode_text(&mut buf)?;
            target.bind_text(index, &buf)
        }
        ref ty if is_text_type(ty) => match value {
            Scalar::Text(v) => target.bind_text(index, v),
            _ => Err(mismatch()),
        },
        _ => Err(SqliteFdwError::UnsupportedParamType(ty.clone())),
    }
}

/// Evaluates every runtime parameter, in placeholder order.
pub fn evaluate_params<E>(evaluator: &mut E) -> Result<Vec<ParamValue>>
where
    E: ParamEvaluator + ?Sized,
{
    evaluator
        .param_types()
        .into_iter()
        .enumerate()
        .map(|(idx, ty)| {
            let value = evaluator.evaluate(idx)?;
            Ok(ParamValue {
                index: idx + 1,
                ty,
                value,
            })
        })
        .collect()
}

pub fn bind_params<T>(target: &mut T, params: &[ParamValue]) -> Result<()>
where
    T: ParamTarget + ?Sized,
{
    for param in params {
        bind_param(target, param.index, &param.ty, &param.value)?;
    }
    Ok(())
}
