use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::reader::{Reader, TextReader};
use crate::types::{has_native_repr, is_text_type, PgType};
use crate::writer::{TextWriter, Writer};

/// Representation of a Postgres value.
///
/// A scalar corresponds to a postgres type, but does not carry that type with
/// it. Callers pair scalars with the declared column or parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Decimal(Decimal),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    /// A value of a type without its own variant, in that type's text input
    /// syntax. The host's input function parses it.
    Other(String),
}

impl Scalar {
    /// Returns true if the underlying value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, &Self::Null)
    }

    /// Name of the variant, for error messages.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int2(_) => "int2",
            Self::Int4(_) => "int4",
            Self::Int8(_) => "int8",
            Self::Float4(_) => "float4",
            Self::Float8(_) => "float8",
            Self::Decimal(_) => "numeric",
            Self::Text(_) => "text",
            Self::Bytea(_) => "bytea",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamptz",
            Self::Other(_) => "other",
        }
    }

    /// Returns true if this scalar is a valid (non-null) value of the given
    /// type.
    pub fn is_of_type(&self, ty: &PgType) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(_) => *ty == PgType::BOOL,
            Self::Int2(_) => *ty == PgType::INT2,
            Self::Int4(_) => *ty == PgType::INT4,
            Self::Int8(_) => *ty == PgType::INT8,
            Self::Float4(_) => *ty == PgType::FLOAT4,
            Self::Float8(_) => *ty == PgType::FLOAT8,
            Self::Decimal(_) => *ty == PgType::NUMERIC,
            Self::Text(_) => is_text_type(ty),
            Self::Bytea(_) => *ty == PgType::BYTEA,
            Self::Date(_) => *ty == PgType::DATE,
            Self::Time(_) => *ty == PgType::TIME,
            Self::Timestamp(_) => *ty == PgType::TIMESTAMP,
            Self::TimestampTz(_) => *ty == PgType::TIMESTAMPTZ,
            Self::Other(_) => !has_native_repr(ty),
        }
    }

    /// Encodes the scalar using its textual representation. Null encodes as
    /// the empty string.
    pub fn encode_text(&self, buf: &mut String) -> Result<()> {
        self.encode::<TextWriter>(buf)
    }

    fn encode<W: Writer>(&self, buf: &mut String) -> Result<()> {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => W::write_bool(buf, *v),
            Self::Int2(v) => W::write_int2(buf, *v),
            Self::Int4(v) => W::write_int4(buf, *v),
            Self::Int8(v) => W::write_int8(buf, *v),
            Self::Float4(v) => W::write_float4(buf, *v),
            Self::Float8(v) => W::write_float8(buf, *v),
            Self::Decimal(v) => W::write_decimal(buf, v),
            Self::Text(v) => W::write_text(buf, v),
            Self::Bytea(v) => W::write_bytea(buf, v),
            Self::Date(v) => W::write_date(buf, v),
            Self::Time(v) => W::write_time(buf, v),
            Self::Timestamp(v) => W::write_timestamp(buf, v),
            Self::TimestampTz(v) => W::write_timestamptz(buf, v),
            Self::Other(v) => W::write_text(buf, v),
        }
    }

    /// Decodes the textual representation of a value of the given type. This
    /// is the equivalent of the type's input function. Types without their
    /// own variant are kept as unparsed text.
    pub fn decode_text(buf: &str, as_type: &PgType) -> Result<Self> {
        Self::decode::<TextReader>(buf, as_type)
    }

    fn decode<R: Reader>(buf: &str, as_type: &PgType) -> Result<Self> {
        let scalar = match *as_type {
            PgType::BOOL => Self::Bool(R::read_bool(buf)?),
            PgType::INT2 => Self::Int2(R::read_int2(buf)?),
            PgType::INT4 => Self::Int4(R::read_int4(buf)?),
            PgType::INT8 => Self::Int8(R::read_int8(buf)?),
            PgType::FLOAT4 => Self::Float4(R::read_float4(buf)?),
            PgType::FLOAT8 => Self::Float8(R::read_float8(buf)?),
            PgType::NUMERIC => Self::Decimal(R::read_decimal(buf)?),
            PgType::BYTEA => Self::Bytea(R::read_bytea(buf)?),
            PgType::DATE => Self::Date(R::read_date(buf)?),
            PgType::TIME => Self::Time(R::read_time(buf)?),
            PgType::TIMESTAMP => Self::Timestamp(R::read_timestamp(buf)?),
            PgType::TIMESTAMPTZ => Self::TimestampTz(R::read_timestamptz(buf)?),
            ref ty if is_text_type(ty) => Self::Text(R::read_text(buf)?),
            _ => Self::Other(R::read_text(buf)?),
        };
        Ok(scalar)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "NULL");
        }
        let mut buf = String::new();
        self.encode_text(&mut buf).map_err(|_| fmt::Error)?;
        write!(f, "{buf}")
    }
}
