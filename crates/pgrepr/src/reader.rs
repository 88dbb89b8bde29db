use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::error::{PgReprError, Result};
use crate::types::PgType;

/// Reader defines the interface for decoding the textual representation of a
/// postgres value.
pub(crate) trait Reader {
    fn read_bool(buf: &str) -> Result<bool>;

    fn read_int2(buf: &str) -> Result<i16>;
    fn read_int4(buf: &str) -> Result<i32>;
    fn read_int8(buf: &str) -> Result<i64>;

    fn read_float4(buf: &str) -> Result<f32>;
    fn read_float8(buf: &str) -> Result<f64>;

    fn read_decimal(buf: &str) -> Result<Decimal>;

    fn read_text(buf: &str) -> Result<String>;
    fn read_bytea(buf: &str) -> Result<Vec<u8>>;

    fn read_date(buf: &str) -> Result<NaiveDate>;
    fn read_time(buf: &str) -> Result<NaiveTime>;
    fn read_timestamp(buf: &str) -> Result<NaiveDateTime>;
    fn read_timestamptz(buf: &str) -> Result<DateTime<Utc>>;
}

#[derive(Debug)]
pub(crate) struct TextReader;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIMESTAMPTZ_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f %#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

fn parse_err(buf: &str, ty: PgType) -> PgReprError {
    PgReprError::ParseError {
        input: buf.to_string(),
        ty,
    }
}

fn parse_num<T: FromStr>(buf: &str, ty: PgType) -> Result<T> {
    buf.trim().parse::<T>().map_err(|_| parse_err(buf, ty))
}

fn parse_float<T: FromStr + num_traits::Float>(buf: &str, ty: PgType) -> Result<T> {
    let trimmed = buf.trim();
    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(T::nan());
    }
    if trimmed.eq_ignore_ascii_case("infinity") || trimmed.eq_ignore_ascii_case("inf") {
        return Ok(T::infinity());
    }
    if trimmed.eq_ignore_ascii_case("-infinity") || trimmed.eq_ignore_ascii_case("-inf") {
        return Ok(T::neg_infinity());
    }
    parse_num(trimmed, ty)
}

impl Reader for TextReader {
    fn read_bool(buf: &str) -> Result<bool> {
        match buf.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
            _ => Err(parse_err(buf, PgType::BOOL)),
        }
    }

    fn read_int2(buf: &str) -> Result<i16> {
        parse_num(buf, PgType::INT2)
    }

    fn read_int4(buf: &str) -> Result<i32> {
        parse_num(buf, PgType::INT4)
    }

    fn read_int8(buf: &str) -> Result<i64> {
        parse_num(buf, PgType::INT8)
    }

    fn read_float4(buf: &str) -> Result<f32> {
        parse_float(buf, PgType::FLOAT4)
    }

    fn read_float8(buf: &str) -> Result<f64> {
        parse_float(buf, PgType::FLOAT8)
    }

    fn read_decimal(buf: &str) -> Result<Decimal> {
        let trimmed = buf.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| parse_err(buf, PgType::NUMERIC))
    }

    fn read_text(buf: &str) -> Result<String> {
        Ok(buf.to_string())
    }

    fn read_bytea(buf: &str) -> Result<Vec<u8>> {
        // Hex format. Anything else is taken as the raw bytes of the string.
        let hex = match buf.strip_prefix("\\x") {
            Some(hex) => hex,
            None => return Ok(buf.as_bytes().to_vec()),
        };
        if hex.len() % 2 != 0 {
            return Err(parse_err(buf, PgType::BYTEA));
        }
        (0..hex.len())
            .step_by(2)
            .map(|idx| {
                hex.get(idx..idx + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| parse_err(buf, PgType::BYTEA))
            })
            .collect()
    }

    fn read_date(buf: &str) -> Result<NaiveDate> {
        let trimmed = buf.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(date);
        }
        // Allow a full timestamp, keeping only the date part.
        Self::read_timestamp(trimmed)
            .map(|ts| ts.date())
            .map_err(|_| parse_err(buf, PgType::DATE))
    }

    fn read_time(buf: &str) -> Result<NaiveTime> {
        let trimmed = buf.trim();
        TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
            .ok_or_else(|| parse_err(buf, PgType::TIME))
    }

    fn read_timestamp(buf: &str) -> Result<NaiveDateTime> {
        let trimmed = buf.trim();
        if let Some(ts) = TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        {
            return Ok(ts);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .ok_or_else(|| parse_err(buf, PgType::TIMESTAMP))
    }

    /// Values without an offset are taken as UTC, which is what sqlite's
    /// date and time functions produce.
    fn read_timestamptz(buf: &str) -> Result<DateTime<Utc>> {
        let trimmed = buf.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(ts.with_timezone(&Utc));
        }
        if let Some(ts) = TIMESTAMPTZ_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(trimmed, fmt).ok())
        {
            return Ok(ts.with_timezone(&Utc));
        }
        Self::read_timestamp(trimmed)
            .map(|ts| ts.and_utc())
            .map_err(|_| parse_err(buf, PgType::TIMESTAMPTZ))
    }
}
