use std::fmt::{Display, Write};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use num_traits::Float as FloatTrait;
use rust_decimal::Decimal;

use crate::error::Result;

macro_rules! put_fmt {
    ($dst:expr, $($arg:tt)*) => {
        write!($dst, $($arg)*).map_err(|e| e.into())
    };
}

/// Writer defines the interface for the different kinds of values that can be
/// encoded as a postgres type.
pub(crate) trait Writer {
    fn write_bool(buf: &mut String, v: bool) -> Result<()>;

    fn write_int2(buf: &mut String, v: i16) -> Result<()>;
    fn write_int4(buf: &mut String, v: i32) -> Result<()>;
    fn write_int8(buf: &mut String, v: i64) -> Result<()>;

    fn write_float4(buf: &mut String, v: f32) -> Result<()>;
    fn write_float8(buf: &mut String, v: f64) -> Result<()>;

    fn write_decimal(buf: &mut String, v: &Decimal) -> Result<()>;

    fn write_text(buf: &mut String, v: &str) -> Result<()>;
    fn write_bytea(buf: &mut String, v: &[u8]) -> Result<()>;

    fn write_date(buf: &mut String, v: &NaiveDate) -> Result<()>;
    fn write_time(buf: &mut String, v: &NaiveTime) -> Result<()>;
    fn write_timestamp(buf: &mut String, v: &NaiveDateTime) -> Result<()>;
    fn write_timestamptz(buf: &mut String, v: &DateTime<Utc>) -> Result<()>;
}

/// Writes values in the textual form SQLite's date and time functions
/// understand, which is also Postgres' ISO output style.
#[derive(Debug)]
pub(crate) struct TextWriter;

impl Writer for TextWriter {
    fn write_bool(buf: &mut String, v: bool) -> Result<()> {
        let v = if v { 't' } else { 'f' };
        put_fmt!(buf, "{v}")
    }

    fn write_int2(buf: &mut String, v: i16) -> Result<()> {
        put_fmt!(buf, "{v}")
    }

    fn write_int4(buf: &mut String, v: i32) -> Result<()> {
        put_fmt!(buf, "{v}")
    }

    fn write_int8(buf: &mut String, v: i64) -> Result<()> {
        put_fmt!(buf, "{v}")
    }

    fn write_float4(buf: &mut String, v: f32) -> Result<()> {
        put_float(buf, v)
    }

    fn write_float8(buf: &mut String, v: f64) -> Result<()> {
        put_float(buf, v)
    }

    fn write_decimal(buf: &mut String, v: &Decimal) -> Result<()> {
        put_fmt!(buf, "{v}")
    }

    fn write_text(buf: &mut String, v: &str) -> Result<()> {
        buf.push_str(v);
        Ok(())
    }

    fn write_bytea(buf: &mut String, v: &[u8]) -> Result<()> {
        buf.push_str("\\x");
        for b in v {
            write!(buf, "{b:02x}")?;
        }
        Ok(())
    }

    fn write_date(buf: &mut String, v: &NaiveDate) -> Result<()> {
        put_fmt!(buf, "{}", v.format("%Y-%m-%d"))
    }

    fn write_time(buf: &mut String, v: &NaiveTime) -> Result<()> {
        put_fmt!(buf, "{}", v.format("%H:%M:%S%.f"))
    }

    fn write_timestamp(buf: &mut String, v: &NaiveDateTime) -> Result<()> {
        put_fmt!(buf, "{}", v.format("%Y-%m-%d %H:%M:%S%.f"))
    }

    fn write_timestamptz(buf: &mut String, v: &DateTime<Utc>) -> Result<()> {
        put_fmt!(buf, "{}", v.format("%Y-%m-%d %H:%M:%S%.f+00"))
    }
}

fn put_float<F>(buf: &mut String, v: F) -> Result<()>
where
    F: Display + FloatTrait,
{
    if v.is_nan() {
        return put_fmt!(buf, "NaN");
    }

    if v.is_infinite() {
        if v.is_sign_negative() {
            return put_fmt!(buf, "-Infinity");
        } else {
            return put_fmt!(buf, "Infinity");
        }
    }

    if v.is_zero() && v.is_sign_negative() {
        return put_fmt!(buf, "-0");
    }

    // TODO: Postgres displays large exponents as "1e+10" and "1e-10". The
    // standard library prints all the decimals.
    put_fmt!(buf, "{v}")
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use crate::writer::{TextWriter, Writer};

    #[test]
    fn test_text_writer() {
        type Writer = TextWriter;

        let mut buf = String::new();
        let buf = &mut buf;

        buf.clear();
        Writer::write_bool(buf, true).unwrap();
        assert_eq!(buf, "t");

        buf.clear();
        Writer::write_int2(buf, -1234).unwrap();
        assert_eq!(buf, "-1234");

        buf.clear();
        Writer::write_int8(buf, 1234567890).unwrap();
        assert_eq!(buf, "1234567890");

        buf.clear();
        Writer::write_float4(buf, f32::NEG_INFINITY).unwrap();
        assert_eq!(buf, "-Infinity");

        buf.clear();
        Writer::write_float8(buf, -0.0).unwrap();
        assert_eq!(buf, "-0");

        buf.clear();
        Writer::write_float8(buf, 123.0456789).unwrap();
        assert_eq!(buf, "123.0456789");

        buf.clear();
        Writer::write_float8(buf, f64::NAN).unwrap();
        assert_eq!(buf, "NaN");

        buf.clear();
        Writer::write_bytea(buf, &[0xde, 0xad, 0x01]).unwrap();
        assert_eq!(buf, "\\xdead01");
    }

    #[test]
    fn test_datetime_writer() {
        let mut buf = String::new();

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        TextWriter::write_date(&mut buf, &date).unwrap();
        assert_eq!(buf, "2024-02-29");

        buf.clear();
        let ts = date.and_hms_micro_opt(13, 4, 5, 250_000).unwrap();
        TextWriter::write_timestamp(&mut buf, &ts).unwrap();
        assert_eq!(buf, "2024-02-29 13:04:05.250");

        buf.clear();
        let time = NaiveTime::from_hms_opt(23, 59, 1).unwrap();
        TextWriter::write_time(&mut buf, &time).unwrap();
        assert_eq!(buf, "23:59:01");

        buf.clear();
        TextWriter::write_timestamptz(&mut buf, &ts.and_utc()).unwrap();
        assert_eq!(buf, "2024-02-29 13:04:05.250+00");

        buf.clear();
        let dec = "-1.50".parse().unwrap();
        TextWriter::write_decimal(&mut buf, &dec).unwrap();
        assert_eq!(buf, "-1.50");
    }
}
