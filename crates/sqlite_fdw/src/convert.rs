use chrono::{DateTime, NaiveDateTime, NaiveTime};
use pgrepr::error::PgReprError;
use pgrepr::scalar::Scalar;
use pgrepr::types::{PgType, has_native_repr, is_text_type};
use rusqlite::types::Value;
use rust_decimal::Decimal;

use crate::errors::{Result, SqliteFdwError, internal};
use crate::host::{AttrNumber, ColumnDesc, TableDesc};
use crate::options::ConversionPolicy;
use crate::sqlite::ResultRow;

/// Builds host rows out of sqlite result rows.
///
/// Result column `i` holds the attribute `retrieved_attrs[i]`. Every other
/// column of the host row is NULL. When the rowid is fetched it is the one
/// extra result column after the retrieved attributes.
#[derive(Debug, Clone)]
pub struct RowMaterializer {
    columns: Vec<ColumnDesc>,
    /// Index into `columns` for each result column.
    retrieved: Vec<usize>,
    policy: ConversionPolicy,
    fetch_rowid: bool,
}

impl RowMaterializer {
    pub fn new(
        table: &TableDesc,
        retrieved_attrs: &[AttrNumber],
        policy: ConversionPolicy,
    ) -> Result<Self> {
        let retrieved = retrieved_attrs
            .iter()
            .map(|attnum| {
                table
                    .columns
                    .iter()
                    .position(|c| c.attnum == *attnum)
                    .ok_or(SqliteFdwError::UnknownAttribute(*attnum))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RowMaterializer {
            columns: table.columns.clone(),
            retrieved,
            policy,
            fetch_rowid: false,
        })
    }

    /// Expects the rowid as the last result column.
    pub fn with_rowid(mut self, fetch_rowid: bool) -> Self {
        self.fetch_rowid = fetch_rowid;
        self
    }

    fn expected_columns(&self) -> usize {
        self.retrieved.len() + usize::from(self.fetch_rowid)
    }

    pub fn materialize<R>(&self, row: &R) -> Result<Vec<Scalar>>
    where
        R: ResultRow + ?Sized,
    {
        if row.num_columns() != self.expected_columns() {
            return Err(SqliteFdwError::ColumnCountMismatch {
                expected: self.expected_columns(),
                actual: row.num_columns(),
            });
        }

        let mut out = vec![Scalar::Null; self.columns.len()];
        for (result_idx, &col_idx) in self.retrieved.iter().enumerate() {
            let col = &self.columns[col_idx];
            let value = row.value(result_idx);

            let scalar = match convert_value(&value, &col.ty)? {
                Some(scalar) => scalar,
                None => match self.policy {
                    ConversionPolicy::NullIfNullable if !col.not_null => Scalar::Null,
                    _ => {
                        return Err(SqliteFdwError::InvalidConversion {
                            value: describe(&value),
                            ty: col.ty.clone(),
                            column: col.name.clone(),
                        });
                    }
                },
            };

            if scalar.is_null() && col.not_null {
                return Err(SqliteFdwError::NotNullViolation(col.name.clone()));
            }
            out[col_idx] = scalar;
        }

        Ok(out)
    }

    /// The rowid of the current row, if the query fetches it.
    pub fn rowid<R>(&self, row: &R) -> Result<Option<i64>>
    where
        R: ResultRow + ?Sized,
    {
        if !self.fetch_rowid {
            return Ok(None);
        }
        match row.value(self.retrieved.len()) {
            Value::Integer(rowid) => Ok(Some(rowid)),
            other => Err(internal!("sqlite returned {} as rowid", describe(&other))),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => format!("'{t}'"),
        Value::Blob(b) => format!("<blob of {} bytes>", b.len()),
    }
}

/// Converts a sqlite value to the given host type.
///
/// `Ok(None)` means the value has no representation in that type. Types
/// without their own `Scalar` variant get the value's text, for the host's
/// input function to parse.
pub fn convert_value(value: &Value, ty: &PgType) -> Result<Option<Scalar>> {
    if let Value::Null = value {
        return Ok(Some(Scalar::Null));
    }

    if is_text_type(ty) {
        return Ok(value_text(value)?.map(Scalar::Text));
    }
    if !has_native_repr(ty) {
        return Ok(value_text(value)?.map(Scalar::Other));
    }

    let scalar = match (ty, value) {
        (&PgType::BOOL, Value::Integer(i)) => Some(Scalar::Bool(*i != 0)),
        (&PgType::BOOL, Value::Real(r)) => Some(Scalar::Bool(*r != 0.0)),

        (&PgType::INT2, Value::Integer(i)) => i16::try_from(*i).ok().map(Scalar::Int2),
        (&PgType::INT4, Value::Integer(i)) => i32::try_from(*i).ok().map(Scalar::Int4),
        (&PgType::INT8, Value::Integer(i)) => Some(Scalar::Int8(*i)),
        (&(PgType::INT2 | PgType::INT4 | PgType::INT8), Value::Real(r)) => match real_to_int(*r) {
            Some(i) => return convert_value(&Value::Integer(i), ty),
            None => None,
        },

        (&PgType::FLOAT4, Value::Integer(i)) => Some(Scalar::Float4(*i as f32)),
        (&PgType::FLOAT4, Value::Real(r)) => Some(Scalar::Float4(*r as f32)),
        (&PgType::FLOAT8, Value::Integer(i)) => Some(Scalar::Float8(*i as f64)),
        (&PgType::FLOAT8, Value::Real(r)) => Some(Scalar::Float8(*r)),

        (&PgType::NUMERIC, Value::Integer(i)) => Some(Scalar::Decimal(Decimal::from(*i))),
        // The shortest text that reads back as the same double, so 9.99
        // stays 9.99 rather than its binary expansion.
        (&PgType::NUMERIC, Value::Real(r)) if r.is_finite() => {
            r.to_string().parse::<Decimal>().ok().map(Scalar::Decimal)
        }

        (&PgType::BYTEA, Value::Blob(b)) => Some(Scalar::Bytea(b.clone())),
        // sqlite hands out the text form of numbers when asked for a blob.
        (&PgType::BYTEA, Value::Integer(i)) => Some(Scalar::Bytea(i.to_string().into_bytes())),
        (&PgType::BYTEA, Value::Real(r)) => Some(Scalar::Bytea(r.to_string().into_bytes())),

        // Integers in temporal columns are unix seconds.
        (&PgType::TIMESTAMP, Value::Integer(i)) => {
            DateTime::from_timestamp(*i, 0).map(|dt| Scalar::Timestamp(dt.naive_utc()))
        }
        (&PgType::TIMESTAMP, Value::Real(r)) => unix_real(*r).map(Scalar::Timestamp),
        (&PgType::TIMESTAMPTZ, Value::Integer(i)) => {
            DateTime::from_timestamp(*i, 0).map(Scalar::TimestampTz)
        }
        (&PgType::TIMESTAMPTZ, Value::Real(r)) => {
            unix_real(*r).map(|ts| Scalar::TimestampTz(ts.and_utc()))
        }
        (&PgType::DATE, Value::Integer(i)) => {
            DateTime::from_timestamp(*i, 0).map(|dt| Scalar::Date(dt.date_naive()))
        }
        (&PgType::TIME, Value::Integer(i)) => u32::try_from(*i)
            .ok()
            .and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, 0))
            .map(Scalar::Time),

        (_, Value::Text(t)) => decode(t, ty)?,
        (_, Value::Blob(b)) => match std::str::from_utf8(b) {
            Ok(t) => decode(t, ty)?,
            Err(_) => None,
        },

        _ => None,
    };

    Ok(scalar)
}

/// Text form of a non-null value. `None` for blobs that are not utf8.
fn value_text(value: &Value) -> Result<Option<String>> {
    let text = match value {
        Value::Null => return Ok(None),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => {
            let mut buf = String::new();
            Scalar::Float8(*r).encode_text(&mut buf)?;
            buf
        }
        Value::Text(t) => t.clone(),
        Value::Blob(b) => match String::from_utf8(b.clone()) {
            Ok(s) => s,
            Err(_) => return Ok(None),
        },
    };
    Ok(Some(text))
}

/// Integral reals within the range of an i64.
fn real_to_int(r: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if r.is_finite() && r.trunc() == r && r >= i64::MIN as f64 && r < i64::MAX as f64 {
        Some(r as i64)
    } else {
        None
    }
}

fn unix_real(r: f64) -> Option<NaiveDateTime> {
    if !r.is_finite() {
        return None;
    }
    let secs = r.floor();
    let nanos = ((r - secs) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999)).map(|dt| dt.naive_utc())
}

fn decode(text: &str, ty: &PgType) -> Result<Option<Scalar>> {
    match Scalar::decode_text(text, ty) {
        Ok(scalar) => Ok(Some(scalar)),
        Err(PgReprError::ParseError { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::errors::ErrorKind;

    fn table() -> TableDesc {
        let col = |name: &str, attnum, ty, not_null| ColumnDesc {
            name: name.to_string(),
            attnum,
            ty,
            not_null,
        };
        TableDesc {
            relid: 16384,
            name: "items".to_string(),
            columns: vec![
                col("id", 1, PgType::INT8, true),
                col("name", 2, PgType::TEXT, false),
                col("price", 3, PgType::FLOAT8, false),
                col("qty", 4, PgType::INT2, false),
            ],
        }
    }

    #[test]
    fn unretrieved_columns_are_null() {
        let m = RowMaterializer::new(&table(), &[3, 1], ConversionPolicy::Error).unwrap();
        let row = [Value::Real(9.5), Value::Integer(7)];
        let out = m.materialize(&row[..]).unwrap();
        assert_eq!(
            out,
            vec![
                Scalar::Int8(7),
                Scalar::Null,
                Scalar::Float8(9.5),
                Scalar::Null
            ]
        );
    }

    #[test]
    fn column_count_must_match() {
        let m = RowMaterializer::new(&table(), &[1, 2], ConversionPolicy::Error).unwrap();
        let err = m.materialize(&[Value::Integer(1)][..]).unwrap_err();
        assert!(matches!(
            err,
            SqliteFdwError::ColumnCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn unknown_attribute() {
        let err = RowMaterializer::new(&table(), &[9], ConversionPolicy::Error).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LookupCorruption);
    }

    #[test]
    fn conversion_policy() {
        let row = [Value::Integer(1), Value::Integer(100_000)];

        let strict = RowMaterializer::new(&table(), &[1, 4], ConversionPolicy::Error).unwrap();
        let err = strict.materialize(&row[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.to_string().contains("\"qty\""), "{err}");

        let lenient =
            RowMaterializer::new(&table(), &[1, 4], ConversionPolicy::NullIfNullable).unwrap();
        let out = lenient.materialize(&row[..]).unwrap();
        assert_eq!(out[3], Scalar::Null);

        // Not null columns never downgrade.
        let row = [Value::Text("abc".to_string()), Value::Integer(1)];
        let err = lenient.materialize(&row[..]).unwrap_err();
        assert!(matches!(err, SqliteFdwError::InvalidConversion { .. }));
    }

    #[test]
    fn null_in_not_null_column() {
        let m = RowMaterializer::new(&table(), &[1], ConversionPolicy::NullIfNullable).unwrap();
        let err = m.materialize(&[Value::Null][..]).unwrap_err();
        assert_eq!(err.to_string(), "null value in column \"id\" violates not-null constraint");
    }

    #[test]
    fn sqlite_dynamic_typing() {
        let conv = |v: Value, ty: PgType| convert_value(&v, &ty).unwrap();

        assert_eq!(conv(Value::Real(3.0), PgType::INT4), Some(Scalar::Int4(3)));
        assert_eq!(conv(Value::Real(3.5), PgType::INT4), None);
        assert_eq!(conv(Value::Text(" 42".to_string()), PgType::INT8), Some(Scalar::Int8(42)));
        assert_eq!(conv(Value::Text("".to_string()), PgType::INT8), None);
        assert_eq!(conv(Value::Text("NULL".to_string()), PgType::DATE), None);
        assert_eq!(conv(Value::Integer(12), PgType::TEXT), Some(Scalar::Text("12".to_string())));
        assert_eq!(conv(Value::Integer(0), PgType::BOOL), Some(Scalar::Bool(false)));
        assert_eq!(conv(Value::Text("true".to_string()), PgType::BOOL), Some(Scalar::Bool(true)));
        assert_eq!(conv(Value::Blob(vec![1, 2]), PgType::BYTEA), Some(Scalar::Bytea(vec![1, 2])));
        assert_eq!(
            conv(Value::Text("2023-07-01".to_string()), PgType::DATE),
            Some(Scalar::Date(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()))
        );
        assert_eq!(
            conv(Value::Text("2023-07-01T10:20:30".to_string()), PgType::TIMESTAMP),
            Some(Scalar::Timestamp(
                NaiveDate::from_ymd_opt(2023, 7, 1)
                    .unwrap()
                    .and_hms_opt(10, 20, 30)
                    .unwrap()
            ))
        );
        assert_eq!(
            conv(Value::Integer(86_400), PgType::TIMESTAMP),
            Some(Scalar::Timestamp(
                NaiveDate::from_ymd_opt(1970, 1, 2)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            ))
        );
        assert_eq!(
            conv(Value::Integer(3_661), PgType::TIME),
            Some(Scalar::Time(NaiveTime::from_hms_opt(1, 1, 1).unwrap()))
        );
    }

    #[test]
    fn null_spellings_follow_policy() {
        let row = [Value::Text("".to_string()), Value::Text("NULL".to_string())];
        let attrs = [4, 5];
        let mut table = table();
        table.columns.push(ColumnDesc {
            name: "stock".to_string(),
            attnum: 5,
            ty: PgType::INT4,
            not_null: false,
        });

        let strict = RowMaterializer::new(&table, &attrs, ConversionPolicy::Error).unwrap();
        let err = strict.materialize(&row[..]).unwrap_err();
        assert!(matches!(err, SqliteFdwError::InvalidConversion { .. }), "{err}");
        assert!(err.to_string().contains("''"), "{err}");

        let strict = RowMaterializer::new(&table, &[5], ConversionPolicy::Error).unwrap();
        let err = strict.materialize(&row[1..]).unwrap_err();
        assert!(err.to_string().contains("'NULL'"), "{err}");

        let lenient = RowMaterializer::new(&table, &attrs, ConversionPolicy::NullIfNullable).unwrap();
        let out = lenient.materialize(&row[..]).unwrap();
        assert_eq!(out[3], Scalar::Null);
        assert_eq!(out[4], Scalar::Null);
    }

    #[test]
    fn reals_outside_integer_range() {
        let conv = |v: f64, ty: PgType| convert_value(&Value::Real(v), &ty).unwrap();

        assert_eq!(conv(1e20, PgType::INT8), None);
        assert_eq!(conv(-1e20, PgType::INT8), None);
        assert_eq!(conv(2f64.powi(63), PgType::INT8), None);
        assert_eq!(conv(f64::NAN, PgType::INT8), None);
        assert_eq!(conv(f64::INFINITY, PgType::INT4), None);
        assert_eq!(conv(40_000.0, PgType::INT2), None);
        assert_eq!(conv(3e9, PgType::INT4), None);

        assert_eq!(conv(-(2f64.powi(63)), PgType::INT8), Some(Scalar::Int8(i64::MIN)));
        assert_eq!(conv(-32_768.0, PgType::INT2), Some(Scalar::Int2(i16::MIN)));
    }

    #[test]
    fn types_without_scalar_variant() {
        let conv = |v: Value, ty: PgType| convert_value(&v, &ty).unwrap();

        assert_eq!(
            conv(Value::Real(9.99), PgType::NUMERIC),
            Some(Scalar::Decimal(Decimal::new(999, 2)))
        );
        assert_eq!(
            conv(Value::Integer(-7), PgType::NUMERIC),
            Some(Scalar::Decimal(Decimal::from(-7)))
        );
        assert_eq!(
            conv(Value::Text("12.50".to_string()), PgType::NUMERIC),
            Some(Scalar::Decimal(Decimal::new(1250, 2)))
        );
        assert_eq!(conv(Value::Real(f64::NAN), PgType::NUMERIC), None);
        assert_eq!(conv(Value::Text("abc".to_string()), PgType::NUMERIC), None);

        let eight_utc = NaiveDate::from_ymd_opt(2023, 7, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(
            conv(Value::Text("2023-07-01 10:00:00+02".to_string()), PgType::TIMESTAMPTZ),
            Some(Scalar::TimestampTz(eight_utc))
        );
        assert_eq!(
            conv(Value::Integer(eight_utc.timestamp()), PgType::TIMESTAMPTZ),
            Some(Scalar::TimestampTz(eight_utc))
        );

        let uuid = "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11";
        assert_eq!(
            conv(Value::Text(uuid.to_string()), PgType::UUID),
            Some(Scalar::Other(uuid.to_string()))
        );
        assert_eq!(
            conv(Value::Integer(12), PgType::JSONB),
            Some(Scalar::Other("12".to_string()))
        );
        assert_eq!(conv(Value::Blob(vec![0xff, 0xfe]), PgType::JSON), None);
    }

    #[test]
    fn policy_applies_to_numeric_columns() {
        let table = TableDesc {
            relid: 16385,
            name: "prices".to_string(),
            columns: vec![ColumnDesc {
                name: "amount".to_string(),
                attnum: 1,
                ty: PgType::NUMERIC,
                not_null: false,
            }],
        };

        let lenient = RowMaterializer::new(&table, &[1], ConversionPolicy::NullIfNullable).unwrap();
        assert_eq!(
            lenient.materialize(&[Value::Real(9.99)][..]).unwrap(),
            vec![Scalar::Decimal(Decimal::new(999, 2))]
        );
        assert_eq!(
            lenient.materialize(&[Value::Text("n/a".to_string())][..]).unwrap(),
            vec![Scalar::Null]
        );

        let strict = RowMaterializer::new(&table, &[1], ConversionPolicy::Error).unwrap();
        let err = strict.materialize(&[Value::Text("n/a".to_string())][..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn trailing_rowid() {
        let m = RowMaterializer::new(&table(), &[2], ConversionPolicy::Error)
            .unwrap()
            .with_rowid(true);
        let row = [Value::Text("pen".to_string()), Value::Integer(42)];
        let out = m.materialize(&row[..]).unwrap();
        assert_eq!(out[1], Scalar::Text("pen".to_string()));
        assert_eq!(m.rowid(&row[..]).unwrap(), Some(42));

        let err = m.materialize(&row[..1]).unwrap_err();
        assert!(matches!(
            err,
            SqliteFdwError::ColumnCountMismatch {
                expected: 2,
                actual: 1
            }
        ));

        let bad = [Value::Text("pen".to_string()), Value::Null];
        assert_eq!(m.rowid(&bad[..]).unwrap_err().kind(), ErrorKind::Internal);

        let without = RowMaterializer::new(&table(), &[2], ConversionPolicy::Error).unwrap();
        assert_eq!(without.rowid(&row[..1]).unwrap(), None);
    }
}
