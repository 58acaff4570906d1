//! `tokio-postgres` adapter.
//!
//! [`Value`] binds through [`ToSql`] and adapts to the server-declared
//! parameter type, so an `Int` can land in `int2`, `int4`, `numeric` or
//! `text` columns. Rows decode column-by-column into [`Record`]s.

use crate::client::{ExecResult, GenericClient, PreparedStatement};
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::value::Value;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{CancelToken, NoTls, Row, Statement};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn is_text_type(ty: &Type) -> bool {
    *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
}

fn is_int_type(ty: &Type) -> bool {
    *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 || *ty == Type::OID
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Bool(b) => int_to_sql(i64::from(*b), ty, out),
            Value::Int(i) => int_to_sql(*i, ty, out),
            Value::Float(f) => float_to_sql(*f, ty, out),
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::Timestamp(ts) => {
                if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else if *ty == Type::DATE {
                    ts.date_naive().to_sql(ty, out)
                } else if is_text_type(ty) {
                    ts.to_rfc3339().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
            Value::Json(j) if is_text_type(ty) => j.to_string().to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
            Value::Uuid(u) if is_text_type(ty) => u.to_string().to_sql(ty, out),
            Value::Uuid(u) => u.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::OID {
        u32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (i as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (i as f64).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        encode_numeric(i, out);
        Ok(IsNull::No)
    } else if *ty == Type::BOOL {
        (i != 0).to_sql(ty, out)
    } else if is_text_type(ty) {
        i.to_string().to_sql(ty, out)
    } else {
        i.to_sql(ty, out)
    }
}

fn float_to_sql(f: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        (f as f32).to_sql(ty, out)
    } else if (is_int_type(ty) || *ty == Type::NUMERIC) && f.fract() == 0.0 {
        int_to_sql(f as i64, ty, out)
    } else if *ty == Type::NUMERIC {
        Err(format!("cannot bind fractional float {f} to numeric; cast the placeholder to float8").into())
    } else if is_text_type(ty) {
        f.to_string().to_sql(ty, out)
    } else {
        f.to_sql(ty, out)
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
    } else if *ty == Type::UUID {
        Uuid::parse_str(s)?.to_sql(ty, out)
    } else if is_int_type(ty) || *ty == Type::NUMERIC {
        int_to_sql(s.trim().parse()?, ty, out)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        float_to_sql(s.trim().parse()?, ty, out)
    } else {
        s.to_sql(ty, out)
    }
}

/// Binary `numeric` for an integer: base-10000 digit groups, no scale.
fn encode_numeric(i: i64, out: &mut BytesMut) {
    let mut n = i.unsigned_abs();
    let mut groups = Vec::new();
    while n > 0 {
        groups.push((n % 10_000) as i16);
        n /= 10_000;
    }
    groups.reverse();
    let weight = groups.len().saturating_sub(1) as i16;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight);
    out.put_u16(if i < 0 { NUMERIC_NEG } else { NUMERIC_POS });
    out.put_u16(0);
    for g in groups {
        out.put_i16(g);
    }
}

/// `numeric` decoded to its exact decimal text.
struct Numeric(String);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode_numeric(raw).map(Numeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, BoxError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric".into())
}

fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let ndigits = usize::from(read_u16(raw, 0)?);
    let weight = read_u16(raw, 2)? as i16 as i32;
    let sign = read_u16(raw, 4)?;
    let dscale = usize::from(read_u16(raw, 6)?);
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits)
        .map(|k| read_u16(raw, 8 + 2 * k))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |j: i32| -> u16 {
        usize::try_from(j)
            .ok()
            .and_then(|j| digits.get(j).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for j in 0..=weight {
            if j == 0 {
                text.push_str(&digit(j).to_string());
            } else {
                text.push_str(&format!("{:04}", digit(j)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::new();
        let mut j = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(j)));
            j += 1;
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }
    Ok(text)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    macro_rules! get {
        ($t:ty, $map:expr) => {
            row.try_get::<_, Option<$t>>(idx)?.map($map).unwrap_or(Value::Null)
        };
    }

    let value = if *ty == Type::BOOL {
        get!(bool, Value::Bool)
    } else if *ty == Type::INT2 {
        get!(i16, |v| Value::Int(v.into()))
    } else if *ty == Type::INT4 {
        get!(i32, |v| Value::Int(v.into()))
    } else if *ty == Type::INT8 {
        get!(i64, Value::Int)
    } else if *ty == Type::OID {
        get!(u32, |v| Value::Int(v.into()))
    } else if *ty == Type::FLOAT4 {
        get!(f32, |v| Value::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        get!(f64, Value::Float)
    } else if *ty == Type::NUMERIC {
        get!(Numeric, |v| Value::Text(v.0))
    } else if *ty == Type::BYTEA {
        get!(Vec<u8>, Value::Bytes)
    } else if *ty == Type::TIMESTAMPTZ {
        get!(DateTime<Utc>, Value::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        get!(NaiveDateTime, |v| Value::Timestamp(v.and_utc()))
    } else if *ty == Type::DATE {
        get!(NaiveDate, |v| Value::Text(v.to_string()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get!(serde_json::Value, Value::Json)
    } else if *ty == Type::UUID {
        get!(Uuid, Value::Uuid)
    } else {
        get!(String, Value::Text)
    };
    Ok(value)
}

/// Decode every column of `row`, keyed by column name.
pub fn decode_row(row: &Row) -> OrmResult<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_())
            .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
        record.set(column.name(), value);
    }
    Ok(record)
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn spawn_cancel(token: CancelToken) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        if let Err(error) = token.cancel_query(NoTls).await {
            tracing::warn!(target: "polyorm.postgres", %error, "cancel request failed");
        }
    });
}

macro_rules! impl_generic_client {
    ($ty:ty) => {
        impl GenericClient for $ty {
            async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Record>> {
                let rows = <$ty>::query(self, sql, &bind(params)).await?;
                rows.iter().map(decode_row).collect()
            }

            async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
                let affected = <$ty>::execute(self, sql, &bind(params)).await?;
                Ok(ExecResult::affected(affected))
            }

            fn supports_prepared_statements(&self) -> bool {
                true
            }

            async fn prepare_statement(&self, sql: &str) -> OrmResult<PreparedStatement> {
                let stmt = <$ty>::prepare(self, sql).await?;
                Ok(PreparedStatement::with_handle(sql, stmt))
            }

            async fn execute_prepared(
                &self,
                stmt: &PreparedStatement,
                params: &[Value],
            ) -> OrmResult<ExecResult> {
                let params = bind(params);
                let affected = match stmt.handle::<Statement>() {
                    Some(native) => <$ty>::execute(self, native, &params).await?,
                    None => <$ty>::execute(self, stmt.sql(), &params).await?,
                };
                Ok(ExecResult::affected(affected))
            }

            fn cancel(&self) {
                spawn_cancel(<$ty>::cancel_token(self));
            }
        }
    };
}

impl_generic_client!(tokio_postgres::Client);
impl_generic_client!(tokio_postgres::Transaction<'_>);

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(i: i64) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode_numeric(i, &mut out);
        out.to_vec()
    }

    #[test]
    fn numeric_round_trips_integers() {
        for i in [0, 7, 9_999, 10_000, 123_456_789, -42, i64::MAX, i64::MIN] {
            assert_eq!(decode_numeric(&encoded(i)).unwrap(), i.to_string());
        }
    }

    #[test]
    fn numeric_decodes_scale() {
        // 12.5 with dscale 2: weight 0, digits [12, 5000]
        let raw = [0, 2, 0, 0, 0, 0, 0, 2, 0, 12, 0x13, 0x88];
        assert_eq!(decode_numeric(&raw).unwrap(), "12.50");

        // 0.0005 with dscale 4: weight -1, digits [5]
        let raw = [0, 1, 0xFF, 0xFF, 0, 0, 0, 4, 0, 5];
        assert_eq!(decode_numeric(&raw).unwrap(), "0.0005");
    }

    #[test]
    fn numeric_special_values() {
        let raw = [0, 0, 0, 0, 0xC0, 0, 0, 0];
        assert_eq!(decode_numeric(&raw).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_err());
    }

    #[test]
    fn int_narrows_to_declared_type() {
        let mut out = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.as_ref(), 7i32.to_be_bytes());

        let mut out = BytesMut::new();
        assert!(Value::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());

        let mut out = BytesMut::new();
        Value::Int(7).to_sql(&Type::TEXT, &mut out).unwrap();
        assert_eq!(out.as_ref(), b"7");
    }

    #[test]
    fn text_parses_into_typed_targets() {
        let mut out = BytesMut::new();
        Value::from("42").to_sql(&Type::INT8, &mut out).unwrap();
        assert_eq!(out.as_ref(), 42i64.to_be_bytes());

        let mut out = BytesMut::new();
        assert!(Value::from("not json").to_sql(&Type::JSONB, &mut out).is_err());
    }

    #[test]
    fn null_binds_as_null() {
        let mut out = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::INT8, &mut out).unwrap(),
            IsNull::Yes
        ));
    }
}
