//! Conversion of driver rows into JSON objects keyed by column name.

use crate::time::OutputDateFormat;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;
use tokio_postgres::Row;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-column decoding strategy, resolved once from the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Text,
    Json,
    Uuid,
    Bytea,
    Timestamp,
    Timestamptz,
    Date,
    Time,
    TextArray,
    Int4Array,
    Int8Array,
    Float8Array,
    BoolArray,
    Unsupported,
}

impl Codec {
    fn for_type(ty: &Type) -> Self {
        match *ty {
            Type::BOOL => Codec::Bool,
            Type::INT2 => Codec::Int2,
            Type::INT4 => Codec::Int4,
            Type::INT8 => Codec::Int8,
            Type::OID => Codec::Oid,
            Type::FLOAT4 => Codec::Float4,
            Type::FLOAT8 => Codec::Float8,
            Type::NUMERIC => Codec::Numeric,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => Codec::Text,
            Type::JSON | Type::JSONB => Codec::Json,
            Type::UUID => Codec::Uuid,
            Type::BYTEA => Codec::Bytea,
            Type::TIMESTAMP => Codec::Timestamp,
            Type::TIMESTAMPTZ => Codec::Timestamptz,
            Type::DATE => Codec::Date,
            Type::TIME => Codec::Time,
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
                Codec::TextArray
            }
            Type::INT4_ARRAY => Codec::Int4Array,
            Type::INT8_ARRAY => Codec::Int8Array,
            Type::FLOAT8_ARRAY => Codec::Float8Array,
            Type::BOOL_ARRAY => Codec::BoolArray,
            _ => Codec::Unsupported,
        }
    }
}

/// Turns rows of one result set into JSON objects, preserving column order.
#[derive(Debug)]
pub struct RowEncoder {
    dates: OutputDateFormat,
    columns: Option<Vec<(String, Codec)>>,
}

impl RowEncoder {
    pub fn new(dates: OutputDateFormat) -> Self {
        Self {
            dates,
            columns: None,
        }
    }

    pub fn encode(&mut self, row: &Row) -> Result<Map<String, Value>, tokio_postgres::Error> {
        let columns = self.columns.get_or_insert_with(|| {
            row.columns()
                .iter()
                .map(|column| {
                    let codec = Codec::for_type(column.type_());
                    if codec == Codec::Unsupported {
                        warn!(
                            column = column.name(),
                            pg_type = %column.type_(),
                            "unsupported column type; values will be null"
                        );
                    }
                    (column.name().to_string(), codec)
                })
                .collect()
        });

        let mut object = Map::with_capacity(columns.len());
        for (idx, (name, codec)) in columns.iter().enumerate() {
            let value = decode(row, idx, *codec, &self.dates)?;
            object.insert(name.clone(), value);
        }
        Ok(object)
    }
}

fn decode(
    row: &Row,
    idx: usize,
    codec: Codec,
    dates: &OutputDateFormat,
) -> Result<Value, tokio_postgres::Error> {
    let value = match codec {
        Codec::Bool => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Codec::Int2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Codec::Int4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Codec::Int8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Codec::Oid => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Codec::Float4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float(f64::from(v))),
        Codec::Float8 => row.try_get::<_, Option<f64>>(idx)?.map(float),
        Codec::Numeric => numeric(row, idx),
        Codec::Text => row.try_get::<_, Option<String>>(idx)?.map(Value::String),
        Codec::Json => row.try_get::<_, Option<Value>>(idx)?,
        Codec::Uuid => row
            .try_get::<_, Option<Uuid>>(idx)?
            .map(|v| Value::String(v.to_string())),
        Codec::Bytea => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|v| Value::String(STANDARD.encode(v))),
        Codec::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| Value::String(dates.timestamp(&v))),
        Codec::Timestamptz => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::String(dates.timestamptz(&v))),
        Codec::Date => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|v| Value::String(dates.date(&v))),
        Codec::Time => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|v| Value::String(dates.time(&v))),
        Codec::TextArray => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(|v| Value::Array(v.into_iter().map(|s| s.map_or(Value::Null, Value::String)).collect())),
        Codec::Int4Array => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)?
            .map(|v| Value::Array(v.into_iter().map(Value::from).collect())),
        Codec::Int8Array => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)?
            .map(|v| Value::Array(v.into_iter().map(Value::from).collect())),
        Codec::Float8Array => row
            .try_get::<_, Option<Vec<Option<f64>>>>(idx)?
            .map(|v| Value::Array(v.into_iter().map(|f| f.map_or(Value::Null, float)).collect())),
        Codec::BoolArray => row
            .try_get::<_, Option<Vec<Option<bool>>>>(idx)?
            .map(|v| Value::Array(v.into_iter().map(Value::from).collect())),
        Codec::Unsupported => None,
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Non-finite floats have no JSON representation.
fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// `numeric` as the nearest `f64`; NaN, infinities and values outside the
/// decimal range have no JSON number and become null.
fn numeric(row: &Row, idx: usize) -> Option<Value> {
    match row.try_get::<_, Option<Decimal>>(idx) {
        Ok(value) => value.map(|v| v.to_f64().map_or(Value::Null, float)),
        Err(err) => {
            debug!(
                column = row.columns()[idx].name(),
                error = %err,
                "numeric value not representable"
            );
            Some(Value::Null)
        }
    }
}
