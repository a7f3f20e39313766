//! Parameter binding and row decoding between sqlx and backend types.

use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo};

use steadydb_backend::{BackendError, Row, Value};

/// Bind every [`Value`] parameter onto a sqlx query, in order.
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}

/// Decode a PostgreSQL row into backend [`Value`]s by declared type name.
///
/// Types outside the supported set fall back to text decoding; a column the
/// driver cannot decode at all surfaces as [`BackendError::Decode`].
pub(crate) fn pg_row_to_row(row: &PgRow) -> Result<Row, BackendError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = decode_column(row, idx, column.type_info().name()).map_err(|e| {
            BackendError::Decode {
                column: name.clone(),
                message: e.to_string(),
            }
        })?;
        columns.push(name);
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map_or(Value::Null, Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)?
            .map_or(Value::Null, |v| Value::Int(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)?
            .map_or(Value::Null, |v| Value::Int(i64::from(v))),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)?
            .map_or(Value::Null, Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map_or(Value::Null, |v| Value::Float(f64::from(v))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)?
            .map_or(Value::Null, Value::Float),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map_or(Value::Null, Value::Bytes),
        // TEXT, VARCHAR, BPCHAR, NAME, and anything else that can decode
        // as text.
        _ => row
            .try_get::<Option<String>, _>(idx)?
            .map_or(Value::Null, Value::Text),
    };
    Ok(value)
}
