//! Dynamic, type-directed column decoding.
//!
//! This module lets callers unmarshal rows whose shape is only known at run
//! time. [`DynamicMapper`] is a reflective mapper that gives every column a
//! [`JsonCell`], and each cell decodes itself by the column's database type.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Family-specific decoders handle the actual value extraction

use crate::db::DriverFamily;
use crate::db::memory::MemoryRow;
use crate::error::MappingError;
use crate::unmarshal::{ReflectiveMapper, Scan};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use tracing::warn;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, family: DriverFamily) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if family == DriverFamily::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Before the integer check: "interval" contains "int"
    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
        || lower == "interval"
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower == "text" || lower == "name" || lower == "citext" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to JSON value.
///
/// If `decode_binary` is true, attempts to decode as UTF-8 text first.
/// Falls back to base64 encoding if not valid UTF-8 or if `decode_binary` is false.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    if decode_binary {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

/// Render an interval as an ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
pub fn format_interval(months: i32, days: i32, microseconds: i64) -> String {
    use std::fmt::Write as _;

    let mut out = String::from("P");
    if months / 12 != 0 {
        let _ = write!(out, "{}Y", months / 12);
    }
    if months % 12 != 0 {
        let _ = write!(out, "{}M", months % 12);
    }
    if days != 0 {
        let _ = write!(out, "{}D", days);
    }
    if microseconds != 0 {
        out.push('T');
        let hours = microseconds / 3_600_000_000;
        let minutes = (microseconds % 3_600_000_000) / 60_000_000;
        let micros = microseconds % 60_000_000;
        if hours != 0 {
            let _ = write!(out, "{}H", hours);
        }
        if minutes != 0 {
            let _ = write!(out, "{}M", minutes);
        }
        if micros != 0 {
            let sign = if micros < 0 { "-" } else { "" };
            let (secs, frac) = ((micros / 1_000_000).abs(), (micros % 1_000_000).abs());
            if frac == 0 {
                let _ = write!(out, "{sign}{secs}S");
            } else {
                let frac = format!("{frac:06}");
                let _ = write!(out, "{sign}{secs}.{}S", frac.trim_end_matches('0'));
            }
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Dynamic Cells and Rows
// =============================================================================

/// A scan destination that accepts any column and stores it as JSON.
///
/// Values the decoder does not understand become `null` with a warning
/// instead of failing the row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonCell {
    pub value: JsonValue,
    decode_binary: bool,
}

impl JsonCell {
    pub fn new(decode_binary: bool) -> Self {
        Self {
            value: JsonValue::Null,
            decode_binary,
        }
    }

    pub fn into_value(self) -> JsonValue {
        self.value
    }
}

impl Scan<PgRow> for JsonCell {
    fn scan(&mut self, row: &PgRow, index: usize) -> Result<(), sqlx::Error> {
        let type_name = row.try_column(index)?.type_info().name();
        let category = categorize_type(type_name, DriverFamily::Postgres);
        self.value = postgres::decode_column(row, index, type_name, category, self.decode_binary);
        Ok(())
    }
}

impl Scan<SqliteRow> for JsonCell {
    fn scan(&mut self, row: &SqliteRow, index: usize) -> Result<(), sqlx::Error> {
        let type_name = row.try_column(index)?.type_info().name();
        let category = categorize_type(type_name, DriverFamily::Sqlite);
        self.value = sqlite::decode_column(row, index, type_name, category, self.decode_binary);
        Ok(())
    }
}

impl Scan<MemoryRow> for JsonCell {
    fn scan(&mut self, row: &MemoryRow, index: usize) -> Result<(), sqlx::Error> {
        self.value = row
            .get(index)
            .cloned()
            .ok_or(sqlx::Error::ColumnIndexOutOfBounds {
                index,
                len: row.len(),
            })?;
        Ok(())
    }
}

/// A row of named JSON cells, shaped by whatever the query returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRow {
    columns: Vec<String>,
    cells: Vec<JsonCell>,
}

impl DynamicRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.cells.get(index))
            .map(|cell| &cell.value)
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.cells.iter().map(|cell| cell.value.clone()))
            .collect()
    }
}

impl Serialize for DynamicRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, cell) in self.columns.iter().zip(&self.cells) {
            map.serialize_entry(column, &cell.value)?;
        }
        map.end()
    }
}

crate::impl_record!(DynamicRow => PgRow);
crate::impl_record!(DynamicRow => SqliteRow);
crate::impl_record!(DynamicRow => MemoryRow);

/// Reflective mapper for [`DynamicRow`]: one [`JsonCell`] per column.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicMapper {
    pub decode_binary: bool,
}

impl DynamicMapper {
    pub fn new(decode_binary: bool) -> Self {
        Self { decode_binary }
    }
}

impl<R: ?Sized> ReflectiveMapper<DynamicRow, R> for DynamicMapper
where
    JsonCell: Scan<R>,
{
    fn map_columns<'t>(
        &self,
        target: &'t mut DynamicRow,
        columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<R>>, MappingError> {
        target.columns = columns.to_vec();
        target.cells = vec![JsonCell::new(self.decode_binary); columns.len()];
        Ok(target
            .cells
            .iter_mut()
            .map(|cell| cell as &mut dyn Scan<R>)
            .collect())
    }
}

// =============================================================================
// Family-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::ValueRef;
    use sqlx::postgres::PgValueFormat;
    use sqlx::postgres::types::{PgInterval, PgTimeTz};
    use sqlx::types::Uuid;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx, type_name),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                warn!(column = idx, error = %e, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        let decoded = match type_name.to_lowercase().as_str() {
            "timestamptz" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .map(|v| v.map(|v| v.to_rfc3339())),
            "timestamp" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(|v| v.to_string())),
            "date" => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .map(|v| v.map(|v| v.to_string())),
            "time" => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .map(|v| v.map(|v| v.to_string())),
            "timetz" => row
                .try_get::<Option<PgTimeTz<NaiveTime, FixedOffset>>, _>(idx)
                .map(|v| v.map(|v| format!("{}{}", v.time, v.offset))),
            "interval" => row
                .try_get::<Option<PgInterval>, _>(idx)
                .map(|v| v.map(|v| format_interval(v.months, v.days, v.microseconds))),
            _ => return decode_text(row, idx, type_name),
        };
        match decoded {
            Ok(v) => v.map(JsonValue::String).unwrap_or(JsonValue::Null),
            Err(e) => decode_raw_text(row, idx).unwrap_or_else(|| {
                warn!(column = idx, type_name, error = %e, "Failed to decode temporal value");
                JsonValue::Null
            }),
        }
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<Uuid>, _>(idx) {
            Ok(v) => v
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            Err(e) => {
                warn!(column = idx, error = %e, "Failed to decode UUID");
                JsonValue::Null
            }
        }
    }

    fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.map(JsonValue::String).unwrap_or(JsonValue::Null),
            Err(e) => decode_raw_text(row, idx).unwrap_or_else(|| {
                warn!(column = idx, type_name, error = %e, "Unsupported column type");
                JsonValue::Null
            }),
        }
    }

    /// Unprepared queries return every value in the server's text format;
    /// take that representation as-is. `None` for binary values.
    fn decode_raw_text(row: &PgRow, idx: usize) -> Option<JsonValue> {
        let raw = row.try_get_raw(idx).ok()?;
        if raw.is_null() {
            return Some(JsonValue::Null);
        }
        if !matches!(raw.format(), PgValueFormat::Text) {
            return None;
        }
        raw.as_str().ok().map(|s| JsonValue::String(s.to_string()))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx, decode_binary),
            _ => decode_text(row, idx, type_name, decode_binary),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<i64>, _>(idx) {
            Ok(Some(v)) => JsonValue::Number(v.into()),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_float(row, idx),
        }
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_binary_col(row: &SqliteRow, idx: usize, decode_binary: bool) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v, decode_binary))
            .unwrap_or(JsonValue::Null)
    }

    /// Declared types are only affinities in SQLite; fall back through the
    /// storage classes a value can actually have.
    fn decode_text(row: &SqliteRow, idx: usize, type_name: &str, decode_binary: bool) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            let Some(v) = v else {
                return JsonValue::Null;
            };
            if type_name.to_lowercase().contains("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
                    return json;
                }
            }
            return JsonValue::String(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return decode_binary_value(&v, decode_binary);
        }
        warn!(column = idx, type_name, "Unsupported column value");
        JsonValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("BIGINT", DriverFamily::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DriverFamily::Sqlite),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DriverFamily::Postgres),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("NUMERIC", DriverFamily::Postgres),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DriverFamily::Sqlite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DriverFamily::Postgres),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DriverFamily::Sqlite),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("INTERVAL", DriverFamily::Postgres),
            TypeCategory::Temporal
        );
    }

    #[test]
    fn test_categorize_type_other() {
        assert_eq!(
            categorize_type("jsonb", DriverFamily::Postgres),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BYTEA", DriverFamily::Postgres),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DriverFamily::Postgres),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DriverFamily::Sqlite),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_decode_binary_value_with_valid_utf8() {
        let bytes = b"hello world";
        let result = decode_binary_value(bytes, true);
        assert_eq!(result, JsonValue::String("hello world".to_string()));

        let result = decode_binary_value(bytes, false);
        assert_eq!(result, JsonValue::String("aGVsbG8gd29ybGQ=".to_string()));
    }

    #[test]
    fn test_decode_binary_value_with_invalid_utf8() {
        let bytes: &[u8] = &[0xFF, 0xFE, 0x00, 0x01];
        let result = decode_binary_value(bytes, true);
        assert_eq!(result, JsonValue::String("//4AAQ==".to_string()));
    }

    #[test]
    fn test_categorize_type_uuid() {
        assert_eq!(
            categorize_type("UUID", DriverFamily::Postgres),
            TypeCategory::Uuid
        );
        assert_eq!(
            categorize_type("TIMETZ", DriverFamily::Postgres),
            TypeCategory::Temporal
        );
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(14, 3, 3_723_500_000), "P1Y2M3DT1H2M3.5S");
        assert_eq!(format_interval(0, 1, 0), "P1D");
        assert_eq!(format_interval(0, 0, 90_000_000), "PT1M30S");
        assert_eq!(format_interval(0, 0, -500_000), "PT-0.5S");
        assert_eq!(format_interval(0, 0, 0), "PT0S");
    }

    #[test]
    fn test_float_value_not_finite() {
        assert_eq!(float_value(1.5), json!(1.5));
        assert_eq!(float_value(f64::NAN), json!("NaN"));
    }

    #[test]
    fn test_dynamic_mapper_shapes_row() {
        let mut row = DynamicRow::default();
        let columns = vec!["id".to_string(), "name".to_string()];
        let destinations =
            ReflectiveMapper::<DynamicRow, MemoryRow>::map_columns(&DynamicMapper::default(), &mut row, &columns)
                .unwrap();
        assert_eq!(destinations.len(), 2);
        drop(destinations);

        assert_eq!(row.columns(), columns.as_slice());
        assert_eq!(row.get("id"), Some(&JsonValue::Null));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_dynamic_row_serializes_in_column_order() {
        let row = DynamicRow {
            columns: vec!["b".to_string(), "a".to_string()],
            cells: vec![
                JsonCell {
                    value: json!(1),
                    decode_binary: false,
                },
                JsonCell {
                    value: json!("x"),
                    decode_binary: false,
                },
            ],
        };
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":"x"}"#);
        assert_eq!(row.to_json_map().len(), 2);
    }
}
