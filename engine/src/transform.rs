//! Recipe-driven record transformation.
//!
//! Each sobject has one transformer, rebuilt at schema-reconcile time and
//! persisted as an ordered list of [`RecipeEntry`]. Applying the recipe to a
//! remote record yields a [`TransformedRow`] of typed cells ready for
//! insert/update binding and for change detection against stored rows.

use crate::error::{Error, Result};
use crate::mapper::ColumnMap;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Conversion applied to one remote field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Id,
    Int,
    Bool,
    Date,
    Timestamp,
    Time,
    Decimal,
    String,
}

impl TransformKind {
    /// Recipe kind for a mapped remote field type, `None` for types that
    /// yield no column.
    pub fn for_field_type(field_type: &str) -> Option<TransformKind> {
        match field_type {
            "id" | "reference" => Some(TransformKind::Id),
            "int" => Some(TransformKind::Int),
            "boolean" => Some(TransformKind::Bool),
            "date" => Some(TransformKind::Date),
            "datetime" => Some(TransformKind::Timestamp),
            "time" => Some(TransformKind::Time),
            "double" | "currency" | "percent" => Some(TransformKind::Decimal),
            "picklist" | "multipicklist" | "string" | "textarea" | "email" | "phone" | "url"
            | "encryptedstring" | "combobox" => Some(TransformKind::String),
            _ => None,
        }
    }
}

/// One persisted transformer step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeEntry {
    /// Remote field name, original casing
    pub sobject_field: String,
    /// Local column name
    pub db_field: String,
    pub kind: TransformKind,
    /// Truncation length; 0 means unbounded
    pub fieldlen: u32,
}

impl RecipeEntry {
    /// Derive the recipe step for a column mapping.
    pub fn from_column(col: &ColumnMap) -> Option<RecipeEntry> {
        TransformKind::for_field_type(&col.field_type).map(|kind| RecipeEntry {
            sobject_field: col.sobject_field.clone(),
            db_field: col.db_field.clone(),
            kind,
            fieldlen: col.fieldlen,
        })
    }
}

/// A typed, nullable cell value.
///
/// Nulls keep their kind so change detection can decode stored rows with the
/// same shape the transformer produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(Option<bool>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    Time(Option<NaiveTime>),
    Numeric(Option<Decimal>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Text(v) => v.is_none(),
            CellValue::Int(v) => v.is_none(),
            CellValue::Bool(v) => v.is_none(),
            CellValue::Date(v) => v.is_none(),
            CellValue::Timestamp(v) => v.is_none(),
            CellValue::Time(v) => v.is_none(),
            CellValue::Numeric(v) => v.is_none(),
        }
    }

    /// Typed null of the given kind.
    pub fn null_of(kind: TransformKind) -> CellValue {
        match kind {
            TransformKind::Id | TransformKind::String => CellValue::Text(None),
            TransformKind::Int => CellValue::Int(None),
            TransformKind::Bool => CellValue::Bool(None),
            TransformKind::Date => CellValue::Date(None),
            TransformKind::Timestamp => CellValue::Timestamp(None),
            TransformKind::Time => CellValue::Time(None),
            TransformKind::Decimal => CellValue::Numeric(None),
        }
    }
}

/// One transformed record: `(db_field, cell)` pairs in recipe order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    cells: Vec<(String, CellValue)>,
}

impl TransformedRow {
    pub fn new(cells: Vec<(String, CellValue)>) -> Self {
        Self { cells }
    }

    /// The canonical 15-char record id, if present.
    pub fn id(&self) -> Option<&str> {
        self.cells.iter().find(|(name, _)| name == "id").and_then(|(_, cell)| {
            match cell {
                CellValue::Text(Some(v)) => Some(v.as_str()),
                _ => None,
            }
        })
    }

    pub fn get(&self, db_field: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == db_field)
            .map(|(_, cell)| cell)
    }

    pub fn cells(&self) -> &[(String, CellValue)] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Applies a persisted recipe to remote records.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformer {
    entries: Vec<RecipeEntry>,
}

impl Transformer {
    pub fn new(entries: Vec<RecipeEntry>) -> Self {
        Self { entries }
    }

    /// Build the recipe for a column map list.
    pub fn from_columns(columns: &[ColumnMap]) -> Self {
        Self {
            entries: columns.iter().filter_map(RecipeEntry::from_column).collect(),
        }
    }

    pub fn entries(&self) -> &[RecipeEntry] {
        &self.entries
    }

    /// Transform one remote record into typed cells.
    ///
    /// Fields absent from the record become typed nulls; values that do not
    /// fit their declared kind are an error.
    pub fn parse(&self, rec: &Map<String, Value>) -> Result<TransformedRow> {
        let mut cells = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let value = rec.get(&entry.sobject_field);
            let cell = convert(entry, value)?;
            cells.push((entry.db_field.clone(), cell));
        }
        Ok(TransformedRow::new(cells))
    }
}

fn convert(entry: &RecipeEntry, value: Option<&Value>) -> Result<CellValue> {
    let value = match value {
        None | Some(Value::Null) => return Ok(CellValue::null_of(entry.kind)),
        Some(v) => v,
    };

    let invalid = |expected: &'static str| Error::InvalidValue {
        field: entry.sobject_field.clone(),
        expected,
        got: value.to_string(),
    };

    match entry.kind {
        TransformKind::Id => {
            let s = value.as_str().ok_or_else(|| invalid("id string"))?;
            Ok(CellValue::Text(Some(canonical_id(s).to_string())))
        }
        TransformKind::String => {
            let s = value.as_str().ok_or_else(|| invalid("string"))?;
            Ok(CellValue::Text(Some(scrub_string(s, entry.fieldlen))))
        }
        TransformKind::Int => {
            let n = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f as i64))
                .ok_or_else(|| invalid("integer"))?;
            Ok(CellValue::Int(Some(n)))
        }
        TransformKind::Bool => {
            let b = value.as_bool().ok_or_else(|| invalid("boolean"))?;
            Ok(CellValue::Bool(Some(b)))
        }
        TransformKind::Date => {
            let s = value.as_str().ok_or_else(|| invalid("date string"))?;
            let head = s.get(..10).unwrap_or(s);
            let d = NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| invalid("date string"))?;
            Ok(CellValue::Date(Some(d)))
        }
        TransformKind::Timestamp => {
            let s = value.as_str().ok_or_else(|| invalid("timestamp string"))?;
            let head = s.get(..19).unwrap_or(s);
            let t = NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
                .map_err(|_| invalid("timestamp string"))?;
            Ok(CellValue::Timestamp(Some(t)))
        }
        TransformKind::Time => {
            let s = value.as_str().ok_or_else(|| invalid("time string"))?;
            let head = s.get(..8).unwrap_or(s);
            let t =
                NaiveTime::parse_from_str(head, "%H:%M:%S").map_err(|_| invalid("time string"))?;
            Ok(CellValue::Time(Some(t)))
        }
        TransformKind::Decimal => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return Err(invalid("number")),
            };
            let d = parse_decimal(&text, entry.fieldlen).ok_or_else(|| invalid("number"))?;
            Ok(CellValue::Numeric(Some(d)))
        }
    }
}

/// The 15-char case-sensitive prefix is the functional key of an 18-char id.
pub fn canonical_id(id: &str) -> &str {
    id.get(..15).unwrap_or(id)
}

/// Truncate to `fieldlen` characters, strip NULs and literal `\t` sequences.
pub fn scrub_string(s: &str, fieldlen: u32) -> String {
    let mut out: String = if fieldlen > 0 {
        s.chars().take(fieldlen as usize).collect()
    } else {
        s.to_string()
    };
    if out.contains("\\t") || out.contains('\0') {
        out = out.replace("\\t", " ").replace('\0', "");
    }
    out
}

/// Parse a decimal, truncating the textual representation to `fieldlen`.
fn parse_decimal(text: &str, fieldlen: u32) -> Option<Decimal> {
    let d = Decimal::from_str(text).ok()?;
    let s = d.to_string();
    if fieldlen > 0 && s.len() > fieldlen as usize {
        let cut = s[..fieldlen as usize].trim_end_matches('.');
        return Decimal::from_str(cut).ok();
    }
    Some(d)
}

/// Bulk-API datetime values arrive as epoch milliseconds; callers convert
/// them back to the canonical ISO form before transformation.
pub fn epoch_millis_to_iso(millis: i64) -> Option<String> {
    let dt = DateTime::from_timestamp_millis(millis)?;
    Some(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(field: &str, kind: TransformKind, fieldlen: u32) -> RecipeEntry {
        RecipeEntry {
            sobject_field: field.into(),
            db_field: field.to_lowercase(),
            kind,
            fieldlen,
        }
    }

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn id_truncated_to_15_chars() {
        let t = Transformer::new(vec![entry("Id", TransformKind::Id, 15)]);
        let row = t
            .parse(&record(json!({"Id": "001A0000012abcDEFG"})))
            .unwrap();
        assert_eq!(row.id(), Some("001A0000012abcD"));
    }

    #[test]
    fn short_id_passes_through() {
        assert_eq!(canonical_id("001A0000012abcD"), "001A0000012abcD");
    }

    #[test]
    fn string_truncation_and_scrub() {
        let t = Transformer::new(vec![entry("Name", TransformKind::String, 5)]);
        let row = t.parse(&record(json!({"Name": "abcdefgh"}))).unwrap();
        assert_eq!(row.get("name"), Some(&CellValue::Text(Some("abcde".into()))));

        assert_eq!(scrub_string("a\\tb", 0), "a b");
        assert_eq!(scrub_string("a\0b", 0), "ab");
    }

    #[test]
    fn timestamp_drops_zone_suffix() {
        let t = Transformer::new(vec![entry("SystemModStamp", TransformKind::Timestamp, 0)]);
        let row = t
            .parse(&record(json!({"SystemModStamp": "2024-05-01T17:30:00.000+0000"})))
            .unwrap();
        let expected = NaiveDateTime::parse_from_str("2024-05-01T17:30:00", "%Y-%m-%dT%H:%M:%S")
            .unwrap();
        assert_eq!(
            row.get("systemmodstamp"),
            Some(&CellValue::Timestamp(Some(expected)))
        );
    }

    #[test]
    fn decimal_truncates_textual_representation() {
        let t = Transformer::new(vec![entry("Score__c", TransformKind::Decimal, 5)]);
        let row = t.parse(&record(json!({"Score__c": 123.456789}))).unwrap();
        assert_eq!(
            row.get("score__c"),
            Some(&CellValue::Numeric(Some(Decimal::from_str("123.4").unwrap())))
        );
    }

    #[test]
    fn missing_field_becomes_typed_null() {
        let t = Transformer::new(vec![
            entry("Name", TransformKind::String, 10),
            entry("Amount", TransformKind::Decimal, 0),
        ]);
        let row = t.parse(&record(json!({"Name": "x"}))).unwrap();
        assert_eq!(row.get("amount"), Some(&CellValue::Numeric(None)));
        assert!(row.get("amount").unwrap().is_null());
    }

    #[test]
    fn bool_and_int_and_date_and_time() {
        let t = Transformer::new(vec![
            entry("IsActive", TransformKind::Bool, 0),
            entry("Seats", TransformKind::Int, 0),
            entry("CloseDate", TransformKind::Date, 0),
            entry("OpenAt", TransformKind::Time, 0),
        ]);
        let row = t
            .parse(&record(json!({
                "IsActive": true,
                "Seats": 12,
                "CloseDate": "2024-02-29",
                "OpenAt": "08:30:00.000Z"
            })))
            .unwrap();
        assert_eq!(row.get("isactive"), Some(&CellValue::Bool(Some(true))));
        assert_eq!(row.get("seats"), Some(&CellValue::Int(Some(12))));
        assert_eq!(
            row.get("closedate"),
            Some(&CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29)))
        );
        assert_eq!(
            row.get("openat"),
            Some(&CellValue::Time(NaiveTime::from_hms_opt(8, 30, 0)))
        );
    }

    #[test]
    fn wrong_shape_is_an_error() {
        let t = Transformer::new(vec![entry("Seats", TransformKind::Int, 0)]);
        let err = t.parse(&record(json!({"Seats": "twelve"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn recipe_round_trips_through_json() {
        let entries = vec![
            entry("Id", TransformKind::Id, 15),
            entry("Name", TransformKind::String, 255),
            entry("Amount", TransformKind::Decimal, 18),
        ];
        let json = serde_json::to_string(&entries).unwrap();
        let parsed: Vec<RecipeEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(entries, parsed);
    }

    #[test]
    fn epoch_millis_round_to_iso() {
        assert_eq!(
            epoch_millis_to_iso(1_706_745_600_000).as_deref(),
            Some("2024-02-01T00:00:00")
        );
    }
}
