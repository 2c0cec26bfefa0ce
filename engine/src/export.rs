//! Tab-delimited export encoding.
//!
//! One line per record, fields ordered by the local table's column order,
//! in the load format the database's COPY path accepts back.

use crate::transform::{CellValue, TransformedRow};

/// Escape backslash and control characters for a tab-delimited stream.
pub fn escape(val: &str) -> String {
    if val.contains('\\') || val.contains('\n') || val.contains('\r') || val.contains('\t') {
        val.replace('\\', "\\\\")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t")
    } else {
        val.to_string()
    }
}

fn format_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(Some(s)) => escape(s),
        CellValue::Bool(Some(b)) => if *b { "True" } else { "False" }.to_string(),
        CellValue::Int(Some(n)) => n.to_string(),
        CellValue::Numeric(Some(d)) => d.to_string(),
        CellValue::Date(Some(d)) => d.format("%Y-%m-%d").to_string(),
        CellValue::Timestamp(Some(t)) => t.format("%Y-%m-%dT%H:%M:%S").to_string(),
        CellValue::Time(Some(t)) => t.format("%H:%M:%S").to_string(),
        _ => "\\N".to_string(),
    }
}

/// Encode one transformed record against the live column order.
///
/// Columns with no corresponding cell emit `\N`.
pub fn format_for_export(ordered_columns: &[String], row: &TransformedRow) -> Vec<u8> {
    let parts: Vec<String> = ordered_columns
        .iter()
        .map(|col| row.get(col).map(format_cell).unwrap_or_else(|| "\\N".to_string()))
        .collect();
    let mut line = parts.join("\t");
    line.push('\n');
    line.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn escape_only_touches_special_chars() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a\tb"), "a\\tb");
        assert_eq!(escape("a\\b\nc"), "a\\\\b\\nc");
    }

    #[test]
    fn line_follows_column_order_with_null_markers() {
        let row = TransformedRow::new(vec![
            ("id".into(), CellValue::Text(Some("001A0000012abcD".into()))),
            ("name".into(), CellValue::Text(Some("Acme".into()))),
            ("active".into(), CellValue::Bool(Some(true))),
            ("amount".into(), CellValue::Numeric(None)),
        ]);
        let line = format_for_export(
            &columns(&["id", "active", "amount", "name", "missing"]),
            &row,
        );
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "001A0000012abcD\tTrue\t\\N\tAcme\t\\N\n"
        );
    }

    #[test]
    fn value_rendering() {
        let row = TransformedRow::new(vec![
            ("d".into(), CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29))),
            (
                "ts".into(),
                CellValue::Timestamp(Some(
                    NaiveDateTime::parse_from_str("2024-02-29T08:30:00", "%Y-%m-%dT%H:%M:%S")
                        .unwrap(),
                )),
            ),
            ("n".into(), CellValue::Numeric(Some(Decimal::from_str("12.50").unwrap()))),
            ("i".into(), CellValue::Int(Some(-3))),
            ("f".into(), CellValue::Bool(Some(false))),
        ]);
        let line = format_for_export(&columns(&["d", "ts", "n", "i", "f"]), &row);
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "2024-02-29\t2024-02-29T08:30:00\t12.50\t-3\tFalse\n"
        );
    }
}
