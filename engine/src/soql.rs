//! SOQL construction and Salesforce timestamp handling.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;

/// Build the persisted SELECT for an sobject.
pub fn make_select_statement(field_names: &[String], sobject_name: &str) -> String {
    format!("select {} from {}", field_names.join(",\n"), sobject_name)
}

/// Format a timestamp the way the remote query language expects it.
pub fn sf_timestamp(t: NaiveDateTime) -> String {
    format!("{}+00:00", t.format("%Y-%m-%dT%H:%M:%S"))
}

/// Parse a remote timestamp, ignoring the zone suffix.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let head = s.get(..19).unwrap_or(s);
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| Error::MalformedTimestamp(s.to_string()))
}

/// Append the incremental watermark clause and the mandatory stamp ordering.
///
/// The lower bound is inclusive: with change-minimal upserts, re-reading rows
/// that share the watermark stamp is a no-op, and `>` would drop records
/// carrying the exact watermark value.
pub fn with_incremental_order(soql: &str, watermark: Option<NaiveDateTime>) -> String {
    match watermark {
        Some(ts) => format!(
            "{} where SystemModStamp >= {} order by SystemModStamp ASC",
            soql,
            sf_timestamp(ts)
        ),
        None => format!("{} order by SystemModStamp ASC", soql),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_statement_joins_fields() {
        let soql = make_select_statement(
            &["Id".to_string(), "Name".to_string()],
            "account",
        );
        assert_eq!(soql, "select Id,\nName from account");
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = parse_timestamp("2024-05-01T17:30:00.000+0000").unwrap();
        assert_eq!(sf_timestamp(ts), "2024-05-01T17:30:00+00:00");
    }

    #[test]
    fn malformed_timestamp_is_an_error() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn incremental_clause_is_inclusive_and_ordered() {
        let ts = parse_timestamp("2024-05-01T00:00:00").unwrap();
        let soql = with_incremental_order("select Id from account", Some(ts));
        assert_eq!(
            soql,
            "select Id from account where SystemModStamp >= 2024-05-01T00:00:00+00:00 \
             order by SystemModStamp ASC"
        );
    }

    #[test]
    fn full_load_is_ordered_only() {
        let soql = with_incremental_order("select Id from account", None);
        assert_eq!(soql, "select Id from account order by SystemModStamp ASC");
    }
}
