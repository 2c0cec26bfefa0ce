//! Error types for the Gurglefish engine.

use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("field {field} has unknown type {field_type} for sobject {sobject}")]
    UnknownFieldType {
        sobject: String,
        field: String,
        field_type: String,
    },

    #[error("field '{field}' expected {expected}, got {got}")]
    InvalidValue {
        field: String,
        expected: &'static str,
        got: String,
    },

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownFieldType {
            sobject: "account".into(),
            field: "Shape__c".into(),
            field_type: "polygon".into(),
        };
        assert_eq!(
            err.to_string(),
            "field Shape__c has unknown type polygon for sobject account"
        );

        let err = Error::InvalidValue {
            field: "Amount".into(),
            expected: "number",
            got: "\"abc\"".into(),
        };
        assert_eq!(err.to_string(), "field 'Amount' expected number, got \"abc\"");
    }
}
