//! Remote field → local column mapping.
//!
//! [`map_column`] turns one remote field descriptor into at most one local
//! column definition. Compound `address` fields and unsupported
//! `base64`/`anyType` payloads yield no column; every other type must map or
//! the sobject is misconfigured and the caller gets an error.

use crate::error::{Error, Result};
use crate::sobject::FieldDescriptor;
use serde::{Deserialize, Serialize};

/// A persisted remote-field ↔ local-column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    /// Effective length for value truncation; 0 means unbounded
    pub fieldlen: u32,
    /// SQL type fragment used in CREATE/ALTER statements
    pub dml: String,
    /// Local table (canonical lowercase)
    pub table_name: String,
    /// Remote field name, original casing, used in SOQL
    pub sobject_field: String,
    /// Local column name (lowercase)
    pub db_field: String,
    /// Echo of the remote field type
    pub field_type: String,
}

/// Map a remote field to a local column definition.
///
/// Returns `Ok(None)` for the field types that produce no column.
pub fn map_column(sobject_name: &str, field: &FieldDescriptor) -> Result<Option<ColumnMap>> {
    let mut fieldlen = field.length;
    let dml = match field.field_type.as_str() {
        "picklist" | "multipicklist" | "email" | "phone" | "url" => {
            format!("varchar({})", field.length)
        }
        "string" | "encryptedstring" | "textarea" | "combobox" => "text".to_string(),
        "datetime" => "timestamp".to_string(),
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "id" => {
            fieldlen = 15;
            "char(15) primary key".to_string()
        }
        "reference" => {
            fieldlen = 15;
            "char(15)".to_string()
        }
        "boolean" => "boolean".to_string(),
        "double" => {
            fieldlen = field.precision + field.scale + 1;
            format!("numeric({},{})", field.precision, field.scale)
        }
        "currency" => "numeric(18,2)".to_string(),
        "int" => {
            fieldlen = 15;
            "integer".to_string()
        }
        "percent" => {
            fieldlen = 9;
            "numeric".to_string()
        }
        // compound aggregate of sibling scalar fields, or unsupported payload
        "address" | "base64" | "anyType" => return Ok(None),
        other => {
            return Err(Error::UnknownFieldType {
                sobject: sobject_name.to_string(),
                field: field.name.clone(),
                field_type: other.to_string(),
            })
        }
    };

    Ok(Some(ColumnMap {
        fieldlen,
        dml,
        table_name: sobject_name.to_lowercase(),
        sobject_field: field.name.clone(),
        db_field: field.name.to_lowercase(),
        field_type: field.field_type.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: &str, length: u32) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            field_type: field_type.into(),
            length,
            precision: 0,
            scale: 0,
            external_id: false,
            id_lookup: false,
            reference_to: vec![],
            custom: false,
        }
    }

    #[test]
    fn picklist_maps_to_varchar() {
        let col = map_column("account", &field("Region__c", "picklist", 40))
            .unwrap()
            .unwrap();
        assert_eq!(col.dml, "varchar(40)");
        assert_eq!(col.fieldlen, 40);
        assert_eq!(col.db_field, "region__c");
        assert_eq!(col.sobject_field, "Region__c");
        assert_eq!(col.table_name, "account");
    }

    #[test]
    fn id_is_primary_key_with_15_chars() {
        let col = map_column("account", &field("Id", "id", 18)).unwrap().unwrap();
        assert_eq!(col.dml, "char(15) primary key");
        assert_eq!(col.fieldlen, 15);
    }

    #[test]
    fn reference_is_bare_char_15() {
        let col = map_column("contact", &field("AccountId", "reference", 18))
            .unwrap()
            .unwrap();
        assert_eq!(col.dml, "char(15)");
        assert_eq!(col.fieldlen, 15);
    }

    #[test]
    fn double_carries_precision_and_scale() {
        let mut f = field("Score__c", "double", 0);
        f.precision = 10;
        f.scale = 2;
        let col = map_column("account", &f).unwrap().unwrap();
        assert_eq!(col.dml, "numeric(10,2)");
        assert_eq!(col.fieldlen, 13);
    }

    #[test]
    fn currency_int_percent() {
        let col = map_column("opp", &field("Amount", "currency", 0)).unwrap().unwrap();
        assert_eq!(col.dml, "numeric(18,2)");

        let col = map_column("opp", &field("Seats__c", "int", 0)).unwrap().unwrap();
        assert_eq!(col.dml, "integer");
        assert_eq!(col.fieldlen, 15);

        let col = map_column("opp", &field("Prob", "percent", 0)).unwrap().unwrap();
        assert_eq!(col.dml, "numeric");
        assert_eq!(col.fieldlen, 9);
    }

    #[test]
    fn compound_and_unsupported_yield_no_column() {
        assert!(map_column("a", &field("Addr", "address", 0)).unwrap().is_none());
        assert!(map_column("a", &field("Blob", "base64", 0)).unwrap().is_none());
        assert!(map_column("a", &field("Any", "anyType", 0)).unwrap().is_none());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let err = map_column("account", &field("Weird", "polygon", 0)).unwrap_err();
        assert!(matches!(err, Error::UnknownFieldType { .. }));
    }

    #[test]
    fn column_map_round_trips_through_json() {
        let col = map_column("account", &field("Name", "string", 255))
            .unwrap()
            .unwrap();
        let json = serde_json::to_string(&col).unwrap();
        let parsed: ColumnMap = serde_json::from_str(&json).unwrap();
        assert_eq!(col, parsed);
    }
}
