//! Edge case tests for gurglefish-engine
//!
//! These tests cover the field-list → column-map → recipe → row path as one
//! piece, plus boundary conditions on value conversion.

use gurglefish_engine::{
    canonical_id, export, map_column, soql, transform::scrub_string, CellValue, FieldDescriptor,
    SObjectFields, TransformKind, TransformedRow, Transformer,
};
use proptest::prelude::*;
use serde_json::json;

fn descriptor(name: &str, field_type: &str, length: u32) -> FieldDescriptor {
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

fn account_fields() -> SObjectFields {
    SObjectFields::new(vec![
        descriptor("Id", "id", 18),
        descriptor("Name", "string", 255),
        descriptor("BillingAddress", "address", 0),
        descriptor("BillingCity", "string", 40),
        descriptor("Industry", "picklist", 40),
        descriptor("OwnerId", "reference", 18),
        descriptor("IsDeleted", "boolean", 0),
        descriptor("SystemModStamp", "datetime", 0),
        descriptor("Logo", "base64", 0),
    ])
}

#[test]
fn describe_to_columns_drops_compounds_and_unsupported() {
    let fields = account_fields();
    let columns: Vec<_> = fields
        .iter()
        .filter_map(|f| map_column("account", f).unwrap())
        .collect();

    let names: Vec<_> = columns.iter().map(|c| c.db_field.as_str()).collect();
    assert!(!names.contains(&"billingaddress"));
    assert!(!names.contains(&"logo"));
    assert!(names.contains(&"billingcity"));
    assert!(names.contains(&"systemmodstamp"));
}

#[test]
fn recipe_follows_column_order_and_parses_a_record() {
    let fields = account_fields();
    let columns: Vec<_> = fields
        .iter()
        .filter_map(|f| map_column("account", f).unwrap())
        .collect();
    let transformer = Transformer::from_columns(&columns);

    let rec = json!({
        "Id": "001A0000012abcDEFG",
        "Name": "Acme",
        "BillingCity": "Springfield",
        "Industry": "Retail",
        "OwnerId": "005A0000001xyzWXYZ",
        "IsDeleted": false,
        "SystemModStamp": "2024-05-01T17:30:00.000+0000"
    });
    let row = transformer.parse(rec.as_object().unwrap()).unwrap();

    assert_eq!(row.id(), Some("001A0000012abcD"));
    assert_eq!(
        row.get("ownerid"),
        Some(&CellValue::Text(Some("005A0000001xyzW".into())))
    );
    assert_eq!(row.get("isdeleted"), Some(&CellValue::Bool(Some(false))));
}

#[test]
fn select_statement_uses_remote_casing() {
    let fields = account_fields();
    let columns: Vec<_> = fields
        .iter()
        .filter_map(|f| map_column("account", f).unwrap())
        .collect();
    let names: Vec<String> = columns.iter().map(|c| c.sobject_field.clone()).collect();
    let select = soql::make_select_statement(&names, "account");
    assert!(select.starts_with("select "));
    assert!(select.contains("SystemModStamp"));
    assert!(select.ends_with("from account"));
}

#[test]
fn export_line_round_trips_column_order() {
    let row = TransformedRow::new(vec![
        ("id".into(), CellValue::Text(Some("001A0000012abcD".into()))),
        ("name".into(), CellValue::Text(Some("tab\there".into()))),
    ]);
    let line = export::format_for_export(&["id".into(), "name".into()], &row);
    assert_eq!(
        String::from_utf8(line).unwrap(),
        "001A0000012abcD\ttab\\there\n"
    );
}

proptest! {
    #[test]
    fn canonical_id_never_exceeds_15_ascii_chars(id in "[A-Za-z0-9]{0,20}") {
        prop_assert!(canonical_id(&id).len() <= 15);
    }

    #[test]
    fn canonical_id_is_a_prefix(id in "[A-Za-z0-9]{0,20}") {
        prop_assert!(id.starts_with(canonical_id(&id)));
    }

    #[test]
    fn scrubbed_strings_respect_fieldlen(s in ".{0,64}", len in 1u32..32) {
        let out = scrub_string(&s, len);
        prop_assert!(out.chars().count() <= len as usize);
        prop_assert!(!out.contains('\0'));
    }

    #[test]
    fn string_kind_never_errors_on_any_string(s in ".{0,64}") {
        let t = Transformer::new(vec![gurglefish_engine::RecipeEntry {
            sobject_field: "Name".into(),
            db_field: "name".into(),
            kind: TransformKind::String,
            fieldlen: 16,
        }]);
        let rec = json!({ "Name": s });
        prop_assert!(t.parse(rec.as_object().unwrap()).is_ok());
    }
}
