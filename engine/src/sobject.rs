//! Salesforce sobject metadata as returned by the describe endpoints.
//!
//! A describe document carries the remote field list for one sobject.
//! [`SObjectFields`] is the canonical ingested form: fields are ordered by
//! name, unique by lower-cased name, and `address`-typed fields are dropped
//! on ingest (they are aggregates of sibling scalar fields that are exposed
//! for syncing on their own).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One entry of a describe document's `fields` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Remote field name, original casing
    pub name: String,
    /// Remote field type (picklist, string, datetime, id, reference, ...)
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub scale: u32,
    /// Marked as an external id on the remote
    #[serde(default)]
    pub external_id: bool,
    /// Usable as a lookup key on the remote
    #[serde(default)]
    pub id_lookup: bool,
    /// Target sobjects for reference fields
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default)]
    pub custom: bool,
}

/// The ingested field set of one sobject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SObjectFields {
    fields: Vec<FieldDescriptor>,
}

impl SObjectFields {
    /// Ingest a raw describe field list: drop compound `address` fields,
    /// sort by name, collapse duplicates by lower-cased name.
    pub fn new(raw: Vec<FieldDescriptor>) -> Self {
        let mut fields: Vec<FieldDescriptor> = raw
            .into_iter()
            .filter(|f| f.field_type != "address")
            .collect();
        fields.sort_by_key(|f| f.name.to_lowercase());
        fields.dedup_by(|a, b| a.name.to_lowercase() == b.name.to_lowercase());
        Self { fields }
    }

    /// Look up a field by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<&FieldDescriptor> {
        let lower = name.to_lowercase();
        self.fields.iter().find(|f| f.name.to_lowercase() == lower)
    }

    /// Lower-cased field names.
    pub fn names(&self) -> BTreeSet<String> {
        self.fields.iter().map(|f| f.name.to_lowercase()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The raw descriptors, for persistence.
    pub fn descriptors(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

/// One entry of the remote sobject list, as needed for eligibility checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectSummary {
    pub name: String,
    #[serde(default)]
    pub custom_setting: bool,
    #[serde(default)]
    pub replicateable: bool,
    #[serde(default)]
    pub updateable: bool,
}

impl SObjectSummary {
    /// Whether this sobject is suitable for mirroring.
    ///
    /// A non-empty `filters` list restricts eligibility to the literal names
    /// it contains. The built-in rules exclude custom settings,
    /// non-replicateable and non-updateable objects, tag/history/feed
    /// shadows, Apex internals, and a handful of system pseudo-objects.
    pub fn eligible(&self, filters: &[String]) -> bool {
        let name = self.name.as_str();

        if !filters.is_empty() && !filters.iter().any(|f| f == name) {
            return false;
        }
        if name.ends_with("_del__c") {
            return false;
        }
        if self.custom_setting || !self.replicateable || !self.updateable {
            return false;
        }
        if name.ends_with("__Tag") || name.ends_with("__History") || name.ends_with("__Feed") {
            return false;
        }
        if name.starts_with("Apex") || matches!(name, "scontrol" | "weblink" | "profile") {
            return false;
        }
        true
    }

    /// Package prefix of a namespaced name, or "unpackaged".
    pub fn package(&self) -> &str {
        match self.name.find("__") {
            Some(pos) if pos + 5 < self.name.len() => &self.name[..pos],
            _ => "unpackaged",
        }
    }
}
