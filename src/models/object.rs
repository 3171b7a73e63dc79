use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::registry::PrimaryKey;

/// A hydrated domain object: a class name plus its field values.
///
/// Instances start from the class's merged field defaults and are filled in
/// from result rows; they carry no connection or statement state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectInstance {
    class_name: String,
    fields: BTreeMap<String, Value>,
}

impl ObjectInstance {
    pub fn new(class_name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            class_name: class_name.into(),
            fields,
        }
    }

    /// Build an instance from a result row, overlaying the row's columns on
    /// top of the class's defaults.
    pub fn from_row(
        class_name: impl Into<String>,
        defaults: BTreeMap<String, Value>,
        row: BTreeMap<String, Value>,
    ) -> Self {
        let mut fields = defaults;
        for (k, v) in row {
            fields.insert(k, v);
        }
        Self {
            class_name: class_name.into(),
            fields,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Primary-key value(s) in declaration order; None when any component is
    /// missing from the instance.
    pub fn primary_key_values(&self, pk: &PrimaryKey) -> Option<Vec<Value>> {
        match pk {
            PrimaryKey::Single(field) => self.fields.get(field).map(|v| vec![v.clone()]),
            PrimaryKey::Compound(fields) => fields
                .iter()
                .map(|f| self.fields.get(f).cloned())
                .collect::<Option<Vec<_>>>(),
        }
    }
}
