use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::OrmError;

/// Storage strategy a class hierarchy maps onto.
///
/// `Single` marks a base class whose subclasses share one physical table with
/// a discriminator column, so the base must expose the union of all subclass
/// columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InheritanceMode {
    #[default]
    None,
    Single,
    Multiple,
}

/// Per-field column metadata from the schema compiler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldMeta {
    /// Logical value type ("int", "string", "datetime", ...). A field without
    /// a type is not hydratable and is ignored by primary-key resolution.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbtype: Option<String>,
    /// Index tag; "pk" marks the field as part of the primary key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub null: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An index block; `primary: true` blocks drive primary-key resolution.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexDef {
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    /// Field name -> column metadata.
    #[serde(default)]
    pub columns: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// A foreign-key relationship declared by a class.
///
/// Aggregate relations point at targets with independent lifecycles;
/// composite relations own their targets (cascade on remove). The alias a
/// relation is known by is the key of the map that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    /// Target entity class.
    pub class: String,
    /// Field on the declaring class.
    pub local: String,
    /// Field on the target class.
    pub foreign: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationMeta {
    /// Field name -> rule set.
    #[serde(default)]
    pub rules: BTreeMap<String, Value>,
}

/// Storage metadata for one entity class, as registered from a package map.
///
/// Immutable once registered; re-registration merges new keys in but never
/// overwrites what an earlier registration declared.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClassMetadata {
    /// Parent class name; absent for hierarchy roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, rename = "tableMeta", skip_serializing_if = "Option::is_none")]
    pub table_meta: Option<Value>,
    /// Field name -> default value.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, rename = "fieldMeta")]
    pub field_meta: BTreeMap<String, FieldMeta>,
    /// Alias -> actual field name.
    #[serde(default, rename = "fieldAliases")]
    pub field_aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationMeta>,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexDef>,
    #[serde(default)]
    pub aggregates: BTreeMap<String, RelationDef>,
    #[serde(default)]
    pub composites: BTreeMap<String, RelationDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<InheritanceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClassMetadata {
    /// Merge another registration of the same class into this one.
    /// Map entries merge key-wise with existing keys retained; scalar values
    /// only fill in when currently absent.
    pub fn merge(&mut self, other: ClassMetadata) {
        if self.extends.is_none() {
            self.extends = other.extends;
        }
        if self.table.is_none() {
            self.table = other.table;
        }
        if self.table_meta.is_none() {
            self.table_meta = other.table_meta;
        }
        if self.inherit.is_none() {
            self.inherit = other.inherit;
        }
        if self.package.is_none() {
            self.package = other.package;
        }
        if self.version.is_none() {
            self.version = other.version;
        }
        for (k, v) in other.fields {
            self.fields.entry(k).or_insert(v);
        }
        for (k, v) in other.field_meta {
            self.field_meta.entry(k).or_insert(v);
        }
        for (k, v) in other.field_aliases {
            self.field_aliases.entry(k).or_insert(v);
        }
        for (k, v) in other.indexes {
            self.indexes.entry(k).or_insert(v);
        }
        for (k, v) in other.aggregates {
            self.aggregates.entry(k).or_insert(v);
        }
        for (k, v) in other.composites {
            self.composites.entry(k).or_insert(v);
        }
        if let Some(other_validation) = other.validation {
            let validation = self.validation.get_or_insert_with(ValidationMeta::default);
            for (k, v) in other_validation.rules {
                validation.rules.entry(k).or_insert(v);
            }
        }
    }
}

/// A package metadata map produced by the schema compiler.
///
/// Version >= 3.0 wraps the class entries as
/// `{version, namespacePrefix, class_map}`; earlier versions are the flat
/// `{className: entry}` form.
#[derive(Debug, Clone, Default)]
pub struct PackageMap {
    pub version: Option<String>,
    pub namespace_prefix: Option<String>,
    pub classes: BTreeMap<String, ClassMetadata>,
}

impl PackageMap {
    pub fn from_value(value: Value) -> Result<Self, OrmError> {
        let Value::Object(mut map) = value else {
            return Err(OrmError::Config(
                "package metadata map must be a JSON object".to_string(),
            ));
        };

        let version = map
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(ref v) = version {
            if version_at_least(v, 3) {
                let namespace_prefix = map
                    .get("namespacePrefix")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let class_map = map
                    .remove("class_map")
                    .unwrap_or_else(|| Value::Object(Default::default()));
                let classes = serde_json::from_value(class_map)
                    .map_err(|e| OrmError::Config(format!("invalid class_map: {}", e)))?;
                return Ok(Self {
                    version,
                    namespace_prefix,
                    classes,
                });
            }
        }

        // Flat (pre-3.0) form: every remaining key is a class entry.
        map.remove("version");
        map.remove("namespacePrefix");
        let classes = serde_json::from_value(Value::Object(map))
            .map_err(|e| OrmError::Config(format!("invalid metadata map: {}", e)))?;
        Ok(Self {
            version,
            namespace_prefix: None,
            classes,
        })
    }
}

/// Compare the major component of a dotted version string.
fn version_at_least(version: &str, major: u32) -> bool {
    version
        .split('.')
        .next()
        .and_then(|m| m.trim().parse::<u32>().ok())
        .map(|m| m >= major)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrapped_map_parsing() {
        let map = PackageMap::from_value(json!({
            "version": "3.0",
            "namespacePrefix": "App",
            "class_map": {
                "Article": {
                    "table": "articles",
                    "fields": {"id": null, "title": ""},
                    "fieldMeta": {
                        "id": {"type": "int", "index": "pk"},
                        "title": {"type": "string"}
                    }
                }
            }
        }))
        .unwrap();

        assert_eq!(map.version.as_deref(), Some("3.0"));
        assert_eq!(map.namespace_prefix.as_deref(), Some("App"));
        let article = &map.classes["Article"];
        assert_eq!(article.table.as_deref(), Some("articles"));
        assert_eq!(article.field_meta["id"].index.as_deref(), Some("pk"));
    }

    #[test]
    fn test_flat_map_parsing() {
        let map = PackageMap::from_value(json!({
            "version": "2.1",
            "Content": {
                "table": "content",
                "fields": {"id": null}
            },
            "Page": {
                "extends": "Content",
                "fields": {"title": ""}
            }
        }))
        .unwrap();

        assert_eq!(map.version.as_deref(), Some("2.1"));
        assert_eq!(map.classes.len(), 2);
        assert_eq!(map.classes["Page"].extends.as_deref(), Some("Content"));
    }

    #[test]
    fn test_merge_never_overwrites() {
        let mut first = ClassMetadata {
            table: Some("articles".to_string()),
            ..Default::default()
        };
        first.fields.insert("id".to_string(), Value::Null);

        let mut second = ClassMetadata {
            table: Some("articles_v2".to_string()),
            ..Default::default()
        };
        second.fields.insert("id".to_string(), json!(0));
        second.fields.insert("slug".to_string(), json!(""));

        first.merge(second);
        assert_eq!(first.table.as_deref(), Some("articles"));
        assert_eq!(first.fields["id"], Value::Null);
        assert_eq!(first.fields["slug"], json!(""));
    }

    #[test]
    fn test_version_compare() {
        assert!(version_at_least("3.0", 3));
        assert!(version_at_least("10.2.1", 3));
        assert!(!version_at_least("2.9", 3));
        assert!(!version_at_least("not-a-version", 3));
    }
}
