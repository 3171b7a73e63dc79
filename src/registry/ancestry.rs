use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{ClassMetadata, FieldMeta, IndexDef, InheritanceMode, RelationDef};
use crate::registry::MetadataRegistry;

/// The primary key of a class: one field, or an ordered compound set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(String),
    Compound(Vec<String>),
}

impl PrimaryKey {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            PrimaryKey::Single(f) => vec![f.as_str()],
            PrimaryKey::Compound(fields) => fields.iter().map(String::as_str).collect(),
        }
    }
}

/// Nested relation graph: alias -> subgraph, as consumed by graph queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationGraph(pub BTreeMap<String, RelationGraph>);

impl RelationGraph {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Merged-metadata view over a class hierarchy.
///
/// All answers are computed from the registry's per-class declarations:
/// map-valued metadata merges from the root down so more-derived classes
/// overwrite by key, scalar metadata takes the nearest ancestor's value, and
/// single-table-inheritance bases additionally take the union of their
/// descendants' declarations without letting a descendant override anything
/// the base or an ancestor declared.
pub struct AncestryResolver<'a> {
    registry: &'a MetadataRegistry,
    table_prefix: Option<&'a str>,
}

impl<'a> AncestryResolver<'a> {
    pub fn new(registry: &'a MetadataRegistry) -> Self {
        Self {
            registry,
            table_prefix: None,
        }
    }

    /// Default physical table prefix for packages registered without one.
    pub fn with_table_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = Some(prefix);
        self
    }

    /// Ancestry chain `[class, parent, ..., root]`, cycle-safe.
    pub fn ancestry(&self, class_name: &str, include_self: bool) -> Vec<String> {
        let mut chain = Vec::new();
        let Some(actual) = self.registry.resolve(class_name) else {
            return chain;
        };
        if include_self {
            chain.push(actual.to_string());
        }
        let mut current = actual;
        while let Some(parent) = self.registry.parent_of(current) {
            if parent == actual || chain.iter().any(|c| c == parent) {
                break;
            }
            chain.push(parent.to_string());
            current = parent;
        }
        chain
    }

    /// Inheritance mode, nearest declaration wins, defaulting to `None`.
    pub fn inherit(&self, class_name: &str) -> InheritanceMode {
        for ancestor in self.ancestry(class_name, true) {
            if let Some(mode) = self.registry.class(&ancestor).and_then(|c| c.inherit) {
                return mode;
            }
        }
        InheritanceMode::None
    }

    /// Root-to-class merge of a map-valued metadata projection, with the
    /// single-table-inheritance descendant union applied when it applies.
    fn merged<T: Clone>(
        &self,
        class_name: &str,
        project: impl Fn(&ClassMetadata) -> Option<&BTreeMap<String, T>>,
    ) -> BTreeMap<String, T> {
        let mut out = BTreeMap::new();
        let Some(actual) = self.registry.resolve(class_name) else {
            return out;
        };
        let chain = self.ancestry(actual, true);
        for ancestor in chain.iter().rev() {
            if let Some(map) = self.registry.class(ancestor).and_then(|c| project(c)) {
                for (k, v) in map {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        if self.inherit(actual) == InheritanceMode::Single {
            for descendant in self.registry.descendants(actual) {
                if let Some(map) = self.registry.class(&descendant).and_then(|c| project(c)) {
                    for (k, v) in map {
                        out.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
        }
        out
    }

    /// Field names and default values, the attribute seed for new instances.
    pub fn fields(&self, class_name: &str) -> BTreeMap<String, Value> {
        self.merged(class_name, |c| Some(&c.fields))
    }

    pub fn field_meta(&self, class_name: &str) -> BTreeMap<String, FieldMeta> {
        self.merged(class_name, |c| Some(&c.field_meta))
    }

    pub fn field_aliases(&self, class_name: &str) -> BTreeMap<String, String> {
        self.merged(class_name, |c| Some(&c.field_aliases))
    }

    pub fn validation_rules(&self, class_name: &str) -> BTreeMap<String, Value> {
        self.merged(class_name, |c| c.validation.as_ref().map(|v| &v.rules))
    }

    pub fn indexes(&self, class_name: &str) -> BTreeMap<String, IndexDef> {
        self.merged(class_name, |c| Some(&c.indexes))
    }

    pub fn aggregates(&self, class_name: &str) -> BTreeMap<String, RelationDef> {
        self.merged(class_name, |c| Some(&c.aggregates))
    }

    pub fn composites(&self, class_name: &str) -> BTreeMap<String, RelationDef> {
        self.merged(class_name, |c| Some(&c.composites))
    }

    /// First non-empty scalar walking the chain from the class to the root.
    fn nearest<T>(
        &self,
        class_name: &str,
        project: impl Fn(&ClassMetadata) -> Option<T>,
    ) -> Option<T> {
        for ancestor in self.ancestry(class_name, true) {
            if let Some(value) = self.registry.class(&ancestor).and_then(|c| project(c)) {
                return Some(value);
            }
        }
        None
    }

    /// The class in the chain that declares the physical table.
    pub fn table_class(&self, class_name: &str) -> Option<String> {
        self.ancestry(class_name, true).into_iter().find(|ancestor| {
            self.registry
                .class(ancestor)
                .map(|c| c.table.is_some())
                .unwrap_or(false)
        })
    }

    /// Physical table name with the owning package's prefix applied.
    pub fn table_name(&self, class_name: &str) -> Option<String> {
        let owner = self.table_class(class_name)?;
        let meta = self.registry.class(&owner)?;
        let table = meta.table.as_deref()?;
        let prefix = meta
            .package
            .as_deref()
            .and_then(|p| self.registry.package_info(p))
            .and_then(|info| info.table_prefix.as_deref())
            .or(self.table_prefix)
            .unwrap_or("");
        Some(format!("{}{}", prefix, table))
    }

    pub fn table_meta(&self, class_name: &str) -> Option<Value> {
        self.nearest(class_name, |c| c.table_meta.clone())
    }

    pub fn package(&self, class_name: &str) -> Option<String> {
        self.nearest(class_name, |c| c.package.clone())
    }

    pub fn model_version(&self, class_name: &str) -> Option<String> {
        self.nearest(class_name, |c| c.version.clone())
    }

    /// Nearest-ancestor logical type for a field.
    pub fn field_type(&self, class_name: &str, field: &str) -> Option<String> {
        self.nearest(class_name, |c| {
            c.field_meta.get(field).and_then(|m| m.field_type.clone())
        })
    }

    /// Primary key for a class, collected across the whole ancestry chain.
    ///
    /// A field counts when a `primary: true` index block names it and the
    /// declaring class types it, or when its field metadata carries the "pk"
    /// index tag together with a type. Duplicate declarations collapse to the
    /// first occurrence; no pk-tagged field at all is legal (abstract or
    /// view-backed metadata) and yields None.
    pub fn primary_key(&self, class_name: &str) -> Option<PrimaryKey> {
        let actual = self.registry.resolve(class_name)?;
        let mut pk: Vec<String> = Vec::new();
        for ancestor in self.ancestry(actual, true) {
            let Some(meta) = self.registry.class(&ancestor) else {
                continue;
            };
            for index in meta.indexes.values() {
                if !index.primary {
                    continue;
                }
                for field in index.columns.keys() {
                    let typed = meta
                        .field_meta
                        .get(field)
                        .and_then(|m| m.field_type.as_ref())
                        .is_some();
                    if typed && !pk.iter().any(|f| f == field) {
                        pk.push(field.clone());
                    }
                }
            }
            for (field, field_meta) in &meta.field_meta {
                if field_meta.index.as_deref() == Some("pk")
                    && field_meta.field_type.is_some()
                    && !pk.iter().any(|f| f == field)
                {
                    pk.push(field.clone());
                }
            }
        }
        match pk.len() {
            0 => None,
            1 => Some(PrimaryKey::Single(pk.remove(0))),
            _ => Some(PrimaryKey::Compound(pk)),
        }
    }

    /// Logical types of the primary-key columns, in key order. Columns with
    /// no type declared anywhere in the chain are omitted; no typed column at
    /// all yields None.
    pub fn primary_key_types(&self, class_name: &str) -> Option<Vec<(String, String)>> {
        let pk = self.primary_key(class_name)?;
        let types: Vec<(String, String)> = pk
            .fields()
            .into_iter()
            .filter_map(|field| {
                self.field_type(class_name, field)
                    .map(|ty| (field.to_string(), ty))
            })
            .collect();
        if types.is_empty() {
            None
        } else {
            Some(types)
        }
    }

    /// Aggregate or composite relation definition by alias.
    pub fn fk_definition(&self, class_name: &str, alias: &str) -> Option<RelationDef> {
        let aggregates = self.aggregates(class_name);
        if let Some(def) = aggregates.get(alias) {
            return Some(def.clone());
        }
        self.composites(class_name).get(alias).cloned()
    }

    /// Nested relation graph to the given depth over aggregates and
    /// composites, skipping circular paths.
    pub fn relation_graph(&self, class_name: &str, depth: usize) -> RelationGraph {
        let mut parents = Vec::new();
        let mut visited = Vec::new();
        self.relation_graph_inner(class_name, depth, &mut parents, &mut visited)
    }

    fn relation_graph_inner(
        &self,
        class_name: &str,
        depth: usize,
        parents: &mut Vec<String>,
        visited: &mut Vec<String>,
    ) -> RelationGraph {
        let mut graph = BTreeMap::new();
        let Some(actual) = self.registry.resolve(class_name).map(str::to_string) else {
            return RelationGraph(graph);
        };
        if depth == 0 {
            return RelationGraph(graph);
        }
        let depth = depth - 1;
        parents.extend(self.ancestry(&actual, true));
        let mut nested_parents = parents.clone();
        let mut nested_visited = visited.clone();
        nested_visited.push(actual.clone());

        let mut relations = self.aggregates(&actual);
        relations.extend(self.composites(&actual));
        for (alias, relation) in relations {
            if visited.iter().any(|v| v == &relation.class) {
                continue;
            }
            let child = if depth > 0 && !parents.iter().any(|p| p == &relation.class) {
                self.relation_graph_inner(
                    &relation.class,
                    depth,
                    &mut nested_parents,
                    &mut nested_visited,
                )
            } else {
                RelationGraph::default()
            };
            graph.insert(alias, child);
        }
        visited.push(actual);
        RelationGraph(graph)
    }
}
