pub mod ancestry;

pub use ancestry::{AncestryResolver, PrimaryKey, RelationGraph};

use std::collections::BTreeMap;

use crate::models::{ClassMetadata, PackageMap};

/// Registration details for one model package.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    /// Package-specific physical table prefix.
    pub table_prefix: Option<String>,
    pub namespace_prefix: Option<String>,
    pub version: Option<String>,
}

/// Process-wide store of entity-class metadata.
///
/// Populated once per process at package-attach time and read-only afterward:
/// registration takes `&mut self`, every lookup takes `&self`, so a warmed-up
/// registry can be shared across sessions behind an `Arc`.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    classes: BTreeMap<String, ClassMetadata>,
    packages: BTreeMap<String, PackageInfo>,
    /// Class name -> direct subclasses, in registration order.
    children: BTreeMap<String, Vec<String>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a package metadata map. Classes already registered merge with
    /// the incoming entries key-wise; earlier declarations always win.
    /// Returns the number of class entries processed.
    pub fn register_package(
        &mut self,
        package: &str,
        map: PackageMap,
        table_prefix: Option<&str>,
    ) -> usize {
        let mut count = 0;
        let info = PackageInfo {
            table_prefix: table_prefix.map(str::to_string),
            namespace_prefix: map.namespace_prefix.clone(),
            version: map.version.clone(),
        };

        for (name, mut entry) in map.classes {
            if entry.package.is_none() {
                entry.package = Some(package.to_string());
            }
            match self.classes.entry(name.clone()) {
                std::collections::btree_map::Entry::Occupied(mut occupied) => {
                    occupied.get_mut().merge(entry)
                }
                std::collections::btree_map::Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                }
            }
            if let Some(parent) = self.classes[&name].extends.clone() {
                let siblings = self.children.entry(parent).or_default();
                if !siblings.contains(&name) {
                    siblings.push(name.clone());
                }
            }
            count += 1;
        }

        // Re-registration keeps the first prefix a package was attached with.
        self.packages.entry(package.to_string()).or_insert(info);

        tracing::info!("registered {} classes from package {}", count, package);
        count
    }

    /// Resolve a class name to its registered form. Unknown names are a
    /// lookup failure, not an error: callers treat None as "no such entity".
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.classes.get_key_value(name) {
            return Some(key.as_str());
        }
        let found = self
            .classes
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .map(String::as_str);
        if found.is_none() {
            tracing::warn!("could not resolve class {}", name);
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn class(&self, name: &str) -> Option<&ClassMetadata> {
        let resolved = self.resolve(name)?;
        self.classes.get(resolved)
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.class(name)?.extends.as_deref()
    }

    pub fn direct_descendants(&self, name: &str) -> &[String] {
        self.resolve(name)
            .and_then(|resolved| self.children.get(resolved))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All transitive subclasses of a class, cycle-safe.
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let Some(resolved) = self.resolve(name) else {
            return out;
        };
        let mut stack: Vec<&str> = self
            .children
            .get(resolved)
            .map(|kids| kids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if out.iter().any(|seen: &String| seen == current) {
                continue;
            }
            out.push(current.to_string());
            if let Some(kids) = self.children.get(current) {
                stack.extend(kids.iter().map(String::as_str));
            }
        }
        out
    }

    pub fn package_info(&self, package: &str) -> Option<&PackageInfo> {
        self.packages.get(package)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Borrow-view resolver over this registry's class hierarchy.
    pub fn resolver(&self) -> AncestryResolver<'_> {
        AncestryResolver::new(self)
    }
}
