// External collaborator seams: SQL construction, transport, cache storage,
// and per-entity-kind persistence capabilities all live behind these traits.
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::OrmError;
use crate::models::{ConnectionDescriptor, ObjectInstance};
use crate::registry::{AncestryResolver, RelationGraph};
use crate::services::cache::{CachePolicy, CacheSignature};
use crate::services::facade::Orm;

/// SQL command kind requested from the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Select,
    SelectCount,
    Update,
    Delete,
}

/// Search criteria for an operation, passed to the query builder as data.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// A bare primary-key value; sanitized into a field map before building.
    Pk(Value),
    /// Field -> required value equality conditions.
    Where(BTreeMap<String, Value>),
}

impl Criteria {
    pub fn pk(value: impl Into<Value>) -> Self {
        Criteria::Pk(value.into())
    }

    pub fn where_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut conditions = BTreeMap::new();
        conditions.insert(field.into(), value.into());
        Criteria::Where(conditions)
    }

    pub fn from_map(conditions: BTreeMap<String, Value>) -> Self {
        Criteria::Where(conditions)
    }
}

/// Everything the external query builder needs to produce a statement.
#[derive(Debug)]
pub struct QueryRequest<'a> {
    pub class_name: &'a str,
    /// Resolved physical table (prefix applied).
    pub table: &'a str,
    pub command: Command,
    pub columns: &'a [String],
    pub criteria: Option<&'a Criteria>,
    /// Field -> new value assignments for UPDATE.
    pub set: Option<&'a BTreeMap<String, Value>>,
    pub graph: Option<&'a RelationGraph>,
}

/// An executable statement produced by the query builder.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    bindings: Vec<Value>,
    /// Class that owns the table the statement runs against.
    table_class: Option<String>,
    alias: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
            table_class: None,
            alias: String::new(),
        }
    }

    pub fn with_table_class(mut self, table_class: impl Into<String>) -> Self {
        self.table_class = Some(table_class.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }

    pub fn table_class(&self) -> Option<&str> {
        self.table_class.as_deref()
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// External SQL generation abstraction.
pub trait QueryBuilder: Send + Sync {
    fn build(&self, request: &QueryRequest<'_>) -> Result<Statement, OrmError>;
}

/// Result of executing a statement.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Rows(Vec<BTreeMap<String, Value>>),
    Affected(u64),
}

/// External database transport abstraction.
pub trait Driver: Send + Sync {
    /// Establish transport for a descriptor. Returns false when the endpoint
    /// refuses the connection without a hard failure.
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<bool, OrmError>;

    fn execute(&self, statement: &Statement) -> Result<ExecuteOutcome, OrmError>;

    fn begin(&self) -> Result<(), OrmError>;
    fn commit(&self) -> Result<(), OrmError>;
    fn rollback(&self) -> Result<(), OrmError>;
}

/// External physical cache storage abstraction.
///
/// All failures are soft: None/false fall back to the primary data source.
pub trait CacheStore: Send + Sync {
    fn get(&self, signature: &CacheSignature) -> Option<Value>;
    fn set(&self, signature: &CacheSignature, payload: &Value, ttl: Option<Duration>) -> bool;
    /// Bulk-delete every entry filed under a class namespace.
    fn delete_namespace(&self, namespace: &str) -> bool;
}

/// Per-entity-kind persistence capability, registered at startup and
/// dispatched by class name. The default implementation hydrates plain
/// row objects; specialized kinds can override any part of the flow.
pub trait Persistable: Send + Sync {
    fn load(
        &self,
        orm: &mut Orm,
        class_name: &str,
        criteria: &Criteria,
        cache: CachePolicy,
    ) -> Option<ObjectInstance>;

    fn load_collection(
        &self,
        orm: &mut Orm,
        class_name: &str,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance>;

    fn load_collection_graph(
        &self,
        orm: &mut Orm,
        class_name: &str,
        graph: &RelationGraph,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance>;

    /// Column list for SELECT statements against the class.
    fn select_columns(
        &self,
        resolver: &AncestryResolver<'_>,
        class_name: &str,
        columns: &[String],
        exclude: bool,
    ) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_criteria_constructors() {
        assert_eq!(Criteria::pk(5), Criteria::Pk(json!(5)));

        let criteria = Criteria::where_eq("title", "hello");
        match criteria {
            Criteria::Where(map) => assert_eq!(map["title"], json!("hello")),
            other => panic!("unexpected criteria: {:?}", other),
        }
    }

    #[test]
    fn test_statement_accessors() {
        let statement = Statement::new("SELECT * FROM articles WHERE id = ?", vec![json!(1)])
            .with_table_class("Article")
            .with_alias("Article");
        assert_eq!(statement.sql(), "SELECT * FROM articles WHERE id = ?");
        assert_eq!(statement.bindings(), &[json!(1)]);
        assert_eq!(statement.table_class(), Some("Article"));
        assert_eq!(statement.alias(), "Article");
    }
}
