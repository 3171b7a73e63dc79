// Class-independent object-access API. Every operation composes the same
// collaborators: the registry resolves the target class, the pool session
// supplies a connection with the required mutability, the external query
// builder and driver produce and run the SQL, and the cache engine sits in
// front of cache-eligible reads and fires invalidation after writes.
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::OrmConfig;
use crate::error::OrmError;
use crate::models::ObjectInstance;
use crate::registry::{AncestryResolver, MetadataRegistry, PrimaryKey, RelationGraph};
use crate::services::adapter::{
    CacheStore, Command, Criteria, Driver, ExecuteOutcome, Persistable, QueryBuilder,
    QueryRequest, Statement,
};
use crate::services::cache::{signature_for, CacheEngine, CachePolicy, KeyMaterial};
use crate::services::connection_pool::{ConnectionPool, Mutability, PoolSession};

/// Payload handed to the on-save / on-remove callbacks right after a write.
pub struct WriteEvent<'a> {
    pub class_name: &'a str,
    /// The prepared statement the write ran with.
    pub criteria: &'a Statement,
    pub object: Option<&'a ObjectInstance>,
}

pub type WriteCallback = Arc<dyn Fn(&WriteEvent<'_>) + Send + Sync>;

/// One ORM session: a unit of work owning its active connection slot.
///
/// Registry and pool are shared, immutable-after-build state; everything
/// session-scoped lives on this value, so concurrent sessions never
/// cross-talk.
pub struct Orm {
    registry: Arc<MetadataRegistry>,
    session: PoolSession,
    builder: Arc<dyn QueryBuilder>,
    driver: Arc<dyn Driver>,
    cache: CacheEngine,
    persistables: BTreeMap<String, Arc<dyn Persistable>>,
    default_persistable: Arc<dyn Persistable>,
    config: OrmConfig,
    on_save: Option<WriteCallback>,
    on_remove: Option<WriteCallback>,
}

impl Orm {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        pool: Arc<ConnectionPool>,
        builder: Arc<dyn QueryBuilder>,
        driver: Arc<dyn Driver>,
        config: OrmConfig,
    ) -> Self {
        Self {
            registry,
            session: PoolSession::new(pool),
            builder,
            driver,
            cache: CacheEngine::disabled(),
            persistables: BTreeMap::new(),
            default_persistable: Arc::new(DefaultPersistable),
            config,
            on_save: None,
            on_remove: None,
        }
    }

    /// Wire up the external cache store; caching stays governed by the
    /// cache-enable configuration flag.
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = CacheEngine::new(Some(store), &self.config.cache);
        self
    }

    pub fn with_on_save(mut self, callback: WriteCallback) -> Self {
        self.on_save = Some(callback);
        self
    }

    pub fn with_on_remove(mut self, callback: WriteCallback) -> Self {
        self.on_remove = Some(callback);
        self
    }

    /// Register a persistence capability for an entity kind. Classes without
    /// one use the default row-hydrating implementation.
    pub fn register_persistable(&mut self, class_name: impl Into<String>, imp: Arc<dyn Persistable>) {
        self.persistables.insert(class_name.into(), imp);
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> AncestryResolver<'_> {
        self.registry
            .resolver()
            .with_table_prefix(&self.config.table_prefix)
    }

    pub fn session(&self) -> &PoolSession {
        &self.session
    }

    fn read_mutability(&self) -> Mutability {
        match self.config.connection.mutable {
            Some(true) => Mutability::Mutable,
            Some(false) => Mutability::Immutable,
            None => Mutability::Any,
        }
    }

    fn persistable_for(&self, class_name: &str) -> Arc<dyn Persistable> {
        let resolved = self.registry.resolve(class_name).unwrap_or(class_name);
        self.persistables
            .get(resolved)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_persistable))
    }

    /// Create a new, unsaved instance seeded from the class's merged field
    /// defaults with the given values overlaid.
    pub fn new_object(
        &self,
        class_name: &str,
        fields: BTreeMap<String, Value>,
    ) -> Option<ObjectInstance> {
        let actual = self.registry.resolve(class_name)?.to_string();
        let mut defaults = self.resolver().fields(&actual);
        for (k, v) in fields {
            defaults.insert(k, v);
        }
        Some(ObjectInstance::new(actual, defaults))
    }

    /// Retrieve a single instance by criteria. A bare primary-key value is
    /// sanitized against the class's key type first.
    pub fn get_object(
        &mut self,
        class_name: &str,
        criteria: &Criteria,
        cache: CachePolicy,
    ) -> Option<ObjectInstance> {
        let criteria = self.sanitize_pk_criteria(class_name, criteria.clone())?;
        let persistable = self.persistable_for(class_name);
        persistable.load(self, class_name, &criteria, cache)
    }

    pub fn get_collection(
        &mut self,
        class_name: &str,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance> {
        let persistable = self.persistable_for(class_name);
        persistable.load_collection(self, class_name, criteria, cache)
    }

    /// Retrieve a single instance with related objects from the graph
    /// hydrated alongside it.
    pub fn get_object_graph(
        &mut self,
        class_name: &str,
        graph: &RelationGraph,
        criteria: &Criteria,
        cache: CachePolicy,
    ) -> Option<ObjectInstance> {
        let criteria = self.sanitize_pk_criteria(class_name, criteria.clone())?;
        let mut collection =
            self.get_collection_graph(class_name, graph, Some(&criteria), cache);
        if collection.len() > 1 {
            tracing::warn!("get_object_graph criteria returned more than one instance");
        }
        if collection.is_empty() {
            None
        } else {
            Some(collection.remove(0))
        }
    }

    pub fn get_collection_graph(
        &mut self,
        class_name: &str,
        graph: &RelationGraph,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance> {
        let persistable = self.persistable_for(class_name);
        persistable.load_collection_graph(self, class_name, graph, criteria, cache)
    }

    /// Iterate a collection without holding the whole facade call chain.
    pub fn iter_collection(
        &mut self,
        class_name: &str,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> ObjectIterator {
        ObjectIterator {
            inner: self
                .get_collection(class_name, criteria, cache)
                .into_iter(),
        }
    }

    /// Count instances matching the criteria; 0 on any read failure.
    pub fn get_count(&mut self, class_name: &str, criteria: Option<&Criteria>) -> u64 {
        let statement =
            match self.build_statement(class_name, Command::SelectCount, criteria, None, None) {
                Ok(statement) => statement,
                Err(err) => {
                    tracing::error!("could not build count query for {}: {}", class_name, err);
                    return 0;
                }
            };
        let driver = Arc::clone(&self.driver);
        if let Err(err) = self.session.connect(driver.as_ref(), self.read_mutability()) {
            tracing::error!("could not get connection for reading data: {}", err);
            return 0;
        }
        match driver.execute(&statement) {
            Ok(ExecuteOutcome::Rows(rows)) => rows
                .first()
                .and_then(|row| row.values().next())
                .and_then(Value::as_u64)
                .unwrap_or(0),
            Ok(ExecuteOutcome::Affected(_)) => 0,
            Err(err) => {
                tracing::error!("error counting {} instances: {}", class_name, err);
                0
            }
        }
    }

    /// Update field values across every instance matching the criteria.
    pub fn update_collection(
        &mut self,
        class_name: &str,
        set: &BTreeMap<String, Value>,
        criteria: Option<&Criteria>,
    ) -> Result<u64, OrmError> {
        if set.is_empty() {
            return Err(OrmError::Validation(
                "no field assignments provided".to_string(),
            ));
        }
        let driver = Arc::clone(&self.driver);
        self.session
            .connect(driver.as_ref(), Mutability::Mutable)
            .inspect_err(|_| tracing::error!("could not get connection for writing data"))?;
        let statement =
            self.build_statement(class_name, Command::Update, criteria, Some(set), None)?;
        match driver.execute(&statement)? {
            ExecuteOutcome::Affected(affected) => {
                self.after_write(class_name, &statement, None, true);
                Ok(affected)
            }
            ExecuteOutcome::Rows(_) => Err(OrmError::Driver(
                "unexpected row result for update statement".to_string(),
            )),
        }
    }

    /// Remove exactly one instance. Counts matching rows first and refuses
    /// the deletion unless the count is exactly 1; ambiguous criteria never
    /// delete anything.
    pub fn remove_object(
        &mut self,
        class_name: &str,
        criteria: &Criteria,
    ) -> Result<bool, OrmError> {
        let driver = Arc::clone(&self.driver);
        self.session
            .connect(driver.as_ref(), Mutability::Mutable)
            .inspect_err(|_| tracing::error!("could not get connection for writing data"))?;
        let count = self.get_count(class_name, Some(criteria));
        if count != 1 {
            tracing::warn!(
                "{} instance to remove not found (criteria matched {} rows)",
                class_name,
                count
            );
            return Ok(false);
        }
        let statement =
            self.build_statement(class_name, Command::Delete, Some(criteria), None, None)?;
        match driver.execute(&statement)? {
            ExecuteOutcome::Affected(1) => {
                self.after_write(class_name, &statement, None, false);
                Ok(true)
            }
            ExecuteOutcome::Affected(affected) => {
                tracing::error!(
                    "error deleting {} instance: {} rows affected",
                    class_name,
                    affected
                );
                Err(OrmError::WriteConflict {
                    expected: 1,
                    actual: affected,
                })
            }
            ExecuteOutcome::Rows(_) => Err(OrmError::Driver(
                "unexpected row result for delete statement".to_string(),
            )),
        }
    }

    /// Remove every instance matching the criteria; returns the removed count.
    pub fn remove_collection(
        &mut self,
        class_name: &str,
        criteria: Option<&Criteria>,
    ) -> Result<u64, OrmError> {
        let driver = Arc::clone(&self.driver);
        self.session
            .connect(driver.as_ref(), Mutability::Mutable)
            .inspect_err(|_| tracing::error!("could not get connection for writing data"))?;
        let statement =
            self.build_statement(class_name, Command::Delete, criteria, None, None)?;
        match driver.execute(&statement)? {
            ExecuteOutcome::Affected(affected) => {
                self.after_write(class_name, &statement, None, false);
                Ok(affected)
            }
            ExecuteOutcome::Rows(_) => Err(OrmError::Driver(
                "unexpected row result for delete statement".to_string(),
            )),
        }
    }

    /// Column list for SELECT statements against a class.
    pub fn select_columns(
        &self,
        class_name: &str,
        columns: &[String],
        exclude: bool,
    ) -> Vec<String> {
        let persistable = self.persistable_for(class_name);
        persistable.select_columns(&self.resolver(), class_name, columns, exclude)
    }

    pub fn begin_transaction(&mut self) -> Result<(), OrmError> {
        let driver = Arc::clone(&self.driver);
        self.session.connect(driver.as_ref(), Mutability::Mutable)?;
        driver.begin()
    }

    pub fn commit(&self) -> Result<(), OrmError> {
        self.driver.commit()
    }

    pub fn rollback(&self) -> Result<(), OrmError> {
        self.driver.rollback()
    }

    /// Shared read path: build a SELECT, consult the cache, execute, cache.
    pub(crate) fn load_rows(
        &mut self,
        class_name: &str,
        criteria: Option<&Criteria>,
        graph: Option<&RelationGraph>,
        cache: CachePolicy,
    ) -> Option<Vec<BTreeMap<String, Value>>> {
        let statement =
            match self.build_statement(class_name, Command::Select, criteria, None, graph) {
                Ok(statement) => statement,
                Err(err) => {
                    tracing::error!("could not build query for {}: {}", class_name, err);
                    return None;
                }
            };
        let signature = signature_for(
            &KeyMaterial::Query {
                sql: statement.sql().to_string(),
                bindings: statement.bindings().to_vec(),
            },
            statement.table_class(),
        );
        if let Some(payload) = self.cache.fetch(&signature, cache) {
            if let Ok(rows) = serde_json::from_value(payload) {
                return Some(rows);
            }
        }

        let driver = Arc::clone(&self.driver);
        if let Err(err) = self.session.connect(driver.as_ref(), self.read_mutability()) {
            tracing::error!("could not get connection for reading data: {}", err);
            return None;
        }
        match driver.execute(&statement) {
            Ok(ExecuteOutcome::Rows(rows)) => {
                if let Ok(payload) = serde_json::to_value(&rows) {
                    self.cache.store(&signature, &payload, cache);
                }
                Some(rows)
            }
            Ok(ExecuteOutcome::Affected(_)) => {
                tracing::error!("unexpected affected-count result for select statement");
                None
            }
            Err(err) => {
                tracing::error!("error executing query for {}: {}", class_name, err);
                None
            }
        }
    }

    pub(crate) fn hydrate(
        &self,
        class_name: &str,
        rows: Vec<BTreeMap<String, Value>>,
    ) -> Vec<ObjectInstance> {
        let defaults = self.resolver().fields(class_name);
        rows.into_iter()
            .map(|row| ObjectInstance::from_row(class_name, defaults.clone(), row))
            .collect()
    }

    fn build_statement(
        &self,
        class_name: &str,
        command: Command,
        criteria: Option<&Criteria>,
        set: Option<&BTreeMap<String, Value>>,
        graph: Option<&RelationGraph>,
    ) -> Result<Statement, OrmError> {
        let resolver = self.resolver();
        let table = resolver.table_name(class_name).ok_or_else(|| {
            OrmError::QueryBuilder(format!("no table metadata for class {}", class_name))
        })?;
        let table_class = resolver.table_class(class_name);
        let columns = match command {
            Command::Select => {
                self.persistable_for(class_name)
                    .select_columns(&resolver, class_name, &[], false)
            }
            _ => Vec::new(),
        };
        let request = QueryRequest {
            class_name,
            table: &table,
            command,
            columns: &columns,
            criteria,
            set,
            graph,
        };
        let statement = self.builder.build(&request)?;
        if statement.table_class().is_none() {
            if let Some(owner) = table_class {
                return Ok(statement.with_table_class(owner));
            }
        }
        Ok(statement)
    }

    fn after_write(
        &mut self,
        class_name: &str,
        statement: &Statement,
        object: Option<&ObjectInstance>,
        is_save: bool,
    ) {
        self.cache.invalidate(&self.resolver(), class_name);
        let callback = if is_save {
            self.on_save.clone()
        } else {
            self.on_remove.clone()
        };
        if let Some(callback) = callback {
            callback(&WriteEvent {
                class_name,
                criteria: statement,
                object,
            });
        }
    }

    /// Coerce a bare primary-key criterion into a field condition the query
    /// builder can consume. Non-coercible values become a null condition
    /// that matches nothing; a scalar can never address a compound key.
    fn sanitize_pk_criteria(&self, class_name: &str, criteria: Criteria) -> Option<Criteria> {
        let value = match criteria {
            Criteria::Pk(value) => value,
            other => return Some(other),
        };
        let resolver = self.resolver();
        let Some(pk) = resolver.primary_key(class_name) else {
            tracing::warn!(
                "scalar criteria against {} which has no primary key",
                class_name
            );
            return None;
        };
        match pk {
            PrimaryKey::Single(field) => {
                let coerced = match resolver.field_type(class_name, &field).as_deref() {
                    Some("int") | Some("integer") => match &value {
                        Value::Number(n) if n.is_i64() || n.is_u64() => value.clone(),
                        Value::String(s) => s
                            .trim()
                            .parse::<i64>()
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => Value::Null,
                    },
                    Some("string") => match &value {
                        Value::String(_) => value.clone(),
                        Value::Number(n) => Value::String(n.to_string()),
                        Value::Bool(b) => Value::String(b.to_string()),
                        _ => Value::Null,
                    },
                    _ => value.clone(),
                };
                Some(Criteria::where_eq(field, coerced))
            }
            PrimaryKey::Compound(_) => {
                tracing::warn!(
                    "scalar criteria cannot address the compound primary key of {}",
                    class_name
                );
                None
            }
        }
    }
}

/// Default persistence capability: plain row hydration over the shared
/// facade read path.
pub struct DefaultPersistable;

impl Persistable for DefaultPersistable {
    fn load(
        &self,
        orm: &mut Orm,
        class_name: &str,
        criteria: &Criteria,
        cache: CachePolicy,
    ) -> Option<ObjectInstance> {
        let rows = orm.load_rows(class_name, Some(criteria), None, cache)?;
        let mut objects = orm.hydrate(class_name, rows);
        if objects.is_empty() {
            None
        } else {
            Some(objects.remove(0))
        }
    }

    fn load_collection(
        &self,
        orm: &mut Orm,
        class_name: &str,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance> {
        orm.load_rows(class_name, criteria, None, cache)
            .map(|rows| orm.hydrate(class_name, rows))
            .unwrap_or_default()
    }

    fn load_collection_graph(
        &self,
        orm: &mut Orm,
        class_name: &str,
        graph: &RelationGraph,
        criteria: Option<&Criteria>,
        cache: CachePolicy,
    ) -> Vec<ObjectInstance> {
        orm.load_rows(class_name, criteria, Some(graph), cache)
            .map(|rows| orm.hydrate(class_name, rows))
            .unwrap_or_default()
    }

    fn select_columns(
        &self,
        resolver: &AncestryResolver<'_>,
        class_name: &str,
        columns: &[String],
        exclude: bool,
    ) -> Vec<String> {
        resolver
            .fields(class_name)
            .into_keys()
            .filter(|field| {
                if columns.is_empty() {
                    true
                } else if exclude {
                    !columns.iter().any(|c| c == field)
                } else {
                    columns.iter().any(|c| c == field)
                }
            })
            .collect()
    }
}

/// Iterable view over a loaded collection.
pub struct ObjectIterator {
    inner: std::vec::IntoIter<ObjectInstance>,
}

impl Iterator for ObjectIterator {
    type Item = ObjectInstance;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionDescriptor, PackageMap};
    use crate::services::cache::CacheSignature;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBuilder;

    impl QueryBuilder for FakeBuilder {
        fn build(&self, request: &QueryRequest<'_>) -> Result<Statement, OrmError> {
            let mut sql = match request.command {
                Command::Select => {
                    format!("SELECT {} FROM {}", request.columns.join(", "), request.table)
                }
                Command::SelectCount => format!("SELECT COUNT(*) FROM {}", request.table),
                Command::Update => format!("UPDATE {}", request.table),
                Command::Delete => format!("DELETE FROM {}", request.table),
            };
            let mut bindings = Vec::new();
            if let Some(Criteria::Where(conditions)) = request.criteria {
                let fields: Vec<String> =
                    conditions.keys().map(|f| format!("{} = ?", f)).collect();
                sql.push_str(&format!(" WHERE {}", fields.join(" AND ")));
                bindings.extend(conditions.values().cloned());
            }
            Ok(Statement::new(sql, bindings).with_alias(request.class_name))
        }
    }

    #[derive(Default)]
    struct FakeDriver {
        outcomes: Mutex<VecDeque<ExecuteOutcome>>,
        executed: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl FakeDriver {
        fn script(&self, outcome: ExecuteOutcome) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        fn executed(&self) -> Vec<(String, Vec<Value>)> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl Driver for FakeDriver {
        fn connect(&self, _descriptor: &ConnectionDescriptor) -> Result<bool, OrmError> {
            Ok(true)
        }

        fn execute(&self, statement: &Statement) -> Result<ExecuteOutcome, OrmError> {
            self.executed
                .lock()
                .unwrap()
                .push((statement.sql().to_string(), statement.bindings().to_vec()));
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ExecuteOutcome::Rows(Vec::new())))
        }

        fn begin(&self) -> Result<(), OrmError> {
            Ok(())
        }

        fn commit(&self) -> Result<(), OrmError> {
            Ok(())
        }

        fn rollback(&self) -> Result<(), OrmError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        entries: Mutex<HashMap<String, Value>>,
        purged: Mutex<Vec<String>>,
    }

    impl CacheStore for FakeStore {
        fn get(&self, signature: &CacheSignature) -> Option<Value> {
            self.entries
                .lock()
                .unwrap()
                .get(&signature.to_string())
                .cloned()
        }

        fn set(&self, signature: &CacheSignature, payload: &Value, _ttl: Option<Duration>) -> bool {
            self.entries
                .lock()
                .unwrap()
                .insert(signature.to_string(), payload.clone());
            true
        }

        fn delete_namespace(&self, namespace: &str) -> bool {
            self.purged.lock().unwrap().push(namespace.to_string());
            true
        }
    }

    fn blog_registry() -> Arc<MetadataRegistry> {
        let mut registry = MetadataRegistry::new();
        registry.register_package(
            "blog",
            PackageMap::from_value(json!({
                "Content": {
                    "table": "content",
                    "fields": {"id": null, "created": null},
                    "fieldMeta": {
                        "id": {"type": "int", "index": "pk"},
                        "created": {"type": "datetime"}
                    }
                },
                "Page": {
                    "extends": "Content",
                    "fields": {"title": ""}
                },
                "Article": {
                    "table": "articles",
                    "fields": {"id": null, "title": ""},
                    "fieldMeta": {"id": {"type": "int", "index": "pk"}},
                    "composites": {
                        "Comments": {
                            "class": "Comment", "local": "id", "foreign": "article",
                            "cardinality": "many", "cascade": true
                        }
                    }
                },
                "Comment": {"table": "comments", "fields": {"id": null}},
                "User": {"table": "users", "fields": {"id": null}}
            }))
            .unwrap(),
            None,
        );
        Arc::new(registry)
    }

    fn writable_pool() -> Arc<ConnectionPool> {
        let mut pool = ConnectionPool::new();
        pool.add(ConnectionDescriptor::new(
            "postgresql://app@primary:5432/blog",
            true,
        ));
        Arc::new(pool)
    }

    fn orm_with(driver: Arc<FakeDriver>, config: OrmConfig) -> Orm {
        Orm::new(
            blog_registry(),
            writable_pool(),
            Arc::new(FakeBuilder),
            driver,
            config,
        )
    }

    #[test]
    fn test_new_object_unions_inherited_fields() {
        let orm = orm_with(Arc::new(FakeDriver::default()), OrmConfig::default());
        let page = orm.new_object("Page", BTreeMap::new()).unwrap();
        assert!(page.get("id").is_some());
        assert!(page.get("created").is_some());
        assert_eq!(page.get("title"), Some(&json!("")));
        assert_eq!(
            orm.resolver().primary_key("Page"),
            Some(PrimaryKey::Single("id".to_string()))
        );

        assert!(orm.new_object("Unknown", BTreeMap::new()).is_none());
    }

    #[test]
    fn test_get_object_hydrates_row() {
        let driver = Arc::new(FakeDriver::default());
        driver.script(ExecuteOutcome::Rows(vec![{
            let mut row = BTreeMap::new();
            row.insert("id".to_string(), json!(7));
            row.insert("title".to_string(), json!("hello"));
            row
        }]));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());

        let object = orm
            .get_object("Article", &Criteria::pk(7), CachePolicy::Skip)
            .unwrap();
        assert_eq!(object.class_name(), "Article");
        assert_eq!(object.get("id"), Some(&json!(7)));
        assert_eq!(object.get("title"), Some(&json!("hello")));

        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].0.starts_with("SELECT"));
        assert!(executed[0].0.contains("articles"));
        assert_eq!(executed[0].1, vec![json!(7)]);
    }

    #[test]
    fn test_pk_criteria_sanitation_coerces_strings() {
        let driver = Arc::new(FakeDriver::default());
        driver.script(ExecuteOutcome::Rows(vec![]));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());

        let _ = orm.get_object("Article", &Criteria::pk("7"), CachePolicy::Skip);
        let executed = driver.executed();
        // The string "7" against an int key binds as the integer 7.
        assert_eq!(executed[0].1, vec![json!(7)]);

        let _ = orm.get_object("Article", &Criteria::pk("seven"), CachePolicy::Skip);
        let executed = driver.executed();
        // Non-coercible values become a null condition that matches nothing.
        assert_eq!(executed[1].1, vec![Value::Null]);
    }

    #[test]
    fn test_cached_read_skips_driver() {
        let mut config = OrmConfig::default();
        config.cache.enabled = true;
        let driver = Arc::new(FakeDriver::default());
        driver.script(ExecuteOutcome::Rows(vec![{
            let mut row = BTreeMap::new();
            row.insert("id".to_string(), json!(1));
            row
        }]));
        let store = Arc::new(FakeStore::default());
        let store_dyn: Arc<dyn CacheStore> = store.clone();
        let mut orm =
            orm_with(Arc::clone(&driver), config).with_cache_store(store_dyn);

        let first = orm.get_collection("Article", None, CachePolicy::Default);
        assert_eq!(first.len(), 1);
        assert_eq!(driver.executed().len(), 1);

        // Identical query: served from cache, driver untouched.
        let second = orm.get_collection("Article", None, CachePolicy::Default);
        assert_eq!(second.len(), 1);
        assert_eq!(driver.executed().len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_update_collection_invalidates_and_notifies() {
        let mut config = OrmConfig::default();
        config.cache.enabled = true;
        let driver = Arc::new(FakeDriver::default());
        driver.script(ExecuteOutcome::Affected(3));
        let store = Arc::new(FakeStore::default());
        let saved: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let saved_in_callback = Arc::clone(&saved);
        let store_dyn: Arc<dyn CacheStore> = store.clone();
        let mut orm = orm_with(Arc::clone(&driver), config)
            .with_cache_store(store_dyn)
            .with_on_save(Arc::new(move |event: &WriteEvent<'_>| {
                saved_in_callback
                    .lock()
                    .unwrap()
                    .push(event.class_name.to_string());
            }));

        let mut set = BTreeMap::new();
        set.insert("title".to_string(), json!("updated"));
        let affected = orm
            .update_collection("Article", &set, Some(&Criteria::where_eq("id", 1)))
            .unwrap();
        assert_eq!(affected, 3);

        // One-hop invalidation: Article and its composite target, never User.
        let purged = store.purged.lock().unwrap().clone();
        assert!(purged.iter().any(|n| n.ends_with("Article")));
        assert!(purged.iter().any(|n| n.ends_with("Comment")));
        assert!(!purged.iter().any(|n| n.ends_with("User")));

        assert_eq!(saved.lock().unwrap().as_slice(), ["Article"]);
    }

    #[test]
    fn test_update_requires_assignments() {
        let mut orm = orm_with(Arc::new(FakeDriver::default()), OrmConfig::default());
        let result = orm.update_collection("Article", &BTreeMap::new(), None);
        assert!(matches!(result, Err(OrmError::Validation(_))));
    }

    #[test]
    fn test_write_fails_on_readonly_pool() {
        let mut pool = ConnectionPool::new();
        pool.add(ConnectionDescriptor::new(
            "postgresql://app@replica:5432/blog",
            false,
        ));
        let mut orm = Orm::new(
            blog_registry(),
            Arc::new(pool),
            Arc::new(FakeBuilder),
            Arc::new(FakeDriver::default()),
            OrmConfig::default(),
        );

        let mut set = BTreeMap::new();
        set.insert("title".to_string(), json!("x"));
        let result = orm.update_collection("Article", &set, None);
        assert!(matches!(result, Err(OrmError::PoolExhausted)));
    }

    #[test]
    fn test_remove_object_refuses_ambiguous_criteria() {
        let driver = Arc::new(FakeDriver::default());
        let mut count_row = BTreeMap::new();
        count_row.insert("count".to_string(), json!(2));
        driver.script(ExecuteOutcome::Rows(vec![count_row]));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());

        let removed = orm
            .remove_object("Article", &Criteria::where_eq("title", "dup"))
            .unwrap();
        assert!(!removed);
        // Only the count query ran; no DELETE was issued.
        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].0.starts_with("SELECT COUNT"));
    }

    #[test]
    fn test_remove_object_deletes_exactly_one() {
        let driver = Arc::new(FakeDriver::default());
        let mut count_row = BTreeMap::new();
        count_row.insert("count".to_string(), json!(1));
        driver.script(ExecuteOutcome::Rows(vec![count_row]));
        driver.script(ExecuteOutcome::Affected(1));
        let removed_classes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let removed_in_callback = Arc::clone(&removed_classes);
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default()).with_on_remove(
            Arc::new(move |event: &WriteEvent<'_>| {
                removed_in_callback
                    .lock()
                    .unwrap()
                    .push(event.class_name.to_string());
            }),
        );

        let removed = orm.remove_object("Article", &Criteria::pk(7)).unwrap();
        assert!(removed);
        let executed = driver.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[1].0.starts_with("DELETE"));
        assert_eq!(removed_classes.lock().unwrap().as_slice(), ["Article"]);
    }

    #[test]
    fn test_remove_collection_returns_affected() {
        let driver = Arc::new(FakeDriver::default());
        driver.script(ExecuteOutcome::Affected(4));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());

        let removed = orm
            .remove_collection("Comment", Some(&Criteria::where_eq("article", 7)))
            .unwrap();
        assert_eq!(removed, 4);
    }

    #[test]
    fn test_get_count_reads_first_column() {
        let driver = Arc::new(FakeDriver::default());
        let mut count_row = BTreeMap::new();
        count_row.insert("count".to_string(), json!(42));
        driver.script(ExecuteOutcome::Rows(vec![count_row]));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());
        assert_eq!(orm.get_count("Article", None), 42);
    }

    #[test]
    fn test_iter_collection_yields_instances() {
        let driver = Arc::new(FakeDriver::default());
        let rows: Vec<BTreeMap<String, Value>> = (1..=3)
            .map(|i| {
                let mut row = BTreeMap::new();
                row.insert("id".to_string(), json!(i));
                row
            })
            .collect();
        driver.script(ExecuteOutcome::Rows(rows));
        let mut orm = orm_with(Arc::clone(&driver), OrmConfig::default());

        let ids: Vec<Value> = orm
            .iter_collection("Article", None, CachePolicy::Skip)
            .map(|object| object.get("id").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_select_columns_filters() {
        let orm = orm_with(Arc::new(FakeDriver::default()), OrmConfig::default());
        let all = orm.select_columns("Article", &[], false);
        assert_eq!(all, vec!["id".to_string(), "title".to_string()]);

        let only = orm.select_columns("Article", &["id".to_string()], false);
        assert_eq!(only, vec!["id".to_string()]);

        let excluded = orm.select_columns("Article", &["id".to_string()], true);
        assert_eq!(excluded, vec!["title".to_string()]);
    }
}
