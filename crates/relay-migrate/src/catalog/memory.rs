//! In-memory catalogs for tests.

use super::{ColumnDescriptor, Record, RecordSink, SourceCatalog, TargetCatalog, TargetColumn};
use crate::error::{MigrateError, Result};
use crate::transfer::Interchange;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

fn key(namespace: &str, object: &str) -> String {
    format!("{}.{}", namespace, object)
}

struct SourceObject {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Record>,
    definition: Option<String>,
}

/// Source catalog backed by a map of objects.
#[derive(Default)]
pub struct MemorySource {
    objects: Mutex<HashMap<String, SourceObject>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, namespace: &str, name: &str, columns: Vec<ColumnDescriptor>) {
        self.insert(namespace, name, columns, None);
    }

    pub fn add_view(
        &self,
        namespace: &str,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        definition: &str,
    ) {
        self.insert(namespace, name, columns, Some(definition.to_string()));
    }

    fn insert(
        &self,
        namespace: &str,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        definition: Option<String>,
    ) {
        self.objects.lock().unwrap().insert(
            key(namespace, name),
            SourceObject {
                columns,
                rows: Vec::new(),
                definition,
            },
        );
    }

    /// Append `count` generated rows. The last column of every third row is NULL.
    pub fn append_rows(&self, namespace: &str, name: &str, count: u64) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&key(namespace, name))
            .expect("object must be added before rows");
        let width = object.columns.len();
        let start = object.rows.len();
        for i in start..start + count as usize {
            let row = (0..width)
                .map(|c| {
                    if c + 1 == width && width > 1 && i % 3 == 2 {
                        None
                    } else if c == 0 {
                        Some(i.to_string())
                    } else {
                        Some(format!("value {}-{}", i, c))
                    }
                })
                .collect();
            object.rows.push(row);
        }
    }
}

#[async_trait]
impl SourceCatalog for MemorySource {
    async fn row_count(&self, namespace: &str, object: &str) -> Result<u64> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key(namespace, object))
            .map(|o| o.rows.len() as u64)
            .ok_or_else(|| MigrateError::not_found(namespace, object))
    }

    async fn columns(&self, namespace: &str, object: &str) -> Result<Vec<ColumnDescriptor>> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key(namespace, object))
            .map(|o| o.columns.clone())
            .ok_or_else(|| MigrateError::not_found(namespace, object))
    }

    async fn stream_rows(
        &self,
        namespace: &str,
        object: &str,
        sink: &mut dyn RecordSink,
    ) -> Result<u64> {
        let rows = {
            let objects = self.objects.lock().unwrap();
            objects
                .get(&key(namespace, object))
                .map(|o| o.rows.clone())
                .ok_or_else(|| MigrateError::not_found(namespace, object))?
        };
        for row in &rows {
            sink.write_record(row)?;
        }
        Ok(rows.len() as u64)
    }

    async fn view_definition(&self, namespace: &str, object: &str) -> Result<String> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key(namespace, object))
            .and_then(|o| o.definition.clone())
            .ok_or_else(|| MigrateError::not_found(namespace, object))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

/// Destination call, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCall {
    EnsureNamespace(String),
    Drop(String),
    /// Qualified name and `"<column> <type>"` pairs.
    CreateTable(String, Vec<String>),
    CreateView(String),
    /// Qualified name and rows loaded.
    BulkLoad(String, u64),
}

#[derive(Default)]
struct TargetState {
    calls: Vec<TargetCall>,
    namespaces: HashSet<String>,
    tables: HashMap<String, Vec<Record>>,
    views: HashMap<String, String>,
    fail_loads: bool,
    fail_namespaces: bool,
}

/// Target catalog that keeps tables and views in memory and logs every call.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TargetCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Make every bulk load fail.
    pub fn fail_loads(&self, fail: bool) {
        self.state.lock().unwrap().fail_loads = fail;
    }

    /// Make namespace creation fail.
    pub fn fail_namespaces(&self, fail: bool) {
        self.state.lock().unwrap().fail_namespaces = fail;
    }

    pub fn table_rows(&self, namespace: &str, object: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&key(namespace, object))
            .map(|rows| rows.len() as u64)
    }

    pub fn view_definition(&self, namespace: &str, object: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.views.get(&key(namespace, object)).cloned()
    }

    /// Pre-create a table, as if left by an earlier run.
    pub fn seed_table(&self, namespace: &str, object: &str, rows: u64) {
        let mut state = self.state.lock().unwrap();
        state.namespaces.insert(namespace.to_string());
        state.tables.insert(
            key(namespace, object),
            (0..rows).map(|i| vec![Some(i.to_string())]).collect(),
        );
    }

    fn require_namespace(state: &TargetState, namespace: &str) -> Result<()> {
        if state.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(MigrateError::transfer(
                namespace,
                format!("schema \"{}\" does not exist", namespace),
            ))
        }
    }
}

#[async_trait]
impl TargetCatalog for MemoryTarget {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TargetCall::EnsureNamespace(name.to_string()));
        if state.fail_namespaces {
            return Err(MigrateError::transfer(name, "permission denied"));
        }
        state.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn drop_if_exists(&self, namespace: &str, object: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = key(namespace, object);
        state.calls.push(TargetCall::Drop(name.clone()));
        state.tables.remove(&name);
        Ok(())
    }

    async fn create_table(
        &self,
        namespace: &str,
        object: &str,
        columns: &[TargetColumn],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = key(namespace, object);
        state.calls.push(TargetCall::CreateTable(
            name.clone(),
            columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.target_type))
                .collect(),
        ));
        Self::require_namespace(&state, namespace)?;
        if state.tables.contains_key(&name) {
            return Err(MigrateError::transfer(name, "relation already exists"));
        }
        state.tables.insert(name, Vec::new());
        Ok(())
    }

    async fn create_or_replace_view(
        &self,
        namespace: &str,
        object: &str,
        definition: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = key(namespace, object);
        state.calls.push(TargetCall::CreateView(name.clone()));
        Self::require_namespace(&state, namespace)?;
        state.views.insert(name, definition.to_string());
        Ok(())
    }

    async fn bulk_load(&self, namespace: &str, object: &str, data: &Interchange) -> Result<u64> {
        let records = data.records()?;
        let mut state = self.state.lock().unwrap();
        let name = key(namespace, object);
        if state.fail_loads {
            return Err(MigrateError::transfer(name, "COPY rejected row 1"));
        }
        let table = state
            .tables
            .get_mut(&name)
            .ok_or_else(|| MigrateError::transfer(name.clone(), "relation does not exist"))?;
        let loaded = records.len() as u64;
        table.extend(records);
        state.calls.push(TargetCall::BulkLoad(name, loaded));
        Ok(loaded)
    }

    async fn row_count(&self, namespace: &str, object: &str) -> Result<Option<u64>> {
        Ok(self.table_rows(namespace, object))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}
