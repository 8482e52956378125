use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use hierarchical_insert::{
    ErrorLog, ExecuteOutcome, InsertError, InsertResult, InsertStatement, ResourceProvider,
    Savepoint, TransactionalResource, Value,
};

/// One call made against the backend, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Acquire,
    SetAutoCommit(bool),
    Execute(String),
    Commit,
    Rollback,
    CreateSavepoint(String),
    RollbackTo(String),
    ReleaseSavepoint(String),
    Release,
    /// Resource dropped without release; pending rows are discarded
    Discard,
}

/// A row as the backend stored it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub params: Vec<Value>,
}

struct BackendState {
    calls: Vec<Call>,
    tables: BTreeMap<String, Vec<StoredRow>>,
    next_key: i64,
    fail_acquire: bool,
    fail_execute_on: Option<String>,
    omit_key_on: Option<String>,
    fail_rollback: bool,
    fail_release: bool,
}

/// In-memory backend that records every call and keeps committed rows per table.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                calls: Vec::new(),
                tables: BTreeMap::new(),
                next_key: 1,
                fail_acquire: false,
                fail_execute_on: None,
                omit_key_on: None,
                fail_rollback: false,
                fail_release: false,
            })),
        }
    }

    pub fn with_first_key(self, key: i64) -> Self {
        self.state.lock().next_key = key;
        self
    }

    pub fn failing_acquire(self) -> Self {
        self.state.lock().fail_acquire = true;
        self
    }

    pub fn failing_execute_on(self, table: &str) -> Self {
        self.state.lock().fail_execute_on = Some(table.to_string());
        self
    }

    pub fn omitting_key_on(self, table: &str) -> Self {
        self.state.lock().omit_key_on = Some(table.to_string());
        self
    }

    pub fn failing_rollback(self) -> Self {
        self.state.lock().fail_rollback = true;
        self
    }

    pub fn failing_release(self) -> Self {
        self.state.lock().fail_release = true;
        self
    }

    pub fn provider(&self) -> Arc<dyn ResourceProvider> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn open(&self) -> InsertResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Acquire);
        if state.fail_acquire {
            return Err(InsertError::Resource(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn insert_row(&self, table: &str, params: &[Value]) -> InsertResult<(StoredRow, bool)> {
        let mut state = self.state.lock();
        state.calls.push(Call::Execute(table.to_string()));
        if state.fail_execute_on.as_deref() == Some(table) {
            return Err(InsertError::Execution(sqlx::Error::Protocol(format!(
                "simulated failure inserting into {table}"
            ))));
        }
        let id = state.next_key;
        state.next_key += 1;
        let report_key = state.omit_key_on.as_deref() != Some(table);
        Ok((
            StoredRow {
                id,
                params: params.to_vec(),
            },
            report_key,
        ))
    }

    fn store(&self, rows: Vec<(String, StoredRow)>) {
        let mut state = self.state.lock();
        for (table, row) in rows {
            state.tables.entry(table).or_default().push(row);
        }
    }

    fn rollback_fails(&self) -> bool {
        self.state.lock().fail_rollback
    }

    fn release_fails(&self) -> bool {
        self.state.lock().fail_release
    }
}

#[async_trait]
impl ResourceProvider for MockBackend {
    async fn acquire(&self) -> InsertResult<Box<dyn TransactionalResource>> {
        self.open()?;
        Ok(Box::new(MockResource {
            backend: self.clone(),
            pending: Vec::new(),
            savepoints: Vec::new(),
            auto_commit: true,
            released: false,
        }))
    }
}

/// Resource handed out by [`MockBackend`]; rows stay pending until commit.
pub struct MockResource {
    backend: MockBackend,
    pending: Vec<(String, StoredRow)>,
    savepoints: Vec<(String, usize)>,
    auto_commit: bool,
    released: bool,
}

fn table_of(statement: &InsertStatement) -> String {
    statement
        .sql()
        .split_whitespace()
        .nth(2)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl TransactionalResource for MockResource {
    fn is_open(&self) -> bool {
        !self.released
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> InsertResult<()> {
        self.backend.record(Call::SetAutoCommit(auto_commit));
        self.auto_commit = auto_commit;
        if auto_commit {
            self.backend.store(std::mem::take(&mut self.pending));
        }
        Ok(())
    }

    async fn execute(&mut self, statement: &InsertStatement) -> InsertResult<ExecuteOutcome> {
        let table = table_of(statement);
        let (row, report_key) = self.backend.insert_row(&table, statement.params())?;
        let generated_keys = if report_key && statement.key_column().is_some() {
            vec![row.id]
        } else {
            Vec::new()
        };

        if self.auto_commit {
            self.backend.store(vec![(table, row)]);
        } else {
            self.pending.push((table, row));
        }
        Ok(ExecuteOutcome {
            rows_affected: 1,
            generated_keys,
        })
    }

    async fn commit(&mut self) -> InsertResult<()> {
        self.backend.record(Call::Commit);
        self.backend.store(std::mem::take(&mut self.pending));
        self.savepoints.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> InsertResult<()> {
        self.backend.record(Call::Rollback);
        if self.backend.rollback_fails() {
            return Err(InsertError::Execution(sqlx::Error::Protocol(
                "simulated rollback failure".to_string(),
            )));
        }
        self.pending.clear();
        self.savepoints.clear();
        Ok(())
    }

    async fn rollback_to(&mut self, savepoint: &Savepoint) -> InsertResult<()> {
        self.backend
            .record(Call::RollbackTo(savepoint.name().to_string()));
        let mark = self
            .savepoints
            .iter()
            .find(|(name, _)| name == savepoint.name())
            .map(|(_, mark)| *mark)
            .ok_or_else(|| {
                InsertError::Execution(sqlx::Error::Protocol(format!(
                    "unknown savepoint {}",
                    savepoint.name()
                )))
            })?;
        self.pending.truncate(mark);
        Ok(())
    }

    async fn create_savepoint(&mut self) -> InsertResult<Savepoint> {
        let name = format!("sp{}", self.savepoints.len() + 1);
        self.backend.record(Call::CreateSavepoint(name.clone()));
        self.savepoints.push((name.clone(), self.pending.len()));
        Ok(Savepoint::new(name))
    }

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> InsertResult<()> {
        self.backend
            .record(Call::ReleaseSavepoint(savepoint.name().to_string()));
        self.savepoints.retain(|(name, _)| name != savepoint.name());
        Ok(())
    }

    async fn release(&mut self) -> InsertResult<()> {
        self.backend.record(Call::Release);
        if self.released {
            return Err(InsertError::Resource(sqlx::Error::PoolClosed));
        }
        self.released = true;
        self.pending.clear();
        if self.backend.release_fails() {
            return Err(InsertError::Resource(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        if !self.released {
            self.pending.clear();
            self.backend.record(Call::Discard);
        }
    }
}

/// Error log that keeps every message it receives
#[derive(Default)]
pub struct RecordingErrorLog {
    entries: Mutex<Vec<String>>,
}

impl RecordingErrorLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.entries.lock().iter().any(|m| m == message)
    }
}

impl ErrorLog for RecordingErrorLog {
    fn error(&self, message: &str, _cause: &InsertError) {
        self.entries.lock().push(message.to_string());
    }
}
