use async_trait::async_trait;

use crate::{InsertResult, InsertStatement};

/// Supplies one transactional resource per insert call.
///
/// The provider is the factory half of the unit of work: every call to
/// [`acquire`](ResourceProvider::acquire) yields a fresh resource that is
/// owned by exactly one in-flight insert.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Acquire a resource. Failures are reported as
    /// [`InsertError::Resource`](crate::InsertError::Resource).
    async fn acquire(&self) -> InsertResult<Box<dyn TransactionalResource>>;
}

/// Marker for a point inside a transaction that can be rolled back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What the backend reported for one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    pub generated_keys: Vec<i64>,
}

/// A live, exclusively owned handle to a storage backend.
///
/// Implementations must discard any uncommitted work and give the underlying
/// connection back when dropped without a call to
/// [`release`](TransactionalResource::release). The repository relies on this
/// when an [`OrphanedRoot`](crate::OrphanedRoot) is dropped undecided: that
/// path never calls `release`.
#[async_trait]
pub trait TransactionalResource: Send {
    /// Whether the handle can still run statements.
    fn is_open(&self) -> bool;

    /// Switch between autocommit and explicit-commit mode.
    async fn set_auto_commit(&mut self, auto_commit: bool) -> InsertResult<()>;

    /// Execute an insert and report the generated keys, if requested.
    async fn execute(&mut self, statement: &InsertStatement) -> InsertResult<ExecuteOutcome>;

    async fn commit(&mut self) -> InsertResult<()>;

    /// Roll back the whole transaction.
    async fn rollback(&mut self) -> InsertResult<()>;

    /// Roll back work done after `savepoint`, keeping the transaction open.
    async fn rollback_to(&mut self, savepoint: &Savepoint) -> InsertResult<()>;

    async fn create_savepoint(&mut self) -> InsertResult<Savepoint>;

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> InsertResult<()>;

    /// Give the resource back to its provider. Called once per acquisition.
    async fn release(&mut self) -> InsertResult<()>;
}
