/// Error type for hierarchical insert operations
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("Transactional resource unavailable: {0}")]
    Resource(#[source] sqlx::Error),

    #[error("Invalid insert statement: {0}")]
    Statement(String),

    #[error("Insert execution failed: {0}")]
    Execution(#[source] sqlx::Error),

    #[error("Generated key retrieval failed: {0}")]
    KeyRetrieval(String),

    /// A child insert failed under the savepoint policy. Child work has been
    /// rolled back; the root row is still pending in `orphan`.
    #[error("Child insertion failed, root row {root_id} awaits commit or rollback: {source}")]
    RootOrphaned {
        root_id: i64,
        source: Box<InsertError>,
        orphan: crate::OrphanedRoot,
    },
}

impl InsertError {
    /// The failure that caused this error, looking through `RootOrphaned`.
    pub fn root_cause(&self) -> &InsertError {
        match self {
            InsertError::RootOrphaned { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Splits a `RootOrphaned` error into the original cause and the pending
    /// root row. Other variants yield `None` for the handle.
    pub fn into_orphaned_root(self) -> (InsertError, Option<crate::OrphanedRoot>) {
        match self {
            InsertError::RootOrphaned { source, orphan, .. } => (*source, Some(orphan)),
            other => (other, None),
        }
    }
}

/// Result type for insert operations
pub type InsertResult<T> = Result<T, InsertError>;
