//! Hierarchical Insert Module
//!
//! This module writes a root entity and the entities it owns as one unit of work.
//! The root's generated key is recovered and handed to its children, and a failure
//! anywhere in the tree is undone either fully or back to a savepoint taken after
//! the root row.

pub mod children;
pub mod config;
pub mod entity;
pub mod error;
pub mod error_log;
pub mod postgres;
pub mod repository;
pub mod resource;
pub mod statement;

pub use children::{ChildInserter, NoChildren};
pub use config::{ConfigError, RepositoryConfig, RollbackPolicy, ROLLBACK_POLICY_ENV};
pub use entity::{Identifiable, NO_PARENT};
pub use error::{InsertError, InsertResult};
pub use error_log::{ErrorLog, SilentErrorLog, TracingErrorLog};
pub use postgres::{PgResource, PgResourceProvider};
pub use repository::{EntityRepository, OrphanedRoot};
pub use resource::{ExecuteOutcome, ResourceProvider, Savepoint, TransactionalResource};
pub use statement::{InsertStatement, StatementBuilder, Value};
