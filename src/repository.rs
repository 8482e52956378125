use std::fmt;
use std::sync::Arc;

use crate::{
    ChildInserter, ErrorLog, Identifiable, InsertError, InsertResult, InsertStatement, NoChildren,
    RepositoryConfig, ResourceProvider, RollbackPolicy, SilentErrorLog, StatementBuilder,
    TransactionalResource,
};

/// Inserts an entity and everything it owns as one unit of work.
///
/// A repository is configured once per entity type with a resource provider,
/// a statement builder and optionally a child hook, then shared freely: it
/// holds no per-call state.
///
/// Root inserts go through [`insert`](EntityRepository::insert), which owns the
/// transaction. Child hooks call [`insert_in`](EntityRepository::insert_in) on
/// the repository of the child type so the whole tree lands in the root's
/// transaction. A child repository therefore needs no provider.
pub struct EntityRepository<E: Identifiable> {
    provider: Option<Arc<dyn ResourceProvider>>,
    statements: Option<Arc<dyn StatementBuilder<E>>>,
    children: Arc<dyn ChildInserter<E>>,
    error_log: Arc<dyn ErrorLog>,
    config: RepositoryConfig,
}

/// How a root transaction ended when it did not commit.
enum Aborted {
    /// Nothing of this call survives (or nothing was written).
    Failed(InsertError),
    /// Children were rolled back to the savepoint; the root row is pending.
    Orphaned { root_id: i64, cause: InsertError },
}

impl<E: Identifiable> EntityRepository<E> {
    pub fn new(config: RepositoryConfig) -> Self {
        Self {
            provider: None,
            statements: None,
            children: Arc::new(NoChildren),
            error_log: Arc::new(SilentErrorLog),
            config,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_statements(mut self, statements: impl StatementBuilder<E> + 'static) -> Self {
        self.statements = Some(Arc::new(statements));
        self
    }

    pub fn with_children(mut self, children: impl ChildInserter<E> + 'static) -> Self {
        self.children = Arc::new(children);
        self
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Insert `entity` and its children in a fresh transaction.
    ///
    /// On success the entity carries the generated key and everything is
    /// committed. On failure no id in the tree stays set and the work is
    /// undone according to the configured [`RollbackPolicy`]. Under
    /// [`RollbackPolicy::Savepoint`] a child failure yields
    /// [`InsertError::RootOrphaned`], whose handle must be committed or
    /// rolled back by the caller; committing assigns the root id.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(parent_id = parent_id, policy = %self.config.rollback_policy)
    )]
    pub async fn insert(&self, entity: &mut E, parent_id: i64) -> InsertResult<()> {
        let provider = match self.provider.as_deref() {
            Some(provider) => provider,
            None => {
                let err = InsertError::Statement("no resource provider configured".to_string());
                return Err(self.report("Cannot start SQL insert", err));
            }
        };
        let statements = self
            .statement_builder()
            .map_err(|err| self.report("Cannot start SQL insert", err))?;
        Self::ensure_unidentified(entity).map_err(|err| self.report("Cannot start SQL insert", err))?;

        let mut resource = provider
            .acquire()
            .await
            .map_err(|err| self.report("Failed to acquire transactional resource", err))?;
        tracing::trace!("resource acquired");

        match self
            .transact(resource.as_mut(), statements, entity, parent_id)
            .await
        {
            Ok(()) => {
                resource
                    .release()
                    .await
                    .map_err(|err| self.report("Failed to release transactional resource", err))?;
                Ok(())
            }
            Err(Aborted::Failed(cause)) => {
                if let Err(err) = resource.release().await {
                    self.error_log
                        .error("Failed to release transactional resource", &err);
                }
                Err(cause)
            }
            Err(Aborted::Orphaned { root_id, cause }) => Err(InsertError::RootOrphaned {
                root_id,
                source: Box::new(cause),
                orphan: OrphanedRoot::new(root_id, resource, self.error_log.clone()),
            }),
        }
    }

    /// Insert `entity` and its children inside the caller's transaction.
    ///
    /// Never acquires, commits, rolls back or releases `resource`. If the
    /// entity's children fail, the ids of the entity and its whole subtree are
    /// cleared again before the error is returned.
    pub async fn insert_in(
        &self,
        resource: &mut dyn TransactionalResource,
        entity: &mut E,
        parent_id: i64,
    ) -> InsertResult<()> {
        let statements = self.statement_builder()?;
        Self::ensure_unidentified(entity)?;
        let statement = Self::prepare(&*resource, statements, entity, parent_id)?;

        let id = Self::write_row(resource, &statement).await?;
        tracing::trace!(id, parent_id, "child row keyed");
        entity.set_id(Some(id));

        if let Err(err) = self.children.insert_children(resource, entity).await {
            self.forget(entity);
            return Err(err);
        }
        Ok(())
    }

    /// Clear the id of `entity` and of every child beneath it.
    ///
    /// Used whenever the rows keyed during a call are rolled back, so the same
    /// tree can be inserted again.
    pub fn forget(&self, entity: &mut E) {
        entity.set_id(None);
        self.children.forget_children(entity);
    }

    async fn transact(
        &self,
        resource: &mut dyn TransactionalResource,
        statements: &dyn StatementBuilder<E>,
        entity: &mut E,
        parent_id: i64,
    ) -> Result<(), Aborted> {
        if !resource.is_open() {
            let err = InsertError::Statement("transactional resource is closed".to_string());
            return Err(Aborted::Failed(self.report("Cannot start SQL insert", err)));
        }
        if let Err(err) = resource.set_auto_commit(false).await {
            return Err(Aborted::Failed(self.report("Failed to disable autocommit", err)));
        }
        let statement = Self::prepare(&*resource, statements, entity, parent_id)
            .map_err(|err| Aborted::Failed(self.report("Failed to build SQL insert", err)))?;

        let root_id = match Self::write_row(resource, &statement).await {
            Ok(id) => id,
            Err(err) => {
                let err = self.report("Failed to execute SQL insert", err);
                self.rollback_all(resource).await;
                return Err(Aborted::Failed(err));
            }
        };
        tracing::debug!(id = root_id, "root row keyed");

        let savepoint = match self.config.rollback_policy {
            RollbackPolicy::Full => None,
            RollbackPolicy::Savepoint => match resource.create_savepoint().await {
                Ok(savepoint) => Some(savepoint),
                Err(err) => {
                    let err = self.report("Failed to create savepoint", err);
                    self.rollback_all(resource).await;
                    return Err(Aborted::Failed(err));
                }
            },
        };

        entity.set_id(Some(root_id));
        if let Err(err) = self.children.insert_children(resource, entity).await {
            self.forget(entity);
            let err = self.report("Failed to insert child rows", err);
            let Some(savepoint) = savepoint else {
                self.rollback_all(resource).await;
                return Err(Aborted::Failed(err));
            };
            return match resource.rollback_to(&savepoint).await {
                Ok(()) => {
                    tracing::debug!(savepoint = savepoint.name(), "rolled back to savepoint");
                    Err(Aborted::Orphaned { root_id, cause: err })
                }
                Err(rollback_err) => {
                    self.error_log
                        .error("Failed to roll back to savepoint", &rollback_err);
                    self.rollback_all(resource).await;
                    Err(Aborted::Failed(err))
                }
            };
        }

        if let Some(savepoint) = savepoint {
            if let Err(err) = resource.release_savepoint(&savepoint).await {
                self.forget(entity);
                let err = self.report("Failed to release savepoint", err);
                self.rollback_all(resource).await;
                return Err(Aborted::Failed(err));
            }
        }

        if let Err(err) = resource.commit().await {
            self.forget(entity);
            let err = self.report("Failed to commit SQL insert", err);
            self.rollback_all(resource).await;
            return Err(Aborted::Failed(err));
        }
        tracing::debug!(id = root_id, "committed");
        Ok(())
    }

    fn statement_builder(&self) -> InsertResult<&dyn StatementBuilder<E>> {
        self.statements
            .as_deref()
            .ok_or_else(|| InsertError::Statement("no statement builder configured".to_string()))
    }

    fn ensure_unidentified(entity: &E) -> InsertResult<()> {
        match entity.id() {
            Some(id) => Err(InsertError::Statement(format!(
                "entity already persisted with id {id}"
            ))),
            None => Ok(()),
        }
    }

    fn prepare(
        resource: &dyn TransactionalResource,
        statements: &dyn StatementBuilder<E>,
        entity: &E,
        parent_id: i64,
    ) -> InsertResult<InsertStatement> {
        if !resource.is_open() {
            return Err(InsertError::Statement(
                "transactional resource is closed".to_string(),
            ));
        }
        statements.build(entity, parent_id)
    }

    /// Executes one insert and returns the single key the backend generated.
    async fn write_row(
        resource: &mut dyn TransactionalResource,
        statement: &InsertStatement,
    ) -> InsertResult<i64> {
        let outcome = resource.execute(statement).await?;
        match outcome.generated_keys.as_slice() {
            [key] => Ok(*key),
            [] => Err(InsertError::KeyRetrieval(format!(
                "no generated key reported for `{}`",
                statement.sql()
            ))),
            keys => Err(InsertError::KeyRetrieval(format!(
                "expected one generated key, backend reported {}",
                keys.len()
            ))),
        }
    }

    async fn rollback_all(&self, resource: &mut dyn TransactionalResource) {
        match resource.rollback().await {
            Ok(()) => tracing::debug!("transaction rolled back"),
            Err(err) => self.error_log.error("Failed to roll back SQL insert", &err),
        }
    }

    fn report(&self, message: &str, err: InsertError) -> InsertError {
        self.error_log.error(message, &err);
        err
    }
}

impl<E: Identifiable> Clone for EntityRepository<E> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            statements: self.statements.clone(),
            children: self.children.clone(),
            error_log: self.error_log.clone(),
            config: self.config,
        }
    }
}

impl<E: Identifiable> fmt::Debug for EntityRepository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("has_provider", &self.provider.is_some())
            .field("has_statements", &self.statements.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// A root row whose children were rolled back to the savepoint.
///
/// The transaction is still open. [`commit`](OrphanedRoot::commit) keeps the
/// root row without children, [`rollback`](OrphanedRoot::rollback) discards
/// it. Both release the resource. Dropping the handle without deciding drops
/// the resource unreleased; per the [`TransactionalResource`] contract that
/// discards the uncommitted root row.
pub struct OrphanedRoot {
    root_id: i64,
    resource: Option<Box<dyn TransactionalResource>>,
    error_log: Arc<dyn ErrorLog>,
}

impl OrphanedRoot {
    fn new(
        root_id: i64,
        resource: Box<dyn TransactionalResource>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self {
            root_id,
            resource: Some(resource),
            error_log,
        }
    }

    /// Key of the pending root row.
    pub fn root_id(&self) -> i64 {
        self.root_id
    }

    /// Commit the root row without its children and assign its id to `root`.
    /// Returns the root id.
    pub async fn commit<E: Identifiable>(mut self, root: &mut E) -> InsertResult<i64> {
        let mut resource = self.take_resource()?;

        if let Err(err) = resource.commit().await {
            self.error_log.error("Failed to commit orphaned root row", &err);
            if let Err(rollback_err) = resource.rollback().await {
                self.error_log
                    .error("Failed to roll back orphaned root row", &rollback_err);
            }
            if let Err(release_err) = resource.release().await {
                self.error_log
                    .error("Failed to release transactional resource", &release_err);
            }
            return Err(err);
        }
        tracing::debug!(id = self.root_id, "orphaned root row committed");
        root.set_id(Some(self.root_id));

        if let Err(err) = resource.release().await {
            self.error_log
                .error("Failed to release transactional resource", &err);
            return Err(err);
        }
        Ok(self.root_id)
    }

    /// Discard the root row.
    pub async fn rollback(mut self) -> InsertResult<()> {
        let mut resource = self.take_resource()?;

        let rolled_back = resource.rollback().await;
        match &rolled_back {
            Ok(()) => tracing::debug!(id = self.root_id, "orphaned root row rolled back"),
            Err(err) => self.error_log.error("Failed to roll back orphaned root row", err),
        }

        if let Err(err) = resource.release().await {
            self.error_log
                .error("Failed to release transactional resource", &err);
            if rolled_back.is_ok() {
                return Err(err);
            }
        }
        rolled_back
    }

    fn take_resource(&mut self) -> InsertResult<Box<dyn TransactionalResource>> {
        self.resource
            .take()
            .ok_or(InsertError::Resource(sqlx::Error::PoolClosed))
    }
}

impl fmt::Debug for OrphanedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrphanedRoot")
            .field("root_id", &self.root_id)
            .field("pending", &self.resource.is_some())
            .finish()
    }
}

impl Drop for OrphanedRoot {
    fn drop(&mut self) {
        if self.resource.is_some() {
            tracing::warn!(
                id = self.root_id,
                "orphaned root row dropped without commit or rollback, discarding it"
            );
        }
    }
}
