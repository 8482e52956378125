use async_trait::async_trait;

use crate::{InsertResult, TransactionalResource};

/// Inserts the children owned by an entity.
///
/// Called after the parent's id has been assigned, with the parent's own
/// resource. Implementations insert each child through an
/// [`EntityRepository::insert_in`](crate::EntityRepository::insert_in) for the
/// child type, passing the parent id along, and must never commit, roll back
/// or release the resource themselves.
#[async_trait]
pub trait ChildInserter<E: Send>: Send + Sync {
    async fn insert_children(
        &self,
        resource: &mut dyn TransactionalResource,
        parent: &mut E,
    ) -> InsertResult<()>;

    /// Clear the ids of every child of `parent` after their rows were rolled
    /// back. Implementations hand each child to
    /// [`EntityRepository::forget`](crate::EntityRepository::forget) so the
    /// whole subtree can be inserted again.
    fn forget_children(&self, _parent: &mut E) {}
}

/// Child hook for entities that own nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChildren;

#[async_trait]
impl<E: Send> ChildInserter<E> for NoChildren {
    async fn insert_children(
        &self,
        _resource: &mut dyn TransactionalResource,
        _parent: &mut E,
    ) -> InsertResult<()> {
        Ok(())
    }
}
