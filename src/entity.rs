/// Parent id passed for root entities that have no owning row.
pub const NO_PARENT: i64 = 0;

/// Capability of a domain object that receives a backend-generated surrogate id.
///
/// The id is `None` until the row is persisted. The repository assigns it once,
/// with the key the backend reported, and clears it again if the surrounding
/// insert fails.
pub trait Identifiable: Send {
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: Option<i64>);
}
