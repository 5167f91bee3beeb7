use crate::model::{ChangePayload, Changeset, Edge, EdgeKey, Entity, EntityKind, Id, OnestopId};
use anyhow::Result;

/// Read-only access to changesets outside of any apply run
#[async_trait::async_trait]
pub trait ChangesetStore: Send + Sync {
    async fn get_changeset(&self, id: &Id) -> Result<Option<Changeset>>;
    async fn list_changesets(&self) -> Result<Vec<Changeset>>;
    /// Payloads of a changeset ordered by position
    async fn list_payloads(&self, changeset_id: &Id) -> Result<Vec<ChangePayload>>;
}

/// Read-only access to committed entities
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, onestop_id: &OnestopId) -> Result<Option<Entity>>;
    async fn list_edges_for(&self, onestop_id: &OnestopId) -> Result<Vec<Edge>>;
    async fn count_entities(&self, kind: Option<EntityKind>) -> Result<i64>;
}

/// Entity reads and writes inside an open transactional scope.
/// Reads observe the scope's own uncommitted writes.
#[async_trait::async_trait]
pub trait EntityScope: Send {
    /// Take the per-identifier write lock for the remainder of the scope
    async fn lock_onestop_id(&mut self, onestop_id: &OnestopId) -> Result<()>;
    async fn find_entity(&mut self, onestop_id: &OnestopId) -> Result<Option<Entity>>;
    async fn put_entity(&mut self, entity: &Entity) -> Result<()>;
    async fn delete_entity(&mut self, onestop_id: &OnestopId) -> Result<bool>;

    async fn find_edge(&mut self, key: &EdgeKey) -> Result<Option<Edge>>;
    async fn put_edge(&mut self, edge: &Edge) -> Result<()>;
    async fn delete_edge(&mut self, key: &EdgeKey) -> Result<bool>;
    /// Remove every edge with `onestop_id` at either end, returning the removed keys
    async fn delete_edges_touching(&mut self, onestop_id: &OnestopId) -> Result<Vec<EdgeKey>>;

    async fn retire_onestop_id(&mut self, onestop_id: &OnestopId) -> Result<()>;
    async fn is_retired(&mut self, onestop_id: &OnestopId) -> Result<bool>;
}

/// Changeset reads and writes inside an open transactional scope
#[async_trait::async_trait]
pub trait ChangesetScope: Send {
    /// Load a changeset and hold its row lock until the scope ends
    async fn lock_changeset(&mut self, id: &Id) -> Result<Option<Changeset>>;
    async fn scoped_payloads(&mut self, changeset_id: &Id) -> Result<Vec<ChangePayload>>;
    async fn insert_changeset(&mut self, changeset: &Changeset) -> Result<()>;
    async fn update_changeset(&mut self, changeset: &Changeset) -> Result<()>;
    async fn insert_payload(&mut self, payload: &ChangePayload) -> Result<()>;
}

/// An open transactional scope. Dropping it without `commit` discards every write.
#[async_trait::async_trait]
pub trait StoreTransaction: EntityScope + ChangesetScope + Send {
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TransactionalStore: Send + Sync {
    type Tx: StoreTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}

pub trait Store: ChangesetStore + EntityStore + TransactionalStore + Send + Sync {}
