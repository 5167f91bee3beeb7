use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{ChangePayload, Changeset, Edge, EdgeKey, Entity, EntityKind, Id, OnestopId};
use crate::store::traits::{
    ChangesetScope, ChangesetStore, EntityScope, EntityStore, Store, StoreTransaction,
    TransactionalStore,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    changesets: HashMap<Id, Changeset>,
    payloads: Vec<ChangePayload>,
    entities: BTreeMap<OnestopId, Entity>,
    edges: BTreeMap<EdgeKey, Edge>,
    retired: BTreeSet<OnestopId>,
}

impl MemoryState {
    fn payloads_for(&self, changeset_id: &Id) -> Vec<ChangePayload> {
        let mut payloads: Vec<ChangePayload> = self
            .payloads
            .iter()
            .filter(|p| &p.changeset_id == changeset_id)
            .cloned()
            .collect();
        payloads.sort_by_key(|p| (p.position, p.created_at));
        payloads
    }
}

/// Full committed entity graph, for comparing store states
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGraph {
    pub entities: Vec<Entity>,
    pub edges: Vec<Edge>,
    pub retired: Vec<OnestopId>,
}

/// In-process store. Transactions are serialized behind a single async mutex and
/// work on a private copy of the state that replaces the shared one on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entity_graph(&self) -> EntityGraph {
        let state = self.state.lock().await;
        EntityGraph {
            entities: state.entities.values().cloned().collect(),
            edges: state.edges.values().cloned().collect(),
            retired: state.retired.iter().cloned().collect(),
        }
    }

    pub async fn payload_count(&self) -> usize {
        self.state.lock().await.payloads.len()
    }
}

#[derive(Debug)]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait::async_trait]
impl TransactionalStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction { guard, working })
    }
}

#[async_trait::async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self) -> Result<()> {
        let MemoryTransaction { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl EntityScope for MemoryTransaction {
    async fn lock_onestop_id(&mut self, _onestop_id: &OnestopId) -> Result<()> {
        // The whole store is already exclusively held by this transaction
        Ok(())
    }

    async fn find_entity(&mut self, onestop_id: &OnestopId) -> Result<Option<Entity>> {
        Ok(self.working.entities.get(onestop_id).cloned())
    }

    async fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        self.working
            .entities
            .insert(entity.onestop_id().clone(), entity.clone());
        Ok(())
    }

    async fn delete_entity(&mut self, onestop_id: &OnestopId) -> Result<bool> {
        Ok(self.working.entities.remove(onestop_id).is_some())
    }

    async fn find_edge(&mut self, key: &EdgeKey) -> Result<Option<Edge>> {
        Ok(self.working.edges.get(key).cloned())
    }

    async fn put_edge(&mut self, edge: &Edge) -> Result<()> {
        self.working.edges.insert(edge.key.clone(), edge.clone());
        Ok(())
    }

    async fn delete_edge(&mut self, key: &EdgeKey) -> Result<bool> {
        Ok(self.working.edges.remove(key).is_some())
    }

    async fn delete_edges_touching(&mut self, onestop_id: &OnestopId) -> Result<Vec<EdgeKey>> {
        let keys: Vec<EdgeKey> = self
            .working
            .edges
            .keys()
            .filter(|key| key.touches(onestop_id))
            .cloned()
            .collect();
        for key in &keys {
            self.working.edges.remove(key);
        }
        Ok(keys)
    }

    async fn retire_onestop_id(&mut self, onestop_id: &OnestopId) -> Result<()> {
        self.working.retired.insert(onestop_id.clone());
        Ok(())
    }

    async fn is_retired(&mut self, onestop_id: &OnestopId) -> Result<bool> {
        Ok(self.working.retired.contains(onestop_id))
    }
}

#[async_trait::async_trait]
impl ChangesetScope for MemoryTransaction {
    async fn lock_changeset(&mut self, id: &Id) -> Result<Option<Changeset>> {
        Ok(self.working.changesets.get(id).cloned())
    }

    async fn scoped_payloads(&mut self, changeset_id: &Id) -> Result<Vec<ChangePayload>> {
        Ok(self.working.payloads_for(changeset_id))
    }

    async fn insert_changeset(&mut self, changeset: &Changeset) -> Result<()> {
        if self.working.changesets.contains_key(&changeset.id) {
            return Err(anyhow!("Changeset already exists: {}", changeset.id));
        }
        self.working
            .changesets
            .insert(changeset.id.clone(), changeset.clone());
        Ok(())
    }

    async fn update_changeset(&mut self, changeset: &Changeset) -> Result<()> {
        let existing = self
            .working
            .changesets
            .get_mut(&changeset.id)
            .ok_or_else(|| anyhow!("Changeset not found: {}", changeset.id))?;
        *existing = changeset.clone();
        Ok(())
    }

    async fn insert_payload(&mut self, payload: &ChangePayload) -> Result<()> {
        if !self.working.changesets.contains_key(&payload.changeset_id) {
            return Err(anyhow!(
                "Cannot attach payload to unknown changeset: {}",
                payload.changeset_id
            ));
        }
        self.working.payloads.push(payload.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChangesetStore for MemoryStore {
    async fn get_changeset(&self, id: &Id) -> Result<Option<Changeset>> {
        Ok(self.state.lock().await.changesets.get(id).cloned())
    }

    async fn list_changesets(&self) -> Result<Vec<Changeset>> {
        let state = self.state.lock().await;
        let mut changesets: Vec<Changeset> = state.changesets.values().cloned().collect();
        changesets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(changesets)
    }

    async fn list_payloads(&self, changeset_id: &Id) -> Result<Vec<ChangePayload>> {
        Ok(self.state.lock().await.payloads_for(changeset_id))
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn get_entity(&self, onestop_id: &OnestopId) -> Result<Option<Entity>> {
        Ok(self.state.lock().await.entities.get(onestop_id).cloned())
    }

    async fn list_edges_for(&self, onestop_id: &OnestopId) -> Result<Vec<Edge>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .values()
            .filter(|edge| edge.key.touches(onestop_id))
            .cloned()
            .collect())
    }

    async fn count_entities(&self, kind: Option<EntityKind>) -> Result<i64> {
        let state = self.state.lock().await;
        let count = state
            .entities
            .values()
            .filter(|entity| kind.map_or(true, |k| entity.kind() == k))
            .count();
        Ok(count as i64)
    }
}

impl Store for MemoryStore {}
