use anyhow::Result;

use crate::model::{Entity, EntityKind, OnestopId};
use crate::store::traits::EntityScope;

/// Resolves Onestop IDs to the entities they denote within one transactional scope.
///
/// Resolution reads through the scope, so an entity created earlier in the same run
/// is visible before the scope commits. Every identifier that passes through here is
/// write-locked for the rest of the scope.
pub struct IdentifierRegistry<'s, T> {
    scope: &'s mut T,
}

impl<'s, T: EntityScope> IdentifierRegistry<'s, T> {
    pub fn new(scope: &'s mut T) -> Self {
        Self { scope }
    }

    /// `Ok(None)` means the identifier denotes nothing right now
    pub async fn resolve(&mut self, onestop_id: &OnestopId) -> Result<Option<Entity>> {
        self.scope.lock_onestop_id(onestop_id).await?;
        self.scope.find_entity(onestop_id).await
    }

    /// Resolve, treating an entity of another kind as absent
    pub async fn resolve_kind(
        &mut self,
        onestop_id: &OnestopId,
        kind: EntityKind,
    ) -> Result<Option<Entity>> {
        Ok(self
            .resolve(onestop_id)
            .await?
            .filter(|entity| entity.kind() == kind))
    }

    pub async fn is_retired(&mut self, onestop_id: &OnestopId) -> Result<bool> {
        self.scope.is_retired(onestop_id).await
    }

    pub fn scope(&mut self) -> &mut T {
        &mut *self.scope
    }
}
