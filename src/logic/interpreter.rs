use log::debug;
use serde::Serialize;

use crate::logic::error::RepositoryError;
use crate::logic::repository::{EntityRepository, Upsert};
use crate::model::{
    Change, ChangeAction, ChangeTarget, EdgeKey, EdgeKind, OnestopId, RouteChange, StopChange, Tags,
};
use crate::store::traits::EntityScope;

/// What a run did to the dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeEffects {
    pub created: Vec<OnestopId>,
    pub updated: Vec<OnestopId>,
    pub destroyed: Vec<OnestopId>,
    pub linked: Vec<EdgeKey>,
    pub unlinked: Vec<EdgeKey>,
}

impl ChangeEffects {
    pub fn merge(&mut self, other: ChangeEffects) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.destroyed.extend(other.destroyed);
        self.linked.extend(other.linked);
        self.unlinked.extend(other.unlinked);
    }

    fn record(&mut self, upsert: &Upsert) {
        match upsert {
            Upsert::Created(entity) => self.created.push(entity.onestop_id().clone()),
            Upsert::Updated(entity) => self.updated.push(entity.onestop_id().clone()),
        }
    }
}

/// Executes one change against a scope.
///
/// A `createUpdate` upserts the entity first, then walks its nested relationship
/// lists in declaration order. A `destroy` removes the entity and every edge touching it.
pub struct ChangeInterpreter<'s, T> {
    repository: EntityRepository<'s, T>,
}

impl<'s, T: EntityScope> ChangeInterpreter<'s, T> {
    pub fn new(scope: &'s mut T) -> Self {
        Self {
            repository: EntityRepository::new(scope),
        }
    }

    pub async fn execute(&mut self, change: &Change) -> Result<ChangeEffects, RepositoryError> {
        debug!("Executing {} {}", change.action, change.onestop_id());
        match change.action {
            ChangeAction::CreateUpdate => self.create_update(&change.target).await,
            ChangeAction::Destroy => self.destroy(&change.target).await,
        }
    }

    async fn create_update(&mut self, target: &ChangeTarget) -> Result<ChangeEffects, RepositoryError> {
        let mut effects = ChangeEffects::default();
        match target {
            ChangeTarget::Stop(stop) => {
                let upsert = self.repository.create_or_update_stop(stop).await?;
                effects.record(&upsert);
                self.stop_relationships(stop, &mut effects).await?;
            }
            ChangeTarget::Operator(operator) => {
                let upsert = self.repository.create_or_update_operator(operator).await?;
                effects.record(&upsert);
            }
            ChangeTarget::Route(route) => {
                let upsert = self.repository.create_or_update_route(route).await?;
                effects.record(&upsert);
                self.route_relationships(route, &mut effects).await?;
            }
        }
        Ok(effects)
    }

    async fn destroy(&mut self, target: &ChangeTarget) -> Result<ChangeEffects, RepositoryError> {
        let destroyed = self
            .repository
            .destroy(target.onestop_id(), target.kind())
            .await?;

        Ok(ChangeEffects {
            destroyed: vec![destroyed.entity.onestop_id().clone()],
            unlinked: destroyed.unlinked,
            ..Default::default()
        })
    }

    async fn stop_relationships(
        &mut self,
        stop: &StopChange,
        effects: &mut ChangeEffects,
    ) -> Result<(), RepositoryError> {
        for serving in &stop.operators_serving_stop {
            self.relate(
                serving.action,
                EdgeKind::OperatorServingStop,
                &stop.onestop_id,
                &serving.operator_onestop_id,
                serving.tags.as_ref(),
                effects,
            )
            .await?;
        }
        for serving in &stop.routes_serving_stop {
            self.relate(
                serving.action,
                EdgeKind::RouteServingStop,
                &stop.onestop_id,
                &serving.route_onestop_id,
                serving.tags.as_ref(),
                effects,
            )
            .await?;
        }
        Ok(())
    }

    async fn route_relationships(
        &mut self,
        route: &RouteChange,
        effects: &mut ChangeEffects,
    ) -> Result<(), RepositoryError> {
        if let Some(operator) = &route.operated_by_onestop_id {
            self.relate(
                ChangeAction::CreateUpdate,
                EdgeKind::RouteOperatedBy,
                &route.onestop_id,
                operator,
                None,
                effects,
            )
            .await?;
        }
        Ok(())
    }

    async fn relate(
        &mut self,
        action: ChangeAction,
        kind: EdgeKind,
        from: &OnestopId,
        to: &OnestopId,
        tags: Option<&Tags>,
        effects: &mut ChangeEffects,
    ) -> Result<(), RepositoryError> {
        match action {
            ChangeAction::CreateUpdate => {
                let key = self.repository.link(kind, from, to, tags).await?;
                effects.linked.push(key);
            }
            ChangeAction::Destroy => {
                if let Some(key) = self.repository.unlink(kind, from, to).await? {
                    effects.unlinked.push(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::error::FailureCause;
    use crate::model::PayloadBody;
    use crate::store::{MemoryStore, TransactionalStore};
    use serde_json::json;

    fn changes(value: serde_json::Value) -> Vec<Change> {
        PayloadBody::from_value(value).unwrap().changes
    }

    #[tokio::test]
    async fn test_create_update_walks_nested_relationships() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut interpreter = ChangeInterpreter::new(&mut tx);

        let batch = changes(json!({"changes": [
            {"action": "createUpdate", "operator": {"onestopId": "o-9q8y-SFMTA", "name": "SFMTA"}},
            {"action": "createUpdate", "route": {
                "onestopId": "r-9q8y-N", "name": "N Judah", "operatedByOnestopId": "o-9q8y-SFMTA"
            }},
            {"action": "createUpdate", "stop": {
                "onestopId": "s-9q8yt4b-1AvHoS",
                "name": "1st Ave. & Holloway Street",
                "operatorsServingStop": [{"operatorOnestopId": "o-9q8y-SFMTA"}],
                "routesServingStop": [{"routeOnestopId": "r-9q8y-N"}]
            }}
        ]}));

        let mut effects = ChangeEffects::default();
        for change in &batch {
            effects.merge(interpreter.execute(change).await.unwrap());
        }

        assert_eq!(effects.created.len(), 3);
        assert_eq!(effects.linked.len(), 3);
        assert_eq!(effects.linked[0].kind, EdgeKind::RouteOperatedBy);
        assert_eq!(effects.linked[1].kind, EdgeKind::OperatorServingStop);
        assert_eq!(effects.linked[2].kind, EdgeKind::RouteServingStop);
    }

    #[tokio::test]
    async fn test_nested_destroy_unlinks() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut interpreter = ChangeInterpreter::new(&mut tx);

        let batch = changes(json!({"changes": [
            {"action": "createUpdate", "operator": {"onestopId": "o-9q8y-SFMTA", "name": "SFMTA"}},
            {"action": "createUpdate", "stop": {
                "onestopId": "s-9q8yt4b-1AvHoS",
                "name": "Holloway",
                "operatorsServingStop": [{"operatorOnestopId": "o-9q8y-SFMTA"}]
            }},
            {"action": "createUpdate", "stop": {
                "onestopId": "s-9q8yt4b-1AvHoS",
                "operatorsServingStop": [{"operatorOnestopId": "o-9q8y-SFMTA", "action": "destroy"}]
            }}
        ]}));

        let mut effects = ChangeEffects::default();
        for change in &batch {
            effects.merge(interpreter.execute(change).await.unwrap());
        }
        assert_eq!(effects.linked.len(), 1);
        assert_eq!(effects.unlinked, effects.linked);
        assert_eq!(effects.updated.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_reference_to_missing_entity_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut interpreter = ChangeInterpreter::new(&mut tx);

        let batch = changes(json!({"changes": [{"action": "createUpdate", "stop": {
            "onestopId": "s-9q8yt4b-1AvHoS",
            "name": "Holloway",
            "operatorsServingStop": [{"operatorOnestopId": "o-9q8y-SFMTA"}]
        }}]}));

        let err = interpreter.execute(&batch[0]).await.unwrap_err();
        match err {
            RepositoryError::Failed(FailureCause::UnresolvedIdentifier { onestop_id, .. }) => {
                assert_eq!(onestop_id.as_str(), "o-9q8y-SFMTA");
            }
            other => panic!("expected unresolved identifier, got {:?}", other),
        }
    }
}
