use chrono::Utc;

use crate::logic::error::RepositoryError;
use crate::logic::registry::IdentifierRegistry;
use crate::logic::validate::{EntityValidator, ValidationError};
use crate::model::{
    Edge, EdgeKey, EdgeKind, Entity, EntityKind, OnestopId, Operator, OperatorChange, Route,
    RouteChange, Stop, StopChange, Tags,
};
use crate::store::traits::EntityScope;

/// Result of an upsert
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Created(Entity),
    Updated(Entity),
}

/// Result of a destroy: the removed entity and the edges that would have dangled
#[derive(Debug, Clone, PartialEq)]
pub struct Destroyed {
    pub entity: Entity,
    pub unlinked: Vec<EdgeKey>,
}

/// Per-kind entity writes against a transactional scope
pub struct EntityRepository<'s, T> {
    registry: IdentifierRegistry<'s, T>,
}

impl<'s, T: EntityScope> EntityRepository<'s, T> {
    pub fn new(scope: &'s mut T) -> Self {
        Self {
            registry: IdentifierRegistry::new(scope),
        }
    }

    pub async fn create_or_update_stop(
        &mut self,
        change: &StopChange,
    ) -> Result<Upsert, RepositoryError> {
        let now = Utc::now();
        let (mut stop, created) = match self.existing(&change.onestop_id, EntityKind::Stop).await? {
            Some(Entity::Stop(stop)) => (stop, false),
            _ => (
                Stop {
                    onestop_id: change.onestop_id.clone(),
                    name: String::new(),
                    geometry: None,
                    timezone: None,
                    tags: Tags::new(),
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        if let Some(name) = &change.name {
            stop.name = name.clone();
        }
        if let Some(geometry) = &change.geometry {
            stop.geometry = Some(geometry.clone());
        }
        if let Some(timezone) = &change.timezone {
            stop.timezone = Some(timezone.clone());
        }
        merge_tags(&mut stop.tags, change.tags.as_ref());
        stop.updated_at = now;

        self.persist(Entity::Stop(stop), created).await
    }

    pub async fn create_or_update_operator(
        &mut self,
        change: &OperatorChange,
    ) -> Result<Upsert, RepositoryError> {
        let now = Utc::now();
        let (mut operator, created) =
            match self.existing(&change.onestop_id, EntityKind::Operator).await? {
                Some(Entity::Operator(operator)) => (operator, false),
                _ => (
                    Operator {
                        onestop_id: change.onestop_id.clone(),
                        name: String::new(),
                        geometry: None,
                        website: None,
                        timezone: None,
                        tags: Tags::new(),
                        created_at: now,
                        updated_at: now,
                    },
                    true,
                ),
            };

        if let Some(name) = &change.name {
            operator.name = name.clone();
        }
        if let Some(geometry) = &change.geometry {
            operator.geometry = Some(geometry.clone());
        }
        if let Some(website) = &change.website {
            operator.website = Some(website.clone());
        }
        if let Some(timezone) = &change.timezone {
            operator.timezone = Some(timezone.clone());
        }
        merge_tags(&mut operator.tags, change.tags.as_ref());
        operator.updated_at = now;

        self.persist(Entity::Operator(operator), created).await
    }

    pub async fn create_or_update_route(
        &mut self,
        change: &RouteChange,
    ) -> Result<Upsert, RepositoryError> {
        let now = Utc::now();
        let (mut route, created) = match self.existing(&change.onestop_id, EntityKind::Route).await? {
            Some(Entity::Route(route)) => (route, false),
            _ => (
                Route {
                    onestop_id: change.onestop_id.clone(),
                    name: String::new(),
                    vehicle_type: None,
                    tags: Tags::new(),
                    created_at: now,
                    updated_at: now,
                },
                true,
            ),
        };

        if let Some(name) = &change.name {
            route.name = name.clone();
        }
        if let Some(vehicle_type) = &change.vehicle_type {
            route.vehicle_type = Some(vehicle_type.clone());
        }
        merge_tags(&mut route.tags, change.tags.as_ref());
        route.updated_at = now;

        self.persist(Entity::Route(route), created).await
    }

    /// Remove an entity, the edges touching it, and retire its identifier
    pub async fn destroy(
        &mut self,
        onestop_id: &OnestopId,
        kind: EntityKind,
    ) -> Result<Destroyed, RepositoryError> {
        let entity = self
            .registry
            .resolve_kind(onestop_id, kind)
            .await?
            .ok_or_else(|| RepositoryError::not_found(onestop_id))?;

        let scope = self.registry.scope();
        let unlinked = scope.delete_edges_touching(onestop_id).await?;
        scope.delete_entity(onestop_id).await?;
        scope.retire_onestop_id(onestop_id).await?;

        Ok(Destroyed { entity, unlinked })
    }

    /// Create or update the edge `kind(from -> to)`; both endpoints must resolve
    pub async fn link(
        &mut self,
        kind: EdgeKind,
        from: &OnestopId,
        to: &OnestopId,
        tags: Option<&Tags>,
    ) -> Result<EdgeKey, RepositoryError> {
        let key = self.resolve_endpoints(kind, from, to).await?;
        let now = Utc::now();

        let scope = self.registry.scope();
        let edge = match scope.find_edge(&key).await? {
            Some(mut edge) => {
                merge_tags(&mut edge.tags, tags);
                edge.updated_at = now;
                edge
            }
            None => Edge {
                key: key.clone(),
                tags: tags.cloned().unwrap_or_default(),
                created_at: now,
                updated_at: now,
            },
        };
        scope.put_edge(&edge).await?;

        Ok(key)
    }

    /// Remove the edge `kind(from -> to)`. Both endpoints must resolve; a missing edge is not an error.
    pub async fn unlink(
        &mut self,
        kind: EdgeKind,
        from: &OnestopId,
        to: &OnestopId,
    ) -> Result<Option<EdgeKey>, RepositoryError> {
        let key = self.resolve_endpoints(kind, from, to).await?;
        let removed = self.registry.scope().delete_edge(&key).await?;
        Ok(removed.then_some(key))
    }

    async fn resolve_endpoints(
        &mut self,
        kind: EdgeKind,
        from: &OnestopId,
        to: &OnestopId,
    ) -> Result<EdgeKey, RepositoryError> {
        let (from_kind, to_kind) = kind.endpoints();
        for (onestop_id, expected) in [(from, from_kind), (to, to_kind)] {
            if self
                .registry
                .resolve_kind(onestop_id, expected)
                .await?
                .is_none()
            {
                return Err(RepositoryError::unresolved(onestop_id, expected));
            }
        }
        Ok(EdgeKey::new(kind, from.clone(), to.clone()))
    }

    /// Resolve the upsert target, refusing to resurrect a retired identifier
    async fn existing(
        &mut self,
        onestop_id: &OnestopId,
        kind: EntityKind,
    ) -> Result<Option<Entity>, RepositoryError> {
        let existing = self.registry.resolve_kind(onestop_id, kind).await?;
        if existing.is_none() && self.registry.is_retired(onestop_id).await? {
            return Err(RepositoryError::validation(
                onestop_id,
                vec![ValidationError::retired(onestop_id.as_str())],
            ));
        }
        Ok(existing)
    }

    async fn persist(&mut self, entity: Entity, created: bool) -> Result<Upsert, RepositoryError> {
        let errors = EntityValidator::validate(&entity);
        if !errors.is_empty() {
            return Err(RepositoryError::validation(entity.onestop_id(), errors));
        }

        self.registry.scope().put_entity(&entity).await?;

        Ok(if created {
            Upsert::Created(entity)
        } else {
            Upsert::Updated(entity)
        })
    }
}

/// Incoming keys overwrite, others are kept
fn merge_tags(tags: &mut Tags, incoming: Option<&Tags>) {
    if let Some(incoming) = incoming {
        tags.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::error::FailureCause;
    use crate::logic::validate::ValidationErrorType;
    use crate::store::{MemoryStore, TransactionalStore};

    fn stop_change(id: &str, name: Option<&str>) -> StopChange {
        StopChange {
            onestop_id: OnestopId::parse(id).unwrap(),
            name: name.map(str::to_string),
            geometry: None,
            timezone: None,
            tags: None,
            operators_serving_stop: Vec::new(),
            routes_serving_stop: Vec::new(),
        }
    }

    fn operator_change(id: &str, name: &str) -> OperatorChange {
        OperatorChange {
            onestop_id: OnestopId::parse(id).unwrap(),
            name: Some(name.to_string()),
            geometry: None,
            website: None,
            timezone: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut repository = EntityRepository::new(&mut tx);

        let created = repository
            .create_or_update_stop(&stop_change("s-9q8yt4b-1AvHoS", Some("Holloway")))
            .await
            .unwrap();
        assert!(matches!(created, Upsert::Created(_)));

        // name omitted: existing value is kept
        let mut change = stop_change("s-9q8yt4b-1AvHoS", None);
        change.timezone = Some("America/Los_Angeles".to_string());
        let updated = repository.create_or_update_stop(&change).await.unwrap();

        let stop = match updated {
            Upsert::Updated(Entity::Stop(stop)) => stop,
            other => panic!("expected an updated stop, got {:?}", other),
        };
        assert_eq!(stop.name, "Holloway");
        assert_eq!(stop.timezone.as_deref(), Some("America/Los_Angeles"));
    }

    #[tokio::test]
    async fn test_create_without_name_fails_validation() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut repository = EntityRepository::new(&mut tx);

        let err = repository
            .create_or_update_stop(&stop_change("s-9q8yt4b-1AvHoS", None))
            .await
            .unwrap_err();

        match err {
            RepositoryError::Failed(FailureCause::Validation { errors, .. }) => {
                assert_eq!(errors[0].error_type, ValidationErrorType::MissingRequiredProperty);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_unknown_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut repository = EntityRepository::new(&mut tx);
        let onestop_id = OnestopId::parse("s-5b2-Fake").unwrap();

        let err = repository
            .destroy(&onestop_id, EntityKind::Stop)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Failed(FailureCause::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_removes_edges_and_retires_identifier() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut repository = EntityRepository::new(&mut tx);
        let stop_id = OnestopId::parse("s-9q8yt4b-1AvHoS").unwrap();
        let operator_id = OnestopId::parse("o-9q8y-SFMTA").unwrap();

        repository
            .create_or_update_operator(&operator_change("o-9q8y-SFMTA", "SFMTA"))
            .await
            .unwrap();
        repository
            .create_or_update_stop(&stop_change("s-9q8yt4b-1AvHoS", Some("Holloway")))
            .await
            .unwrap();
        repository
            .link(EdgeKind::OperatorServingStop, &stop_id, &operator_id, None)
            .await
            .unwrap();

        let destroyed = repository
            .destroy(&operator_id, EntityKind::Operator)
            .await
            .unwrap();
        assert_eq!(destroyed.unlinked.len(), 1);

        let err = repository
            .create_or_update_operator(&operator_change("o-9q8y-SFMTA", "SFMTA again"))
            .await
            .unwrap_err();
        match err {
            RepositoryError::Failed(FailureCause::Validation { errors, .. }) => {
                assert_eq!(errors[0].error_type, ValidationErrorType::RetiredIdentifier);
            }
            other => panic!("expected retired identifier, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_requires_both_endpoints() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut repository = EntityRepository::new(&mut tx);
        let stop_id = OnestopId::parse("s-9q8yt4b-1AvHoS").unwrap();
        let operator_id = OnestopId::parse("o-9q8y-SFMTA").unwrap();

        repository
            .create_or_update_stop(&stop_change("s-9q8yt4b-1AvHoS", Some("Holloway")))
            .await
            .unwrap();

        let err = repository
            .link(EdgeKind::OperatorServingStop, &stop_id, &operator_id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Failed(FailureCause::UnresolvedIdentifier {
                expected: EntityKind::Operator,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_relinking_merges_edge_tags() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let stop_id = OnestopId::parse("s-9q8yt4b-1AvHoS").unwrap();
        let operator_id = OnestopId::parse("o-9q8y-SFMTA").unwrap();

        {
            let mut repository = EntityRepository::new(&mut tx);
            repository
                .create_or_update_operator(&operator_change("o-9q8y-SFMTA", "SFMTA"))
                .await
                .unwrap();
            repository
                .create_or_update_stop(&stop_change("s-9q8yt4b-1AvHoS", Some("Holloway")))
                .await
                .unwrap();

            let first: Tags = [("gtfs_stop_id".to_string(), "1234".to_string())].into();
            let second: Tags = [("wheelchair".to_string(), "yes".to_string())].into();
            repository
                .link(EdgeKind::OperatorServingStop, &stop_id, &operator_id, Some(&first))
                .await
                .unwrap();
            repository
                .link(EdgeKind::OperatorServingStop, &stop_id, &operator_id, Some(&second))
                .await
                .unwrap();
        }

        let key = EdgeKey::new(EdgeKind::OperatorServingStop, stop_id, operator_id);
        let edge = tx.find_edge(&key).await.unwrap().unwrap();
        assert_eq!(edge.tags.len(), 2);
    }
}
