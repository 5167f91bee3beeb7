use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{Geometry, OnestopId, Tags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Stop,
    Operator,
    Route,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Stop => "stop",
            EntityKind::Operator => "operator",
            EntityKind::Route => "route",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(EntityKind::Stop),
            "operator" => Some(EntityKind::Operator),
            "route" => Some(EntityKind::Route),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub onestop_id: OnestopId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub onestop_id: OnestopId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub onestop_id: OnestopId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted transit entity of any editable kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Stop(Stop),
    Operator(Operator),
    Route(Route),
}

impl Entity {
    pub fn onestop_id(&self) -> &OnestopId {
        match self {
            Entity::Stop(stop) => &stop.onestop_id,
            Entity::Operator(operator) => &operator.onestop_id,
            Entity::Route(route) => &route.onestop_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Stop(_) => EntityKind::Stop,
            Entity::Operator(_) => EntityKind::Operator,
            Entity::Route(_) => EntityKind::Route,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Stop(stop) => stop.created_at,
            Entity::Operator(operator) => operator.created_at,
            Entity::Route(route) => route.created_at,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Entity::Stop(stop) => stop.updated_at,
            Entity::Operator(operator) => operator.updated_at,
            Entity::Route(route) => route.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// stop -> operator
    OperatorServingStop,
    /// stop -> route
    RouteServingStop,
    /// route -> operator
    RouteOperatedBy,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::OperatorServingStop => "operatorServingStop",
            EdgeKind::RouteServingStop => "routeServingStop",
            EdgeKind::RouteOperatedBy => "routeOperatedBy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "operatorServingStop" => Some(EdgeKind::OperatorServingStop),
            "routeServingStop" => Some(EdgeKind::RouteServingStop),
            "routeOperatedBy" => Some(EdgeKind::RouteOperatedBy),
            _ => None,
        }
    }

    /// Kinds of the (from, to) endpoints
    pub fn endpoints(&self) -> (EntityKind, EntityKind) {
        match self {
            EdgeKind::OperatorServingStop => (EntityKind::Stop, EntityKind::Operator),
            EdgeKind::RouteServingStop => (EntityKind::Stop, EntityKind::Route),
            EdgeKind::RouteOperatedBy => (EntityKind::Route, EntityKind::Operator),
        }
    }
}

/// Identity of a relationship edge, without its attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeKey {
    pub kind: EdgeKind,
    pub from: OnestopId,
    pub to: OnestopId,
}

impl EdgeKey {
    pub fn new(kind: EdgeKind, from: OnestopId, to: OnestopId) -> Self {
        Self { kind, from, to }
    }

    pub fn touches(&self, onestop_id: &OnestopId) -> bool {
        &self.from == onestop_id || &self.to == onestop_id
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} -> {})", self.kind.as_str(), self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(flatten)]
    pub key: EdgeKey,
    #[serde(default)]
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_serializes_with_kind_tag() {
        let now = Utc::now();
        let entity = Entity::Operator(Operator {
            onestop_id: OnestopId::parse("o-9q8y-SFMTA").unwrap(),
            name: "San Francisco Municipal Transportation Agency".to_string(),
            geometry: None,
            website: Some("https://www.sfmta.com".to_string()),
            timezone: Some("America/Los_Angeles".to_string()),
            tags: Tags::new(),
            created_at: now,
            updated_at: now,
        });

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["kind"], "operator");
        assert_eq!(value["onestopId"], "o-9q8y-SFMTA");

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), EntityKind::Operator);
    }

    #[test]
    fn test_edge_key_touches_both_endpoints() {
        let stop = OnestopId::parse("s-9q8yt4b-1AvHoS").unwrap();
        let operator = OnestopId::parse("o-9q8y-SFMTA").unwrap();
        let other = OnestopId::parse("o-9q9-BART").unwrap();
        let key = EdgeKey::new(EdgeKind::OperatorServingStop, stop.clone(), operator.clone());

        assert!(key.touches(&stop));
        assert!(key.touches(&operator));
        assert!(!key.touches(&other));
        assert_eq!(
            EdgeKind::OperatorServingStop.endpoints(),
            (EntityKind::Stop, EntityKind::Operator)
        );
    }
}
