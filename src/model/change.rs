use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::{EntityKind, Geometry, OnestopId, Tags};

/// Structurally invalid change input, rejected before any transaction opens
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed payload: {message}")]
pub struct MalformedPayload {
    /// Index of the offending change within its payload, if known
    pub index: Option<usize>,
    pub message: String,
}

impl MalformedPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            index: None,
            message: message.into(),
        }
    }

    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeAction {
    CreateUpdate,
    Destroy,
}

impl Default for ChangeAction {
    fn default() -> Self {
        ChangeAction::CreateUpdate
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::CreateUpdate => f.write_str("createUpdate"),
            ChangeAction::Destroy => f.write_str("destroy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorServingStopChange {
    pub operator_onestop_id: OnestopId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// `createUpdate` links, `destroy` unlinks
    #[serde(default)]
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteServingStopChange {
    pub route_onestop_id: OnestopId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default)]
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopChange {
    pub onestop_id: OnestopId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators_serving_stop: Vec<OperatorServingStopChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes_serving_stop: Vec<RouteServingStopChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorChange {
    pub onestop_id: OnestopId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteChange {
    pub onestop_id: OnestopId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operated_by_onestop_id: Option<OnestopId>,
}

/// The entity description a change operates on
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeTarget {
    Stop(StopChange),
    Operator(OperatorChange),
    Route(RouteChange),
}

impl ChangeTarget {
    pub fn onestop_id(&self) -> &OnestopId {
        match self {
            ChangeTarget::Stop(stop) => &stop.onestop_id,
            ChangeTarget::Operator(operator) => &operator.onestop_id,
            ChangeTarget::Route(route) => &route.onestop_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            ChangeTarget::Stop(_) => EntityKind::Stop,
            ChangeTarget::Operator(_) => EntityKind::Operator,
            ChangeTarget::Route(_) => EntityKind::Route,
        }
    }
}

/// One declarative change: an action and exactly one entity body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChange", into = "RawChange")]
pub struct Change {
    pub action: ChangeAction,
    pub target: ChangeTarget,
}

impl Change {
    pub fn onestop_id(&self) -> &OnestopId {
        self.target.onestop_id()
    }
}

/// Wire shape of a change, where the entity body is keyed by its kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    action: Option<ChangeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop: Option<StopChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operator: Option<OperatorChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    route: Option<RouteChange>,
}

impl TryFrom<RawChange> for Change {
    type Error = MalformedPayload;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let action = raw
            .action
            .ok_or_else(|| MalformedPayload::new("change is missing an action"))?;

        let mut targets = Vec::new();
        if let Some(stop) = raw.stop {
            targets.push(ChangeTarget::Stop(stop));
        }
        if let Some(operator) = raw.operator {
            targets.push(ChangeTarget::Operator(operator));
        }
        if let Some(route) = raw.route {
            targets.push(ChangeTarget::Route(route));
        }

        let target = match targets.len() {
            1 => targets.remove(0),
            0 => {
                return Err(MalformedPayload::new(
                    "change must describe a stop, operator or route",
                ))
            }
            _ => {
                return Err(MalformedPayload::new(
                    "change must describe exactly one entity",
                ))
            }
        };

        Ok(Change { action, target })
    }
}

impl From<Change> for RawChange {
    fn from(change: Change) -> Self {
        let mut raw = RawChange {
            action: Some(change.action),
            stop: None,
            operator: None,
            route: None,
        };
        match change.target {
            ChangeTarget::Stop(stop) => raw.stop = Some(stop),
            ChangeTarget::Operator(operator) => raw.operator = Some(operator),
            ChangeTarget::Route(route) => raw.route = Some(route),
        }
        raw
    }
}

/// The body of a change payload: `{"changes": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadBody {
    pub changes: Vec<Change>,
}

impl PayloadBody {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Parse an untrusted JSON payload body
    pub fn from_value(value: serde_json::Value) -> Result<Self, MalformedPayload> {
        let body: PayloadBody = serde_json::from_value(value)
            .map_err(|e| MalformedPayload::new(e.to_string()))?;
        body.validate()?;
        Ok(body)
    }

    /// Structural checks that need no storage access
    pub fn validate(&self) -> Result<(), MalformedPayload> {
        if self.changes.is_empty() {
            return Err(MalformedPayload::new("payload must contain at least one change"));
        }

        for (index, change) in self.changes.iter().enumerate() {
            let onestop_id = change.onestop_id();
            expect_kind(index, onestop_id, change.target.kind())?;

            match &change.target {
                ChangeTarget::Stop(stop) => {
                    for serving in &stop.operators_serving_stop {
                        expect_kind(index, &serving.operator_onestop_id, EntityKind::Operator)?;
                    }
                    for serving in &stop.routes_serving_stop {
                        expect_kind(index, &serving.route_onestop_id, EntityKind::Route)?;
                    }
                }
                ChangeTarget::Route(route) => {
                    if let Some(operator) = &route.operated_by_onestop_id {
                        expect_kind(index, operator, EntityKind::Operator)?;
                    }
                }
                ChangeTarget::Operator(_) => {}
            }
        }

        Ok(())
    }
}

fn expect_kind(
    index: usize,
    onestop_id: &OnestopId,
    expected: EntityKind,
) -> Result<(), MalformedPayload> {
    match onestop_id.entity_kind() {
        Some(kind) if kind == expected => Ok(()),
        _ => Err(MalformedPayload::at(
            index,
            format!("'{}' does not identify a {}", onestop_id, expected),
        )),
    }
}
