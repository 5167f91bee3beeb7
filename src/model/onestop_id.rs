use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::EntityKind;

const GEOHASH_ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnestopIdError {
    #[error("onestop id is empty")]
    Empty,
    #[error("onestop id '{0}' must have the form <prefix>-<geohash>-<name>")]
    Shape(String),
    #[error("onestop id '{0}' has unknown prefix")]
    UnknownPrefix(String),
    #[error("onestop id '{0}' has an invalid geohash segment")]
    InvalidGeohash(String),
    #[error("onestop id '{0}' has an invalid name segment")]
    InvalidName(String),
}

/// Stable, human-readable identifier of a transit entity, e.g. `s-9q8yt4b-1AvHoS`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnestopId(String);

impl OnestopId {
    pub fn parse(value: &str) -> Result<Self, OnestopIdError> {
        if value.is_empty() {
            return Err(OnestopIdError::Empty);
        }

        let mut segments = value.splitn(3, '-');
        let (Some(prefix), Some(geohash), Some(name)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(OnestopIdError::Shape(value.to_string()));
        };

        if !matches!(prefix, "s" | "o" | "r" | "f") {
            return Err(OnestopIdError::UnknownPrefix(value.to_string()));
        }
        if geohash.is_empty() || !geohash.chars().all(|c| GEOHASH_ALPHABET.contains(c)) {
            return Err(OnestopIdError::InvalidGeohash(value.to_string()));
        }
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '~' | '@' | '<' | '>'))
        {
            return Err(OnestopIdError::InvalidName(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        &self.0[..1]
    }

    pub fn geohash(&self) -> &str {
        self.0.split('-').nth(1).unwrap_or_default()
    }

    /// Entity kind denoted by the prefix; feeds are not editable through changesets
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self.prefix() {
            "s" => Some(EntityKind::Stop),
            "o" => Some(EntityKind::Operator),
            "r" => Some(EntityKind::Route),
            _ => None,
        }
    }
}

impl fmt::Display for OnestopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OnestopId {
    type Err = OnestopIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnestopId {
    type Error = OnestopIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OnestopId> for String {
    fn from(id: OnestopId) -> Self {
        id.0
    }
}

impl AsRef<str> for OnestopId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
