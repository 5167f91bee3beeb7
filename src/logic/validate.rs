use serde::{Deserialize, Serialize};

use crate::model::{Entity, Geometry, Operator, Route, Stop};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub property_name: Option<String>,
    pub error_type: ValidationErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationErrorType {
    MissingRequiredProperty,
    InvalidValue,
    InvalidGeometry,
    RetiredIdentifier,
}

impl ValidationError {
    fn missing(property: &str) -> Self {
        Self {
            property_name: Some(property.to_string()),
            error_type: ValidationErrorType::MissingRequiredProperty,
            message: format!("{} is required", property),
        }
    }

    fn invalid(property: &str, message: String) -> Self {
        Self {
            property_name: Some(property.to_string()),
            error_type: ValidationErrorType::InvalidValue,
            message,
        }
    }

    fn geometry(message: String) -> Self {
        Self {
            property_name: Some("geometry".to_string()),
            error_type: ValidationErrorType::InvalidGeometry,
            message,
        }
    }

    pub fn retired(onestop_id: &str) -> Self {
        Self {
            property_name: Some("onestopId".to_string()),
            error_type: ValidationErrorType::RetiredIdentifier,
            message: format!(
                "{} belonged to a destroyed entity and cannot be reused",
                onestop_id
            ),
        }
    }
}

pub struct EntityValidator;

impl EntityValidator {
    /// Validate a fully-merged entity. An empty result means the entity may be persisted.
    pub fn validate(entity: &Entity) -> Vec<ValidationError> {
        match entity {
            Entity::Stop(stop) => Self::validate_stop(stop),
            Entity::Operator(operator) => Self::validate_operator(operator),
            Entity::Route(route) => Self::validate_route(route),
        }
    }

    fn validate_stop(stop: &Stop) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        Self::check_name(&stop.name, &mut errors);
        if let Some(geometry) = &stop.geometry {
            if !geometry.is_point() {
                errors.push(ValidationError::geometry(
                    "stop geometry must be a Point".to_string(),
                ));
            }
            Self::check_geometry(geometry, &mut errors);
        }
        Self::check_timezone(stop.timezone.as_deref(), &mut errors);
        errors
    }

    fn validate_operator(operator: &Operator) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        Self::check_name(&operator.name, &mut errors);
        if let Some(geometry) = &operator.geometry {
            Self::check_geometry(geometry, &mut errors);
        }
        if let Some(website) = &operator.website {
            if !(website.starts_with("http://") || website.starts_with("https://")) {
                errors.push(ValidationError::invalid(
                    "website",
                    format!("website '{}' must be an http(s) URL", website),
                ));
            }
        }
        Self::check_timezone(operator.timezone.as_deref(), &mut errors);
        errors
    }

    fn validate_route(route: &Route) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        Self::check_name(&route.name, &mut errors);
        if let Some(vehicle_type) = &route.vehicle_type {
            if vehicle_type.trim().is_empty() {
                errors.push(ValidationError::invalid(
                    "vehicleType",
                    "vehicleType must not be blank".to_string(),
                ));
            }
        }
        errors
    }

    fn check_name(name: &str, errors: &mut Vec<ValidationError>) {
        if name.trim().is_empty() {
            errors.push(ValidationError::missing("name"));
        }
    }

    fn check_geometry(geometry: &Geometry, errors: &mut Vec<ValidationError>) {
        for [lon, lat] in geometry.positions() {
            if !lon.is_finite() || !lat.is_finite() {
                errors.push(ValidationError::geometry(
                    "coordinates must be finite numbers".to_string(),
                ));
            } else if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                errors.push(ValidationError::geometry(format!(
                    "coordinate [{}, {}] is out of range",
                    lon, lat
                )));
            }
        }

        if let Geometry::Polygon { coordinates } = geometry {
            if coordinates.is_empty() {
                errors.push(ValidationError::geometry(
                    "polygon must have at least one ring".to_string(),
                ));
            }
            for ring in coordinates {
                if ring.len() < 4 {
                    errors.push(ValidationError::geometry(
                        "polygon rings need at least 4 positions".to_string(),
                    ));
                } else if ring.first() != ring.last() {
                    errors.push(ValidationError::geometry(
                        "polygon rings must be closed".to_string(),
                    ));
                }
            }
        }
    }

    fn check_timezone(timezone: Option<&str>, errors: &mut Vec<ValidationError>) {
        let Some(timezone) = timezone else {
            return;
        };
        let looks_like_iana = timezone == "UTC"
            || (timezone.split('/').count() >= 2
                && timezone.split('/').all(|part| {
                    !part.is_empty()
                        && part
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
                }));
        if !looks_like_iana {
            errors.push(ValidationError::invalid(
                "timezone",
                format!("'{}' is not a timezone name", timezone),
            ));
        }
    }
}
