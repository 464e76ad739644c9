//! Error taxonomy shared by the entity model, the store backends and the
//! migration engine.

use crate::core::model::EntityKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single violated field and a human readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every field that failed validation, in the order the checks ran.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("validation failed: {}", describe(.field_errors))]
pub struct ValidationError {
    pub field_errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_errors: vec![FieldError::new(field, message)],
        }
    }

    /// Returns true when `field` is among the violated fields.
    pub fn has_field(&self, field: &str) -> bool {
        self.field_errors.iter().any(|e| e.field == field)
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by every `FundStore` operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: EntityKind, id: String },

    /// A foreign key that does not resolve at write time.
    #[error("{field} '{id}' does not reference an existing {entity}")]
    DanglingReference {
        entity: EntityKind,
        field: String,
        id: String,
    },

    #[error("duplicate {field} for {entity}: '{value}'")]
    DuplicateKey {
        entity: EntityKind,
        field: String,
        value: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(entity: EntityKind, field: &str, value: impl Into<String>) -> Self {
        Self::DuplicateKey {
            entity,
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn dangling_fund(id: impl Into<String>) -> Self {
        Self::DanglingReference {
            entity: EntityKind::Fund,
            field: "fund_id".to_string(),
            id: id.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let err = ValidationError {
            field_errors: vec![
                FieldError::new("name", "is required"),
                FieldError::new("aum", "must not be negative"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "validation failed: name is required; aum must not be negative"
        );
        assert!(err.has_field("aum"));
        assert!(!err.has_field("strategy"));
    }

    #[test]
    fn store_error_messages_name_the_entity() {
        let err = StoreError::not_found(EntityKind::Fund, "fund001");
        assert_eq!(err.to_string(), "fund 'fund001' not found");

        let err = StoreError::dangling_fund("missing");
        assert_eq!(
            err.to_string(),
            "fund_id 'missing' does not reference an existing fund"
        );
    }
}
