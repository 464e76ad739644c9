//! Request handling on top of a `FundStore`.
//!
//! Raw field mappings come in, entities go out as plain JSON values, and
//! every failure leaves as an `ApiError` with a stable kind and a list of
//! offending fields. The service holds no state besides the store handle.

use crate::core::error::{FieldError, StoreError, ValidationError};
use crate::core::model::{
    Checker, EntityKind, Fields, FundDraft, FundId, FundPatch, InvestmentDraft, InvestmentId,
    InvestmentPatch,
};
use crate::store::filter::{FundFilter, InvestmentFilter};
use crate::store::{DeleteMode, FundStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "DuplicateKeyError")]
    DuplicateKey,
    #[serde(rename = "ConflictError")]
    Conflict,
    #[serde(rename = "StorageUnavailableError")]
    StorageUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub field_errors: Vec<FieldError>,
    pub message: String,
}

impl ApiError {
    fn new(kind: ErrorKind, field_errors: Vec<FieldError>, message: String) -> Self {
        Self {
            kind,
            field_errors,
            message,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        ApiError::new(ErrorKind::Validation, err.field_errors, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::Validation(e) => e.into(),
            StoreError::NotFound { .. } => ApiError::new(ErrorKind::NotFound, vec![], message),
            StoreError::DanglingReference { entity, field, .. } => ApiError::new(
                ErrorKind::NotFound,
                vec![FieldError::new(
                    field,
                    format!("does not reference an existing {entity}"),
                )],
                message,
            ),
            StoreError::DuplicateKey { field, .. } => ApiError::new(
                ErrorKind::DuplicateKey,
                vec![FieldError::new(field, "is already taken")],
                message,
            ),
            StoreError::Conflict(_) => ApiError::new(ErrorKind::Conflict, vec![], message),
            StoreError::StorageUnavailable(_) => {
                ApiError::new(ErrorKind::StorageUnavailable, vec![], message)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Get,
    List,
    Update,
    Delete,
}

fn encode<T: Serialize>(entity: &T) -> ApiResult<Value> {
    serde_json::to_value(entity).map_err(|e| {
        ApiError::new(
            ErrorKind::StorageUnavailable,
            vec![],
            format!("cannot encode response: {e}"),
        )
    })
}

fn path_id(id: Option<&str>) -> ApiResult<&str> {
    match id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        Some(_) => Err(ValidationError::single("id", "must not be empty").into()),
        None => Err(ValidationError::single("id", "is required").into()),
    }
}

/// Reads the optional `cascade` flag of a fund deletion.
fn delete_mode(fields: &Fields) -> Result<DeleteMode, ValidationError> {
    let mut check = Checker::default();
    check.reject_unknown(fields, &["cascade"]);
    let cascade = check.optional(fields, "cascade", |v| {
        v.as_bool().ok_or_else(|| "must be a boolean".to_string())
    });
    let Some(cascade) = cascade else {
        return Err(check.into_error());
    };
    check.finish()?;
    Ok(if cascade.unwrap_or(false) {
        DeleteMode::Cascade
    } else {
        DeleteMode::Restrict
    })
}

#[derive(Clone)]
pub struct FundService {
    store: Arc<dyn FundStore>,
}

impl FundService {
    pub fn new(store: Arc<dyn FundStore>) -> Self {
        Self { store }
    }

    pub async fn create_fund(&self, fields: &Fields) -> ApiResult<Value> {
        let draft = FundDraft::from_fields(fields)?;
        encode(&self.store.create_fund(draft).await?)
    }

    pub async fn get_fund(&self, id: &str) -> ApiResult<Value> {
        let id = FundId::from(path_id(Some(id))?);
        encode(&self.store.get_fund(&id).await?)
    }

    /// `query` holds the list filter parameters; see `FundFilter::from_fields`.
    pub async fn list_funds(&self, query: &Fields) -> ApiResult<Value> {
        let filter = FundFilter::from_fields(query)?;
        encode(&self.store.list_funds(&filter).await?)
    }

    pub async fn update_fund(&self, id: &str, fields: &Fields) -> ApiResult<Value> {
        let id = FundId::from(path_id(Some(id))?);
        let patch = FundPatch::from_fields(fields)?;
        encode(&self.store.update_fund(&id, patch).await?)
    }

    /// Accepts `{"cascade": true}` to remove the fund's investments as well.
    pub async fn delete_fund(&self, id: &str, fields: &Fields) -> ApiResult<()> {
        let id = FundId::from(path_id(Some(id))?);
        let mode = delete_mode(fields)?;
        Ok(self.store.delete_fund(&id, mode).await?)
    }

    pub async fn create_investment(&self, fields: &Fields) -> ApiResult<Value> {
        let draft = InvestmentDraft::from_fields(fields)?;
        encode(&self.store.create_investment(draft).await?)
    }

    pub async fn get_investment(&self, id: &str) -> ApiResult<Value> {
        let id = InvestmentId::from(path_id(Some(id))?);
        encode(&self.store.get_investment(&id).await?)
    }

    pub async fn list_investments(&self, query: &Fields) -> ApiResult<Value> {
        let filter = InvestmentFilter::from_fields(query)?;
        encode(&self.store.list_investments(&filter).await?)
    }

    pub async fn update_investment(&self, id: &str, fields: &Fields) -> ApiResult<Value> {
        let id = InvestmentId::from(path_id(Some(id))?);
        let patch = InvestmentPatch::from_fields(fields)?;
        encode(&self.store.update_investment(&id, patch).await?)
    }

    pub async fn delete_investment(&self, id: &str) -> ApiResult<()> {
        let id = InvestmentId::from(path_id(Some(id))?);
        Ok(self.store.delete_investment(&id).await?)
    }

    /// Routes a raw request. `id` is required for get, update and delete;
    /// `fields` is the body for create and update, the query for list and
    /// the options for delete. Deletes answer with `null`.
    pub async fn dispatch(
        &self,
        entity: EntityKind,
        operation: Operation,
        id: Option<&str>,
        fields: &Fields,
    ) -> ApiResult<Value> {
        debug!(%entity, ?operation, id, "Dispatching request");
        match (entity, operation) {
            (EntityKind::Fund, Operation::Create) => self.create_fund(fields).await,
            (EntityKind::Fund, Operation::Get) => self.get_fund(path_id(id)?).await,
            (EntityKind::Fund, Operation::List) => self.list_funds(fields).await,
            (EntityKind::Fund, Operation::Update) => self.update_fund(path_id(id)?, fields).await,
            (EntityKind::Fund, Operation::Delete) => {
                self.delete_fund(path_id(id)?, fields).await?;
                Ok(Value::Null)
            }
            (EntityKind::Investment, Operation::Create) => self.create_investment(fields).await,
            (EntityKind::Investment, Operation::Get) => self.get_investment(path_id(id)?).await,
            (EntityKind::Investment, Operation::List) => self.list_investments(fields).await,
            (EntityKind::Investment, Operation::Update) => {
                self.update_investment(path_id(id)?, fields).await
            }
            (EntityKind::Investment, Operation::Delete) => {
                if !fields.is_empty() {
                    return Err(ValidationError::single(
                        "body",
                        "investment deletion takes no options",
                    )
                    .into());
                }
                self.delete_investment(path_id(id)?).await?;
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::{AumPolicy, WriteRules};
    use crate::store::document::DocumentStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn service(dir: &TempDir, rules: WriteRules) -> FundService {
        let store = DocumentStore::new(dir.path().join("funds.json"), rules);
        FundService::new(Arc::new(store))
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    async fn alpha_with_investment(service: &FundService) -> (Value, Value) {
        let fund = service
            .create_fund(&fields(json!({"name": "Alpha Growth", "strategy": "equity", "aum": 0})))
            .await
            .unwrap();
        let investment = service
            .create_investment(&fields(json!({
                "fund_id": fund["fund_id"],
                "investor_name": "J. Doe",
                "amount": 1000,
                "invested_at": "2023-01-01"
            })))
            .await
            .unwrap();
        (fund, investment)
    }

    #[tokio::test]
    async fn manual_aum_stays_until_updated() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, WriteRules::default());
        let (fund, investment) = alpha_with_investment(&service).await;
        assert_eq!(investment["amount"], json!("1000"));

        let id = fund["fund_id"].as_str().unwrap();
        assert_eq!(service.get_fund(id).await.unwrap()["aum"], json!("0"));

        let updated = service
            .update_fund(id, &fields(json!({"aum": "1000"})))
            .await
            .unwrap();
        assert_eq!(updated["aum"], json!("1000"));
    }

    #[tokio::test]
    async fn derived_aum_follows_investments() {
        let dir = TempDir::new().unwrap();
        let rules = WriteRules {
            aum_policy: AumPolicy::Derived,
            ..Default::default()
        };
        let service = service(&dir, rules);
        let (fund, _) = alpha_with_investment(&service).await;

        let id = fund["fund_id"].as_str().unwrap();
        assert_eq!(service.get_fund(id).await.unwrap()["aum"], json!("1000"));

        let err = service
            .update_fund(id, &fields(json!({"aum": 5})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.field_errors[0].field, "aum");
    }

    #[tokio::test]
    async fn validation_reports_every_field() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, WriteRules::default());
        let err = service
            .create_fund(&fields(json!({"name": "", "strategy": "gold", "aum": -1})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        let names: Vec<&str> = err.field_errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(names, vec!["name", "strategy", "aum"]);
    }

    #[tokio::test]
    async fn dangling_fund_is_a_not_found_on_the_field() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, WriteRules::default());
        let err = service
            .create_investment(&fields(json!({
                "fund_id": "missing",
                "investor_name": "J. Doe",
                "amount": 10,
                "invested_at": "2023-01-01"
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.field_errors[0].field, "fund_id");
    }

    #[tokio::test]
    async fn error_kinds_serialize_with_their_public_names() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, WriteRules::default());
        alpha_with_investment(&service).await;
        let err = service
            .create_fund(&fields(json!({"name": "alpha growth", "strategy": "equity"})))
            .await
            .unwrap_err();
        let body = serde_json::to_value(&err).unwrap();
        assert_eq!(body["kind"], json!("DuplicateKeyError"));
        assert_eq!(body["field_errors"][0]["field"], json!("name"));
    }

    #[tokio::test]
    async fn dispatch_routes_and_guards_delete() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, WriteRules::default());
        let (fund, _) = alpha_with_investment(&service).await;
        let id = fund["fund_id"].as_str().unwrap();

        let err = service
            .dispatch(EntityKind::Fund, Operation::Delete, Some(id), &Fields::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        let listed = service
            .dispatch(
                EntityKind::Investment,
                Operation::List,
                None,
                &fields(json!({"fund_id": id})),
            )
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let deleted = service
            .dispatch(
                EntityKind::Fund,
                Operation::Delete,
                Some(id),
                &fields(json!({"cascade": true})),
            )
            .await
            .unwrap();
        assert_eq!(deleted, Value::Null);

        let err = service
            .dispatch(EntityKind::Fund, Operation::Get, None, &Fields::new())
            .await
            .unwrap_err();
        assert!(err.field_errors.iter().any(|e| e.field == "id"));
    }
}
