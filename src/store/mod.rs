//! Storage backends behind a single CRUD contract.
//!
//! Both backends enforce the same invariants: identifiers and fund names are
//! unique, every investment references a live fund, and a fund with
//! investments is only removed when a cascade is requested. Writes are durable
//! when the call returns and writes against the same store are serialized.

pub mod document;
pub mod filter;
pub mod relational;

use crate::core::config::StorageConfig;
use crate::core::error::Result;
use crate::core::model::{
    Fund, FundDraft, FundId, FundPatch, Investment, InvestmentDraft, InvestmentId,
    InvestmentPatch,
};
use crate::core::rules::WriteRules;
use anyhow::Context;
use async_trait::async_trait;
use document::DocumentStore;
use filter::{FundFilter, InvestmentFilter};
use relational::RelationalStore;
use std::sync::Arc;
use tracing::debug;

/// What happens to a fund's investments when the fund is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Refuse with a conflict while investments exist.
    #[default]
    Restrict,
    /// Delete the investments together with the fund.
    Cascade,
}

#[async_trait]
pub trait FundStore: Send + Sync {
    /// Stores a new fund under a freshly assigned identifier.
    async fn create_fund(&self, draft: FundDraft) -> Result<Fund>;

    /// Stores a complete record as is, keeping its identifier and timestamps.
    async fn insert_fund(&self, fund: Fund) -> Result<Fund>;

    async fn get_fund(&self, id: &FundId) -> Result<Fund>;

    async fn list_funds(&self, filter: &FundFilter) -> Result<Vec<Fund>>;

    async fn update_fund(&self, id: &FundId, patch: FundPatch) -> Result<Fund>;

    async fn delete_fund(&self, id: &FundId, mode: DeleteMode) -> Result<()>;

    async fn create_investment(&self, draft: InvestmentDraft) -> Result<Investment>;

    async fn insert_investment(&self, investment: Investment) -> Result<Investment>;

    async fn get_investment(&self, id: &InvestmentId) -> Result<Investment>;

    async fn list_investments(&self, filter: &InvestmentFilter) -> Result<Vec<Investment>>;

    async fn update_investment(
        &self,
        id: &InvestmentId,
        patch: InvestmentPatch,
    ) -> Result<Investment>;

    async fn delete_investment(&self, id: &InvestmentId) -> Result<()>;
}

/// Opens the backend selected by `config`.
pub fn open_store(config: &StorageConfig, rules: WriteRules) -> anyhow::Result<Arc<dyn FundStore>> {
    match config {
        StorageConfig::Document { path } => {
            debug!("Opening document store at {}", path.display());
            Ok(Arc::new(DocumentStore::new(path, rules)))
        }
        StorageConfig::Relational {
            connection,
            cascade_on_delete,
        } => {
            debug!("Opening relational store at {}", connection);
            let store = RelationalStore::open(connection, *cascade_on_delete, rules)
                .with_context(|| format!("Failed to open relational store: {connection}"))?;
            Ok(Arc::new(store))
        }
    }
}
