//! JSON document backend.
//!
//! The whole store is one file holding two arrays, `funds` and
//! `investments`. Every write reads the full document, applies the change in
//! memory and replaces the file atomically (temporary file, fsync, rename),
//! all while holding the lock for that path. Stores opened on the same path in
//! one process share the lock; separate processes are not coordinated.

use super::filter::{FundFilter, InvestmentFilter};
use super::{DeleteMode, FundStore};
use crate::core::error::{Result, StoreError};
use crate::core::model::{
    EntityKind, Fields, Fund, FundDraft, FundId, FundPatch, Investment, InvestmentDraft,
    InvestmentId, InvestmentPatch, now, today,
};
use crate::core::rules::{WriteRules, add_to_total};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub funds: Vec<Fund>,
    #[serde(default)]
    pub investments: Vec<Investment>,
}

impl Document {
    fn fund_index(&self, id: &FundId) -> Option<usize> {
        self.funds.iter().position(|f| &f.fund_id == id)
    }

    fn investment_index(&self, id: &InvestmentId) -> Option<usize> {
        self.investments.iter().position(|i| &i.investment_id == id)
    }

    fn require_fund(&self, id: &FundId) -> Result<usize> {
        self.fund_index(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Fund, id.as_str()))
    }

    fn ensure_name_free(&self, name: &str, except: Option<&FundId>) -> Result<()> {
        let taken = self
            .funds
            .iter()
            .any(|f| f.name.eq_ignore_ascii_case(name) && Some(&f.fund_id) != except);
        if taken {
            return Err(StoreError::duplicate(EntityKind::Fund, "name", name));
        }
        Ok(())
    }

    fn committed_total(&self, fund_id: &FundId, except: Option<&InvestmentId>) -> Result<Decimal> {
        let total = self
            .investments
            .iter()
            .filter(|i| &i.fund_id == fund_id && Some(&i.investment_id) != except)
            .try_fold(Decimal::ZERO, |total, i| add_to_total(total, i.amount))?;
        Ok(total)
    }

    /// Checks foreign key and capacity for an investment about to be stored.
    fn check_investment_write(&self, investment: &Investment, rules: &WriteRules) -> Result<()> {
        if self.fund_index(&investment.fund_id).is_none() {
            return Err(StoreError::dangling_fund(investment.fund_id.as_str()));
        }
        let committed =
            self.committed_total(&investment.fund_id, Some(&investment.investment_id))?;
        rules.check_capacity(&investment.fund_id, committed, investment.amount)?;
        Ok(())
    }

    /// Sets a fund's `aum` to the sum of its investments, touching
    /// `updated_at` only when the value changes.
    fn recompute_aum(&mut self, fund_id: &FundId) -> Result<()> {
        let total = self.committed_total(fund_id, None)?;
        if let Some(idx) = self.fund_index(fund_id) {
            let fund = &mut self.funds[idx];
            if fund.aum != total {
                fund.aum = total;
                fund.updated_at = now().max(fund.created_at);
            }
        }
        Ok(())
    }
}

/// Write locks shared by every store in the process, keyed by absolute path.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key).or_default())
}

pub struct DocumentStore {
    path: PathBuf,
    rules: WriteRules,
    lock: Arc<Mutex<()>>,
}

impl DocumentStore {
    /// Stores on the same path within this process serialize their writes
    /// through one shared lock. Another process writing the same file is not
    /// excluded.
    pub fn new(path: impl Into<PathBuf>, rules: WriteRules) -> Self {
        let path = path.into();
        let lock = path_lock(&path);
        Self { path, rules, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current document under the store lock.
    pub async fn snapshot(&self) -> Result<Document> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn read(&self) -> Result<Document> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::StorageUnavailable(format!(
                "document {} is unreadable: {e}",
                self.path.display()
            ))
        })
    }

    async fn write(&self, document: &Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::StorageUnavailable(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_path = self.path.as_os_str().to_owned();
        tmp_path.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp_path = PathBuf::from(tmp_path);

        let replaced = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &self.path).await
        }
        .await;
        if let Err(e) = replaced {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        debug!(
            funds = document.funds.len(),
            investments = document.investments.len(),
            "Document written to {}",
            self.path.display()
        );
        Ok(())
    }

    /// Runs `change` against the current document and persists the result.
    /// Nothing is written when `change` fails.
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let out = change(&mut document)?;
        self.write(&document).await?;
        Ok(out)
    }
}

#[async_trait]
impl FundStore for DocumentStore {
    async fn create_fund(&self, draft: FundDraft) -> Result<Fund> {
        self.rules.check_new_fund(&draft)?;
        let fund = Fund::new(draft, now());
        fund.validate()?;
        let created = self
            .mutate(|doc| {
                doc.ensure_name_free(&fund.name, None)?;
                doc.funds.push(fund.clone());
                Ok(fund)
            })
            .await?;
        info!("Fund created with id: {}", created.fund_id);
        Ok(created)
    }

    async fn insert_fund(&self, mut fund: Fund) -> Result<Fund> {
        fund.validate()?;
        let derive = self.rules.derives_aum();
        self.mutate(|doc| {
            if doc.fund_index(&fund.fund_id).is_some() {
                return Err(StoreError::duplicate(
                    EntityKind::Fund,
                    "fund_id",
                    fund.fund_id.as_str(),
                ));
            }
            doc.ensure_name_free(&fund.name, None)?;
            if derive {
                let total = doc.committed_total(&fund.fund_id, None)?;
                if fund.aum != total {
                    debug!(fund_id = %fund.fund_id, stored = %fund.aum, "Derived aum reset to {total}");
                    fund.aum = total;
                }
            }
            doc.funds.push(fund.clone());
            Ok(fund)
        })
        .await
    }

    async fn get_fund(&self, id: &FundId) -> Result<Fund> {
        let document = self.snapshot().await?;
        let idx = document.require_fund(id)?;
        Ok(document.funds[idx].clone())
    }

    async fn list_funds(&self, filter: &FundFilter) -> Result<Vec<Fund>> {
        let document = self.snapshot().await?;
        let mut funds: Vec<Fund> = document
            .funds
            .into_iter()
            .filter(|f| filter.matches(f))
            .collect();
        filter.sort(&mut funds);
        Ok(funds)
    }

    async fn update_fund(&self, id: &FundId, patch: FundPatch) -> Result<Fund> {
        self.rules.check_fund_patch(&patch)?;
        let updated = self
            .mutate(|doc| {
                let idx = doc.require_fund(id)?;
                let updated = doc.funds[idx].apply(&patch, now())?;
                doc.ensure_name_free(&updated.name, Some(id))?;
                doc.funds[idx] = updated.clone();
                Ok(updated)
            })
            .await?;
        info!("Fund {} updated", id);
        Ok(updated)
    }

    async fn delete_fund(&self, id: &FundId, mode: DeleteMode) -> Result<()> {
        let removed = self
            .mutate(|doc| {
                let idx = doc.require_fund(id)?;
                let dependents = doc.investments.iter().filter(|i| &i.fund_id == id).count();
                if dependents > 0 && mode == DeleteMode::Restrict {
                    return Err(StoreError::Conflict(format!(
                        "fund '{id}' still has {dependents} investment(s); delete them first or request a cascade"
                    )));
                }
                doc.investments.retain(|i| &i.fund_id != id);
                doc.funds.remove(idx);
                Ok(dependents)
            })
            .await?;
        info!(
            cascaded_investments = removed,
            "Fund {} has been removed", id
        );
        Ok(())
    }

    async fn create_investment(&self, draft: InvestmentDraft) -> Result<Investment> {
        let investment = Investment::new(draft, now());
        investment.validate(today())?;
        let derive = self.rules.derives_aum();
        let created = self
            .mutate(|doc| {
                doc.check_investment_write(&investment, &self.rules)?;
                doc.investments.push(investment.clone());
                if derive {
                    doc.recompute_aum(&investment.fund_id)?;
                }
                Ok(investment)
            })
            .await?;
        info!(
            fund_id = %created.fund_id,
            "Investment created with id: {}", created.investment_id
        );
        Ok(created)
    }

    async fn insert_investment(&self, investment: Investment) -> Result<Investment> {
        investment.validate(today())?;
        let derive = self.rules.derives_aum();
        self.mutate(|doc| {
            if doc.investment_index(&investment.investment_id).is_some() {
                return Err(StoreError::duplicate(
                    EntityKind::Investment,
                    "investment_id",
                    investment.investment_id.as_str(),
                ));
            }
            doc.check_investment_write(&investment, &self.rules)?;
            doc.investments.push(investment.clone());
            if derive {
                doc.recompute_aum(&investment.fund_id)?;
            }
            Ok(investment)
        })
        .await
    }

    async fn get_investment(&self, id: &InvestmentId) -> Result<Investment> {
        let document = self.snapshot().await?;
        document
            .investment_index(id)
            .map(|idx| document.investments[idx].clone())
            .ok_or_else(|| StoreError::not_found(EntityKind::Investment, id.as_str()))
    }

    async fn list_investments(&self, filter: &InvestmentFilter) -> Result<Vec<Investment>> {
        let document = self.snapshot().await?;
        let mut investments: Vec<Investment> = document
            .investments
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        filter.sort(&mut investments);
        Ok(investments)
    }

    async fn update_investment(
        &self,
        id: &InvestmentId,
        patch: InvestmentPatch,
    ) -> Result<Investment> {
        let derive = self.rules.derives_aum();
        let updated = self
            .mutate(|doc| {
                let idx = doc
                    .investment_index(id)
                    .ok_or_else(|| StoreError::not_found(EntityKind::Investment, id.as_str()))?;
                let previous_fund = doc.investments[idx].fund_id.clone();
                let updated = doc.investments[idx].apply(&patch, now(), today())?;
                doc.check_investment_write(&updated, &self.rules)?;
                doc.investments[idx] = updated.clone();
                if derive {
                    doc.recompute_aum(&previous_fund)?;
                    doc.recompute_aum(&updated.fund_id)?;
                }
                Ok(updated)
            })
            .await?;
        info!("Investment {} updated", id);
        Ok(updated)
    }

    async fn delete_investment(&self, id: &InvestmentId) -> Result<()> {
        let derive = self.rules.derives_aum();
        self.mutate(|doc| {
            let idx = doc
                .investment_index(id)
                .ok_or_else(|| StoreError::not_found(EntityKind::Investment, id.as_str()))?;
            let removed = doc.investments.remove(idx);
            if derive {
                doc.recompute_aum(&removed.fund_id)?;
            }
            Ok(())
        })
        .await?;
        info!("Investment {} has been removed", id);
        Ok(())
    }
}

/// A document read as raw field mappings, without typing or validation.
/// This is the migration engine's view of the source; it never writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSnapshot {
    pub funds: Vec<Value>,
    pub investments: Vec<Value>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    funds: Vec<Value>,
    #[serde(default)]
    investments: Vec<Value>,
}

impl DocumentSnapshot {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).await.map_err(|e| {
            StoreError::StorageUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_slice(&bytes).map_err(|e| {
            StoreError::StorageUnavailable(format!("{} is not a fund document: {e}", path.display()))
        })
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        let raw: RawDocument = serde_json::from_slice(bytes)?;
        Ok(Self {
            funds: raw.funds,
            investments: raw.investments,
        })
    }

    /// The object at `value`, if it is one.
    pub fn fields(value: &Value) -> Option<&Fields> {
        value.as_object()
    }
}
