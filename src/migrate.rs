//! Batch migration from a JSON document snapshot into any `FundStore`.
//!
//! Records are validated before anything is written; funds go first so
//! investments can be checked against the set of funds that survived
//! validation. Identifiers and timestamps are carried over unchanged. The
//! run is not atomic: records committed before a later failure stay
//! committed, and the report says exactly which ones made it.
//!
//! The target must not receive other writes while a migration runs.

use crate::core::error::{Result, StoreError};
use crate::core::model::{EntityKind, Fund, FundId, Investment, InvestmentId};
use crate::store::FundStore;
use crate::store::document::DocumentSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Validate and check the target without writing anything.
    pub dry_run: bool,
}

/// A record that was not migrated. `index` is its position in the source
/// collection; `id` is absent when the record had no readable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordIssue {
    pub index: usize,
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub migrated: Vec<String>,
    pub skipped_invalid: Vec<RecordIssue>,
    pub skipped_orphan: Vec<RecordIssue>,
    pub skipped_existing: Vec<RecordIssue>,
    pub failed_constraint: Vec<RecordIssue>,
}

impl EntityReport {
    pub fn processed(&self) -> usize {
        self.migrated.len()
            + self.skipped_invalid.len()
            + self.skipped_orphan.len()
            + self.skipped_existing.len()
            + self.failed_constraint.len()
    }

    /// Records that were rejected rather than migrated or already present.
    pub fn rejected(&self) -> usize {
        self.skipped_invalid.len() + self.skipped_orphan.len() + self.failed_constraint.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    Complete,
    PartialFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub funds: EntityReport,
    pub investments: EntityReport,
    pub dry_run: bool,
}

impl MigrationReport {
    /// Records already present in the target do not count as failures, so a
    /// repeated run over the same source is `Complete`.
    pub fn outcome(&self) -> MigrationOutcome {
        if self.funds.rejected() + self.investments.rejected() == 0 {
            MigrationOutcome::Complete
        } else {
            MigrationOutcome::PartialFailure
        }
    }
}

fn raw_id(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(|s| s.trim().to_string())
}

fn parse_fund(raw: &Value) -> std::result::Result<Fund, String> {
    let fields = DocumentSnapshot::fields(raw).ok_or("record is not an object")?;
    Fund::from_record(fields).map_err(|e| e.to_string())
}

fn parse_investment(raw: &Value) -> std::result::Result<Investment, String> {
    let fields = DocumentSnapshot::fields(raw).ok_or("record is not an object")?;
    Investment::from_record(fields).map_err(|e| e.to_string())
}

/// Whether a record with this identifier is already in the target.
/// `NotFound` is the expected answer; anything else but success aborts.
fn exists<T>(lookup: Result<T>) -> Result<bool> {
    match lookup {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// How a single write attempt ended. Storage failures abort the whole run;
/// any other store error is confined to the record.
fn write_outcome<T>(result: Result<T>) -> Result<std::result::Result<(), String>> {
    match result {
        Ok(_) => Ok(Ok(())),
        Err(e @ StoreError::StorageUnavailable(_)) => Err(e),
        Err(e) => Ok(Err(e.to_string())),
    }
}

fn reject(issues: &mut Vec<RecordIssue>, entity: EntityKind, issue: RecordIssue) {
    warn!(
        index = issue.index,
        id = issue.id.as_deref().unwrap_or("-"),
        "Skipping {entity}: {}",
        issue.reason
    );
    issues.push(issue);
}

/// Migrates `snapshot` into `target`. `on_record` is called once for every
/// source record, after its fate is decided.
pub async fn migrate(
    snapshot: &DocumentSnapshot,
    target: &dyn FundStore,
    options: MigrationOptions,
    on_record: &(dyn Fn() + Send + Sync),
) -> Result<MigrationReport> {
    let mut report = MigrationReport {
        dry_run: options.dry_run,
        ..Default::default()
    };
    debug!(
        funds = snapshot.funds.len(),
        investments = snapshot.investments.len(),
        dry_run = options.dry_run,
        "Starting migration"
    );

    let mut funds = Vec::new();
    for (index, raw) in snapshot.funds.iter().enumerate() {
        match parse_fund(raw) {
            Ok(fund) => funds.push((index, fund)),
            Err(reason) => {
                let issue = RecordIssue {
                    index,
                    id: raw_id(raw, "fund_id"),
                    reason,
                };
                reject(&mut report.funds.skipped_invalid, EntityKind::Fund, issue);
                on_record();
            }
        }
    }
    let valid_funds: HashSet<FundId> = funds.iter().map(|(_, f)| f.fund_id.clone()).collect();

    let mut investments = Vec::new();
    for (index, raw) in snapshot.investments.iter().enumerate() {
        let id = raw_id(raw, "investment_id");
        match parse_investment(raw) {
            Ok(investment) if valid_funds.contains(&investment.fund_id) => {
                investments.push((index, investment))
            }
            Ok(investment) => {
                let issue = RecordIssue {
                    index,
                    id,
                    reason: format!(
                        "fund_id '{}' does not match any valid fund in the source",
                        investment.fund_id
                    ),
                };
                reject(
                    &mut report.investments.skipped_orphan,
                    EntityKind::Investment,
                    issue,
                );
                on_record();
            }
            Err(reason) => {
                let issue = RecordIssue { index, id, reason };
                reject(
                    &mut report.investments.skipped_invalid,
                    EntityKind::Investment,
                    issue,
                );
                on_record();
            }
        }
    }

    let mut seen_funds: HashSet<FundId> = HashSet::new();
    for (index, fund) in funds {
        let id = fund.fund_id.clone();
        let issue = |reason: String| RecordIssue {
            index,
            id: Some(id.to_string()),
            reason,
        };
        if !seen_funds.insert(id.clone()) {
            let reason = format!("duplicate fund_id '{id}' earlier in the source");
            reject(&mut report.funds.failed_constraint, EntityKind::Fund, issue(reason));
        } else if exists(target.get_fund(&id).await)? {
            debug!("Fund {} already present in target", id);
            report
                .funds
                .skipped_existing
                .push(issue("already present in the target".to_string()));
        } else if options.dry_run {
            report.funds.migrated.push(id.to_string());
        } else {
            match write_outcome(target.insert_fund(fund).await)? {
                Ok(()) => report.funds.migrated.push(id.to_string()),
                Err(reason) => {
                    reject(&mut report.funds.failed_constraint, EntityKind::Fund, issue(reason))
                }
            }
        }
        on_record();
    }

    let mut seen_investments: HashSet<InvestmentId> = HashSet::new();
    for (index, investment) in investments {
        let id = investment.investment_id.clone();
        let issue = |reason: String| RecordIssue {
            index,
            id: Some(id.to_string()),
            reason,
        };
        if !seen_investments.insert(id.clone()) {
            let reason = format!("duplicate investment_id '{id}' earlier in the source");
            reject(
                &mut report.investments.failed_constraint,
                EntityKind::Investment,
                issue(reason),
            );
        } else if exists(target.get_investment(&id).await)? {
            debug!("Investment {} already present in target", id);
            report
                .investments
                .skipped_existing
                .push(issue("already present in the target".to_string()));
        } else if options.dry_run {
            report.investments.migrated.push(id.to_string());
        } else {
            match write_outcome(target.insert_investment(investment).await)? {
                Ok(()) => report.investments.migrated.push(id.to_string()),
                Err(reason) => reject(
                    &mut report.investments.failed_constraint,
                    EntityKind::Investment,
                    issue(reason),
                ),
            }
        }
        on_record();
    }

    info!(
        funds_migrated = report.funds.migrated.len(),
        funds_rejected = report.funds.rejected(),
        investments_migrated = report.investments.migrated.len(),
        investments_rejected = report.investments.rejected(),
        dry_run = report.dry_run,
        "Migration finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::WriteRules;
    use crate::store::relational::RelationalStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(value: Value) -> DocumentSnapshot {
        DocumentSnapshot::from_slice(value.to_string().as_bytes()).unwrap()
    }

    fn fund(id: &str, name: &str) -> Value {
        json!({
            "fund_id": id,
            "name": name,
            "strategy": "equity",
            "aum": "250.00",
            "created_at": "2023-01-01T00:00:00Z",
            "updated_at": "2023-01-02T00:00:00Z"
        })
    }

    fn investment(id: &str, fund_id: &str, amount: &str) -> Value {
        json!({
            "investment_id": id,
            "fund_id": fund_id,
            "investor_name": "J. Doe",
            "amount": amount,
            "invested_at": "2023-01-01",
            "created_at": "2023-01-01T00:00:00Z",
            "updated_at": "2023-01-01T00:00:00Z"
        })
    }

    fn target() -> RelationalStore {
        RelationalStore::open_in_memory(WriteRules::default()).unwrap()
    }

    #[tokio::test]
    async fn invalid_investment_is_not_reported_as_orphan() {
        let source = snapshot(json!({
            "funds": [fund("f1", "Alpha")],
            "investments": [investment("i1", "missing", "-5")]
        }));
        let report = migrate(&source, &target(), MigrationOptions::default(), &|| {})
            .await
            .unwrap();
        assert_eq!(report.investments.skipped_invalid.len(), 1);
        assert!(report.investments.skipped_orphan.is_empty());
        assert_eq!(report.outcome(), MigrationOutcome::PartialFailure);
    }

    #[tokio::test]
    async fn duplicate_source_ids_fail_the_later_record() {
        let source = snapshot(json!({
            "funds": [fund("f1", "Alpha"), fund("f1", "Beta")],
            "investments": []
        }));
        let store = target();
        let report = migrate(&source, &store, MigrationOptions::default(), &|| {})
            .await
            .unwrap();
        assert_eq!(report.funds.migrated, vec!["f1".to_string()]);
        assert_eq!(report.funds.failed_constraint.len(), 1);
        assert_eq!(report.funds.failed_constraint[0].index, 1);
        assert_eq!(store.get_fund(&FundId::from("f1")).await.unwrap().name, "Alpha");
    }

    #[tokio::test]
    async fn target_constraints_are_reported_per_record() {
        let store = target();
        let source = snapshot(json!({
            "funds": [fund("f1", "Alpha")],
            "investments": [investment("i1", "f1", "10")]
        }));
        migrate(&source, &store, MigrationOptions::default(), &|| {})
            .await
            .unwrap();

        let clash = snapshot(json!({
            "funds": [fund("f2", "ALPHA"), fund("f3", "Gamma")],
            "investments": [investment("i2", "f2", "10"), investment("i3", "f3", "10")]
        }));
        let report = migrate(&clash, &store, MigrationOptions::default(), &|| {})
            .await
            .unwrap();
        assert_eq!(report.funds.migrated, vec!["f3".to_string()]);
        assert_eq!(report.funds.failed_constraint[0].id.as_deref(), Some("f2"));
        assert_eq!(report.investments.migrated, vec!["i3".to_string()]);
        assert_eq!(report.investments.failed_constraint[0].id.as_deref(), Some("i2"));
    }

    #[tokio::test]
    async fn progress_is_reported_once_per_record() {
        let source = snapshot(json!({
            "funds": [fund("f1", "Alpha"), json!("not a record")],
            "investments": [investment("i1", "f1", "10"), investment("i2", "f9", "10")]
        }));
        let calls = AtomicUsize::new(0);
        let report = migrate(&source, &target(), MigrationOptions::default(), &|| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.funds.processed() + report.investments.processed(), 4);
        assert_eq!(report.funds.skipped_invalid[0].id, None);
    }
}
