//! SQLite backend.
//!
//! A single connection sits behind a mutex, so writes are serialized, and
//! every operation runs in its own transaction on the blocking pool. Foreign
//! keys, uniqueness and value ranges are also declared in the schema; those
//! constraints back up the checks done here before each write.

use super::filter::{FundFilter, InvestmentFilter};
use super::{DeleteMode, FundStore};
use crate::core::error::{Result, StoreError, ValidationError};
use crate::core::model::{
    EntityKind, Fund, FundDraft, FundId, FundPatch, Investment, InvestmentDraft, InvestmentId,
    InvestmentPatch, Strategy, now, today,
};
use crate::core::rules::{WriteRules, add_to_total};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, ffi, params, params_from_iter,
};
use rust_decimal::Decimal;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info};

const FUND_COLUMNS: &str =
    "fund_id, name, strategy, aum, manager_name, description, performance, created_at, updated_at";

const INVESTMENT_COLUMNS: &str =
    "investment_id, fund_id, investor_name, amount, invested_at, created_at, updated_at";

fn schema(cascade_on_delete: bool) -> String {
    let on_delete = if cascade_on_delete {
        "CASCADE"
    } else {
        "RESTRICT"
    };
    let strategies = Strategy::ALL
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS funds (
            fund_id TEXT NOT NULL PRIMARY KEY,
            name TEXT NOT NULL COLLATE NOCASE UNIQUE,
            strategy TEXT NOT NULL CHECK (strategy IN ({strategies})),
            aum TEXT NOT NULL CHECK (CAST(aum AS REAL) >= 0),
            manager_name TEXT,
            description TEXT,
            performance TEXT CHECK (performance IS NULL OR CAST(performance AS REAL) BETWEEN 0 AND 100),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS investments (
            investment_id TEXT NOT NULL PRIMARY KEY,
            fund_id TEXT NOT NULL REFERENCES funds(fund_id) ON DELETE {on_delete},
            investor_name TEXT NOT NULL,
            amount TEXT NOT NULL CHECK (CAST(amount AS REAL) > 0),
            invested_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_investments_fund_id ON investments (fund_id);"
    )
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

/// Maps constraint failures raised by the schema to the store taxonomy.
fn map_write_error(err: rusqlite::Error, entity: EntityKind) -> StoreError {
    let rusqlite::Error::SqliteFailure(failure, message) = &err else {
        return err.into();
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return err.into();
    }
    let message = message.clone().unwrap_or_else(|| err.to_string());
    match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            // "UNIQUE constraint failed: funds.name"
            let column = message.rsplit('.').next().unwrap_or("record").to_string();
            StoreError::DuplicateKey {
                entity,
                field: column,
                value: message,
            }
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
            StoreError::Conflict(format!("{entity} write violates a foreign key: {message}"))
        }
        _ => StoreError::Validation(ValidationError::single("record", message)),
    }
}

fn corrupt(entity: EntityKind, id: &str, column: &str, err: impl Display) -> StoreError {
    StoreError::StorageUnavailable(format!("stored {entity} '{id}' has unreadable {column}: {err}"))
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(entity: EntityKind, id: &str, column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(entity, id, column, e))
}

fn decode_decimal(entity: EntityKind, id: &str, column: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| corrupt(entity, id, column, e))
}

struct FundRow {
    fund_id: String,
    name: String,
    strategy: String,
    aum: String,
    manager_name: Option<String>,
    description: Option<String>,
    performance: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FundRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fund_id: row.get(0)?,
            name: row.get(1)?,
            strategy: row.get(2)?,
            aum: row.get(3)?,
            manager_name: row.get(4)?,
            description: row.get(5)?,
            performance: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_fund(self) -> Result<Fund> {
        let kind = EntityKind::Fund;
        let id = self.fund_id.as_str();
        let strategy = self
            .strategy
            .parse::<Strategy>()
            .map_err(|e| corrupt(kind, id, "strategy", e))?;
        let aum = decode_decimal(kind, id, "aum", &self.aum)?;
        let performance = self
            .performance
            .as_deref()
            .map(|raw| decode_decimal(kind, id, "performance", raw))
            .transpose()?;
        let created_at = decode_timestamp(kind, id, "created_at", &self.created_at)?;
        let updated_at = decode_timestamp(kind, id, "updated_at", &self.updated_at)?;
        Ok(Fund {
            fund_id: FundId::from(self.fund_id.as_str()),
            name: self.name,
            strategy,
            aum,
            manager_name: self.manager_name,
            description: self.description,
            performance,
            created_at,
            updated_at,
        })
    }
}

struct InvestmentRow {
    investment_id: String,
    fund_id: String,
    investor_name: String,
    amount: String,
    invested_at: String,
    created_at: String,
    updated_at: String,
}

impl InvestmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            investment_id: row.get(0)?,
            fund_id: row.get(1)?,
            investor_name: row.get(2)?,
            amount: row.get(3)?,
            invested_at: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_investment(self) -> Result<Investment> {
        let kind = EntityKind::Investment;
        let id = self.investment_id.as_str();
        let amount = decode_decimal(kind, id, "amount", &self.amount)?;
        let invested_at = NaiveDate::parse_from_str(&self.invested_at, "%Y-%m-%d")
            .map_err(|e| corrupt(kind, id, "invested_at", e))?;
        let created_at = decode_timestamp(kind, id, "created_at", &self.created_at)?;
        let updated_at = decode_timestamp(kind, id, "updated_at", &self.updated_at)?;
        Ok(Investment {
            investment_id: InvestmentId::from(self.investment_id.as_str()),
            fund_id: FundId::from(self.fund_id),
            investor_name: self.investor_name,
            amount,
            invested_at,
            created_at,
            updated_at,
        })
    }
}

fn load_fund(tx: &Transaction<'_>, id: &FundId) -> Result<Option<Fund>> {
    tx.query_row(
        &format!("SELECT {FUND_COLUMNS} FROM funds WHERE fund_id = ?1"),
        params![id.as_str()],
        FundRow::from_row,
    )
    .optional()?
    .map(FundRow::into_fund)
    .transpose()
}

fn require_fund(tx: &Transaction<'_>, id: &FundId) -> Result<Fund> {
    load_fund(tx, id)?.ok_or_else(|| StoreError::not_found(EntityKind::Fund, id.as_str()))
}

fn fund_exists(tx: &Transaction<'_>, id: &FundId) -> Result<bool> {
    let found = tx
        .query_row(
            "SELECT 1 FROM funds WHERE fund_id = ?1",
            params![id.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// The name column collates NOCASE, matching the document backend's ASCII
/// case-insensitive comparison.
fn ensure_name_free(tx: &Transaction<'_>, name: &str, except: Option<&FundId>) -> Result<()> {
    let holder: Option<String> = tx
        .query_row(
            "SELECT fund_id FROM funds WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    match holder {
        Some(holder) if except.is_none_or(|id| id.as_str() != holder) => {
            Err(StoreError::duplicate(EntityKind::Fund, "name", name))
        }
        _ => Ok(()),
    }
}

fn insert_fund_row(tx: &Transaction<'_>, fund: &Fund) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO funds ({FUND_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            fund.fund_id.as_str(),
            fund.name,
            fund.strategy.as_str(),
            fund.aum.to_string(),
            fund.manager_name,
            fund.description,
            fund.performance.map(|p| p.to_string()),
            encode_timestamp(&fund.created_at),
            encode_timestamp(&fund.updated_at),
        ],
    )
    .map_err(|e| map_write_error(e, EntityKind::Fund))?;
    Ok(())
}

fn update_fund_row(tx: &Transaction<'_>, fund: &Fund) -> Result<()> {
    tx.execute(
        "UPDATE funds SET name = ?2, strategy = ?3, aum = ?4, manager_name = ?5,
             description = ?6, performance = ?7, updated_at = ?8
         WHERE fund_id = ?1",
        params![
            fund.fund_id.as_str(),
            fund.name,
            fund.strategy.as_str(),
            fund.aum.to_string(),
            fund.manager_name,
            fund.description,
            fund.performance.map(|p| p.to_string()),
            encode_timestamp(&fund.updated_at),
        ],
    )
    .map_err(|e| map_write_error(e, EntityKind::Fund))?;
    Ok(())
}

fn load_investment(tx: &Transaction<'_>, id: &InvestmentId) -> Result<Option<Investment>> {
    tx.query_row(
        &format!("SELECT {INVESTMENT_COLUMNS} FROM investments WHERE investment_id = ?1"),
        params![id.as_str()],
        InvestmentRow::from_row,
    )
    .optional()?
    .map(InvestmentRow::into_investment)
    .transpose()
}

fn require_investment(tx: &Transaction<'_>, id: &InvestmentId) -> Result<Investment> {
    load_investment(tx, id)?
        .ok_or_else(|| StoreError::not_found(EntityKind::Investment, id.as_str()))
}

fn insert_investment_row(tx: &Transaction<'_>, investment: &Investment) -> Result<()> {
    tx.execute(
        &format!("INSERT INTO investments ({INVESTMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            investment.investment_id.as_str(),
            investment.fund_id.as_str(),
            investment.investor_name,
            investment.amount.to_string(),
            investment.invested_at.to_string(),
            encode_timestamp(&investment.created_at),
            encode_timestamp(&investment.updated_at),
        ],
    )
    .map_err(|e| map_write_error(e, EntityKind::Investment))?;
    Ok(())
}

fn update_investment_row(tx: &Transaction<'_>, investment: &Investment) -> Result<()> {
    tx.execute(
        "UPDATE investments SET fund_id = ?2, investor_name = ?3, amount = ?4,
             invested_at = ?5, updated_at = ?6
         WHERE investment_id = ?1",
        params![
            investment.investment_id.as_str(),
            investment.fund_id.as_str(),
            investment.investor_name,
            investment.amount.to_string(),
            investment.invested_at.to_string(),
            encode_timestamp(&investment.updated_at),
        ],
    )
    .map_err(|e| map_write_error(e, EntityKind::Investment))?;
    Ok(())
}

fn committed_total(
    tx: &Transaction<'_>,
    fund_id: &FundId,
    except: Option<&InvestmentId>,
) -> Result<Decimal> {
    let mut stmt =
        tx.prepare_cached("SELECT investment_id, amount FROM investments WHERE fund_id = ?1")?;
    let rows = stmt.query_map(params![fund_id.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut total = Decimal::ZERO;
    for row in rows {
        let (id, amount) = row?;
        if except.is_some_and(|e| e.as_str() == id) {
            continue;
        }
        let amount = decode_decimal(EntityKind::Investment, &id, "amount", &amount)?;
        total = add_to_total(total, amount)?;
    }
    Ok(total)
}

fn check_investment_write(
    tx: &Transaction<'_>,
    investment: &Investment,
    rules: &WriteRules,
) -> Result<()> {
    if !fund_exists(tx, &investment.fund_id)? {
        return Err(StoreError::dangling_fund(investment.fund_id.as_str()));
    }
    let committed = committed_total(tx, &investment.fund_id, Some(&investment.investment_id))?;
    rules.check_capacity(&investment.fund_id, committed, investment.amount)?;
    Ok(())
}

/// Sets a fund's `aum` to the sum of its investments, touching `updated_at`
/// only when the value changes.
fn recompute_aum(tx: &Transaction<'_>, fund_id: &FundId) -> Result<()> {
    let total = committed_total(tx, fund_id, None)?;
    if let Some(mut fund) = load_fund(tx, fund_id)? {
        if fund.aum != total {
            fund.aum = total;
            fund.updated_at = now().max(fund.created_at);
            update_fund_row(tx, &fund)?;
        }
    }
    Ok(())
}

pub struct RelationalStore {
    conn: Arc<Mutex<Connection>>,
    rules: Arc<WriteRules>,
}

impl RelationalStore {
    /// Opens (creating if needed) the database at `connection`, a file path
    /// or `:memory:`. `cascade_on_delete` only affects newly created schemas.
    pub fn open(connection: &str, cascade_on_delete: bool, rules: WriteRules) -> Result<Self> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(connection)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
            {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(connection)?
        };
        Self::init(conn, cascade_on_delete, rules)
    }

    pub fn open_in_memory(rules: WriteRules) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, false, rules)
    }

    fn init(conn: Connection, cascade_on_delete: bool, rules: WriteRules) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(&schema(cascade_on_delete))?;
        debug!(cascade_on_delete, "Relational schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            rules: Arc::new(rules),
        })
    }

    /// Runs `work` inside one transaction on the blocking pool. The
    /// transaction commits only when `work` succeeds, so a lock poisoned by a
    /// panicking task guards a rolled back connection and is taken over.
    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>, &WriteRules) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let rules = Arc::clone(&self.rules);
        task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tx = guard.transaction()?;
            let out = work(&tx, &rules)?;
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::StorageUnavailable(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl FundStore for RelationalStore {
    async fn create_fund(&self, draft: FundDraft) -> Result<Fund> {
        self.rules.check_new_fund(&draft)?;
        let fund = Fund::new(draft, now());
        fund.validate()?;
        let created = self
            .run(move |tx, _| {
                ensure_name_free(tx, &fund.name, None)?;
                insert_fund_row(tx, &fund)?;
                Ok(fund)
            })
            .await?;
        info!("Fund created with id: {}", created.fund_id);
        Ok(created)
    }

    async fn insert_fund(&self, mut fund: Fund) -> Result<Fund> {
        fund.validate()?;
        self.run(move |tx, rules| {
            if fund_exists(tx, &fund.fund_id)? {
                return Err(StoreError::duplicate(
                    EntityKind::Fund,
                    "fund_id",
                    fund.fund_id.as_str(),
                ));
            }
            ensure_name_free(tx, &fund.name, None)?;
            if rules.derives_aum() {
                let total = committed_total(tx, &fund.fund_id, None)?;
                if fund.aum != total {
                    debug!(fund_id = %fund.fund_id, stored = %fund.aum, "Derived aum reset to {total}");
                    fund.aum = total;
                }
            }
            insert_fund_row(tx, &fund)?;
            Ok(fund)
        })
        .await
    }

    async fn get_fund(&self, id: &FundId) -> Result<Fund> {
        let id = id.clone();
        self.run(move |tx, _| require_fund(tx, &id)).await
    }

    async fn list_funds(&self, filter: &FundFilter) -> Result<Vec<Fund>> {
        let filter = filter.clone();
        self.run(move |tx, _| {
            let mut conditions = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(name) = &filter.name {
                args.push(name.clone());
                conditions.push(format!("name = ?{}", args.len()));
            }
            if let Some(strategy) = filter.strategy {
                args.push(strategy.as_str().to_string());
                conditions.push(format!("strategy = ?{}", args.len()));
            }

            let mut sql = format!("SELECT {FUND_COLUMNS} FROM funds");
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(" ORDER BY rowid");

            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), FundRow::from_row)?;
            let mut funds = Vec::new();
            for row in rows {
                let fund = row?.into_fund()?;
                if filter.matches(&fund) {
                    funds.push(fund);
                }
            }
            filter.sort(&mut funds);
            Ok(funds)
        })
        .await
    }

    async fn update_fund(&self, id: &FundId, patch: FundPatch) -> Result<Fund> {
        self.rules.check_fund_patch(&patch)?;
        let id = id.clone();
        let updated = self
            .run(move |tx, _| {
                let current = require_fund(tx, &id)?;
                let updated = current.apply(&patch, now())?;
                ensure_name_free(tx, &updated.name, Some(&id))?;
                update_fund_row(tx, &updated)?;
                Ok(updated)
            })
            .await?;
        info!("Fund {} updated", updated.fund_id);
        Ok(updated)
    }

    async fn delete_fund(&self, id: &FundId, mode: DeleteMode) -> Result<()> {
        let id = id.clone();
        let removed = self
            .run(move |tx, _| {
                require_fund(tx, &id)?;
                let dependents: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM investments WHERE fund_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )?;
                if dependents > 0 && mode == DeleteMode::Restrict {
                    return Err(StoreError::Conflict(format!(
                        "fund '{id}' still has {dependents} investment(s); delete them first or request a cascade"
                    )));
                }
                tx.execute(
                    "DELETE FROM investments WHERE fund_id = ?1",
                    params![id.as_str()],
                )?;
                tx.execute("DELETE FROM funds WHERE fund_id = ?1", params![id.as_str()])
                    .map_err(|e| map_write_error(e, EntityKind::Fund))?;
                Ok((id, dependents))
            })
            .await?;
        info!(
            cascaded_investments = removed.1,
            "Fund {} has been removed", removed.0
        );
        Ok(())
    }

    async fn create_investment(&self, draft: InvestmentDraft) -> Result<Investment> {
        let investment = Investment::new(draft, now());
        investment.validate(today())?;
        let created = self
            .run(move |tx, rules| {
                check_investment_write(tx, &investment, rules)?;
                insert_investment_row(tx, &investment)?;
                if rules.derives_aum() {
                    recompute_aum(tx, &investment.fund_id)?;
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
        self.run(move |tx, rules| {
            if load_investment(tx, &investment.investment_id)?.is_some() {
                return Err(StoreError::duplicate(
                    EntityKind::Investment,
                    "investment_id",
                    investment.investment_id.as_str(),
                ));
            }
            check_investment_write(tx, &investment, rules)?;
            insert_investment_row(tx, &investment)?;
            if rules.derives_aum() {
                recompute_aum(tx, &investment.fund_id)?;
            }
            Ok(investment)
        })
        .await
    }

    async fn get_investment(&self, id: &InvestmentId) -> Result<Investment> {
        let id = id.clone();
        self.run(move |tx, _| require_investment(tx, &id)).await
    }

    async fn list_investments(&self, filter: &InvestmentFilter) -> Result<Vec<Investment>> {
        let filter = filter.clone();
        self.run(move |tx, _| {
            let mut conditions = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(fund_id) = &filter.fund_id {
                args.push(fund_id.as_str().to_string());
                conditions.push(format!("fund_id = ?{}", args.len()));
            }
            if let Some(investor_name) = &filter.investor_name {
                args.push(investor_name.clone());
                conditions.push(format!("investor_name = ?{}", args.len()));
            }
            if let Some(from) = filter.invested_from {
                args.push(from.to_string());
                conditions.push(format!("invested_at >= ?{}", args.len()));
            }
            if let Some(to) = filter.invested_to {
                args.push(to.to_string());
                conditions.push(format!("invested_at <= ?{}", args.len()));
            }

            let mut sql = format!("SELECT {INVESTMENT_COLUMNS} FROM investments");
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(" ORDER BY rowid");

            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), InvestmentRow::from_row)?;
            let mut investments = Vec::new();
            for row in rows {
                let investment = row?.into_investment()?;
                if filter.matches(&investment) {
                    investments.push(investment);
                }
            }
            filter.sort(&mut investments);
            Ok(investments)
        })
        .await
    }

    async fn update_investment(
        &self,
        id: &InvestmentId,
        patch: InvestmentPatch,
    ) -> Result<Investment> {
        let id = id.clone();
        let updated = self
            .run(move |tx, rules| {
                let current = require_investment(tx, &id)?;
                let updated = current.apply(&patch, now(), today())?;
                check_investment_write(tx, &updated, rules)?;
                update_investment_row(tx, &updated)?;
                if rules.derives_aum() {
                    recompute_aum(tx, &current.fund_id)?;
                    recompute_aum(tx, &updated.fund_id)?;
                }
                Ok(updated)
            })
            .await?;
        info!("Investment {} updated", updated.investment_id);
        Ok(updated)
    }

    async fn delete_investment(&self, id: &InvestmentId) -> Result<()> {
        let id = id.clone();
        let removed = self
            .run(move |tx, rules| {
                let current = require_investment(tx, &id)?;
                tx.execute(
                    "DELETE FROM investments WHERE investment_id = ?1",
                    params![id.as_str()],
                )?;
                if rules.derives_aum() {
                    recompute_aum(tx, &current.fund_id)?;
                }
                Ok(current)
            })
            .await?;
        info!("Investment {} has been removed", removed.investment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::AumPolicy;
    use tempfile::TempDir;

    fn fund_draft(name: &str) -> FundDraft {
        FundDraft::new(name, Strategy::FixedIncome, Decimal::from(10))
    }

    fn investment_draft(fund_id: &FundId, amount: &str) -> InvestmentDraft {
        InvestmentDraft {
            fund_id: fund_id.clone(),
            investor_name: "J. Doe".to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            invested_at: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn decimals_keep_their_scale() {
        let store = RelationalStore::open_in_memory(WriteRules::default()).unwrap();
        let fund = store.create_fund(fund_draft("Scale")).await.unwrap();
        let created = store
            .create_investment(investment_draft(&fund.fund_id, "1000.50"))
            .await
            .unwrap();
        let fetched = store.get_investment(&created.investment_id).await.unwrap();
        assert_eq!(fetched.amount.to_string(), "1000.50");
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn data_survives_reopening() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("funds.db");
        let path = path.to_str().unwrap();

        let created = {
            let store = RelationalStore::open(path, false, WriteRules::default()).unwrap();
            store.create_fund(fund_draft("Durable")).await.unwrap()
        };

        let store = RelationalStore::open(path, false, WriteRules::default()).unwrap();
        assert_eq!(store.get_fund(&created.fund_id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn schema_backs_up_foreign_keys() {
        let store = RelationalStore::open_in_memory(WriteRules::default()).unwrap();
        let err = store
            .run(|tx, _| {
                tx.execute(
                    &format!(
                        "INSERT INTO investments ({INVESTMENT_COLUMNS}) \
                         VALUES ('i1', 'nope', 'X', '5', '2023-01-01', 'a', 'b')"
                    ),
                    [],
                )
                .map_err(|e| map_write_error(e, EntityKind::Investment))?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn schema_backs_up_unique_names() {
        let store = RelationalStore::open_in_memory(WriteRules::default()).unwrap();
        store.create_fund(fund_draft("Unique")).await.unwrap();
        let clash = Fund::new(fund_draft("UNIQUE"), now());
        let err = store
            .run(move |tx, _| insert_fund_row(tx, &clash))
            .await
            .unwrap_err();
        match err {
            StoreError::DuplicateKey { field, .. } => assert_eq!(field, "name"),
            other => panic!("expected duplicate key, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflowing_total_is_rejected_and_store_stays_usable() {
        let store = RelationalStore::open_in_memory(WriteRules::default()).unwrap();
        let fund = store.create_fund(fund_draft("Huge")).await.unwrap();
        let half = "50000000000000000000000000000";
        store
            .create_investment(investment_draft(&fund.fund_id, half))
            .await
            .unwrap();

        let err = store
            .create_investment(investment_draft(&fund.fund_id, half))
            .await
            .unwrap_err();
        match err {
            StoreError::Validation(e) => assert!(e.has_field("amount")),
            other => panic!("expected validation error, got {other:?}"),
        }
        store
            .create_investment(investment_draft(&fund.fund_id, "1"))
            .await
            .unwrap();
        assert_eq!(store.get_fund(&fund.fund_id).await.unwrap(), fund);
    }

    #[tokio::test]
    async fn panicking_task_does_not_wedge_the_connection() {
        let store = RelationalStore::open_in_memory(WriteRules::default()).unwrap();
        let fund = store.create_fund(fund_draft("Steady")).await.unwrap();
        let err = store
            .run(|tx, _| -> Result<()> {
                tx.execute("DELETE FROM funds", [])?;
                panic!("task blew up mid-transaction");
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert_eq!(store.get_fund(&fund.fund_id).await.unwrap(), fund);
    }

    #[tokio::test]
    async fn derived_insert_starts_from_investment_total() {
        let rules = WriteRules {
            aum_policy: AumPolicy::Derived,
            ..Default::default()
        };
        let store = RelationalStore::open_in_memory(rules).unwrap();
        let mut fund = Fund::new(fund_draft("Legacy"), now());
        fund.aum = Decimal::from(500);
        let inserted = store.insert_fund(fund).await.unwrap();
        assert_eq!(inserted.aum, Decimal::ZERO);
        assert_eq!(store.get_fund(&inserted.fund_id).await.unwrap().aum, Decimal::ZERO);
    }

    #[tokio::test]
    async fn cascade_schema_is_opt_in() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cascade.db");
        let store =
            RelationalStore::open(path.to_str().unwrap(), true, WriteRules::default()).unwrap();
        let ddl: String = store
            .run(|tx, _| {
                Ok(tx.query_row(
                    "SELECT sql FROM sqlite_master WHERE name = 'investments'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert!(ddl.contains("ON DELETE CASCADE"));
    }
}
