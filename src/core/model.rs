//! Fund and investment records and their field-level validation.
//!
//! Raw input arrives as a JSON object (`Fields`). Every constructor runs all
//! of its checks before returning, so a failure carries the complete list of
//! violated fields rather than the first one found.

use crate::core::error::{FieldError, ValidationError};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// A raw field mapping as received from a request body or a stored document.
pub type Fields = Map<String, Value>;

pub const MAX_TEXT_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

const FUND_FIELDS: &[&str] = &[
    "fund_id",
    "name",
    "strategy",
    "aum",
    "manager_name",
    "description",
    "performance",
    "created_at",
    "updated_at",
];

const INVESTMENT_FIELDS: &[&str] = &[
    "investment_id",
    "fund_id",
    "investor_name",
    "amount",
    "invested_at",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Fund,
    Investment,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EntityKind::Fund => "fund",
                EntityKind::Investment => "investment",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FundId(String);

impl FundId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FundId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for FundId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl Display for FundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestmentId(String);

impl InvestmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InvestmentId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for InvestmentId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl Display for InvestmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Investment strategy of a fund. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Equity,
    FixedIncome,
    MultiAsset,
    MoneyMarket,
    Alternative,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Equity,
        Strategy::FixedIncome,
        Strategy::MultiAsset,
        Strategy::MoneyMarket,
        Strategy::Alternative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Equity => "equity",
            Strategy::FixedIncome => "fixed-income",
            Strategy::MultiAsset => "multi-asset",
            Strategy::MoneyMarket => "money-market",
            Strategy::Alternative => "alternative",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Strategy::ALL.iter().map(Strategy::as_str).collect();
                format!("must be one of: {}", allowed.join(", "))
            })
    }
}

/// Current time at the precision both backends persist.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Validated input for creating a fund.
#[derive(Debug, Clone, PartialEq)]
pub struct FundDraft {
    pub name: String,
    pub strategy: Strategy,
    pub aum: Decimal,
    pub manager_name: Option<String>,
    pub description: Option<String>,
    pub performance: Option<Decimal>,
}

impl FundDraft {
    pub fn new(name: &str, strategy: Strategy, aum: Decimal) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            aum,
            manager_name: None,
            description: None,
            performance: None,
        }
    }

    /// Builds a draft from a create request. `aum` defaults to zero.
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        check.reject_present(
            fields,
            &["fund_id", "created_at", "updated_at"],
            "is assigned by the server",
        );
        check.reject_unknown(fields, FUND_FIELDS);

        let name = check.required(fields, "name", parse_text);
        let strategy = check.required(fields, "strategy", parse_strategy);
        let aum = check.optional(fields, "aum", |v| parse_decimal(v).and_then(check_aum));
        let manager_name = check.optional(fields, "manager_name", parse_text);
        let description = check.optional(fields, "description", parse_description);
        let performance = check.optional(fields, "performance", |v| {
            parse_decimal(v).and_then(check_performance)
        });

        let (
            Some(name),
            Some(strategy),
            Some(aum),
            Some(manager_name),
            Some(description),
            Some(performance),
        ) = (name, strategy, aum, manager_name, description, performance)
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        Ok(Self {
            name,
            strategy,
            aum: aum.unwrap_or(Decimal::ZERO),
            manager_name,
            description,
            performance,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub fund_id: FundId,
    pub name: String,
    pub strategy: Strategy,
    pub aum: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fund {
    /// Assigns a fresh identifier and timestamps to a validated draft.
    pub fn new(draft: FundDraft, now: DateTime<Utc>) -> Self {
        Self {
            fund_id: FundId::generate(),
            name: draft.name,
            strategy: draft.strategy,
            aum: draft.aum,
            manager_name: draft.manager_name,
            description: draft.description,
            performance: draft.performance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parses a complete persisted record, identifier and timestamps included.
    /// Fields this model does not know are ignored.
    pub fn from_record(fields: &Fields) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        let fund_id = check.required(fields, "fund_id", parse_identifier);
        let name = check.required(fields, "name", parse_text);
        let strategy = check.required(fields, "strategy", parse_strategy);
        let aum = check.required(fields, "aum", |v| parse_decimal(v).and_then(check_aum));
        let manager_name = check.optional(fields, "manager_name", parse_text);
        let description = check.optional(fields, "description", parse_description);
        let performance = check.optional(fields, "performance", |v| {
            parse_decimal(v).and_then(check_performance)
        });
        let created_at = check.required(fields, "created_at", parse_timestamp);
        let updated_at = check.required(fields, "updated_at", parse_timestamp);

        let (
            Some(fund_id),
            Some(name),
            Some(strategy),
            Some(aum),
            Some(manager_name),
            Some(description),
            Some(performance),
            Some(created_at),
            Some(updated_at),
        ) = (
            fund_id,
            name,
            strategy,
            aum,
            manager_name,
            description,
            performance,
            created_at,
            updated_at,
        )
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        let fund = Self {
            fund_id: FundId::from(fund_id),
            name,
            strategy,
            aum,
            manager_name,
            description,
            performance,
            created_at,
            updated_at,
        };
        fund.validate()?;
        Ok(fund)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut check = Checker::default();
        check.check("fund_id", check_identifier(self.fund_id.as_str()));
        check.check("name", check_text(&self.name, MAX_TEXT_LEN));
        check.check("aum", check_aum(self.aum));
        if let Some(manager_name) = &self.manager_name {
            check.check("manager_name", check_text(manager_name, MAX_TEXT_LEN));
        }
        if let Some(description) = &self.description {
            check.check("description", check_text(description, MAX_DESCRIPTION_LEN));
        }
        if let Some(performance) = self.performance {
            check.check("performance", check_performance(performance));
        }
        if self.updated_at < self.created_at {
            check.fail("updated_at", "must not be earlier than created_at");
        }
        check.finish()
    }

    /// Merges `patch` into a copy of this fund and re-validates the result.
    pub fn apply(&self, patch: &FundPatch, now: DateTime<Utc>) -> Result<Fund, ValidationError> {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(strategy) = patch.strategy {
            next.strategy = strategy;
        }
        if let Some(aum) = patch.aum {
            next.aum = aum;
        }
        if let Some(manager_name) = &patch.manager_name {
            next.manager_name = manager_name.clone();
        }
        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(performance) = patch.performance {
            next.performance = performance;
        }
        next.updated_at = now.max(self.created_at);
        next.validate()?;
        Ok(next)
    }
}

/// Partial update of a fund. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundPatch {
    pub name: Option<String>,
    pub strategy: Option<Strategy>,
    pub aum: Option<Decimal>,
    pub manager_name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub performance: Option<Option<Decimal>>,
}

impl FundPatch {
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        if fields.is_empty() {
            check.fail("body", "must contain at least one field to update");
        }
        check.reject_present(fields, &["fund_id", "created_at", "updated_at"], "is immutable");
        check.reject_unknown(fields, FUND_FIELDS);

        let name = check.patch(fields, "name", parse_text);
        let strategy = check.patch(fields, "strategy", parse_strategy);
        let aum = check.patch(fields, "aum", |v| parse_decimal(v).and_then(check_aum));
        let manager_name = check.patch_nullable(fields, "manager_name", parse_text);
        let description = check.patch_nullable(fields, "description", parse_description);
        let performance = check.patch_nullable(fields, "performance", |v| {
            parse_decimal(v).and_then(check_performance)
        });

        let (
            Some(name),
            Some(strategy),
            Some(aum),
            Some(manager_name),
            Some(description),
            Some(performance),
        ) = (name, strategy, aum, manager_name, description, performance)
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        Ok(Self {
            name,
            strategy,
            aum,
            manager_name,
            description,
            performance,
        })
    }
}

/// Validated input for creating an investment.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestmentDraft {
    pub fund_id: FundId,
    pub investor_name: String,
    pub amount: Decimal,
    pub invested_at: NaiveDate,
}

impl InvestmentDraft {
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        Self::from_fields_at(fields, today())
    }

    /// Same as `from_fields`, judging `invested_at` against `today`.
    pub fn from_fields_at(fields: &Fields, today: NaiveDate) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        check.reject_present(
            fields,
            &["investment_id", "created_at", "updated_at"],
            "is assigned by the server",
        );
        check.reject_unknown(fields, INVESTMENT_FIELDS);

        let fund_id = check.required(fields, "fund_id", parse_identifier);
        let investor_name = check.required(fields, "investor_name", parse_text);
        let amount = check.required(fields, "amount", |v| {
            parse_decimal(v).and_then(check_amount)
        });
        let invested_at = check.required(fields, "invested_at", |v| {
            parse_date(v).and_then(|d| check_invested_at(d, today))
        });

        let (Some(fund_id), Some(investor_name), Some(amount), Some(invested_at)) =
            (fund_id, investor_name, amount, invested_at)
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        Ok(Self {
            fund_id: FundId::from(fund_id),
            investor_name,
            amount,
            invested_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub investment_id: InvestmentId,
    pub fund_id: FundId,
    pub investor_name: String,
    pub amount: Decimal,
    pub invested_at: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn new(draft: InvestmentDraft, now: DateTime<Utc>) -> Self {
        Self {
            investment_id: InvestmentId::generate(),
            fund_id: draft.fund_id,
            investor_name: draft.investor_name,
            amount: draft.amount,
            invested_at: draft.invested_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_record(fields: &Fields) -> Result<Self, ValidationError> {
        Self::from_record_at(fields, today())
    }

    /// Parses a complete persisted record. Fields this model does not know
    /// are ignored.
    pub fn from_record_at(fields: &Fields, today: NaiveDate) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        let investment_id = check.required(fields, "investment_id", parse_identifier);
        let fund_id = check.required(fields, "fund_id", parse_identifier);
        let investor_name = check.required(fields, "investor_name", parse_text);
        let amount = check.required(fields, "amount", |v| {
            parse_decimal(v).and_then(check_amount)
        });
        let invested_at = check.required(fields, "invested_at", |v| {
            parse_date(v).and_then(|d| check_invested_at(d, today))
        });
        let created_at = check.required(fields, "created_at", parse_timestamp);
        let updated_at = check.required(fields, "updated_at", parse_timestamp);

        let (
            Some(investment_id),
            Some(fund_id),
            Some(investor_name),
            Some(amount),
            Some(invested_at),
            Some(created_at),
            Some(updated_at),
        ) = (
            investment_id,
            fund_id,
            investor_name,
            amount,
            invested_at,
            created_at,
            updated_at,
        )
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        let investment = Self {
            investment_id: InvestmentId::from(investment_id),
            fund_id: FundId::from(fund_id),
            investor_name,
            amount,
            invested_at,
            created_at,
            updated_at,
        };
        investment.validate(today)?;
        Ok(investment)
    }

    pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
        let mut check = Checker::default();
        check.check("investment_id", check_identifier(self.investment_id.as_str()));
        check.check("fund_id", check_identifier(self.fund_id.as_str()));
        check.check("investor_name", check_text(&self.investor_name, MAX_TEXT_LEN));
        check.check("amount", check_amount(self.amount));
        check.check("invested_at", check_invested_at(self.invested_at, today));
        if self.updated_at < self.created_at {
            check.fail("updated_at", "must not be earlier than created_at");
        }
        check.finish()
    }

    pub fn apply(
        &self,
        patch: &InvestmentPatch,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Investment, ValidationError> {
        let mut next = self.clone();
        if let Some(fund_id) = &patch.fund_id {
            next.fund_id = fund_id.clone();
        }
        if let Some(investor_name) = &patch.investor_name {
            next.investor_name = investor_name.clone();
        }
        if let Some(amount) = patch.amount {
            next.amount = amount;
        }
        if let Some(invested_at) = patch.invested_at {
            next.invested_at = invested_at;
        }
        next.updated_at = now.max(self.created_at);
        next.validate(today)?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvestmentPatch {
    pub fund_id: Option<FundId>,
    pub investor_name: Option<String>,
    pub amount: Option<Decimal>,
    pub invested_at: Option<NaiveDate>,
}

impl InvestmentPatch {
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        Self::from_fields_at(fields, today())
    }

    pub fn from_fields_at(fields: &Fields, today: NaiveDate) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        if fields.is_empty() {
            check.fail("body", "must contain at least one field to update");
        }
        check.reject_present(
            fields,
            &["investment_id", "created_at", "updated_at"],
            "is immutable",
        );
        check.reject_unknown(fields, INVESTMENT_FIELDS);

        let fund_id = check.patch(fields, "fund_id", parse_identifier);
        let investor_name = check.patch(fields, "investor_name", parse_text);
        let amount = check.patch(fields, "amount", |v| {
            parse_decimal(v).and_then(check_amount)
        });
        let invested_at = check.patch(fields, "invested_at", |v| {
            parse_date(v).and_then(|d| check_invested_at(d, today))
        });

        let (Some(fund_id), Some(investor_name), Some(amount), Some(invested_at)) =
            (fund_id, investor_name, amount, invested_at)
        else {
            return Err(check.into_error());
        };
        check.finish()?;

        Ok(Self {
            fund_id: fund_id.map(FundId::from),
            investor_name,
            amount,
            invested_at,
        })
    }
}

/// Collects field errors so that every check runs before reporting.
#[derive(Default)]
pub(crate) struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    pub(crate) fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub(crate) fn check<T>(&mut self, field: &str, result: Result<T, String>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(message) => {
                self.fail(field, message);
                None
            }
        }
    }

    /// Missing or null is an error.
    pub(crate) fn required<T>(
        &mut self,
        fields: &Fields,
        key: &str,
        parse: impl FnOnce(&Value) -> Result<T, String>,
    ) -> Option<T> {
        match fields.get(key) {
            None | Some(Value::Null) => {
                self.fail(key, "is required");
                None
            }
            Some(value) => self.check(key, parse(value)),
        }
    }

    /// Missing or null yields `Some(None)`; a parse failure yields `None`.
    pub(crate) fn optional<T>(
        &mut self,
        fields: &Fields,
        key: &str,
        parse: impl FnOnce(&Value) -> Result<T, String>,
    ) -> Option<Option<T>> {
        match fields.get(key) {
            None | Some(Value::Null) => Some(None),
            Some(value) => self.check(key, parse(value)).map(Some),
        }
    }

    /// Like `optional`, but an explicit null is rejected.
    pub(crate) fn patch<T>(
        &mut self,
        fields: &Fields,
        key: &str,
        parse: impl FnOnce(&Value) -> Result<T, String>,
    ) -> Option<Option<T>> {
        match fields.get(key) {
            None => Some(None),
            Some(Value::Null) => {
                self.fail(key, "must not be null");
                None
            }
            Some(value) => self.check(key, parse(value)).map(Some),
        }
    }

    fn patch_nullable<T>(
        &mut self,
        fields: &Fields,
        key: &str,
        parse: impl FnOnce(&Value) -> Result<T, String>,
    ) -> Option<Option<Option<T>>> {
        match fields.get(key) {
            None => Some(None),
            Some(Value::Null) => Some(Some(None)),
            Some(value) => self.check(key, parse(value)).map(|v| Some(Some(v))),
        }
    }

    pub(crate) fn reject_unknown(&mut self, fields: &Fields, known: &[&str]) {
        for key in fields.keys() {
            if !known.contains(&key.as_str()) {
                self.fail(key, "is not a recognised field");
            }
        }
    }

    fn reject_present(&mut self, fields: &Fields, keys: &[&str], message: &str) {
        for key in keys {
            if fields.contains_key(*key) {
                self.fail(key, message);
            }
        }
    }

    pub(crate) fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    pub(crate) fn into_error(self) -> ValidationError {
        ValidationError {
            field_errors: self.errors,
        }
    }
}

fn check_text(s: &str, max_len: usize) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.chars().count() > max_len {
        return Err(format!("must be at most {max_len} characters"));
    }
    Ok(s.to_string())
}

fn check_identifier(s: &str) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() {
        Err("must not be empty".to_string())
    } else if s.chars().any(char::is_whitespace) {
        Err("must not contain whitespace".to_string())
    } else {
        Ok(s.to_string())
    }
}

fn check_aum(aum: Decimal) -> Result<Decimal, String> {
    if aum < Decimal::ZERO {
        Err("must not be negative".to_string())
    } else {
        Ok(aum)
    }
}

fn check_amount(amount: Decimal) -> Result<Decimal, String> {
    if amount <= Decimal::ZERO {
        Err("must be greater than zero".to_string())
    } else {
        Ok(amount)
    }
}

fn check_performance(performance: Decimal) -> Result<Decimal, String> {
    if performance < Decimal::ZERO || performance > Decimal::ONE_HUNDRED {
        Err("must be a percentage between 0 and 100".to_string())
    } else {
        Ok(performance)
    }
}

fn check_invested_at(date: NaiveDate, today: NaiveDate) -> Result<NaiveDate, String> {
    if date > today {
        Err(format!("must not be in the future (today is {today})"))
    } else {
        Ok(date)
    }
}

pub(crate) fn parse_text(value: &Value) -> Result<String, String> {
    let s = value.as_str().ok_or("must be a string")?;
    check_text(s, MAX_TEXT_LEN)
}

fn parse_description(value: &Value) -> Result<String, String> {
    let s = value.as_str().ok_or("must be a string")?;
    check_text(s, MAX_DESCRIPTION_LEN)
}

pub(crate) fn parse_identifier(value: &Value) -> Result<String, String> {
    let s = value.as_str().ok_or("must be a string")?;
    check_identifier(s)
}

pub(crate) fn parse_strategy(value: &Value) -> Result<Strategy, String> {
    value.as_str().ok_or("must be a string")?.parse()
}

/// Accepts JSON numbers and decimal strings, including scientific notation.
pub(crate) fn parse_decimal(value: &Value) -> Result<Decimal, String> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err("must be a decimal number".to_string()),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| "must be a decimal number".to_string())
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp, keeping its UTC date.
pub(crate) fn parse_date(value: &Value) -> Result<NaiveDate, String> {
    let s = value.as_str().ok_or("must be a date string")?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc).date_naive()))
        .map_err(|_| "must be a date in YYYY-MM-DD format".to_string())
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    let s = value.as_str().ok_or("must be an RFC 3339 timestamp")?;
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(6))
        .map_err(|_| "must be an RFC 3339 timestamp".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().expect("test input must be an object")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn fund_draft_accepts_valid_input() {
        let draft = FundDraft::from_fields(&fields(json!({
            "name": "  Alpha Growth ",
            "strategy": "equity",
            "aum": 0
        })))
        .unwrap();

        assert_eq!(draft.name, "Alpha Growth");
        assert_eq!(draft.strategy, Strategy::Equity);
        assert_eq!(draft.aum, Decimal::ZERO);
        assert!(draft.manager_name.is_none());
    }

    #[test]
    fn fund_draft_defaults_aum_to_zero() {
        let draft = FundDraft::from_fields(&fields(json!({
            "name": "Beta",
            "strategy": "Fixed Income"
        })))
        .unwrap();
        assert_eq!(draft.aum, Decimal::ZERO);
        assert_eq!(draft.strategy, Strategy::FixedIncome);
    }

    #[test]
    fn fund_draft_reports_every_invalid_field() {
        let err = FundDraft::from_fields(&fields(json!({
            "name": "   ",
            "strategy": "crypto",
            "aum": -5,
            "performance": 140,
            "fund_id": "fund001",
            "colour": "blue"
        })))
        .unwrap_err();

        for field in ["name", "strategy", "aum", "performance", "fund_id", "colour"] {
            assert!(err.has_field(field), "missing error for {field}: {err}");
        }
        assert_eq!(err.field_errors.len(), 6);
    }

    #[test]
    fn fund_draft_requires_name_and_strategy() {
        let err = FundDraft::from_fields(&Fields::new()).unwrap_err();
        assert_eq!(
            err.field_errors,
            vec![
                FieldError::new("name", "is required"),
                FieldError::new("strategy", "is required"),
            ]
        );
    }

    #[test]
    fn decimals_parse_from_numbers_and_strings() {
        assert_eq!(
            parse_decimal(&json!(1500000.75)).unwrap(),
            Decimal::from_str("1500000.75").unwrap()
        );
        assert_eq!(
            parse_decimal(&json!("1000.50")).unwrap(),
            Decimal::from_str("1000.50").unwrap()
        );
        assert_eq!(parse_decimal(&json!("1e3")).unwrap(), Decimal::from(1000));
        assert!(parse_decimal(&json!(true)).is_err());
        assert!(parse_decimal(&json!("ten")).is_err());
    }

    #[test]
    fn strategy_parsing_is_lenient_about_separators() {
        assert_eq!("MULTI_ASSET".parse::<Strategy>(), Ok(Strategy::MultiAsset));
        assert_eq!("money market".parse::<Strategy>(), Ok(Strategy::MoneyMarket));
        let err = "hedge".parse::<Strategy>().unwrap_err();
        assert!(err.contains("fixed-income"));
    }

    #[test]
    fn investment_draft_rejects_non_positive_amount_and_future_date() {
        let err = InvestmentDraft::from_fields_at(
            &fields(json!({
                "fund_id": "fund001",
                "investor_name": "J. Doe",
                "amount": 0,
                "invested_at": "2023-01-02"
            })),
            date("2023-01-01"),
        )
        .unwrap_err();

        assert!(err.has_field("amount"));
        assert!(err.has_field("invested_at"));
        assert_eq!(err.field_errors.len(), 2);
    }

    #[test]
    fn investment_draft_accepts_timestamp_dates() {
        let draft = InvestmentDraft::from_fields_at(
            &fields(json!({
                "fund_id": "fund001",
                "investor_name": "J. Doe",
                "amount": "1000",
                "invested_at": "2023-01-01T10:00:00Z"
            })),
            date("2024-01-01"),
        )
        .unwrap();
        assert_eq!(draft.invested_at, date("2023-01-01"));
        assert_eq!(draft.amount, Decimal::from(1000));
        assert_eq!(draft.fund_id, FundId::from("fund001"));
    }

    #[test]
    fn fund_record_round_trips_through_serde() {
        let fund = Fund::new(FundDraft::new("Gamma", Strategy::MultiAsset, Decimal::from(10)), now());
        let value = serde_json::to_value(&fund).unwrap();
        let parsed = Fund::from_record(value.as_object().unwrap()).unwrap();
        assert_eq!(parsed, fund);
    }

    #[test]
    fn fund_record_requires_identity_and_timestamps() {
        let err = Fund::from_record(&fields(json!({
            "name": "Legacy",
            "strategy": "equity",
            "aum": 10
        })))
        .unwrap_err();
        assert!(err.has_field("fund_id"));
        assert!(err.has_field("created_at"));
        assert!(err.has_field("updated_at"));
    }

    #[test]
    fn fund_record_rejects_updated_before_created() {
        let err = Fund::from_record(&fields(json!({
            "fund_id": "fund001",
            "name": "Legacy",
            "strategy": "equity",
            "aum": 10,
            "created_at": "2024-08-22T14:30:00Z",
            "updated_at": "2024-08-21T14:30:00Z"
        })))
        .unwrap_err();
        assert_eq!(err.field_errors.len(), 1);
        assert!(err.has_field("updated_at"));
    }

    #[test]
    fn fund_patch_rejects_immutable_and_empty() {
        let err = FundPatch::from_fields(&fields(json!({"fund_id": "x"}))).unwrap_err();
        assert_eq!(err.field_errors, vec![FieldError::new("fund_id", "is immutable")]);

        let err = FundPatch::from_fields(&Fields::new()).unwrap_err();
        assert!(err.has_field("body"));
    }

    #[test]
    fn fund_patch_null_clears_nullable_fields_only() {
        let patch =
            FundPatch::from_fields(&fields(json!({"manager_name": null, "performance": 7.5})))
                .unwrap();
        assert_eq!(patch.manager_name, Some(None));
        assert_eq!(patch.performance, Some(Some(Decimal::from_str("7.5").unwrap())));

        let err = FundPatch::from_fields(&fields(json!({"name": null}))).unwrap_err();
        assert_eq!(err.field_errors, vec![FieldError::new("name", "must not be null")]);
    }

    #[test]
    fn fund_apply_merges_and_revalidates() {
        let created = now();
        let fund = Fund::new(
            FundDraft::new("Delta", Strategy::Equity, Decimal::from(100)),
            created,
        );
        let patch = FundPatch {
            aum: Some(Decimal::from(250)),
            performance: Some(Some(Decimal::from(12))),
            ..Default::default()
        };
        let updated = fund.apply(&patch, created + chrono::Duration::seconds(5)).unwrap();
        assert_eq!(updated.fund_id, fund.fund_id);
        assert_eq!(updated.aum, Decimal::from(250));
        assert_eq!(updated.performance, Some(Decimal::from(12)));
        assert!(updated.updated_at > fund.updated_at);

        let bad = FundPatch {
            aum: Some(Decimal::from(-1)),
            ..Default::default()
        };
        assert!(fund.apply(&bad, created).unwrap_err().has_field("aum"));
    }

    #[test]
    fn investment_apply_checks_merged_date() {
        let created = now();
        let investment = Investment::new(
            InvestmentDraft {
                fund_id: FundId::from("fund001"),
                investor_name: "J. Doe".to_string(),
                amount: Decimal::from(1000),
                invested_at: date("2023-01-01"),
            },
            created,
        );
        let patch = InvestmentPatch {
            invested_at: Some(date("2023-06-01")),
            ..Default::default()
        };
        let err = investment
            .apply(&patch, created, date("2023-03-01"))
            .unwrap_err();
        assert!(err.has_field("invested_at"));

        let patched = investment
            .apply(&patch, created, date("2023-07-01"))
            .unwrap();
        assert_eq!(patched.invested_at, date("2023-06-01"));
        assert_eq!(patched.investment_id, investment.investment_id);
    }

    #[test]
    fn investment_patch_rejects_immutable_identifier() {
        let err = InvestmentPatch::from_fields(&fields(json!({
            "investment_id": "inv-1",
            "amount": -3
        })))
        .unwrap_err();
        assert!(err.has_field("investment_id"));
        assert!(err.has_field("amount"));
    }
}
