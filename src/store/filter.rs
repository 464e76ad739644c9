//! List filters. A filter is a conjunction of equality and range predicates
//! plus an optional sort key; both backends apply them with the same
//! semantics.

use crate::core::error::ValidationError;
use crate::core::model::{
    Checker, Fields, Fund, FundId, Investment, Strategy, parse_date, parse_decimal,
    parse_identifier, parse_strategy, parse_text,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<K> {
    pub key: K,
    pub descending: bool,
}

impl<K> Sort<K> {
    pub fn asc(key: K) -> Self {
        Self {
            key,
            descending: false,
        }
    }

    pub fn desc(key: K) -> Self {
        Self {
            key,
            descending: true,
        }
    }

    fn order(&self, ordering: Ordering) -> Ordering {
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundSortKey {
    Name,
    Aum,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestmentSortKey {
    Amount,
    InvestedAt,
    CreatedAt,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundFilter {
    /// Matched ASCII case-insensitively, like the uniqueness check.
    pub name: Option<String>,
    pub strategy: Option<Strategy>,
    pub min_aum: Option<Decimal>,
    pub max_aum: Option<Decimal>,
    pub sort: Option<Sort<FundSortKey>>,
}

impl FundFilter {
    pub fn matches(&self, fund: &Fund) -> bool {
        self.name
            .as_ref()
            .is_none_or(|name| fund.name.eq_ignore_ascii_case(name))
            && self.strategy.is_none_or(|s| fund.strategy == s)
            && self.min_aum.is_none_or(|min| fund.aum >= min)
            && self.max_aum.is_none_or(|max| fund.aum <= max)
    }

    /// Stable, so ties keep the backend's insertion order.
    pub fn sort(&self, funds: &mut [Fund]) {
        let Some(sort) = self.sort else {
            return;
        };
        funds.sort_by(|a, b| {
            sort.order(match sort.key {
                FundSortKey::Name => a
                    .name
                    .to_ascii_lowercase()
                    .cmp(&b.name.to_ascii_lowercase()),
                FundSortKey::Aum => a.aum.cmp(&b.aum),
                FundSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            })
        });
    }

    /// Parses list query parameters: `name`, `strategy`, `min_aum`,
    /// `max_aum` and `sort` (`name`, `aum`, `created_at`, prefix `-` for
    /// descending).
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        check.reject_unknown(fields, &["name", "strategy", "min_aum", "max_aum", "sort"]);
        let name = check.optional(fields, "name", parse_text);
        let strategy = check.optional(fields, "strategy", parse_strategy);
        let min_aum = check.optional(fields, "min_aum", parse_decimal);
        let max_aum = check.optional(fields, "max_aum", parse_decimal);
        let sort = check.optional(fields, "sort", |v| {
            parse_sort(
                v,
                &[
                    ("name", FundSortKey::Name),
                    ("aum", FundSortKey::Aum),
                    ("created_at", FundSortKey::CreatedAt),
                ],
            )
        });

        let (Some(name), Some(strategy), Some(min_aum), Some(max_aum), Some(sort)) =
            (name, strategy, min_aum, max_aum, sort)
        else {
            return Err(check.into_error());
        };
        if let (Some(min), Some(max)) = (min_aum, max_aum) {
            if min > max {
                check.fail("min_aum", "must not be greater than max_aum");
            }
        }
        check.finish()?;

        Ok(Self {
            name,
            strategy,
            min_aum,
            max_aum,
            sort,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvestmentFilter {
    pub fund_id: Option<FundId>,
    pub investor_name: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub invested_from: Option<NaiveDate>,
    pub invested_to: Option<NaiveDate>,
    pub sort: Option<Sort<InvestmentSortKey>>,
}

impl InvestmentFilter {
    pub fn for_fund(fund_id: &FundId) -> Self {
        Self {
            fund_id: Some(fund_id.clone()),
            ..Default::default()
        }
    }

    pub fn matches(&self, investment: &Investment) -> bool {
        self.fund_id
            .as_ref()
            .is_none_or(|id| &investment.fund_id == id)
            && self
                .investor_name
                .as_ref()
                .is_none_or(|name| &investment.investor_name == name)
            && self.min_amount.is_none_or(|min| investment.amount >= min)
            && self.max_amount.is_none_or(|max| investment.amount <= max)
            && self
                .invested_from
                .is_none_or(|from| investment.invested_at >= from)
            && self.invested_to.is_none_or(|to| investment.invested_at <= to)
    }

    pub fn sort(&self, investments: &mut [Investment]) {
        let Some(sort) = self.sort else {
            return;
        };
        investments.sort_by(|a, b| {
            sort.order(match sort.key {
                InvestmentSortKey::Amount => a.amount.cmp(&b.amount),
                InvestmentSortKey::InvestedAt => a.invested_at.cmp(&b.invested_at),
                InvestmentSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            })
        });
    }

    /// Parses list query parameters: `fund_id`, `investor_name`,
    /// `min_amount`, `max_amount`, `invested_from`, `invested_to` and `sort`
    /// (`amount`, `invested_at`, `created_at`, prefix `-` for descending).
    pub fn from_fields(fields: &Fields) -> Result<Self, ValidationError> {
        let mut check = Checker::default();
        check.reject_unknown(
            fields,
            &[
                "fund_id",
                "investor_name",
                "min_amount",
                "max_amount",
                "invested_from",
                "invested_to",
                "sort",
            ],
        );
        let fund_id = check.optional(fields, "fund_id", parse_identifier);
        let investor_name = check.optional(fields, "investor_name", parse_text);
        let min_amount = check.optional(fields, "min_amount", parse_decimal);
        let max_amount = check.optional(fields, "max_amount", parse_decimal);
        let invested_from = check.optional(fields, "invested_from", parse_date);
        let invested_to = check.optional(fields, "invested_to", parse_date);
        let sort = check.optional(fields, "sort", |v| {
            parse_sort(
                v,
                &[
                    ("amount", InvestmentSortKey::Amount),
                    ("invested_at", InvestmentSortKey::InvestedAt),
                    ("created_at", InvestmentSortKey::CreatedAt),
                ],
            )
        });

        let (
            Some(fund_id),
            Some(investor_name),
            Some(min_amount),
            Some(max_amount),
            Some(invested_from),
            Some(invested_to),
            Some(sort),
        ) = (
            fund_id,
            investor_name,
            min_amount,
            max_amount,
            invested_from,
            invested_to,
            sort,
        )
        else {
            return Err(check.into_error());
        };
        if let (Some(min), Some(max)) = (min_amount, max_amount) {
            if min > max {
                check.fail("min_amount", "must not be greater than max_amount");
            }
        }
        if let (Some(from), Some(to)) = (invested_from, invested_to) {
            if from > to {
                check.fail("invested_from", "must not be after invested_to");
            }
        }
        check.finish()?;

        Ok(Self {
            fund_id: fund_id.map(FundId::from),
            investor_name,
            min_amount,
            max_amount,
            invested_from,
            invested_to,
            sort,
        })
    }
}

fn parse_sort<K: Copy>(value: &Value, keys: &[(&str, K)]) -> Result<Sort<K>, String> {
    let raw = value.as_str().ok_or("must be a string")?.trim();
    let (name, descending) = match raw.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (raw, false),
    };
    keys.iter()
        .find(|(key, _)| *key == name)
        .map(|(_, key)| Sort {
            key: *key,
            descending,
        })
        .ok_or_else(|| {
            let allowed: Vec<&str> = keys.iter().map(|(key, _)| *key).collect();
            format!("must be one of: {} (prefix with '-' for descending)", allowed.join(", "))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{FundDraft, InvestmentDraft, now};
    use serde_json::json;

    fn fund(name: &str, strategy: Strategy, aum: i64) -> Fund {
        Fund::new(FundDraft::new(name, strategy, Decimal::from(aum)), now())
    }

    #[test]
    fn fund_filter_is_a_conjunction() {
        let filter = FundFilter {
            strategy: Some(Strategy::Equity),
            min_aum: Some(Decimal::from(100)),
            ..Default::default()
        };
        assert!(filter.matches(&fund("A", Strategy::Equity, 150)));
        assert!(!filter.matches(&fund("B", Strategy::Equity, 50)));
        assert!(!filter.matches(&fund("C", Strategy::FixedIncome, 150)));
    }

    #[test]
    fn fund_name_filter_ignores_ascii_case() {
        let filter = FundFilter {
            name: Some("alpha growth".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&fund("Alpha Growth", Strategy::Equity, 0)));
    }

    #[test]
    fn fund_sort_descending_by_aum() {
        let mut funds = vec![
            fund("A", Strategy::Equity, 10),
            fund("B", Strategy::Equity, 30),
            fund("C", Strategy::Equity, 20),
        ];
        let filter = FundFilter {
            sort: Some(Sort::desc(FundSortKey::Aum)),
            ..Default::default()
        };
        filter.sort(&mut funds);
        let names: Vec<&str> = funds.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
    }

    #[test]
    fn fund_filter_parses_query_fields() {
        let fields = json!({"strategy": "equity", "max_aum": "500", "sort": "-name"});
        let filter = FundFilter::from_fields(fields.as_object().unwrap()).unwrap();
        assert_eq!(filter.strategy, Some(Strategy::Equity));
        assert_eq!(filter.max_aum, Some(Decimal::from(500)));
        assert_eq!(filter.sort, Some(Sort::desc(FundSortKey::Name)));
    }

    #[test]
    fn fund_filter_reports_all_bad_parameters() {
        let fields = json!({"strategy": "gold", "sort": "size", "page": 2});
        let err = FundFilter::from_fields(fields.as_object().unwrap()).unwrap_err();
        assert!(err.has_field("strategy"));
        assert!(err.has_field("sort"));
        assert!(err.has_field("page"));
    }

    #[test]
    fn investment_filter_applies_date_range() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let investment = Investment::new(
            InvestmentDraft {
                fund_id: FundId::from("f1"),
                investor_name: "J. Doe".to_string(),
                amount: Decimal::from(1000),
                invested_at: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            },
            now(),
        );
        let fields = json!({"invested_from": "2022-12-01", "invested_to": "2023-01-31"});
        let filter = InvestmentFilter::from_fields(fields.as_object().unwrap()).unwrap();
        assert!(filter.matches(&investment));

        let later = InvestmentFilter {
            invested_from: Some(today),
            ..Default::default()
        };
        assert!(!later.matches(&investment));
        assert!(InvestmentFilter::for_fund(&FundId::from("f1")).matches(&investment));
    }

    #[test]
    fn investment_filter_rejects_inverted_ranges() {
        let fields = json!({"min_amount": 10, "max_amount": 5});
        let err = InvestmentFilter::from_fields(fields.as_object().unwrap()).unwrap_err();
        assert!(err.has_field("min_amount"));
    }
}
