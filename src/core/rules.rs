//! Business rules enforced by the stores at write time, on top of the
//! per-field checks of the entity model.

use crate::core::error::ValidationError;
use crate::core::model::{FundDraft, FundId, FundPatch};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a fund's `aum` relates to its investments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AumPolicy {
    /// `aum` is set explicitly and investment writes never change it.
    #[default]
    Manual,
    /// `aum` is the sum of the fund's investments and cannot be set directly.
    Derived,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRules {
    #[serde(default)]
    pub aum_policy: AumPolicy,
    /// Ceiling on the total invested into any single fund.
    #[serde(default)]
    pub fund_capacity: Option<Decimal>,
    /// Per-fund ceilings, keyed by fund id, overriding `fund_capacity`.
    #[serde(default)]
    pub capacity_overrides: HashMap<String, Decimal>,
}

impl WriteRules {
    pub fn derives_aum(&self) -> bool {
        self.aum_policy == AumPolicy::Derived
    }

    pub fn capacity_for(&self, fund_id: &FundId) -> Option<Decimal> {
        self.capacity_overrides
            .get(fund_id.as_str())
            .copied()
            .or(self.fund_capacity)
    }

    pub fn check_new_fund(&self, draft: &FundDraft) -> Result<(), ValidationError> {
        if self.derives_aum() && !draft.aum.is_zero() {
            return Err(ValidationError::single(
                "aum",
                "is derived from investments and must start at 0",
            ));
        }
        Ok(())
    }

    pub fn check_fund_patch(&self, patch: &FundPatch) -> Result<(), ValidationError> {
        if self.derives_aum() && patch.aum.is_some() {
            return Err(ValidationError::single(
                "aum",
                "is derived from investments and cannot be set directly",
            ));
        }
        Ok(())
    }

    /// `committed` is the fund's current total excluding the investment being
    /// written; `amount` is the value about to be stored. The total must stay
    /// representable even when no ceiling applies.
    pub fn check_capacity(
        &self,
        fund_id: &FundId,
        committed: Decimal,
        amount: Decimal,
    ) -> Result<(), ValidationError> {
        let total = add_to_total(committed, amount)?;
        let Some(ceiling) = self.capacity_for(fund_id) else {
            return Ok(());
        };
        if total > ceiling {
            return Err(ValidationError::single(
                "amount",
                format!(
                    "would bring fund {fund_id} to {total}, above its capacity of {ceiling}"
                ),
            ));
        }
        Ok(())
    }
}

/// Adds an investment amount to a fund total without overflowing.
pub fn add_to_total(total: Decimal, amount: Decimal) -> Result<Decimal, ValidationError> {
    total.checked_add(amount).ok_or_else(|| {
        ValidationError::single("amount", "fund total exceeds the representable range")
    })
}
