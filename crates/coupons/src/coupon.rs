use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::{CouponId, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouponDiscount {
    FixedAmount { amount: Money },
    Percentage { percent: u8, cap: Option<Money> },
}

/// Why a coupon cannot be claimed or redeemed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("coupon is not yet valid")]
    NotStarted,
    #[error("coupon has ended")]
    Ended,
    #[error("coupon is disabled")]
    Disabled,
    #[error("coupon has been fully issued")]
    SoldOut,
    #[error("order does not reach the minimum spend of {min_spend}")]
    MinSpendNotMet { min_spend: Money },
}

/// Issuable coupon template with a bounded number of instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub name: String,
    pub discount: CouponDiscount,
    pub min_spend: Money,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub enabled: bool,
    pub total_count: u32,
    /// Issued instances. Only ever moved by the store's atomic claim.
    pub received_count: u32,
}

impl Coupon {
    fn check_window(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.enabled {
            return Err(CouponRejection::Disabled);
        }
        if now < self.start_time {
            return Err(CouponRejection::NotStarted);
        }
        if now > self.end_time {
            return Err(CouponRejection::Ended);
        }
        Ok(())
    }

    /// Can a new instance be issued at `now`?
    pub fn check_claimable(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        self.check_window(now)?;
        if self.received_count >= self.total_count {
            return Err(CouponRejection::SoldOut);
        }
        Ok(())
    }

    /// Can an already-issued instance be applied to an order of `eligible` value?
    pub fn check_redeemable(
        &self,
        now: DateTime<Utc>,
        eligible: Money,
    ) -> Result<(), CouponRejection> {
        self.check_window(now)?;
        if eligible < self.min_spend {
            return Err(CouponRejection::MinSpendNotMet {
                min_spend: self.min_spend,
            });
        }
        Ok(())
    }

    /// Discount granted on `eligible`, never more than `eligible` itself.
    pub fn discount_for(&self, eligible: Money) -> Money {
        let raw = match self.discount {
            CouponDiscount::FixedAmount { amount } => amount,
            CouponDiscount::Percentage { percent, cap } => {
                let off = eligible.percent(percent.min(100));
                match cap {
                    Some(cap) => off.min(cap),
                    None => off,
                }
            }
        };
        raw.min(eligible)
    }

    pub fn remaining(&self) -> u32 {
        self.total_count.saturating_sub(self.received_count)
    }
}
