//! Engine configuration, read from `STOREFRONT_*` environment variables.

use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_core::Money;
use storefront_coupons::CouponReleasePolicy;
use storefront_orders::PricingRules;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// How long an unpaid order may wait for payment.
    pub payment_ttl_secs: u64,
    pub express_delivery_fee_cents: u64,
    /// Express delivery is free from this merchandise subtotal; 0 disables the waiver.
    pub free_delivery_threshold_cents: u64,
    pub points_per_unit: u32,
    pub coupon_release_policy: CouponReleasePolicy,
    /// Age after which a pending checkout intent is considered abandoned.
    pub intent_grace_secs: u64,
    pub sweep_interval_ms: u64,
    /// Postgres connection string; in-memory stores when unset.
    pub database_url: Option<String>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            payment_ttl_secs: 30 * 60,
            express_delivery_fee_cents: 1000,
            free_delivery_threshold_cents: 9900,
            points_per_unit: 1,
            coupon_release_policy: CouponReleasePolicy::Reopen,
            intent_grace_secs: 300,
            sweep_interval_ms: 60_000,
            database_url: None,
        }
    }
}

impl FulfillmentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            payment_ttl_secs: parse_or(&lookup, "STOREFRONT_PAYMENT_TTL_SECS", defaults.payment_ttl_secs)?,
            express_delivery_fee_cents: parse_or(
                &lookup,
                "STOREFRONT_EXPRESS_FEE_CENTS",
                defaults.express_delivery_fee_cents,
            )?,
            free_delivery_threshold_cents: parse_or(
                &lookup,
                "STOREFRONT_FREE_DELIVERY_THRESHOLD_CENTS",
                defaults.free_delivery_threshold_cents,
            )?,
            points_per_unit: parse_or(&lookup, "STOREFRONT_POINTS_PER_UNIT", defaults.points_per_unit)?,
            coupon_release_policy: match lookup("STOREFRONT_COUPON_RELEASE_POLICY") {
                Some(raw) => raw.parse().map_err(|e: storefront_core::DomainError| ConfigError::Invalid {
                    var: "STOREFRONT_COUPON_RELEASE_POLICY",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?,
                None => defaults.coupon_release_policy,
            },
            intent_grace_secs: parse_or(&lookup, "STOREFRONT_INTENT_GRACE_SECS", defaults.intent_grace_secs)?,
            sweep_interval_ms: parse_or(&lookup, "STOREFRONT_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn payment_ttl(&self) -> chrono::Duration {
        seconds(self.payment_ttl_secs)
    }

    pub fn intent_grace(&self) -> chrono::Duration {
        seconds(self.intent_grace_secs)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.sweep_interval_ms)
    }

    pub fn pricing_rules(&self) -> PricingRules {
        PricingRules {
            express_fee: Money::from_cents(self.express_delivery_fee_cents),
            free_delivery_threshold: (self.free_delivery_threshold_cents > 0)
                .then(|| Money::from_cents(self.free_delivery_threshold_cents)),
            points_per_unit: self.points_per_unit,
        }
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
