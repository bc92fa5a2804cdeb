use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_core::{CouponId, DomainError, DomainResult, Entity, OrderId, UserCouponId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCouponStatus {
    Unused,
    Used,
    Expired,
}

/// What happens to a claimed coupon when its order is cancelled or refunded.
///
/// Neither policy returns the slot to the issuance pool: `received_count` is
/// never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponReleasePolicy {
    /// Back to `unused`; the user may apply it to another order.
    #[default]
    Reopen,
    /// Marked `expired`; the claim is spent.
    Burn,
}

impl FromStr for CouponReleasePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reopen" => Ok(Self::Reopen),
            "burn" => Ok(Self::Burn),
            other => Err(DomainError::validation(format!(
                "unknown coupon release policy '{other}' (expected 'reopen' or 'burn')"
            ))),
        }
    }
}

/// One claimed coupon instance. Created only by a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCoupon {
    pub id: UserCouponId,
    pub coupon_id: CouponId,
    pub user_id: UserId,
    pub status: UserCouponStatus,
    /// Set while the instance is pending use on, or consumed by, an order.
    pub order_id: Option<OrderId>,
    pub claimed_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Entity for UserCoupon {
    type Id = UserCouponId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl UserCoupon {
    pub fn claimed(
        id: UserCouponId,
        coupon_id: CouponId,
        user_id: UserId,
        claimed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            coupon_id,
            user_id,
            status: UserCouponStatus::Unused,
            order_id: None,
            claimed_at,
            used_at: None,
        }
    }

    /// Mark the instance pending use on `order_id`.
    ///
    /// Re-attaching to the same order is a no-op; another order's pending claim
    /// blocks the attach.
    pub fn attach(&mut self, order_id: OrderId) -> DomainResult<()> {
        if self.status != UserCouponStatus::Unused {
            return Err(DomainError::invariant(format!(
                "coupon instance {} is {:?}",
                self.id, self.status
            )));
        }
        match self.order_id {
            Some(existing) if existing != order_id => Err(DomainError::conflict(format!(
                "coupon instance {} is pending on another order",
                self.id
            ))),
            _ => {
                self.order_id = Some(order_id);
                Ok(())
            }
        }
    }

    /// Consume the instance for a paid order. Returns `false` if already consumed
    /// by that order.
    pub fn consume(&mut self, order_id: OrderId, at: DateTime<Utc>) -> DomainResult<bool> {
        match (self.status, self.order_id) {
            (UserCouponStatus::Used, Some(existing)) if existing == order_id => Ok(false),
            (UserCouponStatus::Unused, Some(existing)) if existing == order_id => {
                self.status = UserCouponStatus::Used;
                self.used_at = Some(at);
                Ok(true)
            }
            _ => Err(DomainError::invariant(format!(
                "coupon instance {} is not pending on order {order_id}",
                self.id
            ))),
        }
    }

    /// Undo the order link according to `policy`. Returns `false` when the instance
    /// is no longer linked to `order_id` (already released).
    pub fn release(&mut self, order_id: OrderId, policy: CouponReleasePolicy) -> bool {
        if self.order_id != Some(order_id) {
            return false;
        }
        self.order_id = None;
        self.used_at = None;
        self.status = match policy {
            CouponReleasePolicy::Reopen => UserCouponStatus::Unused,
            CouponReleasePolicy::Burn => UserCouponStatus::Expired,
        };
        true
    }

    pub fn is_available_for(&self, order_id: OrderId) -> bool {
        self.status == UserCouponStatus::Unused
            && self.order_id.is_none_or(|existing| existing == order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> UserCoupon {
        UserCoupon::claimed(UserCouponId::new(), CouponId::new(), UserId::new(), Utc::now())
    }

    #[test]
    fn attach_consume_release_reopens() {
        let order = OrderId::new();
        let mut uc = instance();

        uc.attach(order).unwrap();
        assert!(uc.consume(order, Utc::now()).unwrap());
        assert!(!uc.consume(order, Utc::now()).unwrap());
        assert_eq!(uc.status, UserCouponStatus::Used);

        assert!(uc.release(order, CouponReleasePolicy::Reopen));
        assert_eq!(uc.status, UserCouponStatus::Unused);
        assert_eq!(uc.order_id, None);
        assert!(!uc.release(order, CouponReleasePolicy::Reopen));
    }

    #[test]
    fn burn_policy_spends_the_claim() {
        let order = OrderId::new();
        let mut uc = instance();
        uc.attach(order).unwrap();

        assert!(uc.release(order, CouponReleasePolicy::Burn));
        assert_eq!(uc.status, UserCouponStatus::Expired);
        assert!(uc.attach(OrderId::new()).is_err());
    }

    #[test]
    fn pending_claim_blocks_other_orders() {
        let mut uc = instance();
        uc.attach(OrderId::new()).unwrap();
        assert!(matches!(uc.attach(OrderId::new()), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn consume_requires_matching_order() {
        let mut uc = instance();
        uc.attach(OrderId::new()).unwrap();
        assert!(uc.consume(OrderId::new(), Utc::now()).is_err());
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("Reopen".parse::<CouponReleasePolicy>().unwrap(), CouponReleasePolicy::Reopen);
        assert_eq!(" burn ".parse::<CouponReleasePolicy>().unwrap(), CouponReleasePolicy::Burn);
        assert!("recycle".parse::<CouponReleasePolicy>().is_err());
    }
}
