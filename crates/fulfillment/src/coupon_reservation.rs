//! Coupon Reservation: claims, the checkout attach, consumption and release.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use storefront_core::{CouponId, Money, OrderId, UserCouponId, UserId};
use storefront_coupons::{Coupon, CouponReleasePolicy, UserCoupon};
use storefront_infra::coupon_store::{CouponStore, CouponStoreError};

use crate::error::FulfillmentError;

#[derive(Clone)]
pub struct CouponReservation {
    store: Arc<dyn CouponStore>,
    policy: CouponReleasePolicy,
}

impl std::fmt::Debug for CouponReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouponReservation")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CouponReservation {
    pub fn new(store: Arc<dyn CouponStore>, policy: CouponReleasePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CouponReleasePolicy {
        self.policy
    }

    /// Claim one instance of `coupon_id` for `user_id`.
    pub fn claim(&self, coupon_id: CouponId, user_id: UserId, now: DateTime<Utc>) -> Result<UserCouponId, FulfillmentError> {
        let instance = self.store.claim(coupon_id, user_id, now)?;
        info!(%coupon_id, %user_id, user_coupon_id = %instance.id, "coupon claimed");
        Ok(instance.id)
    }

    /// The coupon, checked as redeemable on a merchandise subtotal of `eligible`.
    pub fn redeemable(&self, coupon_id: CouponId, now: DateTime<Utc>, eligible: Money) -> Result<Coupon, FulfillmentError> {
        let coupon = self
            .store
            .coupon(coupon_id)?
            .ok_or(CouponStoreError::UnknownCoupon(coupon_id))?;
        coupon
            .check_redeemable(now, eligible)
            .map_err(|rejection| FulfillmentError::CouponUnavailable(rejection.to_string()))?;
        Ok(coupon)
    }

    /// Put the user's instance of `coupon_id` on hold for `order_id`.
    ///
    /// Re-uses an instance the user already holds; otherwise claims a new one.
    pub fn reserve_for_order(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<UserCoupon, FulfillmentError> {
        let instance_id = match self.store.find_claim(coupon_id, user_id)? {
            Some(existing) if existing.is_available_for(order_id) => existing.id,
            Some(existing) => {
                return Err(FulfillmentError::CouponUnavailable(format!(
                    "coupon instance {} is {:?}",
                    existing.id, existing.status
                )));
            }
            None => match self.claim(coupon_id, user_id, now) {
                Ok(id) => id,
                // Lost a race with a concurrent claim by the same user: use that instance.
                Err(FulfillmentError::CouponAlreadyClaimed) => self
                    .store
                    .find_claim(coupon_id, user_id)?
                    .map(|existing| existing.id)
                    .ok_or(FulfillmentError::CouponAlreadyClaimed)?,
                Err(err) => return Err(err),
            },
        };

        let attached = self.store.attach(instance_id, order_id)?;
        debug!(user_coupon_id = %instance_id, %order_id, "coupon attached to order");
        Ok(attached)
    }

    /// Mark the instance used by a paid order. `false` if it already was.
    pub fn consume(&self, id: UserCouponId, order_id: OrderId, at: DateTime<Utc>) -> Result<bool, FulfillmentError> {
        let consumed = self.store.consume(id, order_id, at)?;
        if consumed {
            info!(user_coupon_id = %id, %order_id, "coupon consumed");
        }
        Ok(consumed)
    }

    /// Undo the order link using the configured policy.
    pub fn release(&self, id: UserCouponId, order_id: OrderId) -> Result<bool, FulfillmentError> {
        self.release_with(id, order_id, self.policy)
    }

    /// Undo the order link with an explicit policy (an aborted checkout always reopens).
    pub fn release_with(
        &self,
        id: UserCouponId,
        order_id: OrderId,
        policy: CouponReleasePolicy,
    ) -> Result<bool, FulfillmentError> {
        let released = self.store.release(id, order_id, policy)?;
        if released {
            info!(user_coupon_id = %id, %order_id, ?policy, "coupon released");
        }
        Ok(released)
    }

    pub fn instance(&self, id: UserCouponId) -> Result<Option<UserCoupon>, FulfillmentError> {
        Ok(self.store.user_coupon(id)?)
    }
}
