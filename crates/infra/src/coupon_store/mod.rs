//! Coupon issuance: the atomic claim and the claimed-instance transitions.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use storefront_core::{CouponId, DomainError, OrderId, UserCouponId, UserId};
use storefront_coupons::{Coupon, CouponRejection, CouponReleasePolicy, UserCoupon};

pub use in_memory::InMemoryCouponStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCouponStore;

#[derive(Debug, Error)]
pub enum CouponStoreError {
    #[error("unknown coupon {0}")]
    UnknownCoupon(CouponId),

    #[error("unknown coupon instance {0}")]
    UnknownUserCoupon(UserCouponId),

    #[error("coupon not available: {0}")]
    Rejected(CouponRejection),

    #[error("user {user_id} already claimed coupon {coupon_id}")]
    AlreadyClaimed { coupon_id: CouponId, user_id: UserId },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("coupon store unavailable: {0}")]
    Unavailable(String),
}

pub trait CouponStore: Send + Sync {
    /// Create or replace a coupon definition (back-office).
    fn put_coupon(&self, coupon: Coupon) -> Result<(), CouponStoreError>;

    fn coupon(&self, id: CouponId) -> Result<Option<Coupon>, CouponStoreError>;

    /// Issue one instance to `user_id`.
    ///
    /// The `received_count` increment and the new `UserCoupon` commit together.
    /// A second claim by the same user fails with `AlreadyClaimed` and leaves the
    /// counter untouched.
    fn claim(&self, coupon_id: CouponId, user_id: UserId, now: DateTime<Utc>) -> Result<UserCoupon, CouponStoreError>;

    fn user_coupon(&self, id: UserCouponId) -> Result<Option<UserCoupon>, CouponStoreError>;

    /// The instance `user_id` holds for `coupon_id`, if any.
    fn find_claim(&self, coupon_id: CouponId, user_id: UserId) -> Result<Option<UserCoupon>, CouponStoreError>;

    /// Mark the instance pending use on `order_id`.
    fn attach(&self, id: UserCouponId, order_id: OrderId) -> Result<UserCoupon, CouponStoreError>;

    /// Mark the instance used by `order_id`. `Ok(false)` if it already was.
    fn consume(&self, id: UserCouponId, order_id: OrderId, at: DateTime<Utc>) -> Result<bool, CouponStoreError>;

    /// Undo the order link. `Ok(false)` if the instance is no longer linked to `order_id`.
    fn release(
        &self,
        id: UserCouponId,
        order_id: OrderId,
        policy: CouponReleasePolicy,
    ) -> Result<bool, CouponStoreError>;
}

impl<S> CouponStore for Arc<S>
where
    S: CouponStore + ?Sized,
{
    fn put_coupon(&self, coupon: Coupon) -> Result<(), CouponStoreError> {
        (**self).put_coupon(coupon)
    }

    fn coupon(&self, id: CouponId) -> Result<Option<Coupon>, CouponStoreError> {
        (**self).coupon(id)
    }

    fn claim(&self, coupon_id: CouponId, user_id: UserId, now: DateTime<Utc>) -> Result<UserCoupon, CouponStoreError> {
        (**self).claim(coupon_id, user_id, now)
    }

    fn user_coupon(&self, id: UserCouponId) -> Result<Option<UserCoupon>, CouponStoreError> {
        (**self).user_coupon(id)
    }

    fn find_claim(&self, coupon_id: CouponId, user_id: UserId) -> Result<Option<UserCoupon>, CouponStoreError> {
        (**self).find_claim(coupon_id, user_id)
    }

    fn attach(&self, id: UserCouponId, order_id: OrderId) -> Result<UserCoupon, CouponStoreError> {
        (**self).attach(id, order_id)
    }

    fn consume(&self, id: UserCouponId, order_id: OrderId, at: DateTime<Utc>) -> Result<bool, CouponStoreError> {
        (**self).consume(id, order_id, at)
    }

    fn release(
        &self,
        id: UserCouponId,
        order_id: OrderId,
        policy: CouponReleasePolicy,
    ) -> Result<bool, CouponStoreError> {
        (**self).release(id, order_id, policy)
    }
}
