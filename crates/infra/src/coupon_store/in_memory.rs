use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use storefront_core::{CouponId, OrderId, UserCouponId, UserId};
use storefront_coupons::{Coupon, CouponReleasePolicy, UserCoupon};

use super::{CouponStore, CouponStoreError};

#[derive(Debug, Default)]
struct Issuance {
    coupons: HashMap<CouponId, Coupon>,
    instances: HashMap<UserCouponId, UserCoupon>,
    by_owner: HashMap<(CouponId, UserId), UserCouponId>,
}

impl Issuance {
    fn instance_mut(&mut self, id: UserCouponId) -> Result<&mut UserCoupon, CouponStoreError> {
        self.instances
            .get_mut(&id)
            .ok_or(CouponStoreError::UnknownUserCoupon(id))
    }
}

/// In-memory coupon store; claim runs under one lock so the counter and the
/// instance appear together or not at all.
#[derive(Debug, Default)]
pub struct InMemoryCouponStore {
    inner: Mutex<Issuance>,
}

impl InMemoryCouponStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Issuance>, CouponStoreError> {
        self.inner
            .lock()
            .map_err(|_| CouponStoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl CouponStore for InMemoryCouponStore {
    fn put_coupon(&self, coupon: Coupon) -> Result<(), CouponStoreError> {
        self.lock()?.coupons.insert(coupon.id, coupon);
        Ok(())
    }

    fn coupon(&self, id: CouponId) -> Result<Option<Coupon>, CouponStoreError> {
        Ok(self.lock()?.coupons.get(&id).cloned())
    }

    fn claim(&self, coupon_id: CouponId, user_id: UserId, now: DateTime<Utc>) -> Result<UserCoupon, CouponStoreError> {
        let mut inner = self.lock()?;

        if inner.by_owner.contains_key(&(coupon_id, user_id)) {
            return Err(CouponStoreError::AlreadyClaimed { coupon_id, user_id });
        }

        let coupon = inner
            .coupons
            .get_mut(&coupon_id)
            .ok_or(CouponStoreError::UnknownCoupon(coupon_id))?;
        coupon.check_claimable(now).map_err(CouponStoreError::Rejected)?;
        coupon.received_count += 1;

        let instance = UserCoupon::claimed(UserCouponId::new(), coupon_id, user_id, now);
        inner.by_owner.insert((coupon_id, user_id), instance.id);
        inner.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    fn user_coupon(&self, id: UserCouponId) -> Result<Option<UserCoupon>, CouponStoreError> {
        Ok(self.lock()?.instances.get(&id).cloned())
    }

    fn find_claim(&self, coupon_id: CouponId, user_id: UserId) -> Result<Option<UserCoupon>, CouponStoreError> {
        let inner = self.lock()?;
        Ok(inner
            .by_owner
            .get(&(coupon_id, user_id))
            .and_then(|id| inner.instances.get(id))
            .cloned())
    }

    fn attach(&self, id: UserCouponId, order_id: OrderId) -> Result<UserCoupon, CouponStoreError> {
        let mut inner = self.lock()?;
        let instance = inner.instance_mut(id)?;
        instance.attach(order_id)?;
        Ok(instance.clone())
    }

    fn consume(&self, id: UserCouponId, order_id: OrderId, at: DateTime<Utc>) -> Result<bool, CouponStoreError> {
        let mut inner = self.lock()?;
        Ok(inner.instance_mut(id)?.consume(order_id, at)?)
    }

    fn release(
        &self,
        id: UserCouponId,
        order_id: OrderId,
        policy: CouponReleasePolicy,
    ) -> Result<bool, CouponStoreError> {
        let mut inner = self.lock()?;
        Ok(inner.instance_mut(id)?.release(order_id, policy))
    }
}
