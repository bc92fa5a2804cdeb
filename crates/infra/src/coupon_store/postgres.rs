//! Postgres-backed coupon store.
//!
//! ```sql
//! CREATE TABLE coupons (
//!     id uuid PRIMARY KEY, name text NOT NULL, discount jsonb NOT NULL,
//!     min_spend bigint NOT NULL, start_time timestamptz NOT NULL, end_time timestamptz NOT NULL,
//!     enabled boolean NOT NULL, total_count integer NOT NULL,
//!     received_count integer NOT NULL DEFAULT 0 CHECK (received_count <= total_count)
//! );
//! CREATE TABLE user_coupons (
//!     id uuid PRIMARY KEY, coupon_id uuid NOT NULL REFERENCES coupons(id),
//!     user_id uuid NOT NULL, status text NOT NULL, order_id uuid NULL,
//!     claimed_at timestamptz NOT NULL, used_at timestamptz NULL,
//!     UNIQUE (coupon_id, user_id)
//! );
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use storefront_core::{CouponId, Money, OrderId, UserCouponId, UserId};
use storefront_coupons::{Coupon, CouponDiscount, CouponReleasePolicy, UserCoupon, UserCouponStatus};

use super::{CouponStore, CouponStoreError};

#[derive(Debug, Clone)]
pub struct PostgresCouponStore {
    pool: Arc<PgPool>,
}

impl PostgresCouponStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(coupon_id = %coupon_id, user_id = %user_id), err)]
    pub async fn claim_async(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<UserCoupon, CouponStoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let existing = sqlx::query("SELECT 1 FROM user_coupons WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if existing.is_some() {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(CouponStoreError::AlreadyClaimed { coupon_id, user_id });
        }

        let incremented = sqlx::query(
            r#"
            UPDATE coupons
            SET received_count = received_count + 1
            WHERE id = $1 AND enabled AND start_time <= $2 AND end_time >= $2
              AND received_count < total_count
            "#,
        )
        .bind(coupon_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if incremented.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            let coupon = self
                .coupon_async(coupon_id)
                .await?
                .ok_or(CouponStoreError::UnknownCoupon(coupon_id))?;
            return Err(match coupon.check_claimable(now) {
                Err(rejection) => CouponStoreError::Rejected(rejection),
                // Became claimable between the update and the re-read.
                Ok(()) => CouponStoreError::Unavailable("claim lost a race, retry".to_string()),
            });
        }

        let instance = UserCoupon::claimed(UserCouponId::new(), coupon_id, user_id, now);
        let inserted = sqlx::query(
            r#"
            INSERT INTO user_coupons (id, coupon_id, user_id, status, order_id, claimed_at, used_at)
            VALUES ($1, $2, $3, $4, NULL, $5, NULL)
            "#,
        )
        .bind(instance.id.as_uuid())
        .bind(coupon_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(status_str(instance.status))
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(if is_unique_violation(&err) {
                CouponStoreError::AlreadyClaimed { coupon_id, user_id }
            } else {
                map_sqlx_error(err)
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(instance)
    }

    pub async fn coupon_async(&self, id: CouponId) -> Result<Option<Coupon>, CouponStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, discount, min_spend, start_time, end_time, enabled, total_count, received_count
            FROM coupons WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(coupon_from_row).transpose()
    }

    pub async fn put_coupon_async(&self, coupon: &Coupon) -> Result<(), CouponStoreError> {
        let discount = serde_json::to_value(&coupon.discount)
            .map_err(|e| CouponStoreError::Unavailable(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO coupons (id, name, discount, min_spend, start_time, end_time, enabled, total_count, received_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, discount = EXCLUDED.discount, min_spend = EXCLUDED.min_spend,
                start_time = EXCLUDED.start_time, end_time = EXCLUDED.end_time,
                enabled = EXCLUDED.enabled, total_count = EXCLUDED.total_count
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(&coupon.name)
        .bind(discount)
        .bind(cents_to_db(coupon.min_spend))
        .bind(coupon.start_time)
        .bind(coupon.end_time)
        .bind(coupon.enabled)
        .bind(i64::from(coupon.total_count))
        .bind(i64::from(coupon.received_count))
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn user_coupon_async(&self, id: UserCouponId) -> Result<Option<UserCoupon>, CouponStoreError> {
        let row = sqlx::query(
            "SELECT id, coupon_id, user_id, status, order_id, claimed_at, used_at FROM user_coupons WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(user_coupon_from_row).transpose()
    }

    pub async fn find_claim_async(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<Option<UserCoupon>, CouponStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, coupon_id, user_id, status, order_id, claimed_at, used_at
            FROM user_coupons WHERE coupon_id = $1 AND user_id = $2
            "#,
        )
        .bind(coupon_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(user_coupon_from_row).transpose()
    }

    /// Lock one instance row, let the domain decide, write the result back.
    #[instrument(skip(self, change), fields(user_coupon_id = %id), err)]
    pub async fn modify_async<T>(
        &self,
        id: UserCouponId,
        change: impl FnOnce(&mut UserCoupon) -> Result<T, CouponStoreError>,
    ) -> Result<(T, UserCoupon), CouponStoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row = sqlx::query(
            r#"
            SELECT id, coupon_id, user_id, status, order_id, claimed_at, used_at
            FROM user_coupons WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(CouponStoreError::UnknownUserCoupon(id));
        };
        let mut instance = user_coupon_from_row(&row)?;
        let out = match change(&mut instance) {
            Ok(out) => out,
            Err(err) => {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Err(err);
            }
        };
        write_instance(&mut tx, &instance).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok((out, instance))
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, CouponStoreError>
    where
        F: std::future::Future<Output = Result<T, CouponStoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            CouponStoreError::Unavailable("PostgresCouponStore requires a tokio runtime".to_string())
        })?;
        handle.block_on(fut)
    }
}

impl CouponStore for PostgresCouponStore {
    fn put_coupon(&self, coupon: Coupon) -> Result<(), CouponStoreError> {
        self.block_on(self.put_coupon_async(&coupon))
    }

    fn coupon(&self, id: CouponId) -> Result<Option<Coupon>, CouponStoreError> {
        self.block_on(self.coupon_async(id))
    }

    fn claim(&self, coupon_id: CouponId, user_id: UserId, now: DateTime<Utc>) -> Result<UserCoupon, CouponStoreError> {
        self.block_on(self.claim_async(coupon_id, user_id, now))
    }

    fn user_coupon(&self, id: UserCouponId) -> Result<Option<UserCoupon>, CouponStoreError> {
        self.block_on(self.user_coupon_async(id))
    }

    fn find_claim(&self, coupon_id: CouponId, user_id: UserId) -> Result<Option<UserCoupon>, CouponStoreError> {
        self.block_on(self.find_claim_async(coupon_id, user_id))
    }

    fn attach(&self, id: UserCouponId, order_id: OrderId) -> Result<UserCoupon, CouponStoreError> {
        let (_, instance) = self.block_on(self.modify_async(id, |uc| Ok(uc.attach(order_id)?)))?;
        Ok(instance)
    }

    fn consume(&self, id: UserCouponId, order_id: OrderId, at: DateTime<Utc>) -> Result<bool, CouponStoreError> {
        let (changed, _) = self.block_on(self.modify_async(id, |uc| Ok(uc.consume(order_id, at)?)))?;
        Ok(changed)
    }

    fn release(
        &self,
        id: UserCouponId,
        order_id: OrderId,
        policy: CouponReleasePolicy,
    ) -> Result<bool, CouponStoreError> {
        let (changed, _) = self.block_on(self.modify_async(id, |uc| Ok(uc.release(order_id, policy))))?;
        Ok(changed)
    }
}

async fn write_instance(tx: &mut Transaction<'_, Postgres>, instance: &UserCoupon) -> Result<(), CouponStoreError> {
    sqlx::query("UPDATE user_coupons SET status = $2, order_id = $3, used_at = $4 WHERE id = $1")
        .bind(instance.id.as_uuid())
        .bind(status_str(instance.status))
        .bind(instance.order_id.map(|o| *o.as_uuid()))
        .bind(instance.used_at)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

fn status_str(status: UserCouponStatus) -> &'static str {
    match status {
        UserCouponStatus::Unused => "unused",
        UserCouponStatus::Used => "used",
        UserCouponStatus::Expired => "expired",
    }
}

fn parse_status(raw: &str) -> Result<UserCouponStatus, CouponStoreError> {
    match raw {
        "unused" => Ok(UserCouponStatus::Unused),
        "used" => Ok(UserCouponStatus::Used),
        "expired" => Ok(UserCouponStatus::Expired),
        other => Err(CouponStoreError::Unavailable(format!("unknown coupon status '{other}'"))),
    }
}

fn coupon_from_row(row: &PgRow) -> Result<Coupon, CouponStoreError> {
    let discount: serde_json::Value = row.try_get("discount").map_err(map_sqlx_error)?;
    let min_spend: i64 = row.try_get("min_spend").map_err(map_sqlx_error)?;
    let total_count: i32 = row.try_get("total_count").map_err(map_sqlx_error)?;
    let received_count: i32 = row.try_get("received_count").map_err(map_sqlx_error)?;
    let id: uuid::Uuid = row.try_get("id").map_err(map_sqlx_error)?;

    Ok(Coupon {
        id: CouponId::from_uuid(id),
        name: row.try_get("name").map_err(map_sqlx_error)?,
        discount: serde_json::from_value::<CouponDiscount>(discount)
            .map_err(|e| CouponStoreError::Unavailable(e.to_string()))?,
        min_spend: Money::from_cents(u64::try_from(min_spend).unwrap_or(0)),
        start_time: row.try_get("start_time").map_err(map_sqlx_error)?,
        end_time: row.try_get("end_time").map_err(map_sqlx_error)?,
        enabled: row.try_get("enabled").map_err(map_sqlx_error)?,
        total_count: u32::try_from(total_count).unwrap_or(0),
        received_count: u32::try_from(received_count).unwrap_or(0),
    })
}

fn user_coupon_from_row(row: &PgRow) -> Result<UserCoupon, CouponStoreError> {
    let id: uuid::Uuid = row.try_get("id").map_err(map_sqlx_error)?;
    let coupon_id: uuid::Uuid = row.try_get("coupon_id").map_err(map_sqlx_error)?;
    let user_id: uuid::Uuid = row.try_get("user_id").map_err(map_sqlx_error)?;
    let order_id: Option<uuid::Uuid> = row.try_get("order_id").map_err(map_sqlx_error)?;
    let status: String = row.try_get("status").map_err(map_sqlx_error)?;

    Ok(UserCoupon {
        id: UserCouponId::from_uuid(id),
        coupon_id: CouponId::from_uuid(coupon_id),
        user_id: UserId::from_uuid(user_id),
        status: parse_status(&status)?,
        order_id: order_id.map(OrderId::from_uuid),
        claimed_at: row.try_get("claimed_at").map_err(map_sqlx_error)?,
        used_at: row.try_get("used_at").map_err(map_sqlx_error)?,
    })
}

fn cents_to_db(amount: Money) -> i64 {
    i64::try_from(amount.cents()).unwrap_or(i64::MAX)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn map_sqlx_error(err: sqlx::Error) -> CouponStoreError {
    CouponStoreError::Unavailable(err.to_string())
}
