//! Postgres-backed stock store.
//!
//! Schema (logical):
//!
//! ```sql
//! CREATE TABLE stock_levels (
//!     product_id uuid NOT NULL,
//!     variant_id uuid NOT NULL,          -- nil uuid for product-level stock
//!     stock      integer NOT NULL CHECK (stock >= 0),
//!     sales      bigint  NOT NULL DEFAULT 0,
//!     PRIMARY KEY (product_id, variant_id)
//! );
//! CREATE TABLE stock_releases (release_ref text PRIMARY KEY);
//! CREATE TABLE stock_records (
//!     record_id uuid PRIMARY KEY, product_id uuid NOT NULL, variant_id uuid NOT NULL,
//!     delta bigint NOT NULL, stock_before integer NOT NULL, stock_after integer NOT NULL,
//!     reason jsonb NOT NULL, actor jsonb NOT NULL, reference text NOT NULL,
//!     recorded_at timestamptz NOT NULL
//! );
//! ```
//!
//! Reserve is a single `UPDATE ... WHERE stock >= $q`; there is no read before the
//! write. The record insert shares its transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use storefront_catalog::{Actor, ReleaseRef, StockKey, StockLevel, StockReason, StockRecord};

use super::{Released, StockMutation, StockStore, StockStoreError};

#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self, mutation), fields(key = %key, quantity), err)]
    pub async fn reserve_async(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        let (product, variant) = key_columns(key);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            UPDATE stock_levels
            SET stock = stock - $3, sales = sales + $3
            WHERE product_id = $1 AND variant_id = $2 AND stock >= $3
            RETURNING stock
            "#,
        )
        .bind(product)
        .bind(variant)
        .bind(i64::from(quantity))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(match self.level_async(key).await? {
                Some(level) => StockStoreError::Insufficient {
                    key,
                    requested: quantity,
                    available: level.stock,
                },
                None => StockStoreError::UnknownKey(key),
            });
        };

        let after = read_u32(&row, "stock")?;
        let before = after.saturating_add(quantity);
        let record = insert_record(&mut tx, key, before, after, mutation).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }

    #[instrument(skip(self, mutation), fields(key = %key, quantity, release_ref = %release_ref), err)]
    pub async fn release_async(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, StockStoreError> {
        let (product, variant) = key_columns(key);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted = sqlx::query(
            "INSERT INTO stock_releases (release_ref) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(release_ref.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(Released::AlreadyApplied);
        }

        let row = sqlx::query(
            r#"
            UPDATE stock_levels
            SET stock = stock + $3, sales = GREATEST(sales - $3, 0)
            WHERE product_id = $1 AND variant_id = $2
            RETURNING stock
            "#,
        )
        .bind(product)
        .bind(variant)
        .bind(i64::from(quantity))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StockStoreError::UnknownKey(key));
        };

        let after = read_u32(&row, "stock")?;
        let before = after.saturating_sub(quantity);
        let record = insert_record(&mut tx, key, before, after, mutation).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Released::Applied(record))
    }

    #[instrument(skip(self, mutation), fields(key = %key, quantity), err)]
    pub async fn restock_async(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        let (product, variant) = key_columns(key);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query(
            r#"
            INSERT INTO stock_levels (product_id, variant_id, stock, sales)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (product_id, variant_id) DO UPDATE SET stock = stock_levels.stock + $3
            RETURNING stock
            "#,
        )
        .bind(product)
        .bind(variant)
        .bind(i64::from(quantity))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let after = read_u32(&row, "stock")?;
        let before = after.saturating_sub(quantity);
        let record = insert_record(&mut tx, key, before, after, mutation).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }

    pub async fn level_async(&self, key: StockKey) -> Result<Option<StockLevel>, StockStoreError> {
        let (product, variant) = key_columns(key);
        let row = sqlx::query(
            "SELECT stock, sales FROM stock_levels WHERE product_id = $1 AND variant_id = $2",
        )
        .bind(product)
        .bind(variant)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            let sales: i64 = row.try_get("sales").map_err(map_sqlx_error)?;
            Ok(StockLevel {
                stock: read_u32(&row, "stock")?,
                sales: u64::try_from(sales).unwrap_or(0),
            })
        })
        .transpose()
    }

    pub async fn records_async(&self, key: StockKey) -> Result<Vec<StockRecord>, StockStoreError> {
        let (product, variant) = key_columns(key);
        let rows = sqlx::query(
            r#"
            SELECT record_id, delta, stock_before, stock_after, reason, actor, reference, recorded_at
            FROM stock_records
            WHERE product_id = $1 AND variant_id = $2
            ORDER BY recorded_at ASC, record_id ASC
            "#,
        )
        .bind(product)
        .bind(variant)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let reason: serde_json::Value = row.try_get("reason").map_err(map_sqlx_error)?;
                let actor: serde_json::Value = row.try_get("actor").map_err(map_sqlx_error)?;
                let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(map_sqlx_error)?;
                Ok(StockRecord {
                    record_id: row.try_get("record_id").map_err(map_sqlx_error)?,
                    key,
                    delta: row.try_get("delta").map_err(map_sqlx_error)?,
                    stock_before: read_u32(row, "stock_before")?,
                    stock_after: read_u32(row, "stock_after")?,
                    reason: serde_json::from_value::<StockReason>(reason)
                        .map_err(|e| StockStoreError::Unavailable(e.to_string()))?,
                    actor: serde_json::from_value::<Actor>(actor)
                        .map_err(|e| StockStoreError::Unavailable(e.to_string()))?,
                    reference: row.try_get("reference").map_err(map_sqlx_error)?,
                    recorded_at,
                })
            })
            .collect()
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, StockStoreError>
    where
        F: std::future::Future<Output = Result<T, StockStoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StockStoreError::Unavailable("PostgresStockStore requires a tokio runtime".to_string())
        })?;
        handle.block_on(fut)
    }
}

impl StockStore for PostgresStockStore {
    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        self.block_on(self.reserve_async(key, quantity, mutation))
    }

    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        release_ref: &ReleaseRef,
        mutation: &StockMutation,
    ) -> Result<Released, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        self.block_on(self.release_async(key, quantity, release_ref, mutation))
    }

    fn restock(
        &self,
        key: StockKey,
        quantity: u32,
        mutation: &StockMutation,
    ) -> Result<StockRecord, StockStoreError> {
        if quantity == 0 {
            return Err(StockStoreError::ZeroQuantity);
        }
        self.block_on(self.restock_async(key, quantity, mutation))
    }

    fn level(&self, key: StockKey) -> Result<Option<StockLevel>, StockStoreError> {
        self.block_on(self.level_async(key))
    }

    fn records(&self, key: StockKey) -> Result<Vec<StockRecord>, StockStoreError> {
        self.block_on(self.records_async(key))
    }
}

async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
    before: u32,
    after: u32,
    mutation: &StockMutation,
) -> Result<StockRecord, StockStoreError> {
    let (product, variant) = key_columns(key);
    let record = StockRecord {
        record_id: Uuid::now_v7(),
        key,
        delta: i64::from(after) - i64::from(before),
        stock_before: before,
        stock_after: after,
        reason: mutation.reason,
        actor: mutation.actor.clone(),
        reference: mutation.reference.clone(),
        recorded_at: mutation.at,
    };
    let reason = serde_json::to_value(record.reason)
        .map_err(|e| StockStoreError::Unavailable(e.to_string()))?;
    let actor = serde_json::to_value(&record.actor)
        .map_err(|e| StockStoreError::Unavailable(e.to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO stock_records (
            record_id, product_id, variant_id, delta, stock_before, stock_after,
            reason, actor, reference, recorded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(record.record_id)
    .bind(product)
    .bind(variant)
    .bind(record.delta)
    .bind(i64::from(before))
    .bind(i64::from(after))
    .bind(reason)
    .bind(actor)
    .bind(&record.reference)
    .bind(record.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(record)
}

fn key_columns(key: StockKey) -> (Uuid, Uuid) {
    (
        *key.product_id.as_uuid(),
        key.variant_id.map(|v| *v.as_uuid()).unwrap_or(Uuid::nil()),
    )
}

fn read_u32(row: &sqlx::postgres::PgRow, column: &str) -> Result<u32, StockStoreError> {
    let value: i32 = row.try_get(column).map_err(map_sqlx_error)?;
    u32::try_from(value)
        .map_err(|_| StockStoreError::Unavailable(format!("negative {column} in stock row")))
}

fn map_sqlx_error(err: sqlx::Error) -> StockStoreError {
    StockStoreError::Unavailable(err.to_string())
}
