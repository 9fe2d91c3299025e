use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Store, StoreRepository};
use crate::error::{AppError, AppResult};

pub struct PgStoreRepository {
    pub pool: PgPool,
}

impl PgStoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STORE_COLUMNS: &str = "id, name, email, store_type, is_active, payment_account_id, \
     grace_period_start, grace_period_end, grace_period_notification_sent, \
     platform_fees_active";

fn store_from_row(row: &PgRow) -> AppResult<Store> {
    Ok(Store {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        store_type: row.try_get("store_type")?,
        is_active: row.try_get("is_active")?,
        payment_account_id: row.try_get("payment_account_id")?,
        grace_period_start: row.try_get("grace_period_start")?,
        grace_period_end: row.try_get("grace_period_end")?,
        grace_period_notification_sent: row.try_get("grace_period_notification_sent")?,
        platform_fees_active: row.try_get("platform_fees_active")?,
    })
}

#[async_trait]
impl StoreRepository for PgStoreRepository {
    async fn get(&self, store_id: Uuid) -> AppResult<Option<Store>> {
        let row = sqlx::query(&format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"))
            .bind(store_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| store_from_row(&r)).transpose()
    }

    async fn active_with_grace_period(&self) -> AppResult<Vec<Store>> {
        let rows = sqlx::query(&format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE is_active = TRUE \
               AND grace_period_start IS NOT NULL \
               AND grace_period_end IS NOT NULL \
             ORDER BY grace_period_end"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(store_from_row).collect()
    }

    async fn initialize_grace_period(
        &self,
        store_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Store> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stores
            SET grace_period_start = $2,
                grace_period_end = $3,
                grace_period_notification_sent = FALSE,
                platform_fees_active = FALSE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {STORE_COLUMNS}
            "#
        ))
        .bind(store_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| store_from_row(&r))
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))
    }

    async fn mark_notification_sent(&self, store_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stores
            SET grace_period_notification_sent = TRUE, updated_at = NOW()
            WHERE id = $1 AND grace_period_notification_sent = FALSE
            "#,
        )
        .bind(store_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_notification_flag(&self, store_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE stores SET grace_period_notification_sent = FALSE, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(store_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("store {}", store_id)));
        }
        Ok(())
    }

    async fn activate_fees(&self, store_id: Uuid) -> AppResult<bool> {
        // Conditional flip: concurrent runs race on the WHERE clause and
        // only one sees rows_affected = 1
        let result = sqlx::query(
            r#"
            UPDATE stores
            SET platform_fees_active = TRUE, updated_at = NOW()
            WHERE id = $1 AND platform_fees_active = FALSE
            "#,
        )
        .bind(store_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_payment_account(&self, store_id: Uuid, account_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE stores SET payment_account_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(store_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("store {}", store_id)));
        }
        Ok(())
    }
}
