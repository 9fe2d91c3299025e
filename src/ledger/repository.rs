use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, QueryBuilder, Row};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use super::SellerLedger;
use crate::error::{AppError, AppResult, PayoutError};

/// Postgres-backed seller ledger - the source of truth for balances and
/// the payout log
pub struct PgSellerLedger {
    pub pool: PgPool,
}

impl PgSellerLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_db(amount: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&amount.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion: {}", e)))
}

fn from_db(amount: BigDecimal) -> AppResult<Decimal> {
    Decimal::from_str(&amount.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion: {}", e)))
}

fn balance_from_row(row: &PgRow) -> AppResult<SellerBalance> {
    Ok(SellerBalance {
        seller_id: row.try_get("seller_id")?,
        total_sales: from_db(row.try_get("total_sales")?)?,
        commission_deducted: from_db(row.try_get("commission_deducted")?)?,
        net_revenue: from_db(row.try_get("net_revenue")?)?,
        pending_balance: from_db(row.try_get("pending_balance")?)?,
        available_balance: from_db(row.try_get("available_balance")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payout_from_row(row: &PgRow) -> AppResult<PayoutRecord> {
    Ok(PayoutRecord {
        id: row.try_get("id")?,
        seller_id: row.try_get("seller_id")?,
        amount: from_db(row.try_get("amount")?)?,
        status: row.try_get("status")?,
        transfer_id: row.try_get("transfer_id")?,
        payout_id: row.try_get("payout_id")?,
        transfer_key: row.try_get("transfer_key")?,
        payout_key: row.try_get("payout_key")?,
        notes: row.try_get("notes")?,
        requested_at: row.try_get("requested_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

const PAYOUT_COLUMNS: &str = "id, seller_id, amount, status, transfer_id, payout_id, \
     transfer_key, payout_key, notes, requested_at, processed_at";

#[async_trait]
impl SellerLedger for PgSellerLedger {
    async fn credit(
        &self,
        seller_id: Uuid,
        credit: SettlementCredit,
    ) -> AppResult<SellerBalance> {
        if credit.pending_credit < Decimal::ZERO || credit.gross_sale < Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Negative settlement credit for seller {}",
                seller_id
            )));
        }

        // Single upsert statement: concurrent credits for the same seller
        // serialize on the row without a read-modify-write window
        let row = sqlx::query(
            r#"
            INSERT INTO seller_balances
                (seller_id, total_sales, commission_deducted, net_revenue,
                 pending_balance, available_balance)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (seller_id) DO UPDATE SET
                total_sales         = seller_balances.total_sales + EXCLUDED.total_sales,
                commission_deducted = seller_balances.commission_deducted + EXCLUDED.commission_deducted,
                net_revenue         = seller_balances.net_revenue + EXCLUDED.net_revenue,
                pending_balance     = seller_balances.pending_balance + EXCLUDED.pending_balance,
                updated_at          = NOW()
            RETURNING seller_id, total_sales, commission_deducted, net_revenue,
                      pending_balance, available_balance, created_at, updated_at
            "#,
        )
        .bind(seller_id)
        .bind(to_db(credit.gross_sale)?)
        .bind(to_db(credit.commission)?)
        .bind(to_db(credit.net_revenue)?)
        .bind(to_db(credit.pending_credit)?)
        .fetch_one(&self.pool)
        .await?;

        let balance = balance_from_row(&row)?;
        info!(
            "Credited seller {}: +{} pending (balance now {})",
            seller_id, credit.pending_credit, balance.pending_balance
        );
        Ok(balance)
    }

    async fn move_to_available(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Release amount must be positive, got {}",
                amount
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE seller_balances
            SET pending_balance   = pending_balance - $2,
                available_balance = available_balance + $2,
                updated_at        = NOW()
            WHERE seller_id = $1 AND pending_balance >= $2
            "#,
        )
        .bind(seller_id)
        .bind(to_db(amount)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(seller_id).await?;
            return match current {
                Some(balance) => Err(AppError::InsufficientBalance {
                    requested: amount.to_string(),
                    available: balance.pending_balance.to_string(),
                }),
                None => Err(AppError::NotFound(format!("seller {}", seller_id))),
            };
        }

        Ok(())
    }

    async fn debit(&self, seller_id: Uuid, amount: Decimal) -> AppResult<()> {
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "Debit amount must be positive, got {}",
                amount
            )));
        }

        // Guarded decrement: the balance check and the write are one
        // statement, so a concurrent debit cannot slip below zero
        let result = sqlx::query(
            r#"
            UPDATE seller_balances
            SET available_balance = available_balance - $2,
                updated_at        = NOW()
            WHERE seller_id = $1 AND available_balance >= $2
            "#,
        )
        .bind(seller_id)
        .bind(to_db(amount)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(seller_id).await?;
            return match current {
                Some(balance) => Err(AppError::InsufficientBalance {
                    requested: amount.to_string(),
                    available: balance.available_balance.to_string(),
                }),
                None => Err(AppError::NotFound(format!("seller {}", seller_id))),
            };
        }

        Ok(())
    }

    async fn get(&self, seller_id: Uuid) -> AppResult<Option<SellerBalance>> {
        let row = sqlx::query(
            r#"
            SELECT seller_id, total_sales, commission_deducted, net_revenue,
                   pending_balance, available_balance, created_at, updated_at
            FROM seller_balances
            WHERE seller_id = $1
            "#,
        )
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| balance_from_row(&r)).transpose()
    }

    async fn list(&self, filter: &BalanceFilter) -> AppResult<(Vec<SellerBalanceRow>, i64)> {
        let mut query = QueryBuilder::new(
            "SELECT b.seller_id, b.total_sales, b.commission_deducted, b.net_revenue, \
             b.pending_balance, b.available_balance, b.created_at, b.updated_at, \
             s.name AS store_name, s.store_type \
             FROM seller_balances b \
             LEFT JOIN stores s ON s.id = b.seller_id WHERE 1=1",
        );
        let mut count_query = QueryBuilder::new(
            "SELECT COUNT(*) AS total FROM seller_balances b \
             LEFT JOIN stores s ON s.id = b.seller_id WHERE 1=1",
        );

        for builder in [&mut query, &mut count_query] {
            if let Some(search) = &filter.search {
                let pattern = format!("%{}%", search);
                builder.push(" AND (s.name ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" OR s.email ILIKE ");
                builder.push_bind(pattern);
                builder.push(")");
            }
            if let Some(store_type) = filter.store_type {
                builder.push(" AND s.store_type = ");
                builder.push_bind(store_type);
            }
            if let Some(min) = filter.min_balance {
                builder.push(" AND b.available_balance >= ");
                builder.push_bind(to_db(min)?);
            }
            if let Some(max) = filter.max_balance {
                builder.push(" AND b.available_balance <= ");
                builder.push_bind(to_db(max)?);
            }
        }

        // Sort column comes from the whitelist enum, never from raw input
        query.push(format!(
            " ORDER BY b.{} {}",
            filter.sort_by.column(),
            filter.sort_order.keyword()
        ));
        query.push(" LIMIT ");
        query.push_bind(filter.limit.clamp(1, 200));
        query.push(" OFFSET ");
        query.push_bind(filter.offset.max(0));

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(SellerBalanceRow {
                balance: balance_from_row(row)?,
                store_name: row.try_get("store_name")?,
                store_type: row.try_get("store_type")?,
            });
        }

        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        Ok((out, total))
    }

    async fn overview(&self, since: Option<DateTime<Utc>>) -> AppResult<FinancialOverview> {
        let balances = sqlx::query(
            r#"
            SELECT COUNT(*) AS sellers,
                   COALESCE(SUM(total_sales), 0)         AS total_sales,
                   COALESCE(SUM(commission_deducted), 0) AS total_commission,
                   COALESCE(SUM(net_revenue), 0)         AS total_net_revenue,
                   COALESCE(SUM(pending_balance), 0)     AS total_pending,
                   COALESCE(SUM(available_balance), 0)   AS total_available
            FROM seller_balances
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let payouts = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS payout_volume,
                   COUNT(*)                 AS payout_count
            FROM payout_records
            WHERE status = 'payout_completed'
              AND ($1::timestamptz IS NULL OR processed_at >= $1)
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(FinancialOverview {
            sellers: balances.try_get("sellers")?,
            total_sales: from_db(balances.try_get("total_sales")?)?,
            total_commission: from_db(balances.try_get("total_commission")?)?,
            total_net_revenue: from_db(balances.try_get("total_net_revenue")?)?,
            total_pending: from_db(balances.try_get("total_pending")?)?,
            total_available: from_db(balances.try_get("total_available")?)?,
            payout_volume: from_db(payouts.try_get("payout_volume")?)?,
            payout_count: payouts.try_get("payout_count")?,
        })
    }

    async fn insert_payout(
        &self,
        seller_id: Uuid,
        amount: Decimal,
        notes: Option<String>,
    ) -> AppResult<PayoutRecord> {
        let record_id = Uuid::new_v4();
        let transfer_key = PayoutRecord::derive_transfer_key(seller_id, record_id);

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO payout_records (id, seller_id, amount, status, transfer_key, notes)
            VALUES ($1, $2, $3, 'requested', $4, $5)
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(record_id)
        .bind(seller_id)
        .bind(to_db(amount)?)
        .bind(&transfer_key)
        .bind(notes)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => payout_from_row(&row),
            // The partial unique index allows one non-terminal record per
            // seller; a violation means a transfer is already in flight
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::Payout(
                PayoutError::TransferInFlight(seller_id.to_string()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_payout(&self, payout_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_records WHERE id = $1"
        ))
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| payout_from_row(&r)).transpose()
    }

    async fn open_transfer_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_records \
             WHERE seller_id = $1 AND status = 'transfer_completed'"
        ))
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| payout_from_row(&r)).transpose()
    }

    async fn open_payout_for_seller(&self, seller_id: Uuid) -> AppResult<Option<PayoutRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_records \
             WHERE seller_id = $1 AND status IN ('requested', 'transfer_completed')"
        ))
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| payout_from_row(&r)).transpose()
    }

    async fn mark_transfer_completed(
        &self,
        record_id: Uuid,
        transfer_id: &str,
    ) -> AppResult<PayoutRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payout_records
            SET status = 'transfer_completed', transfer_id = $2
            WHERE id = $1 AND status = 'requested'
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(record_id)
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => payout_from_row(&row),
            None => Err(self.invalid_state(record_id, "requested").await),
        }
    }

    async fn mark_payout_completed(
        &self,
        record_id: Uuid,
        payout_id: &str,
        payout_key: &str,
        processed_at: DateTime<Utc>,
    ) -> AppResult<PayoutRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payout_records
            SET status = 'payout_completed', payout_id = $2, payout_key = $3,
                processed_at = $4
            WHERE id = $1 AND status = 'transfer_completed'
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(record_id)
        .bind(payout_id)
        .bind(payout_key)
        .bind(processed_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => payout_from_row(&row),
            None => Err(self.invalid_state(record_id, "transfer_completed").await),
        }
    }

    async fn mark_payout_failed(&self, record_id: Uuid, reason: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payout_records
            SET status = 'failed',
                notes = COALESCE(notes || ' | ', '') || $2,
                processed_at = NOW()
            WHERE id = $1 AND status IN ('requested', 'transfer_completed')
            "#,
        )
        .bind(record_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.invalid_state(record_id, "non-terminal").await);
        }

        Ok(())
    }

    async fn append_notes(&self, record_id: Uuid, note: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payout_records
            SET notes = COALESCE(notes || ' | ', '') || $2
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Payout(PayoutError::NotFound(
                record_id.to_string(),
            )));
        }
        Ok(())
    }

    async fn payouts_for_seller(&self, seller_id: Uuid) -> AppResult<Vec<PayoutRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout_records \
             WHERE seller_id = $1 ORDER BY requested_at DESC"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }
}

impl PgSellerLedger {
    async fn invalid_state(&self, record_id: Uuid, expected: &str) -> AppError {
        match self.find_payout(record_id).await {
            Ok(Some(record)) => AppError::Payout(PayoutError::InvalidState {
                current: record.status.to_string(),
                expected: expected.to_string(),
            }),
            Ok(None) => AppError::Payout(PayoutError::NotFound(record_id.to_string())),
            Err(e) => e,
        }
    }
}
