use crate::database::error::DatabaseError;
use crate::database::models::{ApplyOutcome, CreditGrant, LedgerEntry};
use crate::database::repository::CreditLedger;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

const LEDGER_COLUMNS: &str = "id, user_id, external_order_id, external_checkout_id, \
     external_product_id, credits_granted, amount_paid_minor_units, applied_at, balance_applied_at";

/// Credit ledger and balance mutations. Every balance increment happens in the
/// same transaction as the ledger row that justifies it.
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for LedgerRepository {
    async fn apply_grant(&self, grant: &CreditGrant) -> Result<ApplyOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        // Concurrent inserts of the same order block on the unique index until
        // the first commits, then fall through to the conflict branch.
        let insert_sql = format!(
            "INSERT INTO credit_ledger
             (id, user_id, external_order_id, external_checkout_id, external_product_id,
              credits_granted, amount_paid_minor_units)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (external_order_id) DO NOTHING
             RETURNING {}",
            LEDGER_COLUMNS
        );
        let inserted = sqlx::query_as::<_, LedgerEntry>(&insert_sql)
            .bind(Uuid::new_v4())
            .bind(&grant.user_id)
            .bind(&grant.external_order_id)
            .bind(grant.external_checkout_id.as_deref())
            .bind(&grant.external_product_id)
            .bind(grant.credits)
            .bind(grant.amount_paid_minor_units)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let Some(entry) = inserted else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            debug!(order_id = %grant.external_order_id, "Ledger entry already exists");
            let existing = self
                .find_by_order_id(&grant.external_order_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("ledger entry", &grant.external_order_id))?;
            return Ok(ApplyOutcome::AlreadyApplied { entry: existing });
        };

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET credits = credits + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING credits",
        )
        .bind(&grant.user_id)
        .bind(i64::from(grant.credits))
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(balance) = balance else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            warn!(user_id = %grant.user_id, "Balance increment found no user; rolled back ledger insert");
            return Err(DatabaseError::not_found("user", &grant.user_id));
        };

        let mark_sql = format!(
            "UPDATE credit_ledger SET balance_applied_at = NOW() WHERE id = $1 RETURNING {}",
            LEDGER_COLUMNS
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&mark_sql)
            .bind(entry.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(ApplyOutcome::Applied { entry, balance })
    }

    async fn find_by_order_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM credit_ledger WHERE external_order_id = $1",
            LEDGER_COLUMNS
        );
        sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(external_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM credit_ledger WHERE user_id = $1 ORDER BY applied_at DESC",
            LEDGER_COLUMNS
        );
        sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_unreconciled(&self, limit: i64) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM credit_ledger
             WHERE balance_applied_at IS NULL
             ORDER BY applied_at ASC
             LIMIT $1",
            LEDGER_COLUMNS
        );
        sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn reconcile_entry(&self, entry_id: Uuid) -> Result<Option<i64>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let pending: Option<(String, i32)> = sqlx::query_as(
            "SELECT user_id, credits_granted FROM credit_ledger
             WHERE id = $1 AND balance_applied_at IS NULL
             FOR UPDATE",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some((user_id, credits)) = pending else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        };

        let balance: i64 = sqlx::query_scalar(
            "UPDATE users SET credits = credits + $2, updated_at = NOW()
             WHERE id = $1
             RETURNING credits",
        )
        .bind(&user_id)
        .bind(i64::from(credits))
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("user", &user_id))?;

        sqlx::query("UPDATE credit_ledger SET balance_applied_at = NOW() WHERE id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(Some(balance))
    }
}
