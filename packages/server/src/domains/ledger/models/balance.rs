use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;

use crate::common::{CoreError, CoreResult, UserId};

/// Current credit balance of one user.
///
/// Rows are created lazily: a user without a row has a logical balance of 0.
/// The row is the lock that serializes every mutation of that user's credits.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    pub user_id: UserId,
    pub amount: i64,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Unlocked read. Absent row ⇒ 0.
    pub async fn get_amount(user_id: UserId, pool: &PgPool) -> CoreResult<i64> {
        let amount = sqlx::query_scalar::<_, i64>("SELECT amount FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(amount.unwrap_or(0))
    }

    /// Unlocked read on a caller's transaction. Absent row ⇒ 0.
    pub async fn get_amount_in(user_id: UserId, tx: &mut PgConnection) -> CoreResult<i64> {
        let amount = sqlx::query_scalar::<_, i64>("SELECT amount FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(amount.unwrap_or(0))
    }

    /// Unlocked batch read used for pre-validation. Users without a row map
    /// to 0.
    pub async fn get_amounts(
        user_ids: &[UserId],
        pool: &PgPool,
    ) -> CoreResult<HashMap<UserId, i64>> {
        let rows = sqlx::query_as::<_, (UserId, i64)>(
            "SELECT user_id, amount FROM balances WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(pool)
        .await?;

        let mut amounts: HashMap<UserId, i64> = user_ids.iter().map(|id| (*id, 0)).collect();
        amounts.extend(rows);
        Ok(amounts)
    }

    pub async fn find(user_id: UserId, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Ensures the row exists and locks it until the transaction ends.
    ///
    /// Must be called before computing any new balance to write. Blocks
    /// while another transaction holds the lock.
    pub async fn get_for_update(user_id: UserId, tx: &mut PgConnection) -> CoreResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO balances (user_id, amount, updated_at)
            VALUES ($1, 0, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let amount = sqlx::query_scalar::<_, i64>(
            "SELECT amount FROM balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(amount)
    }

    /// Locks several balance rows in ascending user id order.
    ///
    /// Bulk operations use this so that two of them touching overlapping
    /// students always wait on each other in the same order.
    pub async fn lock_many(
        user_ids: &[UserId],
        tx: &mut PgConnection,
    ) -> CoreResult<HashMap<UserId, i64>> {
        let mut ordered = user_ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut amounts = HashMap::with_capacity(ordered.len());
        for user_id in ordered {
            let amount = Self::get_for_update(user_id, &mut *tx).await?;
            amounts.insert(user_id, amount);
        }
        Ok(amounts)
    }

    /// Writes a new amount. Only valid while holding the lock taken by
    /// [`Balance::get_for_update`].
    pub async fn set_amount(user_id: UserId, amount: i64, tx: &mut PgConnection) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE balances
            SET amount = $2,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("balance", user_id));
        }
        Ok(())
    }
}
