use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::common::{db_errors, ConstraintKind, CoreError, CoreResult, UserId};

/// Claim of one external messaging account by one internal user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExternalIdentityLink {
    pub user_id: UserId,
    pub external_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_unique_violation(err: sqlx::Error, external_id: &str) -> CoreError {
    match db_errors::constraint_violation(&err) {
        Some(v) if v.is(ConstraintKind::Unique, db_errors::IDENTITY_EXTERNAL_KEY) => {
            CoreError::IdentityAlreadyLinked {
                external_id: external_id.to_string(),
            }
        }
        Some(v) if v.is(ConstraintKind::Unique, db_errors::IDENTITY_USER_KEY) => {
            CoreError::ConcurrentModification(
                "user was linked to another external id concurrently".into(),
            )
        }
        _ => err.into(),
    }
}

/// Transaction-scoped advisory lock on an arbitrary string key.
pub async fn advisory_xact_lock(key: &str, tx: &mut PgConnection) -> CoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut *tx)
        .await?;
    Ok(())
}

impl ExternalIdentityLink {
    pub async fn lock_by_external_id(
        external_id: &str,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM external_identity_links WHERE external_id = $1 FOR UPDATE",
        )
        .bind(external_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn lock_by_user(user_id: UserId, tx: &mut PgConnection) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM external_identity_links WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn insert(
        user_id: UserId,
        external_id: &str,
        metadata: &serde_json::Value,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO external_identity_links (user_id, external_id, metadata)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(external_id)
        .bind(metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, external_id))
    }

    /// Points the user's link at `external_id` with new metadata.
    pub async fn update(
        user_id: UserId,
        external_id: &str,
        metadata: &serde_json::Value,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE external_identity_links
            SET external_id = $2,
                metadata = $3,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(external_id)
        .bind(metadata)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, external_id))?
        .ok_or_else(|| CoreError::not_found("identity link", user_id))
    }

    pub async fn delete_by_user(user_id: UserId, tx: &mut PgConnection) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM external_identity_links WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_external_id(external_id: &str, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM external_identity_links WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM external_identity_links WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }
}
