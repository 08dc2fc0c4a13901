use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::common::{
    db_errors, ConstraintKind, CoreError, CoreResult, TemplateApplicationId, TemplateId, UserId,
};
use crate::domains::templates::machines::ApplicationTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "template_application_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    Replaced,
    RolledBack,
}

/// One application of a template to a concrete week.
///
/// Replaced and rolled-back records are kept as the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TemplateApplication {
    pub id: TemplateApplicationId,
    pub template_id: TemplateId,
    pub applied_by: UserId,
    pub week_start_date: NaiveDate,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub rolled_back_by: Option<UserId>,
    pub replaced_by: Option<TemplateApplicationId>,
}

impl TemplateApplication {
    pub async fn insert_applied(
        id: TemplateApplicationId,
        template_id: TemplateId,
        applied_by: UserId,
        week_start_date: NaiveDate,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO template_applications (id, template_id, applied_by, week_start_date, status)
            VALUES ($1, $2, $3, $4, 'applied')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(template_id)
        .bind(applied_by)
        .bind(week_start_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match db_errors::constraint_violation(&e) {
            Some(v) if v.is(ConstraintKind::Unique, db_errors::TEMPLATE_APPLICATIONS_LIVE_KEY) => {
                CoreError::ConcurrentModification(format!(
                    "template {template_id} was applied to week {week_start_date} concurrently"
                ))
            }
            _ => e.into(),
        })
    }

    /// Unlocked read of the live application for a template and week.
    pub async fn find_live(
        template_id: TemplateId,
        week_start_date: NaiveDate,
        pool: &PgPool,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM template_applications
            WHERE template_id = $1 AND week_start_date = $2 AND status = 'applied'
            "#,
        )
        .bind(template_id)
        .bind(week_start_date)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn lock_live(
        template_id: TemplateId,
        week_start_date: NaiveDate,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM template_applications
            WHERE template_id = $1 AND week_start_date = $2 AND status = 'applied'
            FOR UPDATE
            "#,
        )
        .bind(template_id)
        .bind(week_start_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn lock_by_id(
        id: TemplateApplicationId,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM template_applications WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found("template application", id))
    }

    /// Moves an `applied` record to the transition's target status.
    ///
    /// `replaced_by` is only written by `Replace`; `actor_id` only by
    /// `RollBack`. Returns `None` when the record was not `applied`.
    pub async fn transition(
        id: TemplateApplicationId,
        transition: ApplicationTransition,
        actor_id: UserId,
        replaced_by: Option<TemplateApplicationId>,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        let query = match transition {
            ApplicationTransition::Replace => sqlx::query_as::<_, Self>(
                r#"
                UPDATE template_applications
                SET status = $3, replaced_by = $4
                WHERE id = $1 AND status = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(transition.from_status())
            .bind(transition.to_status())
            .bind(replaced_by),
            ApplicationTransition::RollBack => sqlx::query_as::<_, Self>(
                r#"
                UPDATE template_applications
                SET status = $3, rolled_back_at = NOW(), rolled_back_by = $4
                WHERE id = $1 AND status = $2
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(transition.from_status())
            .bind(transition.to_status())
            .bind(actor_id),
        };

        query.fetch_optional(&mut *tx).await.map_err(Into::into)
    }

    pub async fn find_by_id(
        id: TemplateApplicationId,
        pool: &PgPool,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM template_applications WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Every application for a week, oldest first.
    pub async fn list_for_week(
        week_start_date: NaiveDate,
        pool: &PgPool,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM template_applications
            WHERE week_start_date = $1
            ORDER BY applied_at, id
            "#,
        )
        .bind(week_start_date)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
