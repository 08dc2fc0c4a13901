use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

use crate::common::{CoreError, CoreResult, TemplateApplicationId};
use crate::domains::templates::activities::planning::week_bounds;
use crate::domains::templates::models::TemplateApplication;
use crate::kernel::ServerDeps;

/// Aggregates over the live lessons starting in one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct WeekStats {
    pub lessons: i64,
    pub active_bookings: i64,
    /// Credits held by the week's active bookings.
    pub credits_moved: i64,
    pub distinct_students: i64,
}

pub async fn get_week_stats(week_start: NaiveDate, deps: &ServerDeps) -> CoreResult<WeekStats> {
    let (from, to) = week_bounds(week_start)?;

    sqlx::query_as::<_, WeekStats>(
        r#"
        SELECT
            COUNT(DISTINCT l.id) AS lessons,
            COUNT(b.id) AS active_bookings,
            COALESCE(SUM(b.credits_charged), 0)::BIGINT AS credits_moved,
            COUNT(DISTINCT b.student_id) AS distinct_students
        FROM lessons l
        LEFT JOIN bookings b ON b.lesson_id = l.id AND b.status = 'active'
        WHERE l.deleted_at IS NULL
          AND l.start_time >= $1
          AND l.start_time < $2
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(&deps.db_pool)
    .await
    .map_err(Into::into)
}

pub async fn find_application(
    application_id: TemplateApplicationId,
    deps: &ServerDeps,
) -> CoreResult<TemplateApplication> {
    TemplateApplication::find_by_id(application_id, &deps.db_pool)
        .await?
        .ok_or_else(|| CoreError::not_found("template application", application_id))
}

/// The week's application history, oldest first.
pub async fn list_applications_for_week(
    week_start: NaiveDate,
    deps: &ServerDeps,
) -> CoreResult<Vec<TemplateApplication>> {
    week_bounds(week_start)?;
    TemplateApplication::list_for_week(week_start, &deps.db_pool).await
}
