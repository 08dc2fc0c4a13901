use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use typed_builder::TypedBuilder;

use crate::common::{
    db_errors, ConstraintKind, CoreError, CoreResult, LessonId, TemplateApplicationId,
    TemplateSlotId, UserId,
};

/// A scheduled lesson with its seat counter.
///
/// `current_seats` is only ever changed through the conditional updates
/// below, never by writing a value computed in Rust.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lesson {
    pub id: LessonId,
    pub teacher_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_seats: i32,
    pub current_seats: i32,
    pub credit_cost: i64,
    pub template_application_id: Option<TemplateApplicationId>,
    pub template_slot_id: Option<TemplateSlotId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct NewLesson {
    pub teacher_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_seats: i32,
    #[builder(default)]
    pub credit_cost: i64,
    #[builder(default, setter(strip_option))]
    pub template_application_id: Option<TemplateApplicationId>,
    #[builder(default, setter(strip_option))]
    pub template_slot_id: Option<TemplateSlotId>,
}

pub fn validate_time_range(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> CoreResult<()> {
    if end_time <= start_time {
        return Err(CoreError::validation(format!(
            "lesson must end after it starts ({start_time} >= {end_time})"
        )));
    }
    Ok(())
}

impl NewLesson {
    pub fn validate(&self) -> CoreResult<()> {
        validate_time_range(self.start_time, self.end_time)?;
        if self.max_seats < 1 {
            return Err(CoreError::validation("lesson needs at least one seat"));
        }
        if self.credit_cost < 0 {
            return Err(CoreError::validation("lesson credit cost cannot be negative"));
        }
        Ok(())
    }
}

fn schedule_conflict(teacher_id: UserId, start: DateTime<Utc>, end: DateTime<Utc>) -> CoreError {
    CoreError::ScheduleConflict(format!(
        "teacher {teacher_id} already has a lesson overlapping {start} .. {end}"
    ))
}

/// Maps storage constraint violations raised by lesson writes.
fn map_write_error(
    err: sqlx::Error,
    teacher_id: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CoreError {
    match db_errors::constraint_violation(&err) {
        Some(v) if v.is(ConstraintKind::Exclusion, db_errors::LESSONS_TEACHER_NO_OVERLAP) => {
            schedule_conflict(teacher_id, start, end)
        }
        Some(v) if v.kind == ConstraintKind::Check => CoreError::validation(format!(
            "lesson violates {}",
            v.constraint.as_deref().unwrap_or("a check constraint")
        )),
        Some(v) if v.kind == ConstraintKind::ForeignKey => {
            CoreError::validation("lesson references an unknown template application")
        }
        _ => err.into(),
    }
}

impl Lesson {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn free_seats(&self) -> i32 {
        self.max_seats - self.current_seats
    }

    /// Half-open interval overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && start < self.end_time
    }

    pub async fn create(lesson: NewLesson, tx: &mut PgConnection) -> CoreResult<Self> {
        lesson.validate()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO lessons (
                id, teacher_id, start_time, end_time, max_seats, credit_cost,
                template_application_id, template_slot_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(LessonId::new())
        .bind(lesson.teacher_id)
        .bind(lesson.start_time)
        .bind(lesson.end_time)
        .bind(lesson.max_seats)
        .bind(lesson.credit_cost)
        .bind(lesson.template_application_id)
        .bind(lesson.template_slot_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, lesson.teacher_id, lesson.start_time, lesson.end_time))
    }

    /// Moves a live lesson. Overlap with another live lesson of the same
    /// teacher is a `ScheduleConflict`.
    pub async fn update_time(
        id: LessonId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        validate_time_range(start_time, end_time)?;

        let teacher_id = sqlx::query_scalar::<_, UserId>(
            "SELECT teacher_id FROM lessons WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("lesson", id))?;

        sqlx::query_as::<_, Self>(
            r#"
            UPDATE lessons
            SET start_time = $2,
                end_time = $3
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(start_time)
        .bind(end_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, teacher_id, start_time, end_time))
    }

    /// Takes one seat with a single conditional update.
    ///
    /// Zero rows updated means the lesson is full, deleted, or absent; a
    /// follow-up read tells which.
    pub async fn increment_seats(id: LessonId, tx: &mut PgConnection) -> CoreResult<Self> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE lessons
            SET current_seats = current_seats + 1
            WHERE id = $1
              AND deleted_at IS NULL
              AND current_seats < max_seats
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(lesson) = updated {
            return Ok(lesson);
        }

        let live = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM lessons WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if live {
            Err(CoreError::Full { lesson_id: id })
        } else {
            Err(CoreError::not_found("lesson", id))
        }
    }

    /// Releases one seat. `NotFound` when the lesson has no seat to release.
    pub async fn decrement_seats(id: LessonId, tx: &mut PgConnection) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE lessons
            SET current_seats = current_seats - 1
            WHERE id = $1 AND current_seats > 0
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("lesson with a held seat", id))
    }

    /// Marks an empty live lesson deleted.
    pub async fn soft_delete(id: LessonId, tx: &mut PgConnection) -> CoreResult<Self> {
        let deleted = sqlx::query_as::<_, Self>(
            r#"
            UPDATE lessons
            SET deleted_at = NOW()
            WHERE id = $1
              AND deleted_at IS NULL
              AND current_seats = 0
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(lesson) = deleted {
            return Ok(lesson);
        }

        match Self::find_in_tx(id, &mut *tx).await? {
            None => Err(CoreError::not_found("lesson", id)),
            Some(lesson) if !lesson.is_live() => {
                Err(CoreError::invalid_state("lesson", "already deleted"))
            }
            Some(lesson) => Err(CoreError::invalid_state(
                "lesson",
                format!("{} seat(s) still booked", lesson.current_seats),
            )),
        }
    }

    /// Permanently removes a lesson and its cancelled bookings. Refused while
    /// any booking is active.
    pub async fn delete_hard(id: LessonId, tx: &mut PgConnection) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM lessons
            WHERE id = $1
              AND current_seats = 0
              AND NOT EXISTS (
                  SELECT 1 FROM bookings WHERE lesson_id = $1 AND status = 'active'
              )
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match Self::find_in_tx(id, &mut *tx).await? {
            None => Err(CoreError::not_found("lesson", id)),
            Some(_) => Err(CoreError::invalid_state(
                "lesson",
                "cannot delete a lesson with active bookings",
            )),
        }
    }

    pub async fn find_by_id(id: LessonId, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM lessons WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_in_tx(id: LessonId, tx: &mut PgConnection) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM lessons WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Into::into)
    }

    /// Row-locks a lesson whether or not it is deleted. Booking transitions
    /// take this before touching the booking row.
    pub async fn lock_row(id: LessonId, tx: &mut PgConnection) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM lessons WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found("lesson", id))
    }

    /// Row-locks a live lesson.
    pub async fn lock_live(id: LessonId, tx: &mut PgConnection) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM lessons WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("lesson", id))
    }

    /// Row-locks the live lessons created by one template application, in id
    /// order.
    pub async fn lock_for_application(
        application_id: TemplateApplicationId,
        tx: &mut PgConnection,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM lessons
            WHERE template_application_id = $1 AND deleted_at IS NULL
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(application_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn find_for_application(
        application_id: TemplateApplicationId,
        pool: &PgPool,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM lessons WHERE template_application_id = $1 ORDER BY start_time, id",
        )
        .bind(application_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Live lessons starting in `[from, to)`.
    pub async fn find_in_range(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        pool: &PgPool,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM lessons
            WHERE deleted_at IS NULL
              AND start_time >= $1
              AND start_time < $2
            ORDER BY start_time, id
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
