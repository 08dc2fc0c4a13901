use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::common::{
    db_errors, BookingId, ConstraintKind, CoreError, CoreResult, LessonId, TemplateApplicationId,
    UserId,
};
use crate::domains::bookings::machines::BookingTransition;
use crate::domains::lessons::models::Lesson;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Cancelled,
}

/// One student's seat in one lesson. At most one row exists per
/// `(student_id, lesson_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: BookingId,
    pub student_id: UserId,
    pub lesson_id: LessonId,
    pub status: BookingStatus,
    /// Credits debited for the current (or last) activation.
    pub credits_charged: i64,
    pub booked_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    /// Inserts an active booking charged `credits_charged`.
    pub async fn insert_active(
        id: BookingId,
        student_id: UserId,
        lesson_id: LessonId,
        credits_charged: i64,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO bookings (id, student_id, lesson_id, status, credits_charged)
            VALUES ($1, $2, $3, 'active', $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(student_id)
        .bind(lesson_id)
        .bind(credits_charged)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match db_errors::constraint_violation(&e) {
            Some(v) if v.is(ConstraintKind::Unique, db_errors::BOOKINGS_STUDENT_LESSON_KEY) => {
                CoreError::DuplicateBooking {
                    student_id,
                    lesson_id,
                }
            }
            _ => e.into(),
        })
    }

    /// Applies `transition` if the row is in its source status.
    ///
    /// Returns `None` when no row matched, which the caller classifies by
    /// reading the current status.
    pub async fn transition(
        student_id: UserId,
        lesson_id: LessonId,
        transition: BookingTransition,
        actor_id: Option<UserId>,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        let Some(from) = transition.from_status() else {
            return Err(CoreError::validation(
                "bookings are created by insert, not by transition",
            ));
        };

        let sql = match transition.to_status() {
            BookingStatus::Cancelled => {
                r#"
                UPDATE bookings
                SET status = $4,
                    cancelled_at = NOW(),
                    cancelled_by = $5
                WHERE student_id = $1 AND lesson_id = $2 AND status = $3
                RETURNING *
                "#
            }
            BookingStatus::Active => {
                r#"
                UPDATE bookings
                SET status = $4,
                    booked_at = NOW(),
                    cancelled_at = NULL,
                    cancelled_by = NULL,
                    credits_charged = 0
                WHERE student_id = $1 AND lesson_id = $2 AND status = $3
                RETURNING *
                "#
            }
        };

        let mut query = sqlx::query_as::<_, Self>(sql)
            .bind(student_id)
            .bind(lesson_id)
            .bind(from)
            .bind(transition.to_status());
        if transition.to_status() == BookingStatus::Cancelled {
            query = query.bind(actor_id);
        }

        query.fetch_optional(&mut *tx).await.map_err(Into::into)
    }

    pub async fn record_charge(
        id: BookingId,
        credits_charged: i64,
        tx: &mut PgConnection,
    ) -> CoreResult<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE bookings SET credits_charged = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(credits_charged)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("booking", id))
    }

    pub async fn find_by_pair(
        student_id: UserId,
        lesson_id: LessonId,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM bookings WHERE student_id = $1 AND lesson_id = $2",
        )
        .bind(student_id)
        .bind(lesson_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: BookingId, pool: &PgPool) -> CoreResult<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_for_lesson(lesson_id: LessonId, pool: &PgPool) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM bookings WHERE lesson_id = $1 ORDER BY booked_at, id",
        )
        .bind(lesson_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Row-locks the active bookings of the given lessons.
    pub async fn lock_active_for_lessons(
        lesson_ids: &[LessonId],
        tx: &mut PgConnection,
    ) -> CoreResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings
            WHERE lesson_id = ANY($1) AND status = 'active'
            ORDER BY lesson_id, student_id
            FOR UPDATE
            "#,
        )
        .bind(lesson_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(Into::into)
    }

    /// Another live lesson the student actively holds that overlaps `lesson`.
    pub async fn find_overlapping_active(
        student_id: UserId,
        lesson: &Lesson,
        tx: &mut PgConnection,
    ) -> CoreResult<Option<LessonId>> {
        sqlx::query_scalar::<_, LessonId>(
            r#"
            SELECT l.id
            FROM bookings b
            JOIN lessons l ON l.id = b.lesson_id
            WHERE b.student_id = $1
              AND b.status = 'active'
              AND l.deleted_at IS NULL
              AND l.id <> $2
              AND l.start_time < $4
              AND $3 < l.end_time
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(lesson.id)
        .bind(lesson.start_time)
        .bind(lesson.end_time)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Into::into)
    }

    /// Credits currently held by active bookings of one application's
    /// lessons, per student. Used to size refunds before a replace.
    pub async fn credits_held_by_application(
        application_id: TemplateApplicationId,
        pool: &PgPool,
    ) -> CoreResult<Vec<(UserId, i64)>> {
        sqlx::query_as::<_, (UserId, i64)>(
            r#"
            SELECT b.student_id, SUM(b.credits_charged)::BIGINT
            FROM bookings b
            JOIN lessons l ON l.id = b.lesson_id
            WHERE l.template_application_id = $1
              AND l.deleted_at IS NULL
              AND b.status = 'active'
            GROUP BY b.student_id
            "#,
        )
        .bind(application_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
