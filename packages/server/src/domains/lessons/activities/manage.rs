//! Single-lesson operations that own their transaction.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::common::{CoreResult, LessonId};
use crate::domains::lessons::models::{Lesson, NewLesson};
use crate::kernel::{OpContext, ServerDeps};

pub async fn create_lesson(
    ctx: &OpContext,
    lesson: NewLesson,
    deps: &ServerDeps,
) -> CoreResult<Lesson> {
    lesson.validate()?;

    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let lesson = Lesson::create(lesson, &mut tx).await?;
        tx.commit().await?;

        info!(
            lesson_id = %lesson.id,
            teacher_id = %lesson.teacher_id,
            start_time = %lesson.start_time,
            max_seats = lesson.max_seats,
            "Lesson created"
        );
        Ok(lesson)
    })
    .await
}

pub async fn update_lesson_time(
    ctx: &OpContext,
    lesson_id: LessonId,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    deps: &ServerDeps,
) -> CoreResult<Lesson> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let lesson = Lesson::update_time(lesson_id, start_time, end_time, &mut tx).await?;
        tx.commit().await?;

        info!(lesson_id = %lesson_id, start_time = %start_time, end_time = %end_time, "Lesson rescheduled");
        Ok(lesson)
    })
    .await
}

/// Soft-deletes a lesson that has no booked seats.
pub async fn soft_delete_lesson(
    ctx: &OpContext,
    lesson_id: LessonId,
    deps: &ServerDeps,
) -> CoreResult<Lesson> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let lesson = Lesson::soft_delete(lesson_id, &mut tx).await?;
        tx.commit().await?;

        info!(lesson_id = %lesson_id, "Lesson soft-deleted");
        Ok(lesson)
    })
    .await
}

/// Permanently removes a lesson. Refused while it has active bookings.
pub async fn delete_lesson(
    ctx: &OpContext,
    lesson_id: LessonId,
    deps: &ServerDeps,
) -> CoreResult<()> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        Lesson::delete_hard(lesson_id, &mut tx).await?;
        tx.commit().await?;

        info!(lesson_id = %lesson_id, "Lesson deleted");
        Ok(())
    })
    .await
}
