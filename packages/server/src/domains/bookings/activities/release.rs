//! Cancelling every booking of a set of lessons and retiring the lessons.
//! Shared by lesson cancellation and template rollback/replace.

use serde::Serialize;
use sqlx::PgConnection;
use tracing::info;

use crate::common::{CoreResult, LessonId, UserId};
use crate::domains::bookings::activities::lifecycle::{cancel_in_tx, ChargeContext};
use crate::domains::bookings::models::Booking;
use crate::domains::ledger::models::Balance;
use crate::domains::lessons::models::Lesson;
use crate::kernel::{OpContext, ServerDeps};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub lessons_deleted: usize,
    pub bookings_cancelled: usize,
    pub credits_refunded: i64,
    pub students: Vec<UserId>,
}

/// Cancels (with refunds) the active bookings of `lessons`, then soft-deletes
/// them. The caller must already hold the lesson row locks.
pub async fn release_lessons(
    lessons: &[Lesson],
    charge_ctx: &ChargeContext,
    tx: &mut PgConnection,
) -> CoreResult<ReleaseSummary> {
    let lesson_ids: Vec<LessonId> = lessons.iter().map(|l| l.id).collect();
    let active = Booking::lock_active_for_lessons(&lesson_ids, &mut *tx).await?;

    let mut students: Vec<UserId> = active.iter().map(|b| b.student_id).collect();
    students.sort();
    students.dedup();
    Balance::lock_many(&students, &mut *tx).await?;

    let mut summary = ReleaseSummary {
        students,
        ..Default::default()
    };

    for booking in &active {
        let receipt = cancel_in_tx(booking.student_id, booking.lesson_id, charge_ctx, &mut *tx).await?;
        summary.bookings_cancelled += 1;
        summary.credits_refunded += receipt.ledger_entry.map_or(0, |e| e.delta);
    }

    for lesson_id in &lesson_ids {
        Lesson::soft_delete(*lesson_id, &mut *tx).await?;
        summary.lessons_deleted += 1;
    }

    Ok(summary)
}

/// Cancels a lesson: every active booking is cancelled and refunded, then
/// the lesson is soft-deleted.
pub async fn cancel_lesson(
    ctx: &OpContext,
    lesson_id: LessonId,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<ReleaseSummary> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let lesson = Lesson::lock_live(lesson_id, &mut tx).await?;
        // Refunds of template charges stay attached to their application.
        let charge = match lesson.template_application_id {
            Some(application_id) => ChargeContext::template(application_id, actor_id),
            None => ChargeContext::direct(actor_id),
        };
        let summary = release_lessons(&[lesson], &charge, &mut tx).await?;
        tx.commit().await?;

        info!(
            lesson_id = %lesson_id,
            actor_id = %actor_id,
            bookings_cancelled = summary.bookings_cancelled,
            credits_refunded = summary.credits_refunded,
            "Lesson cancelled"
        );
        Ok(summary)
    })
    .await
}
