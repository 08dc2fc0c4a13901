//! Booking transitions inside a caller-owned transaction, and the
//! single-booking operations built on them.
//!
//! Lock order for every path: lesson row, then booking row, then the
//! student's balance row.

use serde::Serialize;
use sqlx::PgConnection;
use tracing::info;

use crate::common::{BookingId, CoreError, CoreResult, LessonId, TemplateApplicationId, UserId};
use crate::domains::bookings::machines::{self, BookingTransition};
use crate::domains::bookings::models::Booking;
use crate::domains::ledger::activities::{credit, debit, LedgerPosting};
use crate::domains::ledger::models::{Balance, LedgerEntry, OperationType};
use crate::domains::lessons::models::Lesson;
use crate::kernel::{OpContext, ServerDeps};

/// Ledger attribution for booking charges and refunds.
#[derive(Debug, Clone, Copy)]
pub struct ChargeContext {
    /// Debit type; the matching refund type is derived from it.
    pub operation: OperationType,
    pub actor_id: Option<UserId>,
    pub template_application_id: Option<TemplateApplicationId>,
}

impl ChargeContext {
    pub fn direct(actor_id: UserId) -> Self {
        Self {
            operation: OperationType::BookingDebit,
            actor_id: Some(actor_id),
            template_application_id: None,
        }
    }

    pub fn template(application_id: TemplateApplicationId, actor_id: UserId) -> Self {
        Self {
            operation: OperationType::TemplateDebit,
            actor_id: Some(actor_id),
            template_application_id: Some(application_id),
        }
    }

    fn refund_operation(&self) -> OperationType {
        self.operation.refund().unwrap_or(OperationType::BookingRefund)
    }

    fn posting(
        &self,
        user_id: UserId,
        operation_type: OperationType,
        booking_id: BookingId,
        reason: String,
    ) -> LedgerPosting {
        LedgerPosting {
            user_id,
            operation_type,
            reason,
            actor_id: self.actor_id,
            booking_id: Some(booking_id),
            template_application_id: self.template_application_id,
            idempotency_key: None,
            policy: Default::default(),
        }
    }
}

/// Result of a booking transition, with the ledger entry it produced.
#[derive(Debug, Clone, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub lesson: Lesson,
    pub ledger_entry: Option<LedgerEntry>,
}

async fn reject(
    student_id: UserId,
    lesson_id: LessonId,
    transition: BookingTransition,
    tx: &mut PgConnection,
) -> CoreError {
    match Booking::find_by_pair(student_id, lesson_id, tx).await {
        Ok(current) => {
            machines::rejection(current.map(|b| b.status), transition, student_id, lesson_id)
        }
        Err(e) => e,
    }
}

async fn ensure_no_overlap(
    student_id: UserId,
    lesson: &Lesson,
    tx: &mut PgConnection,
) -> CoreResult<()> {
    if let Some(other) = Booking::find_overlapping_active(student_id, lesson, tx).await? {
        return Err(CoreError::ScheduleConflict(format!(
            "student {student_id} already holds lesson {other} overlapping lesson {}",
            lesson.id
        )));
    }
    Ok(())
}

async fn charge(
    booking_id: BookingId,
    student_id: UserId,
    lesson: &Lesson,
    charge_ctx: &ChargeContext,
    tx: &mut PgConnection,
) -> CoreResult<Option<LedgerEntry>> {
    if lesson.credit_cost == 0 {
        return Ok(None);
    }
    let posting = charge_ctx.posting(
        student_id,
        charge_ctx.operation,
        booking_id,
        format!("booking for lesson {}", lesson.id),
    );
    debit(posting, lesson.credit_cost, tx).await.map(Some)
}

/// (none) → active.
pub async fn create_in_tx(
    student_id: UserId,
    lesson_id: LessonId,
    charge_ctx: &ChargeContext,
    tx: &mut PgConnection,
) -> CoreResult<BookingReceipt> {
    let lesson = Lesson::increment_seats(lesson_id, &mut *tx).await?;

    Balance::get_for_update(student_id, &mut *tx).await?;

    if let Some(existing) = Booking::find_by_pair(student_id, lesson_id, &mut *tx).await? {
        return Err(machines::rejection(
            Some(existing.status),
            BookingTransition::Create,
            student_id,
            lesson_id,
        ));
    }
    ensure_no_overlap(student_id, &lesson, &mut *tx).await?;

    let booking_id = BookingId::new();
    let booking = Booking::insert_active(
        booking_id,
        student_id,
        lesson_id,
        lesson.credit_cost,
        &mut *tx,
    )
    .await?;
    let ledger_entry = charge(booking.id, student_id, &lesson, charge_ctx, &mut *tx).await?;

    Ok(BookingReceipt {
        booking,
        lesson,
        ledger_entry,
    })
}

/// active → cancelled, releasing the seat and refunding what was charged.
pub async fn cancel_in_tx(
    student_id: UserId,
    lesson_id: LessonId,
    charge_ctx: &ChargeContext,
    tx: &mut PgConnection,
) -> CoreResult<BookingReceipt> {
    Lesson::lock_row(lesson_id, &mut *tx).await?;

    let Some(booking) = Booking::transition(
        student_id,
        lesson_id,
        BookingTransition::Cancel,
        charge_ctx.actor_id,
        &mut *tx,
    )
    .await?
    else {
        return Err(reject(student_id, lesson_id, BookingTransition::Cancel, tx).await);
    };

    let lesson = Lesson::decrement_seats(lesson_id, &mut *tx).await?;

    let ledger_entry = if booking.credits_charged > 0 {
        let posting = charge_ctx.posting(
            student_id,
            charge_ctx.refund_operation(),
            booking.id,
            format!("cancelled booking for lesson {lesson_id}"),
        );
        Some(credit(posting, booking.credits_charged, &mut *tx).await?)
    } else {
        None
    };

    Ok(BookingReceipt {
        booking,
        lesson,
        ledger_entry,
    })
}

/// cancelled → active, re-validated exactly like a new booking.
pub async fn reactivate_in_tx(
    student_id: UserId,
    lesson_id: LessonId,
    charge_ctx: &ChargeContext,
    tx: &mut PgConnection,
) -> CoreResult<BookingReceipt> {
    Lesson::lock_row(lesson_id, &mut *tx).await?;

    let Some(booking) = Booking::transition(
        student_id,
        lesson_id,
        BookingTransition::Reactivate,
        None,
        &mut *tx,
    )
    .await?
    else {
        return Err(reject(student_id, lesson_id, BookingTransition::Reactivate, tx).await);
    };

    let lesson = Lesson::increment_seats(lesson_id, &mut *tx).await?;
    Balance::get_for_update(student_id, &mut *tx).await?;
    ensure_no_overlap(student_id, &lesson, &mut *tx).await?;

    let ledger_entry = charge(booking.id, student_id, &lesson, charge_ctx, &mut *tx).await?;
    let booking = Booking::record_charge(booking.id, lesson.credit_cost, &mut *tx).await?;

    Ok(BookingReceipt {
        booking,
        lesson,
        ledger_entry,
    })
}

pub async fn create_booking(
    ctx: &OpContext,
    student_id: UserId,
    lesson_id: LessonId,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<BookingReceipt> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let receipt =
            create_in_tx(student_id, lesson_id, &ChargeContext::direct(actor_id), &mut tx).await?;
        tx.commit().await?;

        info!(
            booking_id = %receipt.booking.id,
            student_id = %student_id,
            lesson_id = %lesson_id,
            credits = receipt.booking.credits_charged,
            seats = receipt.lesson.current_seats,
            "Booking created"
        );
        Ok(receipt)
    })
    .await
}

pub async fn cancel_booking(
    ctx: &OpContext,
    student_id: UserId,
    lesson_id: LessonId,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<BookingReceipt> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let receipt =
            cancel_in_tx(student_id, lesson_id, &ChargeContext::direct(actor_id), &mut tx).await?;
        tx.commit().await?;

        info!(
            booking_id = %receipt.booking.id,
            student_id = %student_id,
            lesson_id = %lesson_id,
            refunded = receipt.ledger_entry.as_ref().map_or(0, |e| e.delta),
            "Booking cancelled"
        );
        Ok(receipt)
    })
    .await
}

pub async fn reactivate_booking(
    ctx: &OpContext,
    student_id: UserId,
    lesson_id: LessonId,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<BookingReceipt> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let receipt =
            reactivate_in_tx(student_id, lesson_id, &ChargeContext::direct(actor_id), &mut tx)
                .await?;
        tx.commit().await?;

        info!(
            booking_id = %receipt.booking.id,
            student_id = %student_id,
            lesson_id = %lesson_id,
            credits = receipt.booking.credits_charged,
            "Booking reactivated"
        );
        Ok(receipt)
    })
    .await
}
