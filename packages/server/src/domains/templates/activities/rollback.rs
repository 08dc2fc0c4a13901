use serde::Serialize;
use tracing::info;

use crate::common::{CoreError, CoreResult, TemplateApplicationId, UserId};
use crate::domains::bookings::activities::{release_lessons, ChargeContext, ReleaseSummary};
use crate::domains::lessons::models::Lesson;
use crate::domains::templates::machines::{self, ApplicationTransition};
use crate::domains::templates::models::{ApplicationStatus, TemplateApplication};
use crate::kernel::{OpContext, ServerDeps};

#[derive(Debug, Clone, Serialize)]
pub struct RollbackSummary {
    pub application: TemplateApplication,
    /// True when the application had already been rolled back and nothing
    /// changed.
    pub already_rolled_back: bool,
    pub released: ReleaseSummary,
}

/// Reverses a live application: cancels and refunds its bookings and
/// soft-deletes its lessons. Rolling back twice is a no-op.
pub async fn rollback_application(
    ctx: &OpContext,
    application_id: TemplateApplicationId,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<RollbackSummary> {
    ctx.run(async {
        let mut tx = deps.db_pool.begin().await?;
        let application = TemplateApplication::lock_by_id(application_id, &mut tx).await?;

        match application.status {
            ApplicationStatus::RolledBack => {
                info!(application_id = %application_id, "Template application already rolled back");
                return Ok(RollbackSummary {
                    application,
                    already_rolled_back: true,
                    released: ReleaseSummary::default(),
                });
            }
            ApplicationStatus::Replaced => {
                return Err(machines::rejection(
                    application.status,
                    ApplicationTransition::RollBack,
                ));
            }
            ApplicationStatus::Applied => {}
        }

        let lessons = Lesson::lock_for_application(application_id, &mut tx).await?;
        let released = release_lessons(
            &lessons,
            &ChargeContext::template(application_id, actor_id),
            &mut tx,
        )
        .await?;

        let application = TemplateApplication::transition(
            application_id,
            ApplicationTransition::RollBack,
            actor_id,
            None,
            &mut tx,
        )
        .await?
        .ok_or_else(|| {
            CoreError::ConcurrentModification(format!(
                "application {application_id} changed while rolling back"
            ))
        })?;

        tx.commit().await?;

        info!(
            application_id = %application_id,
            actor_id = %actor_id,
            bookings_cancelled = released.bookings_cancelled,
            credits_refunded = released.credits_refunded,
            lessons_deleted = released.lessons_deleted,
            "Template application rolled back"
        );
        Ok(RollbackSummary {
            application,
            already_rolled_back: false,
            released,
        })
    })
    .await
}
