//! Applying a template to a week, and the read-only preview of doing so.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::common::{
    CoreError, CoreResult, LessonId, Shortfall, TemplateApplicationId, TemplateId, UserId,
};
use crate::domains::bookings::activities::{create_in_tx, release_lessons, ChargeContext};
use crate::domains::bookings::models::Booking;
use crate::domains::ledger::models::Balance;
use crate::domains::lessons::models::{Lesson, NewLesson};
use crate::domains::templates::activities::planning::{
    find_shortfalls, plan_week, required_credits, PlannedLesson,
};
use crate::domains::templates::machines::{self, ApplicationTransition};
use crate::domains::templates::models::{TemplateApplication, TemplateDefinition};
use crate::kernel::{OpContext, ServerDeps};

#[derive(Debug, Clone, Serialize)]
pub struct ApplySummary {
    pub application_id: TemplateApplicationId,
    pub template_id: TemplateId,
    pub week_start_date: NaiveDate,
    pub lesson_ids: Vec<LessonId>,
    pub bookings_created: usize,
    pub credits_debited: i64,
    pub students: usize,
    pub replaced_application_id: Option<TemplateApplicationId>,
    /// Credits returned to students when the prior application was reversed.
    pub credits_refunded: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyPreview {
    pub template_id: TemplateId,
    pub week_start_date: NaiveDate,
    pub lessons: Vec<PlannedLesson>,
    pub bookings: usize,
    pub credits_required: i64,
    pub students: usize,
    pub replaces_application_id: Option<TemplateApplicationId>,
    pub credits_refunded: i64,
    pub shortfalls: Vec<Shortfall>,
}

async fn load_definition(
    template_id: TemplateId,
    deps: &ServerDeps,
) -> CoreResult<TemplateDefinition> {
    deps.template_catalog
        .load_template(template_id)
        .await?
        .ok_or_else(|| CoreError::not_found("template", template_id))
}

/// Credits the live application of this template and week would refund if
/// it were replaced now.
async fn pending_refunds(
    prior: Option<&TemplateApplication>,
    deps: &ServerDeps,
) -> CoreResult<HashMap<UserId, i64>> {
    match prior {
        Some(prior) => Ok(Booking::credits_held_by_application(prior.id, &deps.db_pool)
            .await?
            .into_iter()
            .collect()),
        None => Ok(HashMap::new()),
    }
}

/// Builds everything apply would do, without writing.
pub async fn preview_apply(
    template_id: TemplateId,
    week_start: NaiveDate,
    deps: &ServerDeps,
) -> CoreResult<ApplyPreview> {
    let definition = load_definition(template_id, deps).await?;
    let plan = plan_week(&definition, week_start)?;
    let required = required_credits(&plan);

    let prior = TemplateApplication::find_live(template_id, week_start, &deps.db_pool).await?;
    let refunds = pending_refunds(prior.as_ref(), deps).await?;
    let students: Vec<UserId> = required.keys().copied().collect();
    let balances = Balance::get_amounts(&students, &deps.db_pool).await?;

    Ok(ApplyPreview {
        template_id,
        week_start_date: week_start,
        bookings: plan.iter().map(|l| l.students.len()).sum(),
        credits_required: required.values().sum(),
        students: required.len(),
        replaces_application_id: prior.as_ref().map(|p| p.id),
        credits_refunded: refunds.values().sum(),
        shortfalls: find_shortfalls(&required, &balances, &refunds),
        lessons: plan,
    })
}

/// Creates the week's lessons and bookings from a template in one
/// transaction, replacing the template's live application for that week.
///
/// Balances are checked up front without locks so every shortfall is
/// reported together; they are checked again under the locks before any
/// debit. The catalog load and the pre-check share the context's deadline.
pub async fn apply_template(
    ctx: &OpContext,
    template_id: TemplateId,
    week_start: NaiveDate,
    actor_id: UserId,
    deps: &ServerDeps,
) -> CoreResult<ApplySummary> {
    ctx.run(async {
        let definition = load_definition(template_id, deps).await?;
        let plan = plan_week(&definition, week_start)?;
        let required = required_credits(&plan);

        let prior = TemplateApplication::find_live(template_id, week_start, &deps.db_pool).await?;
        let refunds = pending_refunds(prior.as_ref(), deps).await?;
        let students: Vec<UserId> = required.keys().copied().collect();
        let balances = Balance::get_amounts(&students, &deps.db_pool).await?;

        let shortfalls = find_shortfalls(&required, &balances, &refunds);
        if !shortfalls.is_empty() {
            warn!(
                template_id = %template_id,
                week_start = %week_start,
                students_short = shortfalls.len(),
                "Template apply rejected for insufficient funds"
            );
            return Err(CoreError::InsufficientFunds(shortfalls));
        }

        apply_in_tx(template_id, week_start, actor_id, plan, required, deps).await
    })
    .await
}

async fn apply_in_tx(
    template_id: TemplateId,
    week_start: NaiveDate,
    actor_id: UserId,
    plan: Vec<PlannedLesson>,
    required: BTreeMap<UserId, i64>,
    deps: &ServerDeps,
) -> CoreResult<ApplySummary> {
    let mut tx = deps.db_pool.begin().await?;
    let application_id = TemplateApplicationId::new();

    // Reverse the live application first: application row, its lessons,
    // their bookings, then every affected balance in id order.
    let mut replaced_application_id = None;
    let mut credits_refunded = 0;
    let prior = TemplateApplication::lock_live(template_id, week_start, &mut tx).await?;

    let prior_lessons = match &prior {
        Some(prior) => Lesson::lock_for_application(prior.id, &mut tx).await?,
        None => Vec::new(),
    };
    let prior_lesson_ids: Vec<LessonId> = prior_lessons.iter().map(|l| l.id).collect();
    let prior_bookings = Booking::lock_active_for_lessons(&prior_lesson_ids, &mut tx).await?;

    let mut students: Vec<UserId> = required.keys().copied().collect();
    students.extend(prior_bookings.iter().map(|b| b.student_id));
    Balance::lock_many(&students, &mut tx).await?;

    if let Some(prior) = prior {
        TemplateApplication::transition(
            prior.id,
            ApplicationTransition::Replace,
            actor_id,
            Some(application_id),
            &mut tx,
        )
        .await?
        .ok_or_else(|| machines::rejection(prior.status, ApplicationTransition::Replace))?;

        let released = release_lessons(
            &prior_lessons,
            &ChargeContext::template(prior.id, actor_id),
            &mut tx,
        )
        .await?;
        credits_refunded = released.credits_refunded;
        replaced_application_id = Some(prior.id);
    }

    // Balances may have moved since the unlocked pre-check.
    let locked = Balance::lock_many(&students, &mut tx).await?;
    let shortfalls = find_shortfalls(&required, &locked, &HashMap::new());
    if !shortfalls.is_empty() {
        return Err(CoreError::InsufficientFunds(shortfalls));
    }

    TemplateApplication::insert_applied(application_id, template_id, actor_id, week_start, &mut tx)
        .await?;

    let charge = ChargeContext::template(application_id, actor_id);
    let mut lesson_ids = Vec::with_capacity(plan.len());
    let mut bookings_created = 0;
    let mut credits_debited = 0;

    for planned in plan {
        let mut new_lesson = NewLesson::builder()
            .teacher_id(planned.teacher_id)
            .start_time(planned.start_time)
            .end_time(planned.end_time)
            .max_seats(planned.max_seats)
            .credit_cost(planned.credit_cost)
            .template_application_id(application_id)
            .build();
        new_lesson.template_slot_id = planned.slot_id;

        let lesson = Lesson::create(new_lesson, &mut tx).await?;
        for student_id in &planned.students {
            let receipt = create_in_tx(*student_id, lesson.id, &charge, &mut tx).await?;
            bookings_created += 1;
            credits_debited -= receipt.ledger_entry.map_or(0, |e| e.delta);
        }
        lesson_ids.push(lesson.id);
    }

    tx.commit().await?;

    let summary = ApplySummary {
        application_id,
        template_id,
        week_start_date: week_start,
        lesson_ids,
        bookings_created,
        credits_debited,
        students: required.len(),
        replaced_application_id,
        credits_refunded,
    };

    info!(
        application_id = %application_id,
        template_id = %template_id,
        week_start = %week_start,
        lessons = summary.lesson_ids.len(),
        bookings = bookings_created,
        credits = credits_debited,
        replaced = ?replaced_application_id,
        "Template applied"
    );
    Ok(summary)
}
