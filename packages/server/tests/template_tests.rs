//! Weekly template application, replacement and rollback.

mod common;

use chrono::{Datelike, Duration, TimeZone, Utc, Weekday};
use futures::future::join_all;
use scheduling_core::common::{CoreError, TemplateApplicationId, TemplateId, UserId};
use scheduling_core::domains::bookings::{self, Booking};
use scheduling_core::domains::ledger::{self, LedgerEntry, OperationType};
use scheduling_core::domains::lessons::Lesson;
use scheduling_core::domains::templates::{
    self, ApplicationStatus, LessonTemplate, NewTemplate, TemplateDefinition, WeekStats,
};
use scheduling_core::kernel::{BaseTemplateCatalog, OpContext, ServerDeps, StaticTemplateCatalog};
use test_context::test_context;

use crate::common::{fund, lesson_at, slot, students, template, unique_week, TestHarness};

/// Five lessons over the week; four students each booked twice at one
/// credit per lesson.
fn five_day_week(teacher: UserId, s: &[UserId]) -> TemplateDefinition {
    template(vec![
        slot(Weekday::Mon, 10, teacher, 3, 1, vec![s[0], s[1]]),
        slot(Weekday::Tue, 10, teacher, 3, 1, vec![s[2], s[3]]),
        slot(Weekday::Wed, 10, teacher, 3, 1, vec![s[0], s[2]]),
        slot(Weekday::Thu, 10, teacher, 3, 1, vec![s[1], s[3]]),
        slot(Weekday::Fri, 10, teacher, 3, 1, vec![]),
    ])
}

fn deps_for(ctx: &TestHarness, definition: &TemplateDefinition) -> (ServerDeps, StaticTemplateCatalog) {
    let catalog = StaticTemplateCatalog::new().with_template(definition.clone());
    (ctx.deps_with_catalog(catalog.clone()), catalog)
}

async fn balances(deps: &ServerDeps, users: &[UserId]) -> Vec<i64> {
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        out.push(ledger::get_balance(*user, deps).await.unwrap());
    }
    out
}

const EMPTY_WEEK: WeekStats = WeekStats {
    lessons: 0,
    active_bookings: 0,
    credits_moved: 0,
    distinct_students: 0,
};

#[test_context(TestHarness)]
#[tokio::test]
async fn apply_then_roll_back(ctx: &TestHarness) {
    let week = unique_week();
    let kids = students(4);
    for kid in &kids {
        fund(&ctx.deps, *kid, 2).await.unwrap();
    }
    let definition = five_day_week(UserId::new(), &kids);
    let (deps, catalog) = deps_for(ctx, &definition);
    let admin = UserId::new();
    let op = OpContext::background();

    let applied = templates::apply_template(&op, definition.template_id, week, admin, &deps)
        .await
        .unwrap();
    assert_eq!(applied.lesson_ids.len(), 5);
    assert_eq!(applied.bookings_created, 8);
    assert_eq!(applied.credits_debited, 8);
    assert_eq!(applied.students, 4);
    assert!(applied.replaced_application_id.is_none());
    assert_eq!(catalog.load_calls(), vec![definition.template_id]);
    assert_eq!(balances(&deps, &kids).await, vec![0, 0, 0, 0]);

    let stats = templates::get_week_stats(week, &deps).await.unwrap();
    assert_eq!(
        stats,
        WeekStats {
            lessons: 5,
            active_bookings: 8,
            credits_moved: 8,
            distinct_students: 4,
        }
    );

    let monday = Lesson::find_by_id(applied.lesson_ids[0], &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    let expected_start = Utc.from_utc_datetime(&week.and_hms_opt(10, 0, 0).unwrap());
    assert_eq!(monday.start_time, expected_start);
    assert_eq!(monday.current_seats, 2);
    assert_eq!(monday.template_application_id, Some(applied.application_id));

    let debits = LedgerEntry::find_for_application(applied.application_id, &ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(debits.len(), 8);
    assert!(debits
        .iter()
        .all(|e| e.operation_type == OperationType::TemplateDebit));

    let rolled = templates::rollback_application(&op, applied.application_id, admin, &deps)
        .await
        .unwrap();
    assert!(!rolled.already_rolled_back);
    assert_eq!(rolled.released.bookings_cancelled, 8);
    assert_eq!(rolled.released.credits_refunded, 8);
    assert_eq!(rolled.released.lessons_deleted, 5);
    assert_eq!(rolled.application.status, ApplicationStatus::RolledBack);
    assert_eq!(rolled.application.rolled_back_by, Some(admin));

    assert_eq!(balances(&deps, &kids).await, vec![2, 2, 2, 2]);
    assert_eq!(templates::get_week_stats(week, &deps).await.unwrap(), EMPTY_WEEK);
    for lesson_id in &applied.lesson_ids {
        let lesson = Lesson::find_by_id(*lesson_id, &ctx.db_pool)
            .await
            .unwrap()
            .unwrap();
        assert!(!lesson.is_live());
        assert_eq!(lesson.current_seats, 0);
    }

    let again = templates::rollback_application(&op, applied.application_id, admin, &deps)
        .await
        .unwrap();
    assert!(again.already_rolled_back);
    assert_eq!(again.released.bookings_cancelled, 0);
    assert_eq!(balances(&deps, &kids).await, vec![2, 2, 2, 2]);

    for kid in &kids {
        assert!(ledger::audit_user(*kid, &deps).await.unwrap().consistent);
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn student_without_balance_blocks_the_whole_week(ctx: &TestHarness) {
    let week = unique_week();
    let funded = UserId::new();
    let broke = UserId::new();
    fund(&ctx.deps, funded, 5).await.unwrap();

    let definition = template(vec![
        slot(Weekday::Mon, 9, UserId::new(), 2, 1, vec![funded]),
        slot(Weekday::Tue, 9, UserId::new(), 2, 1, vec![funded, broke]),
    ]);
    let (deps, _) = deps_for(ctx, &definition);

    let err = templates::apply_template(
        &OpContext::background(),
        definition.template_id,
        week,
        UserId::new(),
        &deps,
    )
    .await
    .unwrap_err();

    match err {
        CoreError::InsufficientFunds(shortfalls) => {
            assert_eq!(shortfalls.len(), 1);
            assert_eq!(shortfalls[0].user_id, broke);
            assert_eq!(shortfalls[0].required, 1);
            assert_eq!(shortfalls[0].available, 0);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    assert_eq!(templates::get_week_stats(week, &deps).await.unwrap(), EMPTY_WEEK);
    assert!(templates::list_applications_for_week(week, &deps)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(ledger::get_balance(funded, &deps).await.unwrap(), 5);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn every_short_student_is_reported(ctx: &TestHarness) {
    let week = unique_week();
    let kids = students(3);
    fund(&ctx.deps, kids[0], 1).await.unwrap();

    let definition = template(vec![
        slot(Weekday::Mon, 9, UserId::new(), 3, 2, kids.clone()),
        slot(Weekday::Wed, 9, UserId::new(), 3, 2, kids.clone()),
    ]);
    let (deps, _) = deps_for(ctx, &definition);

    let preview = templates::preview_apply(definition.template_id, week, &deps)
        .await
        .unwrap();
    assert_eq!(preview.credits_required, 12);
    assert_eq!(preview.shortfalls.len(), 3);

    let err = templates::apply_template(
        &OpContext::background(),
        definition.template_id,
        week,
        UserId::new(),
        &deps,
    )
    .await
    .unwrap_err();

    let mut reported: Vec<(UserId, i64)> = err
        .shortfalls()
        .iter()
        .map(|s| (s.user_id, s.missing()))
        .collect();
    reported.sort();
    let mut expected = vec![(kids[0], 3), (kids[1], 4), (kids[2], 4)];
    expected.sort();
    assert_eq!(reported, expected);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reapplying_replaces_the_previous_application(ctx: &TestHarness) {
    let week = unique_week();
    let kids = students(4);
    for kid in &kids {
        fund(&ctx.deps, *kid, 2).await.unwrap();
    }
    let definition = five_day_week(UserId::new(), &kids);
    let (deps, _) = deps_for(ctx, &definition);
    let admin = UserId::new();
    let op = OpContext::background();

    let first = templates::apply_template(&op, definition.template_id, week, admin, &deps)
        .await
        .unwrap();

    // Balances are 0 now; the refunds from the first application cover the
    // second one.
    let preview = templates::preview_apply(definition.template_id, week, &deps)
        .await
        .unwrap();
    assert_eq!(preview.replaces_application_id, Some(first.application_id));
    assert_eq!(preview.credits_refunded, 8);
    assert!(preview.shortfalls.is_empty());

    let second = templates::apply_template(&op, definition.template_id, week, admin, &deps)
        .await
        .unwrap();
    assert_eq!(second.replaced_application_id, Some(first.application_id));
    assert_eq!(second.credits_refunded, 8);
    assert_eq!(second.credits_debited, 8);

    let replaced = templates::find_application(first.application_id, &deps)
        .await
        .unwrap();
    assert_eq!(replaced.status, ApplicationStatus::Replaced);
    assert_eq!(replaced.replaced_by, Some(second.application_id));

    assert_eq!(balances(&deps, &kids).await, vec![0, 0, 0, 0]);
    assert_eq!(
        templates::get_week_stats(week, &deps).await.unwrap().lessons,
        5
    );

    let history = templates::list_applications_for_week(week, &deps)
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|a| a.status).collect::<Vec<_>>(),
        vec![ApplicationStatus::Replaced, ApplicationStatus::Applied]
    );

    let err = templates::rollback_application(&op, first.application_id, admin, &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));

    templates::rollback_application(&op, second.application_id, admin, &deps)
        .await
        .unwrap();
    assert_eq!(balances(&deps, &kids).await, vec![2, 2, 2, 2]);
    for kid in &kids {
        assert!(ledger::audit_user(*kid, &deps).await.unwrap().consistent);
    }
}

#[test_context(TestHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_applies_leave_one_live_application(ctx: &TestHarness) {
    let week = unique_week();
    let kids = students(4);
    for kid in &kids {
        fund(&ctx.deps, *kid, 4).await.unwrap();
    }
    let definition = five_day_week(UserId::new(), &kids);
    let (deps, _) = deps_for(ctx, &definition);

    let attempts = (0..2).map(|_| {
        let deps = deps.clone();
        let template_id = definition.template_id;
        async move {
            templates::apply_template(
                &OpContext::background(),
                template_id,
                week,
                UserId::new(),
                &deps,
            )
            .await
        }
    });
    let results = join_all(attempts).await;

    assert!(results.iter().any(Result::is_ok));
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, CoreError::ConcurrentModification(_))));

    let live: Vec<_> = templates::list_applications_for_week(week, &deps)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.status == ApplicationStatus::Applied)
        .collect();
    assert_eq!(live.len(), 1);

    let stats = templates::get_week_stats(week, &deps).await.unwrap();
    assert_eq!((stats.lessons, stats.active_bookings), (5, 8));
    assert_eq!(balances(&deps, &kids).await, vec![2, 2, 2, 2]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn teacher_conflict_aborts_the_whole_apply(ctx: &TestHarness) {
    let week = unique_week();
    let teacher = UserId::new();
    let kid = UserId::new();
    fund(&ctx.deps, kid, 3).await.unwrap();

    let monday_ten = Utc.from_utc_datetime(&week.and_hms_opt(10, 0, 0).unwrap());
    lesson_at(&ctx.deps, teacher, monday_ten + Duration::minutes(30), 60, 1, 0)
        .await
        .unwrap();

    let definition = template(vec![
        slot(Weekday::Sun, 10, UserId::new(), 2, 1, vec![kid]),
        slot(Weekday::Mon, 10, teacher, 2, 1, vec![kid]),
    ]);
    let (deps, _) = deps_for(ctx, &definition);

    let err = templates::apply_template(
        &OpContext::background(),
        definition.template_id,
        week,
        UserId::new(),
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoreError::ScheduleConflict(_)));

    assert_eq!(ledger::get_balance(kid, &deps).await.unwrap(), 3);
    assert!(templates::list_applications_for_week(week, &deps)
        .await
        .unwrap()
        .is_empty());
    let stats = templates::get_week_stats(week, &deps).await.unwrap();
    assert_eq!((stats.lessons, stats.active_bookings), (1, 0));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn invalid_requests_are_rejected(ctx: &TestHarness) {
    let week = unique_week();
    let definition = template(vec![slot(Weekday::Mon, 9, UserId::new(), 1, 0, vec![])]);
    let (deps, _) = deps_for(ctx, &definition);
    let op = OpContext::background();

    let tuesday = week + Duration::days(1);
    assert_eq!(tuesday.weekday(), Weekday::Tue);
    let err = templates::apply_template(&op, definition.template_id, tuesday, UserId::new(), &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = templates::apply_template(&op, TemplateId::new(), week, UserId::new(), &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let err = templates::rollback_application(
        &op,
        TemplateApplicationId::new(),
        UserId::new(),
        &deps,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let err = templates::get_week_stats(tuesday, &deps).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancelled_apply_writes_nothing(ctx: &TestHarness) {
    let week = unique_week();
    let kid = UserId::new();
    fund(&ctx.deps, kid, 1).await.unwrap();
    let definition = template(vec![slot(Weekday::Mon, 9, UserId::new(), 1, 1, vec![kid])]);
    let (deps, catalog) = deps_for(ctx, &definition);

    let op = OpContext::background();
    op.cancel();
    let err = templates::apply_template(&op, definition.template_id, week, UserId::new(), &deps)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));

    let expired = OpContext::with_timeout(std::time::Duration::ZERO);
    let err =
        templates::apply_template(&expired, definition.template_id, week, UserId::new(), &deps)
            .await
            .unwrap_err();
    assert!(matches!(err, CoreError::DeadlineExceeded));

    // Neither call got as far as the catalog.
    assert!(catalog.load_calls().is_empty());
    assert_eq!(templates::get_week_stats(week, &deps).await.unwrap(), EMPTY_WEEK);
    assert_eq!(ledger::get_balance(kid, &deps).await.unwrap(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn stored_templates_apply_through_postgres_catalog(ctx: &TestHarness) {
    let week = unique_week();
    let kid = UserId::new();
    fund(&ctx.deps, kid, 2).await.unwrap();

    let saved = LessonTemplate::save(
        NewTemplate {
            name: "Tuesday group".to_string(),
            slots: vec![slot(Weekday::Tue, 16, UserId::new(), 4, 2, vec![kid])],
        },
        Some(UserId::new()),
        &ctx.db_pool,
    )
    .await
    .unwrap();
    let slot_id = saved.slots[0].slot_id;
    assert!(slot_id.is_some());

    let loaded = ctx
        .deps
        .template_catalog
        .load_template(saved.template_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, saved);

    let applied = templates::apply_template(
        &OpContext::background(),
        saved.template_id,
        week,
        UserId::new(),
        &ctx.deps,
    )
    .await
    .unwrap();
    assert_eq!(applied.bookings_created, 1);

    let lesson = Lesson::find_by_id(applied.lesson_ids[0], &ctx.db_pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lesson.template_slot_id, slot_id);
    assert_eq!(lesson.credit_cost, 2);

    let bookings = Booking::find_for_lesson(lesson.id, &ctx.db_pool).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].student_id, kid);
    assert_eq!(ledger::get_balance(kid, &ctx.deps).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancelling_a_template_lesson_refunds_under_its_application(ctx: &TestHarness) {
    let week = unique_week();
    let kid = UserId::new();
    fund(&ctx.deps, kid, 3).await.unwrap();
    let definition = template(vec![
        slot(Weekday::Mon, 9, UserId::new(), 2, 2, vec![kid]),
        slot(Weekday::Wed, 9, UserId::new(), 2, 1, vec![kid]),
    ]);
    let (deps, _) = deps_for(ctx, &definition);
    let op = OpContext::background();
    let admin = UserId::new();

    let applied = templates::apply_template(&op, definition.template_id, week, admin, &deps)
        .await
        .unwrap();
    assert_eq!(ledger::get_balance(kid, &deps).await.unwrap(), 0);

    let summary = bookings::cancel_lesson(&op, applied.lesson_ids[0], admin, &deps)
        .await
        .unwrap();
    assert_eq!(summary.credits_refunded, 2);
    assert_eq!(ledger::get_balance(kid, &deps).await.unwrap(), 2);

    let entries = LedgerEntry::find_for_application(applied.application_id, &ctx.db_pool)
        .await
        .unwrap();
    let charged: Vec<_> = entries
        .iter()
        .map(|e| (e.operation_type, e.delta))
        .collect();
    assert_eq!(
        charged,
        vec![
            (OperationType::TemplateDebit, -2),
            (OperationType::TemplateDebit, -1),
            (OperationType::TemplateRefund, 2),
        ]
    );

    // Rolling back now only releases the remaining lesson.
    let rolled = templates::rollback_application(&op, applied.application_id, admin, &deps)
        .await
        .unwrap();
    assert_eq!(rolled.released.lessons_deleted, 1);
    assert_eq!(rolled.released.credits_refunded, 1);
    assert_eq!(ledger::get_balance(kid, &deps).await.unwrap(), 3);
}
