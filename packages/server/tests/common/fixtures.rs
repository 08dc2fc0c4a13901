//! Seed helpers shared by the integration tests.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use scheduling_core::common::{CoreResult, TemplateId, UserId};
use scheduling_core::domains::lessons::{self, Lesson, NewLesson};
use scheduling_core::domains::templates::{SlotDefinition, TemplateDefinition};
use scheduling_core::domains::ledger::{self, LedgerEntry};
use scheduling_core::kernel::{OpContext, ServerDeps};
use uuid::Uuid;

fn random_below(n: u128) -> u128 {
    Uuid::new_v4().as_u128() % n
}

fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// A Monday far in the future that no other test is likely to use.
///
/// Template weeks start in the year 3000 so they never overlap the lessons
/// placed by [`unique_start`].
pub fn unique_week() -> NaiveDate {
    let base = monday_on_or_before(NaiveDate::from_ymd_opt(3000, 1, 1).unwrap());
    base + Duration::weeks(random_below(200_000) as i64)
}

/// A whole-hour start time somewhere after 2100.
pub fn unique_start() -> DateTime<Utc> {
    let base = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
    base + Duration::hours(random_below(7_000_000) as i64)
}

pub fn students(n: usize) -> Vec<UserId> {
    (0..n).map(|_| UserId::new()).collect()
}

/// Credits `amount` through an admin adjustment.
pub async fn fund(deps: &ServerDeps, user_id: UserId, amount: i64) -> CoreResult<LedgerEntry> {
    ledger::admin_adjust(
        &OpContext::background(),
        user_id,
        amount,
        "test funding",
        UserId::new(),
        false,
        deps,
    )
    .await
}

pub async fn lesson_at(
    deps: &ServerDeps,
    teacher_id: UserId,
    start_time: DateTime<Utc>,
    minutes: i64,
    max_seats: i32,
    credit_cost: i64,
) -> CoreResult<Lesson> {
    lessons::create_lesson(
        &OpContext::background(),
        NewLesson::builder()
            .teacher_id(teacher_id)
            .start_time(start_time)
            .end_time(start_time + Duration::minutes(minutes))
            .max_seats(max_seats)
            .credit_cost(credit_cost)
            .build(),
        deps,
    )
    .await
}

/// An hour-long lesson with its own teacher at a random time.
pub async fn lesson(deps: &ServerDeps, max_seats: i32, credit_cost: i64) -> CoreResult<Lesson> {
    lesson_at(deps, UserId::new(), unique_start(), 60, max_seats, credit_cost).await
}

pub fn slot(
    weekday: Weekday,
    hour: u32,
    teacher_id: UserId,
    max_seats: i32,
    credit_cost: i64,
    students: Vec<UserId>,
) -> SlotDefinition {
    SlotDefinition {
        slot_id: None,
        weekday,
        start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
        teacher_id,
        max_seats,
        credit_cost,
        students,
    }
}

pub fn template(slots: Vec<SlotDefinition>) -> TemplateDefinition {
    TemplateDefinition {
        template_id: TemplateId::new(),
        name: "test week".to_string(),
        slots,
    }
}
