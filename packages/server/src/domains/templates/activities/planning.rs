//! Pure planning: turning a template into a concrete week and sizing the
//! credits it needs.

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::common::{CoreError, CoreResult, Shortfall, TemplateSlotId, UserId};
use crate::domains::templates::models::TemplateDefinition;

/// A lesson the engine will create, with its assigned students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLesson {
    pub slot_id: Option<TemplateSlotId>,
    pub teacher_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_seats: i32,
    pub credit_cost: i64,
    pub students: Vec<UserId>,
}

pub fn ensure_monday(week_start: NaiveDate) -> CoreResult<()> {
    if week_start.weekday() != Weekday::Mon {
        return Err(CoreError::validation(format!(
            "week start {week_start} is a {}, expected a Monday",
            week_start.weekday()
        )));
    }
    Ok(())
}

/// `[Monday 00:00 UTC, next Monday 00:00 UTC)`.
pub fn week_bounds(week_start: NaiveDate) -> CoreResult<(DateTime<Utc>, DateTime<Utc>)> {
    ensure_monday(week_start)?;
    let next = week_start
        .checked_add_days(Days::new(7))
        .ok_or_else(|| CoreError::validation("week start out of range"))?;
    Ok((midnight(week_start)?, midnight(next)?))
}

fn midnight(date: NaiveDate) -> CoreResult<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| CoreError::validation(format!("no midnight on {date}")))
}

/// Lays the template's slots onto the week starting at `week_start`.
pub fn plan_week(
    definition: &TemplateDefinition,
    week_start: NaiveDate,
) -> CoreResult<Vec<PlannedLesson>> {
    ensure_monday(week_start)?;
    if definition.slots.is_empty() {
        return Err(CoreError::validation(format!(
            "template {} has no slots",
            definition.template_id
        )));
    }

    definition
        .slots
        .iter()
        .map(|slot| {
            slot.validate()?;
            let day = week_start
                .checked_add_days(Days::new(u64::from(slot.weekday.num_days_from_monday())))
                .ok_or_else(|| CoreError::validation("week start out of range"))?;
            Ok(PlannedLesson {
                slot_id: slot.slot_id,
                teacher_id: slot.teacher_id,
                start_time: Utc.from_utc_datetime(&day.and_time(slot.start_time)),
                end_time: Utc.from_utc_datetime(&day.and_time(slot.end_time)),
                max_seats: slot.max_seats,
                credit_cost: slot.credit_cost,
                students: slot.students.clone(),
            })
        })
        .collect()
}

/// Credits each student needs for the plan, keyed in ascending id order.
pub fn required_credits(plan: &[PlannedLesson]) -> BTreeMap<UserId, i64> {
    let mut required = BTreeMap::new();
    for lesson in plan {
        for student in &lesson.students {
            *required.entry(*student).or_insert(0) += lesson.credit_cost;
        }
    }
    required
}

/// Every student whose balance plus pending refunds does not cover what the
/// plan needs. Users missing from `balances` count as 0.
pub fn find_shortfalls(
    required: &BTreeMap<UserId, i64>,
    balances: &HashMap<UserId, i64>,
    refunds: &HashMap<UserId, i64>,
) -> Vec<Shortfall> {
    required
        .iter()
        .filter(|(_, needed)| **needed > 0)
        .filter_map(|(user_id, needed)| {
            let available = balances.get(user_id).copied().unwrap_or(0)
                + refunds.get(user_id).copied().unwrap_or(0);
            (available < *needed).then(|| Shortfall {
                user_id: *user_id,
                required: *needed,
                available,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TemplateId;
    use crate::domains::templates::models::SlotDefinition;
    use chrono::NaiveTime;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn slot(weekday: Weekday, hour: u32, cost: i64, students: Vec<UserId>) -> SlotDefinition {
        SlotDefinition {
            slot_id: None,
            weekday,
            start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            teacher_id: UserId::new(),
            max_seats: 4,
            credit_cost: cost,
            students,
        }
    }

    fn template(slots: Vec<SlotDefinition>) -> TemplateDefinition {
        TemplateDefinition {
            template_id: TemplateId::new(),
            name: "weekly".into(),
            slots,
        }
    }

    #[test]
    fn week_must_start_on_monday() {
        let tuesday = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();
        let err = plan_week(&template(vec![slot(Weekday::Mon, 9, 1, vec![])]), tuesday);
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }

    #[test]
    fn empty_template_is_rejected() {
        assert!(plan_week(&template(vec![]), monday()).is_err());
    }

    #[test]
    fn slots_land_on_their_weekday() {
        let plan = plan_week(
            &template(vec![slot(Weekday::Mon, 9, 1, vec![]), slot(Weekday::Fri, 14, 1, vec![])]),
            monday(),
        )
        .unwrap();

        assert_eq!(plan[0].start_time, Utc.with_ymd_and_hms(2030, 1, 7, 9, 0, 0).unwrap());
        assert_eq!(plan[1].start_time, Utc.with_ymd_and_hms(2030, 1, 11, 14, 0, 0).unwrap());
        assert_eq!(plan[1].end_time, Utc.with_ymd_and_hms(2030, 1, 11, 15, 0, 0).unwrap());
    }

    #[test]
    fn week_bounds_cover_seven_days() {
        let (from, to) = week_bounds(monday()).unwrap();
        assert_eq!(to - from, chrono::Duration::days(7));
    }

    #[test]
    fn credits_are_summed_per_student() {
        let a = UserId::new();
        let b = UserId::new();
        let plan = plan_week(
            &template(vec![
                slot(Weekday::Mon, 9, 2, vec![a, b]),
                slot(Weekday::Tue, 9, 3, vec![a]),
            ]),
            monday(),
        )
        .unwrap();

        let required = required_credits(&plan);
        assert_eq!(required[&a], 5);
        assert_eq!(required[&b], 2);
    }

    #[test]
    fn shortfalls_count_pending_refunds() {
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        let required = BTreeMap::from([(a, 5), (b, 2), (c, 1)]);
        let balances = HashMap::from([(a, 3), (b, 2)]);
        let refunds = HashMap::from([(a, 2)]);

        let shortfalls = find_shortfalls(&required, &balances, &refunds);
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].user_id, c);
        assert_eq!(shortfalls[0].available, 0);
        assert_eq!(shortfalls[0].missing(), 1);
    }
}
