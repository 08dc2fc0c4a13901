use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::common::{CoreError, CoreResult, TemplateId, TemplateSlotId, UserId};

/// A weekly schedule template as the engine consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub template_id: TemplateId,
    pub name: String,
    /// In template order.
    pub slots: Vec<SlotDefinition>,
}

/// One recurring lesson of a template and the students assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    #[serde(default)]
    pub slot_id: Option<TemplateSlotId>,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub teacher_id: UserId,
    pub max_seats: i32,
    #[serde(default)]
    pub credit_cost: i64,
    #[serde(default)]
    pub students: Vec<UserId>,
}

impl SlotDefinition {
    pub fn validate(&self) -> CoreResult<()> {
        if self.end_time <= self.start_time {
            return Err(CoreError::validation(format!(
                "slot on {} must end after it starts",
                self.weekday
            )));
        }
        if self.max_seats < 1 {
            return Err(CoreError::validation("slot needs at least one seat"));
        }
        if self.credit_cost < 0 {
            return Err(CoreError::validation("slot credit cost cannot be negative"));
        }

        let mut students = self.students.clone();
        students.sort();
        students.dedup();
        if students.len() != self.students.len() {
            return Err(CoreError::validation(format!(
                "slot on {} at {} lists a student twice",
                self.weekday, self.start_time
            )));
        }
        if self.students.len() > self.max_seats as usize {
            return Err(CoreError::validation(format!(
                "slot on {} at {} assigns {} students to {} seats",
                self.weekday,
                self.start_time,
                self.students.len(),
                self.max_seats
            )));
        }
        Ok(())
    }
}

/// Stored weekday encoding: days from Monday.
pub fn weekday_from_offset(offset: i16) -> Option<Weekday> {
    match offset {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_offset(weekday: Weekday) -> i16 {
    weekday.num_days_from_monday() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(students: Vec<UserId>, max_seats: i32) -> SlotDefinition {
        SlotDefinition {
            slot_id: None,
            weekday: Weekday::Wed,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            teacher_id: UserId::new(),
            max_seats,
            credit_cost: 1,
            students,
        }
    }

    #[test]
    fn weekday_offsets_round_trip() {
        for offset in 0..7 {
            let weekday = weekday_from_offset(offset).unwrap();
            assert_eq!(weekday_offset(weekday), offset);
        }
        assert_eq!(weekday_from_offset(7), None);
    }

    #[test]
    fn students_must_fit_the_seats() {
        assert!(slot(vec![UserId::new(), UserId::new()], 2).validate().is_ok());
        assert!(slot(vec![UserId::new(), UserId::new()], 1).validate().is_err());
    }

    #[test]
    fn duplicate_students_are_rejected() {
        let student = UserId::new();
        assert!(slot(vec![student, student], 3).validate().is_err());
    }
}
