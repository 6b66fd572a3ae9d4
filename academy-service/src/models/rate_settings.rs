//! Academy-wide rate configuration.
//!
//! The school pays teachers at one rate and bills students at another for the
//! same lesson. Online lessons use flat academy rates for both sides; in-person
//! lessons pay the teacher their own hourly rate while the student is billed
//! the academy's in-person rate. There is exactly one settings record, stored
//! under [`RATE_SETTINGS_ID`] and created lazily with the defaults below.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::lesson::LessonType;

/// Well-known primary key of the single settings row.
pub const RATE_SETTINGS_ID: i32 = 1;

/// Hourly rate assigned to a teacher account that never had one set.
pub const DEFAULT_HOURLY_RATE: Decimal = Decimal::from_parts(8000, 0, 0, false, 2);

pub const DEFAULT_ONLINE_TEACHER_RATE: Decimal = Decimal::from_parts(8000, 0, 0, false, 2);
pub const DEFAULT_ONLINE_STUDENT_RATE: Decimal = Decimal::from_parts(10000, 0, 0, false, 2);
pub const DEFAULT_IN_PERSON_STUDENT_RATE: Decimal = Decimal::from_parts(10000, 0, 0, false, 2);

/// Singleton rate configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RateSettings {
    pub id: i32,
    pub online_teacher_rate: Decimal,
    pub online_student_rate: Decimal,
    pub in_person_student_rate: Decimal,
    pub updated_utc: DateTime<Utc>,
}

impl RateSettings {
    /// The record inserted when no settings row exists yet.
    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            id: RATE_SETTINGS_ID,
            online_teacher_rate: DEFAULT_ONLINE_TEACHER_RATE,
            online_student_rate: DEFAULT_ONLINE_STUDENT_RATE,
            in_person_student_rate: DEFAULT_IN_PERSON_STUDENT_RATE,
            updated_utc: now,
        }
    }

    /// Resolve the (teacher_rate, student_rate) pair for a new lesson.
    ///
    /// Called once, at lesson creation, and only for rate fields the caller
    /// left unset. Existing lessons keep their locked rates regardless of
    /// later changes to these settings or to the teacher's hourly rate.
    pub fn resolve_rates(
        &self,
        lesson_type: LessonType,
        teacher_hourly_rate: Decimal,
    ) -> (Decimal, Decimal) {
        match lesson_type {
            LessonType::Online => (self.online_teacher_rate, self.online_student_rate),
            LessonType::InPerson => (teacher_hourly_rate, self.in_person_student_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn settings() -> RateSettings {
        RateSettings {
            id: RATE_SETTINGS_ID,
            online_teacher_rate: dec("45.00"),
            online_student_rate: dec("60.00"),
            in_person_student_rate: dec("100.00"),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn online_lessons_use_academy_rates_for_both_sides() {
        let (teacher_rate, student_rate) =
            settings().resolve_rates(LessonType::Online, dec("80.00"));
        assert_eq!(teacher_rate, dec("45.00"));
        assert_eq!(student_rate, dec("60.00"));
    }

    #[test]
    fn in_person_lessons_pay_the_teacher_their_own_rate() {
        let (teacher_rate, student_rate) =
            settings().resolve_rates(LessonType::InPerson, dec("80.00"));
        assert_eq!(teacher_rate, dec("80.00"));
        assert_eq!(student_rate, dec("100.00"));
    }

    #[test]
    fn defaults_match_the_documented_legacy_rates() {
        let defaults = RateSettings::defaults(Utc::now());
        assert_eq!(defaults.online_teacher_rate, dec("80.00"));
        assert_eq!(defaults.online_student_rate, dec("100.00"));
        assert_eq!(defaults.in_person_student_rate, dec("100.00"));
        assert_eq!(DEFAULT_HOURLY_RATE, dec("80.00"));
    }
}
