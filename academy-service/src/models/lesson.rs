//! Lesson ledger entries.
//!
//! A lesson locks both rates the moment it is created; the invoice side of the
//! system only ever reads them back. `total_cost` keeps the legacy pay-side
//! meaning (teacher rate), `cost_for` is the per-invoice-type contribution the
//! aggregator sums.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

use super::invoice::InvoiceType;

/// Upper bound on a single lesson, in hours. Rejects data-entry errors.
pub const MAX_LESSON_HOURS: Decimal = Decimal::from_parts(24, 0, 0, false, 0);

/// Lesson delivery type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    InPerson,
    Online,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::InPerson => "in_person",
            LessonType::Online => "online",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "online" => LessonType::Online,
            _ => LessonType::InPerson,
        }
    }
}

/// Lesson status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Requested => "requested",
            LessonStatus::Confirmed => "confirmed",
            LessonStatus::Completed => "completed",
            LessonStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "confirmed" => LessonStatus::Confirmed,
            "completed" => LessonStatus::Completed,
            "cancelled" => LessonStatus::Cancelled,
            _ => LessonStatus::Requested,
        }
    }

    /// Completed and cancelled lessons never change status again.
    pub fn can_transition_to(&self, target: LessonStatus) -> bool {
        matches!(
            (self, target),
            (LessonStatus::Requested, LessonStatus::Confirmed)
                | (LessonStatus::Requested, LessonStatus::Cancelled)
                | (LessonStatus::Confirmed, LessonStatus::Completed)
                | (LessonStatus::Confirmed, LessonStatus::Cancelled)
        )
    }
}

/// Lesson record. Rates are locked at creation and never resolved again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Lesson {
    pub lesson_id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub lesson_type: String,
    pub duration: Decimal,
    pub teacher_rate: Decimal,
    pub student_rate: Decimal,
    pub status: String,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub teacher_notes: Option<String>,
    pub student_notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Lesson {
    /// Pay-side cost: what the school owes the teacher for this lesson.
    pub fn total_cost(&self) -> Decimal {
        self.teacher_rate * self.duration
    }

    /// The lesson's contribution to an invoice of the given type.
    pub fn cost_for(&self, invoice_type: InvoiceType) -> Decimal {
        match invoice_type {
            InvoiceType::TeacherPayment => self.teacher_rate * self.duration,
            InvoiceType::StudentBilling => self.student_rate * self.duration,
        }
    }

    pub fn lesson_type(&self) -> LessonType {
        LessonType::from_string(&self.lesson_type)
    }

    pub fn status(&self) -> LessonStatus {
        LessonStatus::from_string(&self.status)
    }
}

/// Input for creating a lesson. `None` rates mean "resolve from settings";
/// any supplied rate is locked verbatim.
#[derive(Debug, Clone)]
pub struct CreateLesson {
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub lesson_type: LessonType,
    pub duration: Decimal,
    pub teacher_rate: Option<Decimal>,
    pub student_rate: Option<Decimal>,
    pub status: LessonStatus,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub teacher_notes: Option<String>,
}

pub fn validate_duration(duration: Decimal) -> Result<(), AppError> {
    if duration <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow!(
            "Duration must be greater than 0"
        )));
    }
    if duration > MAX_LESSON_HOURS {
        return Err(AppError::BadRequest(anyhow!(
            "Duration cannot exceed 24 hours"
        )));
    }
    Ok(())
}

pub fn validate_rate(rate: Decimal) -> Result<(), AppError> {
    if rate <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow!("Rate must be greater than 0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn lesson(teacher_rate: &str, student_rate: &str, duration: &str) -> Lesson {
        Lesson {
            lesson_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            lesson_type: "in_person".to_string(),
            duration: dec(duration),
            teacher_rate: dec(teacher_rate),
            student_rate: dec(student_rate),
            status: "completed".to_string(),
            scheduled_date: None,
            completed_date: None,
            teacher_notes: None,
            student_notes: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn total_cost_is_teacher_rate_times_duration() {
        assert_eq!(lesson("80.00", "100.00", "1.5").total_cost(), dec("120.00"));
        assert_eq!(lesson("80.00", "100.00", "0.25").total_cost(), dec("20.00"));
        assert_eq!(lesson("50.00", "100.00", "1.0").total_cost(), dec("50.00"));
    }

    #[test]
    fn total_cost_keeps_exact_decimal_precision() {
        // 45.00 * 1.5 must be exactly 67.50, with no binary float drift.
        assert_eq!(lesson("45.00", "60.00", "1.5").total_cost(), dec("67.50"));
    }

    #[test]
    fn cost_for_picks_the_rate_column_by_invoice_type() {
        let l = lesson("50.00", "100.00", "1.0");
        assert_eq!(l.cost_for(InvoiceType::TeacherPayment), dec("50.00"));
        assert_eq!(l.cost_for(InvoiceType::StudentBilling), dec("100.00"));
    }

    #[test]
    fn duration_bounds_are_inclusive_at_24() {
        assert!(validate_duration(dec("24.0")).is_ok());
        assert!(validate_duration(dec("0.25")).is_ok());
        assert!(validate_duration(dec("24.01")).is_err());
        assert!(validate_duration(dec("0")).is_err());
        assert!(validate_duration(dec("-1.0")).is_err());
    }

    #[test]
    fn explicit_rates_must_be_positive() {
        assert!(validate_rate(dec("0.01")).is_ok());
        assert!(validate_rate(dec("0")).is_err());
        assert!(validate_rate(dec("-5.00")).is_err());
    }

    #[test]
    fn lesson_status_machine_has_terminal_states() {
        use LessonStatus::*;
        assert!(Requested.can_transition_to(Confirmed));
        assert!(Requested.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Requested.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(Requested));
    }
}
