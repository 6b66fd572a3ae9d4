//! Invoice aggregate and its status state machine.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::lesson::Lesson;

/// Invoice type: which direction money flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    /// School pays the teacher.
    TeacherPayment,
    /// Student pays the school.
    StudentBilling,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::TeacherPayment => "teacher_payment",
            InvoiceType::StudentBilling => "student_billing",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "student_billing" => InvoiceType::StudentBilling,
            _ => InvoiceType::TeacherPayment,
        }
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Approved,
    Paid,
    Rejected,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending" => InvoiceStatus::Pending,
            "approved" => InvoiceStatus::Approved,
            "paid" => InvoiceStatus::Paid,
            "rejected" => InvoiceStatus::Rejected,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Content (lessons, notes, balance recalculation) may only change while
    /// the invoice is a draft or awaiting review.
    pub fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Pending)
    }

    /// Paid and rejected invoices are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Rejected)
    }

    /// Legal status transitions. Overdue is reached from any non-terminal
    /// state once the due date passes; a late payment may still settle an
    /// overdue invoice.
    pub fn can_transition_to(&self, target: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Pending, Approved)
                | (Draft, Rejected)
                | (Pending, Rejected)
                | (Approved, Paid)
                | (Draft, Overdue)
                | (Pending, Overdue)
                | (Approved, Overdue)
                | (Overdue, Paid)
        )
    }
}

/// Invoice record. `payment_balance` is derived from the attached lessons and
/// recomputed on every content change; it is never taken from a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub status: String,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub payment_balance: Decimal,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub approved_by: Option<Uuid>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_utc: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub last_edited_by: Option<Uuid>,
    pub last_edited_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn invoice_type(&self) -> InvoiceType {
        InvoiceType::from_string(&self.invoice_type)
    }

    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    /// Sum the attached lessons using the rate column this invoice type pays
    /// from. Exact decimal arithmetic throughout; an empty set sums to zero.
    pub fn calculate_payment_balance(invoice_type: InvoiceType, lessons: &[Lesson]) -> Decimal {
        lessons.iter().map(|l| l.cost_for(invoice_type)).sum()
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub invoice_type: InvoiceType,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub invoice_type: Option<InvoiceType>,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub limit: i64,
}

/// The `INV-{year}-{month}-` prefix shared by every invoice issued in the
/// month of `now`.
pub fn month_prefix(now: DateTime<Utc>) -> String {
    format!("INV-{}-{:02}-", now.year(), now.month())
}

/// Generate the next invoice number for the month of `now`, given every
/// number already issued for that month: `INV-{year}-{month}-{seq}` with a
/// four-digit sequence starting at 0001. Non-numeric suffixes (corrupt legacy
/// data) are skipped rather than failing; if nothing usable exists the
/// sequence restarts at 0001.
pub fn next_invoice_number(now: DateTime<Utc>, existing: &[String]) -> String {
    let prefix = month_prefix(now);
    let max_seq = existing
        .iter()
        .filter_map(|number| number.strip_prefix(&prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:04}", prefix, max_seq + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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
    fn balance_uses_teacher_rate_for_teacher_payment() {
        let lessons = vec![lesson("50.00", "100.00", "1.0")];
        assert_eq!(
            Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &lessons),
            dec("50.00")
        );
    }

    #[test]
    fn balance_uses_student_rate_for_student_billing() {
        let lessons = vec![lesson("50.00", "100.00", "1.0")];
        assert_eq!(
            Invoice::calculate_payment_balance(InvoiceType::StudentBilling, &lessons),
            dec("100.00")
        );
    }

    #[test]
    fn balance_sums_multiple_lessons_exactly() {
        let lessons = vec![
            lesson("80.00", "100.00", "1.0"),
            lesson("80.00", "100.00", "1.5"),
            lesson("80.00", "100.00", "0.5"),
        ];
        assert_eq!(
            Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &lessons),
            dec("240.00")
        );
        assert_eq!(
            Invoice::calculate_payment_balance(InvoiceType::StudentBilling, &lessons),
            dec("300.00")
        );
    }

    #[test]
    fn balance_of_empty_lesson_set_is_zero() {
        assert_eq!(
            Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &[]),
            Decimal::ZERO
        );
    }

    #[test]
    fn balance_is_idempotent() {
        let lessons = vec![lesson("80.00", "100.00", "1.5"), lesson("45.00", "60.00", "1.0")];
        let first = Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &lessons);
        let second = Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &lessons);
        assert_eq!(first, second);
        assert_eq!(first, dec("165.00"));
    }

    #[test]
    fn status_machine_accepts_the_documented_transitions() {
        use InvoiceStatus::*;
        assert!(Draft.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Draft.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Overdue));
        assert!(Overdue.can_transition_to(Paid));
    }

    #[test]
    fn status_machine_rejects_everything_else() {
        use InvoiceStatus::*;
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Overdue.can_transition_to(Rejected));
        assert!(!Draft.can_transition_to(Approved));
        assert!(!Draft.can_transition_to(Paid));
    }

    #[test]
    fn editability_ends_at_review() {
        use InvoiceStatus::*;
        assert!(Draft.is_editable());
        assert!(Pending.is_editable());
        assert!(!Approved.is_editable());
        assert!(!Paid.is_editable());
        assert!(!Rejected.is_editable());
        assert!(!Overdue.is_editable());
    }

    #[test]
    fn first_number_of_a_month_ends_in_0001() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        assert_eq!(next_invoice_number(now, &[]), "INV-2026-08-0001");
    }

    #[test]
    fn numbers_increment_within_a_month() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let existing = vec!["INV-2026-08-0001".to_string()];
        assert_eq!(next_invoice_number(now, &existing), "INV-2026-08-0002");
    }

    #[test]
    fn numbers_from_other_months_do_not_count() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let existing = vec![
            "INV-2026-07-0009".to_string(),
            "INV-2025-08-0030".to_string(),
        ];
        assert_eq!(next_invoice_number(now, &existing), "INV-2026-08-0001");
    }

    #[test]
    fn malformed_suffixes_are_skipped() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let existing = vec![
            "INV-2026-08-ABCD".to_string(),
            "INV-2026-08-0002".to_string(),
        ];
        assert_eq!(next_invoice_number(now, &existing), "INV-2026-08-0003");

        let only_bad = vec!["INV-2026-08-ABCD".to_string()];
        assert_eq!(next_invoice_number(now, &only_bad), "INV-2026-08-0001");
    }
}
