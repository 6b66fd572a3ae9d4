//! Lesson-report submission orchestration.
//!
//! A teacher reports a batch of taught lessons; this service validates the
//! batch, has the database layer create the lessons and the paired invoices
//! atomically, then emails the teacher invoice as a best-effort follow-up.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use tracing::{instrument, warn};

use crate::models::{Invoice, Lesson, LessonType, User, validate_duration, validate_rate};
use crate::services::database::{Database, SubmittedLesson};
use crate::services::metrics::ERRORS_TOTAL;
use crate::services::notifier::InvoiceProcessor;

/// Maximum accepted length of a reported student name.
pub const MAX_STUDENT_NAME_LEN: usize = 150;

/// One lesson line in a teacher's submission.
#[derive(Debug, Clone, Deserialize)]
pub struct LessonReport {
    pub student_name: String,
    pub student_email: Option<String>,
    pub duration: Decimal,
    /// Optional override of the teacher-side rate; the student-side rate
    /// always comes from the academy settings.
    pub rate: Option<Decimal>,
    pub lesson_type: Option<LessonType>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub teacher_notes: Option<String>,
}

/// What a submission produced, plus any non-fatal notification warning.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub teacher_invoice: Invoice,
    pub student_invoices: Vec<Invoice>,
    pub lessons: Vec<Lesson>,
    pub notification_warning: Option<String>,
}

pub struct SubmissionService {
    db: Arc<Database>,
    processor: Arc<InvoiceProcessor>,
    due_days: i64,
}

impl SubmissionService {
    pub fn new(db: Arc<Database>, processor: Arc<InvoiceProcessor>, due_days: i64) -> Self {
        Self {
            db,
            processor,
            due_days,
        }
    }

    /// Submit a batch of lesson reports for invoicing.
    ///
    /// The whole batch is validated before anything is written; the lessons
    /// and both invoice sides commit in one transaction. Only then is the
    /// teacher invoice emailed — a failure there is reported as a warning on
    /// the outcome, never as an error.
    #[instrument(skip(self, teacher, reports), fields(teacher = %teacher.email, reports = reports.len()))]
    pub async fn submit_lessons(
        &self,
        teacher: &User,
        reports: &[LessonReport],
        due_date: Option<DateTime<Utc>>,
    ) -> Result<SubmissionOutcome, AppError> {
        if !teacher.role.can_teach() {
            return Err(AppError::Forbidden(anyhow!(
                "Only teachers can submit lesson reports"
            )));
        }
        if !teacher.may_act() {
            return Err(AppError::Forbidden(anyhow!(
                "Account is awaiting management approval"
            )));
        }

        let entries = validate_reports(reports).inspect_err(|_| {
            ERRORS_TOTAL.with_label_values(&["validation"]).inc();
        })?;

        let now = Utc::now();
        let teacher_due = due_date.unwrap_or(now + Duration::days(self.due_days));
        let student_due = now + Duration::days(self.due_days);

        let record = self
            .db
            .submit_lessons_batch(teacher, &entries, teacher_due, student_due)
            .await?;

        let outcome = self
            .processor
            .generate_and_send(
                &record.teacher_invoice,
                &record.lessons,
                &teacher.full_name(),
                &teacher.email,
            )
            .await;
        let notification_warning = if outcome.success {
            None
        } else {
            warn!(
                invoice_number = %record.teacher_invoice.invoice_number,
                warning = %outcome.message,
                "Invoice committed but notification failed"
            );
            Some(outcome.message)
        };

        Ok(SubmissionOutcome {
            teacher_invoice: record.teacher_invoice,
            student_invoices: record.student_invoices,
            lessons: record.lessons,
            notification_warning,
        })
    }
}

/// Validate a submission batch. Any violation rejects the whole batch, named
/// by lesson position and field, before a single row is written.
pub fn validate_reports(reports: &[LessonReport]) -> Result<Vec<SubmittedLesson>, AppError> {
    if reports.is_empty() {
        return Err(AppError::BadRequest(anyhow!("No lessons provided")));
    }

    let mut entries = Vec::with_capacity(reports.len());
    for (index, report) in reports.iter().enumerate() {
        let position = index + 1;

        let student_name = report.student_name.trim();
        if student_name.is_empty() {
            return Err(AppError::BadRequest(anyhow!(
                "Lesson {}: student name is required",
                position
            )));
        }
        if student_name.len() > MAX_STUDENT_NAME_LEN {
            return Err(AppError::BadRequest(anyhow!(
                "Lesson {}: student name must be at most {} characters",
                position,
                MAX_STUDENT_NAME_LEN
            )));
        }

        validate_duration(report.duration)
            .map_err(|e| AppError::BadRequest(anyhow!("Lesson {}: {}", position, inner(e))))?;

        if let Some(rate) = report.rate {
            validate_rate(rate)
                .map_err(|e| AppError::BadRequest(anyhow!("Lesson {}: {}", position, inner(e))))?;
        }

        entries.push(SubmittedLesson {
            student_name: student_name.to_string(),
            student_email: report
                .student_email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            duration: report.duration,
            rate: report.rate,
            lesson_type: report.lesson_type.unwrap_or(LessonType::InPerson),
            scheduled_date: report.scheduled_date,
            teacher_notes: report.teacher_notes.clone(),
        });
    }

    Ok(entries)
}

fn inner(e: AppError) -> String {
    match e {
        AppError::BadRequest(inner) => inner.to_string(),
        other => other.to_string(),
    }
}
