use super::ProviderError;
use crate::models::{Invoice, InvoiceType, Lesson};

/// A rendered invoice document, ready to attach to an email.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Renders an invoice into a document. Real PDF engines sit behind this
/// seam; the in-repo renderer produces a plain-text statement.
pub trait InvoiceRenderer: Send + Sync {
    fn render(
        &self,
        invoice: &Invoice,
        lessons: &[Lesson],
        party_name: &str,
    ) -> Result<RenderedDocument, ProviderError>;
}

/// Plain-text invoice statement renderer.
#[derive(Default)]
pub struct TextInvoiceRenderer;

impl TextInvoiceRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl InvoiceRenderer for TextInvoiceRenderer {
    fn render(
        &self,
        invoice: &Invoice,
        lessons: &[Lesson],
        party_name: &str,
    ) -> Result<RenderedDocument, ProviderError> {
        let invoice_type = invoice.invoice_type();
        let heading = match invoice_type {
            InvoiceType::TeacherPayment => "TEACHER PAYMENT STATEMENT",
            InvoiceType::StudentBilling => "STUDENT BILLING STATEMENT",
        };

        let mut out = String::new();
        out.push_str("Maple Key Music Academy\n");
        out.push_str(heading);
        out.push('\n');
        out.push_str(&format!("Invoice: {}\n", invoice.invoice_number));
        out.push_str(&format!("For: {}\n", party_name));
        out.push_str(&format!(
            "Issued: {}\n",
            invoice.created_utc.format("%Y-%m-%d")
        ));
        out.push_str(&format!("Due: {}\n\n", invoice.due_date.format("%Y-%m-%d")));

        out.push_str("Lessons\n");
        out.push_str("-------\n");
        for lesson in lessons {
            let rate = match invoice_type {
                InvoiceType::TeacherPayment => lesson.teacher_rate,
                InvoiceType::StudentBilling => lesson.student_rate,
            };
            let date = lesson
                .completed_date
                .or(lesson.scheduled_date)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unscheduled".to_string());
            out.push_str(&format!(
                "{}  {:>5} h  @ {:>8}  =  {:>10}\n",
                date,
                lesson.duration,
                rate,
                lesson.cost_for(invoice_type)
            ));
        }
        if lessons.is_empty() {
            out.push_str("(no lessons)\n");
        }

        out.push_str(&format!("\nTotal due: {}\n", invoice.payment_balance));

        Ok(RenderedDocument {
            filename: format!("{}.txt", invoice.invoice_number),
            content_type: "text/plain".to_string(),
            content: out.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn invoice(invoice_type: &str, balance: &str) -> Invoice {
        let is_teacher_side = invoice_type == "teacher_payment";
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-2026-08-0001".to_string(),
            invoice_type: invoice_type.to_string(),
            status: "pending".to_string(),
            teacher_id: is_teacher_side.then(Uuid::new_v4),
            student_id: (!is_teacher_side).then(Uuid::new_v4),
            payment_balance: dec(balance),
            due_date: Utc::now(),
            notes: None,
            created_by: None,
            created_utc: Utc::now(),
            approved_by: None,
            approved_utc: None,
            rejected_by: None,
            rejected_utc: None,
            rejection_reason: None,
            last_edited_by: None,
            last_edited_utc: None,
        }
    }

    fn lesson() -> Lesson {
        Lesson {
            lesson_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            lesson_type: "in_person".to_string(),
            duration: dec("1.5"),
            teacher_rate: dec("80.00"),
            student_rate: dec("100.00"),
            status: "completed".to_string(),
            scheduled_date: None,
            completed_date: Some(Utc::now()),
            teacher_notes: None,
            student_notes: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn renders_the_invoice_number_and_total() {
        let doc = TextInvoiceRenderer::new()
            .render(&invoice("teacher_payment", "120.00"), &[lesson()], "John Teacher")
            .unwrap();

        let text = String::from_utf8(doc.content).unwrap();
        assert!(text.contains("INV-2026-08-0001"));
        assert!(text.contains("John Teacher"));
        assert!(text.contains("Total due: 120.00"));
        assert!(text.contains("120.00")); // teacher side: 80.00 * 1.5
        assert_eq!(doc.filename, "INV-2026-08-0001.txt");
    }

    #[test]
    fn student_statements_use_the_student_rate() {
        let doc = TextInvoiceRenderer::new()
            .render(&invoice("student_billing", "150.00"), &[lesson()], "Alice Johnson")
            .unwrap();

        let text = String::from_utf8(doc.content).unwrap();
        assert!(text.contains("STUDENT BILLING STATEMENT"));
        assert!(text.contains("150.00")); // student side: 100.00 * 1.5
    }

    #[test]
    fn empty_invoices_render_without_lessons() {
        let doc = TextInvoiceRenderer::new()
            .render(&invoice("teacher_payment", "0.00"), &[], "John Teacher")
            .unwrap();

        let text = String::from_utf8(doc.content).unwrap();
        assert!(text.contains("(no lessons)"));
        assert!(text.contains("Total due: 0.00"));
    }
}
