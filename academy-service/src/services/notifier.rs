//! Invoice document generation and delivery.
//!
//! Best-effort side channel: rendering or sending can fail without affecting
//! the invoice itself, which is already committed by the time this runs.
//! Callers log the outcome and carry on.

use std::sync::Arc;

use crate::models::{Invoice, Lesson};
use crate::services::metrics::EMAILS_TOTAL;
use crate::services::providers::{
    EmailAttachment, EmailMessage, EmailProvider, InvoiceRenderer,
};
use tracing::{info, instrument, warn};

/// Result of a notification attempt. Never an error: downstream failure is
/// reported, not propagated.
#[derive(Debug, Clone)]
pub struct NotificationOutcome {
    pub success: bool,
    pub message: String,
    pub document: Option<Vec<u8>>,
}

/// Renders an invoice document and emails it to the billed party.
pub struct InvoiceProcessor {
    renderer: Box<dyn InvoiceRenderer>,
    email: Arc<dyn EmailProvider>,
}

impl InvoiceProcessor {
    pub fn new(renderer: Box<dyn InvoiceRenderer>, email: Arc<dyn EmailProvider>) -> Self {
        Self { renderer, email }
    }

    /// Generate the invoice document and send it to `recipient_email`.
    #[instrument(skip(self, invoice, lessons), fields(invoice_number = %invoice.invoice_number))]
    pub async fn generate_and_send(
        &self,
        invoice: &Invoice,
        lessons: &[Lesson],
        recipient_name: &str,
        recipient_email: &str,
    ) -> NotificationOutcome {
        let document = match self.renderer.render(invoice, lessons, recipient_name) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "Failed to render invoice document");
                EMAILS_TOTAL.with_label_values(&["invoice", "failed"]).inc();
                return NotificationOutcome {
                    success: false,
                    message: format!("Failed to generate invoice document: {}", e),
                    document: None,
                };
            }
        };

        let message = EmailMessage {
            to: recipient_email.to_string(),
            subject: format!("Invoice {} from Maple Key Music Academy", invoice.invoice_number),
            body_text: format!(
                "Hello {},\n\nPlease find invoice {} attached. The balance of {} is due {}.\n\n\
                 Maple Key Music Academy",
                recipient_name,
                invoice.invoice_number,
                invoice.payment_balance,
                invoice.due_date.format("%Y-%m-%d"),
            ),
            body_html: None,
            attachment: Some(EmailAttachment {
                filename: document.filename.clone(),
                content_type: document.content_type.clone(),
                content: document.content.clone(),
            }),
        };

        match self.email.send(&message).await {
            Ok(_) => {
                info!(to = %recipient_email, "Invoice emailed");
                EMAILS_TOTAL.with_label_values(&["invoice", "sent"]).inc();
                NotificationOutcome {
                    success: true,
                    message: "Invoice generated and sent successfully".to_string(),
                    document: Some(document.content),
                }
            }
            Err(e) => {
                warn!(error = %e, to = %recipient_email, "Failed to email invoice");
                EMAILS_TOTAL.with_label_values(&["invoice", "failed"]).inc();
                NotificationOutcome {
                    success: false,
                    message: format!("Document generated but email failed: {}", e),
                    document: Some(document.content),
                }
            }
        }
    }
}
