//! Services module for academy-service.

pub mod accounts;
pub mod database;
pub mod metrics;
pub mod notifier;
pub mod providers;
pub mod submission;

pub use accounts::AccountService;
pub use database::{Database, SubmissionRecord, SubmittedLesson};
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{InvoiceProcessor, NotificationOutcome};
pub use submission::{LessonReport, SubmissionOutcome, SubmissionService};
