//! Domain models for academy-service.

mod invoice;
mod lesson;
mod rate_settings;
mod registration;
mod user;

pub use invoice::{
    CreateInvoice, Invoice, InvoiceStatus, InvoiceType, ListInvoicesFilter, month_prefix,
    next_invoice_number,
};
pub use lesson::{
    CreateLesson, Lesson, LessonStatus, LessonType, MAX_LESSON_HOURS, validate_duration,
    validate_rate,
};
pub use rate_settings::{
    DEFAULT_HOURLY_RATE, DEFAULT_IN_PERSON_STUDENT_RATE, DEFAULT_ONLINE_STUDENT_RATE,
    DEFAULT_ONLINE_TEACHER_RATE, RATE_SETTINGS_ID, RateSettings,
};
pub use registration::{
    ApprovedEmail, INVITATION_EXPIRY_HOURS, InvitationToken, RegistrationRequest,
    RegistrationStatus, hash_token,
};
pub use user::{
    CreateUser, Role, RoleKind, StudentProfile, TeacherProfile, User, UserRow, placeholder_email,
    split_name,
};
