//! User accounts for academy-service.
//!
//! One table holds every account; the domain type carries the role as a sum
//! type so teacher- and student-only attributes cannot leak across roles and
//! capability checks never compare strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::rate_settings::DEFAULT_HOURLY_RATE;

/// Role discriminant as stored in the `role` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Management,
    Teacher,
    Student,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Management => "management",
            RoleKind::Teacher => "teacher",
            RoleKind::Student => "student",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "management" => RoleKind::Management,
            "teacher" => RoleKind::Teacher,
            _ => RoleKind::Student,
        }
    }
}

/// Teacher-only attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherProfile {
    /// The teacher's in-person hourly rate; the online rate comes from
    /// [`super::RateSettings`].
    pub hourly_rate: Decimal,
    pub bio: String,
    pub instruments: String,
}

/// Student-only attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub assigned_teacher: Option<Uuid>,
    pub parent_email: String,
    pub parent_phone: String,
}

/// Account role with its role-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Role {
    Management,
    Teacher(TeacherProfile),
    Student(StudentProfile),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Management => RoleKind::Management,
            Role::Teacher(_) => RoleKind::Teacher,
            Role::Student(_) => RoleKind::Student,
        }
    }

    /// Management accounts may approve users, invoices and rate changes.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Management)
    }

    pub fn can_teach(&self) -> bool {
        matches!(self, Role::Teacher(_))
    }

    /// Management is never gated behind an approval flag.
    pub fn auto_approved(&self) -> bool {
        self.can_manage()
    }

    pub fn teacher_profile(&self) -> Option<&TeacherProfile> {
        match self {
            Role::Teacher(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn student_profile(&self) -> Option<&StudentProfile> {
        match self {
            Role::Student(profile) => Some(profile),
            _ => None,
        }
    }
}

/// Flat row shape as stored in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address: String,
    pub role: String,
    pub is_approved: bool,
    pub hourly_rate: Option<Decimal>,
    pub bio: Option<String>,
    pub instruments: Option<String>,
    pub assigned_teacher_id: Option<Uuid>,
    pub parent_email: Option<String>,
    pub parent_phone: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address: String,
    pub is_approved: bool,
    pub role: Role,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    /// Approved accounts (or management, which is always approved) may act.
    pub fn may_act(&self) -> bool {
        self.is_approved || self.role.auto_approved()
    }

    /// The teacher's in-person hourly rate, if this user is a teacher.
    pub fn hourly_rate(&self) -> Option<Decimal> {
        self.role.teacher_profile().map(|p| p.hourly_rate)
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let role = match RoleKind::from_string(&row.role) {
            RoleKind::Management => Role::Management,
            RoleKind::Teacher => Role::Teacher(TeacherProfile {
                hourly_rate: row.hourly_rate.unwrap_or(DEFAULT_HOURLY_RATE),
                bio: row.bio.unwrap_or_default(),
                instruments: row.instruments.unwrap_or_default(),
            }),
            RoleKind::Student => Role::Student(StudentProfile {
                assigned_teacher: row.assigned_teacher_id,
                parent_email: row.parent_email.unwrap_or_default(),
                parent_phone: row.parent_phone.unwrap_or_default(),
            }),
        };

        User {
            user_id: row.user_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            address: row.address,
            // Management is approved no matter what the row says.
            is_approved: row.is_approved || role.auto_approved(),
            role,
            created_utc: row.created_utc,
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address: String,
    pub role: Role,
    pub is_approved: bool,
}

impl CreateUser {
    /// Whether the stored row should carry the approval flag. Management
    /// accounts are always approved regardless of the caller's input.
    pub fn effective_approval(&self) -> bool {
        self.is_approved || self.role.auto_approved()
    }
}

/// Split a reported student name into (first_name, last_name): the first
/// token is the first name, everything after it the last name.
pub fn split_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Deterministic placeholder email for a student record created from a
/// teacher's lesson report: `alice.johnson@temp.com`, then
/// `alice.johnson1@temp.com` and so on when the address is taken.
pub fn placeholder_email(student_name: &str, attempt: u32) -> String {
    let local = student_name.trim().to_lowercase().replace(' ', ".");
    if attempt == 0 {
        format!("{}@temp.com", local)
    } else {
        format!("{}{}@temp.com", local, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn row(role: &str) -> UserRow {
        UserRow {
            user_id: Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            phone_number: String::new(),
            address: String::new(),
            role: role.to_string(),
            is_approved: false,
            hourly_rate: None,
            bio: None,
            instruments: None,
            assigned_teacher_id: None,
            parent_email: None,
            parent_phone: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn management_rows_are_always_approved() {
        let user: User = row("management").into();
        assert!(user.is_approved);
        assert!(user.may_act());
        assert!(user.role.can_manage());
    }

    #[test]
    fn unapproved_teachers_may_not_act() {
        let user: User = row("teacher").into();
        assert!(!user.may_act());
        assert!(user.role.can_teach());
    }

    #[test]
    fn teacher_rows_without_a_rate_fall_back_to_the_default() {
        let user: User = row("teacher").into();
        assert_eq!(user.hourly_rate(), Some(dec("80.00")));
    }

    #[test]
    fn teacher_rows_keep_their_own_rate() {
        let mut r = row("teacher");
        r.hourly_rate = Some(dec("95.50"));
        let user: User = r.into();
        assert_eq!(user.hourly_rate(), Some(dec("95.50")));
    }

    #[test]
    fn students_carry_no_hourly_rate() {
        let user: User = row("student").into();
        assert_eq!(user.hourly_rate(), None);
        assert!(user.role.student_profile().is_some());
    }

    #[test]
    fn full_name_falls_back_to_email() {
        let mut r = row("student");
        r.first_name = String::new();
        r.last_name = String::new();
        let user: User = r.into();
        assert_eq!(user.full_name(), "jane@example.com");
    }

    #[test]
    fn placeholder_emails_follow_the_legacy_format() {
        assert_eq!(placeholder_email("Alice Johnson", 0), "alice.johnson@temp.com");
        assert_eq!(placeholder_email("Joey Smith", 1), "joey.smith1@temp.com");
        assert_eq!(placeholder_email("Joey Smith", 2), "joey.smith2@temp.com");
    }

    #[test]
    fn split_name_takes_the_first_token_as_first_name() {
        assert_eq!(
            split_name("Alice Johnson"),
            ("Alice".to_string(), "Johnson".to_string())
        );
        assert_eq!(
            split_name("Mary Jane van Dyke"),
            ("Mary".to_string(), "Jane van Dyke".to_string())
        );
        assert_eq!(split_name("Cher"), ("Cher".to_string(), String::new()));
    }

    #[test]
    fn create_user_applies_management_auto_approval() {
        let input = CreateUser {
            email: "boss@example.com".to_string(),
            first_name: "Boss".to_string(),
            last_name: "Person".to_string(),
            phone_number: String::new(),
            address: String::new(),
            role: Role::Management,
            is_approved: false,
        };
        assert!(input.effective_approval());
    }
}
