//! Account onboarding records: the management allow-list, self-registration
//! requests, and invitation tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Invitation links stop working after this many hours.
pub const INVITATION_EXPIRY_HOURS: i64 = 48;

/// An email address management has cleared for onboarding. Creating one
/// issues an invitation; deleting one removes the matching user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApprovedEmail {
    pub approved_email_id: Uuid,
    pub email: String,
    pub user_type: String,
    pub added_by: Option<Uuid>,
    pub note: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Review status of a self-registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
            RegistrationStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "approved" => RegistrationStatus::Approved,
            "rejected" => RegistrationStatus::Rejected,
            _ => RegistrationStatus::Pending,
        }
    }
}

/// A self-registration awaiting management review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RegistrationRequest {
    pub request_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub requested_role: String,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RegistrationRequest {
    pub fn status(&self) -> RegistrationStatus {
        RegistrationStatus::from_string(&self.status)
    }
}

/// A single-use invitation. Only the token hash is stored; the raw token
/// travels in the invitation email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct InvitationToken {
    pub invitation_id: Uuid,
    pub email: String,
    pub token_hash: String,
    pub user_type: String,
    pub expires_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl InvitationToken {
    /// Build a new invitation for `email`, returning the record and the raw
    /// token to embed in the invitation link.
    pub fn issue(email: &str, user_type: &str, now: DateTime<Utc>) -> (Self, String) {
        let token = Uuid::new_v4().to_string();
        let invitation = Self {
            invitation_id: Uuid::new_v4(),
            email: email.to_string(),
            token_hash: hash_token(&token),
            user_type: user_type.to_string(),
            expires_utc: now + Duration::hours(INVITATION_EXPIRY_HOURS),
            used_utc: None,
            created_utc: now,
        };
        (invitation, token)
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.used_utc.is_none() && now < self.expires_utc
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_are_valid_for_48_hours() {
        let now = Utc::now();
        let (invitation, token) = InvitationToken::issue("new@example.com", "teacher", now);

        assert!(invitation.is_valid(now));
        assert!(invitation.is_valid(now + Duration::hours(47)));
        assert!(!invitation.is_valid(now + Duration::hours(49)));
        assert_eq!(invitation.token_hash, hash_token(&token));
    }

    #[test]
    fn used_tokens_are_rejected() {
        let now = Utc::now();
        let (mut invitation, _) = InvitationToken::issue("new@example.com", "student", now);
        invitation.used_utc = Some(now);
        assert!(!invitation.is_valid(now + Duration::minutes(1)));
    }

    #[test]
    fn token_hash_is_stable_and_never_the_raw_token() {
        let hashed = hash_token("some-token");
        assert_eq!(hashed, hash_token("some-token"));
        assert_ne!(hashed, "some-token");
        assert_eq!(hashed.len(), 64);
    }
}
