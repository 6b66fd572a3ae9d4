//! Account onboarding: the approved-email allow-list, invitations, and
//! self-registration review.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use service_core::error::AppError;
use tracing::{info, instrument, warn};

use crate::models::{
    ApprovedEmail, CreateUser, DEFAULT_HOURLY_RATE, InvitationToken, RegistrationRequest, Role,
    RoleKind, StudentProfile, TeacherProfile, User, hash_token,
};
use crate::services::database::Database;
use crate::services::metrics::EMAILS_TOTAL;
use crate::services::providers::{EmailMessage, EmailProvider};

pub struct AccountService {
    db: Arc<Database>,
    email: Arc<dyn EmailProvider>,
    frontend_url: String,
}

impl AccountService {
    pub fn new(db: Arc<Database>, email: Arc<dyn EmailProvider>, frontend_url: String) -> Self {
        Self {
            db,
            email,
            frontend_url,
        }
    }

    /// Approve an email for onboarding and send its invitation link.
    /// The invitation email is best-effort: a send failure comes back as a
    /// warning, the approval itself stands.
    #[instrument(skip(self, manager), fields(manager = %manager.email))]
    pub async fn approve_and_invite(
        &self,
        manager: &User,
        email: &str,
        user_type: RoleKind,
        note: Option<&str>,
    ) -> Result<(ApprovedEmail, Option<String>), AppError> {
        if !manager.role.can_manage() {
            return Err(AppError::Forbidden(anyhow!(
                "Only management can approve emails"
            )));
        }
        if user_type == RoleKind::Management {
            return Err(AppError::BadRequest(anyhow!(
                "Management accounts are created directly, not invited"
            )));
        }
        if self.db.find_user_by_email(email).await?.is_some() {
            return Err(AppError::Conflict(anyhow!(
                "A user with email '{}' already exists",
                email
            )));
        }

        let approved = self
            .db
            .insert_approved_email(email, user_type, Some(manager.user_id), note)
            .await?;

        let (invitation, token) = InvitationToken::issue(email, user_type.as_str(), Utc::now());
        self.db.insert_invitation(&invitation).await?;

        let warning = match self.send_invitation_email(&invitation, &token).await {
            Ok(()) => {
                EMAILS_TOTAL
                    .with_label_values(&["invitation", "sent"])
                    .inc();
                None
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Invitation email failed");
                EMAILS_TOTAL
                    .with_label_values(&["invitation", "failed"])
                    .inc();
                Some(format!("Invitation created but email failed: {}", e))
            }
        };

        Ok((approved, warning))
    }

    /// Redeem an invitation token, creating a pre-approved account.
    #[instrument(skip(self, token))]
    pub async fn redeem_invitation(
        &self,
        token: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, AppError> {
        let invitation = self
            .db
            .find_invitation_by_hash(&hash_token(token))
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Invitation not found")))?;

        if !invitation.is_valid(Utc::now()) {
            return Err(AppError::BadRequest(anyhow!(
                "Invitation has expired or was already used"
            )));
        }

        let role = match RoleKind::from_string(&invitation.user_type) {
            RoleKind::Teacher => Role::Teacher(TeacherProfile {
                hourly_rate: DEFAULT_HOURLY_RATE,
                bio: String::new(),
                instruments: String::new(),
            }),
            _ => Role::Student(StudentProfile {
                assigned_teacher: None,
                parent_email: String::new(),
                parent_phone: String::new(),
            }),
        };

        let user = self
            .db
            .insert_user(&CreateUser {
                email: invitation.email.clone(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone_number: String::new(),
                address: String::new(),
                role,
                is_approved: true,
            })
            .await?;

        if !self.db.mark_invitation_used(invitation.invitation_id).await? {
            return Err(AppError::Conflict(anyhow!(
                "Invitation was already redeemed"
            )));
        }

        info!(email = %user.email, "Invitation redeemed");

        Ok(user)
    }

    /// Self-registration: creates an unapproved account plus a pending
    /// request for management to review.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        requested_role: RoleKind,
    ) -> Result<(User, RegistrationRequest), AppError> {
        if requested_role == RoleKind::Management {
            return Err(AppError::Forbidden(anyhow!(
                "Management accounts cannot be self-registered"
            )));
        }

        let role = match requested_role {
            RoleKind::Teacher => Role::Teacher(TeacherProfile {
                hourly_rate: DEFAULT_HOURLY_RATE,
                bio: String::new(),
                instruments: String::new(),
            }),
            _ => Role::Student(StudentProfile {
                assigned_teacher: None,
                parent_email: String::new(),
                parent_phone: String::new(),
            }),
        };

        let user = self
            .db
            .insert_user(&CreateUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone_number: String::new(),
                address: String::new(),
                role,
                is_approved: false,
            })
            .await?;

        let request = self
            .db
            .insert_registration_request(email, first_name, last_name, requested_role)
            .await?;

        info!(email = %email, "Registration request recorded");

        Ok((user, request))
    }

    async fn send_invitation_email(
        &self,
        invitation: &InvitationToken,
        token: &str,
    ) -> Result<(), AppError> {
        let invite_url = format!("{}/invite/{}", self.frontend_url, token);

        let body_text = format!(
            "Hello!\n\n\
             You've been invited to join Maple Key Music Academy as a {}.\n\n\
             To set up your account, open the link below:\n\n\
             {}\n\n\
             This invitation link will expire in 48 hours.\n\n\
             If you have any questions, please contact the academy management.\n\n\
             Best regards,\n\
             Maple Key Music Academy Team",
            invitation.user_type, invite_url
        );

        self.email
            .send(&EmailMessage {
                to: invitation.email.clone(),
                subject: "Welcome to Maple Key Music Academy - Set Up Your Account".to_string(),
                body_text,
                body_html: None,
                attachment: None,
            })
            .await
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        Ok(())
    }
}
