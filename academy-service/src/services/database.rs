//! Database service for academy-service.

use crate::models::{
    ApprovedEmail, CreateInvoice, CreateLesson, CreateUser, DEFAULT_HOURLY_RATE, Invoice,
    InvoiceStatus, InvoiceType, InvitationToken, Lesson, LessonStatus, ListInvoicesFilter,
    RATE_SETTINGS_ID, RateSettings, RegistrationRequest, RegistrationStatus, RoleKind, User,
    UserRow, month_prefix, next_invoice_number, placeholder_email, split_name, validate_duration,
    validate_rate,
};
use crate::services::metrics::{
    DB_QUERY_DURATION, INVOICE_AMOUNT_TOTAL, INVOICES_TOTAL, LESSONS_TOTAL,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use uuid::Uuid;

use tracing::{info, instrument};

/// A lesson report submitted by a teacher, already validated by the
/// submission service.
#[derive(Debug, Clone)]
pub struct SubmittedLesson {
    pub student_name: String,
    pub student_email: Option<String>,
    pub duration: Decimal,
    pub rate: Option<Decimal>,
    pub lesson_type: crate::models::LessonType,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub teacher_notes: Option<String>,
}

/// Everything a submission created, in one committed transaction.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub teacher_invoice: Invoice,
    pub student_invoices: Vec<Invoice>,
    pub lessons: Vec<Lesson>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "academy-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // User Operations
    // -------------------------------------------------------------------------

    /// Create a new user. Management accounts come out approved no matter
    /// what the caller passed.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn insert_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        let teacher = input.role.teacher_profile();
        let student = input.role.student_profile();

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (
                user_id, email, first_name, last_name, phone_number, address,
                role, is_approved, hourly_rate, bio, instruments,
                assigned_teacher_id, parent_email, parent_phone
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.phone_number)
        .bind(&input.address)
        .bind(input.role.kind().as_str())
        .bind(input.effective_approval())
        .bind(teacher.map(|p| p.hourly_rate))
        .bind(teacher.map(|p| p.bio.clone()))
        .bind(teacher.map(|p| p.instruments.clone()))
        .bind(student.and_then(|p| p.assigned_teacher))
        .bind(student.map(|p| p.parent_email.clone()))
        .bind(student.map(|p| p.parent_phone.clone()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "A user with email '{}' already exists",
                    input.email
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();

        info!(user_id = %row.user_id, role = %row.role, "User created");

        Ok(row.into())
    }

    /// Find a user by email.
    #[instrument(skip(self))]
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find user: {}", e)))?;
        Ok(row.map(User::from))
    }

    /// Find a user by ID.
    #[instrument(skip(self))]
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find user: {}", e)))?;
        Ok(row.map(User::from))
    }

    /// Update a teacher's in-person hourly rate. Existing lessons keep their
    /// locked rates; only future rate resolution sees the new value.
    #[instrument(skip(self))]
    pub async fn update_hourly_rate(
        &self,
        teacher_id: Uuid,
        hourly_rate: Decimal,
    ) -> Result<User, AppError> {
        validate_rate(hourly_rate)?;

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET hourly_rate = $2
            WHERE user_id = $1 AND role = 'teacher'
            RETURNING *
            "#,
        )
        .bind(teacher_id)
        .bind(hourly_rate)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update rate: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Teacher not found")))?;

        Ok(row.into())
    }

    /// Delete a user account and every onboarding record tied to its email.
    /// Lessons and invoices referencing the user go with it (FK cascade).
    #[instrument(skip(self))]
    pub async fn delete_user(&self, email: &str) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let removed = Self::remove_account_records(&mut tx, email).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if removed {
            info!(email = %email, "User and onboarding records deleted");
        }
        Ok(removed)
    }

    /// Delete an approved email. The matching user account (if one was ever
    /// created) and any registration records are removed in the same
    /// transaction — the inverse of [`Database::delete_user`], sharing one
    /// cleanup routine so the two paths can never recurse into each other.
    #[instrument(skip(self))]
    pub async fn delete_approved_email(&self, email: &str) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let removed = Self::remove_account_records(&mut tx, email).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if removed {
            info!(email = %email, "Approved email and account records deleted");
        }
        Ok(removed)
    }

    /// The single cleanup routine behind both deletion entry points: drops
    /// invitation tokens, registration requests, the approved-email row and
    /// the user row for one email address.
    async fn remove_account_records(
        tx: &mut Transaction<'_, Postgres>,
        email: &str,
    ) -> Result<bool, AppError> {
        let mut removed = false;

        for sql in [
            "DELETE FROM invitation_tokens WHERE email = $1",
            "DELETE FROM registration_requests WHERE email = $1",
            "DELETE FROM approved_emails WHERE email = $1",
            "DELETE FROM users WHERE email = $1",
        ] {
            let result = sqlx::query(sql)
                .bind(email)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Account cleanup failed: {}", e))
                })?;
            removed |= result.rows_affected() > 0;
        }

        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // Onboarding Operations
    // -------------------------------------------------------------------------

    /// Add an email to the approved list.
    #[instrument(skip(self))]
    pub async fn insert_approved_email(
        &self,
        email: &str,
        user_type: RoleKind,
        added_by: Option<Uuid>,
        note: Option<&str>,
    ) -> Result<ApprovedEmail, AppError> {
        let approved = sqlx::query_as::<_, ApprovedEmail>(
            r#"
            INSERT INTO approved_emails (approved_email_id, email, user_type, added_by, note)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(user_type.as_str())
        .bind(added_by)
        .bind(note)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("'{}' is already approved", email))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to approve email: {}", e)),
        })?;

        info!(email = %email, user_type = %user_type.as_str(), "Email approved for onboarding");

        Ok(approved)
    }

    /// Look up an approved email.
    #[instrument(skip(self))]
    pub async fn find_approved_email(&self, email: &str) -> Result<Option<ApprovedEmail>, AppError> {
        sqlx::query_as::<_, ApprovedEmail>("SELECT * FROM approved_emails WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to find approved email: {}", e))
            })
    }

    /// Store a new invitation token.
    #[instrument(skip(self, invitation), fields(email = %invitation.email))]
    pub async fn insert_invitation(
        &self,
        invitation: &InvitationToken,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO invitation_tokens
                (invitation_id, email, token_hash, user_type, expires_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invitation.invitation_id)
        .bind(&invitation.email)
        .bind(&invitation.token_hash)
        .bind(&invitation.user_type)
        .bind(invitation.expires_utc)
        .bind(invitation.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to store invitation: {}", e)))?;

        Ok(())
    }

    /// Find an invitation by its token hash.
    #[instrument(skip(self, token_hash))]
    pub async fn find_invitation_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<InvitationToken>, AppError> {
        sqlx::query_as::<_, InvitationToken>(
            "SELECT * FROM invitation_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find invitation: {}", e)))
    }

    /// Mark an invitation as used; returns false if it was already used.
    #[instrument(skip(self))]
    pub async fn mark_invitation_used(&self, invitation_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE invitation_tokens SET used_utc = NOW() WHERE invitation_id = $1 AND used_utc IS NULL",
        )
        .bind(invitation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark invitation: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a self-registration request.
    #[instrument(skip(self))]
    pub async fn insert_registration_request(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        requested_role: RoleKind,
    ) -> Result<RegistrationRequest, AppError> {
        sqlx::query_as::<_, RegistrationRequest>(
            r#"
            INSERT INTO registration_requests
                (request_id, email, first_name, last_name, requested_role, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(requested_role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record registration: {}", e))
        })
    }

    /// List registration requests, optionally by status.
    #[instrument(skip(self))]
    pub async fn list_registration_requests(
        &self,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<RegistrationRequest>, AppError> {
        sqlx::query_as::<_, RegistrationRequest>(
            r#"
            SELECT * FROM registration_requests
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_utc
            "#,
        )
        .bind(status.map(|s| s.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list registrations: {}", e))
        })
    }

    /// Approve or reject a pending registration request. Approval also flips
    /// the approval flag on the matching user account, in one transaction.
    #[instrument(skip(self, reviewer), fields(reviewer = %reviewer.email))]
    pub async fn review_registration_request(
        &self,
        request_id: Uuid,
        reviewer: &User,
        approve: bool,
    ) -> Result<RegistrationRequest, AppError> {
        if !reviewer.role.can_manage() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only management can review registrations"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let status = if approve {
            RegistrationStatus::Approved
        } else {
            RegistrationStatus::Rejected
        };

        let request = sqlx::query_as::<_, RegistrationRequest>(
            r#"
            UPDATE registration_requests
            SET status = $2, reviewed_by = $3, reviewed_utc = NOW()
            WHERE request_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(reviewer.user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to review request: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Registration request is not pending"))
        })?;

        if approve {
            sqlx::query("UPDATE users SET is_approved = TRUE WHERE email = $1")
                .bind(&request.email)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to approve user: {}", e))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        info!(request_id = %request_id, status = %request.status, "Registration reviewed");

        Ok(request)
    }

    // -------------------------------------------------------------------------
    // Rate Settings Operations
    // -------------------------------------------------------------------------

    /// Read the academy rate settings, lazily creating the single row with
    /// the documented defaults the first time anything asks for it.
    #[instrument(skip(self))]
    pub async fn rate_settings(&self) -> Result<RateSettings, AppError> {
        let existing = sqlx::query_as::<_, RateSettings>(
            "SELECT * FROM rate_settings WHERE id = $1",
        )
        .bind(RATE_SETTINGS_ID)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read settings: {}", e)))?;

        if let Some(settings) = existing {
            return Ok(settings);
        }

        let defaults = RateSettings::defaults(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO rate_settings
                (id, online_teacher_rate, online_student_rate, in_person_student_rate, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(defaults.id)
        .bind(defaults.online_teacher_rate)
        .bind(defaults.online_student_rate)
        .bind(defaults.in_person_student_rate)
        .bind(defaults.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to seed settings: {}", e)))?;

        sqlx::query_as::<_, RateSettings>("SELECT * FROM rate_settings WHERE id = $1")
            .bind(RATE_SETTINGS_ID)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read settings: {}", e)))
    }

    /// Update the academy rate settings. Existing lessons are unaffected
    /// (rates are locked at lesson creation).
    #[instrument(skip(self, settings))]
    pub async fn update_rate_settings(
        &self,
        settings: &RateSettings,
    ) -> Result<RateSettings, AppError> {
        for rate in [
            settings.online_teacher_rate,
            settings.online_student_rate,
            settings.in_person_student_rate,
        ] {
            validate_rate(rate)?;
        }

        sqlx::query_as::<_, RateSettings>(
            r#"
            INSERT INTO rate_settings
                (id, online_teacher_rate, online_student_rate, in_person_student_rate, updated_utc)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE
            SET online_teacher_rate = EXCLUDED.online_teacher_rate,
                online_student_rate = EXCLUDED.online_student_rate,
                in_person_student_rate = EXCLUDED.in_person_student_rate,
                updated_utc = NOW()
            RETURNING *
            "#,
        )
        .bind(RATE_SETTINGS_ID)
        .bind(settings.online_teacher_rate)
        .bind(settings.online_student_rate)
        .bind(settings.in_person_student_rate)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update settings: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Lesson Operations
    // -------------------------------------------------------------------------

    /// Create a lesson. Rates the caller left unset are resolved from the
    /// teacher's hourly rate and the academy settings, then locked for good.
    #[instrument(skip(self, input), fields(teacher_id = %input.teacher_id))]
    pub async fn create_lesson(&self, input: &CreateLesson) -> Result<Lesson, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_lesson"])
            .start_timer();

        validate_duration(input.duration)?;
        for rate in [input.teacher_rate, input.student_rate].into_iter().flatten() {
            validate_rate(rate)?;
        }

        let teacher = self
            .find_user_by_id(input.teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Teacher not found")))?;
        if !teacher.role.can_teach() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "'{}' is not a teacher",
                teacher.email
            )));
        }

        let (teacher_rate, student_rate) = match (input.teacher_rate, input.student_rate) {
            (Some(t), Some(s)) => (t, s),
            (t, s) => {
                let settings = self.rate_settings().await?;
                let (resolved_t, resolved_s) = settings.resolve_rates(
                    input.lesson_type,
                    teacher.hourly_rate().unwrap_or(DEFAULT_HOURLY_RATE),
                );
                (t.unwrap_or(resolved_t), s.unwrap_or(resolved_s))
            }
        };

        let completed_date = matches!(input.status, LessonStatus::Completed).then(Utc::now);

        let lesson = sqlx::query_as::<_, Lesson>(
            r#"
            INSERT INTO lessons (
                lesson_id, teacher_id, student_id, lesson_type, duration,
                teacher_rate, student_rate, status, scheduled_date, completed_date, teacher_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.teacher_id)
        .bind(input.student_id)
        .bind(input.lesson_type.as_str())
        .bind(input.duration)
        .bind(teacher_rate)
        .bind(student_rate)
        .bind(input.status.as_str())
        .bind(input.scheduled_date)
        .bind(completed_date)
        .bind(&input.teacher_notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create lesson: {}", e)))?;

        timer.observe_duration();

        LESSONS_TOTAL
            .with_label_values(&[input.lesson_type.as_str()])
            .inc();
        info!(lesson_id = %lesson.lesson_id, "Lesson created");

        Ok(lesson)
    }

    /// Get a lesson by ID.
    #[instrument(skip(self))]
    pub async fn get_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>, AppError> {
        sqlx::query_as::<_, Lesson>("SELECT * FROM lessons WHERE lesson_id = $1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get lesson: {}", e)))
    }

    /// Move a lesson through its status machine. Completion stamps
    /// `completed_date`; completed and cancelled lessons never change again.
    #[instrument(skip(self))]
    pub async fn update_lesson_status(
        &self,
        lesson_id: Uuid,
        target: LessonStatus,
    ) -> Result<Lesson, AppError> {
        let lesson = self
            .get_lesson(lesson_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Lesson not found")))?;

        let current = lesson.status();
        if !current.can_transition_to(target) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot move lesson from '{}' to '{}'",
                current.as_str(),
                target.as_str()
            )));
        }

        let completed_date = matches!(target, LessonStatus::Completed).then(Utc::now);

        sqlx::query_as::<_, Lesson>(
            r#"
            UPDATE lessons
            SET status = $2,
                completed_date = COALESCE($3, completed_date),
                updated_utc = NOW()
            WHERE lesson_id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(lesson_id)
        .bind(target.as_str())
        .bind(completed_date)
        .bind(current.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update lesson: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Lesson status changed concurrently"))
        })
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    /// Create an invoice with a freshly generated number and an empty lesson
    /// set (balance zero).
    #[instrument(skip(self, input))]
    pub async fn create_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let now = Utc::now();
        let existing = Self::month_invoice_numbers(&mut tx, now).await?;
        let number = next_invoice_number(now, &existing);

        let invoice = Self::insert_invoice(&mut tx, input, &number, Decimal::ZERO).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        timer.observe_duration();

        INVOICES_TOTAL
            .with_label_values(&[input.invoice_type.as_str(), input.status.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Get an invoice by ID.
    #[instrument(skip(self))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))
    }

    /// List invoices matching a filter.
    #[instrument(skip(self, filter))]
    pub async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let limit = if filter.limit > 0 {
            filter.limit.min(100)
        } else {
            100
        };

        sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE ($1::varchar IS NULL OR status = $1)
              AND ($2::varchar IS NULL OR invoice_type = $2)
              AND ($3::uuid IS NULL OR teacher_id = $3)
              AND ($4::uuid IS NULL OR student_id = $4)
            ORDER BY created_utc DESC
            LIMIT $5
            "#,
        )
        .bind(filter.status.map(|s| s.as_str().to_string()))
        .bind(filter.invoice_type.map(|t| t.as_str().to_string()))
        .bind(filter.teacher_id)
        .bind(filter.student_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))
    }

    /// Get the lessons attached to an invoice.
    #[instrument(skip(self))]
    pub async fn invoice_lessons(&self, invoice_id: Uuid) -> Result<Vec<Lesson>, AppError> {
        sqlx::query_as::<_, Lesson>(
            r#"
            SELECT l.* FROM lessons l
            JOIN invoice_lessons il ON il.lesson_id = l.lesson_id
            WHERE il.invoice_id = $1
            ORDER BY l.created_utc
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get lessons: {}", e)))
    }

    /// Attach a lesson to an editable invoice and recompute its balance.
    #[instrument(skip(self))]
    pub async fn attach_lesson(
        &self,
        invoice_id: Uuid,
        lesson_id: Uuid,
        edited_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["attach_lesson"])
            .start_timer();

        let invoice = self.editable_invoice(invoice_id).await?;

        self.get_lesson(lesson_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Lesson not found")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO invoice_lessons (invoice_id, lesson_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(invoice_id)
        .bind(lesson_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to attach lesson: {}", e)))?;

        let updated =
            Self::recalculate_in_tx(&mut tx, invoice_id, invoice.invoice_type(), edited_by).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        timer.observe_duration();

        Ok(updated)
    }

    /// Detach a lesson from an editable invoice and recompute its balance.
    #[instrument(skip(self))]
    pub async fn detach_lesson(
        &self,
        invoice_id: Uuid,
        lesson_id: Uuid,
        edited_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let invoice = self.editable_invoice(invoice_id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM invoice_lessons WHERE invoice_id = $1 AND lesson_id = $2")
            .bind(invoice_id)
            .bind(lesson_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to detach lesson: {}", e))
            })?;

        let updated =
            Self::recalculate_in_tx(&mut tx, invoice_id, invoice.invoice_type(), edited_by).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(updated)
    }

    /// Re-derive an editable invoice's balance from its current lesson set.
    #[instrument(skip(self))]
    pub async fn recalculate_invoice(
        &self,
        invoice_id: Uuid,
        edited_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let invoice = self.editable_invoice(invoice_id).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let updated =
            Self::recalculate_in_tx(&mut tx, invoice_id, invoice.invoice_type(), edited_by).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(updated)
    }

    /// Mark a draft invoice ready for review.
    #[instrument(skip(self))]
    pub async fn submit_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self.require_invoice(invoice_id).await?;
        let current = invoice.status();
        if !current.can_transition_to(InvoiceStatus::Pending) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot submit an invoice in status '{}'",
                current.as_str()
            )));
        }

        sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'pending'
            WHERE invoice_id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to submit invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Invoice status changed concurrently"))
        })
    }

    /// Approve a pending invoice. Management only; stamps the approval audit
    /// fields.
    #[instrument(skip(self, approver), fields(approver = %approver.email))]
    pub async fn approve_invoice(
        &self,
        invoice_id: Uuid,
        approver: &User,
    ) -> Result<Invoice, AppError> {
        if !approver.role.can_manage() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only management can approve invoices"
            )));
        }

        let invoice = self.require_invoice(invoice_id).await?;
        let current = invoice.status();
        if !current.can_transition_to(InvoiceStatus::Approved) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot approve an invoice in status '{}'",
                current.as_str()
            )));
        }

        let approved = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'approved', approved_by = $2, approved_utc = NOW()
            WHERE invoice_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(approver.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to approve invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Invoice status changed concurrently"))
        })?;

        INVOICES_TOTAL
            .with_label_values(&[approved.invoice_type.as_str(), "approved"])
            .inc();
        info!(invoice_id = %invoice_id, "Invoice approved");

        Ok(approved)
    }

    /// Reject a draft or pending invoice. Management only; a non-empty reason
    /// is required and the rejection audit fields are stamped.
    #[instrument(skip(self, rejecter, reason), fields(rejecter = %rejecter.email))]
    pub async fn reject_invoice(
        &self,
        invoice_id: Uuid,
        rejecter: &User,
        reason: &str,
    ) -> Result<Invoice, AppError> {
        if !rejecter.role.can_manage() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only management can reject invoices"
            )));
        }
        if reason.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A rejection reason is required"
            )));
        }

        let invoice = self.require_invoice(invoice_id).await?;
        let current = invoice.status();
        if !current.can_transition_to(InvoiceStatus::Rejected) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot reject an invoice in status '{}'",
                current.as_str()
            )));
        }

        let rejected = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'rejected', rejected_by = $2, rejected_utc = NOW(), rejection_reason = $3
            WHERE invoice_id = $1 AND status IN ('draft', 'pending')
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(rejecter.user_id)
        .bind(reason.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reject invoice: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Invoice status changed concurrently"))
        })?;

        INVOICES_TOTAL
            .with_label_values(&[rejected.invoice_type.as_str(), "rejected"])
            .inc();
        info!(invoice_id = %invoice_id, "Invoice rejected");

        Ok(rejected)
    }

    /// Mark an approved (or overdue) invoice as paid.
    #[instrument(skip(self))]
    pub async fn mark_invoice_paid(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self.require_invoice(invoice_id).await?;
        let current = invoice.status();
        if !current.can_transition_to(InvoiceStatus::Paid) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot mark an invoice in status '{}' as paid",
                current.as_str()
            )));
        }

        let paid = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'paid'
            WHERE invoice_id = $1 AND status IN ('approved', 'overdue')
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark paid: {}", e)))?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!("Invoice status changed concurrently"))
        })?;

        INVOICES_TOTAL
            .with_label_values(&[paid.invoice_type.as_str(), "paid"])
            .inc();
        info!(invoice_id = %invoice_id, "Invoice paid");

        Ok(paid)
    }

    /// Flip every non-terminal invoice whose due date has passed to overdue.
    /// Invoked by an external scheduler.
    #[instrument(skip(self))]
    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue'
            WHERE status IN ('draft', 'pending', 'approved') AND due_date < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Overdue sweep failed: {}", e)))?;

        let flipped = result.rows_affected();
        if flipped > 0 {
            info!(count = flipped, "Invoices marked overdue");
        }
        Ok(flipped)
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Write phase of a lesson-report submission: resolve (or create) each
    /// student, create the completed lessons, then the teacher-payment
    /// invoice plus one student-billing invoice per distinct student — all in
    /// a single transaction. Entries must already be validated.
    #[instrument(skip(self, teacher, entries), fields(teacher = %teacher.email, entries = entries.len()))]
    pub async fn submit_lessons_batch(
        &self,
        teacher: &User,
        entries: &[SubmittedLesson],
        teacher_due: DateTime<Utc>,
        student_due: DateTime<Utc>,
    ) -> Result<SubmissionRecord, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["submit_lessons_batch"])
            .start_timer();

        let settings = self.rate_settings().await?;
        let teacher_hourly = teacher.hourly_rate().unwrap_or(DEFAULT_HOURLY_RATE);
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let mut lessons: Vec<Lesson> = Vec::with_capacity(entries.len());
        // Distinct students in first-seen order, with their lesson subsets.
        let mut per_student: Vec<(Uuid, Vec<Lesson>)> = Vec::new();

        for entry in entries {
            let student = Self::resolve_student(&mut tx, entry).await?;

            let (resolved_teacher_rate, resolved_student_rate) =
                settings.resolve_rates(entry.lesson_type, teacher_hourly);
            let teacher_rate = entry.rate.unwrap_or(resolved_teacher_rate);

            let lesson = sqlx::query_as::<_, Lesson>(
                r#"
                INSERT INTO lessons (
                    lesson_id, teacher_id, student_id, lesson_type, duration,
                    teacher_rate, student_rate, status, scheduled_date, completed_date,
                    teacher_notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed', $8, $9, $10)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(teacher.user_id)
            .bind(student)
            .bind(entry.lesson_type.as_str())
            .bind(entry.duration)
            .bind(teacher_rate)
            .bind(resolved_student_rate)
            .bind(entry.scheduled_date)
            .bind(entry.scheduled_date.unwrap_or(now))
            .bind(&entry.teacher_notes)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create lesson: {}", e))
            })?;

            match per_student.iter_mut().find(|(id, _)| *id == student) {
                Some((_, subset)) => subset.push(lesson.clone()),
                None => per_student.push((student, vec![lesson.clone()])),
            }
            lessons.push(lesson);
        }

        let mut issued_numbers = Self::month_invoice_numbers(&mut tx, now).await?;

        let teacher_number = next_invoice_number(now, &issued_numbers);
        issued_numbers.push(teacher_number.clone());

        let teacher_invoice = Self::insert_invoice(
            &mut tx,
            &CreateInvoice {
                invoice_type: InvoiceType::TeacherPayment,
                teacher_id: Some(teacher.user_id),
                student_id: None,
                status: InvoiceStatus::Pending,
                due_date: teacher_due,
                notes: None,
                created_by: Some(teacher.user_id),
            },
            &teacher_number,
            Invoice::calculate_payment_balance(InvoiceType::TeacherPayment, &lessons),
        )
        .await?;
        Self::link_lessons(&mut tx, teacher_invoice.invoice_id, &lessons).await?;

        let mut student_invoices = Vec::with_capacity(per_student.len());
        for (student_id, subset) in &per_student {
            let number = next_invoice_number(now, &issued_numbers);
            issued_numbers.push(number.clone());

            let invoice = Self::insert_invoice(
                &mut tx,
                &CreateInvoice {
                    invoice_type: InvoiceType::StudentBilling,
                    teacher_id: None,
                    student_id: Some(*student_id),
                    status: InvoiceStatus::Pending,
                    due_date: student_due,
                    notes: None,
                    created_by: Some(teacher.user_id),
                },
                &number,
                Invoice::calculate_payment_balance(InvoiceType::StudentBilling, subset),
            )
            .await?;
            Self::link_lessons(&mut tx, invoice.invoice_id, subset).await?;
            student_invoices.push(invoice);
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        timer.observe_duration();

        for lesson in &lessons {
            LESSONS_TOTAL
                .with_label_values(&[lesson.lesson_type.as_str()])
                .inc();
        }
        INVOICES_TOTAL
            .with_label_values(&["teacher_payment", "pending"])
            .inc();
        INVOICES_TOTAL
            .with_label_values(&["student_billing", "pending"])
            .inc_by(student_invoices.len() as f64);
        INVOICE_AMOUNT_TOTAL
            .with_label_values(&["teacher_payment"])
            .inc_by(teacher_invoice.payment_balance.to_f64().unwrap_or(0.0));
        for invoice in &student_invoices {
            INVOICE_AMOUNT_TOTAL
                .with_label_values(&["student_billing"])
                .inc_by(invoice.payment_balance.to_f64().unwrap_or(0.0));
        }

        info!(
            invoice_number = %teacher_invoice.invoice_number,
            lessons = lessons.len(),
            student_invoices = student_invoices.len(),
            "Lesson batch submitted"
        );

        Ok(SubmissionRecord {
            teacher_invoice,
            student_invoices,
            lessons,
        })
    }

    /// Resolve a submitted lesson's student: by email, then by name, then by
    /// creating an auto-approved student record with a placeholder email.
    async fn resolve_student(
        tx: &mut Transaction<'_, Postgres>,
        entry: &SubmittedLesson,
    ) -> Result<Uuid, AppError> {
        if let Some(email) = entry.student_email.as_deref().filter(|e| !e.trim().is_empty()) {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
                .bind(email.trim())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to find student: {}", e))
                })?;
            if let Some(row) = row {
                let user: User = row.into();
                if user.role.student_profile().is_none() {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "'{}' is not a student account",
                        email.trim()
                    )));
                }
                return Ok(user.user_id);
            }
        }

        let (first_name, last_name) = split_name(&entry.student_name);

        let by_name = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT * FROM users
            WHERE first_name = $1 AND last_name = $2 AND role = 'student'
            ORDER BY created_utc
            LIMIT 1
            "#,
        )
        .bind(&first_name)
        .bind(&last_name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find student: {}", e)))?;
        if let Some(row) = by_name {
            return Ok(row.user_id);
        }

        // No match: create a teacher-vouched student under a placeholder
        // address, bumping the numeric suffix until one is free.
        let email = match entry.student_email.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(provided) => provided.trim().to_string(),
            None => {
                let mut attempt = 0u32;
                loop {
                    let candidate = placeholder_email(&entry.student_name, attempt);
                    let taken =
                        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                            .bind(&candidate)
                            .fetch_one(&mut **tx)
                            .await
                            .map_err(|e| {
                                AppError::DatabaseError(anyhow::anyhow!(
                                    "Failed to check email: {}",
                                    e
                                ))
                            })?;
                    if !taken {
                        break candidate;
                    }
                    attempt += 1;
                }
            }
        };

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (user_id, email, first_name, last_name, phone_number, address, role, is_approved)
            VALUES ($1, $2, $3, $4, '', '', 'student', TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&first_name)
        .bind(&last_name)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create student: {}", e)))?;

        info!(email = %email, "Student record created from lesson report");

        Ok(row.user_id)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    async fn require_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.get_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))
    }

    /// Fetch an invoice and insist it is still editable.
    async fn editable_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self.require_invoice(invoice_id).await?;
        if !invoice.status().is_editable() {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Invoice {} is not editable in status '{}'",
                invoice.invoice_number,
                invoice.status
            )));
        }
        Ok(invoice)
    }

    /// Every invoice number already issued for the month of `now`.
    async fn month_invoice_numbers(
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, AppError> {
        let pattern = format!("{}%", month_prefix(now));
        sqlx::query_scalar::<_, String>(
            "SELECT invoice_number FROM invoices WHERE invoice_number LIKE $1",
        )
        .bind(pattern)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to read invoice numbers: {}", e))
        })
    }

    async fn insert_invoice(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateInvoice,
        invoice_number: &str,
        payment_balance: Decimal,
    ) -> Result<Invoice, AppError> {
        sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, invoice_type, status, teacher_id, student_id,
                payment_balance, due_date, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice_number)
        .bind(input.invoice_type.as_str())
        .bind(input.status.as_str())
        .bind(input.teacher_id)
        .bind(input.student_id)
        .bind(payment_balance)
        .bind(input.due_date)
        .bind(&input.notes)
        .bind(input.created_by)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' was taken concurrently",
                    invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })
    }

    async fn link_lessons(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        lessons: &[Lesson],
    ) -> Result<(), AppError> {
        for lesson in lessons {
            sqlx::query(
                "INSERT INTO invoice_lessons (invoice_id, lesson_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(invoice_id)
            .bind(lesson.lesson_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to link lesson: {}", e))
            })?;
        }
        Ok(())
    }

    /// Recompute `payment_balance` from the invoice's current lesson set.
    /// The sum goes through [`Invoice::calculate_payment_balance`] so the
    /// aggregation has exactly one implementation.
    async fn recalculate_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        invoice_type: InvoiceType,
        edited_by: Option<Uuid>,
    ) -> Result<Invoice, AppError> {
        let lessons = sqlx::query_as::<_, Lesson>(
            r#"
            SELECT l.* FROM lessons l
            JOIN invoice_lessons il ON il.lesson_id = l.lesson_id
            WHERE il.invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load lessons: {}", e)))?;

        let balance = Invoice::calculate_payment_balance(invoice_type, &lessons);

        sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET payment_balance = $2,
                last_edited_by = COALESCE($3, last_edited_by),
                last_edited_utc = NOW()
            WHERE invoice_id = $1
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(balance)
        .bind(edited_by)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update balance: {}", e)))
    }
}
