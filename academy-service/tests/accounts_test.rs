//! Account onboarding integration tests for academy-service.

mod common;

use std::sync::Arc;

use academy_service::models::RoleKind;
use academy_service::services::AccountService;
use academy_service::services::providers::MockEmailProvider;
use common::TestApp;
use serial_test::serial;
use service_core::error::AppError;

fn account_service(app: &TestApp, email: Arc<MockEmailProvider>) -> AccountService {
    AccountService::new(
        Arc::new(app.db.clone()),
        email,
        "http://localhost:5173".to_string(),
    )
}

#[tokio::test]
#[serial]
async fn approving_an_email_sends_an_invitation() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let email = Arc::new(MockEmailProvider::new(true));
    let service = account_service(&app, email.clone());

    let (approved, warning) = service
        .approve_and_invite(&manager, "new.teacher@test.com", RoleKind::Teacher, None)
        .await
        .expect("Approval failed");

    assert_eq!(approved.email, "new.teacher@test.com");
    assert!(warning.is_none());
    assert_eq!(email.send_count(), 1);

    let sent = email.sent_messages();
    assert_eq!(sent[0].to, "new.teacher@test.com");
    assert!(sent[0].body_text.contains("/invite/"));

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn a_failed_invitation_email_leaves_the_approval_standing() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let service = account_service(&app, Arc::new(MockEmailProvider::failing()));

    let (_, warning) = service
        .approve_and_invite(&manager, "new.teacher@test.com", RoleKind::Teacher, None)
        .await
        .expect("Approval must survive a mail failure");

    assert!(warning.is_some());
    assert!(app
        .db
        .find_approved_email("new.teacher@test.com")
        .await
        .unwrap()
        .is_some());

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn invitations_redeem_into_pre_approved_accounts() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let email = Arc::new(MockEmailProvider::new(true));
    let service = account_service(&app, email.clone());

    service
        .approve_and_invite(&manager, "invited@test.com", RoleKind::Teacher, None)
        .await
        .unwrap();

    // Pull the raw token out of the invitation link.
    let body = email.sent_messages()[0].body_text.clone();
    let token = body
        .lines()
        .find_map(|l| l.trim().strip_prefix("http://localhost:5173/invite/"))
        .expect("Invitation link missing")
        .to_string();

    let user = service
        .redeem_invitation(&token, "New", "Teacher")
        .await
        .expect("Redemption failed");
    assert!(user.is_approved);
    assert!(user.role.can_teach());

    // A second redemption of the same token fails.
    let err = service
        .redeem_invitation(&token, "New", "Teacher")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::BadRequest(_) | AppError::Conflict(_)
    ));

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn only_management_can_approve_emails() {
    let Some(app) = TestApp::spawn().await else { return };

    let teacher = app.create_teacher("teacher@test.com", "80.00").await;
    let service = account_service(&app, Arc::new(MockEmailProvider::new(true)));

    let err = service
        .approve_and_invite(&teacher, "new@test.com", RoleKind::Student, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn registration_review_approves_the_account() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let service = account_service(&app, Arc::new(MockEmailProvider::new(true)));

    let (user, request) = service
        .register("hopeful@test.com", "Hopeful", "Teacher", RoleKind::Teacher)
        .await
        .expect("Registration failed");
    assert!(!user.is_approved);

    let pending = app
        .db
        .list_registration_requests(Some(academy_service::models::RegistrationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    app.db
        .review_registration_request(request.request_id, &manager, true)
        .await
        .expect("Review failed");

    let approved = app
        .db
        .find_user_by_email("hopeful@test.com")
        .await
        .unwrap()
        .unwrap();
    assert!(approved.is_approved);

    // The request cannot be reviewed twice.
    let err = app
        .db
        .review_registration_request(request.request_id, &manager, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StateConflict(_)));

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn deleting_a_user_cleans_up_every_onboarding_record() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let email = Arc::new(MockEmailProvider::new(true));
    let service = account_service(&app, email.clone());

    service
        .approve_and_invite(&manager, "gone@test.com", RoleKind::Student, None)
        .await
        .unwrap();
    let body = email.sent_messages()[0].body_text.clone();
    let token = body
        .lines()
        .find_map(|l| l.trim().strip_prefix("http://localhost:5173/invite/"))
        .unwrap()
        .to_string();
    service.redeem_invitation(&token, "Gone", "Student").await.unwrap();

    assert!(app.db.delete_user("gone@test.com").await.unwrap());

    assert!(app.db.find_user_by_email("gone@test.com").await.unwrap().is_none());
    assert!(app
        .db
        .find_approved_email("gone@test.com")
        .await
        .unwrap()
        .is_none());

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn deleting_an_approved_email_removes_the_user_too() {
    let Some(app) = TestApp::spawn().await else { return };

    let manager = app.create_management("admin@test.com").await;
    let email = Arc::new(MockEmailProvider::new(true));
    let service = account_service(&app, email.clone());

    service
        .approve_and_invite(&manager, "mirror@test.com", RoleKind::Student, None)
        .await
        .unwrap();
    let body = email.sent_messages()[0].body_text.clone();
    let token = body
        .lines()
        .find_map(|l| l.trim().strip_prefix("http://localhost:5173/invite/"))
        .unwrap()
        .to_string();
    service.redeem_invitation(&token, "Mirror", "Student").await.unwrap();

    assert!(app.db.delete_approved_email("mirror@test.com").await.unwrap());

    assert!(app
        .db
        .find_user_by_email("mirror@test.com")
        .await
        .unwrap()
        .is_none());

    app.cleanup().await;
}
