//! Test helper module for academy-service integration tests.
//!
//! Provides common setup utilities for PostgreSQL-based tests. Each test gets
//! its own schema for isolation. Tests skip (returning early) when
//! TEST_DATABASE_URL is not set, so the suite passes on machines without a
//! database.

#![allow(dead_code)]

use academy_service::config::{AcademyConfig, DatabaseConfig, InvoicingConfig, SmtpConfig};
use academy_service::models::{CreateUser, Role, StudentProfile, TeacherProfile, User};
use academy_service::services::{Database, init_metrics};
use academy_service::startup::Application;
use rust_decimal::Decimal;
use service_core::config::Config as CoreConfig;
use std::sync::atomic::{AtomicU32, Ordering};

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// The database URL for testing, if one is configured.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_academy_{}_{}", std::process::id(), counter)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: Database,
    base_url: String,
    schema_name: String,
}

impl TestApp {
    /// Spawn a new test application on a random port, or None when no test
    /// database is configured (the caller should skip the test).
    pub async fn spawn() -> Option<Self> {
        let base_url = match test_database_url() {
            Some(url) => url,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping integration test");
                return None;
            }
        };

        init_metrics();

        let schema_name = unique_schema_name();

        // Create schema for test isolation
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");

        pool.close().await;

        // Point the connection at the fresh schema
        let separator = if base_url.contains('?') { "&" } else { "?" };
        let db_url_with_schema = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let config = AcademyConfig {
            common: CoreConfig { port: 0 },
            service_name: "academy-service-test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: db_url_with_schema.clone(),
                max_connections: 5,
                min_connections: 1,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 587,
                user: String::new(),
                password: String::new(),
                from_email: "billing@maplekey.example".to_string(),
                from_name: "Maple Key Music Academy".to_string(),
                enabled: false,
            },
            invoicing: InvoicingConfig { due_days: 14 },
            frontend_url: "http://localhost:5173".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let db = Database::new(&db_url_with_schema, 5, 1)
            .await
            .expect("Failed to create test database handle");

        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the HTTP server to come up
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if let Ok(response) = client.get(&health_url).send().await {
                if response.status().is_success() {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        Some(Self {
            address,
            port,
            db,
            base_url,
            schema_name,
        })
    }

    /// Drop the test schema.
    pub async fn cleanup(self) {
        if let Ok(pool) = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
        {
            sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema_name))
                .execute(&pool)
                .await
                .ok();
            pool.close().await;
        }
    }

    pub async fn create_management(&self, email: &str) -> User {
        self.db
            .insert_user(&CreateUser {
                email: email.to_string(),
                first_name: "Admin".to_string(),
                last_name: "User".to_string(),
                phone_number: String::new(),
                address: String::new(),
                role: Role::Management,
                is_approved: true,
            })
            .await
            .expect("Failed to create management user")
    }

    pub async fn create_teacher(&self, email: &str, hourly_rate: &str) -> User {
        self.db
            .insert_user(&CreateUser {
                email: email.to_string(),
                first_name: "John".to_string(),
                last_name: "Teacher".to_string(),
                phone_number: String::new(),
                address: String::new(),
                role: Role::Teacher(TeacherProfile {
                    hourly_rate: hourly_rate.parse::<Decimal>().unwrap(),
                    bio: String::new(),
                    instruments: "piano".to_string(),
                }),
                is_approved: true,
            })
            .await
            .expect("Failed to create teacher")
    }

    pub async fn create_student(&self, email: &str, first_name: &str, last_name: &str) -> User {
        self.db
            .insert_user(&CreateUser {
                email: email.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone_number: String::new(),
                address: String::new(),
                role: Role::Student(StudentProfile {
                    assigned_teacher: None,
                    parent_email: String::new(),
                    parent_phone: String::new(),
                }),
                is_approved: true,
            })
            .await
            .expect("Failed to create student")
    }
}

/// Parse a decimal literal in tests.
pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}
