//! academy-service: scheduling and dual-rate billing for a music academy.
//!
//! Teachers report the lessons they taught; the service resolves students,
//! locks per-lesson rates, and issues paired invoices — one paying the
//! teacher, one billing each student — which management reviews through a
//! draft/pending/approved/paid workflow.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
