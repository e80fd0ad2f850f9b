//! Domain layer for the Aspen MDM backend.
//!
//! This crate contains:
//! - Protocol models (enrollments, check-in messages, commands, push info)
//! - The per-request context handed through every service and storage call
//! - The storage contract and an in-memory reference implementation
//! - Business logic services (check-in dispatch, command queue, cert-auth)

pub mod error;
pub mod models;
pub mod request;
pub mod services;
pub mod store;

pub use error::Error;
pub use request::Request;
