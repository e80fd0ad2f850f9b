//! Shared utilities for the Aspen MDM backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (certificate fingerprinting)
//! - Certificate transport decoding (PEM headers from reverse proxies)

pub mod crypto;
pub mod pem;
