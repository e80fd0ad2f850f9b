//! Per-request context.
//!
//! Constructed at HTTP ingress with the decoded client certificate and raw
//! URL query parameters; the resolved enrollment id is installed exactly
//! once when the normalizer runs. Read-only thereafter.

use std::collections::HashMap;

use shared::crypto::sha256_hex;

use crate::error::Error;
use crate::models::enrollment::EnrollId;

/// The verified client certificate, as DER bytes.
///
/// Verification (mutual TLS or `Mdm-Signature` CMS) happens outside the
/// core; only the leaf's bytes matter here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Lowercase hex SHA-256 of the DER encoding; the cert-auth key.
    pub fn fingerprint_hex(&self) -> String {
        sha256_hex(&self.der)
    }
}

/// Context carried through every service and storage call for one HTTP
/// request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    certificate: Option<Certificate>,
    enroll_id: Option<EnrollId>,
    params: HashMap<String, String>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_enroll_id(mut self, enroll_id: EnrollId) -> Self {
        self.enroll_id = Some(enroll_id);
        self
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    /// Raw URL query parameter, as used by the multi-storage router.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The resolved enrollment id; errors if the normalizer has not run.
    pub fn enroll_id(&self) -> Result<&EnrollId, Error> {
        self.enroll_id
            .as_ref()
            .ok_or_else(|| Error::InvalidEnrollment("enrollment id not resolved".into()))
    }

    pub fn enroll_id_opt(&self) -> Option<&EnrollId> {
        self.enroll_id.as_ref()
    }
}
