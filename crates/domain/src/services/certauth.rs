//! Certificate-to-enrollment binding gate.
//!
//! Every enrollment is locked to the SHA-256 fingerprint of the identity
//! certificate that completed its enrollment, trust-on-first-use at the
//! `TokenUpdate` that enables it. This service wraps the core service and
//! gates both check-in and command traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Error;
use crate::models::checkin::CheckinMessage;
use crate::models::command::{Command, CommandResults};
use crate::models::enrollment::EnrollId;
use crate::request::Request;
use crate::services::{resolved, MdmService};
use crate::store::Store;

/// Configuration for the gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertAuthPolicy {
    /// Log violations instead of rejecting the request.
    pub warn_only: bool,

    /// After a successful new association, delete the enrollment's prior
    /// hashes instead of letting the set widen.
    pub retire: bool,

    /// Reject an `Authenticate` presenting a certificate already bound to
    /// a different enrollment. Off by default: re-enrolling a device under
    /// a new identity is legitimate.
    pub reject_rebind: bool,
}

/// Which gate branch a message takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateKind {
    Authenticate,
    TokenUpdate,
    Other,
}

/// [`MdmService`] decorator enforcing cert-auth.
pub struct CertAuthService<S> {
    next: S,
    store: Arc<dyn Store>,
    policy: CertAuthPolicy,
}

impl<S: MdmService> CertAuthService<S> {
    pub fn new(next: S, store: Arc<dyn Store>) -> Self {
        Self {
            next,
            store,
            policy: CertAuthPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CertAuthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The identity certificate belongs to the device, so user channels
    /// authorize against their parent device-channel id.
    fn cert_auth_scope(req: &Request) -> Result<Request, Error> {
        let id = req.enroll_id()?;
        match &id.parent_id {
            Some(parent) => Ok(req.clone().with_enroll_id(EnrollId {
                enrollment_type: id.enrollment_type.device_channel(),
                id: parent.clone(),
                parent_id: None,
            })),
            None => Ok(req.clone()),
        }
    }

    /// Rejects with `err`, or only logs it in warn-only mode.
    fn violation(&self, enroll_id: &str, hash: &str, err: Error) -> Result<(), Error> {
        if self.policy.warn_only {
            warn!(enroll_id, hash, error = %err, "cert-auth violation allowed by warn-only mode");
            return Ok(());
        }
        Err(err)
    }

    async fn associate(&self, req: &Request, hash: &str) -> Result<(), Error> {
        self.store.associate_cert_hash(req, hash).await?;
        if self.policy.retire {
            self.store.retire_cert_hashes(req, hash).await?;
        }
        Ok(())
    }

    async fn authorize(&self, req: &Request, kind: GateKind) -> Result<(), Error> {
        let cert = req.certificate().ok_or(Error::MissingCert)?;
        let hash = cert.fingerprint_hex();
        let scope = Self::cert_auth_scope(req)?;
        let scope_id = scope.enroll_id()?.id.clone();

        if kind == GateKind::Authenticate {
            let bound_to = self.store.enrollment_from_hash(&scope, &hash).await?;
            let rebinding = bound_to.as_deref().is_some_and(|other| other != scope_id);
            if rebinding {
                if self.policy.reject_rebind {
                    self.violation(&scope_id, &hash, Error::ForbiddenCertMismatch)?;
                }
                info!(enroll_id = %scope_id, hash, "re-enrollment re-binds certificate");
            }
            // An identity already known to cert-auth refreshes its binding
            // here so certificate rotation survives the re-enrollment; a
            // first contact stays unbound until its TokenUpdate.
            if rebinding || self.store.enrollment_has_cert_hash(&scope).await? {
                self.associate(&scope, &hash).await?;
            }
            return Ok(());
        }

        if self.store.is_cert_hash_associated(&scope, &hash).await? {
            return Ok(());
        }
        if self.store.enrollment_has_cert_hash(&scope).await? {
            // Bound enrollment presenting a different certificate.
            return self.violation(&scope_id, &hash, Error::ForbiddenCertMismatch);
        }
        if self.store.has_cert_hash(&scope, &hash).await? {
            // Certificate bound to a different enrollment.
            return self.violation(&scope_id, &hash, Error::ForbiddenCertMismatch);
        }
        if kind == GateKind::TokenUpdate {
            // Trust on first use: bind before the token-update write so an
            // enabled enrollment can never exist without a binding.
            self.associate(&scope, &hash).await?;
            return Ok(());
        }
        self.violation(&scope_id, &hash, Error::Unbound)
    }
}

#[async_trait]
impl<S: MdmService> MdmService for CertAuthService<S> {
    async fn check_in(
        &self,
        req: &Request,
        msg: &CheckinMessage,
    ) -> Result<Option<Vec<u8>>, Error> {
        let req = resolved(req, msg.enrollment())?;
        let kind = match msg {
            CheckinMessage::Authenticate(_) => GateKind::Authenticate,
            CheckinMessage::TokenUpdate(_) => GateKind::TokenUpdate,
            _ => GateKind::Other,
        };
        self.authorize(&req, kind).await?;
        self.next.check_in(&req, msg).await
    }

    async fn command_and_report_results(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<Option<Command>, Error> {
        let req = resolved(req, &results.enrollment)?;
        self.authorize(&req, GateKind::Other).await?;
        self.next.command_and_report_results(&req, results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::checkin::parse_checkin;
    use crate::models::command::parse_command_results;
    use crate::request::Certificate;
    use crate::services::CoreService;
    use crate::store::InMemoryStore;
    use shared::crypto::sha256_hex;

    fn xml(body: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
{body}
</dict>
</plist>"#
        )
        .into_bytes()
    }

    fn authenticate(udid: &str) -> CheckinMessage {
        parse_checkin(&xml(&format!(
            "<key>MessageType</key><string>Authenticate</string>\
             <key>UDID</key><string>{udid}</string>\
             <key>Topic</key><string>com.apple.mgmt.X</string>"
        )))
        .unwrap()
    }

    fn token_update(udid: &str, user_id: Option<&str>) -> CheckinMessage {
        let user = user_id
            .map(|u| format!("<key>UserID</key><string>{u}</string>"))
            .unwrap_or_default();
        parse_checkin(&xml(&format!(
            "<key>MessageType</key><string>TokenUpdate</string>\
             <key>UDID</key><string>{udid}</string>{user}\
             <key>Topic</key><string>com.apple.mgmt.X</string>\
             <key>Token</key><data>dDE=</data>\
             <key>PushMagic</key><string>magic-1</string>"
        )))
        .unwrap()
    }

    fn idle(udid: &str) -> CommandResults {
        parse_command_results(&xml(&format!(
            "<key>UDID</key><string>{udid}</string>\
             <key>Status</key><string>Idle</string>"
        )))
        .unwrap()
    }

    fn cert(der: &[u8]) -> Certificate {
        Certificate::from_der(der.to_vec())
    }

    fn req_with(der: &[u8]) -> Request {
        Request::new().with_certificate(cert(der))
    }

    fn gated(store: Arc<InMemoryStore>) -> CertAuthService<CoreService> {
        CertAuthService::new(CoreService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_missing_cert_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store);
        let err = svc
            .check_in(&Request::new(), &authenticate("AAA"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCert));
    }

    #[tokio::test]
    async fn test_token_update_binds_on_first_use() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store.clone());
        let req = req_with(b"C1");

        svc.check_in(&req, &authenticate("AAA")).await.unwrap();
        // Trust-on-first-use has not bound yet.
        assert!(store.association_times("AAA", &sha256_hex(b"C1")).is_none());

        svc.check_in(&req, &token_update("AAA", None)).await.unwrap();
        assert!(store.association_times("AAA", &sha256_hex(b"C1")).is_some());
        assert!(store.snapshot("AAA").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_mismatched_cert_rejected_without_mutation() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store.clone());
        let c1 = req_with(b"C1");

        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();
        let tally_before = store.snapshot("AAA").unwrap().token_update_tally;

        let c2 = req_with(b"C2");
        let err = svc
            .check_in(&c2, &token_update("AAA", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForbiddenCertMismatch));
        assert_eq!(store.snapshot("AAA").unwrap().token_update_tally, tally_before);
        assert!(store.association_times("AAA", &sha256_hex(b"C2")).is_none());
    }

    #[tokio::test]
    async fn test_unbound_enrollment_cannot_poll() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store);
        let req = req_with(b"C1");

        // Authenticate passes the open branch, but polling before any
        // TokenUpdate has created a binding is refused.
        svc.check_in(&req, &authenticate("AAA")).await.unwrap();
        let err = svc
            .command_and_report_results(&req, &idle("AAA"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unbound));
    }

    #[tokio::test]
    async fn test_user_channel_shares_device_binding() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store.clone());
        let req = req_with(b"C1");

        svc.check_in(&req, &authenticate("AAA")).await.unwrap();
        svc.check_in(&req, &token_update("AAA", None)).await.unwrap();
        svc.check_in(&req, &token_update("AAA", Some("BBB"))).await.unwrap();

        assert!(store.snapshot("AAA:BBB").unwrap().enabled);
        // The binding stays keyed by the device id.
        assert!(store.association_times("AAA", &sha256_hex(b"C1")).is_some());
        assert!(store.association_times("AAA:BBB", &sha256_hex(b"C1")).is_none());
    }

    #[tokio::test]
    async fn test_foreign_cert_cannot_claim_other_enrollment() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store);
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        // C1 is bound to AAA; a fresh enrollment presenting it is refused
        // at TokenUpdate.
        let err = svc
            .check_in(&c1, &token_update("ZZZ", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForbiddenCertMismatch));
    }

    #[tokio::test]
    async fn test_reenrollment_with_new_cert_rotates_binding() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store.clone());
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        // Device re-enrolls with a rotated identity certificate.
        let c2 = req_with(b"C2");
        svc.check_in(&c2, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c2, &token_update("AAA", None)).await.unwrap();

        assert!(store.association_times("AAA", &sha256_hex(b"C2")).is_some());
        assert!(store.snapshot("AAA").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_retire_prunes_old_hash_on_rotation() {
        let store = Arc::new(InMemoryStore::new());
        let svc = CertAuthService::new(CoreService::new(store.clone()), store.clone())
            .with_policy(CertAuthPolicy {
                retire: true,
                ..Default::default()
            });
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        let c2 = req_with(b"C2");
        svc.check_in(&c2, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c2, &token_update("AAA", None)).await.unwrap();

        assert!(store.association_times("AAA", &sha256_hex(b"C1")).is_none());
        assert!(store.association_times("AAA", &sha256_hex(b"C2")).is_some());
    }

    #[tokio::test]
    async fn test_warn_only_logs_instead_of_rejecting() {
        let store = Arc::new(InMemoryStore::new());
        let svc = CertAuthService::new(CoreService::new(store.clone()), store.clone())
            .with_policy(CertAuthPolicy {
                warn_only: true,
                ..Default::default()
            });
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        // Mismatch is tolerated in warn-only mode.
        let c2 = req_with(b"C2");
        svc.check_in(&c2, &token_update("AAA", None)).await.unwrap();
        assert_eq!(store.snapshot("AAA").unwrap().token_update_tally, 2);
    }

    #[tokio::test]
    async fn test_reject_rebind_policy() {
        let store = Arc::new(InMemoryStore::new());
        let svc = CertAuthService::new(CoreService::new(store.clone()), store.clone())
            .with_policy(CertAuthPolicy {
                reject_rebind: true,
                ..Default::default()
            });
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        // The same certificate may not start an enrollment under a new id.
        let err = svc
            .check_in(&c1, &authenticate("YYY"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForbiddenCertMismatch));
    }

    #[tokio::test]
    async fn test_allow_rebind_moves_identity_to_new_enrollment() {
        let store = Arc::new(InMemoryStore::new());
        let svc = gated(store.clone());
        let c1 = req_with(b"C1");
        svc.check_in(&c1, &authenticate("AAA")).await.unwrap();
        svc.check_in(&c1, &token_update("AAA", None)).await.unwrap();

        // Default policy: the wiped device re-enrolls under a new UDID with
        // its old certificate.
        svc.check_in(&c1, &authenticate("YYY")).await.unwrap();
        svc.check_in(&c1, &token_update("YYY", None)).await.unwrap();
        assert!(store.snapshot("YYY").unwrap().enabled);
    }
}
