//! Business logic services.

use async_trait::async_trait;

use crate::error::Error;
use crate::models::checkin::CheckinMessage;
use crate::models::command::{Command, CommandResults};
use crate::models::enrollment::Enrollment;
use crate::request::Request;

pub mod certauth;
pub mod core;
pub mod handlers;
pub mod multi;

pub use certauth::{CertAuthPolicy, CertAuthService};
pub use self::core::CoreService;
pub use handlers::{
    DeclarativeManagementHandler, GetTokenHandler, UserAuthenticateHandler,
};
pub use multi::MultiStore;

/// The MDM protocol service consumed by the HTTP layer.
///
/// Layered implementations (the cert-auth gate around the core service)
/// all speak this trait.
#[async_trait]
pub trait MdmService: Send + Sync {
    /// Handles one check-in message; returns an optional response body.
    async fn check_in(
        &self,
        req: &Request,
        msg: &CheckinMessage,
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Processes a command report and returns the next queued command.
    async fn command_and_report_results(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<Option<Command>, Error>;
}

/// Runs the normalizer and installs the enrollment id on the context.
///
/// The id is installed at most once per request: a context that already
/// carries one (an outer layer resolved it) is passed through unchanged.
pub(crate) fn resolved(req: &Request, enrollment: &Enrollment) -> Result<Request, Error> {
    if req.enroll_id_opt().is_some() {
        return Ok(req.clone());
    }
    Ok(req.clone().with_enroll_id(enrollment.resolve()?))
}
