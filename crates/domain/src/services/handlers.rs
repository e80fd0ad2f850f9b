//! Optional check-in capability handlers.
//!
//! Declarative Management, UserAuthenticate and GetToken are orthogonal
//! capabilities. Each is an independent pluggable dependency; when one is
//! not configured, its message kind fails with `NotImplemented`.

use async_trait::async_trait;

use crate::error::Error;
use crate::models::checkin::{
    DeclarativeManagement, GetToken, GetTokenResponse, UserAuthenticate,
};
use crate::request::Request;

/// Handles the two-step `UserAuthenticate` digest challenge.
#[async_trait]
pub trait UserAuthenticateHandler: Send + Sync {
    /// Returns an optional challenge plist body. `None` accepts the user
    /// enrollment without a digest challenge.
    async fn user_authenticate(
        &self,
        req: &Request,
        msg: &UserAuthenticate,
    ) -> Result<Option<Vec<u8>>, Error>;
}

/// Tunnels Declarative Management sync requests to a DDM backend.
#[async_trait]
pub trait DeclarativeManagementHandler: Send + Sync {
    /// Returns the response body for the given DDM endpoint and payload.
    async fn declarative_management(
        &self,
        req: &Request,
        msg: &DeclarativeManagement,
    ) -> Result<Option<Vec<u8>>, Error>;
}

/// Issues service tokens for `GetToken` requests.
#[async_trait]
pub trait GetTokenHandler: Send + Sync {
    async fn get_token(&self, req: &Request, msg: &GetToken) -> Result<GetTokenResponse, Error>;
}
