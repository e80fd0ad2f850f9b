//! The core MDM service.
//!
//! Dispatches check-in messages to storage and the optional capability
//! handlers, and drives the command queue for the command endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Error;
use crate::models::checkin::{BootstrapTokenResponse, CheckinMessage};
use crate::models::command::{Command, CommandResults, CommandStatus};
use crate::request::Request;
use crate::services::handlers::{
    DeclarativeManagementHandler, GetTokenHandler, UserAuthenticateHandler,
};
use crate::services::{resolved, MdmService};
use crate::store::Store;

/// Serializes a response value to XML plist bytes.
fn to_plist_xml<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, value)
        .map_err(|e| Error::Storage(anyhow::Error::new(e).context("serializing response plist")))?;
    Ok(buf)
}

/// Storage-backed implementation of [`MdmService`].
pub struct CoreService {
    store: Arc<dyn Store>,
    user_authenticate: Option<Arc<dyn UserAuthenticateHandler>>,
    declarative_management: Option<Arc<dyn DeclarativeManagementHandler>>,
    get_token: Option<Arc<dyn GetTokenHandler>>,
}

impl CoreService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            user_authenticate: None,
            declarative_management: None,
            get_token: None,
        }
    }

    pub fn with_user_authenticate_handler(
        mut self,
        handler: Arc<dyn UserAuthenticateHandler>,
    ) -> Self {
        self.user_authenticate = Some(handler);
        self
    }

    pub fn with_declarative_management_handler(
        mut self,
        handler: Arc<dyn DeclarativeManagementHandler>,
    ) -> Self {
        self.declarative_management = Some(handler);
        self
    }

    pub fn with_get_token_handler(mut self, handler: Arc<dyn GetTokenHandler>) -> Self {
        self.get_token = Some(handler);
        self
    }
}

#[async_trait]
impl MdmService for CoreService {
    async fn check_in(
        &self,
        req: &Request,
        msg: &CheckinMessage,
    ) -> Result<Option<Vec<u8>>, Error> {
        let req = resolved(req, msg.enrollment())?;
        let enroll_id = req.enroll_id()?;
        info!(
            enroll_id = %enroll_id,
            message_type = msg.message_type(),
            "check-in"
        );

        match msg {
            CheckinMessage::Authenticate(m) => {
                // Order matters: a failure must leave no later step applied.
                self.store.store_authenticate(&req, m).await?;
                self.store.clear_queue(&req).await?;
                self.store.disable(&req).await?;
                Ok(None)
            }
            CheckinMessage::TokenUpdate(m) => {
                self.store.store_token_update(&req, m).await?;
                Ok(None)
            }
            CheckinMessage::CheckOut(_) => {
                self.store.disable(&req).await?;
                Ok(None)
            }
            CheckinMessage::UserAuthenticate(m) => match &self.user_authenticate {
                Some(handler) => handler.user_authenticate(&req, m).await,
                None => Err(Error::NotImplemented("UserAuthenticate")),
            },
            CheckinMessage::SetBootstrapToken(m) => {
                self.store.store_bootstrap_token(&req, m).await?;
                Ok(None)
            }
            CheckinMessage::GetBootstrapToken(_) => {
                let token = self.store.retrieve_bootstrap_token(&req).await?;
                match token {
                    Some(token) => Ok(Some(to_plist_xml(&BootstrapTokenResponse {
                        bootstrap_token: serde_bytes::ByteBuf::from(token),
                    })?)),
                    None => Ok(None),
                }
            }
            CheckinMessage::DeclarativeManagement(m) => match &self.declarative_management {
                Some(handler) => handler.declarative_management(&req, m).await,
                None => Err(Error::NotImplemented("DeclarativeManagement")),
            },
            CheckinMessage::GetToken(m) => match &self.get_token {
                Some(handler) => {
                    let resp = handler.get_token(&req, m).await?;
                    Ok(Some(to_plist_xml(&resp)?))
                }
                None => Err(Error::NotImplemented("GetToken")),
            },
        }
    }

    async fn command_and_report_results(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<Option<Command>, Error> {
        let req = resolved(req, &results.enrollment)?;
        self.store.store_command_report(&req, results).await?;

        // A command is never redelivered in the response to its own NotNow
        // report; any other status makes NotNow-deferred entries eligible
        // again.
        let skip_not_now = results.status == CommandStatus::NotNow;
        let next = self.store.retrieve_next_command(&req, skip_not_now).await?;

        info!(
            enroll_id = %req.enroll_id()?,
            status = %results.status,
            next_command = next.as_ref().map(|c| c.request_type.as_str()).unwrap_or("none"),
            "command report"
        );
        Ok(next)
    }
}
