//! Multi-storage router.
//!
//! Fronts several named storage backends and picks one per request from a
//! URL query parameter, falling through to the default. Used for phased
//! migration between backends, not for sharding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::checkin::{Authenticate, SetBootstrapToken, TokenUpdate};
use crate::models::command::{Command, CommandResults};
use crate::models::push::PushInfo;
use crate::request::Request;
use crate::store::{
    CertAuthStore, CheckinStore, CommandStore, MigrationStore, PushStore, Store,
};

/// Storage-contract router delegating all operations unchanged.
pub struct MultiStore {
    param: String,
    default: Arc<dyn Store>,
    backends: HashMap<String, Arc<dyn Store>>,
}

impl MultiStore {
    /// `param` is the URL query parameter naming the backend.
    pub fn new(param: impl Into<String>, default: Arc<dyn Store>) -> Self {
        Self {
            param: param.into(),
            default,
            backends: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        self.backends.insert(name.into(), store);
        self
    }

    fn select(&self, req: &Request) -> &Arc<dyn Store> {
        req.param(&self.param)
            .and_then(|name| self.backends.get(name))
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl CheckinStore for MultiStore {
    async fn store_authenticate(&self, req: &Request, msg: &Authenticate) -> Result<(), Error> {
        self.select(req).store_authenticate(req, msg).await
    }

    async fn store_token_update(&self, req: &Request, msg: &TokenUpdate) -> Result<(), Error> {
        self.select(req).store_token_update(req, msg).await
    }

    async fn disable(&self, req: &Request) -> Result<(), Error> {
        self.select(req).disable(req).await
    }

    async fn store_bootstrap_token(
        &self,
        req: &Request,
        msg: &SetBootstrapToken,
    ) -> Result<(), Error> {
        self.select(req).store_bootstrap_token(req, msg).await
    }

    async fn retrieve_bootstrap_token(&self, req: &Request) -> Result<Option<Vec<u8>>, Error> {
        self.select(req).retrieve_bootstrap_token(req).await
    }
}

#[async_trait]
impl CommandStore for MultiStore {
    async fn store_command_report(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<(), Error> {
        self.select(req).store_command_report(req, results).await
    }

    async fn retrieve_next_command(
        &self,
        req: &Request,
        skip_not_now: bool,
    ) -> Result<Option<Command>, Error> {
        self.select(req).retrieve_next_command(req, skip_not_now).await
    }

    async fn clear_queue(&self, req: &Request) -> Result<(), Error> {
        self.select(req).clear_queue(req).await
    }

    async fn enqueue_command(
        &self,
        req: &Request,
        ids: &[String],
        command: &Command,
    ) -> Result<(), Error> {
        self.select(req).enqueue_command(req, ids, command).await
    }
}

#[async_trait]
impl CertAuthStore for MultiStore {
    async fn has_cert_hash(&self, req: &Request, hash: &str) -> Result<bool, Error> {
        self.select(req).has_cert_hash(req, hash).await
    }

    async fn enrollment_has_cert_hash(&self, req: &Request) -> Result<bool, Error> {
        self.select(req).enrollment_has_cert_hash(req).await
    }

    async fn is_cert_hash_associated(&self, req: &Request, hash: &str) -> Result<bool, Error> {
        self.select(req).is_cert_hash_associated(req, hash).await
    }

    async fn associate_cert_hash(&self, req: &Request, hash: &str) -> Result<(), Error> {
        self.select(req).associate_cert_hash(req, hash).await
    }

    async fn enrollment_from_hash(
        &self,
        req: &Request,
        hash: &str,
    ) -> Result<Option<String>, Error> {
        self.select(req).enrollment_from_hash(req, hash).await
    }

    async fn retire_cert_hashes(&self, req: &Request, keep: &str) -> Result<(), Error> {
        self.select(req).retire_cert_hashes(req, keep).await
    }
}

#[async_trait]
impl PushStore for MultiStore {
    async fn retrieve_push_info(
        &self,
        req: &Request,
        ids: &[String],
    ) -> Result<HashMap<String, Result<PushInfo, Error>>, Error> {
        self.select(req).retrieve_push_info(req, ids).await
    }
}

#[async_trait]
impl MigrationStore for MultiStore {
    async fn retrieve_migration_checkins(
        &self,
        req: &Request,
        sender: mpsc::Sender<Result<Vec<u8>, Error>>,
    ) -> Result<(), Error> {
        self.select(req).retrieve_migration_checkins(req, sender).await
    }
}
