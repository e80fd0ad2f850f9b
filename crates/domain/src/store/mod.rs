//! The storage contract.
//!
//! Every persistence backend implements these traits. Methods take the
//! request context so backends can honor cancellation deadlines and so the
//! multi-storage router can dispatch per request. Multi-step writes must be
//! atomic against concurrent readers, and queue operations for a single
//! enrollment must be linearizable (row locks or equivalent).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::checkin::{Authenticate, SetBootstrapToken, TokenUpdate};
use crate::models::command::{Command, CommandResults};
use crate::models::push::PushInfo;
use crate::request::Request;

pub mod memory;

pub use memory::InMemoryStore;

/// Check-in state: identity, enablement, bootstrap tokens.
#[async_trait]
pub trait CheckinStore: Send + Sync {
    /// Persists the identity fields of an `Authenticate` message, creating
    /// the enrollment if it does not exist.
    async fn store_authenticate(&self, req: &Request, msg: &Authenticate) -> Result<(), Error>;

    /// Upserts push token, push magic and topic, enables the enrollment and
    /// increments its token-update tally.
    async fn store_token_update(&self, req: &Request, msg: &TokenUpdate) -> Result<(), Error>;

    /// Marks the enrollment (and, for a device channel, its user-channel
    /// children) as disabled.
    async fn disable(&self, req: &Request) -> Result<(), Error>;

    /// Escrows the bootstrap token blob against the enrollment.
    async fn store_bootstrap_token(
        &self,
        req: &Request,
        msg: &SetBootstrapToken,
    ) -> Result<(), Error>;

    /// Returns the escrowed bootstrap token, if any.
    async fn retrieve_bootstrap_token(&self, req: &Request) -> Result<Option<Vec<u8>>, Error>;
}

/// Per-enrollment command queue.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Records a device's report for `(enroll_id, command_uuid)` and
    /// refreshes `last_seen`. An empty `command_uuid` (idle poll) leaves
    /// the queue untouched.
    async fn store_command_report(&self, req: &Request, results: &CommandResults)
        -> Result<(), Error>;

    /// Returns the next deliverable command. With `skip_not_now` set,
    /// entries deferred with `NotNow` are not considered.
    async fn retrieve_next_command(
        &self,
        req: &Request,
        skip_not_now: bool,
    ) -> Result<Option<Command>, Error>;

    /// Removes all queue entries for the enrollment and its user-channel
    /// children in one atomic operation.
    async fn clear_queue(&self, req: &Request) -> Result<(), Error>;

    /// Queues a command for each of the given enrollment ids. A
    /// `(enroll_id, command_uuid)` pair is queued at most once.
    async fn enqueue_command(
        &self,
        req: &Request,
        ids: &[String],
        command: &Command,
    ) -> Result<(), Error>;
}

/// Certificate-to-enrollment bindings.
///
/// Hashes are lowercase hex SHA-256 over the certificate's DER encoding.
/// The enrollment-scoped operations key off the id resolved on the request.
#[async_trait]
pub trait CertAuthStore: Send + Sync {
    /// Is this hash associated with any enrollment?
    async fn has_cert_hash(&self, req: &Request, hash: &str) -> Result<bool, Error>;

    /// Does this enrollment have at least one associated hash?
    async fn enrollment_has_cert_hash(&self, req: &Request) -> Result<bool, Error>;

    /// Exact binding check for `(enroll_id, hash)`.
    async fn is_cert_hash_associated(&self, req: &Request, hash: &str) -> Result<bool, Error>;

    /// Idempotent upsert; refreshes `updated_at` when the pair exists.
    async fn associate_cert_hash(&self, req: &Request, hash: &str) -> Result<(), Error>;

    /// Reverse lookup: which enrollment is this hash bound to?
    async fn enrollment_from_hash(
        &self,
        req: &Request,
        hash: &str,
    ) -> Result<Option<String>, Error>;

    /// Deletes every hash bound to the enrollment except `keep`, the
    /// retirement step after a successful new association.
    async fn retire_cert_hashes(&self, req: &Request, keep: &str) -> Result<(), Error>;
}

/// Bulk push-info lookup for an external APNs pusher.
#[async_trait]
pub trait PushStore: Send + Sync {
    /// Returns partial results: every requested id maps to either its push
    /// info or the per-id error that prevented the lookup.
    async fn retrieve_push_info(
        &self,
        req: &Request,
        ids: &[String],
    ) -> Result<HashMap<String, Result<PushInfo, Error>>, Error>;
}

/// Export of persisted check-ins for backend migration.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Streams every persisted check-in message in an order that
    /// reconstructs a valid state: a device's `Authenticate` before its
    /// `TokenUpdate`, devices before their user channels.
    async fn retrieve_migration_checkins(
        &self,
        req: &Request,
        sender: mpsc::Sender<Result<Vec<u8>, Error>>,
    ) -> Result<(), Error>;
}

/// The full storage contract.
pub trait Store:
    CheckinStore + CommandStore + CertAuthStore + PushStore + MigrationStore
{
}

impl<T> Store for T where
    T: CheckinStore + CommandStore + CertAuthStore + PushStore + MigrationStore
{
}
