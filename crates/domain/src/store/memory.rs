//! In-memory storage backend.
//!
//! The reference implementation of the storage contract. Used heavily by
//! tests, and usable as an ephemeral backend for demos; state does not
//! survive a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::models::checkin::{Authenticate, SetBootstrapToken, TokenUpdate};
use crate::models::command::{Command, CommandResults, CommandStatus};
use crate::models::push::PushInfo;
use crate::request::Request;
use crate::store::{CertAuthStore, CheckinStore, CommandStore, MigrationStore, PushStore};

#[derive(Debug, Default, Clone)]
struct EnrollmentRecord {
    parent_id: Option<String>,
    topic: Option<String>,
    push_token: Option<Vec<u8>>,
    push_magic: Option<String>,
    unlock_token: Option<Vec<u8>>,
    bootstrap_token: Option<Vec<u8>>,
    authenticate_raw: Option<Vec<u8>>,
    token_update_raw: Option<Vec<u8>>,
    token_update_tally: u32,
    enabled: bool,
    last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    command_uuid: String,
    /// `None` while pending; a report moves it to the reported status.
    status: Option<CommandStatus>,
    result: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct AssociationTimes {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    enrollments: HashMap<String, EnrollmentRecord>,
    queues: HashMap<String, Vec<QueueEntry>>,
    commands: HashMap<String, Command>,
    cert_associations: HashMap<String, HashMap<String, AssociationTimes>>,
}

/// Observable state of one enrollment, for assertions in tests.
#[derive(Debug, Clone)]
pub struct EnrollmentSnapshot {
    pub enabled: bool,
    pub token_update_tally: u32,
    pub topic: Option<String>,
    pub push_magic: Option<String>,
    pub bootstrap_token: Option<Vec<u8>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// In-memory implementation of the full storage contract.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of an enrollment's state.
    pub fn snapshot(&self, id: &str) -> Option<EnrollmentSnapshot> {
        let inner = self.lock();
        inner.enrollments.get(id).map(|r| EnrollmentSnapshot {
            enabled: r.enabled,
            token_update_tally: r.token_update_tally,
            topic: r.topic.clone(),
            push_magic: r.push_magic.clone(),
            bootstrap_token: r.bootstrap_token.clone(),
            last_seen_at: r.last_seen_at,
        })
    }

    /// Timestamps of one cert-hash association, if present.
    pub fn association_times(
        &self,
        id: &str,
        hash: &str,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let inner = self.lock();
        inner
            .cert_associations
            .get(id)
            .and_then(|hashes| hashes.get(hash))
            .map(|t| (t.created_at, t.updated_at))
    }

    fn touch(inner: &mut Inner, id: &str) {
        if let Some(record) = inner.enrollments.get_mut(id) {
            record.last_seen_at = Some(Utc::now());
        }
    }

    fn child_ids(inner: &Inner, parent: &str) -> Vec<String> {
        inner
            .enrollments
            .iter()
            .filter(|(_, r)| r.parent_id.as_deref() == Some(parent))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl CheckinStore for InMemoryStore {
    async fn store_authenticate(&self, req: &Request, msg: &Authenticate) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let record = inner.enrollments.entry(id.id.clone()).or_default();
        record.parent_id = id.parent_id.clone();
        record.topic = Some(msg.topic.clone());
        record.authenticate_raw = Some(msg.raw.clone());
        record.last_seen_at = Some(Utc::now());
        Ok(())
    }

    async fn store_token_update(&self, req: &Request, msg: &TokenUpdate) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let record = inner.enrollments.entry(id.id.clone()).or_default();
        record.parent_id = id.parent_id.clone();
        record.topic = Some(msg.topic.clone());
        record.push_token = Some(msg.token.to_vec());
        record.push_magic = Some(msg.push_magic.clone());
        if let Some(unlock) = &msg.unlock_token {
            record.unlock_token = Some(unlock.to_vec());
        }
        record.token_update_raw = Some(msg.raw.clone());
        record.token_update_tally += 1;
        record.enabled = true;
        record.last_seen_at = Some(Utc::now());
        Ok(())
    }

    async fn disable(&self, req: &Request) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let children = if id.is_user_channel() {
            Vec::new()
        } else {
            Self::child_ids(&inner, &id.id)
        };
        if let Some(record) = inner.enrollments.get_mut(&id.id) {
            record.enabled = false;
        }
        for child in children {
            if let Some(record) = inner.enrollments.get_mut(&child) {
                record.enabled = false;
            }
        }
        Ok(())
    }

    async fn store_bootstrap_token(
        &self,
        req: &Request,
        msg: &SetBootstrapToken,
    ) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let record = inner.enrollments.entry(id.id.clone()).or_default();
        record.bootstrap_token = msg.bootstrap_token.as_ref().map(|t| t.to_vec());
        record.last_seen_at = Some(Utc::now());
        Ok(())
    }

    async fn retrieve_bootstrap_token(&self, req: &Request) -> Result<Option<Vec<u8>>, Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        Self::touch(&mut inner, &id.id);
        Ok(inner
            .enrollments
            .get(&id.id)
            .and_then(|r| r.bootstrap_token.clone()))
    }
}

#[async_trait]
impl CommandStore for InMemoryStore {
    async fn store_command_report(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        Self::touch(&mut inner, &id.id);
        if results.command_uuid.is_empty() {
            return Ok(());
        }
        if let Some(queue) = inner.queues.get_mut(&id.id) {
            if let Some(entry) = queue
                .iter_mut()
                .find(|e| e.command_uuid == results.command_uuid)
            {
                entry.status = Some(results.status);
                entry.result = Some(results.raw.clone());
            }
        }
        Ok(())
    }

    async fn retrieve_next_command(
        &self,
        req: &Request,
        skip_not_now: bool,
    ) -> Result<Option<Command>, Error> {
        let id = req.enroll_id()?;
        let inner = self.lock();
        let Some(queue) = inner.queues.get(&id.id) else {
            return Ok(None);
        };
        let next = queue.iter().find(|e| match e.status {
            None => true,
            Some(CommandStatus::NotNow) => !skip_not_now,
            Some(_) => false,
        });
        Ok(next.and_then(|e| inner.commands.get(&e.command_uuid).cloned()))
    }

    async fn clear_queue(&self, req: &Request) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let mut targets = vec![id.id.clone()];
        if !id.is_user_channel() {
            targets.extend(Self::child_ids(&inner, &id.id));
        }
        for target in targets {
            inner.queues.remove(&target);
        }
        Ok(())
    }

    async fn enqueue_command(
        &self,
        _req: &Request,
        ids: &[String],
        command: &Command,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner
            .commands
            .entry(command.command_uuid.clone())
            .or_insert_with(|| command.clone());
        for id in ids {
            let queue = inner.queues.entry(id.clone()).or_default();
            if queue.iter().any(|e| e.command_uuid == command.command_uuid) {
                continue;
            }
            queue.push(QueueEntry {
                command_uuid: command.command_uuid.clone(),
                status: None,
                result: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CertAuthStore for InMemoryStore {
    async fn has_cert_hash(&self, _req: &Request, hash: &str) -> Result<bool, Error> {
        let inner = self.lock();
        Ok(inner
            .cert_associations
            .values()
            .any(|hashes| hashes.contains_key(hash)))
    }

    async fn enrollment_has_cert_hash(&self, req: &Request) -> Result<bool, Error> {
        let id = req.enroll_id()?;
        let inner = self.lock();
        Ok(inner
            .cert_associations
            .get(&id.id)
            .is_some_and(|hashes| !hashes.is_empty()))
    }

    async fn is_cert_hash_associated(&self, req: &Request, hash: &str) -> Result<bool, Error> {
        let id = req.enroll_id()?;
        let inner = self.lock();
        Ok(inner
            .cert_associations
            .get(&id.id)
            .is_some_and(|hashes| hashes.contains_key(hash)))
    }

    async fn associate_cert_hash(&self, req: &Request, hash: &str) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        let now = Utc::now();
        inner
            .cert_associations
            .entry(id.id.clone())
            .or_default()
            .entry(hash.to_string())
            .and_modify(|t| t.updated_at = now)
            .or_insert(AssociationTimes {
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn enrollment_from_hash(
        &self,
        _req: &Request,
        hash: &str,
    ) -> Result<Option<String>, Error> {
        let inner = self.lock();
        Ok(inner
            .cert_associations
            .iter()
            .find(|(_, hashes)| hashes.contains_key(hash))
            .map(|(id, _)| id.clone()))
    }

    async fn retire_cert_hashes(&self, req: &Request, keep: &str) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let mut inner = self.lock();
        if let Some(hashes) = inner.cert_associations.get_mut(&id.id) {
            hashes.retain(|hash, _| hash == keep);
        }
        Ok(())
    }
}

#[async_trait]
impl PushStore for InMemoryStore {
    async fn retrieve_push_info(
        &self,
        _req: &Request,
        ids: &[String],
    ) -> Result<HashMap<String, Result<PushInfo, Error>>, Error> {
        let inner = self.lock();
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let info = inner.enrollments.get(id).and_then(|r| {
                Some(PushInfo {
                    token: r.push_token.clone()?,
                    push_magic: r.push_magic.clone()?,
                    topic: r.topic.clone()?,
                })
            });
            let entry = info.ok_or_else(|| {
                Error::Storage(anyhow::anyhow!("no push info for enrollment {id}"))
            });
            out.insert(id.clone(), entry);
        }
        Ok(out)
    }
}

#[async_trait]
impl MigrationStore for InMemoryStore {
    async fn retrieve_migration_checkins(
        &self,
        _req: &Request,
        sender: mpsc::Sender<Result<Vec<u8>, Error>>,
    ) -> Result<(), Error> {
        // Devices first (Authenticate then TokenUpdate), then user channels,
        // so a replay always sees a parent before its children.
        let batches: Vec<Vec<u8>> = {
            let inner = self.lock();
            let mut device_ids: Vec<&String> = inner
                .enrollments
                .iter()
                .filter(|(_, r)| r.parent_id.is_none())
                .map(|(id, _)| id)
                .collect();
            device_ids.sort();

            let mut out = Vec::new();
            for device_id in &device_ids {
                let record = &inner.enrollments[*device_id];
                out.extend(record.authenticate_raw.clone());
                out.extend(record.token_update_raw.clone());
                let mut children = Self::child_ids(&inner, device_id);
                children.sort();
                for child in children {
                    let child_record = &inner.enrollments[&child];
                    out.extend(child_record.authenticate_raw.clone());
                    out.extend(child_record.token_update_raw.clone());
                }
            }
            out
        };

        for raw in batches {
            sender
                .send(Ok(raw))
                .await
                .map_err(|_| Error::Storage(anyhow::anyhow!("migration receiver dropped")))?;
        }
        Ok(())
    }
}
