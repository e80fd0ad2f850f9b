//! PostgreSQL implementation of the storage contract.
//!
//! Multi-step writes run inside a transaction so they are atomic against
//! concurrent readers; per-enrollment rows serialize through row-level
//! locks taken by the UPDATE statements. Cancellation is honored by query
//! futures being dropped when the request deadline fires.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use domain::error::Error;
use domain::models::checkin::{Authenticate, SetBootstrapToken, TokenUpdate};
use domain::models::command::{Command, CommandResults};
use domain::models::push::PushInfo;
use domain::request::Request;
use domain::store::{CertAuthStore, CheckinStore, CommandStore, MigrationStore, PushStore};

use crate::entities::{DeviceCheckinRow, PushInfoRow, QueuedCommandRow, UserCheckinRow};

/// PostgreSQL-backed storage.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn touch_last_seen(&self, req: &Request) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let query = if id.is_user_channel() {
            "UPDATE users SET last_seen_at = NOW(), updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE devices SET last_seen_at = NOW(), updated_at = NOW() WHERE id = $1"
        };
        sqlx::query(query)
            .bind(&id.id)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }
}

#[async_trait]
impl CheckinStore for PgStore {
    async fn store_authenticate(&self, req: &Request, msg: &Authenticate) -> Result<(), Error> {
        let id = req.enroll_id()?;
        if let Some(parent) = &id.parent_id {
            sqlx::query(
                r#"
                INSERT INTO users (id, device_id, user_short_name, last_seen_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    user_short_name = EXCLUDED.user_short_name,
                    last_seen_at = NOW(),
                    updated_at = NOW()
                "#,
            )
            .bind(&id.id)
            .bind(parent)
            .bind(&msg.enrollment.user_short_name)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, identity_cert, serial_number, topic, authenticate_plist,
                enabled, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, NOW())
            ON CONFLICT (id) DO UPDATE SET
                identity_cert = EXCLUDED.identity_cert,
                serial_number = EXCLUDED.serial_number,
                topic = EXCLUDED.topic,
                authenticate_plist = EXCLUDED.authenticate_plist,
                last_seen_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(&id.id)
        .bind(req.certificate().map(|c| c.der().to_vec()))
        .bind(&msg.serial_number)
        .bind(&msg.topic)
        .bind(&msg.raw)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn store_token_update(&self, req: &Request, msg: &TokenUpdate) -> Result<(), Error> {
        let id = req.enroll_id()?;
        if let Some(parent) = &id.parent_id {
            sqlx::query(
                r#"
                INSERT INTO users (
                    id, device_id, user_short_name, topic, push_token, push_magic,
                    token_update_plist, token_update_tally, enabled, last_seen_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 1, TRUE, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    user_short_name = COALESCE(EXCLUDED.user_short_name, users.user_short_name),
                    topic = EXCLUDED.topic,
                    push_token = EXCLUDED.push_token,
                    push_magic = EXCLUDED.push_magic,
                    token_update_plist = EXCLUDED.token_update_plist,
                    token_update_tally = users.token_update_tally + 1,
                    enabled = TRUE,
                    last_seen_at = NOW(),
                    updated_at = NOW()
                "#,
            )
            .bind(&id.id)
            .bind(parent)
            .bind(&msg.enrollment.user_short_name)
            .bind(&msg.topic)
            .bind(msg.token.as_ref())
            .bind(&msg.push_magic)
            .bind(&msg.raw)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, topic, push_token, push_magic, unlock_token,
                token_update_plist, token_update_tally, enabled, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1, TRUE, NOW())
            ON CONFLICT (id) DO UPDATE SET
                topic = EXCLUDED.topic,
                push_token = EXCLUDED.push_token,
                push_magic = EXCLUDED.push_magic,
                unlock_token = COALESCE(EXCLUDED.unlock_token, devices.unlock_token),
                token_update_plist = EXCLUDED.token_update_plist,
                token_update_tally = devices.token_update_tally + 1,
                enabled = TRUE,
                last_seen_at = NOW(),
                updated_at = NOW()
            "#,
        )
        .bind(&id.id)
        .bind(&msg.topic)
        .bind(msg.token.as_ref())
        .bind(&msg.push_magic)
        .bind(msg.unlock_token.as_ref().map(|t| t.to_vec()))
        .bind(&msg.raw)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn disable(&self, req: &Request) -> Result<(), Error> {
        let id = req.enroll_id()?;
        if id.is_user_channel() {
            sqlx::query("UPDATE users SET enabled = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(&id.id)
                .execute(&self.pool)
                .await
                .map_err(Error::storage)?;
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        sqlx::query("UPDATE devices SET enabled = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(&id.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        sqlx::query("UPDATE users SET enabled = FALSE, updated_at = NOW() WHERE device_id = $1")
            .bind(&id.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn store_bootstrap_token(
        &self,
        req: &Request,
        msg: &SetBootstrapToken,
    ) -> Result<(), Error> {
        let id = req.enroll_id()?;
        let token = msg.bootstrap_token.as_ref().map(|t| t.to_vec());
        let query = if id.is_user_channel() {
            "UPDATE users SET bootstrap_token = $2, updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE devices SET bootstrap_token = $2, updated_at = NOW() WHERE id = $1"
        };
        sqlx::query(query)
            .bind(&id.id)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    async fn retrieve_bootstrap_token(&self, req: &Request) -> Result<Option<Vec<u8>>, Error> {
        let id = req.enroll_id()?;
        let query = if id.is_user_channel() {
            "SELECT bootstrap_token FROM users WHERE id = $1"
        } else {
            "SELECT bootstrap_token FROM devices WHERE id = $1"
        };
        let token: Option<Option<Vec<u8>>> = sqlx::query_scalar(query)
            .bind(&id.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(token.flatten())
    }
}

#[async_trait]
impl CommandStore for PgStore {
    async fn store_command_report(
        &self,
        req: &Request,
        results: &CommandResults,
    ) -> Result<(), Error> {
        self.touch_last_seen(req).await?;
        if results.command_uuid.is_empty() {
            return Ok(());
        }
        let id = req.enroll_id()?;
        sqlx::query(
            r#"
            UPDATE enrollment_queue
            SET status = $3, result = $4, updated_at = NOW()
            WHERE enroll_id = $1 AND command_uuid = $2
            "#,
        )
        .bind(&id.id)
        .bind(&results.command_uuid)
        .bind(results.status.as_str())
        .bind(&results.raw)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn retrieve_next_command(
        &self,
        req: &Request,
        skip_not_now: bool,
    ) -> Result<Option<Command>, Error> {
        let id = req.enroll_id()?;
        let row: Option<QueuedCommandRow> = sqlx::query_as(
            r#"
            SELECT c.command_uuid, c.request_type, c.command_plist
            FROM enrollment_queue q
            JOIN commands c ON c.command_uuid = q.command_uuid
            WHERE q.enroll_id = $1
              AND (q.status IS NULL OR (q.status = 'NotNow' AND NOT $2))
            ORDER BY q.created_at, q.command_uuid
            LIMIT 1
            "#,
        )
        .bind(&id.id)
        .bind(skip_not_now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(row.map(Command::from))
    }

    async fn clear_queue(&self, req: &Request) -> Result<(), Error> {
        let id = req.enroll_id()?;
        if id.is_user_channel() {
            sqlx::query("DELETE FROM enrollment_queue WHERE enroll_id = $1")
                .bind(&id.id)
                .execute(&self.pool)
                .await
                .map_err(Error::storage)?;
            return Ok(());
        }

        // Single statement so the device and user-channel cascade commits
        // atomically.
        sqlx::query(
            r#"
            DELETE FROM enrollment_queue
            WHERE enroll_id = $1
               OR enroll_id IN (SELECT id FROM users WHERE device_id = $1)
            "#,
        )
        .bind(&id.id)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn enqueue_command(
        &self,
        _req: &Request,
        ids: &[String],
        command: &Command,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        sqlx::query(
            r#"
            INSERT INTO commands (command_uuid, request_type, command_plist)
            VALUES ($1, $2, $3)
            ON CONFLICT (command_uuid) DO NOTHING
            "#,
        )
        .bind(&command.command_uuid)
        .bind(&command.request_type)
        .bind(&command.raw)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        for id in ids {
            sqlx::query(
                r#"
                INSERT INTO enrollment_queue (enroll_id, command_uuid)
                VALUES ($1, $2)
                ON CONFLICT (enroll_id, command_uuid) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(&command.command_uuid)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        }
        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }
}

#[async_trait]
impl CertAuthStore for PgStore {
    async fn has_cert_hash(&self, _req: &Request, hash: &str) -> Result<bool, Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM cert_auth_associations WHERE sha256 = $1)",
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)
    }

    async fn enrollment_has_cert_hash(&self, req: &Request) -> Result<bool, Error> {
        let id = req.enroll_id()?;
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cert_auth_associations WHERE id = $1)")
            .bind(&id.id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)
    }

    async fn is_cert_hash_associated(&self, req: &Request, hash: &str) -> Result<bool, Error> {
        let id = req.enroll_id()?;
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM cert_auth_associations WHERE id = $1 AND sha256 = $2)",
        )
        .bind(&id.id)
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)
    }

    async fn associate_cert_hash(&self, req: &Request, hash: &str) -> Result<(), Error> {
        let id = req.enroll_id()?;
        sqlx::query(
            r#"
            INSERT INTO cert_auth_associations (id, sha256)
            VALUES ($1, $2)
            ON CONFLICT (id, sha256) DO UPDATE SET updated_at = NOW()
            "#,
        )
        .bind(&id.id)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn enrollment_from_hash(
        &self,
        _req: &Request,
        hash: &str,
    ) -> Result<Option<String>, Error> {
        sqlx::query_scalar("SELECT id FROM cert_auth_associations WHERE sha256 = $1 LIMIT 1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::storage)
    }

    async fn retire_cert_hashes(&self, req: &Request, keep: &str) -> Result<(), Error> {
        let id = req.enroll_id()?;
        sqlx::query("DELETE FROM cert_auth_associations WHERE id = $1 AND sha256 <> $2")
            .bind(&id.id)
            .bind(keep)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }
}

#[async_trait]
impl PushStore for PgStore {
    async fn retrieve_push_info(
        &self,
        _req: &Request,
        ids: &[String],
    ) -> Result<HashMap<String, Result<PushInfo, Error>>, Error> {
        let rows: Vec<PushInfoRow> = sqlx::query_as(
            r#"
            SELECT id, push_token, push_magic, topic FROM devices WHERE id = ANY($1)
            UNION ALL
            SELECT id, push_token, push_magic, topic FROM users WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        let mut found: HashMap<String, PushInfo> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                row.into_push_info().map(|info| (id, info))
            })
            .collect();

        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let entry = found.remove(id).ok_or_else(|| {
                Error::Storage(anyhow::anyhow!("no push info for enrollment {id}"))
            });
            out.insert(id.clone(), entry);
        }
        Ok(out)
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn retrieve_migration_checkins(
        &self,
        _req: &Request,
        sender: mpsc::Sender<Result<Vec<u8>, Error>>,
    ) -> Result<(), Error> {
        // Devices first, Authenticate before TokenUpdate, then user
        // channels; a replay always sees a parent before its children.
        let devices: Vec<DeviceCheckinRow> = sqlx::query_as(
            "SELECT authenticate_plist, token_update_plist FROM devices ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        for row in devices {
            for raw in [row.authenticate_plist, row.token_update_plist]
                .into_iter()
                .flatten()
            {
                sender.send(Ok(raw)).await.map_err(|_| {
                    Error::Storage(anyhow::anyhow!("migration receiver dropped"))
                })?;
            }
        }

        let users: Vec<UserCheckinRow> = sqlx::query_as(
            "SELECT token_update_plist FROM users ORDER BY device_id, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        for row in users {
            if let Some(raw) = row.token_update_plist {
                sender.send(Ok(raw)).await.map_err(|_| {
                    Error::Storage(anyhow::anyhow!("migration receiver dropped"))
                })?;
            }
        }
        Ok(())
    }
}
