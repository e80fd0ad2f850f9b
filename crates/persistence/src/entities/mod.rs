//! Entity definitions (database row mappings).

use sqlx::FromRow;

use domain::models::{Command, PushInfo};

/// Row shape shared by the push-info lookups over `devices` and `users`.
#[derive(Debug, Clone, FromRow)]
pub struct PushInfoRow {
    pub id: String,
    pub push_token: Option<Vec<u8>>,
    pub push_magic: Option<String>,
    pub topic: Option<String>,
}

impl PushInfoRow {
    /// Converts the row into push info; `None` when the enrollment has not
    /// completed a token update yet.
    pub fn into_push_info(self) -> Option<PushInfo> {
        Some(PushInfo {
            token: self.push_token?,
            push_magic: self.push_magic?,
            topic: self.topic?,
        })
    }
}

/// A queued command joined with its payload.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedCommandRow {
    pub command_uuid: String,
    pub request_type: String,
    pub command_plist: Vec<u8>,
}

impl From<QueuedCommandRow> for Command {
    fn from(row: QueuedCommandRow) -> Self {
        Command {
            command_uuid: row.command_uuid,
            request_type: row.request_type,
            raw: row.command_plist,
        }
    }
}

/// Stored check-in blobs for one device, as read by the migration export.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceCheckinRow {
    pub authenticate_plist: Option<Vec<u8>>,
    pub token_update_plist: Option<Vec<u8>>,
}

/// Stored check-in blob for one user channel.
#[derive(Debug, Clone, FromRow)]
pub struct UserCheckinRow {
    pub token_update_plist: Option<Vec<u8>>,
}
