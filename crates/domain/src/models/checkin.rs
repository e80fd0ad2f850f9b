//! Check-in message types.
//!
//! Devices announce identity changes through the check-in endpoint using
//! one of eight message kinds, discriminated by the `MessageType` key of
//! the property list body.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::Error;
use crate::models::enrollment::Enrollment;

/// A parsed check-in message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "MessageType")]
pub enum CheckinMessage {
    Authenticate(Authenticate),
    TokenUpdate(TokenUpdate),
    CheckOut(CheckOut),
    UserAuthenticate(UserAuthenticate),
    SetBootstrapToken(SetBootstrapToken),
    GetBootstrapToken(GetBootstrapToken),
    DeclarativeManagement(DeclarativeManagement),
    GetToken(GetToken),
}

impl CheckinMessage {
    /// The enrollment block carried by every message kind.
    pub fn enrollment(&self) -> &Enrollment {
        match self {
            CheckinMessage::Authenticate(m) => &m.enrollment,
            CheckinMessage::TokenUpdate(m) => &m.enrollment,
            CheckinMessage::CheckOut(m) => &m.enrollment,
            CheckinMessage::UserAuthenticate(m) => &m.enrollment,
            CheckinMessage::SetBootstrapToken(m) => &m.enrollment,
            CheckinMessage::GetBootstrapToken(m) => &m.enrollment,
            CheckinMessage::DeclarativeManagement(m) => &m.enrollment,
            CheckinMessage::GetToken(m) => &m.enrollment,
        }
    }

    /// Wire name of the message kind, for logging and metrics labels.
    pub fn message_type(&self) -> &'static str {
        match self {
            CheckinMessage::Authenticate(_) => "Authenticate",
            CheckinMessage::TokenUpdate(_) => "TokenUpdate",
            CheckinMessage::CheckOut(_) => "CheckOut",
            CheckinMessage::UserAuthenticate(_) => "UserAuthenticate",
            CheckinMessage::SetBootstrapToken(_) => "SetBootstrapToken",
            CheckinMessage::GetBootstrapToken(_) => "GetBootstrapToken",
            CheckinMessage::DeclarativeManagement(_) => "DeclarativeManagement",
            CheckinMessage::GetToken(_) => "GetToken",
        }
    }

    fn set_raw(&mut self, raw: Vec<u8>) {
        match self {
            CheckinMessage::Authenticate(m) => m.raw = raw,
            CheckinMessage::TokenUpdate(m) => m.raw = raw,
            CheckinMessage::CheckOut(m) => m.raw = raw,
            CheckinMessage::UserAuthenticate(m) => m.raw = raw,
            CheckinMessage::SetBootstrapToken(m) => m.raw = raw,
            CheckinMessage::GetBootstrapToken(m) => m.raw = raw,
            CheckinMessage::DeclarativeManagement(m) => m.raw = raw,
            CheckinMessage::GetToken(m) => m.raw = raw,
        }
    }
}

/// Initial device identity announcement. Starts (or restarts) an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Authenticate {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    /// APNs topic from the push certificate.
    pub topic: String,

    #[serde(default)]
    pub build_version: Option<String>,

    #[serde(default, rename = "OSVersion")]
    pub os_version: Option<String>,

    #[serde(default)]
    pub product_name: Option<String>,

    #[serde(default)]
    pub serial_number: Option<String>,

    #[serde(default)]
    pub device_name: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub model_name: Option<String>,

    /// Original message bytes, persisted verbatim.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Push token registration. Completes (and keeps refreshing) an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenUpdate {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    pub topic: String,

    /// APNs device token.
    pub token: ByteBuf,

    pub push_magic: String,

    /// Escrowed unlock token, device channel only.
    #[serde(default)]
    pub unlock_token: Option<ByteBuf>,

    /// Set while the device sits at the DEP awaiting-configuration pane.
    #[serde(default)]
    pub awaiting_configuration: bool,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Device-initiated unenrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckOut {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    #[serde(default)]
    pub topic: Option<String>,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// User-channel authentication challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAuthenticate {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    #[serde(default)]
    pub digest_response: Option<String>,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Escrows the bootstrap token blob with the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetBootstrapToken {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    #[serde(default)]
    pub bootstrap_token: Option<ByteBuf>,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Requests the previously escrowed bootstrap token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetBootstrapToken {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Response plist for `GetBootstrapToken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BootstrapTokenResponse {
    pub bootstrap_token: ByteBuf,
}

/// Declarative Management protocol tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeclarativeManagement {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    /// DDM endpoint being addressed (e.g. `tokens`, `declaration-items`).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Synchronization payload, passed to the handler opaquely.
    #[serde(default)]
    pub data: Option<ByteBuf>,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Token exchange for Apple services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetToken {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    pub token_service_type: String,

    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Response plist for `GetToken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetTokenResponse {
    pub token_data: ByteBuf,
}

/// Parses a check-in message from plist bytes (XML or binary).
///
/// The original bytes are retained on the message for verbatim storage.
pub fn parse_checkin(data: &[u8]) -> Result<CheckinMessage, Error> {
    let mut msg: CheckinMessage = plist::from_bytes(data).map_err(|source| Error::Parse {
        source,
        content: data.to_vec(),
    })?;
    msg.set_raw(data.to_vec());
    Ok(msg)
}
