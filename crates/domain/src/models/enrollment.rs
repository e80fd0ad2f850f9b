//! Enrollment identity model and request normalization.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Separator between the device and user part of a user-channel id.
const ID_SEPARATOR: char = ':';

/// The kind of channel an enrollment id addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentType {
    /// Device channel keyed by UDID.
    Device,
    /// Per-user channel on a UDID-keyed device.
    User,
    /// Account-driven User Enrollment user channel (EnrollmentID-keyed).
    UserEnrollment,
    /// Device channel of an account-driven User Enrollment.
    UserEnrollmentDevice,
}

impl EnrollmentType {
    /// The device-channel type backing this channel. Identity certificates
    /// belong to the device, so cert bindings are scoped through this.
    pub fn device_channel(&self) -> EnrollmentType {
        match self {
            EnrollmentType::Device | EnrollmentType::User => EnrollmentType::Device,
            EnrollmentType::UserEnrollment | EnrollmentType::UserEnrollmentDevice => {
                EnrollmentType::UserEnrollmentDevice
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentType::Device => "Device",
            EnrollmentType::User => "User",
            EnrollmentType::UserEnrollment => "UserEnrollment",
            EnrollmentType::UserEnrollmentDevice => "UserEnrollmentDevice",
        }
    }
}

impl std::fmt::Display for EnrollmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical enrollment identifier.
///
/// For a device channel `id` is the UDID (or supplied EnrollmentID) and
/// `parent_id` is empty. For a user channel `id` is
/// `<device-id>:<user-id>` and `parent_id` is the device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollId {
    pub enrollment_type: EnrollmentType,
    pub id: String,
    pub parent_id: Option<String>,
}

impl EnrollId {
    /// Whether this id addresses a per-user channel.
    pub fn is_user_channel(&self) -> bool {
        self.parent_id.is_some()
    }
}

impl std::fmt::Display for EnrollId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// The enrollment block every check-in and command-report message carries.
///
/// Parsed straight out of the plist; all fields are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(rename = "UDID", default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,

    #[serde(rename = "EnrollmentID", default, skip_serializing_if = "Option::is_none")]
    pub enrollment_id: Option<String>,

    #[serde(rename = "UserID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(rename = "UserShortName", default, skip_serializing_if = "Option::is_none")]
    pub user_short_name: Option<String>,
}

impl Enrollment {
    /// Collapses the block into a canonical [`EnrollId`].
    ///
    /// Pure and deterministic: equal inputs yield byte-equal ids. The UDID
    /// takes precedence over a supplied EnrollmentID for the device part;
    /// `UserID` takes precedence over `UserShortName` for the user part.
    pub fn resolve(&self) -> Result<EnrollId, Error> {
        let udid = self.udid.as_deref().unwrap_or("");
        let enrollment_id = self.enrollment_id.as_deref().unwrap_or("");

        let (device_id, udid_keyed) = if !udid.is_empty() {
            (udid, true)
        } else {
            (enrollment_id, false)
        };

        if device_id.is_empty() {
            return Err(Error::InvalidEnrollment(
                "enrollment block carries no device identifier".into(),
            ));
        }
        if device_id.contains(ID_SEPARATOR) {
            return Err(Error::InvalidEnrollment(format!(
                "device identifier {device_id:?} contains reserved separator"
            )));
        }

        let user_id = self.user_id.as_deref().unwrap_or("");
        let user_short_name = self.user_short_name.as_deref().unwrap_or("");
        let user = if !user_id.is_empty() {
            user_id
        } else {
            user_short_name
        };

        if user.is_empty() {
            return Ok(EnrollId {
                enrollment_type: if udid_keyed {
                    EnrollmentType::Device
                } else {
                    EnrollmentType::UserEnrollmentDevice
                },
                id: device_id.to_string(),
                parent_id: None,
            });
        }

        if user.contains(ID_SEPARATOR) {
            return Err(Error::InvalidEnrollment(format!(
                "user identifier {user:?} contains reserved separator"
            )));
        }

        Ok(EnrollId {
            enrollment_type: if udid_keyed {
                EnrollmentType::User
            } else {
                EnrollmentType::UserEnrollment
            },
            id: format!("{device_id}{ID_SEPARATOR}{user}"),
            parent_id: Some(device_id.to_string()),
        })
    }
}
