//! MDM commands and command-result reports.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::enrollment::Enrollment;

/// An MDM command as queued for delivery.
///
/// The plist bytes are opaque to the server except for the UUID and
/// request type extracted at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_uuid: String,
    pub request_type: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    #[serde(rename = "CommandUUID")]
    command_uuid: String,
    #[serde(rename = "Command")]
    command: CommandBody,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    #[serde(rename = "RequestType")]
    request_type: String,
}

impl Command {
    /// Parses a raw command plist, extracting only the fields the server
    /// needs; everything else stays in the stored bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let envelope: CommandEnvelope =
            plist::from_bytes(raw).map_err(|source| Error::Parse {
                source,
                content: raw.to_vec(),
            })?;
        if envelope.command_uuid.is_empty() {
            return Err(Error::InvalidEnrollment(
                "command is missing a CommandUUID".into(),
            ));
        }
        Ok(Command {
            command_uuid: envelope.command_uuid,
            request_type: envelope.command.request_type,
            raw: raw.to_vec(),
        })
    }
}

/// Status a device reports for a command (or for an idle poll).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Idle,
    Acknowledged,
    Error,
    CommandFormatError,
    NotNow,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Idle => "Idle",
            CommandStatus::Acknowledged => "Acknowledged",
            CommandStatus::Error => "Error",
            CommandStatus::CommandFormatError => "CommandFormatError",
            CommandStatus::NotNow => "NotNow",
        }
    }

    /// Terminal statuses take a queue entry out of circulation for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Acknowledged | CommandStatus::Error | CommandStatus::CommandFormatError
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device's report on the command endpoint.
///
/// An empty `CommandUUID` with `Status=Idle` is the idle poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResults {
    #[serde(flatten)]
    pub enrollment: Enrollment,

    #[serde(rename = "CommandUUID", default)]
    pub command_uuid: String,

    #[serde(rename = "Status")]
    pub status: CommandStatus,

    /// Error detail dictionaries, kept opaque.
    #[serde(rename = "ErrorChain", default, skip_serializing_if = "Option::is_none")]
    pub error_chain: Option<plist::Value>,

    /// Original report bytes, persisted with the queue entry.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Parses a `CommandResults` report from plist bytes.
pub fn parse_command_results(data: &[u8]) -> Result<CommandResults, Error> {
    let mut results: CommandResults =
        plist::from_bytes(data).map_err(|source| Error::Parse {
            source,
            content: data.to_vec(),
        })?;
    results.raw = data.to_vec();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CommandUUID</key>
    <string>U1</string>
    <key>Command</key>
    <dict>
        <key>RequestType</key>
        <string>DeviceInformation</string>
        <key>Queries</key>
        <array><string>UDID</string></array>
    </dict>
</dict>
</plist>"#;

    const RESULTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>UDID</key>
    <string>AAA</string>
    <key>CommandUUID</key>
    <string>U1</string>
    <key>Status</key>
    <string>Acknowledged</string>
</dict>
</plist>"#;

    const IDLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>UDID</key>
    <string>AAA</string>
    <key>Status</key>
    <string>Idle</string>
</dict>
</plist>"#;

    #[test]
    fn test_command_parse_extracts_uuid_and_type() {
        let cmd = Command::parse(COMMAND_XML.as_bytes()).unwrap();
        assert_eq!(cmd.command_uuid, "U1");
        assert_eq!(cmd.request_type, "DeviceInformation");
        assert_eq!(cmd.raw, COMMAND_XML.as_bytes());
    }

    #[test]
    fn test_command_parse_rejects_garbage() {
        assert!(matches!(
            Command::parse(b"<plist>"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_results() {
        let results = parse_command_results(RESULTS_XML.as_bytes()).unwrap();
        assert_eq!(results.command_uuid, "U1");
        assert_eq!(results.status, CommandStatus::Acknowledged);
        assert_eq!(results.enrollment.udid.as_deref(), Some("AAA"));
        assert_eq!(results.raw, RESULTS_XML.as_bytes());
    }

    #[test]
    fn test_parse_idle_poll_has_empty_uuid() {
        let results = parse_command_results(IDLE_XML.as_bytes()).unwrap();
        assert_eq!(results.command_uuid, "");
        assert_eq!(results.status, CommandStatus::Idle);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CommandStatus::Acknowledged.is_terminal());
        assert!(CommandStatus::Error.is_terminal());
        assert!(CommandStatus::CommandFormatError.is_terminal());
        assert!(!CommandStatus::NotNow.is_terminal());
        assert!(!CommandStatus::Idle.is_terminal());
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            CommandStatus::Idle,
            CommandStatus::Acknowledged,
            CommandStatus::Error,
            CommandStatus::CommandFormatError,
            CommandStatus::NotNow,
        ] {
            assert_eq!(format!("{status}"), status.as_str());
        }
    }
}
