// MIT License - Copyright (c) 2026 Peter Wright
// Error types

use std::fmt;

/// Reason codes carried by an `ErrorMessage` (command 0x7) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelErrorCode {
    /// 0x00 - Requested command failed
    RequestedCommandFailed,
    /// 0x01 - Invalid user code
    InvalidUserCode,
    /// 0x02 - Partition in code lockout
    PartitionInCodeLockout,
    /// 0x05 - Panel will disconnect
    PanelWillDisconnect,
    /// 0x10 - Panel not connected
    PanelNotConnected,
    /// 0x11 - Panel already connected
    PanelAlreadyConnected,
    /// 0x12 - Invalid PC password
    InvalidPcPassword,
    /// 0x13 - External tool on phone line
    ExternalToolOnLine,
    /// 0x14 - Invalid module address
    InvalidModuleAddress,
    /// 0x15 - Cannot write in RAM
    CannotWriteInRam,
    /// 0x16 - Upgrade request failed
    UpgradeRequestFail,
    /// 0x17 - Record number out of range
    RecordNumberOutOfRange,
    /// 0x19 - Invalid record type
    InvalidRecordType,
    /// 0x1A - Multibus not supported
    MultibusNotSupported,
    /// 0x1B - Incorrect number of users
    IncorrectNumberOfUsers,
    /// 0x1C - Invalid label number
    InvalidLabelNumber,
    /// Any other code in 0x00..0x1C or beyond
    Unknown(u8),
}

impl PanelErrorCode {
    /// Decode the reason byte of an `ErrorMessage`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::RequestedCommandFailed,
            0x01 => Self::InvalidUserCode,
            0x02 => Self::PartitionInCodeLockout,
            0x05 => Self::PanelWillDisconnect,
            0x10 => Self::PanelNotConnected,
            0x11 => Self::PanelAlreadyConnected,
            0x12 => Self::InvalidPcPassword,
            0x13 => Self::ExternalToolOnLine,
            0x14 => Self::InvalidModuleAddress,
            0x15 => Self::CannotWriteInRam,
            0x16 => Self::UpgradeRequestFail,
            0x17 => Self::RecordNumberOutOfRange,
            0x19 => Self::InvalidRecordType,
            0x1A => Self::MultibusNotSupported,
            0x1B => Self::IncorrectNumberOfUsers,
            0x1C => Self::InvalidLabelNumber,
            other => Self::Unknown(other),
        }
    }

    /// The wire byte.
    pub fn code(&self) -> u8 {
        match self {
            Self::RequestedCommandFailed => 0x00,
            Self::InvalidUserCode => 0x01,
            Self::PartitionInCodeLockout => 0x02,
            Self::PanelWillDisconnect => 0x05,
            Self::PanelNotConnected => 0x10,
            Self::PanelAlreadyConnected => 0x11,
            Self::InvalidPcPassword => 0x12,
            Self::ExternalToolOnLine => 0x13,
            Self::InvalidModuleAddress => 0x14,
            Self::CannotWriteInRam => 0x15,
            Self::UpgradeRequestFail => 0x16,
            Self::RecordNumberOutOfRange => 0x17,
            Self::InvalidRecordType => 0x19,
            Self::MultibusNotSupported => 0x1A,
            Self::IncorrectNumberOfUsers => 0x1B,
            Self::InvalidLabelNumber => 0x1C,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RequestedCommandFailed => "Requested command failed",
            Self::InvalidUserCode => "Invalid user code",
            Self::PartitionInCodeLockout => "Partition in code lockout",
            Self::PanelWillDisconnect => "Panel will disconnect",
            Self::PanelNotConnected => "Panel not connected",
            Self::PanelAlreadyConnected => "Panel already connected",
            Self::InvalidPcPassword => "Invalid PC password",
            Self::ExternalToolOnLine => "External tool on phone line",
            Self::InvalidModuleAddress => "Invalid module address",
            Self::CannotWriteInRam => "Cannot write in RAM",
            Self::UpgradeRequestFail => "Upgrade request failed",
            Self::RecordNumberOutOfRange => "Record number out of range",
            Self::InvalidRecordType => "Invalid record type",
            Self::MultibusNotSupported => "Multibus not supported",
            Self::IncorrectNumberOfUsers => "Incorrect number of users",
            Self::InvalidLabelNumber => "Invalid label number",
            Self::Unknown(_) => "Unknown error",
        }
    }

    /// Stable snake_case name, as published upstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestedCommandFailed => "requested_command_failed",
            Self::InvalidUserCode => "invalid_user_code",
            Self::PartitionInCodeLockout => "partition_in_code_lockout",
            Self::PanelWillDisconnect => "panel_will_disconnect",
            Self::PanelNotConnected => "panel_not_connected",
            Self::PanelAlreadyConnected => "panel_already_connected",
            Self::InvalidPcPassword => "invalid_pc_password",
            Self::ExternalToolOnLine => "external_tool_on_line",
            Self::InvalidModuleAddress => "invalid_module_address",
            Self::CannotWriteInRam => "cannot_write_in_ram",
            Self::UpgradeRequestFail => "upgrade_request_fail",
            Self::RecordNumberOutOfRange => "record_number_out_of_range",
            Self::InvalidRecordType => "invalid_record_type",
            Self::MultibusNotSupported => "multibus_not_supported",
            Self::IncorrectNumberOfUsers => "incorrect_number_of_users",
            Self::InvalidLabelNumber => "invalid_label_number",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Whether this code aborts a login attempt.
    pub fn is_login_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidPcPassword
                | Self::PanelAlreadyConnected
                | Self::InvalidUserCode
                | Self::PartitionInCodeLockout
        )
    }

    /// Whether the panel is about to drop the session.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::PanelWillDisconnect | Self::PanelAlreadyConnected)
    }
}

impl fmt::Display for PanelErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x} {}: {}", self.code(), self.as_str(), self.description())
    }
}

/// Faults detected while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Length mismatch: header says {declared}, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("Address 0x{address:x} out of range (max 0x{max:x})")]
    AddressOutOfRange { address: u32, max: u32 },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid value for {field}: {details}")]
    InvalidValue { field: String, details: String },

    #[error("Missing field: {0}")]
    MissingField(String),
}

/// All errors that can occur in the paradox-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum ParadoxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Panel refused request: {0}")]
    ProtocolRefusal(PanelErrorCode),

    #[error("Login failed: {0}")]
    LoginFailed(PanelErrorCode),

    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    #[error("Operation failed: {action}")]
    OperationFailed { action: String },

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Immutable field {field} of {container} {key} changed outside inventory")]
    InvariantViolation {
        container: String,
        key: String,
        field: String,
    },

    #[error("Unsupported panel product id 0x{0:02x}")]
    UnsupportedPanel(u8),

    #[error("Not supported by this panel: {0}")]
    Unsupported(String),

    #[error("Invalid device ID: {id} (max: {max})")]
    InvalidDeviceId { id: u32, max: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl ParadoxError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ParadoxError::Io(_)
            | ParadoxError::Frame(_)
            | ParadoxError::Timeout { .. }
            | ParadoxError::OperationFailed { .. }
            | ParadoxError::Disconnected
            | ParadoxError::InvariantViolation { .. }
            | ParadoxError::ChannelClosed => true,
            ParadoxError::ProtocolRefusal(code) => code.ends_session(),
            ParadoxError::LoginFailed(code) => *code == PanelErrorCode::PanelAlreadyConnected,
            ParadoxError::UnsupportedPanel(_)
            | ParadoxError::Unsupported(_)
            | ParadoxError::InvalidDeviceId { .. }
            | ParadoxError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParadoxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in 0x00..=0x1Cu8 {
            assert_eq!(PanelErrorCode::from_code(code).code(), code);
        }
        assert_eq!(PanelErrorCode::from_code(0x10), PanelErrorCode::PanelNotConnected);
        assert_eq!(PanelErrorCode::from_code(0x03), PanelErrorCode::Unknown(0x03));
    }

    #[test]
    fn test_login_fatal_codes() {
        assert!(PanelErrorCode::InvalidPcPassword.is_login_fatal());
        assert!(PanelErrorCode::PartitionInCodeLockout.is_login_fatal());
        assert!(!PanelErrorCode::PanelNotConnected.is_login_fatal());
    }

    #[test]
    fn test_retry_policy() {
        assert!(ParadoxError::Disconnected.is_retryable());
        assert!(!ParadoxError::LoginFailed(PanelErrorCode::InvalidPcPassword).is_retryable());
        assert!(ParadoxError::LoginFailed(PanelErrorCode::PanelAlreadyConnected).is_retryable());
        assert!(!ParadoxError::UnsupportedPanel(0x99).is_retryable());
    }
}
