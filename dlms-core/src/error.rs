use thiserror::Error;

/// Main error type for DLMS/COSEM operations
///
/// The type is `Clone` so a single transport failure can be delivered to every
/// request pending on a connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DlmsError {
    #[error("Malformed OBIS code: {0}")]
    MalformedObisCode(String),

    #[error("Frame check sequence mismatch")]
    FrameCrcMismatch,

    #[error("Frame end flag missing")]
    MissingEndFlag,

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Unknown APDU tag: 0x{0:02X}")]
    UnknownApduTag(u8),

    #[error("Unknown data type tag: 0x{0:02X}")]
    UnknownDataTypeTag(u8),

    #[error("Data access error: {0}")]
    DataAccessError(u8),

    #[error("Association rejected (result {result}, diagnostic {diagnostic})")]
    AssociationRejected { result: u8, diagnostic: u8 },

    #[error("Timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<std::io::Error> for DlmsError {
    fn from(err: std::io::Error) -> Self {
        DlmsError::Transport(err.to_string())
    }
}

impl DlmsError {
    /// Whether the error is a framing-level corruption that the reassembler
    /// recovers from locally.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            DlmsError::FrameCrcMismatch | DlmsError::MissingEndFlag | DlmsError::FrameInvalid(_)
        )
    }
}

/// Result type alias for DLMS/COSEM operations
pub type DlmsResult<T> = Result<T, DlmsError>;
