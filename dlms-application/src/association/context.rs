//! Association context for DLMS/COSEM connections
//!
//! Credentials and the parameters negotiated while the link and the
//! association were set up.

use dlms_core::{DlmsError, DlmsResult};
use dlms_session::LinkParameters;
use serde::{Deserialize, Serialize};

/// Authentication mechanism id carried in the AARQ mechanism name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthenticationMechanism {
    None = 0,
    /// Low level security: password sent in clear
    Low = 1,
    /// High level security: secret sent as the calling authentication value
    High = 2,
}

impl AuthenticationMechanism {
    pub fn from_u8(value: u8) -> DlmsResult<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Low),
            2 => Ok(Self::High),
            other => Err(DlmsError::Protocol(format!(
                "unsupported authentication mechanism {}",
                other
            ))),
        }
    }
}

/// Credentials presented when associating
///
/// In configuration files this is written as `none`, `{ low: "password" }`
/// or `{ high: "secret" }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authentication {
    #[default]
    None,
    Low(String),
    High(String),
}

impl Authentication {
    pub fn mechanism(&self) -> AuthenticationMechanism {
        match self {
            Authentication::None => AuthenticationMechanism::None,
            Authentication::Low(_) => AuthenticationMechanism::Low,
            Authentication::High(_) => AuthenticationMechanism::High,
        }
    }

    pub fn secret(&self) -> &[u8] {
        match self {
            Authentication::None => &[],
            Authentication::Low(secret) | Authentication::High(secret) => secret.as_bytes(),
        }
    }
}

/// Parameters agreed with the peer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegotiatedParameters {
    /// HDLC information field lengths and window sizes from SNRM/UA
    pub link: LinkParameters,
    /// Mechanism accepted in AARQ/AARE
    pub authentication: Option<AuthenticationMechanism>,
    /// Meter number announced in the calling AP title
    pub meter_number: Option<String>,
}
