use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OBIS (Object Identification System) code for identifying COSEM objects
///
/// OBIS codes are 6-byte identifiers addressing every data point of a meter,
/// e.g. `1-0:15.8.0.255` for total absolute active energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    /// Clock object, `0-0:1.0.0.255`
    pub const CLOCK: ObisCode = ObisCode::new(0, 0, 1, 0, 0, 255);
    /// Load profile, `1-0:99.1.0.255`
    pub const LOAD_PROFILE: ObisCode = ObisCode::new(1, 0, 99, 1, 0, 255);
    /// Disconnect control (relay), `0-0:96.3.10.255`
    pub const DISCONNECT_CONTROL: ObisCode = ObisCode::new(0, 0, 96, 3, 10, 255);
    /// Prepayment token register, `0-0:19.1.0.255`
    pub const TOKEN_REGISTER: ObisCode = ObisCode::new(0, 0, 19, 1, 0, 255);

    /// Create a new OBIS code from individual value groups A..F
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Create an OBIS code from its 6-byte wire form
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    /// Parse an OBIS code from text
    ///
    /// Supports:
    /// - the reduced dotted form `"1-0:15.8.0.255"` (also `"1.0.15.8.0.255"`
    ///   and `"1-0:15.8.0*255"`)
    /// - the 12 hex digit form `"01000F0800FF"`
    ///
    /// Fails with `MalformedObisCode` when fewer than six numeric components
    /// are present or one of them does not fit into a byte.
    pub fn parse(s: &str) -> DlmsResult<Self> {
        let s = s.trim();
        if s.contains(['-', ':', '.', '*']) {
            Self::parse_dotted(s)
        } else {
            Self::parse_hex(s)
        }
    }

    fn parse_dotted(s: &str) -> DlmsResult<Self> {
        let parts: Vec<&str> = s.split(['-', ':', '.', '*']).collect();
        if parts.len() != 6 {
            return Err(DlmsError::MalformedObisCode(format!(
                "expected 6 components in '{}', found {}",
                s,
                parts.len()
            )));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DlmsError::MalformedObisCode(format!(
                    "invalid component '{}' in '{}'",
                    part, s
                )));
            }
            bytes[i] = part.parse::<u8>().map_err(|_| {
                DlmsError::MalformedObisCode(format!("invalid component '{}' in '{}'", part, s))
            })?;
        }
        Ok(Self { bytes })
    }

    fn parse_hex(s: &str) -> DlmsResult<Self> {
        if s.len() != 12 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DlmsError::MalformedObisCode(format!(
                "expected 12 hex digits, got '{}'",
                s
            )));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let digits = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(digits, 16).map_err(|_| {
                DlmsError::MalformedObisCode(format!("invalid hex digits '{}' in '{}'", digits, s))
            })?;
        }
        Ok(Self { bytes })
    }

    /// Get the OBIS code as a byte array
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// Get the OBIS code as a copied byte array
    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }

    /// Format as 12 upper-case hex digits
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn a(&self) -> u8 {
        self.bytes[0]
    }

    pub fn b(&self) -> u8 {
        self.bytes[1]
    }

    pub fn c(&self) -> u8 {
        self.bytes[2]
    }

    pub fn d(&self) -> u8 {
        self.bytes[3]
    }

    pub fn e(&self) -> u8 {
        self.bytes[4]
    }

    pub fn f(&self) -> u8 {
        self.bytes[5]
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}.{}.{}.{}",
            self.bytes[0], self.bytes[1], self.bytes[2],
            self.bytes[3], self.bytes[4], self.bytes[5]
        )
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObisCode {
    type Error = DlmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObisCode> for String {
    fn from(code: ObisCode) -> Self {
        code.to_string()
    }
}
