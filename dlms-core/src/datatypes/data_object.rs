//! Typed DLMS values

use crate::datatypes::cosem_date_time::CosemDateTime;
use crate::datatypes::scaler_unit::Reading;
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value exchanged with a meter
///
/// Closed over the DLMS data types this engine supports. Tags it does not
/// recognise decode to `Unknown` with the undecoded bytes attached, so the
/// surrounding APDU can still be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataObject {
    Null,
    Boolean(bool),
    /// Bit string with its length in bits
    BitString { bits: usize, bytes: Vec<u8> },
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Float32(f32),
    Float64(f64),
    Enumerate(u8),
    Bcd(u8),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    Utf8String(Vec<u8>),
    Array(Vec<DataObject>),
    Structure(Vec<DataObject>),
    /// COSEM date (year, month, day, weekday)
    Date([u8; 5]),
    /// COSEM time (hour, minute, second, hundredths)
    Time([u8; 4]),
    DateTime(CosemDateTime),
    /// Value lifted from a `(value, (scaler, unit))` structure
    Reading(Reading),
    /// Unrecognised type tag with the bytes that followed it
    Unknown { tag: u8, raw: Vec<u8> },
}

/// Type enumeration for DataObject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataObjectType {
    NullData,
    Boolean,
    BitString,
    Integer,
    Long,
    DoubleLong,
    Long64,
    Unsigned,
    LongUnsigned,
    DoubleLongUnsigned,
    Long64Unsigned,
    Float32,
    Float64,
    Enumerate,
    Bcd,
    OctetString,
    VisibleString,
    Utf8String,
    Array,
    Structure,
    Date,
    Time,
    DateTime,
    Reading,
    Unknown,
}

impl DataObject {
    /// Get the type of this DataObject
    pub fn get_type(&self) -> DataObjectType {
        match self {
            DataObject::Null => DataObjectType::NullData,
            DataObject::Boolean(_) => DataObjectType::Boolean,
            DataObject::BitString { .. } => DataObjectType::BitString,
            DataObject::Integer8(_) => DataObjectType::Integer,
            DataObject::Integer16(_) => DataObjectType::Long,
            DataObject::Integer32(_) => DataObjectType::DoubleLong,
            DataObject::Integer64(_) => DataObjectType::Long64,
            DataObject::Unsigned8(_) => DataObjectType::Unsigned,
            DataObject::Unsigned16(_) => DataObjectType::LongUnsigned,
            DataObject::Unsigned32(_) => DataObjectType::DoubleLongUnsigned,
            DataObject::Unsigned64(_) => DataObjectType::Long64Unsigned,
            DataObject::Float32(_) => DataObjectType::Float32,
            DataObject::Float64(_) => DataObjectType::Float64,
            DataObject::Enumerate(_) => DataObjectType::Enumerate,
            DataObject::Bcd(_) => DataObjectType::Bcd,
            DataObject::OctetString(_) => DataObjectType::OctetString,
            DataObject::VisibleString(_) => DataObjectType::VisibleString,
            DataObject::Utf8String(_) => DataObjectType::Utf8String,
            DataObject::Array(_) => DataObjectType::Array,
            DataObject::Structure(_) => DataObjectType::Structure,
            DataObject::Date(_) => DataObjectType::Date,
            DataObject::Time(_) => DataObjectType::Time,
            DataObject::DateTime(_) => DataObjectType::DateTime,
            DataObject::Reading(_) => DataObjectType::Reading,
            DataObject::Unknown { .. } => DataObjectType::Unknown,
        }
    }

    /// Visible string from text
    pub fn visible_string(text: &str) -> Self {
        DataObject::VisibleString(text.as_bytes().to_vec())
    }

    /// Smallest unsigned type able to hold `value`
    pub fn unsigned(value: u64) -> Self {
        if value <= u8::MAX as u64 {
            DataObject::Unsigned8(value as u8)
        } else if value <= u16::MAX as u64 {
            DataObject::Unsigned16(value as u16)
        } else if value <= u32::MAX as u64 {
            DataObject::Unsigned32(value as u32)
        } else {
            DataObject::Unsigned64(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataObject::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DataObject::Unknown { .. })
    }

    /// Numeric view of integer, float, enum and reading values
    ///
    /// For a `Reading` this is the scaled value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataObject::Integer8(v) => Some(*v as f64),
            DataObject::Integer16(v) => Some(*v as f64),
            DataObject::Integer32(v) => Some(*v as f64),
            DataObject::Integer64(v) => Some(*v as f64),
            DataObject::Unsigned8(v) => Some(*v as f64),
            DataObject::Unsigned16(v) => Some(*v as f64),
            DataObject::Unsigned32(v) => Some(*v as f64),
            DataObject::Unsigned64(v) => Some(*v as f64),
            DataObject::Float32(v) => Some(*v as f64),
            DataObject::Float64(v) => Some(*v),
            DataObject::Enumerate(v) | DataObject::Bcd(v) => Some(*v as f64),
            DataObject::Reading(reading) => reading.actual_value(),
            _ => None,
        }
    }

    /// Integer view of integral values
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataObject::Integer8(v) => Some(*v as i64),
            DataObject::Integer16(v) => Some(*v as i64),
            DataObject::Integer32(v) => Some(*v as i64),
            DataObject::Integer64(v) => Some(*v),
            DataObject::Unsigned8(v) | DataObject::Enumerate(v) | DataObject::Bcd(v) => Some(*v as i64),
            DataObject::Unsigned16(v) => Some(*v as i64),
            DataObject::Unsigned32(v) => Some(*v as i64),
            DataObject::Unsigned64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Text view of visible and UTF-8 strings
    pub fn as_text(&self) -> Option<String> {
        match self {
            DataObject::VisibleString(bytes) | DataObject::Utf8String(bytes) => {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> DlmsResult<bool> {
        match self {
            DataObject::Boolean(b) => Ok(*b),
            _ => Err(DlmsError::InvalidData(format!(
                "Expected Boolean, got {:?}",
                self.get_type()
            ))),
        }
    }

    pub fn as_octet_string(&self) -> DlmsResult<&[u8]> {
        match self {
            DataObject::OctetString(s) => Ok(s),
            _ => Err(DlmsError::InvalidData(format!(
                "Expected OctetString, got {:?}",
                self.get_type()
            ))),
        }
    }

    pub fn as_structure(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Structure(s) => Ok(s),
            _ => Err(DlmsError::InvalidData(format!(
                "Expected Structure, got {:?}",
                self.get_type()
            ))),
        }
    }

    pub fn as_array(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Array(a) => Ok(a),
            _ => Err(DlmsError::InvalidData(format!(
                "Expected Array, got {:?}",
                self.get_type()
            ))),
        }
    }

    /// Date-time carried either natively or as a 12-byte octet string
    ///
    /// Clock objects commonly return their time as an octet string.
    pub fn as_date_time(&self) -> DlmsResult<CosemDateTime> {
        match self {
            DataObject::DateTime(dt) => Ok(*dt),
            DataObject::OctetString(bytes) if bytes.len() == CosemDateTime::LENGTH => {
                CosemDateTime::decode(bytes)
            }
            _ => Err(DlmsError::InvalidData(format!(
                "Expected DateTime, got {:?}",
                self.get_type()
            ))),
        }
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Null => write!(f, "null"),
            DataObject::Boolean(b) => write!(f, "{}", b),
            DataObject::BitString { bits, bytes } => {
                for i in 0..*bits {
                    let set = bytes.get(i / 8).map(|b| b & (0x80 >> (i % 8)) != 0).unwrap_or(false);
                    write!(f, "{}", if set { '1' } else { '0' })?;
                }
                Ok(())
            }
            DataObject::Integer8(v) => write!(f, "{}", v),
            DataObject::Integer16(v) => write!(f, "{}", v),
            DataObject::Integer32(v) => write!(f, "{}", v),
            DataObject::Integer64(v) => write!(f, "{}", v),
            DataObject::Unsigned8(v) | DataObject::Enumerate(v) | DataObject::Bcd(v) => write!(f, "{}", v),
            DataObject::Unsigned16(v) => write!(f, "{}", v),
            DataObject::Unsigned32(v) => write!(f, "{}", v),
            DataObject::Unsigned64(v) => write!(f, "{}", v),
            DataObject::Float32(v) => write!(f, "{}", v),
            DataObject::Float64(v) => write!(f, "{}", v),
            DataObject::OctetString(bytes) => {
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            DataObject::VisibleString(s) | DataObject::Utf8String(s) => {
                write!(f, "{}", String::from_utf8_lossy(s))
            }
            DataObject::Array(items) | DataObject::Structure(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            DataObject::Date(d) => write!(f, "{:04}-{:02}-{:02}", u16::from_be_bytes([d[0], d[1]]), d[2], d[3]),
            DataObject::Time(t) => write!(f, "{:02}:{:02}:{:02}", t[0], t[1], t[2]),
            DataObject::DateTime(dt) => write!(f, "{}", dt),
            DataObject::Reading(reading) => write!(f, "{}", reading),
            DataObject::Unknown { tag, raw } => write!(f, "unknown(0x{:02X}, {} bytes)", tag, raw.len()),
        }
    }
}
