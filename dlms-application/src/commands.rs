//! Meter commands and the request APDUs they translate to
//!
//! Both roles issue the same commands: the client sends them to a meter it
//! dialed, the gateway routes them to a meter connected to it.

use crate::pdu::{
    ActionRequest, Apdu, AttributeDescriptor, GetRequest, MethodDescriptor, SetRequest,
};
use dlms_core::{CosemDateTime, DataObject, DlmsError, DlmsResult, ObisCode};

/// Interface class ids used by the built-in commands
pub mod class {
    pub const REGISTER: u16 = 3;
    pub const PROFILE_GENERIC: u16 = 7;
    pub const CLOCK: u16 = 8;
    pub const DISCONNECT_CONTROL: u16 = 70;
}

/// Value attribute of registers, clocks and profile buffers
pub const VALUE_ATTRIBUTE: u8 = 2;

/// Disconnect control methods as numbered by the supported meters
const METHOD_RECONNECT: u8 = 1;
const METHOD_DISCONNECT: u8 = 2;

/// Value to write, encoded with the narrowest fitting DLMS type
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Unsigned(u64),
    Signed(i64),
    Text(String),
    DateTime(CosemDateTime),
    Bytes(Vec<u8>),
    Bool(bool),
    /// Explicitly typed value, sent as is
    Data(DataObject),
}

impl WriteValue {
    pub fn into_data(self) -> DataObject {
        match self {
            WriteValue::Unsigned(value) => DataObject::unsigned(value),
            WriteValue::Signed(value) if value >= 0 => DataObject::unsigned(value as u64),
            WriteValue::Signed(value) => match i32::try_from(value) {
                Ok(value) => DataObject::Integer32(value),
                Err(_) => DataObject::Integer64(value),
            },
            WriteValue::Text(text) => DataObject::VisibleString(text.into_bytes()),
            WriteValue::DateTime(value) => DataObject::DateTime(value),
            WriteValue::Bytes(bytes) => DataObject::OctetString(bytes),
            WriteValue::Bool(value) => DataObject::Boolean(value),
            WriteValue::Data(value) => value,
        }
    }
}

impl From<u64> for WriteValue {
    fn from(value: u64) -> Self {
        WriteValue::Unsigned(value)
    }
}

impl From<u32> for WriteValue {
    fn from(value: u32) -> Self {
        WriteValue::Unsigned(value as u64)
    }
}

impl From<i64> for WriteValue {
    fn from(value: i64) -> Self {
        WriteValue::Signed(value)
    }
}

impl From<i32> for WriteValue {
    fn from(value: i32) -> Self {
        WriteValue::Signed(value as i64)
    }
}

impl From<&str> for WriteValue {
    fn from(value: &str) -> Self {
        WriteValue::Text(value.to_string())
    }
}

impl From<String> for WriteValue {
    fn from(value: String) -> Self {
        WriteValue::Text(value)
    }
}

impl From<CosemDateTime> for WriteValue {
    fn from(value: CosemDateTime) -> Self {
        WriteValue::DateTime(value)
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(value: Vec<u8>) -> Self {
        WriteValue::Bytes(value)
    }
}

impl From<bool> for WriteValue {
    fn from(value: bool) -> Self {
        WriteValue::Bool(value)
    }
}

impl From<DataObject> for WriteValue {
    fn from(value: DataObject) -> Self {
        WriteValue::Data(value)
    }
}

/// Prepayment token to load into the meter
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Token code as printed on the voucher
    Code(String),
    /// Credit amount in currency units, sent in hundredths
    Amount(f64),
}

impl Token {
    fn into_data(self) -> DlmsResult<DataObject> {
        match self {
            Token::Code(code) => Ok(DataObject::VisibleString(code.into_bytes())),
            Token::Amount(amount) => {
                let cents = (amount * 100.0).round();
                if !(0.0..=u32::MAX as f64).contains(&cents) {
                    return Err(DlmsError::InvalidData(format!(
                        "token amount {} out of range",
                        amount
                    )));
                }
                Ok(DataObject::Unsigned32(cents as u32))
            }
        }
    }
}

/// Operation on one COSEM object of a meter
#[derive(Debug, Clone, PartialEq)]
pub enum MeterCommand {
    Read {
        obis: ObisCode,
        class_id: u16,
        attribute_id: u8,
    },
    Write {
        obis: ObisCode,
        class_id: u16,
        attribute_id: u8,
        value: WriteValue,
    },
    Execute {
        obis: ObisCode,
        class_id: u16,
        method_id: u8,
        parameters: Option<DataObject>,
    },
    /// Close (`connect = true`) or open the supply relay
    RelayControl { connect: bool },
    LoadToken(Token),
    ReadClock,
    SetClock(CosemDateTime),
    /// Buffer of a profile generic object
    ReadProfile { obis: ObisCode },
}

impl MeterCommand {
    pub fn read(obis: ObisCode, class_id: u16, attribute_id: u8) -> Self {
        MeterCommand::Read {
            obis,
            class_id,
            attribute_id,
        }
    }

    /// Object the command addresses
    pub fn target(&self) -> ObisCode {
        match self {
            MeterCommand::Read { obis, .. }
            | MeterCommand::Write { obis, .. }
            | MeterCommand::Execute { obis, .. }
            | MeterCommand::ReadProfile { obis } => *obis,
            MeterCommand::RelayControl { .. } => ObisCode::DISCONNECT_CONTROL,
            MeterCommand::LoadToken(_) => ObisCode::TOKEN_REGISTER,
            MeterCommand::ReadClock | MeterCommand::SetClock(_) => ObisCode::CLOCK,
        }
    }

    /// Whether the command reads a profile buffer
    pub fn is_profile_read(&self) -> bool {
        matches!(self, MeterCommand::ReadProfile { .. })
    }

    /// Request APDU for this command
    pub fn to_request(&self, invoke_id: u8) -> DlmsResult<Apdu> {
        let get = |class_id: u16, obis: ObisCode, attribute_id: u8| {
            Apdu::GetRequest(GetRequest {
                invoke_id,
                descriptor: AttributeDescriptor::new(class_id, obis, attribute_id),
            })
        };
        let set = |class_id: u16, obis: ObisCode, attribute_id: u8, value: DataObject| {
            Apdu::SetRequest(SetRequest {
                invoke_id,
                descriptor: AttributeDescriptor::new(class_id, obis, attribute_id),
                value,
            })
        };
        let action = |class_id: u16, obis: ObisCode, method_id: u8, parameters: Option<DataObject>| {
            Apdu::ActionRequest(ActionRequest {
                invoke_id,
                descriptor: MethodDescriptor::new(class_id, obis, method_id),
                parameters,
            })
        };

        let apdu = match self.clone() {
            MeterCommand::Read {
                obis,
                class_id,
                attribute_id,
            } => get(class_id, obis, attribute_id),
            MeterCommand::Write {
                obis,
                class_id,
                attribute_id,
                value,
            } => set(class_id, obis, attribute_id, value.into_data()),
            MeterCommand::Execute {
                obis,
                class_id,
                method_id,
                parameters,
            } => action(class_id, obis, method_id, parameters),
            MeterCommand::RelayControl { connect } => {
                let method = if connect { METHOD_RECONNECT } else { METHOD_DISCONNECT };
                action(
                    class::DISCONNECT_CONTROL,
                    ObisCode::DISCONNECT_CONTROL,
                    method,
                    Some(DataObject::Integer8(0)),
                )
            }
            MeterCommand::LoadToken(token) => set(
                class::REGISTER,
                ObisCode::TOKEN_REGISTER,
                VALUE_ATTRIBUTE,
                token.into_data()?,
            ),
            MeterCommand::ReadClock => get(class::CLOCK, ObisCode::CLOCK, VALUE_ATTRIBUTE),
            MeterCommand::SetClock(time) => set(
                class::CLOCK,
                ObisCode::CLOCK,
                VALUE_ATTRIBUTE,
                DataObject::DateTime(time),
            ),
            MeterCommand::ReadProfile { obis } => get(class::PROFILE_GENERIC, obis, VALUE_ATTRIBUTE),
        };
        Ok(apdu)
    }
}
