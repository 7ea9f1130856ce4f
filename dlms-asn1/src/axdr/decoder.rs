//! A-XDR decoder for DLMS/COSEM

use crate::axdr::types::{decode_length, AxdrTag};
use dlms_core::datatypes::{CosemDateTime, DataObject, Reading, ScalerUnit};
use dlms_core::{DlmsError, DlmsResult};

/// A-XDR decoder reading typed values from a byte slice
pub struct AxdrDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> AxdrDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Decode one value and lift a `(value, (scaler, unit))` structure into a
    /// [`Reading`]
    ///
    /// Used for the data of GET responses, where register objects report their
    /// value together with its scaler and unit.
    pub fn decode_response_value(&mut self) -> DlmsResult<DataObject> {
        let value = self.decode_data_object()?;
        Ok(lift_reading(value))
    }

    /// Decode a DataObject
    ///
    /// An unrecognised type tag is not an error: the tag and every byte after
    /// it are returned as [`DataObject::Unknown`] since their length cannot be
    /// known.
    pub fn decode_data_object(&mut self) -> DlmsResult<DataObject> {
        let raw_tag = self.read_byte()?;
        let Some(tag) = AxdrTag::from_u8(raw_tag) else {
            let raw = self.buffer[self.position..].to_vec();
            self.position = self.buffer.len();
            log::warn!(
                "{}; {} trailing byte(s) kept undecoded",
                DlmsError::UnknownDataTypeTag(raw_tag),
                raw.len()
            );
            return Ok(DataObject::Unknown { tag: raw_tag, raw });
        };

        let value = match tag {
            AxdrTag::Null => DataObject::Null,
            AxdrTag::Boolean => DataObject::Boolean(self.read_byte()? != 0x00),
            AxdrTag::Integer8 => DataObject::Integer8(self.read_byte()? as i8),
            AxdrTag::Integer16 => DataObject::Integer16(i16::from_be_bytes(self.read_array()?)),
            AxdrTag::Integer32 => DataObject::Integer32(i32::from_be_bytes(self.read_array()?)),
            AxdrTag::Integer64 => DataObject::Integer64(i64::from_be_bytes(self.read_array()?)),
            AxdrTag::Unsigned8 => DataObject::Unsigned8(self.read_byte()?),
            AxdrTag::Unsigned16 => DataObject::Unsigned16(u16::from_be_bytes(self.read_array()?)),
            AxdrTag::Unsigned32 => DataObject::Unsigned32(u32::from_be_bytes(self.read_array()?)),
            AxdrTag::Unsigned64 => DataObject::Unsigned64(u64::from_be_bytes(self.read_array()?)),
            AxdrTag::Float32 => DataObject::Float32(f32::from_bits(u32::from_be_bytes(self.read_array()?))),
            AxdrTag::Float64 => DataObject::Float64(f64::from_bits(u64::from_be_bytes(self.read_array()?))),
            AxdrTag::Enumerate => DataObject::Enumerate(self.read_byte()?),
            AxdrTag::Bcd => DataObject::Bcd(self.read_byte()?),
            AxdrTag::OctetString => DataObject::OctetString(self.decode_octet_string()?),
            AxdrTag::VisibleString => DataObject::VisibleString(self.decode_octet_string()?),
            AxdrTag::Utf8String => DataObject::Utf8String(self.decode_octet_string()?),
            AxdrTag::BitString => {
                let bits = self.decode_length()?;
                let bytes = self.decode_fixed_bytes(bits.div_ceil(8))?;
                DataObject::BitString { bits, bytes }
            }
            AxdrTag::Array => DataObject::Array(self.decode_sequence()?),
            AxdrTag::Structure => DataObject::Structure(self.decode_sequence()?),
            AxdrTag::Date => DataObject::Date(self.read_array()?),
            AxdrTag::Time => DataObject::Time(self.read_array()?),
            AxdrTag::DateTime => {
                let len = self.decode_length()?;
                if len != CosemDateTime::LENGTH {
                    return Err(DlmsError::InvalidData(format!(
                        "date-time length must be {}, got {}",
                        CosemDateTime::LENGTH,
                        len
                    )));
                }
                DataObject::DateTime(CosemDateTime::decode(&self.decode_fixed_bytes(len)?)?)
            }
        };
        Ok(value)
    }

    /// Decode the elements of an array or structure
    ///
    /// Decoding stops after an `Unknown` element, which has consumed the rest
    /// of the input.
    fn decode_sequence(&mut self) -> DlmsResult<Vec<DataObject>> {
        let count = self.decode_length()?;
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            let item = self.decode_data_object()?;
            let stop = item.is_unknown();
            items.push(item);
            if stop {
                break;
            }
        }
        Ok(items)
    }

    pub fn decode_length(&mut self) -> DlmsResult<usize> {
        let (len, consumed) = decode_length(&self.buffer[self.position..])?;
        self.position += consumed;
        Ok(len)
    }

    pub fn decode_octet_string(&mut self) -> DlmsResult<Vec<u8>> {
        let len = self.decode_length()?;
        self.decode_fixed_bytes(len)
    }

    /// Decode fixed-length bytes
    pub fn decode_fixed_bytes(&mut self, len: usize) -> DlmsResult<Vec<u8>> {
        if len > self.remaining() {
            return Err(DlmsError::InvalidData(format!(
                "Not enough bytes: need {}, have {}",
                len,
                self.remaining()
            )));
        }

        let result = self.buffer[self.position..self.position + len].to_vec();
        self.position += len;
        Ok(result)
    }

    fn read_array<const N: usize>(&mut self) -> DlmsResult<[u8; N]> {
        let bytes = self.decode_fixed_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Read a single byte
    pub fn read_byte(&mut self) -> DlmsResult<u8> {
        let byte = *self
            .buffer
            .get(self.position)
            .ok_or_else(|| DlmsError::InvalidData("Not enough bytes".to_string()))?;
        self.position += 1;
        Ok(byte)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// Interpret a two-element structure whose second element is a
/// `(scaler, unit)` structure as a scaled reading
fn lift_reading(value: DataObject) -> DataObject {
    match scaled_parts(&value) {
        Some((raw, scaler_unit)) => DataObject::Reading(Reading::new(raw, scaler_unit)),
        None => value,
    }
}

fn scaled_parts(value: &DataObject) -> Option<(DataObject, ScalerUnit)> {
    let DataObject::Structure(items) = value else {
        return None;
    };
    let [raw, DataObject::Structure(scaler_unit)] = items.as_slice() else {
        return None;
    };
    let [scaler, unit] = scaler_unit.as_slice() else {
        return None;
    };

    let scaler = match scaler {
        DataObject::Integer8(s) => *s as u8,
        DataObject::Unsigned8(s) | DataObject::Enumerate(s) => *s,
        _ => return None,
    };
    let unit = match unit {
        DataObject::Enumerate(u) | DataObject::Unsigned8(u) => *u,
        _ => return None,
    };
    Some((raw.clone(), ScalerUnit::from_raw(scaler, unit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axdr::AxdrEncoder;

    fn decode(bytes: &[u8]) -> DataObject {
        AxdrDecoder::new(bytes).decode_data_object().unwrap()
    }

    #[test]
    fn test_decode_primitives() {
        assert_eq!(decode(&[0x03, 0xFF]), DataObject::Boolean(true));
        assert_eq!(decode(&[0x05, 0xFF, 0xFF, 0xFF, 0xFE]), DataObject::Integer32(-2));
        assert_eq!(decode(&[0x12, 0x08, 0xFC]), DataObject::Unsigned16(2300));
        assert_eq!(decode(&[0x0A, 0x03, b'a', b'b', b'c']), DataObject::visible_string("abc"));
    }

    #[test]
    fn test_round_trip_nested() {
        let dt = CosemDateTime::new(2023, 12, 31, 23, 59, 59, 120, &[]).unwrap();
        let value = DataObject::Array(vec![
            DataObject::Structure(vec![
                DataObject::DateTime(dt),
                DataObject::Unsigned32(123_456),
                DataObject::Integer64(-9),
            ]),
            DataObject::Structure(vec![
                DataObject::Float64(1.5),
                DataObject::BitString { bits: 10, bytes: vec![0xFF, 0xC0] },
                DataObject::Null,
            ]),
        ]);
        let encoded = AxdrEncoder::encode(&value);
        let mut decoder = AxdrDecoder::new(&encoded);
        assert_eq!(decoder.decode_data_object().unwrap(), value);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_long_form_length_accepted() {
        let mut bytes = vec![0x09, 0x82, 0x00, 0x03];
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode(&bytes), DataObject::OctetString(vec![1, 2, 3]));
    }

    #[test]
    fn test_scaler_unit_lifted() {
        let bytes = [0x02, 0x02, 0x12, 0x08, 0xFC, 0x02, 0x02, 0x0F, 0xFF, 0x16, 0x23];
        let value = AxdrDecoder::new(&bytes).decode_response_value().unwrap();
        let DataObject::Reading(reading) = value else {
            panic!("expected reading, got {:?}", value);
        };
        assert_eq!(reading.scaler_unit, ScalerUnit::new(-1, 35));
        assert!((reading.actual_value().unwrap() - 230.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsigned_scaler_reinterpreted() {
        let bytes = [0x02, 0x02, 0x06, 0x00, 0x00, 0x30, 0x39, 0x02, 0x02, 0x11, 0xFE, 0x16, 0x1E];
        let value = AxdrDecoder::new(&bytes).decode_response_value().unwrap();
        assert!((value.as_f64().unwrap() - 123.45).abs() < 1e-9);
    }

    #[test]
    fn test_plain_structure_not_lifted() {
        let bytes = [0x02, 0x02, 0x11, 0x01, 0x11, 0x02];
        let value = AxdrDecoder::new(&bytes).decode_response_value().unwrap();
        assert_eq!(value, DataObject::Structure(vec![DataObject::Unsigned8(1), DataObject::Unsigned8(2)]));
    }

    #[test]
    fn test_unknown_tag_tolerated() {
        assert_eq!(
            decode(&[0x7F, 0x01, 0x02]),
            DataObject::Unknown { tag: 0x7F, raw: vec![0x01, 0x02] }
        );

        let nested = [0x02, 0x03, 0x11, 0x07, 0x30, 0xAA, 0x11, 0x08];
        assert_eq!(
            decode(&nested),
            DataObject::Structure(vec![
                DataObject::Unsigned8(7),
                DataObject::Unknown { tag: 0x30, raw: vec![0xAA, 0x11, 0x08] },
            ])
        );
    }

    #[test]
    fn test_truncated_is_error() {
        assert!(AxdrDecoder::new(&[0x06, 0x00, 0x01]).decode_data_object().is_err());
        assert!(AxdrDecoder::new(&[0x19, 0x0C, 0x07]).decode_data_object().is_err());
        assert!(AxdrDecoder::new(&[]).decode_data_object().is_err());
    }
}
