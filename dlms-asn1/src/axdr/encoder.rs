//! A-XDR encoder for DLMS/COSEM

use crate::axdr::types::{encode_length, AxdrTag};
use dlms_core::datatypes::{CosemDateTime, DataObject};

/// A-XDR encoder writing typed values into a growing buffer
#[derive(Debug, Default)]
pub struct AxdrEncoder {
    buffer: Vec<u8>,
}

impl AxdrEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a single value into a fresh buffer
    pub fn encode(obj: &DataObject) -> Vec<u8> {
        let mut encoder = Self::new();
        encoder.encode_data_object(obj);
        encoder.into_bytes()
    }

    /// Encode a DataObject with its type tag
    pub fn encode_data_object(&mut self, obj: &DataObject) {
        match obj {
            DataObject::Null => self.encode_tag(AxdrTag::Null),
            DataObject::Boolean(b) => {
                self.encode_tag(AxdrTag::Boolean);
                self.buffer.push(if *b { 0xFF } else { 0x00 });
            }
            DataObject::BitString { bits, bytes } => {
                self.encode_tag(AxdrTag::BitString);
                encode_length(*bits, &mut self.buffer);
                let needed = bits.div_ceil(8);
                self.buffer.extend(bytes.iter().copied().chain(std::iter::repeat(0)).take(needed));
            }
            DataObject::Integer8(v) => self.encode_fixed(AxdrTag::Integer8, &v.to_be_bytes()),
            DataObject::Integer16(v) => self.encode_fixed(AxdrTag::Integer16, &v.to_be_bytes()),
            DataObject::Integer32(v) => self.encode_fixed(AxdrTag::Integer32, &v.to_be_bytes()),
            DataObject::Integer64(v) => self.encode_fixed(AxdrTag::Integer64, &v.to_be_bytes()),
            DataObject::Unsigned8(v) => self.encode_fixed(AxdrTag::Unsigned8, &[*v]),
            DataObject::Unsigned16(v) => self.encode_fixed(AxdrTag::Unsigned16, &v.to_be_bytes()),
            DataObject::Unsigned32(v) => self.encode_fixed(AxdrTag::Unsigned32, &v.to_be_bytes()),
            DataObject::Unsigned64(v) => self.encode_fixed(AxdrTag::Unsigned64, &v.to_be_bytes()),
            DataObject::Float32(v) => self.encode_fixed(AxdrTag::Float32, &v.to_bits().to_be_bytes()),
            DataObject::Float64(v) => self.encode_fixed(AxdrTag::Float64, &v.to_bits().to_be_bytes()),
            DataObject::Enumerate(v) => self.encode_fixed(AxdrTag::Enumerate, &[*v]),
            DataObject::Bcd(v) => self.encode_fixed(AxdrTag::Bcd, &[*v]),
            DataObject::OctetString(bytes) => self.encode_string(AxdrTag::OctetString, bytes),
            DataObject::VisibleString(bytes) => self.encode_string(AxdrTag::VisibleString, bytes),
            DataObject::Utf8String(bytes) => self.encode_string(AxdrTag::Utf8String, bytes),
            DataObject::Array(items) => self.encode_sequence(AxdrTag::Array, items),
            DataObject::Structure(items) => self.encode_sequence(AxdrTag::Structure, items),
            DataObject::Date(bytes) => self.encode_fixed(AxdrTag::Date, bytes),
            DataObject::Time(bytes) => self.encode_fixed(AxdrTag::Time, bytes),
            DataObject::DateTime(dt) => self.encode_date_time(dt),
            DataObject::Reading(reading) => {
                self.encode_tag(AxdrTag::Structure);
                self.buffer.push(2);
                self.encode_data_object(&reading.value);
                self.encode_tag(AxdrTag::Structure);
                self.buffer.push(2);
                self.encode_fixed(AxdrTag::Integer8, &reading.scaler_unit.scaler.to_be_bytes());
                self.encode_fixed(AxdrTag::Enumerate, &[reading.scaler_unit.unit]);
            }
            DataObject::Unknown { tag, raw } => {
                self.buffer.push(*tag);
                self.buffer.extend_from_slice(raw);
            }
        }
    }

    /// Encode a date-time as tag, length 12 and the 12 content octets
    pub fn encode_date_time(&mut self, dt: &CosemDateTime) {
        self.encode_tag(AxdrTag::DateTime);
        self.buffer.push(CosemDateTime::LENGTH as u8);
        self.buffer.extend_from_slice(&dt.encode());
    }

    pub fn encode_tag(&mut self, tag: AxdrTag) {
        self.buffer.push(tag.to_u8());
    }

    fn encode_fixed(&mut self, tag: AxdrTag, bytes: &[u8]) {
        self.encode_tag(tag);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_string(&mut self, tag: AxdrTag, bytes: &[u8]) {
        self.encode_tag(tag);
        encode_length(bytes.len(), &mut self.buffer);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_sequence(&mut self, tag: AxdrTag, items: &[DataObject]) {
        self.encode_tag(tag);
        encode_length(items.len(), &mut self.buffer);
        for item in items {
            self.encode_data_object(item);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_core::datatypes::{Reading, ScalerUnit};

    #[test]
    fn test_encode_primitives() {
        assert_eq!(AxdrEncoder::encode(&DataObject::Unsigned8(5)), vec![0x11, 0x05]);
        assert_eq!(AxdrEncoder::encode(&DataObject::Unsigned16(2300)), vec![0x12, 0x08, 0xFC]);
        assert_eq!(
            AxdrEncoder::encode(&DataObject::Unsigned32(0x01020304)),
            vec![0x06, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(AxdrEncoder::encode(&DataObject::Boolean(true)), vec![0x03, 0xFF]);
        assert_eq!(AxdrEncoder::encode(&DataObject::Integer8(-1)), vec![0x0F, 0xFF]);
    }

    #[test]
    fn test_encode_strings() {
        assert_eq!(
            AxdrEncoder::encode(&DataObject::visible_string("AB")),
            vec![0x0A, 0x02, b'A', b'B']
        );
        let long = DataObject::OctetString(vec![0xAA; 130]);
        let encoded = AxdrEncoder::encode(&long);
        assert_eq!(&encoded[..3], &[0x09, 0x81, 130]);
        assert_eq!(encoded.len(), 133);
    }

    #[test]
    fn test_encode_date_time() {
        let dt = CosemDateTime::new(2024, 1, 15, 14, 30, 45, -60, &[]).unwrap();
        let encoded = AxdrEncoder::encode(&DataObject::DateTime(dt));
        assert_eq!(
            encoded,
            vec![0x19, 0x0C, 0x07, 0xE8, 0x01, 0x0F, 0x01, 0x0E, 0x1E, 0x2D, 0xFF, 0xFF, 0xC4, 0x00]
        );
    }

    #[test]
    fn test_encode_reading_as_structure() {
        let reading = Reading::new(DataObject::Unsigned16(2300), ScalerUnit::new(-1, 35));
        assert_eq!(
            AxdrEncoder::encode(&DataObject::Reading(reading)),
            vec![0x02, 0x02, 0x12, 0x08, 0xFC, 0x02, 0x02, 0x0F, 0xFF, 0x16, 0x23]
        );
    }
}
