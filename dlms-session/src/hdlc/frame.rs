//! HDLC frame structure and encoding/decoding
//!
//! Wire layout of every frame built here:
//!
//! ```text
//! 7E | A0 LL | dst | src | ctrl | HCS(2) | information | FCS(2) | 7E
//! ```
//!
//! The 11-bit length `LL` counts every byte between the flags, so it is always
//! `information.len() + 9`. HCS covers format, addresses and control; FCS
//! covers everything from the format field through the information field.

use crate::hdlc::fcs::{self, crc16};
use dlms_core::{DlmsError, DlmsResult};
use std::fmt;

/// HDLC frame flag
pub const FLAG: u8 = 0x7E;

/// Frame length without information field (format, addresses, control, HCS, FCS)
pub const FRAME_OVERHEAD: usize = 9;

/// Largest length the 11-bit format field can express
pub const MAX_FRAME_LENGTH: usize = 0x07FF;

const FORMAT_TYPE_MASK: u8 = 0xF0;
const FORMAT_TYPE_3: u8 = 0xA0;
const SEGMENTATION_BIT: u16 = 0x0800;
const LENGTH_MASK: u16 = 0x07FF;

/// Logical Link Control header of a request sent to a meter
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];

/// Logical Link Control header of a response sent by a meter
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

/// Control byte values used on the wire
pub mod control {
    pub const SNRM: u8 = 0x93;
    pub const DISC: u8 = 0x53;
    pub const UA: u8 = 0x73;
    pub const INFORMATION: u8 = 0x10;
    pub const RR: u8 = 0x11;
}

/// HDLC frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information,
    ReceiveReady,
    SetNormalResponseMode,
    Disconnect,
    UnnumberedAcknowledge,
    DisconnectMode,
    FrameReject,
    Unknown,
}

impl FrameType {
    /// Get frame type from control byte
    ///
    /// The fixed codes used by this engine are matched first; other values
    /// are classified by the HDLC bit masks (poll/final bit `0x10` ignored
    /// for unnumbered frames, sequence numbers ignored for I and RR frames).
    pub fn from_control_byte(control_byte: u8) -> Self {
        match control_byte {
            control::SNRM => FrameType::SetNormalResponseMode,
            control::DISC => FrameType::Disconnect,
            control::UA => FrameType::UnnumberedAcknowledge,
            control::RR => FrameType::ReceiveReady,
            control::INFORMATION => FrameType::Information,
            x if (x & 0xEF) == 0x83 => FrameType::SetNormalResponseMode,
            x if (x & 0xEF) == 0x43 => FrameType::Disconnect,
            x if (x & 0xEF) == 0x63 => FrameType::UnnumberedAcknowledge,
            x if (x & 0xEF) == 0x0F => FrameType::DisconnectMode,
            x if (x & 0xEF) == 0x87 => FrameType::FrameReject,
            x if (x & 0x0F) == 0x01 => FrameType::ReceiveReady,
            x if (x & 0x01) == 0x00 => FrameType::Information,
            _ => FrameType::Unknown,
        }
    }

    /// Control byte this engine sends for the frame type
    pub fn control_byte(&self) -> u8 {
        match self {
            FrameType::Information => control::INFORMATION,
            FrameType::ReceiveReady => control::RR,
            FrameType::SetNormalResponseMode => control::SNRM,
            FrameType::Disconnect => control::DISC,
            FrameType::UnnumberedAcknowledge => control::UA,
            FrameType::DisconnectMode => 0x1F,
            FrameType::FrameReject => 0x97,
            FrameType::Unknown => 0xFF,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Information => "I",
            FrameType::ReceiveReady => "RR",
            FrameType::SetNormalResponseMode => "SNRM",
            FrameType::Disconnect => "DISC",
            FrameType::UnnumberedAcknowledge => "UA",
            FrameType::DisconnectMode => "DM",
            FrameType::FrameReject => "FRMR",
            FrameType::Unknown => "unknown",
        }
    }
}

/// One-byte destination and source addresses of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameAddresses {
    pub destination: u8,
    pub source: u8,
}

impl FrameAddresses {
    /// Addresses of frames the backend sends to a meter
    pub const CLIENT_TO_METER: FrameAddresses = FrameAddresses {
        destination: 0x03,
        source: 0x01,
    };

    /// Addresses of frames a meter sends to the backend
    pub const METER_TO_CLIENT: FrameAddresses = FrameAddresses {
        destination: 0x01,
        source: 0x03,
    };

    pub const fn new(destination: u8, source: u8) -> Self {
        Self {
            destination,
            source,
        }
    }

    /// Addresses for answering a frame received with these addresses
    pub const fn reply(&self) -> Self {
        Self {
            destination: self.source,
            source: self.destination,
        }
    }
}

/// Result of trying to parse one frame from the front of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete, checksum-valid frame
    Frame(HdlcFrame),
    /// The buffer holds the start of a frame; wait for more bytes
    NeedMore,
    /// Bytes before a start flag (or with no flag at all) were skipped
    Garbage,
    /// A complete frame was found but failed validation
    Corrupt(DlmsError),
}

/// HDLC frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    addresses: FrameAddresses,
    control: u8,
    segmented: bool,
    information: Vec<u8>,
}

impl HdlcFrame {
    pub fn new(addresses: FrameAddresses, control: u8, information: Vec<u8>) -> Self {
        Self {
            addresses,
            control,
            segmented: false,
            information,
        }
    }

    /// Information frame carrying an APDU
    pub fn information(addresses: FrameAddresses, payload: Vec<u8>) -> Self {
        Self::new(addresses, control::INFORMATION, payload)
    }

    /// SNRM, optionally carrying proposed link parameters
    pub fn snrm(addresses: FrameAddresses, parameters: Vec<u8>) -> Self {
        Self::new(addresses, control::SNRM, parameters)
    }

    /// UA, optionally carrying the accepted link parameters
    pub fn ua(addresses: FrameAddresses, parameters: Vec<u8>) -> Self {
        Self::new(addresses, control::UA, parameters)
    }

    pub fn disc(addresses: FrameAddresses) -> Self {
        Self::new(addresses, control::DISC, Vec::new())
    }

    pub fn receive_ready(addresses: FrameAddresses) -> Self {
        Self::new(addresses, control::RR, Vec::new())
    }

    pub fn frame_type(&self) -> FrameType {
        FrameType::from_control_byte(self.control)
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn addresses(&self) -> FrameAddresses {
        self.addresses
    }

    pub fn is_segmented(&self) -> bool {
        self.segmented
    }

    /// Raw information field
    pub fn information_field(&self) -> &[u8] {
        &self.information
    }

    /// APDU carried by the frame with any LLC header removed
    pub fn apdu(&self) -> &[u8] {
        let info = self.information.as_slice();
        if info.starts_with(&LLC_REQUEST) || info.starts_with(&LLC_RESPONSE) {
            &info[LLC_REQUEST.len()..]
        } else {
            info
        }
    }

    /// Length declared in the format field
    pub fn length(&self) -> usize {
        self.information.len() + FRAME_OVERHEAD
    }

    /// Encode frame to bytes, flags included
    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let length = self.length();
        if length > MAX_FRAME_LENGTH {
            return Err(DlmsError::FrameInvalid(format!(
                "information field of {} bytes does not fit into one frame",
                self.information.len()
            )));
        }

        let format = 0xA000u16 | length as u16;
        let mut out = Vec::with_capacity(length + 2);
        out.push(FLAG);
        out.extend_from_slice(&format.to_be_bytes());
        out.push(self.addresses.destination);
        out.push(self.addresses.source);
        out.push(self.control);
        let hcs = crc16(&out[1..]);
        out.extend_from_slice(&hcs);
        out.extend_from_slice(&self.information);
        let fcs = crc16(&out[1..]);
        out.extend_from_slice(&fcs);
        out.push(FLAG);
        Ok(out)
    }

    /// Parse one frame from the front of `buffer`
    ///
    /// Returns what was found together with the number of bytes the caller
    /// must drop from the front of the buffer. A zero count always comes with
    /// [`Decoded::NeedMore`].
    pub fn parse(buffer: &[u8]) -> (Decoded, usize) {
        let Some(start) = buffer.iter().position(|&b| b == FLAG) else {
            return (Decoded::Garbage, buffer.len());
        };
        if start > 0 {
            return (Decoded::Garbage, start);
        }
        if buffer.len() < 3 {
            return (Decoded::NeedMore, 0);
        }
        if buffer[1] & FORMAT_TYPE_MASK != FORMAT_TYPE_3 {
            // Closing flag of a previous frame or a stray 0x7E; resync on the next one
            return (Decoded::Garbage, 1);
        }

        let format = u16::from_be_bytes([buffer[1], buffer[2]]);
        let length = (format & LENGTH_MASK) as usize;
        if length != 7 && length < FRAME_OVERHEAD {
            return (
                Decoded::Corrupt(DlmsError::FrameInvalid(format!("declared length {} too short", length))),
                1,
            );
        }

        let total = length + 2;
        if buffer.len() < total {
            return (Decoded::NeedMore, 0);
        }
        if buffer[total - 1] != FLAG {
            return (Decoded::Corrupt(DlmsError::MissingEndFlag), total);
        }

        let body = &buffer[1..total - 1];
        match Self::decode_body(body, format & SEGMENTATION_BIT != 0) {
            Ok(frame) => (Decoded::Frame(frame), total),
            Err(err) => (Decoded::Corrupt(err), total),
        }
    }

    /// Decode the bytes between the flags
    fn decode_body(body: &[u8], segmented: bool) -> DlmsResult<Self> {
        let (header, rest) = body.split_at(5);
        let addresses = FrameAddresses::new(header[2], header[3]);
        let control = header[4];

        // Bare control frame from a meter: no information field, no separate HCS
        if rest.len() == 2 {
            fcs::check(header, rest)?;
            return Ok(Self {
                addresses,
                control,
                segmented,
                information: Vec::new(),
            });
        }

        fcs::check(header, &rest[..2])?;
        let fcs_start = body.len() - 2;
        fcs::check(&body[..fcs_start], &body[fcs_start..])?;

        Ok(Self {
            addresses,
            control,
            segmented,
            information: body[7..fcs_start].to_vec(),
        })
    }
}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HDLC {} frame: dst=0x{:02X}, src=0x{:02X}, ctrl=0x{:02X}, info={} byte(s)",
            self.frame_type().as_str(),
            self.addresses.destination,
            self.addresses.source,
            self.control,
            self.information.len()
        )
    }
}
