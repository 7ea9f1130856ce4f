//! HDLC link parameters carried by SNRM and UA frames
//!
//! Information field layout: format identifier `0x81`, group identifier
//! `0x80`, group length, then `id len value` triples:
//!
//! | id   | parameter                           |
//! |------|-------------------------------------|
//! | 0x05 | maximum information field length tx |
//! | 0x06 | maximum information field length rx |
//! | 0x07 | window size tx                      |
//! | 0x08 | window size rx                      |

use dlms_core::{DlmsError, DlmsResult};

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;
const MAX_INFO_TX: u8 = 0x05;
const MAX_INFO_RX: u8 = 0x06;
const WINDOW_TX: u8 = 0x07;
const WINDOW_RX: u8 = 0x08;

/// Link parameters, always from the point of view of the side that sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParameters {
    pub max_information_field_length_tx: u16,
    pub max_information_field_length_rx: u16,
    pub window_size_tx: u8,
    pub window_size_rx: u8,
}

impl Default for LinkParameters {
    /// HDLC defaults assumed when a frame carries no parameters
    fn default() -> Self {
        Self {
            max_information_field_length_tx: 128,
            max_information_field_length_rx: 128,
            window_size_tx: 1,
            window_size_rx: 1,
        }
    }
}

impl LinkParameters {
    /// Parameters proposed by this engine in SNRM and accepted in UA
    pub fn proposal() -> Self {
        Self {
            max_information_field_length_tx: 2048,
            max_information_field_length_rx: 2048,
            window_size_tx: 1,
            window_size_rx: 1,
        }
    }

    /// Combine local limits with the peer's parameters
    ///
    /// What we may send is bounded by what the peer can receive and the
    /// other way round.
    pub fn negotiate(&self, peer: &LinkParameters) -> LinkParameters {
        LinkParameters {
            max_information_field_length_tx: self
                .max_information_field_length_tx
                .min(peer.max_information_field_length_rx),
            max_information_field_length_rx: self
                .max_information_field_length_rx
                .min(peer.max_information_field_length_tx),
            window_size_tx: self.window_size_tx.min(peer.window_size_rx),
            window_size_rx: self.window_size_rx.min(peer.window_size_tx),
        }
    }

    /// Encode into an SNRM/UA information field
    pub fn encode(&self) -> Vec<u8> {
        let mut group = Vec::with_capacity(20);
        push_length(&mut group, MAX_INFO_TX, self.max_information_field_length_tx);
        push_length(&mut group, MAX_INFO_RX, self.max_information_field_length_rx);
        group.extend_from_slice(&[WINDOW_TX, 4]);
        group.extend_from_slice(&(self.window_size_tx as u32).to_be_bytes());
        group.extend_from_slice(&[WINDOW_RX, 4]);
        group.extend_from_slice(&(self.window_size_rx as u32).to_be_bytes());

        let mut out = Vec::with_capacity(group.len() + 3);
        out.extend_from_slice(&[FORMAT_IDENTIFIER, GROUP_IDENTIFIER, group.len() as u8]);
        out.extend_from_slice(&group);
        out
    }

    /// Decode an SNRM/UA information field
    ///
    /// An empty field yields the defaults; parameters that are absent keep
    /// their default value and unknown parameter ids are skipped.
    pub fn decode(info: &[u8]) -> DlmsResult<Self> {
        let mut params = Self::default();
        if info.is_empty() {
            return Ok(params);
        }
        if info.len() < 3 || info[0] != FORMAT_IDENTIFIER || info[1] != GROUP_IDENTIFIER {
            return Err(DlmsError::InvalidData(format!(
                "invalid link parameter header: {:02X?}",
                &info[..info.len().min(3)]
            )));
        }

        let group_len = info[2] as usize;
        let group = info.get(3..3 + group_len).ok_or_else(|| {
            DlmsError::InvalidData(format!(
                "link parameter group declares {} bytes, {} present",
                group_len,
                info.len() - 3
            ))
        })?;

        let mut pos = 0;
        while pos + 2 <= group.len() {
            let id = group[pos];
            let len = group[pos + 1] as usize;
            let value = group.get(pos + 2..pos + 2 + len).ok_or_else(|| {
                DlmsError::InvalidData(format!("link parameter 0x{:02X} truncated", id))
            })?;
            if len > 4 {
                return Err(DlmsError::InvalidData(format!(
                    "link parameter 0x{:02X} has unsupported length {}",
                    id, len
                )));
            }
            let value = value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
            match id {
                MAX_INFO_TX => params.max_information_field_length_tx = clamp_u16(value),
                MAX_INFO_RX => params.max_information_field_length_rx = clamp_u16(value),
                WINDOW_TX => params.window_size_tx = value.clamp(1, 7) as u8,
                WINDOW_RX => params.window_size_rx = value.clamp(1, 7) as u8,
                other => log::debug!("skipping unknown link parameter 0x{:02X}", other),
            }
            pos += 2 + len;
        }
        Ok(params)
    }
}

fn push_length(out: &mut Vec<u8>, id: u8, value: u16) {
    if value <= u8::MAX as u16 {
        out.extend_from_slice(&[id, 1, value as u8]);
    } else {
        out.extend_from_slice(&[id, 2]);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}
