//! CRC-16/X-25 for the HDLC header (HCS) and frame (FCS) check sequences

use dlms_core::{DlmsError, DlmsResult};

/// FCS calculation constants
const INITIAL_FCS: u16 = 0xFFFF;
const GOOD_FCS: u16 = 0xF0B8;
const KEY: u16 = 0x8408; // Bit-reversed 0x1021

/// Precomputed FCS table
static FCS_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for (b, slot) in table.iter_mut().enumerate() {
        let mut v = b as u16;
        for _ in 0..8 {
            v = if v & 1 == 1 { (v >> 1) ^ KEY } else { v >> 1 };
        }
        *slot = v;
    }
    table
});

/// CRC-16/X-25 of `data`, returned in wire order (little-endian)
pub fn crc16(data: &[u8]) -> [u8; 2] {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data);
    calc.fcs_value_bytes()
}

/// Check that `data` followed by its two check bytes has the good residue
pub fn check(data: &[u8], fcs: &[u8]) -> DlmsResult<()> {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data);
    calc.update_bytes(fcs);
    calc.validate()
}

/// Running Frame Check Sequence calculator
#[derive(Debug, Clone, Copy)]
pub struct FcsCalc {
    fcs_value: u16,
}

impl FcsCalc {
    pub fn new() -> Self {
        Self {
            fcs_value: INITIAL_FCS,
        }
    }

    pub fn reset(&mut self) {
        self.fcs_value = INITIAL_FCS;
    }

    /// Update the FCS value with a single byte
    pub fn update(&mut self, data: u8) {
        self.fcs_value =
            (self.fcs_value >> 8) ^ FCS_TABLE[((self.fcs_value ^ data as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Complemented FCS value as bytes (little-endian)
    pub fn fcs_value_bytes(&self) -> [u8; 2] {
        (self.fcs_value ^ 0xFFFF).to_le_bytes()
    }

    /// Validate the residue after the check bytes have been fed in
    pub fn validate(&self) -> DlmsResult<()> {
        if self.fcs_value != GOOD_FCS {
            log::debug!(
                "FCS residue 0x{:04X}, expected 0x{:04X}",
                self.fcs_value,
                GOOD_FCS
            );
            Err(DlmsError::FrameCrcMismatch)
        } else {
            Ok(())
        }
    }

    pub fn value(&self) -> u16 {
        self.fcs_value
    }
}

impl Default for FcsCalc {
    fn default() -> Self {
        Self::new()
    }
}
