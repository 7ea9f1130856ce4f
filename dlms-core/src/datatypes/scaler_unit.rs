//! Scaler/unit pairs and scaled readings
//!
//! Register objects report a raw integer together with a power-of-ten
//! exponent and a unit code. The physical value is `raw * 10^scaler`.

use crate::datatypes::data_object::DataObject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scaler (signed exponent) and unit code of a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalerUnit {
    pub scaler: i8,
    pub unit: u8,
}

impl ScalerUnit {
    pub fn new(scaler: i8, unit: u8) -> Self {
        Self { scaler, unit }
    }

    /// Build from the raw scaler byte as carried on the wire
    ///
    /// Bytes above 127 are two's-complement negatives (0xFF is -1).
    pub fn from_raw(scaler: u8, unit: u8) -> Self {
        Self {
            scaler: scaler as i8,
            unit,
        }
    }

    /// Apply the scaler to a raw value
    pub fn apply(&self, raw: f64) -> f64 {
        raw * 10f64.powi(self.scaler as i32)
    }

    /// Display symbol of the unit code
    pub fn unit_symbol(&self) -> String {
        let symbol = match self.unit {
            1 => "a",
            2 => "mo",
            3 => "wk",
            4 => "d",
            5 => "h",
            6 => "min",
            7 => "s",
            27 => "W",
            28 => "VA",
            29 => "var",
            30 => "Wh",
            31 => "VAh",
            32 => "varh",
            33 => "A",
            35 => "V",
            44 => "Hz",
            46 => "K",
            47 => "°C",
            255 => "",
            other => return format!("unit({})", other),
        };
        symbol.to_string()
    }
}

/// Raw register value paired with its scaler and unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: Box<DataObject>,
    pub scaler_unit: ScalerUnit,
}

impl Reading {
    pub fn new(value: DataObject, scaler_unit: ScalerUnit) -> Self {
        Self {
            value: Box::new(value),
            scaler_unit,
        }
    }

    /// Scaled physical value, `None` when the raw value is not numeric
    pub fn actual_value(&self) -> Option<f64> {
        self.value.as_f64().map(|raw| self.scaler_unit.apply(raw))
    }

    pub fn unit_symbol(&self) -> String {
        self.scaler_unit.unit_symbol()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual_value() {
            Some(value) => write!(f, "{} {}", value, self.unit_symbol()),
            None => write!(f, "{} {}", self.value, self.unit_symbol()),
        }
    }
}
