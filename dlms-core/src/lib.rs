//! Core types for the DLMS/COSEM engine
//!
//! This crate provides the error type, OBIS addressing and the typed value
//! model shared by the codec, session and role crates.

pub mod error;
pub mod obis_code;
pub mod datatypes;

pub use error::{DlmsError, DlmsResult};
pub use obis_code::ObisCode;
pub use datatypes::{ClockStatus, CosemDateTime, DataObject, DataObjectType, Reading, ScalerUnit};
