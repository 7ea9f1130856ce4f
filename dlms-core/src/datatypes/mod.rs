//! Data types used in DLMS/COSEM protocol

pub mod data_object;
pub mod cosem_date_time;
pub mod scaler_unit;

pub use cosem_date_time::{ClockStatus, CosemDateTime};
pub use data_object::{DataObject, DataObjectType};
pub use scaler_unit::{Reading, ScalerUnit};
