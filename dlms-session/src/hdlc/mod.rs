//! HDLC session layer module

pub mod fcs;
pub mod frame;
pub mod parameters;
pub mod reassembler;

pub use fcs::{crc16, FcsCalc};
pub use frame::{control, Decoded, FrameAddresses, FrameType, HdlcFrame, FLAG, LLC_REQUEST, LLC_RESPONSE};
pub use parameters::LinkParameters;
pub use reassembler::StreamReassembler;
