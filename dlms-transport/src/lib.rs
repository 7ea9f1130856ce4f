//! Transport layer module for DLMS/COSEM protocol
//!
//! This crate provides the byte streams meters are reached over and the
//! HDLC frame reader/writer that sit directly on top of them.

pub mod framed;
pub mod stream;
pub mod tcp;

pub use framed::{FrameReader, FrameWriter};
pub use stream::{BoxedStream, Connector, MeterStream};
pub use tcp::{TcpConnector, TcpSettings};
