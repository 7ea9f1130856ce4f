//! Stream abstraction for transport layer

use async_trait::async_trait;
use dlms_core::DlmsResult;
use tokio::io::{AsyncRead, AsyncWrite};

/// Full-duplex byte stream to a meter
///
/// Implemented for anything tokio can read from and write to, so TCP sockets
/// and in-memory duplex pipes are interchangeable.
pub trait MeterStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> MeterStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased meter stream
pub type BoxedStream = Box<dyn MeterStream>;

/// Opens streams to meters by address
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address` (`host:port` for TCP)
    async fn connect(&self, address: &str) -> DlmsResult<BoxedStream>;
}
