//! TCP transport implementation

use crate::stream::{BoxedStream, Connector};
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// `host:port` of the meter or modem
    pub address: String,
    pub connect_timeout: Duration,
}

impl TcpSettings {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    /// Open the connection, failing with `Timeout` if the peer does not answer in time
    pub async fn connect(&self) -> DlmsResult<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| DlmsError::Timeout)?
            .map_err(|e| DlmsError::Transport(format!("connect to {}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;
        log::info!("connected to {}", self.address);
        Ok(stream)
    }
}

/// [`Connector`] dialing meters over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> DlmsResult<BoxedStream> {
        let stream = TcpSettings::with_timeout(address, self.connect_timeout)
            .connect()
            .await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let connector = TcpConnector::default();
        assert!(connector.connect(&address).await.is_ok());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpSettings::new(address).connect().await.unwrap_err();
        assert!(matches!(err, DlmsError::Transport(_) | DlmsError::Timeout));
    }
}
