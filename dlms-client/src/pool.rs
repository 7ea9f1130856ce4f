//! Reusable client connections keyed by meter id

use crate::client::{DlmsClient, ObisRead};
use crate::config::ClientConfig;
use dlms_core::{DataObject, DlmsResult, ObisCode};
use dlms_transport::{Connector, TcpConnector};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Default cap on simultaneous outbound meter sessions
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Meter to read in a bulk run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterTarget {
    pub meter_id: String,
    /// `host:port`
    pub address: String,
}

impl MeterTarget {
    pub fn new(meter_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            meter_id: meter_id.into(),
            address: address.into(),
        }
    }
}

/// Per-meter results of a bulk read
pub type BulkReadResult = (String, DlmsResult<Vec<(ObisCode, DlmsResult<DataObject>)>>);

/// Associated clients, one per meter id
pub struct MeterPool {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    clients: Mutex<HashMap<String, Arc<DlmsClient>>>,
    permits: Arc<Semaphore>,
}

impl MeterPool {
    /// Pool dialing over TCP with the default concurrency cap
    pub fn new(config: ClientConfig) -> Self {
        let connector = TcpConnector {
            connect_timeout: config.handshake_timeout(),
        };
        Self::with_connector(config, Arc::new(connector), DEFAULT_MAX_CONCURRENT)
    }

    /// `config` is the template for every client; its host and port are ignored
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>, max_concurrent: usize) -> Self {
        Self {
            config,
            connector,
            clients: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Associated client for `meter_id`, dialing `address` if there is none yet
    pub async fn get_or_connect(&self, meter_id: &str, address: &str) -> DlmsResult<Arc<DlmsClient>> {
        if let Some(client) = self.clients.lock().await.get(meter_id) {
            if client.state().await.is_active() {
                return Ok(Arc::clone(client));
            }
        }

        let stream = self.connector.connect(address).await?;
        let client = Arc::new(DlmsClient::with_stream(stream, self.config.clone()));
        client.associate().await?;
        log::info!("meter {} connected at {}", meter_id, address);

        let previous = self
            .clients
            .lock()
            .await
            .insert(meter_id.to_string(), Arc::clone(&client));
        if let Some(previous) = previous {
            log::debug!("replacing stale connection to meter {}", meter_id);
            if let Err(err) = previous.disconnect().await {
                log::debug!("closing stale connection: {}", err);
            }
        }
        Ok(client)
    }

    /// Disconnect and forget the client for `meter_id`
    pub async fn close(&self, meter_id: &str) -> DlmsResult<()> {
        let client = self.clients.lock().await.remove(meter_id);
        match client {
            Some(client) => client.disconnect().await,
            None => Ok(()),
        }
    }

    pub async fn close_all(&self) {
        let clients: Vec<(String, Arc<DlmsClient>)> = self.clients.lock().await.drain().collect();
        for (meter_id, client) in clients {
            if let Err(err) = client.disconnect().await {
                log::warn!("closing meter {}: {}", meter_id, err);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read the same attributes from many meters
    ///
    /// At most `max_concurrent` meters are worked on at a time.
    pub async fn bulk_read(&self, targets: &[MeterTarget], reads: &[ObisRead]) -> Vec<BulkReadResult> {
        let jobs = targets.iter().map(|target| async move {
            let result = self.read_target(target, reads).await;
            if let Err(err) = &result {
                log::warn!("bulk read of meter {} failed: {}", target.meter_id, err);
            }
            (target.meter_id.clone(), result)
        });
        join_all(jobs).await
    }

    async fn read_target(
        &self,
        target: &MeterTarget,
        reads: &[ObisRead],
    ) -> DlmsResult<Vec<(ObisCode, DlmsResult<DataObject>)>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| dlms_core::DlmsError::InvalidState("meter pool closed".to_string()))?;
        let client = self.get_or_connect(&target.meter_id, &target.address).await?;
        Ok(client.read_multiple(reads).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dlms_core::DlmsError;
    use dlms_transport::BoxedStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Connector that never succeeds and records how many dials overlap
    #[derive(Default)]
    struct CountingConnector {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, address: &str) -> DlmsResult<BoxedStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Err(DlmsError::Transport(format!("{} unreachable", address)))
        }
    }

    #[tokio::test]
    async fn test_bulk_read_respects_cap() {
        let connector = Arc::new(CountingConnector::default());
        let pool = MeterPool::with_connector(ClientConfig::default(), connector.clone(), 2);

        let targets: Vec<MeterTarget> = (0..6)
            .map(|i| MeterTarget::new(format!("M{}", i), format!("10.0.0.{}:4059", i)))
            .collect();
        let results = pool
            .bulk_read(&targets, &[ObisRead::register(ObisCode::new(1, 0, 1, 8, 0, 255))])
            .await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, r)| r.is_err()));
        assert_eq!(results[3].0, "M3");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 6);
        assert!(connector.peak.load(Ordering::SeqCst) <= 2);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_unknown_meter() {
        let pool = MeterPool::new(ClientConfig::default());
        assert!(pool.close("nope").await.is_ok());
    }
}
