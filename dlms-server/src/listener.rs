//! DLMS/COSEM server listener implementation
//!
//! Accepts meters dialing in, serves each connection in its own task and
//! keeps the registry of identified meters up to date.

use crate::collaborators::{MeterDirectory, MeterId, TelemetrySink};
use crate::config::ServerConfig;
use crate::dispatcher::InboundDispatcher;
use crate::registry::{CommandRequest, ConnectionHandle, ConnectionRegistry};
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::{FrameWriter, MeterStream};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Commands that may queue up for one connection
const COMMAND_QUEUE: usize = 16;

/// Server listener for meters dialing in
pub struct ServerListener {
    config: ServerConfig,
    directory: Arc<dyn MeterDirectory>,
    sink: Arc<dyn TelemetrySink>,
    registry: ConnectionRegistry,
    next_connection_id: Arc<AtomicU64>,
}

impl ServerListener {
    pub fn new(config: ServerConfig, directory: Arc<dyn MeterDirectory>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            directory,
            sink,
            registry: ConnectionRegistry::new(),
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registry of identified meters, for routing commands to them
    pub fn registry(&self) -> ConnectionRegistry {
        self.registry.clone()
    }

    pub async fn bind(&self) -> DlmsResult<TcpListener> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| DlmsError::Transport(format!("failed to bind to {}: {}", address, e)))?;
        log::info!("DLMS gateway listening on {}", address);
        Ok(listener)
    }

    /// Accept connections until the task is cancelled
    pub async fn run(&self) -> DlmsResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> DlmsResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until `shutdown` completes
    pub async fn serve(&self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> DlmsResult<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            log::debug!("{} set_nodelay: {}", peer, err);
                        }
                        self.spawn_connection(stream, peer);
                    }
                    Err(err) => log::error!("error accepting connection: {}", err),
                },
                _ = &mut shutdown => {
                    log::info!("listener shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Serve one accepted stream in a new task
    pub fn spawn_connection<S: MeterStream>(&self, stream: S, peer: SocketAddr) {
        let connection = Connection {
            id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            peer,
            inactivity_timeout: self.config.inactivity_timeout(),
            registry: self.registry.clone(),
            dispatcher: InboundDispatcher::new(peer, Arc::clone(&self.directory), Arc::clone(&self.sink)),
        };
        tokio::spawn(connection.serve(stream));
    }
}

struct Connection {
    id: u64,
    peer: SocketAddr,
    inactivity_timeout: Duration,
    registry: ConnectionRegistry,
    dispatcher: InboundDispatcher,
}

impl Connection {
    async fn serve<S: MeterStream>(mut self, stream: S) {
        log::info!("meter connected from {} (connection {})", self.peer, self.id);
        let (mut reader, write_half) = tokio::io::split(stream);
        let mut writer = FrameWriter::new(write_half);
        let (command_tx, mut command_rx) = mpsc::channel::<CommandRequest>(COMMAND_QUEUE);
        let handle = ConnectionHandle::new(self.id, self.peer, command_tx);
        let mut registered: Option<MeterId> = None;
        let mut buf = vec![0u8; 4096];
        // Only meter traffic counts as activity
        let idle = tokio::time::sleep(self.inactivity_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = &mut idle => {
                    log::info!("{} inactive for {:?}, closing", self.peer, self.inactivity_timeout);
                    break;
                }
                read = reader.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(err) => {
                            log::warn!("{} read failed: {}", self.peer, err);
                            break;
                        }
                    };
                    idle.as_mut().reset(Instant::now() + self.inactivity_timeout);

                    let replies = self.dispatcher.on_bytes(&buf[..n]).await;
                    if let Err(err) = send_all(&mut writer, &replies).await {
                        log::warn!("{} write failed: {}", self.peer, err);
                        break;
                    }
                    self.sync_registration(&mut registered, &handle).await;
                }
                Some(request) = command_rx.recv() => {
                    let result = match self.dispatcher.command_frame(&request.command) {
                        Ok(bytes) => writer.send_raw(&bytes).await,
                        Err(err) => Err(err),
                    };
                    let failed = matches!(result, Err(DlmsError::Transport(_)));
                    let _ = request.sent.send(result);
                    if failed {
                        break;
                    }
                }
            }
        }

        if let Some(meter_id) = registered {
            self.registry.remove(&meter_id, self.id).await;
        }
        log::info!("meter connection from {} closed (connection {})", self.peer, self.id);
    }

    /// Keep the registry in line with the meter the dispatcher identified
    async fn sync_registration(&self, registered: &mut Option<MeterId>, handle: &ConnectionHandle) {
        let current = self.dispatcher.meter_id();
        if registered.as_deref() == current {
            return;
        }
        if let Some(previous) = registered.take() {
            self.registry.remove(&previous, self.id).await;
        }
        if let Some(meter_id) = current {
            self.registry.insert(meter_id.to_string(), handle.clone()).await;
            *registered = Some(meter_id.to_string());
        }
    }
}

async fn send_all<W>(writer: &mut FrameWriter<W>, frames: &[Vec<u8>]) -> DlmsResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    for frame in frames {
        writer.send_raw(frame).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChannelTelemetrySink, StaticMeterDirectory};
    use dlms_application::association::Authentication;
    use dlms_application::pdu::AarqApdu;
    use dlms_application::MeterCommand;
    use dlms_core::ObisCode;
    use dlms_session::{FrameAddresses, HdlcFrame, LinkParameters, StreamReassembler};
    use tokio::io::AsyncWriteExt;

    fn listener(inactivity_timeout: u64) -> ServerListener {
        let mut directory = StaticMeterDirectory::new();
        directory.insert("MTR0001", "meter-1", None);
        let (sink, _receiver) = ChannelTelemetrySink::new();
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            inactivity_timeout,
        };
        ServerListener::new(config, Arc::new(directory), Arc::new(sink))
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_connection_closed() {
        let listener = listener(300);
        let (mut meter, gateway) = tokio::io::duplex(1024);
        listener.spawn_connection(gateway, "10.0.0.5:1000".parse().unwrap());

        let snrm = HdlcFrame::snrm(FrameAddresses::CLIENT_TO_METER, LinkParameters::proposal().encode());
        meter.write_all(&snrm.encode().unwrap()).await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = meter.read(&mut buf).await.unwrap();
        assert!(n > 0);

        tokio::time::sleep(Duration::from_secs(301)).await;
        let n = meter.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_do_not_extend_inactivity() {
        let listener = listener(300);
        let registry = listener.registry();
        let (mut meter, gateway) = tokio::io::duplex(1024);
        let start = Instant::now();
        listener.spawn_connection(gateway, "10.0.0.5:1000".parse().unwrap());

        let mut bytes = HdlcFrame::snrm(FrameAddresses::CLIENT_TO_METER, LinkParameters::proposal().encode())
            .encode()
            .unwrap();
        let aarq = AarqApdu::with_calling_title(Authentication::None, b"MTR0001");
        bytes.extend(HdlcFrame::information(FrameAddresses::CLIENT_TO_METER, aarq.encode()).encode().unwrap());
        meter.write_all(&bytes).await.unwrap();

        let mut reassembler = StreamReassembler::new();
        let mut frames = Vec::new();
        let mut buf = vec![0u8; 256];
        while frames.len() < 2 {
            let n = meter.read(&mut buf).await.unwrap();
            assert!(n > 0);
            frames.extend(reassembler.push(&buf[..n]));
        }
        while registry.lookup("meter-1").await.is_none() {
            tokio::task::yield_now().await;
        }

        tokio::time::sleep(Duration::from_secs(200)).await;
        let command = MeterCommand::read(ObisCode::new(1, 0, 32, 7, 0, 255), 3, 2);
        registry.send_command("meter-1", command).await.unwrap();
        let n = meter.read(&mut buf).await.unwrap();
        assert!(n > 0);

        let n = meter.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() < Duration::from_secs(301));
        assert!(registry.lookup("meter-1").await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let listener = listener(300);
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.serve(tcp, async {}).await.unwrap();
    }
}
