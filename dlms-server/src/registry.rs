//! Connected meters and the handles used to reach them

use crate::collaborators::MeterId;
use dlms_application::MeterCommand;
use dlms_core::{DlmsError, DlmsResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Command queued for a connection task
#[derive(Debug)]
pub struct CommandRequest {
    pub command: MeterCommand,
    /// Completed once the request frame was written to the meter
    pub sent: oneshot::Sender<DlmsResult<()>>,
}

/// Handle to the task serving one meter connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: u64,
    pub peer: SocketAddr,
    commands: mpsc::Sender<CommandRequest>,
}

impl ConnectionHandle {
    pub fn new(connection_id: u64, peer: SocketAddr, commands: mpsc::Sender<CommandRequest>) -> Self {
        Self {
            connection_id,
            peer,
            commands,
        }
    }

    /// Queue a command and wait until it is on the wire
    ///
    /// The meter's answer arrives later through the telemetry sink.
    pub async fn send_command(&self, command: MeterCommand) -> DlmsResult<()> {
        let (sent, confirmation) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, sent })
            .await
            .map_err(|_| DlmsError::Transport(format!("connection to {} closed", self.peer)))?;
        confirmation
            .await
            .map_err(|_| DlmsError::Transport(format!("connection to {} closed", self.peer)))?
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Meter id to connection map shared by all connection tasks
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<MeterId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns the handle it replaced
    pub async fn insert(&self, meter_id: MeterId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.write().await.insert(meter_id.clone(), handle);
        if let Some(previous) = &previous {
            log::info!(
                "meter {} reconnected, replacing connection {} from {}",
                meter_id,
                previous.connection_id,
                previous.peer
            );
        }
        previous
    }

    /// Remove the entry for `meter_id` if it still belongs to `connection_id`
    pub async fn remove(&self, meter_id: &str, connection_id: u64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(meter_id) {
            Some(handle) if handle.connection_id == connection_id => {
                connections.remove(meter_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, meter_id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(meter_id).cloned()
    }

    /// Route a command to a connected meter
    pub async fn send_command(&self, meter_id: &str, command: MeterCommand) -> DlmsResult<()> {
        let handle = self
            .lookup(meter_id)
            .await
            .ok_or_else(|| DlmsError::InvalidState(format!("meter {} is not connected", meter_id)))?;
        handle.send_command(command).await
    }

    /// Ids of all connected meters, sorted
    pub async fn list(&self) -> Vec<MeterId> {
        let mut ids: Vec<MeterId> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
