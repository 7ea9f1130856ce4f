//! Per-connection handling of frames from a dialing meter
//!
//! The dispatcher owns the connection's reassembler and server-side
//! association. Handshake frames are answered through the association,
//! requests from the meter are refused with "object unavailable", and
//! responses to our own commands are forwarded to the telemetry sink.

use crate::collaborators::{MeterDirectory, MeterId, Telemetry, TelemetrySink};
use dlms_application::pdu::{ActionResponse, GetDataResult, GetResponse, SetResponse, DAR_OBJECT_UNAVAILABLE};
use dlms_application::{Apdu, Association, AssociationEvent, AssociationState, MeterCommand};
use dlms_core::{DataObject, DlmsResult, ObisCode};
use dlms_session::{HdlcFrame, StreamReassembler};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Frame handling for one meter connection
pub struct InboundDispatcher {
    peer: SocketAddr,
    association: Association,
    reassembler: StreamReassembler,
    meter_id: Option<MeterId>,
    /// Invoke id of each command sent to the meter and the object it addressed
    outstanding: HashMap<u8, ObisCode>,
    directory: Arc<dyn MeterDirectory>,
    sink: Arc<dyn TelemetrySink>,
}

impl InboundDispatcher {
    pub fn new(peer: SocketAddr, directory: Arc<dyn MeterDirectory>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            peer,
            association: Association::server(),
            reassembler: StreamReassembler::new(),
            meter_id: None,
            outstanding: HashMap::new(),
            directory,
            sink,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Backend id of the meter, once identified
    pub fn meter_id(&self) -> Option<&str> {
        self.meter_id.as_deref()
    }

    pub fn state(&self) -> AssociationState {
        self.association.state()
    }

    /// Commands sent and not answered yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Feed bytes read from the socket; returns encoded reply frames
    pub async fn on_bytes(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut replies = Vec::new();
        for frame in self.reassembler.push(data) {
            log::debug!("{} rx {}", self.peer, frame);
            if let Some(reply) = self.on_frame(&frame).await {
                match reply.encode() {
                    Ok(bytes) => {
                        log::debug!("{} tx {}", self.peer, reply);
                        replies.push(bytes);
                    }
                    Err(err) => log::warn!("{} cannot encode reply: {}", self.peer, err),
                }
            }
        }
        replies
    }

    /// Handle one frame and return the reply, if any
    pub async fn on_frame(&mut self, frame: &HdlcFrame) -> Option<HdlcFrame> {
        let step = match self.association.handle_frame(frame) {
            Ok(step) => step,
            Err(err) => {
                log::warn!("{} dropping {}: {}", self.peer, frame, err);
                return None;
            }
        };

        match step.event {
            AssociationEvent::Associated { meter_number } => {
                self.identify(meter_number).await;
                step.reply
            }
            AssociationEvent::Released => {
                log::info!("{} released association", self.peer);
                self.outstanding.clear();
                step.reply
            }
            AssociationEvent::LinkClosed => {
                log::info!("{} closed the link", self.peer);
                self.outstanding.clear();
                self.meter_id = None;
                step.reply
            }
            AssociationEvent::LinkEstablished => {
                log::info!("{} link established", self.peer);
                step.reply
            }
            AssociationEvent::Data(apdu) => self.on_apdu(apdu).await,
            AssociationEvent::ReceiverReady | AssociationEvent::Ignored => step.reply,
        }
    }

    /// Encode a command for the meter and remember what it addresses
    pub fn command_frame(&mut self, command: &MeterCommand) -> DlmsResult<Vec<u8>> {
        let invoke_id = self.association.next_invoke_id();
        let apdu = command.to_request(invoke_id)?;
        let frame = self.association.request_frame(&apdu)?;
        let bytes = frame.encode()?;
        self.outstanding.insert(invoke_id, command.target());
        log::debug!("{} command {} invoke id {}", self.peer, apdu.name(), invoke_id);
        Ok(bytes)
    }

    async fn identify(&mut self, meter_number: Option<String>) {
        let mut meter_id = None;
        if let Some(number) = &meter_number {
            meter_id = self.directory.lookup_by_number(number).await;
        }
        if meter_id.is_none() {
            meter_id = self.directory.lookup_by_address(self.peer.ip()).await;
        }

        match &meter_id {
            Some(id) => log::info!(
                "{} associated as meter {} (number {:?})",
                self.peer,
                id,
                meter_number
            ),
            None => log::warn!(
                "{} associated but is not in the directory (number {:?})",
                self.peer,
                meter_number
            ),
        }
        self.meter_id = meter_id;
    }

    async fn on_apdu(&mut self, apdu: Apdu) -> Option<HdlcFrame> {
        let refusal = match &apdu {
            Apdu::GetRequest(req) => Some(Apdu::GetResponse(GetResponse::error(
                req.invoke_id,
                DAR_OBJECT_UNAVAILABLE,
            ))),
            Apdu::SetRequest(req) => Some(Apdu::SetResponse(SetResponse {
                invoke_id: req.invoke_id,
                result: DAR_OBJECT_UNAVAILABLE,
            })),
            Apdu::ActionRequest(req) => Some(Apdu::ActionResponse(ActionResponse {
                invoke_id: req.invoke_id,
                result: DAR_OBJECT_UNAVAILABLE,
                return_data: None,
            })),
            _ => None,
        };
        if let Some(refusal) = refusal {
            log::debug!("{} refusing {} from meter", self.peer, apdu.name());
            return match self.association.request_frame(&refusal) {
                Ok(frame) => Some(frame),
                Err(err) => {
                    log::warn!("{} cannot answer {}: {}", self.peer, apdu.name(), err);
                    None
                }
            };
        }

        let obis = apdu
            .invoke_id()
            .and_then(|invoke_id| self.outstanding.remove(&invoke_id));
        let value = match apdu {
            Apdu::GetResponse(resp) => match resp.result {
                GetDataResult::Data(value) => value,
                GetDataResult::DataAccessError(code) => {
                    log::warn!(
                        "{} read of {:?} failed with data access result {}",
                        self.peer,
                        obis,
                        code
                    );
                    return None;
                }
            },
            Apdu::SetResponse(resp) => DataObject::Enumerate(resp.result),
            Apdu::ActionResponse(resp) => resp
                .return_data
                .unwrap_or(DataObject::Enumerate(resp.result)),
            other => {
                log::warn!("{} unexpected {}", self.peer, other.name());
                return None;
            }
        };

        match &self.meter_id {
            Some(meter_id) => {
                let telemetry = Telemetry {
                    meter_id: meter_id.clone(),
                    obis,
                    value,
                    timestamp: chrono::Utc::now(),
                };
                self.sink.receive(telemetry).await;
            }
            None => log::warn!("{} value {} from unidentified meter dropped", self.peer, value),
        }
        None
    }
}
