//! Client role: dial a meter, associate, read and write its objects
//!
//! One [`DlmsClient`] owns one connection. A background task reads frames,
//! runs them through the association state machine and hands responses to
//! the request correlator. Operations are serialized by an operation lock,
//! so concurrent callers queue instead of interleaving on the wire.

use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use dlms_application::commands::{class, Token, WriteValue, VALUE_ATTRIBUTE};
use dlms_application::{Apdu, Association, AssociationEvent, AssociationState, MeterCommand, Step};
use dlms_core::{CosemDateTime, DataObject, DlmsError, DlmsResult, ObisCode};
use dlms_session::HdlcFrame;
use dlms_transport::{BoxedStream, FrameReader, FrameWriter, TcpSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

type SharedWriter = Arc<Mutex<FrameWriter<WriteHalf<BoxedStream>>>>;
type ControlResult = DlmsResult<AssociationEvent>;

/// One attribute to read in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObisRead {
    pub obis: ObisCode,
    pub class_id: u16,
    pub attribute_id: u8,
}

impl ObisRead {
    pub fn new(obis: ObisCode, class_id: u16, attribute_id: u8) -> Self {
        Self {
            obis,
            class_id,
            attribute_id,
        }
    }

    /// Value attribute of a register
    pub fn register(obis: ObisCode) -> Self {
        Self::new(obis, class::REGISTER, VALUE_ATTRIBUTE)
    }
}

/// Connection to one meter in the client role
pub struct DlmsClient {
    config: ClientConfig,
    association: Arc<Mutex<Association>>,
    correlator: Arc<RequestCorrelator>,
    writer: SharedWriter,
    /// Handshake outcomes (UA, AARE, RLRE, DISC) from the reader task
    control: Mutex<mpsc::UnboundedReceiver<ControlResult>>,
    /// Held for the whole of each operation
    operation: Mutex<()>,
    /// Set once the reader task has stopped
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl DlmsClient {
    /// Open a TCP connection to the configured meter
    ///
    /// The link and association are not set up yet; call [`associate`](Self::associate).
    pub async fn connect(config: ClientConfig) -> DlmsResult<Self> {
        let stream = TcpSettings::with_timeout(config.address(), config.handshake_timeout())
            .connect()
            .await?;
        Ok(Self::with_stream(Box::new(stream), config))
    }

    /// Build a client over an already open stream
    pub fn with_stream(stream: BoxedStream, config: ClientConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let association = Arc::new(Mutex::new(Association::client(
            config.client_id,
            config.authentication.clone(),
        )));
        let correlator = Arc::new(RequestCorrelator::new(config.match_strategy));
        let writer: SharedWriter = Arc::new(Mutex::new(FrameWriter::new(write_half)));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            FrameReader::new(read_half),
            Arc::clone(&association),
            Arc::clone(&correlator),
            Arc::clone(&writer),
            control_tx,
            Arc::clone(&closed),
        ));

        Self {
            config,
            association,
            correlator,
            writer,
            control: Mutex::new(control_rx),
            operation: Mutex::new(()),
            closed,
            reader,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn state(&self) -> AssociationState {
        self.association.lock().await.state()
    }

    /// Requests sent and not yet answered
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    /// Whether the connection to the meter is gone
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// SNRM/UA then AARQ/AARE
    ///
    /// Fails with `AssociationRejected` if the meter refuses the AARQ and
    /// with `Timeout` if a step is not answered within the handshake timeout.
    pub async fn associate(&self) -> DlmsResult<()> {
        let _op = self.operation.lock().await;
        self.ensure_open()?;

        let snrm = self.association.lock().await.link_request()?;
        self.send_handshake(&snrm).await?;
        match self.wait_control().await? {
            AssociationEvent::LinkEstablished => {}
            AssociationEvent::LinkClosed => {
                return Err(DlmsError::Protocol("meter refused the link".to_string()));
            }
            other => return Err(unexpected(other)),
        }

        let aarq = self.association.lock().await.associate_request()?;
        self.send_handshake(&aarq).await?;
        match self.wait_control().await? {
            AssociationEvent::Associated { .. } => {
                log::info!("associated with {}", self.config.address());
                Ok(())
            }
            AssociationEvent::LinkClosed => {
                Err(DlmsError::Protocol("meter closed the link during association".to_string()))
            }
            other => Err(unexpected(other)),
        }
    }

    /// Send a command and wait for its response APDU
    pub async fn request(&self, command: &MeterCommand) -> DlmsResult<Apdu> {
        let _op = self.operation.lock().await;
        self.ensure_open()?;

        let timeout = if command.is_profile_read() {
            self.config.profile_timeout()
        } else {
            self.config.request_timeout()
        };

        let (invoke_id, frame) = {
            let mut association = self.association.lock().await;
            let invoke_id = association.next_invoke_id();
            let apdu = command.to_request(invoke_id)?;
            (invoke_id, association.request_frame(&apdu)?)
        };

        let pending = self.correlator.register(invoke_id, timeout);
        // The reader may have failed every pending request just before this one registered
        if let Err(err) = self.ensure_open() {
            pending.cancel();
            return Err(err);
        }
        if let Err(err) = self.send(&frame).await {
            pending.cancel();
            return Err(err);
        }
        pending.wait().await
    }

    /// Run a command and return its value
    ///
    /// GET yields the attribute value, ACTION its return data (`Null` when
    /// absent), SET yields `Null` once the meter confirmed the write.
    pub async fn execute(&self, command: &MeterCommand) -> DlmsResult<DataObject> {
        match self.request(command).await? {
            Apdu::GetResponse(response) => response.into_value(),
            Apdu::SetResponse(response) => response.check().map(|_| DataObject::Null),
            Apdu::ActionResponse(response) => response.into_value(),
            other => Err(DlmsError::Protocol(format!(
                "unexpected {} in response to {:?}",
                other.name(),
                command
            ))),
        }
    }

    /// Read one attribute; `obis` in `a-b:c.d.e.f` or 12-digit hex form
    pub async fn read_obis(&self, obis: &str, class_id: u16, attribute_id: u8) -> DlmsResult<DataObject> {
        let obis = ObisCode::parse(obis)?;
        self.execute(&MeterCommand::read(obis, class_id, attribute_id)).await
    }

    /// Read several attributes one after another
    pub async fn read_multiple(&self, reads: &[ObisRead]) -> Vec<(ObisCode, DlmsResult<DataObject>)> {
        let mut results = Vec::with_capacity(reads.len());
        for read in reads {
            let command = MeterCommand::read(read.obis, read.class_id, read.attribute_id);
            let result = self.execute(&command).await;
            if let Err(err) = &result {
                log::debug!("read {} failed: {}", read.obis, err);
            }
            results.push((read.obis, result));
        }
        results
    }

    /// Write one attribute, choosing the narrowest DLMS type for the value
    pub async fn write_obis(
        &self,
        obis: &str,
        class_id: u16,
        attribute_id: u8,
        value: impl Into<WriteValue>,
    ) -> DlmsResult<()> {
        let command = MeterCommand::Write {
            obis: ObisCode::parse(obis)?,
            class_id,
            attribute_id,
            value: value.into(),
        };
        self.execute(&command).await.map(|_| ())
    }

    /// Invoke a method
    pub async fn execute_action(
        &self,
        obis: &str,
        class_id: u16,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<DataObject> {
        let command = MeterCommand::Execute {
            obis: ObisCode::parse(obis)?,
            class_id,
            method_id,
            parameters,
        };
        self.execute(&command).await
    }

    /// Close (`true`) or open (`false`) the supply relay
    pub async fn relay_control(&self, connect: bool) -> DlmsResult<()> {
        self.execute(&MeterCommand::RelayControl { connect }).await.map(|_| ())
    }

    pub async fn load_token(&self, token: Token) -> DlmsResult<()> {
        self.execute(&MeterCommand::LoadToken(token)).await.map(|_| ())
    }

    /// Buffer of a profile generic object, the load profile when `obis` is `None`
    pub async fn read_profile(&self, obis: Option<ObisCode>) -> DlmsResult<DataObject> {
        let obis = obis.unwrap_or(ObisCode::LOAD_PROFILE);
        self.execute(&MeterCommand::ReadProfile { obis }).await
    }

    pub async fn read_clock(&self) -> DlmsResult<CosemDateTime> {
        self.execute(&MeterCommand::ReadClock).await?.as_date_time()
    }

    pub async fn set_clock(&self, time: CosemDateTime) -> DlmsResult<()> {
        self.execute(&MeterCommand::SetClock(time)).await.map(|_| ())
    }

    /// RLRQ/RLRE; the link stays up
    pub async fn release(&self) -> DlmsResult<()> {
        let _op = self.operation.lock().await;
        self.ensure_open()?;
        let rlrq = self.association.lock().await.release_request()?;
        self.send_handshake(&rlrq).await?;
        match self.wait_control().await? {
            AssociationEvent::Released => {
                log::info!("released association with {}", self.config.address());
                Ok(())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Release if associated, send DISC and stop the reader
    ///
    /// Pending requests fail with `Transport`. The client cannot be reused.
    pub async fn disconnect(&self) -> DlmsResult<()> {
        if self.state().await.is_active() {
            if let Err(err) = self.release().await {
                log::warn!("release before disconnect failed: {}", err);
            }
        }

        let _op = self.operation.lock().await;
        let disc = self.association.lock().await.disconnect_request();
        if self.is_closed() {
            log::debug!("connection already closed, DISC not sent");
        } else if let Err(err) = self.send_handshake(&disc).await {
            log::debug!("DISC not sent: {}", err);
        } else {
            match self.wait_control().await {
                Ok(AssociationEvent::LinkClosed) | Err(DlmsError::Timeout) => {}
                Ok(other) => log::debug!("unexpected {:?} after DISC", other),
                Err(err) => log::debug!("DISC not acknowledged: {}", err),
            }
        }

        self.reader.abort();
        self.closed.store(true, Ordering::SeqCst);
        self.correlator
            .fail_all(DlmsError::Transport("disconnected".to_string()));
        if let Err(err) = self.writer.lock().await.shutdown().await {
            log::debug!("shutdown after DISC: {}", err);
        }
        log::info!("disconnected from {}", self.config.address());
        Ok(())
    }

    async fn send(&self, frame: &HdlcFrame) -> DlmsResult<()> {
        self.writer.lock().await.send(frame).await
    }

    /// Send a handshake frame after discarding events nobody waited for
    ///
    /// A DISC from the meter or a UA arriving after a timed out step leaves
    /// an event behind that would otherwise answer this step.
    async fn send_handshake(&self, frame: &HdlcFrame) -> DlmsResult<()> {
        {
            let mut control = self.control.lock().await;
            while let Ok(stale) = control.try_recv() {
                log::debug!("discarding stale association event {:?}", stale);
            }
        }
        self.send(frame).await
    }

    fn ensure_open(&self) -> DlmsResult<()> {
        if self.is_closed() {
            Err(DlmsError::Transport("connection closed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn wait_control(&self) -> ControlResult {
        let timeout: Duration = self.config.handshake_timeout();
        let mut control = self.control.lock().await;
        match tokio::time::timeout(timeout, control.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(DlmsError::Transport("connection closed".to_string())),
            Err(_) => Err(DlmsError::Timeout),
        }
    }
}

impl Drop for DlmsClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(event: AssociationEvent) -> DlmsError {
    DlmsError::Protocol(format!("unexpected association event {:?}", event))
}

async fn read_loop(
    mut reader: FrameReader<ReadHalf<BoxedStream>>,
    association: Arc<Mutex<Association>>,
    correlator: Arc<RequestCorrelator>,
    writer: SharedWriter,
    control: mpsc::UnboundedSender<ControlResult>,
    closed: Arc<AtomicBool>,
) {
    let error = loop {
        let frames = match reader.read_frames().await {
            Ok(Some(frames)) => frames,
            Ok(None) => break DlmsError::Transport("connection closed by meter".to_string()),
            Err(err) => break err,
        };

        for frame in frames {
            let (step, answers_step) = {
                let mut association = association.lock().await;
                // Only a frame arriving while a handshake step is outstanding answers it
                let before = association.state();
                let answers_step = before.is_pending() || before == AssociationState::Disconnected;
                (association.handle_frame(&frame), answers_step)
            };
            match step {
                Ok(Step {
                    event: AssociationEvent::Data(apdu),
                    ..
                }) => {
                    correlator.resolve(apdu);
                }
                Ok(Step {
                    event: AssociationEvent::ReceiverReady | AssociationEvent::Ignored,
                    ..
                }) => {}
                Ok(Step { event, reply }) => {
                    if let Some(reply) = reply {
                        if let Err(err) = writer.lock().await.send(&reply).await {
                            log::warn!("failed to answer {}: {}", frame, err);
                        }
                    }
                    if answers_step {
                        let _ = control.send(Ok(event));
                    } else {
                        log::info!("meter sent {:?} unprompted", event);
                    }
                }
                Err(err @ DlmsError::AssociationRejected { .. }) => {
                    log::warn!("association rejected: {}", err);
                    let _ = control.send(Err(err));
                }
                Err(err) => log::warn!("dropping {}: {}", frame, err),
            }
        }
    };

    log::warn!("meter connection ended: {}", error);
    association.lock().await.connection_lost();
    closed.store(true, Ordering::SeqCst);
    correlator.fail_all(error.clone());
    let _ = control.send(Err(error));
}
