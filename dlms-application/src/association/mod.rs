//! Association module for DLMS/COSEM connections
//!
//! [`Association`] drives one connection through link setup (SNRM/UA),
//! application association (AARQ/AARE), data exchange and release
//! (RLRQ/RLRE). It never touches a socket: callers feed it received frames
//! through [`Association::handle_frame`] and write out the frames it builds.
//!
//! # Example
//!
//! ```rust
//! use dlms_application::association::{Association, AssociationState};
//! use dlms_application::association::context::Authentication;
//!
//! let mut association = Association::client(16, Authentication::None);
//! let snrm = association.link_request().unwrap();
//! assert_eq!(association.state(), AssociationState::LinkPending);
//! assert!(snrm.encode().is_ok());
//! ```

pub mod context;
pub mod events;
pub mod state;

pub use context::{Authentication, AuthenticationMechanism, NegotiatedParameters};
pub use events::AssociationEvent;
pub use state::{AssociationState, Role};

use crate::pdu::{AareApdu, AarqApdu, Apdu};
use dlms_core::{DlmsError, DlmsResult};
use dlms_session::{FrameAddresses, FrameType, HdlcFrame, LinkParameters};

/// System title announced in the AARE of a server-side association
pub const SERVER_SYSTEM_TITLE: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// Result of handing a frame to an association
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub event: AssociationEvent,
    /// Frame to send back to the peer, server role and DISC handling
    pub reply: Option<HdlcFrame>,
}

impl Step {
    fn event(event: AssociationEvent) -> Self {
        Self { event, reply: None }
    }

    fn reply(event: AssociationEvent, reply: HdlcFrame) -> Self {
        Self {
            event,
            reply: Some(reply),
        }
    }

    fn ignored() -> Self {
        Self::event(AssociationEvent::Ignored)
    }
}

/// DLMS/COSEM association for one connection
#[derive(Debug, Clone)]
pub struct Association {
    role: Role,
    state: AssociationState,
    /// Addresses used on frames we originate
    addresses: FrameAddresses,
    client_id: u8,
    authentication: Authentication,
    negotiated: NegotiatedParameters,
    invoke_id: u8,
}

impl Association {
    /// Association that dials a meter
    pub fn client(client_id: u8, authentication: Authentication) -> Self {
        Self {
            role: Role::Client,
            state: AssociationState::Disconnected,
            addresses: FrameAddresses::CLIENT_TO_METER,
            client_id,
            authentication,
            negotiated: NegotiatedParameters::default(),
            invoke_id: 0,
        }
    }

    /// Association answering a meter that dialed in
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            state: AssociationState::Disconnected,
            addresses: FrameAddresses::CLIENT_TO_METER,
            client_id: 0,
            authentication: Authentication::None,
            negotiated: NegotiatedParameters::default(),
            invoke_id: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn negotiated(&self) -> &NegotiatedParameters {
        &self.negotiated
    }

    /// Meter number announced by a dialing meter
    pub fn meter_number(&self) -> Option<&str> {
        self.negotiated.meter_number.as_deref()
    }

    /// Next invoke id, wrapping after 255
    pub fn next_invoke_id(&mut self) -> u8 {
        self.invoke_id = self.invoke_id.wrapping_add(1);
        self.invoke_id
    }

    fn transition(&mut self, next: AssociationState) {
        if self.state != next {
            log::debug!("association {:?}: {} -> {}", self.role, self.state, next);
            self.state = next;
        }
    }

    fn expect_state(&self, expected: AssociationState, action: &str) -> DlmsResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DlmsError::InvalidState(format!(
                "cannot {} in state {}",
                action, self.state
            )))
        }
    }

    // ============================================================
    // Client role: outbound handshake frames
    // ============================================================

    /// SNRM proposing this engine's link parameters
    pub fn link_request(&mut self) -> DlmsResult<HdlcFrame> {
        self.expect_state(AssociationState::Disconnected, "send SNRM")?;
        self.transition(AssociationState::LinkPending);
        Ok(HdlcFrame::snrm(self.addresses, LinkParameters::proposal().encode()))
    }

    /// AARQ carrying the configured credentials
    pub fn associate_request(&mut self) -> DlmsResult<HdlcFrame> {
        self.expect_state(AssociationState::LinkEstablished, "send AARQ")?;
        let aarq = AarqApdu::new(self.client_id, self.authentication.clone());
        self.transition(AssociationState::Associating);
        Ok(HdlcFrame::information(self.addresses, aarq.encode()))
    }

    /// RLRQ releasing the application association
    pub fn release_request(&mut self) -> DlmsResult<HdlcFrame> {
        self.expect_state(AssociationState::Associated, "send RLRQ")?;
        self.transition(AssociationState::Releasing);
        Ok(HdlcFrame::information(self.addresses, Apdu::ReleaseRequest.encode()))
    }

    /// The underlying stream is gone; link and association with it
    pub fn connection_lost(&mut self) {
        self.negotiated.authentication = None;
        self.transition(AssociationState::Disconnected);
    }

    /// DISC closing the link; the association is finished afterwards
    pub fn disconnect_request(&mut self) -> HdlcFrame {
        self.transition(AssociationState::Disconnected);
        HdlcFrame::disc(self.addresses)
    }

    /// Information frame carrying a data service request
    pub fn request_frame(&self, apdu: &Apdu) -> DlmsResult<HdlcFrame> {
        if !self.state.is_active() {
            return Err(DlmsError::InvalidState(format!(
                "cannot send {} in state {}",
                apdu.name(),
                self.state
            )));
        }
        Ok(HdlcFrame::information(self.addresses, apdu.encode()))
    }

    // ============================================================
    // Inbound frames
    // ============================================================

    /// Advance the state machine with a received frame
    pub fn handle_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<Step> {
        match self.role {
            Role::Client => self.handle_client_frame(frame),
            Role::Server => self.handle_server_frame(frame),
        }
    }

    fn handle_client_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<Step> {
        match (frame.frame_type(), self.state) {
            (FrameType::UnnumberedAcknowledge, AssociationState::LinkPending) => {
                let peer = LinkParameters::decode(frame.information_field()).unwrap_or_else(|err| {
                    log::warn!("ignoring malformed UA parameters: {}", err);
                    LinkParameters::default()
                });
                self.negotiated.link = LinkParameters::proposal().negotiate(&peer);
                self.transition(AssociationState::LinkEstablished);
                Ok(Step::event(AssociationEvent::LinkEstablished))
            }
            (FrameType::UnnumberedAcknowledge, AssociationState::Disconnected) => {
                Ok(Step::event(AssociationEvent::LinkClosed))
            }
            (FrameType::DisconnectMode, _) => {
                log::warn!("meter answered with DM in state {}", self.state);
                self.transition(AssociationState::Disconnected);
                Ok(Step::event(AssociationEvent::LinkClosed))
            }
            (FrameType::Disconnect, _) => {
                self.transition(AssociationState::Disconnected);
                Ok(Step::reply(
                    AssociationEvent::LinkClosed,
                    HdlcFrame::ua(self.addresses, Vec::new()),
                ))
            }
            (FrameType::ReceiveReady, _) => Ok(Step::event(AssociationEvent::ReceiverReady)),
            (FrameType::Information, _) => {
                let apdu = Apdu::decode(frame.apdu())?;
                self.handle_client_apdu(apdu)
            }
            (frame_type, state) => {
                log::debug!("ignoring {} frame in state {}", frame_type.as_str(), state);
                Ok(Step::ignored())
            }
        }
    }

    fn handle_client_apdu(&mut self, apdu: Apdu) -> DlmsResult<Step> {
        match (apdu, self.state) {
            (Apdu::Aare(aare), AssociationState::Associating) => {
                if aare.is_accepted() {
                    self.negotiated.authentication = Some(self.authentication.mechanism());
                    self.transition(AssociationState::Associated);
                    Ok(Step::event(AssociationEvent::Associated { meter_number: None }))
                } else {
                    self.transition(AssociationState::LinkEstablished);
                    Err(DlmsError::AssociationRejected {
                        result: aare.result.to_u8(),
                        diagnostic: aare.diagnostic,
                    })
                }
            }
            (Apdu::ReleaseResponse, AssociationState::Releasing) => {
                self.transition(AssociationState::Disconnected);
                Ok(Step::event(AssociationEvent::Released))
            }
            (apdu, AssociationState::Associated) if apdu.is_data_response() => {
                Ok(Step::event(AssociationEvent::Data(apdu)))
            }
            (apdu, state) => {
                log::warn!("ignoring {} in state {}", apdu.name(), state);
                Ok(Step::ignored())
            }
        }
    }

    fn handle_server_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<Step> {
        let reply_addresses = frame.addresses().reply();
        self.addresses = reply_addresses;

        match frame.frame_type() {
            FrameType::SetNormalResponseMode => {
                let peer = LinkParameters::decode(frame.information_field()).unwrap_or_else(|err| {
                    log::warn!("ignoring malformed SNRM parameters: {}", err);
                    LinkParameters::default()
                });
                let accepted = LinkParameters::proposal().negotiate(&peer);
                self.negotiated.link = accepted;
                self.transition(AssociationState::LinkEstablished);
                Ok(Step::reply(
                    AssociationEvent::LinkEstablished,
                    HdlcFrame::ua(reply_addresses, accepted.encode()),
                ))
            }
            FrameType::Disconnect => {
                *self = Self::server();
                Ok(Step::reply(
                    AssociationEvent::LinkClosed,
                    HdlcFrame::ua(reply_addresses, Vec::new()),
                ))
            }
            FrameType::ReceiveReady => Ok(Step::event(AssociationEvent::ReceiverReady)),
            // An AARQ without a preceding SNRM implies the link
            FrameType::Information => {
                let apdu = Apdu::decode(frame.apdu())?;
                self.handle_server_apdu(apdu, reply_addresses)
            }
            frame_type => {
                log::warn!("ignoring {} frame in state {}", frame_type.as_str(), self.state);
                Ok(Step::ignored())
            }
        }
    }

    fn handle_server_apdu(&mut self, apdu: Apdu, reply_addresses: FrameAddresses) -> DlmsResult<Step> {
        match apdu {
            Apdu::Aarq(aarq) => {
                let meter_number = aarq.meter_number();
                self.negotiated.authentication = Some(aarq.authentication.mechanism());
                self.negotiated.meter_number = meter_number.clone();
                self.transition(AssociationState::Associated);
                Ok(Step::reply(
                    AssociationEvent::Associated { meter_number },
                    HdlcFrame::information(
                        reply_addresses,
                        AareApdu::accepted_with_title(&SERVER_SYSTEM_TITLE).encode(),
                    ),
                ))
            }
            Apdu::ReleaseRequest if self.state.is_active() => {
                self.negotiated.authentication = None;
                self.transition(AssociationState::LinkEstablished);
                Ok(Step::reply(
                    AssociationEvent::Released,
                    HdlcFrame::information(reply_addresses, Apdu::ReleaseResponse.encode()),
                ))
            }
            apdu if self.state.is_active() && (apdu.is_data_request() || apdu.is_data_response()) => {
                Ok(Step::event(AssociationEvent::Data(apdu)))
            }
            apdu => {
                log::warn!("ignoring {} in state {}", apdu.name(), self.state);
                Ok(Step::ignored())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{AssociationResult, AttributeDescriptor, GetRequest, GetResponse};
    use dlms_core::{DataObject, ObisCode};

    fn meter_frame(payload: Vec<u8>) -> HdlcFrame {
        HdlcFrame::information(FrameAddresses::METER_TO_CLIENT, payload)
    }

    fn associated_client() -> Association {
        let mut association = Association::client(16, Authentication::Low("00000000".into()));
        association.link_request().unwrap();
        association
            .handle_frame(&HdlcFrame::ua(FrameAddresses::METER_TO_CLIENT, Vec::new()))
            .unwrap();
        association.associate_request().unwrap();
        association
            .handle_frame(&meter_frame(AareApdu::accepted().encode()))
            .unwrap();
        association
    }

    #[test]
    fn test_client_handshake() {
        let mut association = Association::client(16, Authentication::None);
        let snrm = association.link_request().unwrap();
        assert_eq!(snrm.frame_type(), FrameType::SetNormalResponseMode);
        assert_eq!(snrm.information_field(), LinkParameters::proposal().encode().as_slice());

        let ua = HdlcFrame::ua(FrameAddresses::METER_TO_CLIENT, LinkParameters::default().encode());
        let step = association.handle_frame(&ua).unwrap();
        assert_eq!(step.event, AssociationEvent::LinkEstablished);
        assert_eq!(association.negotiated().link.max_information_field_length_tx, 128);

        association.associate_request().unwrap();
        assert_eq!(association.state(), AssociationState::Associating);
        let step = association
            .handle_frame(&meter_frame(AareApdu::accepted().encode()))
            .unwrap();
        assert!(matches!(step.event, AssociationEvent::Associated { .. }));
        assert!(association.is_active());
    }

    #[test]
    fn test_client_rejected() {
        let mut association = Association::client(16, Authentication::None);
        association.link_request().unwrap();
        association
            .handle_frame(&HdlcFrame::ua(FrameAddresses::METER_TO_CLIENT, Vec::new()))
            .unwrap();
        association.associate_request().unwrap();

        let aare = AareApdu::rejected(AssociationResult::RejectedPermanent, 13);
        let err = association.handle_frame(&meter_frame(aare.encode())).unwrap_err();
        assert_eq!(err, DlmsError::AssociationRejected { result: 1, diagnostic: 13 });
        assert_eq!(association.state(), AssociationState::LinkEstablished);
    }

    #[test]
    fn test_client_data_and_release() {
        let mut association = associated_client();
        let response = Apdu::GetResponse(GetResponse::data(1, DataObject::Unsigned8(5)));
        let step = association.handle_frame(&meter_frame(response.encode())).unwrap();
        assert_eq!(step.event, AssociationEvent::Data(response));

        association.release_request().unwrap();
        let step = association
            .handle_frame(&meter_frame(Apdu::ReleaseResponse.encode()))
            .unwrap();
        assert_eq!(step.event, AssociationEvent::Released);
        assert_eq!(association.state(), AssociationState::Disconnected);
        assert!(association.associate_request().is_err());
    }

    #[test]
    fn test_client_ignores_out_of_state_frames() {
        let mut association = Association::client(16, Authentication::None);
        let aare = meter_frame(AareApdu::accepted().encode());
        assert!(association.handle_frame(&aare).unwrap().event.is_ignored());

        let get = Apdu::GetRequest(GetRequest {
            invoke_id: 1,
            descriptor: AttributeDescriptor::new(3, ObisCode::CLOCK, 2),
        });
        assert!(association.request_frame(&get).is_err());
    }

    #[test]
    fn test_connection_lost_drops_association() {
        let mut association = associated_client();
        association.connection_lost();
        assert_eq!(association.state(), AssociationState::Disconnected);
        assert!(association.negotiated().authentication.is_none());
        assert!(association.link_request().is_ok());
    }

    #[test]
    fn test_invoke_id_wraps() {
        let mut association = Association::client(16, Authentication::None);
        assert_eq!(association.next_invoke_id(), 1);
        for _ in 0..254 {
            association.next_invoke_id();
        }
        assert_eq!(association.next_invoke_id(), 0);
        assert_eq!(association.next_invoke_id(), 1);
    }

    #[test]
    fn test_server_handshake_and_release() {
        let mut association = Association::server();
        let snrm = HdlcFrame::snrm(FrameAddresses::CLIENT_TO_METER, LinkParameters::proposal().encode());
        let step = association.handle_frame(&snrm).unwrap();
        let ua = step.reply.unwrap();
        assert_eq!(ua.frame_type(), FrameType::UnnumberedAcknowledge);
        assert_eq!(ua.addresses(), FrameAddresses::METER_TO_CLIENT);
        assert_eq!(association.state(), AssociationState::LinkEstablished);

        let aarq = AarqApdu::with_calling_title(Authentication::None, b"12345678").encode();
        let step = association
            .handle_frame(&HdlcFrame::information(FrameAddresses::CLIENT_TO_METER, aarq))
            .unwrap();
        assert_eq!(
            step.event,
            AssociationEvent::Associated { meter_number: Some("12345678".into()) }
        );
        let aare = Apdu::decode(step.reply.unwrap().apdu()).unwrap();
        assert_eq!(aare, Apdu::Aare(AareApdu::accepted_with_title(&SERVER_SYSTEM_TITLE)));

        let rlrq = HdlcFrame::information(FrameAddresses::CLIENT_TO_METER, Apdu::ReleaseRequest.encode());
        let step = association.handle_frame(&rlrq).unwrap();
        assert_eq!(step.event, AssociationEvent::Released);
        assert_eq!(association.state(), AssociationState::LinkEstablished);

        let disc = HdlcFrame::disc(FrameAddresses::CLIENT_TO_METER);
        let step = association.handle_frame(&disc).unwrap();
        assert_eq!(step.event, AssociationEvent::LinkClosed);
        assert_eq!(association.state(), AssociationState::Disconnected);
        assert_eq!(association.meter_number(), None);
    }

    #[test]
    fn test_server_answers_aarq_without_snrm() {
        let mut association = Association::server();
        let aarq = AarqApdu::with_calling_title(Authentication::None, b"MTR0042").encode();
        let step = association
            .handle_frame(&HdlcFrame::information(FrameAddresses::CLIENT_TO_METER, aarq))
            .unwrap();
        assert_eq!(
            step.event,
            AssociationEvent::Associated {
                meter_number: Some("MTR0042".to_string())
            }
        );
        let reply = step.reply.unwrap();
        match Apdu::decode(reply.apdu()).unwrap() {
            Apdu::Aare(aare) => assert!(aare.is_accepted()),
            other => panic!("expected AARE, got {:?}", other),
        }
        assert_eq!(association.state(), AssociationState::Associated);
    }

    #[test]
    fn test_server_ignores_data_before_association() {
        let mut association = Association::server();
        let get = Apdu::GetRequest(GetRequest {
            invoke_id: 1,
            descriptor: AttributeDescriptor::new(8, ObisCode::CLOCK, 2),
        });
        let step = association
            .handle_frame(&HdlcFrame::information(FrameAddresses::CLIENT_TO_METER, get.encode()))
            .unwrap();
        assert!(step.event.is_ignored());
        assert!(step.reply.is_none());
    }
}
