//! Association events for DLMS/COSEM connections
//!
//! Every frame handed to an [`Association`](super::Association) yields one of
//! these, telling the owner what changed.

use crate::pdu::Apdu;

/// Outcome of feeding one frame to an association
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationEvent {
    /// UA received for our SNRM, or SNRM accepted from the peer
    LinkEstablished,

    /// Peer closed the link (DISC, DM, or UA answering our DISC)
    LinkClosed,

    /// AARE accepted our AARQ, or the peer's AARQ was accepted
    Associated {
        /// Meter number from the calling AP title, server side only
        meter_number: Option<String>,
    },

    /// RLRE received, or the peer's RLRQ was answered
    Released,

    /// Data service APDU for the owner to route
    Data(Apdu),

    /// Receive-ready supervisory frame
    ReceiverReady,

    /// Frame not valid in the current state; it was logged and dropped
    Ignored,
}

impl AssociationEvent {
    pub fn is_ignored(&self) -> bool {
        matches!(self, AssociationEvent::Ignored)
    }
}
