//! Association state machine for DLMS/COSEM connections
//!
//! One state tracks both the HDLC link and the application association on
//! top of it.
//!
//! # State Transitions
//!
//! ```text
//!               SNRM            UA              AARQ            AARE ok
//! Disconnected -----> LinkPending ---> LinkEstablished ---> Associating ---> Associated
//!      ^                                     ^                  |              |
//!      |                                     +---- AARE reject -+              | RLRQ
//!      |                                                                       v
//!      +------------------------------ RLRE -------------------------------- Releasing
//! ```
//!
//! A server-side association skips the pending states: SNRM establishes the
//! link, AARQ associates it and RLRQ drops back to `LinkEstablished`.

use std::fmt::{self, Display};

/// Which side of the exchange an association plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the link and issues requests (client reading a meter)
    Client,
    /// Answers link and association requests (gateway accepting meters)
    Server,
}

/// Link and association state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationState {
    /// No link
    #[default]
    Disconnected,

    /// SNRM sent, waiting for UA
    LinkPending,

    /// SNRM/UA complete, no application association
    LinkEstablished,

    /// AARQ sent, waiting for AARE
    Associating,

    /// Application association established, data services allowed
    Associated,

    /// RLRQ sent, waiting for RLRE
    Releasing,
}

impl AssociationState {
    /// Whether GET/SET/ACTION may be exchanged
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Associated)
    }

    /// Waiting for the peer to answer a handshake step
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::LinkPending | Self::Associating | Self::Releasing)
    }

    /// Whether the HDLC link is up
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::LinkEstablished | Self::Associating | Self::Associated | Self::Releasing
        )
    }
}

impl Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::LinkPending => write!(f, "LinkPending"),
            Self::LinkEstablished => write!(f, "LinkEstablished"),
            Self::Associating => write!(f, "Associating"),
            Self::Associated => write!(f, "Associated"),
            Self::Releasing => write!(f, "Releasing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!AssociationState::Disconnected.is_connected());
        assert!(!AssociationState::LinkPending.is_connected());
        assert!(AssociationState::LinkPending.is_pending());

        assert!(AssociationState::LinkEstablished.is_connected());
        assert!(!AssociationState::LinkEstablished.is_active());

        assert!(AssociationState::Associated.is_active());
        assert!(AssociationState::Releasing.is_pending());
    }

    #[test]
    fn test_display_state() {
        assert_eq!(AssociationState::default().to_string(), "Disconnected");
        assert_eq!(AssociationState::Associated.to_string(), "Associated");
    }
}
