//! Application layer for DLMS/COSEM
//!
//! This crate provides the APDU codec, the association state machine and the
//! meter commands built on top of them.

pub mod association;
pub mod commands;
pub mod pdu;

pub use association::{Association, AssociationEvent, AssociationState, Authentication, Role, Step};
pub use commands::{MeterCommand, Token, WriteValue};
pub use pdu::{parse_get_response, Apdu, AttributeDescriptor, MethodDescriptor};
