//! This crate contains the types and methods needed to interact
//! with DICOM nodes through the upper layer protocol.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   which are passed around as part of the DICOM network communication support.
//! - The [`association`] module
//!   comprises abstractions for establishing and negotiating associations
//!   between application entities,
//!   via the upper layer protocol by TCP.
//! - The [`dimse`] module
//!   builds the message exchange service on top of an association:
//!   command sets, message reassembly,
//!   and a handler-driven reader loop.
//! - The [`transport`] module
//!   defines the byte transport the other modules run over.

pub mod association;
pub mod dimse;
pub mod pdu;
pub mod transport;

/// The implementation class UID generically referring to this crate.
///
/// Generated once as per the standard, part 5, section B.2.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.137731201676639942468745388569200929502";

/// The implementation version name generically referring to this crate.
pub const IMPLEMENTATION_VERSION_NAME: &str = "medicom 0.1.0";

// re-exports

pub use association::client::{ClientAssociation, ClientAssociationOptions};
pub use association::server::{ServerAssociation, ServerAssociationOptions};
pub use association::{AssociationParts, AssociationState};
pub use dimse::{
    CommandField, CommandSet, Connection, DimseHandler, DimseOptions, DimseSender, Disposition,
    Outcome,
};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
pub use transport::Transport;
