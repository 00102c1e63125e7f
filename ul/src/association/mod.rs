//! DICOM association module
//!
//! This module contains utilities for establishing associations
//! between DICOM nodes via TCP/IP.
//!
//! As an association requester,
//! often as a service class user (SCU),
//! a new association is started
//! via the [`ClientAssociationOptions`] type.
//! The minimum required properties are the proposed presentation contexts
//! and the TCP socket address of the target node.
//!
//! As an association acceptor,
//! usually taking the role of a service class provider (SCP),
//! a newly created [TCP stream](std::net::TcpStream)
//! is passed to a previously prepared [`ServerAssociationOptions`].
pub mod client;
pub mod server;

pub(crate) mod pdata;
mod uid;

pub use client::{ClientAssociation, ClientAssociationOptions};
pub use pdata::PDataWriter;
pub use server::{ServerAssociation, ServerAssociationOptions};

use crate::pdu::{
    AbortRQSource, AssociationRJResult, AssociationRJSource, PresentationContextResult,
};

/// The connection and negotiated parameters of an established association,
/// extracted so that another component can drive the exchange
/// (see [`dimse::Connection`](crate::dimse::Connection)).
#[derive(Debug)]
pub struct AssociationParts {
    /// an independent handle over the association's connection
    pub socket: std::net::TcpStream,
    /// the accepted presentation contexts
    pub presentation_contexts: Vec<PresentationContextResult>,
    /// the maximum PDU length that the peer accepts
    pub peer_max_pdu_length: u32,
    /// the maximum PDU length that this entity admits
    pub max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    pub strict: bool,
}

/// The negotiation and lifetime state of an association,
/// from the point of view of either entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssociationState {
    /// no association activity yet
    Idle,
    /// an A-ASSOCIATE-RQ was sent, awaiting the answer
    Requested,
    /// an A-ASSOCIATE-RQ was received, an answer is due
    Proposed,
    /// the association is established: data may flow
    Established,
    /// an A-RELEASE-RQ was sent, awaiting the A-RELEASE-RP
    Releasing,
    /// the association request was rejected
    Rejected {
        result: AssociationRJResult,
        source: AssociationRJSource,
    },
    /// the association was aborted by either entity
    Aborted { source: AbortRQSource },
    /// the connection is closed
    Closed,
}

impl AssociationState {
    /// Whether P-DATA may be exchanged in this state.
    pub fn is_established(&self) -> bool {
        matches!(self, AssociationState::Established)
    }

    /// Whether the association can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssociationState::Rejected { .. }
                | AssociationState::Aborted { .. }
                | AssociationState::Closed
        )
    }
}
