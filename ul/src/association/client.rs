//! Association requester module
//!
//! Here lives the requestor side of a DICOM association:
//! build a [`ClientAssociationOptions`],
//! point it at the target node
//! and obtain an established [`ClientAssociation`].
use std::{
    borrow::Cow,
    io::Write,
    net::{TcpStream, ToSocketAddrs},
};

use crate::{
    pdu::{
        read_pdu, write_pdu, AbortRQSource, AssociationAC, AssociationRJ, AssociationRQ, Pdu,
        PresentationContextProposed, PresentationContextResult, PresentationContextResultReason,
        UserVariableItem, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
    },
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};
use snafu::{ensure, Backtrace, ResultExt, Snafu};

use super::{pdata::PDataWriter, uid::trim_uid, AssociationParts};
use crate::pdu::PDataValueType;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax { backtrace: Backtrace },

    /// could not connect to server
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to send association request
    SendRequest {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to receive association response
    ReceiveResponse {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    #[snafu(display("unexpected response from server `{:?}`", pdu))]
    #[non_exhaustive]
    UnexpectedResponse {
        /// the PDU obtained from the server
        pdu: Box<Pdu>,
    },

    #[snafu(display("unknown response from server `{:?}`", pdu))]
    #[non_exhaustive]
    UnknownResponse {
        /// the PDU obtained from the server, of variant Unknown
        pdu: Box<Pdu>,
    },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected by the server: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted by the server
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    /// failed to send PDU message
    #[non_exhaustive]
    Send {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU message on wire
    #[non_exhaustive]
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity",
        length
    ))]
    #[non_exhaustive]
    SendTooLongPdu { length: usize, backtrace: Backtrace },

    /// failed to receive PDU message
    #[non_exhaustive]
    Receive {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// failed to clone the connection for detaching
    CloneSocket {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A DICOM association builder for a client node.
/// The final outcome is a [`ClientAssociation`].
///
/// This is the standard way of requesting and establishing
/// an association with another DICOM node,
/// that one usually taking the role of a service class provider (SCP).
///
/// At least one presentation context must be specified,
/// using the method [`with_presentation_context`](Self::with_presentation_context)
/// and supplying both an abstract syntax and a list of transfer syntaxes.
///
/// A helper method [`with_abstract_syntax`](Self::with_abstract_syntax)
/// includes by default the transfer syntaxes
/// _Implicit VR Little Endian_ and _Explicit VR Little Endian_
/// in the resulting presentation context.
///
/// # Example
///
/// ```no_run
/// # use medicom_ul::association::client::ClientAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested presentation contexts
    presentation_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
}

impl Default for ClientAssociationOptions<'_> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: "1.2.840.10008.3.1.1.1".into(),
            presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the calling AE title, identifying this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Set the called AE title, identifying the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Propose one more presentation context,
    /// given its abstract syntax and candidate transfer syntaxes.
    pub fn with_presentation_context<T>(
        mut self,
        abstract_syntax_uid: T,
        transfer_syntax_uids: Vec<T>,
    ) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let transfer_syntaxes: Vec<Cow<'a, str>> = transfer_syntax_uids
            .into_iter()
            .map(|t| trim_uid(t.into()))
            .collect();
        self.presentation_contexts
            .push((trim_uid(abstract_syntax_uid.into()), transfer_syntaxes));
        self
    }

    /// Propose one more presentation context
    /// with the default transfer syntaxes for the given abstract syntax.
    pub fn with_abstract_syntax<T>(self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let default_transfer_syntaxes: Vec<Cow<'a, str>> =
            vec!["1.2.840.10008.1.2.1".into(), "1.2.840.10008.1.2".into()];
        self.with_presentation_context(abstract_syntax_uid.into(), default_transfer_syntaxes)
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Connect to the given address over TCP
    /// and request a new DICOM association,
    /// negotiating the presentation contexts in the process.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<ClientAssociation> {
        // proposing nothing is a caller mistake, not a negotiation outcome
        ensure!(
            !self.presentation_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );

        let ClientAssociationOptions {
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            protocol_version,
            max_pdu_length,
            strict,
        } = self;

        // one odd identifier per proposed context
        let presentation_contexts: Vec<_> = presentation_contexts
            .into_iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                id: (i as u8) * 2 + 1,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: transfer_syntaxes
                    .iter()
                    .map(|uid| uid.to_string())
                    .collect(),
            })
            .collect();

        let request = Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title: calling_ae_title.to_string(),
            called_ae_title: called_ae_title.to_string(),
            application_context_name: application_context_name.to_string(),
            presentation_contexts,
            user_variables: vec![
                UserVariableItem::MaxLength(max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        });

        let mut socket = TcpStream::connect(address).context(ConnectSnafu)?;
        let mut buffer: Vec<u8> = Vec::with_capacity(max_pdu_length as usize);
        write_pdu(&mut buffer, &request).context(SendRequestSnafu)?;
        socket.write_all(&buffer).context(WireSendSnafu)?;
        buffer.clear();

        let answer =
            read_pdu(&mut socket, MAXIMUM_PDU_SIZE, strict).context(ReceiveResponseSnafu)?;

        match answer {
            Pdu::AssociationAC(AssociationAC {
                protocol_version: acceptor_protocol_version,
                presentation_contexts: accorded_contexts,
                user_variables,
                ..
            }) => {
                ensure!(
                    protocol_version == acceptor_protocol_version,
                    ProtocolVersionMismatchSnafu {
                        expected: protocol_version,
                        got: acceptor_protocol_version,
                    }
                );

                let acceptor_max_pdu_length = user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);
                // 0 stands for the largest size the standard admits;
                // values below the standard minimum are clamped up to it
                let acceptor_max_pdu_length = if acceptor_max_pdu_length == 0 {
                    MAXIMUM_PDU_SIZE
                } else {
                    acceptor_max_pdu_length.max(MINIMUM_PDU_SIZE)
                };

                let presentation_contexts: Vec<_> = accorded_contexts
                    .into_iter()
                    .filter(|c| c.reason == PresentationContextResultReason::Acceptance)
                    .collect();
                if presentation_contexts.is_empty() {
                    abort_quietly(&mut socket, &mut buffer);
                    return NoAcceptedPresentationContextsSnafu.fail();
                }

                Ok(ClientAssociation {
                    presentation_contexts,
                    requestor_max_pdu_length: max_pdu_length,
                    acceptor_max_pdu_length,
                    socket,
                    buffer,
                    strict,
                    detached: false,
                })
            }
            Pdu::AssociationRJ(association_rj) => RejectedSnafu { association_rj }.fail(),
            pdu @ Pdu::Unknown { .. } => {
                abort_quietly(&mut socket, &mut buffer);
                UnknownResponseSnafu { pdu }.fail()
            }
            pdu => {
                abort_quietly(&mut socket, &mut buffer);
                UnexpectedResponseSnafu { pdu }.fail()
            }
        }
    }
}

/// Send an A-ABORT on a best-effort basis,
/// swallowing failures since the association is already lost.
fn abort_quietly(socket: &mut TcpStream, buffer: &mut Vec<u8>) {
    buffer.clear();
    let abort = Pdu::AbortRQ {
        source: AbortRQSource::ServiceUser,
    };
    if write_pdu(buffer, &abort).is_ok() {
        let _ = socket.write_all(buffer);
    }
}

/// An established DICOM upper layer association,
/// from the perspective of the requesting application entity.
///
/// Individual PDUs go through [`send`](Self::send)
/// and [`receive`](Self::receive);
/// large data sets are better served by the fragmenting
/// P-Data writer of [`send_pdata`](Self::send_pdata).
///
/// Unless the association was handed over to a message exchange engine
/// (see [`into_parts`](Self::into_parts)),
/// dropping the value attempts an orderly release exchange
/// before shutting the TCP connection down.
#[derive(Debug)]
pub struct ClientAssociation {
    /// The presentation contexts accorded with the acceptor application entity,
    /// without the rejected ones.
    presentation_contexts: Vec<PresentationContextResult>,
    /// The maximum PDU length that this application entity is expecting to receive
    requestor_max_pdu_length: u32,
    /// The maximum PDU length that the remote application entity accepts
    acceptor_max_pdu_length: u32,
    /// The TCP stream to the other DICOM node
    socket: TcpStream,
    /// Buffer to assemble PDUs before sending them on the wire
    buffer: Vec<u8>,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// whether the socket was handed over to a message exchange engine,
    /// in which case dropping this value must not touch the connection
    detached: bool,
}

impl ClientAssociation {
    /// The presentation contexts the acceptor agreed on,
    /// with the refused ones already filtered out.
    pub fn presentation_contexts(&self) -> &[PresentationContextResult] {
        &self.presentation_contexts
    }

    /// The maximum PDU length admitted by the association acceptor.
    pub fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    /// The maximum PDU length this entity is willing to receive.
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// Whether receiving PDUs is in strict mode.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Send a PDU message to the other intervenient.
    pub fn send(&mut self, msg: &Pdu) -> Result<()> {
        self.buffer.clear();
        write_pdu(&mut self.buffer, msg).context(SendSnafu)?;
        let limit = self.acceptor_max_pdu_length as usize + crate::pdu::PDU_HEADER_SIZE as usize;
        ensure!(
            self.buffer.len() <= limit,
            SendTooLongPduSnafu {
                length: self.buffer.len(),
            }
        );
        self.socket.write_all(&self.buffer).context(WireSendSnafu)
    }

    /// Read a PDU message from the other intervenient.
    pub fn receive(&mut self) -> Result<Pdu> {
        read_pdu(&mut self.socket, self.requestor_max_pdu_length, self.strict).context(ReceiveSnafu)
    }

    /// Gracefully terminate the association by exchanging release messages
    /// and then shutting down the TCP connection.
    pub fn release(mut self) -> Result<()> {
        let out = self.release_impl();
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        self.detached = true;
        out
    }

    /// Send an abort message and shut down the TCP connection,
    /// terminating the association.
    pub fn abort(mut self) -> Result<()> {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        };
        let out = self.send(&pdu);
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        self.detached = true;
        out
    }

    /// Obtain access to the inner TCP stream
    /// connected to the association acceptor.
    ///
    /// This can be used to send the PDU in semantic fragments of the message,
    /// thus using less memory.
    ///
    /// **Note:** reading and writing should be done with care
    /// to avoid inconsistencies in the association state.
    /// Do not call `send` and `receive` while not in a PDU boundary.
    pub fn inner_stream(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    /// Prepare a P-Data writer for sending
    /// one or more data items.
    ///
    /// Returns a writer which automatically
    /// splits the inner data into separate PDUs if necessary.
    pub fn send_pdata(&mut self, presentation_context_id: u8) -> PDataWriter<&mut TcpStream> {
        PDataWriter::new(
            &mut self.socket,
            presentation_context_id,
            PDataValueType::Data,
            self.acceptor_max_pdu_length,
        )
    }

    /// Hand the connection and the negotiated parameters over,
    /// disarming the automatic release on drop.
    ///
    /// This is how a message exchange engine takes over the association.
    pub fn into_parts(mut self) -> Result<AssociationParts> {
        let socket = self.socket.try_clone().context(CloneSocketSnafu)?;
        self.detached = true;
        Ok(AssociationParts {
            socket,
            presentation_contexts: std::mem::take(&mut self.presentation_contexts),
            peer_max_pdu_length: self.acceptor_max_pdu_length,
            max_pdu_length: self.requestor_max_pdu_length,
            strict: self.strict,
        })
    }

    /// The release handshake proper.
    /// Kept apart from [`release`](Self::release) so that
    /// the connection is shut down even when the exchange fails.
    fn release_impl(&mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ)?;
        let pdu = read_pdu(&mut self.socket, self.requestor_max_pdu_length, self.strict)
            .context(ReceiveSnafu)?;

        match pdu {
            Pdu::ReleaseRP => Ok(()),
            pdu @ Pdu::Unknown { .. } => UnknownResponseSnafu { pdu }.fail(),
            pdu => UnexpectedResponseSnafu { pdu }.fail(),
        }
    }
}

/// Automatically release the association and shut down the connection.
impl Drop for ClientAssociation {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let _ = self.release_impl();
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
    }
}

