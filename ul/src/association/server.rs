//! Association acceptor module
//!
//! The module provides an abstraction for a DICOM association
//! in which this application entity listens to incoming association requests.
//! See [`ServerAssociationOptions`]
//! for details and examples on how to create an association.
use std::{borrow::Cow, io::Write, net::TcpStream};

use medicom_core::transfer_syntax::TransferSyntax;
use snafu::{ensure, Backtrace, ResultExt, Snafu};

use crate::{
    pdu::{
        read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource, AssociationAC,
        AssociationRJ, AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource,
        AssociationRQ, PDataValueType, Pdu, PresentationContextResult,
        PresentationContextResultReason, UserVariableItem, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
        MINIMUM_PDU_SIZE,
    },
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{pdata::PDataWriter, uid::trim_uid, AssociationParts};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// missing at least one abstract syntax to accept negotiations
    MissingAbstractSyntax { backtrace: Backtrace },

    /// failed to receive association request
    ReceiveRequest {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// failed to send association response
    SendResponse {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU message on wire
    #[non_exhaustive]
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("association rejected: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    /// association aborted during negotiation
    Aborted { backtrace: Backtrace },

    #[snafu(display("unexpected PDU `{:?}`", pdu))]
    #[non_exhaustive]
    UnexpectedPdu {
        /// the PDU obtained
        pdu: Box<Pdu>,
    },

    #[snafu(display("unknown PDU `{:?}`", pdu))]
    #[non_exhaustive]
    UnknownPdu {
        /// the PDU obtained, of variant Unknown
        pdu: Box<Pdu>,
    },

    /// failed to send PDU message
    #[non_exhaustive]
    Send {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

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

/// Common interface for application entity access control policies.
///
/// Existing implementations include [`AcceptAny`] and [`AcceptCalledAeTitle`],
/// but users are free to implement their own.
pub trait AccessControl {
    /// Obtain the decision of whether to accept an incoming association request
    /// based on the recorded application entity titles.
    ///
    /// Returns `Ok(())` if the requesting node should be given clearance.
    /// Otherwise, a concrete rejection reason is given.
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
    ) -> Result<(), AssociationRJServiceUserReason>;
}

/// An access control rule that accepts any incoming association request.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
    ) -> Result<(), AssociationRJServiceUserReason> {
        Ok(())
    }
}

/// An access control rule that accepts association requests
/// whose called AE title matches the node's own AE title.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptCalledAeTitle;

impl AccessControl for AcceptCalledAeTitle {
    fn check_access(
        &self,
        this_ae_title: &str,
        _calling_ae_title: &str,
        called_ae_title: &str,
    ) -> Result<(), AssociationRJServiceUserReason> {
        if this_ae_title == called_ae_title {
            Ok(())
        } else {
            Err(AssociationRJServiceUserReason::CalledAETitleNotRecognized)
        }
    }
}

/// A DICOM association builder for an acceptor DICOM node,
/// often taking the role of a service class provider (SCP).
///
/// This is the standard way of negotiating and establishing
/// an association with a requesting node.
/// The outcome is a [`ServerAssociation`].
/// Unlike the [`ClientAssociationOptions`],
/// a value of this type can be reused for multiple connections.
///
/// [`ClientAssociationOptions`]: crate::association::ClientAssociationOptions
///
/// The acceptor will admit the uncompressed transfer syntaxes by default,
/// unless one or more transfer syntaxes are explicitly indicated
/// through calls to [`with_transfer_syntax`](Self::with_transfer_syntax).
///
/// Access control logic is also available,
/// enabling application entities to decide on
/// whether to accept or reject the association request
/// based on the _called_ and _calling_ AE titles:
///
/// - By default, the application will accept requests from anyone
///   ([`AcceptAny`]).
/// - To only accept requests with a matching _called_ AE title,
///   add a call to [`accept_called_ae_title`](Self::accept_called_ae_title)
///   ([`AcceptCalledAeTitle`]).
/// - Any other policy can be implemented through the [`AccessControl`] trait.
///
/// # Example
///
/// ```no_run
/// # use std::net::TcpListener;
/// # use medicom_ul::association::server::ServerAssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// # let tcp_listener: TcpListener = unimplemented!();
/// let scp_options = ServerAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .with_transfer_syntax("1.2.840.10008.1.2.1");
///
/// let (stream, _address) = tcp_listener.accept()?;
/// scp_options.establish(stream)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<'a, A> {
    /// the application entity access control policy
    ae_access_control: A,
    /// the AE title of this DICOM node
    ae_title: Cow<'a, str>,
    /// the expected application context name
    application_context_name: Cow<'a, str>,
    /// the list of supported abstract syntaxes
    abstract_syntax_uids: Vec<Cow<'a, str>>,
    /// the list of supported transfer syntaxes
    transfer_syntax_uids: Vec<Cow<'a, str>>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// whether to accept unknown abstract syntaxes
    promiscuous: bool,
}

impl Default for ServerAssociationOptions<'_, AcceptAny> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_access_control: AcceptAny,
            ae_title: "THIS-SCP".into(),
            application_context_name: "1.2.840.10008.3.1.1.1".into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            promiscuous: false,
        }
    }
}

impl ServerAssociationOptions<'_, AcceptAny> {
    /// Create a new set of options for accepting an association.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a, A> ServerAssociationOptions<'a, A>
where
    A: AccessControl,
{
    /// Change the access control policy to accept any association
    /// regardless of the specified AE titles.
    ///
    /// This is the default behavior when the options are first created.
    pub fn accept_any(self) -> ServerAssociationOptions<'a, AcceptAny> {
        self.ae_access_control(AcceptAny)
    }

    /// Change the access control policy to accept an association
    /// if the called AE title matches this node's AE title.
    pub fn accept_called_ae_title(self) -> ServerAssociationOptions<'a, AcceptCalledAeTitle> {
        self.ae_access_control(AcceptCalledAeTitle)
    }

    /// Change the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<'a, P>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            promiscuous,
            ae_access_control: _,
        } = self;

        ServerAssociationOptions {
            ae_access_control: access_control,
            ae_title,
            application_context_name,
            abstract_syntax_uids,
            transfer_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            promiscuous,
        }
    }

    /// Define the application entity title referring to this DICOM node.
    ///
    /// The default is `THIS-SCP`.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Include this abstract syntax
    /// in the list of accepted abstract syntaxes.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.abstract_syntax_uids
            .push(trim_uid(abstract_syntax_uid.into()));
        self
    }

    /// Include this transfer syntax
    /// in the list of accepted transfer syntaxes.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.transfer_syntax_uids
            .push(trim_uid(transfer_syntax_uid.into()));
        self
    }

    /// Override the maximum expected PDU length.
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

    /// Override promiscuous mode:
    /// whether to accept unknown abstract syntaxes.
    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    /// Negotiate an association with the given TCP stream.
    pub fn establish(&self, mut socket: TcpStream) -> Result<ServerAssociation> {
        ensure!(
            !self.abstract_syntax_uids.is_empty() || self.promiscuous,
            MissingAbstractSyntaxSnafu
        );

        let msg = read_pdu(&mut socket, MAXIMUM_PDU_SIZE, self.strict).context(ReceiveRequestSnafu)?;
        let mut buffer: Vec<u8> = Vec::with_capacity(self.max_pdu_length as usize);
        match self.process_association_rq(msg) {
            Ok((pdu, negotiated)) => {
                write_pdu(&mut buffer, &pdu).context(SendResponseSnafu)?;
                socket.write_all(&buffer).context(WireSendSnafu)?;
                buffer.clear();
                Ok(ServerAssociation {
                    presentation_contexts: negotiated.presentation_contexts,
                    requestor_max_pdu_length: negotiated.peer_max_pdu_length,
                    acceptor_max_pdu_length: self.max_pdu_length,
                    socket,
                    client_ae_title: negotiated.peer_ae_title,
                    buffer,
                    strict: self.strict,
                })
            }
            Err((pdu, err)) => {
                // send the rejection/abort PDU before reporting the error
                write_pdu(&mut buffer, &pdu).context(SendResponseSnafu)?;
                socket.write_all(&buffer).context(WireSendSnafu)?;
                Err(err)
            }
        }
    }

    /// Process an association request PDU.
    ///
    /// In the success case, returns the PDU to write back to the requestor
    /// alongside the negotiated parameters.
    /// In the error case, returns the PDU to write back
    /// alongside the error to report.
    #[allow(clippy::result_large_err)]
    fn process_association_rq(
        &self,
        msg: Pdu,
    ) -> std::result::Result<(Pdu, NegotiatedOptions), (Pdu, Error)> {
        match msg {
            Pdu::AssociationRQ(AssociationRQ {
                protocol_version,
                calling_ae_title,
                called_ae_title,
                application_context_name,
                presentation_contexts,
                user_variables,
            }) => {
                if protocol_version != self.protocol_version {
                    let association_rj = AssociationRJ {
                        result: AssociationRJResult::Permanent,
                        source: AssociationRJSource::ServiceUser(
                            AssociationRJServiceUserReason::NoReasonGiven,
                        ),
                    };
                    let pdu = Pdu::AssociationRJ(association_rj.clone());
                    return Err((pdu, RejectedSnafu { association_rj }.build()));
                }

                if application_context_name != self.application_context_name {
                    let association_rj = AssociationRJ {
                        result: AssociationRJResult::Permanent,
                        source: AssociationRJSource::ServiceUser(
                            AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
                        ),
                    };
                    let pdu = Pdu::AssociationRJ(association_rj.clone());
                    return Err((pdu, RejectedSnafu { association_rj }.build()));
                }

                if let Err(reason) = self.ae_access_control.check_access(
                    &self.ae_title,
                    &calling_ae_title,
                    &called_ae_title,
                ) {
                    let association_rj = AssociationRJ {
                        result: AssociationRJResult::Permanent,
                        source: AssociationRJSource::ServiceUser(reason),
                    };
                    let pdu = Pdu::AssociationRJ(association_rj.clone());
                    return Err((pdu, RejectedSnafu { association_rj }.build()));
                }

                // fetch the maximum PDU length that the requestor admits
                let requestor_max_pdu_length = user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);

                // treat 0 as the maximum size admitted by the standard;
                // values below the standard minimum are clamped up to it
                let requestor_max_pdu_length = if requestor_max_pdu_length == 0 {
                    MAXIMUM_PDU_SIZE
                } else {
                    requestor_max_pdu_length.max(MINIMUM_PDU_SIZE)
                };

                let presentation_contexts_negotiated: Vec<_> = presentation_contexts
                    .into_iter()
                    .map(|pc| self.negotiate_presentation_context(pc))
                    .collect();

                let pdu = Pdu::AssociationAC(AssociationAC {
                    protocol_version: self.protocol_version,
                    calling_ae_title: calling_ae_title.clone(),
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: presentation_contexts_negotiated.clone(),
                    user_variables: vec![
                        UserVariableItem::MaxLength(self.max_pdu_length),
                        UserVariableItem::ImplementationClassUID(
                            IMPLEMENTATION_CLASS_UID.to_string(),
                        ),
                        UserVariableItem::ImplementationVersionName(
                            IMPLEMENTATION_VERSION_NAME.to_string(),
                        ),
                    ],
                });
                Ok((
                    pdu,
                    NegotiatedOptions {
                        peer_max_pdu_length: requestor_max_pdu_length,
                        presentation_contexts: presentation_contexts_negotiated,
                        peer_ae_title: calling_ae_title,
                    },
                ))
            }
            Pdu::ReleaseRQ => Err((Pdu::ReleaseRP, AbortedSnafu.build())),
            pdu @ Pdu::AssociationAC { .. }
            | pdu @ Pdu::AssociationRJ { .. }
            | pdu @ Pdu::PData { .. }
            | pdu @ Pdu::ReleaseRP
            | pdu @ Pdu::AbortRQ { .. } => Err((
                Pdu::AbortRQ {
                    source: AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    ),
                },
                UnexpectedPduSnafu { pdu }.build(),
            )),
            pdu @ Pdu::Unknown { .. } => Err((
                Pdu::AbortRQ {
                    source: AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnrecognizedPdu,
                    ),
                },
                UnknownPduSnafu { pdu }.build(),
            )),
        }
    }

    /// Negotiate a single proposed presentation context.
    ///
    /// The decision is deterministic:
    /// an unknown abstract syntax is refused
    /// (unless in promiscuous mode),
    /// and otherwise the first proposed transfer syntax
    /// to be admitted by this entity wins.
    fn negotiate_presentation_context(
        &self,
        pc: crate::pdu::PresentationContextProposed,
    ) -> PresentationContextResult {
        let abstract_syntax = trim_uid(Cow::from(pc.abstract_syntax));
        if !self.abstract_syntax_uids.contains(&abstract_syntax) && !self.promiscuous {
            return PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            };
        }

        let (transfer_syntax, reason) = self
            .choose_ts(pc.transfer_syntaxes)
            .map(|ts| (ts, PresentationContextResultReason::Acceptance))
            .unwrap_or_else(|| {
                (
                    "1.2.840.10008.1.2".to_string(),
                    PresentationContextResultReason::TransferSyntaxesNotSupported,
                )
            });

        PresentationContextResult {
            id: pc.id,
            reason,
            transfer_syntax,
        }
    }

    /// From a sequence of proposed transfer syntaxes,
    /// choose the first one to
    /// - be on the options' list of transfer syntaxes, and
    /// - be supported by this implementation.
    ///
    /// If the options' list is empty,
    /// accept the first supported transfer syntax.
    fn choose_ts<I, T>(&self, it: I) -> Option<T>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        if self.transfer_syntax_uids.is_empty() {
            return choose_supported(it);
        }

        it.into_iter().find(|ts| {
            let ts = ts.as_ref();
            self.transfer_syntax_uids.contains(&trim_uid(ts.into())) && is_supported(ts)
        })
    }
}

/// The parameters accorded during association negotiation.
struct NegotiatedOptions {
    peer_max_pdu_length: u32,
    presentation_contexts: Vec<PresentationContextResult>,
    peer_ae_title: String,
}

/// Check that this implementation supports the given transfer syntax,
/// meaning that it can parse and decode data sets encoded with it.
pub fn is_supported(ts_uid: &str) -> bool {
    TransferSyntax::from_uid(ts_uid).is_some()
}

/// From a sequence of transfer syntaxes,
/// choose the first one supported by this implementation.
pub fn choose_supported<I, T>(it: I) -> Option<T>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    it.into_iter().find(|ts| is_supported(ts.as_ref()))
}

/// A DICOM upper level association from the perspective
/// of an accepting application entity.
///
/// The most common operations of an established association are
/// [`send`](Self::send)
/// and [`receive`](Self::receive).
/// Sending large P-Data fragments may be easier through the P-Data sender
/// abstraction (see [`send_pdata`](Self::send_pdata)).
#[derive(Debug)]
pub struct ServerAssociation {
    /// The accorded presentation contexts
    presentation_contexts: Vec<PresentationContextResult>,
    /// The maximum PDU length that the remote application entity accepts
    requestor_max_pdu_length: u32,
    /// The maximum PDU length that this application entity is expecting to receive
    acceptor_max_pdu_length: u32,
    /// The TCP stream to the other DICOM node
    socket: TcpStream,
    /// The application entity title of the other DICOM node
    client_ae_title: String,
    /// Buffer to assemble PDUs before sending them on the wire
    buffer: Vec<u8>,
    /// whether to receive PDUs in strict mode
    strict: bool,
}

impl ServerAssociation {
    /// Obtain a view of the negotiated presentation contexts.
    pub fn presentation_contexts(&self) -> &[PresentationContextResult] {
        &self.presentation_contexts
    }

    /// Obtain the remote DICOM node's application entity title.
    pub fn client_ae_title(&self) -> &str {
        &self.client_ae_title
    }

    /// Retrieve the maximum PDU length
    /// that the requestor is expecting to receive.
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// Send a PDU message to the other intervenient.
    pub fn send(&mut self, msg: &Pdu) -> Result<()> {
        self.buffer.clear();
        write_pdu(&mut self.buffer, msg).context(SendSnafu)?;
        self.socket.write_all(&self.buffer).context(WireSendSnafu)
    }

    /// Read a PDU message from the other intervenient.
    pub fn receive(&mut self) -> Result<Pdu> {
        read_pdu(&mut self.socket, self.acceptor_max_pdu_length, self.strict).context(ReceiveSnafu)
    }

    /// Send an abort message and shut down the TCP connection,
    /// terminating the association.
    pub fn abort(mut self) -> Result<()> {
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::ReasonNotSpecified,
            ),
        };
        let out = self.send(&pdu);
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
        out
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
            self.requestor_max_pdu_length,
        )
    }

    /// Obtain access to the inner TCP stream
    /// connected to the association requestor.
    ///
    /// **Note:** reading and writing should be done with care
    /// to avoid inconsistencies in the association state.
    /// Do not call `send` and `receive` while not in a PDU boundary.
    pub fn inner_stream(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    /// Hand the connection and the negotiated parameters over,
    /// so that a message exchange engine can drive the association.
    pub fn into_parts(self) -> Result<AssociationParts> {
        Ok(AssociationParts {
            socket: self.socket,
            presentation_contexts: self.presentation_contexts,
            peer_max_pdu_length: self.requestor_max_pdu_length,
            max_pdu_length: self.acceptor_max_pdu_length,
            strict: self.strict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PresentationContextProposed;

    #[test]
    fn test_choose_supported() {
        assert_eq!(choose_supported(vec!["1.1.1.1.1"]), None);

        // string slices, implicit VR first
        assert_eq!(
            choose_supported(vec!["1.2.840.10008.1.2", "1.2.840.10008.1.2.1"]),
            Some("1.2.840.10008.1.2"),
        );

        // heap allocated strings, explicit VR first
        assert_eq!(
            choose_supported(vec![
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string()
            ]),
            Some("1.2.840.10008.1.2.1".to_string()),
        );
    }

    fn request_with_context(pc: PresentationContextProposed) -> Pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "CALLER".to_string(),
            called_ae_title: "THIS-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![pc],
            user_variables: vec![UserVariableItem::MaxLength(DEFAULT_MAX_PDU)],
        })
    }

    #[test]
    fn negotiation_is_first_match_and_deterministic() {
        let options = ServerAssociationOptions::new()
            .with_abstract_syntax("1.2.840.10008.1.1")
            .with_transfer_syntax("1.2.840.10008.1.2")
            .with_transfer_syntax("1.2.840.10008.1.2.1");

        let request = request_with_context(PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec![
                "1.2.840.10008.1.2.4.50".to_string(),
                "1.2.840.10008.1.2.1".to_string(),
                "1.2.840.10008.1.2".to_string(),
            ],
        });

        for _ in 0..2 {
            let (pdu, negotiated) = options
                .process_association_rq(request.clone())
                .map_err(|(_, e)| e)
                .unwrap();
            // the first proposed transfer syntax in the supported list wins
            assert_eq!(
                negotiated.presentation_contexts,
                vec![PresentationContextResult {
                    id: 1,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
                }]
            );
            match pdu {
                Pdu::AssociationAC(AssociationAC {
                    presentation_contexts,
                    ..
                }) => assert_eq!(presentation_contexts, negotiated.presentation_contexts),
                other => panic!("unexpected PDU: {:?}", other),
            }
        }
    }

    #[test]
    fn unknown_abstract_syntax_is_refused_unless_promiscuous() {
        let request = request_with_context(PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.999.1".to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
        });

        let options = ServerAssociationOptions::new().with_abstract_syntax("1.2.840.10008.1.1");
        let (_, negotiated) = options
            .process_association_rq(request.clone())
            .map_err(|(_, e)| e)
            .unwrap();
        assert_eq!(
            negotiated.presentation_contexts[0].reason,
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );

        let options = options.promiscuous(true);
        let (_, negotiated) = options
            .process_association_rq(request)
            .map_err(|(_, e)| e)
            .unwrap();
        assert_eq!(
            negotiated.presentation_contexts[0].reason,
            PresentationContextResultReason::Acceptance
        );
    }

    #[test]
    fn no_common_transfer_syntax_is_refused() {
        let options = ServerAssociationOptions::new()
            .with_abstract_syntax("1.2.840.10008.1.1")
            .with_transfer_syntax("1.2.840.10008.1.2.1");

        let request = request_with_context(PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2.4.50".to_string()],
        });

        let (_, negotiated) = options
            .process_association_rq(request)
            .map_err(|(_, e)| e)
            .unwrap();
        assert_eq!(
            negotiated.presentation_contexts,
            vec![PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            }]
        );
    }

    #[test]
    fn tiny_max_length_proposals_are_clamped() {
        let options = ServerAssociationOptions::new().with_abstract_syntax("1.2.840.10008.1.1");

        let request = Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "CALLER".to_string(),
            called_ae_title: "THIS-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            }],
            // smaller than a P-Data value header, would break fragment sizing
            user_variables: vec![UserVariableItem::MaxLength(5)],
        });

        let (_, negotiated) = options
            .process_association_rq(request)
            .map_err(|(_, e)| e)
            .unwrap();
        assert_eq!(negotiated.peer_max_pdu_length, MINIMUM_PDU_SIZE);
    }

    #[test]
    fn mismatched_called_ae_title_is_rejected() {
        let options = ServerAssociationOptions::new()
            .accept_called_ae_title()
            .ae_title("RIGHT-SCP")
            .with_abstract_syntax("1.2.840.10008.1.1");

        let request = request_with_context(PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
        });

        let (pdu, err) = options.process_association_rq(request).err().unwrap();
        assert!(matches!(err, Error::Rejected { .. }));
        match pdu {
            Pdu::AssociationRJ(AssociationRJ { result, source }) => {
                assert_eq!(result, AssociationRJResult::Permanent);
                assert_eq!(
                    source,
                    AssociationRJSource::ServiceUser(
                        AssociationRJServiceUserReason::CalledAETitleNotRecognized
                    )
                );
            }
            other => panic!("unexpected PDU: {:?}", other),
        }
    }
}
