//! Protocol data unit module
//!
//! This module comprises the data structures for the protocol data units
//! (PDUs) of the upper layer protocol,
//! alongside the [reader](crate::pdu::read_pdu)
//! and [writer](crate::pdu::write_pdu) functions
//! for translating them from and to bytes on the wire.
pub mod reader;
pub mod writer;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU size,
/// which is the suggested maximum PDU length
/// when no other value is negotiated.
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// which is the minimum value that an application entity
/// may declare as its maximum PDU length.
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// an upper bound enforced when reading PDUs
/// so that a single PDU never claims an absurd amount of memory.
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte), reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

/// A protocol data unit of the upper layer protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    /// A PDU of an unrecognized type,
    /// kept with its raw contents.
    Unknown { pdu_type: u8, data: Vec<u8> },
    /// A-ASSOCIATE-RQ
    AssociationRQ(AssociationRQ),
    /// A-ASSOCIATE-AC
    AssociationAC(AssociationAC),
    /// A-ASSOCIATE-RJ
    AssociationRJ(AssociationRJ),
    /// P-DATA-TF
    PData { data: Vec<PDataValue> },
    /// A-RELEASE-RQ
    ReleaseRQ,
    /// A-RELEASE-RP
    ReleaseRP,
    /// A-ABORT
    AbortRQ { source: AbortRQSource },
}

impl Pdu {
    /// Provide a short description of the PDU,
    /// more suitable for logs than the full debug output.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::Unknown { pdu_type, data } => {
                write!(f, "Unknown[type = {:#04x}, {} bytes]", pdu_type, data.len())
            }
            Pdu::AssociationRQ(AssociationRQ {
                calling_ae_title,
                called_ae_title,
                ..
            }) => write!(
                f,
                "AssociationRQ[{} -> {}]",
                calling_ae_title, called_ae_title
            ),
            Pdu::AssociationAC(AssociationAC {
                presentation_contexts,
                ..
            }) => write!(
                f,
                "AssociationAC[{} presentation contexts]",
                presentation_contexts.len()
            ),
            Pdu::AssociationRJ(AssociationRJ { source, .. }) => {
                write!(f, "AssociationRJ[{}]", source)
            }
            Pdu::PData { data } => {
                write!(f, "PData[{} values]", data.len())
            }
            Pdu::ReleaseRQ => f.write_str("ReleaseRQ"),
            Pdu::ReleaseRP => f.write_str("ReleaseRP"),
            Pdu::AbortRQ { .. } => f.write_str("AbortRQ"),
        }
    }
}

/// An A-ASSOCIATE-RQ PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

/// An A-ASSOCIATE-AC PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationAC {
    pub protocol_version: u16,
    /// echoed from the A-ASSOCIATE-RQ, not to be tested
    pub calling_ae_title: String,
    /// echoed from the A-ASSOCIATE-RQ, not to be tested
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

/// An A-ASSOCIATE-RJ PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

/// A presentation context proposed in an A-ASSOCIATE-RQ.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationContextProposed {
    /// the presentation context identifier, an odd number
    pub id: u8,
    /// the proposed abstract syntax UID
    pub abstract_syntax: String,
    /// the candidate transfer syntax UIDs, in order of preference
    pub transfer_syntaxes: Vec<String>,
}

/// The outcome of a presentation context negotiation
/// as carried in an A-ASSOCIATE-AC.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationContextResult {
    /// the presentation context identifier, as proposed
    pub id: u8,
    /// the outcome of the negotiation for this context
    pub reason: PresentationContextResultReason,
    /// the transfer syntax selected by the acceptor
    pub transfer_syntax: String,
}

/// The result field of a negotiated presentation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    fn from(reason: u8) -> Option<PresentationContextResultReason> {
        match reason {
            0 => Some(PresentationContextResultReason::Acceptance),
            1 => Some(PresentationContextResultReason::UserRejection),
            2 => Some(PresentationContextResultReason::NoReason),
            3 => Some(PresentationContextResultReason::AbstractSyntaxNotSupported),
            4 => Some(PresentationContextResultReason::TransferSyntaxesNotSupported),
            _ => None,
        }
    }
}

/// The result field of an association rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    fn from(value: u8) -> Option<AssociationRJResult> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }
}

/// The source and reason fields of an association rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRJSource {
    /// DICOM UL service-user
    ServiceUser(AssociationRJServiceUserReason),
    /// DICOM UL service-provider (ACSE related function)
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    /// DICOM UL service-provider (presentation related function)
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    fn from(source: u8, reason: u8) -> Option<AssociationRJSource> {
        match (source, reason) {
            (1, 1) => Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::NoReasonGiven,
            )),
            (1, 2) => Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported,
            )),
            (1, 3) => Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized,
            )),
            (1, 7) => Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            )),
            (1, x) => Some(AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::Reserved(x),
            )),
            (2, 1) => Some(AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::NoReasonGiven,
            )),
            (2, 2) => Some(AssociationRJSource::ServiceProviderASCE(
                AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported,
            )),
            (3, 1) => Some(AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
            )),
            (3, 2) => Some(AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
            )),
            (3, x) => Some(AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::Reserved(x),
            )),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssociationRJSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(r) => write!(f, "rejected by service user: {}", r),
            AssociationRJSource::ServiceProviderASCE(r) => {
                write!(f, "rejected by service provider (ACSE): {}", r)
            }
            AssociationRJSource::ServiceProviderPresentation(r) => {
                write!(f, "rejected by service provider (presentation): {}", r)
            }
        }
    }
}

/// The reason of an association rejection by the service user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl std::fmt::Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => {
                f.write_str("calling AE title not recognized")
            }
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => {
                f.write_str("called AE title not recognized")
            }
            AssociationRJServiceUserReason::Reserved(code) => {
                write!(f, "reserved reason {}", code)
            }
        }
    }
}

/// The reason of an association rejection
/// by the service provider, ACSE related function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl std::fmt::Display for AssociationRJServiceProviderASCEReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderASCEReason::NoReasonGiven => {
                f.write_str("no reason given")
            }
            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => {
                f.write_str("protocol version not supported")
            }
        }
    }
}

/// The reason of an association rejection
/// by the service provider, presentation related function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl std::fmt::Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => {
                f.write_str("temporary congestion")
            }
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => {
                f.write_str("local limit exceeded")
            }
            AssociationRJServiceProviderPresentationReason::Reserved(code) => {
                write!(f, "reserved reason {}", code)
            }
        }
    }
}

/// One presentation data value of a P-DATA-TF PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

/// Whether a presentation data value carries
/// command set bytes or data set bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PDataValueType {
    Command,
    Data,
}

/// The source and reason fields of an A-ABORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortRQSource {
    /// DICOM UL service-user initiated abort
    ServiceUser,
    /// DICOM UL service-provider initiated abort
    ServiceProvider(AbortRQServiceProviderReason),
    /// reserved source value, kept as found
    Reserved(u8),
}

impl AbortRQSource {
    fn from(source: u8, reason: u8) -> Option<AbortRQSource> {
        match source {
            0 => Some(AbortRQSource::ServiceUser),
            1 => Some(AbortRQSource::Reserved(reason)),
            2 => AbortRQServiceProviderReason::from(reason).map(AbortRQSource::ServiceProvider),
            _ => None,
        }
    }
}

/// The reason of a service provider initiated abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortRQServiceProviderReason {
    ReasonNotSpecified,
    UnrecognizedPdu,
    UnexpectedPdu,
    Reserved,
    UnrecognizedPduParameter,
    UnexpectedPduParameter,
    InvalidPduParameter,
}

impl AbortRQServiceProviderReason {
    fn from(reason: u8) -> Option<AbortRQServiceProviderReason> {
        match reason {
            0 => Some(AbortRQServiceProviderReason::ReasonNotSpecified),
            1 => Some(AbortRQServiceProviderReason::UnrecognizedPdu),
            2 => Some(AbortRQServiceProviderReason::UnexpectedPdu),
            3 => Some(AbortRQServiceProviderReason::Reserved),
            4 => Some(AbortRQServiceProviderReason::UnrecognizedPduParameter),
            5 => Some(AbortRQServiceProviderReason::UnexpectedPduParameter),
            6 => Some(AbortRQServiceProviderReason::InvalidPduParameter),
            _ => None,
        }
    }
}

/// A variable item of an association PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// A sub-item of the user information variable item.
#[derive(Debug, Clone, PartialEq)]
pub enum UserVariableItem {
    /// an unrecognized sub-item, kept with its raw contents
    Unknown(u8, Vec<u8>),
    /// the maximum PDU length that the emitting entity can receive
    MaxLength(u32),
    ImplementationClassUID(String),
    ImplementationVersionName(String),
}
