//! DICOM message service element (DIMSE) support.
//!
//! This module builds the message exchange service on top of an
//! established association:
//!
//! - [`CommandField`] and [`CommandSet`] describe DIMSE command sets,
//!   with typed accessors over the command group attributes
//!   and builders for requests and responses.
//! - [`Connection`] drives the exchange over a [`Transport`](crate::transport::Transport):
//!   its reader loop reassembles incoming messages from P-Data fragments
//!   and dispatches them to a [`DimseHandler`],
//!   while a cloneable [`DimseSender`] serves outgoing messages
//!   from any thread.

pub mod engine;

pub use engine::{
    Connection, DimseContext, DimseHandler, DimseOptions, DimseSender, Disposition, Error,
    Outcome, Result, SpoolPolicy,
};

use medicom_core::header::{Tag, VR};
use medicom_core::value::{DicomValue, PrimitiveValue};
use medicom_core::{DataElement, Dataset};

/// The attribute tags of the command group (`0000`).
pub mod tags {
    use medicom_core::header::Tag;

    pub const AFFECTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0002);
    pub const REQUESTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0003);
    pub const COMMAND_FIELD: Tag = Tag(0x0000, 0x0100);
    pub const MESSAGE_ID: Tag = Tag(0x0000, 0x0110);
    pub const MESSAGE_ID_BEING_RESPONDED_TO: Tag = Tag(0x0000, 0x0120);
    pub const MOVE_DESTINATION: Tag = Tag(0x0000, 0x0600);
    pub const PRIORITY: Tag = Tag(0x0000, 0x0700);
    pub const COMMAND_DATA_SET_TYPE: Tag = Tag(0x0000, 0x0800);
    pub const STATUS: Tag = Tag(0x0000, 0x0900);
    pub const OFFENDING_ELEMENT: Tag = Tag(0x0000, 0x0901);
    pub const ERROR_COMMENT: Tag = Tag(0x0000, 0x0902);
    pub const ERROR_ID: Tag = Tag(0x0000, 0x0903);
    pub const AFFECTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1000);
    pub const REQUESTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1001);
    pub const EVENT_TYPE_ID: Tag = Tag(0x0000, 0x1002);
    pub const ATTRIBUTE_IDENTIFIER_LIST: Tag = Tag(0x0000, 0x1005);
    pub const ACTION_TYPE_ID: Tag = Tag(0x0000, 0x1008);
    pub const NUMBER_OF_REMAINING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1020);
    pub const NUMBER_OF_COMPLETED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1021);
    pub const NUMBER_OF_FAILED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1022);
    pub const NUMBER_OF_WARNING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1023);
    pub const MOVE_ORIGINATOR_AE_TITLE: Tag = Tag(0x0000, 0x1030);
    pub const MOVE_ORIGINATOR_MESSAGE_ID: Tag = Tag(0x0000, 0x1031);
}

/// Well-known DIMSE status codes.
pub mod status {
    /// The operation completed successfully.
    pub const SUCCESS: u16 = 0x0000;
    /// The operation failed while processing.
    pub const PROCESSING_FAILURE: u16 = 0x0110;
    /// The requested SOP class is not supported.
    pub const SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;
    /// The operation was canceled on request.
    pub const CANCEL: u16 = 0xFE00;
    /// More responses are forthcoming.
    pub const PENDING: u16 = 0xFF00;
}

/// The value of the command data set type attribute
/// declaring that no data set follows the command set.
pub const NO_DATA_SET: u16 = 0x0101;

/// The command data set type value used when a data set follows.
const HAS_DATA_SET: u16 = 0x0202;

/// The sub-operation counters of a C-GET or C-MOVE response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubOperations {
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// The kind of a DIMSE message, as carried
/// in the command field attribute (0000,0100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    NEventReportRq = 0x0100,
    NEventReportRsp = 0x8100,
    NGetRq = 0x0110,
    NGetRsp = 0x8110,
    NSetRq = 0x0120,
    NSetRsp = 0x8120,
    NActionRq = 0x0130,
    NActionRsp = 0x8130,
    NCreateRq = 0x0140,
    NCreateRsp = 0x8140,
    NDeleteRq = 0x0150,
    NDeleteRsp = 0x8150,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    /// The standard u16 code of this command field.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Interpret a command field code.
    pub fn from_code(code: u16) -> Option<CommandField> {
        use CommandField::*;
        Some(match code {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0100 => NEventReportRq,
            0x8100 => NEventReportRsp,
            0x0110 => NGetRq,
            0x8110 => NGetRsp,
            0x0120 => NSetRq,
            0x8120 => NSetRsp,
            0x0130 => NActionRq,
            0x8130 => NActionRsp,
            0x0140 => NCreateRq,
            0x8140 => NCreateRsp,
            0x0150 => NDeleteRq,
            0x8150 => NDeleteRsp,
            0x0FFF => CCancelRq,
            _ => return None,
        })
    }

    /// Whether this command field identifies a request message.
    pub fn is_request(self) -> bool {
        !self.is_response()
    }

    /// Whether this command field identifies a response message.
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

impl std::fmt::Display for CommandField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CommandField::*;
        let name = match self {
            CStoreRq => "C-STORE-RQ",
            CStoreRsp => "C-STORE-RSP",
            CGetRq => "C-GET-RQ",
            CGetRsp => "C-GET-RSP",
            CFindRq => "C-FIND-RQ",
            CFindRsp => "C-FIND-RSP",
            CMoveRq => "C-MOVE-RQ",
            CMoveRsp => "C-MOVE-RSP",
            CEchoRq => "C-ECHO-RQ",
            CEchoRsp => "C-ECHO-RSP",
            NEventReportRq => "N-EVENT-REPORT-RQ",
            NEventReportRsp => "N-EVENT-REPORT-RSP",
            NGetRq => "N-GET-RQ",
            NGetRsp => "N-GET-RSP",
            NSetRq => "N-SET-RQ",
            NSetRsp => "N-SET-RSP",
            NActionRq => "N-ACTION-RQ",
            NActionRsp => "N-ACTION-RSP",
            NCreateRq => "N-CREATE-RQ",
            NCreateRsp => "N-CREATE-RSP",
            NDeleteRq => "N-DELETE-RQ",
            NDeleteRsp => "N-DELETE-RSP",
            CCancelRq => "C-CANCEL-RQ",
        };
        f.write_str(name)
    }
}

/// The priority of a composite service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Priority {
    Medium = 0x0000,
    High = 0x0001,
    Low = 0x0002,
}

impl Priority {
    /// The standard u16 code of this priority.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Interpret a priority code.
    pub fn from_code(code: u16) -> Option<Priority> {
        match code {
            0x0000 => Some(Priority::Medium),
            0x0001 => Some(Priority::High),
            0x0002 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A DIMSE command set:
/// the command group data set of a message,
/// with typed accessors over its attributes.
///
/// Command sets travel implicit VR little endian
/// with group length elements,
/// regardless of the negotiated transfer syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSet {
    dataset: Dataset,
}

impl CommandSet {
    /// Wrap a decoded data set as a command set.
    pub fn from_dataset(dataset: Dataset) -> Self {
        CommandSet { dataset }
    }

    /// Start building a request command set.
    pub fn command_request(field: CommandField, message_id: u16) -> Self {
        debug_assert!(field.is_request());
        let mut dataset = Dataset::new();
        dataset.put_value(tags::COMMAND_FIELD, VR::US, field.code());
        dataset.put_value(tags::MESSAGE_ID, VR::US, message_id);
        dataset.put_value(tags::COMMAND_DATA_SET_TYPE, VR::US, NO_DATA_SET);
        CommandSet { dataset }
    }

    /// Start building a response command set.
    pub fn command_response(field: CommandField, responded_to: u16, status: u16) -> Self {
        debug_assert!(field.is_response());
        let mut dataset = Dataset::new();
        dataset.put_value(tags::COMMAND_FIELD, VR::US, field.code());
        dataset.put_value(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, responded_to);
        dataset.put_value(tags::STATUS, VR::US, status);
        dataset.put_value(tags::COMMAND_DATA_SET_TYPE, VR::US, NO_DATA_SET);
        CommandSet { dataset }
    }

    /// Declare that a data set follows this command set.
    pub fn with_dataset(mut self) -> Self {
        self.dataset
            .put_value(tags::COMMAND_DATA_SET_TYPE, VR::US, HAS_DATA_SET);
        self
    }

    pub fn with_affected_sop_class_uid(mut self, uid: &str) -> Self {
        self.dataset
            .put_value(tags::AFFECTED_SOP_CLASS_UID, VR::UI, uid);
        self
    }

    pub fn with_requested_sop_class_uid(mut self, uid: &str) -> Self {
        self.dataset
            .put_value(tags::REQUESTED_SOP_CLASS_UID, VR::UI, uid);
        self
    }

    pub fn with_affected_sop_instance_uid(mut self, uid: &str) -> Self {
        self.dataset
            .put_value(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, uid);
        self
    }

    pub fn with_requested_sop_instance_uid(mut self, uid: &str) -> Self {
        self.dataset
            .put_value(tags::REQUESTED_SOP_INSTANCE_UID, VR::UI, uid);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.dataset
            .put_value(tags::PRIORITY, VR::US, priority.code());
        self
    }

    pub fn with_move_destination(mut self, ae_title: &str) -> Self {
        self.dataset
            .put_value(tags::MOVE_DESTINATION, VR::AE, ae_title);
        self
    }

    pub fn with_move_originator(mut self, ae_title: &str, message_id: u16) -> Self {
        self.dataset
            .put_value(tags::MOVE_ORIGINATOR_AE_TITLE, VR::AE, ae_title);
        self.dataset
            .put_value(tags::MOVE_ORIGINATOR_MESSAGE_ID, VR::US, message_id);
        self
    }

    pub fn with_event_type_id(mut self, event_type: u16) -> Self {
        self.dataset
            .put_value(tags::EVENT_TYPE_ID, VR::US, event_type);
        self
    }

    pub fn with_action_type_id(mut self, action_type: u16) -> Self {
        self.dataset
            .put_value(tags::ACTION_TYPE_ID, VR::US, action_type);
        self
    }

    pub fn with_attribute_identifier_list(mut self, attributes: &[Tag]) -> Self {
        self.dataset.put(DataElement::new(
            tags::ATTRIBUTE_IDENTIFIER_LIST,
            VR::AT,
            DicomValue::Primitive(PrimitiveValue::Tags(attributes.iter().copied().collect())),
        ));
        self
    }

    pub fn with_sub_operations(mut self, counts: SubOperations) -> Self {
        self.dataset.put_value(
            tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
            VR::US,
            counts.remaining,
        );
        self.dataset.put_value(
            tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
            VR::US,
            counts.completed,
        );
        self.dataset
            .put_value(tags::NUMBER_OF_FAILED_SUBOPERATIONS, VR::US, counts.failed);
        self.dataset.put_value(
            tags::NUMBER_OF_WARNING_SUBOPERATIONS,
            VR::US,
            counts.warning,
        );
        self
    }

    pub fn with_error_comment(mut self, comment: &str) -> Self {
        self.dataset.put_value(tags::ERROR_COMMENT, VR::LO, comment);
        self
    }

    /// Access the underlying data set.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Unwrap the underlying data set.
    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    /// The message kind, if the command field is present and known.
    pub fn command_field(&self) -> Option<CommandField> {
        self.dataset
            .get_u16(tags::COMMAND_FIELD)
            .and_then(CommandField::from_code)
    }

    pub fn message_id(&self) -> Option<u16> {
        self.dataset.get_u16(tags::MESSAGE_ID)
    }

    pub fn message_id_responded_to(&self) -> Option<u16> {
        self.dataset.get_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
    }

    pub fn affected_sop_class_uid(&self) -> Option<String> {
        self.dataset.get_str(tags::AFFECTED_SOP_CLASS_UID)
    }

    pub fn requested_sop_class_uid(&self) -> Option<String> {
        self.dataset.get_str(tags::REQUESTED_SOP_CLASS_UID)
    }

    pub fn affected_sop_instance_uid(&self) -> Option<String> {
        self.dataset.get_str(tags::AFFECTED_SOP_INSTANCE_UID)
    }

    pub fn requested_sop_instance_uid(&self) -> Option<String> {
        self.dataset.get_str(tags::REQUESTED_SOP_INSTANCE_UID)
    }

    /// The request priority; medium when absent or unrecognized.
    pub fn priority(&self) -> Priority {
        self.dataset
            .get_u16(tags::PRIORITY)
            .and_then(Priority::from_code)
            .unwrap_or(Priority::Medium)
    }

    pub fn status(&self) -> Option<u16> {
        self.dataset.get_u16(tags::STATUS)
    }

    /// Whether a data set follows this command set,
    /// per the command data set type attribute.
    pub fn has_dataset(&self) -> bool {
        self.dataset
            .get_u16_or(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET)
            != NO_DATA_SET
    }

    pub fn event_type_id(&self) -> Option<u16> {
        self.dataset.get_u16(tags::EVENT_TYPE_ID)
    }

    pub fn action_type_id(&self) -> Option<u16> {
        self.dataset.get_u16(tags::ACTION_TYPE_ID)
    }

    pub fn attribute_identifier_list(&self) -> Vec<Tag> {
        self.dataset
            .get(tags::ATTRIBUTE_IDENTIFIER_LIST)
            .and_then(|e| e.value().as_primitive())
            .and_then(|v| v.tags().ok())
            .map(|tags| tags.to_vec())
            .unwrap_or_default()
    }

    /// The sub-operation counters of a C-GET or C-MOVE response.
    /// Absent counters read as zero.
    pub fn sub_operations(&self) -> SubOperations {
        SubOperations {
            remaining: self
                .dataset
                .get_u16_or(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, 0),
            completed: self
                .dataset
                .get_u16_or(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, 0),
            failed: self
                .dataset
                .get_u16_or(tags::NUMBER_OF_FAILED_SUBOPERATIONS, 0),
            warning: self
                .dataset
                .get_u16_or(tags::NUMBER_OF_WARNING_SUBOPERATIONS, 0),
        }
    }

    pub fn move_destination(&self) -> Option<String> {
        self.dataset.get_str(tags::MOVE_DESTINATION)
    }

    pub fn move_originator_ae_title(&self) -> Option<String> {
        self.dataset.get_str(tags::MOVE_ORIGINATOR_AE_TITLE)
    }

    pub fn move_originator_message_id(&self) -> Option<u16> {
        self.dataset.get_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID)
    }

    pub fn error_comment(&self) -> Option<String> {
        self.dataset.get_str(tags::ERROR_COMMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medicom_core::buffer::ChunkSource;
    use medicom_core::transfer_syntax::IMPLICIT_VR_LE;
    use medicom_parser::read::{DatasetReader, ReadStatus};
    use medicom_parser::write::write_dataset_with_group_lengths;

    #[test]
    fn command_field_codes_round_trip() {
        for &field in &[
            CommandField::CStoreRq,
            CommandField::CEchoRsp,
            CommandField::NActionRq,
            CommandField::CCancelRq,
        ] {
            assert_eq!(CommandField::from_code(field.code()), Some(field));
        }
        assert_eq!(CommandField::from_code(0x4242), None);

        assert!(CommandField::CEchoRq.is_request());
        assert!(CommandField::CEchoRsp.is_response());
        // C-CANCEL is a request even though it echoes a message id
        assert!(CommandField::CCancelRq.is_request());
    }

    #[test]
    fn echo_request_builds_and_reads_back() {
        let cmd = CommandSet::command_request(CommandField::CEchoRq, 7)
            .with_affected_sop_class_uid("1.2.840.10008.1.1");

        assert_eq!(cmd.command_field(), Some(CommandField::CEchoRq));
        assert_eq!(cmd.message_id(), Some(7));
        assert_eq!(
            cmd.affected_sop_class_uid().as_deref(),
            Some("1.2.840.10008.1.1")
        );
        assert!(!cmd.has_dataset());
        assert_eq!(cmd.priority(), Priority::Medium);
    }

    #[test]
    fn store_response_carries_status_and_instance() {
        let cmd = CommandSet::command_response(CommandField::CStoreRsp, 3, status::SUCCESS)
            .with_affected_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .with_affected_sop_instance_uid("1.2.3.4");
        assert_eq!(cmd.command_field(), Some(CommandField::CStoreRsp));
        assert_eq!(cmd.message_id_responded_to(), Some(3));
        assert_eq!(cmd.status(), Some(status::SUCCESS));
        assert_eq!(cmd.affected_sop_instance_uid().as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn move_response_counters_read_back() {
        let cmd = CommandSet::command_response(CommandField::CMoveRsp, 5, status::PENDING)
            .with_sub_operations(SubOperations {
                remaining: 4,
                completed: 2,
                failed: 1,
                warning: 0,
            })
            .with_dataset();
        let counts = cmd.sub_operations();
        assert_eq!(counts.remaining, 4);
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.warning, 0);
        assert!(cmd.has_dataset());
    }

    #[test]
    fn command_set_survives_the_wire_encoding() {
        let cmd = CommandSet::command_request(CommandField::CStoreRq, 42)
            .with_affected_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .with_affected_sop_instance_uid("1.2.3.4.5")
            .with_priority(Priority::High)
            .with_dataset();

        let mut encoded = Vec::new();
        write_dataset_with_group_lengths(cmd.dataset(), IMPLICIT_VR_LE, &mut encoded).unwrap();

        let mut reader = DatasetReader::new(ChunkSource::new(), IMPLICIT_VR_LE);
        reader.source_mut().append(encoded);
        assert_eq!(reader.read(None).unwrap(), ReadStatus::Complete);
        assert!(reader.is_balanced());

        let decoded = CommandSet::from_dataset(reader.into_dataset());
        assert_eq!(decoded.command_field(), Some(CommandField::CStoreRq));
        assert_eq!(decoded.message_id(), Some(42));
        assert_eq!(decoded.priority(), Priority::High);
        assert!(decoded.has_dataset());
        assert_eq!(
            decoded.affected_sop_instance_uid().as_deref(),
            Some("1.2.3.4.5")
        );
    }

    #[test]
    fn attribute_list_round_trips() {
        let cmd = CommandSet::command_request(CommandField::NGetRq, 1)
            .with_requested_sop_class_uid("1.2.840.10008.3.1.2.3.1")
            .with_requested_sop_instance_uid("1.2.3")
            .with_attribute_identifier_list(&[Tag(0x0010, 0x0010), Tag(0x0010, 0x0020)]);
        assert_eq!(
            cmd.attribute_identifier_list(),
            vec![Tag(0x0010, 0x0010), Tag(0x0010, 0x0020)]
        );
    }
}
