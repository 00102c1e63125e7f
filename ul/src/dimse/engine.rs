//! The message exchange engine.
//!
//! A [`Connection`] takes over an established association
//! and drives the DIMSE exchange:
//! the reader loop polls the transport,
//! frames PDUs out of the incoming byte stream,
//! reassembles messages from their P-Data fragments,
//! and dispatches each completed message to a [`DimseHandler`].
//! Outgoing messages go through a [`DimseSender`],
//! which may be cloned and used from any thread
//! while the reader loop is running.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use bytes::BytesMut;
use medicom_core::buffer::ChunkSource;
use medicom_core::header::Tag;
use medicom_core::transfer_syntax::{TransferSyntax, IMPLICIT_VR_LE};
use medicom_core::Dataset;
use medicom_parser::read::{DatasetReader, DatasetReaderOptions, ReadStatus};
use medicom_parser::source::{FilePrefixSource, SuspendSource};
use medicom_parser::write::{write_dataset, write_dataset_with_group_lengths};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::association::{AssociationParts, AssociationState};
use crate::association::{ClientAssociation, PDataWriter, ServerAssociation};
use crate::pdu::{
    read_pdu, write_pdu, AbortRQServiceProviderReason, AbortRQSource, PDataValue, PDataValueType,
    Pdu, PresentationContextResult, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE,
};
use crate::transport::{Poll, Transport};

use super::{status, CommandField, CommandSet, Priority, SubOperations};

/// How often the reader loop checks for shutdown and inactivity.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How many bytes the reader loop pulls from the transport at once.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to clone the transport for sending
    CloneTransport {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to detach the connection from the requestor association
    DetachRequestor {
        #[snafu(backtrace)]
        source: crate::association::client::Error,
    },

    /// failed to detach the connection from the acceptor association
    DetachAcceptor {
        #[snafu(backtrace)]
        source: crate::association::server::Error,
    },

    /// failed to encode the command set
    EncodeCommand {
        #[snafu(backtrace)]
        source: medicom_parser::write::Error,
    },

    /// failed to encode the data set
    EncodeData {
        #[snafu(backtrace)]
        source: medicom_parser::write::Error,
    },

    /// failed to send PDU message
    Send {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to send bytes on the wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to read bytes from the wire
    WireReceive {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to read PDU message
    ReceivePdu {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    #[snafu(display("incoming PDU of {} bytes is too large", length))]
    IncomingPduTooLarge { length: u32, backtrace: Backtrace },

    #[snafu(display("unexpected PDU {}", pdu.short_description()))]
    #[non_exhaustive]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("presentation context {} was not negotiated", id))]
    UnknownPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display(
        "presentation context {} accorded an unsupported transfer syntax `{}`",
        id,
        uid
    ))]
    UnsupportedTransferSyntax {
        id: u8,
        uid: String,
        backtrace: Backtrace,
    },

    /// received data set fragments without a preceding command set
    DataWithoutCommand { backtrace: Backtrace },

    /// failed to decode the command set
    DecodeCommand {
        #[snafu(backtrace)]
        source: medicom_parser::read::Error,
    },

    /// failed to decode the message data set
    DecodeData {
        #[snafu(backtrace)]
        source: medicom_parser::read::Error,
    },

    /// the command set has no recognizable command field
    MissingCommandField { backtrace: Backtrace },

    /// the message ended before its content was complete
    IncompleteMessage { backtrace: Backtrace },

    /// failed to spool incoming data to disk
    Spool {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// an error reported by the message handler
    #[snafu(whatever, display("{}", message))]
    Handler {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How incoming message data sets are buffered during reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpoolPolicy {
    /// keep every message data set in memory
    Never,
    /// spool every message data set to a temporary file
    Always,
    /// spool the data sets of C-STORE requests,
    /// keep everything else in memory
    #[default]
    StoreRequests,
}

/// Configuration of the message exchange engine.
#[derive(Debug, Clone, Default)]
pub struct DimseOptions {
    /// abort the association after this much inactivity;
    /// `None` waits forever
    pub timeout: Option<Duration>,
    /// where to persist unintelligible PDUs for later inspection
    pub diagnostics_dir: Option<PathBuf>,
    /// how to buffer incoming message data sets
    pub spool_policy: SpoolPolicy,
    /// leave spooled values of at least this many bytes on disk,
    /// recorded as deferred file segments
    pub deferred_threshold: Option<u64>,
}

impl DimseOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn diagnostics_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    pub fn spool_policy(mut self, policy: SpoolPolicy) -> Self {
        self.spool_policy = policy;
        self
    }

    pub fn deferred_threshold(mut self, threshold: u64) -> Self {
        self.deferred_threshold = Some(threshold);
        self
    }
}

/// How the association ended, as reported by the reader loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// the association was released in an orderly fashion
    Released,
    /// the association was aborted by either entity
    Aborted { source: AbortRQSource },
    /// the association sat inactive past the configured timeout
    TimedOut,
    /// the peer closed the connection without releasing
    Closed,
}

/// What the reader loop should do after a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// keep exchanging messages
    Continue,
    /// request an orderly release
    Release,
    /// abort the association
    Abort,
}

#[derive(Debug)]
struct SenderInner<T> {
    stream: Mutex<T>,
    /// raised while a send is in progress,
    /// so the reader loop does not count it as inactivity
    transmitting: AtomicBool,
    peer_max_pdu_length: u32,
    presentation_contexts: Vec<PresentationContextResult>,
}

/// A handle for sending DIMSE messages over an association.
///
/// The sender is cheap to clone and all sends are serialized
/// through an internal lock, so clones may be used from any thread
/// while the reader loop runs.
#[derive(Debug)]
pub struct DimseSender<T> {
    inner: Arc<SenderInner<T>>,
}

impl<T> Clone for DimseSender<T> {
    fn clone(&self) -> Self {
        DimseSender {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Clears the transmit flag when the send finishes.
struct TransmitGuard<'a>(&'a AtomicBool);

impl<'a> TransmitGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        TransmitGuard(flag)
    }
}

impl Drop for TransmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A writer which reports the cumulative byte count
/// after every write, so senders can expose progress per PDU.
struct ProgressWriter<'a, W> {
    inner: W,
    sent: u64,
    on_progress: Option<&'a mut dyn FnMut(u64)>,
}

impl<W> Write for ProgressWriter<'_, W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.sent += n as u64;
        if let Some(callback) = self.on_progress.as_mut() {
            callback(self.sent);
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<T> DimseSender<T>
where
    T: Transport,
{
    fn lock_stream(&self) -> MutexGuard<'_, T> {
        // a poisoning send already reported its error; the stream
        // itself is still usable at a PDU boundary or not at all
        self.inner
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a send is in progress right now.
    pub fn is_transmitting(&self) -> bool {
        self.inner.transmitting.load(Ordering::Acquire)
    }

    /// The transfer syntax accorded for the given presentation context.
    pub fn context_transfer_syntax(&self, id: u8) -> Result<TransferSyntax> {
        let pc = self
            .inner
            .presentation_contexts
            .iter()
            .find(|pc| pc.id == id)
            .context(UnknownPresentationContextSnafu { id })?;
        TransferSyntax::from_uid(&pc.transfer_syntax).context(UnsupportedTransferSyntaxSnafu {
            id,
            uid: pc.transfer_syntax.clone(),
        })
    }

    /// Send a bare PDU message.
    pub fn send_pdu(&self, pdu: &Pdu) -> Result<()> {
        let mut buffer = Vec::new();
        write_pdu(&mut buffer, pdu).context(SendSnafu)?;
        let mut stream = self.lock_stream();
        let _transmitting = TransmitGuard::new(&self.inner.transmitting);
        stream.write_all(&buffer).context(WireSendSnafu)
    }

    /// Send a full DIMSE message:
    /// the command set, followed by the data set if one is given.
    ///
    /// The command set travels implicit VR little endian
    /// with group lengths; the data set is encoded
    /// with the transfer syntax accorded for the presentation context.
    /// `progress` is called with the cumulative number of bytes
    /// put on the wire as the data set goes out.
    pub fn send_message(
        &self,
        presentation_context_id: u8,
        command: &CommandSet,
        dataset: Option<&Dataset>,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        let ts = self.context_transfer_syntax(presentation_context_id)?;
        let mut stream = self.lock_stream();
        let _transmitting = TransmitGuard::new(&self.inner.transmitting);
        {
            let mut writer = PDataWriter::new(
                &mut *stream,
                presentation_context_id,
                PDataValueType::Command,
                self.inner.peer_max_pdu_length,
            );
            write_dataset_with_group_lengths(command.dataset(), IMPLICIT_VR_LE, &mut writer)
                .context(EncodeCommandSnafu)?;
            writer.finish().context(WireSendSnafu)?;
        }
        if let Some(dataset) = dataset {
            let mut counted = ProgressWriter {
                inner: &mut *stream,
                sent: 0,
                on_progress: progress,
            };
            let mut writer = PDataWriter::new(
                &mut counted,
                presentation_context_id,
                PDataValueType::Data,
                self.inner.peer_max_pdu_length,
            );
            write_dataset(dataset, ts, &mut writer).context(EncodeDataSnafu)?;
            writer.finish().context(WireSendSnafu)?;
        }
        Ok(())
    }

    /// Send a DIMSE message whose data set bytes
    /// come from an arbitrary reader, already encoded
    /// in the accorded transfer syntax.
    pub fn send_message_from(
        &self,
        presentation_context_id: u8,
        command: &CommandSet,
        data: &mut dyn std::io::Read,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        self.context_transfer_syntax(presentation_context_id)?;
        let mut stream = self.lock_stream();
        let _transmitting = TransmitGuard::new(&self.inner.transmitting);
        {
            let mut writer = PDataWriter::new(
                &mut *stream,
                presentation_context_id,
                PDataValueType::Command,
                self.inner.peer_max_pdu_length,
            );
            write_dataset_with_group_lengths(command.dataset(), IMPLICIT_VR_LE, &mut writer)
                .context(EncodeCommandSnafu)?;
            writer.finish().context(WireSendSnafu)?;
        }
        let mut counted = ProgressWriter {
            inner: &mut *stream,
            sent: 0,
            on_progress: progress,
        };
        let mut writer = PDataWriter::new(
            &mut counted,
            presentation_context_id,
            PDataValueType::Data,
            self.inner.peer_max_pdu_length,
        );
        std::io::copy(data, &mut writer).context(WireSendSnafu)?;
        writer.finish().context(WireSendSnafu)?;
        Ok(())
    }

    pub fn send_c_echo_rq(&self, pcid: u8, message_id: u16, affected_class: &str) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CEchoRq, message_id)
            .with_affected_sop_class_uid(affected_class);
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_c_echo_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
    ) -> Result<()> {
        let cmd = CommandSet::command_response(CommandField::CEchoRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class);
        self.send_message(pcid, &cmd, None, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_c_store_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        affected_instance: &str,
        priority: Priority,
        dataset: &Dataset,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CStoreRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_affected_sop_instance_uid(affected_instance)
            .with_priority(priority)
            .with_dataset();
        self.send_message(pcid, &cmd, Some(dataset), progress)
    }

    /// Send a C-STORE request whose data set bytes
    /// come from an arbitrary reader,
    /// already encoded in the accorded transfer syntax.
    #[allow(clippy::too_many_arguments)]
    pub fn send_c_store_rq_from(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        affected_instance: &str,
        priority: Priority,
        data: &mut dyn std::io::Read,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CStoreRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_affected_sop_instance_uid(affected_instance)
            .with_priority(priority)
            .with_dataset();
        self.send_message_from(pcid, &cmd, data, progress)
    }

    pub fn send_c_store_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        affected_instance: &str,
        status: u16,
    ) -> Result<()> {
        let cmd = CommandSet::command_response(CommandField::CStoreRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class)
            .with_affected_sop_instance_uid(affected_instance);
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_c_find_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        priority: Priority,
        identifier: &Dataset,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CFindRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_priority(priority)
            .with_dataset();
        self.send_message(pcid, &cmd, Some(identifier), None)
    }

    pub fn send_c_find_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
        identifier: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_response(CommandField::CFindRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class);
        if identifier.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, identifier, None)
    }

    pub fn send_c_get_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        priority: Priority,
        identifier: &Dataset,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CGetRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_priority(priority)
            .with_dataset();
        self.send_message(pcid, &cmd, Some(identifier), None)
    }

    pub fn send_c_get_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
        counts: SubOperations,
    ) -> Result<()> {
        let cmd = CommandSet::command_response(CommandField::CGetRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class)
            .with_sub_operations(counts);
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_c_move_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        destination: &str,
        priority: Priority,
        identifier: &Dataset,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::CMoveRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_move_destination(destination)
            .with_priority(priority)
            .with_dataset();
        self.send_message(pcid, &cmd, Some(identifier), None)
    }

    pub fn send_c_move_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
        counts: SubOperations,
    ) -> Result<()> {
        let cmd = CommandSet::command_response(CommandField::CMoveRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class)
            .with_sub_operations(counts);
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_c_cancel_rq(&self, pcid: u8, responded_to: u16) -> Result<()> {
        // a C-CANCEL is a request, but it identifies
        // the operation to cancel by its message id
        let mut dataset = Dataset::new();
        dataset.put_value(
            super::tags::COMMAND_FIELD,
            medicom_core::header::VR::US,
            CommandField::CCancelRq.code(),
        );
        dataset.put_value(
            super::tags::MESSAGE_ID_BEING_RESPONDED_TO,
            medicom_core::header::VR::US,
            responded_to,
        );
        dataset.put_value(
            super::tags::COMMAND_DATA_SET_TYPE,
            medicom_core::header::VR::US,
            super::NO_DATA_SET,
        );
        let cmd = CommandSet::from_dataset(dataset);
        self.send_message(pcid, &cmd, None, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_n_event_report_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        affected_instance: &str,
        event_type: u16,
        info: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_request(CommandField::NEventReportRq, message_id)
            .with_affected_sop_class_uid(affected_class)
            .with_affected_sop_instance_uid(affected_instance)
            .with_event_type_id(event_type);
        if info.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, info, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_n_event_report_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        affected_instance: &str,
        event_type: u16,
        status: u16,
        reply: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd =
            CommandSet::command_response(CommandField::NEventReportRsp, responded_to, status)
                .with_affected_sop_class_uid(affected_class)
                .with_affected_sop_instance_uid(affected_instance)
                .with_event_type_id(event_type);
        if reply.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, reply, None)
    }

    pub fn send_n_get_rq(
        &self,
        pcid: u8,
        message_id: u16,
        requested_class: &str,
        requested_instance: &str,
        attributes: &[Tag],
    ) -> Result<()> {
        let mut cmd = CommandSet::command_request(CommandField::NGetRq, message_id)
            .with_requested_sop_class_uid(requested_class)
            .with_requested_sop_instance_uid(requested_instance);
        if !attributes.is_empty() {
            cmd = cmd.with_attribute_identifier_list(attributes);
        }
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_n_get_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
        attributes: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_response(CommandField::NGetRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class);
        if attributes.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, attributes, None)
    }

    pub fn send_n_set_rq(
        &self,
        pcid: u8,
        message_id: u16,
        requested_class: &str,
        requested_instance: &str,
        modification: &Dataset,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::NSetRq, message_id)
            .with_requested_sop_class_uid(requested_class)
            .with_requested_sop_instance_uid(requested_instance)
            .with_dataset();
        self.send_message(pcid, &cmd, Some(modification), None)
    }

    pub fn send_n_set_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
        attributes: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_response(CommandField::NSetRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class);
        if attributes.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, attributes, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_n_action_rq(
        &self,
        pcid: u8,
        message_id: u16,
        requested_class: &str,
        requested_instance: &str,
        action_type: u16,
        info: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_request(CommandField::NActionRq, message_id)
            .with_requested_sop_class_uid(requested_class)
            .with_requested_sop_instance_uid(requested_instance)
            .with_action_type_id(action_type);
        if info.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, info, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_n_action_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        action_type: u16,
        status: u16,
        reply: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_response(CommandField::NActionRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class)
            .with_action_type_id(action_type);
        if reply.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, reply, None)
    }

    pub fn send_n_create_rq(
        &self,
        pcid: u8,
        message_id: u16,
        affected_class: &str,
        affected_instance: Option<&str>,
        attributes: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_request(CommandField::NCreateRq, message_id)
            .with_affected_sop_class_uid(affected_class);
        if let Some(instance) = affected_instance {
            cmd = cmd.with_affected_sop_instance_uid(instance);
        }
        if attributes.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, attributes, None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_n_create_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        affected_instance: &str,
        status: u16,
        attributes: Option<&Dataset>,
    ) -> Result<()> {
        let mut cmd = CommandSet::command_response(CommandField::NCreateRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class)
            .with_affected_sop_instance_uid(affected_instance);
        if attributes.is_some() {
            cmd = cmd.with_dataset();
        }
        self.send_message(pcid, &cmd, attributes, None)
    }

    pub fn send_n_delete_rq(
        &self,
        pcid: u8,
        message_id: u16,
        requested_class: &str,
        requested_instance: &str,
    ) -> Result<()> {
        let cmd = CommandSet::command_request(CommandField::NDeleteRq, message_id)
            .with_requested_sop_class_uid(requested_class)
            .with_requested_sop_instance_uid(requested_instance);
        self.send_message(pcid, &cmd, None, None)
    }

    pub fn send_n_delete_rsp(
        &self,
        pcid: u8,
        responded_to: u16,
        affected_class: &str,
        status: u16,
    ) -> Result<()> {
        let cmd = CommandSet::command_response(CommandField::NDeleteRsp, responded_to, status)
            .with_affected_sop_class_uid(affected_class);
        self.send_message(pcid, &cmd, None, None)
    }
}

/// The handler's view of the running exchange.
pub struct DimseContext<'a, T> {
    sender: &'a DimseSender<T>,
    presentation_contexts: &'a [PresentationContextResult],
    state: AssociationState,
}

impl<'a, T> DimseContext<'a, T> {
    /// The sender over the same association.
    pub fn sender(&self) -> &DimseSender<T> {
        self.sender
    }

    /// The presentation contexts accorded for this association.
    pub fn presentation_contexts(&self) -> &[PresentationContextResult] {
        self.presentation_contexts
    }

    /// The association state at the time of the callback.
    pub fn state(&self) -> AssociationState {
        self.state
    }
}

/// A receiver of DIMSE messages and association lifecycle events.
///
/// All message callbacks default to [`Disposition::Abort`]:
/// an implementation only accepts the message types it overrides,
/// and anything else takes the association down.
#[allow(unused_variables)]
pub trait DimseHandler<T: Transport> {
    /// The association is established and the reader loop is running.
    fn on_association_established(&mut self, ctx: &DimseContext<'_, T>) -> Result<()> {
        Ok(())
    }

    /// The peer requested an orderly release.
    /// The default implementation confirms it.
    fn on_release_request(&mut self, ctx: &DimseContext<'_, T>) -> Result<()> {
        ctx.sender().send_pdu(&Pdu::ReleaseRP)
    }

    /// The association sat inactive past the configured timeout.
    /// An abort was already sent.
    fn on_timeout(&mut self, ctx: &DimseContext<'_, T>) -> Result<()> {
        Ok(())
    }

    /// The peer closed the connection without releasing.
    fn on_closed(&mut self, ctx: &DimseContext<'_, T>) -> Result<()> {
        Ok(())
    }

    fn on_c_echo_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_c_echo_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_c_store_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        affected_instance: String,
        priority: Priority,
        dataset: Dataset,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_c_store_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_c_find_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        priority: Priority,
        identifier: Dataset,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_c_find_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        identifier: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_c_get_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        priority: Priority,
        identifier: Dataset,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_c_get_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        counts: SubOperations,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_c_move_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        destination: String,
        priority: Priority,
        identifier: Dataset,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_c_move_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        counts: SubOperations,
        identifier: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_c_cancel_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_event_report_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        affected_instance: String,
        event_type: u16,
        info: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_event_report_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        event_type: Option<u16>,
        reply: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_get_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        requested_class: String,
        requested_instance: String,
        attributes: Vec<Tag>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_n_get_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        attributes: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_set_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        requested_class: String,
        requested_instance: String,
        modification: Dataset,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_n_set_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        attributes: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_action_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        requested_class: String,
        requested_instance: String,
        action_type: u16,
        info: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_action_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        action_type: Option<u16>,
        reply: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_create_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        affected_class: String,
        affected_instance: Option<String>,
        attributes: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_n_create_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
        attributes: Option<Dataset>,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_n_delete_rq(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        message_id: u16,
        requested_class: String,
        requested_instance: String,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }

    fn on_n_delete_rsp(
        &mut self,
        ctx: &DimseContext<'_, T>,
        pcid: u8,
        responded_to: u16,
        status: u16,
    ) -> Result<Disposition> {
        Ok(Disposition::Abort)
    }
}

/// The buffer a message data set is reassembled in.
enum DataSpool {
    /// fragments accumulate in memory
    Memory(DatasetReader<ChunkSource>),
    /// fragments are appended to a temporary file
    /// and decoded from its written prefix
    File {
        reader: DatasetReader<FilePrefixSource>,
        spool: NamedTempFile,
        written: u64,
    },
}

/// A message being reassembled on one presentation context.
struct Exchange {
    command_reader: Option<DatasetReader<ChunkSource>>,
    command: Option<CommandSet>,
    data: Option<DataSpool>,
    ts: TransferSyntax,
}

impl Exchange {
    fn new(ts: TransferSyntax) -> Self {
        Exchange {
            command_reader: Some(DatasetReader::new(ChunkSource::new(), IMPLICIT_VR_LE)),
            command: None,
            data: None,
            ts,
        }
    }
}

/// The result of feeding a fragment to a suspended decoder.
enum DecodeProgress {
    /// more fragments are needed
    Pending,
    /// the last fragment arrived and the content decoded fully
    Done,
    /// the last fragment arrived mid-element or inside an open frame
    Truncated,
}

/// Decode as much of the buffered content as possible.
///
/// A decode pass only runs once the buffered bytes cover what the
/// decoder reported missing, or on the last fragment.
fn advance<S: SuspendSource>(
    reader: &mut DatasetReader<S>,
    is_last: bool,
) -> std::result::Result<DecodeProgress, medicom_parser::read::Error> {
    let needed = u64::from(reader.bytes_needed());
    if !is_last && needed > 0 && reader.source_mut().available() < needed {
        return Ok(DecodeProgress::Pending);
    }
    let status = reader.read(None)?;
    if !is_last {
        return Ok(DecodeProgress::Pending);
    }
    match status {
        ReadStatus::Complete if reader.is_balanced() => Ok(DecodeProgress::Done),
        _ => Ok(DecodeProgress::Truncated),
    }
}

/// A message exchange engine over an established association.
///
/// Built from the parts of a negotiated association
/// (see [`ClientAssociation::into_parts`] and
/// [`ServerAssociation::into_parts`]),
/// the connection owns the reading half of the transport
/// and drives all incoming traffic through [`run`](Self::run).
pub struct Connection<T: Transport> {
    reader: T,
    sender: DimseSender<T>,
    max_pdu_length: u32,
    strict: bool,
    options: DimseOptions,
    state: AssociationState,
}

impl Connection<TcpStream> {
    /// Build an engine over the parts of an established association.
    pub fn from_parts(parts: AssociationParts, options: DimseOptions) -> Result<Self> {
        Connection::new(
            parts.socket,
            parts.presentation_contexts,
            parts.peer_max_pdu_length,
            parts.max_pdu_length,
            parts.strict,
            options,
        )
    }

    /// Take over an association established as the requestor.
    pub fn from_client(association: ClientAssociation, options: DimseOptions) -> Result<Self> {
        let parts = association.into_parts().context(DetachRequestorSnafu)?;
        Connection::from_parts(parts, options)
    }

    /// Take over an association established as the acceptor.
    pub fn from_server(association: ServerAssociation, options: DimseOptions) -> Result<Self> {
        let parts = association.into_parts().context(DetachAcceptorSnafu)?;
        Connection::from_parts(parts, options)
    }
}

impl<T> Connection<T>
where
    T: Transport,
{
    /// Build an engine over an arbitrary transport
    /// and a set of accorded presentation contexts.
    pub fn new(
        transport: T,
        presentation_contexts: Vec<PresentationContextResult>,
        peer_max_pdu_length: u32,
        max_pdu_length: u32,
        strict: bool,
        options: DimseOptions,
    ) -> Result<Self> {
        let writer = transport.try_clone().context(CloneTransportSnafu)?;
        let sender = DimseSender {
            inner: Arc::new(SenderInner {
                stream: Mutex::new(writer),
                transmitting: AtomicBool::new(false),
                peer_max_pdu_length,
                presentation_contexts,
            }),
        };
        Ok(Connection {
            reader: transport,
            sender,
            max_pdu_length,
            strict,
            options,
            state: AssociationState::Established,
        })
    }

    /// Obtain a sender handle, usable from other threads.
    pub fn sender(&self) -> DimseSender<T> {
        self.sender.clone()
    }

    fn ctx(&self) -> DimseContext<'_, T> {
        DimseContext {
            sender: &self.sender,
            presentation_contexts: &self.sender.inner.presentation_contexts,
            state: self.state,
        }
    }

    /// Persist the raw bytes of an unintelligible PDU
    /// to the diagnostics directory, if one is configured.
    fn dump_pdu(&self, bytes: &[u8]) {
        if let Some(dir) = &self.options.diagnostics_dir {
            let millis = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            let path = dir.join(format!("pdu-{}.bin", millis));
            match std::fs::write(&path, bytes) {
                Ok(()) => warn!("unintelligible PDU saved to {}", path.display()),
                Err(e) => warn!("failed to save unintelligible PDU: {}", e),
            }
        }
    }

    /// Send an abort to the peer and mark the association aborted.
    fn abort(&mut self, source: AbortRQSource) {
        if let Err(e) = self.sender.send_pdu(&Pdu::AbortRQ { source }) {
            debug!("failed to send abort: {}", e);
        }
        self.state = AssociationState::Aborted { source };
    }

    /// Take one full PDU frame off the front of the wire buffer,
    /// if one is fully buffered.
    fn take_frame(&mut self, wire: &mut BytesMut) -> Result<Option<BytesMut>> {
        if wire.len() < PDU_HEADER_SIZE as usize {
            return Ok(None);
        }
        let length = u32::from_be_bytes([wire[2], wire[3], wire[4], wire[5]]);
        if length > MAXIMUM_PDU_SIZE {
            // no hope of regaining framing past this point
            self.dump_pdu(wire);
            self.abort(AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::InvalidPduParameter,
            ));
            return IncomingPduTooLargeSnafu { length }.fail();
        }
        let total = PDU_HEADER_SIZE as usize + length as usize;
        if wire.len() < total {
            return Ok(None);
        }
        Ok(Some(wire.split_to(total)))
    }

    /// Run the reader loop until the association ends.
    ///
    /// Returns how the association ended,
    /// or the error which took it down.
    pub fn run<H>(mut self, handler: &mut H) -> Result<Outcome>
    where
        H: DimseHandler<T>,
    {
        handler.on_association_established(&self.ctx())?;

        let mut wire = BytesMut::with_capacity(READ_CHUNK * 2);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut exchanges: HashMap<u8, Exchange> = HashMap::new();
        let mut last_activity = Instant::now();

        loop {
            match self
                .reader
                .poll_read(&mut chunk, POLL_INTERVAL)
                .context(WireReceiveSnafu)?
            {
                Poll::Ready(0) => {
                    self.state = AssociationState::Closed;
                    handler.on_closed(&self.ctx())?;
                    return Ok(Outcome::Closed);
                }
                Poll::Ready(n) => {
                    last_activity = Instant::now();
                    wire.extend_from_slice(&chunk[..n]);
                }
                Poll::TimedOut => {
                    if self.sender.is_transmitting() {
                        last_activity = Instant::now();
                    } else if let Some(timeout) = self.options.timeout {
                        if last_activity.elapsed() >= timeout {
                            self.abort(AbortRQSource::ServiceUser);
                            handler.on_timeout(&self.ctx())?;
                            return Ok(Outcome::TimedOut);
                        }
                    }
                    continue;
                }
            }

            loop {
                let frame = match self.take_frame(&mut wire)? {
                    Some(frame) => frame,
                    None => break,
                };
                let pdu = match read_pdu(&mut &frame[..], self.max_pdu_length, self.strict) {
                    Ok(pdu) => pdu,
                    Err(e) => {
                        self.dump_pdu(&frame);
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::UnrecognizedPdu,
                        ));
                        return Err(e).context(ReceivePduSnafu);
                    }
                };
                if let Some(outcome) = self.handle_pdu(pdu, &frame, &mut exchanges, handler)? {
                    return Ok(outcome);
                }
            }
        }
    }

    fn handle_pdu<H>(
        &mut self,
        pdu: Pdu,
        raw: &[u8],
        exchanges: &mut HashMap<u8, Exchange>,
        handler: &mut H,
    ) -> Result<Option<Outcome>>
    where
        H: DimseHandler<T>,
    {
        match pdu {
            Pdu::PData { data } => {
                for value in data {
                    let disposition = match self.handle_pdata_value(value, exchanges, handler)? {
                        Some(disposition) => disposition,
                        None => continue,
                    };
                    match disposition {
                        Disposition::Continue => {}
                        Disposition::Release => {
                            self.sender.send_pdu(&Pdu::ReleaseRQ)?;
                            self.state = AssociationState::Releasing;
                        }
                        Disposition::Abort => {
                            let source = AbortRQSource::ServiceUser;
                            self.abort(source);
                            return Ok(Some(Outcome::Aborted { source }));
                        }
                    }
                }
                Ok(None)
            }
            Pdu::ReleaseRQ => {
                handler.on_release_request(&self.ctx())?;
                self.state = AssociationState::Closed;
                Ok(Some(Outcome::Released))
            }
            Pdu::ReleaseRP => {
                if self.state == AssociationState::Releasing {
                    self.state = AssociationState::Closed;
                    Ok(Some(Outcome::Released))
                } else {
                    self.abort(AbortRQSource::ServiceProvider(
                        AbortRQServiceProviderReason::UnexpectedPdu,
                    ));
                    UnexpectedPduSnafu {
                        pdu: Box::new(Pdu::ReleaseRP),
                    }
                    .fail()
                }
            }
            Pdu::AbortRQ { source } => {
                debug!("association aborted by peer");
                self.state = AssociationState::Aborted { source };
                Ok(Some(Outcome::Aborted { source }))
            }
            pdu @ Pdu::Unknown { .. } => {
                self.dump_pdu(raw);
                self.abort(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                ));
                UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail()
            }
            pdu => {
                // association negotiation messages have no place
                // in an established association
                self.abort(AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ));
                UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail()
            }
        }
    }

    /// Route one presentation data value into its exchange,
    /// dispatching the message if it completed.
    fn handle_pdata_value<H>(
        &mut self,
        value: PDataValue,
        exchanges: &mut HashMap<u8, Exchange>,
        handler: &mut H,
    ) -> Result<Option<Disposition>>
    where
        H: DimseHandler<T>,
    {
        let id = value.presentation_context_id;
        match value.value_type {
            PDataValueType::Command => {
                let ts = match self.sender.context_transfer_syntax(id) {
                    Ok(ts) => ts,
                    Err(e) => {
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::UnexpectedPduParameter,
                        ));
                        return Err(e);
                    }
                };
                let exchange = exchanges.entry(id).or_insert_with(|| Exchange::new(ts));
                let reader = exchange
                    .command_reader
                    .get_or_insert_with(|| DatasetReader::new(ChunkSource::new(), IMPLICIT_VR_LE));
                reader.source_mut().append(value.data);

                match advance(reader, value.is_last) {
                    Ok(DecodeProgress::Pending) => Ok(None),
                    Ok(DecodeProgress::Done) => {
                        let reader = match exchange.command_reader.take() {
                            Some(reader) => reader,
                            None => return Ok(None),
                        };
                        let command = CommandSet::from_dataset(reader.into_dataset());
                        let field = match command.command_field() {
                            Some(field) => field,
                            None => {
                                exchanges.remove(&id);
                                self.abort(AbortRQSource::ServiceProvider(
                                    AbortRQServiceProviderReason::InvalidPduParameter,
                                ));
                                return MissingCommandFieldSnafu.fail();
                            }
                        };
                        debug!("received {} on presentation context {}", field, id);
                        if command.has_dataset() {
                            let spool = match self.options.spool_policy {
                                SpoolPolicy::Never => false,
                                SpoolPolicy::Always => true,
                                SpoolPolicy::StoreRequests => field == CommandField::CStoreRq,
                            };
                            exchange.data = Some(self.new_data_spool(exchange.ts, spool)?);
                            exchange.command = Some(command);
                            Ok(None)
                        } else {
                            exchanges.remove(&id);
                            self.dispatch(handler, id, field, command, None)
                                .map(Some)
                        }
                    }
                    Ok(DecodeProgress::Truncated) => {
                        exchanges.remove(&id);
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::InvalidPduParameter,
                        ));
                        IncompleteMessageSnafu.fail()
                    }
                    Err(e) => {
                        exchanges.remove(&id);
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::InvalidPduParameter,
                        ));
                        Err(e).context(DecodeCommandSnafu)
                    }
                }
            }
            PDataValueType::Data => {
                let exchange = match exchanges.get_mut(&id) {
                    Some(exchange) if exchange.command.is_some() => exchange,
                    _ => {
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::UnexpectedPduParameter,
                        ));
                        return DataWithoutCommandSnafu.fail();
                    }
                };

                let progress = match exchange.data.as_mut() {
                    Some(DataSpool::Memory(reader)) => {
                        reader.source_mut().append(value.data);
                        advance(reader, value.is_last)
                    }
                    Some(DataSpool::File {
                        reader,
                        spool,
                        written,
                    }) => {
                        let append = (|| -> std::io::Result<()> {
                            spool.as_file_mut().write_all(&value.data)?;
                            spool.as_file_mut().flush()
                        })();
                        if let Err(e) = append {
                            exchanges.remove(&id);
                            self.abort(AbortRQSource::ServiceProvider(
                                AbortRQServiceProviderReason::ReasonNotSpecified,
                            ));
                            return Err(e).context(SpoolSnafu);
                        }
                        *written += value.data.len() as u64;
                        reader.source_mut().extend_to(*written);
                        advance(reader, value.is_last)
                    }
                    None => {
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::UnexpectedPduParameter,
                        ));
                        return DataWithoutCommandSnafu.fail();
                    }
                };

                match progress {
                    Ok(DecodeProgress::Pending) => Ok(None),
                    Ok(DecodeProgress::Done) => {
                        // take the whole exchange; a spooled file must stay
                        // alive until the handler is done with the data set
                        let exchange = match exchanges.remove(&id) {
                            Some(exchange) => exchange,
                            None => return Ok(None),
                        };
                        let command = match exchange.command {
                            Some(command) => command,
                            None => return DataWithoutCommandSnafu.fail(),
                        };
                        let field = match command.command_field() {
                            Some(field) => field,
                            None => return MissingCommandFieldSnafu.fail(),
                        };
                        let (dataset, _spool) = match exchange.data {
                            Some(DataSpool::Memory(reader)) => (reader.into_dataset(), None),
                            Some(DataSpool::File { reader, spool, .. }) => {
                                (reader.into_dataset(), Some(spool))
                            }
                            None => (Dataset::new(), None),
                        };
                        self.dispatch(handler, id, field, command, Some(dataset))
                            .map(Some)
                    }
                    Ok(DecodeProgress::Truncated) => {
                        exchanges.remove(&id);
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::InvalidPduParameter,
                        ));
                        IncompleteMessageSnafu.fail()
                    }
                    Err(e) => {
                        exchanges.remove(&id);
                        self.abort(AbortRQSource::ServiceProvider(
                            AbortRQServiceProviderReason::InvalidPduParameter,
                        ));
                        Err(e).context(DecodeDataSnafu)
                    }
                }
            }
        }
    }

    /// Hand a completed message over to the handler.
    fn dispatch<H>(
        &self,
        handler: &mut H,
        pcid: u8,
        field: CommandField,
        command: CommandSet,
        dataset: Option<Dataset>,
    ) -> Result<Disposition>
    where
        H: DimseHandler<T>,
    {
        let ctx = self.ctx();
        let message_id = command.message_id().unwrap_or(0);
        let responded_to = command.message_id_responded_to().unwrap_or(0);
        let status = command.status().unwrap_or(status::SUCCESS);
        match field {
            CommandField::CEchoRq => handler.on_c_echo_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
            ),
            CommandField::CEchoRsp => handler.on_c_echo_rsp(&ctx, pcid, responded_to, status),
            CommandField::CStoreRq => handler.on_c_store_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.affected_sop_instance_uid().unwrap_or_default(),
                command.priority(),
                dataset.unwrap_or_default(),
            ),
            CommandField::CStoreRsp => handler.on_c_store_rsp(&ctx, pcid, responded_to, status),
            CommandField::CFindRq => handler.on_c_find_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.priority(),
                dataset.unwrap_or_default(),
            ),
            CommandField::CFindRsp => {
                handler.on_c_find_rsp(&ctx, pcid, responded_to, status, dataset)
            }
            CommandField::CGetRq => handler.on_c_get_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.priority(),
                dataset.unwrap_or_default(),
            ),
            CommandField::CGetRsp => {
                handler.on_c_get_rsp(&ctx, pcid, responded_to, status, command.sub_operations())
            }
            CommandField::CMoveRq => handler.on_c_move_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.move_destination().unwrap_or_default(),
                command.priority(),
                dataset.unwrap_or_default(),
            ),
            CommandField::CMoveRsp => handler.on_c_move_rsp(
                &ctx,
                pcid,
                responded_to,
                status,
                command.sub_operations(),
                dataset,
            ),
            CommandField::CCancelRq => handler.on_c_cancel_rq(&ctx, pcid, responded_to),
            CommandField::NEventReportRq => handler.on_n_event_report_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.affected_sop_instance_uid().unwrap_or_default(),
                command.event_type_id().unwrap_or(0),
                dataset,
            ),
            CommandField::NEventReportRsp => handler.on_n_event_report_rsp(
                &ctx,
                pcid,
                responded_to,
                status,
                command.event_type_id(),
                dataset,
            ),
            CommandField::NGetRq => handler.on_n_get_rq(
                &ctx,
                pcid,
                message_id,
                command.requested_sop_class_uid().unwrap_or_default(),
                command.requested_sop_instance_uid().unwrap_or_default(),
                command.attribute_identifier_list(),
            ),
            CommandField::NGetRsp => {
                handler.on_n_get_rsp(&ctx, pcid, responded_to, status, dataset)
            }
            CommandField::NSetRq => handler.on_n_set_rq(
                &ctx,
                pcid,
                message_id,
                command.requested_sop_class_uid().unwrap_or_default(),
                command.requested_sop_instance_uid().unwrap_or_default(),
                dataset.unwrap_or_default(),
            ),
            CommandField::NSetRsp => {
                handler.on_n_set_rsp(&ctx, pcid, responded_to, status, dataset)
            }
            CommandField::NActionRq => handler.on_n_action_rq(
                &ctx,
                pcid,
                message_id,
                command.requested_sop_class_uid().unwrap_or_default(),
                command.requested_sop_instance_uid().unwrap_or_default(),
                command.action_type_id().unwrap_or(0),
                dataset,
            ),
            CommandField::NActionRsp => handler.on_n_action_rsp(
                &ctx,
                pcid,
                responded_to,
                status,
                command.action_type_id(),
                dataset,
            ),
            CommandField::NCreateRq => handler.on_n_create_rq(
                &ctx,
                pcid,
                message_id,
                command.affected_sop_class_uid().unwrap_or_default(),
                command.affected_sop_instance_uid(),
                dataset,
            ),
            CommandField::NCreateRsp => {
                handler.on_n_create_rsp(&ctx, pcid, responded_to, status, dataset)
            }
            CommandField::NDeleteRq => handler.on_n_delete_rq(
                &ctx,
                pcid,
                message_id,
                command.requested_sop_class_uid().unwrap_or_default(),
                command.requested_sop_instance_uid().unwrap_or_default(),
            ),
            CommandField::NDeleteRsp => handler.on_n_delete_rsp(&ctx, pcid, responded_to, status),
        }
    }

    fn new_data_spool(&self, ts: TransferSyntax, to_file: bool) -> Result<DataSpool> {
        let options = DatasetReaderOptions {
            keep_group_lengths: false,
            deferred_threshold: self.options.deferred_threshold,
        };
        if to_file {
            let spool = NamedTempFile::new().context(SpoolSnafu)?;
            let source =
                FilePrefixSource::new(spool.path().to_path_buf()).context(SpoolSnafu)?;
            Ok(DataSpool::File {
                reader: DatasetReader::new(source, ts).with_options(options),
                spool,
                written: 0,
            })
        } else {
            Ok(DataSpool::Memory(
                DatasetReader::new(ChunkSource::new(), ts).with_options(options),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_policy_defaults_to_store_requests() {
        assert_eq!(SpoolPolicy::default(), SpoolPolicy::StoreRequests);
        let options = DimseOptions::default();
        assert!(options.timeout.is_none());
        assert!(options.diagnostics_dir.is_none());
    }

    #[test]
    fn options_builder_chains() {
        let options = DimseOptions::default()
            .timeout(Duration::from_secs(30))
            .spool_policy(SpoolPolicy::Never)
            .deferred_threshold(1 << 20)
            .diagnostics_dir("/tmp/diag");
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.spool_policy, SpoolPolicy::Never);
        assert_eq!(options.deferred_threshold, Some(1 << 20));
        assert_eq!(
            options.diagnostics_dir.as_deref(),
            Some(std::path::Path::new("/tmp/diag"))
        );
    }
}
