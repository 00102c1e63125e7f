//! PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::Read;
use tracing::warn;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not read PDU field `{}`: {}", field, source))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming PDU was too large: length {}, maximum admitted {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} of variable item type {:#04x}", length, item_type))]
    InvalidItemLength {
        item_type: u8,
        length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid reject source {} or reason {}", source_field, reason))]
    InvalidRejectSourceOrReason {
        source_field: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid abort source {} or reason {}", source_field, reason))]
    InvalidAbortSourceOrReason {
        source_field: u8,
        reason: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid presentation context result reason {}", reason))]
    InvalidPresentationContextResultReason { reason: u8, backtrace: Backtrace },

    /// a proposed presentation context without an abstract syntax sub-item
    MissingAbstractSyntax { backtrace: Backtrace },

    /// a presentation context without a transfer syntax sub-item
    MissingTransferSyntax { backtrace: Backtrace },

    #[snafu(display("Invalid presentation data value length {}", length))]
    InvalidPDataValueLength { length: u32, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read one PDU from the given source.
///
/// `max_pdu_length` is the maximum PDU length that this entity admits,
/// as negotiated for the association.
/// When `strict` is set,
/// a PDU longer than that is refused with [`Error::PduTooLarge`];
/// otherwise it is tolerated with a warning,
/// up to the hard bound of [`MAXIMUM_PDU_SIZE`].
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    let pdu_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "PDU-type" })?;
    let _reserved = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;
    let pdu_length = reader.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
        field: "PDU-length",
    })?;

    // check PDU length against the configured maximum
    if pdu_length > max_pdu_length {
        ensure!(
            !strict,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming PDU length {} exceeds the negotiated maximum of {}",
            pdu_length, max_pdu_length
        );
    }

    let body = read_n(reader, pdu_length as usize).context(ReadPduFieldSnafu {
        field: "PDU contents",
    })?;
    let mut body = &body[..];

    match pdu_type {
        0x01 | 0x02 => {
            let protocol_version = body.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Protocol-version",
            })?;
            let _reserved = body
                .read_u16::<BigEndian>()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            let mut ae_bytes = [0; 16];
            body.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
                field: "Called-AE-title",
            })?;
            let called_ae_title = decode_ae_title(&ae_bytes);
            body.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
                field: "Calling-AE-title",
            })?;
            let calling_ae_title = decode_ae_title(&ae_bytes);

            let mut reserved = [0; 32];
            body.read_exact(&mut reserved)
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            let mut application_context_name = None;
            let mut presentation_contexts_proposed = vec![];
            let mut presentation_contexts_results = vec![];
            let mut user_variables = vec![];

            while !body.is_empty() {
                match read_pdu_variable(&mut body)? {
                    PduVariableItem::ApplicationContext(name) => {
                        application_context_name = Some(name);
                    }
                    PduVariableItem::PresentationContextProposed(pc) => {
                        presentation_contexts_proposed.push(pc);
                    }
                    PduVariableItem::PresentationContextResult(pc) => {
                        presentation_contexts_results.push(pc);
                    }
                    PduVariableItem::UserVariables(items) => {
                        user_variables = items;
                    }
                    PduVariableItem::Unknown(item_type) => {
                        warn!(
                            "Unknown variable item type {:#04x} in association PDU",
                            item_type
                        );
                    }
                }
            }

            let application_context_name = application_context_name.unwrap_or_default();
            if pdu_type == 0x01 {
                Ok(Pdu::AssociationRQ(AssociationRQ {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: presentation_contexts_proposed,
                    user_variables,
                }))
            } else {
                Ok(Pdu::AssociationAC(AssociationAC {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: presentation_contexts_results,
                    user_variables,
                }))
            }
        }
        0x03 => {
            let _reserved = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let result_field = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Result" })?;
            let source_field = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = body.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;

            let result = AssociationRJResult::from(result_field).ok_or_else(|| {
                InvalidRejectSourceOrReasonSnafu {
                    source_field,
                    reason,
                }
                .build()
            })?;
            let source = AssociationRJSource::from(source_field, reason).ok_or_else(|| {
                InvalidRejectSourceOrReasonSnafu {
                    source_field,
                    reason,
                }
                .build()
            })?;
            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => {
            let mut values = vec![];
            while !body.is_empty() {
                let length = body.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;
                ensure!(
                    length >= 2 && length as usize <= body.len(),
                    InvalidPDataValueLengthSnafu { length }
                );
                let presentation_context_id = body.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;
                let header = body.read_u8().context(ReadPduFieldSnafu {
                    field: "Message-control-header",
                })?;
                let data = read_n(&mut body, length as usize - 2).context(ReadPduFieldSnafu {
                    field: "Presentation-data-value",
                })?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type: if header & 0x01 != 0 {
                        PDataValueType::Command
                    } else {
                        PDataValueType::Data
                    },
                    is_last: header & 0x02 != 0,
                    data,
                });
            }
            Ok(Pdu::PData { data: values })
        }
        0x05 => Ok(Pdu::ReleaseRQ),
        0x06 => Ok(Pdu::ReleaseRP),
        0x07 => {
            let _reserved = body
                .read_u16::<BigEndian>()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let source_field = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = body.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AbortRQSource::from(source_field, reason).ok_or_else(|| {
                InvalidAbortSourceOrReasonSnafu {
                    source_field,
                    reason,
                }
                .build()
            })?;
            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: body.to_vec(),
        }),
    }
}

/// Read one variable item of an association PDU.
fn read_pdu_variable(reader: &mut &[u8]) -> Result<PduVariableItem> {
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    let _reserved = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;
    let length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })? as u32;
    ensure!(
        length as usize <= reader.len(),
        InvalidItemLengthSnafu { item_type, length }
    );
    let body = read_n(reader, length as usize).context(ReadPduFieldSnafu {
        field: "Item contents",
    })?;
    let mut body = &body[..];

    match item_type {
        0x10 => Ok(PduVariableItem::ApplicationContext(decode_uid(&body))),
        0x20 => {
            // proposed presentation context
            let id = body.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            let mut reserved = [0; 3];
            body.read_exact(&mut reserved)
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            let mut abstract_syntax = None;
            let mut transfer_syntaxes = vec![];
            while !body.is_empty() {
                let (sub_type, sub_body) = read_sub_item(&mut body)?;
                match sub_type {
                    0x30 => abstract_syntax = Some(decode_uid(&sub_body)),
                    0x40 => transfer_syntaxes.push(decode_uid(&sub_body)),
                    _ => {
                        warn!(
                            "Unknown sub-item type {:#04x} in proposed presentation context",
                            sub_type
                        );
                    }
                }
            }
            let abstract_syntax = abstract_syntax.context(MissingAbstractSyntaxSnafu)?;
            ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);
            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id,
                    abstract_syntax,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // presentation context result
            let id = body.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            let _reserved = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;
            let reason = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Result/Reason" })?;
            let reason = PresentationContextResultReason::from(reason)
                .ok_or_else(|| InvalidPresentationContextResultReasonSnafu { reason }.build())?;
            let _reserved = body
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Reserved" })?;

            let mut transfer_syntax = None;
            while !body.is_empty() {
                let (sub_type, sub_body) = read_sub_item(&mut body)?;
                match sub_type {
                    0x40 => transfer_syntax = Some(decode_uid(&sub_body)),
                    _ => {
                        warn!(
                            "Unknown sub-item type {:#04x} in presentation context result",
                            sub_type
                        );
                    }
                }
            }
            let transfer_syntax = transfer_syntax.context(MissingTransferSyntaxSnafu)?;
            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id,
                    reason,
                    transfer_syntax,
                },
            ))
        }
        0x50 => {
            // user information
            let mut items = vec![];
            while !body.is_empty() {
                let (sub_type, sub_body) = read_sub_item(&mut body)?;
                match sub_type {
                    0x51 => {
                        let mut sub = &sub_body[..];
                        let max_length =
                            sub.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-length-received",
                            })?;
                        items.push(UserVariableItem::MaxLength(max_length));
                    }
                    0x52 => {
                        items.push(UserVariableItem::ImplementationClassUID(decode_uid(
                            &sub_body,
                        )));
                    }
                    0x55 => {
                        items.push(UserVariableItem::ImplementationVersionName(decode_uid(
                            &sub_body,
                        )));
                    }
                    _ => {
                        warn!("Unknown user information sub-item type {:#04x}", sub_type);
                        items.push(UserVariableItem::Unknown(sub_type, sub_body));
                    }
                }
            }
            Ok(PduVariableItem::UserVariables(items))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

/// Read one sub-item header and contents
/// (type, reserved, 16-bit length, body).
fn read_sub_item(reader: &mut &[u8]) -> Result<(u8, Vec<u8>)> {
    let sub_type = reader.read_u8().context(ReadPduFieldSnafu {
        field: "Sub-item-type",
    })?;
    let _reserved = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Reserved" })?;
    let length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Sub-item-length",
    })? as u32;
    ensure!(
        length as usize <= reader.len(),
        InvalidItemLengthSnafu {
            item_type: sub_type,
            length
        }
    );
    let body = read_n(reader, length as usize).context(ReadPduFieldSnafu {
        field: "Sub-item contents",
    })?;
    Ok((sub_type, body))
}

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::with_capacity(bytes_to_read.min(MAXIMUM_PDU_SIZE as usize));
    reader.take(bytes_to_read as u64).read_to_end(&mut result)?;
    if result.len() != bytes_to_read {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "failed to fill buffer",
        ));
    }
    Ok(result)
}

/// Decode a 16-byte AE title field,
/// leading and trailing spaces being non-significant.
fn decode_ae_title(bytes: &[u8; 16]) -> String {
    String::from_utf8_lossy(bytes).trim_matches(' ').to_string()
}

/// Decode a UID (or version name) string field,
/// trimming trailing padding.
fn decode_uid(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c| c == ' ' || c == '\0')
        .to_string()
}
