//! PDU writer module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure: {}", name, source))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("Could not write field `{}`: {}", field, source))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write {} reserved bytes: {}", bytes, source))]
    WriteReserved {
        bytes: u32,
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk: {}", source))]
    BuildChunk {
        backtrace: Backtrace,
        source: Box<Error>,
    },
    #[snafu(display("Failed to write chunk length: {}", source))]
    WriteLength {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write chunk data: {}", source))]
    WriteData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = data.len() as u32;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = data.len() as u16;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write an AE title field as 16 characters,
/// padded with trailing spaces.
fn write_ae_title(writer: &mut dyn Write, ae_title: &str, field: &'static str) -> Result<()> {
    let mut bytes = ae_title.as_bytes().to_vec();
    bytes.resize(16, b' ');
    writer.write_all(&bytes).context(WriteFieldSnafu { field })
}

/// Write one PDU to the given sink.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_u8(0x01)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                write_ae_title(writer, called_ae_title, "Called-AE-title")?;
                write_ae_title(writer, calling_ae_title, "Calling-AE-title")?;

                writer
                    .write_all(&[0; 32])
                    .context(WriteReservedSnafu { bytes: 32_u32 })?;

                write_pdu_variable_application_context_name(writer, application_context_name)?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(writer, presentation_context)?;
                }

                write_pdu_variable_user_variables(writer, user_variables)?;

                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // bytes 11-42 echo the AE title fields of the A-ASSOCIATE-RQ,
                // not to be tested by the receiver
                write_ae_title(writer, called_ae_title, "Called-AE-title")?;
                write_ae_title(writer, calling_ae_title, "Calling-AE-title")?;

                writer
                    .write_all(&[0; 32])
                    .context(WriteReservedSnafu { bytes: 32_u32 })?;

                write_pdu_variable_application_context_name(writer, application_context_name)?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(writer, presentation_context)?;
                }

                write_pdu_variable_user_variables(writer, user_variables)?;

                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            writer
                .write_u8(0x03)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;
                writer
                    .write_u8(match result {
                        AssociationRJResult::Permanent => 0x01,
                        AssociationRJResult::Transient => 0x02,
                    })
                    .context(WriteFieldSnafu { field: "Result" })?;

                let (source_field, reason) = encode_reject_source(source);
                writer
                    .write_u8(source_field)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })?;
                Ok(())
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })
        }
        Pdu::PData { data } => {
            writer
                .write_u8(0x04)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;

            write_chunk_u32(writer, |writer| {
                for value in data {
                    writer
                        .write_u32::<BigEndian>(value.data.len() as u32 + 2)
                        .context(WriteFieldSnafu {
                            field: "Item-length",
                        })?;
                    writer
                        .write_u8(value.presentation_context_id)
                        .context(WriteFieldSnafu {
                            field: "Presentation-context-ID",
                        })?;

                    let mut message_header = 0x00;
                    if value.value_type == PDataValueType::Command {
                        message_header |= 0x01;
                    }
                    if value.is_last {
                        message_header |= 0x02;
                    }
                    writer.write_u8(message_header).context(WriteFieldSnafu {
                        field: "Message-control-header",
                    })?;

                    writer.write_all(&value.data).context(WriteFieldSnafu {
                        field: "Presentation-data-value",
                    })?;
                }
                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })
        }
        Pdu::ReleaseRQ => {
            writer
                .write_u8(0x05)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            writer
                .write_u32::<BigEndian>(4)
                .context(WriteFieldSnafu { field: "PDU-length" })?;
            writer
                .write_all(&[0; 4])
                .context(WriteReservedSnafu { bytes: 4_u32 })?;
            Ok(())
        }
        Pdu::ReleaseRP => {
            writer
                .write_u8(0x06)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            writer
                .write_u32::<BigEndian>(4)
                .context(WriteFieldSnafu { field: "PDU-length" })?;
            writer
                .write_all(&[0; 4])
                .context(WriteReservedSnafu { bytes: 4_u32 })?;
            Ok(())
        }
        Pdu::AbortRQ { source } => {
            writer
                .write_u8(0x07)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            writer
                .write_u32::<BigEndian>(4)
                .context(WriteFieldSnafu { field: "PDU-length" })?;
            writer
                .write_all(&[0; 2])
                .context(WriteReservedSnafu { bytes: 2_u32 })?;

            let (source_field, reason) = encode_abort_source(source);
            writer
                .write_u8(source_field)
                .context(WriteFieldSnafu { field: "Source" })?;
            writer.write_u8(reason).context(WriteFieldSnafu {
                field: "Reason/Diag.",
            })?;
            Ok(())
        }
        Pdu::Unknown { pdu_type, data } => {
            // written back verbatim
            writer
                .write_u8(*pdu_type)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            writer
                .write_u32::<BigEndian>(data.len() as u32)
                .context(WriteFieldSnafu { field: "PDU-length" })?;
            writer.write_all(data).context(WriteFieldSnafu {
                field: "PDU contents",
            })?;
            Ok(())
        }
    }
}

fn encode_reject_source(source: &AssociationRJSource) -> (u8, u8) {
    match source {
        AssociationRJSource::ServiceUser(reason) => (
            0x01,
            match reason {
                AssociationRJServiceUserReason::NoReasonGiven => 1,
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 2,
                AssociationRJServiceUserReason::CallingAETitleNotRecognized => 3,
                AssociationRJServiceUserReason::CalledAETitleNotRecognized => 7,
                AssociationRJServiceUserReason::Reserved(code) => *code,
            },
        ),
        AssociationRJSource::ServiceProviderASCE(reason) => (
            0x02,
            match reason {
                AssociationRJServiceProviderASCEReason::NoReasonGiven => 1,
                AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => 2,
            },
        ),
        AssociationRJSource::ServiceProviderPresentation(reason) => (
            0x03,
            match reason {
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 1,
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 2,
                AssociationRJServiceProviderPresentationReason::Reserved(code) => *code,
            },
        ),
    }
}

fn encode_abort_source(source: &AbortRQSource) -> (u8, u8) {
    match source {
        AbortRQSource::ServiceUser => (0x00, 0x00),
        AbortRQSource::Reserved(reason) => (0x01, *reason),
        AbortRQSource::ServiceProvider(reason) => (
            0x02,
            match reason {
                AbortRQServiceProviderReason::ReasonNotSpecified => 0,
                AbortRQServiceProviderReason::UnrecognizedPdu => 1,
                AbortRQServiceProviderReason::UnexpectedPdu => 2,
                AbortRQServiceProviderReason::Reserved => 3,
                AbortRQServiceProviderReason::UnrecognizedPduParameter => 4,
                AbortRQServiceProviderReason::UnexpectedPduParameter => 5,
                AbortRQServiceProviderReason::InvalidPduParameter => 6,
            },
        ),
    }
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
) -> Result<()> {
    writer
        .write_u8(0x10)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        writer
            .write_all(application_context_name.as_bytes())
            .context(WriteFieldSnafu {
                field: "Application-context-name",
            })
    })
    .context(WriteChunkSnafu {
        name: "Application Context Item",
    })
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
) -> Result<()> {
    writer
        .write_u8(0x20)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_all(&[0; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        // abstract syntax sub-item
        writer
            .write_u8(0x30)
            .context(WriteFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(presentation_context.abstract_syntax.as_bytes())
                .context(WriteFieldSnafu {
                    field: "Abstract-syntax-name",
                })
        })
        .context(WriteChunkSnafu {
            name: "Abstract Syntax Sub-Item",
        })?;

        // transfer syntax sub-items
        for transfer_syntax in &presentation_context.transfer_syntaxes {
            writer
                .write_u8(0x40)
                .context(WriteFieldSnafu { field: "Item-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteReservedSnafu { bytes: 1_u32 })?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_all(transfer_syntax.as_bytes())
                    .context(WriteFieldSnafu {
                        field: "Transfer-syntax-name",
                    })
            })
            .context(WriteChunkSnafu {
                name: "Transfer Syntax Sub-Item",
            })?;
        }

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
) -> Result<()> {
    writer
        .write_u8(0x21)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WriteFieldSnafu {
                field: "Result/Reason",
            })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        writer
            .write_u8(0x40)
            .context(WriteFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(presentation_context.transfer_syntax.as_bytes())
                .context(WriteFieldSnafu {
                    field: "Transfer-syntax-name",
                })
        })
        .context(WriteChunkSnafu {
            name: "Transfer Syntax Sub-Item",
        })?;

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    writer
        .write_u8(0x50)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    writer
                        .write_u8(0x51)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WriteFieldSnafu {
                                field: "Maximum-length-received",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Maximum Length Sub-Item",
                    })?;
                }
                UserVariableItem::ImplementationClassUID(class_uid) => {
                    writer
                        .write_u8(0x52)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(class_uid.as_bytes())
                            .context(WriteFieldSnafu {
                                field: "Implementation-class-uid",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Class UID Sub-Item",
                    })?;
                }
                UserVariableItem::ImplementationVersionName(version_name) => {
                    writer
                        .write_u8(0x55)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(version_name.as_bytes())
                            .context(WriteFieldSnafu {
                                field: "Implementation-version-name",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Version Name Sub-Item",
                    })?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    writer
                        .write_u8(*item_type)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteReservedSnafu { bytes: 1_u32 })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_all(data).context(WriteFieldSnafu {
                            field: "Unknown sub-item contents",
                        })
                    })
                    .context(WriteChunkSnafu {
                        name: "Unknown Sub-Item",
                    })?;
                }
            }
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "User Information Item",
    })
}

#[cfg(test)]
mod tests {
    use crate::pdu::reader::read_pdu;
    use crate::pdu::*;
    use matches::assert_matches;

    fn round_trip(pdu: Pdu) {
        let mut bytes = vec![];
        write_pdu(&mut bytes, &pdu).unwrap();
        let decoded = read_pdu(&mut &bytes[..], MAXIMUM_PDU_SIZE, true).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn round_trips_association_rq() {
        round_trip(Pdu::AssociationRQ(AssociationRQ {
            protocol_version: 1,
            calling_ae_title: "THIS-SCU".to_string(),
            called_ae_title: "THAT-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![
                PresentationContextProposed {
                    id: 1,
                    abstract_syntax: "1.2.840.10008.1.1".to_string(),
                    transfer_syntaxes: vec![
                        "1.2.840.10008.1.2.1".to_string(),
                        "1.2.840.10008.1.2".to_string(),
                    ],
                },
                PresentationContextProposed {
                    id: 3,
                    abstract_syntax: "1.2.840.10008.5.1.4.1.1.7".to_string(),
                    transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
                },
            ],
            user_variables: vec![
                UserVariableItem::MaxLength(DEFAULT_MAX_PDU),
                UserVariableItem::ImplementationClassUID("2.25.77".to_string()),
                UserVariableItem::ImplementationVersionName("med 0.1".to_string()),
            ],
        }));
    }

    #[test]
    fn round_trips_association_ac() {
        round_trip(Pdu::AssociationAC(AssociationAC {
            protocol_version: 1,
            calling_ae_title: "THIS-SCU".to_string(),
            called_ae_title: "THAT-SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![
                PresentationContextResult {
                    id: 1,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
                },
                PresentationContextResult {
                    id: 3,
                    reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                    transfer_syntax: "1.2.840.10008.1.2".to_string(),
                },
            ],
            user_variables: vec![UserVariableItem::MaxLength(DEFAULT_MAX_PDU)],
        }));
    }

    #[test]
    fn round_trips_association_rj() {
        round_trip(Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CalledAETitleNotRecognized,
            ),
        }));
        round_trip(Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Transient,
            source: AssociationRJSource::ServiceProviderPresentation(
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
            ),
        }));
    }

    #[test]
    fn round_trips_p_data() {
        round_trip(Pdu::PData {
            data: vec![
                PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: vec![1, 2, 3, 4],
                },
                PDataValue {
                    presentation_context_id: 1,
                    value_type: PDataValueType::Data,
                    is_last: false,
                    data: vec![9; 64],
                },
            ],
        });
    }

    #[test]
    fn round_trips_release_and_abort() {
        round_trip(Pdu::ReleaseRQ);
        round_trip(Pdu::ReleaseRP);
        round_trip(Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        });
        round_trip(Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::UnexpectedPdu),
        });
    }

    #[test]
    fn unknown_pdu_type_is_preserved() {
        let bytes = [0xAA, 0x00, 0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF];
        let pdu = read_pdu(&mut &bytes[..], MAXIMUM_PDU_SIZE, true).unwrap();
        assert_eq!(
            pdu,
            Pdu::Unknown {
                pdu_type: 0xAA,
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            }
        );
    }

    #[test]
    fn strict_mode_refuses_oversized_pdus() {
        // a P-DATA-TF with a single PDV slightly larger than the maximum
        let mut bytes = vec![0x04, 0x00];
        bytes.extend((MINIMUM_PDU_SIZE + 6).to_be_bytes());
        bytes.extend((MINIMUM_PDU_SIZE + 2).to_be_bytes());
        bytes.push(1); // presentation context ID
        bytes.push(0x02); // message control header: last fragment
        bytes.resize(bytes.len() + MINIMUM_PDU_SIZE as usize, 0);

        let err = read_pdu(&mut &bytes[..], MINIMUM_PDU_SIZE, true).unwrap_err();
        assert_matches!(err, super::super::reader::Error::PduTooLarge { .. });

        // lenient mode tolerates it below the hard bound
        let pdu = read_pdu(&mut &bytes[..], MINIMUM_PDU_SIZE, false).unwrap();
        assert_matches!(pdu, Pdu::PData { .. });
    }
}
