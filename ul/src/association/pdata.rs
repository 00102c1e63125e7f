use std::io::Write;

use crate::pdu::{PDataValueType, PDU_HEADER_SIZE};

/// Set up the P-Data PDU header for sending.
fn setup_pdata_header(buffer: &mut Vec<u8>, value_type: PDataValueType, is_last: bool) {
    let data_len = (buffer.len() - 12) as u32;

    // full PDU length (minus PDU type and reserved byte)
    let pdu_len = data_len + 4 + 2;
    let pdu_len_bytes = pdu_len.to_be_bytes();

    buffer[2] = pdu_len_bytes[0];
    buffer[3] = pdu_len_bytes[1];
    buffer[4] = pdu_len_bytes[2];
    buffer[5] = pdu_len_bytes[3];

    // presentation data value length (data + 2 properties below)
    let pdv_data_len = data_len + 2;
    let data_len_bytes = pdv_data_len.to_be_bytes();

    buffer[6] = data_len_bytes[0];
    buffer[7] = data_len_bytes[1];
    buffer[8] = data_len_bytes[2];
    buffer[9] = data_len_bytes[3];

    // message control header
    let mut header = 0x00;
    if value_type == PDataValueType::Command {
        header |= 0x01;
    }
    if is_last {
        header |= 0x02;
    }
    buffer[11] = header;
}

/// A P-Data value writer.
///
/// This exposes an API to iteratively construct and send
/// command or data fragments to another node.
/// Using this as a [standard writer](std::io::Write)
/// will automatically split the incoming bytes
/// into separate PDUs if they do not fit in a single one,
/// each fragment flagged according to the chosen value type.
/// The last fragment is emitted by [`finish`](Self::finish),
/// or automatically when the writer is dropped.
#[must_use]
pub struct PDataWriter<W: Write> {
    buffer: Vec<u8>,
    stream: W,
    value_type: PDataValueType,
    max_data_len: u32,
    pdus_sent: u32,
}

impl<W> PDataWriter<W>
where
    W: Write,
{
    /// Construct a new P-Data value writer.
    ///
    /// `max_pdu_length` is the maximum value of the PDU-length property
    /// admitted by the receiving entity.
    pub(crate) fn new(
        stream: W,
        presentation_context_id: u8,
        value_type: PDataValueType,
        max_pdu_length: u32,
    ) -> Self {
        let max_data_len = calculate_max_data_len_single(max_pdu_length);
        let mut buffer = Vec::with_capacity((max_data_len + PDU_HEADER_SIZE) as usize);
        // initial buffer set up
        buffer.extend([
            // PDU-type + reserved byte
            0x04,
            0x00,
            // full PDU length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            // presentation data value length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            // presentation context id
            presentation_context_id,
            // message control header, unknown at this point
            0xFF,
        ]);

        PDataWriter {
            stream,
            value_type,
            max_data_len,
            buffer,
            pdus_sent: 0,
        }
    }

    /// The maximum number of value bytes that fit in one PDU.
    pub fn max_data_len(&self) -> u32 {
        self.max_data_len
    }

    /// The number of PDUs dispatched so far,
    /// not counting the last fragment.
    pub fn pdus_sent(&self) -> u32 {
        self.pdus_sent
    }

    /// Declare to have finished sending fragments,
    /// thus emitting the last fragment PDU.
    ///
    /// This is also done automatically once the P-Data writer is dropped.
    pub fn finish(mut self) -> std::io::Result<()> {
        self.finish_impl()?;
        Ok(())
    }

    fn finish_impl(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            // send last PDU
            setup_pdata_header(&mut self.buffer, self.value_type, true);
            self.stream.write_all(&self.buffer[..])?;
            self.pdus_sent += 1;
            // clear buffer so that subsequent calls to `finish_impl`
            // do not send any more PDUs
            self.buffer.clear();
        }
        Ok(())
    }

    /// Use the current state of the buffer to send a new PDU.
    ///
    /// Pre-condition:
    /// the buffer must hold exactly one PDU worth of data.
    fn dispatch_pdu(&mut self) -> std::io::Result<()> {
        debug_assert!(self.buffer.len() >= 12);
        setup_pdata_header(&mut self.buffer, self.value_type, false);
        self.stream.write_all(&self.buffer)?;
        self.pdus_sent += 1;

        // back to just the header
        self.buffer.truncate(12);

        Ok(())
    }
}

impl<W> Write for PDataWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let total_len = self.max_data_len as usize + 12;
        if self.buffer.len() + buf.len() <= total_len {
            // accumulate into buffer, do nothing
            self.buffer.extend(buf);
            Ok(buf.len())
        } else {
            // fill in the rest of the buffer, send the PDU,
            // and leave the rest for subsequent writes
            let buf = &buf[..total_len - self.buffer.len()];
            self.buffer.extend(buf);
            debug_assert_eq!(self.buffer.len(), total_len);
            self.dispatch_pdu()?;
            Ok(buf.len())
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // do nothing
        Ok(())
    }
}

/// With the P-Data writer dropped,
/// this `Drop` implementation
/// will construct and emit the last fragment PDU
/// if there is any data left to send.
impl<W> Drop for PDataWriter<W>
where
    W: Write,
{
    fn drop(&mut self) {
        let _ = self.finish_impl();
    }
}

/// Determine the maximum number of value bytes in a single PDV
/// given the maximum PDU length:
/// the PDV item length field (4 bytes)
/// plus the presentation context ID and message control header (2 bytes)
/// also count towards the PDU length.
fn calculate_max_data_len_single(pdu_len: u32) -> u32 {
    pdu_len - 4 - 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{read_pdu, PDataValueType, Pdu, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE};

    fn read_all_pdus(mut bytes: &[u8]) -> Vec<Pdu> {
        let mut out = vec![];
        while !bytes.is_empty() {
            out.push(read_pdu(&mut bytes, MAXIMUM_PDU_SIZE, true).unwrap());
        }
        out
    }

    #[test]
    fn small_payload_is_a_single_last_fragment() {
        let mut sink = vec![];
        let mut writer = PDataWriter::new(&mut sink, 1, PDataValueType::Command, MINIMUM_PDU_SIZE);
        writer.write_all(&[0x55; 100]).unwrap();
        writer.finish().unwrap();

        let pdus = read_all_pdus(&sink);
        assert_eq!(pdus.len(), 1);
        match &pdus[0] {
            Pdu::PData { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].presentation_context_id, 1);
                assert_eq!(data[0].value_type, PDataValueType::Command);
                assert!(data[0].is_last);
                assert_eq!(data[0].data, vec![0x55; 100]);
            }
            other => panic!("unexpected PDU: {:?}", other),
        }
    }

    #[test]
    fn large_payload_is_split_and_reassembles() {
        let payload: Vec<u8> = (0..20_000_u32).map(|i| i as u8).collect();

        let mut sink = vec![];
        let mut writer = PDataWriter::new(&mut sink, 3, PDataValueType::Data, MINIMUM_PDU_SIZE);
        writer.write_all(&payload).unwrap();
        writer.finish().unwrap();

        let pdus = read_all_pdus(&sink);
        assert!(pdus.len() > 1);

        let mut reassembled = vec![];
        for (i, pdu) in pdus.iter().enumerate() {
            match pdu {
                Pdu::PData { data } => {
                    assert_eq!(data.len(), 1);
                    let value = &data[0];
                    assert_eq!(value.presentation_context_id, 3);
                    assert_eq!(value.value_type, PDataValueType::Data);
                    assert_eq!(value.is_last, i == pdus.len() - 1);
                    // every PDU fits in the maximum length
                    assert!(value.data.len() as u32 + 6 <= MINIMUM_PDU_SIZE);
                    reassembled.extend_from_slice(&value.data);
                }
                other => panic!("unexpected PDU: {:?}", other),
            }
        }
        assert_eq!(reassembled, payload);
    }
}
