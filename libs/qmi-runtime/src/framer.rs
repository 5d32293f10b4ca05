//! QMUX Framer: envelope encode/decode and TLV tag scanning
//!
//! One frame = marker | qmux-length(LE16) | flags | service-id | client-id |
//! control | transaction header | message-id(LE16) | tlvs-length(LE16) |
//! tlv-stream. The transaction header is 1 byte for the CTL service and 2
//! bytes LE for every other service (§4.5); that distinction is entirely
//! internal to [`Envelope::encode`]/[`Envelope::decode`] so callers never
//! branch on it.

use crate::error::QmiError;

/// QMUX envelope marker byte.
pub const MARKER: u8 = 0x01;

/// The CTL service id; its transaction header is 1 byte wide, unlike every
/// other service's 2-byte header.
pub const CTL_SERVICE_ID: u8 = 0x00;

/// A decoded (or to-be-encoded) QMUX frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub service_id: u8,
    pub client_id: u8,
    pub control: u8,
    pub transaction_id: u16,
    pub message_id: u16,
    pub tlvs: Vec<u8>,
}

impl Envelope {
    pub fn is_ctl(&self) -> bool {
        self.service_id == CTL_SERVICE_ID
    }

    /// Correlation id used to match this envelope's response to its sender:
    /// `(client_id << 8) | transaction_id`. A 32-bit key comfortably covers
    /// the 16-bit transaction id non-CTL services use (§9 design note).
    pub fn correlation_id(&self) -> u32 {
        ((self.client_id as u32) << 8) | self.transaction_id as u32
    }

    /// Serialize this envelope, including the QMUX length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let txid_width = if self.is_ctl() { 1 } else { 2 };
        // Bytes following the marker: the length field itself, plus the body.
        let body_len = 1 + 1 + 1 + 1 + txid_width + 2 + 2 + self.tlvs.len();
        let qmux_length = 2 + body_len;

        let mut out = Vec::with_capacity(1 + qmux_length);
        out.push(MARKER);
        out.extend_from_slice(&(qmux_length as u16).to_le_bytes());
        out.push(0); // flags: unused by this design (§4.5 does not assign meaning)
        out.push(self.service_id);
        out.push(self.client_id);
        out.push(self.control);
        if txid_width == 1 {
            out.push(self.transaction_id as u8);
        } else {
            out.extend_from_slice(&self.transaction_id.to_le_bytes());
        }
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&(self.tlvs.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.tlvs);
        out
    }

    /// Decode one envelope from the front of `buf`.
    ///
    /// On success, returns the envelope and the number of bytes it
    /// consumed so the reader can advance its buffer past it; a later
    /// frame may follow in the same read.
    pub fn decode(buf: &[u8]) -> Result<(Envelope, usize), QmiError> {
        let marker = *buf.first().ok_or(QmiError::BadMarker { actual: 0 })?;
        if marker != MARKER {
            return Err(QmiError::bad_marker(marker));
        }
        if buf.len() < 3 {
            return Err(QmiError::short_frame(3, buf.len()));
        }
        let qmux_length = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let total_len = 1 + qmux_length;
        if buf.len() < total_len {
            return Err(QmiError::short_frame(total_len, buf.len()));
        }

        let mut pos = 3usize;
        let need = |pos: usize, n: usize| -> Result<(), QmiError> {
            if pos + n > total_len {
                Err(QmiError::short_frame(total_len, buf.len()))
            } else {
                Ok(())
            }
        };

        need(pos, 1)?;
        let _flags = buf[pos];
        pos += 1;

        need(pos, 1)?;
        let service_id = buf[pos];
        pos += 1;

        need(pos, 1)?;
        let client_id = buf[pos];
        pos += 1;

        need(pos, 1)?;
        let control = buf[pos];
        pos += 1;

        let is_ctl = service_id == CTL_SERVICE_ID;
        let transaction_id = if is_ctl {
            need(pos, 1)?;
            let t = buf[pos] as u16;
            pos += 1;
            t
        } else {
            need(pos, 2)?;
            let t = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
            pos += 2;
            t
        };

        need(pos, 2)?;
        let message_id = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
        pos += 2;

        need(pos, 2)?;
        let tlvs_length = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;

        if pos + tlvs_length > total_len {
            return Err(QmiError::short_frame(total_len, buf.len()));
        }
        let tlvs = buf[pos..pos + tlvs_length].to_vec();
        pos += tlvs_length;

        Ok((
            Envelope {
                service_id,
                client_id,
                control,
                transaction_id,
                message_id,
                tlvs,
            },
            pos,
        ))
    }
}

/// Scan a TLV stream forward for `tag`, returning a view of its payload.
///
/// Records are `(tag:1, length:2-LE, payload:length)`. The walk stops on
/// truncation (fewer than 3 header bytes remaining, or a declared payload
/// longer than what's left) and returns `None` rather than panicking or
/// reading past the stream (§8.3 tag scan totality).
pub fn find_tag(buf: &[u8], tag: u8) -> Option<&[u8]> {
    let mut pos = 0usize;
    while pos + 3 <= buf.len() {
        let record_tag = buf[pos];
        let len = u16::from_le_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
        let payload_start = pos + 3;
        if payload_start + len > buf.len() {
            break;
        }
        if record_tag == tag {
            return Some(&buf[payload_start..payload_start + len]);
        }
        pos = payload_start + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s1_bytes() -> Vec<u8> {
        vec![0x01, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x27, 0x00, 0x00, 0x00]
    }

    #[test]
    fn decodes_s1_ctl_sync() {
        let (envelope, consumed) = Envelope::decode(&s1_bytes()).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(envelope.service_id, CTL_SERVICE_ID);
        assert_eq!(envelope.client_id, 0);
        assert_eq!(envelope.transaction_id, 1);
        assert_eq!(envelope.message_id, 0x0027);
        assert!(envelope.tlvs.is_empty());
    }

    #[test]
    fn encodes_s1_ctl_sync() {
        let envelope = Envelope {
            service_id: CTL_SERVICE_ID,
            client_id: 0,
            control: 0,
            transaction_id: 1,
            message_id: 0x0027,
            tlvs: Vec::new(),
        };
        assert_eq!(envelope.encode(), s1_bytes());
    }

    #[test]
    fn round_trips_non_ctl_two_byte_transaction_header() {
        let envelope = Envelope {
            service_id: 2, // DMS
            client_id: 7,
            control: 0,
            transaction_id: 300, // needs 2 bytes
            message_id: 0x0021,
            tlvs: vec![0x01, 0x01, 0x00, 0x02],
        };
        let encoded = envelope.encode();
        let (decoded, consumed) = Envelope::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn bad_marker_is_rejected() {
        let buf = [0xFFu8, 0x00, 0x00];
        assert!(matches!(
            Envelope::decode(&buf),
            Err(QmiError::BadMarker { actual: 0xFF })
        ));
    }

    #[test]
    fn resyncs_past_garbage_bytes_s6() {
        let mut buf = vec![0xFF, 0xFF];
        buf.extend_from_slice(&s1_bytes());
        // S6: the reader resyncs by discarding bytes until it finds the marker.
        let first_marker = buf.iter().position(|&b| b == MARKER).unwrap();
        let (envelope, consumed) = Envelope::decode(&buf[first_marker..]).unwrap();
        assert_eq!(first_marker, 2);
        assert_eq!(consumed, 12);
        assert_eq!(envelope.message_id, 0x0027);
    }

    #[test]
    fn short_frame_when_buffer_truncated() {
        let mut bytes = s1_bytes();
        bytes.truncate(6);
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(QmiError::ShortFrame { .. })
        ));
    }

    #[test]
    fn find_tag_locates_operation_result() {
        // tag 2, length 4, payload status=0 error=0
        let stream = [0x02, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
        let payload = find_tag(&stream, 2).unwrap();
        assert_eq!(payload, &[0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn find_tag_skips_preceding_records() {
        // tag 1 (len 1, value 0xAA), then tag 2 (len 2, value 0x01 0x02)
        let stream = [0x01, 0x01, 0x00, 0xAA, 0x02, 0x02, 0x00, 0x01, 0x02];
        assert_eq!(find_tag(&stream, 2), Some(&[0x01, 0x02][..]));
    }

    #[test]
    fn find_tag_returns_none_on_exhaustion() {
        let stream = [0x01, 0x01, 0x00, 0xAA];
        assert_eq!(find_tag(&stream, 2), None);
    }

    #[test]
    fn find_tag_does_not_read_past_truncated_record() {
        // declares length 10 but only 1 byte of payload follows
        let stream = [0x02, 0x0A, 0x00, 0xAA];
        assert_eq!(find_tag(&stream, 2), None);
    }

    #[test]
    fn decodes_operation_result_failure_s4() {
        // status=1, error=14 (CALL_FAILED)
        let tlvs = [0x02u8, 0x04, 0x00, 0x01, 0x00, 0x0E, 0x00];
        let payload = find_tag(&tlvs, 2).unwrap();
        let status = u16::from_le_bytes([payload[0], payload[1]]);
        let error = u16::from_le_bytes([payload[2], payload[3]]);
        assert_eq!((status, error), (1, 14));
    }
}
