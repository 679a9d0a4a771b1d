//! CAN-TP (ISO-TP) message reconstruction
//!
//! Reconstructs one logical response from the frames a single responder sent.
//!
//! ## Frame types (high nibble of the first data byte)
//!
//! - `0` **Single frame**: length in the low nibble (or, when that is zero,
//!   in the next byte for CAN-FD)
//! - `1` **First frame**: 12-bit length, or a 32-bit length after a zero
//!   12-bit length
//! - `2` **Consecutive frame**: sequence index 1..15, wrapping to 0
//! - `3` **Flow control**: sent by the receiver, never part of a response
//!
//! A session moves `Idle -> Accumulating -> Complete`, or
//! `Accumulating -> Aborted` on a sequencing violation. Frames are not
//! accepted once a session is complete or aborted.

use crate::types::{CanFrame, ProtocolError};
use byteorder::{BigEndian, ByteOrder};

const PCI_SINGLE_FRAME: u8 = 0x0;
const PCI_FIRST_FRAME: u8 = 0x1;
const PCI_CONSECUTIVE_FRAME: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// Transport session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a single frame or first frame
    Idle,
    /// First frame received, collecting consecutive frames
    Accumulating {
        declared_len: usize,
        buffer: Vec<u8>,
        next_seq: u8,
    },
    /// All declared bytes received (padding already dropped)
    Complete(Vec<u8>),
    /// A sequencing violation ended the session
    Aborted(ProtocolError),
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Accumulating { .. } => "Accumulating",
            SessionState::Complete(_) => "Complete",
            SessionState::Aborted(_) => "Aborted",
        }
    }
}

/// One ISO-TP receive session
#[derive(Debug, Clone)]
pub struct TransportSession {
    state: SessionState,
    max_payload_len: usize,
}

impl TransportSession {
    /// Create an idle session accepting payloads up to `max_payload_len` bytes
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            state: SessionState::Idle,
            max_payload_len,
        }
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True once every declared byte has arrived
    pub fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::Complete(_))
    }

    /// Feed the next frame of the response
    pub fn feed(&mut self, frame: &CanFrame) -> Result<(), ProtocolError> {
        let data = frame.data.as_slice();
        let Some(&pci) = data.first() else {
            return Err(ProtocolError::UnexpectedFrame {
                kind: "empty",
                state: self.state.name(),
            });
        };
        let frame_type = pci >> 4;

        log::trace!(
            "0x{:X} {} frame in state {}",
            frame.can_id,
            frame_kind(frame_type),
            self.state.name()
        );

        match frame_type {
            PCI_SINGLE_FRAME if self.state == SessionState::Idle => {
                let payload = self.single_frame(data)?;
                self.state = SessionState::Complete(payload);
                Ok(())
            }
            PCI_FIRST_FRAME if self.state == SessionState::Idle => {
                let (declared_len, header_len) = self.first_frame_length(data)?;
                let mut buffer = Vec::with_capacity(declared_len);
                buffer.extend_from_slice(&data[header_len..]);
                self.state = SessionState::Accumulating {
                    declared_len,
                    buffer,
                    next_seq: 1,
                };
                self.complete_if_done();
                Ok(())
            }
            PCI_CONSECUTIVE_FRAME => {
                let SessionState::Accumulating {
                    buffer, next_seq, ..
                } = &mut self.state
                else {
                    return Err(self.unexpected(frame_type));
                };
                let found = pci & 0x0F;
                if found != *next_seq {
                    let violation = ProtocolError::SequenceViolation {
                        expected: *next_seq,
                        found,
                    };
                    self.state = SessionState::Aborted(violation.clone());
                    return Err(violation);
                }
                buffer.extend_from_slice(&data[1..]);
                *next_seq = (*next_seq + 1) & 0x0F;
                self.complete_if_done();
                Ok(())
            }
            other => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&self, frame_type: u8) -> ProtocolError {
        ProtocolError::UnexpectedFrame {
            kind: frame_kind(frame_type),
            state: self.state.name(),
        }
    }

    /// Consume the session and return the payload
    pub fn finish(self) -> Result<Vec<u8>, ProtocolError> {
        match self.state {
            SessionState::Complete(payload) => Ok(payload),
            SessionState::Aborted(err) => Err(err),
            SessionState::Accumulating {
                declared_len,
                buffer,
                ..
            } => Err(ProtocolError::IncompleteSession {
                declared: declared_len,
                received: buffer.len(),
            }),
            SessionState::Idle => Err(ProtocolError::EmptyCapture),
        }
    }

    fn single_frame(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let (declared, header_len) = match data[0] & 0x0F {
            0 => match data.get(1) {
                Some(&len) => (len as usize, 2),
                None => {
                    return Err(ProtocolError::InvalidSingleFrame {
                        declared: 0,
                        available: 0,
                    })
                }
            },
            len => (len as usize, 1),
        };
        let available = data.len() - header_len;
        if declared == 0 || declared > available {
            return Err(ProtocolError::InvalidSingleFrame {
                declared,
                available,
            });
        }
        Ok(data[header_len..header_len + declared].to_vec())
    }

    fn first_frame_length(&self, data: &[u8]) -> Result<(usize, usize), ProtocolError> {
        if data.len() < 2 {
            return Err(ProtocolError::IncompleteSession {
                declared: 0,
                received: 0,
            });
        }
        let short_len = (BigEndian::read_u16(&data[0..2]) & 0x0FFF) as usize;
        let (declared, header_len) = if short_len == 0 {
            if data.len() < 6 {
                return Err(ProtocolError::IncompleteSession {
                    declared: 0,
                    received: 0,
                });
            }
            (BigEndian::read_u32(&data[2..6]) as usize, 6)
        } else {
            (short_len, 2)
        };
        if declared > self.max_payload_len {
            return Err(ProtocolError::PayloadTooLarge {
                declared,
                limit: self.max_payload_len,
            });
        }
        Ok((declared, header_len))
    }

    fn complete_if_done(&mut self) {
        if let SessionState::Accumulating {
            declared_len,
            buffer,
            ..
        } = &mut self.state
        {
            if buffer.len() >= *declared_len {
                buffer.truncate(*declared_len);
                let payload = std::mem::take(buffer);
                log::debug!("Transport session complete: {} bytes", payload.len());
                self.state = SessionState::Complete(payload);
            }
        }
    }
}

fn frame_kind(frame_type: u8) -> &'static str {
    match frame_type {
        PCI_SINGLE_FRAME => "single",
        PCI_FIRST_FRAME => "first",
        PCI_CONSECUTIVE_FRAME => "consecutive",
        PCI_FLOW_CONTROL => "flow control",
        _ => "unknown",
    }
}

/// Reassemble the frames of one response into its payload
///
/// All frames must come from the same arbitration ID.
pub fn reassemble(frames: &[CanFrame], max_payload_len: usize) -> Result<Vec<u8>, ProtocolError> {
    let first = frames.first().ok_or(ProtocolError::EmptyCapture)?;
    if let Some(other) = frames.iter().find(|f| f.can_id != first.can_id) {
        return Err(ProtocolError::MixedArbitrationIds {
            expected: first.can_id,
            found: other.can_id,
        });
    }

    let mut session = TransportSession::new(max_payload_len);
    for frame in frames {
        session.feed(frame)?;
    }
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 4095;

    fn frame(data: &[u8]) -> CanFrame {
        CanFrame {
            can_id: 0x18DAF160,
            data: data.to_vec(),
            is_extended: true,
        }
    }

    #[test]
    fn test_single_frame() {
        let payload = reassemble(&[frame(&[0x04, 0x41, 0x05, 0x7B, 0x00, 0xAA, 0xAA, 0xAA])], LIMIT)
            .unwrap();
        assert_eq!(payload, vec![0x41, 0x05, 0x7B, 0x00]);
    }

    #[test]
    fn test_single_frame_fd_escape() {
        let mut data = vec![0x00, 0x0A];
        data.extend(1..=10u8);
        data.extend([0xCC; 4]);
        let payload = reassemble(&[frame(&data)], LIMIT).unwrap();
        assert_eq!(payload, (1..=10u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_frame_longer_than_frame() {
        let err = reassemble(&[frame(&[0x07, 0x41, 0x05])], LIMIT).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidSingleFrame {
                declared: 7,
                available: 2
            }
        );
    }

    #[test]
    fn test_multi_frame_drops_headers_and_padding() {
        let frames = [
            frame(&[0x10, 0x0A, 1, 2, 3, 4, 5, 6]),
            frame(&[0x21, 7, 8, 9, 10, 0x55, 0x55, 0x55]),
        ];
        let payload = reassemble(&frames, LIMIT).unwrap();
        assert_eq!(payload, (1..=10u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequence_wraps_after_fifteen() {
        // 6 bytes in the first frame + 16 consecutive frames of 7 bytes
        let declared = 6 + 16 * 7;
        let mut frames = vec![frame(&[0x10, declared as u8, 0, 0, 0, 0, 0, 0])];
        for i in 0..16u8 {
            let seq = (i + 1) & 0x0F;
            frames.push(frame(&[0x20 | seq, i, i, i, i, i, i, i]));
        }
        let payload = reassemble(&frames, LIMIT).unwrap();
        assert_eq!(payload.len(), declared);
        assert_eq!(payload[declared - 1], 15);
    }

    #[test]
    fn test_sequence_violation_aborts_session() {
        let mut session = TransportSession::new(LIMIT);
        session.feed(&frame(&[0x10, 0x14, 1, 2, 3, 4, 5, 6])).unwrap();
        session.feed(&frame(&[0x21, 7, 8, 9, 10, 11, 12, 13])).unwrap();
        let err = session.feed(&frame(&[0x23, 14, 15, 16, 17, 18, 19, 20])).unwrap_err();

        assert_eq!(err, ProtocolError::SequenceViolation { expected: 2, found: 3 });
        assert!(matches!(session.state(), SessionState::Aborted(_)));
        assert_eq!(session.finish().unwrap_err(), err);
    }

    #[test]
    fn test_incomplete_session() {
        let frames = [
            frame(&[0x10, 0x39, 0x62, 0x26, 0x60, 0x80, 0x1F, 0xFF]),
            frame(&[0x21, 0xF3, 0xFF, 0xF0, 0x00, 0x00, 0x00, 0x00]),
        ];
        let err = reassemble(&frames, LIMIT).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::IncompleteSession {
                declared: 0x39,
                received: 13
            }
        );
    }

    #[test]
    fn test_complete_session_rejects_more_frames() {
        let mut session = TransportSession::new(LIMIT);
        session.feed(&frame(&[0x03, 0x41, 0x0D, 0x32, 0, 0, 0, 0])).unwrap();
        assert!(session.is_complete());

        let err = session.feed(&frame(&[0x21, 0, 0, 0, 0, 0, 0, 0])).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedFrame {
                kind: "consecutive",
                state: "Complete"
            }
        );
        assert_eq!(session.finish().unwrap(), vec![0x41, 0x0D, 0x32]);
    }

    #[test]
    fn test_consecutive_frame_without_first_frame() {
        let err = reassemble(&[frame(&[0x21, 0, 0, 0, 0, 0, 0, 0])], LIMIT).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedFrame { state: "Idle", .. }));
    }

    #[test]
    fn test_flow_control_is_rejected() {
        let err = reassemble(&[frame(&[0x30, 0x00, 0x00, 0, 0, 0, 0, 0])], LIMIT).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedFrame { kind: "flow control", .. }));
    }

    #[test]
    fn test_escape_length_first_frame() {
        let frames = [
            frame(&[0x10, 0x00, 0x00, 0x00, 0x00, 0x03]),
            frame(&[0x21, 0xAA, 0xBB, 0xCC, 0x55]),
        ];
        assert_eq!(reassemble(&frames, LIMIT).unwrap(), vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_payload_limit() {
        let err = reassemble(&[frame(&[0x1F, 0xFF, 0, 0, 0, 0, 0, 0])], 255).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooLarge {
                declared: 4095,
                limit: 255
            }
        );
    }

    #[test]
    fn test_mixed_ids_are_rejected() {
        let mut other = frame(&[0x21, 0, 0, 0, 0, 0, 0, 0]);
        other.can_id = 0x18DAF110;
        let frames = [frame(&[0x10, 0x0A, 1, 2, 3, 4, 5, 6]), other];
        assert_eq!(
            reassemble(&frames, LIMIT).unwrap_err(),
            ProtocolError::MixedArbitrationIds {
                expected: 0x18DAF160,
                found: 0x18DAF110
            }
        );
    }

    #[test]
    fn test_empty_capture() {
        assert_eq!(reassemble(&[], LIMIT).unwrap_err(), ProtocolError::EmptyCapture);
    }
}
