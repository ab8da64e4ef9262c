//! Field primitives, error types and the socket-level framed codec.

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::command::CommandId;
use super::header::Header;
use super::status::Status;
use super::Pdu;

/// Upper bound on a framed PDU, guarding against memory exhaustion.
pub const MAX_PDU_SIZE: u32 = 64 * 1024;

/// Body-level decode/encode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("need {needed} octets, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown command_id {0:#010x}")]
    UnknownCommand(u32),

    #[error("field '{field}' is not null terminated within the frame")]
    MissingNullByte { field: &'static str },

    #[error("field '{field}' exceeds its maximum of {max} octets")]
    CStringTooLong { field: &'static str, max: usize },

    #[error("field '{field}' contains an embedded null byte")]
    EmbeddedNull { field: &'static str },

    #[error("sm_length {declared} exceeds the {available} octets before the TLV section")]
    InvalidSmLength { declared: usize, available: usize },

    #[error("invalid TLV: {0}")]
    InvalidTlv(String),

    #[error("duplicate TLV tag {0:#06x}")]
    DuplicateTlv(u16),

    #[error("{trailing} octets past the decoded body inside the declared frame")]
    TrailingBytes { trailing: usize },
}

/// Frame-level failures surfaced by [`SmppCodec`].
///
/// Where the offending frame's sequence number could be recovered it is
/// carried along so sessions can nack with it; otherwise [`sequence`]
/// reports zero.
///
/// [`sequence`]: FrameError::sequence
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command_length {length} below the 16-octet header")]
    LengthTooSmall { length: u32 },

    #[error("command_length {length} exceeds the {MAX_PDU_SIZE} octet limit")]
    LengthTooLarge { length: u32 },

    #[error("unknown command_id {id:#010x}")]
    UnknownCommand { id: u32, sequence: u32 },

    #[error("malformed {command} body: {source}")]
    BadBody {
        command: CommandId,
        sequence: u32,
        source: CodecError,
    },

    #[error("oversized PDU for encoding: {length} octets")]
    EncodedTooLarge { length: usize },
}

impl FrameError {
    /// Sequence number to echo in a generic_nack; zero when unrecoverable.
    pub fn sequence(&self) -> u32 {
        match self {
            FrameError::UnknownCommand { sequence, .. } => *sequence,
            FrameError::BadBody { sequence, .. } => *sequence,
            _ => 0,
        }
    }

    /// Status the peer should see for this failure.
    pub fn nack_status(&self) -> Status {
        match self {
            FrameError::LengthTooSmall { .. } | FrameError::LengthTooLarge { .. } => {
                Status::InvalidMsgLength
            }
            FrameError::UnknownCommand { .. } => Status::InvalidCommandId,
            FrameError::BadBody { source, .. } => match source {
                CodecError::InvalidSmLength { .. } => Status::InvalidMsgLength,
                _ => Status::SystemError,
            },
            _ => Status::SystemError,
        }
    }

}

// --- field primitives -------------------------------------------------------

/// Read a null-terminated string, bounded by `max` octets including the
/// terminator. The cursor advances past the terminator.
pub fn get_cstring(
    buf: &mut Cursor<&[u8]>,
    max: usize,
    field: &'static str,
) -> Result<String, CodecError> {
    let start = buf.position() as usize;
    let slice = &buf.get_ref()[start..];

    let nul = match slice.iter().position(|&b| b == 0) {
        Some(pos) => pos,
        None => return Err(CodecError::MissingNullByte { field }),
    };
    if nul + 1 > max {
        return Err(CodecError::CStringTooLong { field, max });
    }

    let value = String::from_utf8_lossy(&slice[..nul]).into_owned();
    buf.advance(nul + 1);
    Ok(value)
}

/// Append a string with a single null terminator, enforcing the per-field
/// maximum (terminator included) and the no-embedded-NUL rule.
pub fn put_cstring(
    buf: &mut BytesMut,
    value: &str,
    max: usize,
    field: &'static str,
) -> Result<(), CodecError> {
    let bytes = value.as_bytes();
    if bytes.len() + 1 > max {
        return Err(CodecError::CStringTooLong { field, max });
    }
    if bytes.contains(&0) {
        return Err(CodecError::EmbeddedNull { field });
    }
    buf.put_slice(bytes);
    buf.put_u8(0);
    Ok(())
}

pub fn get_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated {
            needed: 1,
            available: 0,
        });
    }
    Ok(buf.get_u8())
}

// --- framing ----------------------------------------------------------------

/// A decoded frame: header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct PduFrame {
    pub header: Header,
    pub pdu: Pdu,
}

impl PduFrame {
    /// Frame a request, allocating no status.
    pub fn request(sequence: u32, pdu: Pdu) -> Self {
        Self {
            header: Header::new(pdu.command_id(), sequence),
            pdu,
        }
    }

    /// Frame a response carrying `status` and echoing `sequence`.
    pub fn response(sequence: u32, status: Status, pdu: Pdu) -> Self {
        Self {
            header: Header::with_status(pdu.command_id(), sequence, status),
            pdu,
        }
    }

    pub fn command(&self) -> CommandId {
        self.header.command_id
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence_number
    }

    pub fn status(&self) -> Status {
        self.header.command_status
    }

    pub fn is_response(&self) -> bool {
        self.header.command_id.is_response()
    }
}

/// What the read loop receives per frame: either a well-formed PDU or a
/// malformed one the session should nack and skip.
///
/// Malformed frames travel in-band because a `Decoder` error terminates
/// the `Framed` stream; the offending octets have already been consumed,
/// so reading on is safe. Genuinely fatal conditions (I/O failure, a
/// frame too large to buffer) do surface as stream errors.
#[derive(Debug)]
pub enum PduEvent {
    Frame(PduFrame),
    Malformed(FrameError),
}

/// Length-prefixed SMPP framing for `tokio_util::codec::Framed`.
///
/// Decode first waits for the 4-octet length, validates it, then waits for
/// the complete frame and hands the body to the per-command decoder. A
/// malformed frame is consumed from the buffer before it is reported, so
/// the stream stays aligned and the session can nack and continue.
#[derive(Debug, Default)]
pub struct SmppCodec;

impl SmppCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SmppCodec {
    type Item = PduEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PduEvent>, FrameError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if length < Header::SIZE as u32 {
            // Skip the 16 header octets the peer claims to have sent so the
            // next read starts at a plausible boundary.
            if src.len() < Header::SIZE {
                return Ok(None);
            }
            src.advance(Header::SIZE);
            return Ok(Some(PduEvent::Malformed(FrameError::LengthTooSmall {
                length,
            })));
        }
        if length > MAX_PDU_SIZE {
            return Err(FrameError::LengthTooLarge { length });
        }

        let length = length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        let mut cursor = Cursor::new(frame.as_ref());

        let header = match Header::decode(&mut cursor) {
            Ok(header) => header,
            Err(CodecError::UnknownCommand(id)) => {
                let sequence = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]);
                return Ok(Some(PduEvent::Malformed(FrameError::UnknownCommand {
                    id,
                    sequence,
                })));
            }
            Err(source) => {
                return Ok(Some(PduEvent::Malformed(FrameError::BadBody {
                    command: CommandId::GenericNack,
                    sequence: 0,
                    source,
                })))
            }
        };

        let pdu = match Pdu::decode(header.command_id, &mut cursor) {
            Ok(pdu) => pdu,
            Err(source) => {
                return Ok(Some(PduEvent::Malformed(FrameError::BadBody {
                    command: header.command_id,
                    sequence: header.sequence_number,
                    source,
                })))
            }
        };

        // Decoding stops at command_length: anything the body decoder left
        // unconsumed is excess data and the frame is rejected.
        let trailing = frame.len() - cursor.position() as usize;
        if trailing > 0 {
            return Ok(Some(PduEvent::Malformed(FrameError::BadBody {
                command: header.command_id,
                sequence: header.sequence_number,
                source: CodecError::TrailingBytes { trailing },
            })));
        }

        Ok(Some(PduEvent::Frame(PduFrame { header, pdu })))
    }
}

impl Encoder<PduFrame> for SmppCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: PduFrame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let start = dst.len();
        frame.header.encode(dst);
        frame
            .pdu
            .encode_body(dst)
            .map_err(|source| FrameError::BadBody {
                command: frame.header.command_id,
                sequence: frame.header.sequence_number,
                source,
            })?;

        let length = dst.len() - start;
        if length > MAX_PDU_SIZE as usize {
            dst.truncate(start);
            return Err(FrameError::EncodedTooLarge { length });
        }
        dst[start..start + 4].copy_from_slice(&(length as u32).to_be_bytes());
        Ok(())
    }
}

/// Encode a frame to a standalone buffer. Convenience for tests and for
/// paths that write without a `Framed` transport.
pub fn encode_frame(frame: &PduFrame) -> Result<BytesMut, FrameError> {
    let mut codec = SmppCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(frame.clone(), &mut buf)?;
    Ok(buf)
}
