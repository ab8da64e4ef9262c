//! PDU header: four 32-bit big-endian fields.

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};

use super::codec::CodecError;
use super::command::CommandId;
use super::status::Status;

/// The 16-octet header common to every PDU.
///
/// `command_length` covers the whole frame, header included, and is at
/// least [`Header::SIZE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub command_length: u32,
    pub command_id: CommandId,
    pub command_status: Status,
    pub sequence_number: u32,
}

impl Header {
    pub const SIZE: usize = 16;

    /// Build a request header. The length is filled in at encode time.
    pub fn new(command_id: CommandId, sequence_number: u32) -> Self {
        Self {
            command_length: Self::SIZE as u32,
            command_id,
            command_status: Status::Ok,
            sequence_number,
        }
    }

    /// Build a response header carrying a status.
    pub fn with_status(command_id: CommandId, sequence_number: u32, status: Status) -> Self {
        Self {
            command_length: Self::SIZE as u32,
            command_id,
            command_status: status,
            sequence_number,
        }
    }

    /// Decode a header from exactly [`Header::SIZE`] buffered octets.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::Truncated {
                needed: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let command_length = buf.get_u32();
        let raw_id = buf.get_u32();
        let command_status = Status::from_u32(buf.get_u32());
        let sequence_number = buf.get_u32();

        let command_id = CommandId::from_u32(raw_id).map_err(CodecError::UnknownCommand)?;

        Ok(Self {
            command_length,
            command_id,
            command_status,
            sequence_number,
        })
    }

    /// Encode the header. `command_length` is written as stored; frame-level
    /// encoders fix it up after the body is appended.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.command_length);
        buf.put_u32(self.command_id as u32);
        buf.put_u32(self.command_status.to_u32());
        buf.put_u32(self.sequence_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header::with_status(CommandId::SubmitSmResp, 42, Status::Ok);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), Header::SIZE);

        let mut cursor = Cursor::new(buf.as_ref());
        let decoded = Header::decode(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(cursor.position() as usize, Header::SIZE);
    }

    #[test]
    fn unknown_command_id_is_rejected_with_the_raw_value() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&16u32.to_be_bytes());
        raw.extend_from_slice(&0x0000_00AAu32.to_be_bytes());
        raw.extend_from_slice(&0u32.to_be_bytes());
        raw.extend_from_slice(&7u32.to_be_bytes());

        let mut cursor = Cursor::new(raw.as_slice());
        match Header::decode(&mut cursor) {
            Err(CodecError::UnknownCommand(id)) => assert_eq!(id, 0xAA),
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
    }
}
