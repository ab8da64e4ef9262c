//! query_sm / query_sm_resp bodies.

use std::io::Cursor;

use bytes::BytesMut;

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::message::{MAX_ADDR, MAX_MESSAGE_ID};
use super::tlv::TlvMap;

pub const MAX_FINAL_DATE: usize = 17;

/// Message states reported in query_sm_resp.
pub mod message_state {
    pub const ENROUTE: u8 = 1;
    pub const DELIVERED: u8 = 2;
    pub const EXPIRED: u8 = 3;
    pub const DELETED: u8 = 4;
    pub const UNDELIVERABLE: u8 = 5;
    pub const ACCEPTED: u8 = 6;
    pub const UNKNOWN: u8 = 7;
    pub const REJECTED: u8 = 8;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySm {
    pub message_id: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
}

impl QuerySm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySmResp {
    pub message_id: String,
    pub final_date: String,
    pub message_state: u8,
    pub error_code: u8,
    pub tlvs: TlvMap,
}

impl QuerySmResp {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            final_date: get_cstring(buf, MAX_FINAL_DATE, "final_date")?,
            message_state: get_u8(buf)?,
            error_code: get_u8(buf)?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        put_cstring(buf, &self.final_date, MAX_FINAL_DATE, "final_date")?;
        buf.extend_from_slice(&[self.message_state, self.error_code]);
        self.tlvs.encode(buf);
        Ok(())
    }
}
