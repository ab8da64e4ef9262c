//! data_sm body: the TLV-payload message operation.

use std::io::Cursor;

use bytes::BytesMut;

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::message::{MAX_ADDR, MAX_SERVICE_TYPE};
use super::tlv::TlvMap;

/// data_sm carries no inline short_message; payload travels in the
/// message_payload TLV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub registered_delivery: u8,
    pub data_coding: u8,
    pub tlvs: TlvMap,
}

impl DataSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            service_type: get_cstring(buf, MAX_SERVICE_TYPE, "service_type")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
            dest_addr_ton: get_u8(buf)?,
            dest_addr_npi: get_u8(buf)?,
            dest_addr: get_cstring(buf, MAX_ADDR, "destination_addr")?,
            esm_class: get_u8(buf)?,
            registered_delivery: get_u8(buf)?,
            data_coding: get_u8(buf)?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.service_type, MAX_SERVICE_TYPE, "service_type")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        buf.extend_from_slice(&[self.dest_addr_ton, self.dest_addr_npi]);
        put_cstring(buf, &self.dest_addr, MAX_ADDR, "destination_addr")?;
        buf.extend_from_slice(&[self.esm_class, self.registered_delivery, self.data_coding]);
        self.tlvs.encode(buf);
        Ok(())
    }
}
