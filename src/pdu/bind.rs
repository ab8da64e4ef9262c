//! Bind request/response bodies.
//!
//! The three bind operations (receiver, transmitter, transceiver) share one
//! field layout; the `Pdu` variants wrap the shared structs.

use std::io::Cursor;

use bytes::{Buf, BytesMut};

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::tlv::TlvMap;

pub const MAX_SYSTEM_ID: usize = 16;
pub const MAX_PASSWORD: usize = 9;
pub const MAX_SYSTEM_TYPE: usize = 13;
pub const MAX_ADDRESS_RANGE: usize = 41;

/// Body of bind_receiver / bind_transmitter / bind_transceiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindFields {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
    pub tlvs: TlvMap,
}

impl BindFields {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let system_id = get_cstring(buf, MAX_SYSTEM_ID, "system_id")?;
        let password = get_cstring(buf, MAX_PASSWORD, "password")?;
        let system_type = get_cstring(buf, MAX_SYSTEM_TYPE, "system_type")?;
        let interface_version = get_u8(buf)?;
        let addr_ton = get_u8(buf)?;
        let addr_npi = get_u8(buf)?;
        let address_range = get_cstring(buf, MAX_ADDRESS_RANGE, "address_range")?;
        let tlvs = TlvMap::decode_rest(buf)?;

        Ok(Self {
            system_id,
            password,
            system_type,
            interface_version,
            addr_ton,
            addr_npi,
            address_range,
            tlvs,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.system_id, MAX_SYSTEM_ID, "system_id")?;
        put_cstring(buf, &self.password, MAX_PASSWORD, "password")?;
        put_cstring(buf, &self.system_type, MAX_SYSTEM_TYPE, "system_type")?;
        buf.extend_from_slice(&[self.interface_version, self.addr_ton, self.addr_npi]);
        put_cstring(buf, &self.address_range, MAX_ADDRESS_RANGE, "address_range")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}

/// Body of bind_*_resp: the server's system id plus optional parameters
/// (typically sc_interface_version).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindRespFields {
    pub system_id: String,
    pub tlvs: TlvMap,
}

impl BindRespFields {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            tlvs: TlvMap::new(),
        }
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        // A rejected bind may answer with a bare header; an absent body
        // decodes as an empty system id.
        if !buf.has_remaining() {
            return Ok(Self::default());
        }
        let system_id = get_cstring(buf, MAX_SYSTEM_ID, "system_id")?;
        let tlvs = TlvMap::decode_rest(buf)?;
        Ok(Self { system_id, tlvs })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.system_id, MAX_SYSTEM_ID, "system_id")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}
