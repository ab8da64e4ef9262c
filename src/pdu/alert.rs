//! alert_notification body.
//!
//! Field order follows the protocol: source TON, source NPI, source
//! address, then the ESME address triple, then TLVs
//! (ms_availability_status).

use std::io::Cursor;

use bytes::BytesMut;

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::tlv::TlvMap;

const MAX_ALERT_ADDR: usize = 65;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertNotification {
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub esme_addr_ton: u8,
    pub esme_addr_npi: u8,
    pub esme_addr: String,
    pub tlvs: TlvMap,
}

impl AlertNotification {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ALERT_ADDR, "source_addr")?,
            esme_addr_ton: get_u8(buf)?,
            esme_addr_npi: get_u8(buf)?,
            esme_addr: get_cstring(buf, MAX_ALERT_ADDR, "esme_addr")?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ALERT_ADDR, "source_addr")?;
        buf.extend_from_slice(&[self.esme_addr_ton, self.esme_addr_npi]);
        put_cstring(buf, &self.esme_addr, MAX_ALERT_ADDR, "esme_addr")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}
