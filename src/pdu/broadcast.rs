//! SMPP v5.0 broadcast operation bodies.

use std::io::Cursor;

use bytes::BytesMut;

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::message::{
    MAX_ADDR, MAX_MESSAGE_ID, MAX_SCHEDULE_TIME, MAX_SERVICE_TYPE, MAX_VALIDITY_PERIOD,
};
use super::tlv::TlvMap;

/// broadcast_sm: the broadcast content itself travels in mandatory TLVs
/// (broadcast_area_identifier, broadcast_content_type, message_payload).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub message_id: String,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub replace_if_present: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub tlvs: TlvMap,
}

impl BroadcastSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            service_type: get_cstring(buf, MAX_SERVICE_TYPE, "service_type")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            priority_flag: get_u8(buf)?,
            schedule_delivery_time: get_cstring(
                buf,
                MAX_SCHEDULE_TIME,
                "schedule_delivery_time",
            )?,
            validity_period: get_cstring(buf, MAX_VALIDITY_PERIOD, "validity_period")?,
            replace_if_present: get_u8(buf)?,
            data_coding: get_u8(buf)?,
            sm_default_msg_id: get_u8(buf)?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.service_type, MAX_SERVICE_TYPE, "service_type")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.priority_flag]);
        put_cstring(
            buf,
            &self.schedule_delivery_time,
            MAX_SCHEDULE_TIME,
            "schedule_delivery_time",
        )?;
        put_cstring(
            buf,
            &self.validity_period,
            MAX_VALIDITY_PERIOD,
            "validity_period",
        )?;
        buf.extend_from_slice(&[
            self.replace_if_present,
            self.data_coding,
            self.sm_default_msg_id,
        ]);
        self.tlvs.encode(buf);
        Ok(())
    }
}

/// query_broadcast_sm body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBroadcastSm {
    pub message_id: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub tlvs: TlvMap,
}

impl QueryBroadcastSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}

/// cancel_broadcast_sm body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelBroadcastSm {
    pub service_type: String,
    pub message_id: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub tlvs: TlvMap,
}

impl CancelBroadcastSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            service_type: get_cstring(buf, MAX_SERVICE_TYPE, "service_type")?,
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
            tlvs: TlvMap::decode_rest(buf)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.service_type, MAX_SERVICE_TYPE, "service_type")?;
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}
