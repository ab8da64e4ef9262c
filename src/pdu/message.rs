//! Short-message bodies: submit_sm / deliver_sm (shared layout), their
//! responses, cancel_sm and replace_sm.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};

use super::codec::{get_cstring, get_u8, put_cstring, CodecError};
use super::tlv::TlvMap;

pub const MAX_SERVICE_TYPE: usize = 6;
pub const MAX_ADDR: usize = 21;
pub const MAX_SCHEDULE_TIME: usize = 17;
pub const MAX_VALIDITY_PERIOD: usize = 17;
pub const MAX_MESSAGE_ID: usize = 65;
pub const MAX_SHORT_MESSAGE: usize = 254;

/// Body shared by submit_sm and deliver_sm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmFields {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: TlvMap,
}

impl SmFields {
    /// Replace the payload, updating `sm_length` implicitly.
    pub fn set_short_message(
        &mut self,
        payload: impl Into<Bytes>,
        data_coding: u8,
    ) -> Result<(), CodecError> {
        let payload = payload.into();
        if payload.len() > MAX_SHORT_MESSAGE {
            return Err(CodecError::InvalidSmLength {
                declared: payload.len(),
                available: MAX_SHORT_MESSAGE,
            });
        }
        self.short_message = payload;
        self.data_coding = data_coding;
        Ok(())
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let service_type = get_cstring(buf, MAX_SERVICE_TYPE, "service_type")?;
        let source_addr_ton = get_u8(buf)?;
        let source_addr_npi = get_u8(buf)?;
        let source_addr = get_cstring(buf, MAX_ADDR, "source_addr")?;
        let dest_addr_ton = get_u8(buf)?;
        let dest_addr_npi = get_u8(buf)?;
        let dest_addr = get_cstring(buf, MAX_ADDR, "destination_addr")?;
        let esm_class = get_u8(buf)?;
        let protocol_id = get_u8(buf)?;
        let priority_flag = get_u8(buf)?;
        let schedule_delivery_time =
            get_cstring(buf, MAX_SCHEDULE_TIME, "schedule_delivery_time")?;
        let validity_period = get_cstring(buf, MAX_VALIDITY_PERIOD, "validity_period")?;
        let registered_delivery = get_u8(buf)?;
        let replace_if_present = get_u8(buf)?;
        let data_coding = get_u8(buf)?;
        let sm_default_msg_id = get_u8(buf)?;

        let sm_length = get_u8(buf)? as usize;
        if sm_length > buf.remaining() {
            return Err(CodecError::InvalidSmLength {
                declared: sm_length,
                available: buf.remaining(),
            });
        }
        let short_message = buf.copy_to_bytes(sm_length);

        let tlvs = TlvMap::decode_rest(buf)?;

        Ok(Self {
            service_type,
            source_addr_ton,
            source_addr_npi,
            source_addr,
            dest_addr_ton,
            dest_addr_npi,
            dest_addr,
            esm_class,
            protocol_id,
            priority_flag,
            schedule_delivery_time,
            validity_period,
            registered_delivery,
            replace_if_present,
            data_coding,
            sm_default_msg_id,
            short_message,
            tlvs,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.short_message.len() > u8::MAX as usize {
            return Err(CodecError::InvalidSmLength {
                declared: self.short_message.len(),
                available: u8::MAX as usize,
            });
        }
        put_cstring(buf, &self.service_type, MAX_SERVICE_TYPE, "service_type")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        buf.extend_from_slice(&[self.dest_addr_ton, self.dest_addr_npi]);
        put_cstring(buf, &self.dest_addr, MAX_ADDR, "destination_addr")?;
        buf.extend_from_slice(&[self.esm_class, self.protocol_id, self.priority_flag]);
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
            self.registered_delivery,
            self.replace_if_present,
            self.data_coding,
            self.sm_default_msg_id,
            self.short_message.len() as u8,
        ]);
        buf.extend_from_slice(&self.short_message);
        self.tlvs.encode(buf);
        Ok(())
    }
}

/// Body of submit_sm_resp / deliver_sm_resp / data_sm_resp and the v5.0
/// broadcast responses: a message id plus optional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmRespFields {
    pub message_id: String,
    pub tlvs: TlvMap,
}

impl SmRespFields {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            tlvs: TlvMap::new(),
        }
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        // Error responses may omit the body entirely.
        if !buf.has_remaining() {
            return Ok(Self::default());
        }
        let message_id = get_cstring(buf, MAX_MESSAGE_ID, "message_id")?;
        let tlvs = TlvMap::decode_rest(buf)?;
        Ok(Self { message_id, tlvs })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        self.tlvs.encode(buf);
        Ok(())
    }
}

/// cancel_sm body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelSm {
    pub service_type: String,
    pub message_id: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
}

impl CancelSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            service_type: get_cstring(buf, MAX_SERVICE_TYPE, "service_type")?,
            message_id: get_cstring(buf, MAX_MESSAGE_ID, "message_id")?,
            source_addr_ton: get_u8(buf)?,
            source_addr_npi: get_u8(buf)?,
            source_addr: get_cstring(buf, MAX_ADDR, "source_addr")?,
            dest_addr_ton: get_u8(buf)?,
            dest_addr_npi: get_u8(buf)?,
            dest_addr: get_cstring(buf, MAX_ADDR, "destination_addr")?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.service_type, MAX_SERVICE_TYPE, "service_type")?;
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
        buf.extend_from_slice(&[self.dest_addr_ton, self.dest_addr_npi]);
        put_cstring(buf, &self.dest_addr, MAX_ADDR, "destination_addr")?;
        Ok(())
    }
}

/// replace_sm body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceSm {
    pub message_id: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: TlvMap,
}

impl ReplaceSm {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let message_id = get_cstring(buf, MAX_MESSAGE_ID, "message_id")?;
        let source_addr_ton = get_u8(buf)?;
        let source_addr_npi = get_u8(buf)?;
        let source_addr = get_cstring(buf, MAX_ADDR, "source_addr")?;
        let schedule_delivery_time =
            get_cstring(buf, MAX_SCHEDULE_TIME, "schedule_delivery_time")?;
        let validity_period = get_cstring(buf, MAX_VALIDITY_PERIOD, "validity_period")?;
        let registered_delivery = get_u8(buf)?;
        let sm_default_msg_id = get_u8(buf)?;

        let sm_length = get_u8(buf)? as usize;
        if sm_length > buf.remaining() {
            return Err(CodecError::InvalidSmLength {
                declared: sm_length,
                available: buf.remaining(),
            });
        }
        let short_message = buf.copy_to_bytes(sm_length);
        let tlvs = TlvMap::decode_rest(buf)?;

        Ok(Self {
            message_id,
            source_addr_ton,
            source_addr_npi,
            source_addr,
            schedule_delivery_time,
            validity_period,
            registered_delivery,
            sm_default_msg_id,
            short_message,
            tlvs,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.short_message.len() > u8::MAX as usize {
            return Err(CodecError::InvalidSmLength {
                declared: self.short_message.len(),
                available: u8::MAX as usize,
            });
        }
        put_cstring(buf, &self.message_id, MAX_MESSAGE_ID, "message_id")?;
        buf.extend_from_slice(&[self.source_addr_ton, self.source_addr_npi]);
        put_cstring(buf, &self.source_addr, MAX_ADDR, "source_addr")?;
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
            self.registered_delivery,
            self.sm_default_msg_id,
            self.short_message.len() as u8,
        ]);
        buf.extend_from_slice(&self.short_message);
        self.tlvs.encode(buf);
        Ok(())
    }
}
