//! TLV optional parameters.
//!
//! A TLV is a 16-bit tag, 16-bit length and `length` value octets, all
//! big-endian. TLVs trail the mandatory body of a PDU; their order is not
//! semantically significant but is preserved for deterministic encoding.
//! Duplicate tags within one PDU are rejected.

use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec::CodecError;

/// Standard optional parameter tags (SMPP v3.4/v5.0).
pub mod tags {
    pub const DEST_ADDR_SUBUNIT: u16 = 0x0005;
    pub const SOURCE_ADDR_SUBUNIT: u16 = 0x000D;
    pub const QOS_TIME_TO_LIVE: u16 = 0x0017;
    pub const PAYLOAD_TYPE: u16 = 0x0019;
    pub const ADDITIONAL_STATUS_INFO_TEXT: u16 = 0x001D;
    pub const RECEIPTED_MESSAGE_ID: u16 = 0x001E;
    pub const MS_MSG_WAIT_FACILITIES: u16 = 0x0030;
    pub const PRIVACY_INDICATOR: u16 = 0x0201;
    pub const SOURCE_SUBADDRESS: u16 = 0x0202;
    pub const DEST_SUBADDRESS: u16 = 0x0203;
    pub const USER_MESSAGE_REFERENCE: u16 = 0x0204;
    pub const USER_RESPONSE_CODE: u16 = 0x0205;
    pub const SOURCE_PORT: u16 = 0x020A;
    pub const DESTINATION_PORT: u16 = 0x020B;
    pub const SAR_MSG_REF_NUM: u16 = 0x020C;
    pub const LANGUAGE_INDICATOR: u16 = 0x020D;
    pub const SAR_TOTAL_SEGMENTS: u16 = 0x020E;
    pub const SAR_SEGMENT_SEQNUM: u16 = 0x020F;
    pub const SC_INTERFACE_VERSION: u16 = 0x0210;
    pub const CALLBACK_NUM_PRES_IND: u16 = 0x0302;
    pub const CALLBACK_NUM_ATAG: u16 = 0x0303;
    pub const NUMBER_OF_MESSAGES: u16 = 0x0304;
    pub const CALLBACK_NUM: u16 = 0x0381;
    pub const DPF_RESULT: u16 = 0x0420;
    pub const SET_DPF: u16 = 0x0421;
    pub const MS_AVAILABILITY_STATUS: u16 = 0x0422;
    pub const NETWORK_ERROR_CODE: u16 = 0x0423;
    pub const MESSAGE_PAYLOAD: u16 = 0x0424;
    pub const DELIVERY_FAILURE_REASON: u16 = 0x0425;
    pub const MORE_MESSAGES_TO_SEND: u16 = 0x0426;
    pub const MESSAGE_STATE: u16 = 0x0427;
    pub const CONGESTION_STATE: u16 = 0x0428;
    pub const USSD_SERVICE_OP: u16 = 0x0501;
    pub const BROADCAST_CHANNEL_INDICATOR: u16 = 0x0600;
    pub const BROADCAST_CONTENT_TYPE: u16 = 0x0601;
    pub const BROADCAST_MESSAGE_CLASS: u16 = 0x0603;
    pub const BROADCAST_REP_NUM: u16 = 0x0604;
    pub const BROADCAST_FREQUENCY_INTERVAL: u16 = 0x0605;
    pub const BROADCAST_AREA_IDENTIFIER: u16 = 0x0606;
    pub const BROADCAST_END_TIME: u16 = 0x0609;
}

/// One optional parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Encoded size: tag + length + value.
    pub fn wire_len(&self) -> usize {
        4 + self.value.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.tag);
        buf.put_u16(self.value.len() as u16);
        buf.extend_from_slice(&self.value);
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < 4 {
            return Err(CodecError::InvalidTlv(
                "truncated tag/length".to_string(),
            ));
        }
        let tag = buf.get_u16();
        let length = buf.get_u16() as usize;
        if buf.remaining() < length {
            return Err(CodecError::InvalidTlv(format!(
                "tag {:#06x} declares {} value octets, {} remain in frame",
                tag,
                length,
                buf.remaining()
            )));
        }
        let value = buf.copy_to_bytes(length);
        Ok(Self { tag, value })
    }
}

/// Ordered set of TLVs, unique by tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlvMap {
    entries: Vec<Tlv>,
}

impl TlvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a TLV, replacing any existing entry with the same tag.
    pub fn insert(&mut self, tlv: Tlv) {
        if let Some(existing) = self.entries.iter_mut().find(|t| t.tag == tlv.tag) {
            *existing = tlv;
        } else {
            self.entries.push(tlv);
        }
    }

    pub fn get(&self, tag: u16) -> Option<&Tlv> {
        self.entries.iter().find(|t| t.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.entries.iter()
    }

    /// Total encoded size of all entries.
    pub fn wire_len(&self) -> usize {
        self.entries.iter().map(Tlv::wire_len).sum()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for tlv in &self.entries {
            tlv.encode(buf);
        }
    }

    /// Consume every remaining octet of the frame as TLVs.
    pub fn decode_rest(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let mut map = TlvMap::new();
        while buf.has_remaining() {
            let tlv = Tlv::decode(buf)?;
            if map.get(tlv.tag).is_some() {
                return Err(CodecError::DuplicateTlv(tlv.tag));
            }
            map.entries.push(tlv);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_roundtrip_preserves_order() {
        let mut map = TlvMap::new();
        map.insert(Tlv::new(tags::SAR_MSG_REF_NUM, vec![0x00, 0x2A]));
        map.insert(Tlv::new(tags::SAR_TOTAL_SEGMENTS, vec![0x03]));
        map.insert(Tlv::new(tags::SAR_SEGMENT_SEQNUM, vec![0x01]));

        let mut buf = BytesMut::new();
        map.encode(&mut buf);
        assert_eq!(buf.len(), map.wire_len());

        let mut cursor = Cursor::new(buf.as_ref());
        let decoded = TlvMap::decode_rest(&mut cursor).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut buf = BytesMut::new();
        Tlv::new(tags::SOURCE_PORT, vec![0x1F, 0x40]).encode(&mut buf);
        Tlv::new(tags::SOURCE_PORT, vec![0x1F, 0x41]).encode(&mut buf);

        let mut cursor = Cursor::new(buf.as_ref());
        match TlvMap::decode_rest(&mut cursor) {
            Err(CodecError::DuplicateTlv(tag)) => assert_eq!(tag, tags::SOURCE_PORT),
            other => panic!("expected DuplicateTlv, got {:?}", other),
        }
    }

    #[test]
    fn declared_length_past_frame_end_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(tags::MESSAGE_PAYLOAD);
        buf.put_u16(10);
        buf.extend_from_slice(&[0xAB; 4]);

        let mut cursor = Cursor::new(buf.as_ref());
        assert!(matches!(
            TlvMap::decode_rest(&mut cursor),
            Err(CodecError::InvalidTlv(_))
        ));
    }

    #[test]
    fn insert_replaces_same_tag() {
        let mut map = TlvMap::new();
        map.insert(Tlv::new(tags::MESSAGE_STATE, vec![0x01]));
        map.insert(Tlv::new(tags::MESSAGE_STATE, vec![0x02]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(tags::MESSAGE_STATE).unwrap().value.as_ref(), &[0x02]);
    }
}
