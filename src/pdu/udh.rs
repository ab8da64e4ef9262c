//! User Data Header helper for concatenated messages.

use bytes::{BufMut, BytesMut};

use super::codec::CodecError;
use super::message::{SmFields, MAX_SHORT_MESSAGE};

/// ESM class bit signalling a UDH at the start of short_message.
pub const ESM_UDHI: u8 = 0x40;

/// Information element: concatenated short messages, 16-bit reference.
pub const IE_CONCAT_16BIT: u8 = 0x08;

/// Prepend a 16-bit-reference concatenation UDH to the short message and
/// set the UDHI bit in esm_class.
///
/// The header is seven octets: UDHL (5), IEI, IEDL (4), reference high,
/// reference low, total segments, segment sequence.
pub fn apply_concat_udh(
    sm: &mut SmFields,
    ref_num: u16,
    total: u8,
    seq: u8,
) -> Result<(), CodecError> {
    let mut payload = BytesMut::with_capacity(7 + sm.short_message.len());
    payload.put_u8(5);
    payload.put_u8(IE_CONCAT_16BIT);
    payload.put_u8(4);
    payload.put_u16(ref_num);
    payload.put_u8(total);
    payload.put_u8(seq);
    payload.extend_from_slice(&sm.short_message);

    if payload.len() > MAX_SHORT_MESSAGE {
        return Err(CodecError::InvalidSmLength {
            declared: payload.len(),
            available: MAX_SHORT_MESSAGE,
        });
    }

    sm.short_message = payload.freeze();
    sm.esm_class |= ESM_UDHI;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_udh_is_seven_octets_and_sets_udhi() {
        let mut sm = SmFields {
            short_message: bytes::Bytes::from_static(b"part one"),
            ..Default::default()
        };
        apply_concat_udh(&mut sm, 0x1234, 3, 1).unwrap();

        assert_eq!(sm.esm_class & ESM_UDHI, ESM_UDHI);
        assert_eq!(
            &sm.short_message[..7],
            &[5, IE_CONCAT_16BIT, 4, 0x12, 0x34, 3, 1]
        );
        assert_eq!(&sm.short_message[7..], b"part one");
    }

    #[test]
    fn udh_refuses_to_overflow_the_short_message() {
        let mut sm = SmFields {
            short_message: bytes::Bytes::from(vec![0u8; MAX_SHORT_MESSAGE - 3]),
            ..Default::default()
        };
        assert!(apply_concat_udh(&mut sm, 1, 2, 1).is_err());
    }
}
