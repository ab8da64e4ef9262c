//! SMPP PDU codec.
//!
//! Wire format per SMPP v3.4 (with the v5.0 broadcast operations): every
//! PDU is a 16-octet big-endian header followed by a positional body and an
//! optional run of TLV parameters. The body codecs here are purely
//! functional over byte buffers; framing against a socket lives in
//! [`codec::SmppCodec`].

mod alert;
mod bind;
mod broadcast;
pub mod codec;
mod command;
mod data;
mod header;
mod message;
mod outbind;
pub mod query;
mod status;
pub mod tlv;
mod udh;

use std::io::Cursor;

use bytes::BytesMut;

pub use alert::AlertNotification;
pub use bind::{BindFields, BindRespFields};
pub use broadcast::{BroadcastSm, CancelBroadcastSm, QueryBroadcastSm};
pub use codec::{CodecError, FrameError, PduEvent, PduFrame, SmppCodec, MAX_PDU_SIZE};
pub use command::CommandId;
pub use data::DataSm;
pub use header::Header;
pub use message::{CancelSm, ReplaceSm, SmFields, SmRespFields};
pub use outbind::Outbind;
pub use query::{QuerySm, QuerySmResp};
pub use status::Status;
pub use tlv::{Tlv, TlvMap};
pub use udh::apply_concat_udh;

/// Interface version octets carried in bind PDUs.
pub const IF_VERSION_33: u8 = 0x33;
pub const IF_VERSION_34: u8 = 0x34;
pub const IF_VERSION_50: u8 = 0x50;

/// One SMPP PDU body, keyed by command id.
///
/// Closed catalogue: every request variant has a matching response whose
/// command id sets the high bit and whose sequence number echoes the
/// request's.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    GenericNack,
    BindReceiver(BindFields),
    BindReceiverResp(BindRespFields),
    BindTransmitter(BindFields),
    BindTransmitterResp(BindRespFields),
    BindTransceiver(BindFields),
    BindTransceiverResp(BindRespFields),
    Outbind(Outbind),
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    SubmitSm(Box<SmFields>),
    SubmitSmResp(SmRespFields),
    DeliverSm(Box<SmFields>),
    DeliverSmResp(SmRespFields),
    DataSm(DataSm),
    DataSmResp(SmRespFields),
    QuerySm(QuerySm),
    QuerySmResp(QuerySmResp),
    CancelSm(CancelSm),
    CancelSmResp,
    ReplaceSm(Box<ReplaceSm>),
    ReplaceSmResp,
    AlertNotification(AlertNotification),
    BroadcastSm(Box<BroadcastSm>),
    BroadcastSmResp(SmRespFields),
    QueryBroadcastSm(QueryBroadcastSm),
    QueryBroadcastSmResp(SmRespFields),
    CancelBroadcastSm(CancelBroadcastSm),
    CancelBroadcastSmResp,
}

impl Pdu {
    /// The command id this body encodes under.
    pub fn command_id(&self) -> CommandId {
        match self {
            Pdu::GenericNack => CommandId::GenericNack,
            Pdu::BindReceiver(_) => CommandId::BindReceiver,
            Pdu::BindReceiverResp(_) => CommandId::BindReceiverResp,
            Pdu::BindTransmitter(_) => CommandId::BindTransmitter,
            Pdu::BindTransmitterResp(_) => CommandId::BindTransmitterResp,
            Pdu::BindTransceiver(_) => CommandId::BindTransceiver,
            Pdu::BindTransceiverResp(_) => CommandId::BindTransceiverResp,
            Pdu::Outbind(_) => CommandId::Outbind,
            Pdu::Unbind => CommandId::Unbind,
            Pdu::UnbindResp => CommandId::UnbindResp,
            Pdu::EnquireLink => CommandId::EnquireLink,
            Pdu::EnquireLinkResp => CommandId::EnquireLinkResp,
            Pdu::SubmitSm(_) => CommandId::SubmitSm,
            Pdu::SubmitSmResp(_) => CommandId::SubmitSmResp,
            Pdu::DeliverSm(_) => CommandId::DeliverSm,
            Pdu::DeliverSmResp(_) => CommandId::DeliverSmResp,
            Pdu::DataSm(_) => CommandId::DataSm,
            Pdu::DataSmResp(_) => CommandId::DataSmResp,
            Pdu::QuerySm(_) => CommandId::QuerySm,
            Pdu::QuerySmResp(_) => CommandId::QuerySmResp,
            Pdu::CancelSm(_) => CommandId::CancelSm,
            Pdu::CancelSmResp => CommandId::CancelSmResp,
            Pdu::ReplaceSm(_) => CommandId::ReplaceSm,
            Pdu::ReplaceSmResp => CommandId::ReplaceSmResp,
            Pdu::AlertNotification(_) => CommandId::AlertNotification,
            Pdu::BroadcastSm(_) => CommandId::BroadcastSm,
            Pdu::BroadcastSmResp(_) => CommandId::BroadcastSmResp,
            Pdu::QueryBroadcastSm(_) => CommandId::QueryBroadcastSm,
            Pdu::QueryBroadcastSmResp(_) => CommandId::QueryBroadcastSmResp,
            Pdu::CancelBroadcastSm(_) => CommandId::CancelBroadcastSm,
            Pdu::CancelBroadcastSmResp => CommandId::CancelBroadcastSmResp,
        }
    }

    /// Decode a body of the given command from `buf`.
    ///
    /// The cursor must span exactly the body octets (`command_length - 16`);
    /// callers verify that every octet was consumed.
    pub fn decode(command: CommandId, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let pdu = match command {
            CommandId::GenericNack => Pdu::GenericNack,
            CommandId::BindReceiver => Pdu::BindReceiver(BindFields::decode(buf)?),
            CommandId::BindReceiverResp => Pdu::BindReceiverResp(BindRespFields::decode(buf)?),
            CommandId::BindTransmitter => Pdu::BindTransmitter(BindFields::decode(buf)?),
            CommandId::BindTransmitterResp => {
                Pdu::BindTransmitterResp(BindRespFields::decode(buf)?)
            }
            CommandId::BindTransceiver => Pdu::BindTransceiver(BindFields::decode(buf)?),
            CommandId::BindTransceiverResp => {
                Pdu::BindTransceiverResp(BindRespFields::decode(buf)?)
            }
            CommandId::Outbind => Pdu::Outbind(Outbind::decode(buf)?),
            CommandId::Unbind => Pdu::Unbind,
            CommandId::UnbindResp => Pdu::UnbindResp,
            CommandId::EnquireLink => Pdu::EnquireLink,
            CommandId::EnquireLinkResp => Pdu::EnquireLinkResp,
            CommandId::SubmitSm => Pdu::SubmitSm(Box::new(SmFields::decode(buf)?)),
            CommandId::SubmitSmResp => Pdu::SubmitSmResp(SmRespFields::decode(buf)?),
            CommandId::DeliverSm => Pdu::DeliverSm(Box::new(SmFields::decode(buf)?)),
            CommandId::DeliverSmResp => Pdu::DeliverSmResp(SmRespFields::decode(buf)?),
            CommandId::DataSm => Pdu::DataSm(DataSm::decode(buf)?),
            CommandId::DataSmResp => Pdu::DataSmResp(SmRespFields::decode(buf)?),
            CommandId::QuerySm => Pdu::QuerySm(QuerySm::decode(buf)?),
            CommandId::QuerySmResp => Pdu::QuerySmResp(QuerySmResp::decode(buf)?),
            CommandId::CancelSm => Pdu::CancelSm(CancelSm::decode(buf)?),
            CommandId::CancelSmResp => Pdu::CancelSmResp,
            CommandId::ReplaceSm => Pdu::ReplaceSm(Box::new(ReplaceSm::decode(buf)?)),
            CommandId::ReplaceSmResp => Pdu::ReplaceSmResp,
            CommandId::AlertNotification => Pdu::AlertNotification(AlertNotification::decode(buf)?),
            CommandId::BroadcastSm => Pdu::BroadcastSm(Box::new(BroadcastSm::decode(buf)?)),
            CommandId::BroadcastSmResp => Pdu::BroadcastSmResp(SmRespFields::decode(buf)?),
            CommandId::QueryBroadcastSm => Pdu::QueryBroadcastSm(QueryBroadcastSm::decode(buf)?),
            CommandId::QueryBroadcastSmResp => {
                Pdu::QueryBroadcastSmResp(SmRespFields::decode(buf)?)
            }
            CommandId::CancelBroadcastSm => Pdu::CancelBroadcastSm(CancelBroadcastSm::decode(buf)?),
            CommandId::CancelBroadcastSmResp => Pdu::CancelBroadcastSmResp,
        };
        Ok(pdu)
    }

    /// Encode the body octets (everything after the header) into `buf`.
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        match self {
            Pdu::GenericNack
            | Pdu::Unbind
            | Pdu::UnbindResp
            | Pdu::EnquireLink
            | Pdu::EnquireLinkResp
            | Pdu::CancelSmResp
            | Pdu::ReplaceSmResp
            | Pdu::CancelBroadcastSmResp => Ok(()),
            Pdu::BindReceiver(b) | Pdu::BindTransmitter(b) | Pdu::BindTransceiver(b) => {
                b.encode(buf)
            }
            Pdu::BindReceiverResp(r) | Pdu::BindTransmitterResp(r) | Pdu::BindTransceiverResp(r) => {
                r.encode(buf)
            }
            Pdu::Outbind(o) => o.encode(buf),
            Pdu::SubmitSm(m) | Pdu::DeliverSm(m) => m.encode(buf),
            Pdu::SubmitSmResp(r)
            | Pdu::DeliverSmResp(r)
            | Pdu::DataSmResp(r)
            | Pdu::BroadcastSmResp(r)
            | Pdu::QueryBroadcastSmResp(r) => r.encode(buf),
            Pdu::DataSm(d) => d.encode(buf),
            Pdu::QuerySm(q) => q.encode(buf),
            Pdu::QuerySmResp(q) => q.encode(buf),
            Pdu::CancelSm(c) => c.encode(buf),
            Pdu::ReplaceSm(r) => r.encode(buf),
            Pdu::AlertNotification(a) => a.encode(buf),
            Pdu::BroadcastSm(b) => b.encode(buf),
            Pdu::QueryBroadcastSm(q) => q.encode(buf),
            Pdu::CancelBroadcastSm(c) => c.encode(buf),
        }
    }

    /// Whether this is a response PDU.
    pub fn is_response(&self) -> bool {
        self.command_id().is_response()
    }
}
