//! SMPP command identifiers.

use std::fmt;

/// SMPP command identifiers (v3.4 table 4-1 plus the v5.0 broadcast set).
///
/// Bit 31 is the response indicator; bits 30..0 identify the operation.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    GenericNack = 0x8000_0000,
    BindReceiver = 0x0000_0001,
    BindReceiverResp = 0x8000_0001,
    BindTransmitter = 0x0000_0002,
    BindTransmitterResp = 0x8000_0002,
    QuerySm = 0x0000_0003,
    QuerySmResp = 0x8000_0003,
    SubmitSm = 0x0000_0004,
    SubmitSmResp = 0x8000_0004,
    DeliverSm = 0x0000_0005,
    DeliverSmResp = 0x8000_0005,
    Unbind = 0x0000_0006,
    UnbindResp = 0x8000_0006,
    ReplaceSm = 0x0000_0007,
    ReplaceSmResp = 0x8000_0007,
    CancelSm = 0x0000_0008,
    CancelSmResp = 0x8000_0008,
    BindTransceiver = 0x0000_0009,
    BindTransceiverResp = 0x8000_0009,
    Outbind = 0x0000_000B,
    EnquireLink = 0x0000_0015,
    EnquireLinkResp = 0x8000_0015,
    AlertNotification = 0x0000_0102,
    DataSm = 0x0000_0103,
    DataSmResp = 0x8000_0103,
    BroadcastSm = 0x0000_0111,
    BroadcastSmResp = 0x8000_0111,
    QueryBroadcastSm = 0x0000_0112,
    QueryBroadcastSmResp = 0x8000_0112,
    CancelBroadcastSm = 0x0000_0113,
    CancelBroadcastSmResp = 0x8000_0113,
}

impl CommandId {
    /// Map a raw command id to the catalogue. Returns the raw value back on
    /// an unknown id so callers can nack with it.
    pub fn from_u32(value: u32) -> Result<Self, u32> {
        let id = match value {
            0x8000_0000 => CommandId::GenericNack,
            0x0000_0001 => CommandId::BindReceiver,
            0x8000_0001 => CommandId::BindReceiverResp,
            0x0000_0002 => CommandId::BindTransmitter,
            0x8000_0002 => CommandId::BindTransmitterResp,
            0x0000_0003 => CommandId::QuerySm,
            0x8000_0003 => CommandId::QuerySmResp,
            0x0000_0004 => CommandId::SubmitSm,
            0x8000_0004 => CommandId::SubmitSmResp,
            0x0000_0005 => CommandId::DeliverSm,
            0x8000_0005 => CommandId::DeliverSmResp,
            0x0000_0006 => CommandId::Unbind,
            0x8000_0006 => CommandId::UnbindResp,
            0x0000_0007 => CommandId::ReplaceSm,
            0x8000_0007 => CommandId::ReplaceSmResp,
            0x0000_0008 => CommandId::CancelSm,
            0x8000_0008 => CommandId::CancelSmResp,
            0x0000_0009 => CommandId::BindTransceiver,
            0x8000_0009 => CommandId::BindTransceiverResp,
            0x0000_000B => CommandId::Outbind,
            0x0000_0015 => CommandId::EnquireLink,
            0x8000_0015 => CommandId::EnquireLinkResp,
            0x0000_0102 => CommandId::AlertNotification,
            0x0000_0103 => CommandId::DataSm,
            0x8000_0103 => CommandId::DataSmResp,
            0x0000_0111 => CommandId::BroadcastSm,
            0x8000_0111 => CommandId::BroadcastSmResp,
            0x0000_0112 => CommandId::QueryBroadcastSm,
            0x8000_0112 => CommandId::QueryBroadcastSmResp,
            0x0000_0113 => CommandId::CancelBroadcastSm,
            0x8000_0113 => CommandId::CancelBroadcastSmResp,
            other => return Err(other),
        };
        Ok(id)
    }

    /// Response indicator bit.
    pub fn is_response(self) -> bool {
        (self as u32) & 0x8000_0000 != 0
    }

    /// The response command id paired with this request.
    ///
    /// `generic_nack` and outbind have no positive-direction pairing and
    /// return `None`, as do response ids themselves.
    pub fn response_id(self) -> Option<CommandId> {
        if self.is_response() {
            return None;
        }
        match self {
            CommandId::BindReceiver => Some(CommandId::BindReceiverResp),
            CommandId::BindTransmitter => Some(CommandId::BindTransmitterResp),
            CommandId::BindTransceiver => Some(CommandId::BindTransceiverResp),
            CommandId::QuerySm => Some(CommandId::QuerySmResp),
            CommandId::SubmitSm => Some(CommandId::SubmitSmResp),
            CommandId::DeliverSm => Some(CommandId::DeliverSmResp),
            CommandId::Unbind => Some(CommandId::UnbindResp),
            CommandId::ReplaceSm => Some(CommandId::ReplaceSmResp),
            CommandId::CancelSm => Some(CommandId::CancelSmResp),
            CommandId::EnquireLink => Some(CommandId::EnquireLinkResp),
            CommandId::DataSm => Some(CommandId::DataSmResp),
            CommandId::BroadcastSm => Some(CommandId::BroadcastSmResp),
            CommandId::QueryBroadcastSm => Some(CommandId::QueryBroadcastSmResp),
            CommandId::CancelBroadcastSm => Some(CommandId::CancelBroadcastSmResp),
            _ => None,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
