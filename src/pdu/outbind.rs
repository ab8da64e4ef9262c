//! outbind body: the SMSC-initiated request for the peer to bind back.

use std::io::Cursor;

use bytes::BytesMut;

use super::bind::{MAX_PASSWORD, MAX_SYSTEM_ID};
use super::codec::{get_cstring, put_cstring, CodecError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbind {
    pub system_id: String,
    pub password: String,
}

impl Outbind {
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Self {
            system_id: get_cstring(buf, MAX_SYSTEM_ID, "system_id")?,
            password: get_cstring(buf, MAX_PASSWORD, "password")?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        put_cstring(buf, &self.system_id, MAX_SYSTEM_ID, "system_id")?;
        put_cstring(buf, &self.password, MAX_PASSWORD, "password")?;
        Ok(())
    }
}
