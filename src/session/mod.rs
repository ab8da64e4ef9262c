//! Inbound SMPP sessions.

mod connection;
#[allow(clippy::module_inception)]
mod session;

use std::sync::atomic::{AtomicU32, Ordering};

pub use connection::{SessionConn, SessionId, SessionState};
pub use session::{SessionError, SmppSession};

/// Sequence number allocator: 1..=2³¹−1, wrapping back to 1.
///
/// Outstanding requests past a full wrap are the caller's concern.
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU32,
}

pub const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next sequence number.
    pub fn next(&self) -> u32 {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current >= MAX_SEQUENCE { 1 } else { current + 1 })
            })
            .expect("sequence update never fails")
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
