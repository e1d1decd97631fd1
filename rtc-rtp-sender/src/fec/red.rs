//! RFC 2198 redundant audio data (RED) payloads.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|   block PT  |  timestamp offset         |   block length    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0|   block PT  |
//! +-+-+-+-+-+-+-+-+
//! ```

use crate::packet_to_send::RtpPacketToSend;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use shared::error::Result;

/// Header of the last (primary) block.
pub const RED_HEADER_LENGTH: usize = 1;
/// Header of each redundant block.
pub const RED_BLOCK_HEADER_LENGTH: usize = 4;
pub const MAX_RED_BLOCK_LENGTH: usize = 0x3FF;
pub const MAX_RED_TIMESTAMP_OFFSET: u16 = 0x3FFF;

const RED_FOLLOW_BIT: u8 = 0x80;

/// RED payload with a single primary block.
pub fn red_payload(payload_type: u8, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(RED_HEADER_LENGTH + payload.len());
    out.put_u8(payload_type & 0x7F);
    out.put_slice(payload);
    out.freeze()
}

/// RED payload with one redundant block ahead of the primary one. `None` if
/// the redundant block is too long or too old to describe.
pub fn red_payload_with_redundancy(
    primary_payload_type: u8,
    primary: &[u8],
    redundant_payload_type: u8,
    timestamp_offset: u16,
    redundant: &[u8],
) -> Option<Bytes> {
    if redundant.len() > MAX_RED_BLOCK_LENGTH || timestamp_offset > MAX_RED_TIMESTAMP_OFFSET {
        return None;
    }

    let mut out = BytesMut::with_capacity(
        RED_BLOCK_HEADER_LENGTH + RED_HEADER_LENGTH + redundant.len() + primary.len(),
    );
    out.put_u8(RED_FOLLOW_BIT | (redundant_payload_type & 0x7F));
    let offset_and_length = ((timestamp_offset as u32) << 10) | redundant.len() as u32;
    out.put_u8((offset_and_length >> 16) as u8);
    out.put_u16(offset_and_length as u16);
    out.put_u8(primary_payload_type & 0x7F);
    out.put_slice(redundant);
    out.put_slice(primary);
    Some(out.freeze())
}

/// Payload type and data of the primary block of a RED payload.
pub fn primary_block(payload: &Bytes) -> Option<(u8, Bytes)> {
    let mut buf = payload.clone();
    let mut skip = 0usize;
    loop {
        if !buf.has_remaining() {
            return None;
        }
        let b = buf.get_u8();
        if b & RED_FOLLOW_BIT == 0 {
            if buf.remaining() < skip {
                return None;
            }
            buf.advance(skip);
            return Some((b & 0x7F, buf));
        }
        if buf.remaining() < 3 {
            return None;
        }
        let offset_and_length = ((buf.get_u8() as u32) << 16) | buf.get_u16() as u32;
        skip += (offset_and_length & 0x3FF) as usize;
    }
}

/// Moves the payload of `packet` into a RED primary block sent with
/// `red_payload_type`.
pub fn wrap_red(packet: &RtpPacketToSend, red_payload_type: u8) -> Result<RtpPacketToSend> {
    let mut header = packet.header().clone();
    let payload = red_payload(header.payload_type, packet.payload());
    header.payload_type = red_payload_type;

    let mut red = RtpPacketToSend::new(
        header,
        packet.kind(),
        packet.capture_time_ms(),
        packet.max_size(),
    );
    red.set_payload(payload)?;
    Ok(red)
}
