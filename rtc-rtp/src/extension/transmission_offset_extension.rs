use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};

pub const TRANSMISSION_OFFSET_EXTENSION_SIZE: usize = 3;
/// Range of a 24-bit signed offset.
pub const MAX_TRANSMISSION_OFFSET: i32 = 0x7F_FFFF;
pub const MIN_TRANSMISSION_OFFSET: i32 = -MAX_TRANSMISSION_OFFSET - 1;
/// RTP ticks per millisecond at the 90 kHz clock the offset is expressed in.
pub const TRANSMISSION_OFFSET_TICKS_PER_MS: i64 = 90;

/// TransmissionOffsetExtension carries the time between capture and send
/// in RTP timestamp units, see <https://tools.ietf.org/html/rfc5450>
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  ID   | len=2 |              transmission offset              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct TransmissionOffsetExtension {
    pub transmission_offset: i32,
}

impl TransmissionOffsetExtension {
    /// Offset for a packet captured at `capture_time_ms` and sent at `now_ms`,
    /// clamped to the 24-bit range.
    pub fn from_elapsed(now_ms: i64, capture_time_ms: i64) -> Self {
        let ticks = (now_ms - capture_time_ms) * TRANSMISSION_OFFSET_TICKS_PER_MS;
        TransmissionOffsetExtension {
            transmission_offset: ticks
                .clamp(MIN_TRANSMISSION_OFFSET as i64, MAX_TRANSMISSION_OFFSET as i64)
                as i32,
        }
    }
}

impl Unmarshal for TransmissionOffsetExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < TRANSMISSION_OFFSET_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let b0 = raw_packet.get_u8() as u32;
        let b1 = raw_packet.get_u8() as u32;
        let b2 = raw_packet.get_u8() as u32;
        let raw = (b0 << 16) | (b1 << 8) | b2;

        // sign extend from 24 bits
        let transmission_offset = ((raw << 8) as i32) >> 8;
        Ok(TransmissionOffsetExtension {
            transmission_offset,
        })
    }
}

impl MarshalSize for TransmissionOffsetExtension {
    fn marshal_size(&self) -> usize {
        TRANSMISSION_OFFSET_EXTENSION_SIZE
    }
}

impl Marshal for TransmissionOffsetExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < TRANSMISSION_OFFSET_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let range = MIN_TRANSMISSION_OFFSET..=MAX_TRANSMISSION_OFFSET;
        if !range.contains(&self.transmission_offset) {
            return Err(Error::ErrTransmissionTimeOffsetOutOfRange(
                self.transmission_offset,
            ));
        }

        let raw = self.transmission_offset as u32 & 0x00FF_FFFF;
        buf.put_u8((raw >> 16) as u8);
        buf.put_u8((raw >> 8) as u8);
        buf.put_u8(raw as u8);
        Ok(TRANSMISSION_OFFSET_EXTENSION_SIZE)
    }
}
