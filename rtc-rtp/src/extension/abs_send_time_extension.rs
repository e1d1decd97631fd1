use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};

pub const ABS_SEND_TIME_EXTENSION_SIZE: usize = 3;

/// AbsSendTimeExtension is a extension payload format in
/// <http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time>
///
/// The value is a 6.18 fixed point number of seconds, wrapping every 64 s.
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct AbsSendTimeExtension {
    pub timestamp: u32,
}

impl AbsSendTimeExtension {
    /// Encodes a millisecond send time, rounded to the nearest 1/2^18 s.
    pub fn from_millis(now_ms: i64) -> Self {
        let now_ms = now_ms.max(0) as u64;
        AbsSendTimeExtension {
            timestamp: ((((now_ms << 18) + 500) / 1000) & 0x00FF_FFFF) as u32,
        }
    }
}

impl Unmarshal for AbsSendTimeExtension {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if raw_packet.remaining() < ABS_SEND_TIME_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }
        let b0 = raw_packet.get_u8();
        let b1 = raw_packet.get_u8();
        let b2 = raw_packet.get_u8();
        let timestamp = ((b0 as u32) << 16) | ((b1 as u32) << 8) | b2 as u32;

        Ok(AbsSendTimeExtension { timestamp })
    }
}

impl MarshalSize for AbsSendTimeExtension {
    fn marshal_size(&self) -> usize {
        ABS_SEND_TIME_EXTENSION_SIZE
    }
}

impl Marshal for AbsSendTimeExtension {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < ABS_SEND_TIME_EXTENSION_SIZE {
            return Err(Error::ErrBufferTooSmall);
        }

        buf.put_u8(((self.timestamp >> 16) & 0xFF) as u8);
        buf.put_u8(((self.timestamp >> 8) & 0xFF) as u8);
        buf.put_u8((self.timestamp & 0xFF) as u8);

        Ok(ABS_SEND_TIME_EXTENSION_SIZE)
    }
}
