use super::{FrameInfo, Payloader};
use bytes::{BufMut, Bytes, BytesMut};
use shared::error::Result;

pub const GENERIC_HEADER_LENGTH: usize = 1;
pub const GENERIC_KEY_FRAME_BIT: u8 = 0x01;
pub const GENERIC_FIRST_PACKET_BIT: u8 = 0x02;

/// Codec-agnostic video payloader.
///
/// Each payload starts with a one-byte header flagging key frames and the
/// first packet of a frame. The frame is split into packets of equal size
/// (the last one may be shorter) so that no single packet is much smaller
/// than the others.
#[derive(Default, Debug, Copy, Clone)]
pub struct GenericPayloader;

impl Payloader for GenericPayloader {
    fn payload(&mut self, mtu: usize, frame: &Bytes, info: &FrameInfo<'_>) -> Result<Vec<Bytes>> {
        if frame.is_empty() || mtu <= GENERIC_HEADER_LENGTH {
            return Ok(vec![]);
        }

        let max_len = mtu - GENERIC_HEADER_LENGTH;
        let num_packets = frame.len().div_ceil(max_len);
        let chunk_len = frame.len().div_ceil(num_packets);

        let mut payloads = Vec::with_capacity(num_packets);
        for (i, chunk) in frame.chunks(chunk_len).enumerate() {
            let mut header = 0u8;
            if info.key_frame {
                header |= GENERIC_KEY_FRAME_BIT;
            }
            if i == 0 {
                header |= GENERIC_FIRST_PACKET_BIT;
            }

            let mut out = BytesMut::with_capacity(GENERIC_HEADER_LENGTH + chunk.len());
            out.put_u8(header);
            out.put_slice(chunk);
            payloads.push(out.freeze());
        }

        Ok(payloads)
    }
}
