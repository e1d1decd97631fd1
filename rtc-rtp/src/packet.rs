use crate::header::*;
use bytes::{Buf, BufMut, Bytes};
use shared::{
    error::{Error, Result},
    marshal::{Marshal, MarshalSize, Unmarshal},
};
use std::fmt;

/// Packet represents an RTP Packet
///
/// `padding_size` counts the RTP padding bytes that follow the payload,
/// including the final count byte. When it is non-zero the header's padding
/// bit is written regardless of `header.padding`.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    pub padding_size: u8,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "RTP PACKET:\n".to_string();

        out += format!("\tVersion: {}\n", self.header.version).as_str();
        out += format!("\tMarker: {}\n", self.header.marker).as_str();
        out += format!("\tPayload Type: {}\n", self.header.payload_type).as_str();
        out += format!("\tSequence Number: {}\n", self.header.sequence_number).as_str();
        out += format!("\tTimestamp: {}\n", self.header.timestamp).as_str();
        out += format!("\tSSRC: {} ({:x})\n", self.header.ssrc, self.header.ssrc).as_str();
        out += format!("\tPayload Length: {}\n", self.payload.len()).as_str();
        out += format!("\tPadding Length: {}\n", self.padding_size).as_str();

        write!(f, "{out}")
    }
}

impl Unmarshal for Packet {
    /// Unmarshal parses the passed byte slice and stores the result in the Header this method is called upon
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let header = Header::unmarshal(raw_packet)?;
        let payload_len = raw_packet.remaining();
        let (payload, padding_size) = if header.padding {
            if payload_len == 0 {
                return Err(Error::ErrTooShortRtp);
            }
            let mut payload = raw_packet.copy_to_bytes(payload_len);
            let padding_size = payload[payload_len - 1] as usize;
            if padding_size == 0 || padding_size > payload_len {
                return Err(Error::WrongPadding);
            }
            payload.truncate(payload_len - padding_size);
            (payload, padding_size as u8)
        } else {
            (raw_packet.copy_to_bytes(payload_len), 0)
        };

        Ok(Packet {
            header,
            payload,
            padding_size,
        })
    }
}

impl MarshalSize for Packet {
    /// MarshalSize returns the size of the packet once marshaled.
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len() + self.padding_size as usize
    }
}

impl Marshal for Packet {
    /// MarshalTo serializes the packet and writes to the buffer.
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::ErrBufferTooSmall);
        }

        let n = self.header.marshal_to(buf)?;
        if self.padding_size > 0 {
            buf[0] |= 1 << PADDING_SHIFT;
        }
        buf = &mut buf[n..];
        buf.put(&*self.payload);

        if self.padding_size > 0 {
            buf.put_bytes(0, self.padding_size as usize - 1);
            buf.put_u8(self.padding_size);
        }

        Ok(self.marshal_size())
    }
}

impl Packet {
    /// Length of the header on the wire, CSRCs and extension block included.
    pub fn header_length(&self) -> usize {
        self.header.marshal_size()
    }
}
