//! Outgoing RTP packet with sender-side metadata.

use bytes::Bytes;
use rtp::header::Header;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize};

/// What an outgoing packet carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Audio,
    Video,
    /// ULPFEC inside RED.
    Fec,
    Padding,
    /// RFC 4588 retransmission, including payload padding sent over RTX.
    Rtx,
}

impl PacketKind {
    pub fn is_media(&self) -> bool {
        matches!(self, PacketKind::Audio | PacketKind::Video)
    }
}

/// An RTP packet on its way to the network.
///
/// The packet is bounded by `max_size` from the moment it is created:
/// setting a payload or padding that would push the wire size past it fails
/// with [`Error::ErrPacketTooBig`] and leaves the packet untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacketToSend {
    packet: rtp::Packet,
    capture_time_ms: i64,
    kind: PacketKind,
    max_size: usize,
}

impl RtpPacketToSend {
    pub fn new(header: Header, kind: PacketKind, capture_time_ms: i64, max_size: usize) -> Self {
        Self {
            packet: rtp::Packet {
                header,
                payload: Bytes::new(),
                padding_size: 0,
            },
            capture_time_ms,
            kind,
            max_size,
        }
    }

    pub fn set_payload(&mut self, payload: Bytes) -> Result<()> {
        let size = self.header_length() + payload.len() + self.packet.padding_size as usize;
        if size > self.max_size {
            return Err(Error::ErrPacketTooBig);
        }
        self.packet.payload = payload;
        Ok(())
    }

    /// Sets RTP padding; the last padding byte carries the count.
    pub fn set_padding(&mut self, padding_size: u8) -> Result<()> {
        let size = self.header_length() + self.packet.payload.len() + padding_size as usize;
        if size > self.max_size {
            return Err(Error::ErrPacketTooBig);
        }
        self.packet.padding_size = padding_size;
        self.packet.header.padding = padding_size > 0;
        Ok(())
    }

    /// Writes a header extension element. Extension elements have a fixed
    /// size per id, so this never changes the header length of a packet
    /// built from the same extension registry.
    pub fn set_extension<E: Marshal>(&mut self, id: u8, extension: &E) -> Result<()> {
        let payload = extension.marshal()?;
        self.packet.header.set_extension(id, payload)
    }

    pub fn get_extension(&self, id: u8) -> Option<Bytes> {
        self.packet.header.get_extension(id)
    }

    /// Drops the payload, keeping only the header.
    pub fn strip_payload(&mut self) {
        self.packet.payload = Bytes::new();
        self.packet.padding_size = 0;
        self.packet.header.padding = false;
    }

    pub fn header(&self) -> &Header {
        &self.packet.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.packet.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    pub fn padding_size(&self) -> u8 {
        self.packet.padding_size
    }

    pub fn sequence_number(&self) -> u16 {
        self.packet.header.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.packet.header.sequence_number = sequence_number;
    }

    pub fn ssrc(&self) -> u32 {
        self.packet.header.ssrc
    }

    pub fn timestamp(&self) -> u32 {
        self.packet.header.timestamp
    }

    pub fn payload_type(&self) -> u8 {
        self.packet.header.payload_type
    }

    pub fn marker(&self) -> bool {
        self.packet.header.marker
    }

    pub fn capture_time_ms(&self) -> i64 {
        self.capture_time_ms
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn header_length(&self) -> usize {
        self.packet.header.marshal_size()
    }

    /// Wire size, header and padding included.
    pub fn size(&self) -> usize {
        self.packet.marshal_size()
    }

    pub fn packet(&self) -> &rtp::Packet {
        &self.packet
    }

    pub fn marshal(&self) -> Result<Bytes> {
        self.packet.marshal()
    }
}
