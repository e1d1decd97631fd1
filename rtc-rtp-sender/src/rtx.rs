//! RFC 4588 retransmission stream.

use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use rtp::sequence::SequenceSpace;
use serde::{Deserialize, Serialize};
use shared::error::Result;
use std::collections::HashMap;

/// Original sequence number prefix of an RTX payload.
pub const RTX_HEADER_LENGTH: usize = 2;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RtxMode {
    #[default]
    Off,
    /// NACKed packets are resent on the RTX stream.
    Retransmitted,
    /// As `Retransmitted`, and padding is made of earlier media packets
    /// resent on the RTX stream.
    RetransmittedAndRedundant,
}

/// RTX stream state: SSRC, sequence numbers and the media to RTX payload
/// type mapping.
#[derive(Debug, Clone)]
pub struct RtxState {
    mode: RtxMode,
    ssrc: Option<u32>,
    sequence: SequenceSpace,
    payload_types: HashMap<u8, u8>,
}

impl Default for RtxState {
    fn default() -> Self {
        Self::new()
    }
}

impl RtxState {
    pub fn new() -> Self {
        Self {
            mode: RtxMode::Off,
            ssrc: None,
            sequence: SequenceSpace::new_random(),
            payload_types: HashMap::new(),
        }
    }

    pub fn set_mode(&mut self, mode: RtxMode) {
        debug!("rtx mode {mode:?}");
        self.mode = mode;
    }

    pub fn mode(&self) -> RtxMode {
        self.mode
    }

    /// Resends go over RTX only once an SSRC is set.
    pub fn is_enabled(&self) -> bool {
        self.mode != RtxMode::Off && self.ssrc.is_some()
    }

    pub fn redundant_payloads(&self) -> bool {
        self.mode == RtxMode::RetransmittedAndRedundant && self.ssrc.is_some()
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = Some(ssrc);
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc
    }

    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.sequence.set(sequence_number);
    }

    /// Next RTX sequence number, not yet used.
    pub fn sequence_number(&self) -> u16 {
        self.sequence.peek()
    }

    pub fn next_sequence_number(&mut self) -> u16 {
        self.sequence.next_sequence_number()
    }

    /// Maps `media_payload_type` to `rtx_payload_type`, replacing any earlier
    /// mapping of either side.
    pub fn set_payload_type(&mut self, media_payload_type: u8, rtx_payload_type: u8) {
        self.payload_types
            .retain(|media, rtx| *media != media_payload_type && *rtx != rtx_payload_type);
        self.payload_types
            .insert(media_payload_type, rtx_payload_type);
    }

    pub fn rtx_payload_type(&self, media_payload_type: u8) -> Option<u8> {
        self.payload_types.get(&media_payload_type).copied()
    }

    pub fn media_payload_type(&self, rtx_payload_type: u8) -> Option<u8> {
        self.payload_types
            .iter()
            .find(|(_, rtx)| **rtx == rtx_payload_type)
            .map(|(media, _)| *media)
    }

    /// RTX payload type for padding: the peer of `media_payload_type` if
    /// mapped, else the lowest configured RTX payload type.
    pub fn padding_payload_type(&self, media_payload_type: Option<u8>) -> Option<u8> {
        media_payload_type
            .and_then(|pt| self.rtx_payload_type(pt))
            .or_else(|| self.payload_types.values().min().copied())
    }

    /// Wraps `original` for the RTX stream and consumes one RTX sequence
    /// number. Returns `None` when RTX is off or has no payload type for the
    /// packet.
    pub fn encapsulate(&mut self, original: &RtpPacketToSend) -> Option<RtpPacketToSend> {
        let ssrc = self.ssrc?;
        let Some(payload_type) = self.rtx_payload_type(original.payload_type()) else {
            warn!(
                "no rtx payload type for media payload type {}, dropping resend of {}",
                original.payload_type(),
                original.sequence_number()
            );
            return None;
        };

        match build_rtx_packet(original, ssrc, self.sequence.peek(), payload_type) {
            Ok(packet) => {
                self.sequence.next_sequence_number();
                Some(packet)
            }
            Err(err) => {
                warn!(
                    "failed to build rtx packet for {}: {err}",
                    original.sequence_number()
                );
                None
            }
        }
    }
}

/// Builds the RTX form of `original`: same header apart from SSRC, sequence
/// number and payload type, payload prefixed with the original sequence
/// number. RTP padding is not carried over.
pub fn build_rtx_packet(
    original: &RtpPacketToSend,
    rtx_ssrc: u32,
    rtx_sequence_number: u16,
    rtx_payload_type: u8,
) -> Result<RtpPacketToSend> {
    let mut header = original.header().clone();
    header.ssrc = rtx_ssrc;
    header.sequence_number = rtx_sequence_number;
    header.payload_type = rtx_payload_type;
    header.padding = false;

    let mut payload = BytesMut::with_capacity(RTX_HEADER_LENGTH + original.payload().len());
    payload.put_u16(original.sequence_number());
    payload.put_slice(original.payload());

    let mut packet = RtpPacketToSend::new(
        header,
        PacketKind::Rtx,
        original.capture_time_ms(),
        original.max_size(),
    );
    packet.set_payload(payload.freeze())?;
    Ok(packet)
}
