//! RFC 5109 ULPFEC generation.
//!
//! Media packets are buffered until a frame (or a batch of frames) ends,
//! then XOR parity packets are built over the rows of a protection mask.
//! The FEC payloads produced here carry no RTP header; the sender puts them
//! in RED packets on the media SSRC.

pub mod mask;
pub mod red;

use crate::packet_to_send::RtpPacketToSend;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};
use rtp::header::FIXED_HEADER_LENGTH;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// FEC header: E, L, recovery fields and SN base.
pub const FEC_HEADER_SIZE: usize = 10;
/// Level 0 header with a 16-bit mask.
pub const ULP_HEADER_SIZE_L_CLEAR: usize = 4;
/// Level 0 header with a 48-bit mask.
pub const ULP_HEADER_SIZE_L_SET: usize = 8;
pub const MASK_BITS_L_CLEAR: usize = 16;
pub const MASK_BITS_L_SET: usize = 48;
/// Media packets one FEC batch can protect.
pub const MAX_MEDIA_PACKETS: usize = MASK_BITS_L_SET;
pub const MAX_FEC_PACKET_OVERHEAD: usize = FEC_HEADER_SIZE + ULP_HEADER_SIZE_L_SET;

const FEC_L_BIT: u8 = 0x40;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FecMaskType {
    /// Independent losses.
    #[default]
    Random,
    /// Runs of consecutive losses.
    Bursty,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FecProtectionParams {
    /// Protection factor, 0 to 255; 255 means one FEC packet per media packet.
    pub fec_rate: u8,
    pub use_uep_protection: bool,
    /// Frames protected together by one batch of FEC packets.
    pub max_fec_frames: u32,
    pub fec_mask_type: FecMaskType,
    /// Leading packets of a batch that get extra protection with UEP.
    pub num_important_packets: usize,
}

impl Default for FecProtectionParams {
    fn default() -> Self {
        Self {
            fec_rate: 0,
            use_uep_protection: false,
            max_fec_frames: 1,
            fec_mask_type: FecMaskType::Random,
            num_important_packets: 0,
        }
    }
}

/// FEC packets generated for `num_media` media packets at `fec_rate`.
pub fn num_fec_packets(num_media: usize, fec_rate: u8) -> usize {
    if num_media == 0 || fec_rate == 0 {
        return 0;
    }
    ((num_media * fec_rate as usize + 128) >> 8).clamp(1, num_media)
}

/// Worst-case bytes a FEC packet adds on top of a media packet with an
/// `rtp_header_length` byte header: FEC and ULP headers, the RED header and
/// the header extensions the FEC packet repeats.
pub fn fec_packet_overhead(rtp_header_length: usize) -> usize {
    MAX_FEC_PACKET_OVERHEAD
        + red::RED_HEADER_LENGTH
        + rtp_header_length.saturating_sub(FIXED_HEADER_LENGTH)
}

#[derive(Debug, Clone)]
struct ProtectedPacket {
    sequence_number: u16,
    first_bytes: [u8; 2],
    timestamp: u32,
    payload: Bytes,
}

impl ProtectedPacket {
    fn new(packet: &RtpPacketToSend) -> Self {
        let header = packet.header();
        let byte0 = (header.version << 6)
            | ((header.padding as u8) << 5)
            | ((header.extension as u8) << 4)
            | (header.csrc.len() as u8 & 0x0F);
        let byte1 = ((header.marker as u8) << 7) | (header.payload_type & 0x7F);
        Self {
            sequence_number: header.sequence_number,
            first_bytes: [byte0, byte1],
            timestamp: header.timestamp,
            payload: packet.payload().clone(),
        }
    }
}

/// Buffers media packets and turns them into ULPFEC payloads.
#[derive(Debug, Default)]
pub struct FecProducer {
    params: FecProtectionParams,
    pending_params: Option<FecProtectionParams>,
    media_packets: Vec<ProtectedPacket>,
    num_frames: u32,
    fec_packets: VecDeque<Bytes>,
}

impl FecProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// New parameters apply at the start of the next batch; a batch already
    /// in progress keeps the ones it started with.
    pub fn set_protection_parameters(&mut self, params: FecProtectionParams) {
        if self.media_packets.is_empty() && self.num_frames == 0 {
            self.params = params;
            self.pending_params = None;
        } else {
            self.pending_params = Some(params);
        }
    }

    pub fn protection_parameters(&self) -> FecProtectionParams {
        self.params
    }

    pub fn num_buffered_media_packets(&self) -> usize {
        self.media_packets.len()
    }

    /// Buffers a media packet. When it ends the last frame of the batch, FEC
    /// packets are generated; returns how many.
    pub fn add_media_packet(&mut self, packet: &RtpPacketToSend) -> usize {
        if self.media_packets.len() < MAX_MEDIA_PACKETS {
            self.media_packets.push(ProtectedPacket::new(packet));
        }
        if !packet.marker() {
            return 0;
        }

        self.num_frames += 1;
        if self.num_frames < self.params.max_fec_frames.max(1) {
            return 0;
        }

        let generated = self.generate();
        self.media_packets.clear();
        self.num_frames = 0;
        if let Some(params) = self.pending_params.take() {
            debug!("fec parameters updated: {params:?}");
            self.params = params;
        }
        generated
    }

    /// FEC payloads generated so far, oldest first.
    pub fn take_fec_packets(&mut self) -> Vec<Bytes> {
        self.fec_packets.drain(..).collect()
    }

    pub fn has_fec_packets(&self) -> bool {
        !self.fec_packets.is_empty()
    }

    fn generate(&mut self) -> usize {
        let Some(sn_base) = self.media_packets.first().map(|p| p.sequence_number) else {
            return 0;
        };
        // media packets beyond the longest mask cannot be referenced
        let protected: Vec<&ProtectedPacket> = self
            .media_packets
            .iter()
            .filter(|p| (p.sequence_number.wrapping_sub(sn_base) as usize) < MASK_BITS_L_SET)
            .collect();

        let num_fec = num_fec_packets(protected.len(), self.params.fec_rate);
        if num_fec == 0 {
            return 0;
        }
        let num_important = if self.params.use_uep_protection {
            self.params.num_important_packets
        } else {
            0
        };
        let masks = mask::generate_masks(
            protected.len(),
            num_fec,
            num_important,
            self.params.use_uep_protection,
            self.params.fec_mask_type,
        );

        let long_mask = protected
            .iter()
            .any(|p| p.sequence_number.wrapping_sub(sn_base) as usize >= MASK_BITS_L_CLEAR);

        for row in &masks {
            let covered: Vec<&ProtectedPacket> = protected
                .iter()
                .enumerate()
                .filter(|(i, _)| row & (1u64 << i) != 0)
                .map(|(_, p)| *p)
                .collect();
            let fec = build_fec_payload(&covered, sn_base, long_mask);
            self.fec_packets.push_back(fec);
        }
        trace!(
            "generated {} fec packets over {} media packets from {sn_base}",
            masks.len(),
            protected.len()
        );
        masks.len()
    }
}

fn build_fec_payload(covered: &[&ProtectedPacket], sn_base: u16, long_mask: bool) -> Bytes {
    let protection_length = covered.iter().map(|p| p.payload.len()).max().unwrap_or(0);

    let mut first_bytes = [0u8; 2];
    let mut timestamp = 0u32;
    let mut length = 0u16;
    let mut parity = vec![0u8; protection_length];
    let mut mask = 0u64;
    for p in covered {
        first_bytes[0] ^= p.first_bytes[0];
        first_bytes[1] ^= p.first_bytes[1];
        timestamp ^= p.timestamp;
        length ^= p.payload.len() as u16;
        for (dst, src) in parity.iter_mut().zip(p.payload.iter()) {
            *dst ^= src;
        }
        let offset = p.sequence_number.wrapping_sub(sn_base) as u64;
        mask |= 1 << (MASK_BITS_L_SET as u64 - 1 - offset);
    }

    let ulp_header_size = if long_mask {
        ULP_HEADER_SIZE_L_SET
    } else {
        ULP_HEADER_SIZE_L_CLEAR
    };
    let mut out = BytesMut::with_capacity(FEC_HEADER_SIZE + ulp_header_size + protection_length);

    //  0                   1                   2                   3
    //  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |E|L|P|X|  CC   |M| PT recovery |            SN base            |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |                          TS recovery                          |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |        length recovery        |       Protection Length       |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    // |             mask              |      mask cont. (L = 1)       |
    // +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    let l_bit = if long_mask { FEC_L_BIT } else { 0 };
    out.put_u8(l_bit | (first_bytes[0] & 0x3F));
    out.put_u8(first_bytes[1]);
    out.put_u16(sn_base);
    out.put_u32(timestamp);
    out.put_u16(length);
    out.put_u16(protection_length as u16);
    if long_mask {
        out.put_u32((mask >> 16) as u32);
        out.put_u16(mask as u16);
    } else {
        out.put_u16((mask >> 32) as u16);
    }
    out.put_slice(&parity);
    out.freeze()
}
