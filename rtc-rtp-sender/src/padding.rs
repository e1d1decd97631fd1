use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use rtp::header::Header;
use shared::error::Result;

/// Padding bytes carried by one padding packet.
pub const MAX_PADDING_LENGTH: usize = 224;
/// Padding packets hold a multiple of this many padding bytes.
pub const PADDING_MODULUS: usize = 32;
/// Requests below this are not worth a packet.
pub const MIN_PADDING_BYTES: usize = 32;

/// Padding bytes to put in each packet, given the room left for payload.
/// `None` if not even the smallest padding fits.
pub fn padding_length(max_data_payload_length: usize) -> Option<usize> {
    let length = max_data_payload_length.min(MAX_PADDING_LENGTH);
    let length = length - length % PADDING_MODULUS;
    (length >= MIN_PADDING_BYTES).then_some(length)
}

/// Packets of `padding_length` bytes needed to cover `bytes`. The last one
/// may overshoot, so the total stays below `bytes + padding_length`.
pub fn padding_packet_count(bytes: usize, padding_length: usize) -> usize {
    if padding_length == 0 || bytes < MIN_PADDING_BYTES {
        return 0;
    }
    let mut count = 0;
    let mut remaining = bytes;
    while remaining >= MIN_PADDING_BYTES {
        count += 1;
        remaining = remaining.saturating_sub(padding_length);
    }
    count
}

/// Builds a payload-less packet with `padding_length` bytes of RTP padding.
/// The header is taken as given, apart from the padding bit.
pub fn build_padding_packet(
    header: Header,
    padding_length: usize,
    capture_time_ms: i64,
    max_size: usize,
) -> Result<RtpPacketToSend> {
    let padding_size = u8::try_from(padding_length).unwrap_or(u8::MAX);
    let mut packet = RtpPacketToSend::new(header, PacketKind::Padding, capture_time_ms, max_size);
    packet.set_padding(padding_size)?;
    Ok(packet)
}
