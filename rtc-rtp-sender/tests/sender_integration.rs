//! Integration tests for the RTP sender.
//!
//! These tests drive a sender with a simulated clock and a loopback transport
//! and verify that:
//! - Frames are packetized with the right header fields and payload layout
//! - NACKed packets are resent, plain or over RTX, within the NACK bitrate
//! - FEC packets follow their frame in RED on consecutive sequence numbers
//! - Padding reuses the last frame's timing and the media sequence space

use bytes::Bytes;
use rtc_rtp_sender::{
    BitrateStatistics, BitrateStatisticsObserver, FecMaskType, FecProtectionParams, FrameType,
    PacedSender, PacketPriority, RtpSender, RtpSenderBuilder, RtpSenderConfig, RtxMode,
    SendPacketObserver, StorageMode, Transport,
};
use rtp::Packet;
use rtp::extension::{AudioLevelExtension, ExtensionType, TransmissionOffsetExtension};
use shared::error::{Error, Result};
use shared::marshal::Unmarshal;
use shared::time::SimulatedClock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Helper Functions
// =============================================================================

const MEDIA_PT: u8 = 100;
const RTX_PT: u8 = 101;
const RED_PT: u8 = 96;
const FEC_PT: u8 = 97;
const START_MS: i64 = 10_000;

#[derive(Default)]
struct LoopbackTransport {
    packets: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
}

impl LoopbackTransport {
    fn sent(&self) -> Vec<Packet> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|raw| Packet::unmarshal(&mut raw.clone()).unwrap())
            .collect()
    }

    fn raw(&self) -> Vec<Bytes> {
        self.packets.lock().unwrap().clone()
    }
}

impl Transport for LoopbackTransport {
    fn send_rtp(&self, packet: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Other("link down".to_owned()));
        }
        self.packets
            .lock()
            .unwrap()
            .push(Bytes::copy_from_slice(packet));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Queued {
    priority: PacketPriority,
    ssrc: u32,
    sequence_number: u16,
    capture_time_ms: i64,
    bytes: usize,
    retransmission: bool,
}

#[derive(Default)]
struct RecordingPacer {
    queued: Mutex<Vec<Queued>>,
}

impl RecordingPacer {
    fn take(&self) -> Vec<Queued> {
        std::mem::take(&mut *self.queued.lock().unwrap())
    }
}

impl PacedSender for RecordingPacer {
    fn insert_packet(
        &self,
        priority: PacketPriority,
        ssrc: u32,
        sequence_number: u16,
        capture_time_ms: i64,
        bytes: usize,
        retransmission: bool,
    ) {
        self.queued.lock().unwrap().push(Queued {
            priority,
            ssrc,
            sequence_number,
            capture_time_ms,
            bytes,
            retransmission,
        });
    }
}

#[derive(Default)]
struct TransportSequenceRecorder {
    seen: Mutex<Vec<(u16, i64, u32)>>,
}

impl SendPacketObserver for TransportSequenceRecorder {
    fn on_send_packet(&self, transport_sequence_number: u16, capture_time_ms: i64, ssrc: u32) {
        self.seen
            .lock()
            .unwrap()
            .push((transport_sequence_number, capture_time_ms, ssrc));
    }
}

#[derive(Default)]
struct BitrateRecorder {
    seen: Mutex<Vec<(BitrateStatistics, u32)>>,
}

impl BitrateStatisticsObserver for BitrateRecorder {
    fn notify(&self, stats: BitrateStatistics, ssrc: u32) {
        self.seen.lock().unwrap().push((stats, ssrc));
    }
}

fn video_config() -> RtpSenderConfig {
    RtpSenderConfig {
        storage_mode: StorageMode::Store,
        storage_capacity: 600,
        ..Default::default()
    }
}

fn video_sender(
    config: RtpSenderConfig,
    clock: &Arc<SimulatedClock>,
    transport: &Arc<LoopbackTransport>,
) -> RtpSender {
    let sender = RtpSenderBuilder::new(transport.clone())
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .unwrap();
    sender
        .register_payload("GENERIC", MEDIA_PT, 90_000, 0, 0)
        .unwrap();
    sender
}

fn fec_params(fec_rate: u8) -> FecProtectionParams {
    FecProtectionParams {
        fec_rate,
        use_uep_protection: false,
        max_fec_frames: 1,
        fec_mask_type: FecMaskType::Bursty,
        num_important_packets: 0,
    }
}

fn send_frame(sender: &RtpSender, frame_type: FrameType, rtp_ts: u32, frame: &[u8]) -> usize {
    sender
        .send_outgoing_data(
            frame_type,
            MEDIA_PT,
            rtp_ts,
            START_MS,
            &Bytes::copy_from_slice(frame),
            None,
            None,
        )
        .unwrap()
}

// =============================================================================
// Frame Packetization
// =============================================================================

#[test]
fn test_basic_keyframe_send() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(4321).unwrap();
    let ssrc = sender.ssrc().unwrap();

    let sent = send_frame(&sender, FrameType::VideoKey, 1000, &[47, 11, 32, 93, 89]);
    assert_eq!(sent, 12 + 6);

    let packets = transport.sent();
    assert_eq!(packets.len(), 1);
    let packet = &packets[0];
    assert!(packet.header.marker);
    assert_eq!(packet.header.payload_type, MEDIA_PT);
    assert_eq!(packet.header.sequence_number, 4321);
    assert_eq!(packet.header.timestamp, 1000);
    assert_eq!(packet.header.ssrc, ssrc);
    assert_eq!(packet.payload.as_ref(), &[0x03, 47, 11, 32, 93, 89]);

    assert_eq!(sender.sequence_number().unwrap(), 4322);
    assert_eq!(sender.frame_counts().unwrap().key_frames, 1);
}

#[test]
fn test_start_timestamp_offsets_rtp_timestamp() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_start_timestamp(u32::MAX - 99, true).unwrap();

    send_frame(&sender, FrameType::VideoDelta, 1000, &[1, 2, 3]);
    assert_eq!(transport.sent()[0].header.timestamp, 900);
}

#[test]
fn test_large_frame_split_with_marker_on_last() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(10).unwrap();

    send_frame(&sender, FrameType::VideoDelta, 0, &[7u8; 3000]);

    let packets = transport.sent();
    assert_eq!(packets.len(), 3);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.header.sequence_number, 10 + i as u16);
        assert_eq!(packet.header.marker, i == 2);
        assert!(packet.payload.len() <= sender.max_data_payload_length().unwrap());
    }
    assert_eq!(packets[0].payload[0], 0x02);
    assert_eq!(packets[1].payload[0], 0x00);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_send_errors() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    let frame = Bytes::from_static(&[1, 2, 3]);

    let result = sender.send_outgoing_data(FrameType::VideoKey, 99, 0, START_MS, &frame, None, None);
    assert!(matches!(result, Err(Error::ErrPayloadTypeUnregistered(99))));

    let result = sender.send_outgoing_data(
        FrameType::AudioSpeech,
        MEDIA_PT,
        0,
        START_MS,
        &frame,
        None,
        None,
    );
    assert!(matches!(result, Err(Error::ErrFrameTypeMismatch(_))));
    assert!(matches!(
        sender.set_audio_level(10),
        Err(Error::ErrAudioOnly)
    ));

    sender.set_transmission_time_offset(-0x80_0000).unwrap();
    sender.set_transmission_time_offset(0x7F_FFFF).unwrap();
    assert!(matches!(
        sender.set_transmission_time_offset(-0x80_0001),
        Err(Error::ErrTransmissionTimeOffsetOutOfRange(-0x80_0001))
    ));
    assert!(matches!(
        sender.set_transmission_time_offset(0x80_0000),
        Err(Error::ErrTransmissionTimeOffsetOutOfRange(0x80_0000))
    ));

    sender.set_sending_media_status(false).unwrap();
    assert_eq!(send_frame(&sender, FrameType::VideoKey, 0, &[1, 2, 3]), 0);
    sender.set_sending_media_status(true).unwrap();

    sender.set_sending_status(false).unwrap();
    let result =
        sender.send_outgoing_data(FrameType::VideoKey, MEDIA_PT, 0, START_MS, &frame, None, None);
    assert!(matches!(result, Err(Error::ErrSendingDisabled)));
    assert!(transport.sent().is_empty());
}

#[test]
fn test_forced_ssrc_survives_stop() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);

    sender.set_ssrc(0x1234_5678).unwrap();
    sender.set_sending_status(false).unwrap();
    sender.set_sending_status(true).unwrap();
    assert_eq!(sender.ssrc().unwrap(), 0x1234_5678);

    assert!(sender.set_max_payload_length(99).is_err());
    assert!(sender.set_max_payload_length(1501).is_err());
    assert!(sender.set_csrcs(&[0; 16]).is_err());
}

// =============================================================================
// NACK and RTX
// =============================================================================

#[test]
fn test_nack_single_packet() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(4321).unwrap();

    send_frame(&sender, FrameType::VideoKey, 1000, &[47, 11, 32, 93, 89]);
    sender.on_received_nack(&[4321], 0).unwrap();

    let raw = transport.raw();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0], raw[1]);

    let counters = sender.data_counters().unwrap();
    assert_eq!(counters.transmitted.packets, 2);
    assert_eq!(counters.retransmitted.packets, 1);
    assert_eq!(counters.retransmitted.payload_bytes, 6);
}

#[test]
fn test_nack_single_packet_over_rtx() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(4321).unwrap();
    sender
        .set_rtx(RtxMode::Retransmitted, Some(0xBEEF), &[(MEDIA_PT, RTX_PT)])
        .unwrap();
    sender.set_rtx_sequence_number(500).unwrap();

    send_frame(&sender, FrameType::VideoKey, 1000, &[47, 11, 32, 93, 89]);
    sender.on_received_nack(&[4321], 0).unwrap();

    let packets = transport.sent();
    assert_eq!(packets.len(), 2);
    let rtx = &packets[1];
    assert_eq!(rtx.header.ssrc, 0xBEEF);
    assert_eq!(rtx.header.sequence_number, 500);
    assert_eq!(rtx.header.payload_type, RTX_PT);
    assert_eq!(rtx.header.timestamp, 1000);
    assert_eq!(
        rtx.payload.as_ref(),
        &[0x10, 0xE1, 0x03, 47, 11, 32, 93, 89]
    );
}

#[test]
fn test_nack_resend_spacing() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(7).unwrap();

    send_frame(&sender, FrameType::VideoKey, 0, &[1, 2, 3]);
    sender.on_received_nack(&[7], 100).unwrap();
    // second resend within 5 + rtt ms is refused
    clock.advance_time_milliseconds(50);
    sender.on_received_nack(&[7], 100).unwrap();
    assert_eq!(transport.raw().len(), 2);

    clock.advance_time_milliseconds(60);
    sender.on_received_nack(&[7], 100).unwrap();
    assert_eq!(transport.raw().len(), 3);
}

fn paced_sender(
    target_bitrate_kbps: u32,
    clock: &Arc<SimulatedClock>,
    transport: &Arc<LoopbackTransport>,
    pacer: &Arc<RecordingPacer>,
) -> RtpSender {
    let config = RtpSenderConfig {
        target_bitrate_kbps,
        ..video_config()
    };
    let sender = RtpSenderBuilder::new(transport.clone())
        .with_config(config)
        .with_clock(clock.clone())
        .with_paced_sender(pacer.clone())
        .build()
        .unwrap();
    sender
        .register_payload("GENERIC", MEDIA_PT, 90_000, 0, 0)
        .unwrap();
    sender.set_sequence_number(0).unwrap();
    sender
}

/// Sends `count` frames of one 1400-byte packet each through the pacer.
fn send_paced_frames(sender: &RtpSender, pacer: &RecordingPacer, count: u16) -> Vec<u16> {
    for i in 0..count {
        let frame_type = if i == 0 {
            FrameType::VideoKey
        } else {
            FrameType::VideoDelta
        };
        send_frame(sender, frame_type, i as u32 * 3000, &[0u8; 1387]);
    }
    let queued = pacer.take();
    assert_eq!(queued.len(), count as usize);
    for q in &queued {
        assert_eq!(q.bytes, 1400);
        assert_eq!(q.priority, PacketPriority::Low);
        assert!(!q.retransmission);
        assert!(
            sender
                .time_to_send_packet(q.sequence_number, q.capture_time_ms, false)
                .unwrap()
        );
    }
    queued.iter().map(|q| q.sequence_number).collect()
}

#[test]
fn test_nack_exceeds_rate() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let pacer = Arc::new(RecordingPacer::default());
    let sender = paced_sender(10, &clock, &transport, &pacer);

    let sequence_numbers = send_paced_frames(&sender, &pacer, 30);
    assert_eq!(transport.raw().len(), 30);

    clock.advance_time_milliseconds(1000);
    sender.on_received_nack(&sequence_numbers, 0).unwrap();
    let resent: usize = pacer.take().iter().map(|q| q.bytes).sum();
    assert!(resent <= 10 * 1000 / 8);

    sender.on_received_nack(&sequence_numbers, 0).unwrap();
    assert!(pacer.take().is_empty());
}

#[test]
fn test_nack_budget_limits_paced_resends() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let pacer = Arc::new(RecordingPacer::default());
    let sender = paced_sender(100, &clock, &transport, &pacer);

    let sequence_numbers = send_paced_frames(&sender, &pacer, 30);
    clock.advance_time_milliseconds(1000);

    // 100 kbps allows 12500 bytes a second: eight packets of 1400
    sender.on_received_nack(&sequence_numbers, 0).unwrap();
    let resends = pacer.take();
    assert_eq!(resends.len(), 8);
    for (q, sequence_number) in resends.iter().zip(&sequence_numbers) {
        assert_eq!(q.sequence_number, *sequence_number);
        assert_eq!(q.priority, PacketPriority::Normal);
        assert!(q.retransmission);
        let state = sender.packet_state(q.sequence_number).unwrap().unwrap();
        assert!(state.pending_transmission);
    }

    sender.on_received_nack(&sequence_numbers, 0).unwrap();
    assert!(pacer.take().is_empty());

    // the pacer sends the queued resends
    for q in &resends {
        assert!(
            sender
                .time_to_send_packet(q.sequence_number, q.capture_time_ms, true)
                .unwrap()
        );
    }
    assert_eq!(transport.raw().len(), 38);
    assert_eq!(sender.data_counters().unwrap().retransmitted.packets, 8);
    assert!(sender.nack_overhead_rate().unwrap() > 0);
}

#[test]
fn test_time_to_send_unknown_packet() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let pacer = Arc::new(RecordingPacer::default());
    let sender = paced_sender(0, &clock, &transport, &pacer);

    assert!(sender.time_to_send_packet(1234, START_MS, false).unwrap());
    assert!(transport.raw().is_empty());
}

#[test]
fn test_transport_failure_keeps_packet() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init()
        .ok();

    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(3).unwrap();

    transport.fail.store(true, Ordering::SeqCst);
    assert_eq!(send_frame(&sender, FrameType::VideoKey, 0, &[1, 2, 3]), 0);
    assert_eq!(sender.data_counters().unwrap().transmitted.packets, 0);

    transport.fail.store(false, Ordering::SeqCst);
    sender.on_received_nack(&[3], 0).unwrap();
    let packets = transport.sent();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header.sequence_number, 3);
}

// =============================================================================
// FEC
// =============================================================================

#[test]
fn test_fec_on_three_packet_frame() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(200).unwrap();
    sender.set_fec(true, RED_PT, FEC_PT).unwrap();
    sender
        .set_fec_parameters(fec_params(60), fec_params(60))
        .unwrap();
    let ssrc = sender.ssrc().unwrap();

    send_frame(&sender, FrameType::VideoKey, 3000, &[5u8; 3000]);

    let packets = transport.sent();
    assert_eq!(packets.len(), 4);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.header.ssrc, ssrc);
        assert_eq!(packet.header.payload_type, RED_PT);
        assert_eq!(packet.header.sequence_number, 200 + i as u16);
        assert_eq!(packet.header.timestamp, 3000);
    }
    for packet in &packets[..3] {
        assert_eq!(packet.payload[0], MEDIA_PT);
    }
    assert!(packets[2].header.marker);

    let fec = &packets[3];
    assert!(!fec.header.marker);
    assert_eq!(fec.payload[0], FEC_PT);
    // RED header, FEC header, ULP header with a 16-bit mask over three packets
    let ulp = &fec.payload[1 + 10..1 + 14];
    assert_eq!(u16::from_be_bytes([fec.payload[3], fec.payload[4]]), 200);
    assert_eq!(ulp[2] & 0xE0, 0xE0);
    assert_eq!(fec.payload.len(), 1 + 10 + 4 + 1001);

    let counters = sender.data_counters().unwrap();
    assert_eq!(counters.fec.packets, 1);
    assert_eq!(counters.transmitted.packets, 4);
}

#[test]
fn test_fec_not_retransmitted_by_default() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(0).unwrap();
    sender.set_fec(true, RED_PT, FEC_PT).unwrap();
    sender
        .set_fec_parameters(fec_params(255), fec_params(255))
        .unwrap();

    send_frame(&sender, FrameType::VideoKey, 0, &[5u8; 10]);
    assert_eq!(transport.raw().len(), 2);

    sender.on_received_nack(&[1], 0).unwrap();
    assert_eq!(transport.raw().len(), 2);
}

#[test]
fn test_sequence_number_wrap() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(65534).unwrap();
    sender.set_fec(true, RED_PT, FEC_PT).unwrap();
    sender
        .set_fec_parameters(fec_params(170), fec_params(170))
        .unwrap();

    send_frame(&sender, FrameType::VideoKey, 0, &[9u8; 3000]);

    let packets = transport.sent();
    let sequence_numbers: Vec<u16> = packets.iter().map(|p| p.header.sequence_number).collect();
    assert_eq!(sequence_numbers, vec![65534, 65535, 0, 1, 2]);
    assert_eq!(packets[3].payload[0], FEC_PT);
    assert_eq!(packets[4].payload[0], FEC_PT);

    sender.on_received_nack(&[0], 0).unwrap();
    let raw = transport.raw();
    assert_eq!(raw.len(), 6);
    assert_eq!(raw[5], raw[2]);
}

// =============================================================================
// Padding
// =============================================================================

#[test]
fn test_padding_bursts() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender
        .register_rtp_header_extension(ExtensionType::TransmissionTimeOffset, 1)
        .unwrap();
    sender.set_sequence_number(100).unwrap();
    assert_eq!(sender.rtp_header_length().unwrap(), 20);

    // 20 header + 1 generic header + 479 = 500 bytes
    send_frame(&sender, FrameType::VideoKey, 4500, &[1u8; 479]);
    let media = transport.sent().remove(0);
    assert_eq!(media.payload.len(), 480);
    let mut tto = media.header.get_extension(1).unwrap();
    let tto = TransmissionOffsetExtension::unmarshal(&mut tto).unwrap();
    assert_eq!(tto.transmission_offset, 0);

    clock.advance_time_milliseconds(100);
    for i in 0..4u16 {
        assert_eq!(sender.time_to_send_padding(50).unwrap(), 224);

        let packets = transport.sent();
        let padding = packets.last().unwrap();
        assert_eq!(packets.len(), 2 + i as usize);
        assert_eq!(padding.header.sequence_number, 101 + i);
        assert_eq!(padding.header.ssrc, media.header.ssrc);
        assert_eq!(padding.header.timestamp, 4500);
        assert!(padding.header.padding);
        assert!(!padding.header.marker);
        assert!(padding.payload.is_empty());

        let mut tto = padding.header.get_extension(1).unwrap();
        let tto = TransmissionOffsetExtension::unmarshal(&mut tto).unwrap();
        assert_eq!(tto.transmission_offset, 90 * (100 + 50 * i as i32));

        clock.advance_time_milliseconds(50);
    }
}

#[test]
fn test_no_padding_inside_frame_without_rtx() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);

    // nothing sent yet, so there is no payload type to pad with
    assert_eq!(sender.time_to_send_padding(500).unwrap(), 0);
    assert!(transport.raw().is_empty());
    assert_eq!(sender.time_to_send_padding(0).unwrap(), 0);
}

#[test]
fn test_redundant_payload_padding_over_rtx() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender.set_sequence_number(40).unwrap();
    sender
        .set_rtx(
            RtxMode::RetransmittedAndRedundant,
            Some(0xBEEF),
            &[(MEDIA_PT, RTX_PT)],
        )
        .unwrap();
    sender.set_rtx_sequence_number(0).unwrap();

    // 12 header + 1 generic header + 287 = 300 bytes
    send_frame(&sender, FrameType::VideoKey, 0, &[3u8; 287]);

    assert_eq!(sender.time_to_send_padding(500).unwrap(), 604);
    let packets = transport.sent();
    assert_eq!(packets.len(), 3);
    for (i, packet) in packets[1..].iter().enumerate() {
        assert_eq!(packet.header.ssrc, 0xBEEF);
        assert_eq!(packet.header.payload_type, RTX_PT);
        assert_eq!(packet.header.sequence_number, i as u16);
        assert_eq!(&packet.payload[..2], &[0, 40]);
    }
}

#[test]
fn test_padding_only_over_rtx() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = video_sender(video_config(), &clock, &transport);
    sender
        .set_rtx(RtxMode::Retransmitted, Some(0xBEEF), &[(MEDIA_PT, RTX_PT)])
        .unwrap();
    sender.set_rtx_sequence_number(9).unwrap();
    let media_sequence = sender.sequence_number().unwrap();

    assert_eq!(sender.time_to_send_padding(400).unwrap(), 448);
    let packets = transport.sent();
    assert_eq!(packets.len(), 2);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.header.ssrc, 0xBEEF);
        assert_eq!(packet.header.payload_type, RTX_PT);
        assert_eq!(packet.header.sequence_number, 9 + i as u16);
        assert!(packet.header.padding);
    }
    // padding over RTX leaves the media sequence space alone
    assert_eq!(sender.sequence_number().unwrap(), media_sequence);
}

// =============================================================================
// Audio
// =============================================================================

fn audio_sender(clock: &Arc<SimulatedClock>, transport: &Arc<LoopbackTransport>) -> RtpSender {
    let config = RtpSenderConfig {
        audio: true,
        ..video_config()
    };
    let sender = RtpSenderBuilder::new(transport.clone())
        .with_config(config)
        .with_clock(clock.clone())
        .build()
        .unwrap();
    sender.register_payload("PCMU", 0, 8000, 1, 64000).unwrap();
    sender.register_payload("CN", 13, 8000, 1, 0).unwrap();
    sender
}

#[test]
fn test_audio_talkspurt_marker_and_level() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = audio_sender(&clock, &transport);
    sender
        .register_rtp_header_extension(ExtensionType::AudioLevel, 3)
        .unwrap();
    sender.set_audio_level(42).unwrap();
    assert!(matches!(
        sender.set_audio_level(128),
        Err(Error::AudioLevelOverflow)
    ));

    let frame = Bytes::from_static(&[0xFF; 160]);
    for (frame_type, payload_type, rtp_ts) in [
        (FrameType::AudioSpeech, 0, 0),
        (FrameType::AudioSpeech, 0, 160),
        (FrameType::AudioCn, 13, 320),
        (FrameType::AudioSpeech, 0, 480),
    ] {
        sender
            .send_outgoing_data(frame_type, payload_type, rtp_ts, START_MS, &frame, None, None)
            .unwrap();
    }

    let packets = transport.sent();
    let markers: Vec<bool> = packets.iter().map(|p| p.header.marker).collect();
    assert_eq!(markers, vec![true, false, false, true]);

    let mut level = packets[0].header.get_extension(3).unwrap();
    let level = AudioLevelExtension::unmarshal(&mut level).unwrap();
    assert_eq!(level.level, 42);
    assert!(level.voice);

    let mut level = packets[2].header.get_extension(3).unwrap();
    assert!(!AudioLevelExtension::unmarshal(&mut level).unwrap().voice);
}

#[test]
fn test_audio_keep_alive() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = audio_sender(&clock, &transport);
    let empty = Bytes::new();

    sender
        .send_outgoing_data(FrameType::Empty, 0, 0, START_MS, &empty, None, None)
        .unwrap();
    assert!(transport.raw().is_empty());

    sender.set_keep_alive_payload_type(20).unwrap();
    assert!(sender.register_payload("PCMA", 20, 8000, 1, 0).is_err());
    sender
        .send_outgoing_data(FrameType::Empty, 0, 160, START_MS, &empty, None, None)
        .unwrap();

    let packets = transport.sent();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header.payload_type, 20);
    assert_eq!(packets[0].header.timestamp, 160);
    assert!(packets[0].payload.is_empty());
}

#[test]
fn test_audio_red_with_redundant_block() {
    use rtp::packetizer::{Fragment, Fragmentation};

    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let sender = audio_sender(&clock, &transport);
    sender.set_audio_red_payload_type(Some(127)).unwrap();

    // the first packet of a talkspurt carries the primary encoding only
    let first = Bytes::from_static(&[1, 1, 1]);
    sender
        .send_outgoing_data(FrameType::AudioSpeech, 0, 0, START_MS, &first, None, None)
        .unwrap();

    let frame = Bytes::from_static(&[9, 9, 9, 9, 1, 1, 1]);
    let fragmentation = Fragmentation::new(vec![
        Fragment {
            offset: 0,
            length: 4,
            time_diff: 0,
            payload_type: 0,
        },
        Fragment {
            offset: 4,
            length: 3,
            time_diff: 160,
            payload_type: 0,
        },
    ]);
    sender
        .send_outgoing_data(
            FrameType::AudioSpeech,
            0,
            160,
            START_MS,
            &frame,
            Some(&fragmentation),
            None,
        )
        .unwrap();

    let packets = transport.sent();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].header.payload_type, 0);
    assert_eq!(packets[0].payload.as_ref(), &[1, 1, 1]);

    let red = &packets[1];
    assert_eq!(red.header.payload_type, 127);
    // F=1 | PT 0, offset 160 << 10 | length 3, primary PT 0
    assert_eq!(
        red.payload.as_ref(),
        &[0x80, 0x02, 0x80, 0x03, 0x00, 1, 1, 1, 9, 9, 9, 9]
    );
}

// =============================================================================
// Observers
// =============================================================================

#[test]
fn test_transport_sequence_numbers() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let observer = Arc::new(TransportSequenceRecorder::default());
    let sender = RtpSenderBuilder::new(transport.clone())
        .with_config(video_config())
        .with_clock(clock.clone())
        .with_send_packet_observer(observer.clone())
        .build()
        .unwrap();
    sender
        .register_payload("GENERIC", MEDIA_PT, 90_000, 0, 0)
        .unwrap();
    sender
        .register_rtp_header_extension(ExtensionType::TransportSequenceNumber, 5)
        .unwrap();
    let ssrc = sender.ssrc().unwrap();

    send_frame(&sender, FrameType::VideoKey, 0, &[1, 2, 3]);
    send_frame(&sender, FrameType::VideoDelta, 3000, &[4, 5, 6]);

    let seen = observer.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(0, START_MS, ssrc), (1, START_MS, ssrc)]);

    let packets = transport.sent();
    assert_eq!(packets[1].header.get_extension(5).unwrap().as_ref(), &[0, 1]);
}

#[test]
fn test_process_bitrate_notifies_observer() {
    let clock = Arc::new(SimulatedClock::new(START_MS));
    let transport = Arc::new(LoopbackTransport::default());
    let observer = Arc::new(BitrateRecorder::default());
    let sender = RtpSenderBuilder::new(transport.clone())
        .with_config(video_config())
        .with_clock(clock.clone())
        .with_bitrate_observer(observer.clone())
        .build()
        .unwrap();
    sender
        .register_payload("GENERIC", MEDIA_PT, 90_000, 0, 0)
        .unwrap();
    let ssrc = sender.ssrc().unwrap();

    sender.process_bitrate().unwrap();
    send_frame(&sender, FrameType::VideoKey, 0, &[1, 2, 3]);
    let size = transport.raw()[0].len() as u32;
    sender.process_bitrate().unwrap();

    let seen = observer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0.bitrate_bps, 0);
    assert_eq!(seen[0].0.packet_rate, 0);
    assert_eq!(
        seen[1],
        (
            BitrateStatistics {
                bitrate_bps: size * 8,
                packet_rate: 1,
                timestamp_ms: START_MS,
            },
            ssrc
        )
    );
    assert_eq!(sender.bitrate_sent().unwrap(), size * 8);
}
