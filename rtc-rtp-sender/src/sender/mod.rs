//! The RTP sender.
//!
//! [`RtpSender`] turns encoded frames into RTP packets, keeps them in the
//! packet history, hands them to the pacer or the transport, and answers
//! NACKs and padding requests.
//!
//! Two locks guard the sender: the send lock over stream state and
//! statistics, and the history lock over [`PacketHistory`]. When both are
//! needed they are taken in that order. Neither is held while the transport
//! or an observer is called.

mod audio;
mod video;

pub use video::VideoTypeHeader;

use crate::config::{IP_PACKET_SIZE, MIN_MAX_PAYLOAD_LENGTH, RtpSenderConfig};
use crate::fec::{FecProtectionParams, fec_packet_overhead};
use crate::history::{PacketHistory, PacketState, StorageMode, StorageType};
use crate::nack::{NackController, delay_bandwidth_cap};
use crate::observer::{
    BitrateStatistics, BitrateStatisticsObserver, FrameCountObserver, FrameCounts, PacedSender,
    PacketPriority, SendPacketObserver, SendSideDelayObserver, StreamDataCounters, Transport,
};
use crate::packet_to_send::{PacketKind, RtpPacketToSend};
use crate::padding::{
    MAX_PADDING_LENGTH, MIN_PADDING_BYTES, build_padding_packet, padding_length,
    padding_packet_count,
};
use crate::payload_registry::{PayloadRegistry, VideoCodecType};
use crate::rate::RateWindow;
use crate::rtx::{RTX_HEADER_LENGTH, RtxMode, RtxState};
use crate::ssrc::{SsrcAllocator, SsrcDatabase};
use audio::AudioState;
use bytes::Bytes;
use log::{debug, trace, warn};
use rtp::extension::audio_level_extension::MAX_AUDIO_LEVEL_DBOV;
use rtp::extension::transmission_offset_extension::{
    MAX_TRANSMISSION_OFFSET, MIN_TRANSMISSION_OFFSET,
};
use rtp::extension::{
    AbsSendTimeExtension, AudioLevelExtension, ExtensionMap, ExtensionType,
    TransmissionOffsetExtension, TransportCcExtension, VideoOrientationExtension,
};
use rtp::header::{FIXED_HEADER_LENGTH, Header, MAX_CSRCS};
use rtp::packetizer::{Fragmentation, Payloader};
use rtp::sequence::SequenceSpace;
use shared::error::{Error, Result};
use shared::marshal::Marshal;
use shared::time::{Clock, SystemClock};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use video::VideoState;

/// Added to the RTT reported with a NACK to get the minimum resend interval.
pub const NACK_RTT_OFFSET_MS: i64 = 5;
/// Send-side delay is averaged over this window.
pub const SEND_SIDE_DELAY_WINDOW_MS: i64 = 1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// No media. Audio senders send a keep-alive, video senders pad up to
    /// the target bitrate.
    Empty,
    AudioSpeech,
    /// Comfort noise.
    AudioCn,
    VideoKey,
    VideoDelta,
}

impl FrameType {
    pub fn is_audio(&self) -> bool {
        matches!(self, FrameType::AudioSpeech | FrameType::AudioCn)
    }

    pub fn is_video(&self) -> bool {
        matches!(self, FrameType::VideoKey | FrameType::VideoDelta)
    }
}

/// A packet built under the send lock, waiting to be stored and sent.
#[derive(Debug)]
pub(crate) struct OutgoingPacket {
    packet: RtpPacketToSend,
    storage: StorageType,
    priority: PacketPriority,
}

/// Timing of a frame that padding is sent for.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PaddingFrame {
    payload_type: u8,
    timestamp: u32,
    capture_time_ms: i64,
}

pub(crate) enum FrameOutput {
    Packets {
        packets: Vec<OutgoingPacket>,
        frame_counts: Option<FrameCounts>,
    },
    Padding {
        bytes: usize,
        frame: PaddingFrame,
    },
    Nothing,
}

#[derive(Debug, Copy, Clone)]
struct LastMedia {
    payload_type: u8,
    timestamp: u32,
    capture_time_ms: i64,
    marker: bool,
}

pub(crate) enum MediaState {
    Audio(AudioState),
    Video(VideoState),
}

enum Resend {
    Sent(usize),
    Skipped,
    Failed,
}

/// Stream state guarded by the send lock.
pub(crate) struct SendState {
    media: MediaState,
    payloads: PayloadRegistry,
    extensions: ExtensionMap,

    ssrc: u32,
    ssrc_forced: bool,
    csrcs: Vec<u32>,
    sequence: SequenceSpace,
    sequence_forced: bool,
    start_timestamp: u32,
    start_timestamp_forced: bool,
    transport_sequence: u16,

    sending: bool,
    sending_media: bool,
    max_payload_length: usize,
    transmission_time_offset: i32,
    target_bitrate_kbps: u32,
    allow_fec_retransmission: bool,

    rtx: RtxState,
    last_media: Option<LastMedia>,

    total_bitrate: RateWindow,
    nack_bitrate: RateWindow,
    packet_rate: RateWindow,
    nack: NackController,
    counters: StreamDataCounters,
    frame_counts: FrameCounts,
    send_delays: VecDeque<(i64, i64)>,
}

impl SendState {
    fn new(config: &RtpSenderConfig, ssrc: u32) -> Self {
        let media = if config.audio {
            MediaState::Audio(AudioState::default())
        } else {
            MediaState::Video(VideoState::new(config.selective_retransmissions))
        };
        let mut rtx = RtxState::new();
        rtx.set_mode(config.rtx_mode);

        Self {
            media,
            payloads: PayloadRegistry::new(config.audio),
            extensions: ExtensionMap::new(),
            ssrc,
            ssrc_forced: false,
            csrcs: vec![],
            sequence: SequenceSpace::new_random(),
            sequence_forced: false,
            start_timestamp: 0,
            start_timestamp_forced: false,
            transport_sequence: 0,
            sending: true,
            sending_media: true,
            max_payload_length: config.max_payload_length,
            transmission_time_offset: 0,
            target_bitrate_kbps: config.target_bitrate_kbps,
            allow_fec_retransmission: config.allow_fec_retransmission,
            rtx,
            last_media: None,
            total_bitrate: RateWindow::default(),
            nack_bitrate: RateWindow::default(),
            packet_rate: RateWindow::default(),
            nack: NackController::new(),
            counters: StreamDataCounters::default(),
            frame_counts: FrameCounts::default(),
            send_delays: VecDeque::new(),
        }
    }

    fn is_audio(&self) -> bool {
        matches!(self.media, MediaState::Audio(_))
    }

    fn rtp_header_length(&self) -> usize {
        FIXED_HEADER_LENGTH + 4 * self.csrcs.len() + self.extensions.total_length()
    }

    fn fec_enabled(&self) -> bool {
        match &self.media {
            MediaState::Video(video) => video.fec.enabled,
            MediaState::Audio(_) => false,
        }
    }

    fn max_data_payload_length(&self) -> usize {
        let header_length = self.rtp_header_length();
        let fec_overhead = if self.fec_enabled() {
            fec_packet_overhead(header_length)
        } else {
            0
        };
        let rtx_overhead = if self.rtx.mode() != RtxMode::Off {
            RTX_HEADER_LENGTH
        } else {
            0
        };
        self.max_payload_length
            .saturating_sub(header_length + fec_overhead + rtx_overhead)
    }

    /// Header with every registered extension present, so all packets of
    /// the stream have the same header length. Values that depend on the
    /// send time are filled in by [`SendState::prepare_for_send`].
    fn build_header(
        &self,
        payload_type: u8,
        marker: bool,
        timestamp: u32,
        sequence_number: u16,
        ssrc: u32,
    ) -> Result<Header> {
        let mut header = Header {
            version: 2,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: self.csrcs.clone(),
            ..Default::default()
        };
        for (id, extension_type) in self.extensions.iter() {
            let payload = match extension_type {
                ExtensionType::TransmissionTimeOffset => TransmissionOffsetExtension {
                    transmission_offset: self.transmission_time_offset,
                }
                .marshal()?,
                ExtensionType::AbsoluteSendTime => AbsSendTimeExtension::default().marshal()?,
                ExtensionType::AudioLevel => AudioLevelExtension {
                    level: MAX_AUDIO_LEVEL_DBOV,
                    voice: false,
                }
                .marshal()?,
                ExtensionType::VideoOrientation => VideoOrientationExtension::default().marshal()?,
                ExtensionType::TransportSequenceNumber => {
                    TransportCcExtension::default().marshal()?
                }
            };
            header.set_extension(id, payload)?;
        }
        Ok(header)
    }

    /// Codec of the payload type a frame is sent with. Audio keep-alives and
    /// the audio RED payload type need no registration.
    fn check_payload_type(&self, frame_type: FrameType, payload_type: u8) -> Result<VideoCodecType> {
        let audio = self.is_audio();
        if (audio && frame_type.is_video()) || (!audio && frame_type.is_audio()) {
            return Err(Error::ErrFrameTypeMismatch(payload_type));
        }
        if let MediaState::Audio(state) = &self.media {
            if frame_type == FrameType::Empty || state.red_payload_type == Some(payload_type) {
                return Ok(VideoCodecType::Generic);
            }
        }
        match self.payloads.get(payload_type) {
            Some(payload) => Ok(payload.video_codec().unwrap_or_default()),
            None => Err(Error::ErrPayloadTypeUnregistered(payload_type)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_frame(
        &mut self,
        frame_type: FrameType,
        payload_type: u8,
        rtp_timestamp: u32,
        capture_time_ms: i64,
        payload: &Bytes,
        fragmentation: Option<&Fragmentation>,
        video_header: Option<&VideoTypeHeader>,
        paced: bool,
        now_ms: i64,
    ) -> Result<FrameOutput> {
        let codec = self.check_payload_type(frame_type, payload_type)?;
        let timestamp = self.start_timestamp.wrapping_add(rtp_timestamp);
        let output = if self.is_audio() {
            self.build_audio_frame(
                frame_type,
                payload_type,
                timestamp,
                capture_time_ms,
                payload,
                fragmentation,
            )?
        } else {
            self.build_video_frame(
                frame_type,
                codec,
                payload_type,
                timestamp,
                capture_time_ms,
                payload,
                fragmentation,
                video_header,
                paced,
                now_ms,
            )?
        };

        if let FrameOutput::Packets { packets, .. } = &output {
            if let Some(last) = packets
                .iter()
                .rev()
                .find(|outgoing| outgoing.packet.kind().is_media())
            {
                self.last_media = Some(LastMedia {
                    payload_type,
                    timestamp,
                    capture_time_ms,
                    marker: last.packet.marker(),
                });
            }
        }
        Ok(output)
    }

    /// Writes the send-time extensions. Returns the transport-wide sequence
    /// number if one was assigned.
    fn prepare_for_send(
        &mut self,
        packet: &mut RtpPacketToSend,
        capture_time_ms: i64,
        now_ms: i64,
    ) -> Result<Option<u16>> {
        if capture_time_ms > 0 {
            if let Some(id) = self.extensions.id(ExtensionType::TransmissionTimeOffset) {
                packet.set_extension(
                    id,
                    &TransmissionOffsetExtension::from_elapsed(now_ms, capture_time_ms),
                )?;
            }
        }
        if let Some(id) = self.extensions.id(ExtensionType::AbsoluteSendTime) {
            packet.set_extension(id, &AbsSendTimeExtension::from_millis(now_ms))?;
        }
        if let Some(id) = self.extensions.id(ExtensionType::TransportSequenceNumber) {
            let transport_sequence = self.transport_sequence;
            self.transport_sequence = transport_sequence.wrapping_add(1);
            packet.set_extension(id, &TransportCcExtension { transport_sequence })?;
            return Ok(Some(transport_sequence));
        }
        Ok(None)
    }

    /// Accounts a packet that went on the wire. Returns the send-side delay
    /// average and maximum when the packet carried fresh media.
    fn update_send_stats(
        &mut self,
        packet: &RtpPacketToSend,
        retransmission: bool,
        now_ms: i64,
    ) -> Option<(i64, i64)> {
        let size = packet.size();
        let header_bytes = packet.header_length();
        let payload_bytes = packet.payload().len();
        let padding_bytes = packet.padding_size() as usize;

        self.total_bitrate.update(size, now_ms);
        self.packet_rate.update(1, now_ms);
        self.counters
            .transmitted
            .add(header_bytes, payload_bytes, padding_bytes);
        if self.counters.first_packet_time_ms.is_none() {
            self.counters.first_packet_time_ms = Some(now_ms);
        }
        if retransmission {
            self.counters
                .retransmitted
                .add(header_bytes, payload_bytes, padding_bytes);
            self.nack_bitrate.update(size, now_ms);
        }
        if packet.kind() == PacketKind::Fec {
            self.counters
                .fec
                .add(header_bytes, payload_bytes, padding_bytes);
        }

        if retransmission || !packet.kind().is_media() || packet.capture_time_ms() <= 0 {
            return None;
        }
        self.send_delays
            .push_back((now_ms, now_ms - packet.capture_time_ms()));
        while let Some((time_ms, _)) = self.send_delays.front() {
            if now_ms - time_ms < SEND_SIDE_DELAY_WINDOW_MS {
                break;
            }
            self.send_delays.pop_front();
        }
        let max_delay = self.send_delays.iter().map(|(_, d)| *d).max()?;
        let avg_delay =
            self.send_delays.iter().map(|(_, d)| *d).sum::<i64>() / self.send_delays.len() as i64;
        Some((avg_delay, max_delay))
    }

    /// Padding needed to bring the send rate up to the target, at most
    /// 200 ms worth of it.
    fn bitrate_padding_bytes(&mut self, now_ms: i64) -> usize {
        let target_bps = self.target_bitrate_kbps as i64 * 1000;
        let current_bps = self.total_bitrate.rate_bps(now_ms) as i64;
        let diff_bps = target_bps - current_bps;
        if diff_bps <= 0 {
            return 0;
        }
        if current_bps == 0 {
            // start-up: a single batch of about 33 ms
            return (diff_bps / 8 / 30) as usize;
        }
        (diff_bps / 8).min(self.target_bitrate_kbps as i64 * 25) as usize
    }

    /// Builds the padding-only packets for `bytes`, reserving their sequence
    /// numbers up front.
    fn plan_padding(
        &mut self,
        bytes: usize,
        frame: Option<PaddingFrame>,
        now_ms: i64,
    ) -> Result<Vec<RtpPacketToSend>> {
        let header_length = self.rtp_header_length();
        let Some(padding_len) = padding_length(self.max_payload_length.saturating_sub(header_length))
        else {
            return Ok(vec![]);
        };

        let rtx = self.rtx.is_enabled();
        let (media_payload_type, timestamp, capture_time_ms) = match (frame, self.last_media) {
            (Some(frame), _) => (
                Some(frame.payload_type),
                frame.timestamp,
                frame.capture_time_ms,
            ),
            (None, Some(last)) => {
                if !rtx && !last.marker {
                    trace!("no padding inside a frame");
                    return Ok(vec![]);
                }
                (
                    Some(last.payload_type),
                    last.timestamp,
                    last.capture_time_ms,
                )
            }
            (None, None) => (None, self.start_timestamp, now_ms),
        };

        let (ssrc, payload_type) = if rtx {
            match (
                self.rtx.ssrc(),
                self.rtx.padding_payload_type(media_payload_type),
            ) {
                (Some(ssrc), Some(payload_type)) => (ssrc, payload_type),
                _ => {
                    trace!("no rtx payload type for padding");
                    return Ok(vec![]);
                }
            }
        } else {
            match media_payload_type {
                Some(payload_type) => (self.ssrc, payload_type),
                None => return Ok(vec![]),
            }
        };

        let count = padding_packet_count(bytes, padding_len);
        let first = if rtx {
            None
        } else {
            Some(self.sequence.allocate(count as u16))
        };

        let mut packets = Vec::with_capacity(count);
        for i in 0..count {
            let sequence_number = match first {
                Some(first) => first.wrapping_add(i as u16),
                None => self.rtx.next_sequence_number(),
            };
            let header = self.build_header(payload_type, false, timestamp, sequence_number, ssrc)?;
            packets.push(build_padding_packet(
                header,
                padding_len,
                capture_time_ms,
                self.max_payload_length,
            )?);
        }
        Ok(packets)
    }
}

/// Assembles an [`RtpSender`] from a configuration and its collaborators.
pub struct RtpSenderBuilder {
    config: RtpSenderConfig,
    transport: Arc<dyn Transport>,
    clock: Option<Arc<dyn Clock>>,
    paced_sender: Option<Arc<dyn PacedSender>>,
    ssrc_allocator: Option<Arc<dyn SsrcAllocator>>,
    frame_count_observer: Option<Arc<dyn FrameCountObserver>>,
    bitrate_observer: Option<Arc<dyn BitrateStatisticsObserver>>,
    send_side_delay_observer: Option<Arc<dyn SendSideDelayObserver>>,
    send_packet_observer: Option<Arc<dyn SendPacketObserver>>,
}

impl RtpSenderBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            config: RtpSenderConfig::default(),
            transport,
            clock: None,
            paced_sender: None,
            ssrc_allocator: None,
            frame_count_observer: None,
            bitrate_observer: None,
            send_side_delay_observer: None,
            send_packet_observer: None,
        }
    }

    pub fn with_config(mut self, config: RtpSenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Without a pacer, packets go to the transport as soon as they are built.
    pub fn with_paced_sender(mut self, paced_sender: Arc<dyn PacedSender>) -> Self {
        self.paced_sender = Some(paced_sender);
        self
    }

    /// Defaults to a private [`SsrcDatabase`].
    pub fn with_ssrc_allocator(mut self, ssrc_allocator: Arc<dyn SsrcAllocator>) -> Self {
        self.ssrc_allocator = Some(ssrc_allocator);
        self
    }

    pub fn with_frame_count_observer(mut self, observer: Arc<dyn FrameCountObserver>) -> Self {
        self.frame_count_observer = Some(observer);
        self
    }

    pub fn with_bitrate_observer(mut self, observer: Arc<dyn BitrateStatisticsObserver>) -> Self {
        self.bitrate_observer = Some(observer);
        self
    }

    pub fn with_send_side_delay_observer(
        mut self,
        observer: Arc<dyn SendSideDelayObserver>,
    ) -> Self {
        self.send_side_delay_observer = Some(observer);
        self
    }

    pub fn with_send_packet_observer(mut self, observer: Arc<dyn SendPacketObserver>) -> Self {
        self.send_packet_observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<RtpSender> {
        let config = self.config;
        check_max_payload_length(config.max_payload_length)?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let ssrc_allocator = self
            .ssrc_allocator
            .unwrap_or_else(|| Arc::new(SsrcDatabase::new()) as Arc<dyn SsrcAllocator>);

        let ssrc = ssrc_allocator.create_ssrc()?;
        let mut state = SendState::new(&config, ssrc);
        if config.rtx_mode != RtxMode::Off {
            state.rtx.set_ssrc(ssrc_allocator.create_ssrc()?);
        }

        let mut history = PacketHistory::new(clock.clone());
        history.set_storage_mode(config.storage_mode, config.storage_capacity);

        debug!(
            "rtp sender ssrc {ssrc}, {}",
            if config.audio { "audio" } else { "video" }
        );

        Ok(RtpSender {
            clock,
            transport: self.transport,
            paced_sender: self.paced_sender,
            ssrc_allocator,
            frame_count_observer: self.frame_count_observer,
            bitrate_observer: self.bitrate_observer,
            send_side_delay_observer: self.send_side_delay_observer,
            send_packet_observer: self.send_packet_observer,
            send: Mutex::new(state),
            history: Mutex::new(history),
        })
    }
}

fn check_max_payload_length(max_payload_length: usize) -> Result<()> {
    if !(MIN_MAX_PAYLOAD_LENGTH..=IP_PACKET_SIZE).contains(&max_payload_length) {
        return Err(Error::ErrMaxPayloadLengthOutOfRange(max_payload_length));
    }
    Ok(())
}

/// Send side of one RTP stream, audio or video.
///
/// All methods take `&self`; the sender can be shared between the encoder
/// thread, the pacer thread and the RTCP thread.
pub struct RtpSender {
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    paced_sender: Option<Arc<dyn PacedSender>>,
    ssrc_allocator: Arc<dyn SsrcAllocator>,
    frame_count_observer: Option<Arc<dyn FrameCountObserver>>,
    bitrate_observer: Option<Arc<dyn BitrateStatisticsObserver>>,
    send_side_delay_observer: Option<Arc<dyn SendSideDelayObserver>>,
    send_packet_observer: Option<Arc<dyn SendPacketObserver>>,

    send: Mutex<SendState>,
    history: Mutex<PacketHistory>,
}

impl RtpSender {
    pub fn is_audio(&self) -> Result<bool> {
        Ok(self.send.lock()?.is_audio())
    }

    // payload types

    /// Registers a payload type. `frequency` and `channels` only matter for
    /// audio; `rate` is the audio bitrate or the maximum video bitrate.
    pub fn register_payload(
        &self,
        name: &str,
        payload_type: u8,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<()> {
        let mut state = self.send.lock()?;
        state
            .payloads
            .register(name, payload_type, frequency, channels, rate)
    }

    pub fn deregister_payload(&self, payload_type: u8) -> Result<()> {
        let mut state = self.send.lock()?;
        state.payloads.deregister(payload_type)
    }

    pub fn set_keep_alive_payload_type(&self, payload_type: u8) -> Result<()> {
        let mut state = self.send.lock()?;
        if !state.is_audio() {
            return Err(Error::ErrAudioOnly);
        }
        state.payloads.set_keep_alive_payload_type(payload_type)
    }

    /// Uses `payloader` for frames of `codec`. Codecs without one use the
    /// generic payloader.
    pub fn register_payloader(
        &self,
        codec: VideoCodecType,
        payloader: Box<dyn Payloader>,
    ) -> Result<()> {
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Video(video) => {
                video.payloaders.insert(codec, payloader);
                Ok(())
            }
            MediaState::Audio(_) => Err(Error::ErrVideoOnly),
        }
    }

    // header extensions and stream identity

    pub fn register_rtp_header_extension(
        &self,
        extension_type: ExtensionType,
        id: u8,
    ) -> Result<()> {
        let mut state = self.send.lock()?;
        state.extensions.register(extension_type, id)
    }

    pub fn deregister_rtp_header_extension(&self, extension_type: ExtensionType) -> Result<()> {
        let mut state = self.send.lock()?;
        state.extensions.deregister(extension_type)
    }

    /// 12 bytes, plus CSRCs, plus the extension block.
    pub fn rtp_header_length(&self) -> Result<usize> {
        Ok(self.send.lock()?.rtp_header_length())
    }

    /// Room for codec payload in one packet once header, FEC and RTX
    /// overhead are taken off.
    pub fn max_data_payload_length(&self) -> Result<usize> {
        Ok(self.send.lock()?.max_data_payload_length())
    }

    pub fn set_max_payload_length(&self, max_payload_length: usize) -> Result<()> {
        check_max_payload_length(max_payload_length)?;
        self.send.lock()?.max_payload_length = max_payload_length;
        Ok(())
    }

    pub fn max_payload_length(&self) -> Result<usize> {
        Ok(self.send.lock()?.max_payload_length)
    }

    pub fn ssrc(&self) -> Result<u32> {
        Ok(self.send.lock()?.ssrc)
    }

    /// Pins the media SSRC. It is kept when the stream is stopped.
    pub fn set_ssrc(&self, ssrc: u32) -> Result<()> {
        let mut state = self.send.lock()?;
        if state.ssrc == ssrc && state.ssrc_forced {
            return Ok(());
        }
        state.ssrc_forced = true;
        self.ssrc_allocator.return_ssrc(state.ssrc)?;
        if !self.ssrc_allocator.register_ssrc(ssrc)? {
            warn!("ssrc {ssrc} is already in use by another stream");
        }
        state.ssrc = ssrc;
        if !state.sequence_forced {
            state.sequence = SequenceSpace::new_random();
        }
        Ok(())
    }

    /// Next media sequence number.
    pub fn sequence_number(&self) -> Result<u16> {
        Ok(self.send.lock()?.sequence.peek())
    }

    pub fn set_sequence_number(&self, sequence_number: u16) -> Result<()> {
        let mut state = self.send.lock()?;
        state.sequence_forced = true;
        state.sequence.set(sequence_number);
        Ok(())
    }

    pub fn start_timestamp(&self) -> Result<u32> {
        Ok(self.send.lock()?.start_timestamp)
    }

    /// Offset added to every RTP timestamp. Without `force` it only applies
    /// while the stream is stopped and no timestamp was forced before.
    pub fn set_start_timestamp(&self, timestamp: u32, force: bool) -> Result<()> {
        let mut state = self.send.lock()?;
        if force {
            state.start_timestamp_forced = true;
            state.start_timestamp = timestamp;
        } else if !state.start_timestamp_forced && !state.sending {
            state.start_timestamp = timestamp;
        }
        Ok(())
    }

    pub fn set_csrcs(&self, csrcs: &[u32]) -> Result<()> {
        if csrcs.len() > MAX_CSRCS {
            return Err(Error::ErrTooManyCsrcs(csrcs.len()));
        }
        self.send.lock()?.csrcs = csrcs.to_vec();
        Ok(())
    }

    /// RTP timestamp units written into the transmission time offset
    /// extension when a packet has no capture time to derive it from.
    pub fn set_transmission_time_offset(&self, offset: i32) -> Result<()> {
        if !(MIN_TRANSMISSION_OFFSET..=MAX_TRANSMISSION_OFFSET).contains(&offset) {
            return Err(Error::ErrTransmissionTimeOffsetOutOfRange(offset));
        }
        self.send.lock()?.transmission_time_offset = offset;
        Ok(())
    }

    /// Level, in -dBov, sent in the audio level extension.
    pub fn set_audio_level(&self, level_dbov: u8) -> Result<()> {
        if level_dbov > MAX_AUDIO_LEVEL_DBOV {
            return Err(Error::AudioLevelOverflow);
        }
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Audio(audio) => {
                audio.audio_level_dbov = level_dbov;
                Ok(())
            }
            MediaState::Video(_) => Err(Error::ErrAudioOnly),
        }
    }

    /// Sends audio with one redundant block in RFC 2198 RED packets of
    /// `payload_type`, for frames that come with a fragmentation descriptor.
    pub fn set_audio_red_payload_type(&self, payload_type: Option<u8>) -> Result<()> {
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Audio(audio) => {
                audio.red_payload_type = payload_type;
                Ok(())
            }
            MediaState::Video(_) => Err(Error::ErrAudioOnly),
        }
    }

    /// Stopping the stream picks a new SSRC and sequence number unless they
    /// were set explicitly.
    pub fn set_sending_status(&self, sending: bool) -> Result<()> {
        let mut state = self.send.lock()?;
        if state.sending == sending {
            return Ok(());
        }
        state.sending = sending;
        if !sending {
            if !state.ssrc_forced {
                self.ssrc_allocator.return_ssrc(state.ssrc)?;
                state.ssrc = self.ssrc_allocator.create_ssrc()?;
            }
            if !state.sequence_forced {
                state.sequence = SequenceSpace::new_random();
            }
            state.last_media = None;
        }
        debug!("sending {sending}, ssrc {}", state.ssrc);
        Ok(())
    }

    pub fn sending(&self) -> Result<bool> {
        Ok(self.send.lock()?.sending)
    }

    /// Muting media keeps the stream alive but drops frames.
    pub fn set_sending_media_status(&self, sending_media: bool) -> Result<()> {
        self.send.lock()?.sending_media = sending_media;
        Ok(())
    }

    pub fn sending_media(&self) -> Result<bool> {
        Ok(self.send.lock()?.sending_media)
    }

    pub fn set_target_send_bitrate_kbps(&self, target_bitrate_kbps: u32) -> Result<()> {
        self.send.lock()?.target_bitrate_kbps = target_bitrate_kbps;
        Ok(())
    }

    // retransmission and protection

    pub fn set_storage(&self, mode: StorageMode, number_to_store: usize) -> Result<()> {
        self.history
            .lock()?
            .set_storage_mode(mode, number_to_store);
        Ok(())
    }

    pub fn storage_mode(&self) -> Result<StorageMode> {
        Ok(self.history.lock()?.storage_mode())
    }

    pub fn set_rtt(&self, rtt_ms: i64) -> Result<()> {
        self.history.lock()?.set_rtt(rtt_ms);
        Ok(())
    }

    /// Configures the RTX stream. Without an explicit SSRC one is allocated
    /// the first time RTX is turned on.
    pub fn set_rtx(
        &self,
        mode: RtxMode,
        ssrc: Option<u32>,
        payload_types: &[(u8, u8)],
    ) -> Result<()> {
        let mut state = self.send.lock()?;
        state.rtx.set_mode(mode);
        match ssrc {
            Some(ssrc) => {
                if !self.ssrc_allocator.register_ssrc(ssrc)? {
                    warn!("rtx ssrc {ssrc} is already in use by another stream");
                }
                state.rtx.set_ssrc(ssrc);
            }
            None if mode != RtxMode::Off && state.rtx.ssrc().is_none() => {
                let ssrc = self.ssrc_allocator.create_ssrc()?;
                state.rtx.set_ssrc(ssrc);
            }
            None => {}
        }
        for (media_payload_type, rtx_payload_type) in payload_types {
            state
                .rtx
                .set_payload_type(*media_payload_type, *rtx_payload_type);
        }
        Ok(())
    }

    pub fn set_rtx_payload_type(&self, media_payload_type: u8, rtx_payload_type: u8) -> Result<()> {
        self.send
            .lock()?
            .rtx
            .set_payload_type(media_payload_type, rtx_payload_type);
        Ok(())
    }

    pub fn set_rtx_sequence_number(&self, sequence_number: u16) -> Result<()> {
        self.send.lock()?.rtx.set_sequence_number(sequence_number);
        Ok(())
    }

    pub fn rtx_mode(&self) -> Result<RtxMode> {
        Ok(self.send.lock()?.rtx.mode())
    }

    pub fn rtx_ssrc(&self) -> Result<Option<u32>> {
        Ok(self.send.lock()?.rtx.ssrc())
    }

    /// Turns ULPFEC on or off. FEC and media are then sent in RED packets of
    /// `red_payload_type`, FEC blocks carrying `fec_payload_type`.
    pub fn set_fec(&self, enabled: bool, red_payload_type: u8, fec_payload_type: u8) -> Result<()> {
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Video(video) => {
                video.set_fec(enabled, red_payload_type, fec_payload_type);
                Ok(())
            }
            MediaState::Audio(_) => Err(Error::ErrVideoOnly),
        }
    }

    pub fn fec_enabled(&self) -> Result<bool> {
        Ok(self.send.lock()?.fec_enabled())
    }

    pub fn set_fec_parameters(
        &self,
        delta_params: FecProtectionParams,
        key_params: FecProtectionParams,
    ) -> Result<()> {
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Video(video) => {
                video.fec.delta_params = delta_params;
                video.fec.key_params = key_params;
                Ok(())
            }
            MediaState::Audio(_) => Err(Error::ErrVideoOnly),
        }
    }

    /// Worst-case FEC bytes added per packet.
    pub fn fec_packet_overhead(&self) -> Result<usize> {
        let state = self.send.lock()?;
        Ok(if state.fec_enabled() {
            fec_packet_overhead(state.rtp_header_length())
        } else {
            0
        })
    }

    /// Temporal layers, one bit each, whose packets may be retransmitted.
    pub fn set_selective_retransmissions(&self, layers: u8) -> Result<()> {
        let mut state = self.send.lock()?;
        match &mut state.media {
            MediaState::Video(video) => {
                video.selective_retransmissions = layers;
                Ok(())
            }
            MediaState::Audio(_) => Err(Error::ErrVideoOnly),
        }
    }

    pub fn packet_state(&self, sequence_number: u16) -> Result<Option<PacketState>> {
        Ok(self.history.lock()?.get_state(sequence_number))
    }

    // sending

    /// Packetizes one encoded frame and queues it with the pacer, or sends it
    /// right away without one. Returns the bytes handed on.
    #[allow(clippy::too_many_arguments)]
    pub fn send_outgoing_data(
        &self,
        frame_type: FrameType,
        payload_type: u8,
        rtp_timestamp: u32,
        capture_time_ms: i64,
        payload: &Bytes,
        fragmentation: Option<&Fragmentation>,
        video_header: Option<&VideoTypeHeader>,
    ) -> Result<usize> {
        let now_ms = self.clock.time_in_milliseconds();
        let (output, ssrc) = {
            let mut state = self.send.lock()?;
            if !state.sending {
                return Err(Error::ErrSendingDisabled);
            }
            if !state.sending_media {
                return Ok(0);
            }
            let output = state.build_frame(
                frame_type,
                payload_type,
                rtp_timestamp,
                capture_time_ms,
                payload,
                fragmentation,
                video_header,
                self.paced_sender.is_some(),
                now_ms,
            )?;
            (output, state.ssrc)
        };

        match output {
            FrameOutput::Packets {
                packets,
                frame_counts,
            } => {
                let mut bytes_sent = 0;
                for outgoing in packets {
                    bytes_sent += self.send_to_network(outgoing)?;
                }
                if let (Some(observer), Some(frame_counts)) =
                    (&self.frame_count_observer, frame_counts)
                {
                    observer.frame_count_updated(frame_counts, ssrc);
                }
                Ok(bytes_sent)
            }
            FrameOutput::Padding { bytes, frame } => self.send_padding(bytes, Some(frame)),
            FrameOutput::Nothing => Ok(0),
        }
    }

    /// Called by the pacer when a queued packet is due. Returns false only if
    /// the transport failed; unknown packets count as handled.
    pub fn time_to_send_packet(
        &self,
        sequence_number: u16,
        capture_time_ms: i64,
        retransmission: bool,
    ) -> Result<bool> {
        if !self.send.lock()?.sending_media {
            return Ok(true);
        }
        let packet = self
            .history
            .lock()?
            .get_and_set_send_time(sequence_number);
        let Some(packet) = packet else {
            trace!("packet {sequence_number} not sent, not in history or not resendable");
            return Ok(true);
        };

        let packet = if retransmission {
            match self.rtx_wrap(packet)? {
                Some(packet) => packet,
                None => return Ok(true),
            }
        } else {
            packet
        };
        self.emit(packet, capture_time_ms, retransmission)
    }

    /// Called by the pacer to fill the link. Sends at least `bytes`, give or
    /// take one padding packet, when there is anything to pad with.
    pub fn time_to_send_padding(&self, bytes: usize) -> Result<usize> {
        if bytes == 0 {
            return Ok(0);
        }
        let redundant = {
            let state = self.send.lock()?;
            if !state.sending || !state.sending_media {
                return Ok(0);
            }
            state.rtx.redundant_payloads()
        };

        let mut bytes_sent = 0;
        if redundant {
            bytes_sent = self.send_redundant_payloads(bytes)?;
        }
        if bytes_sent < bytes {
            bytes_sent += self.send_padding(bytes - bytes_sent, None)?;
        }
        Ok(bytes_sent)
    }

    /// Resends the listed packets, limited by the NACK bitrate budget.
    pub fn on_received_nack(&self, sequence_numbers: &[u16], avg_rtt_ms: i64) -> Result<()> {
        let now_ms = self.clock.time_in_milliseconds();
        let (budget, target_bitrate_kbps, rtx) = {
            let state = self.send.lock()?;
            (
                state.nack.budget(now_ms, state.target_bitrate_kbps),
                state.target_bitrate_kbps,
                state.rtx.is_enabled(),
            )
        };
        if budget == Some(0) {
            trace!(
                "nack of {} packets ignored, nack bitrate exceeded",
                sequence_numbers.len()
            );
            return Ok(());
        }

        self.history
            .lock()?
            .set_rtt(NACK_RTT_OFFSET_MS + avg_rtt_ms.max(0));
        let cap = delay_bandwidth_cap(target_bitrate_kbps, avg_rtt_ms);

        let mut bytes_resent = 0;
        for sequence_number in sequence_numbers {
            if let Some(budget) = budget {
                let state = self.history.lock()?.get_state(*sequence_number);
                let Some(state) = state else {
                    continue;
                };
                let size = state.packet_size + if rtx { RTX_HEADER_LENGTH } else { 0 };
                if bytes_resent + size > budget {
                    trace!("nack budget of {budget} bytes used up");
                    break;
                }
            }

            match self.resend_packet(*sequence_number)? {
                Resend::Sent(bytes) => bytes_resent += bytes,
                Resend::Skipped => continue,
                Resend::Failed => break,
            }

            if cap.is_some_and(|cap| bytes_resent > cap) {
                break;
            }
        }

        self.send.lock()?.nack.record(bytes_resent, now_ms);
        Ok(())
    }

    /// Drops acknowledged packets from the history.
    pub fn on_received_ack(&self, sequence_numbers: &[u16]) -> Result<()> {
        self.history.lock()?.ack_cull(sequence_numbers);
        Ok(())
    }

    // statistics

    pub fn bitrate_sent(&self) -> Result<u32> {
        let now_ms = self.clock.time_in_milliseconds();
        Ok(self.send.lock()?.total_bitrate.rate_bps(now_ms))
    }

    pub fn nack_overhead_rate(&self) -> Result<u32> {
        let now_ms = self.clock.time_in_milliseconds();
        Ok(self.send.lock()?.nack_bitrate.rate_bps(now_ms))
    }

    pub fn data_counters(&self) -> Result<StreamDataCounters> {
        Ok(self.send.lock()?.counters)
    }

    pub fn frame_counts(&self) -> Result<FrameCounts> {
        Ok(self.send.lock()?.frame_counts)
    }

    /// Pushes the current send rate to the bitrate observer.
    pub fn process_bitrate(&self) -> Result<()> {
        let now_ms = self.clock.time_in_milliseconds();
        let (stats, ssrc) = {
            let mut state = self.send.lock()?;
            let stats = BitrateStatistics {
                bitrate_bps: state.total_bitrate.rate_bps(now_ms),
                packet_rate: state.packet_rate.total_bytes(now_ms) as u32,
                timestamp_ms: now_ms,
            };
            (stats, state.ssrc)
        };
        if let Some(observer) = &self.bitrate_observer {
            observer.notify(stats, ssrc);
        }
        Ok(())
    }

    fn send_to_network(&self, outgoing: OutgoingPacket) -> Result<usize> {
        let OutgoingPacket {
            packet,
            storage,
            priority,
        } = outgoing;
        let size = packet.size();
        let capture_time_ms = packet.capture_time_ms();

        if let Some(paced_sender) = &self.paced_sender {
            let mut history = self.history.lock()?;
            if storage != StorageType::DontStore
                && history.storage_mode() != StorageMode::Disabled
            {
                let ssrc = packet.ssrc();
                let sequence_number = packet.sequence_number();
                history.put(packet, storage, None);
                drop(history);
                paced_sender.insert_packet(
                    priority,
                    ssrc,
                    sequence_number,
                    capture_time_ms,
                    size,
                    false,
                );
                return Ok(size);
            }
        }

        let now_ms = self.clock.time_in_milliseconds();
        self.history
            .lock()?
            .put(packet.clone(), storage, Some(now_ms));
        if self.emit(packet, capture_time_ms, false)? {
            Ok(size)
        } else {
            Ok(0)
        }
    }

    fn resend_packet(&self, sequence_number: u16) -> Result<Resend> {
        if let Some(paced_sender) = &self.paced_sender {
            let rtx = self.send.lock()?.rtx.is_enabled();
            let state = self
                .history
                .lock()?
                .mark_for_paced_resend(sequence_number);
            let Some(state) = state else {
                return Ok(Resend::Skipped);
            };
            let size = state.packet_size + if rtx { RTX_HEADER_LENGTH } else { 0 };
            paced_sender.insert_packet(
                PacketPriority::Normal,
                state.ssrc,
                sequence_number,
                state.capture_time_ms,
                size,
                true,
            );
            return Ok(Resend::Sent(size));
        }

        let packet = self.history.lock()?.get_for_resend(sequence_number);
        let Some(packet) = packet else {
            trace!("packet {sequence_number} not resent");
            return Ok(Resend::Skipped);
        };
        let Some(packet) = self.rtx_wrap(packet)? else {
            return Ok(Resend::Skipped);
        };
        let size = packet.size();
        let capture_time_ms = packet.capture_time_ms();
        if self.emit(packet, capture_time_ms, true)? {
            Ok(Resend::Sent(size))
        } else {
            Ok(Resend::Failed)
        }
    }

    fn rtx_wrap(&self, packet: RtpPacketToSend) -> Result<Option<RtpPacketToSend>> {
        let mut state = self.send.lock()?;
        if state.rtx.is_enabled() {
            Ok(state.rtx.encapsulate(&packet))
        } else {
            Ok(Some(packet))
        }
    }

    /// Sends earlier media packets over RTX as padding.
    fn send_redundant_payloads(&self, bytes: usize) -> Result<usize> {
        let mut bytes_sent = 0;
        while bytes_sent < bytes {
            let remaining = bytes - bytes_sent;
            if remaining < MIN_PADDING_BYTES {
                break;
            }
            let max_size = (remaining + MAX_PADDING_LENGTH)
                .saturating_sub(RTX_HEADER_LENGTH);
            let candidate = self.history.lock()?.padding_candidate_within(max_size);
            let Some(candidate) = candidate else {
                break;
            };
            let Some(packet) = self.rtx_wrap(candidate)? else {
                break;
            };
            let size = packet.size();
            let capture_time_ms = packet.capture_time_ms();
            if !self.emit(packet, capture_time_ms, false)? {
                break;
            }
            bytes_sent += size;
        }
        Ok(bytes_sent)
    }

    fn send_padding(&self, bytes: usize, frame: Option<PaddingFrame>) -> Result<usize> {
        let now_ms = self.clock.time_in_milliseconds();
        let packets = self.send.lock()?.plan_padding(bytes, frame, now_ms)?;

        let mut bytes_sent = 0;
        for packet in packets {
            let padding = packet.padding_size() as usize;
            let capture_time_ms = packet.capture_time_ms();
            if !self.emit(packet, capture_time_ms, false)? {
                break;
            }
            bytes_sent += padding;
        }
        Ok(bytes_sent)
    }

    /// Stamps, sends and accounts one packet. Returns false if the transport
    /// refused it.
    fn emit(
        &self,
        mut packet: RtpPacketToSend,
        capture_time_ms: i64,
        retransmission: bool,
    ) -> Result<bool> {
        let now_ms = self.clock.time_in_milliseconds();
        let (raw, transport_sequence) = {
            let mut state = self.send.lock()?;
            let transport_sequence = state.prepare_for_send(&mut packet, capture_time_ms, now_ms)?;
            (packet.marshal()?, transport_sequence)
        };

        if let Err(err) = self.transport.send_rtp(&raw) {
            warn!(
                "failed to send rtp packet ssrc {} seq {}: {err}",
                packet.ssrc(),
                packet.sequence_number()
            );
            return Ok(false);
        }

        let delays = self
            .send
            .lock()?
            .update_send_stats(&packet, retransmission, now_ms);

        if let (Some(observer), Some(transport_sequence)) =
            (&self.send_packet_observer, transport_sequence)
        {
            observer.on_send_packet(transport_sequence, capture_time_ms, packet.ssrc());
        }
        if let (Some(observer), Some((avg_delay_ms, max_delay_ms))) =
            (&self.send_side_delay_observer, delays)
        {
            observer.send_side_delay_updated(avg_delay_ms, max_delay_ms, packet.ssrc());
        }
        Ok(true)
    }
}
