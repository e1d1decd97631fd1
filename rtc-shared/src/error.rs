#![allow(dead_code)]

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer: short")]
    ErrBufferShort,
    #[error("packet too big")]
    ErrPacketTooBig,
    #[error("not found")]
    ErrNotFound,
    #[error("mutex poison: {0}")]
    PoisonError(String),

    //RTP errors
    #[error("RTP header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("RTP header size insufficient for extension")]
    ErrHeaderSizeInsufficientForExtension,
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("extension not enabled")]
    ErrHeaderExtensionsNotEnabled,
    #[error("extension not found")]
    ErrHeaderExtensionNotFound,
    #[error("header extension id must be between 1 and 14 for RFC 5285 extensions")]
    ErrRfc8285oneByteHeaderIdrange,
    #[error("header extension payload must be 16bytes or less for RFC 5285 one byte extensions")]
    ErrRfc8285oneByteHeaderSize,
    #[error("header extension id must be 0 for none RFC 5285 extensions")]
    ErrRfc3550headerIdrange,
    #[error("extension_payload must be in 32-bit words")]
    HeaderExtensionPayloadNot32BitWords,
    #[error("packet is too short to be RTP packet")]
    ErrTooShortRtp,
    #[error("Invalid packet version")]
    BadVersion,
    #[error("Invalid padding value")]
    WrongPadding,
    #[error("too many CSRCs: {0}")]
    ErrTooManyCsrcs(usize),
    #[error("audio level overflow")]
    AudioLevelOverflow,
    #[error("transmission time offset {0} does not fit in 24 bits")]
    ErrTransmissionTimeOffsetOutOfRange(i32),
    #[error("payload is not large enough")]
    PayloadIsNotLargeEnough,

    //Header extension registry errors
    #[error("header extension id {0} is reserved")]
    ErrInvalidExtensionId(u8),
    #[error("header extension id {0} is already registered for another extension")]
    ErrExtensionIdConflict(u8),
    #[error("header extension is not registered")]
    ErrExtensionNotFound,

    //FEC errors
    #[error("too many media packets for FEC: {0}")]
    ErrFecTooManyMediaPackets(usize),
    #[error("FEC packet is malformed")]
    ErrFecMalformedPacket,

    //RTP sender errors
    #[error("payload type {0} is not registered")]
    ErrPayloadTypeUnregistered(u8),
    #[error("payload type {0} is already registered with different parameters")]
    ErrPayloadTypeConflict(u8),
    #[error("payload type {0} is not found")]
    ErrPayloadTypeNotFound(u8),
    #[error("payload type {0} is reserved for keep-alive")]
    ErrKeepAlivePayloadType(u8),
    #[error("payload type {0} does not match the frame type")]
    ErrFrameTypeMismatch(u8),
    #[error("max payload length {0} out of range")]
    ErrMaxPayloadLengthOutOfRange(usize),
    #[error("payload type {0} is out of range")]
    ErrInvalidPayloadType(u8),
    #[error("sending is disabled")]
    ErrSendingDisabled,
    #[error("only available on audio senders")]
    ErrAudioOnly,
    #[error("only available on video senders")]
    ErrVideoOnly,

    #[error("{0}")]
    Io(#[source] IoError),

    //Other Errors
    #[error("Other RTP Err: {0}")]
    OtherRtpErr(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}
