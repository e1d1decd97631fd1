//! RTP header extensions and the per-stream id registry.
//!
//! [`ExtensionMap`] binds each [`ExtensionType`] to the one-byte id negotiated
//! for the stream. Every element written with the one-byte profile occupies a
//! whole number of 32-bit words, so the size of the extension block follows
//! from the registry alone.

use serde::{Deserialize, Serialize};
use shared::error::{Error, Result};
use std::collections::BTreeMap;

pub mod abs_send_time_extension;
pub mod audio_level_extension;
pub mod transmission_offset_extension;
pub mod transport_cc_extension;
pub mod video_orientation_extension;

pub use abs_send_time_extension::AbsSendTimeExtension;
pub use audio_level_extension::AudioLevelExtension;
pub use transmission_offset_extension::TransmissionOffsetExtension;
pub use transport_cc_extension::TransportCcExtension;
pub use video_orientation_extension::VideoOrientationExtension;

/// Size of the `0xBEDE` profile word plus the length field.
pub const EXTENSION_BLOCK_HEADER_LENGTH: usize = 4;

/// Header extensions the sender knows how to fill in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtensionType {
    TransmissionTimeOffset,
    AbsoluteSendTime,
    AudioLevel,
    VideoOrientation,
    TransportSequenceNumber,
}

impl ExtensionType {
    /// Payload size of the element, without the one-byte id/length header.
    pub fn value_size(&self) -> usize {
        match self {
            ExtensionType::TransmissionTimeOffset => 3,
            ExtensionType::AbsoluteSendTime => 3,
            ExtensionType::AudioLevel => 1,
            ExtensionType::VideoOrientation => 1,
            ExtensionType::TransportSequenceNumber => 2,
        }
    }

    /// Size of the element in the block, rounded up to a 32-bit boundary.
    pub fn element_size(&self) -> usize {
        (1 + self.value_size()).div_ceil(4) * 4
    }

    pub fn uri(&self) -> &'static str {
        match self {
            ExtensionType::TransmissionTimeOffset => "urn:ietf:params:rtp-hdrext:toffset",
            ExtensionType::AbsoluteSendTime => {
                "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"
            }
            ExtensionType::AudioLevel => "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
            ExtensionType::VideoOrientation => "urn:3gpp:video-orientation",
            ExtensionType::TransportSequenceNumber => {
                "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01"
            }
        }
    }
}

/// Registry of header extension ids for one stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtensionMap {
    by_id: BTreeMap<u8, ExtensionType>,
}

impl ExtensionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `extension_type` to `id`.
    ///
    /// Ids 0 and 15 are reserved by RFC 5285. Re-registering the same pair is
    /// a no-op; binding an id or a type that is already taken by something
    /// else fails.
    pub fn register(&mut self, extension_type: ExtensionType, id: u8) -> Result<()> {
        if id == 0 || id >= 15 {
            return Err(Error::ErrInvalidExtensionId(id));
        }
        if let Some(existing) = self.by_id.get(&id) {
            return if *existing == extension_type {
                Ok(())
            } else {
                Err(Error::ErrExtensionIdConflict(id))
            };
        }
        if let Some(other_id) = self.id(extension_type) {
            return Err(Error::ErrExtensionIdConflict(other_id));
        }
        self.by_id.insert(id, extension_type);
        Ok(())
    }

    pub fn deregister(&mut self, extension_type: ExtensionType) -> Result<()> {
        let id = self
            .id(extension_type)
            .ok_or(Error::ErrExtensionNotFound)?;
        self.by_id.remove(&id);
        Ok(())
    }

    pub fn id(&self, extension_type: ExtensionType) -> Option<u8> {
        self.by_id
            .iter()
            .find(|(_, t)| **t == extension_type)
            .map(|(id, _)| *id)
    }

    pub fn extension_type(&self, id: u8) -> Option<ExtensionType> {
        self.by_id.get(&id).copied()
    }

    pub fn is_registered(&self, extension_type: ExtensionType) -> bool {
        self.id(extension_type).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Registered extensions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, ExtensionType)> + '_ {
        self.by_id.iter().map(|(id, t)| (*id, *t))
    }

    /// Bytes the extension block adds to every header, 0 if nothing is registered.
    pub fn total_length(&self) -> usize {
        if self.by_id.is_empty() {
            return 0;
        }
        EXTENSION_BLOCK_HEADER_LENGTH
            + self
                .by_id
                .values()
                .map(|t| t.element_size())
                .sum::<usize>()
    }
}
