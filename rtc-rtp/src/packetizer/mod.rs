//! Payloaders turn one encoded frame into RTP payloads.
//!
//! The sender never looks inside a codec bitstream. It hands the frame to a
//! [`Payloader`] and gets back ready-made payloads, each no larger than the
//! space left after the RTP header and any FEC/RTX overhead.

use bytes::Bytes;
use shared::error::Result;
use std::fmt;

pub mod generic;

pub use generic::GenericPayloader;

/// One contiguous piece of a frame as laid out by the encoder, such as an
/// H.264 NAL unit or one block of a redundant audio frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub length: usize,
    /// Age of this block relative to the frame timestamp, in RTP units.
    pub time_diff: u16,
    pub payload_type: u8,
}

/// Encoder-supplied fragmentation of a frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fragmentation {
    pub fragments: Vec<Fragment>,
}

impl Fragmentation {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self { fragments }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Slice of `frame` covered by fragment `index`, if it lies inside the frame.
    pub fn fragment_data(&self, frame: &Bytes, index: usize) -> Option<Bytes> {
        let fragment = self.fragments.get(index)?;
        let end = fragment.offset.checked_add(fragment.length)?;
        if end > frame.len() {
            return None;
        }
        Some(frame.slice(fragment.offset..end))
    }
}

/// What a payloader may know about the frame besides its bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameInfo<'a> {
    pub key_frame: bool,
    pub fragmentation: Option<&'a Fragmentation>,
}

/// Payloader payloads a byte array for use as rtp.Packet payloads
pub trait Payloader: fmt::Debug + Send {
    /// Splits `frame` into payloads of at most `mtu` bytes.
    fn payload(&mut self, mtu: usize, frame: &Bytes, info: &FrameInfo<'_>) -> Result<Vec<Bytes>>;
}
