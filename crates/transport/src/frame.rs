//! Frames and the codec seam
//!
//! A [`Frame`] is the opaque unit this layer moves. Turning frames into the
//! bytes a device expects (and back) belongs to a [`FrameCodec`]; the
//! transport never looks inside the payload.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// An opaque link-layer frame (a CEMI frame in its encoded form)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Create a frame from its payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload as a cheaply cloneable buffer
    pub fn payload(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the frame and return its payload
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]({})", self.data.len(), self)
    }
}

/// Codec failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Bytes read from the device could not be turned into a frame
    #[error("Malformed frame data: {0}")]
    Malformed(String),

    /// The frame cannot be represented on the device channel
    #[error("Frame not encodable: {0}")]
    Unencodable(String),
}

/// Encodes outbound frames and decodes inbound device reads
///
/// `decode` returns `Ok(None)` when a read did not complete a frame.
pub trait FrameCodec: Send + Sync + 'static {
    fn encode(&self, frame: &Frame) -> Result<Bytes, CodecError>;
    fn decode(&self, data: &[u8]) -> Result<Option<Frame>, CodecError>;
}

/// Codec that hands bytes through unchanged
///
/// Empty reads decode to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrameCodec;

impl FrameCodec for RawFrameCodec {
    fn encode(&self, frame: &Frame) -> Result<Bytes, CodecError> {
        Ok(frame.payload())
    }

    fn decode(&self, data: &[u8]) -> Result<Option<Frame>, CodecError> {
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(Bytes::copy_from_slice(data))))
    }
}
