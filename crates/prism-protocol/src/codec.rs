//! Length-prefixed JSON frame codec.
//!
//! Wire format: four big-endian length octets, followed by that many octets
//! of UTF-8 JSON. [`FrameCodec`] holds the per-connection receive buffer and
//! is fed arbitrarily-chunked bytes from the socket.

use serde::Serialize;
use serde_json::Value;

const LENGTH_PREFIX_LEN: usize = 4;

/// Default cap on a single frame's JSON payload.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_536;
/// Default cap on the codec's internal receive buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_048_576;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds max_message_size of {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("receive buffer of {size} bytes exceeds max_buffer_size of {max}")]
    BufferOverflow { size: usize, max: usize },
    #[error("failed to decode frame payload: {0}")]
    DecodeError(String),
}

/// Result of feeding bytes into the decoder: zero or more fully-framed
/// messages, plus an optional fatal error.
///
/// A fatal error never discards messages that were already fully decoded
/// earlier in the same call -- those are still returned in `messages`. The
/// caller is expected to process `messages` and then, if `error` is set,
/// respond with one error frame and tear the connection down (§4.6).
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub messages: Vec<Value>,
    pub error: Option<FrameError>,
}

/// Encode `message` as a length-prefixed JSON frame.
///
/// Fails if the serialized payload exceeds `max_message_size`.
pub fn encode<T: Serialize>(message: &T, max_message_size: usize) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(message)
        .map_err(|e| FrameError::DecodeError(format!("encode failed: {e}")))?;
    if json.len() > max_message_size {
        return Err(FrameError::FrameTooLarge {
            size: json.len(),
            max: max_message_size,
        });
    }
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + json.len());
    framed.extend_from_slice(&(json.len() as u32).to_be_bytes());
    framed.extend_from_slice(&json);
    Ok(framed)
}

/// Streaming decoder holding one connection's partial-frame buffer.
pub struct FrameCodec {
    max_message_size: usize,
    max_buffer_size: usize,
    buffer: Vec<u8>,
}

impl FrameCodec {
    pub fn new(max_message_size: usize, max_buffer_size: usize) -> Self {
        FrameCodec {
            max_message_size,
            max_buffer_size,
            buffer: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Bytes currently buffered, awaiting completion of a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially-buffered frame. Call on connection teardown.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed newly-read bytes and extract every complete frame they produce.
    pub fn decode(&mut self, data: &[u8]) -> DecodeOutcome {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > self.max_buffer_size {
            let error = FrameError::BufferOverflow {
                size: self.buffer.len(),
                max: self.max_buffer_size,
            };
            self.buffer.clear();
            return DecodeOutcome {
                messages: Vec::new(),
                error: Some(error),
            };
        }

        let mut messages = Vec::new();

        loop {
            if self.buffer.len() < LENGTH_PREFIX_LEN {
                break;
            }
            let len_bytes: [u8; LENGTH_PREFIX_LEN] = self.buffer[..LENGTH_PREFIX_LEN]
                .try_into()
                .expect("slice is exactly 4 bytes");
            let frame_len = u32::from_be_bytes(len_bytes) as usize;

            if frame_len > self.max_message_size {
                self.buffer.clear();
                return DecodeOutcome {
                    messages,
                    error: Some(FrameError::FrameTooLarge {
                        size: frame_len,
                        max: self.max_message_size,
                    }),
                };
            }

            let total_len = LENGTH_PREFIX_LEN + frame_len;
            if self.buffer.len() < total_len {
                break;
            }

            let payload = &self.buffer[LENGTH_PREFIX_LEN..total_len];
            let decoded = std::str::from_utf8(payload)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<Value>(s).map_err(|e| e.to_string()));

            match decoded {
                Ok(value) => {
                    messages.push(value);
                    self.buffer.drain(..total_len);
                }
                Err(e) => {
                    self.buffer.drain(..total_len);
                    return DecodeOutcome {
                        messages,
                        error: Some(FrameError::DecodeError(e)),
                    };
                }
            }
        }

        DecodeOutcome {
            messages,
            error: None,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_defaults()
    }
}
