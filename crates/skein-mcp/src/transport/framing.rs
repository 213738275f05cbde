//! Delimiter framing over a continuous byte stream

use bytes::{Buf, Bytes, BytesMut};

/// Framing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("frame delimiter must not be empty")]
    EmptyDelimiter,

    #[error("unterminated frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Streaming boundary detector.
///
/// Bytes are appended as they arrive; each delimiter closes off one frame and
/// whatever follows stays buffered for the next read.
#[derive(Debug)]
pub struct Framer {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no delimiter
    scanned: usize,
    max_frame_size: usize,
}

impl Framer {
    pub fn new(delimiter: impl Into<Vec<u8>>, max_frame_size: usize) -> Result<Self, FramingError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(FramingError::EmptyDelimiter);
        }
        Ok(Self {
            delimiter,
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            max_frame_size,
        })
    }

    /// Feed a chunk and collect every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Bytes, FramingError>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.find_delimiter() {
            let frame = self.buffer.split_to(pos).freeze();
            self.buffer.advance(self.delimiter.len());
            self.scanned = 0;
            frames.push(Ok(frame));
        }

        if self.buffer.len() > self.max_frame_size {
            frames.push(Err(FramingError::FrameTooLarge {
                size: self.buffer.len(),
                max: self.max_frame_size,
            }));
            self.buffer.clear();
            self.scanned = 0;
        }

        frames
    }

    fn find_delimiter(&mut self) -> Option<usize> {
        let needle = self.delimiter.len();
        if self.buffer.len() < needle {
            return None;
        }
        // A delimiter may straddle the previous chunk boundary.
        let start = self.scanned.saturating_sub(needle - 1);
        let found = self.buffer[start..]
            .windows(needle)
            .position(|window| window == self.delimiter.as_slice())
            .map(|offset| start + offset);
        if found.is_none() {
            self.scanned = self.buffer.len();
        }
        found
    }

    /// Bytes held back waiting for a delimiter
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }
}

/// Append the delimiter to a payload
pub fn frame(payload: &[u8], delimiter: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + delimiter.len());
    out.extend_from_slice(payload);
    out.extend_from_slice(delimiter);
    out
}

/// Split a complete byte string into frames, dropping any unterminated tail
pub fn deframe(bytes: &[u8], delimiter: &[u8]) -> Result<Vec<Bytes>, FramingError> {
    let mut framer = Framer::new(delimiter, usize::MAX)?;
    framer.push(bytes).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::McpRequest;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_two_messages_in_one_read() {
        let mut framer = Framer::new("\n", 1024).unwrap();
        let frames: Vec<Bytes> = framer
            .push(b"{\"a\":1}\n{\"b\":2}\n")
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"{\"a\":1}");
        assert_eq!(&frames[1][..], b"{\"b\":2}");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_partial_reads_are_retained() {
        let mut framer = Framer::new("\r\n", 1024).unwrap();
        assert!(framer.push(b"{\"id\":").is_empty());
        assert!(framer.push(b"1}\r").is_empty());

        let frames = framer.push(b"\n{\"id\"");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].as_ref().unwrap()[..], b"{\"id\":1}");
        assert_eq!(framer.buffered(), 5);
    }

    #[test]
    fn test_unterminated_overflow_is_reported() {
        let mut framer = Framer::new("\n", 4).unwrap();
        let frames = framer.push(b"0123456789");
        assert_eq!(frames, vec![Err(FramingError::FrameTooLarge { size: 10, max: 4 })]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        assert_eq!(Framer::new("", 10).unwrap_err(), FramingError::EmptyDelimiter);
    }

    proptest! {
        #[test]
        fn prop_frame_deframe_round_trip(
            method in "[a-z]{1,12}(/[a-z]{1,12})?",
            text in "[a-zA-Z0-9 \t\n]{0,64}",
            delimiter in prop_oneof![Just("\n".to_string()), Just("\r\n".to_string()), Just("\u{0}".to_string())],
        ) {
            let request = McpRequest::with_id("p-1", method, Some(json!({ "text": text })));
            let encoded = serde_json::to_vec(&request).unwrap();
            prop_assume!(!encoded.windows(delimiter.len()).any(|w| w == delimiter.as_bytes()));

            let frames = deframe(&frame(&encoded, delimiter.as_bytes()), delimiter.as_bytes()).unwrap();
            prop_assert_eq!(frames.len(), 1);
            let decoded: McpRequest = serde_json::from_slice(&frames[0]).unwrap();
            prop_assert_eq!(decoded, request);
        }
    }
}
