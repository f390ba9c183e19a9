use prost::bytes::{Buf, Bytes, BytesMut};

use crate::error::DecodeError;

const MAX_VARINT_LEN: usize = 10;

/// Default upper bound for a single frame body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Reads a varint length prefix without consuming it.
///
/// `Ok(None)` means the prefix is not complete yet.
fn peek_length_prefix(buf: &[u8]) -> Result<Option<(u64, usize)>, DecodeError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        Err(DecodeError::malformed("length prefix longer than 10 bytes"))
    } else {
        Ok(None)
    }
}

/// Splits a complete buffer into frame bodies.
///
/// A trailing frame that declares more bytes than remain is reported as
/// truncated; frames before it are still returned.
pub fn split_frames(buf: &[u8]) -> Vec<Result<&[u8], DecodeError>> {
    let mut frames = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        match peek_length_prefix(rest) {
            Ok(Some((declared, prefix))) => {
                let body = &rest[prefix..];
                if declared > body.len() as u64 {
                    frames.push(Err(DecodeError::TruncatedMessage {
                        declared,
                        remaining: body.len(),
                    }));
                    break;
                }
                let (frame, tail) = body.split_at(declared as usize);
                frames.push(Ok(frame));
                rest = tail;
            }
            Ok(None) => {
                frames.push(Err(DecodeError::malformed("buffer ends inside a length prefix")));
                break;
            }
            Err(err) => {
                frames.push(Err(err));
                break;
            }
        }
    }
    frames
}

/// Incremental frame splitter for a byte stream.
///
/// Bytes are appended as they arrive; complete frames come out in order.
/// A frame whose declared length exceeds `max_frame_len` is reported once
/// and its bytes are skipped as they arrive, so the stream stays in sync.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    skip: u64,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
            skip: 0,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Direct access for readers that fill the buffer in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Option<Result<Bytes, DecodeError>> {
        self.discard_skipped();
        if self.skip > 0 {
            return None;
        }

        match peek_length_prefix(&self.buf) {
            Ok(None) => None,
            Err(err) => {
                // No way to find the next boundary after a broken prefix.
                self.buf.clear();
                Some(Err(err))
            }
            Ok(Some((declared, prefix))) => {
                if declared > self.max_frame_len as u64 {
                    self.skip = (prefix as u64).saturating_add(declared);
                    self.discard_skipped();
                    return Some(Err(DecodeError::malformed(format!(
                        "frame of {declared} bytes exceeds limit of {}",
                        self.max_frame_len
                    ))));
                }
                let needed = prefix + declared as usize;
                if self.buf.len() < needed {
                    self.buf.reserve(needed - self.buf.len());
                    return None;
                }
                self.buf.advance(prefix);
                Some(Ok(self.buf.split_to(declared as usize).freeze()))
            }
        }
    }

    /// Called once the stream has ended. Leftover bytes are a frame that
    /// never completed.
    pub fn finish(&mut self) -> Option<DecodeError> {
        self.discard_skipped();
        if self.buf.is_empty() {
            return None;
        }
        let err = match peek_length_prefix(&self.buf) {
            Ok(Some((declared, prefix))) => DecodeError::TruncatedMessage {
                declared,
                remaining: self.buf.len() - prefix,
            },
            Ok(None) => DecodeError::malformed("stream ended inside a length prefix"),
            Err(err) => err,
        };
        self.buf.clear();
        Some(err)
    }

    fn discard_skipped(&mut self) {
        if self.skip == 0 {
            return;
        }
        let n = self.skip.min(self.buf.len() as u64);
        self.buf.advance(n as usize);
        self.skip -= n;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::encode_frame,
        types::{Record, Span, SpanId},
    };

    fn frame(id: u64) -> Vec<u8> {
        encode_frame(&[Record::Span(Span::new(SpanId(id)))])
    }

    #[test]
    fn split_reports_truncated_tail() {
        let mut buf = frame(1);
        buf.extend(frame(2));
        let mut partial = frame(3);
        partial.truncate(partial.len() - 1);
        buf.extend(&partial);

        let frames = split_frames(&buf);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_ok());
        assert!(frames[1].is_ok());
        assert!(matches!(
            frames[2],
            Err(DecodeError::TruncatedMessage { .. })
        ));
    }

    #[test]
    fn streaming_waits_for_complete_frames() {
        let bytes = [frame(1), frame(300)].concat();
        let mut decoder = FrameDecoder::default();

        let mut out = Vec::new();
        for byte in &bytes {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame() {
                out.push(frame.unwrap());
            }
        }

        assert_eq!(out.len(), 2);
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn oversized_frame_is_skipped_in_stream() {
        let mut decoder = FrameDecoder::new(4);
        let mut big = Vec::new();
        prost::encoding::encode_varint(6, &mut big);
        big.extend_from_slice(&[9; 6]);

        decoder.extend(&big[..3]);
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(DecodeError::MalformedMessage { .. }))
        ));
        decoder.extend(&big[3..]);
        decoder.extend(&[2, 0x08, 0x01]);

        let next = decoder.next_frame().unwrap().unwrap();
        assert_eq!(&next[..], &[0x08, 0x01]);
    }

    #[test]
    fn maximal_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new(1024);
        let mut prefix = Vec::new();
        prost::encoding::encode_varint(u64::MAX, &mut prefix);
        assert_eq!(prefix.len(), 10);
        decoder.extend(&prefix);

        assert!(matches!(
            decoder.next_frame(),
            Some(Err(DecodeError::MalformedMessage { .. }))
        ));
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn finish_reports_leftovers() {
        let mut decoder = FrameDecoder::default();
        let f = frame(5);
        decoder.extend(&f[..f.len() - 2]);
        assert!(decoder.next_frame().is_none());
        assert!(matches!(
            decoder.finish(),
            Some(DecodeError::TruncatedMessage { .. })
        ));
    }
}
