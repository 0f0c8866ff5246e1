//! Serialises frames back into a `multipart/x-mixed-replace` body.
//!
//! This is the inverse of the parser: hosts that re-serve frames to browsers
//! feed dequeued buffers through it, and tests use it to build streams.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
    content_length: bool,
    started: bool,
}

impl MultipartEncoder {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            content_length: true,
            started: false,
        }
    }

    /// Omit `Content-Length`; readers must find the next delimiter instead.
    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    /// Value for the response `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace;boundary={}", self.boundary)
    }

    /// One part: delimiter, headers, blank line, frame. Every part after the
    /// first is preceded by the CRLF that ends the previous body.
    pub fn encode_part(&mut self, frame: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(frame.len() + self.boundary.len() + 80);
        if self.started {
            out.put_slice(b"\r\n");
        }
        self.started = true;

        out.put_slice(b"--");
        out.put_slice(self.boundary.as_bytes());
        out.put_slice(b"\r\nContent-Type: image/jpeg\r\n");
        if self.content_length {
            out.put_slice(format!("Content-Length: {}\r\n", frame.len()).as_bytes());
        }
        out.put_slice(b"\r\n");
        out.put_slice(frame);
        out.freeze()
    }

    /// Closing delimiter that ends the body.
    pub fn encode_close(&self) -> Bytes {
        Bytes::from(format!("\r\n--{}--\r\n", self.boundary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_layout() {
        let mut enc = MultipartEncoder::new("herebedragons");
        assert_eq!(
            enc.content_type(),
            "multipart/x-mixed-replace;boundary=herebedragons"
        );
        assert_eq!(
            &enc.encode_part(b"AB")[..],
            b"--herebedragons\r\nContent-Type: image/jpeg\r\nContent-Length: 2\r\n\r\nAB"
        );
        assert!(enc.encode_part(b"C").starts_with(b"\r\n--herebedragons\r\n"));
    }

    #[test]
    fn delimited_layout() {
        let mut enc = MultipartEncoder::new("b").without_content_length();
        assert_eq!(
            &enc.encode_part(b"AB")[..],
            b"--b\r\nContent-Type: image/jpeg\r\n\r\nAB"
        );
        assert_eq!(&enc.encode_close()[..], b"\r\n--b--\r\n");
    }
}
