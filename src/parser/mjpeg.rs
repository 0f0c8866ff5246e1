//! Incremental `multipart/x-mixed-replace` parser.
//!
//! Bytes arrive in whatever pieces the transport hands over. The parser keeps
//! its position in the part structure between calls and writes body bytes
//! straight into the frame buffer it borrowed from the sink.

use std::time::SystemTime;

use tracing::trace;

use super::boundary::Boundary;
use super::headers::{is_jpeg, parse_header_block, PartHeaders};
use super::scanner::{DelimiterScanner, Scan};
use crate::buffer::Buffer;
use crate::error::ProtocolError;

/// Upper bound on delimiter-line bytes that end up behind a delimited body:
/// CRLF plus the two extra dashes of the `----token` form.
const MAX_TRAILER: usize = 4;

/// Where parsed frames go, and where their buffers come from.
pub trait FrameSink {
    /// Take a free buffer for a new part. `None` means the part is dropped.
    fn acquire(&mut self) -> Option<Buffer>;

    /// A complete frame.
    fn publish(&mut self, frame: Buffer);

    /// Return a buffer whose frame will not be published.
    fn recycle(&mut self, buffer: Buffer);

    /// A part was consumed without producing a frame.
    fn discard(&mut self, reason: Discard);
}

/// Why a part did not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// No free buffer when the part started.
    Overrun,
    /// Body larger than the buffer.
    Oversized,
    /// Zero-length body.
    Empty,
}

impl Discard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Discard::Overrun => "overrun",
            Discard::Oversized => "oversized",
            Discard::Empty => "empty",
        }
    }
}

/// Parser limits.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    pub max_header_len: usize,
    /// Reject parts that declare a Content-Type other than `image/jpeg`.
    pub require_jpeg: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_header_len: 8 * 1024,
            require_jpeg: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    AwaitingBoundary,
    ReadingPartHeaders,
    ReadingPartBody,
}

struct Part {
    /// Declared Content-Length, or `None` to read up to the next delimiter.
    expected: Option<usize>,
    received: usize,
    buffer: Option<Buffer>,
    fate: Option<Discard>,
    timestamp: SystemTime,
    /// Last bytes of the body, to strip the delimiter line in delimited mode.
    tail: [u8; MAX_TRAILER],
}

impl Part {
    fn write(&mut self, data: &[u8]) {
        if let Some(buf) = self.buffer.as_mut() {
            buf.write_at(self.received, data);
        }
        self.received += data.len();

        if data.len() >= MAX_TRAILER {
            self.tail.copy_from_slice(&data[data.len() - MAX_TRAILER..]);
        } else {
            self.tail.rotate_left(data.len());
            self.tail[MAX_TRAILER - data.len()..].copy_from_slice(data);
        }
    }

    /// Bytes at the end of a delimited body that belong to the delimiter line.
    fn trailer_len(&self, dashed: bool) -> usize {
        let tail = &self.tail[MAX_TRAILER - self.received.min(MAX_TRAILER)..];
        let mut end = tail.len();

        if dashed {
            for _ in 0..2 {
                if end > 0 && tail[end - 1] == b'-' {
                    end -= 1;
                }
            }
        }
        if end > 0 && tail[end - 1] == b'\n' {
            end -= 1;
            if end > 0 && tail[end - 1] == b'\r' {
                end -= 1;
            }
        }
        tail.len() - end
    }
}

/// Turns a multipart byte stream into frames, one connection at a time.
pub struct MjpegParser {
    boundary: Boundary,
    scanner: DelimiterScanner,
    options: ParserOptions,
    mode: Mode,
    header: Vec<u8>,
    part: Option<Part>,
    /// Delimited part whose closing delimiter line is not verified yet.
    pending: Option<Part>,
}

impl MjpegParser {
    pub fn new(boundary: Boundary, options: ParserOptions) -> Self {
        Self {
            scanner: DelimiterScanner::new(boundary.delimiter()),
            header: Vec::with_capacity(256),
            boundary,
            options,
            mode: Mode::AwaitingBoundary,
            part: None,
            pending: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    /// Consume one chunk of the response body.
    pub fn feed<S: FrameSink>(&mut self, chunk: &[u8], sink: &mut S) -> Result<(), ProtocolError> {
        let mut input = chunk;
        while !input.is_empty() {
            input = match self.mode {
                Mode::AwaitingBoundary => self.seek_boundary(input),
                Mode::ReadingPartHeaders => self.read_headers(input, sink)?,
                Mode::ReadingPartBody => self.read_body(input, sink),
            };
        }
        Ok(())
    }

    /// The transport reached end of stream.
    pub fn finish<S: FrameSink>(&mut self, sink: &mut S) -> Result<(), ProtocolError> {
        let result = match self.mode {
            Mode::AwaitingBoundary => Ok(()),
            Mode::ReadingPartHeaders if self.header.starts_with(b"--") => {
                Err(ProtocolError::EndOfStream)
            }
            Mode::ReadingPartHeaders | Mode::ReadingPartBody => Err(ProtocolError::Truncated),
        };
        self.abort(sink);
        result
    }

    /// Drop any part in progress and give its buffer back.
    pub fn abort<S: FrameSink>(&mut self, sink: &mut S) {
        for part in [self.part.take(), self.pending.take()].into_iter().flatten() {
            if let Some(buf) = part.buffer {
                sink.recycle(buf);
            }
        }
        self.header.clear();
        self.scanner.reset();
        self.mode = Mode::AwaitingBoundary;
    }

    fn seek_boundary<'a>(&mut self, input: &'a [u8]) -> &'a [u8] {
        match self.scanner.scan(input, |_| {}) {
            Scan::Found(n) => {
                self.enter_headers();
                &input[n..]
            }
            Scan::Pending => &[],
        }
    }

    fn enter_headers(&mut self) {
        self.header.clear();
        self.mode = Mode::ReadingPartHeaders;
    }

    fn read_headers<'a, S: FrameSink>(
        &mut self,
        input: &'a [u8],
        sink: &mut S,
    ) -> Result<&'a [u8], ProtocolError> {
        let limit = self.options.max_header_len;
        let prev = self.header.len();
        let take = input.len().min(limit.saturating_add(1) - prev.min(limit));
        self.header.extend_from_slice(&input[..take]);

        let parsed = parse_header_block(&self.header);
        if self.pending.is_some() {
            match parsed {
                Err(ProtocolError::BoundaryMismatch) => self.drop_pending(sink),
                _ if self.header.starts_with(b"--") || self.header.contains(&b'\n') => {
                    self.settle_pending(sink)
                }
                _ => {}
            }
        }

        match parsed? {
            Some((headers, used)) => {
                self.header.clear();
                self.begin_part(headers, sink)?;
                Ok(&input[used.saturating_sub(prev)..])
            }
            None if self.header.len() > limit => Err(ProtocolError::HeaderTooLong { limit }),
            None => Ok(&input[take..]),
        }
    }

    fn begin_part<S: FrameSink>(
        &mut self,
        headers: PartHeaders,
        sink: &mut S,
    ) -> Result<(), ProtocolError> {
        if self.options.require_jpeg {
            if let Some(ct) = headers.content_type.filter(|ct| !is_jpeg(ct)) {
                return Err(ProtocolError::UnexpectedContentType(ct));
            }
        }

        let expected = headers.content_length;
        if expected == Some(0) {
            sink.discard(Discard::Empty);
            self.mode = Mode::AwaitingBoundary;
            return Ok(());
        }

        let (buffer, fate) = match sink.acquire() {
            Some(buf) if expected.is_some_and(|n| n > buf.capacity()) => {
                sink.recycle(buf);
                (None, Some(Discard::Oversized))
            }
            Some(buf) => (Some(buf), None),
            None => (None, Some(Discard::Overrun)),
        };
        trace!(?expected, ?fate, "part started");

        self.part = Some(Part {
            expected,
            received: 0,
            buffer,
            fate,
            timestamp: SystemTime::now(),
            tail: [0; MAX_TRAILER],
        });
        self.mode = Mode::ReadingPartBody;
        Ok(())
    }

    fn read_body<'a, S: FrameSink>(&mut self, input: &'a [u8], sink: &mut S) -> &'a [u8] {
        let Self {
            scanner,
            part,
            boundary,
            ..
        } = self;
        let Some(part) = part.as_mut() else {
            self.mode = Mode::AwaitingBoundary;
            return input;
        };

        match part.expected {
            Some(expected) => {
                let take = (expected - part.received).min(input.len());
                part.write(&input[..take]);
                if part.received == expected {
                    self.complete_part(sink);
                    self.mode = Mode::AwaitingBoundary;
                }
                &input[take..]
            }
            None => {
                let scan = scanner.scan(input, |data| part.write(data));

                // Past this point the frame cannot fit even after the trailer
                // is stripped, so the buffer can go back early.
                let capacity = part.buffer.as_ref().map(Buffer::capacity);
                if capacity.is_some_and(|cap| part.received > cap + MAX_TRAILER) {
                    if let Some(buf) = part.buffer.take() {
                        sink.recycle(buf);
                    }
                    part.fate.get_or_insert(Discard::Oversized);
                }
                let dashed = boundary.dashed();

                match scan {
                    Scan::Found(n) => {
                        let trailer = part.trailer_len(dashed);
                        part.received -= trailer;
                        // Published once the rest of the delimiter line checks out.
                        self.pending = self.part.take();
                        self.enter_headers();
                        &input[n..]
                    }
                    Scan::Pending => &[],
                }
            }
        }
    }

    fn complete_part<S: FrameSink>(&mut self, sink: &mut S) {
        if let Some(part) = self.part.take() {
            Self::settle(part, sink);
        }
    }

    fn settle_pending<S: FrameSink>(&mut self, sink: &mut S) {
        if let Some(part) = self.pending.take() {
            Self::settle(part, sink);
        }
    }

    /// The body only looked like it ended: the delimiter line was not one.
    fn drop_pending<S: FrameSink>(&mut self, sink: &mut S) {
        if let Some(buf) = self.pending.take().and_then(|part| part.buffer) {
            sink.recycle(buf);
        }
    }

    fn settle<S: FrameSink>(mut part: Part, sink: &mut S) {
        let len = part.received;
        if part.fate.is_none() {
            if len == 0 {
                part.fate = Some(Discard::Empty);
            } else if part.buffer.as_ref().is_some_and(|b| len > b.capacity()) {
                part.fate = Some(Discard::Oversized);
            }
        }

        match (part.fate, part.buffer) {
            (None, Some(mut buf)) => {
                buf.mark_filled(len, part.timestamp);
                sink.publish(buf);
            }
            (fate, buffer) => {
                if let Some(buf) = buffer {
                    sink.recycle(buf);
                }
                sink.discard(fate.unwrap_or(Discard::Overrun));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::multipart::MultipartEncoder;

    /// Sink backed by a fixed set of buffers, mirroring the pool's behaviour.
    struct TestSink {
        free: VecDeque<Buffer>,
        frames: Vec<Buffer>,
        discards: Vec<Discard>,
        overruns: usize,
        sequence: u64,
    }

    impl TestSink {
        fn new(capacity: usize, count: usize) -> Self {
            Self {
                free: (0..count).map(|_| Buffer::new(capacity)).collect(),
                frames: Vec::new(),
                discards: Vec::new(),
                overruns: 0,
                sequence: 0,
            }
        }

        fn payloads(&self) -> Vec<Vec<u8>> {
            self.frames.iter().map(|f| f.frame().to_vec()).collect()
        }

        fn give_back(&mut self) {
            self.free.extend(self.frames.drain(..));
        }
    }

    impl FrameSink for TestSink {
        fn acquire(&mut self) -> Option<Buffer> {
            let buf = self.free.pop_front();
            if buf.is_none() {
                self.overruns += 1;
            }
            buf
        }

        fn publish(&mut self, mut frame: Buffer) {
            frame.set_sequence(self.sequence);
            self.sequence += 1;
            self.frames.push(frame);
        }

        fn recycle(&mut self, buffer: Buffer) {
            self.free.push_back(buffer);
        }

        fn discard(&mut self, reason: Discard) {
            self.sequence += 1;
            self.discards.push(reason);
        }
    }

    fn parser(token: &str) -> MjpegParser {
        MjpegParser::new(Boundary::new(token).unwrap(), ParserOptions::default())
    }

    fn jpeg(tag: u8, len: usize) -> Vec<u8> {
        let mut data = vec![tag; len];
        data[0] = 0xFF;
        data[1] = 0xD8;
        data[len - 2] = 0xFF;
        data[len - 1] = 0xD9;
        data
    }

    fn stream(encoder: &mut MultipartEncoder, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend_from_slice(&encoder.encode_part(frame));
        }
        // A trailing delimiter completes the last delimited part.
        out.extend_from_slice(&encoder.encode_close());
        out
    }

    fn parse_chunks(token: &str, chunks: &[&[u8]], sink: &mut TestSink) -> Result<(), ProtocolError> {
        let mut p = parser(token);
        for chunk in chunks {
            p.feed(chunk, sink)?;
        }
        Ok(())
    }

    #[test]
    fn length_framed_parts() {
        let frames = vec![jpeg(1, 10), jpeg(2, 300), jpeg(3, 64)];
        let data = stream(&mut MultipartEncoder::new("frame"), &frames);

        let mut sink = TestSink::new(512, 4);
        let err = parse_chunks("frame", &[&data], &mut sink).unwrap_err();
        assert_eq!(err, ProtocolError::EndOfStream);
        assert_eq!(sink.payloads(), frames);
        assert!(sink.discards.is_empty());
    }

    #[test]
    fn delimited_parts_without_content_length() {
        let frames = vec![jpeg(1, 10), jpeg(2, 300), jpeg(3, 64)];
        let data = stream(
            &mut MultipartEncoder::new("frame").without_content_length(),
            &frames,
        );

        let mut sink = TestSink::new(512, 4);
        let _ = parse_chunks("frame", &[&data], &mut sink);
        assert_eq!(sink.payloads(), frames);
    }

    #[test]
    fn fragmentation_does_not_change_output() {
        let frames = vec![jpeg(1, 40), jpeg(2, 7), jpeg(3, 25)];
        for encoder in [
            MultipartEncoder::new("b0undary"),
            MultipartEncoder::new("b0undary").without_content_length(),
        ] {
            let data = stream(&mut encoder.clone(), &frames);

            for split in 0..=data.len() {
                let (a, b) = data.split_at(split);
                let mut sink = TestSink::new(64, 4);
                let _ = parse_chunks("b0undary", &[a, b], &mut sink);
                assert_eq!(sink.payloads(), frames, "split at {split}");
            }

            for size in [1, 2, 3, 5, 13, 64] {
                let chunks: Vec<&[u8]> = data.chunks(size).collect();
                let mut sink = TestSink::new(64, 4);
                let _ = parse_chunks("b0undary", &chunks, &mut sink);
                assert_eq!(sink.payloads(), frames, "chunk size {size}");
            }
        }
    }

    #[test]
    fn boundary_split_across_chunks() {
        let data = stream(&mut MultipartEncoder::new("myboundary"), &[jpeg(7, 20)]);
        // Split inside the first delimiter, "--mybo" | "undary...".
        let (a, b) = data.split_at(6);

        let mut sink = TestSink::new(64, 2);
        let _ = parse_chunks("myboundary", &[a, b], &mut sink);
        assert_eq!(sink.payloads(), vec![jpeg(7, 20)]);
    }

    #[test]
    fn oversized_frame_is_skipped_and_parser_resyncs() {
        let frames = vec![jpeg(1, 16), jpeg(2, 100), jpeg(3, 16)];
        for encoder in [
            MultipartEncoder::new("x"),
            MultipartEncoder::new("x").without_content_length(),
        ] {
            let data = stream(&mut encoder.clone(), &frames);
            let mut sink = TestSink::new(32, 2);
            let _ = parse_chunks("x", &[&data], &mut sink);

            assert_eq!(sink.payloads(), vec![jpeg(1, 16), jpeg(3, 16)]);
            assert_eq!(sink.discards, vec![Discard::Oversized]);
            // The oversized frame's buffer went back to the free list.
            assert_eq!(sink.free.len(), 0);
            assert_eq!(sink.frames.len(), 2);
        }
    }

    #[test]
    fn frame_of_exact_capacity() {
        for encoder in [
            MultipartEncoder::new("x"),
            MultipartEncoder::new("x").without_content_length(),
        ] {
            let frame = jpeg(9, 32);
            let data = stream(&mut encoder.clone(), &[frame.clone()]);
            let mut sink = TestSink::new(32, 1);
            let _ = parse_chunks("x", &[&data], &mut sink);

            assert_eq!(sink.frames.len(), 1);
            assert_eq!(sink.frames[0].used(), 32);
            assert_eq!(sink.frames[0].frame(), &frame[..]);
        }
    }

    #[test]
    fn overrun_drops_frame_until_buffer_returns() {
        let mut encoder = MultipartEncoder::new("x");
        let mut p = parser("x");
        let mut sink = TestSink::new(64, 1);

        p.feed(&encoder.encode_part(&jpeg(1, 10)), &mut sink).unwrap();
        p.feed(&encoder.encode_part(&jpeg(2, 10)), &mut sink).unwrap();
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(sink.overruns, 1);
        assert_eq!(sink.discards, vec![Discard::Overrun]);

        sink.give_back();
        p.feed(&encoder.encode_part(&jpeg(3, 10)), &mut sink).unwrap();
        assert_eq!(sink.payloads(), vec![jpeg(3, 10)]);
        assert_eq!(sink.frames[0].sequence(), 2);
    }

    #[test]
    fn zero_length_part_is_discarded_quietly() {
        let mut encoder = MultipartEncoder::new("x");
        let mut data = encoder.encode_part(b"").to_vec();
        data.extend_from_slice(&encoder.encode_part(&jpeg(4, 8)));

        let mut sink = TestSink::new(64, 1);
        parse_chunks("x", &[&data], &mut sink).unwrap();
        assert_eq!(sink.discards, vec![Discard::Empty]);
        assert_eq!(sink.overruns, 0);
        assert_eq!(sink.payloads(), vec![jpeg(4, 8)]);
    }

    #[test]
    fn noise_and_blank_lines_between_parts() {
        let mut data = b"\r\n  \r\n--x\r\nContent-Length: 3\r\n\r\nabc\r\n\r\n\r\n".to_vec();
        data.extend_from_slice(b"--x\r\n\r\ndef\r\n--x\r\n");

        let mut sink = TestSink::new(8, 2);
        parse_chunks("x", &[&data], &mut sink).unwrap();
        assert_eq!(sink.payloads(), vec![b"abc".to_vec(), b"def".to_vec()]);
    }

    #[test]
    fn rfc_style_dashes_around_dashed_token() {
        // Declared "--cam", sent as "----cam" with no Content-Length.
        let data = b"----cam\r\n\r\nJPEG1\r\n----cam\r\n\r\nJPEG2\r\n----cam\r\n";
        let mut sink = TestSink::new(8, 2);
        parse_chunks("--cam", &[data], &mut sink).unwrap();
        assert_eq!(sink.payloads(), vec![b"JPEG1".to_vec(), b"JPEG2".to_vec()]);
    }

    #[test]
    fn header_limit() {
        let mut p = MjpegParser::new(
            Boundary::new("x").unwrap(),
            ParserOptions {
                max_header_len: 32,
                require_jpeg: false,
            },
        );
        let mut sink = TestSink::new(8, 1);
        p.feed(b"--x\r\nX-Long: ", &mut sink).unwrap();
        let err = p.feed(&[b'a'; 40], &mut sink).unwrap_err();
        assert_eq!(err, ProtocolError::HeaderTooLong { limit: 32 });
    }

    #[test]
    fn wrong_content_type_when_strict() {
        let mut p = MjpegParser::new(
            Boundary::new("x").unwrap(),
            ParserOptions {
                require_jpeg: true,
                ..ParserOptions::default()
            },
        );
        let mut sink = TestSink::new(8, 1);
        let err = p
            .feed(b"--x\r\nContent-Type: image/png\r\n\r\n", &mut sink)
            .unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedContentType("image/png".into()));
    }

    #[test]
    fn truncated_part_returns_buffer() {
        let mut p = parser("x");
        let mut sink = TestSink::new(64, 1);
        p.feed(b"--x\r\nContent-Length: 50\r\n\r\npartial", &mut sink)
            .unwrap();
        assert_eq!(p.mode(), Mode::ReadingPartBody);
        assert!(sink.free.is_empty());

        assert_eq!(p.finish(&mut sink).unwrap_err(), ProtocolError::Truncated);
        assert_eq!(sink.free.len(), 1);
        assert!(sink.frames.is_empty());
        assert_eq!(p.mode(), Mode::AwaitingBoundary);
    }

    #[test]
    fn clean_end_between_parts() {
        let mut p = parser("x");
        let mut sink = TestSink::new(64, 1);
        p.feed(b"--x\r\nContent-Length: 2\r\n\r\nok\r\n", &mut sink)
            .unwrap();
        assert!(p.finish(&mut sink).is_ok());
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn boundary_text_inside_delimited_body() {
        let data = b"--frame\r\n\r\n\xFF\xD8 comment: see --frameworks \xFF\xD9\r\n--frame\r\n";
        let mut sink = TestSink::new(64, 1);
        let err = parse_chunks("frame", &[data], &mut sink).unwrap_err();

        assert_eq!(err, ProtocolError::BoundaryMismatch);
        assert!(sink.frames.is_empty());
        assert!(sink.discards.is_empty());
        assert_eq!(sink.free.len(), 1);
    }

    #[test]
    fn delimited_frame_waits_for_delimiter_line() {
        let mut p = parser("x");
        let mut sink = TestSink::new(16, 1);
        p.feed(b"--x\r\n\r\nJPEG\r\n--x", &mut sink).unwrap();
        assert!(sink.frames.is_empty());

        p.feed(b"\r", &mut sink).unwrap();
        assert!(sink.frames.is_empty());
        p.feed(b"\n", &mut sink).unwrap();
        assert_eq!(sink.payloads(), vec![b"JPEG".to_vec()]);
    }

    #[test]
    fn unbounded_header_limit() {
        let mut p = MjpegParser::new(
            Boundary::new("x").unwrap(),
            ParserOptions {
                max_header_len: usize::MAX,
                require_jpeg: false,
            },
        );
        let mut sink = TestSink::new(8, 1);
        p.feed(b"--x\r\nContent-Length: 3\r\n\r\nabc", &mut sink)
            .unwrap();
        assert_eq!(sink.payloads(), vec![b"abc".to_vec()]);
    }

    #[test]
    fn boundary_mismatch() {
        let mut sink = TestSink::new(8, 1);
        let err = parse_chunks("frame", &[b"--framex\r\n\r\n"], &mut sink).unwrap_err();
        assert_eq!(err, ProtocolError::BoundaryMismatch);
    }
}
