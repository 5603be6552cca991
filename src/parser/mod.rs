//! Incremental multipart/form-data push parser.
//!
//! # Parsing
//!
//! [`PushParser`] is a sans-I/O state machine. It accepts byte chunks of
//! any length, split at any position, and turns them into [`Event`]s:
//!
//! - [`Event::Segment`] — the header block of the next segment, parsed.
//! - [`Event::Data`] — a non-empty fragment of the current segment body.
//!   Consecutive fragments concatenate to the exact body bytes.
//! - [`Event::End`] — the current segment is complete.
//!
//! [`PushParser::parse`] returns a lazy [`Events`] cursor that must be
//! drained before the next `parse` call; since the cursor mutably borrows
//! the parser, the borrow checker enforces that contract. Feeding an empty
//! chunk signals end of stream.
//!
//! The parser holds no more pending input than one partial delimiter (or
//! one partial header block), so memory use is bounded regardless of body
//! size. All limits in [`Limits`] are checked eagerly: oversized input
//! fails as soon as the cap is crossed, not once the offending element is
//! complete.
//!
//! Errors are terminal. Once a parse fails, the stream cannot be trusted
//! and every later call fails with the same error kind.

mod header;
mod segment;


pub use segment::Segment;

use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use memchr::{memchr2, memmem};

use crate::error::{Fault, MultipartError, ParserError};
use crate::headers::HeaderList;
use crate::log::trace;

// ===== Limits =====

/// Resource limits enforced by [`PushParser`].
///
/// Every limit is checked eagerly while input arrives. `max_segment_size`
/// and `max_body_size` default to unlimited; the buffered layer bounds
/// them through its own memory and disk budgets.
#[derive(Debug, Clone)]
pub struct Limits {
    pub(crate) max_header_size: usize,
    pub(crate) max_header_line: usize,
    pub(crate) max_header_count: usize,
    pub(crate) max_segments: usize,
    pub(crate) max_segment_size: u64,
    pub(crate) max_body_size: u64,
    pub(crate) count_header_bytes: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_size: 4096,
            max_header_line: 4096,
            max_header_count: 8,
            max_segments: 128,
            max_segment_size: u64::MAX,
            max_body_size: u64::MAX,
            count_header_bytes: false,
        }
    }
}

impl Limits {
    /// Cap on one segment's whole header block, preamble included.
    pub fn max_header_size(mut self, limit: usize) -> Self {
        self.max_header_size = limit;
        self
    }

    /// Cap on a single header line, CRLF included.
    pub fn max_header_line(mut self, limit: usize) -> Self {
        self.max_header_line = limit;
        self
    }

    /// Cap on the number of headers per segment.
    pub fn max_header_count(mut self, limit: usize) -> Self {
        self.max_header_count = limit;
        self
    }

    /// Cap on the number of segments in the stream.
    pub fn max_segments(mut self, limit: usize) -> Self {
        self.max_segments = limit;
        self
    }

    /// Cap on one segment's body size.
    pub fn max_segment_size(mut self, limit: u64) -> Self {
        self.max_segment_size = limit;
        self
    }

    /// Cap on the body size summed over all segments.
    pub fn max_body_size(mut self, limit: u64) -> Self {
        self.max_body_size = limit;
        self
    }

    /// Also count header block bytes against `max_body_size`.
    ///
    /// Off by default, matching the historical accounting.
    pub fn count_header_bytes(mut self, enabled: bool) -> Self {
        self.count_header_bytes = enabled;
        self
    }
}

// ===== Event =====

/// A parsed piece of the multipart stream.
#[derive(Debug)]
pub enum Event {
    /// Header block of the next segment, fully parsed.
    Segment(Segment),
    /// A non-empty fragment of the current segment body.
    Data(Bytes),
    /// The current segment body is complete.
    End,
}

// ===== State =====

#[derive(Debug, Clone, Copy)]
enum State {
    Preamble,
    Header,
    Body,
    Complete,
    Closed,
    Failed(Fault),
}

enum Step {
    Event(Event),
    Continue,
    NeedData,
}

// ===== PushParser =====

/// Incremental push parser for one multipart/form-data stream.
///
/// Strict mode is on by default; see [`PushParser::strict`].
pub struct PushParser {
    /// `\r\n--` + boundary. The dash-boundary is this without the CRLF.
    delimiter: Vec<u8>,
    finder: memmem::Finder<'static>,
    charset: &'static Encoding,
    is_strict: bool,
    limits: Limits,

    state: State,
    buffer: BytesMut,
    eof: bool,

    /// Segments opened so far, also the index of the next one.
    segment_count: usize,
    total_size: u64,

    headers: HeaderList,
    header_size: usize,
    segment_size: u64,
    segment_clen: Option<u64>,

    preamble_size: usize,
    preamble_clean: bool,
    preamble_in_pair: bool,
    final_crlf: bool,
}

impl PushParser {
    /// Create a parser for the given boundary.
    ///
    /// # Errors
    ///
    /// [`ParserError::InvalidBoundary`] if the boundary is empty, longer
    /// than 70 bytes, ends in a space, or contains bytes outside the
    /// RFC 2046 `bchars` set.
    pub fn new(boundary: impl AsRef<[u8]>) -> Result<Self, MultipartError> {
        let boundary = boundary.as_ref();
        if !is_valid_boundary(boundary) {
            return Err(ParserError::InvalidBoundary.into());
        }

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary);
        let finder = memmem::Finder::new(&delimiter).into_owned();

        Ok(Self {
            delimiter,
            finder,
            charset: UTF_8,
            is_strict: true,
            limits: Limits::default(),
            state: State::Preamble,
            buffer: BytesMut::new(),
            eof: false,
            segment_count: 0,
            total_size: 0,
            headers: HeaderList::new(),
            header_size: 0,
            segment_size: 0,
            segment_clen: None,
            preamble_size: 0,
            preamble_clean: true,
            preamble_in_pair: false,
            final_crlf: false,
        })
    }

    /// Charset used to decode header values. Defaults to UTF-8.
    pub fn with_charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = charset;
        self
    }

    /// Replace the default [`Limits`].
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Toggle strict mode.
    ///
    /// Lenient parsing tolerates a junk preamble before the first
    /// dash-boundary, a missing CRLF after the terminator, and epilogue
    /// bytes after the stream end. Strict mode rejects all three. Both
    /// modes reject bare line breaks, malformed headers and transfer
    /// decodings.
    pub fn strict(mut self, strict: bool) -> Self {
        self.is_strict = strict;
        self
    }

    /// The boundary this parser was built with.
    pub fn boundary(&self) -> &[u8] {
        &self.delimiter[4..]
    }

    /// Returns `true` once the terminator was seen or the parser closed.
    pub fn closed(&self) -> bool {
        matches!(self.state, State::Complete | State::Closed)
    }

    /// Close the parser.
    ///
    /// # Errors
    ///
    /// Fails if the stream is not complete: with the stored fault when the
    /// parser already failed, with a state error when input simply ended
    /// too early.
    pub fn close(&mut self) -> Result<(), MultipartError> {
        match self.state {
            State::Complete | State::Closed => {
                self.state = State::Closed;
                Ok(())
            }
            State::Failed(fault) => Err(fault.into()),
            _ => Err(MultipartError::State("incomplete input")),
        }
    }

    /// Feed a chunk and iterate the events it completes.
    ///
    /// An empty chunk signals end of stream. The returned cursor borrows
    /// the parser; drain it before calling `parse` again.
    pub fn parse(&mut self, chunk: &[u8]) -> Events<'_> {
        let failed = 'entry: {
            if let State::Failed(fault) = self.state {
                break 'entry Some(fault.into());
            }
            if matches!(self.state, State::Closed) {
                break 'entry Some(MultipartError::State("parse called on closed parser"));
            }
            if self.eof {
                if chunk.is_empty() {
                    break 'entry None;
                }
                break 'entry Some(MultipartError::State("parse called after end of stream"));
            }
            if chunk.is_empty() {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(chunk);
            }
            None
        };

        Events {
            parser: self,
            failed,
            done: false,
        }
    }

    fn next_event(&mut self) -> Result<Option<Event>, MultipartError> {
        loop {
            let step = match self.state {
                State::Preamble => self.step_preamble(),
                State::Header => self.step_header(),
                State::Body => self.step_body(),
                State::Complete => self.step_epilogue(),
                State::Closed | State::Failed(_) => return Ok(None),
            };
            match step {
                Ok(Step::Event(event)) => return Ok(Some(event)),
                Ok(Step::Continue) => {}
                Ok(Step::NeedData) => {
                    if !self.eof {
                        return Ok(None);
                    }
                    if matches!(self.state, State::Complete) {
                        if self.is_strict && !self.final_crlf {
                            return Err(self.fail(Fault::Strict(
                                "missing CRLF after final multipart delimiter",
                            )));
                        }
                        return Ok(None);
                    }
                    return Err(self.fail(ParserError::UnexpectedEnd.into()));
                }
                Err(fault) => return Err(self.fail(fault)),
            }
        }
    }

    fn fail(&mut self, fault: Fault) -> MultipartError {
        self.state = State::Failed(fault);
        fault.into()
    }

    // ===== Preamble =====

    fn step_preamble(&mut self) -> Result<Step, Fault> {
        let dash_len = self.delimiter.len() - 2;

        match memmem::find(&self.buffer, &self.delimiter[2..]) {
            Some(at) => {
                if at > 0 {
                    let preamble = self.buffer.split_to(at);
                    self.scan_preamble(&preamble)?;
                }
                // only whole CRLF pairs may precede the first dash-boundary
                if self.is_strict && (!self.preamble_clean || self.preamble_in_pair) {
                    return Err(Fault::Strict("unexpected data in front of first delimiter"));
                }
                if self.buffer.len() < dash_len + 2 {
                    return Ok(Step::NeedData);
                }
                match [self.buffer[dash_len], self.buffer[dash_len + 1]] {
                    [b'\r', b'\n'] => {
                        self.buffer.advance(dash_len + 2);
                        self.open_segment()?;
                        Ok(Step::Continue)
                    }
                    [b'-', b'-'] => {
                        // empty multipart stream
                        self.buffer.advance(dash_len + 2);
                        trace!("terminator before any segment");
                        self.state = State::Complete;
                        Ok(Step::Continue)
                    }
                    _ => Err(ParserError::InvalidBoundary.into()),
                }
            }
            None => {
                let keep = (dash_len - 1).min(self.buffer.len());
                let discard = self.buffer.len() - keep;
                if discard > 0 {
                    let skipped = self.buffer.split_to(discard);
                    self.scan_preamble(&skipped)?;
                    trace!("skipped {} preamble bytes", skipped.len());
                }
                if self.preamble_size + self.buffer.len() > self.limits.max_header_size {
                    return Err(ParserError::InvalidBoundaryLocation.into());
                }
                Ok(Step::NeedData)
            }
        }
    }

    fn scan_preamble(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        self.preamble_size += bytes.len();
        for &b in bytes {
            let expected = if self.preamble_in_pair { b'\n' } else { b'\r' };
            if b == expected {
                self.preamble_in_pair = !self.preamble_in_pair;
            } else {
                self.preamble_clean = false;
            }
        }
        if !self.preamble_clean && self.is_strict {
            return Err(Fault::Strict("unexpected data in front of first delimiter"));
        }
        Ok(())
    }

    fn open_segment(&mut self) -> Result<(), Fault> {
        if self.segment_count >= self.limits.max_segments {
            return Err(Fault::Limit("max_segments"));
        }
        self.segment_count += 1;
        self.headers = HeaderList::new();
        self.header_size = 0;
        self.segment_size = 0;
        self.segment_clen = None;
        self.state = State::Header;
        trace!("segment {} opened", self.segment_count - 1);
        Ok(())
    }

    // ===== Header =====

    fn step_header(&mut self) -> Result<Step, Fault> {
        let line_end = match memchr2(b'\r', b'\n', &self.buffer) {
            Some(at) if self.buffer[at] == b'\n' => {
                return Err(ParserError::InvalidLineBreak.into());
            }
            Some(at) => match self.buffer.get(at + 1) {
                Some(&b'\n') => Some(at),
                Some(_) => return Err(ParserError::InvalidLineBreak.into()),
                None => None,
            },
            None => None,
        };

        let Some(line_end) = line_end else {
            // no complete line yet, bound the pending bytes
            if self.buffer.len() > self.limits.max_header_line {
                return Err(Fault::Limit("max_header_line"));
            }
            if self.header_size + self.buffer.len() > self.limits.max_header_size {
                return Err(ParserError::HeaderTooLong.into());
            }
            return Ok(Step::NeedData);
        };

        let line_len = line_end + 2;
        if line_len > self.limits.max_header_line {
            return Err(Fault::Limit("max_header_line"));
        }
        if self.header_size + line_len > self.limits.max_header_size {
            return Err(Fault::Limit("max_header_size"));
        }
        self.header_size += line_len;

        let line = self.buffer.split_to(line_len);
        let line = &line[..line_end];

        if line.is_empty() {
            // end of header block
            if self.limits.count_header_bytes {
                self.total_size += self.header_size as u64;
                if self.total_size > self.limits.max_body_size {
                    return Err(Fault::Limit("max_body_size"));
                }
            }
            let headers = std::mem::take(&mut self.headers);
            let segment = Segment::parse(self.segment_count - 1, headers)?;
            self.segment_clen = segment.content_length();
            self.state = State::Body;
            return Ok(Step::Event(Event::Segment(segment)));
        }

        if self.headers.len() >= self.limits.max_header_count {
            return Err(Fault::Limit("max_header_count"));
        }
        let (name, value) = header::parse_line(line, self.charset)?;
        self.headers.append(name, value);
        Ok(Step::Continue)
    }

    // ===== Body =====

    fn step_body(&mut self) -> Result<Step, Fault> {
        let delim_len = self.delimiter.len();

        // A terminator directly after the header blank line, without its
        // own leading CRLF, counts as a zero-length final body.
        if self.segment_size == 0 && self.buffer.first() == Some(&b'-') {
            let dash_len = delim_len - 2;
            if self.buffer.len() < dash_len + 2 {
                if self.delimiter[2..].starts_with(&self.buffer) {
                    return Ok(Step::NeedData);
                }
            } else if self.buffer[..dash_len] == self.delimiter[2..]
                && self.buffer[dash_len..dash_len + 2] == *b"--"
            {
                self.buffer.advance(dash_len + 2);
                self.finish_segment()?;
                self.state = State::Complete;
                return Ok(Step::Event(Event::End));
            }
        }

        match self.finder.find(&self.buffer) {
            Some(at) => {
                if at > 0 {
                    let data = self.buffer.split_to(at).freeze();
                    self.count_body(data.len())?;
                    return Ok(Step::Event(Event::Data(data)));
                }
                if self.buffer.len() < delim_len + 2 {
                    return Ok(Step::NeedData);
                }
                match [self.buffer[delim_len], self.buffer[delim_len + 1]] {
                    [b'\r', b'\n'] => {
                        self.buffer.advance(delim_len + 2);
                        self.finish_segment()?;
                        self.open_segment()?;
                        Ok(Step::Event(Event::End))
                    }
                    [b'-', b'-'] => {
                        self.buffer.advance(delim_len + 2);
                        self.finish_segment()?;
                        self.state = State::Complete;
                        Ok(Step::Event(Event::End))
                    }
                    _ => Err(ParserError::InvalidBoundary.into()),
                }
            }
            None => {
                // hold back anything that could still become a delimiter
                let keep = (delim_len - 1).min(self.buffer.len());
                let flush = self.buffer.len() - keep;
                if flush == 0 {
                    return Ok(Step::NeedData);
                }
                let data = self.buffer.split_to(flush).freeze();
                self.count_body(data.len())?;
                Ok(Step::Event(Event::Data(data)))
            }
        }
    }

    fn count_body(&mut self, len: usize) -> Result<(), Fault> {
        self.segment_size += len as u64;
        self.total_size += len as u64;
        if self.segment_size > self.limits.max_segment_size {
            return Err(Fault::Limit("max_segment_size"));
        }
        if self.total_size > self.limits.max_body_size {
            return Err(Fault::Limit("max_body_size"));
        }
        if let Some(clen) = self.segment_clen {
            if self.segment_size > clen {
                return Err(ParserError::ContentLengthMismatch.into());
            }
        }
        Ok(())
    }

    fn finish_segment(&mut self) -> Result<(), Fault> {
        if let Some(clen) = self.segment_clen {
            if self.segment_size != clen {
                return Err(ParserError::ContentLengthMismatch.into());
            }
        }
        trace!(
            "segment {} complete, {} body bytes",
            self.segment_count - 1,
            self.segment_size
        );
        Ok(())
    }

    // ===== Epilogue =====

    fn step_epilogue(&mut self) -> Result<Step, Fault> {
        if self.buffer.is_empty() {
            return Ok(Step::NeedData);
        }
        if !self.final_crlf && self.buffer[0] == b'\r' {
            if self.buffer.len() < 2 {
                return Ok(Step::NeedData);
            }
            if self.buffer[1] == b'\n' {
                self.buffer.advance(2);
                self.final_crlf = true;
                return Ok(Step::Continue);
            }
        }
        if self.is_strict {
            return Err(Fault::Strict("unexpected data after end of multipart stream"));
        }
        trace!("discarded {} epilogue bytes", self.buffer.len());
        self.buffer.clear();
        Ok(Step::NeedData)
    }
}

impl std::fmt::Debug for PushParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushParser")
            .field("state", &self.state)
            .field("strict", &self.is_strict)
            .field("segments", &self.segment_count)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

fn is_valid_boundary(boundary: &[u8]) -> bool {
    // RFC 2046 bchars, trailing space forbidden
    const fn is_bchar(b: u8) -> bool {
        b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'\'' | b'('
                    | b')'
                    | b'+'
                    | b'_'
                    | b','
                    | b'-'
                    | b'.'
                    | b'/'
                    | b':'
                    | b'='
                    | b'?'
                    | b' '
            )
    }

    matches!(boundary.len(), 1..=70)
        && boundary.iter().all(|&b| is_bchar(b))
        && boundary.last() != Some(&b' ')
}

// ===== Events =====

/// Lazy event cursor returned by [`PushParser::parse`].
///
/// Yields at most one error, then fuses. Events carry owned [`Bytes`]
/// split off the parser buffer, so no copies are made on the way out.
#[derive(Debug)]
pub struct Events<'a> {
    parser: &'a mut PushParser,
    failed: Option<MultipartError>,
    done: bool,
}

impl Iterator for Events<'_> {
    type Item = Result<Event, MultipartError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.failed.take() {
            self.done = true;
            return Some(Err(err));
        }
        match self.parser.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
