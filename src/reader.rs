//! Buffered multipart reading from blocking byte sources.

use std::collections::VecDeque;
use std::io::Read;

use encoding_rs::{Encoding, UTF_8};

use crate::error::MultipartError;
use crate::log::{debug, trace};
use crate::parser::{Event, Limits, PushParser};
use crate::part::Part;

// ===== Config =====

/// Configuration for [`MultipartParser`] and
/// [`parse_form_data`][crate::parse_form_data].
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    pub(crate) buffer_size: usize,
    pub(crate) memfile_limit: usize,
    pub(crate) mem_limit: u64,
    pub(crate) disk_limit: u64,
    pub(crate) charset: &'static Encoding,
    pub(crate) strict: bool,
    pub(crate) raise_on_error: bool,
    pub(crate) limits: Limits,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            buffer_size: 65_536,
            memfile_limit: 262_144,
            mem_limit: 2_097_152,
            disk_limit: 1_073_741_824,
            charset: UTF_8,
            strict: false,
            raise_on_error: false,
            limits: Limits::default(),
        }
    }
}

impl MultipartConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read chunk size for the source. Defaults to 64 KiB.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Per-part threshold above which bodies spill to a temp file.
    pub fn memfile_limit(mut self, limit: usize) -> Self {
        self.memfile_limit = limit;
        self
    }

    /// Aggregate cap on in-memory part bytes.
    pub fn mem_limit(mut self, limit: u64) -> Self {
        self.mem_limit = limit;
        self
    }

    /// Aggregate cap on spooled part bytes.
    pub fn disk_limit(mut self, limit: u64) -> Self {
        self.disk_limit = limit;
        self
    }

    /// Charset for header values and text fields. Defaults to UTF-8.
    pub fn charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = charset;
        self
    }

    /// Enable strict parsing rules. Off by default for the buffered layer.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Make [`parse_form_data`][crate::parse_form_data] propagate errors
    /// even in lenient mode, instead of returning partial results.
    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }

    /// Replace the push parser [`Limits`].
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

// ===== MultipartParser =====

/// Blocking multipart reader.
///
/// Pulls chunks from a [`Read`] source, feeds them to a [`PushParser`] and
/// materializes every segment into a [`Part`], yielded in stream order.
/// Part bodies spill from memory to unlinked temp files past
/// `memfile_limit`; aggregate memory and disk use are capped by
/// `mem_limit` and `disk_limit`.
pub struct MultipartParser<R> {
    source: R,
    parser: PushParser,
    buffer_size: usize,
    memfile_limit: usize,
    mem_limit: u64,
    disk_limit: u64,
    charset: &'static Encoding,
    current: Option<Part>,
    queue: VecDeque<Part>,
    error: Option<MultipartError>,
    mem_used: u64,
    disk_used: u64,
    done: bool,
}

impl<R: Read> MultipartParser<R> {
    /// Create a reader with default configuration.
    pub fn new(source: R, boundary: impl AsRef<[u8]>) -> Result<Self, MultipartError> {
        Self::with_config(source, boundary, MultipartConfig::default())
    }

    /// Create a reader with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails on an invalid boundary, or when the boundary cannot fit the
    /// configured read buffer.
    pub fn with_config(
        source: R,
        boundary: impl AsRef<[u8]>,
        config: MultipartConfig,
    ) -> Result<Self, MultipartError> {
        let boundary = boundary.as_ref();
        if config.buffer_size < boundary.len() + 6 {
            return Err(MultipartError::State("boundary does not fit buffer_size"));
        }
        let parser = PushParser::new(boundary)?
            .with_charset(config.charset)
            .with_limits(config.limits)
            .strict(config.strict);
        Ok(Self {
            source,
            parser,
            buffer_size: config.buffer_size,
            memfile_limit: config.memfile_limit,
            mem_limit: config.mem_limit,
            disk_limit: config.disk_limit,
            charset: config.charset,
            current: None,
            queue: VecDeque::new(),
            error: None,
            mem_used: 0,
            disk_used: 0,
            done: false,
        })
    }

    /// Next part in stream order, or `None` once the stream is complete.
    ///
    /// After an error is returned the reader is done; any parts parsed
    /// before the fault are still yielded first.
    pub fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        loop {
            if let Some(part) = self.queue.pop_front() {
                return Ok(Some(part));
            }
            if let Some(err) = self.error.take() {
                return Err(err);
            }
            if self.done {
                return Ok(None);
            }
            if let Err(err) = self.pump() {
                self.done = true;
                self.current = None;
                self.error = Some(err);
            }
        }
    }

    /// Collect the remaining parts.
    pub fn into_parts(mut self) -> Result<Vec<Part>, MultipartError> {
        let mut parts = Vec::new();
        while let Some(part) = self.next_part()? {
            parts.push(part);
        }
        Ok(parts)
    }

    /// Read one chunk from the source and run the parser over it.
    fn pump(&mut self) -> Result<(), MultipartError> {
        let mut chunk = vec![0u8; self.buffer_size];
        let len = loop {
            match self.source.read(&mut chunk) {
                Ok(len) => break len,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };
        if len == 0 {
            trace!("source exhausted, signaling end of stream");
            self.done = true;
        }

        for event in self.parser.parse(&chunk[..len]) {
            match event? {
                Event::Segment(segment) => {
                    trace!("opening part {:?} (segment {})", segment.name(), segment.index());
                    self.current = Some(Part::new(segment, self.memfile_limit, self.charset));
                }
                Event::Data(data) => {
                    let Some(part) = self.current.as_mut() else {
                        return Err(MultipartError::State("body data without an open part"));
                    };
                    let was_buffered = part.is_buffered();
                    part.write(&data)?;
                    if part.is_buffered() {
                        if self.mem_used + part.size() > self.mem_limit {
                            return Err(MultipartError::Limit("mem_limit"));
                        }
                    } else {
                        if was_buffered {
                            debug!("part {:?} spilled to disk at {} bytes", part.name(), part.size());
                        }
                        if self.disk_used + part.size() > self.disk_limit {
                            return Err(MultipartError::Limit("disk_limit"));
                        }
                    }
                }
                Event::End => {
                    let Some(mut part) = self.current.take() else {
                        return Err(MultipartError::State("segment end without an open part"));
                    };
                    part.finalize()?;
                    if part.is_buffered() {
                        self.mem_used += part.size();
                    } else {
                        self.disk_used += part.size();
                    }
                    self.queue.push_back(part);
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for MultipartParser<R> {
    type Item = Result<Part, MultipartError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_part() {
            Ok(Some(part)) => Some(Ok(part)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<R> std::fmt::Debug for MultipartParser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartParser")
            .field("parser", &self.parser)
            .field("queued", &self.queue.len())
            .field("mem_used", &self.mem_used)
            .field("disk_used", &self.disk_used)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ParserError;

    const BODY: &[u8] = b"--boundary\r\n\
        Content-Disposition: form-data; name=\"note\"\r\n\
        \r\n\
        hello world\r\n\
        --boundary\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"data.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\
        \r\n\
        \x00\x01\x02\x03\r\n\
        --boundary--\r\n";

    #[test]
    fn parts_in_stream_order() {
        let parser = MultipartParser::new(BODY, "boundary").unwrap();
        let mut parts = parser.into_parts().unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name(), "note");
        assert_eq!(parts[0].filename(), None);
        assert_eq!(parts[0].content_type(), "text/plain");
        assert_eq!(parts[0].value().unwrap(), "hello world");

        assert_eq!(parts[1].name(), "file");
        assert_eq!(parts[1].filename(), Some("data.bin"));
        assert_eq!(parts[1].content_type(), "application/octet-stream");
        assert_eq!(parts[1].raw().unwrap(), [0x00, 0x01, 0x02, 0x03]);
    }

    /// A tiny read buffer forces delimiters to straddle every chunk seam.
    #[test]
    fn tiny_read_chunks_do_not_change_the_result() {
        let config = MultipartConfig::new().buffer_size(17);
        let parser = MultipartParser::with_config(BODY, "boundary", config).unwrap();
        let mut parts = parser.into_parts().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].value().unwrap(), "hello world");
        assert_eq!(parts[1].raw().unwrap(), [0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn body_spills_past_memfile_limit() {
        let payload = vec![b'z'; 25];
        let mut body = Vec::new();
        body.extend_from_slice(b"--boundary\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"; filename=\"big\"\r\n");
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--boundary--\r\n");

        let config = MultipartConfig::new().memfile_limit(10);
        let parser = MultipartParser::with_config(&body[..], "boundary", config).unwrap();
        let mut parts = parser.into_parts().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size(), 25);
        assert!(!parts[0].is_buffered());

        let mut read_back = Vec::new();
        parts[0].file().read_to_end(&mut read_back).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn mem_limit_is_aggregate() {
        // the first part alone fits, both together do not
        let config = MultipartConfig::new().mem_limit(12);
        let mut parser = MultipartParser::with_config(BODY, "boundary", config).unwrap();

        let first = parser.next_part().unwrap().unwrap();
        assert_eq!(first.name(), "note");

        let err = parser.next_part().unwrap_err();
        assert!(matches!(err, MultipartError::Limit("mem_limit")));
    }

    #[test]
    fn disk_limit_caps_spooled_parts() {
        let config = MultipartConfig::new().memfile_limit(4).disk_limit(8);
        let mut parser = MultipartParser::with_config(BODY, "boundary", config).unwrap();
        let err = loop {
            match parser.next_part() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("expected disk_limit error"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, MultipartError::Limit("disk_limit")));
    }

    #[test]
    fn parts_before_a_fault_are_still_yielded() {
        let body = b"--boundary\r\n\
            Content-Disposition: form-data; name=\"ok\"\r\n\
            \r\n\
            fine\r\n\
            --boundary\r\n\
            no-disposition: here\r\n\
            \r\n\
            broken\r\n\
            --boundary--\r\n";

        let mut parser = MultipartParser::new(&body[..], "boundary").unwrap();
        let first = parser.next_part().unwrap().unwrap();
        assert_eq!(first.name(), "ok");

        let err = parser.next_part().unwrap_err();
        assert!(matches!(
            err,
            MultipartError::Parser(ParserError::MissingDisposition)
        ));
        assert!(parser.next_part().unwrap().is_none());
    }

    #[test]
    fn truncated_stream_fails() {
        let body = &BODY[..BODY.len() - 20];
        let mut parser = MultipartParser::new(body, "boundary").unwrap();
        let mut saw_error = false;
        loop {
            match parser.next_part() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    assert!(matches!(
                        err,
                        MultipartError::Parser(ParserError::UnexpectedEnd)
                    ));
                    saw_error = true;
                }
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn boundary_must_fit_buffer() {
        let result = MultipartParser::with_config(
            &b""[..],
            "a-rather-long-boundary",
            MultipartConfig::new().buffer_size(16),
        );
        assert!(matches!(result, Err(MultipartError::State(_))));
    }
}
