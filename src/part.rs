//! Materialized multipart segments.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use encoding_rs::Encoding;
use tempfile::SpooledTempFile;

use crate::error::MultipartError;
use crate::headers::HeaderList;
use crate::parser::Segment;

/// One multipart segment with its body materialized.
///
/// The body lives in memory while it is smaller than the configured
/// `memfile_limit` and rolls over to an unlinked temporary file beyond
/// that. Dropping the part releases the backing either way, so temp files
/// never outlive their owner, whatever the exit path.
pub struct Part {
    segment: Segment,
    file: SpooledTempFile,
    size: u64,
    charset: &'static Encoding,
}

impl Part {
    pub(crate) fn new(
        segment: Segment,
        memfile_limit: usize,
        default_charset: &'static Encoding,
    ) -> Self {
        let charset = segment
            .charset()
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(default_charset);
        Self {
            segment,
            file: SpooledTempFile::new(memfile_limit),
            size: 0,
            charset,
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    /// Rewind the backing so readers start at offset zero.
    pub(crate) fn finalize(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Field name from `Content-Disposition`.
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Filename from `Content-Disposition`, if this part is a file upload.
    pub fn filename(&self) -> Option<&str> {
        self.segment.filename()
    }

    /// Content type, explicit or defaulted.
    pub fn content_type(&self) -> &str {
        self.segment.content_type()
    }

    /// Charset used to decode this part as text.
    pub fn charset(&self) -> &'static Encoding {
        self.charset
    }

    /// Total body size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// All segment headers, in stream order.
    pub fn headers(&self) -> &HeaderList {
        self.segment.headers()
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.segment.header(name)
    }

    /// The parsed segment header block this part was built from.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Returns `true` while the body is held in memory.
    pub fn is_buffered(&self) -> bool {
        !self.file.is_rolled()
    }

    /// Readable and seekable handle on the body, positioned at zero when
    /// the part comes out of the parser.
    pub fn file(&mut self) -> &mut SpooledTempFile {
        &mut self.file
    }

    /// The whole body as bytes. The read position is left untouched.
    pub fn raw(&mut self) -> io::Result<Vec<u8>> {
        let pos = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::with_capacity(self.size as usize);
        let result = self.file.read_to_end(&mut data);
        self.file.seek(SeekFrom::Start(pos))?;
        result?;
        Ok(data)
    }

    /// The body decoded as text with this part's charset.
    ///
    /// Only available while the body is buffered in memory; a part that
    /// spilled to disk is too large to be treated as a text field and
    /// fails with `Limit("memfile_limit")`. Undecodable byte sequences
    /// are substituted with U+FFFD.
    pub fn value(&mut self) -> Result<String, MultipartError> {
        if !self.is_buffered() {
            return Err(MultipartError::Limit("memfile_limit"));
        }
        let raw = self.raw()?;
        let (text, _) = self.charset.decode_without_bom_handling(&raw);
        Ok(text.into_owned())
    }

    /// Stream the body into a new file at `path`, returning the number of
    /// bytes written. The read position is left untouched.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<u64, MultipartError> {
        let pos = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut target = std::fs::File::create(path)?;
        let result = io::copy(&mut self.file, &mut target);
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(result?)
    }

    /// Release the body backing.
    ///
    /// Equivalent to dropping the part; spelled out for callers that want
    /// the release to be visible in the control flow.
    pub fn close(self) {}
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name())
            .field("filename", &self.filename())
            .field("content_type", &self.content_type())
            .field("size", &self.size)
            .field("buffered", &self.is_buffered())
            .finish()
    }
}
