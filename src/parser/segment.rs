//! Parsed segment header blocks.

use crate::error::{Fault, ParserError};
use crate::headers::HeaderList;
use crate::options;

/// The fully parsed header block of one multipart segment.
///
/// Carries the raw ordered header fields plus everything derived from
/// `Content-Disposition` and `Content-Type`. Segments are numbered in
/// stream order starting at zero.
#[derive(Debug, Clone)]
pub struct Segment {
    index: usize,
    headers: HeaderList,
    name: String,
    filename: Option<String>,
    content_type: String,
    charset: Option<String>,
    content_length: Option<u64>,
}

impl Segment {
    /// Zero-based position of this segment in the stream.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Field name from `Content-Disposition`. May be empty, never absent.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filename from `Content-Disposition`, if the segment is a file upload.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Content type of the segment.
    ///
    /// Defaults to `text/plain` for plain fields and
    /// `application/octet-stream` for file uploads.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The `charset` option of this segment's `Content-Type`, if any.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// The segment's own `Content-Length` header, if it sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// All header fields of this segment, in stream order.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub(crate) fn parse(index: usize, headers: HeaderList) -> Result<Self, Fault> {
        let mut disposition = None;
        for (name, value) in &headers {
            if name.eq_ignore_ascii_case("content-disposition") {
                if disposition.is_some() {
                    // duplicate of a required header
                    return Err(ParserError::InvalidHeader.into());
                }
                disposition = Some(value);
            }
        }
        let Some(disposition) = disposition else {
            return Err(ParserError::MissingDisposition.into());
        };

        let (primary, opts) =
            options::parse_options(disposition, options::content_disposition_unquote)?;
        if primary != "form-data" {
            return Err(ParserError::InvalidHeader.into());
        }
        let Some(name) = opts.get("name") else {
            return Err(ParserError::InvalidHeader.into());
        };
        let name = name.to_string();
        let filename = opts.get("filename").map(str::to_string);

        let mut content_type = None;
        let mut charset = None;
        if let Some(value) = headers.get("content-type") {
            let (primary, opts) = options::parse_options(value, options::header_unquote)?;
            charset = opts.get("charset").map(str::to_string);
            content_type = Some(primary);
        }
        let content_type = content_type.unwrap_or_else(|| {
            match filename {
                Some(_) => "application/octet-stream",
                None => "text/plain",
            }
            .to_string()
        });

        if let Some(value) = headers.get("content-transfer-encoding") {
            if value.trim().eq_ignore_ascii_case("base64")
                || value.trim().eq_ignore_ascii_case("quoted-printable")
            {
                return Err(ParserError::UnsupportedTransferEncoding.into());
            }
        }

        let content_length = match headers.get("content-length") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => return Err(ParserError::InvalidHeader.into()),
            },
            None => None,
        };

        Ok(Segment {
            index,
            headers,
            name,
            filename,
            content_type,
            charset,
            content_length,
        })
    }
}
