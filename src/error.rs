use std::io;

// ===== Parser Error =====

/// A semantic error in the multipart input itself.
///
/// All of these indicate a malformed message that cannot be recovered from;
/// the parser enters a terminal error state when one is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserError {
    /// Boundary is empty, longer than 70 bytes, ends in a space, contains
    /// bytes outside the RFC 2046 `bchars` set, or a delimiter line in the
    /// stream is not followed by CRLF or `--`.
    InvalidBoundary,
    /// The first delimiter did not show up within the allowed preamble size.
    InvalidBoundaryLocation,
    /// Malformed segment header or header option list.
    InvalidHeader,
    /// Bare LF or bare CR where CRLF is required.
    InvalidLineBreak,
    /// Segment lacks the mandatory `Content-Disposition: form-data` header.
    MissingDisposition,
    /// Segment requests a `base64` or `quoted-printable` transfer encoding.
    UnsupportedTransferEncoding,
    /// Segment header line with an empty name.
    EmptyHeader,
    /// Segment header line does not terminate within the header size cap.
    HeaderTooLong,
    /// Stream ended in the middle of a multipart message.
    UnexpectedEnd,
    /// Segment body does not match its own `Content-Length` header.
    ContentLengthMismatch,
    /// Request content type is not a known form media type.
    UnsupportedContentType,
}

impl ParserError {
    const fn message(&self) -> &'static str {
        match self {
            Self::InvalidBoundary => "invalid multipart boundary",
            Self::InvalidBoundaryLocation => "first boundary not found within preamble limit",
            Self::InvalidHeader => "malformed segment header",
            Self::InvalidLineBreak => "expected CRLF line break",
            Self::MissingDisposition => "missing Content-Disposition segment header",
            Self::UnsupportedTransferEncoding => "unsupported Content-Transfer-Encoding",
            Self::EmptyHeader => "segment header with empty name",
            Self::HeaderTooLong => "segment header line does not fit header size limit",
            Self::UnexpectedEnd => "unexpected end of multipart stream",
            Self::ContentLengthMismatch => "segment size does not match Content-Length header",
            Self::UnsupportedContentType => "unsupported content type",
        }
    }
}

impl std::error::Error for ParserError {}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

// ===== Multipart Error =====

/// Any error raised by this crate.
///
/// [`status`][MultipartError::status] maps each class to the HTTP status a
/// server would usually answer with.
#[derive(Debug)]
pub enum MultipartError {
    /// Malformed input.
    Parser(ParserError),
    /// A configured limit was exceeded; the payload names the limit.
    Limit(&'static str),
    /// Input rejected under strict parsing rules only.
    Strict(&'static str),
    /// Parser API misuse, such as parsing after close.
    State(&'static str),
    /// I/O failure while buffering part bodies.
    Io(io::Error),
}

impl MultipartError {
    /// HTTP status hint: 400 for malformed input, 413 for exceeded limits,
    /// 500 for API misuse and I/O failures.
    pub fn status(&self) -> u16 {
        match self {
            Self::Parser(_) | Self::Strict(_) => 400,
            Self::Limit(_) => 413,
            Self::State(_) | Self::Io(_) => 500,
        }
    }
}

impl From<ParserError> for MultipartError {
    #[inline]
    fn from(v: ParserError) -> Self {
        Self::Parser(v)
    }
}

impl From<io::Error> for MultipartError {
    #[inline]
    fn from(v: io::Error) -> Self {
        Self::Io(v)
    }
}

impl std::error::Error for MultipartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parser(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parser(err) => err.fmt(f),
            Self::Limit(limit) => write!(f, "{limit} limit exceeded"),
            Self::Strict(msg) | Self::State(msg) => f.write_str(msg),
            Self::Io(err) => err.fmt(f),
        }
    }
}

// ===== Fault =====

/// Terminal parser fault, kept by the parser so every later call surfaces
/// an error of the same kind.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    Parser(ParserError),
    Limit(&'static str),
    Strict(&'static str),
}

impl From<ParserError> for Fault {
    #[inline]
    fn from(v: ParserError) -> Self {
        Self::Parser(v)
    }
}

impl From<Fault> for MultipartError {
    fn from(v: Fault) -> Self {
        match v {
            Fault::Parser(err) => Self::Parser(err),
            Fault::Limit(limit) => Self::Limit(limit),
            Fault::Strict(msg) => Self::Strict(msg),
        }
    }
}
