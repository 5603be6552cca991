//! Segment header line parsing.

use encoding_rs::Encoding;
use memchr::memchr;

use crate::error::{Fault, ParserError};

/// `tchar` per RFC 9110: the bytes allowed in a header field name.
const fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

const fn is_ows(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

/// Parse one complete header line (without its CRLF) into a name/value
/// pair. The line must match `token ":" OWS value OWS`; continuation lines
/// are not a thing in multipart segment headers.
pub(crate) fn parse_line(
    line: &[u8],
    charset: &'static Encoding,
) -> Result<(String, String), Fault> {
    if is_ows(line[0]) {
        // header continuation, deprecated by RFC 7230 and unsupported here
        return Err(ParserError::InvalidHeader.into());
    }

    let Some(colon) = memchr(b':', line) else {
        return Err(ParserError::InvalidHeader.into());
    };

    let name = &line[..colon];
    if name.is_empty() {
        return Err(ParserError::EmptyHeader.into());
    }
    let mut i = 0;
    while i < name.len() {
        if !is_token(name[i]) {
            return Err(ParserError::InvalidHeader.into());
        }
        i += 1;
    }
    // SAFETY: `is_token` only accepts ASCII bytes
    let name = unsafe { std::str::from_utf8_unchecked(name) };

    let mut value = &line[colon + 1..];
    while let [first, rest @ ..] = value {
        if is_ows(*first) {
            value = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = value {
        if is_ows(*last) {
            value = rest;
        } else {
            break;
        }
    }

    let (value, had_errors) = charset.decode_without_bom_handling(value);
    if had_errors {
        return Err(ParserError::InvalidHeader.into());
    }

    Ok((name.to_string(), value.into_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Fault;
    use encoding_rs::UTF_8;

    fn parse(line: &[u8]) -> Result<(String, String), Fault> {
        parse_line(line, UTF_8)
    }

    #[test]
    fn well_formed_line() {
        let (name, value) = parse(b"Content-Type: text/plain").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/plain");

        let (name, value) = parse(b"X-Empty:").unwrap();
        assert_eq!(name, "X-Empty");
        assert_eq!(value, "");

        let (_, value) = parse(b"X-Pad: \t padded \t ").unwrap();
        assert_eq!(value, "padded");
    }

    #[test]
    fn malformed_lines() {
        assert!(matches!(
            parse(b"no-colon-here").unwrap_err(),
            Fault::Parser(ParserError::InvalidHeader)
        ));
        assert!(matches!(
            parse(b": empty-name").unwrap_err(),
            Fault::Parser(ParserError::EmptyHeader)
        ));
        assert!(matches!(
            parse(b"\tcontinuation: value").unwrap_err(),
            Fault::Parser(ParserError::InvalidHeader)
        ));
        for bad in [&b"bad name: x"[..], b"bad\0name: x", b"b\xc3\xb6se: x"] {
            assert!(matches!(
                parse(bad).unwrap_err(),
                Fault::Parser(ParserError::InvalidHeader)
            ));
        }
    }

    #[test]
    fn value_decoded_with_charset() {
        let (_, value) = parse("X-Name: täst".as_bytes()).unwrap();
        assert_eq!(value, "täst");

        // invalid UTF-8 in the value
        assert!(parse(b"X-Name: \xc3\x28").is_err());

        let (_, value) = parse_line(b"X-Name: t\xe4st", encoding_rs::WINDOWS_1252).unwrap();
        assert_eq!(value, "täst");
    }
}
