//! Header option-list parsing and quoting.
//!
//! Parses headers of the shape `value; key=val; key="quoted val"`, as used
//! by `Content-Type` and `Content-Disposition`. Two quoting dialects exist
//! in the wild and both are supported:
//!
//! - *Legacy* (RFC 2616): [`header_quote`] / [`header_unquote`] wrap values
//!   in double quotes and backslash-escape `"` and `\`.
//! - *WHATWG* (HTML5): [`content_disposition_quote`] /
//!   [`content_disposition_unquote`] percent-encode CR, LF and `"`. The
//!   unquote side also honors legacy backslash escapes, since old user
//!   agents still send them.

use std::borrow::Cow;

use memchr::memchr2;

use crate::error::{MultipartError, ParserError};

/// Characters that force a value into quoted form.
///
/// RFC 2616 separators plus backslash.
const fn is_special(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'"'
            | b'\\'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

pub(crate) type UnquoteFn = fn(&str, bool) -> String;

// ===== Quoting =====

/// Quote a header option value using the legacy dialect.
///
/// Values without special characters are returned unchanged; everything
/// else is wrapped in double quotes with `"` and `\` backslash-escaped.
pub fn header_quote(value: &str) -> Cow<'_, str> {
    if !value.bytes().any(is_special) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 4);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    Cow::Owned(out)
}

/// Unquote a header option value using the legacy dialect.
///
/// Set `filename` for values of `filename` options: ancient Internet
/// Explorer versions send the full client path, which is reduced to its
/// last component.
pub fn header_unquote(value: &str, filename: bool) -> String {
    let Some(inner) = quoted_inner(value) else {
        return value.to_string();
    };

    if filename && is_windows_path(inner) {
        return last_path_segment(inner).to_string();
    }

    inner.replace("\\\\", "\\").replace("\\\"", "\"")
}

/// Quote a `Content-Disposition` option value the WHATWG way.
///
/// The value is always wrapped in double quotes; CR, LF and `"` are
/// percent-encoded so the result stays a single header line.
pub fn content_disposition_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            '"' => out.push_str("%22"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Unquote a `Content-Disposition` option value the WHATWG way.
///
/// Decodes `%0D`, `%0A` and `%22`, and additionally honors the legacy
/// `\r`, `\n` and `\"` escapes some user agents still produce. `filename`
/// triggers the same full-path reduction as [`header_unquote`].
pub fn content_disposition_unquote(value: &str, filename: bool) -> String {
    let inner = match quoted_inner(value) {
        Some(inner) => {
            if filename && is_windows_path(inner) {
                return last_path_segment(inner).to_string();
            }
            inner
        }
        None => value,
    };

    unescape_legacy(inner)
        .replace("%0D", "\r")
        .replace("%0A", "\n")
        .replace("%22", "\"")
}

fn quoted_inner(value: &str) -> Option<&str> {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}

fn is_windows_path(value: &str) -> bool {
    value.get(1..3) == Some(":\\") || value.get(..2) == Some("\\\\")
}

fn last_path_segment(value: &str) -> &str {
    value.rsplit('\\').next().unwrap_or(value)
}

/// Resolve `\"`, `\r` and `\n` escapes; any other backslash is literal.
fn unescape_legacy(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.clone().next() {
            Some('"') => {
                out.push('"');
                chars.next();
            }
            Some('r') => {
                out.push('\r');
                chars.next();
            }
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

// ===== Option list =====

/// Parsed header options: lowercased keys, first occurrence per key.
#[derive(Debug, Clone, Default)]
pub struct Options {
    entries: Vec<(String, String)>,
}

impl Options {
    /// Number of options.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no options were present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value of the option with the given name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if an option with the given name was present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over `(key, value)` pairs in order of appearance.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Parse a header of the shape `value; key=val; key="quoted"`.
///
/// The primary value is lowercased and trimmed. Option keys are lowercased;
/// for repeated keys the first occurrence wins. Values are unquoted with
/// the legacy dialect. Unknown option names are preserved as-is.
///
/// # Errors
///
/// An ill-formed quoted string (unterminated, trailing bare backslash, or
/// junk after the closing quote) fails with
/// [`ParserError::InvalidHeader`].
pub fn parse_options_header(header: &str) -> Result<(String, Options), MultipartError> {
    parse_options(header, header_unquote).map_err(MultipartError::from)
}

pub(crate) fn parse_options(
    header: &str,
    unquote: UnquoteFn,
) -> Result<(String, Options), ParserError> {
    let (primary, tail) = match header.find(';') {
        Some(i) => (&header[..i], &header[i + 1..]),
        None => (header, ""),
    };
    let primary = primary.trim().to_ascii_lowercase();

    let mut options = Options::default();
    let mut rest = tail;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_ascii_whitespace());
        if rest.is_empty() {
            break;
        }

        // key up to '='; items without one are ignored
        let eq = match memchr2(b'=', b';', rest.as_bytes()) {
            Some(i) if rest.as_bytes()[i] == b'=' => i,
            Some(i) => {
                rest = &rest[i + 1..];
                continue;
            }
            None => break,
        };
        let key = rest[..eq].trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let raw;
        if rest.starts_with('"') {
            let close = scan_quoted(rest)?;
            raw = &rest[..=close];
            rest = &rest[close + 1..];

            // only whitespace may follow a quoted value within the item
            let (trailing, next) = match rest.find(';') {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => (rest, ""),
            };
            if !trailing.trim().is_empty() {
                return Err(ParserError::InvalidHeader);
            }
            rest = next;
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            raw = rest[..end].trim_end();
            if raw.contains('"') {
                return Err(ParserError::InvalidHeader);
            }
            rest = &rest[end..];
        }

        if !key.is_empty() && !options.contains(&key) {
            let value = unquote(raw, key == "filename");
            options.entries.push((key, value));
        }
    }

    Ok((primary, options))
}

/// Returns the index of the closing quote of a quoted string starting at 0.
fn scan_quoted(value: &str) -> Result<usize, ParserError> {
    let bytes = value.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 >= bytes.len() {
                    return Err(ParserError::InvalidHeader);
                }
                i += 2;
            }
            b'"' => return Ok(i),
            _ => i += 1,
        }
    }
    Err(ParserError::InvalidHeader)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quote_legacy() {
        assert_eq!(header_quote("foo"), "foo");
        assert_eq!(header_quote("foo\"bar"), "\"foo\\\"bar\"");
        assert_eq!(header_quote("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn unquote_legacy() {
        assert_eq!(header_unquote("\"foo\"", false), "foo");
        assert_eq!(header_unquote("\"foo\\\"bar\"", false), "foo\"bar");
        assert_eq!(header_unquote("plain", false), "plain");
        // IE6 sends full client paths as filename
        assert_eq!(header_unquote("\"\\\\network\\ie.exe\"", true), "ie.exe");
        assert_eq!(header_unquote("\"c:\\windows\\ie.exe\"", true), "ie.exe");
    }

    #[test]
    fn quote_content_disposition() {
        assert_eq!(content_disposition_quote("foo"), "\"foo\"");
        assert_eq!(content_disposition_quote("foo\"bar"), "\"foo%22bar\"");
        assert_eq!(content_disposition_quote("a\r\nb"), "\"a%0D%0Ab\"");
    }

    #[test]
    fn unquote_content_disposition() {
        assert_eq!(content_disposition_unquote("\"foo\"", false), "foo");
        assert_eq!(content_disposition_unquote("foo%22bar", false), "foo\"bar");
        assert_eq!(content_disposition_unquote("\"foo%22bar\"", false), "foo\"bar");
        assert_eq!(content_disposition_unquote("\"foo\\\"bar\"", false), "foo\"bar");
        assert_eq!(content_disposition_unquote("\"a%0D%0Ab\"", false), "a\r\nb");
        assert_eq!(
            content_disposition_unquote("\"\\\\network\\ie.exe\"", true),
            "ie.exe"
        );
        // plain backslashes survive, legacy escapes resolve
        assert_eq!(
            content_disposition_unquote("\"Te%22s\\\\t.txt\"", true),
            "Te\"s\\\\t.txt"
        );
    }

    #[test]
    fn quote_round_trips() {
        for s in ["simple", "with space", "qu\"ote", "back\\slash", "täst"] {
            assert_eq!(header_unquote(&header_quote(s), false), s, "legacy {s:?}");
            assert_eq!(
                content_disposition_unquote(&content_disposition_quote(s), false),
                s,
                "whatwg {s:?}"
            );
        }
        // WHATWG survives line breaks too
        let s = "a\r\nb\"c";
        assert_eq!(
            content_disposition_unquote(&content_disposition_quote(s), false),
            s
        );
    }

    #[test]
    fn options_basic() {
        let (primary, opts) =
            parse_options_header("form-data; name=\"Test\"; filename=\"Test.txt\"").unwrap();
        assert_eq!(primary, "form-data");
        assert_eq!(opts.get("name"), Some("Test"));
        assert_eq!(opts.get("filename"), Some("Test.txt"));
        assert_eq!(opts.len(), 2);
    }

    #[test]
    fn options_no_tail() {
        let (primary, opts) = parse_options_header("text/PLAIN ").unwrap();
        assert_eq!(primary, "text/plain");
        assert!(opts.is_empty());
    }

    #[test]
    fn options_keys_lowercased_and_escapes_resolved() {
        let head = "form-data; name=\"Test\"; ";
        let (_, opts) =
            parse_options_header(&format!("{head}FileName=\"Te\\\"s\\\\t.txt\"")).unwrap();
        assert_eq!(opts.get("filename"), Some("Te\"s\\t.txt"));

        let (_, opts) =
            parse_options_header(&format!("{head}filename=\"C:\\test\\bla.txt\"")).unwrap();
        assert_eq!(opts.get("filename"), Some("bla.txt"));

        let (_, opts) =
            parse_options_header(&format!("{head}filename=\"\\\\test\\bla.txt\"")).unwrap();
        assert_eq!(opts.get("filename"), Some("bla.txt"));

        let (_, opts) = parse_options_header(&format!("{head}filename=\"täst.txt\"")).unwrap();
        assert_eq!(opts.get("filename"), Some("täst.txt"));
    }

    #[test]
    fn options_first_occurrence_wins() {
        let (_, opts) = parse_options_header("form-data; name=a; name=b").unwrap();
        assert_eq!(opts.get("name"), Some("a"));
        assert_eq!(opts.len(), 1);
    }

    #[test]
    fn options_unquoted_token() {
        let (_, opts) = parse_options_header("form-data; name=foo ; charset=utf-8").unwrap();
        assert_eq!(opts.get("name"), Some("foo"));
        assert_eq!(opts.get("charset"), Some("utf-8"));
    }

    #[test]
    fn options_junk_items_skipped() {
        let (_, opts) = parse_options_header("form-data; ; novalue; name=x").unwrap();
        assert_eq!(opts.get("name"), Some("x"));
        assert_eq!(opts.len(), 1);
    }

    #[test]
    fn options_bad_quoting_fails() {
        assert!(parse_options_header("form-data; name=\"unterminated").is_err());
        assert!(parse_options_header("form-data; name=\"bad\\").is_err());
        assert!(parse_options_header("form-data; name=\"a\"junk").is_err());
        assert!(parse_options_header("form-data; name=em\"bedded\"").is_err());
    }

    #[test]
    fn whatwg_dialect_keeps_plain_backslashes() {
        let (_, opts) = parse_options(
            "form-data; FileName=\"Te%22s\\\\t.txt\"",
            content_disposition_unquote,
        )
        .unwrap();
        assert_eq!(opts.get("filename"), Some("Te\"s\\\\t.txt"));
    }
}
