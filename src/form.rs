//! Request-level form parsing helpers.

use std::io::Read;

use encoding_rs::Encoding;

use crate::error::{MultipartError, ParserError};
use crate::log::warning;
use crate::multidict::MultiDict;
use crate::options::parse_options_header;
use crate::part::Part;
use crate::reader::{MultipartConfig, MultipartParser};

/// A parsed form body: decoded text fields and file-backed parts.
///
/// Segments with a filename, and text fields too large to stay in memory,
/// land in `files`; everything else is decoded into `fields`.
#[derive(Debug)]
pub struct FormData {
    /// Text fields by name, in submission order.
    pub fields: MultiDict<String>,
    /// File uploads and oversized fields by name, in submission order.
    pub files: MultiDict<Part>,
}

/// Returns `true` if a request with this `Content-Type` carries a form
/// body this crate can parse, regardless of the HTTP method.
pub fn is_form_request(content_type: &str) -> bool {
    let primary = content_type.split(';').next().unwrap_or("").trim();
    primary.eq_ignore_ascii_case("multipart/form-data")
        || primary.eq_ignore_ascii_case("application/x-www-form-urlencoded")
        || primary.eq_ignore_ascii_case("application/x-url-encoded")
}

/// Extract the multipart boundary from a `Content-Type` header value.
///
/// # Errors
///
/// [`ParserError::UnsupportedContentType`] when the primary value is not
/// `multipart/form-data`, [`ParserError::InvalidBoundary`] when the
/// boundary option is missing or empty.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let (primary, options) = parse_options_header(content_type)?;
    if primary != "multipart/form-data" {
        return Err(ParserError::UnsupportedContentType.into());
    }
    match options.get("boundary") {
        Some(boundary) if !boundary.is_empty() => Ok(boundary.to_string()),
        _ => Err(ParserError::InvalidBoundary.into()),
    }
}

/// Parse a form request body into text fields and file parts.
///
/// Supports `multipart/form-data` and `application/x-www-form-urlencoded`
/// bodies. A `charset` option on the request `Content-Type` overrides the
/// configured default.
///
/// In strict mode (or with
/// [`raise_on_error`][MultipartConfig::raise_on_error]) any parse error is
/// propagated. Lenient mode returns whatever was parsed before the error.
pub fn parse_form_data<R: Read>(
    content_type: &str,
    body: R,
    config: MultipartConfig,
) -> Result<FormData, MultipartError> {
    let propagate = config.strict || config.raise_on_error;
    let mut fields = MultiDict::new();
    let mut files = MultiDict::new();

    match fill_form_data(content_type, body, config, &mut fields, &mut files) {
        Ok(()) => {}
        Err(err) if propagate => return Err(err),
        Err(err) => {
            warning!("discarding form parse error: {err}");
        }
    }

    Ok(FormData { fields, files })
}

fn fill_form_data<R: Read>(
    content_type: &str,
    body: R,
    mut config: MultipartConfig,
    fields: &mut MultiDict<String>,
    files: &mut MultiDict<Part>,
) -> Result<(), MultipartError> {
    let (primary, options) = parse_options_header(content_type)?;
    if let Some(label) = options.get("charset") {
        if let Some(charset) = Encoding::for_label(label.as_bytes()) {
            config.charset = charset;
        }
    }

    match primary.as_str() {
        "multipart/form-data" => {
            let boundary = match options.get("boundary") {
                Some(boundary) if !boundary.is_empty() => boundary.to_string(),
                _ => return Err(ParserError::InvalidBoundary.into()),
            };
            let mut parser = MultipartParser::with_config(body, boundary, config)?;
            while let Some(mut part) = parser.next_part()? {
                if part.filename().is_some() || !part.is_buffered() {
                    files.append(part.name().to_string(), part);
                } else {
                    let value = part.value()?;
                    fields.append(part.name().to_string(), value);
                }
            }
            Ok(())
        }
        "application/x-www-form-urlencoded" | "application/x-url-encoded" => {
            parse_urlencoded(body, &config, fields)
        }
        _ => Err(ParserError::UnsupportedContentType.into()),
    }
}

fn parse_urlencoded<R: Read>(
    mut body: R,
    config: &MultipartConfig,
    fields: &mut MultiDict<String>,
) -> Result<(), MultipartError> {
    let limit = config.mem_limit;
    let mut data = Vec::new();
    body.by_ref()
        .take(limit.saturating_add(1))
        .read_to_end(&mut data)?;
    if data.len() as u64 > limit {
        return Err(MultipartError::Limit("mem_limit"));
    }

    let (text, _) = config.charset.decode_without_bom_handling(&data);
    for (key, value) in form_urlencoded::parse(text.as_bytes()) {
        fields.append(key.into_owned(), value.into_owned());
    }
    Ok(())
}
