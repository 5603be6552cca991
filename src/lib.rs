//! Incremental parser for `multipart/form-data`.
//!
//! # Parsing
//!
//! The core of this crate is [`PushParser`], a sans-I/O state machine that
//! accepts byte chunks of arbitrary length and yields a stream of typed
//! [`Event`]s: a fully parsed [`Segment`] header block, zero-copy body
//! fragments, and an end marker per segment. The parser never buffers more
//! than a small sliding window, enforces a configurable set of [`Limits`]
//! against hostile input, and fails fast on anything malformed.
//!
//! ```rust
//! use formdata::{Event, PushParser};
//!
//! fn collect(chunks: &[&[u8]]) -> Result<(), formdata::MultipartError> {
//!     let mut parser = PushParser::new("boundary")?;
//!     for chunk in chunks {
//!         for event in parser.parse(chunk) {
//!             match event? {
//!                 Event::Segment(segment) => println!("field {:?}", segment.name()),
//!                 Event::Data(data) => println!("{} body bytes", data.len()),
//!                 Event::End => println!("segment done"),
//!             }
//!         }
//!     }
//!     parser.parse(&[]).count(); // empty chunk signals end of stream
//!     parser.close()
//! }
//! ```
//!
//! # Buffered parts
//!
//! [`MultipartParser`] drives a [`PushParser`] from any blocking
//! [`Read`][std::io::Read] source and materializes each segment into a
//! [`Part`] whose body lives in memory below `memfile_limit` and spills to
//! an unlinked temp file above it. [`parse_form_data`] is the request-level
//! helper splitting a form body into text fields and file parts.
#![warn(missing_debug_implementations)]

mod log;

mod error;
mod form;
mod headers;
mod multidict;
mod options;
mod parser;
mod part;
mod reader;

// ===== Reexports =====

pub use error::{MultipartError, ParserError};
pub use form::{is_form_request, parse_boundary, parse_form_data, FormData};
pub use headers::HeaderList;
pub use multidict::MultiDict;
pub use options::{
    content_disposition_quote, content_disposition_unquote, header_quote, header_unquote,
    parse_options_header, Options,
};
pub use parser::{Event, Events, Limits, PushParser, Segment};
pub use part::Part;
pub use reader::{MultipartConfig, MultipartParser};
