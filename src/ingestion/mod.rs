//! Format converters: CSV, XML, Excel and JSON into canonical JSON.
//!
//! Most callers go through [`ConverterRegistry`] (from [`unified`]), which:
//!
//! - resolves a declared format tag to its [`Converter`]
//! - or sniffs the format by probing `validate` in priority order (json, xml, csv, excel)
//!
//! Format-specific converters are also available under:
//! - [`csv`]
//! - [`json`]
//! - [`xml`]
//! - [`excel`] (feature `excel`)
//!
//! Every converter works on an in-memory `Read + Seek` stream. `validate` and
//! `extract_metadata` always leave the stream where they found it, so the same buffer can be
//! probed by several converters before one of them converts it.

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod json;
pub mod observability;
pub mod unified;
pub mod xml;

use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom};

use encoding_rs::{Encoding, UTF_8};

use crate::error::{IngestionError, IngestionResult};

pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    TracingObserver,
};
pub use unified::{ConversionHints, Converter, ConverterRegistry, IngestionFormat};

/// Run `f` against `stream`, then seek back to the position the stream had on entry.
///
/// The position is restored whether `f` succeeds or fails.
pub(crate) fn with_rewind<R, T, F>(stream: &mut R, f: F) -> io::Result<T>
where
    R: Read + Seek,
    F: FnOnce(&mut R) -> io::Result<T>,
{
    let start = stream.stream_position()?;
    let out = f(stream);
    stream.seek(SeekFrom::Start(start))?;
    out
}

/// Read everything from the current position to the end, then rewind.
pub(crate) fn peek_to_end<R: Read + Seek>(stream: &mut R) -> io::Result<Vec<u8>> {
    with_rewind(stream, |s| {
        let mut buf = Vec::new();
        s.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

/// Decoded text plus the encoding that was actually used.
pub(crate) struct DecodedText<'a> {
    pub text: Cow<'a, str>,
    pub encoding: &'static Encoding,
    /// True when malformed sequences were replaced with U+FFFD.
    pub had_errors: bool,
}

/// Decode `bytes` using the encoding named by `label`, or UTF-8 when no label is given.
///
/// A byte-order mark always wins over the label and is stripped from the output.
pub(crate) fn decode_text<'a>(bytes: &'a [u8], label: Option<&str>) -> IngestionResult<DecodedText<'a>> {
    let requested = match label {
        Some(l) => Encoding::for_label(l.trim().as_bytes())
            .ok_or_else(|| IngestionError::invalid_argument(format!("unknown text encoding '{l}'")))?,
        None => UTF_8,
    };
    let (text, encoding, had_errors) = requested.decode(bytes);
    Ok(DecodedText {
        text,
        encoding,
        had_errors,
    })
}
