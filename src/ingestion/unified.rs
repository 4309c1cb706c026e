//! Converter dispatch.
//!
//! [`ConverterRegistry`] maps a format tag to a [`Converter`], or sniffs the format of an
//! unlabelled stream.
//!
//! ```
//! use std::io::Cursor;
//!
//! use rust_data_ingestion::ingestion::{ConversionHints, ConverterRegistry, IngestionFormat};
//!
//! # fn main() -> Result<(), rust_data_ingestion::IngestionError> {
//! let registry = ConverterRegistry::builtin();
//! let mut stream = Cursor::new(b"<root><item>x</item><item>y</item></root>".to_vec());
//!
//! let converter = registry.detect(&mut stream)?;
//! assert_eq!(converter.format(), IngestionFormat::Xml);
//!
//! let json = converter.convert(&mut stream, &ConversionHints::default())?;
//! assert_eq!(json, r#"{"item":["x","y"]}"#);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::{Read, Seek};
use std::str::FromStr;

use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::types::ConversionMetadata;

use super::csv::CsvConverter;
#[cfg(feature = "excel")]
use super::excel::ExcelConverter;
use super::json::JsonConverter;
use super::xml::XmlConverter;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestionFormat {
    /// Comma-separated (or otherwise delimited) values.
    Csv,
    /// Already-canonical JSON.
    Json,
    /// XML document.
    Xml,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl IngestionFormat {
    /// Sniffing priority used by [`ConverterRegistry::detect`].
    pub const DETECTION_ORDER: [IngestionFormat; 4] = [Self::Json, Self::Xml, Self::Csv, Self::Excel];

    /// Parse a declared format tag (case-insensitive). `xlsx` is accepted as an alias of `excel`.
    pub fn from_tag(tag: &str) -> IngestionResult<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "excel" | "xlsx" => Ok(Self::Excel),
            _ => Err(IngestionError::UnsupportedFormat(tag.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Excel => "excel",
        }
    }
}

impl fmt::Display for IngestionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionFormat {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

/// Optional per-call conversion hints.
///
/// Converters that have no use for a hint ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionHints {
    /// Text encoding label understood by `encoding_rs` (e.g. `"windows-1252"`).
    pub encoding: Option<String>,
    /// Field delimiter for CSV.
    pub delimiter: Option<u8>,
}

/// One compiled-in format converter.
#[derive(Debug, Clone)]
pub enum Converter {
    Csv(CsvConverter),
    Json(JsonConverter),
    Xml(XmlConverter),
    #[cfg(feature = "excel")]
    Excel(ExcelConverter),
}

impl Converter {
    pub fn format(&self) -> IngestionFormat {
        match self {
            Self::Csv(_) => IngestionFormat::Csv,
            Self::Json(_) => IngestionFormat::Json,
            Self::Xml(_) => IngestionFormat::Xml,
            #[cfg(feature = "excel")]
            Self::Excel(_) => IngestionFormat::Excel,
        }
    }

    /// Whether the stream plausibly holds this format. Never moves the stream position.
    pub fn validate<R: Read + Seek>(&self, stream: &mut R) -> bool {
        self.validate_with(stream, &ConversionHints::default())
    }

    /// [`validate`](Self::validate) under the encoding and delimiter the caller will convert with.
    pub fn validate_with<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> bool {
        match self {
            Self::Csv(c) => c.validate(stream, hints),
            Self::Json(c) => c.validate(stream, hints),
            Self::Xml(c) => c.validate(stream, hints),
            #[cfg(feature = "excel")]
            Self::Excel(c) => c.validate(stream, hints),
        }
    }

    /// Convert the remaining bytes of `stream` into canonical JSON.
    pub fn convert<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> IngestionResult<String> {
        match self {
            Self::Csv(c) => c.convert(stream, hints),
            Self::Json(c) => c.convert(stream, hints),
            Self::Xml(c) => c.convert(stream, hints),
            #[cfg(feature = "excel")]
            Self::Excel(c) => c.convert(stream, hints),
        }
    }

    /// Structural facts about the stream. Never moves the stream position.
    pub fn extract_metadata<R: Read + Seek>(&self, stream: &mut R) -> IngestionResult<ConversionMetadata> {
        self.extract_metadata_with(stream, &ConversionHints::default())
    }

    /// Metadata as seen through `hints`, so it names the delimiter and encoding that
    /// [`convert`](Self::convert) used with the same hints.
    pub fn extract_metadata_with<R: Read + Seek>(
        &self,
        stream: &mut R,
        hints: &ConversionHints,
    ) -> IngestionResult<ConversionMetadata> {
        match self {
            Self::Csv(c) => c.extract_metadata(stream, hints),
            Self::Json(c) => c.extract_metadata(stream, hints),
            Self::Xml(c) => c.extract_metadata(stream, hints),
            #[cfg(feature = "excel")]
            Self::Excel(c) => c.extract_metadata(stream, hints),
        }
    }
}

/// Immutable set of converters, one per compiled-in format.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: Vec<Converter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConverterRegistry {
    /// Every converter enabled by the current cargo features, in detection order.
    pub fn builtin() -> Self {
        let mut converters = Vec::with_capacity(IngestionFormat::DETECTION_ORDER.len());
        for format in IngestionFormat::DETECTION_ORDER {
            match format {
                IngestionFormat::Json => converters.push(Converter::Json(JsonConverter)),
                IngestionFormat::Xml => converters.push(Converter::Xml(XmlConverter)),
                IngestionFormat::Csv => converters.push(Converter::Csv(CsvConverter::default())),
                #[cfg(feature = "excel")]
                IngestionFormat::Excel => converters.push(Converter::Excel(ExcelConverter)),
                #[cfg(not(feature = "excel"))]
                IngestionFormat::Excel => {}
            }
        }
        Self { converters }
    }

    /// Formats this registry can convert.
    pub fn formats(&self) -> impl Iterator<Item = IngestionFormat> + '_ {
        self.converters.iter().map(Converter::format)
    }

    /// Converter for a declared format tag (`csv`, `xml`, `excel`/`xlsx`, `json`).
    pub fn resolve(&self, tag: &str) -> IngestionResult<&Converter> {
        self.resolve_format(IngestionFormat::from_tag(tag)?)
    }

    pub fn resolve_format(&self, format: IngestionFormat) -> IngestionResult<&Converter> {
        self.converters
            .iter()
            .find(|c| c.format() == format)
            .ok_or_else(|| match format {
                IngestionFormat::Excel => IngestionError::UnsupportedFormat(
                    "excel (enable cargo feature 'excel')".to_string(),
                ),
                other => IngestionError::UnsupportedFormat(other.to_string()),
            })
    }

    /// Sniff the format by asking each converter, in detection order, to validate the stream.
    ///
    /// The stream position is unchanged afterwards.
    pub fn detect<R: Read + Seek>(&self, stream: &mut R) -> IngestionResult<&Converter> {
        self.detect_with(stream, &ConversionHints::default())
    }

    /// [`detect`](Self::detect), validating each candidate under `hints`.
    pub fn detect_with<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> IngestionResult<&Converter> {
        for converter in &self.converters {
            if converter.validate_with(stream, hints) {
                debug!(format = %converter.format(), "detected input format");
                return Ok(converter);
            }
        }
        Err(IngestionError::UnsupportedFormat(
            "could not detect format (no converter accepted the input)".to_string(),
        ))
    }
}
