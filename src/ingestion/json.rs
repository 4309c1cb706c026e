//! JSON pass-through.
//!
//! JSON input is already canonical: the converter only confirms it is well-formed and
//! strips a leading byte-order mark. The text is returned unmodified otherwise.

use std::io::{Read, Seek};

use serde::de::IgnoredAny;

use crate::error::{IngestionError, IngestionResult};
use crate::types::ConversionMetadata;

use super::unified::ConversionHints;
use super::{decode_text, peek_to_end};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonConverter;

impl JsonConverter {
    pub fn validate<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> bool {
        let Ok(bytes) = peek_to_end(stream) else {
            return false;
        };
        match decode_text(&bytes, hints.encoding.as_deref()) {
            Ok(d) if !d.had_errors => is_well_formed(&d.text),
            _ => false,
        }
    }

    pub fn convert<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> IngestionResult<String> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        json_from_bytes(&bytes, hints.encoding.as_deref())
    }

    pub fn extract_metadata<R: Read + Seek>(
        &self,
        stream: &mut R,
        hints: &ConversionHints,
    ) -> IngestionResult<ConversionMetadata> {
        let bytes = peek_to_end(stream)?;
        let decoded = decode_text(&bytes, hints.encoding.as_deref())?;
        Ok(ConversionMetadata::Json {
            encoding: decoded.encoding.name().to_string(),
        })
    }
}

/// Decode `bytes` and confirm they hold exactly one JSON value.
pub fn json_from_bytes(bytes: &[u8], encoding: Option<&str>) -> IngestionResult<String> {
    let decoded = decode_text(bytes, encoding)?;
    if decoded.had_errors {
        return Err(IngestionError::format(
            "json",
            format!("input is not valid {}", decoded.encoding.name()),
        ));
    }
    serde_json::from_str::<IgnoredAny>(&decoded.text).map_err(|e| IngestionError::format("json", e))?;
    Ok(decoded.text.into_owned())
}

fn is_well_formed(text: &str) -> bool {
    serde_json::from_str::<IgnoredAny>(text).is_ok()
}
