//! CSV conversion.
//!
//! Rules:
//!
//! - The first row is the header row.
//! - Every data row becomes one JSON object whose keys are the header names, in header order.
//! - Values are always JSON strings (no type inference).
//! - Short rows fill the missing fields with `""`; extra trailing fields are ignored.

use std::io::{Read, Seek};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{IngestionError, IngestionResult};
use crate::types::ConversionMetadata;

use super::unified::ConversionHints;
use super::{decode_text, peek_to_end};

/// Delimiter used when neither the converter nor the hints specify one.
pub const DEFAULT_DELIMITER: u8 = b',';

/// CSV to canonical JSON converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvConverter {
    delimiter: u8,
}

impl Default for CsvConverter {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl CsvConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different default delimiter (e.g. `b';'` or `b'\t'`).
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Delimiter in effect for a call: the hinted one, else the converter's own.
    pub fn effective_delimiter(&self, hints: &ConversionHints) -> u8 {
        hints.delimiter.unwrap_or(self.delimiter)
    }

    /// Cheap plausibility check: the first line decodes cleanly (with the hinted encoding, if
    /// any) and contains the effective delimiter.
    pub fn validate<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> bool {
        let Ok(bytes) = peek_to_end(stream) else {
            return false;
        };
        let Ok(decoded) = decode_text(&bytes, hints.encoding.as_deref()) else {
            return false;
        };
        if decoded.had_errors {
            return false;
        }
        let first_line = decoded.text.lines().next().unwrap_or("");
        first_line.contains(self.effective_delimiter(hints) as char)
    }

    /// Convert the stream (from its current position) into a JSON array of objects.
    pub fn convert<R: Read + Seek>(&self, stream: &mut R, hints: &ConversionHints) -> IngestionResult<String> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        let decoded = decode_text(&bytes, hints.encoding.as_deref())?;
        if decoded.had_errors {
            warn!(
                encoding = decoded.encoding.name(),
                "csv input contained undecodable bytes; replaced with U+FFFD"
            );
        }
        let delimiter = self.effective_delimiter(hints);
        let records = csv_records_from_str(&decoded.text, delimiter)?;
        serde_json::to_string(&Value::Array(records)).map_err(|e| IngestionError::format("csv", e))
    }

    /// Reports the delimiter and encoding `convert` would use with the same hints.
    pub fn extract_metadata<R: Read + Seek>(
        &self,
        stream: &mut R,
        hints: &ConversionHints,
    ) -> IngestionResult<ConversionMetadata> {
        let bytes = peek_to_end(stream)?;
        let decoded = decode_text(&bytes, hints.encoding.as_deref())?;
        let headers = decoded.text.lines().next().unwrap_or("").to_string();
        Ok(ConversionMetadata::Csv {
            delimiter: self.effective_delimiter(hints) as char,
            encoding: decoded.encoding.name().to_string(),
            has_header: true,
            headers,
        })
    }
}

/// Parse already-decoded CSV text into one JSON object per data row.
pub fn csv_records_from_str(input: &str, delimiter: u8) -> IngestionResult<Vec<Value>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(input.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| IngestionError::format("csv", format!("cannot read header row: {e}")))?
        .clone();

    let mut out = Vec::new();
    for (row_idx0, result) in rdr.records().enumerate() {
        // 1-based, +1 for the header row.
        let user_row = row_idx0 + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(row = user_row, error = %e, "skipping unreadable csv row");
                continue;
            }
        };

        let mut obj = Map::with_capacity(headers.len());
        for (idx, name) in headers.iter().enumerate() {
            let raw = record.get(idx).unwrap_or("");
            obj.insert(name.to_string(), Value::String(raw.to_string()));
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::csv_records_from_str;

    #[test]
    fn short_rows_are_padded_and_long_rows_truncated() {
        let rows = csv_records_from_str("a,b,c\n1\n1,2,3,4\n", b',').unwrap();
        assert_eq!(
            rows,
            vec![
                json!({"a":"1","b":"","c":""}),
                json!({"a":"1","b":"2","c":"3"}),
            ]
        );
    }

    #[test]
    fn header_only_input_yields_no_records() {
        assert!(csv_records_from_str("a,b\n", b',').unwrap().is_empty());
        assert!(csv_records_from_str("", b',').unwrap().is_empty());
    }

    #[test]
    fn quoted_fields_keep_embedded_delimiters() {
        let rows = csv_records_from_str("name;note\n\"Doe; J\";\"x\"\"y\"\n", b';').unwrap();
        assert_eq!(rows, vec![json!({"name":"Doe; J","note":"x\"y"})]);
    }
}
