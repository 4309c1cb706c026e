#![cfg(feature = "excel")]

//! Excel (`.xlsx`, `.xls`, `.xlsb`, `.ods`) conversion via calamine.
//!
//! Only the first worksheet is converted. Worksheet row 1 is the header row; every row of the
//! used range below it becomes one JSON object. Blank header cells (or a blank row 1) fall back
//! to `Column<N>` keys.

use std::io::{Cursor, Read, Seek};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use serde_json::{Map, Number, Value};

use crate::error::{IngestionError, IngestionResult};
use crate::types::ConversionMetadata;

use super::peek_to_end;
use super::unified::ConversionHints;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExcelConverter;

impl ExcelConverter {
    /// A stream is Excel if calamine can open it and it holds at least one sheet.
    pub fn validate<R: Read + Seek>(&self, stream: &mut R, _hints: &ConversionHints) -> bool {
        let Ok(bytes) = peek_to_end(stream) else {
            return false;
        };
        match open_workbook(bytes) {
            Ok(wb) => !wb.sheet_names().is_empty(),
            Err(_) => false,
        }
    }

    pub fn convert<R: Read + Seek>(&self, stream: &mut R, _hints: &ConversionHints) -> IngestionResult<String> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        excel_to_json_string(bytes)
    }

    pub fn extract_metadata<R: Read + Seek>(
        &self,
        stream: &mut R,
        _hints: &ConversionHints,
    ) -> IngestionResult<ConversionMetadata> {
        let bytes = peek_to_end(stream)?;
        let mut workbook = open_workbook(bytes)?;
        let names = workbook.sheet_names();
        let range = first_sheet_range(&mut workbook)?;
        let (row_count, column_count) = range.as_ref().map(|r| r.get_size()).unwrap_or((0, 0));
        Ok(ConversionMetadata::Excel {
            sheet_count: names.len(),
            sheet_name: names.first().cloned().unwrap_or_default(),
            row_count,
            column_count,
            has_header: true,
        })
    }
}

/// Convert the first worksheet of an in-memory workbook into a JSON array of objects.
pub fn excel_to_json_string(bytes: Vec<u8>) -> IngestionResult<String> {
    let mut workbook = open_workbook(bytes)?;
    let records = match first_sheet_range(&mut workbook)? {
        Some(range) => sheet_records(&range),
        None => Vec::new(),
    };
    serde_json::to_string(&Value::Array(records)).map_err(|e| IngestionError::format("excel", e))
}

fn open_workbook(bytes: Vec<u8>) -> IngestionResult<Sheets<Cursor<Vec<u8>>>> {
    open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| IngestionError::format("excel", e))
}

fn first_sheet_range(workbook: &mut Sheets<Cursor<Vec<u8>>>) -> IngestionResult<Option<Range<Data>>> {
    match workbook.worksheet_range_at(0) {
        Some(Ok(range)) if !range.is_empty() => Ok(Some(range)),
        Some(Ok(_)) | None => Ok(None),
        Some(Err(e)) => Err(IngestionError::format("excel", e)),
    }
}

fn sheet_records(range: &Range<Data>) -> Vec<Value> {
    let (first_row, first_col) = range.start().map(|(r, c)| (r as usize, c as usize)).unwrap_or((0, 0));
    let mut rows = range.rows();
    // The used range only includes worksheet row 1 when that row has content.
    let header_row = if first_row == 0 { rows.next() } else { None };

    // Blank headers are named after their worksheet column (1-based).
    let width = range.width();
    let headers: Vec<String> = (0..width)
        .map(|idx| {
            let name = header_row
                .and_then(|row| row.get(idx))
                .map(cell_to_header_string)
                .unwrap_or_default();
            let name = name.trim();
            if name.is_empty() {
                format!("Column{}", first_col + idx + 1)
            } else {
                name.to_string()
            }
        })
        .collect();

    rows.map(|row| {
        let mut obj = Map::with_capacity(width);
        for (idx, name) in headers.iter().enumerate() {
            let cell = row.get(idx).unwrap_or(&Data::Empty);
            obj.insert(name.clone(), cell_to_json(cell));
        }
        Value::Object(obj)
    })
    .collect()
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => excel_serial_to_text(d.as_f64()).unwrap_or_else(|| d.to_string()),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
        Data::Empty => "".to_string(),
    }
}

fn cell_to_json(c: &Data) -> Value {
    match c {
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        Data::Empty => Value::String(String::new()),
        other => Value::String(cell_to_header_string(other)),
    }
}

/// Render a 1900-system serial date as ISO 8601 (date only when there is no time part).
fn excel_serial_to_text(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt = epoch.checked_add_signed(TimeDelta::try_milliseconds(millis)?)?;
    let text = if dt.time() == NaiveTime::MIN {
        dt.date().format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    };
    Some(text)
}
