//! Core data model types shared by connectors, converters and the pipeline.
//!
//! A [`SourceDescriptor`] names one configured external source. Connectors turn it into
//! file references, bytes and [`FileMetadata`]; converters turn bytes into canonical JSON plus
//! [`ConversionMetadata`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, IngestionResult};

/// Transport used to reach a source. Selects the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Local or network-mounted filesystem directory.
    Local,
    /// FTP server (optionally explicit TLS).
    Ftp,
    /// SSH file transfer.
    Sftp,
    /// Kafka topic; each message is one "file".
    Kafka,
    /// HTTP(S) API endpoint(s).
    Http,
}

impl SourceType {
    /// Every source type, in registry order.
    pub const ALL: [SourceType; 5] = [
        SourceType::Local,
        SourceType::Ftp,
        SourceType::Sftp,
        SourceType::Kafka,
        SourceType::Http,
    ];

    /// Lowercase tag (`local`, `ftp`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
            Self::Kafka => "kafka",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = IngestionError;

    /// Parse a source type tag (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ftp" => Ok(Self::Ftp),
            "sftp" => Ok(Self::Sftp),
            "kafka" => Ok(Self::Kafka),
            "http" => Ok(Self::Http),
            _ => Err(IngestionError::UnsupportedSourceType(s.to_string())),
        }
    }
}

/// A single descriptor option value.
///
/// Options are scalars. The one exception is a string map, used for custom HTTP headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, String>),
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<BTreeMap<String, String>> for OptionValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        Self::Map(v)
    }
}

/// Configuration identifying one external source.
///
/// The descriptor is read-only to this crate. `options` are not validated on construction;
/// each connector validates the keys it understands the first time it uses them, failing with
/// [`IngestionError::InvalidArgument`] on a mistyped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type")]
    source_type: SourceType,
    address: String,
    #[serde(default)]
    options: BTreeMap<String, OptionValue>,
}

impl SourceDescriptor {
    /// Create a descriptor with no options.
    pub fn new(source_type: SourceType, address: impl Into<String>) -> Self {
        Self {
            source_type,
            address: address.into(),
            options: BTreeMap::new(),
        }
    }

    /// Builder-style option setter.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    /// Protocol-specific root: directory, server host, topic name or base URL.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    /// Read an option as text. Numbers and booleans are rendered; maps are rejected.
    pub fn option_string(&self, key: &str) -> IngestionResult<Option<String>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(OptionValue::String(s)) => Ok(Some(s.clone())),
            Some(OptionValue::Integer(i)) => Ok(Some(i.to_string())),
            Some(OptionValue::Float(f)) => Ok(Some(f.to_string())),
            Some(OptionValue::Bool(b)) => Ok(Some(b.to_string())),
            Some(OptionValue::Map(_)) => Err(self.mistyped(key, "a string")),
        }
    }

    /// Read an option as a boolean. Accepts `true`/`false`/`1`/`0`/`yes`/`no` strings.
    pub fn option_bool(&self, key: &str) -> IngestionResult<Option<bool>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(OptionValue::Bool(b)) => Ok(Some(*b)),
            Some(OptionValue::Integer(0)) => Ok(Some(false)),
            Some(OptionValue::Integer(1)) => Ok(Some(true)),
            Some(OptionValue::String(s)) => parse_bool(s)
                .map(Some)
                .map_err(|_| self.mistyped(key, "a boolean")),
            Some(_) => Err(self.mistyped(key, "a boolean")),
        }
    }

    /// Read an option as a non-negative integer.
    pub fn option_u64(&self, key: &str) -> IngestionResult<Option<u64>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(OptionValue::Integer(i)) => u64::try_from(*i)
                .map(Some)
                .map_err(|_| self.mistyped(key, "a non-negative integer")),
            Some(OptionValue::Float(f)) if f.fract() == 0.0 && *f >= 0.0 => Ok(Some(*f as u64)),
            Some(OptionValue::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| self.mistyped(key, "a non-negative integer")),
            Some(_) => Err(self.mistyped(key, "a non-negative integer")),
        }
    }

    /// Read an option as a TCP port.
    pub fn option_port(&self, key: &str) -> IngestionResult<Option<u16>> {
        match self.option_u64(key)? {
            None => Ok(None),
            Some(v) => u16::try_from(v)
                .map(Some)
                .map_err(|_| self.mistyped(key, "a port number (0-65535)")),
        }
    }

    /// Read an option as a string map. A JSON object encoded as a string is also accepted.
    pub fn option_map(&self, key: &str) -> IngestionResult<Option<BTreeMap<String, String>>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(OptionValue::Map(m)) => Ok(Some(m.clone())),
            Some(OptionValue::String(s)) if s.trim().is_empty() => Ok(Some(BTreeMap::new())),
            Some(OptionValue::String(s)) => serde_json::from_str::<BTreeMap<String, String>>(s)
                .map(Some)
                .map_err(|_| self.mistyped(key, "a JSON object of string values")),
            Some(_) => Err(self.mistyped(key, "a map of strings")),
        }
    }

    fn mistyped(&self, key: &str, expected: &str) -> IngestionError {
        IngestionError::invalid_argument(format!(
            "option '{key}' of {} source '{}' must be {expected}",
            self.source_type, self.address
        ))
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}

/// Result of a connector `describe` call. Computed per call, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// The reference (or resolved full path) that was described.
    pub path: String,
    /// Last path component, or a synthetic name for messages.
    pub name: String,
    /// Size in bytes; 0 when the protocol cannot tell before consuming.
    pub size_bytes: u64,
    pub last_modified_utc: DateTime<Utc>,
    /// `None` when the protocol does not expose a creation time (SFTP, HTTP, Kafka).
    pub created_utc: Option<DateTime<Utc>>,
    pub content_type: String,
    /// Protocol-specific facts (permissions, owner, partition/offset).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Structural facts captured while converting one file.
///
/// Enough to interpret the canonical JSON or attempt a best-effort reconstruction of the
/// source file's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ConversionMetadata {
    Csv {
        delimiter: char,
        encoding: String,
        has_header: bool,
        /// Raw first line of the file.
        headers: String,
    },
    Xml {
        root_element: String,
        encoding: String,
        has_namespace: bool,
    },
    Excel {
        sheet_count: usize,
        sheet_name: String,
        row_count: usize,
        column_count: usize,
        has_header: bool,
    },
    Json {
        encoding: String,
    },
}

impl ConversionMetadata {
    /// Flatten into plain string key-value pairs for downstream collaborators.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        match self {
            Self::Csv {
                delimiter,
                encoding,
                has_header,
                headers,
            } => {
                out.insert("Format".to_string(), "csv".to_string());
                out.insert("Delimiter".to_string(), delimiter.to_string());
                out.insert("Encoding".to_string(), encoding.clone());
                out.insert("HasHeader".to_string(), has_header.to_string());
                out.insert("Headers".to_string(), headers.clone());
            }
            Self::Xml {
                root_element,
                encoding,
                has_namespace,
            } => {
                out.insert("Format".to_string(), "xml".to_string());
                out.insert("RootElement".to_string(), root_element.clone());
                out.insert("Encoding".to_string(), encoding.clone());
                out.insert("HasNamespace".to_string(), has_namespace.to_string());
            }
            Self::Excel {
                sheet_count,
                sheet_name,
                row_count,
                column_count,
                has_header,
            } => {
                out.insert("Format".to_string(), "excel".to_string());
                out.insert("SheetCount".to_string(), sheet_count.to_string());
                out.insert("SheetName".to_string(), sheet_name.clone());
                out.insert("RowCount".to_string(), row_count.to_string());
                out.insert("ColumnCount".to_string(), column_count.to_string());
                out.insert("HasHeader".to_string(), has_header.to_string());
            }
            Self::Json { encoding } => {
                out.insert("Format".to_string(), "json".to_string());
                out.insert("Encoding".to_string(), encoding.clone());
            }
        }
        out
    }
}
