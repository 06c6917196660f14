//! Line-level source map handling.
//!
//! The runtime transpiles TypeScript before running it and reports transpiled
//! positions. Only line numbers matter to the bridge: columns are passed
//! through untouched. Both directions are plain `HashMap<u32, u32>` lookups
//! with identity fallback for unmapped lines.

use std::collections::HashMap;

use base64::Engine as _;
use serde::Deserialize;

const DATA_URL_PREFIX: &str = "data:application/json";

#[derive(Debug, thiserror::Error)]
pub enum SourceMapError {
    #[error("source map URL is not an inline base64 data URL")]
    NotInline,
    #[error("invalid base64 in source map: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid source map JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("source map line offsets overflow")]
    Overflow,
}

#[derive(Deserialize)]
struct RawSourceMap {
    #[serde(default)]
    mappings: String,
}

/// Decode one base64 VLQ segment into its signed fields.
///
/// Continuation bit is 32, the sign is carried in the lowest bit of each value.
/// Characters outside the base64 alphabet are skipped.
pub fn decode_vlq(segment: &str) -> Vec<i64> {
    let mut values = Vec::new();
    let mut shift = 0u32;
    let mut value: i64 = 0;

    for byte in segment.bytes() {
        let Some(digit) = base64_digit(byte) else {
            continue;
        };
        let digit = i64::from(digit);
        if shift < 60 {
            value += (digit & 31) << shift;
        }
        if digit & 32 != 0 {
            shift += 5;
            continue;
        }
        let negative = value & 1 == 1;
        let magnitude = value >> 1;
        values.push(if negative { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }

    values
}

fn base64_digit(byte: u8) -> Option<u8> {
    match byte {
        b'A'..=b'Z' => Some(byte - b'A'),
        b'a'..=b'z' => Some(byte - b'a' + 26),
        b'0'..=b'9' => Some(byte - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Bidirectional line map between original and transpiled code, 0-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMapping {
    original_to_transpiled: HashMap<u32, u32>,
    transpiled_to_original: HashMap<u32, u32>,
}

impl LineMapping {
    /// Build the mapping from a `mappings` string.
    ///
    /// `;` separates transpiled lines and `,` separates segments. The third
    /// field of a segment moves a running original line. When several
    /// transpiled lines map to one original line the first one wins; when one
    /// transpiled line covers several original lines the largest wins.
    pub fn from_mappings(mappings: &str) -> Result<Self, SourceMapError> {
        let mut mapping = Self::default();
        let mut original_line: i64 = 0;

        for (transpiled, line) in mappings.split(';').enumerate() {
            let Ok(transpiled) = u32::try_from(transpiled) else {
                break;
            };
            for segment in line.split(',').filter(|s| !s.is_empty()) {
                let fields = decode_vlq(segment);
                if fields.len() < 4 {
                    continue;
                }
                original_line = original_line
                    .checked_add(fields[2])
                    .ok_or(SourceMapError::Overflow)?;
                let Ok(original) = u32::try_from(original_line) else {
                    continue;
                };

                mapping
                    .original_to_transpiled
                    .entry(original)
                    .or_insert(transpiled);
                mapping
                    .transpiled_to_original
                    .entry(transpiled)
                    .and_modify(|existing| *existing = (*existing).max(original))
                    .or_insert(original);
            }
        }

        Ok(mapping)
    }

    pub fn from_json(json: &str) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(json)?;
        Self::from_mappings(&raw.mappings)
    }

    /// Parse an inline `data:application/json[;charset=..];base64,` URL.
    pub fn from_data_url(url: &str) -> Result<Self, SourceMapError> {
        if !url.starts_with(DATA_URL_PREFIX) {
            return Err(SourceMapError::NotInline);
        }
        let (_, payload) = url
            .split_once(";base64,")
            .ok_or(SourceMapError::NotInline)?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        let json = String::from_utf8_lossy(&bytes);
        Self::from_json(&json)
    }

    pub fn is_empty(&self) -> bool {
        self.original_to_transpiled.is_empty()
    }

    pub fn to_transpiled(&self, original: u32) -> u32 {
        match self.original_to_transpiled.get(&original) {
            Some(&line) => line,
            None => {
                if !self.is_empty() {
                    tracing::debug!(
                        target: "ferry.dap",
                        line = original,
                        "no transpiled line for original line; using it unchanged"
                    );
                }
                original
            }
        }
    }

    pub fn to_original(&self, transpiled: u32) -> u32 {
        self.transpiled_to_original
            .get(&transpiled)
            .copied()
            .unwrap_or(transpiled)
    }
}
