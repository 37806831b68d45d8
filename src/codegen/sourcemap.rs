//! Source Map V3: VLQ mappings, line shifting, and position queries.
//!
//! Mappings are kept as structured records until the linker fixes the
//! final prelude; prepended lines are a pure line offset, applied either
//! on the records or directly on an encoded string (one `;` per line).

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, ErrorReporting, HqlError, ReportContext, SourceContext};

const BASE64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// One generated-to-original position record. All fields are 0-based,
/// columns in UTF-16 units, matching the V3 format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source_line: u32,
    pub source_column: u32,
}

/// The Source Map V3 JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn new(source: impl Into<String>, content: Option<String>, mappings: String) -> Self {
        SourceMap {
            version: 3,
            file: None,
            sources: vec![source.into()],
            sources_content: content.map(|c| vec![Some(c)]),
            names: vec![],
            mappings,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("source map serializes")
    }

    /// Queries the original position for a generated one (1-based lines,
    /// 0-based columns on both sides). Returns the closest mapping at or
    /// before the generated position on the same line.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<(u32, u32)> {
        original_position_for(&self.mappings, line, column)
    }
}

// ============================================================================
// VLQ
// ============================================================================

fn vlq_encode(value: i64, out: &mut String) {
    let mut vlq = if value < 0 {
        (((-value) as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq != 0 {
            digit |= 0b100000;
        }
        out.push(BASE64_CHARS[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn vlq_decode(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<i64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let c = chars.next()?;
        let digit = BASE64_CHARS.iter().position(|&b| b as char == c)? as u64;
        result |= (digit & 0b11111) << shift;
        if digit & 0b100000 == 0 {
            break;
        }
        shift += 5;
    }
    let negative = result & 1 == 1;
    let value = (result >> 1) as i64;
    Some(if negative { -value } else { value })
}

// ============================================================================
// MAPPINGS STRING
// ============================================================================

/// Encodes mapping records into the `mappings` field. Records must refer
/// to source index 0 (one HQL source per compiled module).
pub fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut sorted: Vec<Mapping> = mappings.to_vec();
    sorted.sort_by_key(|m| (m.generated_line, m.generated_column));

    let mut out = String::new();
    let mut current_line = 0u32;
    let mut prev_gen_col = 0i64;
    let mut prev_src_line = 0i64;
    let mut prev_src_col = 0i64;
    let mut first_on_line = true;

    for m in &sorted {
        while current_line < m.generated_line {
            out.push(';');
            current_line += 1;
            prev_gen_col = 0;
            first_on_line = true;
        }
        if !first_on_line {
            out.push(',');
        }
        vlq_encode(m.generated_column as i64 - prev_gen_col, &mut out);
        vlq_encode(0, &mut out); // source index, always 0
        vlq_encode(m.source_line as i64 - prev_src_line, &mut out);
        vlq_encode(m.source_column as i64 - prev_src_col, &mut out);
        prev_gen_col = m.generated_column as i64;
        prev_src_line = m.source_line as i64;
        prev_src_col = m.source_column as i64;
        first_on_line = false;
    }
    out
}

/// Decodes a `mappings` string back to records; segments without a source
/// reference are skipped.
pub fn decode_mappings(encoded: &str) -> Vec<Mapping> {
    let mut out = Vec::new();
    let mut src_line = 0i64;
    let mut src_col = 0i64;
    for (line_idx, line) in encoded.split(';').enumerate() {
        let mut gen_col = 0i64;
        for segment in line.split(',') {
            if segment.is_empty() {
                continue;
            }
            let mut chars = segment.chars().peekable();
            let Some(col_delta) = vlq_decode(&mut chars) else {
                continue;
            };
            gen_col += col_delta;
            if vlq_decode(&mut chars).is_none() {
                continue; // no source reference
            }
            let Some(line_delta) = vlq_decode(&mut chars) else {
                continue;
            };
            let Some(src_col_delta) = vlq_decode(&mut chars) else {
                continue;
            };
            src_line += line_delta;
            src_col += src_col_delta;
            out.push(Mapping {
                generated_line: line_idx as u32,
                generated_column: gen_col as u32,
                source_line: src_line as u32,
                source_column: src_col as u32,
            });
        }
    }
    out
}

/// Shifts every record down by `lines` prepended lines.
pub fn shift_lines(mappings: &mut [Mapping], lines: u32) {
    for m in mappings.iter_mut() {
        m.generated_line += lines;
    }
}

/// The string-level equivalent of [`shift_lines`]: each prepended output
/// line is one leading `;` in the encoded form. The `"use strict"`
/// directive is accounted for exactly this way.
pub fn shift_encoded_lines(encoded: &str, lines: usize) -> String {
    let mut out = String::with_capacity(encoded.len() + lines);
    for _ in 0..lines {
        out.push(';');
    }
    out.push_str(encoded);
    out
}

/// Closest-mapping query over an encoded mappings string. Takes a 1-based
/// generated line; returns a 1-based original line with a 0-based column.
pub fn original_position_for(encoded: &str, line: u32, column: u32) -> Option<(u32, u32)> {
    let target_line = line.checked_sub(1)?;
    decode_mappings(encoded)
        .into_iter()
        .filter(|m| m.generated_line == target_line && m.generated_column <= column)
        .max_by_key(|m| m.generated_column)
        .map(|m| (m.source_line + 1, m.source_column))
}

/// Parses a serialized map, for consumers that only hold JSON.
pub fn parse(json: &str) -> Result<SourceMap, HqlError> {
    serde_json::from_str(json).map_err(|e| {
        let ctx = ReportContext::new(SourceContext::fallback("source map"), "codegen");
        ctx.report(
            ErrorKind::UnsupportedNode {
                kind: format!("invalid source map: {}", e),
            },
            crate::errors::unspanned(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_round_trips_signed_values() {
        for value in [-1000, -16, -1, 0, 1, 15, 16, 1000] {
            let mut s = String::new();
            vlq_encode(value, &mut s);
            let decoded = vlq_decode(&mut s.chars().peekable()).unwrap();
            assert_eq!(decoded, value, "value {} through '{}'", value, s);
        }
    }

    #[test]
    fn known_vlq_encodings() {
        let mut s = String::new();
        vlq_encode(0, &mut s);
        assert_eq!(s, "A");
        s.clear();
        vlq_encode(1, &mut s);
        assert_eq!(s, "C");
        s.clear();
        vlq_encode(-1, &mut s);
        assert_eq!(s, "D");
    }

    #[test]
    fn mappings_round_trip() {
        let mappings = vec![
            Mapping {
                generated_line: 0,
                generated_column: 0,
                source_line: 0,
                source_column: 0,
            },
            Mapping {
                generated_line: 0,
                generated_column: 6,
                source_line: 0,
                source_column: 5,
            },
            Mapping {
                generated_line: 2,
                generated_column: 0,
                source_line: 1,
                source_column: 2,
            },
        ];
        let encoded = encode_mappings(&mappings);
        assert_eq!(decode_mappings(&encoded), mappings);
    }

    #[test]
    fn shifting_prepends_semicolons() {
        let mappings = vec![Mapping {
            generated_line: 0,
            generated_column: 0,
            source_line: 0,
            source_column: 0,
        }];
        let encoded = encode_mappings(&mappings);
        let shifted = shift_encoded_lines(&encoded, 3);
        let decoded = decode_mappings(&shifted);
        assert_eq!(decoded[0].generated_line, 3);
        assert_eq!(decoded[0].source_line, 0);
    }

    #[test]
    fn original_position_picks_the_closest_mapping() {
        let mappings = vec![
            Mapping {
                generated_line: 0,
                generated_column: 0,
                source_line: 0,
                source_column: 0,
            },
            Mapping {
                generated_line: 0,
                generated_column: 10,
                source_line: 2,
                source_column: 4,
            },
        ];
        let encoded = encode_mappings(&mappings);
        assert_eq!(original_position_for(&encoded, 1, 12), Some((3, 4)));
        assert_eq!(original_position_for(&encoded, 1, 3), Some((1, 0)));
        assert_eq!(original_position_for(&encoded, 2, 0), None);
    }
}
