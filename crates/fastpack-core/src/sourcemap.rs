//! Source map generation.
//!
//! The assembler records [`Mapping`]s while it concatenates module bodies;
//! a [`SourceMapEncoder`] turns them into a V3 source map document.

use serde::Serialize;

/// One generated position mapped back to an original position. All fields
/// are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source: u32,
    pub original_line: u32,
    pub original_column: u32,
}

/// Everything needed to encode a map for one bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMapSpec {
    /// Source names, indexed by [`Mapping::source`].
    pub sources: Vec<String>,
    /// Original text of each source, parallel to `sources`.
    pub sources_content: Vec<String>,
    pub mappings: Vec<Mapping>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Embed `sourcesContent`.
    pub include_contents: bool,
    /// Keep only the first segment of every generated line.
    pub low_resolution: bool,
}

/// Serializes a [`SourceMapSpec`] for the bundle written to `file`.
pub trait SourceMapEncoder: Send + Sync {
    fn encode(&self, file: &str, spec: &SourceMapSpec, options: EncodeOptions) -> String;
}

/// V3 encoder with base64 VLQ mappings.
#[derive(Debug, Default, Clone, Copy)]
pub struct VlqEncoder;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson<'a> {
    version: u8,
    file: &'a str,
    sources: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    sources_content: Option<&'a [String]>,
    names: [&'a str; 0],
    mappings: String,
}

impl SourceMapEncoder for VlqEncoder {
    fn encode(&self, file: &str, spec: &SourceMapSpec, options: EncodeOptions) -> String {
        let doc = SourceMapJson {
            version: 3,
            file,
            sources: &spec.sources,
            sources_content: options.include_contents.then_some(spec.sources_content.as_slice()),
            names: [],
            mappings: encode_mappings(&spec.mappings, options.low_resolution),
        };
        // Serializing plain strings and slices cannot fail.
        serde_json::to_string(&doc).unwrap_or_default()
    }
}

/// Encode mappings into the `mappings` field of a V3 map.
#[must_use]
pub fn encode_mappings(mappings: &[Mapping], low_resolution: bool) -> String {
    let mut sorted = mappings.to_vec();
    sorted.sort_unstable();
    sorted.dedup_by_key(|m| (m.generated_line, m.generated_column));

    let mut out = String::new();
    let mut line: u32 = 0;
    let mut first_in_line = true;
    let mut prev_column: i64 = 0;
    let mut prev_source: i64 = 0;
    let mut prev_original_line: i64 = 0;
    let mut prev_original_column: i64 = 0;

    for m in &sorted {
        while line < m.generated_line {
            out.push(';');
            line += 1;
            first_in_line = true;
            prev_column = 0;
        }
        if !first_in_line {
            if low_resolution {
                continue;
            }
            out.push(',');
        }
        first_in_line = false;

        vlq_encode(i64::from(m.generated_column) - prev_column, &mut out);
        vlq_encode(i64::from(m.source) - prev_source, &mut out);
        vlq_encode(i64::from(m.original_line) - prev_original_line, &mut out);
        vlq_encode(i64::from(m.original_column) - prev_original_column, &mut out);

        prev_column = i64::from(m.generated_column);
        prev_source = i64::from(m.source);
        prev_original_line = i64::from(m.original_line);
        prev_original_column = i64::from(m.original_column);
    }
    out
}

/// Append the base64 VLQ encoding of `value`.
pub fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20;
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Columns where a token starts: the first non-blank character and every
/// boundary between identifier text and punctuation.
#[must_use]
pub fn token_starts(line: &str) -> Vec<u32> {
    let mut starts = Vec::new();
    let mut prev: Option<char> = None;
    for (col, c) in line.chars().enumerate() {
        let start = !c.is_whitespace()
            && match prev {
                None => true,
                Some(p) if p.is_whitespace() => true,
                Some(p) => is_ident_char(p) != is_ident_char(c) || !is_ident_char(c),
            };
        if start {
            #[allow(clippy::cast_possible_truncation)]
            starts.push(col as u32);
        }
        prev = Some(c);
    }
    starts
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(gl: u32, gc: u32, src: u32, ol: u32, oc: u32) -> Mapping {
        Mapping {
            generated_line: gl,
            generated_column: gc,
            source: src,
            original_line: ol,
            original_column: oc,
        }
    }

    #[test]
    fn test_vlq_encode() {
        let enc = |v| {
            let mut s = String::new();
            vlq_encode(v, &mut s);
            s
        };
        assert_eq!(enc(0), "A");
        assert_eq!(enc(1), "C");
        assert_eq!(enc(-1), "D");
        assert_eq!(enc(15), "e");
        assert_eq!(enc(16), "gB");
        assert_eq!(enc(-16), "hB");
    }

    #[test]
    fn test_encode_mappings_lines_and_segments() {
        let mappings = [m(0, 0, 0, 0, 0), m(0, 4, 0, 0, 4), m(2, 0, 1, 0, 0)];
        assert_eq!(encode_mappings(&mappings, false), "AAAA,IAAI;;ACAJ");
    }

    #[test]
    fn test_encode_mappings_unsorted_input() {
        let mappings = [m(2, 0, 1, 0, 0), m(0, 4, 0, 0, 4), m(0, 0, 0, 0, 0)];
        assert_eq!(encode_mappings(&mappings, false), "AAAA,IAAI;;ACAJ");
    }

    #[test]
    fn test_low_resolution_keeps_first_segment() {
        let mappings = [m(0, 0, 0, 0, 0), m(0, 4, 0, 0, 4), m(1, 2, 0, 1, 2)];
        assert_eq!(encode_mappings(&mappings, true), "AAAA;EACE");
    }

    #[test]
    fn test_encoder_json() {
        let spec = SourceMapSpec {
            sources: vec!["app/a.js".into()],
            sources_content: vec!["var a = 1;".into()],
            mappings: vec![m(1, 0, 0, 0, 0)],
        };
        let json = VlqEncoder.encode("out.js", &spec, EncodeOptions::default());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["file"], "out.js");
        assert_eq!(value["sources"][0], "app/a.js");
        assert_eq!(value["mappings"], ";AAAA");
        assert!(value.get("sourcesContent").is_none());

        let json = VlqEncoder.encode(
            "out.js",
            &spec,
            EncodeOptions {
                include_contents: true,
                low_resolution: false,
            },
        );
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sourcesContent"][0], "var a = 1;");
    }

    #[test]
    fn test_token_starts() {
        assert_eq!(token_starts("  var a = b.c;"), vec![2, 6, 8, 10, 11, 12, 13]);
        assert!(token_starts("   ").is_empty());
    }
}
